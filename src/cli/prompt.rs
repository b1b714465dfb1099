//! Interactive confirmation before fetching

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing::debug;

use crate::app::ConfirmFn;

/// Whether an answer accepts: anything starting with `y`, any case
pub fn is_yes(answer: &str) -> bool {
    answer
        .trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.eq_ignore_ascii_case(&'y'))
}

/// Ask on stdout and read one line from `input`
pub fn ask_to_download(count: usize, input: &mut impl BufRead) -> bool {
    print!(
        "{} missing file{} to download. Continue [y/n]: ",
        count,
        if count == 1 { "" } else { "s" }
    );
    let _ = io::stdout().flush();

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(e) => {
            debug!("Could not read answer: {}", e);
            false
        }
    }
}

/// Confirmation reading from stdin; declines when stdin is not a terminal
pub fn stdin_confirm() -> ConfirmFn {
    Arc::new(|count| {
        if !atty::is(atty::Stream::Stdin) {
            println!(
                "{} missing file{} not fetched; pass --yes to download without a terminal",
                count,
                if count == 1 { "" } else { "s" }
            );
            return false;
        }
        ask_to_download(count, &mut io::stdin().lock())
    })
}
