//! Command-line interface components
//!
//! This module contains CLI-specific code for databrew, including argument
//! parsing, confirmation prompts and signal handling.

pub mod args;
pub mod commands;
pub mod prompt;
pub mod signals;

pub use args::{Cli, Commands, FetchArgs, GlobalArgs, InitArgs, ListArgs, PathsArgs};
pub use commands::{handle_fetch, handle_init, handle_list, handle_paths};
pub use prompt::stdin_confirm;
pub use signals::run_until_signal;
