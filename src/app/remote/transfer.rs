//! Cancellable blocking copies
//!
//! FTP and SFTP transfers run on blocking threads that outlive a dropped
//! fetch future. The downloader hands each fetch a [`CancelFlag`]; a blocking
//! copy checks it between chunks and deletes its own destination whenever it
//! stops without completing, or completes after the flag was raised.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::constants::files;
use crate::errors::{RemoteError, RemoteResult};

/// Shared cancellation flag for one transfer
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Copy `reader` into a new file at `destination`
///
/// The file is removed again if the copy fails, or if `cancel` is raised
/// at any point before the copy has returned.
pub fn copy_to_file(
    reader: &mut impl Read,
    destination: &Path,
    cancel: &CancelFlag,
) -> RemoteResult<u64> {
    if cancel.is_cancelled() {
        return Err(RemoteError::Cancelled);
    }

    let result = write_chunks(reader, destination, cancel).and_then(|bytes| {
        // the last check runs after the file is closed
        if cancel.is_cancelled() {
            Err(RemoteError::Cancelled)
        } else {
            Ok(bytes)
        }
    });

    if result.is_err() {
        remove_partial(destination);
    }
    result
}

fn write_chunks(reader: &mut impl Read, destination: &Path, cancel: &CancelFlag) -> RemoteResult<u64> {
    let file = File::create(destination)?;
    let mut writer = BufWriter::with_capacity(files::COPY_BUFFER_SIZE, file);
    let mut buffer = vec![0u8; files::COPY_BUFFER_SIZE];
    let mut bytes = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..n])?;
        bytes += n as u64;
    }
    writer.flush()?;
    Ok(bytes)
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed unfinished transfer {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove {}: {}", path.display(), e),
    }
}
