//! Local file validation
//!
//! A best-effort check that a file in the local store is worth keeping. It
//! catches empty files and truncated archives left by interrupted transfers
//! from other tools; it does not verify content against the remote.
//!
//! | extension            | check                                   |
//! |----------------------|-----------------------------------------|
//! | `.nc`, `.nc4`, `.cdf`| netCDF classic or HDF5 signature        |
//! | `.zip`               | central directory opens                 |
//! | `.gz`                | whole stream decompresses               |
//! | anything else        | exists and is non-empty                 |

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::debug;

/// netCDF classic, 64-bit offset and CDF-5 share this prefix
const NETCDF_CLASSIC_MAGIC: &[u8; 3] = b"CDF";

/// netCDF-4 files are HDF5 files
const HDF5_MAGIC: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

/// Whether the file at `path` exists and looks intact
pub fn is_local_file_valid(path: &Path) -> bool {
    let size = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return false,
    };
    if size == 0 {
        debug!("{} is empty", path.display());
        return false;
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let result = match extension.as_deref() {
        Some("nc" | "nc4" | "cdf") => check_netcdf(path),
        Some("zip") => check_zip(path),
        Some("gz") => check_gzip(path),
        _ => Ok(true),
    };

    match result {
        Ok(valid) => {
            if !valid {
                debug!("{} failed its format check", path.display());
            }
            valid
        }
        Err(e) => {
            debug!("{} could not be checked: {}", path.display(), e);
            false
        }
    }
}

/// Validate on the blocking pool; archive checks read whole files
pub async fn is_local_file_valid_async(path: PathBuf) -> bool {
    tokio::task::spawn_blocking(move || is_local_file_valid(&path))
        .await
        .unwrap_or(false)
}

fn check_netcdf(path: &Path) -> io::Result<bool> {
    let mut header = [0u8; 8];
    let mut file = File::open(path)?;
    let read = read_prefix(&mut file, &mut header)?;
    let header = &header[..read];

    let classic = header.len() >= 4
        && header.starts_with(NETCDF_CLASSIC_MAGIC)
        && matches!(header[3], 1 | 2 | 5);
    Ok(classic || header == HDF5_MAGIC)
}

fn check_zip(path: &Path) -> io::Result<bool> {
    let file = File::open(path)?;
    Ok(zip::ZipArchive::new(file).is_ok())
}

fn check_gzip(path: &Path) -> io::Result<bool> {
    let file = File::open(path)?;
    let mut decoder = MultiGzDecoder::new(file);
    Ok(io::copy(&mut decoder, &mut io::sink()).is_ok())
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
