//! FTP backend
//!
//! `suppaftp`'s synchronous stream is owned by the backend and moved into a
//! blocking task for every command, then handed back. A command that fails
//! with a connection error drops the stream; later calls report the
//! connection as lost instead of reusing a broken control channel.
//!
//! Reply handling:
//!
//! | reply     | listing         | RETR            |
//! |-----------|-----------------|-----------------|
//! | 421       | connection lost | connection lost |
//! | 530       | authentication  | authentication  |
//! | 450, 550  | empty           | missing         |
//! | other 4xx | error           | missing         |

use std::net::ToSocketAddrs;
use std::path::Path;

use async_trait::async_trait;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, info, warn};

use super::listing::{entry_name, ListingCache};
use super::transfer::copy_to_file;
use super::{
    remote_path, CancelFlag, Credentials, FetchStatus, Protocol, RemoteBackend, RemoteSettings,
};
use crate::constants::remote;
use crate::errors::{RemoteError, RemoteResult};

/// Service closing the control connection
const SERVICE_CLOSING: u32 = 421;

/// File busy or temporarily unavailable
const FILE_ACTION_NOT_TAKEN: u32 = 450;

/// Reply code for a rejected login
const NOT_LOGGED_IN: u32 = 530;

/// Reply code for a missing file or directory
const FILE_UNAVAILABLE: u32 = 550;

/// Who a connection talks to, for error messages
#[derive(Debug, Clone)]
struct Peer {
    host: String,
    username: String,
}

/// One FTP control connection
pub struct FtpBackend {
    peer: Peer,
    stream: Option<FtpStream>,
    cache: ListingCache,
}

impl FtpBackend {
    /// Connect and log in
    pub async fn connect(settings: &RemoteSettings) -> RemoteResult<Self> {
        let peer = Peer {
            host: settings.host.clone(),
            username: settings.credentials.username.clone(),
        };
        let port = settings.port();
        let credentials = settings.credentials.clone();

        let session_peer = peer.clone();
        let stream = tokio::task::spawn_blocking(move || {
            open_session(&session_peer, port, &credentials)
        })
        .await
        .map_err(|e| RemoteError::Task(e.to_string()))??;

        info!("Connected to ftp://{}:{}", peer.host, port);
        Ok(Self {
            peer,
            stream: Some(stream),
            cache: ListingCache::new(),
        })
    }

    /// Run a blocking command against the owned stream
    async fn with_stream<T, F>(&mut self, op: F) -> RemoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream, &Peer) -> RemoteResult<T> + Send + 'static,
    {
        let mut stream = self.stream.take().ok_or_else(|| RemoteError::ConnectionLost {
            host: self.peer.host.clone(),
            reason: "connection closed after an earlier failure".to_string(),
        })?;
        let peer = self.peer.clone();

        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream, &peer);
            (stream, result)
        })
        .await
        .map_err(|e| RemoteError::Task(e.to_string()))?;

        match &result {
            Err(e) if e.is_connection_fatal() => {
                debug!("Dropping FTP connection to {}", self.peer.host)
            }
            _ => self.stream = Some(stream),
        }
        result
    }
}

#[async_trait]
impl RemoteBackend for FtpBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn listing_cache(&mut self) -> &mut ListingCache {
        &mut self.cache
    }

    async fn list_directory(&mut self, directory: &str) -> RemoteResult<Vec<String>> {
        let path = remote_path(directory);
        self.with_stream(move |stream, peer| match stream.nlst(Some(path.as_str())) {
            Ok(entries) => {
                let mut names: Vec<String> =
                    entries.iter().map(|e| entry_name(e).to_string()).collect();
                names.sort();
                Ok(names)
            }
            Err(e) => listing_failure(peer, &path, e),
        })
        .await
    }

    async fn fetch(
        &mut self,
        remote: &str,
        destination: &Path,
        cancel: &CancelFlag,
    ) -> RemoteResult<FetchStatus> {
        let path = remote_path(remote);
        let destination = destination.to_path_buf();
        let cancel = cancel.clone();
        self.with_stream(move |stream, peer| retrieve(stream, peer, &path, &destination, &cancel))
            .await
    }

    async fn close(&mut self) -> RemoteResult<()> {
        if self.stream.is_some() {
            let result = self.with_stream(|stream, peer| {
                stream.quit().map_err(|e| map_ftp_error(peer, e))
            });
            if let Err(e) = result.await {
                debug!("FTP quit failed: {}", e);
            }
        }
        self.stream = None;
        Ok(())
    }
}

fn open_session(peer: &Peer, port: u16, credentials: &Credentials) -> RemoteResult<FtpStream> {
    let host = peer.host.as_str();
    let address = (host, port)
        .to_socket_addrs()
        .map_err(|e| RemoteError::ConnectionLost {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| RemoteError::ConnectionLost {
            host: host.to_string(),
            reason: "host name did not resolve".to_string(),
        })?;

    let mut stream = FtpStream::connect_timeout(address, remote::CONNECT_TIMEOUT)
        .map_err(|e| map_ftp_error(peer, e))?;
    stream
        .login(credentials.username.as_str(), credentials.password.as_str())
        .map_err(|e| map_ftp_error(peer, e))?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| map_ftp_error(peer, e))?;
    Ok(stream)
}

fn retrieve(
    stream: &mut FtpStream,
    peer: &Peer,
    path: &str,
    destination: &Path,
    cancel: &CancelFlag,
) -> RemoteResult<FetchStatus> {
    let mut reader = match stream.retr_as_stream(path) {
        Ok(reader) => reader,
        Err(FtpError::UnexpectedResponse(response))
            if is_unavailable(response.status.code()) =>
        {
            let code = response.status.code();
            if code == FILE_UNAVAILABLE {
                debug!("{} vanished before transfer", path);
            } else {
                warn!("Treating {} as missing: FTP {}", path, code);
            }
            return Ok(FetchStatus::NotFound);
        }
        Err(e) => return Err(map_ftp_error(peer, e)),
    };

    // a half-read data connection leaves the control channel mid-transfer
    let bytes = copy_to_file(&mut reader, destination, cancel).map_err(|e| match e {
        RemoteError::Io(io) => RemoteError::ConnectionLost {
            host: peer.host.clone(),
            reason: io.to_string(),
        },
        other => other,
    })?;

    stream
        .finalize_retr_stream(reader)
        .map_err(|e| map_ftp_error(peer, e))?;
    Ok(FetchStatus::Fetched { bytes })
}

/// Listing failures: refusals and missing directories list as empty, other
/// replies and a broken connection are errors
fn listing_failure(peer: &Peer, path: &str, error: FtpError) -> RemoteResult<Vec<String>> {
    match error {
        FtpError::UnexpectedResponse(response) if is_refusal(response.status.code()) => {
            debug!(
                "FTP server refused listing of {} ({})",
                path,
                response.status.code()
            );
            Ok(Vec::new())
        }
        other => Err(map_ftp_error(peer, other)),
    }
}

/// Listing replies meaning the directory is absent or busy
fn is_refusal(code: u32) -> bool {
    matches!(code, FILE_ACTION_NOT_TAKEN | FILE_UNAVAILABLE)
}

/// RETR replies meaning the file cannot be had now
fn is_unavailable(code: u32) -> bool {
    code == FILE_UNAVAILABLE || ((400..500).contains(&code) && code != SERVICE_CLOSING)
}

fn map_ftp_error(peer: &Peer, error: FtpError) -> RemoteError {
    match error {
        FtpError::ConnectionError(io) => RemoteError::ConnectionLost {
            host: peer.host.clone(),
            reason: io.to_string(),
        },
        FtpError::UnexpectedResponse(response) => {
            let code = response.status.code();
            let message = format!(
                "{} {}",
                code,
                String::from_utf8_lossy(&response.body).trim()
            );
            reply_error(peer, code, message)
        }
        other => RemoteError::Protocol {
            protocol: "FTP",
            message: other.to_string(),
        },
    }
}

fn reply_error(peer: &Peer, code: u32, message: String) -> RemoteError {
    match code {
        SERVICE_CLOSING => RemoteError::ConnectionLost {
            host: peer.host.clone(),
            reason: message,
        },
        NOT_LOGGED_IN => RemoteError::Authentication {
            host: peer.host.clone(),
            username: peer.username.clone(),
        },
        _ => RemoteError::Protocol {
            protocol: "FTP",
            message,
        },
    }
}
