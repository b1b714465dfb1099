//! SFTP backend over `ssh2`
//!
//! The SSH session and its SFTP channel are blocking; like the FTP backend
//! they are moved into a blocking task per command and handed back. SFTP
//! status replies concern one file and leave the session usable, so a file
//! that cannot be opened counts as missing.

use std::net::TcpStream;
use std::path::Path;

use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use tracing::{debug, info, warn};

use super::listing::{entry_name, ListingCache};
use super::transfer::copy_to_file;
use super::{
    remote_path, CancelFlag, Credentials, FetchStatus, Protocol, RemoteBackend, RemoteSettings,
};
use crate::constants::remote;
use crate::errors::{RemoteError, RemoteResult};

/// `LIBSSH2_FX_NO_SUCH_FILE`
const SFTP_NO_SUCH_FILE: i32 = 2;

/// `LIBSSH2_FX_NO_SUCH_PATH`
const SFTP_NO_SUCH_PATH: i32 = 10;

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

/// One SSH connection with an open SFTP channel
pub struct SftpBackend {
    host: String,
    connection: Option<SftpSession>,
    cache: ListingCache,
}

impl SftpBackend {
    /// Connect and authenticate with a password
    pub async fn connect(settings: &RemoteSettings) -> RemoteResult<Self> {
        let host = settings.host.clone();
        let port = settings.port();
        let credentials = settings.credentials.clone();

        let session_host = host.clone();
        let connection = tokio::task::spawn_blocking(move || {
            open_session(&session_host, port, &credentials)
        })
        .await
        .map_err(|e| RemoteError::Task(e.to_string()))??;

        info!("Connected to sftp://{}:{}", host, port);
        Ok(Self {
            host,
            connection: Some(connection),
            cache: ListingCache::new(),
        })
    }

    async fn with_session<T, F>(&mut self, op: F) -> RemoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SftpSession, &str) -> RemoteResult<T> + Send + 'static,
    {
        let connection = self
            .connection
            .take()
            .ok_or_else(|| RemoteError::ConnectionLost {
                host: self.host.clone(),
                reason: "connection closed after an earlier failure".to_string(),
            })?;
        let host = self.host.clone();

        let (connection, result) = tokio::task::spawn_blocking(move || {
            let result = op(&connection, &host);
            (connection, result)
        })
        .await
        .map_err(|e| RemoteError::Task(e.to_string()))?;

        match &result {
            Err(e) if e.is_connection_fatal() => debug!("Dropping SSH session to {}", self.host),
            _ => self.connection = Some(connection),
        }
        result
    }
}

#[async_trait]
impl RemoteBackend for SftpBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn listing_cache(&mut self) -> &mut ListingCache {
        &mut self.cache
    }

    async fn list_directory(&mut self, directory: &str) -> RemoteResult<Vec<String>> {
        let path = remote_path(directory);
        self.with_session(move |conn, host| match conn.sftp.readdir(Path::new(&path)) {
            Ok(entries) => {
                let mut names: Vec<String> = entries
                    .iter()
                    .map(|(p, _)| entry_name(&p.to_string_lossy()).to_string())
                    .collect();
                names.sort();
                Ok(names)
            }
            Err(e) if is_missing(&e) => {
                debug!("Remote directory {} does not exist", path);
                Ok(Vec::new())
            }
            Err(e) => Err(map_ssh_error(host, e)),
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
        self.with_session(move |conn, host| {
            let mut reader = match conn.sftp.open(Path::new(&path)) {
                Ok(file) => file,
                Err(e) if is_missing(&e) => return Ok(FetchStatus::NotFound),
                Err(e) if matches!(e.code(), ErrorCode::SFTP(_)) => {
                    warn!("Treating {} as missing: {}", path, e);
                    return Ok(FetchStatus::NotFound);
                }
                Err(e) => return Err(map_ssh_error(host, e)),
            };
            let bytes = copy_to_file(&mut reader, &destination, &cancel)?;
            Ok(FetchStatus::Fetched { bytes })
        })
        .await
    }

    async fn close(&mut self) -> RemoteResult<()> {
        if let Some(conn) = self.connection.take() {
            let result = tokio::task::spawn_blocking(move || {
                conn.session.disconnect(None, "closing", None)
            })
            .await;
            if let Ok(Err(e)) = result {
                debug!("SSH disconnect failed: {}", e);
            }
        }
        Ok(())
    }
}

fn open_session(host: &str, port: u16, credentials: &Credentials) -> RemoteResult<SftpSession> {
    let lost = |reason: String| RemoteError::ConnectionLost {
        host: host.to_string(),
        reason,
    };

    let tcp = TcpStream::connect((host, port)).map_err(|e| lost(e.to_string()))?;

    let mut session = Session::new().map_err(|e| map_ssh_error(host, e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(remote::CONNECT_TIMEOUT.as_millis() as u32);
    session.handshake().map_err(|e| map_ssh_error(host, e))?;
    session
        .userauth_password(&credentials.username, &credentials.password)
        .map_err(|_| RemoteError::Authentication {
            host: host.to_string(),
            username: credentials.username.clone(),
        })?;
    if !session.authenticated() {
        return Err(RemoteError::Authentication {
            host: host.to_string(),
            username: credentials.username.clone(),
        });
    }

    let sftp = session.sftp().map_err(|e| map_ssh_error(host, e))?;
    Ok(SftpSession { session, sftp })
}

fn is_missing(error: &ssh2::Error) -> bool {
    matches!(
        error.code(),
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH)
    )
}

/// Session-level failures end the connection; SFTP status codes do not
fn map_ssh_error(host: &str, error: ssh2::Error) -> RemoteError {
    match error.code() {
        ErrorCode::Session(_) => RemoteError::ConnectionLost {
            host: host.to_string(),
            reason: error.message().to_string(),
        },
        ErrorCode::SFTP(code) => RemoteError::Protocol {
            protocol: "SFTP",
            message: format!("{} (status {})", error.message(), code),
        },
    }
}
