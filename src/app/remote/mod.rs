//! Remote backends
//!
//! Every supported transport implements [`RemoteBackend`]: list a directory,
//! resolve a filename glob to exactly one remote file, and stream that file
//! to a local path. A backend value owns one connection and its
//! [`ListingCache`], so a worker that needs its own connection asks a
//! [`Connector`] for a fresh backend.
//!
//! The transport is selected from the URL scheme:
//!
//! | scheme           | backend           |
//! |------------------|-------------------|
//! | `ftp`            | [`FtpBackend`]    |
//! | `sftp`           | [`SftpBackend`]   |
//! | `http`, `https`  | [`HttpBackend`]   |
//! | `cds`            | [`CdsBackend`]    |
//!
//! HTTP and CDS cannot list directories; their globs resolve to themselves and
//! a missing file shows up as [`FetchStatus::NotFound`] during the transfer.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::constants::{self, remote};
use crate::errors::{ConfigError, ConfigResult, RemoteResult};

pub mod cds;
pub mod ftp;
pub mod http;
pub mod listing;
pub mod sftp;
pub mod transfer;

pub use cds::CdsBackend;
pub use ftp::FtpBackend;
pub use http::{HttpBackend, HttpClientConfig};
pub use listing::ListingCache;
pub use sftp::SftpBackend;
pub use transfer::CancelFlag;

/// Transport named by a URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ftp,
    Sftp,
    Http,
    Cds,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Sftp => "sftp",
            Protocol::Http => "http",
            Protocol::Cds => "cds",
        }
    }

    /// Parse a protocol from a URL scheme
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "ftp" => Some(Protocol::Ftp),
            "sftp" => Some(Protocol::Sftp),
            "http" | "https" => Some(Protocol::Http),
            "cds" => Some(Protocol::Cds),
            _ => None,
        }
    }

    /// Protocol of a remote URL or URL template
    pub fn from_url(url: &str) -> ConfigResult<Self> {
        let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or("");
        Self::from_scheme(scheme).ok_or_else(|| ConfigError::UnsupportedScheme {
            url: url.to_string(),
            scheme: scheme.to_string(),
            recognized: remote::RECOGNIZED_SCHEMES.join(", "),
        })
    }

    /// Whether the backend can list directories and match globs
    pub fn supports_listing(&self) -> bool {
        matches!(self, Protocol::Ftp | Protocol::Sftp)
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Protocol::Ftp => Some(remote::FTP_PORT),
            Protocol::Sftp => Some(remote::SFTP_PORT),
            Protocol::Http | Protocol::Cds => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme, host and path of a remote URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteLocation<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    /// Always starts with `/`
    pub path: &'a str,
}

impl<'a> RemoteLocation<'a> {
    /// Split a URL without interpreting `?` or `[` so glob characters stay
    /// part of the path
    pub fn parse(url: &'a str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        let (host, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, "/"),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self { scheme, host, path })
    }
}

/// Path component of a remote URL, or the input when it is not a URL
pub fn remote_path(url: &str) -> String {
    RemoteLocation::parse(url)
        .map(|l| l.path.to_string())
        .unwrap_or_else(|| url.to_string())
}

/// Reject URL templates that carry an explicit port
pub fn check_host(url: &str) -> ConfigResult<()> {
    let Some(location) = RemoteLocation::parse(url) else {
        return Ok(());
    };
    let host = location.host.rsplit('@').next().unwrap_or(location.host);
    if host.starts_with('[') {
        return Ok(());
    }
    match host.split_once(':') {
        Some((_, port)) => Err(ConfigError::PortInUrl {
            url: url.to_string(),
            port: port.to_string(),
        }),
        None => Ok(()),
    }
}

/// Login details for a remote host
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub port: Option<u16>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self {
            username: remote::DEFAULT_USERNAME.to_string(),
            password: String::new(),
            port: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Everything needed to open a connection for one record
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub protocol: Protocol,
    pub host: String,
    pub credentials: Credentials,
    pub request_timeout: Duration,
    pub cds_poll_interval: Duration,
    /// Longest wait for a CDS task to complete
    pub cds_max_wait: Duration,
}

impl RemoteSettings {
    /// Settings for the host of a remote URL template
    pub fn for_url(url: &str, credentials: Credentials) -> ConfigResult<Self> {
        let protocol = Protocol::from_url(url)?;
        check_host(url)?;
        let host = RemoteLocation::parse(url)
            .map(|l| l.host.to_string())
            .unwrap_or_default();
        Ok(Self {
            protocol,
            host,
            credentials,
            request_timeout: constants::http::DEFAULT_TIMEOUT,
            cds_poll_interval: constants::cds::DEFAULT_POLL_INTERVAL,
            cds_max_wait: constants::cds::DEFAULT_MAX_WAIT,
        })
    }

    /// Port to connect to, falling back to the protocol default
    pub fn port(&self) -> u16 {
        self.credentials
            .port
            .or_else(|| self.protocol.default_port())
            .unwrap_or(0)
    }
}

/// Result of resolving a remote glob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobMatch {
    /// Full remote path of the single match
    Found(String),
    NotFound,
}

/// Result of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Fetched { bytes: u64 },
    NotFound,
}

/// A connection to a remote store
#[async_trait]
pub trait RemoteBackend: Send {
    fn protocol(&self) -> Protocol;

    /// Listing cache owned by this connection
    fn listing_cache(&mut self) -> &mut ListingCache;

    /// Entry names of a remote directory. Directories that do not exist, and
    /// transient server refusals, list as empty.
    async fn list_directory(&mut self, directory: &str) -> RemoteResult<Vec<String>>;

    /// Resolve the filename glob of `remote` against its directory listing
    async fn resolve_glob(&mut self, remote: &str) -> RemoteResult<GlobMatch> {
        let (directory, pattern) = listing::split_remote(remote);
        if self.listing_cache().get(directory).is_none() {
            debug!("Listing remote directory {}", directory);
            let entries = self.list_directory(directory).await?;
            self.listing_cache().store(directory, entries);
        }
        let entries = self.listing_cache().get(directory).unwrap_or(&[]);
        listing::select_match(directory, pattern, entries)
    }

    /// Stream `remote` into the file at `destination`
    ///
    /// Work that keeps running after the fetch future is dropped must stop
    /// once `cancel` is raised and leave no file at `destination`.
    async fn fetch(
        &mut self,
        remote: &str,
        destination: &Path,
        cancel: &CancelFlag,
    ) -> RemoteResult<FetchStatus>;

    /// Close the connection
    async fn close(&mut self) -> RemoteResult<()> {
        Ok(())
    }
}

/// Opens backend connections; each call yields an independent connection
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> RemoteResult<Box<dyn RemoteBackend>>;

    /// Human readable target, used in error messages
    fn target(&self) -> String;
}

/// Connector that dispatches on the protocol of a record's URL
#[derive(Debug, Clone)]
pub struct BackendConnector {
    settings: RemoteSettings,
}

impl BackendConnector {
    pub fn new(settings: RemoteSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }
}

#[async_trait]
impl Connector for BackendConnector {
    async fn connect(&self) -> RemoteResult<Box<dyn RemoteBackend>> {
        let settings = &self.settings;
        debug!("Connecting to {}://{}", settings.protocol, settings.host);
        let backend: Box<dyn RemoteBackend> = match settings.protocol {
            Protocol::Ftp => Box::new(FtpBackend::connect(settings).await?),
            Protocol::Sftp => Box::new(SftpBackend::connect(settings).await?),
            Protocol::Http => Box::new(HttpBackend::new(settings)?),
            Protocol::Cds => Box::new(CdsBackend::new(settings)?),
        };
        Ok(backend)
    }

    fn target(&self) -> String {
        format!("{}://{}", self.settings.protocol, self.settings.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_table() {
        assert_eq!(Protocol::from_url("ftp://h/x").unwrap(), Protocol::Ftp);
        assert_eq!(Protocol::from_url("sftp://h/x").unwrap(), Protocol::Sftp);
        assert_eq!(Protocol::from_url("https://h/x").unwrap(), Protocol::Http);
        assert_eq!(Protocol::from_url("HTTP://h/x").unwrap(), Protocol::Http);
        assert_eq!(Protocol::from_url("cds://h/x").unwrap(), Protocol::Cds);
    }

    #[test]
    fn test_unknown_scheme_names_recognized_set() {
        let err = Protocol::from_url("gopher://h/x").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gopher"));
        assert!(msg.contains("sftp"));

        assert!(matches!(
            Protocol::from_url("/local/only"),
            Err(ConfigError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_port_in_url_rejected() {
        assert!(matches!(
            check_host("ftp://host:2121/pub/{t:%Y}.nc"),
            Err(ConfigError::PortInUrl { port, .. }) if port == "2121"
        ));
        assert!(check_host("ftp://host/pub/{t:%H:%M}.nc").is_ok());
    }

    #[test]
    fn test_location_keeps_glob_chars() {
        let loc = RemoteLocation::parse("ftp://host/pub/a_2020?.nc").unwrap();
        assert_eq!(loc.scheme, "ftp");
        assert_eq!(loc.host, "host");
        assert_eq!(loc.path, "/pub/a_2020?.nc");

        let loc = RemoteLocation::parse("ftp://host").unwrap();
        assert_eq!(loc.path, "/");
    }

    #[test]
    fn test_settings_port_defaults() {
        let settings = RemoteSettings::for_url("sftp://h/x", Credentials::anonymous()).unwrap();
        assert_eq!(settings.port(), 22);
        assert_eq!(settings.host, "h");

        let creds = Credentials {
            port: Some(2222),
            ..Credentials::anonymous()
        };
        let settings = RemoteSettings::for_url("sftp://h/x", creds).unwrap();
        assert_eq!(settings.port(), 2222);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "me".into(),
            password: "hunter2".into(),
            port: None,
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
