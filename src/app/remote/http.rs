//! HTTP(S) backend
//!
//! HTTP servers give no portable directory listing, so globs are passed
//! through unchanged and existence is decided by the response status. Any
//! status other than success counts as the file not being there, so a
//! refused or temporarily unavailable date does not stop the dates after it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::listing::ListingCache;
use super::{
    CancelFlag, Credentials, FetchStatus, GlobMatch, Protocol, RemoteBackend, RemoteSettings,
};
use crate::constants::{files, http, remote};
use crate::errors::{RemoteError, RemoteResult};

/// Configuration for the shared HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Whole-request timeout, including the body
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
        }
    }
}

impl HttpClientConfig {
    /// Builds the HTTP client with the specified configuration
    pub fn build_http_client(&self) -> RemoteResult<Client> {
        let mut builder = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(http::MAX_REDIRECTS))
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }
        if let Some(idle_timeout) = self.pool_idle_timeout {
            builder = builder.pool_idle_timeout(idle_timeout);
        }

        builder.build().map_err(RemoteError::Http)
    }
}

/// Basic auth pair, omitted for anonymous access
pub(crate) fn basic_auth(credentials: &Credentials) -> Option<(String, String)> {
    let anonymous =
        credentials.username.is_empty() || credentials.username == remote::DEFAULT_USERNAME;
    if anonymous && credentials.password.is_empty() {
        None
    } else {
        Some((credentials.username.clone(), credentials.password.clone()))
    }
}

/// Pass-through backend for `http://` and `https://` URLs
pub struct HttpBackend {
    client: Client,
    auth: Option<(String, String)>,
    cache: ListingCache,
}

impl HttpBackend {
    pub fn new(settings: &RemoteSettings) -> RemoteResult<Self> {
        let config = HttpClientConfig {
            request_timeout: settings.request_timeout,
            ..Default::default()
        };
        Ok(Self {
            client: config.build_http_client()?,
            auth: basic_auth(&settings.credentials),
            cache: ListingCache::new(),
        })
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn listing_cache(&mut self) -> &mut ListingCache {
        &mut self.cache
    }

    async fn list_directory(&mut self, _directory: &str) -> RemoteResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn resolve_glob(&mut self, remote: &str) -> RemoteResult<GlobMatch> {
        Ok(GlobMatch::Found(remote.to_string()))
    }

    /// The body is written from this future; dropping it stops the transfer
    async fn fetch(
        &mut self,
        remote: &str,
        destination: &Path,
        _cancel: &CancelFlag,
    ) -> RemoteResult<FetchStatus> {
        let mut request = self.client.get(remote);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await?;
        stream_response(remote, response, destination).await
    }
}

/// Write a response body to `destination`. Unsuccessful responses report
/// [`FetchStatus::NotFound`] without creating the file.
pub(crate) async fn stream_response(
    url: &str,
    mut response: reqwest::Response,
    destination: &Path,
) -> RemoteResult<FetchStatus> {
    let status = response.status();
    if is_missing_status(status) {
        debug!("URL does not exist: {} ({})", url, status);
        return Ok(FetchStatus::NotFound);
    }
    if !status.is_success() {
        warn!("Treating {} as missing: HTTP {}", url, status);
        return Ok(FetchStatus::NotFound);
    }

    let file = File::create(destination).await?;
    let mut writer = BufWriter::with_capacity(files::COPY_BUFFER_SIZE, file);
    let mut bytes = 0u64;
    while let Some(chunk) = response.chunk().await? {
        writer.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(FetchStatus::Fetched { bytes })
}

fn is_missing_status(status: StatusCode) -> bool {
    matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE)
}
