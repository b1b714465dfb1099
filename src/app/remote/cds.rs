//! Copernicus Climate Data Store backend
//!
//! Records address the CDS with a `cds://` URL whose path names the dataset
//! and whose query carries the request fields, e.g.
//!
//! ```text
//! cds://cds.climate.copernicus.eu/reanalysis-era5-single-levels?year={t:%Y}&month={t:%m}
//! ```
//!
//! Comma separated values become lists. Fields left out fall back to an
//! hourly ERA5 single-level request for every day of the month. A fetch
//! submits the request, polls the task until the server has prepared the
//! file, then downloads the result. A task still pending after the
//! configured maximum wait is abandoned with an error.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use super::http::{basic_auth, stream_response, HttpClientConfig};
use super::listing::ListingCache;
use super::{CancelFlag, FetchStatus, GlobMatch, Protocol, RemoteBackend, RemoteSettings};
use crate::constants::cds;
use crate::errors::{RemoteError, RemoteResult};

#[derive(Debug, Deserialize)]
struct TaskReply {
    state: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    error: Option<TaskFailure>,
}

#[derive(Debug, Deserialize)]
struct TaskFailure {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl TaskFailure {
    fn describe(&self) -> String {
        match (&self.message, &self.reason) {
            (Some(m), Some(r)) => format!("{m}: {r}"),
            (Some(m), None) => m.clone(),
            (None, Some(r)) => r.clone(),
            (None, None) => "request failed".to_string(),
        }
    }
}

/// Backend submitting retrieve requests to the CDS API
pub struct CdsBackend {
    client: Client,
    api_base: String,
    auth: Option<(String, String)>,
    poll_interval: Duration,
    max_wait: Duration,
    cache: ListingCache,
}

impl CdsBackend {
    pub fn new(settings: &RemoteSettings) -> RemoteResult<Self> {
        let config = HttpClientConfig {
            request_timeout: settings.request_timeout,
            ..Default::default()
        };
        Ok(Self {
            client: config.build_http_client()?,
            api_base: format!("https://{}{}", settings.host, cds::API_PATH),
            auth: basic_auth(&settings.credentials),
            poll_interval: settings.cds_poll_interval,
            max_wait: settings.cds_max_wait,
            cache: ListingCache::new(),
        })
    }

    /// Point the backend at a different API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, key)) => request.basic_auth(user, Some(key)),
            None => request,
        }
    }

    async fn read_reply(&self, dataset: &str, response: reqwest::Response) -> RemoteResult<TaskReply> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Cds {
                dataset: dataset.to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), body.trim()),
            });
        }
        Ok(response.json::<TaskReply>().await?)
    }

    /// Submit a request and wait for the result location
    async fn retrieve(&self, dataset: &str, request: &Value) -> RemoteResult<String> {
        let submit = self
            .authorized(self.client.post(format!("{}/resources/{}", self.api_base, dataset)))
            .json(request)
            .send()
            .await?;
        let mut reply = self.read_reply(dataset, submit).await?;
        info!("CDS request for {} is {}", dataset, reply.state);
        let deadline = Instant::now() + self.max_wait;

        loop {
            match reply.state.as_str() {
                "completed" => {
                    return reply.location.ok_or_else(|| RemoteError::Cds {
                        dataset: dataset.to_string(),
                        message: "completed task has no download location".to_string(),
                    })
                }
                "failed" => {
                    let message = reply
                        .error
                        .as_ref()
                        .map(TaskFailure::describe)
                        .unwrap_or_else(|| "request failed".to_string());
                    return Err(RemoteError::Cds {
                        dataset: dataset.to_string(),
                        message,
                    });
                }
                state => {
                    let Some(request_id) = reply.request_id.clone() else {
                        return Err(RemoteError::Cds {
                            dataset: dataset.to_string(),
                            message: format!("task in state `{state}` has no request id"),
                        });
                    };
                    if Instant::now() >= deadline {
                        return Err(RemoteError::Cds {
                            dataset: dataset.to_string(),
                            message: format!(
                                "task {} still `{}` after {:?}, giving up",
                                request_id, state, self.max_wait
                            ),
                        });
                    }
                    debug!("CDS task {} is {}", request_id, state);
                    tokio::time::sleep(self.poll_interval).await;
                    let poll = self
                        .authorized(
                            self.client
                                .get(format!("{}/tasks/{}", self.api_base, request_id)),
                        )
                        .send()
                        .await?;
                    reply = self.read_reply(dataset, poll).await?;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteBackend for CdsBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Cds
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

    async fn fetch(
        &mut self,
        remote: &str,
        destination: &Path,
        _cancel: &CancelFlag,
    ) -> RemoteResult<FetchStatus> {
        let (dataset, request) = build_request(remote)?;
        let location = self.retrieve(&dataset, &request).await?;
        debug!("Downloading CDS result {}", location);
        let response = self.authorized(self.client.get(&location)).send().await?;
        stream_response(&location, response, destination).await
    }
}

/// Dataset name and JSON request body encoded in a `cds://` URL
pub fn build_request(remote: &str) -> RemoteResult<(String, Value)> {
    let invalid = |message: String| RemoteError::Cds {
        dataset: remote.to_string(),
        message,
    };
    let url = Url::parse(remote).map_err(|e| invalid(e.to_string()))?;

    let dataset = url.path().trim_matches('/');
    let dataset = if dataset.is_empty() {
        cds::DEFAULT_DATASET.to_string()
    } else {
        dataset.to_string()
    };

    let mut request = Map::new();
    request.insert("product_type".into(), Value::from("reanalysis"));
    request.insert("format".into(), Value::from("netcdf"));
    request.insert("variable".into(), Value::from(cds::DEFAULT_VARIABLES.to_vec()));
    let days: Vec<String> = (1..=31).map(|d| format!("{d:02}")).collect();
    request.insert("day".into(), Value::from(days));
    let times: Vec<String> = (0..24).map(|h| format!("{h:02}:00")).collect();
    request.insert("time".into(), Value::from(times));

    for (key, value) in url.query_pairs() {
        let value = if value.contains(',') {
            Value::from(
                value
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect::<Vec<_>>(),
            )
        } else {
            Value::from(value.into_owned())
        };
        request.insert(key.into_owned(), value);
    }

    for required in ["year", "month"] {
        if !request.contains_key(required) {
            return Err(invalid(format!(
                "URL must set `{required}`, e.g. {required}={{t:%{}}}",
                if required == "year" { "Y" } else { "m" }
            )));
        }
    }

    Ok((dataset, Value::Object(request)))
}
