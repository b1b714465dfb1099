//! In-memory remote store for record tests

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use databrew::app::remote::listing::split_remote;
use databrew::app::{CancelFlag, Connector, FetchStatus, ListingCache, Protocol, RemoteBackend};
use databrew::errors::{RemoteError, RemoteResult};

#[derive(Default)]
struct Server {
    files: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    stalling: HashSet<String>,
    connects: usize,
    listings: usize,
    fetches: usize,
}

/// Counters of server activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    pub connects: usize,
    pub listings: usize,
    pub fetches: usize,
}

/// Connector handing out backends that share one in-memory server
#[derive(Clone, Default)]
pub struct MemoryConnector {
    server: Arc<Mutex<Server>>,
}

impl MemoryConnector {
    pub fn with_files(files: &[(&str, &[u8])]) -> Self {
        let connector = Self::default();
        for (remote, bytes) in files {
            connector.put(remote, bytes);
        }
        connector
    }

    pub fn put(&self, remote: &str, bytes: &[u8]) {
        self.server
            .lock()
            .unwrap()
            .files
            .insert(remote.to_string(), bytes.to_vec());
    }

    /// Transfers of `remote` write a few bytes and then drop the connection
    pub fn fail_on(&self, remote: &str) {
        self.server.lock().unwrap().failing.insert(remote.to_string());
    }

    /// Transfers of `remote` write a few bytes and then never finish
    pub fn stall_on(&self, remote: &str) {
        self.server.lock().unwrap().stalling.insert(remote.to_string());
    }

    pub fn activity(&self) -> Activity {
        let server = self.server.lock().unwrap();
        Activity {
            connects: server.connects,
            listings: server.listings,
            fetches: server.fetches,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> RemoteResult<Box<dyn RemoteBackend>> {
        self.server.lock().unwrap().connects += 1;
        Ok(Box::new(MemoryBackend {
            server: Arc::clone(&self.server),
            cache: ListingCache::new(),
        }))
    }

    fn target(&self) -> String {
        "ftp://mock".to_string()
    }
}

struct MemoryBackend {
    server: Arc<Mutex<Server>>,
    cache: ListingCache,
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn listing_cache(&mut self) -> &mut ListingCache {
        &mut self.cache
    }

    async fn list_directory(&mut self, directory: &str) -> RemoteResult<Vec<String>> {
        let mut server = self.server.lock().unwrap();
        server.listings += 1;
        let mut entries: Vec<String> = server
            .files
            .keys()
            .filter(|remote| split_remote(remote).0 == directory)
            .map(|remote| split_remote(remote).1.to_string())
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn fetch(
        &mut self,
        remote: &str,
        destination: &Path,
        _cancel: &CancelFlag,
    ) -> RemoteResult<FetchStatus> {
        let (bytes, failing, stalling) = {
            let mut server = self.server.lock().unwrap();
            server.fetches += 1;
            (
                server.files.get(remote).cloned(),
                server.failing.contains(remote),
                server.stalling.contains(remote),
            )
        };
        let Some(bytes) = bytes else {
            return Ok(FetchStatus::NotFound);
        };
        if stalling {
            std::fs::write(destination, &bytes[..bytes.len().min(3)])?;
            std::future::pending::<()>().await;
        }
        if failing {
            std::fs::write(destination, &bytes[..bytes.len().min(3)])?;
            return Err(RemoteError::ConnectionLost {
                host: "mock".to_string(),
                reason: "connection reset by peer".to_string(),
            });
        }
        std::fs::write(destination, &bytes)?;
        Ok(FetchStatus::Fetched {
            bytes: bytes.len() as u64,
        })
    }
}
