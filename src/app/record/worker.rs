//! Worker pool for parallel transfers
//!
//! Pairs are split into contiguous chunks, one per worker. Each worker opens
//! its own connection through the shared [`Connector`], works through its
//! chunk in order and stops at the first error. Workers do not cancel each
//! other: a failure in one chunk leaves the others running to completion.
//! Dropping the pool future aborts every worker still running.

use std::sync::Arc;

use futures::future::join_all;
use indicatif::ProgressBar;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::report::TransferRecord;
use crate::app::download::download_file;
use crate::app::pairs::PathPair;
use crate::app::remote::Connector;
use crate::errors::DownloadError;

/// What one worker got through before finishing or failing
#[derive(Debug)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    pub records: Vec<TransferRecord>,
    pub error: Option<DownloadError>,
}

impl WorkerOutcome {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            records: Vec::new(),
            error: None,
        }
    }
}

/// Parallel transfer of path pairs
pub struct WorkerPool {
    connector: Arc<dyn Connector>,
    jobs: usize,
}

impl WorkerPool {
    /// Pool of up to `jobs` workers; callers apply [`effective_jobs`]
    pub fn new(connector: Arc<dyn Connector>, jobs: usize) -> Self {
        Self {
            connector,
            jobs: jobs.max(1),
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Transfer every pair, returning one outcome per worker in chunk order
    pub async fn run(&self, pairs: Vec<PathPair>, progress: Option<ProgressBar>) -> Vec<WorkerOutcome> {
        if pairs.is_empty() {
            return Vec::new();
        }

        let chunks = split_chunks(pairs, self.jobs);
        info!(
            "Transferring with {} worker{}",
            chunks.len(),
            if chunks.len() == 1 { "" } else { "s" }
        );

        let handles: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(worker_id, chunk)| {
                let connector = Arc::clone(&self.connector);
                let progress = progress.clone();
                tokio::spawn(run_worker(worker_id, connector, chunk, progress))
            })
            .collect();
        let _abort = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

        join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(worker_id, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Worker {} panicked: {}", worker_id, e);
                    WorkerOutcome {
                        error: Some(DownloadError::WorkerPanic {
                            worker_id,
                            reason: e.to_string(),
                        }),
                        ..WorkerOutcome::new(worker_id)
                    }
                }
            })
            .collect()
    }
}

/// Aborts the worker tasks when the pool future is dropped before they finish
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

async fn run_worker(
    worker_id: usize,
    connector: Arc<dyn Connector>,
    pairs: Vec<PathPair>,
    progress: Option<ProgressBar>,
) -> WorkerOutcome {
    let mut outcome = WorkerOutcome::new(worker_id);

    let mut backend = match connector.connect().await {
        Ok(backend) => backend,
        Err(source) => {
            outcome.error = Some(DownloadError::Connect {
                url: connector.target(),
                source,
            });
            return outcome;
        }
    };
    debug!("Worker {} connected to {}", worker_id, connector.target());

    for pair in &pairs {
        match download_file(backend.as_mut(), pair).await {
            Ok(result) => {
                outcome
                    .records
                    .push(TransferRecord::new(pair.remote.clone(), pair.local.clone(), result));
                if let Some(bar) = &progress {
                    bar.inc(1);
                }
            }
            Err(e) => {
                warn!("Worker {} stopped: {}", worker_id, e);
                outcome.error = Some(e);
                break;
            }
        }
    }

    if let Err(e) = backend.close().await {
        debug!("Worker {} could not close its connection: {}", worker_id, e);
    }
    outcome
}

/// Worker count for a request: at most one less than the CPU count, and at
/// least one
pub fn effective_jobs(requested: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    requested.min(cpus.saturating_sub(1).max(1)).max(1)
}

/// Split `items` into at most `parts` contiguous, non-empty chunks of
/// near-equal size
pub fn split_chunks<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let parts = parts.clamp(1, items.len().max(1));
    let base = items.len() / parts;
    let extra = items.len() % parts;

    let mut chunks = Vec::with_capacity(parts);
    let mut iter = items.into_iter();
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        let chunk: Vec<T> = iter.by_ref().take(size).collect();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chunks_contiguous() {
        let chunks = split_chunks((1..=7).collect(), 3);
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5], vec![6, 7]]);

        let chunks = split_chunks(vec![1, 2], 5);
        assert_eq!(chunks, vec![vec![1], vec![2]]);

        let chunks: Vec<Vec<u8>> = split_chunks(Vec::new(), 4);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_effective_jobs_bounds() {
        assert_eq!(effective_jobs(0), 1);
        assert_eq!(effective_jobs(1), 1);
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert!(effective_jobs(1000) <= cpus.max(2) - 1);
    }
}
