//! Transfer outcomes of one orchestrated call
//!
//! The report groups remote paths by [`TransferOutcome`] and keeps the full
//! per-pair records in processing order. It is reset at the start of every
//! top-level call on a [`Record`](super::Record).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::download::TransferOutcome;

/// Outcome of one remote/local pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub remote: String,
    pub local: PathBuf,
    pub outcome: TransferOutcome,
}

impl TransferRecord {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>, outcome: TransferOutcome) -> Self {
        Self {
            remote: remote.into(),
            local: local.into(),
            outcome,
        }
    }
}

/// Remote paths grouped by outcome
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    /// Remote paths per outcome, in processing order
    by_outcome: BTreeMap<TransferOutcome, Vec<String>>,
    /// Every record, in processing order
    records: Vec<TransferRecord>,
    /// Start of the call that produced this report
    started_at: DateTime<Utc>,
    /// Wall time of the transfers
    duration: Duration,
}

impl Default for DownloadReport {
    fn default() -> Self {
        Self {
            by_outcome: BTreeMap::new(),
            records: Vec::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }
}

impl DownloadReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all entries and restart the clock
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn push(&mut self, record: TransferRecord) {
        self.by_outcome
            .entry(record.outcome)
            .or_default()
            .push(record.remote.clone());
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = TransferRecord>) {
        for record in records {
            self.push(record);
        }
    }

    /// Remote paths that ended with `outcome`
    pub fn remotes(&self, outcome: TransferOutcome) -> &[String] {
        self.by_outcome
            .get(&outcome)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn count(&self, outcome: TransferOutcome) -> usize {
        self.remotes(outcome).len()
    }

    pub fn records(&self) -> &[TransferRecord] {
        &self.records
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Record the elapsed time since the report was reset
    pub fn finish(&mut self) {
        self.duration = Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
    }

    /// One-line summary of counts per outcome
    pub fn summary(&self) -> String {
        format!(
            "{} downloaded, {} already local, {} missing on remote ({} files in {:.1}s)",
            self.count(TransferOutcome::Downloaded),
            self.count(TransferOutcome::LocalExists),
            self.count(TransferOutcome::RemoteMissing),
            self.total(),
            self.duration.as_secs_f64()
        )
    }
}
