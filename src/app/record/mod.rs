//! Records: a named remote dataset mirrored into a local store
//!
//! A [`Record`] pairs a remote URL template with a local path template and
//! keeps the local store in sync for any date selector. Files that already
//! validate locally are never fetched again; files the server does not have
//! are remembered for the lifetime of the record so repeated calls do not
//! ask for them again.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::app::dates::DateSelector;
use crate::app::download::TransferOutcome;
use crate::app::pairs::{check_template_alignment, make_pairs, make_remote_local_pairs, PathPair};
use crate::app::remote::Connector;
use crate::app::template::PathTemplate;
use crate::app::validate::is_local_file_valid_async;
use crate::constants::workers;
use crate::errors::{ConfigError, DownloadError, Result};

pub mod report;
pub mod worker;

pub use report::{DownloadReport, TransferRecord};
pub use worker::{effective_jobs, WorkerOutcome, WorkerPool};

/// Asked with the number of files about to be fetched; `true` proceeds
pub type ConfirmFn = Arc<dyn Fn(usize) -> bool + Send + Sync>;

/// Behaviour of a record's fetch calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSettings {
    /// Fetch missing files without asking
    pub auto_download: bool,
    /// Parallel connections; one means sequential
    pub jobs: usize,
    /// Draw a progress bar when stderr is a terminal
    pub show_progress: bool,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            auto_download: false,
            jobs: workers::DEFAULT_JOBS,
            show_progress: true,
        }
    }
}

/// Remote, local and data paths of one date for a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub remote: String,
    pub local: PathBuf,
    pub data: PathBuf,
}

/// A remote dataset and its local mirror
pub struct Record {
    name: String,
    remote: PathTemplate,
    local: PathTemplate,
    pipelines: BTreeMap<String, PathTemplate>,
    connector: Arc<dyn Connector>,
    settings: RecordSettings,
    confirm: ConfirmFn,
    report: DownloadReport,
    remembered_missing: HashSet<String>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("name", &self.name)
            .field("remote", &self.remote.as_str())
            .field("local", &self.local.as_str())
            .field("pipelines", &self.pipelines.keys().collect::<Vec<_>>())
            .field("target", &self.connector.target())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Record {
    /// Create a record; fails when the two templates cannot be paired
    pub fn new(
        name: impl Into<String>,
        remote: PathTemplate,
        local: PathTemplate,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        check_template_alignment(&[&remote, &local])?;
        Ok(Self {
            name: name.into(),
            remote,
            local,
            pipelines: BTreeMap::new(),
            connector,
            settings: RecordSettings::default(),
            // declining is the safe default without an interactive caller
            confirm: Arc::new(|_| false),
            report: DownloadReport::new(),
            remembered_missing: HashSet::new(),
        })
    }

    pub fn with_settings(mut self, settings: RecordSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = confirm;
        self
    }

    /// Add a pipeline whose data path resolves alongside the record's paths
    pub fn with_pipeline(mut self, name: impl Into<String>, data_path: PathTemplate) -> Result<Self> {
        check_template_alignment(&[&self.remote, &self.local, &data_path])?;
        self.pipelines.insert(name.into(), data_path);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remote_template(&self) -> &PathTemplate {
        &self.remote
    }

    pub fn local_template(&self) -> &PathTemplate {
        &self.local
    }

    pub fn settings(&self) -> &RecordSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RecordSettings {
        &mut self.settings
    }

    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Report of the last top-level call
    pub fn download_report(&self) -> &DownloadReport {
        &self.report
    }

    /// Remotes known to be missing on the server
    pub fn remembered_missing(&self) -> &HashSet<String> {
        &self.remembered_missing
    }

    /// Forget remotes remembered as missing
    pub fn forget_missing(&mut self) {
        self.remembered_missing.clear();
    }

    /// Remote/local pairs for `selector`, in date order
    pub fn pairs(&self, selector: &DateSelector) -> Result<Vec<PathPair>> {
        make_remote_local_pairs(selector, &self.remote, &self.local)
    }

    /// Local paths for `selector`, whether or not they exist
    pub fn local_paths(&self, selector: &DateSelector) -> Result<Vec<PathBuf>> {
        Ok(self
            .local
            .resolve(selector)?
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    /// Aligned remote, local and data paths of a pipeline
    pub fn pipeline_paths(&self, pipeline: &str, selector: &DateSelector) -> Result<Vec<PipelinePaths>> {
        let data = self
            .pipelines
            .get(pipeline)
            .ok_or_else(|| ConfigError::UnknownPipeline {
                record: self.name.clone(),
                name: pipeline.to_string(),
                available: self.pipelines.keys().cloned().collect(),
            })?;

        let rows = make_pairs(selector, &[&self.remote, &self.local, data])?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut row = row.into_iter();
                Some(PipelinePaths {
                    remote: row.next()?,
                    local: PathBuf::from(row.next()?),
                    data: PathBuf::from(row.next()?),
                })
            })
            .collect())
    }

    /// Make sure the files for `selector` are in the local store
    ///
    /// Files that are missing or fail validation are fetched, after
    /// confirmation unless `auto_download` is set. Returns the valid local
    /// paths in date order; the per-file outcomes are available from
    /// [`Record::download_report`] afterwards.
    ///
    /// # Errors
    ///
    /// - Configuration errors from resolving the templates
    /// - The first transfer error of any worker, after all workers finished
    /// - `DownloadError::NotFound` when no valid file is left
    pub async fn ensure_local(&mut self, selector: &DateSelector) -> Result<Vec<PathBuf>> {
        self.report.reset();
        let pairs = self.pairs(selector)?;
        let (mut valid, candidates) = self.partition(&pairs).await;

        for pair in &pairs {
            if valid.contains(&pair.local) {
                self.report.push(TransferRecord::new(
                    pair.remote.clone(),
                    pair.local.clone(),
                    TransferOutcome::LocalExists,
                ));
            } else if self.remembered_missing.contains(&pair.remote) {
                debug!("Skipping remote known to be missing: {}", pair.remote);
                self.report.push(TransferRecord::new(
                    pair.remote.clone(),
                    pair.local.clone(),
                    TransferOutcome::RemoteMissing,
                ));
            }
        }

        let mut first_error = None;
        if !candidates.is_empty() {
            if self.settings.auto_download || (self.confirm)(candidates.len()) {
                first_error = self.transfer(candidates).await;
                valid = self.partition(&pairs).await.0;
            } else {
                info!(
                    "Skipped {} missing file{} of {}",
                    candidates.len(),
                    if candidates.len() == 1 { "" } else { "s" },
                    self.name
                );
            }
        }

        self.report.finish();
        info!("{}: {}", self.name, self.report.summary());

        if let Some(e) = first_error {
            return Err(e.into());
        }
        if valid.is_empty() {
            return Err(DownloadError::NotFound {
                record: self.name.clone(),
                selector: selector.to_string(),
            }
            .into());
        }
        Ok(valid)
    }

    /// Fetch every pair of `selector` without asking
    ///
    /// Pairs that are already valid locally still show up as `LocalExists`
    /// without network traffic.
    pub async fn download(&mut self, selector: &DateSelector) -> Result<&DownloadReport> {
        self.report.reset();
        let pairs = self.pairs(selector)?;
        let first_error = self.transfer(pairs).await;
        self.report.finish();
        info!("{}: {}", self.name, self.report.summary());

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(&self.report),
        }
    }

    /// Split pairs into valid local paths and pairs that need a fetch
    async fn partition(&self, pairs: &[PathPair]) -> (Vec<PathBuf>, Vec<PathPair>) {
        let mut valid = Vec::new();
        let mut candidates = Vec::new();
        for pair in pairs {
            if is_local_file_valid_async(pair.local.clone()).await {
                valid.push(pair.local.clone());
            } else if !self.remembered_missing.contains(&pair.remote) {
                candidates.push(pair.clone());
            }
        }
        (valid, candidates)
    }

    /// Run the worker pool over `pairs` and merge the outcomes into the
    /// report. Returns the first worker error.
    async fn transfer(&mut self, pairs: Vec<PathPair>) -> Option<DownloadError> {
        let pool = WorkerPool::new(
            Arc::clone(&self.connector),
            effective_jobs(self.settings.jobs),
        );
        let progress = self.progress_bar(pairs.len());
        let outcomes = pool.run(pairs, progress.clone()).await;
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        let mut first_error = None;
        for outcome in outcomes {
            for record in &outcome.records {
                if record.outcome == TransferOutcome::RemoteMissing {
                    self.remembered_missing.insert(record.remote.clone());
                }
            }
            self.report.extend(outcome.records);
            if let Some(e) = outcome.error {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!("Worker {} also failed: {}", outcome.worker_id, e);
                }
            }
        }
        first_error
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.settings.show_progress || !atty::is(atty::Stream::Stderr) {
            return None;
        }
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        let bar = ProgressBar::new(len as u64).with_style(style);
        bar.set_message(self.name.clone());
        Some(bar)
    }
}
