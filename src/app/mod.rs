//! Core application logic for databrew
//!
//! Date selectors and path templates resolve into remote/local path pairs,
//! the remote backends list and transfer files, and a [`Record`] ties them
//! together to keep a local store in sync.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use databrew::app::{BackendConnector, Credentials, DateSelector, PathTemplate, Record, RemoteSettings};
//!
//! # async fn example() -> databrew::Result<()> {
//! let url = "ftp://ftp.example.org/sst/{t:%Y}/sst_{t:%Y%m%d}*.nc";
//! let settings = RemoteSettings::for_url(url, Credentials::anonymous())?;
//!
//! let mut record = Record::new(
//!     "sst",
//!     PathTemplate::new(url)?,
//!     PathTemplate::new("/data/sst/{t:%Y}/sst_{t:%Y%m%d}.nc")?,
//!     Arc::new(BackendConnector::new(settings)),
//! )?;
//!
//! let selector = DateSelector::parse("2020-01-01:2020-01-31")?;
//! for path in record.ensure_local(&selector).await? {
//!     println!("{}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod dates;
pub mod download;
pub mod pairs;
pub mod record;
pub mod remote;
pub mod template;
pub mod validate;

// Re-export main public API
pub use dates::{DateSelector, DateSlice, Frequency, FrequencyUnit};
pub use download::{download_file, TransferOutcome};
pub use pairs::{make_pairs, make_remote_local_pairs, PathPair};
pub use record::{
    ConfirmFn, DownloadReport, PipelinePaths, Record, RecordSettings, TransferRecord,
};
pub use remote::{
    BackendConnector, CancelFlag, Connector, Credentials, FetchStatus, GlobMatch, ListingCache,
    Protocol, RemoteBackend, RemoteSettings,
};
pub use template::PathTemplate;
pub use validate::is_local_file_valid;
