//! Error types for databrew
//!
//! Errors are split by layer: template and selector usage errors, catalog
//! configuration errors, remote protocol errors and download errors. Every
//! message names the offending template, path or URL so that a configuration
//! defect can be fixed without re-running with debug logging.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing or resolving a path template
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Calendar tokens used outside of the reserved `{t:...}` field
    #[error(
        "Template ({template}) uses date tokens outside of a date field. \
         Date formatting must be written as {{t:%...}}"
    )]
    BareDateTokens { template: String },

    /// Braces that do not form a valid field
    #[error("Template ({template}) has unbalanced braces at byte {position}")]
    UnbalancedBraces { template: String, position: usize },

    /// A field with an empty name, e.g. `{}`
    #[error("Template ({template}) contains an unnamed field")]
    UnnamedField { template: String },

    /// Format spec given to a field other than `t`
    #[error("Field `{field}` in template ({template}) cannot take a format spec; only `t` can")]
    FormatOnPlainField { template: String, field: String },

    /// strftime spec chrono cannot format
    #[error("Invalid date format `{format}` in template ({template})")]
    InvalidDateFormat { template: String, format: String },

    /// A plain field left without a value at resolution time
    #[error("Template ({template}) has no value for field `{field}`")]
    UnresolvedField { template: String, field: String },
}

/// Errors raised while building a date selector
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// Date string that is not ISO formatted
    #[error("Invalid date `{value}`. Dates must be YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]")]
    InvalidDate { value: String },

    /// Range without a start
    #[error("Date slices must have a start date")]
    MissingStart,

    /// Step that does not follow the frequency grammar
    #[error(
        "Slice step `{step}` is not a valid frequency. Expected an optional count \
         followed by one of h, H, D, W, M, MS, A, AS, Y, YS (e.g. 1D, 3h, 1M)"
    )]
    InvalidFrequency { step: String },

    /// Zero-length step
    #[error("Slice step `{step}` must have a positive count")]
    ZeroFrequency { step: String },

    /// Input that matches none of the accepted selector shapes
    #[error("`{given}` is not a supported date selector; accepted: {accepted}")]
    Unsupported { given: String, accepted: String },
}

/// Catalog and record configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Catalog file not found
    #[error("Catalog file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Invalid TOML, including unknown keys
    #[error("Invalid catalog format: {0}")]
    InvalidFormat(#[from] toml::de::Error),

    /// Record name missing from the catalog
    #[error("No record named `{name}` in catalog; available: {available:?}")]
    UnknownRecord { name: String, available: Vec<String> },

    /// Pipeline name missing from a record
    #[error("Record `{record}` has no pipeline `{name}`; available: {available:?}")]
    UnknownPipeline {
        record: String,
        name: String,
        available: Vec<String>,
    },

    /// Templates that resolve to different numbers of files
    #[error(
        "The given paths produce different numbers of files ({lengths:?}). \
         Check the date formatting of the following paths:\n{}",
        templates.join("\n")
    )]
    MismatchedPaths {
        templates: Vec<String>,
        lengths: Vec<usize>,
    },

    /// URL without a scheme or with an unsupported one
    #[error("URL scheme `{scheme}` of ({url}) is not supported; recognized: {recognized}")]
    UnsupportedScheme {
        url: String,
        scheme: String,
        recognized: String,
    },

    /// Port embedded in a URL template
    #[error(
        "Detected port assignment `{port}` in URL ({url}). Specify the port \
         in the record login settings instead"
    )]
    PortInUrl { url: String, port: String },

    /// Template errors surfaced while loading a record
    #[error("Record `{record}`: {source}")]
    Template {
        record: String,
        #[source]
        source: TemplateError,
    },

    /// Password environment variable missing
    #[error("Environment variable {var} for record `{record}` is not set")]
    MissingPasswordEnv { record: String, var: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// I/O error reading or writing the catalog
    #[error("Catalog I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from remote listing and transfer
#[derive(Error, Debug)]
pub enum RemoteError {
    /// A glob that matched more than one remote entry
    #[error(
        "Remote pattern ({pattern}) returns {} matches: {matches:?}. The URL must \
         only return one file; * is only for changing elements in a file name",
        matches.len()
    )]
    AmbiguousMatch {
        pattern: String,
        matches: Vec<String>,
    },

    /// The connection is no longer usable (broken pipe, reset)
    #[error("Connection to {host} lost: {reason}. Try restarting the connection")]
    ConnectionLost { host: String, reason: String },

    /// Login rejected
    #[error("Authentication failed for {username}@{host}")]
    Authentication { host: String, username: String },

    /// Protocol level failure
    #[error("{protocol} error: {message}")]
    Protocol {
        protocol: &'static str,
        message: String,
    },

    /// HTTP request error
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Climate Data Store request failure
    #[error("CDS request for {dataset} failed: {message}")]
    Cds { dataset: String, message: String },

    /// Local I/O error while writing a transfer
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Blocking transfer task did not complete
    #[error("Transfer task failed: {0}")]
    Task(String),

    /// Transfer abandoned because its download was dropped
    #[error("Transfer cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Whether the connection must be dropped rather than reused
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RemoteError::ConnectionLost { .. }
                | RemoteError::Authentication { .. }
                | RemoteError::Cancelled
        )
    }
}

/// Errors from fetching a single file or a batch
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Remote failure while processing a pair
    #[error("Failed to fetch {remote} to {}: {source}", local.display())]
    Transfer {
        remote: String,
        local: PathBuf,
        #[source]
        source: RemoteError,
    },

    /// Connection could not be opened
    #[error("Could not connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: RemoteError,
    },

    /// I/O error during file operations
    #[error("File I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Atomic rename failed
    #[error("Atomic file operation failed: could not rename {} to {}", temp_path.display(), final_path.display())]
    AtomicOperationFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },

    /// No valid local files after fetching
    #[error("No files returned for dates {selector} of record `{record}`")]
    NotFound { record: String, selector: String },

    /// Worker task panicked or was aborted
    #[error("Download worker {worker_id} terminated unexpectedly: {reason}")]
    WorkerPanic { worker_id: usize, reason: String },
}

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    /// Template error
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Selector error
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Remote error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Cancelled by a signal
    #[error("Interrupted by {signal}")]
    Interrupted { signal: &'static str },

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is transient and the operation may be repeated
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Remote(RemoteError::Http(_))
            | AppError::Download(DownloadError::Transfer {
                source: RemoteError::Http(_),
                ..
            }) => true,

            AppError::Template(_)
            | AppError::Selector(_)
            | AppError::Config(_)
            | AppError::Remote(RemoteError::AmbiguousMatch { .. })
            | AppError::Remote(RemoteError::ConnectionLost { .. })
            | AppError::Remote(RemoteError::Authentication { .. }) => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Template(_) => "template",
            AppError::Selector(_) => "selector",
            AppError::Config(_) => "config",
            AppError::Remote(_) => "remote",
            AppError::Download(_) => "download",
            AppError::Io(_) => "io",
            AppError::Interrupted { .. } => "interrupted",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Template result type alias
pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

/// Selector result type alias
pub type SelectorResult<T> = std::result::Result<T, SelectorError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Remote result type alias
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;
