//! Application constants for databrew
//!
//! Constants are grouped by functional domain.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Overrides the catalog search path
    pub const CATALOG: &str = "DATABREW_CATALOG";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "databrew/0.1.0 (Scientific Data Mirror)";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;

    /// Maximum number of redirects to follow
    pub const MAX_REDIRECTS: usize = 10;
}

/// FTP and SFTP defaults
pub mod remote {
    use super::Duration;

    /// Username used when a record gives none
    pub const DEFAULT_USERNAME: &str = "anonymous";

    /// Default FTP control port
    pub const FTP_PORT: u16 = 21;

    /// Default SSH port
    pub const SFTP_PORT: u16 = 22;

    /// TCP connect timeout for FTP and SFTP sessions
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Scheme names accepted in record URLs
    pub const RECOGNIZED_SCHEMES: &[&str] = &["ftp", "sftp", "http", "https", "cds"];
}

/// Climate Data Store API defaults
pub mod cds {
    use super::Duration;

    /// Path of the API below the host given in the `cds://` URL
    pub const API_PATH: &str = "/api/v2";

    /// Interval between task status polls
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

    /// Time a request may stay queued or running before it is abandoned
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(6 * 60 * 60);

    /// Dataset requested when the URL names none
    pub const DEFAULT_DATASET: &str = "reanalysis-era5-single-levels";

    /// Variables requested when the URL names none
    pub const DEFAULT_VARIABLES: &[&str] = &[
        "10m_u_component_of_wind",
        "10m_v_component_of_wind",
        "mean_sea_level_pressure",
    ];
}

/// File operation constants
pub mod files {
    /// Temporary file suffix for atomic operations
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Mode of directories created for the local store (Unix only)
    #[cfg(unix)]
    pub const DIR_PERMISSIONS: u32 = 0o755;

    /// Download chunk size for blocking streams (64KB)
    pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

    /// File names tried when no catalog is given
    pub const CATALOG_FILE_NAMES: &[&str] = &["databrew.toml", "catalog.toml"];

    /// Directory below the user config dir holding the catalog
    pub const CONFIG_DIR_NAME: &str = "databrew";

    /// Catalog file name inside the config directory
    pub const CATALOG_FILE: &str = "catalog.toml";
}

/// Worker and concurrency configuration
pub mod workers {
    /// Default number of download jobs
    pub const DEFAULT_JOBS: usize = 1;
}

/// Date resolution constants
pub mod dates {
    /// Dates used to check that a record's templates resolve to aligned sequences
    pub const ALIGNMENT_CHECK_DATES: [&str; 4] =
        ["2010-04-03", "2010-03-23", "2014-01-01", "2014-01-02"];

    /// Default slice step
    pub const DEFAULT_STEP: &str = "1D";
}

pub use files::TEMP_FILE_SUFFIX;
pub use http::{DEFAULT_TIMEOUT as HTTP_TIMEOUT, USER_AGENT};
