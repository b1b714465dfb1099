//! databrew library
//!
//! Resolves date-templated paths into remote/local file pairs and keeps a
//! local store of scientific datasets in sync with FTP, SFTP, HTTP and
//! Climate Data Store sources.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(TEMP_FILE_SUFFIX, ".tmp");
        assert!(USER_AGENT.starts_with("databrew"));
        assert_eq!(workers::DEFAULT_JOBS, 1);
    }

    #[test]
    fn test_error_types() {
        let err = AppError::from(errors::SelectorError::MissingStart);
        assert_eq!(err.category(), "selector");
        assert!(!err.is_recoverable());
    }
}
