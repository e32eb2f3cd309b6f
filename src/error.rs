//! Crate-wide error handling
//!
//! Runtime protocol misuse (generate without a queued task, redundant swap)
//! is surfaced as log warnings with a no-op result, not as errors. The error
//! type here covers the fallible edges: configuration I/O and parsing.

use thiserror::Error;

/// Errors surfaced by the cloud engine.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Type alias for cloud engine operation results.
pub type CloudResult<T> = Result<T, CloudError>;
