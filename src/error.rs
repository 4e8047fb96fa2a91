//! Error types for the crawl and sink boundaries.
//!
//! Extraction itself never fails: fields resolve to `Option` and fragments are
//! rejected with a [`crate::parser::assemble::Rejection`]. Only fetching, configuration
//! and write-out produce errors.

use thiserror::Error;

/// A failed fetch as reported by a transport session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch timed out")]
    Timeout,

    #[error("non-2xx status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    /// The response arrived but could not be parsed as the source's format.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// The underlying session is unusable. Ends the source's pipeline.
    #[error("session failure: {0}")]
    Session(String),
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Session(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("source '{source_name}': invalid selector '{selector}': {reason}")]
    Selector {
        source_name: String,
        selector: String,
        reason: String,
    },

    #[error("source '{source_name}': invalid pattern '{pattern}': {reason}")]
    Pattern {
        source_name: String,
        pattern: String,
        reason: String,
    },

    #[error("source '{source_name}': {reason}")]
    Invalid { source_name: String, reason: String },

    #[error("unknown source '{0}'")]
    UnknownSource(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise records: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Terminal failure of one source's pipeline. Other sources are unaffected.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("source '{source_name}' session failed: {error}")]
    Session {
        source_name: String,
        #[source]
        error: FetchError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
