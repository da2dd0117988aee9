//! Error types for novelpack.
//!
//! Library crates use [`NovelPackError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all novelpack operations.
#[derive(Debug, thiserror::Error)]
pub enum NovelPackError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while loading a remote document.
    #[error("network error: {0}")]
    Network(String),

    /// HTML, XML, or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The remote-automation collaborator failed (bad handle, closed page, ...).
    #[error("browser error: {0}")]
    Browser(String),

    /// The chapter listing never appeared. Fatal for the run.
    #[error("timed out after {waited:?} waiting for the chapter listing at {url}")]
    DiscoveryTimeout { url: String, waited: Duration },

    /// A generic wait-until condition did not hold before its deadline.
    #[error("timed out after {waited:?} waiting for {condition}")]
    WaitTimeout { condition: String, waited: Duration },

    /// A single chapter could not be fetched. Recovered by the engine.
    #[error("chapter {chapter_id} failed: {message}")]
    ChapterFetch { chapter_id: u32, message: String },

    /// No site adapter accepts the given URL.
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Chapter cache entry could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),

    /// The package is missing its container file or descriptor sections.
    #[error("malformed package: {message}")]
    MalformedPackage { message: String },

    /// Writing or replacing an artifact failed.
    #[error("artifact write failed at {path:?}: {message}")]
    ArtifactWrite { path: PathBuf, message: String },

    /// EPUB generation error.
    #[error("packaging error: {0}")]
    Packaging(String),

    /// Data validation error (empty input, bad range, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NovelPackError>;

impl NovelPackError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a malformed-package error.
    pub fn malformed_package(msg: impl Into<String>) -> Self {
        Self::MalformedPackage {
            message: msg.into(),
        }
    }

    /// Create an artifact-write error for `path`.
    pub fn artifact_write(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::ArtifactWrite {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a browser error.
    pub fn browser(msg: impl Into<String>) -> Self {
        Self::Browser(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run rather than a single unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryTimeout { .. }
                | Self::UnsupportedSource(_)
                | Self::Config { .. }
                | Self::Cancelled
        )
    }
}
