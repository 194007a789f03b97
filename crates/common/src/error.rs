//! Pipeline-level error type shared by the registry components.

use std::fmt;

/// A specialized Result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for registry operations.
///
/// Each variant maps to one failure domain of the discovery pipeline. Only
/// [`Error::StartupDependency`] is fatal; every other variant is scoped to a
/// single cycle, sweep or address.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Master directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Reconcile store error: {0}")]
    ReconcileStore(String),

    #[error("Reaper store error: {0}")]
    ReaperStore(String),

    #[error("Startup dependency unavailable: {0}")]
    StartupDependency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new directory error.
    pub fn directory(msg: impl fmt::Display) -> Self {
        Error::DirectoryUnavailable(msg.to_string())
    }

    /// Create a new reconcile store error.
    pub fn reconcile_store(msg: impl fmt::Display) -> Self {
        Error::ReconcileStore(msg.to_string())
    }

    /// Create a new reaper store error.
    pub fn reaper_store(msg: impl fmt::Display) -> Self {
        Error::ReaperStore(msg.to_string())
    }

    /// Create a new startup dependency error.
    pub fn startup(msg: impl fmt::Display) -> Self {
        Error::StartupDependency(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Whether this error should stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StartupDependency(_))
    }

    /// Short label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::DirectoryUnavailable(_) => "directory_unavailable",
            Error::ReconcileStore(_) => "reconcile_store",
            Error::ReaperStore(_) => "reaper_store",
            Error::StartupDependency(_) => "startup_dependency",
            Error::Config(_) => "config",
            Error::Serialization(_) => "serialization",
            Error::Other(_) => "other",
        }
    }
}
