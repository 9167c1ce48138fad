//! Error types for treeop_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using treeop_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during index and tree operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// I/O error with the path that was being touched.
    #[error("I/O error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Sidecar file is malformed. `reason` names the offending field.
    #[error("Malformed sidecar {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// Input path is missing or not a directory.
    #[error("Invalid path {path}: {reason}")]
    Path { path: PathBuf, reason: String },

    /// Extraction destination already exists.
    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },

    /// No free temporary name near the replacement target.
    #[error("No free temporary name for {path}")]
    NoFreeTempName { path: PathBuf },

    /// Hardlink target already carries too many links.
    #[error("Too many hardlinks on {path}: {links} (max {max})")]
    TooManyLinks {
        path: PathBuf,
        links: u64,
        max: u64,
    },
}

impl Error {
    /// Create a Format error.
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a Path error.
    pub fn path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an IoAt error.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Create a DestinationExists error.
    pub fn destination_exists(path: impl Into<PathBuf>) -> Self {
        Error::DestinationExists { path: path.into() }
    }

    /// Create a NoFreeTempName error.
    pub fn no_free_temp_name(path: impl Into<PathBuf>) -> Self {
        Error::NoFreeTempName { path: path.into() }
    }

    /// Create a TooManyLinks error.
    pub fn too_many_links(path: impl Into<PathBuf>, links: u64, max: u64) -> Self {
        Error::TooManyLinks {
            path: path.into(),
            links,
            max,
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(PathBuf::from);
        match (path, err.into_io_error()) {
            (Some(path), Some(io_err)) => Error::IoAt {
                path,
                source: io_err,
            },
            (None, Some(io_err)) => Error::Io { source: io_err },
            (path, None) => Error::Io {
                source: std::io::Error::other(format!(
                    "walk error at {:?}",
                    path.unwrap_or_default()
                )),
            },
        }
    }
}
