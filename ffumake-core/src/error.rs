//! Error types for ffumake-core.
//!
//! Every failure aborts the whole conversion, so there is a single error enum
//! shared by all stages. Callers that need to branch on the failure class
//! (for example to choose a process exit code) should use [`Error::kind`].

use std::io;
use std::path::PathBuf;

/// The class of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An input file does not exist.
    NotFound,
    /// The destination container already exists.
    AlreadyExists,
    /// Invalid block/sector size, misaligned region or unsupported format options.
    Configuration,
    /// Read or write failure on the source or destination.
    Io,
}

/// Core error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("refusing to overwrite existing file: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand for building a [`Error::Configuration`].
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Maps an error from opening `path` so that a missing file becomes
    /// [`Error::NotFound`] instead of a generic I/O error.
    pub(crate) fn from_open(err: io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound { path: path.into() }
        } else {
            Self::Io(err)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for ffumake-core operations.
pub type Result<T> = std::result::Result<T, Error>;
