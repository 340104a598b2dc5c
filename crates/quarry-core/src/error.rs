use std::path::PathBuf;

/// The closed error taxonomy of the engine. Every fallible operation on the
/// public surface returns one of these kinds with a short human-readable
/// message; partial results are never attached to an error.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] heed::Error),

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Lock poisoning and worker-thread panics both collapse to `Internal` -
    /// they indicate a bug, not a caller mistake.
    pub(crate) fn poisoned(what: &str) -> Self {
        Error::Internal(format!("lock poisoned: {what}"))
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Internal(format!("libgit2: {}", e.message()))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(PathBuf::new()),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(e.to_string()),
            _ => Error::Internal(format!("io: {e}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
