use std::path::{Path, PathBuf};

/// Every failure the engine can report. Per-chunk verification outcomes are
/// not errors; see [`crate::chunk::ChunkStatus`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path escapes workspace: {name:?} ({reason})")]
    PathEscape { name: String, reason: &'static str },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotRegularFile(PathBuf),

    #[error("malformed manifest {}: {reason}", path.display())]
    MalformedManifest { path: PathBuf, reason: String },

    #[error("chunk missing: {name}")]
    ChunkMissing { name: String },

    #[error("chunk {name} checksum mismatch: expected {expected}, computed {actual}")]
    ChunkMismatch { name: String, expected: String, actual: String },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("block size must be greater than zero")]
    InvalidBlockSize,

    #[error("{base} is locked by another operation")]
    Busy { base: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{identity} may not access {file}")]
    AccessDenied { identity: String, file: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Error::Io { op, path: path.to_path_buf(), source }
    }

    pub(crate) fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Error::MalformedManifest { path: path.to_path_buf(), reason: reason.into() }
    }
}

/// Attach an operation name and path to a raw I/O result.
pub(crate) trait IoContext<T> {
    fn io_ctx(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_ctx(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(op, path, e))
    }
}
