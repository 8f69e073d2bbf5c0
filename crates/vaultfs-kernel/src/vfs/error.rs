//! Errors surfaced by projected filesystems.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("no such secret path: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    PermissionDenied(String),

    #[error("secret filesystem is read-only")]
    ReadOnly,

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The path escapes the filesystem root or is otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The host refused to attach a filesystem.
    #[error("mount failed: {0}")]
    MountFailed(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn mount_failed(msg: impl Into<String>) -> Self {
        Self::MountFailed(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// The `std::io` classification of this error.
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::NotFound(_) => io::ErrorKind::NotFound,
            Self::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            Self::ReadOnly => io::ErrorKind::ReadOnlyFilesystem,
            Self::NotADirectory(_) => io::ErrorKind::NotADirectory,
            Self::IsADirectory(_) => io::ErrorKind::IsADirectory,
            Self::InvalidPath(_) => io::ErrorKind::InvalidInput,
            Self::Io(e) => e.kind(),
            Self::MountFailed(_) | Self::Other(_) => io::ErrorKind::Other,
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other.to_string()),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let kind = |e: VfsError| io::Error::from(e).kind();
        assert_eq!(kind(VfsError::not_found("x")), io::ErrorKind::NotFound);
        assert_eq!(kind(VfsError::is_a_directory("x")), io::ErrorKind::IsADirectory);
        assert_eq!(
            kind(VfsError::permission_denied("x")),
            io::ErrorKind::PermissionDenied
        );
        assert_eq!(kind(VfsError::ReadOnly), io::ErrorKind::ReadOnlyFilesystem);
        assert_eq!(kind(VfsError::mount_failed("busy")), io::ErrorKind::Other);
    }

    #[test]
    fn test_io_error_passes_through() {
        let err = VfsError::from(io::Error::new(io::ErrorKind::TimedOut, "slow backend"));
        assert_eq!(err.io_kind(), io::ErrorKind::TimedOut);
        assert_eq!(io::Error::from(err).to_string(), "slow backend");
    }
}
