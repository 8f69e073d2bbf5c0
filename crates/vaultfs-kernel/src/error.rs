//! Volume lifecycle errors.

use thiserror::Error;
use vaultfs_store::StoreError;

use crate::vfs::VfsError;

/// Errors returned by the volume driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No volume registered under this name.
    #[error("volume not found: {0}")]
    NotFound(String),

    /// A volume with this name already exists.
    #[error("volume already exists: {0}")]
    Conflict(String),

    /// The name cannot be used as a single directory under the mount root.
    #[error("invalid volume name: {0:?}")]
    InvalidName(String),

    /// Policy rules were not valid base64 or the `@file` could not be read.
    #[error("invalid policy rules: {0}")]
    InvalidPolicySpec(String),

    /// The secret store could not be reached or refused the request.
    #[error("secret store unavailable: {0}")]
    BackendUnavailable(#[from] StoreError),

    /// Attaching or detaching the filesystem failed.
    #[error("mount failed: {0}")]
    Mount(#[from] VfsError),

    /// The volume's token was already replaced by a scoped one.
    #[error("token for volume {0} was already upgraded")]
    TokenAlreadyUpgraded(String),
}

impl DriverError {
    /// Create a NotFound error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a Conflict error.
    pub fn conflict(name: impl Into<String>) -> Self {
        Self::Conflict(name.into())
    }

    /// Create an InvalidPolicySpec error.
    pub fn invalid_policy(msg: impl Into<String>) -> Self {
        Self::InvalidPolicySpec(msg.into())
    }
}

/// Driver result type.
pub type DriverResult<T> = Result<T, DriverError>;
