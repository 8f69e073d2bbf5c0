//! # vaultfs-kernel
//!
//! Secret volumes: the filesystem projection of a secret store and the
//! lifecycle controller that mounts it.
//!
//! - [`vfs`] projects backend paths as a read-only directory tree
//! - [`VolumeRegistry`] holds volumes by name
//! - [`VolumeDriver`] creates, mounts, unmounts and removes volumes,
//!   provisioning a scoped token per volume on request

pub mod driver;
pub mod error;
pub mod policy;
pub mod registry;
pub mod vfs;
pub mod volume;

pub use driver::{
    Capabilities, CreateOutcome, DEFAULT_ROOT, DriverConfig, SCOPE_LOCAL, VolumeDriver,
    VolumeInfo, VolumeStatus,
};
pub use error::{DriverError, DriverResult};
pub use policy::{POLICY_NAME_OPTION, POLICY_RULES_OPTION, PolicyRequest};
pub use registry::VolumeRegistry;
pub use vfs::{
    Access, DirEntry, MountGuard, Mounter, NodeAttr, NodeKind, NullMounter,
    SecretFile, SecretFs, VfsError, VfsOps, VfsResult,
};
pub use volume::{Volume, VolumeState};
