//! # vaultfs-server
//!
//! Docker volume plugin that mounts secret store paths as read-only
//! filesystems.
//!
//! - [`plugin`] speaks the volume plugin protocol on a Unix socket
//! - [`fuse`] attaches volumes through FUSE (feature `fuse`)
//! - [`memlock`] keeps the process out of swap

pub mod config;
pub mod constants;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod memlock;
pub mod plugin;

pub use config::Config;
#[cfg(feature = "fuse")]
pub use fuse::FuseMounter;
pub use memlock::{MemlockOutcome, lock_memory};
pub use plugin::{PluginServer, Reply, ServeError, dispatch};
