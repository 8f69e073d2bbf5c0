//! Server configuration constants.

use std::time::Duration;

pub use vaultfs_kernel::DEFAULT_ROOT;

/// Socket the volume host looks for plugins on.
pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/vault.sock";

/// Content type of every plugin protocol response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Interface advertised on activation.
pub const VOLUME_DRIVER_INTERFACE: &str = "VolumeDriver";

/// FUSE filesystem name shown in the mount table.
pub const FUSE_FSNAME: &str = "vaultfs";

/// FUSE subtype (`fuse.vault`).
pub const FUSE_SUBTYPE: &str = "vault";

/// How long the kernel may cache attributes and entries. Kept short so
/// lookups keep reflecting the live backend.
pub const ATTR_TTL: Duration = Duration::from_secs(1);
