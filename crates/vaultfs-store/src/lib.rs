//! # vaultfs-store
//!
//! Client side of the secret store that vaultfs projects as a filesystem.
//!
//! The store is a hierarchical key-value service: a path may hold a value
//! map, may have children, or both. It has no notion of directories; that
//! inference happens in `vaultfs-kernel`. This crate only answers:
//!
//! - [`SecretStore`] - value reads, child listings, mount enumeration,
//!   policy writes and token issuance for one credential
//! - [`Connector`] - hands out a [`SecretStore`] bound to a given token
//! - [`VaultConnector`] - HTTP implementation against the Vault v1 API
//! - [`MemoryStore`] - in-memory implementation (for testing)
//!
//! Every call is a single round trip. Nothing is cached and nothing is
//! retried; a failure reaches the caller immediately.

mod error;
mod memory;
mod ops;
mod vault;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use ops::{Connector, SecretStore, Values, normalize_keys};
pub use vault::{StoreConfig, VaultClient, VaultConnector};
