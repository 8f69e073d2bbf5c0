//! The volume driver: lifecycle controller for secret volumes.
//!
//! The driver owns:
//! - A [`VolumeRegistry`] (name → volume, token, mount state)
//! - A [`Connector`] for issuing backend clients per credential
//! - A [`Mounter`] that attaches projected filesystems at host paths
//!
//! Once a volume is mounted, filesystem calls go straight from the mounter
//! to the [`SecretFs`] bound to that volume's token; the driver is not on
//! that path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use vaultfs_store::{Connector, StoreError, StoreResult};

use crate::error::{DriverError, DriverResult};
use crate::policy::PolicyRequest;
use crate::registry::VolumeRegistry;
use crate::vfs::{MountGuard, Mounter, SecretFs, VfsOps};
use crate::volume::{Volume, VolumeState};

/// Default directory under which volumes are mounted.
pub const DEFAULT_ROOT: &str = "/var/lib/docker-volumes/vault";

/// Mount scope reported to the volume host. Mounts never span hosts.
pub const SCOPE_LOCAL: &str = "local";

/// Process-wide driver configuration, fixed at startup.
#[derive(Clone)]
pub struct DriverConfig {
    /// Directory holding one mountpoint per volume.
    pub root: PathBuf,
    /// Credential given to new volumes and used to provision policies.
    pub root_token: String,
}

impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("root", &self.root)
            .field("root_token", &"<redacted>")
            .finish()
    }
}

impl DriverConfig {
    pub fn new(root: impl Into<PathBuf>, root_token: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            root_token: root_token.into(),
        }
    }
}

/// Result of a successful Create.
#[derive(Debug)]
pub enum CreateOutcome {
    /// Registered with the root token; no policy was requested.
    Created,
    /// Registered, and the token was replaced by one scoped to `policy`.
    Scoped { policy: String },
    /// Registered with the root token, but provisioning `policy` failed.
    ///
    /// The volume stays registered. Remove and recreate it to retry.
    Unscoped { policy: String, error: StoreError },
}

/// Status details reported alongside a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeStatus {
    pub state: VolumeState,
    pub mount_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

/// What Get and List report for a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Projected mountpoint (`root/name`), whether or not it is mounted.
    pub mountpoint: PathBuf,
    pub created_at: DateTime<Utc>,
    pub status: VolumeStatus,
}

/// Capabilities reported to the volume host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub scope: &'static str,
}

/// Lifecycle controller for secret volumes.
pub struct VolumeDriver {
    config: DriverConfig,
    registry: VolumeRegistry,
    connector: Arc<dyn Connector>,
    mounter: Arc<dyn Mounter>,
    /// Live attachments by volume name.
    ///
    /// Held for every mount transition and for the whole of Create, so a
    /// Mount never binds a volume whose token is still being provisioned.
    attachments: Mutex<HashMap<String, Box<dyn MountGuard>>>,
    /// Attachments of volumes removed while still mounted.
    orphans: Mutex<Vec<Box<dyn MountGuard>>>,
}

impl std::fmt::Debug for VolumeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDriver")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("attachments", &"<locked>")
            .finish()
    }
}

impl VolumeDriver {
    pub fn new(
        config: DriverConfig,
        connector: Arc<dyn Connector>,
        mounter: Arc<dyn Mounter>,
    ) -> Self {
        Self {
            config,
            registry: VolumeRegistry::new(),
            connector,
            mounter,
            attachments: Mutex::new(HashMap::new()),
            orphans: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// Host path for `name`: `root/name`.
    pub fn mountpoint(&self, name: &str) -> PathBuf {
        self.config.root.join(name)
    }

    fn check_name(name: &str) -> DriverResult<()> {
        let single_component = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\0');
        if single_component {
            Ok(())
        } else {
            Err(DriverError::InvalidName(name.to_string()))
        }
    }

    fn info(&self, volume: &Volume) -> VolumeInfo {
        VolumeInfo {
            name: volume.name().to_string(),
            mountpoint: self.mountpoint(volume.name()),
            created_at: volume.created_at(),
            status: VolumeStatus {
                state: volume.state(),
                mount_count: volume.mount_count(),
                policy: volume.policy().map(str::to_string),
            },
        }
    }

    // ========================================================================
    // Create / Remove
    // ========================================================================

    /// Register a volume, provisioning a scoped token if `options` ask for one.
    ///
    /// Policy rules are decoded before anything is registered. Provisioning
    /// runs after registration and outside the registry lock; its failure
    /// is reported as [`CreateOutcome::Unscoped`]. Mounts of the new volume
    /// wait until its token is final.
    pub async fn create(
        &self,
        name: &str,
        options: BTreeMap<String, String>,
    ) -> DriverResult<CreateOutcome> {
        tracing::info!(volume = name, "create");
        Self::check_name(name)?;
        if self.registry.contains(name) {
            return Err(DriverError::conflict(name));
        }

        let policy = PolicyRequest::from_options(name, &options).await?;
        let _transition = self.attachments.lock().await;
        self.registry
            .insert(Volume::new(name, &self.config.root_token, options))?;

        let Some(policy) = policy else {
            return Ok(CreateOutcome::Created);
        };

        match self.provision(&policy).await {
            Ok(token) => {
                self.registry
                    .update(name, |v| v.upgrade_token(token, &policy.name))??;
                tracing::info!(volume = name, policy = %policy.name, "token scoped");
                Ok(CreateOutcome::Scoped {
                    policy: policy.name,
                })
            }
            Err(error) => {
                tracing::warn!(volume = name, policy = %policy.name, %error, "policy provisioning failed");
                Ok(CreateOutcome::Unscoped {
                    policy: policy.name,
                    error,
                })
            }
        }
    }

    /// Write the policy and issue a token scoped to it, as the root credential.
    async fn provision(&self, policy: &PolicyRequest) -> StoreResult<String> {
        let admin = self.connector.connect(&self.config.root_token);
        admin.put_policy(&policy.name, &policy.rules).await?;
        admin.issue_token(std::slice::from_ref(&policy.name)).await
    }

    /// Delete the volume from the registry.
    ///
    /// Mounted volumes are removed too. Their attachment is left in place
    /// (not detached) and no longer reachable through the driver.
    pub async fn remove(&self, name: &str) -> DriverResult<Volume> {
        tracing::info!(volume = name, "remove");
        let mut attachments = self.attachments.lock().await;
        let volume = self.registry.remove(name)?;

        if let Some(guard) = attachments.remove(name) {
            tracing::warn!(
                volume = name,
                mountpoint = %guard.mountpoint().display(),
                "removed while mounted; attachment orphaned"
            );
            self.orphans.lock().await.push(guard);
        }
        Ok(volume)
    }

    /// Number of attachments orphaned by [`remove`](Self::remove).
    pub async fn orphaned(&self) -> usize {
        self.orphans.lock().await.len()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, name: &str) -> DriverResult<VolumeInfo> {
        tracing::info!(volume = name, "get");
        let volume = self.registry.get(name)?;
        Ok(self.info(&volume))
    }

    /// Every registered volume, sorted by name.
    pub fn list(&self) -> Vec<VolumeInfo> {
        tracing::info!("list");
        self.registry.list().iter().map(|v| self.info(v)).collect()
    }

    /// Mountpoint of a registered volume.
    pub fn path(&self, name: &str) -> DriverResult<PathBuf> {
        tracing::info!(volume = name, "path");
        self.registry.get(name)?;
        Ok(self.mountpoint(name))
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities { scope: SCOPE_LOCAL }
    }

    // ========================================================================
    // Mount / Unmount
    // ========================================================================

    /// Mount the volume for caller `id` and return its mountpoint.
    ///
    /// The filesystem is attached on the first holder only. Later calls,
    /// from the same or other callers, return the same path.
    pub async fn mount(&self, name: &str, id: &str) -> DriverResult<PathBuf> {
        tracing::info!(volume = name, id, "mount");
        let mut attachments = self.attachments.lock().await;
        let volume = self.registry.get(name)?;
        let mountpoint = self.mountpoint(name);

        if !attachments.contains_key(name) {
            let store = self.connector.connect(volume.token());
            let fs: Arc<dyn VfsOps> = Arc::new(SecretFs::new(store));
            let guard = self.mounter.attach(&mountpoint, fs)?;
            attachments.insert(name.to_string(), guard);
            tracing::info!(volume = name, mountpoint = %mountpoint.display(), "attached");
        }

        self.registry
            .update(name, |v| v.add_mount(id, mountpoint.clone()))?;
        Ok(mountpoint)
    }

    /// Release caller `id`'s hold on the volume.
    ///
    /// A no-op when the volume is not mounted. The filesystem is detached
    /// once the last holder leaves.
    pub async fn unmount(&self, name: &str, id: &str) -> DriverResult<()> {
        tracing::info!(volume = name, id, "unmount");
        let mut attachments = self.attachments.lock().await;
        let volume = self.registry.get(name)?;
        if !volume.is_mounted() {
            return Ok(());
        }

        let detached = self.registry.update(name, |v| v.release_mount(id))?;
        if !detached {
            return Ok(());
        }

        if let Some(guard) = attachments.remove(name) {
            let mountpoint: PathBuf = guard.mountpoint().to_path_buf();
            guard.detach()?;
            tracing::info!(volume = name, mountpoint = %mountpoint.display(), "detached");
        }
        Ok(())
    }
}
