//! Volume entity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{DriverError, DriverResult};

/// Where a volume is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    /// Registered, never mounted.
    Created,
    /// Attached at its mountpoint.
    Mounted,
    /// Was mounted, currently detached.
    Unmounted,
}

/// A named secret volume bound to one backend credential.
#[derive(Clone)]
pub struct Volume {
    name: String,
    token: String,
    token_upgraded: bool,
    /// Creation-time options, as passed by the caller.
    pub options: BTreeMap<String, String>,
    /// Policy the token is scoped to, once upgraded.
    policy: Option<String>,
    /// Callers currently holding the volume mounted.
    mount_ids: BTreeSet<String>,
    mountpoint: Option<PathBuf>,
    ever_mounted: bool,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("options", &self.options)
            .field("policy", &self.policy)
            .field("mount_ids", &self.mount_ids)
            .field("mountpoint", &self.mountpoint)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Volume {
    /// Create a volume holding the raw token it was created with.
    pub fn new(
        name: impl Into<String>,
        token: impl Into<String>,
        options: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            token_upgraded: false,
            options,
            policy: None,
            mount_ids: BTreeSet::new(),
            mountpoint: None,
            ever_mounted: false,
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Credential used for every backend call made for this volume.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Policy the token is scoped to, if it was upgraded.
    pub fn policy(&self) -> Option<&str> {
        self.policy.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Host path while mounted.
    pub fn mountpoint(&self) -> Option<&Path> {
        self.mountpoint.as_deref()
    }

    /// Number of distinct callers holding the volume mounted.
    pub fn mount_count(&self) -> usize {
        self.mount_ids.len()
    }

    pub fn is_mounted(&self) -> bool {
        self.mountpoint.is_some()
    }

    pub fn state(&self) -> VolumeState {
        if self.is_mounted() {
            VolumeState::Mounted
        } else if self.ever_mounted {
            VolumeState::Unmounted
        } else {
            VolumeState::Created
        }
    }

    /// Replace the raw token with one scoped to `policy`.
    ///
    /// Allowed once; the token is immutable afterwards.
    pub fn upgrade_token(&mut self, token: impl Into<String>, policy: impl Into<String>) -> DriverResult<()> {
        if self.token_upgraded {
            return Err(DriverError::TokenAlreadyUpgraded(self.name.clone()));
        }
        self.token = token.into();
        self.policy = Some(policy.into());
        self.token_upgraded = true;
        Ok(())
    }

    /// Record `id` as holding the volume mounted at `mountpoint`.
    pub fn add_mount(&mut self, id: impl Into<String>, mountpoint: impl Into<PathBuf>) {
        self.mount_ids.insert(id.into());
        self.mountpoint = Some(mountpoint.into());
        self.ever_mounted = true;
    }

    /// Drop `id` as a holder. Returns true when the volume became detached.
    pub fn release_mount(&mut self, id: &str) -> bool {
        self.mount_ids.remove(id);
        if self.mount_ids.is_empty() && self.mountpoint.is_some() {
            self.mountpoint = None;
            return true;
        }
        false
    }
}
