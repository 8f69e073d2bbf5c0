//! In-memory volume registry.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::{DriverError, DriverResult};
use crate::volume::Volume;

/// Name → [`Volume`] map shared by every control request.
///
/// Readers run concurrently; writers are exclusive. The lock is only held
/// around the map access itself, never across backend I/O.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: RwLock<BTreeMap<String, Volume>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a volume. Fails with Conflict if the name is taken.
    pub fn insert(&self, volume: Volume) -> DriverResult<()> {
        let mut volumes = self.volumes.write();
        if volumes.contains_key(volume.name()) {
            return Err(DriverError::conflict(volume.name()));
        }
        volumes.insert(volume.name().to_string(), volume);
        Ok(())
    }

    /// Snapshot of the volume named `name`.
    pub fn get(&self, name: &str) -> DriverResult<Volume> {
        self.volumes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.volumes.read().contains_key(name)
    }

    /// Snapshots of every volume, sorted by name.
    pub fn list(&self) -> Vec<Volume> {
        self.volumes.read().values().cloned().collect()
    }

    /// Mutate the volume named `name` in place.
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut Volume) -> R) -> DriverResult<R> {
        let mut volumes = self.volumes.write();
        let volume = volumes
            .get_mut(name)
            .ok_or_else(|| DriverError::not_found(name))?;
        Ok(f(volume))
    }

    /// Delete and return the volume named `name`.
    pub fn remove(&self, name: &str) -> DriverResult<Volume> {
        self.volumes
            .write()
            .remove(name)
            .ok_or_else(|| DriverError::not_found(name))
    }

    pub fn len(&self) -> usize {
        self.volumes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vol(name: &str) -> Volume {
        Volume::new(name, "t", BTreeMap::new())
    }

    #[test]
    fn test_insert_and_get() {
        let registry = VolumeRegistry::new();
        registry.insert(vol("a")).unwrap();
        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert!(matches!(registry.get("b"), Err(DriverError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_insert_leaves_registry_unchanged() {
        let registry = VolumeRegistry::new();
        registry.insert(vol("a")).unwrap();

        let dup = Volume::new("a", "other", BTreeMap::new());
        assert!(matches!(registry.insert(dup), Err(DriverError::Conflict(_))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().token(), "t");
    }

    #[test]
    fn test_list_sorted_by_name() {
        let registry = VolumeRegistry::new();
        for name in ["c", "a", "b"] {
            registry.insert(vol(name)).unwrap();
        }
        let names: Vec<_> = registry.list().iter().map(|v| v.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_update() {
        let registry = VolumeRegistry::new();
        registry.insert(vol("a")).unwrap();
        registry
            .update("a", |v| v.add_mount("c1", "/vol/a"))
            .unwrap();
        assert!(registry.get("a").unwrap().is_mounted());

        let missing = registry.update("zz", |_| ());
        assert!(matches!(missing, Err(DriverError::NotFound(_))));
    }

    #[test]
    fn test_remove() {
        let registry = VolumeRegistry::new();
        registry.insert(vol("a")).unwrap();
        assert_eq!(registry.remove("a").unwrap().name(), "a");
        assert!(registry.is_empty());
        assert!(matches!(registry.remove("a"), Err(DriverError::NotFound(_))));
    }
}
