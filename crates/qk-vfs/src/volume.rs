//! Volume registry: named `QFS_…` volumes over block devices, mounted into the VFS (§4.11).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use qk_block::BlockDevice;
use qk_cache::SectorCache;
use qk_fat::{FatFileSystem, FatVariant};

use crate::error::VfsError;
use crate::fat_adapter::FatAdapter;
use crate::mount::Vfs;

const NAME_PREFIX: &str = "QFS_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    FatAuto,
    Fat16,
    Fat32,
}

struct VolumeRecord {
    name: String,
    mount_path: String,
    kind: FsKind,
    mounted: bool,
    auto_mount: bool,
}

/// Registers and mounts named volumes. Each volume owns exactly one block device; mounting
/// wraps it in a [`SectorCache`] and a [`FatFileSystem`], then records the mount point in the
/// [`Vfs`] mount table.
pub struct VolumeManager {
    volumes: Vec<VolumeRecord>,
}

impl VolumeManager {
    pub fn new() -> Self {
        Self { volumes: Vec::new() }
    }

    fn validate_name(name: &str) -> Result<(), VfsError> {
        if name.starts_with(NAME_PREFIX) && name.len() > NAME_PREFIX.len() {
            Ok(())
        } else {
            Err(VfsError::InvalidParam)
        }
    }

    /// Registers `name` at `mount_path` over `device`, rejecting a duplicate name or mount
    /// path. If `auto_mount`, mounts it immediately (see [`VolumeManager::mount`]).
    pub fn register<D: BlockDevice + Send + 'static>(
        &mut self,
        vfs: &mut Vfs,
        name: String,
        mount_path: String,
        kind: FsKind,
        device: D,
        cache_bytes: usize,
        auto_mount: bool,
    ) -> Result<(), VfsError> {
        Self::validate_name(&name)?;
        if self.volumes.iter().any(|v| v.name.eq_ignore_ascii_case(&name)) {
            return Err(VfsError::InvalidParam);
        }
        if self
            .volumes
            .iter()
            .any(|v| v.mount_path.eq_ignore_ascii_case(&mount_path))
        {
            return Err(VfsError::InvalidParam);
        }

        self.volumes.push(VolumeRecord {
            name: name.clone(),
            mount_path: mount_path.clone(),
            kind,
            mounted: false,
            auto_mount,
        });

        if auto_mount {
            self.mount(vfs, &name, device, cache_bytes)?;
        }
        Ok(())
    }

    /// Mounts a previously registered volume: builds the sector cache and FAT filesystem for
    /// `device`, ensures the mount path exists as a directory tree, and records it in the VFS
    /// mount table.
    pub fn mount<D: BlockDevice + Send + 'static>(
        &mut self,
        vfs: &mut Vfs,
        name: &str,
        device: D,
        cache_bytes: usize,
    ) -> Result<(), VfsError> {
        let record = self
            .volumes
            .iter_mut()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .ok_or(VfsError::NotFound)?;
        if record.mounted {
            return Err(VfsError::Busy);
        }

        let forced = match record.kind {
            FsKind::FatAuto => None,
            FsKind::Fat16 => Some(FatVariant::Fat16),
            FsKind::Fat32 => Some(FatVariant::Fat32),
        };

        let cache = SectorCache::new(device, cache_bytes);
        let fs = FatFileSystem::mount_as(cache, forced)?;
        let adapter: Box<dyn crate::FileSystem> = Box::new(FatAdapter::new(fs));

        let mount_path = record.mount_path.clone();
        vfs.ensure_dir(&mount_path).or_else(|e| {
            if mount_path == "/" {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        vfs.mount(mount_path, adapter);

        let record = self
            .volumes
            .iter_mut()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .expect("record located above");
        record.mounted = true;
        Ok(())
    }

    /// Reverses registration: unmounts from the VFS (if mounted) and removes the record.
    pub fn unregister(&mut self, vfs: &mut Vfs, name: &str) -> Result<(), VfsError> {
        let idx = self
            .volumes
            .iter()
            .position(|v| v.name.eq_ignore_ascii_case(name))
            .ok_or(VfsError::NotFound)?;
        let record = &self.volumes[idx];
        if record.mounted {
            vfs.unmount(&record.mount_path);
        }
        self.volumes.remove(idx);
        Ok(())
    }

    pub fn is_mounted(&self, name: &str) -> bool {
        self.volumes
            .iter()
            .any(|v| v.name.eq_ignore_ascii_case(name) && v.mounted)
    }
}

impl Default for VolumeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_name_must_carry_the_qfs_prefix() {
        assert!(VolumeManager::validate_name("QFS_SHARED").is_ok());
        assert!(VolumeManager::validate_name("SHARED").is_err());
        assert!(VolumeManager::validate_name("QFS_").is_err());
    }
}
