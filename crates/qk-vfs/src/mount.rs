//! The mount table: longest-prefix path resolution and VFS-level file/directory operations.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use qk_fat::OpenMode;

use crate::error::VfsError;
use crate::fs_trait::{DirEntryInfo, FileSystem, Metadata};
use crate::path;

struct MountEntry {
    prefix: String,
    fs: Box<dyn FileSystem>,
}

/// An open file, tagged with the mount it came from so a later read/write/close is routed back
/// to the right backend.
#[derive(Debug, Clone, Copy)]
pub struct VfsFile {
    mount_index: usize,
    inner: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct VfsDir {
    mount_index: usize,
    inner: usize,
}

/// True if `prefix` matches `path` and the match ends at a component boundary (end of string or
/// `/`), case-insensitively. The root mount (`"/"`) always matches.
fn prefix_matches(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    if path.len() < prefix.len() {
        return false;
    }
    if !path[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return false;
    }
    match path.as_bytes().get(prefix.len()) {
        None => true,
        Some(b'/') => true,
        _ => false,
    }
}

/// A vector of `{prefix, filesystem}` mounts, resolved by longest case-insensitive
/// component-boundary prefix match (§4.9).
pub struct Vfs {
    mounts: Vec<MountEntry>,
}

impl Vfs {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    pub fn mount(&mut self, prefix: String, fs: Box<dyn FileSystem>) {
        self.mounts.push(MountEntry { prefix, fs });
    }

    /// Removes the mount whose prefix matches exactly (case-insensitively), returning its
    /// filesystem.
    pub fn unmount(&mut self, prefix: &str) -> Option<Box<dyn FileSystem>> {
        let idx = self
            .mounts
            .iter()
            .position(|m| m.prefix.eq_ignore_ascii_case(prefix))?;
        Some(self.mounts.remove(idx).fs)
    }

    pub fn is_mounted(&self, prefix: &str) -> bool {
        self.mounts.iter().any(|m| m.prefix.eq_ignore_ascii_case(prefix))
    }

    /// Picks the mount with the longest matching prefix, returning its index and the relative
    /// path (always `/`-prefixed) to hand to the backend.
    fn resolve(&self, abs_path: &str) -> Result<(usize, String), VfsError> {
        if !path::is_valid(abs_path) {
            return Err(VfsError::InvalidParam);
        }
        let mut best: Option<(usize, usize)> = None; // (mount index, prefix len)
        for (idx, entry) in self.mounts.iter().enumerate() {
            if prefix_matches(abs_path, &entry.prefix) {
                let len = entry.prefix.len();
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((idx, len));
                }
            }
        }
        let (idx, _) = best.ok_or(VfsError::NotFound)?;
        let prefix_len = self.mounts[idx].prefix.len();
        let rel = if self.mounts[idx].prefix == "/" {
            abs_path
        } else {
            &abs_path[prefix_len..]
        };
        let rel = if rel.is_empty() { "/" } else { rel };
        Ok((idx, String::from(rel)))
    }

    pub fn open(&mut self, abs_path: &str, mode: OpenMode) -> Result<VfsFile, VfsError> {
        let (idx, rel) = self.resolve(abs_path)?;
        let inner = self.mounts[idx].fs.open(&rel, mode)?;
        Ok(VfsFile { mount_index: idx, inner })
    }

    pub fn read(&mut self, file: VfsFile, buf: &mut [u8]) -> Result<usize, VfsError> {
        self.mounts
            .get_mut(file.mount_index)
            .ok_or(VfsError::NotFound)?
            .fs
            .read(file.inner, buf)
    }

    pub fn write(&mut self, file: VfsFile, buf: &[u8]) -> Result<usize, VfsError> {
        self.mounts
            .get_mut(file.mount_index)
            .ok_or(VfsError::NotFound)?
            .fs
            .write(file.inner, buf)
    }

    pub fn seek(&mut self, file: VfsFile, position: u32) -> Result<(), VfsError> {
        self.mounts
            .get_mut(file.mount_index)
            .ok_or(VfsError::NotFound)?
            .fs
            .seek(file.inner, position)
    }

    /// Closes the handle at the backing filesystem and always deletes it VFS-side afterward,
    /// per §4.9.
    pub fn close(&mut self, file: VfsFile) -> Result<(), VfsError> {
        let entry = self.mounts.get_mut(file.mount_index).ok_or(VfsError::NotFound)?;
        entry.fs.close(file.inner)
    }

    pub fn stat(&mut self, abs_path: &str) -> Result<Metadata, VfsError> {
        let (idx, rel) = self.resolve(abs_path)?;
        self.mounts[idx].fs.stat(&rel)
    }

    pub fn open_dir(&mut self, abs_path: &str) -> Result<VfsDir, VfsError> {
        let (idx, rel) = self.resolve(abs_path)?;
        let inner = self.mounts[idx].fs.open_dir(&rel)?;
        Ok(VfsDir { mount_index: idx, inner })
    }

    pub fn read_dir(&mut self, dir: VfsDir) -> Result<Option<DirEntryInfo>, VfsError> {
        self.mounts
            .get_mut(dir.mount_index)
            .ok_or(VfsError::NotFound)?
            .fs
            .read_dir(dir.inner)
    }

    pub fn close_dir(&mut self, dir: VfsDir) -> Result<(), VfsError> {
        let entry = self.mounts.get_mut(dir.mount_index).ok_or(VfsError::NotFound)?;
        entry.fs.close_dir(dir.inner)
    }

    /// Ensures `abs_path` exists as a directory in whichever filesystem currently owns it,
    /// creating any missing path components one at a time. Used by the volume manager before a
    /// new volume's mount point is registered.
    pub fn ensure_dir(&mut self, abs_path: &str) -> Result<(), VfsError> {
        let mut built = String::from("/");
        for component in path::components(abs_path) {
            built = path::join(&built, component);
            match self.stat(&built) {
                Ok(_) => continue,
                Err(VfsError::NotFound) => {
                    let (idx, rel) = self.resolve(&built)?;
                    self.mounts[idx].fs.mkdir(&rel)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<(), VfsError> {
        for entry in self.mounts.iter_mut() {
            entry.fs.flush()?;
        }
        Ok(())
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_respects_component_boundary() {
        assert!(prefix_matches("/shared", "/shared"));
        assert!(prefix_matches("/shared/x", "/shared"));
        assert!(!prefix_matches("/shared2", "/shared"));
        assert!(prefix_matches("/anything", "/"));
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        assert!(prefix_matches("/SHARED/notes.txt", "/shared"));
    }
}
