//! Adapts a [`qk_fat::FatFileSystem`] to the object-safe [`FileSystem`] trait.
//!
//! `FatFileSystem`'s own `FileHandle`/`DirHandle` carry no generic parameter (they borrow the
//! filesystem only for the duration of each call), so the adapter arena-allocates them and
//! hands callers small integer handles, per the cyclic-reference design note in §9.

use alloc::string::String;
use alloc::vec::Vec;

use qk_block::BlockDevice;
use qk_fat::{DirEntryKind, DirHandle, FatFileSystem, FileHandle, OpenMode};

use crate::error::VfsError;
use crate::fs_trait::{DirEntryInfo, DirHandleId, EntryKind, FileHandleId, FileSystem, Metadata};

pub struct FatAdapter<D: BlockDevice + Send> {
    fs: FatFileSystem<D>,
    files: Vec<Option<FileHandle>>,
    dirs: Vec<Option<DirHandle>>,
}

impl<D: BlockDevice + Send> FatAdapter<D> {
    pub fn new(fs: FatFileSystem<D>) -> Self {
        Self {
            fs,
            files: Vec::new(),
            dirs: Vec::new(),
        }
    }

    fn insert_file(&mut self, handle: FileHandle) -> FileHandleId {
        for (id, slot) in self.files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(handle);
                return id;
            }
        }
        self.files.push(Some(handle));
        self.files.len() - 1
    }

    fn insert_dir(&mut self, handle: DirHandle) -> DirHandleId {
        for (id, slot) in self.dirs.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(handle);
                return id;
            }
        }
        self.dirs.push(Some(handle));
        self.dirs.len() - 1
    }
}

impl<D: BlockDevice + Send> FileSystem for FatAdapter<D> {
    fn open(&mut self, rel_path: &str, mode: OpenMode) -> Result<FileHandleId, VfsError> {
        let handle = self.fs.open(rel_path, mode)?;
        Ok(self.insert_file(handle))
    }

    fn read(&mut self, handle: FileHandleId, buf: &mut [u8]) -> Result<usize, VfsError> {
        let h = self.files.get_mut(handle).and_then(|s| s.as_mut()).ok_or(VfsError::InvalidParam)?;
        Ok(h.read(&mut self.fs, buf)?)
    }

    fn write(&mut self, handle: FileHandleId, buf: &[u8]) -> Result<usize, VfsError> {
        let h = self.files.get_mut(handle).and_then(|s| s.as_mut()).ok_or(VfsError::InvalidParam)?;
        Ok(h.write(&mut self.fs, buf)?)
    }

    fn seek(&mut self, handle: FileHandleId, position: u32) -> Result<(), VfsError> {
        let h = self.files.get_mut(handle).and_then(|s| s.as_mut()).ok_or(VfsError::InvalidParam)?;
        h.seek(position);
        Ok(())
    }

    fn close(&mut self, handle: FileHandleId) -> Result<(), VfsError> {
        let h = self
            .files
            .get_mut(handle)
            .and_then(|s| s.take())
            .ok_or(VfsError::InvalidParam)?;
        h.close(&mut self.fs)?;
        Ok(())
    }

    fn stat(&mut self, rel_path: &str) -> Result<Metadata, VfsError> {
        let entry = self.fs.stat(rel_path)?;
        Ok(Metadata {
            kind: match entry.kind {
                DirEntryKind::File => EntryKind::File,
                DirEntryKind::Directory => EntryKind::Directory,
            },
            size: entry.size,
        })
    }

    fn open_dir(&mut self, rel_path: &str) -> Result<DirHandleId, VfsError> {
        let handle = self.fs.open_dir(rel_path)?;
        Ok(self.insert_dir(handle))
    }

    fn read_dir(&mut self, handle: DirHandleId) -> Result<Option<DirEntryInfo>, VfsError> {
        let h = self.dirs.get_mut(handle).and_then(|s| s.as_mut()).ok_or(VfsError::InvalidParam)?;
        match h.next(&mut self.fs)? {
            Some(entry) => Ok(Some(DirEntryInfo {
                name: String::from(entry.name.as_str()),
                kind: match entry.kind {
                    DirEntryKind::File => EntryKind::File,
                    DirEntryKind::Directory => EntryKind::Directory,
                },
                size: entry.size,
            })),
            None => Ok(None),
        }
    }

    fn close_dir(&mut self, handle: DirHandleId) -> Result<(), VfsError> {
        self.dirs
            .get_mut(handle)
            .and_then(|s| s.take())
            .ok_or(VfsError::InvalidParam)?;
        Ok(())
    }

    fn mkdir(&mut self, rel_path: &str) -> Result<(), VfsError> {
        if self.stat(rel_path).is_ok() {
            return Ok(());
        }
        Err(VfsError::NotSupported)
    }

    fn flush(&mut self) -> Result<(), VfsError> {
        self.fs.flush()?;
        Ok(())
    }
}
