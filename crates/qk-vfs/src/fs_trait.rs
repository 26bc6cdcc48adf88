//! The object-safe `FileSystem` trait every mounted backend implements, and the small set of
//! value types its operations trade in.

use alloc::string::String;

use qk_fat::OpenMode;

use crate::error::VfsError;

pub type FileHandleId = usize;
pub type DirHandleId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub kind: EntryKind,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u32,
}

/// A mounted filesystem backend. Every path here is *relative* — already stripped of its mount
/// prefix by the VFS — and always begins with `/` (§4.9).
pub trait FileSystem: Send {
    fn open(&mut self, rel_path: &str, mode: OpenMode) -> Result<FileHandleId, VfsError>;
    fn read(&mut self, handle: FileHandleId, buf: &mut [u8]) -> Result<usize, VfsError>;
    fn write(&mut self, handle: FileHandleId, buf: &[u8]) -> Result<usize, VfsError>;
    fn seek(&mut self, handle: FileHandleId, position: u32) -> Result<(), VfsError>;
    fn close(&mut self, handle: FileHandleId) -> Result<(), VfsError>;

    fn stat(&mut self, rel_path: &str) -> Result<Metadata, VfsError>;

    fn open_dir(&mut self, rel_path: &str) -> Result<DirHandleId, VfsError>;
    fn read_dir(&mut self, handle: DirHandleId) -> Result<Option<DirEntryInfo>, VfsError>;
    fn close_dir(&mut self, handle: DirHandleId) -> Result<(), VfsError>;

    /// Creates `rel_path` as a directory if it does not already exist. Backends that cannot
    /// create directories (this core's FAT implementation only creates files, and only in the
    /// FAT16 root) return [`VfsError::NotSupported`] for a genuinely missing path; callers that
    /// only need the path to *exist* should check [`FileSystem::stat`] first.
    fn mkdir(&mut self, rel_path: &str) -> Result<(), VfsError>;

    fn flush(&mut self) -> Result<(), VfsError>;
}
