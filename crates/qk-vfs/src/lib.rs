//! Small VFS: a mount table with longest-prefix path resolution, path utilities, and a volume
//! manager that ties named block devices to mounted [`qk_fat`] filesystems.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;
mod fat_adapter;
mod fs_trait;
mod mount;
pub mod path;
mod volume;

pub use error::VfsError;
pub use fat_adapter::FatAdapter;
pub use fs_trait::{DirEntryInfo, DirHandleId, EntryKind, FileHandleId, FileSystem, Metadata};
pub use mount::{Vfs, VfsDir, VfsFile};
pub use volume::{FsKind, VolumeManager};

#[cfg(test)]
mod tests;
