//! File handles: open/read/write/close over a mounted [`FatFileSystem`].
//!
//! Per §4.10, write support in this core is restricted to files in the FAT16 root directory;
//! FAT32 write (and FAT16 subdirectory write) return [`FatError::NotSupported`].

use alloc::vec;

use qk_block::BlockDevice;

use crate::dir::VisibleEntry;
use crate::fs::FatFileSystem;
use crate::FatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Create,
    CreateTruncate,
    Append,
}

/// An open file: current cluster-chain head, size, position, and a back-reference to its
/// 32-byte directory entry so `close` can rewrite size/first-cluster when dirty.
pub struct FileHandle {
    first_cluster: u32,
    size: u32,
    position: u32,
    mode: OpenMode,
    dir_sector: u32,
    dir_offset: usize,
    dirty: bool,
}

impl FileHandle {
    pub(crate) fn from_entry(entry: &VisibleEntry, mode: OpenMode) -> Self {
        Self {
            first_cluster: entry.first_cluster,
            size: entry.size,
            position: 0,
            mode,
            dir_sector: entry.dir_sector,
            dir_offset: entry.dir_offset,
            dirty: false,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn seek(&mut self, position: u32) {
        self.position = position;
    }

    /// Traverse the cluster chain from `first_cluster` to the cluster containing
    /// `position / bytes_per_cluster`, per §4.10. `None` if the chain ends (EOC or a zero
    /// cluster) before reaching it.
    fn cluster_at<D: BlockDevice>(&self, fs: &mut FatFileSystem<D>, index: u32) -> Option<u32> {
        let mut cluster = self.first_cluster;
        if cluster < 2 {
            return None;
        }
        for _ in 0..index {
            let next = fs.get_fat_entry(cluster).ok()?;
            if fs.is_eoc(next) || next < 2 {
                return None;
            }
            cluster = next;
        }
        Some(cluster)
    }

    /// Reads up to `buf.len()` bytes starting at the current position, stopping at end of
    /// file or end of chain. Returns the number of bytes actually read.
    pub fn read<D: BlockDevice>(
        &mut self,
        fs: &mut FatFileSystem<D>,
        buf: &mut [u8],
    ) -> Result<usize, FatError> {
        let cluster_size = fs.bytes_per_cluster();
        let mut total = 0usize;

        while total < buf.len() && self.position < self.size {
            let remaining_in_file = (self.size - self.position) as usize;
            let cluster_index = self.position / cluster_size;
            let within_cluster = (self.position % cluster_size) as usize;

            let cluster = match self.cluster_at(fs, cluster_index) {
                Some(c) => c,
                None => break,
            };

            let mut scratch = vec![0u8; cluster_size as usize];
            fs.read_cluster(cluster, &mut scratch)?;

            let chunk_len = (cluster_size as usize - within_cluster)
                .min(buf.len() - total)
                .min(remaining_in_file);
            buf[total..total + chunk_len]
                .copy_from_slice(&scratch[within_cluster..within_cluster + chunk_len]);

            total += chunk_len;
            self.position += chunk_len as u32;
        }

        Ok(total)
    }

    /// Writes `data` at the current position, extending the chain (and the file size) as
    /// needed. FAT16 root-directory files only; see the module doc comment.
    pub fn write<D: BlockDevice>(
        &mut self,
        fs: &mut FatFileSystem<D>,
        data: &[u8],
    ) -> Result<usize, FatError> {
        if fs.variant() == crate::FatVariant::Fat32 {
            return Err(FatError::NotSupported);
        }

        if self.first_cluster < 2 {
            self.first_cluster = fs.allocate_cluster()?;
        }

        let cluster_size = fs.bytes_per_cluster();
        let mut total = 0usize;

        while total < data.len() {
            let cluster_index = self.position / cluster_size;
            let within_cluster = (self.position % cluster_size) as usize;

            let cluster = match self.cluster_at(fs, cluster_index) {
                Some(c) => c,
                None => self.extend_chain(fs, cluster_index)?,
            };

            let mut scratch = vec![0u8; cluster_size as usize];
            fs.read_cluster(cluster, &mut scratch)?;

            let chunk_len = (cluster_size as usize - within_cluster).min(data.len() - total);
            scratch[within_cluster..within_cluster + chunk_len]
                .copy_from_slice(&data[total..total + chunk_len]);
            fs.write_cluster(cluster, &scratch)?;

            total += chunk_len;
            self.position += chunk_len as u32;
        }

        if self.position > self.size {
            self.size = self.position;
        }
        self.dirty = true;
        Ok(total)
    }

    /// Walks the chain to its current EOC tail and links a freshly allocated cluster, repeating
    /// until `target_index` clusters from the start exist.
    fn extend_chain<D: BlockDevice>(
        &mut self,
        fs: &mut FatFileSystem<D>,
        target_index: u32,
    ) -> Result<u32, FatError> {
        let mut cluster = self.first_cluster;
        let mut index = 0u32;
        loop {
            let next = fs.get_fat_entry(cluster)?;
            if fs.is_eoc(next) {
                if index == target_index {
                    return Ok(cluster);
                }
                let new_cluster = fs.allocate_cluster()?;
                fs.set_fat_entry(cluster, new_cluster)?;
                cluster = new_cluster;
                index += 1;
                if index == target_index {
                    return Ok(cluster);
                }
                continue;
            }
            cluster = next;
            index += 1;
            if index == target_index {
                return Ok(cluster);
            }
        }
    }

    pub fn truncate<D: BlockDevice>(&mut self, fs: &mut FatFileSystem<D>) -> Result<(), FatError> {
        if self.first_cluster >= 2 {
            fs.free_chain(self.first_cluster)?;
        }
        self.first_cluster = 0;
        self.size = 0;
        self.position = 0;
        self.dirty = true;
        Ok(())
    }

    /// Rewrites the directory entry's size and first-cluster fields if dirty, then marks the
    /// handle closed. The caller drops the handle afterwards; there is no separate "closed"
    /// state to check.
    pub fn close<D: BlockDevice>(mut self, fs: &mut FatFileSystem<D>) -> Result<(), FatError> {
        if self.dirty {
            self.write_back(fs)?;
            self.dirty = false;
        }
        Ok(())
    }

    fn write_back<D: BlockDevice>(&self, fs: &mut FatFileSystem<D>) -> Result<(), FatError> {
        let sector_size = fs.bytes_per_sector() as usize;
        let mut sector = vec![0u8; sector_size];
        fs.read_sector_raw(self.dir_sector, &mut sector)?;

        let entry = &mut sector[self.dir_offset..self.dir_offset + 32];
        entry[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        entry[26..28].copy_from_slice(&(self.first_cluster as u16).to_le_bytes());
        entry[28..32].copy_from_slice(&self.size.to_le_bytes());

        fs.write_sector_raw(self.dir_sector, &sector)?;
        Ok(())
    }
}
