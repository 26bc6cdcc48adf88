//! Mounted FAT filesystem state: layout, FAT table access, and cluster chain management.

use alloc::vec;
use alloc::vec::Vec;

use qk_block::BlockDevice;
use qk_cache::SectorCache;

use crate::bpb::{BiosParameterBlock, FatVariant};
use crate::dir::{find_entry, DirEntryKind, DirHandle, VisibleEntry};
use crate::file::{FileHandle, OpenMode};
use crate::FatError;

const FAT16_EOC_MIN: u32 = 0xFFF8;
const FAT32_EOC_MIN: u32 = 0x0FFF_FFF8;
const FAT16_FREE: u32 = 0x0000;
const FAT32_MASK: u32 = 0x0FFF_FFFF;

/// A mounted FAT16 or FAT32 volume: boot-sector-derived layout plus the sector cache backing
/// FAT table and data reads/writes.
pub struct FatFileSystem<D: BlockDevice> {
    pub(crate) cache: SectorCache<D>,
    pub(crate) bpb: BiosParameterBlock,
    fat_start: u32,
    data_start: u32,
    root_dir_start: u32,
    root_dir_sectors: u32,
    total_clusters: u32,
}

impl<D: BlockDevice> FatFileSystem<D> {
    /// Probes the boot sector to classify FAT16 vs. FAT32 per the cluster-count rule, then
    /// mounts with the correctly interpreted BPB.
    pub fn mount(cache: SectorCache<D>) -> Result<Self, FatError> {
        Self::mount_as(cache, None)
    }

    /// As [`FatFileSystem::mount`], but `forced` overrides the cluster-count-based probe when
    /// present (the volume manager's `FAT16`/`FAT32` declared kinds, as opposed to `FAT_AUTO`).
    pub fn mount_as(mut cache: SectorCache<D>, forced: Option<FatVariant>) -> Result<Self, FatError> {
        let sector_size = cache.sector_size();
        let mut sector0 = vec![0u8; sector_size];
        cache.read(0, &mut sector0)?;

        let variant = match forced {
            Some(v) => v,
            None => {
                let probe = BiosParameterBlock::parse(&sector0, FatVariant::Fat16)?;
                let estimated_clusters = {
                    let data_sectors = probe
                        .total_sectors
                        .saturating_sub(probe.root_dir_start() + probe.root_dir_sectors());
                    data_sectors / probe.sectors_per_cluster as u32
                };
                BiosParameterBlock::classify_by_cluster_count(estimated_clusters)?
            }
        };
        let bpb = BiosParameterBlock::parse(&sector0, variant)?;

        let fat_start = bpb.fat_start();
        let data_start = bpb.data_start();
        let root_dir_start = bpb.root_dir_start();
        let root_dir_sectors = bpb.root_dir_sectors();
        let total_clusters = bpb.total_clusters();

        Ok(Self {
            cache,
            bpb,
            fat_start,
            data_start,
            root_dir_start,
            root_dir_sectors,
            total_clusters,
        })
    }

    pub fn variant(&self) -> FatVariant {
        self.bpb.variant
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.bpb.bytes_per_sector as u32
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bpb.bytes_per_cluster()
    }

    pub fn root_cluster(&self) -> Option<u32> {
        match self.bpb.variant {
            FatVariant::Fat32 => Some(self.bpb.root_cluster),
            FatVariant::Fat16 => None,
        }
    }

    pub fn root_dir_start(&self) -> u32 {
        self.root_dir_start
    }

    pub fn root_dir_sectors(&self) -> u32 {
        self.root_dir_sectors
    }

    pub fn is_eoc(&self, entry: u32) -> bool {
        match self.bpb.variant {
            FatVariant::Fat16 => entry >= FAT16_EOC_MIN,
            FatVariant::Fat32 => (entry & FAT32_MASK) >= FAT32_EOC_MIN,
        }
    }

    /// `dataStart + (cluster - 2) * sectorsPerCluster`.
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.data_start + (cluster - 2) * self.bpb.sectors_per_cluster as u32
    }

    fn fat_entry_location(&self, cluster: u32) -> (u32, usize) {
        match self.bpb.variant {
            FatVariant::Fat16 => {
                let byte_offset = cluster as usize * 2;
                let sector = self.fat_start + (byte_offset / self.bpb.bytes_per_sector as usize) as u32;
                let within = byte_offset % self.bpb.bytes_per_sector as usize;
                (sector, within)
            }
            FatVariant::Fat32 => {
                let byte_offset = cluster as usize * 4;
                let sector = self.fat_start + (byte_offset / self.bpb.bytes_per_sector as usize) as u32;
                let within = byte_offset % self.bpb.bytes_per_sector as usize;
                (sector, within)
            }
        }
    }

    pub fn get_fat_entry(&mut self, cluster: u32) -> Result<u32, FatError> {
        let (sector, within) = self.fat_entry_location(cluster);
        let mut buf = vec![0u8; self.bpb.bytes_per_sector as usize];
        self.cache.read(sector as u64, &mut buf)?;
        Ok(match self.bpb.variant {
            FatVariant::Fat16 => u16::from_le_bytes([buf[within], buf[within + 1]]) as u32,
            FatVariant::Fat32 => {
                u32::from_le_bytes([
                    buf[within],
                    buf[within + 1],
                    buf[within + 2],
                    buf[within + 3],
                ]) & FAT32_MASK
            }
        })
    }

    /// Writes a FAT entry. FAT32 preserves the upper 4 reserved bits of the existing entry.
    /// FAT16 replicates the write across all FAT copies.
    pub fn set_fat_entry(&mut self, cluster: u32, value: u32) -> Result<(), FatError> {
        let fat_copies = self.bpb.fat_count as u32;
        let sectors_per_fat = self.bpb.sectors_per_fat();

        for copy in 0..fat_copies {
            let (base_sector, within) = self.fat_entry_location(cluster);
            let sector = base_sector + copy * sectors_per_fat;
            let mut buf = vec![0u8; self.bpb.bytes_per_sector as usize];
            self.cache.read(sector as u64, &mut buf)?;

            match self.bpb.variant {
                FatVariant::Fat16 => {
                    let bytes = (value as u16).to_le_bytes();
                    buf[within] = bytes[0];
                    buf[within + 1] = bytes[1];
                }
                FatVariant::Fat32 => {
                    let existing = u32::from_le_bytes([
                        buf[within],
                        buf[within + 1],
                        buf[within + 2],
                        buf[within + 3],
                    ]);
                    let reserved_bits = existing & !FAT32_MASK;
                    let merged = reserved_bits | (value & FAT32_MASK);
                    let bytes = merged.to_le_bytes();
                    buf[within..within + 4].copy_from_slice(&bytes);
                }
            }
            self.cache.write(sector as u64, &buf)?;
        }
        Ok(())
    }

    /// Scans FAT entries `2..totalClusters+2` for the first free entry, marks it EOC, zeroes
    /// its data cluster, and returns its index.
    pub fn allocate_cluster(&mut self) -> Result<u32, FatError> {
        for cluster in 2..self.total_clusters + 2 {
            let entry = self.get_fat_entry(cluster)?;
            if entry == FAT16_FREE {
                let eoc = match self.bpb.variant {
                    FatVariant::Fat16 => 0xFFFF,
                    FatVariant::Fat32 => 0x0FFF_FFFF,
                };
                self.set_fat_entry(cluster, eoc)?;
                self.zero_cluster(cluster)?;
                return Ok(cluster);
            }
        }
        Err(FatError::OutOfMemory)
    }

    fn zero_cluster(&mut self, cluster: u32) -> Result<(), FatError> {
        let base_sector = self.cluster_to_sector(cluster);
        let zeros = vec![0u8; self.bpb.bytes_per_sector as usize];
        for i in 0..self.bpb.sectors_per_cluster as u32 {
            self.cache.write((base_sector + i) as u64, &zeros)?;
        }
        Ok(())
    }

    /// Walks a chain from `start`, marking every entry free, stopping at EOC/free.
    pub fn free_chain(&mut self, start: u32) -> Result<(), FatError> {
        let mut cluster = start;
        while cluster >= 2 && !self.is_eoc(cluster) {
            let next = self.get_fat_entry(cluster)?;
            self.set_fat_entry(cluster, FAT16_FREE)?;
            cluster = next;
        }
        Ok(())
    }

    pub fn read_cluster(&mut self, cluster: u32, out: &mut [u8]) -> Result<(), FatError> {
        let base_sector = self.cluster_to_sector(cluster);
        let sector_size = self.bpb.bytes_per_sector as usize;
        for i in 0..self.bpb.sectors_per_cluster as u32 {
            let chunk = &mut out[i as usize * sector_size..(i as usize + 1) * sector_size];
            self.cache.read((base_sector + i) as u64, chunk)?;
        }
        Ok(())
    }

    pub fn write_cluster(&mut self, cluster: u32, data: &[u8]) -> Result<(), FatError> {
        let base_sector = self.cluster_to_sector(cluster);
        let sector_size = self.bpb.bytes_per_sector as usize;
        for i in 0..self.bpb.sectors_per_cluster as u32 {
            let chunk = &data[i as usize * sector_size..(i as usize + 1) * sector_size];
            self.cache.write((base_sector + i) as u64, chunk)?;
        }
        Ok(())
    }

    pub fn read_sector_raw(&mut self, sector: u32, out: &mut [u8]) -> Result<(), FatError> {
        self.cache.read(sector as u64, out)?;
        Ok(())
    }

    pub fn write_sector_raw(&mut self, sector: u32, data: &[u8]) -> Result<(), FatError> {
        self.cache.write(sector as u64, data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), FatError> {
        self.cache.flush()?;
        Ok(())
    }

    pub fn root_dir(&self) -> DirHandle {
        DirHandle::open_root(self)
    }

    fn dir_of(&self, cluster: u32) -> DirHandle {
        DirHandle::open_cluster(cluster, self.bpb.sectors_per_cluster as u32)
    }

    /// Splits `path` on `/` and walks each component, descending into subdirectories (skipping
    /// empty components from leading/doubled/trailing slashes). Returns the resolved entry and,
    /// separately, the directory handle it was found in (for create/write-back callers that
    /// need the containing directory).
    fn resolve(&mut self, path: &str) -> Result<VisibleEntry, FatError> {
        let mut dir = self.root_dir();
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Err(FatError::InvalidParam);
        }

        for (i, component) in components.iter().enumerate() {
            let entry = find_entry(self, dir, component)?.ok_or(FatError::NotFound)?;
            if i + 1 == components.len() {
                return Ok(entry);
            }
            if entry.kind != DirEntryKind::Directory {
                return Err(FatError::NotFound);
            }
            dir = self.dir_of(entry.first_cluster);
        }
        Err(FatError::NotFound)
    }

    /// Splits `path` into the parent directory's components and the final name, resolving the
    /// parent to a directory handle (the root for a single-component path).
    fn resolve_parent_dir(&mut self, path: &str) -> Result<(DirHandle, alloc::string::String), FatError> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Err(FatError::InvalidParam);
        }
        let name = alloc::string::String::from(*components.last().unwrap());
        if components.len() == 1 {
            return Ok((self.root_dir(), name));
        }

        let mut dir = self.root_dir();
        for component in &components[..components.len() - 1] {
            let entry = find_entry(self, dir, component)?.ok_or(FatError::NotFound)?;
            if entry.kind != DirEntryKind::Directory {
                return Err(FatError::NotFound);
            }
            dir = self.dir_of(entry.first_cluster);
        }
        Ok((dir, name))
    }

    pub fn stat(&mut self, path: &str) -> Result<VisibleEntry, FatError> {
        self.resolve(path)
    }

    /// Opens a directory by path. `"/"` (or `""`) is the root; anything else must resolve to a
    /// directory entry.
    pub fn open_dir(&mut self, path: &str) -> Result<DirHandle, FatError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(self.root_dir());
        }
        let entry = self.resolve(path)?;
        if entry.kind != DirEntryKind::Directory {
            return Err(FatError::NotFound);
        }
        Ok(self.dir_of(entry.first_cluster))
    }

    /// Opens `path` per the semantics of §4.10: `Read` requires an existing non-directory
    /// entry; `Write`/`Create`/`CreateTruncate`/`Append` are only supported for files in the
    /// FAT16 root directory.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, FatError> {
        match mode {
            OpenMode::Read => {
                let entry = self.resolve(path)?;
                if entry.kind == DirEntryKind::Directory {
                    return Err(FatError::NotFound);
                }
                Ok(FileHandle::from_entry(&entry, mode))
            }
            OpenMode::Write | OpenMode::Create | OpenMode::CreateTruncate | OpenMode::Append => {
                if self.bpb.variant == FatVariant::Fat32 {
                    return Err(FatError::NotSupported);
                }
                let (dir, name) = self.resolve_parent_dir(path)?;
                if !dir.is_root() {
                    return Err(FatError::NotSupported);
                }

                let existing = find_entry(self, self.root_dir(), &name)?;
                let mut handle = match existing {
                    Some(entry) if entry.kind == DirEntryKind::Directory => {
                        return Err(FatError::InvalidParam)
                    }
                    Some(entry) => FileHandle::from_entry(&entry, mode),
                    None => {
                        if mode == OpenMode::Write {
                            return Err(FatError::NotFound);
                        }
                        let entry = self.create_root_entry(&name)?;
                        FileHandle::from_entry(&entry, mode)
                    }
                };

                match mode {
                    OpenMode::CreateTruncate => handle.truncate(self)?,
                    OpenMode::Append => handle.seek(handle.size()),
                    _ => {}
                }
                Ok(handle)
            }
        }
    }

    pub fn close(&mut self, handle: FileHandle) -> Result<(), FatError> {
        handle.close(self)
    }

    /// Scans the FAT16 root directory for a free (`0x00` end-marker or `0xE5` deleted) 32-byte
    /// slot, writes a zero-size short entry named `name` there, and returns it as a
    /// [`VisibleEntry`]. Root-directory-only, per the open-for-create restriction.
    fn create_root_entry(&mut self, name: &str) -> Result<VisibleEntry, FatError> {
        let raw_name = to_short_name(name)?;
        let sector_size = self.bpb.bytes_per_sector as usize;
        let entries_per_sector = sector_size / 32;

        for sector_index in 0..self.root_dir_sectors {
            let sector = self.root_dir_start + sector_index;
            let mut buf = vec![0u8; sector_size];
            self.cache.read(sector as u64, &mut buf)?;

            for slot in 0..entries_per_sector {
                let offset = slot * 32;
                let first_byte = buf[offset];
                if first_byte == 0x00 || first_byte == 0xE5 {
                    buf[offset..offset + 11].copy_from_slice(&raw_name);
                    buf[offset + 11] = crate::direntry::ATTR_ARCHIVE;
                    for b in &mut buf[offset + 12..offset + 32] {
                        *b = 0;
                    }
                    self.cache.write(sector as u64, &buf)?;

                    return Ok(VisibleEntry {
                        name: alloc::string::String::from(name),
                        kind: DirEntryKind::File,
                        first_cluster: 0,
                        size: 0,
                        entry_index: slot,
                        dir_sector: sector,
                        dir_offset: offset,
                    });
                }
            }
        }
        Err(FatError::OutOfMemory)
    }
}

/// Encodes `name` (an 8.3-form ASCII name, optionally with one `.`) into the fixed 11-byte
/// short-name field, space-padded and upper-cased. Rejects anything that doesn't fit 8.3.
fn to_short_name(name: &str) -> Result<[u8; 11], FatError> {
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 || !name.is_ascii() {
        return Err(FatError::InvalidParam);
    }
    let mut raw = [b' '; 11];
    for (i, b) in base.bytes().enumerate() {
        raw[i] = b.to_ascii_uppercase();
    }
    for (i, b) in ext.bytes().enumerate() {
        raw[8 + i] = b.to_ascii_uppercase();
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qk_block::MemoryBlockDevice;

    fn make_fat16_image(total_sectors: u32, sectors_per_cluster: u8) -> Vec<u8> {
        let bytes_per_sector = 512u32;
        let reserved = 1u32;
        let fat_count = 2u32;
        let root_entries = 512u32;
        let root_dir_sectors = (root_entries * 32 + bytes_per_sector - 1) / bytes_per_sector;
        let sectors_per_fat = 32u32;

        let mut image = vec![0u8; (total_sectors * bytes_per_sector) as usize];
        image[0x0B..0x0D].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        image[0x0D] = sectors_per_cluster;
        image[0x0E..0x10].copy_from_slice(&(reserved as u16).to_le_bytes());
        image[0x10] = fat_count as u8;
        image[0x11..0x13].copy_from_slice(&(root_entries as u16).to_le_bytes());
        image[0x16..0x18].copy_from_slice(&(sectors_per_fat as u16).to_le_bytes());
        image[0x20..0x24].copy_from_slice(&total_sectors.to_le_bytes());
        image[510] = 0x55;
        image[511] = 0xAA;

        let _ = root_dir_sectors;
        image
    }

    #[test]
    fn fat16_cluster_allocation_and_free_round_trip() {
        // Large enough total cluster count to classify as FAT16 (> 4084, <= 65524 clusters).
        let total_sectors = 1 + 2 * 32 + 32 + 5000;
        let image = make_fat16_image(total_sectors, 1);
        let dev = MemoryBlockDevice::from_image(512, image);
        let cache = SectorCache::new(dev, 64 * 512);
        let mut fs = FatFileSystem::mount(cache).unwrap();
        assert_eq!(fs.variant(), FatVariant::Fat16);

        let first = fs.allocate_cluster().unwrap();
        assert!(first >= 2);
        assert!(fs.is_eoc(fs.get_fat_entry(first).unwrap()));

        let second = fs.allocate_cluster().unwrap();
        assert_ne!(first, second);

        fs.free_chain(first).unwrap();
        assert_eq!(fs.get_fat_entry(first).unwrap(), 0);
    }
}
