//! Directory iteration: VFAT long-name accumulation, short-name reconstruction, entry lookup.

use alloc::string::String;
use alloc::vec;

use qk_block::BlockDevice;

use crate::direntry::{
    sfn_checksum, LongNameAccumulator, LongNameFragment, ShortDirEntry, ATTR_DIRECTORY,
    ATTR_LONG_NAME,
};
use crate::fs::FatFileSystem;
use crate::FatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct VisibleEntry {
    pub name: String,
    pub kind: DirEntryKind,
    pub first_cluster: u32,
    pub size: u32,
    pub entry_index: usize,
    /// Absolute sector and byte offset of the 32-byte short entry, so a file handle can rewrite
    /// size/first-cluster on close without re-scanning the directory.
    pub dir_sector: u32,
    pub dir_offset: usize,
}

/// An open directory: either the FAT16 fixed-size root region, or a cluster chain (FAT32 root,
/// or any subdirectory). Iteration walks 32-byte entries, accumulating VFAT long-name
/// fragments and yielding one [`VisibleEntry`] per short-name entry.
pub struct DirHandle {
    is_root_fat16: bool,
    start_cluster: u32,
    current_cluster: u32,
    sector_in_region: u32,
    entry_in_sector: usize,
    region_sector_count: u32,
    accumulator: LongNameAccumulator,
    finished: bool,
}

impl DirHandle {
    pub(crate) fn open_root<D: BlockDevice>(fs: &FatFileSystem<D>) -> Self {
        match fs.root_cluster() {
            Some(cluster) => Self {
                is_root_fat16: false,
                start_cluster: cluster,
                current_cluster: cluster,
                sector_in_region: 0,
                entry_in_sector: 0,
                region_sector_count: fs.bpb.sectors_per_cluster as u32,
                accumulator: LongNameAccumulator::new(),
                finished: false,
            },
            None => Self {
                is_root_fat16: true,
                start_cluster: 0,
                current_cluster: 0,
                sector_in_region: 0,
                entry_in_sector: 0,
                region_sector_count: fs.root_dir_sectors(),
                accumulator: LongNameAccumulator::new(),
                finished: false,
            },
        }
    }

    /// True for the FAT16 fixed-size root region; false for FAT32 root (a regular cluster
    /// chain) and every subdirectory. Used to restrict write/create to the FAT16 root per
    /// the open-for-write contract in §4.10.
    pub fn is_root(&self) -> bool {
        self.is_root_fat16
    }

    pub(crate) fn open_cluster(start_cluster: u32, sectors_per_cluster: u32) -> Self {
        Self {
            is_root_fat16: false,
            start_cluster,
            current_cluster: start_cluster,
            sector_in_region: 0,
            entry_in_sector: 0,
            region_sector_count: sectors_per_cluster,
            accumulator: LongNameAccumulator::new(),
            finished: false,
        }
    }

    fn current_sector<D: BlockDevice>(&self, fs: &FatFileSystem<D>) -> u32 {
        if self.is_root_fat16 {
            fs.root_dir_start() + self.sector_in_region
        } else {
            fs.cluster_to_sector(self.current_cluster) + self.sector_in_region
        }
    }

    fn advance_entry<D: BlockDevice>(&mut self, fs: &mut FatFileSystem<D>) -> Result<bool, FatError> {
        self.entry_in_sector += 1;
        let entries_per_sector = fs.bytes_per_sector() as usize / 32;
        if self.entry_in_sector < entries_per_sector {
            return Ok(true);
        }
        self.entry_in_sector = 0;
        self.sector_in_region += 1;
        if self.sector_in_region < self.region_sector_count {
            return Ok(true);
        }
        self.sector_in_region = 0;

        if self.is_root_fat16 {
            self.finished = true;
            return Ok(false);
        }

        let next = fs.get_fat_entry(self.current_cluster)?;
        if fs.is_eoc(next) || next < 2 {
            self.finished = true;
            return Ok(false);
        }
        self.current_cluster = next;
        Ok(true)
    }

    /// Returns the next visible entry (long-name resolved, volume-id and dot entries skipped),
    /// or `Ok(None)` at end of directory.
    pub fn next<D: BlockDevice>(
        &mut self,
        fs: &mut FatFileSystem<D>,
    ) -> Result<Option<VisibleEntry>, FatError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let sector_size = fs.bytes_per_sector() as usize;
            let mut sector_buf = vec![0u8; sector_size];
            let sector = self.current_sector(fs);
            fs.read_sector_raw(sector, &mut sector_buf)?;

            let offset = self.entry_in_sector * 32;
            let raw = &sector_buf[offset..offset + 32];

            if raw[0] == 0x00 {
                self.finished = true;
                return Ok(None);
            }
            if raw[0] == 0xE5 {
                self.accumulator.reset();
                if !self.advance_entry(fs)? {
                    return Ok(None);
                }
                continue;
            }

            if raw[11] & ATTR_LONG_NAME == ATTR_LONG_NAME {
                if let Some(fragment) = LongNameFragment::parse(raw) {
                    self.accumulator.push(fragment);
                }
                if !self.advance_entry(fs)? {
                    return Ok(None);
                }
                continue;
            }

            let short = ShortDirEntry::parse(raw, self.entry_in_sector)
                .ok_or(FatError::Error)?;

            if short.is_volume_id() || short.is_dot_entry() {
                self.accumulator.reset();
                if !self.advance_entry(fs)? {
                    return Ok(None);
                }
                continue;
            }

            let name = if !self.accumulator.is_empty()
                && self.accumulator.checksum() == Some(sfn_checksum(&short.raw_name))
            {
                self.accumulator.render()
            } else {
                short.short_name()
            };
            self.accumulator.reset();

            let kind = if short.is_directory() {
                DirEntryKind::Directory
            } else {
                DirEntryKind::File
            };

            let entry = VisibleEntry {
                name,
                kind,
                first_cluster: short.first_cluster(),
                size: short.size,
                entry_index: short.entry_index,
                dir_sector: sector,
                dir_offset: offset,
            };

            self.advance_entry(fs)?;
            return Ok(Some(entry));
        }
    }
}

/// Looks up `name` (case-insensitive) as a direct child of the directory starting at
/// `dir_handle`, matching against both the resolved long name and the reconstructed short name.
pub fn find_entry<D: BlockDevice>(
    fs: &mut FatFileSystem<D>,
    mut dir_handle: DirHandle,
    name: &str,
) -> Result<Option<VisibleEntry>, FatError> {
    while let Some(entry) = dir_handle.next(fs)? {
        if entry.name.eq_ignore_ascii_case(name) {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}
