//! Hash-indexed, doubly-linked LRU write-back sector cache over a [`BlockDevice`].
//!
//! Entries live in a dense arena (`Vec<Entry>`); back-references between the hash table, the
//! LRU list and the arena are small integer handles rather than pointers, following the
//! arena+index shape used for the on-disk structures this cache sits in front of.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use qk_block::{BlockDevice, BlockError};

const BUCKET_COUNT: usize = 256;
const EMPTY_SECTOR: u64 = 0xFFFF_FFFF_FFFF_FFFF;

type Link = Option<usize>;

struct Entry {
    sector: u64,
    data: Vec<u8>,
    dirty: bool,
    hash_next: Link,
    hash_prev: Link,
    lru_next: Link,
    lru_prev: Link,
}

impl Entry {
    fn empty(sector_size: usize) -> Self {
        Self {
            sector: EMPTY_SECTOR,
            data: vec![0u8; sector_size],
            dirty: false,
            hash_next: None,
            hash_prev: None,
            lru_next: None,
            lru_prev: None,
        }
    }
}

fn bucket_of(sector: u64) -> usize {
    (sector % BUCKET_COUNT as u64) as usize
}

/// LRU hash-indexed write-back sector cache. `capacity` entries are pre-allocated up front;
/// the cache never grows past that bound.
pub struct SectorCache<D: BlockDevice> {
    device: D,
    sector_size: usize,
    entries: Vec<Entry>,
    buckets: [Link; BUCKET_COUNT],
    lru_head: Link, // most recently used
    lru_tail: Link, // least recently used, eviction candidate
    free: Vec<usize>,
}

impl<D: BlockDevice> SectorCache<D> {
    /// `cache_bytes` is divided by `sector_size` to determine the number of pre-allocated
    /// entries.
    pub fn new(device: D, cache_bytes: usize) -> Self {
        let sector_size = device.sector_size();
        let capacity = (cache_bytes / sector_size).max(1);
        let entries: Vec<Entry> = (0..capacity).map(|_| Entry::empty(sector_size)).collect();
        let free: Vec<usize> = (0..capacity).rev().collect();
        Self {
            device,
            sector_size,
            entries,
            buckets: [None; BUCKET_COUNT],
            lru_head: None,
            lru_tail: None,
            free,
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn hash_find(&self, sector: u64) -> Link {
        let mut cur = self.buckets[bucket_of(sector)];
        while let Some(idx) = cur {
            if self.entries[idx].sector == sector {
                return Some(idx);
            }
            cur = self.entries[idx].hash_next;
        }
        None
    }

    fn hash_insert(&mut self, idx: usize) {
        let bucket = bucket_of(self.entries[idx].sector);
        let old_head = self.buckets[bucket];
        self.entries[idx].hash_next = old_head;
        self.entries[idx].hash_prev = None;
        if let Some(old) = old_head {
            self.entries[old].hash_prev = Some(idx);
        }
        self.buckets[bucket] = Some(idx);
    }

    /// Unlinks `idx` from its hash chain. Safe to call on an entry that was never inserted
    /// (e.g. a freshly allocated slot); eviction always calls this regardless of dirty state,
    /// so the hash table never points at a stale or reused slot.
    fn hash_remove(&mut self, idx: usize) {
        if self.entries[idx].sector == EMPTY_SECTOR {
            return;
        }
        let bucket = bucket_of(self.entries[idx].sector);
        let prev = self.entries[idx].hash_prev;
        let next = self.entries[idx].hash_next;
        match prev {
            Some(p) => self.entries[p].hash_next = next,
            None => self.buckets[bucket] = next,
        }
        if let Some(n) = next {
            self.entries[n].hash_prev = prev;
        }
        self.entries[idx].hash_next = None;
        self.entries[idx].hash_prev = None;
    }

    fn lru_unlink(&mut self, idx: usize) {
        let prev = self.entries[idx].lru_prev;
        let next = self.entries[idx].lru_next;
        match prev {
            Some(p) => self.entries[p].lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.entries[n].lru_prev = prev,
            None => self.lru_tail = prev,
        }
        self.entries[idx].lru_prev = None;
        self.entries[idx].lru_next = None;
    }

    fn lru_push_front(&mut self, idx: usize) {
        self.entries[idx].lru_prev = None;
        self.entries[idx].lru_next = self.lru_head;
        if let Some(head) = self.lru_head {
            self.entries[head].lru_prev = Some(idx);
        }
        self.lru_head = Some(idx);
        if self.lru_tail.is_none() {
            self.lru_tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.lru_head == Some(idx) {
            return;
        }
        self.lru_unlink(idx);
        self.lru_push_front(idx);
    }

    /// Returns a free slot, evicting the LRU tail (writing it back first if dirty) when the
    /// cache is full.
    fn acquire_slot(&mut self) -> Result<usize, BlockError> {
        if let Some(idx) = self.free.pop() {
            return Ok(idx);
        }
        let victim = self.lru_tail.expect("cache full implies a non-empty LRU list");
        if self.entries[victim].dirty {
            let sector = self.entries[victim].sector;
            let size = self.sector_size;
            let data = self.entries[victim].data.clone();
            self.device.write_sectors(sector, &data[..size])?;
            self.entries[victim].dirty = false;
        }
        self.hash_remove(victim);
        self.lru_unlink(victim);
        self.entries[victim].sector = EMPTY_SECTOR;
        Ok(victim)
    }

    /// Look up `sector`, populating `buf` (must be exactly `sector_size()` bytes) from the
    /// cache on hit, or from the device (installing the result) on miss.
    pub fn read(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.len() != self.sector_size {
            return Err(BlockError::InvalidParam);
        }
        if let Some(idx) = self.hash_find(sector) {
            buf.copy_from_slice(&self.entries[idx].data);
            self.touch(idx);
            return Ok(());
        }

        let idx = self.acquire_slot()?;
        self.device.read_sectors(sector, buf)?;
        self.entries[idx].data.copy_from_slice(buf);
        self.entries[idx].sector = sector;
        self.entries[idx].dirty = false;
        self.hash_insert(idx);
        self.lru_push_front(idx);
        Ok(())
    }

    /// Write `data` (must be exactly `sector_size()` bytes) into the cached copy of `sector`,
    /// marking it dirty. Visible to subsequent `read` calls immediately; reaches the device
    /// only on eviction or `flush`.
    pub fn write(&mut self, sector: u64, data: &[u8]) -> Result<(), BlockError> {
        if data.len() != self.sector_size {
            return Err(BlockError::InvalidParam);
        }
        let idx = match self.hash_find(sector) {
            Some(idx) => idx,
            None => {
                let idx = self.acquire_slot()?;
                self.entries[idx].sector = sector;
                self.hash_insert(idx);
                self.lru_push_front(idx);
                idx
            }
        };
        self.entries[idx].data.copy_from_slice(data);
        self.entries[idx].dirty = true;
        self.touch(idx);
        Ok(())
    }

    /// Writes back every dirty entry, in LRU order (tail to head), and clears their dirty flags.
    pub fn flush(&mut self) -> Result<(), BlockError> {
        let mut order = Vec::new();
        let mut cur = self.lru_tail;
        while let Some(idx) = cur {
            order.push(idx);
            cur = self.entries[idx].lru_prev;
        }
        for idx in order {
            if self.entries[idx].dirty {
                let sector = self.entries[idx].sector;
                let size = self.sector_size;
                let data = self.entries[idx].data.clone();
                self.device.write_sectors(sector, &data[..size])?;
                self.entries[idx].dirty = false;
            }
        }
        Ok(())
    }

    /// Drops every entry without writing back, clearing both the hash table and the LRU list.
    /// Dirty data not separately flushed is lost.
    pub fn invalidate(&mut self) {
        for idx in 0..self.entries.len() {
            self.entries[idx].sector = EMPTY_SECTOR;
            self.entries[idx].dirty = false;
            self.entries[idx].hash_next = None;
            self.entries[idx].hash_prev = None;
            self.entries[idx].lru_next = None;
            self.entries[idx].lru_prev = None;
        }
        self.buckets = [None; BUCKET_COUNT];
        self.lru_head = None;
        self.lru_tail = None;
        self.free = (0..self.entries.len()).rev().collect();
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qk_block::MemoryBlockDevice;

    fn cache_of(sectors: u64, capacity_sectors: usize) -> SectorCache<MemoryBlockDevice> {
        let dev = MemoryBlockDevice::new(512, sectors);
        SectorCache::new(dev, capacity_sectors * 512)
    }

    #[test]
    fn read_then_write_then_flush_reaches_device() {
        let mut cache = cache_of(16, 4);
        let payload = vec![0x7Au8; 512];
        cache.write(3, &payload).unwrap();

        let mut readback = vec![0u8; 512];
        cache.read(3, &mut readback).unwrap();
        assert_eq!(readback, payload);

        cache.flush().unwrap();
        let dev = cache.into_device();
        let mut verify = MemoryBlockDevice::from_image(512, dev.as_slice().to_vec());
        let mut on_disk = vec![0u8; 512];
        verify.read_sector(3, &mut on_disk).unwrap();
        assert_eq!(on_disk, payload);
    }

    #[test]
    fn eviction_writes_back_dirty_tail_before_reuse() {
        let mut cache = cache_of(16, 2);
        cache.write(0, &vec![0x11u8; 512]).unwrap();
        cache.write(1, &vec![0x22u8; 512]).unwrap();
        // Capacity is 2; this third write must evict sector 0 (the LRU tail) and write it back.
        cache.write(2, &vec![0x33u8; 512]).unwrap();

        let mut readback = vec![0u8; 512];
        cache.device_mut().read_sector(0, &mut readback).unwrap();
        assert_eq!(readback, vec![0x11u8; 512]);
    }

    #[test]
    fn eviction_always_unlinks_hash_entry_even_when_clean() {
        let mut cache = cache_of(16, 1);
        let mut buf = vec![0u8; 512];
        cache.read(0, &mut buf).unwrap(); // clean entry, no dirty write
        cache.read(1, &mut buf).unwrap(); // evicts sector 0's slot

        // Sector 0 must be a clean miss again, not a stale hash-chain hit.
        assert!(cache.hash_find(0).is_none());
    }

    #[test]
    fn invalidate_clears_hash_and_lru_state() {
        let mut cache = cache_of(16, 4);
        cache.write(0, &vec![0xAAu8; 512]).unwrap();
        cache.write(1, &vec![0xBBu8; 512]).unwrap();
        cache.invalidate();
        assert!(cache.hash_find(0).is_none());
        assert!(cache.hash_find(1).is_none());
        assert_eq!(cache.free.len(), cache.capacity());
    }
}
