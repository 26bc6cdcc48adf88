//! Bitmap physical frame allocator.
//!
//! One bit per 4 KiB frame, up to the highest address reported by any memory region. Bits start
//! set (allocated); regions marked [`MemoryRegionKind::Available`] are cleared during `new`,
//! which is the only time free frames are discovered — there is no deferred coalescing, the
//! bitmap is always ground truth.

use core::cmp;

use spin::Mutex;
use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB},
    PhysAddr,
};

const FRAME_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAllocatorError;

/// Kind of a firmware/bootloader-reported memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Available,
    Reserved,
    Acpi,
    Nvs,
    Bad,
    Kernel,
    BootloaderReclaimable,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.base + self.size
    }
}

/// Bitmap-backed frame allocator. Bit `i` set means frame `i` (base address `i * 4096`) is
/// allocated. Index 0 (physical address 0) is always treated as allocated so that it can be used
/// as an out-of-memory sentinel by callers.
pub struct FrameBitmapAllocator {
    bitmap: alloc::vec::Vec<u8>,
    frame_count: usize,
    free_count: usize,
}

impl FrameBitmapAllocator {
    /// Build the bitmap from a list of firmware memory regions. The bitmap is sized to the
    /// highest usable address; only [`MemoryRegionKind::Available`] regions contribute free
    /// frames.
    pub fn new(regions: &[MemoryRegion]) -> Self {
        let highest = regions.iter().map(MemoryRegion::end).max().unwrap_or(0);
        let frame_count = ((highest + FRAME_SIZE - 1) / FRAME_SIZE) as usize;
        let byte_count = (frame_count + 7) / 8;

        // Start fully allocated; available regions clear bits below.
        let mut bitmap = alloc::vec![0xFFu8; byte_count];

        let mut free_count = 0usize;
        for region in regions {
            if region.kind != MemoryRegionKind::Available {
                continue;
            }
            let start_frame = (region.base / FRAME_SIZE) as usize;
            let end_frame = cmp::min(frame_count, (region.end() / FRAME_SIZE) as usize);
            for frame in start_frame..end_frame {
                if frame == 0 {
                    // frame 0 / physical address 0 is reserved as the OOM sentinel.
                    continue;
                }
                if Self::test_bit(&bitmap, frame) {
                    Self::clear_bit(&mut bitmap, frame);
                    free_count += 1;
                }
            }
        }

        log::info!(
            "qk-mm: frame bitmap covers {} frames ({} free)",
            frame_count,
            free_count
        );

        Self {
            bitmap,
            frame_count,
            free_count,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.frame_count
    }

    pub fn free_frames(&self) -> usize {
        self.free_count
    }

    fn test_bit(bitmap: &[u8], frame: usize) -> bool {
        bitmap[frame / 8] & (1 << (frame % 8)) != 0
    }

    fn set_bit(bitmap: &mut [u8], frame: usize) {
        bitmap[frame / 8] |= 1 << (frame % 8);
    }

    fn clear_bit(bitmap: &mut [u8], frame: usize) {
        bitmap[frame / 8] &= !(1 << (frame % 8));
    }

    /// Allocate a single frame. Returns `None` (caller treats physical address 0 as sentinel) if
    /// none is free.
    pub fn allocate(&mut self) -> Option<PhysAddr> {
        for frame in 1..self.frame_count {
            if !Self::test_bit(&self.bitmap, frame) {
                Self::set_bit(&mut self.bitmap, frame);
                self.free_count -= 1;
                return Some(PhysAddr::new(frame as u64 * FRAME_SIZE));
            }
        }
        None
    }

    /// Allocate `count` contiguous frames. Rolls back any bits it set if the run cannot be
    /// completed.
    pub fn allocate_contiguous(&mut self, count: usize) -> Option<PhysAddr> {
        if count == 0 {
            return None;
        }
        let mut run_start = None;
        let mut run_len = 0usize;

        for frame in 1..self.frame_count {
            if !Self::test_bit(&self.bitmap, frame) {
                if run_start.is_none() {
                    run_start = Some(frame);
                }
                run_len += 1;
                if run_len == count {
                    let start = run_start.unwrap();
                    for f in start..start + count {
                        Self::set_bit(&mut self.bitmap, f);
                    }
                    self.free_count -= count;
                    return Some(PhysAddr::new(start as u64 * FRAME_SIZE));
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        None
    }

    /// Free a single frame. Flips exactly one bit.
    pub fn free(&mut self, addr: PhysAddr) {
        let frame = (addr.as_u64() / FRAME_SIZE) as usize;
        if frame == 0 || frame >= self.frame_count {
            return;
        }
        if Self::test_bit(&self.bitmap, frame) {
            Self::clear_bit(&mut self.bitmap, frame);
            self.free_count += 1;
        }
    }

    /// Free `count` frames starting at `addr`.
    pub fn free_contiguous(&mut self, addr: PhysAddr, count: usize) {
        let start = addr.as_u64() / FRAME_SIZE;
        for i in 0..count as u64 {
            self.free(PhysAddr::new((start + i) * FRAME_SIZE));
        }
    }
}

/// Lock-guarded allocator implementing `x86_64`'s `FrameAllocator`/`FrameDeallocator` traits so
/// it composes directly with `OffsetPageTable::map_to`.
pub struct LockedFrameAllocator(Mutex<FrameBitmapAllocator>);

impl LockedFrameAllocator {
    pub fn new(regions: &[MemoryRegion]) -> Self {
        Self(Mutex::new(FrameBitmapAllocator::new(regions)))
    }

    pub fn stats(&self) -> (usize, usize) {
        let inner = self.0.lock();
        (inner.total_frames(), inner.free_frames())
    }

    pub fn allocate_contiguous(&self, count: usize) -> Option<PhysAddr> {
        self.0.lock().allocate_contiguous(count)
    }

    pub fn free_contiguous(&self, addr: PhysAddr, count: usize) {
        self.0.lock().free_contiguous(addr, count);
    }
}

unsafe impl FrameAllocator<Size4KiB> for LockedFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        self.0
            .lock()
            .allocate()
            .map(|addr| PhysFrame::containing_address(addr))
    }
}

impl FrameDeallocator<Size4KiB> for LockedFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        self.0.lock().free(frame.start_address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> alloc::vec::Vec<MemoryRegion> {
        alloc::vec![
            MemoryRegion { base: 0, size: 0x10_0000, kind: MemoryRegionKind::Reserved },
            MemoryRegion { base: 0x10_0000, size: 0x10_0000, kind: MemoryRegionKind::Available },
        ]
    }

    #[test]
    fn free_count_matches_region() {
        let alloc = FrameBitmapAllocator::new(&regions());
        assert_eq!(alloc.free_frames(), 0x10_0000 / 4096);
    }

    #[test]
    fn allocate_then_free_restores_count() {
        let mut alloc = FrameBitmapAllocator::new(&regions());
        let initial = alloc.free_frames();
        let mut allocated = alloc::vec::Vec::new();
        for _ in 0..16 {
            allocated.push(alloc.allocate().expect("frame"));
        }
        assert_eq!(alloc.free_frames(), initial - 16);
        for addr in allocated {
            alloc.free(addr);
        }
        assert_eq!(alloc.free_frames(), initial);
    }

    #[test]
    fn contiguous_allocation_does_not_overlap() {
        let mut alloc = FrameBitmapAllocator::new(&regions());
        let a = alloc.allocate_contiguous(4).expect("run of 4");
        let b = alloc.allocate_contiguous(4).expect("run of 4");
        assert!(a.as_u64() + 4 * 4096 <= b.as_u64() || b.as_u64() + 4 * 4096 <= a.as_u64());
    }

    #[test]
    fn exhausted_allocator_returns_none() {
        let regions = alloc::vec![MemoryRegion { base: 0x1000, size: 0x1000, kind: MemoryRegionKind::Available }];
        let mut alloc = FrameBitmapAllocator::new(&regions);
        assert!(alloc.allocate().is_some());
        assert!(alloc.allocate().is_none());
    }
}
