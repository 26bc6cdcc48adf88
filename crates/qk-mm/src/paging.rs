//! Page table manipulation: map/unmap/translate over a 4-level x86_64 page table, plus a
//! monotonic virtual-address allocator used for the heap and DMA arenas.

use x86_64::{
    structures::paging::{
        mapper::{MapToError, MapperAllSizes, TranslateResult, UnmapError},
        FrameAllocator, FrameDeallocator, Mapper, OffsetPageTable, Page, PageTable,
        PageTableFlags, PhysFrame, Size4KiB, Translate,
    },
    PhysAddr, VirtAddr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    FrameAllocationFailed,
    AlreadyMapped,
    NotMapped,
}

/// Wraps an `OffsetPageTable` built over the bootloader's HHDM mapping and adds the
/// range/rollback semantics the spec requires on top of the raw `Mapper` trait.
pub struct VmManager<'a> {
    mapper: OffsetPageTable<'a>,
    physical_memory_offset: VirtAddr,
}

impl<'a> VmManager<'a> {
    /// # Safety
    /// `physical_memory_offset` must be the correct HHDM offset supplied by the bootloader, and
    /// must stay valid for the lifetime of the returned manager.
    pub unsafe fn init(physical_memory_offset: VirtAddr) -> Self {
        let level_4_table = Self::active_level_4_table(physical_memory_offset);
        let mapper = OffsetPageTable::new(level_4_table, physical_memory_offset);
        Self {
            mapper,
            physical_memory_offset,
        }
    }

    unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'a mut PageTable {
        use x86_64::registers::control::Cr3;

        let (level_4_table_frame, _) = Cr3::read();
        let phys = level_4_table_frame.start_address();
        let virt = physical_memory_offset + phys.as_u64();
        let page_table_ptr: *mut PageTable = virt.as_mut_ptr();
        &mut *page_table_ptr
    }

    /// Map a single page, allocating any missing intermediate tables from `frame_allocator`.
    pub fn map(
        &mut self,
        page: Page<Size4KiB>,
        frame: PhysFrame<Size4KiB>,
        flags: PageTableFlags,
        frame_allocator: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), VmError> {
        unsafe {
            self.mapper
                .map_to(page, frame, flags, frame_allocator)
                .map(|flush| flush.flush())
                .map_err(|e| match e {
                    MapToError::FrameAllocationFailed => VmError::FrameAllocationFailed,
                    MapToError::PageAlreadyMapped(_) => VmError::AlreadyMapped,
                    MapToError::ParentEntryHugePage => VmError::AlreadyMapped,
                })
        }
    }

    /// Unmap a single page. Invalidates the TLB entry for exactly that page. Returns
    /// [`VmError::NotMapped`] if the page wasn't mapped (no partial side effects).
    pub fn unmap(&mut self, page: Page<Size4KiB>) -> Result<(), VmError> {
        self.mapper
            .unmap(page)
            .map(|(_, flush)| flush.flush())
            .map_err(|e| match e {
                UnmapError::ParentEntryHugePage | UnmapError::PageNotMapped => VmError::NotMapped,
                UnmapError::InvalidFrameAddress(_) => VmError::NotMapped,
            })
    }

    /// Translate a virtual address. Returns `None` if unmapped (spec: translate of unmapped
    /// returns zero; the caller maps `None` to zero at the FFI boundary if needed).
    pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        match self.mapper.translate(addr) {
            TranslateResult::Mapped { frame, offset, .. } => {
                Some(frame.start_address() + offset)
            }
            TranslateResult::NotMapped | TranslateResult::InvalidFrameAddress(_) => None,
        }
    }

    /// Map a contiguous range of pages to a contiguous range of frames. On first failure,
    /// unmaps everything mapped so far so the range has no partial mappings.
    pub fn map_range(
        &mut self,
        start_page: Page<Size4KiB>,
        start_frame: PhysFrame<Size4KiB>,
        count: u64,
        flags: PageTableFlags,
        frame_allocator: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), VmError> {
        let mut mapped = 0u64;
        for i in 0..count {
            let page = start_page + i;
            let frame = start_frame + i;
            if let Err(e) = self.map(page, frame, flags, frame_allocator) {
                for j in 0..mapped {
                    let _ = self.unmap(start_page + j);
                }
                return Err(e);
            }
            mapped += 1;
        }
        Ok(())
    }

    pub fn physical_memory_offset(&self) -> VirtAddr {
        self.physical_memory_offset
    }
}

/// Monotonic virtual-address cursor used to carve out kernel-owned ranges (heap, DMA arena) from
/// a reserved slice of virtual address space. Not a general VMA allocator: it never reuses
/// freed ranges.
pub struct VirtualCursor {
    next: VirtAddr,
    end: VirtAddr,
}

impl VirtualCursor {
    pub fn new(start: VirtAddr, end: VirtAddr) -> Self {
        Self { next: start, end }
    }

    /// Allocate `pages` contiguous 4 KiB pages of virtual space, mapping each to a freshly
    /// allocated physical frame. On failure, unmaps and frees whatever was mapped so far and
    /// returns the partially-consumed frames to the allocator.
    pub fn allocate_mapped(
        &mut self,
        pages: u64,
        flags: PageTableFlags,
        vm: &mut VmManager,
        frame_allocator: &mut (impl FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>),
    ) -> Result<VirtAddr, VmError> {
        let size = pages * 4096;
        if self.next + size > self.end {
            return Err(VmError::FrameAllocationFailed);
        }
        let start = self.next;
        let mut mapped_pages = alloc::vec::Vec::new();

        for i in 0..pages {
            let page = Page::containing_address(start + i * 4096);
            let frame = match frame_allocator.allocate_frame() {
                Some(f) => f,
                None => {
                    for p in mapped_pages {
                        let _ = vm.unmap(p);
                    }
                    return Err(VmError::FrameAllocationFailed);
                }
            };
            if vm.map(page, frame, flags, frame_allocator).is_err() {
                unsafe { frame_allocator.deallocate_frame(frame) };
                for p in mapped_pages {
                    let _ = vm.unmap(p);
                }
                return Err(VmError::FrameAllocationFailed);
            }
            mapped_pages.push(page);
        }

        self.next += size;
        Ok(start)
    }
}
