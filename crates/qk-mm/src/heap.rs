//! A freestanding first-fit free-list heap, exposed as a `GlobalAlloc`.
//!
//! Headers form a doubly linked list over a single contiguous static region. Allocation rounds
//! up to 16-byte alignment; a block is split only when the residue would still hold a header
//! plus 16 bytes. Free coalesces with both neighbours. Double-free is detected via the `used`
//! flag and logged rather than corrupting the list.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::NonNull;

use spin::Mutex;

const ALIGN: usize = 16;

#[repr(C)]
struct BlockHeader {
    size: usize, // size of the usable region that follows this header, not including the header
    used: bool,
    prev: Option<NonNull<BlockHeader>>,
    next: Option<NonNull<BlockHeader>>,
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

struct FreeListHeap {
    head: Option<NonNull<BlockHeader>>,
    heap_start: usize,
    heap_end: usize,
}

unsafe impl Send for FreeListHeap {}

impl FreeListHeap {
    const fn empty() -> Self {
        Self {
            head: None,
            heap_start: 0,
            heap_end: 0,
        }
    }

    /// # Safety
    /// `[heap_start, heap_start + size)` must be valid, writable, and not aliased elsewhere.
    unsafe fn init(&mut self, heap_start: usize, size: usize) {
        let header_size = align_up(size_of::<BlockHeader>(), ALIGN);
        assert!(size > header_size, "heap region too small to hold one header");

        let header_ptr = heap_start as *mut BlockHeader;
        header_ptr.write(BlockHeader {
            size: size - header_size,
            used: false,
            prev: None,
            next: None,
        });

        self.head = NonNull::new(header_ptr);
        self.heap_start = heap_start;
        self.heap_end = heap_start + size;
    }

    fn header_size() -> usize {
        align_up(size_of::<BlockHeader>(), ALIGN)
    }

    unsafe fn data_ptr(header: NonNull<BlockHeader>) -> *mut u8 {
        (header.as_ptr() as *mut u8).add(Self::header_size())
    }

    /// Split `block` if the residue after carving out `needed` bytes would still fit a header
    /// plus 16 bytes; otherwise the whole block is handed out as-is (internal fragmentation).
    unsafe fn maybe_split(&mut self, mut block: NonNull<BlockHeader>, needed: usize) {
        let header_size = Self::header_size();
        let block_size = block.as_ref().size;
        if block_size >= needed + header_size + ALIGN {
            let new_header_addr = (block.as_ptr() as usize) + header_size + needed;
            let new_block_size = block_size - needed - header_size;

            let new_header_ptr = new_header_addr as *mut BlockHeader;
            new_header_ptr.write(BlockHeader {
                size: new_block_size,
                used: false,
                prev: Some(block),
                next: block.as_ref().next,
            });
            let new_block = NonNull::new_unchecked(new_header_ptr);

            if let Some(mut next) = block.as_ref().next {
                next.as_mut().prev = Some(new_block);
            }
            block.as_mut().next = Some(new_block);
            block.as_mut().size = needed;
        }
    }

    unsafe fn find_free_block(&mut self, needed: usize) -> Option<NonNull<BlockHeader>> {
        let mut cur = self.head;
        while let Some(block) = cur {
            let b = block.as_ref();
            if !b.used && b.size >= needed {
                return Some(block);
            }
            cur = b.next;
        }
        None
    }

    unsafe fn alloc(&mut self, layout: Layout) -> *mut u8 {
        let needed = align_up(layout.size().max(1), ALIGN);

        let block = match self.find_free_block(needed) {
            Some(b) => b,
            None => return core::ptr::null_mut(),
        };
        self.maybe_split(block, needed);

        let mut block = block;
        block.as_mut().used = true;
        Self::data_ptr(block)
    }

    unsafe fn header_for(&self, ptr: *mut u8) -> NonNull<BlockHeader> {
        let header_addr = (ptr as usize) - Self::header_size();
        NonNull::new_unchecked(header_addr as *mut BlockHeader)
    }

    unsafe fn dealloc(&mut self, ptr: *mut u8) {
        let mut block = self.header_for(ptr);

        if !block.as_ref().used {
            log::warn!("qk-mm: double free detected at {:p}, ignoring", ptr);
            return;
        }
        block.as_mut().used = false;

        // Coalesce with next, then previous.
        if let Some(next) = block.as_ref().next {
            if !next.as_ref().used {
                self.merge_with_next(block);
            }
        }
        if let Some(prev) = block.as_ref().prev {
            if !prev.as_ref().used {
                self.merge_with_next(prev);
            }
        }
    }

    unsafe fn merge_with_next(&mut self, mut block: NonNull<BlockHeader>) {
        let next = match block.as_ref().next {
            Some(n) => n,
            None => return,
        };
        let header_size = Self::header_size();
        block.as_mut().size += header_size + next.as_ref().size;
        block.as_mut().next = next.as_ref().next;
        if let Some(mut after) = next.as_ref().next {
            after.as_mut().prev = Some(block);
        }
    }

    unsafe fn realloc(&mut self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let block = self.header_for(ptr);
        let needed = align_up(new_size.max(1), ALIGN);

        if block.as_ref().size >= needed {
            self.maybe_split(block, needed);
            return ptr;
        }

        let new_ptr = self.alloc(Layout::from_size_align_unchecked(new_size, layout.align()));
        if !new_ptr.is_null() {
            core::ptr::copy_nonoverlapping(ptr, new_ptr, block.as_ref().size.min(new_size));
            self.dealloc(ptr);
        }
        new_ptr
    }

    /// Sum of all block sizes including headers; should always equal the heap extent.
    fn total_accounted(&self) -> usize {
        let mut total = 0usize;
        let mut cur = self.head;
        let header_size = Self::header_size();
        unsafe {
            while let Some(block) = cur {
                total += header_size + block.as_ref().size;
                cur = block.as_ref().next;
            }
        }
        total
    }
}

/// Global allocator wrapper. Construct with [`Heap::empty`] as a `static`, then call
/// [`Heap::init`] once during boot before any allocation happens.
pub struct Heap(Mutex<FreeListHeap>);

impl Heap {
    pub const fn empty() -> Self {
        Self(Mutex::new(FreeListHeap::empty()))
    }

    /// # Safety
    /// See [`FreeListHeap::init`].
    pub unsafe fn init(&self, heap_start: usize, size: usize) {
        self.0.lock().init(heap_start, size);
    }

    pub fn extent(&self) -> usize {
        let inner = self.0.lock();
        inner.heap_end - inner.heap_start
    }

    /// Sum of block sizes (headers included); must equal [`Heap::extent`] at all times.
    pub fn total_accounted(&self) -> usize {
        self.0.lock().total_accounted()
    }
}

unsafe impl GlobalAlloc for Heap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0.lock().alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.lock().dealloc(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.0.lock().realloc(ptr, layout, new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::alloc::Layout;

    fn make_heap(size: usize) -> (Heap, alloc::vec::Vec<u8>) {
        let mut backing = alloc::vec![0u8; size];
        let heap = Heap::empty();
        unsafe { heap.init(backing.as_mut_ptr() as usize, size) };
        (heap, backing)
    }

    #[test]
    fn block_sum_matches_extent() {
        let (heap, _backing) = make_heap(4096);
        let extent = heap.extent();
        unsafe {
            let a = heap.alloc(Layout::from_size_align(64, 8).unwrap());
            let b = heap.alloc(Layout::from_size_align(128, 8).unwrap());
            assert!(!a.is_null() && !b.is_null());
            assert_eq!(heap.total_accounted(), extent);
            heap.dealloc(a, Layout::from_size_align(64, 8).unwrap());
            assert_eq!(heap.total_accounted(), extent);
            heap.dealloc(b, Layout::from_size_align(128, 8).unwrap());
            assert_eq!(heap.total_accounted(), extent);
        }
    }

    #[test]
    fn double_free_does_not_corrupt_list() {
        let (heap, _backing) = make_heap(4096);
        let extent = heap.extent();
        unsafe {
            let layout = Layout::from_size_align(32, 8).unwrap();
            let a = heap.alloc(layout);
            heap.dealloc(a, layout);
            heap.dealloc(a, layout); // double free: should be a no-op, not corrupt the list
            assert_eq!(heap.total_accounted(), extent);
            let b = heap.alloc(layout);
            assert!(!b.is_null());
        }
    }

    #[test]
    fn realloc_in_place_when_it_fits() {
        let (heap, _backing) = make_heap(4096);
        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let a = heap.alloc(layout);
            let b = heap.realloc(a, layout, 32);
            assert_eq!(a, b); // shrinking fits in place
        }
    }
}
