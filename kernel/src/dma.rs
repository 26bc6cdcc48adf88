//! DMA-capable buffer arena (§9 "Ownership of DMA buffers"): backs the xHCI driver's DCBAA,
//! rings, ERST, scratchpads, input contexts, and HID report buffers, plus the TPM CRB
//! command/response buffers — all physical-address-addressable allocations kept out of the
//! general heap.
//!
//! Like `qk_xhci::ring`'s own DMA simplification (`Vec<Trb>::as_ptr() as u64` standing in for a
//! physical address, see `DESIGN.md`), this arena lives in a statically allocated region that
//! Limine identity-maps below the 4 GiB line, so a buffer's virtual address doubles as its
//! physical address. A real IOMMU-aware platform would instead resolve this through the page
//! tables; that's out of scope here.

use core::alloc::Layout;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use spin::Mutex;

const ARENA_SIZE: usize = 4 * 1024 * 1024;

#[repr(align(4096))]
struct AlignedArena([MaybeUninit<u8>; ARENA_SIZE]);

static mut ARENA: AlignedArena = AlignedArena([MaybeUninit::uninit(); ARENA_SIZE]);

struct BumpState {
    next: usize,
}

static STATE: Mutex<BumpState> = Mutex::new(BumpState { next: 0 });

/// An uninitialised, physical-address-addressable buffer of `len` bytes, zeroed and aligned to
/// `align`. Never freed individually; the arena is sized generously for the fixed set of
/// long-lived driver structures it backs.
pub fn alloc(len: usize, align: usize) -> NonNull<u8> {
    let mut state = STATE.lock();
    let base = unsafe { core::ptr::addr_of_mut!(ARENA) as *mut u8 };
    let start = unsafe { base.add(state.next) } as usize;
    let aligned = (start + align - 1) & !(align - 1);
    let offset = aligned - base as usize;
    assert!(offset + len <= ARENA_SIZE, "DMA arena exhausted");
    state.next = offset + len;

    let ptr = aligned as *mut u8;
    unsafe { core::ptr::write_bytes(ptr, 0, len) };
    NonNull::new(ptr).expect("DMA arena pointer is never null")
}

/// Convenience wrapper for a single `T`, zero-initialised.
pub fn alloc_typed<T>() -> NonNull<T> {
    let layout = Layout::new::<T>();
    alloc(layout.size(), layout.align()).cast()
}

/// Identity-mapped simplification: a DMA buffer's physical address is its virtual address.
pub fn phys_addr_of(ptr: NonNull<u8>) -> u64 {
    ptr.as_ptr() as u64
}

/// The inverse of [`phys_addr_of`] under the same identity-mapping assumption, used to satisfy
/// `qk_tpm::control_area::PhysMapper`.
pub fn virt_addr_of(phys: u64) -> *mut u8 {
    phys as *mut u8
}
