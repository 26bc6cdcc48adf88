//! [`qk_tpm::PhysMapper`] implementation for this kernel: under the identity-mapping
//! simplification documented in `dma.rs`, mapping a physical address is just a cast.

use qk_tpm::PhysMapper;

pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    unsafe fn map(&self, phys: u64, _len: usize) -> *mut u8 {
        crate::dma::virt_addr_of(phys)
    }
}
