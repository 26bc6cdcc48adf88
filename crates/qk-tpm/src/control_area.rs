//! CRB control area and the command-submission state machine (§4.14, §6).
//!
//! The control area's register layout here is the simplified one this platform's firmware
//! exposes (not the full TCG CRB interface): `CTRL_REQ`/`CTRL_STS`/`CTRL_CANCEL`/`CTRL_START`
//! packed at the front, then the command/response buffer descriptors starting at `0x18`.

use volatile::Volatile;

use crate::error::TpmError;

#[cfg(not(test))]
const SPIN_BOUND: u32 = 1_000_000;
#[cfg(test)]
const SPIN_BOUND: u32 = 1_000;

const CTRL_REQ_COMMAND_READY: u32 = 1 << 0;
const CTRL_REQ_GO_IDLE: u32 = 1 << 1;

/// Fixed MMIO layout of the CRB control area (§6 "Wire/register surfaces").
#[repr(C)]
pub struct CrbControlArea {
    pub ctrl_req: Volatile<u32>,    // 0x00
    pub ctrl_sts: Volatile<u32>,    // 0x04
    pub ctrl_cancel: Volatile<u32>, // 0x08
    pub ctrl_start: Volatile<u32>,  // 0x0C
    _reserved: [u32; 2],            // 0x10, 0x14
    pub cmd_size: Volatile<u32>,    // 0x18
    pub cmd_pa_low: Volatile<u32>,  // 0x1C
    pub cmd_pa_high: Volatile<u32>, // 0x20
    pub rsp_size: Volatile<u32>,    // 0x24
    pub rsp_pa: Volatile<u64>,      // 0x28
}

impl CrbControlArea {
    pub fn cmd_pa(&self) -> u64 {
        (u64::from(self.cmd_pa_high.read()) << 32) | u64::from(self.cmd_pa_low.read())
    }

    /// Builds a control area pointing at `cmd_pa`/`rsp_pa` with the given buffer sizes. Used by
    /// the kernel once it has allocated and zeroed the DMA-capable command/response buffers,
    /// and by this crate's own tests to drive [`CrbTransport`] against a fake device.
    pub fn new(cmd_pa: u64, cmd_len: u32, rsp_pa: u64, rsp_len: u32) -> Self {
        Self {
            ctrl_req: Volatile::new(0),
            ctrl_sts: Volatile::new(0),
            ctrl_cancel: Volatile::new(0),
            ctrl_start: Volatile::new(0),
            _reserved: [0; 2],
            cmd_size: Volatile::new(cmd_len),
            cmd_pa_low: Volatile::new(cmd_pa as u32),
            cmd_pa_high: Volatile::new((cmd_pa >> 32) as u32),
            rsp_size: Volatile::new(rsp_len),
            rsp_pa: Volatile::new(rsp_pa),
        }
    }
}

/// Maps a physical address/length pair into an addressable byte slice. The kernel's concrete
/// implementation resolves this through the HHDM offset; tests supply an identity mapper over
/// ordinary heap buffers.
pub trait PhysMapper {
    /// # Safety
    /// `phys` must name a region at least `len` bytes long that is valid to read and write for
    /// the lifetime of the returned pointer's use.
    unsafe fn map(&self, phys: u64, len: usize) -> *mut u8;
}

/// Drives the CRB state machine described in §4.14 over a control area plus the command/
/// response buffers it points at.
pub struct CrbTransport<'a> {
    control: &'a mut CrbControlArea,
    cmd_buf: &'a mut [u8],
    rsp_buf: &'a mut [u8],
}

impl<'a> CrbTransport<'a> {
    /// Reads the command/response buffer addresses and sizes out of `control` and maps them
    /// through `mapper`.
    ///
    /// # Safety
    /// `control` must point at a live CRB control area; the addresses it reports must satisfy
    /// `PhysMapper::map`'s contract.
    pub unsafe fn new(control: &'a mut CrbControlArea, mapper: &dyn PhysMapper) -> Self {
        let cmd_len = control.cmd_size.read() as usize;
        let rsp_len = control.rsp_size.read() as usize;
        let cmd_ptr = mapper.map(control.cmd_pa(), cmd_len);
        let rsp_ptr = mapper.map(control.rsp_pa.read(), rsp_len);
        Self {
            control,
            cmd_buf: core::slice::from_raw_parts_mut(cmd_ptr, cmd_len),
            rsp_buf: core::slice::from_raw_parts_mut(rsp_ptr, rsp_len),
        }
    }

    fn spin_until_clear(&self, read: impl Fn() -> u32, mask: u32) -> Result<(), TpmError> {
        for _ in 0..SPIN_BOUND {
            if read() & mask == 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(TpmError::Timeout)
    }

    /// Executes the CRB command/response cycle for `command` and returns the raw response
    /// bytes (header included).
    pub fn execute(&mut self, command: &[u8]) -> Result<alloc::vec::Vec<u8>, TpmError> {
        if command.len() > self.cmd_buf.len() {
            return Err(TpmError::InvalidFormat);
        }

        self.control.ctrl_req.update(|v| *v |= CTRL_REQ_COMMAND_READY);
        self.spin_until_clear(|| self.control.ctrl_req.read(), CTRL_REQ_COMMAND_READY)?;

        self.cmd_buf[..command.len()].copy_from_slice(command);
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

        let mut started = false;
        for attempt in 0..2 {
            self.control.ctrl_start.write(1);
            match self.spin_until_clear(|| self.control.ctrl_start.read(), 1) {
                Ok(()) => {
                    started = true;
                    break;
                }
                Err(TpmError::Timeout) if attempt == 0 => {
                    self.control.ctrl_cancel.write(1);
                }
                Err(e) => return Err(e),
            }
        }
        if !started {
            return Err(TpmError::Timeout);
        }
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

        if self.rsp_buf.len() < 10 {
            return Err(TpmError::InvalidFormat);
        }
        let response_size =
            u32::from_be_bytes([self.rsp_buf[2], self.rsp_buf[3], self.rsp_buf[4], self.rsp_buf[5]]) as usize;
        let response_size = response_size.min(self.rsp_buf.len());
        let response = alloc::vec::Vec::from(&self.rsp_buf[..response_size]);

        self.control.ctrl_req.update(|v| *v |= CTRL_REQ_GO_IDLE);
        self.spin_until_clear(|| self.control.ctrl_req.read(), CTRL_REQ_GO_IDLE)?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdentityMapper;

    impl PhysMapper for IdentityMapper {
        unsafe fn map(&self, phys: u64, _len: usize) -> *mut u8 {
            phys as *mut u8
        }
    }

    #[test]
    fn cmd_pa_combines_low_and_high_halves() {
        let control = CrbControlArea::new(0x1_0000_0004, 64, 0x2000, 64);
        assert_eq!(control.cmd_pa(), 0x1_0000_0004);
    }

    #[test]
    fn execute_times_out_against_a_non_cooperating_device() {
        let mut cmd_storage = [0u8; 64];
        let mut rsp_storage = [0u8; 64];
        let mut control = CrbControlArea::new(
            cmd_storage.as_mut_ptr() as u64,
            cmd_storage.len() as u32,
            rsp_storage.as_mut_ptr() as u64,
            rsp_storage.len() as u32,
        );
        // No device will ever clear CTRL_REQ, so the bounded spin must report a timeout
        // rather than loop forever.
        let mut transport = unsafe { CrbTransport::new(&mut control, &IdentityMapper) };
        assert_eq!(transport.execute(&[0xAA; 8]), Err(TpmError::Timeout));
    }
}
