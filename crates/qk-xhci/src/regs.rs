//! MMIO register layouts for the three xHCI register regions — Capability, Operational, and
//! Runtime — plus the per-port register set and doorbell array (§4.12, §6 "xHCI BAR").
//!
//! Each region is reached by adding a byte offset to BAR0's mapped virtual base: the Capability
//! registers sit at offset 0, Operational at `cap_length`, Runtime at `rtsoff`, and doorbells at
//! `dboff`. Fields are [`Volatile`] so every access goes through an explicit MMIO read/write
//! rather than one the compiler might reorder or elide.

use volatile::Volatile;

/// xHCI Capability Registers (fixed layout at BAR0 + 0).
#[repr(C)]
pub struct CapabilityRegisters {
    caplength_hciversion: Volatile<u32>,
    pub hcsparams1: Volatile<u32>,
    pub hcsparams2: Volatile<u32>,
    pub hcsparams3: Volatile<u32>,
    pub hccparams1: Volatile<u32>,
    pub dboff: Volatile<u32>,
    pub rtsoff: Volatile<u32>,
    pub hccparams2: Volatile<u32>,
}

impl CapabilityRegisters {
    pub fn cap_length(&self) -> u8 {
        (self.caplength_hciversion.read() & 0xFF) as u8
    }

    pub fn hci_version(&self) -> u16 {
        (self.caplength_hciversion.read() >> 16) as u16
    }

    pub fn max_device_slots(&self) -> u8 {
        (self.hcsparams1.read() & 0xFF) as u8
    }

    pub fn max_interrupters(&self) -> u16 {
        ((self.hcsparams1.read() >> 8) & 0x7FF) as u16
    }

    pub fn max_ports(&self) -> u8 {
        ((self.hcsparams1.read() >> 24) & 0xFF) as u8
    }

    pub fn context_size_64(&self) -> bool {
        self.hccparams1.read() & 0x04 != 0
    }

    /// xHCI Extended Capabilities Pointer, in 32-bit words from BAR0.
    pub fn xecp(&self) -> u32 {
        (self.hccparams1.read() >> 16) & 0xFFFF
    }

    /// Byte offset of the Doorbell array from BAR0.
    pub fn doorbell_offset(&self) -> u32 {
        self.dboff.read() & !0x3
    }

    /// Byte offset of the Runtime register space from BAR0.
    pub fn runtime_offset(&self) -> u32 {
        self.rtsoff.read() & !0x1F
    }

    /// Max Scratchpad Buffers from HCSPARAMS2: a 10-bit count split across a high field (bits
    /// 25:21) and a low field (bits 31:27). Zero means the controller needs no scratchpad pages.
    pub fn max_scratchpad_buffers(&self) -> u16 {
        let params = self.hcsparams2.read();
        let hi = (params >> 21) & 0x1F;
        let lo = (params >> 27) & 0x1F;
        ((hi << 5) | lo) as u16
    }
}

/// USB Legacy Support Capability (xHCI Extended Capabilities, ID 1): the BIOS-to-OS handoff
/// protocol gated on two semaphore bits within the capability's first dword.
pub mod legacy_support {
    pub const CAPABILITY_ID: u8 = 1;
    pub const BIOS_OWNED_SEMAPHORE: u32 = 1 << 16;
    pub const OS_OWNED_SEMAPHORE: u32 = 1 << 24;
}

/// Reads the 32-bit Extended Capability header/register at `mmio_base + byte_offset`.
///
/// # Safety
/// `mmio_base` must point at a validly mapped xHCI BAR0 region, and `byte_offset` must fall
/// within it.
pub unsafe fn read_extended_capability(mmio_base: *mut u8, byte_offset: usize) -> u32 {
    (*(mmio_base.add(byte_offset) as *const Volatile<u32>)).read()
}

/// # Safety
/// Same requirements as [`read_extended_capability`].
pub unsafe fn write_extended_capability(mmio_base: *mut u8, byte_offset: usize, value: u32) {
    (*(mmio_base.add(byte_offset) as *mut Volatile<u32>)).write(value);
}

pub mod usbcmd {
    pub const RUN_STOP: u32 = 1 << 0;
    pub const HCRST: u32 = 1 << 1;
    pub const INTE: u32 = 1 << 2;
    pub const HSEE: u32 = 1 << 3;
}

pub mod usbsts {
    pub const HCH: u32 = 1 << 0;
    pub const HSE: u32 = 1 << 2;
    pub const EINT: u32 = 1 << 3;
    pub const PCD: u32 = 1 << 4;
    pub const CNR: u32 = 1 << 11;
    pub const HCE: u32 = 1 << 12;
}

/// xHCI Operational Registers (BAR0 + `cap_length`).
#[repr(C)]
pub struct OperationalRegisters {
    pub usbcmd: Volatile<u32>,
    pub usbsts: Volatile<u32>,
    pub pagesize: Volatile<u32>,
    _reserved1: [u32; 2],
    pub dnctrl: Volatile<u32>,
    pub crcr: Volatile<u64>,
    _reserved2: [u32; 4],
    pub dcbaap: Volatile<u64>,
    pub config: Volatile<u32>,
}

impl OperationalRegisters {
    pub fn start(&mut self) {
        let cmd = self.usbcmd.read();
        self.usbcmd.write(cmd | usbcmd::RUN_STOP);
    }

    pub fn stop(&mut self) {
        let cmd = self.usbcmd.read();
        self.usbcmd.write(cmd & !usbcmd::RUN_STOP);
    }

    pub fn reset(&mut self) {
        let cmd = self.usbcmd.read();
        self.usbcmd.write(cmd | usbcmd::HCRST);
    }

    pub fn enable_interrupts(&mut self) {
        let cmd = self.usbcmd.read();
        self.usbcmd.write(cmd | usbcmd::INTE);
    }

    pub fn is_halted(&self) -> bool {
        self.usbsts.read() & usbsts::HCH != 0
    }

    pub fn is_reset_in_progress(&self) -> bool {
        self.usbcmd.read() & usbcmd::HCRST != 0
    }

    pub fn is_controller_not_ready(&self) -> bool {
        self.usbsts.read() & usbsts::CNR != 0
    }

    pub fn has_host_controller_error(&self) -> bool {
        self.usbsts.read() & usbsts::HCE != 0
    }

    /// Acknowledges the interrupt/event-related USBSTS bits (they're RW1C).
    pub fn ack_event_interrupt(&mut self) {
        self.usbsts.write(usbsts::EINT | usbsts::PCD);
    }

    pub fn set_command_ring(&mut self, address: u64, cycle_state: bool) {
        let mut crcr = address & !0x3F;
        if cycle_state {
            crcr |= 1;
        }
        self.crcr.write(crcr);
    }

    pub fn set_dcbaap(&mut self, address: u64) {
        self.dcbaap.write(address & !0x3F);
    }

    pub fn set_max_device_slots(&mut self, slots: u8) {
        let config = self.config.read();
        self.config.write((config & !0xFF) | slots as u32);
    }
}

pub mod portsc {
    pub const CCS: u32 = 1 << 0;
    pub const PED: u32 = 1 << 1;
    pub const PR: u32 = 1 << 4;
    pub const PP: u32 = 1 << 9;
    pub const CSC: u32 = 1 << 17;
    pub const PEC: u32 = 1 << 18;
    pub const WRC: u32 = 1 << 19;
    pub const OCC: u32 = 1 << 20;
    pub const PRC: u32 = 1 << 21;
    pub const PLC: u32 = 1 << 22;
    pub const CEC: u32 = 1 << 23;
    pub const CHANGE_BITS: u32 = CSC | PEC | WRC | OCC | PRC | PLC | CEC;
}

/// xHCI Port Register Set (BAR0 + `cap_length` + 0x400 + port_index * 16).
#[repr(C)]
pub struct PortRegisterSet {
    pub portsc: Volatile<u32>,
    pub portpmsc: Volatile<u32>,
    pub portli: Volatile<u32>,
    pub porthlpmc: Volatile<u32>,
}

impl PortRegisterSet {
    pub fn is_connected(&self) -> bool {
        self.portsc.read() & portsc::CCS != 0
    }

    pub fn is_enabled(&self) -> bool {
        self.portsc.read() & portsc::PED != 0
    }

    /// Raw PORTSC speed field (bits 13:10); callers map this via [`crate::enumeration::Speed`].
    pub fn speed_field(&self) -> u8 {
        ((self.portsc.read() >> 10) & 0x0F) as u8
    }

    pub fn has_changes(&self) -> bool {
        self.portsc.read() & portsc::CHANGE_BITS != 0
    }

    /// Writes 1 to every RW1C change bit currently set, leaving PED/PP untouched (both must be
    /// preserved by writing their current value back, not by writing 0).
    pub fn clear_changes(&mut self) {
        let portsc = self.portsc.read();
        let preserved = portsc & (portsc::PED | portsc::PP);
        self.portsc.write(preserved | (portsc & portsc::CHANGE_BITS));
    }

    /// Requests a port reset, preserving PED/PP and not spuriously clearing change bits that
    /// haven't been read yet.
    pub fn start_reset(&mut self) {
        let portsc = self.portsc.read();
        let preserved = portsc & (portsc::PED | portsc::PP);
        self.portsc.write(preserved | portsc::PR);
    }

    pub fn reset_complete(&self) -> bool {
        self.portsc.read() & portsc::PRC != 0
    }
}

pub mod iman {
    pub const IP: u32 = 1 << 0;
    pub const IE: u32 = 1 << 1;
}

/// One Interrupter Register Set within the Runtime region.
#[repr(C)]
pub struct InterrupterRegisterSet {
    pub iman: Volatile<u32>,
    pub imod: Volatile<u32>,
    pub erstsz: Volatile<u32>,
    _reserved: u32,
    pub erstba: Volatile<u64>,
    pub erdp: Volatile<u64>,
}

impl InterrupterRegisterSet {
    pub fn enable_interrupts(&mut self) {
        let iman = self.iman.read();
        self.iman.write(iman | iman::IE);
    }

    pub fn is_interrupt_pending(&self) -> bool {
        self.iman.read() & iman::IP != 0
    }

    pub fn clear_interrupt_pending(&mut self) {
        let iman = self.iman.read();
        self.iman.write(iman | iman::IP);
    }

    pub fn set_event_ring_segment_table(&mut self, base_address: u64, segment_count: u16) {
        self.erstsz.write(segment_count as u32);
        self.erstba.write(base_address & !0x3F);
    }

    /// Advances ERDP to `address` and clears the Event Handler Busy bit so hardware resumes
    /// delivering events into the segment.
    pub fn advance_dequeue_pointer(&mut self, address: u64) {
        self.erdp.write((address & !0xF) | 0x8);
    }
}

/// Runtime Registers region header; individual interrupters are reached via
/// [`runtime_interrupter`] rather than embedded as a fixed-size array, since only interrupter 0
/// is used.
#[repr(C)]
pub struct RuntimeRegisters {
    pub mfindex: Volatile<u32>,
    _reserved: [u32; 7],
}

pub const INTERRUPTER_REGISTER_SET_SIZE: usize = core::mem::size_of::<InterrupterRegisterSet>();

/// Returns a reference to interrupter `index`'s register set, given the mapped Runtime region
/// base. Interrupter register sets start 32 bytes after the region header.
///
/// # Safety
/// `runtime_base` must point at a validly mapped Runtime register region for the lifetime of the
/// returned reference, and `index` must be less than the controller's reported interrupter count.
pub unsafe fn runtime_interrupter<'a>(
    runtime_base: *mut u8,
    index: u16,
) -> &'a mut InterrupterRegisterSet {
    let addr = runtime_base.add(0x20 + index as usize * INTERRUPTER_REGISTER_SET_SIZE);
    &mut *(addr as *mut InterrupterRegisterSet)
}

/// Returns a reference to port `index`'s register set (0-based), given the mapped Operational
/// region base.
///
/// # Safety
/// `operational_base` must point at a validly mapped Operational register region, and `index`
/// must be less than the controller's reported port count.
pub unsafe fn port_register_set<'a>(operational_base: *mut u8, index: u8) -> &'a mut PortRegisterSet {
    let addr = operational_base.add(0x400 + index as usize * 16);
    &mut *(addr as *mut PortRegisterSet)
}

/// One doorbell register in the Doorbell array (BAR0 + `dboff` + slot_id * 4).
#[repr(transparent)]
pub struct DoorbellRegister(Volatile<u32>);

impl DoorbellRegister {
    pub fn ring(&mut self, target: u8, stream_id: u16) {
        self.0.write(target as u32 | ((stream_id as u32) << 16));
    }

    pub fn ring_command(&mut self) {
        self.0.write(0);
    }
}

/// Returns a reference to the doorbell register for `slot_id` (0 is the command ring doorbell),
/// given the mapped Doorbell array base.
///
/// # Safety
/// `doorbell_base` must point at a validly mapped Doorbell array region, and `slot_id` must be
/// less than or equal to the controller's reported max device slots.
pub unsafe fn doorbell<'a>(doorbell_base: *mut u8, slot_id: u8) -> &'a mut DoorbellRegister {
    let addr = doorbell_base.add(slot_id as usize * 4);
    &mut *(addr as *mut DoorbellRegister)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_register_layout_matches_xhci_spec_offsets() {
        assert_eq!(core::mem::offset_of!(CapabilityRegisters, hcsparams1), 4);
        assert_eq!(core::mem::offset_of!(CapabilityRegisters, dboff), 20);
        assert_eq!(core::mem::offset_of!(CapabilityRegisters, rtsoff), 24);
    }

    #[test]
    fn operational_register_layout_matches_xhci_spec_offsets() {
        assert_eq!(core::mem::offset_of!(OperationalRegisters, crcr), 24);
        assert_eq!(core::mem::offset_of!(OperationalRegisters, dcbaap), 48);
        assert_eq!(core::mem::offset_of!(OperationalRegisters, config), 56);
    }
}
