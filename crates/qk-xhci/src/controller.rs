//! The xHCI host controller: register mapping, reset/init sequence, command submission, event
//! dispatch, and port enumeration (§4.12).
//!
//! All hardware access is synchronous and polled — there is no interrupt-driven completion path.
//! This matches the kernel's cooperative, single-threaded execution model: [`Controller::poll`]
//! is called from the main loop and drains whatever the controller has produced since the last
//! call.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::context::{DeviceContext, DeviceContextBaseAddressArray, InputContext};
use crate::descriptor;
use crate::enumeration::{EnumerationGuard, Speed};
use crate::error::XhciError;
use crate::hid::{decode_tablet_report, MouseCursor, PointerEvent, PointerKind, TabletLogicalRange};
use crate::regs::{self, CapabilityRegisters, OperationalRegisters};
use crate::ring::{EventRing, Ring};
use crate::trb::{Trb, TrbType};

const COMMAND_RING_CAPACITY: usize = 64;
const EVENT_RING_CAPACITY: usize = 256;
const TRANSFER_RING_CAPACITY: usize = 16;
const SPIN_ITERATIONS_PER_TIMEOUT_TICK: u32 = 1000;
const TIMEOUT_TICKS: u32 = 1000;
const SCRATCHPAD_BUFFER_SIZE: usize = 4096;

const EP0_DCI: u8 = 1;

/// Setup Stage TRT field values (§4.12, "Control transfers on EP0").
const SETUP_TRT_NO_DATA_STAGE: u8 = 0;
const SETUP_TRT_IN_DATA_STAGE: u8 = 3;

const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
const REQUEST_SET_CONFIGURATION: u8 = 0x09;
const REQUEST_SET_PROTOCOL: u8 = 0x0B;
const REQUEST_TYPE_IN_STANDARD_DEVICE: u8 = 0x80;
const REQUEST_TYPE_OUT_STANDARD_DEVICE: u8 = 0x00;
const REQUEST_TYPE_IN_STANDARD_INTERFACE: u8 = 0x81;
const REQUEST_TYPE_OUT_CLASS_INTERFACE: u8 = 0x21;

const HID_PROTOCOL_BOOT: u16 = 0;
const HID_PROTOCOL_REPORT: u16 = 1;

/// Builds an 8-byte USB control setup packet: bmRequestType, bRequest, wValue, wIndex, wLength.
fn build_setup_packet(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let mut packet = [0u8; 8];
    packet[0] = request_type;
    packet[1] = request;
    packet[2..4].copy_from_slice(&value.to_le_bytes());
    packet[4..6].copy_from_slice(&index.to_le_bytes());
    packet[6..8].copy_from_slice(&length.to_le_bytes());
    packet
}

/// Bookkeeping kept per enumerated device, matching the controller's device-entry model (§3).
struct DeviceEntry {
    port: u8,
    speed: Speed,
    transfer_ring: Ring,
    hid: Option<HidState>,
}

struct HidState {
    kind: PointerKind,
    endpoint_dci: u8,
    max_packet: u16,
    dma_buffer: Vec<u8>,
    logical_range: Option<TabletLogicalRange>,
    cursor: MouseCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerState {
    Uninitialized,
    Running,
    Error,
}

/// Scratchpad pages and their pointer array, kept alive for the controller's lifetime: hardware
/// DMAs into these pages whenever it needs scratch space, and DCBAA[0] holds the pointer array's
/// address for as long as the controller runs.
struct ScratchpadBuffers {
    _buffers: Vec<Vec<u8>>,
    _pointer_array: Vec<u64>,
}

/// Spins `budget` ticks of `SPIN_ITERATIONS_PER_TIMEOUT_TICK` iterations each, calling
/// `condition` between ticks; returns `false` if the budget runs out before `condition` holds.
fn spin_until(mut budget: u32, mut condition: impl FnMut() -> bool) -> bool {
    while !condition() {
        if budget == 0 {
            return false;
        }
        for _ in 0..SPIN_ITERATIONS_PER_TIMEOUT_TICK {
            core::hint::spin_loop();
        }
        budget -= 1;
    }
    true
}

pub struct Controller {
    cap_regs: &'static CapabilityRegisters,
    op_regs: &'static mut OperationalRegisters,
    operational_base: *mut u8,
    runtime_base: *mut u8,
    doorbell_base: *mut u8,
    max_ports: u8,
    max_slots: u8,

    command_ring: Ring,
    event_ring: EventRing,
    dcbaa: DeviceContextBaseAddressArray,
    scratchpad: Option<ScratchpadBuffers>,
    device_contexts: BTreeMap<u8, alloc::boxed::Box<DeviceContext>>,
    devices: BTreeMap<u8, DeviceEntry>,
    enumeration: EnumerationGuard,
    /// Events dequeued while [`Controller::submit_command_and_wait`] was polling for a specific
    /// command completion; drained by the next [`Controller::poll`] call instead of being lost.
    pending_events: Vec<Trb>,

    state: ControllerState,
    screen_width: u32,
    screen_height: u32,
}

impl Controller {
    /// Maps the three register regions from `mmio_base` (BAR0, identity-mapped) and runs the
    /// reset + bring-up sequence described in §4.12 steps 1-6: reset and wait for CNR to clear,
    /// allocate DCBAA/command ring/event ring/ERST, program CRCR/DCBAAP/ERSTSZ/ERSTBA/ERDP,
    /// enable the primary interrupter and controller interrupts, set RUN_STOP, then power and
    /// clear change bits on every root hub port.
    ///
    /// # Safety
    /// `mmio_base` must point at a validly mapped xHCI BAR0 region for the controller's entire
    /// lifetime, and bus mastering / memory space must already be enabled in the PCI command
    /// register.
    pub unsafe fn init(
        mmio_base: *mut u8,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<Self, XhciError> {
        let cap_regs: &'static CapabilityRegisters = &*(mmio_base as *const CapabilityRegisters);
        let cap_length = cap_regs.cap_length() as usize;
        let operational_base = mmio_base.add(cap_length);
        let op_regs: &'static mut OperationalRegisters =
            &mut *(operational_base as *mut OperationalRegisters);
        let runtime_base = mmio_base.add(cap_regs.runtime_offset() as usize);
        let doorbell_base = mmio_base.add(cap_regs.doorbell_offset() as usize);

        let max_ports = cap_regs.max_ports();
        let max_slots = cap_regs.max_device_slots();

        Self::claim_legacy_support(mmio_base, cap_regs)?;

        op_regs.stop();
        if !spin_until(TIMEOUT_TICKS, || op_regs.is_halted()) {
            return Err(XhciError::Timeout);
        }

        op_regs.reset();
        if !spin_until(TIMEOUT_TICKS, || !op_regs.is_controller_not_ready()) {
            return Err(XhciError::Timeout);
        }

        let command_ring = Ring::new(COMMAND_RING_CAPACITY);
        let event_ring = EventRing::new(EVENT_RING_CAPACITY);
        let mut dcbaa = DeviceContextBaseAddressArray::new(max_slots);

        let scratchpad_count = cap_regs.max_scratchpad_buffers();
        let scratchpad = if scratchpad_count > 0 {
            let buffers: Vec<Vec<u8>> = (0..scratchpad_count as usize)
                .map(|_| alloc::vec![0u8; SCRATCHPAD_BUFFER_SIZE])
                .collect();
            let pointer_array: Vec<u64> = buffers.iter().map(|page| page.as_ptr() as u64).collect();
            dcbaa.set(0, pointer_array.as_ptr() as u64);
            Some(ScratchpadBuffers {
                _buffers: buffers,
                _pointer_array: pointer_array,
            })
        } else {
            None
        };

        op_regs.set_max_device_slots(max_slots);
        op_regs.set_dcbaap(dcbaa.base_address());
        op_regs.set_command_ring(command_ring.base_address(), command_ring.cycle_state());

        let interrupter = regs::runtime_interrupter(runtime_base, 0);
        // Single-segment ERST: one entry describing the whole event ring.
        interrupter.set_event_ring_segment_table(event_ring.base_address(), 1);
        interrupter.advance_dequeue_pointer(event_ring.dequeue_pointer());
        interrupter.enable_interrupts();

        op_regs.enable_interrupts();
        op_regs.start();
        if !spin_until(TIMEOUT_TICKS, || !op_regs.is_halted()) {
            return Err(XhciError::Timeout);
        }

        for i in 0..max_ports {
            let port = regs::port_register_set(operational_base, i);
            port.clear_changes();
        }

        Ok(Self {
            cap_regs,
            op_regs,
            operational_base,
            runtime_base,
            doorbell_base,
            max_ports,
            max_slots,
            command_ring,
            event_ring,
            dcbaa,
            scratchpad,
            device_contexts: BTreeMap::new(),
            devices: BTreeMap::new(),
            enumeration: EnumerationGuard::new(max_ports),
            pending_events: Vec::new(),
            state: ControllerState::Running,
            screen_width,
            screen_height,
        })
    }

    /// Walks the xHCI Extended Capabilities list for the USB Legacy Support Capability and, if
    /// present, sets the OS-owned semaphore and spins until the BIOS-owned one clears (§4.12 step
    /// 3). Absent the capability, BIOS ownership is assumed never held and this is a no-op.
    ///
    /// # Safety
    /// `mmio_base` must point at a validly mapped xHCI BAR0 region.
    unsafe fn claim_legacy_support(
        mmio_base: *mut u8,
        cap_regs: &CapabilityRegisters,
    ) -> Result<(), XhciError> {
        let mut offset = (cap_regs.xecp() as usize) * 4;
        while offset != 0 {
            let header = regs::read_extended_capability(mmio_base, offset);
            let capability_id = (header & 0xFF) as u8;
            let next = ((header >> 8) & 0xFF) as usize;

            if capability_id == regs::legacy_support::CAPABILITY_ID {
                regs::write_extended_capability(
                    mmio_base,
                    offset,
                    header | regs::legacy_support::OS_OWNED_SEMAPHORE,
                );
                let handed_off = spin_until(TIMEOUT_TICKS, || {
                    regs::read_extended_capability(mmio_base, offset)
                        & regs::legacy_support::BIOS_OWNED_SEMAPHORE
                        == 0
                });
                return if handed_off { Ok(()) } else { Err(XhciError::Timeout) };
            }

            if next == 0 {
                break;
            }
            offset += next * 4;
        }
        Ok(())
    }

    unsafe fn port(&mut self, index: u8) -> &'static mut regs::PortRegisterSet {
        regs::port_register_set(self.operational_base, index)
    }

    unsafe fn doorbell(&mut self, slot_id: u8) -> &'static mut regs::DoorbellRegister {
        regs::doorbell(self.doorbell_base, slot_id)
    }

    /// Polls the event ring until an event matching `predicate` arrives or the timeout elapses.
    /// Events that don't match are queued in `pending_events` for the next [`Controller::poll`]
    /// call rather than dropped.
    fn wait_for_event(&mut self, predicate: impl Fn(&Trb) -> bool) -> Result<Trb, XhciError> {
        let mut budget = TIMEOUT_TICKS;
        loop {
            if let Some(event) = self.event_ring.dequeue() {
                self.advance_event_dequeue_pointer();
                if predicate(&event) {
                    return Ok(event);
                }
                self.pending_events.push(event);
                continue;
            }
            if budget == 0 {
                return Err(XhciError::Timeout);
            }
            for _ in 0..SPIN_ITERATIONS_PER_TIMEOUT_TICK {
                core::hint::spin_loop();
            }
            budget -= 1;
        }
    }

    /// Submits a command TRB and rings the command doorbell (slot id 0), then waits for the
    /// matching Command Completion Event.
    fn submit_command_and_wait(&mut self, command: Trb) -> Result<Trb, XhciError> {
        let ptr = self.command_ring.enqueue(command);
        unsafe {
            self.doorbell(0).ring_command();
        }
        let event = self.wait_for_event(|event| {
            event.trb_type() == TrbType::CommandCompletionEvent as u8 && event.command_trb_pointer() == ptr
        })?;
        if event.completion_code().is_success() {
            Ok(event)
        } else {
            Err(XhciError::CommandFailed(event.completion_code()))
        }
    }

    fn advance_event_dequeue_pointer(&mut self) {
        let ptr = self.event_ring.dequeue_pointer();
        unsafe {
            let interrupter = regs::runtime_interrupter(self.runtime_base, 0);
            interrupter.advance_dequeue_pointer(ptr);
        }
    }

    /// Waits for the Transfer Event produced by the TRB enqueued at `trb_pointer` (the Status
    /// Stage TRB of a control transfer, which carries the sole IOC in the sequence).
    fn wait_for_transfer_completion(&mut self, trb_pointer: u64) -> Result<(), XhciError> {
        let event = self.wait_for_event(|event| {
            event.trb_type() == TrbType::TransferEvent as u8 && event.command_trb_pointer() == trb_pointer
        })?;
        if event.completion_code().is_success() {
            Ok(())
        } else {
            Err(XhciError::TransferFailed(event.completion_code()))
        }
    }

    /// Runs an IN control transfer on EP0: Setup Stage (immediate 8-byte setup packet), Data
    /// Stage reading into `buffer`, and Status Stage (OUT, IOC) (§4.12, "Control transfers on
    /// EP0").
    fn control_transfer_in(
        &mut self,
        slot_id: u8,
        setup_packet: [u8; 8],
        buffer: &mut [u8],
    ) -> Result<(), XhciError> {
        let status_ptr = {
            let device = self.devices.get_mut(&slot_id).ok_or(XhciError::InvalidParam)?;
            let ring = &mut device.transfer_ring;
            let cycle = ring.cycle_state();
            ring.enqueue(Trb::setup_stage(setup_packet, SETUP_TRT_IN_DATA_STAGE, cycle));
            let cycle = ring.cycle_state();
            ring.enqueue(Trb::data_stage(buffer.as_mut_ptr() as u64, buffer.len() as u32, true, cycle));
            let cycle = ring.cycle_state();
            ring.enqueue(Trb::status_stage(false, true, cycle))
        };
        unsafe {
            self.doorbell(slot_id).ring(EP0_DCI, 0);
        }
        self.wait_for_transfer_completion(status_ptr)
    }

    /// Runs a no-data-stage OUT control transfer on EP0 (SET_CONFIGURATION, SET_PROTOCOL): Setup
    /// Stage followed directly by an IN Status Stage.
    fn control_transfer_out_no_data(&mut self, slot_id: u8, setup_packet: [u8; 8]) -> Result<(), XhciError> {
        let status_ptr = {
            let device = self.devices.get_mut(&slot_id).ok_or(XhciError::InvalidParam)?;
            let ring = &mut device.transfer_ring;
            let cycle = ring.cycle_state();
            ring.enqueue(Trb::setup_stage(setup_packet, SETUP_TRT_NO_DATA_STAGE, cycle));
            let cycle = ring.cycle_state();
            ring.enqueue(Trb::status_stage(true, true, cycle))
        };
        unsafe {
            self.doorbell(slot_id).ring(EP0_DCI, 0);
        }
        self.wait_for_transfer_completion(status_ptr)
    }

    /// Enumerates the device on `port_index` (0-based root hub port): resets the port, reads its
    /// speed, enables a slot, installs EP0's transfer ring via Address Device, then attempts HID
    /// enumeration (fetch descriptors, pick boot mouse vs. tablet, configure the interrupt IN
    /// endpoint, arm the first transfer). Failures abandon the device without touching controller
    /// state (§7: "enumeration abandons the device but keeps the controller running").
    pub fn enumerate_port(&mut self, port_index: u8) -> Result<(), XhciError> {
        if !self.enumeration.try_start(port_index) {
            return Err(XhciError::EnumerationInProgress);
        }
        let result = self.enumerate_port_inner(port_index);
        if let Err(err) = result {
            log::warn!("qk-xhci: enumeration abandoned for port {port_index}: {err:?}");
        }
        self.enumeration.finish(port_index);
        result
    }

    fn enumerate_port_inner(&mut self, port_index: u8) -> Result<(), XhciError> {
        unsafe {
            let port = self.port(port_index);
            port.start_reset();
        }
        if !spin_until(TIMEOUT_TICKS, || unsafe { self.port(port_index).reset_complete() }) {
            return Err(XhciError::Timeout);
        }

        let speed = unsafe {
            let port = self.port(port_index);
            port.clear_changes();
            Speed::from_portsc_field(port.speed_field())
        }
        .ok_or(XhciError::PortNotReady)?;

        let enable_slot_event =
            self.submit_command_and_wait(Trb::enable_slot_command(self.command_ring.cycle_state()))?;
        let slot_id = enable_slot_event.slot_id();
        if slot_id == 0 {
            return Err(XhciError::NoSlotsAvailable);
        }

        let device_context = alloc::boxed::Box::new(DeviceContext::new());
        let device_context_ptr = &*device_context as *const DeviceContext as u64;
        self.device_contexts.insert(slot_id, device_context);
        self.dcbaa.set(slot_id, device_context_ptr);

        let mut input_context = alloc::boxed::Box::new(InputContext::new());
        let control_ring = Ring::new(TRANSFER_RING_CAPACITY);
        let max_packet = speed.default_control_max_packet_size();

        input_context.input_control_context.set_add_context(0); // slot context
        input_context.input_control_context.set_add_context(1); // EP0
        input_context.device_context.slot_context.set_speed(speed);
        input_context.device_context.slot_context.set_root_hub_port(port_index + 1);
        input_context.device_context.slot_context.set_context_entries(1);
        if let Some(ep0) = input_context.device_context.endpoint_context_mut(1) {
            ep0.configure_control(max_packet, control_ring.base_address());
        }

        let input_context_ptr = &*input_context as *const InputContext as u64;
        self.submit_command_and_wait(Trb::address_device_command(
            input_context_ptr,
            slot_id,
            self.command_ring.cycle_state(),
        ))?;

        self.devices.insert(
            slot_id,
            DeviceEntry {
                port: port_index,
                speed,
                transfer_ring: control_ring,
                hid: None,
            },
        );

        // HID enumeration is best-effort: a non-HID or unsupported device simply has no `hid`
        // entry, and subsequent transfer events for its slot are ignored.
        let _ = self.enumerate_hid(slot_id, max_packet);
        Ok(())
    }

    /// Fetches the Device Descriptor and Configuration Descriptor, finds the HID interface and
    /// its interrupt-IN endpoint, issues SET_CONFIGURATION and SET_PROTOCOL, and (for tablets)
    /// parses the HID Report Descriptor for logical-maximum X/Y, then configures the interrupt
    /// endpoint and arms the first transfer (§4.12, "HID enumeration").
    fn enumerate_hid(&mut self, slot_id: u8, _control_max_packet: u16) -> Result<(), XhciError> {
        if !self.devices.contains_key(&slot_id) {
            return Err(XhciError::InvalidParam);
        }

        let mut device_buf = alloc::vec![0u8; descriptor::DeviceDescriptor::LENGTH];
        self.control_transfer_in(
            slot_id,
            build_setup_packet(
                REQUEST_TYPE_IN_STANDARD_DEVICE,
                REQUEST_GET_DESCRIPTOR,
                (descriptor::descriptor_type::DEVICE as u16) << 8,
                0,
                device_buf.len() as u16,
            ),
            &mut device_buf,
        )?;
        descriptor::DeviceDescriptor::parse(&device_buf).ok_or(XhciError::UnsupportedDevice)?;

        // Short read first to learn wTotalLength, then fetch the whole hierarchy.
        let mut short_config_buf = alloc::vec![0u8; descriptor::ConfigurationDescriptor::LENGTH];
        self.control_transfer_in(
            slot_id,
            build_setup_packet(
                REQUEST_TYPE_IN_STANDARD_DEVICE,
                REQUEST_GET_DESCRIPTOR,
                (descriptor::descriptor_type::CONFIGURATION as u16) << 8,
                0,
                short_config_buf.len() as u16,
            ),
            &mut short_config_buf,
        )?;
        let short_config =
            descriptor::ConfigurationDescriptor::parse(&short_config_buf).ok_or(XhciError::UnsupportedDevice)?;
        let total_length = (short_config.total_length as usize).min(256);

        let mut config_buf = alloc::vec![0u8; total_length];
        self.control_transfer_in(
            slot_id,
            build_setup_packet(
                REQUEST_TYPE_IN_STANDARD_DEVICE,
                REQUEST_GET_DESCRIPTOR,
                (descriptor::descriptor_type::CONFIGURATION as u16) << 8,
                0,
                total_length as u16,
            ),
            &mut config_buf,
        )?;
        let configuration =
            descriptor::ConfigurationDescriptor::parse(&config_buf).ok_or(XhciError::UnsupportedDevice)?;
        let hid_interface = descriptor::find_hid_interrupt_interface(&config_buf, total_length)
            .ok_or(XhciError::UnsupportedDevice)?;

        let kind = if hid_interface.interface_subclass == descriptor::HID_SUBCLASS_BOOT
            && hid_interface.interface_protocol == descriptor::HID_PROTOCOL_MOUSE
        {
            PointerKind::BootMouse
        } else {
            PointerKind::Tablet
        };

        self.control_transfer_out_no_data(
            slot_id,
            build_setup_packet(
                REQUEST_TYPE_OUT_STANDARD_DEVICE,
                REQUEST_SET_CONFIGURATION,
                configuration.configuration_value as u16,
                0,
                0,
            ),
        )?;

        let protocol = if kind == PointerKind::BootMouse {
            HID_PROTOCOL_BOOT
        } else {
            HID_PROTOCOL_REPORT
        };
        self.control_transfer_out_no_data(
            slot_id,
            build_setup_packet(
                REQUEST_TYPE_OUT_CLASS_INTERFACE,
                REQUEST_SET_PROTOCOL,
                protocol,
                hid_interface.interface_number as u16,
                0,
            ),
        )?;

        let logical_range = if kind == PointerKind::Tablet {
            let mut report_buf = alloc::vec![0u8; 256];
            self.control_transfer_in(
                slot_id,
                build_setup_packet(
                    REQUEST_TYPE_IN_STANDARD_INTERFACE,
                    REQUEST_GET_DESCRIPTOR,
                    (descriptor::descriptor_type::HID_REPORT as u16) << 8,
                    hid_interface.interface_number as u16,
                    report_buf.len() as u16,
                ),
                &mut report_buf,
            )?;
            descriptor::parse_tablet_logical_range(&report_buf)
                .map(|(max_x, max_y)| TabletLogicalRange { max_x, max_y })
        } else {
            None
        };

        let endpoint = hid_interface.endpoint;
        let max_packet = endpoint.max_packet_size;
        let interval = endpoint.interval;
        // DCI for an IN endpoint is `2 * endpoint_number + 1`; EP0 (DCI 1) is the special case.
        let endpoint_dci = 2 * (endpoint.endpoint_address & 0x0F) + 1;

        let interrupt_ring = Ring::new(TRANSFER_RING_CAPACITY);
        let mut input_context = alloc::boxed::Box::new(InputContext::new());
        input_context.input_control_context.set_add_context(0);
        input_context.input_control_context.set_add_context(endpoint_dci);
        if let Some(ep) = input_context.device_context.endpoint_context_mut(endpoint_dci) {
            ep.configure_interrupt_in(max_packet, interval, interrupt_ring.base_address());
        }
        let input_context_ptr = &*input_context as *const InputContext as u64;

        self.submit_command_and_wait(Trb::configure_endpoint_command(
            input_context_ptr,
            slot_id,
            self.command_ring.cycle_state(),
        ))?;

        let screen_width = self.screen_width;
        let screen_height = self.screen_height;
        let device = self.devices.get_mut(&slot_id).ok_or(XhciError::InvalidParam)?;
        device.hid = Some(HidState {
            kind,
            endpoint_dci,
            max_packet,
            dma_buffer: alloc::vec![0u8; max_packet as usize],
            logical_range,
            cursor: MouseCursor::new(screen_width, screen_height),
        });
        device.transfer_ring = interrupt_ring;
        self.arm_interrupt_transfer(slot_id)?;
        Ok(())
    }

    fn arm_interrupt_transfer(&mut self, slot_id: u8) -> Result<(), XhciError> {
        let endpoint_dci = {
            let device = self.devices.get_mut(&slot_id).ok_or(XhciError::InvalidParam)?;
            let hid = device.hid.as_ref().ok_or(XhciError::InvalidParam)?;
            let buffer_ptr = hid.dma_buffer.as_ptr() as u64;
            let length = hid.max_packet as u32;
            let endpoint_dci = hid.endpoint_dci;
            let cycle = device.transfer_ring.cycle_state();
            device
                .transfer_ring
                .enqueue(Trb::normal(buffer_ptr, length, true, cycle));
            endpoint_dci
        };
        unsafe {
            self.doorbell(slot_id).ring(endpoint_dci, 0);
        }
        Ok(())
    }

    /// Drains the event ring, acknowledging port status changes, scheduling enumeration for
    /// newly connected ports, and decoding HID transfer completions. Returns the pointer events
    /// produced by any HID transfers processed this call.
    pub fn poll(&mut self) -> Vec<PointerEvent> {
        let mut events = Vec::new();
        let mut to_enumerate = Vec::new();

        let mut pending = core::mem::take(&mut self.pending_events);
        while let Some(trb) = self.event_ring.dequeue() {
            self.advance_event_dequeue_pointer();
            pending.push(trb);
        }

        for trb in pending {
            match trb.trb_type() {
                t if t == TrbType::PortStatusChangeEvent as u8 => {
                    let port_id = trb.port_id();
                    if port_id == 0 {
                        continue;
                    }
                    let port_index = port_id - 1;
                    unsafe {
                        let port = self.port(port_index);
                        let connected = port.is_connected();
                        port.clear_changes();
                        if connected && !self.enumeration.is_in_progress(port_index) {
                            to_enumerate.push(port_index);
                        }
                    }
                }
                t if t == TrbType::TransferEvent as u8 => {
                    if let Some(event) = self.handle_transfer_event(trb) {
                        events.push(event);
                    }
                }
                _ => {}
            }
        }

        for port_index in to_enumerate {
            let _ = self.enumerate_port(port_index);
        }

        events
    }

    fn handle_transfer_event(&mut self, event: Trb) -> Option<PointerEvent> {
        let slot_id = event.slot_id();
        let endpoint_dci = event.endpoint_id();
        if !event.completion_code().is_success() {
            return None;
        }

        let device = self.devices.get_mut(&slot_id)?;
        let hid = device.hid.as_mut()?;
        if hid.endpoint_dci != endpoint_dci {
            return None;
        }

        let result = match hid.kind {
            PointerKind::BootMouse => hid.cursor.decode_boot_mouse_report(&hid.dma_buffer),
            PointerKind::Tablet => hid.logical_range.and_then(|range| {
                decode_tablet_report(&hid.dma_buffer, range, self.screen_width, self.screen_height)
            }),
        };

        let _ = self.arm_interrupt_transfer(slot_id);
        result
    }

    pub fn max_ports(&self) -> u8 {
        self.max_ports
    }

    pub fn max_slots(&self) -> u8 {
        self.max_slots
    }

    pub fn is_running(&self) -> bool {
        self.state == ControllerState::Running
    }
}
