//! PCI configuration-space scan over ports 0xCF8/0xCFC (§4.12 step 1, §6 "Wire/register
//! surfaces"). Trimmed to what the xHCI bring-up needs: full bus/device/function enumeration,
//! BAR0 decode (including the 64-bit BAR case), and the command-register bits xHCI requires.

use x86_64::instructions::port::Port;

const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
const PCI_CONFIG_DATA: u16 = 0xCFC;

const PCI_VENDOR_ID: u8 = 0x00;
const PCI_COMMAND: u8 = 0x04;
const PCI_CLASS_CODE: u8 = 0x0B;
const PCI_SUBCLASS: u8 = 0x0A;
const PCI_PROG_IF: u8 = 0x09;
const PCI_HEADER_TYPE: u8 = 0x0E;
const PCI_BAR0: u8 = 0x10;
const PCI_SECONDARY_BUS: u8 = 0x19;

const CLASS_SERIAL_BUS: u8 = 0x0C;
const SUBCLASS_USB: u8 = 0x03;
const PROG_IF_XHCI: u8 = 0x30;

const COMMAND_IO_SPACE: u16 = 0x01;
const COMMAND_MEMORY_SPACE: u16 = 0x02;
const COMMAND_BUS_MASTER: u16 = 0x04;

#[derive(Debug, Clone, Copy)]
pub struct PciDevice {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

fn config_address(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    ((bus as u32) << 16)
        | ((device as u32) << 11)
        | ((function as u32) << 8)
        | ((offset as u32) & 0xFC)
        | 0x8000_0000
}

fn read_dword(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    unsafe {
        let mut addr_port: Port<u32> = Port::new(PCI_CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(PCI_CONFIG_DATA);
        addr_port.write(config_address(bus, device, function, offset));
        data_port.read()
    }
}

fn write_dword(bus: u8, device: u8, function: u8, offset: u8, value: u32) {
    unsafe {
        let mut addr_port: Port<u32> = Port::new(PCI_CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(PCI_CONFIG_DATA);
        addr_port.write(config_address(bus, device, function, offset));
        data_port.write(value);
    }
}

fn read_word(bus: u8, device: u8, function: u8, offset: u8) -> u16 {
    let data = read_dword(bus, device, function, offset);
    let shift = if offset & 2 != 0 { 16 } else { 0 };
    ((data >> shift) & 0xFFFF) as u16
}

fn read_byte(bus: u8, device: u8, function: u8, offset: u8) -> u8 {
    let data = read_dword(bus, device, function, offset);
    let shift = (offset & 3) * 8;
    ((data >> shift) & 0xFF) as u8
}

fn write_word(bus: u8, device: u8, function: u8, offset: u8, value: u16) {
    let mut data = read_dword(bus, device, function, offset);
    let shift = (offset & 2) * 8;
    data &= !(0xFFFFu32 << shift);
    data |= (value as u32) << shift;
    write_dword(bus, device, function, offset, data);
}

fn vendor_id(bus: u8, device: u8, function: u8) -> u16 {
    read_word(bus, device, function, PCI_VENDOR_ID)
}

fn check_function(bus: u8, device: u8, function: u8, found: &mut Option<PciDevice>) {
    if vendor_id(bus, device, function) == 0xFFFF {
        return;
    }

    let class_code = read_byte(bus, device, function, PCI_CLASS_CODE);
    let subclass = read_byte(bus, device, function, PCI_SUBCLASS);
    let prog_if = read_byte(bus, device, function, PCI_PROG_IF);

    if found.is_none() && class_code == CLASS_SERIAL_BUS && subclass == SUBCLASS_USB && prog_if == PROG_IF_XHCI {
        *found = Some(PciDevice { bus, device, function });
        return;
    }

    if class_code == 0x06 && subclass == 0x04 {
        let secondary_bus = read_byte(bus, device, function, PCI_SECONDARY_BUS);
        check_bus(secondary_bus, found);
    }
}

fn check_device(bus: u8, device: u8, found: &mut Option<PciDevice>) {
    if vendor_id(bus, device, 0) == 0xFFFF {
        return;
    }
    check_function(bus, device, 0, found);
    if found.is_some() {
        return;
    }

    let header_type = read_byte(bus, device, 0, PCI_HEADER_TYPE);
    if header_type & 0x80 != 0 {
        for function in 1..8 {
            if vendor_id(bus, device, function) != 0xFFFF {
                check_function(bus, device, function, found);
                if found.is_some() {
                    return;
                }
            }
        }
    }
}

fn check_bus(bus: u8, found: &mut Option<PciDevice>) {
    for device in 0..32 {
        check_device(bus, device, found);
        if found.is_some() {
            return;
        }
    }
}

/// Walks every PCI bus/device/function (following bridges) looking for the first xHCI
/// controller (class 0x0C, subclass 0x03, prog-if 0x30).
pub fn find_xhci_controller() -> Option<PciDevice> {
    let mut found = None;
    let header_type = read_byte(0, 0, 0, PCI_HEADER_TYPE);
    if header_type & 0x80 == 0 {
        check_bus(0, &mut found);
    } else {
        for function in 0..8 {
            if vendor_id(0, 0, function) != 0xFFFF {
                check_bus(function, &mut found);
                if found.is_some() {
                    break;
                }
            }
        }
    }
    found
}

impl PciDevice {
    /// Reads BAR0, following into BAR1 if BAR0 is the low half of a 64-bit memory BAR, and
    /// returns the decoded base physical address with the type/flag bits masked off.
    pub fn bar0_address(&self) -> u64 {
        let bar0 = read_dword(self.bus, self.device, self.function, PCI_BAR0);
        if bar0 & 0x1 != 0 {
            // I/O-space BAR; xHCI is always memory-mapped, but mask consistently anyway.
            return (bar0 & 0xFFFF_FFFC) as u64;
        }
        let mem_type = (bar0 >> 1) & 0x3;
        let low = (bar0 & 0xFFFF_FFF0) as u64;
        if mem_type == 0x2 {
            let high = read_dword(self.bus, self.device, self.function, PCI_BAR0 + 4) as u64;
            low | (high << 32)
        } else {
            low
        }
    }

    /// Sets the I/O space, memory space and bus-master bits in the PCI command register, per
    /// §4.12 step 1's bring-up requirement.
    pub fn enable(&self) {
        let mut command = read_word(self.bus, self.device, self.function, PCI_COMMAND);
        command |= COMMAND_IO_SPACE | COMMAND_MEMORY_SPACE | COMMAND_BUS_MASTER;
        write_word(self.bus, self.device, self.function, PCI_COMMAND, command);
    }
}
