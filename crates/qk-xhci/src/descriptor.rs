//! USB descriptor layouts touched during HID enumeration (§4.12, "HID enumeration").
//!
//! Trimmed to exactly what enumeration parses: Device, Configuration, Interface, and Endpoint
//! descriptors, plus a minimal HID Report Descriptor walk for a tablet's logical-maximum values.
//! Each standard descriptor mirrors the wire layout with `#[repr(C, packed)]` and is read with
//! `read_unaligned`, the same pattern this crate uses for TRBs and device contexts.

pub mod descriptor_type {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
    pub const HID_REPORT: u8 = 0x22;
}

pub const CLASS_HID: u8 = 0x03;
pub const HID_SUBCLASS_BOOT: u8 = 0x01;
pub const HID_PROTOCOL_MOUSE: u8 = 0x02;

const ENDPOINT_DIRECTION_IN: u8 = 0x80;
const ENDPOINT_TRANSFER_TYPE_MASK: u8 = 0x03;
const ENDPOINT_TRANSFER_TYPE_INTERRUPT: u8 = 0x03;

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_number_string: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LENGTH: usize = 18;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LENGTH {
            return None;
        }
        let descriptor = unsafe { core::ptr::read_unaligned(data.as_ptr() as *const Self) };
        if descriptor.descriptor_type != descriptor_type::DEVICE {
            return None;
        }
        Some(descriptor)
    }
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_string: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub const LENGTH: usize = 9;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LENGTH {
            return None;
        }
        let descriptor = unsafe { core::ptr::read_unaligned(data.as_ptr() as *const Self) };
        if descriptor.descriptor_type != descriptor_type::CONFIGURATION {
            return None;
        }
        Some(descriptor)
    }
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
struct InterfaceDescriptor {
    length: u8,
    descriptor_type: u8,
    interface_number: u8,
    alternate_setting: u8,
    num_endpoints: u8,
    interface_class: u8,
    interface_subclass: u8,
    interface_protocol: u8,
    interface_string: u8,
}

impl InterfaceDescriptor {
    const LENGTH: usize = 9;
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    const LENGTH: usize = 7;

    fn is_interrupt_in(&self) -> bool {
        self.endpoint_address & ENDPOINT_DIRECTION_IN != 0
            && self.attributes & ENDPOINT_TRANSFER_TYPE_MASK == ENDPOINT_TRANSFER_TYPE_INTERRUPT
    }
}

/// An HID interface paired with the first interrupt-IN endpoint found among its sub-descriptors.
pub struct HidInterface {
    pub interface_number: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub endpoint: EndpointDescriptor,
}

/// Walks the Interface and Endpoint sub-descriptors following a Configuration Descriptor (other
/// descriptor types, e.g. HID class descriptors, are skipped) for the first interface of class
/// 0x03 that has an interrupt-IN endpoint.
pub fn find_hid_interrupt_interface(data: &[u8], total_length: usize) -> Option<HidInterface> {
    let total_length = total_length.min(data.len());
    let mut offset = ConfigurationDescriptor::LENGTH;
    let mut current_hid_interface: Option<(u8, u8, u8)> = None;

    while offset + 2 <= total_length {
        let desc_len = data[offset] as usize;
        let desc_type = data[offset + 1];
        if desc_len == 0 || offset + desc_len > total_length {
            break;
        }
        let desc_data = &data[offset..offset + desc_len];

        if desc_type == descriptor_type::INTERFACE && desc_len >= InterfaceDescriptor::LENGTH {
            let iface =
                unsafe { core::ptr::read_unaligned(desc_data.as_ptr() as *const InterfaceDescriptor) };
            current_hid_interface = if iface.interface_class == CLASS_HID {
                Some((iface.interface_number, iface.interface_subclass, iface.interface_protocol))
            } else {
                None
            };
        } else if desc_type == descriptor_type::ENDPOINT && desc_len >= EndpointDescriptor::LENGTH {
            if let Some((interface_number, interface_subclass, interface_protocol)) = current_hid_interface {
                let endpoint =
                    unsafe { core::ptr::read_unaligned(desc_data.as_ptr() as *const EndpointDescriptor) };
                if endpoint.is_interrupt_in() {
                    return Some(HidInterface {
                        interface_number,
                        interface_subclass,
                        interface_protocol,
                        endpoint,
                    });
                }
            }
        }

        offset += desc_len;
    }
    None
}

/// Extracts the logical-maximum values for Generic Desktop X (usage 0x30) and Y (usage 0x31) from
/// a HID Report Descriptor by walking its short items, tracking the most recently declared Usage
/// (local item, tag 0x08) and Logical Maximum (global item, tag 0x24).
pub fn parse_tablet_logical_range(report: &[u8]) -> Option<(u16, u16)> {
    const TAG_USAGE: u8 = 0x08;
    const TAG_LOGICAL_MAXIMUM: u8 = 0x24;

    let mut offset = 0;
    let mut logical_max: i32 = 0;
    let mut max_x = None;
    let mut max_y = None;

    while offset < report.len() {
        let prefix = report[offset];
        let size = match prefix & 0x03 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        if offset + 1 + size > report.len() {
            break;
        }
        let tag = prefix & 0xFC;
        let data = &report[offset + 1..offset + 1 + size];
        let value = match size {
            1 => data[0] as i32,
            2 => i16::from_le_bytes([data[0], data[1]]) as i32,
            4 => i32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            _ => 0,
        };

        match tag {
            TAG_USAGE => {
                if value == 0x30 {
                    max_x = Some(logical_max);
                } else if value == 0x31 {
                    max_y = Some(logical_max);
                }
            }
            TAG_LOGICAL_MAXIMUM => logical_max = value,
            _ => {}
        }

        offset += 1 + size;
    }

    match (max_x, max_y) {
        (Some(x), Some(y)) => Some((x.max(0) as u16, y.max(0) as u16)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_hid_interrupt_in_endpoint_after_its_interface() {
        let mut config = alloc::vec![0u8; 9 + 9 + 7];
        config[0] = 9;
        config[1] = descriptor_type::CONFIGURATION;
        config[2..4].copy_from_slice(&(config.len() as u16).to_le_bytes());

        let iface_off = 9;
        config[iface_off] = 9;
        config[iface_off + 1] = descriptor_type::INTERFACE;
        config[iface_off + 2] = 0; // interface_number
        config[iface_off + 5] = CLASS_HID;
        config[iface_off + 6] = HID_SUBCLASS_BOOT;
        config[iface_off + 7] = HID_PROTOCOL_MOUSE;

        let ep_off = iface_off + 9;
        config[ep_off] = 7;
        config[ep_off + 1] = descriptor_type::ENDPOINT;
        config[ep_off + 2] = 0x81; // IN endpoint 1
        config[ep_off + 3] = 0x03; // interrupt
        config[ep_off + 4..ep_off + 6].copy_from_slice(&4u16.to_le_bytes());
        config[ep_off + 6] = 10;

        let found = find_hid_interrupt_interface(&config, config.len()).unwrap();
        assert_eq!(found.interface_subclass, HID_SUBCLASS_BOOT);
        assert_eq!(found.interface_protocol, HID_PROTOCOL_MOUSE);
        assert_eq!(found.endpoint.max_packet_size, 4);
        assert_eq!(found.endpoint.interval, 10);
    }

    #[test]
    fn tablet_logical_range_reads_usage_and_logical_maximum_items() {
        // Usage Page (Generic Desktop), Usage(X)=0x30, Logical Max=32767 (0x7FFF, 2-byte),
        // Usage(Y)=0x31, Logical Max already in scope from the previous item.
        let report: [u8; 10] = [
            0x09, 0x30, // Usage (X), 1-byte data
            0x26, 0xFF, 0x7F, // Logical Maximum (32767), 2-byte data
            0x09, 0x31, // Usage (Y)
            0x26, 0xFF, 0x7F, // Logical Maximum (32767) repeated for Y
        ];
        let (max_x, max_y) = parse_tablet_logical_range(&report).unwrap();
        assert_eq!(max_x, 32767);
        assert_eq!(max_y, 32767);
    }

    #[test]
    fn tablet_logical_range_missing_axis_returns_none() {
        let report: [u8; 3] = [0x09, 0x30, 0x00];
        assert!(parse_tablet_logical_range(&report).is_none());
    }
}
