//! Port speed classification and the per-port enumeration re-entrancy guard (§4.12, "Port
//! enumeration", "Re-entrancy guard").

use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Low,
    Full,
    High,
    Super,
    SuperPlus,
}

impl Speed {
    /// PORTSC speed field values (bits 13:10), per the xHCI specification table.
    pub fn from_portsc_field(field: u8) -> Option<Self> {
        match field {
            1 => Some(Speed::Full),
            2 => Some(Speed::Low),
            3 => Some(Speed::High),
            4 => Some(Speed::Super),
            5 => Some(Speed::SuperPlus),
            _ => None,
        }
    }

    /// The xHCI Slot Context speed encoding, which differs from the PORTSC field ordering.
    pub fn xhci_code(&self) -> u8 {
        match self {
            Speed::Full => 1,
            Speed::Low => 2,
            Speed::High => 3,
            Speed::Super => 4,
            Speed::SuperPlus => 5,
        }
    }

    /// EP0 default max packet size follows device speed: 8 for Low, 512 for Super(Plus), 64
    /// otherwise (Full, High).
    pub fn default_control_max_packet_size(&self) -> u16 {
        match self {
            Speed::Low => 8,
            Speed::Super | Speed::SuperPlus => 512,
            Speed::Full | Speed::High => 64,
        }
    }
}

/// Tracks which root-hub ports currently have enumeration in flight, so a repeated Port Status
/// Change event doesn't start a second, overlapping enumeration for the same port.
pub struct EnumerationGuard {
    in_progress: Vec<bool>,
}

impl EnumerationGuard {
    pub fn new(port_count: u8) -> Self {
        Self {
            in_progress: alloc::vec![false; port_count as usize],
        }
    }

    /// Marks `port` as enumerating. Returns `false` (without taking the flag) if enumeration is
    /// already underway for this port.
    pub fn try_start(&mut self, port: u8) -> bool {
        match self.in_progress.get_mut(port as usize) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self, port: u8) {
        if let Some(flag) = self.in_progress.get_mut(port as usize) {
            *flag = false;
        }
    }

    pub fn is_in_progress(&self, port: u8) -> bool {
        self.in_progress.get(port as usize).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_control_max_packet_size_follows_speed() {
        assert_eq!(Speed::Low.default_control_max_packet_size(), 8);
        assert_eq!(Speed::Full.default_control_max_packet_size(), 64);
        assert_eq!(Speed::High.default_control_max_packet_size(), 64);
        assert_eq!(Speed::Super.default_control_max_packet_size(), 512);
        assert_eq!(Speed::SuperPlus.default_control_max_packet_size(), 512);
    }

    #[test]
    fn guard_rejects_a_second_start_until_finished() {
        let mut guard = EnumerationGuard::new(4);
        assert!(guard.try_start(2));
        assert!(!guard.try_start(2));
        guard.finish(2);
        assert!(guard.try_start(2));
    }
}
