//! xHCI controller driver: TRBs, rings, MMIO register layouts, device/input contexts, port
//! enumeration, and HID report decoding (§4.12, "xHCI").
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod context;
pub mod controller;
pub mod descriptor;
pub mod enumeration;
pub mod error;
pub mod hid;
pub mod regs;
pub mod ring;
pub mod trb;

pub use controller::Controller;
pub use enumeration::{EnumerationGuard, Speed};
pub use error::XhciError;
pub use hid::{MouseCursor, PointerEvent, PointerKind, TabletLogicalRange};
pub use ring::{EventRing, Ring};
pub use trb::{CompletionCode, Trb, TrbType};
