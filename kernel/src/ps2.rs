//! PS/2 keyboard driver: reads raw scancodes off port 0x60 on each keyboard IRQ and posts them
//! onto the event bus as `qk_event::Event`s.
//!
//! Scancode Set 1 is assumed (the BIOS/PS/2 controller default). The 0xE0 extended-key prefix
//! is consumed and dropped rather than folded into the scancode, since `EventKind::Key` carries
//! a single byte; that's a deliberate simplification over the deleted driver this one replaces,
//! which was tied to the now-removed `Driver`/`DriverError` abstractions.

use core::sync::atomic::{AtomicBool, Ordering};

use qk_event::{Category, Event, EventBus, EventKind, KeyAction, Priority};
use x86_64::instructions::port::Port;

const DATA_PORT: u16 = 0x60;
const EXTENDED_PREFIX: u8 = 0xE0;

static EXPECT_EXTENDED: AtomicBool = AtomicBool::new(false);

/// Reads one scancode byte from the controller and, unless it was an extended-key prefix,
/// posts a `Key` event onto `bus`.
pub fn handle_irq(bus: &EventBus) {
    let byte: u8 = unsafe { Port::new(DATA_PORT).read() };

    if byte == EXTENDED_PREFIX {
        EXPECT_EXTENDED.store(true, Ordering::Relaxed);
        return;
    }
    EXPECT_EXTENDED.store(false, Ordering::Relaxed);

    let action = if byte & 0x80 != 0 {
        KeyAction::Released
    } else {
        KeyAction::Pressed
    };
    let scancode = byte & 0x7F;

    let event = Event::new(
        EventKind::Key { scancode, action },
        Category::INPUT,
        Priority::Normal,
        bus.next_timestamp(),
    );
    let _ = bus.post(event);
}

struct MouseState {
    packet: [u8; 3],
    index: usize,
    x: i32,
    y: i32,
}

static MOUSE: spin::Mutex<MouseState> = spin::Mutex::new(MouseState {
    packet: [0; 3],
    index: 0,
    x: 512,
    y: 384,
});

/// Accumulates the standard 3-byte PS/2 mouse packet (byte 0: button/sign/overflow bits, byte
/// 1: signed dx, byte 2: signed dy) and posts a relative `Mouse` event once a full packet has
/// arrived. Position is clamped to a 1024x768 virtual screen, matching the convention the
/// xHCI HID boot-mouse path uses for absolute devices.
pub fn handle_mouse_irq(bus: &EventBus) {
    let byte: u8 = unsafe { Port::new(DATA_PORT).read() };
    let mut state = MOUSE.lock();

    if state.index == 0 && byte & 0x08 == 0 {
        // Not a valid first packet byte (bit 3 must always be set); resync.
        return;
    }
    state.packet[state.index] = byte;
    state.index += 1;
    if state.index < 3 {
        return;
    }
    state.index = 0;

    let flags = state.packet[0];
    let dx_raw = state.packet[1] as i32 - if flags & 0x10 != 0 { 256 } else { 0 };
    let dy_raw = state.packet[2] as i32 - if flags & 0x20 != 0 { 256 } else { 0 };

    state.x = (state.x + dx_raw).clamp(0, 1023);
    state.y = (state.y - dy_raw).clamp(0, 767);
    let buttons = flags & 0x07;

    let event = Event::new(
        EventKind::Mouse {
            x: state.x,
            y: state.y,
            buttons,
            is_absolute: false,
        },
        Category::INPUT,
        Priority::Normal,
        bus.next_timestamp(),
    );
    let _ = bus.post(event);
}
