//! Kernel-wide singletons, with a fixed initialisation order, that bridge the plain-`fn`-pointer
//! handler signatures `qk_irq::VectorTable::register`/`Timer::set_callback` require back to the
//! event bus and PS/2 driver state (§9 "a named singleton with a fixed initialisation order, not
//! ad-hoc global mutable state").

use lazy_static::lazy_static;
use qk_event::{Category, Event, EventBus, EventKind, Priority};
use qk_irq::{InterruptFrame, Timer};

lazy_static! {
    pub static ref EVENT_BUS: EventBus = EventBus::new();
}

pub static TIMER: Timer = Timer::new(1000);

/// `Timer`'s own tick callback: posts a `Timer` event for anything downstream (scheduling,
/// animation) that only needs a tick count, not the IRQ itself.
fn on_timer_tick(tick: u64) {
    let event = Event::new(
        EventKind::Timer { tick },
        Category::SYSTEM,
        Priority::Low,
        EVENT_BUS.next_timestamp(),
    );
    let _ = EVENT_BUS.post(event);
}

/// Installs `on_timer_tick` as the timer's callback. Call once, after `EVENT_BUS` and `TIMER`
/// both exist but before interrupts are enabled.
pub fn install_timer_callback() {
    TIMER.set_callback(on_timer_tick);
}

pub fn timer_irq_handler(_frame: &InterruptFrame) {
    TIMER.on_tick();
}

pub fn keyboard_irq_handler(_frame: &InterruptFrame) {
    crate::ps2::handle_irq(&EVENT_BUS);
}

pub fn mouse_irq_handler(_frame: &InterruptFrame) {
    crate::ps2::handle_mouse_irq(&EVENT_BUS);
}
