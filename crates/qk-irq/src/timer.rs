//! PIT channel 0 timer: tick counter, sleep/usleep, and TSC calibration.

use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::instructions::port::Port;

const PIT_FREQUENCY: u32 = 1_193_182;
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

pub type TimerCallback = fn(u64);

pub struct Timer {
    tick_count: AtomicU64,
    frequency_hz: u32,
    callback: spin::Mutex<Option<TimerCallback>>,
    tsc_frequency: AtomicU64,
}

impl Timer {
    pub const fn new(frequency_hz: u32) -> Self {
        Self {
            tick_count: AtomicU64::new(0),
            frequency_hz,
            callback: spin::Mutex::new(None),
            tsc_frequency: AtomicU64::new(0),
        }
    }

    /// Program PIT channel 0 in rate-generator mode at `self.frequency_hz`, clamping the
    /// divisor to the valid [1, 65535] range.
    pub fn program_pit(&self) {
        let divisor = (PIT_FREQUENCY / self.frequency_hz).clamp(1, 65535) as u16;
        unsafe {
            let mut cmd = Port::<u8>::new(PIT_COMMAND);
            let mut data = Port::<u8>::new(PIT_CHANNEL0_DATA);
            cmd.write(0x36); // channel 0, lobyte/hibyte, rate generator
            data.write((divisor & 0xFF) as u8);
            data.write((divisor >> 8) as u8);
        }
    }

    pub fn set_callback(&self, callback: TimerCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Called from the IRQ0 handler. Increments the tick counter and invokes the optional
    /// callback; EOI is the caller's responsibility.
    pub fn on_tick(&self) {
        let ticks = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(cb) = *self.callback.lock() {
            cb(ticks);
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    /// Spin on `hlt` until `tick_count >= start + ms * hz / 1000`.
    pub fn sleep_ms(&self, ms: u64) {
        let start = self.tick_count();
        let target = start + ms.saturating_mul(self.frequency_hz as u64) / 1000;
        while self.tick_count() < target {
            x86_64::instructions::hlt();
        }
    }

    /// Spin on `pause` for approximately `us` microseconds, using the calibrated TSC frequency
    /// if available, otherwise a fixed iteration count as a crude fallback.
    pub fn usleep(&self, us: u64) {
        let tsc_hz = self.tsc_frequency.load(Ordering::Relaxed);
        if tsc_hz != 0 {
            let start = read_tsc();
            let target_cycles = tsc_hz.saturating_mul(us) / 1_000_000;
            while read_tsc().wrapping_sub(start) < target_cycles {
                core::hint::spin_loop();
            }
        } else {
            for _ in 0..(us * 100) {
                core::hint::spin_loop();
            }
        }
    }

    /// Estimate the TSC frequency by programming PIT channel 0 as a one-shot at the maximum
    /// count, polling the channel's readback counter until ~10ms have elapsed, and comparing
    /// TSC deltas. The result is approximate (factor-of-100 extrapolation from a 10ms sample);
    /// callers of `nanoseconds()` must tolerate several percent of error.
    pub fn calibrate_tsc(&self) -> u64 {
        const ONE_SHOT_COUNT: u16 = 0xFFFF;
        unsafe {
            let mut cmd = Port::<u8>::new(PIT_COMMAND);
            let mut data = Port::<u8>::new(PIT_CHANNEL0_DATA);
            cmd.write(0x34); // channel 0, lobyte/hibyte, mode 2 (rate gen used as one-shot)
            data.write((ONE_SHOT_COUNT & 0xFF) as u8);
            data.write((ONE_SHOT_COUNT >> 8) as u8);
        }

        let start_tsc = read_tsc();

        // ~10ms at 1.193182MHz is about 11932 counts; poll the readback until that many have
        // elapsed (counter decrements from ONE_SHOT_COUNT).
        let target_elapsed: u16 = 11_932;
        loop {
            let count = unsafe { read_pit_count() };
            let elapsed = ONE_SHOT_COUNT.wrapping_sub(count);
            if elapsed >= target_elapsed {
                break;
            }
        }

        let end_tsc = read_tsc();
        let delta = end_tsc.wrapping_sub(start_tsc);
        let hz = delta.saturating_mul(100); // 10ms sample extrapolated to 1s
        self.tsc_frequency.store(hz, Ordering::Relaxed);
        hz
    }

    /// Approximate elapsed nanoseconds since boot from the TSC, using the calibrated frequency.
    /// Returns 0 if calibration hasn't run yet.
    pub fn nanoseconds(&self) -> u64 {
        let hz = self.tsc_frequency.load(Ordering::Relaxed);
        if hz == 0 {
            return 0;
        }
        let cycles = read_tsc();
        cycles.saturating_mul(1_000_000_000) / hz
    }
}

unsafe fn read_pit_count() -> u16 {
    let mut cmd = Port::<u8>::new(PIT_COMMAND);
    let mut data = Port::<u8>::new(PIT_CHANNEL0_DATA);
    cmd.write(0x00); // latch channel 0
    let lo = data.read() as u16;
    let hi = data.read() as u16;
    (hi << 8) | lo
}

fn read_tsc() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_clamped_to_valid_range() {
        // 1193182 / 1 would overflow u16; verify the clamp keeps it in range by construction.
        let t = Timer::new(1);
        let divisor = (PIT_FREQUENCY / t.frequency_hz()).clamp(1, 65535);
        assert!(divisor >= 1 && divisor <= 65535);
    }

    #[test]
    fn tick_increments_monotonically() {
        let t = Timer::new(100);
        for i in 1..=10 {
            t.on_tick();
            assert_eq!(t.tick_count(), i);
        }
    }
}
