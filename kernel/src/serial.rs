//! Serial (UART 16550, COM1) backed logging: `kprintln!`/`kprint!` plus a `log::Log`
//! implementation that prints `[OK]`/`[WARN]`/`[FAIL]`-style banners for bring-up messages.

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(0x3F8) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("printing to serial failed");
    });
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(concat!($fmt, "\n"), $($arg)*));
}

struct SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let banner = match record.level() {
            log::Level::Error => "[FAIL]",
            log::Level::Warn => "[WARN]",
            log::Level::Info => "[OK]",
            log::Level::Debug | log::Level::Trace => "[..]",
        };
        kprintln!("{} {}", banner, record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Initialises the serial port and installs the `log` facade over it. Safe to call once,
/// before any other subsystem logs.
pub fn init() {
    lazy_static::initialize(&SERIAL1);
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Trace))
        .expect("serial logger installed twice");
}
