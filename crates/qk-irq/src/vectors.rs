//! The fixed 256-slot vector table and the saved-frame type handed to registered handlers.
//!
//! Exception vectors (0-31) are wired directly onto `x86_64`'s `InterruptDescriptorTable` with
//! `extern "x86-interrupt"` functions by the `kernel` crate, since that ABI *is* this
//! ecosystem's "short stub that saves the full register file and calls a dispatcher". IRQ
//! vectors (32-47) go through one more hop: each `x86-interrupt` trampoline builds an
//! [`InterruptFrame`] and calls [`VectorTable::dispatch`], which looks up the registered handler
//! by vector before the trampoline sends EOI. This keeps the spec's "dispatch by table, then
//! EOI" contract explicit instead of folding it into 16 separate hand-written functions.

use spin::Mutex;
use x86_64::structures::idt::InterruptStackFrame;

pub const IRQ_BASE: u8 = 32;
pub const IRQ_COUNT: usize = 16;

/// Saved register state handed to a handler: the frame pushed by the CPU (and decoded by the
/// `x86-interrupt` ABI), the vector that fired, and an optional hardware error code.
#[derive(Clone, Copy)]
pub struct InterruptFrame {
    pub instruction_pointer: u64,
    pub code_segment: u64,
    pub cpu_flags: u64,
    pub stack_pointer: u64,
    pub stack_segment: u64,
    pub vector: u8,
    pub error_code: Option<u64>,
}

impl InterruptFrame {
    pub fn from_stack_frame(frame: &InterruptStackFrame, vector: u8, error_code: Option<u64>) -> Self {
        Self {
            instruction_pointer: frame.instruction_pointer.as_u64(),
            code_segment: frame.code_segment.0 as u64,
            cpu_flags: frame.cpu_flags.bits(),
            stack_pointer: frame.stack_pointer.as_u64(),
            stack_segment: frame.stack_segment.0 as u64,
            vector,
            error_code,
        }
    }
}

pub type IrqHandlerFn = fn(&InterruptFrame);

/// Fixed-size, indexed handler table. Only the IRQ range (32-47) is dispatched through it in
/// this kernel, but it is sized 256 to match the spec's vector table shape.
pub struct VectorTable {
    handlers: Mutex<[Option<IrqHandlerFn>; 256]>,
}

impl VectorTable {
    pub const fn new() -> Self {
        Self {
            handlers: Mutex::new([None; 256]),
        }
    }

    pub fn register(&self, vector: u8, handler: IrqHandlerFn) {
        self.handlers.lock()[vector as usize] = Some(handler);
    }

    pub fn unregister(&self, vector: u8) {
        self.handlers.lock()[vector as usize] = None;
    }

    /// Look up and invoke the registered handler for `frame.vector`. Returns whether a handler
    /// was found and run; unhandled IRQs are silently dropped (the PIC still gets EOI'd by the
    /// caller).
    pub fn dispatch(&self, frame: &InterruptFrame) -> bool {
        let handler = self.handlers.lock()[frame.vector as usize];
        match handler {
            Some(f) => {
                f(frame);
                true
            }
            None => false,
        }
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}
