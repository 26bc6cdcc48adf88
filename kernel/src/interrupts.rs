//! GDT-adjacent CPU exception IDT entries, plus the IRQ-to-vector-table bridge described in
//! §4.4: hardware vectors 32-47 are `x86-interrupt` functions that build an `InterruptFrame` and
//! dispatch through `qk_irq::VectorTable` before sending EOI, rather than calling fixed handlers
//! directly.

use lazy_static::lazy_static;
use qk_irq::{InterruptFrame, Pic, VectorTable, IRQ_BASE};
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::gdt;
use crate::kprintln;

pub static PIC: Pic = Pic::new(IRQ_BASE, IRQ_BASE + 8);
pub static VECTORS: VectorTable = VectorTable::new();

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = 32,
    Keyboard = 33,
    Mouse = 44,
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }

        idt[InterruptIndex::Timer.as_u8()].set_handler_fn(timer_interrupt_handler);
        idt[InterruptIndex::Keyboard.as_u8()].set_handler_fn(keyboard_interrupt_handler);
        idt[InterruptIndex::Mouse.as_u8()].set_handler_fn(mouse_interrupt_handler);

        idt
    };
}

/// Loads the IDT and remaps/masks the legacy PIC. Vector registration in `VECTORS` and
/// `sti` are left to the caller (§6 process lifecycle: interrupt manager brings up the table,
/// the timer and driver manager register their handlers before interrupts are enabled).
pub fn init() {
    IDT.load();
    unsafe {
        PIC.remap_and_mask_all();
    }
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    kprintln!("[WARN] breakpoint exception\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(stack_frame: InterruptStackFrame, error_code: u64) -> ! {
    panic!(
        "double fault, RIP={:#x} error={:#x}",
        stack_frame.instruction_pointer.as_u64(),
        error_code
    );
}

extern "x86-interrupt" fn page_fault_handler(stack_frame: InterruptStackFrame, error_code: PageFaultErrorCode) {
    let fault_address = Cr2::read().unwrap_or(x86_64::VirtAddr::new(0));
    panic!(
        "page fault at {:#x}, RIP={:#x}, code={:?}",
        fault_address.as_u64(),
        stack_frame.instruction_pointer.as_u64(),
        error_code
    );
}

extern "x86-interrupt" fn general_protection_fault_handler(stack_frame: InterruptStackFrame, error_code: u64) {
    panic!(
        "general protection fault, RIP={:#x}, error={:#x}",
        stack_frame.instruction_pointer.as_u64(),
        error_code
    );
}

extern "x86-interrupt" fn timer_interrupt_handler(stack_frame: InterruptStackFrame) {
    let frame = InterruptFrame::from_stack_frame(&stack_frame, InterruptIndex::Timer.as_u8(), None);
    VECTORS.dispatch(&frame);
    PIC.notify_end_of_interrupt(InterruptIndex::Timer.as_u8());
}

extern "x86-interrupt" fn keyboard_interrupt_handler(stack_frame: InterruptStackFrame) {
    let frame = InterruptFrame::from_stack_frame(&stack_frame, InterruptIndex::Keyboard.as_u8(), None);
    VECTORS.dispatch(&frame);
    PIC.notify_end_of_interrupt(InterruptIndex::Keyboard.as_u8());
}

extern "x86-interrupt" fn mouse_interrupt_handler(stack_frame: InterruptStackFrame) {
    let frame = InterruptFrame::from_stack_frame(&stack_frame, InterruptIndex::Mouse.as_u8(), None);
    VECTORS.dispatch(&frame);
    PIC.notify_end_of_interrupt(InterruptIndex::Mouse.as_u8());
}
