//! Legacy 8259 PIC: remap to vectors 32-47, mask/unmask with the cascade-line rule, EOI.

use x86_64::instructions::port::Port;

const MASTER_CMD: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_CMD: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;
const CASCADE_IRQ: u8 = 2;
const EOI: u8 = 0x20;

pub struct Pic {
    master_offset: u8,
    slave_offset: u8,
}

impl Pic {
    pub const fn new(master_offset: u8, slave_offset: u8) -> Self {
        Self {
            master_offset,
            slave_offset,
        }
    }

    /// Remap the PIC and mask every line. Bounded by the caller's own timeout discipline; the
    /// sequence itself is a fixed number of port writes, no polling.
    ///
    /// # Safety
    /// Must run once, early in boot, with interrupts disabled.
    pub unsafe fn remap_and_mask_all(&self) {
        let mut master_cmd = Port::<u8>::new(MASTER_CMD);
        let mut master_data = Port::<u8>::new(MASTER_DATA);
        let mut slave_cmd = Port::<u8>::new(SLAVE_CMD);
        let mut slave_data = Port::<u8>::new(SLAVE_DATA);

        let saved_mask1 = master_data.read();
        let saved_mask2 = slave_data.read();

        const ICW1_INIT: u8 = 0x10;
        const ICW1_ICW4: u8 = 0x01;
        const ICW4_8086: u8 = 0x01;

        master_cmd.write(ICW1_INIT | ICW1_ICW4);
        io_wait();
        slave_cmd.write(ICW1_INIT | ICW1_ICW4);
        io_wait();

        master_data.write(self.master_offset);
        io_wait();
        slave_data.write(self.slave_offset);
        io_wait();

        master_data.write(1 << CASCADE_IRQ); // tell master there is a slave at IRQ2
        io_wait();
        slave_data.write(2); // tell slave its cascade identity
        io_wait();

        master_data.write(ICW4_8086);
        io_wait();
        slave_data.write(ICW4_8086);
        io_wait();

        // Restore previous masks, then mask everything (spec: mask all lines initially).
        let _ = (saved_mask1, saved_mask2);
        master_data.write(0xFF);
        slave_data.write(0xFF);
    }

    /// Enable (unmask) `irq` (0-15). Enabling a slave-sourced IRQ (>= 8) also unmasks the
    /// cascade line (IRQ 2) on the master so the interrupt actually reaches the CPU.
    pub fn enable_irq(&self, irq: u8) {
        unsafe {
            if irq < 8 {
                let mut port = Port::<u8>::new(MASTER_DATA);
                let mask = port.read();
                port.write(mask & !(1 << irq));
            } else {
                let mut slave = Port::<u8>::new(SLAVE_DATA);
                let mask = slave.read();
                slave.write(mask & !(1 << (irq - 8)));

                let mut master = Port::<u8>::new(MASTER_DATA);
                let mmask = master.read();
                master.write(mmask & !(1 << CASCADE_IRQ));
            }
        }
    }

    /// Disable (mask) `irq`. Only masks the specified line.
    pub fn disable_irq(&self, irq: u8) {
        unsafe {
            if irq < 8 {
                let mut port = Port::<u8>::new(MASTER_DATA);
                let mask = port.read();
                port.write(mask | (1 << irq));
            } else {
                let mut port = Port::<u8>::new(SLAVE_DATA);
                let mask = port.read();
                port.write(mask | (1 << (irq - 8)));
            }
        }
    }

    /// Send end-of-interrupt for `vector`. Slave-sourced vectors (>= master_offset + 8) get EOI
    /// sent to the slave first, then always to the master.
    pub fn notify_end_of_interrupt(&self, vector: u8) {
        unsafe {
            if vector >= self.slave_offset {
                Port::<u8>::new(SLAVE_CMD).write(EOI);
            }
            Port::<u8>::new(MASTER_CMD).write(EOI);
        }
    }
}

/// A write to an unused port, used as the conventional ~1us delay between PIC init writes so
/// the (possibly very old) hardware has time to process each step.
fn io_wait() {
    unsafe {
        Port::<u8>::new(0x80).write(0);
    }
}
