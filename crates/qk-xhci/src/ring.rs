//! Producer (command/transfer) and consumer (event) rings (§4.12, "Command ring", "Event
//! ring"). Rings are plain circular buffers of [`Trb`]s; the last slot of a producer ring is
//! reserved for a Link TRB so hardware wraps back to the start without software intervention.
//!
//! Memory is assumed identity-mapped, so a TRB's physical address equals its Rust pointer value
//! — the same simplification the kernel's existing USB stack makes.

use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

use crate::trb::Trb;

/// A producer ring: command ring or a transfer ring for one endpoint.
///
/// `capacity` TRBs are allocated; the last is overwritten with a Link TRB back to slot 0 the
/// first time the ring wraps, with its toggle-cycle bit set so hardware flips its own cycle
/// state in step with ours.
pub struct Ring {
    trbs: Vec<Trb>,
    enqueue_index: usize,
    cycle_state: bool,
}

impl Ring {
    /// `capacity` must be at least 2 (one live slot plus the Link TRB).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must leave room for the link TRB");
        let mut trbs = vec![Trb::zeroed(); capacity];
        let base = trbs.as_ptr() as u64;
        trbs[capacity - 1] = Trb::link(base, true);
        Self {
            trbs,
            enqueue_index: 0,
            cycle_state: true,
        }
    }

    pub fn base_address(&self) -> u64 {
        self.trbs.as_ptr() as u64
    }

    pub fn cycle_state(&self) -> bool {
        self.cycle_state
    }

    /// Physical address of the slot the next `enqueue` will write.
    pub fn enqueue_pointer(&self) -> u64 {
        self.base_address() + (self.enqueue_index * size_of::<Trb>()) as u64
    }

    fn link_index(&self) -> usize {
        self.trbs.len() - 1
    }

    /// Writes `trb` (with the ring's current cycle bit applied) at the enqueue position and
    /// advances it, following the Link TRB and flipping cycle state on wrap. Returns the
    /// physical address the TRB was written at, which callers use to correlate completion
    /// events back to the command/transfer that produced them.
    pub fn enqueue(&mut self, mut trb: Trb) -> u64 {
        let ptr = self.enqueue_pointer();
        trb.set_cycle_bit(self.cycle_state);
        self.trbs[self.enqueue_index] = trb;
        self.advance();
        ptr
    }

    fn advance(&mut self) {
        self.enqueue_index += 1;
        if self.enqueue_index == self.link_index() {
            // Refresh the Link TRB's cycle bit to match before hardware reads it, then hop to
            // slot 0 and toggle our own cycle state.
            let base = self.base_address();
            self.trbs[self.link_index()] = Trb::link(base, self.cycle_state);
            self.enqueue_index = 0;
            self.cycle_state = !self.cycle_state;
        }
    }
}

/// A single-segment consumer ring for the primary interrupter's event ring. Multi-segment event
/// ring tables are out of scope; one segment is large enough for the interrupt load this driver
/// generates (port status changes, command completions, transfer events on a handful of
/// endpoints).
pub struct EventRing {
    trbs: Vec<Trb>,
    dequeue_index: usize,
    cycle_state: bool,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1);
        Self {
            trbs: vec![Trb::zeroed(); capacity],
            dequeue_index: 0,
            cycle_state: true,
        }
    }

    pub fn base_address(&self) -> u64 {
        self.trbs.as_ptr() as u64
    }

    pub fn len(&self) -> usize {
        self.trbs.len()
    }

    pub fn dequeue_pointer(&self) -> u64 {
        self.base_address() + (self.dequeue_index * size_of::<Trb>()) as u64
    }

    /// Writes a TRB into the ring at `index` as if hardware had produced it. Test-only; real
    /// hardware writes event TRBs via DMA directly into this ring's backing memory.
    #[cfg(test)]
    pub fn inject_for_test(&mut self, index: usize, trb: Trb) {
        self.trbs[index] = trb;
    }

    /// Returns the next unconsumed event, if the TRB at the dequeue position carries the cycle
    /// bit we currently expect from the producer. Advances the dequeue pointer (wrapping and
    /// flipping cycle state at the end of the segment) on success.
    pub fn dequeue(&mut self) -> Option<Trb> {
        let trb = self.trbs[self.dequeue_index];
        if trb.cycle_bit() != self.cycle_state {
            return None;
        }
        self.dequeue_index += 1;
        if self.dequeue_index == self.trbs.len() {
            self.dequeue_index = 0;
            self.cycle_state = !self.cycle_state;
        }
        Some(trb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trb::TrbType;

    #[test]
    fn ring_wraps_through_link_trb_and_toggles_cycle() {
        let mut ring = Ring::new(4); // 3 live slots + link
        for _ in 0..3 {
            ring.enqueue(Trb::enable_slot_command(false));
        }
        assert_eq!(ring.enqueue_index, 0);
        assert!(!ring.cycle_state()); // flipped once after the first wrap

        // Link TRB's cycle bit matches the cycle state in effect before the flip.
        assert_eq!(ring.trbs[3].trb_type(), TrbType::Link as u8);
    }

    #[test]
    fn enqueue_applies_current_cycle_bit_to_each_trb() {
        let mut ring = Ring::new(8);
        ring.enqueue(Trb::enable_slot_command(false));
        assert!(ring.trbs[0].cycle_bit());
    }

    #[test]
    fn event_ring_only_yields_trbs_matching_expected_cycle() {
        let mut ring = EventRing::new(2);
        let mut pending = Trb::zeroed();
        pending.set_cycle_bit(false); // wrong cycle: producer hasn't written this slot yet
        ring.inject_for_test(0, pending);
        assert!(ring.dequeue().is_none());

        let mut ready = Trb::zeroed();
        ready.set_cycle_bit(true);
        ring.inject_for_test(0, ready);
        assert!(ring.dequeue().is_some());
    }

    #[test]
    fn event_ring_wraps_and_flips_cycle_state() {
        let mut ring = EventRing::new(2);
        let mut t0 = Trb::zeroed();
        t0.set_cycle_bit(true);
        let mut t1 = Trb::zeroed();
        t1.set_cycle_bit(true);
        ring.inject_for_test(0, t0);
        ring.inject_for_test(1, t1);

        assert!(ring.dequeue().is_some());
        assert!(ring.dequeue().is_some());
        assert_eq!(ring.dequeue_index, 0);
        assert!(!ring.cycle_state);
    }
}
