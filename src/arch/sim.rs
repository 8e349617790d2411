//! Host-side port: records mask and switch requests instead of touching
//! hardware, so the scheduler can be driven step by step.

use core::cell::Cell;

use super::Port;

/// Port that records what the scheduler asked of the hardware.
#[derive(Debug, Default)]
pub struct SimPort {
    masked: Cell<bool>,
    mask_count: Cell<u32>,
    pending: Cell<bool>,
    pend_count: Cell<u32>,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            masked: Cell::new(false),
            mask_count: Cell::new(0),
            pending: Cell::new(false),
            pend_count: Cell::new(0),
        }
    }

    /// Whether the kernel mask is currently raised.
    pub fn is_masked(&self) -> bool {
        self.masked.get()
    }

    /// How many times the mask was raised from the unmasked state.
    pub fn mask_count(&self) -> u32 {
        self.mask_count.get()
    }

    /// Whether a context switch is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Total number of switch requests.
    pub fn pend_count(&self) -> u32 {
        self.pend_count.get()
    }

    /// Consume the pending switch, as PendSV would.
    pub fn take_pending(&self) -> bool {
        self.pending.replace(false)
    }
}

impl Port for SimPort {
    fn mask_irq(&self) {
        if !self.masked.replace(true) {
            self.mask_count.set(self.mask_count.get() + 1);
        }
    }

    fn unmask_irq(&self) {
        self.masked.set(false);
    }

    fn pend_switch(&self) {
        self.pending.set(true);
        self.pend_count.set(self.pend_count.get() + 1);
    }
}
