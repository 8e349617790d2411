//! # Architecture Abstraction Layer
//!
//! The scheduler core never touches registers. What it needs from the
//! hardware is captured by [`Port`]:
//!
//! - raise / lower the kernel interrupt mask (critical sections)
//! - pend a context switch, taken once the mask is lowered
//!
//! The context save/restore trampolines live next to the port
//! implementation and call back into the scheduler through the kernel.
//! [`sim::SimPort`] stands in for the hardware on the host.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
pub mod sim;

/// Hardware primitives the scheduler core depends on.
pub trait Port {
    /// Mask every interrupt allowed to use kernel services.
    fn mask_irq(&self);

    /// Undo [`mask_irq`](Self::mask_irq).
    fn unmask_irq(&self);

    /// Request a context switch. It is taken as soon as no kernel-level
    /// interrupt is masked or active.
    fn pend_switch(&self);
}
