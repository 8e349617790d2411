//! # Synchronization Primitives
//!
//! Interrupt-safe access to the global scheduler and the statically
//! allocatable [`Semaphore`] handle built on it.

use core::cell::UnsafeCell;

use crate::arch::cortex_m4::CortexM4;
use crate::arch::Port;
use crate::kernel::KERNEL;
use crate::scheduler::Scheduler;
use crate::semaphore::{RawSemaphore, TakeResult, TakeStep};

/// Run `f` on the global scheduler inside the kernel critical section.
///
/// BASEPRI is raised before the scheduler is touched, so SysTick, PendSV
/// and kernel-aware interrupts cannot observe it half updated. Nests.
///
/// # Usage
/// ```ignore
/// let now = sync::critical_section(|sched| sched.tick_count());
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler<CortexM4>) -> R,
{
    CortexM4.mask_irq();
    // Safety: kernel exceptions are masked, so no other reference to the
    // scheduler is live.
    let sched = unsafe { &mut *KERNEL.get() };
    sched.enter_critical();
    let result = f(sched);
    sched.exit_critical();
    result
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// Counting semaphore that can live in a `static`.
///
/// ```ignore
/// static DATA_READY: Semaphore = Semaphore::new(0);
///
/// // producer (task or interrupt)
/// DATA_READY.give();
///
/// // consumer
/// match DATA_READY.take(500) {
///     TakeResult::Acquired => process(),
///     TakeResult::TimedOut => report_stall(),
/// }
/// ```
pub struct Semaphore {
    raw: UnsafeCell<RawSemaphore>,
}

// Safety: `raw` is only accessed inside the kernel critical section.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Self {
            raw: UnsafeCell::new(RawSemaphore::new(initial)),
        }
    }

    /// Take a unit, waiting at most `timeout` ticks (`FOREVER_TICK`:
    /// no limit, 0: never wait). Task context only.
    ///
    /// Inside an enclosing critical section the switch cannot happen, so
    /// a take that would block reports `TimedOut` at once.
    pub fn take(&self, timeout: u32) -> TakeResult {
        // Safety (both closures): inside the critical section.
        let step =
            critical_section(|sched| unsafe { (*self.raw.get()).begin_take(sched, timeout) });
        match step {
            TakeStep::Done(result) => result,
            // The switch pended by `begin_take` happened on leaving the
            // critical section; we only get here once released.
            TakeStep::Pending(token) => {
                critical_section(|sched| unsafe { (*self.raw.get()).finish_take(sched, token) })
            }
        }
    }

    /// Release a unit. Callable from tasks and kernel-aware interrupts.
    pub fn give(&self) -> bool {
        critical_section(|sched| unsafe { (*self.raw.get()).give(sched) })
    }

    /// Units currently available.
    pub fn count(&self) -> u32 {
        critical_section(|_| unsafe { (*self.raw.get()).count() })
    }
}
