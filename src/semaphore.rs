//! # Counting Semaphore
//!
//! A counter plus a wait queue keyed by waiter priority, so the most
//! important waiter is always the queue's maximum.
//!
//! ## Protocol
//!
//! Taking is split in two because the caller has to let the context
//! switch happen in between:
//!
//! 1. [`begin_take`](RawSemaphore::begin_take) either succeeds at once or
//!    parks the running task and hands out a [`BlockToken`]
//! 2. once the task runs again, [`finish_take`](RawSemaphore::finish_take)
//!    tells whether it was handed a unit or timed out
//!
//! [`give`](RawSemaphore::give) hands its unit straight to the most
//! important waiter instead of bumping the counter. The waiter's
//! membership in the wait queue decides the outcome: a waiter that `give`
//! took out of the queue acquired, one still queued timed out. Both paths
//! run under the critical section, so exactly one of them wins.

use crate::arch::Port;
use crate::list::{ListTag, OrderedList};
use crate::scheduler::{BlockToken, Scheduler, WaitResult};
use crate::task::TaskId;

/// Outcome of a take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeResult {
    Acquired,
    TimedOut,
}

/// First half of a take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeStep {
    /// Resolved without blocking.
    Done(TakeResult),
    /// The caller is parked; yield, then call
    /// [`RawSemaphore::finish_take`].
    Pending(BlockToken),
}

/// Semaphore state without its own locking. Every operation takes the
/// scheduler and runs inside its critical section.
#[derive(Debug)]
pub struct RawSemaphore {
    counter: u32,
    waiters: OrderedList,
}

impl RawSemaphore {
    pub const fn new(initial: u32) -> Self {
        Self {
            counter: initial,
            waiters: OrderedList::new(ListTag::Waiting),
        }
    }

    /// Reset the counter and empty the wait queue.
    pub fn init(&mut self, initial: u32) {
        self.counter = initial;
        self.waiters.init();
    }

    /// Units currently available.
    #[inline]
    pub fn count(&self) -> u32 {
        self.counter
    }

    /// Number of queued waiters.
    #[inline]
    pub fn waiting(&self) -> u32 {
        self.waiters.len()
    }

    /// Take a unit if one is available; otherwise park the running task
    /// for at most `timeout` ticks. A `timeout` of 0 never blocks.
    pub fn begin_take<P: Port>(&mut self, sched: &mut Scheduler<P>, timeout: u32) -> TakeStep {
        sched.enter_critical();
        let step = if self.counter > 0 {
            self.counter -= 1;
            TakeStep::Done(TakeResult::Acquired)
        } else if timeout == 0 {
            TakeStep::Done(TakeResult::TimedOut)
        } else {
            match sched.block_current(&mut self.waiters, timeout) {
                Some(token) => TakeStep::Pending(token),
                None => TakeStep::Done(TakeResult::TimedOut),
            }
        };
        sched.exit_critical();
        step
    }

    /// Resolve a parked take once the task runs again.
    /// A token issued by another semaphore acquires nothing here.
    pub fn finish_take<P: Port>(
        &mut self,
        sched: &mut Scheduler<P>,
        token: BlockToken,
    ) -> TakeResult {
        match sched.finish_block(&mut self.waiters, token) {
            WaitResult::Signaled => TakeResult::Acquired,
            WaitResult::TimedOut => TakeResult::TimedOut,
        }
    }

    /// Release one unit. If a task is waiting, the unit goes straight to
    /// the most important one, and a switch is requested when it outranks
    /// or ties the running task.
    ///
    /// Returns whether a waiter was released. Safe to call from interrupt
    /// handlers.
    pub fn give<P: Port>(&mut self, sched: &mut Scheduler<P>) -> bool {
        sched.enter_critical();
        let released = match self.waiters.max() {
            Some(node) => {
                let task = TaskId::from_node(node);
                sched.unblock(task, &mut self.waiters);
                if sched.preempts_current(task) {
                    sched.request_switch();
                }
                log::trace!("give: released task {}", task.index());
                true
            }
            None => {
                self.counter = self.counter.saturating_add(1);
                false
            }
        };
        sched.exit_critical();
        released
    }
}

impl Default for RawSemaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use core::ffi::c_void;
    use core::ptr;

    use super::*;
    use crate::arch::sim::SimPort;
    use crate::task::{TaskConfig, TaskState};

    extern "C" fn spin(_: *mut c_void) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack() -> &'static mut [u32] {
        Box::leak(vec![0u32; 64].into_boxed_slice())
    }

    fn booted(prios: &[u8]) -> (Scheduler<SimPort>, Vec<TaskId>) {
        let mut s = Scheduler::new(SimPort::new());
        s.init();
        let ids = prios
            .iter()
            .map(|&priority| {
                let cfg = TaskConfig { name: "T", priority, stack: stack() };
                s.create_task(spin, cfg, ptr::null_mut()).unwrap()
            })
            .collect();
        s.start(stack()).unwrap();
        (s, ids)
    }

    fn switch(s: &mut Scheduler<SimPort>) -> Option<TaskId> {
        if s.port().take_pending() {
            s.select_next()
        } else {
            s.current()
        }
    }

    #[test]
    fn test_take_available_unit() {
        let (mut s, _) = booted(&[1]);
        let mut sem = RawSemaphore::new(2);
        assert_eq!(sem.begin_take(&mut s, 10), TakeStep::Done(TakeResult::Acquired));
        assert_eq!(sem.begin_take(&mut s, 10), TakeStep::Done(TakeResult::Acquired));
        assert_eq!(sem.count(), 0);
        assert!(!s.port().is_masked());
    }

    #[test]
    fn test_zero_timeout_never_blocks() {
        let (mut s, ids) = booted(&[1]);
        let mut sem = RawSemaphore::new(0);
        assert_eq!(sem.begin_take(&mut s, 0), TakeStep::Done(TakeResult::TimedOut));
        assert_eq!(s.task(ids[0]).map(|t| t.state()), Some(TaskState::Executing));
        assert_eq!(sem.waiting(), 0);
    }

    #[test]
    fn test_give_without_waiters_counts_up() {
        let (mut s, _) = booted(&[1]);
        let mut sem = RawSemaphore::default();
        assert!(!sem.give(&mut s));
        assert!(!sem.give(&mut s));
        assert_eq!(sem.count(), 2);
    }

    #[test]
    fn test_give_hands_unit_to_waiter() {
        let (mut s, ids) = booted(&[2, 1]);
        let mut sem = RawSemaphore::new(0);

        let TakeStep::Pending(token) = sem.begin_take(&mut s, 20) else {
            panic!("take should block");
        };
        assert_eq!(sem.waiting(), 1);
        assert_eq!(switch(&mut s), Some(ids[1]));

        assert!(sem.give(&mut s));
        assert_eq!(sem.count(), 0);
        assert_eq!(sem.waiting(), 0);
        assert_eq!(switch(&mut s), Some(ids[0]));
        assert_eq!(sem.finish_take(&mut s, token), TakeResult::Acquired);
        assert_eq!(sem.count(), 0);
        assert_eq!(s.delayed_len(), 0);
    }

    #[test]
    fn test_give_to_lower_waiter_does_not_preempt() {
        let (mut s, ids) = booted(&[1, 2]);
        let mut sem = RawSemaphore::new(0);

        // Park the high task so the low one runs and blocks.
        s.delay_current(5);
        assert_eq!(switch(&mut s), Some(ids[0]));
        let TakeStep::Pending(_) = sem.begin_take(&mut s, 50) else {
            panic!("take should block");
        };
        switch(&mut s);
        for _ in 0..5 {
            if s.tick() {
                s.request_switch();
            }
        }
        assert_eq!(switch(&mut s), Some(ids[1]));

        let pends = s.port().pend_count();
        assert!(sem.give(&mut s));
        assert_eq!(s.port().pend_count(), pends);
        assert_eq!(s.current(), Some(ids[1]));
    }

    #[test]
    fn test_highest_priority_waiter_first() {
        let (mut s, ids) = booted(&[1, 2, 3]);
        let mut sem = RawSemaphore::new(0);

        let mut tokens = Vec::new();
        for _ in 0..3 {
            if let TakeStep::Pending(token) = sem.begin_take(&mut s, 100) {
                tokens.push(token);
            }
            switch(&mut s);
        }
        assert_eq!(sem.waiting(), 3);

        assert!(sem.give(&mut s));
        assert_eq!(switch(&mut s), Some(ids[2]));
        assert!(sem.give(&mut s));
        assert_eq!(s.task(ids[1]).map(|t| t.state()), Some(TaskState::Ready));
        assert_eq!(s.task(ids[0]).map(|t| t.state()), Some(TaskState::Blocked));
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_timeout_leaves_counter_alone() {
        let (mut s, ids) = booted(&[2]);
        let mut sem = RawSemaphore::new(0);

        let TakeStep::Pending(token) = sem.begin_take(&mut s, 3) else {
            panic!("take should block");
        };
        switch(&mut s);
        for _ in 0..3 {
            if s.tick() {
                s.request_switch();
            }
        }
        assert_eq!(switch(&mut s), Some(ids[0]));
        assert_eq!(sem.finish_take(&mut s, token), TakeResult::TimedOut);
        assert_eq!(sem.count(), 0);
        assert_eq!(sem.waiting(), 0);

        // A later give is banked for the next taker.
        assert!(!sem.give(&mut s));
        assert_eq!(sem.begin_take(&mut s, 3), TakeStep::Done(TakeResult::Acquired));
    }

    #[test]
    fn test_token_of_other_semaphore_is_refused() {
        let (mut s, ids) = booted(&[2, 1]);
        let mut sem_a = RawSemaphore::new(0);
        let mut sem_b = RawSemaphore::new(0);

        let TakeStep::Pending(token) = sem_a.begin_take(&mut s, 10) else {
            panic!("take should block");
        };
        assert_eq!(switch(&mut s), Some(ids[1]));
        let TakeStep::Pending(_) = sem_b.begin_take(&mut s, 10) else {
            panic!("take should block");
        };
        switch(&mut s);

        assert_eq!(sem_b.finish_take(&mut s, token), TakeResult::TimedOut);
        assert_eq!(sem_a.waiting(), 1);
        assert_eq!(sem_b.waiting(), 1);
        assert_eq!(s.task(ids[0]).map(|t| t.state()), Some(TaskState::Blocked));
        assert!(s.lists_consistent());

        // The wait on the issuing semaphore still resolves normally.
        assert!(sem_a.give(&mut s));
        assert_eq!(switch(&mut s), Some(ids[0]));
        assert_eq!(sem_a.finish_take(&mut s, token), TakeResult::Acquired);
        assert!(sem_b.give(&mut s));
        assert_eq!(sem_b.waiting(), 0);
        assert!(s.lists_consistent());
    }

    #[test]
    fn test_init_resets() {
        let (mut s, _) = booted(&[2]);
        let mut sem = RawSemaphore::new(4);
        sem.give(&mut s);
        sem.init(1);
        assert_eq!(sem.count(), 1);
        assert_eq!(sem.waiting(), 0);
    }
}
