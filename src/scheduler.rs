//! # Scheduler
//!
//! Core scheduling logic for RTK: strict priority preemption with round
//! robin among tasks of equal priority.
//!
//! ## Data Structures
//!
//! - one ready ring per priority level ([`OrderedList`] keyed by the
//!   priority, rotated by its iterator); the executing task stays in its
//!   ring
//! - one delay queue keyed by absolute wake tick
//! - semaphore wait queues, owned by the semaphores and passed in by
//!   reference to [`block_current`](Scheduler::block_current),
//!   [`finish_block`](Scheduler::finish_block) and
//!   [`unblock`](Scheduler::unblock)
//!
//! ## Scheduling Algorithm
//!
//! At each tick:
//! 1. Advance the tick counter
//! 2. Wake every task whose wake tick has been reached; each rejoins its
//!    ring right at the iterator, i.e. it is the next of its peers to run
//! 3. Request a switch if a woken task is at least as important as the
//!    running one, or if the running task has ready peers
//!
//! On a switch, [`select_next`](Scheduler::select_next) takes the iterator
//! of the highest non-empty ring.
//!
//! Every operation brackets itself in the kernel critical section; nesting
//! is counted so operations compose.

use core::ffi::c_void;
use core::ptr;

use crate::arch::Port;
use crate::config::{FOREVER_TICK, PRIO_LEVELS};
use crate::error::KernelError;
use crate::list::{ListId, ListTag, OrderedList};
use crate::task::{TaskConfig, TaskControlBlock, TaskEntry, TaskId, TaskState, TaskTable};

/// How a blocked task was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Removed from the wait queue by [`Scheduler::unblock`].
    Signaled,
    /// The deadline tick passed first.
    TimedOut,
}

/// Receipt for a task parked by [`Scheduler::block_current`]. Hand it back
/// to [`Scheduler::finish_block`] once the task runs again.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockToken {
    task: TaskId,
    deadline: u32,
    queue: ListId,
}

impl BlockToken {
    /// The blocked task.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Absolute tick at which the wait times out.
    pub fn deadline(&self) -> u32 {
        self.deadline
    }

    /// Id of the wait queue the task was parked in.
    pub fn queue(&self) -> ListId {
        self.queue
    }
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. One instance lives in `kernel.rs`; tests
/// own theirs with a [`SimPort`](crate::arch::sim::SimPort).
pub struct Scheduler<P: Port> {
    port: P,

    /// Task descriptors; also the node store of every list.
    tasks: TaskTable,

    /// One ring per priority level.
    ready: [OrderedList; PRIO_LEVELS],

    /// Delayed and blocked tasks, keyed by wake tick.
    delayed: OrderedList,

    /// Monotonic tick counter.
    tick: u32,

    /// The executing task. `None` until `start()`.
    current: Option<TaskId>,

    /// Smallest key of `delayed`, or `FOREVER_TICK`.
    next_wakeup: u32,

    nest_critical: u32,
    suspended: u32,
    ticks_in_suspend: u32,
}

const fn ready_lists() -> [OrderedList; PRIO_LEVELS] {
    const EMPTY: OrderedList = OrderedList::new(ListTag::Ready(0));
    let mut lists = [EMPTY; PRIO_LEVELS];
    let mut prio = 0;
    while prio < PRIO_LEVELS {
        lists[prio] = OrderedList::new(ListTag::Ready(prio as u8));
        prio += 1;
    }
    lists
}

impl<P: Port> Scheduler<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            tasks: TaskTable::new(),
            ready: ready_lists(),
            delayed: OrderedList::new(ListTag::Delayed),
            tick: 0,
            current: None,
            next_wakeup: FOREVER_TICK,
            nest_critical: 0,
            suspended: 0,
            ticks_in_suspend: 0,
        }
    }

    /// Empty all ready rings and the delay queue and forget every task.
    /// Must run before any task creation.
    pub fn init(&mut self) {
        self.critical(|s| {
            for list in &mut s.ready {
                list.init();
            }
            s.delayed.init();
            s.tasks.clear();
            s.tick = 0;
            s.current = None;
            s.next_wakeup = FOREVER_TICK;
            s.suspended = 0;
            s.ticks_in_suspend = 0;
        });
    }

    // -----------------------------------------------------------------------
    // Critical section
    // -----------------------------------------------------------------------

    /// Raise the kernel interrupt mask. Nests.
    pub fn enter_critical(&mut self) {
        self.port.mask_irq();
        self.nest_critical += 1;
    }

    /// Leave one level of critical section; the mask is lowered when the
    /// outermost level is left.
    pub fn exit_critical(&mut self) {
        debug_assert!(self.nest_critical > 0, "unbalanced exit_critical");
        self.nest_critical = self.nest_critical.saturating_sub(1);
        if self.nest_critical == 0 {
            self.port.unmask_irq();
        }
    }

    /// Current critical-section nesting depth.
    #[inline]
    pub fn critical_depth(&self) -> u32 {
        self.nest_critical
    }

    fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.enter_critical();
        let result = f(self);
        self.exit_critical();
        result
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Register a task and append it to the ready ring of its priority.
    ///
    /// # Returns
    /// - `Ok(id)`: handle of the new task
    /// - `Err(InvalidPriority)`: priority not in `0..PRIO_LEVELS`
    /// - `Err(StackInitFailure)`: stack cannot hold the bootstrap frame
    /// - `Err(TaskTableFull)`: no free descriptor slot
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        config: TaskConfig,
        param: *mut c_void,
    ) -> Result<TaskId, KernelError> {
        let priority = config.priority;
        if usize::from(priority) >= PRIO_LEVELS {
            return Err(KernelError::InvalidPriority);
        }

        self.critical(|s| {
            let id = s.tasks.allocate(entry, config, param)?;
            let key = u32::from(priority);
            s.ready[usize::from(priority)].insert(&mut s.tasks, id.sched_node(), key);
            log::info!(
                "task {} '{}' created at priority {}",
                id.index(),
                s.tasks[id].name(),
                priority
            );
            Ok(id)
        })
    }

    /// Create the idle task on `idle_stack` and make the most important
    /// ready task the current one. The caller then hands control to the
    /// first-entry trampoline.
    pub fn start(&mut self, idle_stack: &'static mut [u32]) -> Result<TaskId, KernelError> {
        let idle = TaskConfig {
            name: "IDLE",
            priority: 0,
            stack: idle_stack,
        };
        if let Err(err) = self.create_task(idle_task, idle, ptr::null_mut()) {
            log::error!("idle task: {}", err);
            return Err(KernelError::StartFailure);
        }

        self.critical(|s| {
            let prio = s.highest_ready().ok_or(KernelError::StartFailure)?;
            let node = s.ready[prio]
                .take_iterator(&s.tasks)
                .ok_or(KernelError::StartFailure)?;
            let first = TaskId::from_node(node);

            s.tasks[first].set_state(TaskState::Executing);
            s.current = Some(first);
            log::info!("starting with task '{}'", s.tasks[first].name());
            Ok(first)
        })
    }

    // -----------------------------------------------------------------------
    // Tick and task selection
    // -----------------------------------------------------------------------

    /// Process one timer tick. Returns whether a context switch should be
    /// requested.
    pub fn tick(&mut self) -> bool {
        self.critical(Self::advance_tick)
    }

    fn advance_tick(&mut self) -> bool {
        if self.suspended > 0 {
            self.ticks_in_suspend += 1;
            return false;
        }

        self.tick = self.tick.wrapping_add(1);

        let Some(current) = self.current else {
            return false;
        };
        let current_prio = self.tasks[current].priority();
        let mut switch = false;

        while self.next_wakeup != FOREVER_TICK && self.tick >= self.next_wakeup {
            let Some(node) = self.delayed.min() else {
                break;
            };
            let task = TaskId::from_node(node);

            self.delayed.remove(&mut self.tasks, node);
            self.refresh_next_wakeup();
            self.tasks[task].set_woken_tick(self.tick);
            self.make_ready(task);
            log::trace!("tick {}: woke '{}'", self.tick, self.tasks[task].name());

            if self.tasks[task].priority() >= current_prio {
                switch = true;
            }
        }

        // Let peers of the running task have a turn.
        switch || self.ready[usize::from(current_prio)].len() > 1
    }

    /// Pick the next task: the iterator of the highest non-empty ready
    /// ring, which is then advanced. Called by the context-switch
    /// trampoline after the outgoing context has been saved.
    pub fn select_next(&mut self) -> Option<TaskId> {
        self.critical(|s| {
            let prio = s.highest_ready()?;
            let next = TaskId::from_node(s.ready[prio].take_iterator(&s.tasks)?);

            if let Some(prev) = s.current {
                if s.tasks[prev].state() == TaskState::Executing {
                    s.tasks[prev].set_state(TaskState::Ready);
                }
            }
            s.tasks[next].set_state(TaskState::Executing);
            s.current = Some(next);
            Some(next)
        })
    }

    /// Pend a voluntary context switch.
    pub fn yield_current(&mut self) {
        self.critical(|s| s.port.pend_switch());
    }

    /// Request an immediate context switch.
    #[inline]
    pub fn request_switch(&self) {
        self.port.pend_switch();
    }

    // -----------------------------------------------------------------------
    // Delays and blocking
    // -----------------------------------------------------------------------

    /// Park the running task until `period` ticks after it was last woken,
    /// then yield. Anchoring on the last wake tick instead of "now" keeps
    /// periodic tasks free of drift.
    ///
    /// A `period` of `FOREVER_TICK` never expires; other wake ticks
    /// saturate at it.
    ///
    /// Returns the absolute wake tick, or `None` before `start()`.
    pub fn delay_current(&mut self, period: u32) -> Option<u32> {
        self.critical(|s| {
            let task = s.current?;
            let wake = if period == FOREVER_TICK {
                FOREVER_TICK
            } else {
                s.tasks[task].delay_woken_tick().saturating_add(period)
            };

            s.unlink_ready(task);
            s.delayed.insert(&mut s.tasks, task.sched_node(), wake);
            s.refresh_next_wakeup();
            s.tasks[task].set_state(TaskState::Delayed);
            s.port.pend_switch();
            Some(wake)
        })
    }

    /// Move the running task from its ready ring into `wait_list` (keyed by
    /// its priority) and into the delay queue (keyed by now + `timeout`),
    /// then yield. A `timeout` of `FOREVER_TICK` never expires.
    ///
    /// Returns `None` before `start()`.
    pub fn block_current(
        &mut self,
        wait_list: &mut OrderedList,
        timeout: u32,
    ) -> Option<BlockToken> {
        self.critical(|s| {
            let task = s.current?;
            let prio = s.tasks[task].priority();
            let deadline = if timeout == FOREVER_TICK {
                FOREVER_TICK
            } else {
                s.tick.saturating_add(timeout)
            };

            s.unlink_ready(task);
            wait_list.insert(&mut s.tasks, task.wait_node(), u32::from(prio));
            s.delayed.insert(&mut s.tasks, task.sched_node(), deadline);
            s.refresh_next_wakeup();
            s.tasks[task].set_state(TaskState::Blocked);
            s.port.pend_switch();
            Some(BlockToken {
                task,
                deadline,
                queue: wait_list.id(),
            })
        })
    }

    /// Resolve a wait once the blocked task runs again.
    ///
    /// A task still queued in `wait_list` was released by its deadline;
    /// one that [`unblock`](Self::unblock) took out of the queue was
    /// signaled. Either way the task leaves both queues.
    ///
    /// A token issued for another queue changes nothing and reports
    /// `TimedOut`: nothing was received through `wait_list`.
    pub fn finish_block(&mut self, wait_list: &mut OrderedList, token: BlockToken) -> WaitResult {
        self.critical(|s| {
            let task = token.task;
            if token.queue != wait_list.id() {
                log::warn!("'{}' finished a wait on a foreign queue", s.tasks[task].name());
                return WaitResult::TimedOut;
            }
            let timed_out = s.tasks[task].wait_node.is_linked();

            wait_list.remove(&mut s.tasks, task.wait_node());
            s.unlink_delayed(task);
            if !s.tasks[task].sched_node.is_linked() {
                s.make_ready(task);
            }
            if s.current == Some(task) {
                s.tasks[task].set_state(TaskState::Executing);
            }

            if timed_out {
                log::debug!(
                    "'{}' timed out at tick {} (deadline {})",
                    s.tasks[task].name(),
                    s.tick,
                    token.deadline
                );
                WaitResult::TimedOut
            } else {
                WaitResult::Signaled
            }
        })
    }

    /// Take `task` out of `wait_list` and the delay queue and make it the
    /// next of its peers to run. A task queued in some other wait list is
    /// left alone.
    pub fn unblock(&mut self, task: TaskId, wait_list: &mut OrderedList) {
        self.critical(|s| {
            let node = task.wait_node();
            if s.tasks[task].wait_node.is_linked() && !wait_list.contains(&s.tasks, node) {
                return;
            }
            wait_list.remove(&mut s.tasks, node);
            s.unlink_delayed(task);
            if !s.tasks[task].sched_node.is_linked() {
                s.tasks[task].set_woken_tick(s.tick);
                s.make_ready(task);
            }
        });
    }

    /// Whether `task` should preempt the running task.
    pub fn preempts_current(&self, task: TaskId) -> bool {
        self.current
            .map_or(true, |current| self.tasks[task].priority() >= self.tasks[current].priority())
    }

    // -----------------------------------------------------------------------
    // Suspend / resume
    // -----------------------------------------------------------------------

    /// Pause tick processing. Interrupts stay live; ticks are only counted.
    pub fn suspend(&mut self) {
        self.critical(|s| s.suspended += 1);
    }

    /// Undo one [`suspend`](Self::suspend). When the last level is left
    /// and ticks were missed, they are processed now and a switch is
    /// requested. Returns whether a switch was requested.
    pub fn resume(&mut self) -> bool {
        self.critical(|s| {
            debug_assert!(s.suspended > 0, "resume without suspend");
            s.suspended = s.suspended.saturating_sub(1);
            if s.suspended > 0 || s.ticks_in_suspend == 0 {
                return false;
            }

            let missed = core::mem::take(&mut s.ticks_in_suspend);
            for _ in 0..missed {
                s.advance_tick();
            }
            log::debug!("resumed after {} missed ticks", missed);
            s.port.pend_switch();
            true
        })
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended > 0
    }

    // -----------------------------------------------------------------------
    // Context-switch hooks
    // -----------------------------------------------------------------------

    /// Record the stack pointer saved for the running task.
    pub fn store_context(&mut self, sp: *mut u32) {
        if let Some(task) = self.current {
            self.tasks[task].set_stack_pointer(sp);
        }
    }

    /// Saved stack pointer of the running task, for the restore path.
    pub fn current_context(&self) -> *mut u32 {
        self.current
            .map_or(ptr::null_mut(), |task| self.tasks[task].stack_pointer())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[inline]
    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    /// The executing task.
    #[inline]
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskControlBlock> {
        self.tasks.get(id)
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of tasks in the ready ring of `prio`.
    pub fn ready_len(&self, prio: u8) -> u32 {
        self.ready.get(usize::from(prio)).map_or(0, OrderedList::len)
    }

    /// Number of delayed or blocked tasks.
    #[inline]
    pub fn delayed_len(&self) -> u32 {
        self.delayed.len()
    }

    /// Earliest pending wake tick, or `FOREVER_TICK`.
    #[inline]
    pub fn next_wakeup(&self) -> u32 {
        self.next_wakeup
    }

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Node store backing every kernel list, for wait-queue owners.
    #[inline]
    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Check the structural invariants of every kernel list.
    pub fn lists_consistent(&self) -> bool {
        self.ready.iter().all(|list| list.is_consistent(&self.tasks))
            && self.delayed.is_consistent(&self.tasks)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn highest_ready(&self) -> Option<usize> {
        (0..PRIO_LEVELS).rev().find(|&prio| !self.ready[prio].is_empty())
    }

    fn make_ready(&mut self, task: TaskId) {
        let prio = self.tasks[task].priority();
        self.tasks[task].set_state(TaskState::Ready);
        let key = u32::from(prio);
        self.ready[usize::from(prio)].iter_insert(&mut self.tasks, task.sched_node(), key);
    }

    fn unlink_ready(&mut self, task: TaskId) {
        let prio = self.tasks[task].priority();
        self.ready[usize::from(prio)].remove(&mut self.tasks, task.sched_node());
    }

    fn unlink_delayed(&mut self, task: TaskId) {
        if self.tasks[task].sched_node.list() == Some(ListTag::Delayed) {
            self.delayed.remove(&mut self.tasks, task.sched_node());
            self.refresh_next_wakeup();
        }
    }

    fn refresh_next_wakeup(&mut self) {
        self.next_wakeup = self.delayed.min_key(&self.tasks).unwrap_or(FOREVER_TICK);
    }
}

/// Lowest-priority task that keeps the CPU busy when nothing else is
/// ready. Never blocks.
extern "C" fn idle_task(_: *mut c_void) -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
