//! # Task Control Block
//!
//! Task descriptors and the fixed-capacity slab that stores them.
//!
//! Each descriptor embeds two list nodes:
//! - the **scheduling node**, linked into exactly one ready ring or the
//!   delay queue
//! - the **wait node**, linked into at most one semaphore wait queue
//!
//! so a blocked task can sit in a wait queue and the delay queue at the
//! same time. The slab is the [`NodeStore`] for every kernel list: node
//! `2 * i` is task `i`'s scheduling node, node `2 * i + 1` its wait node.
//!
//! Stacks are caller-allocated (`&'static mut [u32]`); the kernel never
//! allocates.

use core::ffi::c_void;
use core::ops::{Index, IndexMut};

use crate::config::MAX_TASKS;
use crate::error::KernelError;
use crate::list::{Node, NodeId, NodeStore};

/// Task entry point. Receives the opaque parameter given at creation and
/// must never return.
pub type TaskEntry = extern "C" fn(*mut c_void) -> !;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///                 create_task()
///  Uninitialized ─────────────► Ready ◄──────────┐
///                               │   ▲            │ tick() / unblock()
///                  select_next()│   │preempt     │
///                               ▼   │            │
///                             Executing ──► Delayed / Blocked
///                                delay_current() / block_current()
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    /// Linked into its ready ring, waiting for the CPU.
    Ready,
    /// The one task currently running. Still linked into its ready ring.
    Executing,
    /// In the delay queue until its wake tick.
    Delayed,
    /// In a wait queue and in the delay queue (timeout).
    Blocked,
}

/// Handle to a task descriptor in the kernel's task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u8);

impl TaskId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Task owning the given list node.
    #[inline]
    pub(crate) const fn from_node(node: NodeId) -> Self {
        Self((node.index() / 2) as u8)
    }

    #[inline]
    pub(crate) const fn sched_node(self) -> NodeId {
        NodeId::new(self.index() * 2)
    }

    #[inline]
    pub(crate) const fn wait_node(self) -> NodeId {
        NodeId::new(self.index() * 2 + 1)
    }
}

// ---------------------------------------------------------------------------
// Task configuration
// ---------------------------------------------------------------------------

/// Creation parameters for a task.
#[derive(Debug)]
pub struct TaskConfig {
    /// Display name, for logs and debuggers.
    pub name: &'static str,
    /// Priority in `0..PRIO_LEVELS`. Higher value = more important.
    pub priority: u8,
    /// Stack memory. Must hold at least [`MIN_STACK_WORDS`] words.
    pub stack: &'static mut [u32],
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB).
///
/// `sp` is written only by the context-save trampoline (through the
/// scheduler) and read only by the context-restore trampoline.
#[derive(Debug)]
pub struct TaskControlBlock {
    sp: *mut u32,
    entry: usize,
    name: &'static str,
    priority: u8,
    base_priority: u8,
    state: TaskState,
    stack_base: *mut u32,
    stack_words: usize,
    delay_woken_tick: u32,
    pub(crate) sched_node: Node,
    pub(crate) wait_node: Node,
}

// Safety: the raw pointers refer to the task's own `'static` stack, which
// is only touched by that task and by the context-switch trampoline.
unsafe impl Send for TaskControlBlock {}

impl TaskControlBlock {
    /// An unallocated slot.
    pub const EMPTY: Self = Self {
        sp: core::ptr::null_mut(),
        entry: 0,
        name: "",
        priority: 0,
        base_priority: 0,
        state: TaskState::Uninitialized,
        stack_base: core::ptr::null_mut(),
        stack_words: 0,
        delay_woken_tick: 0,
        sched_node: Node::UNLINKED,
        wait_node: Node::UNLINKED,
    };

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Priority the task was created with.
    #[inline]
    pub fn base_priority(&self) -> u8 {
        self.base_priority
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Address of the entry function.
    #[inline]
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Saved stack pointer of the task's context.
    #[inline]
    pub fn stack_pointer(&self) -> *mut u32 {
        self.sp
    }

    /// Base address and size in words of the task's stack region.
    #[inline]
    pub fn stack_bounds(&self) -> (*mut u32, usize) {
        (self.stack_base, self.stack_words)
    }

    /// Tick at which the task was last woken from a delay or wait.
    #[inline]
    pub fn delay_woken_tick(&self) -> u32 {
        self.delay_woken_tick
    }

    #[inline]
    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    #[inline]
    pub(crate) fn set_stack_pointer(&mut self, sp: *mut u32) {
        self.sp = sp;
    }

    #[inline]
    pub(crate) fn set_woken_tick(&mut self, tick: u32) {
        self.delay_woken_tick = tick;
    }
}

// ---------------------------------------------------------------------------
// Task table
// ---------------------------------------------------------------------------

/// Fixed-capacity slab of task descriptors. Slots are handed out in order
/// and never freed: tasks run forever.
#[derive(Debug)]
pub struct TaskTable {
    slots: [TaskControlBlock; MAX_TASKS],
    len: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            slots: [TaskControlBlock::EMPTY; MAX_TASKS],
            len: 0,
        }
    }

    /// Number of allocated descriptors.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskControlBlock> {
        self.slots[..self.len].get(id.index())
    }

    /// Drop every descriptor. Stacks handed in earlier stay claimed.
    pub(crate) fn clear(&mut self) {
        self.slots = [TaskControlBlock::EMPTY; MAX_TASKS];
        self.len = 0;
    }

    /// Fill the next free slot and synthesize the task's bootstrap frame.
    ///
    /// The descriptor comes back `Ready` but not yet linked into any list.
    pub(crate) fn allocate(
        &mut self,
        entry: TaskEntry,
        config: TaskConfig,
        param: *mut c_void,
    ) -> Result<TaskId, KernelError> {
        if self.len >= MAX_TASKS {
            return Err(KernelError::TaskTableFull);
        }

        let TaskConfig { name, priority, stack } = config;
        let offset = init_stack(stack, entry as usize, param as usize, task_exit as usize)?;

        let id = TaskId(self.len as u8);
        let words = stack.len();
        let base = stack.as_mut_ptr();

        self.slots[id.index()] = TaskControlBlock {
            // Safety: `offset < words`, checked by `init_stack`.
            sp: unsafe { base.add(offset) },
            entry: entry as usize,
            name,
            priority,
            base_priority: priority,
            state: TaskState::Ready,
            stack_base: base,
            stack_words: words,
            delay_woken_tick: 0,
            sched_node: Node::UNLINKED,
            wait_node: Node::UNLINKED,
        };
        self.len += 1;
        Ok(id)
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<TaskId> for TaskTable {
    type Output = TaskControlBlock;

    fn index(&self, id: TaskId) -> &TaskControlBlock {
        &self.slots[id.index()]
    }
}

impl IndexMut<TaskId> for TaskTable {
    fn index_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        &mut self.slots[id.index()]
    }
}

impl NodeStore for TaskTable {
    fn node(&self, id: NodeId) -> &Node {
        let tcb = &self.slots[id.index() / 2];
        if id.index() % 2 == 0 {
            &tcb.sched_node
        } else {
            &tcb.wait_node
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        let tcb = &mut self.slots[id.index() / 2];
        if id.index() % 2 == 0 {
            &mut tcb.sched_node
        } else {
            &mut tcb.wait_node
        }
    }
}

// ---------------------------------------------------------------------------
// Stack initialization
// ---------------------------------------------------------------------------

/// Words saved by software on a context switch: R4–R11 and EXC_RETURN.
pub const SOFTWARE_FRAME_WORDS: usize = 9;

/// Words stacked by hardware on exception entry: R0–R3, R12, LR, PC, xPSR.
pub const HARDWARE_FRAME_WORDS: usize = 8;

/// Size of the bootstrap frame written by [`init_stack`].
pub const INITIAL_FRAME_WORDS: usize = SOFTWARE_FRAME_WORDS + HARDWARE_FRAME_WORDS;

/// Smallest accepted stack: the bootstrap frame plus one word of
/// alignment slack.
pub const MIN_STACK_WORDS: usize = INITIAL_FRAME_WORDS + 1;

/// EXC_RETURN: return to Thread mode on PSP, no FPU state stacked.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// xPSR with only the Thumb bit set.
pub const INITIAL_XPSR: u32 = 0x0100_0000;

/// Write the frame a task would leave behind had it been switched out,
/// so the normal restore path can start it. Returns the word offset of the
/// saved stack pointer within `stack`.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]   <- 8-byte aligned
///   xPSR  (Thumb bit set)
///   PC    (entry, bit 0 clear)
///   LR    (task_exit)
///   R12, R3, R2, R1  (0)
///   R0    (param)
/// [Software saved context]
///   EXC_RETURN (0xFFFFFFFD)
///   R11 … R4   (0)           <- saved stack pointer
/// ```
pub fn init_stack(
    stack: &mut [u32],
    entry: usize,
    param: usize,
    exit: usize,
) -> Result<usize, KernelError> {
    if stack.len() < MIN_STACK_WORDS {
        return Err(KernelError::StackInitFailure);
    }

    // AAPCS: the hardware frame must start on an 8-byte boundary.
    let mut top = stack.len();
    if (stack.as_ptr() as usize + top * 4) % 8 != 0 {
        top -= 1;
    }
    let sp = top - INITIAL_FRAME_WORDS;

    let frame = &mut stack[sp..top];
    frame[..8].fill(0); // R4–R11
    frame[8] = EXC_RETURN_THREAD_PSP;
    frame[9] = param as u32; // R0
    frame[10..14].fill(0); // R1–R3, R12
    frame[14] = exit as u32; // LR
    frame[15] = (entry as u32) & !1; // PC
    frame[16] = INITIAL_XPSR;

    Ok(sp)
}

/// Landing pad for a task that returns despite its `-> !` contract.
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::{ListTag, OrderedList};

    extern "C" fn spin(_: *mut c_void) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack(words: usize) -> &'static mut [u32] {
        Box::leak(vec![0xDEAD_BEEF_u32; words].into_boxed_slice())
    }

    fn config(name: &'static str, priority: u8, words: usize) -> TaskConfig {
        TaskConfig {
            name,
            priority,
            stack: stack(words),
        }
    }

    #[test]
    fn test_initial_frame_layout() {
        let mem = stack(64);
        let base = mem.as_ptr() as usize;
        let sp = init_stack(mem, 0x0800_1235, 0x2000_0040, 0x0800_2001).unwrap();

        assert!(sp + INITIAL_FRAME_WORDS <= 64);
        assert_eq!((base + (sp + SOFTWARE_FRAME_WORDS) * 4) % 8, 0);
        assert!(mem[sp..sp + 8].iter().all(|&w| w == 0));
        assert_eq!(mem[sp + 8], EXC_RETURN_THREAD_PSP);
        assert_eq!(mem[sp + 9], 0x2000_0040);
        assert!(mem[sp + 10..sp + 14].iter().all(|&w| w == 0));
        assert_eq!(mem[sp + 14], 0x0800_2001);
        assert_eq!(mem[sp + 15], 0x0800_1234);
        assert_eq!(mem[sp + 16], INITIAL_XPSR);
    }

    #[test]
    fn test_stack_too_small() {
        let mem = stack(MIN_STACK_WORDS - 1);
        assert_eq!(init_stack(mem, 0, 0, 0), Err(KernelError::StackInitFailure));
        assert!(init_stack(stack(MIN_STACK_WORDS), 0, 0, 0).is_ok());
    }

    #[test]
    fn test_allocate_descriptor() {
        let mut table = TaskTable::new();
        let id = table
            .allocate(spin, config("T1", 2, 64), core::ptr::null_mut())
            .unwrap();

        assert_eq!(id.index(), 0);
        assert_eq!(table.len(), 1);
        let tcb = &table[id];
        assert_eq!(tcb.name(), "T1");
        assert_eq!(tcb.priority(), 2);
        assert_eq!(tcb.base_priority(), 2);
        assert_eq!(tcb.state(), TaskState::Ready);
        assert_eq!(tcb.delay_woken_tick(), 0);
        assert_eq!(tcb.entry(), spin as usize);

        let (base, words) = tcb.stack_bounds();
        assert_eq!(words, 64);
        let sp = tcb.stack_pointer() as usize;
        assert!(sp >= base as usize && sp < base as usize + words * 4);
    }

    #[test]
    fn test_allocate_rejects_small_stack() {
        let mut table = TaskTable::new();
        let err = table.allocate(spin, config("T", 0, 4), core::ptr::null_mut());
        assert_eq!(err, Err(KernelError::StackInitFailure));
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_full() {
        let mut table = TaskTable::new();
        for _ in 0..MAX_TASKS {
            table.allocate(spin, config("T", 0, 32), core::ptr::null_mut()).unwrap();
        }
        let err = table.allocate(spin, config("X", 0, 32), core::ptr::null_mut());
        assert_eq!(err, Err(KernelError::TaskTableFull));
        assert_eq!(table.get(TaskId(MAX_TASKS as u8 - 1)).map(|t| t.name()), Some("T"));
    }

    #[test]
    fn test_node_mapping() {
        let id = TaskId(3);
        assert_eq!(id.sched_node().index(), 6);
        assert_eq!(id.wait_node().index(), 7);
        assert_eq!(TaskId::from_node(id.sched_node()), id);
        assert_eq!(TaskId::from_node(id.wait_node()), id);
    }

    #[test]
    fn test_both_nodes_linked_independently() {
        let mut table = TaskTable::new();
        let id = table.allocate(spin, config("T", 1, 32), core::ptr::null_mut()).unwrap();
        let mut delayed = OrderedList::new(ListTag::Delayed);
        let mut waiting = OrderedList::new(ListTag::Waiting);

        delayed.insert(&mut table, id.sched_node(), 50);
        waiting.insert(&mut table, id.wait_node(), 1);
        assert_eq!(table[id].sched_node.list(), Some(ListTag::Delayed));
        assert_eq!(table[id].wait_node.list(), Some(ListTag::Waiting));

        waiting.remove(&mut table, id.wait_node());
        assert!(!table[id].wait_node.is_linked());
        assert!(table[id].sched_node.is_linked());
        assert!(delayed.is_consistent(&table));
    }
}
