//! # Kernel
//!
//! The global scheduler instance and the task-facing API.
//!
//! Every function here runs inside the kernel critical section (see
//! [`sync::critical_section`]). Functions that give up the CPU only pend
//! PendSV; the switch happens when the critical section is left.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()
//!         ├─► kernel::create_task()  (×N)
//!         └─► kernel::start()        (no return)
//!               ├─► create idle task, pick first task
//!               ├─► configure SysTick and kernel priorities
//!               └─► svc 0 → SVCall restores the first task
//! ```

use core::cell::UnsafeCell;
use core::ffi::c_void;

use crate::arch::cortex_m4::{self, CortexM4};
use crate::arch::Port;
use crate::config::IDLE_STACK_WORDS;
use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{TaskConfig, TaskEntry, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

pub(crate) struct KernelCell(UnsafeCell<Scheduler<CortexM4>>);

// Safety: the inner scheduler is only reached with kernel exceptions
// masked (BASEPRI), which serializes every access on a single core.
unsafe impl Sync for KernelCell {}

impl KernelCell {
    #[inline]
    pub(crate) fn get(&self) -> *mut Scheduler<CortexM4> {
        self.0.get()
    }
}

pub(crate) static KERNEL: KernelCell = KernelCell(UnsafeCell::new(Scheduler::new(CortexM4)));

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Reset the scheduler. Must run before any task is created.
pub fn init() {
    sync::critical_section(|sched| sched.init());
}

/// Register a task. See [`Scheduler::create_task`].
///
/// # Example
/// ```ignore
/// static mut STACK: [u32; 256] = [0; 256];
/// let stack = unsafe { &mut *addr_of_mut!(STACK) };
/// let cfg = TaskConfig { name: "blink", priority: 1, stack };
/// kernel::create_task(blink, cfg, core::ptr::null_mut())?;
/// ```
pub fn create_task(
    entry: TaskEntry,
    config: TaskConfig,
    param: *mut c_void,
) -> Result<TaskId, KernelError> {
    sync::critical_section(|sched| sched.create_task(entry, config, param))
}

/// Start the scheduler. **Does not return.**
///
/// Creates the idle task, configures SysTick and the kernel exception
/// priorities, then enters the most important ready task. If no task can
/// be started the error is logged and the CPU halts.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    let idle_stack = cortex_m::singleton!(: [u32; IDLE_STACK_WORDS] = [0; IDLE_STACK_WORDS]);
    let started = match idle_stack {
        Some(stack) => {
            let stack: &'static mut [u32] = stack;
            sync::critical_section(move |sched| sched.start(stack))
        }
        None => Err(KernelError::StartFailure),
    };
    if let Err(err) = started {
        halt(err);
    }

    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);

    // Safety: `start` succeeded, so the current task has a bootstrap frame.
    unsafe { cortex_m4::start_first_task() }
}

fn halt(err: KernelError) -> ! {
    log::error!("kernel halted: {}", err);
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

/// Sleep until `period` ticks after the calling task was last woken.
/// Calling it in a loop gives a drift-free period.
pub fn delay(period: u32) {
    sync::critical_section(|sched| {
        if let Some(wake) = sched.delay_current(period) {
            log::trace!("delay until tick {}", wake);
        }
    });
}

/// Let the next ready task of the same priority run.
pub fn yield_now() {
    sync::critical_section(|sched| sched.yield_current());
}

/// Ticks since `start()`.
pub fn tick_count() -> u32 {
    sync::critical_section(|sched| sched.tick_count())
}

/// The calling task.
pub fn current_task() -> Option<TaskId> {
    sync::critical_section(|sched| sched.current())
}

pub fn task_state(id: TaskId) -> Option<TaskState> {
    sync::critical_section(|sched| sched.task(id).map(|tcb| tcb.state()))
}

pub fn task_name(id: TaskId) -> Option<&'static str> {
    sync::critical_section(|sched| sched.task(id).map(|tcb| tcb.name()))
}

pub fn task_priority(id: TaskId) -> Option<u8> {
    sync::critical_section(|sched| sched.task(id).map(|tcb| tcb.priority()))
}

/// Stop tick processing. Interrupts stay enabled; missed ticks are
/// replayed by [`resume`].
pub fn suspend() {
    sync::critical_section(|sched| sched.suspend());
}

/// Undo one [`suspend`]. Returns whether missed ticks were replayed.
pub fn resume() -> bool {
    sync::critical_section(|sched| sched.resume())
}

/// Enter the kernel critical section. Nests; pair with [`exit_critical`].
pub fn enter_critical() {
    CortexM4.mask_irq();
    // Safety: kernel exceptions are masked from here on.
    unsafe { (*KERNEL.get()).enter_critical() };
}

/// Leave one level of the kernel critical section.
pub fn exit_critical() {
    // Safety: still inside the critical section entered earlier.
    unsafe { (*KERNEL.get()).exit_critical() };
}

// ---------------------------------------------------------------------------
// Exception hooks
// ---------------------------------------------------------------------------

/// Saved stack pointer of the first task. Called from SVCall.
pub(crate) extern "C" fn first_context() -> *mut u32 {
    sync::critical_section(|sched| sched.current_context())
}

/// Store the outgoing context, select the next task and return its saved
/// stack pointer. Called from PendSV.
pub(crate) extern "C" fn switch_context(sp: *mut u32) -> *mut u32 {
    sync::critical_section(|sched| {
        sched.store_context(sp);
        sched.select_next();
        sched.current_context()
    })
}

/// Called from SysTick.
pub(crate) fn on_tick() {
    sync::critical_section(|sched| {
        if sched.tick() {
            sched.request_switch();
        }
    });
}
