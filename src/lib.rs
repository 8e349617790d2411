//! # RTK: Real-Time Kernel
//!
//! A preemptive, priority-based real-time task scheduler for single-core
//! ARM Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! - a small, fixed number of priority levels; higher value = more
//!   important, strict preemption between levels
//! - round robin among tasks of equal priority, rotated on every tick
//! - drift-free periodic delays
//! - a counting semaphore with timeout that wakes its most important
//!   waiter first
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │      Kernel API (kernel.rs)  ·  Semaphore (sync.rs)    │
//! │  init · create_task · start · delay · yield_now · …    │
//! ├──────────────────────────────┬─────────────────────────┤
//! │  Scheduler (scheduler.rs)    │  Semaphore core         │
//! │  ─ tick()  ─ select_next()   │  (semaphore.rs)         │
//! │  ─ block / unblock / delay   │  ─ begin/finish_take    │
//! │                              │  ─ give                 │
//! ├──────────────────────────────┴─────────────────────────┤
//! │  Ordered List (list.rs)  ·  Task table (task.rs)       │
//! ├────────────────────────────────────────────────────────┤
//! │  Port trait (arch/mod.rs)                              │
//! │  Cortex-M4: BASEPRI · SysTick · SVCall · PendSV        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One list, three orderings
//!
//! [`list::OrderedList`] is the only container in the kernel:
//!
//! | Use          | Key            | Consumed from            |
//! |--------------|----------------|--------------------------|
//! | ready ring   | task priority  | iterator (rotates)       |
//! | delay queue  | wake tick      | minimum                  |
//! | wait queue   | task priority  | maximum                  |
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed-size task table**: `[TaskControlBlock; MAX_TASKS]`
//! - **Caller-owned stacks**: `&'static mut [u32]` per task
//! - **List links are indices** into the task table, not pointers
//! - **Critical sections**: BASEPRI, so interrupts above
//!   `MASK_IRQ_PRIO` are never delayed
//!
//! Everything except the hardware layer (`arch::cortex_m4`, `kernel`,
//! `sync`, `logger`) builds and is tested on the host.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod list;
pub mod task;
pub mod arch;
pub mod scheduler;
pub mod semaphore;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod kernel;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod logger;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod sync;
