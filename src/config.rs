//! # RTK Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time; there is no dynamic allocation.

/// Number of priority levels. Valid task priorities are `0..PRIO_LEVELS`,
/// higher value = higher priority. Level 0 is shared with the idle task.
pub const PRIO_LEVELS: usize = 4;

/// Capacity of the task descriptor slab, including the idle task created
/// by `start()`.
pub const MAX_TASKS: usize = 8;

/// Stack size of the kernel idle task, in 32-bit words.
pub const IDLE_STACK_WORDS: usize = 128;

/// SysTick frequency in Hz. One tick is the kernel's unit of time.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Priority of the kernel exceptions (PendSV, SysTick, SVCall).
/// Lowest on a Cortex-M4 with 4 implemented priority bits.
pub const KERNEL_IRQ_PRIO: u8 = 0xF0;

/// BASEPRI value written while inside a kernel critical section.
///
/// Interrupts with a numerically lower priority value keep running inside
/// critical sections and must NOT call kernel services.
pub const MASK_IRQ_PRIO: u8 = 0x60;

/// Tick value meaning "never". Used as the "no pending wakeup" marker and
/// as a timeout that never expires.
pub const FOREVER_TICK: u32 = u32::MAX;
