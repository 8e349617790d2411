//! # Kernel Errors
//!
//! Status codes surfaced synchronously by task creation and start-up.
//! A semaphore timeout is not an error; see
//! [`TakeResult`](crate::semaphore::TakeResult).

use core::fmt;

/// Error returned by fallible kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Task priority is outside `0..PRIO_LEVELS`.
    InvalidPriority,
    /// The task's stack region cannot hold the bootstrap context frame.
    StackInitFailure,
    /// All `MAX_TASKS` descriptor slots are in use.
    TaskTableFull,
    /// No task was ready when the scheduler started. Fatal.
    StartFailure,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidPriority => "task priority out of range",
            Self::StackInitFailure => "stack too small for initial context frame",
            Self::TaskTableFull => "task table full",
            Self::StartFailure => "no ready task at scheduler start",
        };
        f.write_str(msg)
    }
}
