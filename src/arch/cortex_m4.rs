//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4F (Thumb-2) processor:
//! BASEPRI critical sections, the SysTick tick source and the context
//! switch trampolines.
//!
//! ## Context Switch Mechanism
//!
//! Tasks run in Thread mode on the PSP; the kernel and interrupt handlers
//! use the MSP. On exception entry the hardware stacks R0–R3, R12, LR, PC
//! and xPSR (plus S0–S15/FPSCR when the task used the FPU). PendSV saves
//! the rest: S16–S31 if needed, then R4–R11 and EXC_RETURN. The saved
//! stack pointer goes to the scheduler, which hands back the one to
//! restore.
//!
//! A fresh task's stack already looks like that (see
//! [`init_stack`](crate::task::init_stack)), so SVCall starts the first
//! task by simply running the restore half.
//!
//! ## Interrupt Priorities
//!
//! - SVCall, PendSV, SysTick: `KERNEL_IRQ_PRIO` (lowest)
//! - critical sections raise BASEPRI to `MASK_IRQ_PRIO`; interrupts more
//!   urgent than that are never delayed by the kernel and must not call it

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use cortex_m::register::basepri;
use cortex_m_rt::exception;

use super::Port;
use crate::config::{KERNEL_IRQ_PRIO, MASK_IRQ_PRIO, SYSTEM_CLOCK_HZ, TICK_HZ};

/// The Cortex-M4 port.
#[derive(Debug, Clone, Copy, Default)]
pub struct CortexM4;

impl Port for CortexM4 {
    #[inline]
    fn mask_irq(&self) {
        // Safety: only raises the masking threshold.
        unsafe { basepri::write(MASK_IRQ_PRIO) };
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    #[inline]
    fn unmask_irq(&self) {
        // Safety: called at the outermost level of the kernel critical
        // section, nothing else relies on BASEPRI.
        unsafe { basepri::write(0) };
        cortex_m::asm::isb();
    }

    #[inline]
    fn pend_switch(&self) {
        SCB::set_pendsv();
    }
}

// ---------------------------------------------------------------------------
// SysTick and priority configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Put the three kernel exceptions at the lowest priority so scheduling
/// never delays application interrupts.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // Safety: done once before the first task starts.
    unsafe {
        scb.set_priority(SystemHandler::SVCall, KERNEL_IRQ_PRIO);
        scb.set_priority(SystemHandler::PendSV, KERNEL_IRQ_PRIO);
        scb.set_priority(SystemHandler::SysTick, KERNEL_IRQ_PRIO);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Lower every mask and trap into SVCall, which restores the current
/// task's context. Never returns.
///
/// # Safety
/// The scheduler must have a current task with a valid bootstrap frame.
pub unsafe fn start_first_task() -> ! {
    basepri::write(0);
    cortex_m::interrupt::enable();
    asm!("dsb", "isb", "svc 0", options(noreturn));
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// SVCall: first entry into task execution.
///
/// 1. Fetch the current task's saved stack pointer
/// 2. Pop R4–R11 and EXC_RETURN from it
/// 3. Point the PSP at the remaining hardware frame and return into it
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "bl {first}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "isb",
        "bx lr",
        first = sym crate::kernel::first_context,
    );
}

/// PendSV: the context switch.
///
/// ## Sequence
/// 1. Save S16–S31 if the outgoing task has live FPU state (EXC_RETURN
///    bit 4 clear), then R4–R11 and EXC_RETURN, onto its PSP
/// 2. Hand the resulting stack pointer to the scheduler, get the incoming
///    task's back
/// 3. Restore in reverse order and return through the restored EXC_RETURN
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "isb",
        "tst lr, #0x10",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",
        "isb",
        "bx lr",
        switch = sym crate::kernel::switch_context,
    );
}

#[exception]
fn SysTick() {
    crate::kernel::on_tick();
}
