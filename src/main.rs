//! # RTK Example Firmware
//!
//! Three tasks showing the kernel services:
//!
//! | Task         | Priority | Behavior                                           |
//! |--------------|----------|----------------------------------------------------|
//! | `sampler`    | 2        | Every 200 ticks: short burst of work, then `give`  |
//! | `consumer`   | 1        | `take` with a 500-tick timeout, counts samples     |
//! | `background` | 0        | Never blocks; shares level 0 with the idle task    |
//!
//! Kernel logs go out on ITM stimulus port 0.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::ffi::c_void;

    use cortex_m_rt::entry;
    use panic_halt as _;

    use rtk::kernel;
    use rtk::semaphore::TakeResult;
    use rtk::sync::Semaphore;
    use rtk::task::{TaskConfig, TaskEntry};

    const STACK_WORDS: usize = 256;
    const SAMPLE_PERIOD: u32 = 200;
    const SAMPLE_TIMEOUT: u32 = 500;

    static SAMPLE_READY: Semaphore = Semaphore::new(0);

    // -----------------------------------------------------------------------
    // Task entry points
    // -----------------------------------------------------------------------

    /// **Sampler** (Priority 2)
    ///
    /// Periodic producer. `delay` is anchored on the last wake-up, so the
    /// period holds no matter how long the burst takes.
    extern "C" fn sampler(param: *mut c_void) -> ! {
        // Safety: `main` passes a pointer to a `'static` seed.
        let mut value = unsafe { *(param as *const u32) };
        loop {
            kernel::delay(SAMPLE_PERIOD);
            for _ in 0..10_000 {
                value = value.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            }
            SAMPLE_READY.give();
        }
    }

    /// **Consumer** (Priority 1)
    ///
    /// Waits for samples; a timeout means the sampler stalled.
    extern "C" fn consumer(_: *mut c_void) -> ! {
        let mut received: u32 = 0;
        loop {
            match SAMPLE_READY.take(SAMPLE_TIMEOUT) {
                TakeResult::Acquired => {
                    received = received.wrapping_add(1);
                    log::debug!("sample {} at tick {}", received, kernel::tick_count());
                }
                TakeResult::TimedOut => {
                    log::warn!("no sample for {} ticks", SAMPLE_TIMEOUT);
                }
            }
        }
    }

    /// **Background** (Priority 0)
    ///
    /// Busy loop that only runs when nothing else is ready. Rotates with
    /// the idle task on every tick.
    extern "C" fn background(_: *mut c_void) -> ! {
        let mut acc: f32 = 1.0;
        loop {
            acc = 1.1 * acc - 10.0;
            if !acc.is_finite() {
                acc = 1.0;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    #[entry]
    fn main() -> ! {
        rtk::logger::init(log::LevelFilter::Info);

        let Some(cp) = cortex_m::Peripherals::take() else {
            panic!("core peripherals already taken");
        };

        kernel::init();

        let (Some(seed), Some(stacks)) = (
            cortex_m::singleton!(: u32 = 0x22),
            cortex_m::singleton!(: [[u32; STACK_WORDS]; 3] = [[0; STACK_WORDS]; 3]),
        ) else {
            panic!("task memory already claimed");
        };

        let tasks = [
            (sampler as TaskEntry, "sampler", 2, seed as *mut u32 as *mut c_void),
            (consumer, "consumer", 1, core::ptr::null_mut()),
            (background, "background", 0, core::ptr::null_mut()),
        ];
        for ((entry, name, priority, param), stack) in tasks.into_iter().zip(stacks.iter_mut()) {
            let config = TaskConfig {
                name,
                priority,
                stack: &mut stack[..],
            };
            if let Err(err) = kernel::create_task(entry, config, param) {
                panic!("failed to create {}: {}", name, err);
            }
        }

        // Does not return
        kernel::start(cp)
    }
}

/// The firmware only exists for bare-metal targets.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {}
