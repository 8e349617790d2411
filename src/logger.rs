//! Kernel logger: routes `log` records to ITM stimulus port 0.
//!
//! Format: `[LEVEL] message`. Read with any SWO viewer.

use cortex_m::peripheral::{itm, ITM};
use log::{LevelFilter, Metadata, Record};

/// Global logger instance
static LOGGER: ItmLogger = ItmLogger;

struct ItmLogger;

impl log::Log for ItmLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        cortex_m::interrupt::free(|_| {
            // Safety: stimulus port 0 is only written here, with interrupts
            // disabled.
            let itm = unsafe { &mut *(ITM::PTR as *mut itm::RegisterBlock) };
            cortex_m::iprintln!(&mut itm.stim[0], "[{}] {}", record.level(), record.args());
        });
    }

    fn flush(&self) {}
}

/// Install the logger. Later calls are ignored.
///
/// # Arguments
/// * `max_level` - The maximum log level to emit.
pub fn init(max_level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(max_level);
        log::info!("logger initialized at {}", max_level);
    }
}
