// SPDX-License-Identifier: MPL-2.0

//! Logging support.
//!
//! A minimal [`log::Log`] implementation that forwards every accepted record
//! to the console sink (see [`crate::console`]). Severity is filtered once,
//! at `init` time, against [`crate::config::LOG_LEVEL`]; nothing else in this
//! crate calls `log::set_max_level` or `log::set_logger` again.

use log::{Level, Metadata, Record};

use crate::config::LOG_LEVEL;
use crate::early_println;

static LOGGER: Logger = Logger {};

struct Logger {}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= LOG_LEVEL
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            early_println!("[{}]: {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs this crate's logger as the global `log` facade backend.
///
/// Idempotent: a second call is a no-op, since `log::set_logger` can only
/// succeed once per process.
pub fn init() {
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(LOG_LEVEL.to_level_filter()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_respects_configured_level() {
        let logger = Logger {};
        assert!(logger.enabled(&log::Metadata::builder().level(Level::Error).build()));
        if LOG_LEVEL < Level::Trace {
            assert!(!logger.enabled(&log::Metadata::builder().level(Level::Trace).build()));
        }
    }
}
