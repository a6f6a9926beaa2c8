// SPDX-License-Identifier: MPL-2.0

//! Console output.
//!
//! UART initialization and the serial driver itself are external
//! collaborators this crate does not design. What lives here is the narrow
//! seam the logger writes through: a caller-installed sink function. An
//! embedder wires [`set_sink`] up to whatever console the platform actually
//! has; until it does, output is simply dropped.

use core::fmt::Arguments;

use spin::Once;

static SINK: Once<fn(Arguments)> = Once::new();

/// Installs the function that [`print`] forwards formatted output to.
///
/// Typically called once, early in boot, once the embedder's own
/// console/UART driver is ready. Later calls are ignored.
pub fn set_sink(sink: fn(Arguments)) {
    SINK.call_once(|| sink);
}

/// Prints formatted arguments to the console.
///
/// A no-op until [`set_sink`] has been called.
pub fn print(args: Arguments) {
    if let Some(sink) = SINK.get() {
        sink(args);
    }
}

/// Prints to the console.
#[macro_export]
macro_rules! early_print {
  ($fmt: literal $(, $($arg: tt)+)?) => {
    $crate::console::print(format_args!($fmt $(, $($arg)+)?))
  }
}

/// Prints to the console, with a newline.
#[macro_export]
macro_rules! early_println {
  () => { $crate::early_print!("\n") };
  ($fmt: literal $(, $($arg: tt)+)?) => {
    $crate::console::print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
  }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_sink(_args: Arguments) {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn print_before_sink_is_installed_does_not_panic() {
        early_println!("no sink installed yet, this must not panic");
    }

    #[test]
    fn set_sink_is_idempotent_after_first_install() {
        set_sink(counting_sink);
        let before = CALLS.load(Ordering::Relaxed);
        early_println!("one");
        // A later call_once is ignored; the sink stays counting_sink either way.
        set_sink(|_| panic!("second sink must never run"));
        early_println!("two");
        assert_eq!(CALLS.load(Ordering::Relaxed), before + 2);
    }
}
