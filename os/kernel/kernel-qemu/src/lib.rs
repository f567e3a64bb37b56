//! # QEMU Debug Console Support
//!
//! Early-boot diagnostics for a kernel running under QEMU. Bytes go to the
//! debug console port `0x402`, which the host captures with
//! `-debugcon stdio` (or `-debugcon file:debug.log`).
//!
//! * [`QemuLogger`] is the `log` backend. Once installed, every `log` macro in
//!   the kernel ends up on the console as `[LEVEL] target: message`.
//! * [`qemu_trace!`] formats straight onto the port. It works before the
//!   logger is installed and on paths where the logger must not be touched.
//!
//! Switching off the `enabled` feature compiles all port I/O out.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger installed twice");
//! info!("frame allocator ready");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod console;
mod logger;

pub use console::{DEBUGCON_PORT, DebugCon};
pub use logger::QemuLogger;

#[doc(hidden)]
pub use console::write_args as __write_args;

/// Formats directly onto the QEMU debug console without going through `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {
        $crate::__write_args(core::format_args!($($arg)*))
    };
}
