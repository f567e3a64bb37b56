//! The debug console port.

use core::fmt;

/// I/O port QEMU's `-debugcon` device listens on.
pub const DEBUGCON_PORT: u16 = 0x402;

/// `fmt::Write` over the debug console. Writes cannot fail; without the
/// `enabled` feature they are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugCon;

impl DebugCon {
    #[cfg(feature = "enabled")]
    #[inline]
    pub fn write_bytes(bytes: &[u8]) {
        for &byte in bytes {
            // SAFETY: the port only exists to swallow bytes; writing it has
            // no other side effects.
            unsafe {
                core::arch::asm!(
                    "out dx, al",
                    in("dx") DEBUGCON_PORT,
                    in("al") byte,
                    options(nomem, nostack, preserves_flags)
                );
            }
        }
    }

    #[cfg(not(feature = "enabled"))]
    #[inline]
    pub const fn write_bytes(_bytes: &[u8]) {}
}

impl fmt::Write for DebugCon {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Self::write_bytes(s.as_bytes());
        Ok(())
    }
}

#[doc(hidden)]
#[inline]
pub fn write_args(args: fmt::Arguments) {
    let _ = fmt::write(&mut DebugCon, args);
}
