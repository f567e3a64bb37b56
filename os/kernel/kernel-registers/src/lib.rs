//! # Typed `x86_64` Registers
//!
//! Bitfield models of the control registers and MSRs the memory core touches,
//! with privileged load/store behind the [`LoadRegisterUnsafe`] and
//! [`StoreRegisterUnsafe`] traits. The bit layouts are usable on the host;
//! the `asm` feature adds the actual instructions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "efer")]
pub mod efer;

#[cfg(feature = "idtr")]
pub mod idtr;

#[cfg(feature = "msr")]
pub mod msr;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
