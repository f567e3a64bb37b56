use kernel_info::memory::{KERNEL_BASE, PHYS_LOAD};
use std::env;
use std::path::Path;

const LINKER_SCRIPT: &str = "kernel.ld";

fn require_aligned(name: &str, value: u64, align: u64) {
    assert!(
        value.is_multiple_of(align),
        "{name} must be {align:#x} aligned (got {value:#x})"
    );
}

fn main() {
    require_aligned("KERNEL_BASE", KERNEL_BASE, 2 * 1024 * 1024);
    require_aligned("PHYS_LOAD", PHYS_LOAD, 4096);

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into());
    let script = Path::new(&manifest_dir).join(LINKER_SCRIPT);
    println!("cargo:rerun-if-changed={}", script.display());

    // Host builds compile the unit tests only.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    for arg in [
        format!("-T{}", script.display()),
        format!("--defsym=KERNEL_BASE={KERNEL_BASE:#x}"),
        format!("--defsym=PHYS_LOAD={PHYS_LOAD:#x}"),
    ] {
        println!("cargo:rustc-link-arg-bins={arg}");
    }
}
