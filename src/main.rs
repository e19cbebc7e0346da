//! Ferrite kernel binary
//!
//! Hosted builds get an ordinary `main` that brings up the synthetic arenas
//! and runs the self-tests. Bare-metal builds have no Rust entry here at
//! all: the Multiboot stub in `arch::boot` owns `_start` and jumps straight
//! into `kernel_main`.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(not(feature = "std"), no_main)]

#[cfg(feature = "std")]
fn main() {
    ferrite_kernel::run_hosted();
}

// Pull the library in so the boot stub, entry point, and panic handler link.
#[cfg(not(feature = "std"))]
use ferrite_kernel as _;

/// Minimal entry for non-x86 bare builds, where the Multiboot stub does not
/// exist and there is no hardware to drive.
#[cfg(all(not(feature = "std"), not(target_arch = "x86")))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
