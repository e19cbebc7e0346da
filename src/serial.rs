//! COM1 serial output
//!
//! The `uart_16550` crate drives the UART itself - baud programming, line
//! settings, FIFOs, transmit polling. This module adds the kernel's policy
//! on top: the sink stays inert until the `earlycon` command-line token
//! enables it (so kernels booted without a listening host lose nothing),
//! and the panic path gets a lockless escape hatch.

#[cfg(not(feature = "std"))]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(all(target_arch = "x86", not(feature = "std")))]
use lazy_static::lazy_static;
#[cfg(all(target_arch = "x86", not(feature = "std")))]
use spin::Mutex;
#[cfg(all(target_arch = "x86", not(feature = "std")))]
use uart_16550::SerialPort;

/// I/O base of the first serial port.
pub const COM1_BASE: u16 = 0x3F8;

#[cfg(not(feature = "std"))]
static SERIAL_ENABLED: AtomicBool = AtomicBool::new(false);

// Thread-local on the host so parallel tests can gate the sink independently.
#[cfg(feature = "std")]
thread_local! {
    static SERIAL_ENABLED: core::cell::Cell<bool> = core::cell::Cell::new(false);
}

fn set_enabled(on: bool) {
    #[cfg(not(feature = "std"))]
    SERIAL_ENABLED.store(on, Ordering::SeqCst);
    #[cfg(feature = "std")]
    SERIAL_ENABLED.with(|flag| flag.set(on));
}

#[cfg(all(target_arch = "x86", not(feature = "std")))]
lazy_static! {
    /// The one programmed UART. First touch runs the driver's init
    /// sequence; a spinlock keeps concurrent writers from interleaving
    /// mid-byte.
    static ref COM1: Mutex<SerialPort> = {
        // SAFETY: 0x3F8 is the standard COM1 base and this is the only
        // initialized handle to it.
        let mut port = unsafe { SerialPort::new(COM1_BASE) };
        port.init();
        Mutex::new(port)
    };
}

/// Bring the UART up and start accepting bytes (the `earlycon` path).
pub fn enable() {
    #[cfg(all(target_arch = "x86", not(feature = "std")))]
    lazy_static::initialize(&COM1);
    set_enabled(true);
}

/// Whether `earlycon` has switched the sink on.
pub fn is_enabled() -> bool {
    #[cfg(not(feature = "std"))]
    {
        SERIAL_ENABLED.load(Ordering::SeqCst)
    }
    #[cfg(feature = "std")]
    {
        SERIAL_ENABLED.with(|flag| flag.get())
    }
}

/// Drop the sink back to inert. Used by hosted tests.
#[cfg(feature = "std")]
pub fn disable() {
    set_enabled(false);
}

/// Send one byte, or do nothing while the sink is disabled.
pub fn write_byte(byte: u8) {
    if !is_enabled() {
        return;
    }
    #[cfg(all(target_arch = "x86", not(feature = "std")))]
    COM1.lock().send(byte);
    #[cfg(feature = "std")]
    capture::push(byte);
    #[cfg(all(not(target_arch = "x86"), not(feature = "std")))]
    let _ = byte;
}

/// Lockless variant for the panic path: a fresh handle to the
/// already-programmed port, so a panic that interrupted a held console
/// lock still gets its report out.
pub fn write_byte_raw(byte: u8) {
    if !is_enabled() {
        return;
    }
    #[cfg(all(target_arch = "x86", not(feature = "std")))]
    {
        // SAFETY: aliases the COM1 handle above, tolerable on the one-way
        // panic path; `enable` already programmed the line settings.
        let mut port = unsafe { SerialPort::new(COM1_BASE) };
        port.send_raw(byte);
    }
    #[cfg(feature = "std")]
    capture::push(byte);
    #[cfg(all(not(target_arch = "x86"), not(feature = "std")))]
    let _ = byte;
}

#[cfg(feature = "std")]
mod capture {
    use std::cell::RefCell;

    thread_local! {
        static CAPTURED: RefCell<Vec<u8>> = RefCell::new(Vec::new());
    }

    pub fn push(byte: u8) {
        CAPTURED.with(|buf| buf.borrow_mut().push(byte));
    }

    pub fn take() -> Vec<u8> {
        CAPTURED.with(|buf| core::mem::take(&mut *buf.borrow_mut()))
    }
}

/// Hosted test hook: everything sent since the last call.
#[cfg(feature = "std")]
pub fn take_captured() -> Vec<u8> {
    capture::take()
}
