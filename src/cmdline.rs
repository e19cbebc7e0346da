//! Kernel command line
//!
//! Whitespace-separated tokens from the bootloader, either bare flags
//! (`earlycon`) or `key=value` pairs. Lookups return sub-slices of the boot
//! line itself; nothing is copied and nothing is cached between calls.

use spin::Mutex;

static CMDLINE: Mutex<Option<&'static str>> = Mutex::new(None);

/// Record the boot-provided command line for later lookups.
pub fn init(line: &'static str) {
    *CMDLINE.lock() = Some(line);
}

/// The stored command line, or `""` before `init`.
pub fn current() -> &'static str {
    CMDLINE.lock().unwrap_or("")
}

/// Whether `name` appears as a bare token on the stored line.
pub fn has_flag(name: &str) -> bool {
    flag_in(current(), name)
}

/// The value of a `name=value` token on the stored line.
pub fn value_of(name: &str) -> Option<&'static str> {
    value_in(current(), name)
}

/// Whether `name` appears as a bare token in `line`.
pub fn flag_in(line: &str, name: &str) -> bool {
    line.split_whitespace().any(|token| token == name)
}

/// The value of a `name=value` token in `line`.
pub fn value_in<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.split_whitespace().find_map(|token| {
        let (key, value) = token.split_once('=')?;
        if key == name {
            Some(value)
        } else {
            None
        }
    })
}
