//! Fatal-error sink
//!
//! The one-way door: disable interrupts, describe what happened on every
//! sink that might still work, and halt forever.
//!
//! Nothing here trusts the rest of the kernel. The formatter below is a
//! deliberate, tiny duplicate of the console's (`%s` `%d` `%u` `%x`, width
//! digits skipped): it uses only stack buffers and per-byte writes, the
//! serial path bypasses the console locks, and the VGA path writes the text
//! buffer directly. A panic raised from a corrupted heap or a half-held lock
//! still reaches the operator.

use crate::console::{CharSink, Value};
use crate::interrupts::InterruptFrame;
use crate::{arch, serial};

const BANNER: &str = "================================================================\n";
const TITLE: &str = "                         KERNEL PANIC\n";

/// Serial bytes without locks: straight port polling.
struct SerialOut;

impl CharSink for SerialOut {
    fn put_char(&mut self, byte: u8) {
        serial::write_byte_raw(byte);
    }
}

/// Direct VGA writes from the top of the screen, white on red, no locks and
/// no scrolling; a panic overwrites whatever was displayed.
#[cfg(all(target_arch = "x86", not(feature = "std")))]
struct VgaOut {
    row: usize,
    col: usize,
}

#[cfg(all(target_arch = "x86", not(feature = "std")))]
impl VgaOut {
    const ATTR_PANIC: u16 = 0x4F00; // white on red

    fn new() -> Self {
        VgaOut { row: 0, col: 0 }
    }
}

#[cfg(all(target_arch = "x86", not(feature = "std")))]
impl CharSink for VgaOut {
    fn put_char(&mut self, byte: u8) {
        if byte == b'\n' {
            self.col = 0;
            self.row += 1;
            return;
        }
        if self.row >= 25 {
            return;
        }
        let cell = (0xB8000 + (self.row * 80 + self.col) * 2) as *mut u16;
        unsafe { core::ptr::write_volatile(cell, Self::ATTR_PANIC | u16::from(byte)) };
        self.col += 1;
        if self.col == 80 {
            self.col = 0;
            self.row += 1;
        }
    }
}

fn put_str(out: &mut dyn CharSink, s: &str) {
    for byte in s.bytes() {
        out.put_char(byte);
    }
}

fn put_unsigned(out: &mut dyn CharSink, mut value: u64, base: u64) {
    let digits = b"0123456789abcdef";
    let mut scratch = [0u8; 20];
    let mut used = 0;
    loop {
        scratch[used] = digits[(value % base) as usize];
        used += 1;
        value /= base;
        if value == 0 {
            break;
        }
    }
    while used > 0 {
        used -= 1;
        out.put_char(scratch[used]);
    }
}

/// The self-contained formatter: `%s` `%d` `%u` `%x`, digit runs after `%`
/// skipped, `%%` literal, anything else emitted verbatim.
fn emit(out: &mut dyn CharSink, fmt: &str, args: &[Value]) {
    let bytes = fmt.as_bytes();
    let mut next_arg = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.put_char(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i >= bytes.len() {
            out.put_char(b'%');
            break;
        }
        let conv = bytes[i];
        i += 1;
        if conv == b'%' {
            out.put_char(b'%');
            continue;
        }
        let arg = args.get(next_arg).copied();
        next_arg += 1;
        match (conv, arg) {
            (b's', Some(Value::Str(Some(s)))) => put_str(out, s),
            (b's', Some(_)) => put_str(out, "(null)"),
            (b'd', Some(value)) => {
                let signed = match value {
                    Value::Int(i) => i as i64,
                    Value::Uint(u) => u as i64,
                    Value::Char(c) => c as i64,
                    Value::Ptr(p) => p as i64,
                    Value::Str(_) => 0,
                };
                if signed < 0 {
                    out.put_char(b'-');
                    put_unsigned(out, (signed as u64).wrapping_neg(), 10);
                } else {
                    put_unsigned(out, signed as u64, 10);
                }
            }
            (b'u', Some(value)) => put_unsigned(out, raw(value), 10),
            (b'x', Some(value)) => put_unsigned(out, raw(value), 16),
            (b's' | b'd' | b'u' | b'x', None) => {}
            (other, _) => {
                out.put_char(b'%');
                out.put_char(other);
            }
        }
    }
}

fn raw(value: Value) -> u64 {
    match value {
        Value::Str(_) => 0,
        Value::Char(c) => c as u64,
        Value::Int(i) => i as u32 as u64,
        Value::Uint(u) => u as u64,
        Value::Ptr(p) => p as u64,
    }
}

fn write_report(
    out: &mut dyn CharSink,
    file: &str,
    line: u32,
    fmt: &str,
    args: &[Value],
    frame: Option<&InterruptFrame>,
    full_dump: bool,
) {
    put_str(out, "\n");
    put_str(out, BANNER);
    put_str(out, TITLE);
    put_str(out, BANNER);
    put_str(out, "Location: ");
    put_str(out, file);
    out.put_char(b':');
    put_unsigned(out, u64::from(line), 10);
    put_str(out, "\nMessage: ");
    emit(out, fmt, args);
    put_str(out, "\n");

    if let Some(frame) = frame {
        if full_dump {
            emit(
                out,
                "Registers:\n  EAX=%x EBX=%x ECX=%x EDX=%x\n  ESI=%x EDI=%x EBP=%x ESP=%x\n",
                &[
                    Value::Ptr(frame.eax),
                    Value::Ptr(frame.ebx),
                    Value::Ptr(frame.ecx),
                    Value::Ptr(frame.edx),
                    Value::Ptr(frame.esi),
                    Value::Ptr(frame.edi),
                    Value::Ptr(frame.ebp),
                    Value::Ptr(frame.esp),
                ],
            );
            emit(
                out,
                "  EIP=%x EFLAGS=%x\n  CS=%x DS=%x SS=%x USERESP=%x\n  VEC=%u ERR=%x\n",
                &[
                    Value::Ptr(frame.eip),
                    Value::Ptr(frame.eflags),
                    Value::Ptr(frame.cs),
                    Value::Ptr(frame.ds),
                    Value::Ptr(frame.ss),
                    Value::Ptr(frame.useresp),
                    Value::Ptr(frame.vector),
                    Value::Ptr(frame.err_code),
                ],
            );
        } else {
            emit(
                out,
                "EIP=%x ESP=%x\n",
                &[Value::Ptr(frame.eip), Value::Ptr(frame.esp)],
            );
        }
    }
    put_str(out, BANNER);
}

fn panic_common(
    file: &str,
    line: u32,
    fmt: &str,
    args: &[Value],
    frame: Option<&InterruptFrame>,
) -> ! {
    arch::disable_interrupts();

    write_report(&mut SerialOut, file, line, fmt, args, frame, true);
    #[cfg(all(target_arch = "x86", not(feature = "std")))]
    write_report(&mut VgaOut::new(), file, line, fmt, args, frame, false);

    #[cfg(feature = "std")]
    {
        // Hosted: surface as an ordinary panic so tests can observe it.
        let mut buf = [0u8; 256];
        let len = {
            let mut sink = crate::console::BufferSink::new(&mut buf);
            emit(&mut sink, fmt, args);
            sink.written()
        };
        let message = core::str::from_utf8(&buf[..len]).unwrap_or("?");
        panic!("kernel panic at {}:{}: {}", file, line, message);
    }
    #[cfg(not(feature = "std"))]
    loop {
        arch::halt();
    }
}

/// Fatal error without CPU state. Emits the report everywhere and halts.
pub fn panic(file: &str, line: u32, fmt: &str, args: &[Value]) -> ! {
    panic_common(file, line, fmt, args, None)
}

/// Fatal error with the interrupt frame: full register dump on the serial
/// sink, instruction/stack pointer summary on the screen.
pub fn panic_with_regs(
    file: &str,
    line: u32,
    frame: &InterruptFrame,
    fmt: &str,
    args: &[Value],
) -> ! {
    panic_common(file, line, fmt, args, Some(frame))
}

/// Fatal error at the call site, printf-style.
#[macro_export]
macro_rules! kpanic {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::panic::panic(file!(), line!(), $fmt, &[$($arg),*])
    };
}

/// Fatal error at the call site with a register dump.
#[macro_export]
macro_rules! kpanic_regs {
    ($frame:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::panic::panic_with_regs(file!(), line!(), $frame, $fmt, &[$($arg),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferSink;

    fn report(fmt: &str, args: &[Value], frame: Option<&InterruptFrame>, full: bool) -> String {
        let mut buf = [0u8; 1024];
        let len = {
            let mut sink = BufferSink::new(&mut buf);
            write_report(&mut sink, "src/lib.rs", 42, fmt, args, frame, full);
            sink.written()
        };
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }

    #[test]
    fn report_carries_banner_location_and_message() {
        let text = report(
            "Test panic - this is intentional (value: %d)",
            &[Value::Int(42)],
            None,
            true,
        );
        assert!(text.contains(BANNER));
        assert!(text.contains("KERNEL PANIC"));
        assert!(text.contains("Location: src/lib.rs:42"));
        assert!(text.contains("Message: Test panic - this is intentional (value: 42)"));
        // Closing banner after the message.
        let closing = text.rfind(BANNER).unwrap();
        let message = text.find("Message:").unwrap();
        assert!(closing > message);
    }

    #[test]
    fn full_dump_lists_registers_vector_and_error_code() {
        let frame = InterruptFrame {
            eax: 0x1111,
            ebx: 0x2222,
            ebp: 0x3333,
            esp: 0x4444,
            eip: 0x10_0042,
            eflags: 0x202,
            cs: 0x08,
            ds: 0x10,
            vector: 14,
            err_code: 0,
            ..Default::default()
        };
        let text = report("Page Fault at 0x%x", &[Value::Uint(0xDEAD_BEEF)], Some(&frame), true);
        assert!(text.contains("Message: Page Fault at 0xdeadbeef"));
        assert!(text.contains("EAX=1111"));
        assert!(text.contains("EBP=3333"));
        assert!(text.contains("EIP=100042"));
        assert!(text.contains("CS=8 DS=10"));
        assert!(text.contains("VEC=14 ERR=0"));
    }

    #[test]
    fn summary_dump_is_just_instruction_and_stack_pointer() {
        let frame = InterruptFrame {
            eip: 0xABCD,
            esp: 0x1234,
            eax: 0x77,
            ..Default::default()
        };
        let text = report("boom", &[], Some(&frame), false);
        assert!(text.contains("EIP=abcd ESP=1234"));
        assert!(!text.contains("EAX"));
    }

    #[test]
    fn stack_formatter_subset_behaves() {
        let mut buf = [0u8; 128];
        let len = {
            let mut sink = BufferSink::new(&mut buf);
            emit(
                &mut sink,
                "%s %d %u %08x %% %q",
                &[
                    Value::Str(Some("ok")),
                    Value::Int(-5),
                    Value::Uint(9),
                    Value::Uint(0xFF),
                ],
            );
            sink.written()
        };
        assert_eq!(core::str::from_utf8(&buf[..len]).unwrap(), "ok -5 9 ff % %q");
    }

    #[test]
    fn hosted_panic_reaches_the_serial_sink() {
        crate::serial::enable();
        let _ = crate::serial::take_captured();

        let result = std::panic::catch_unwind(|| {
            panic("src/selftest.rs", 7, "Test panic - this is intentional (value: %d)", &[
                Value::Int(42),
            ]);
        });
        assert!(result.is_err(), "panic is absorbing");

        let transcript = String::from_utf8_lossy(&crate::serial::take_captured()).into_owned();
        assert!(transcript.contains("KERNEL PANIC"));
        assert!(transcript.contains("Location: src/selftest.rs:7"));
        assert!(transcript.contains("Message: Test panic - this is intentional (value: 42)"));
        crate::serial::disable();
    }
}
