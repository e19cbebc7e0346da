//! Diagnostic console
//!
//! Every subsystem reports through here. The console is built around a single
//! polymorphic abstraction, [`CharSink`]: anything that can accept one byte at
//! a time. The same formatting code therefore drives the VGA text buffer, the
//! serial port, and plain in-memory buffers, and fatal paths can format
//! without touching the heap.
//!
//! The formatter understands a printf-style subset: `%s` `%c` `%d` `%u` `%x`
//! `%X` `%p` `%%`. Width and precision digits after `%` are accepted and
//! skipped so common forms like `%08x` do not desynchronize the argument
//! stream. Unknown specifiers are emitted verbatim.

use core::fmt;

/// A byte-at-a-time output device.
///
/// Implementors only provide `put_char`; cursor state, scrolling and the like
/// are theirs to manage.
pub trait CharSink {
    fn put_char(&mut self, byte: u8);
}

/// One formatting argument.
///
/// The conversion character picks the rendering; the variant carries the
/// value. Numeric variants are coerced as needed, so `%x` on an `Int` prints
/// its bit pattern rather than garbage.
#[derive(Clone, Copy)]
pub enum Value<'a> {
    /// Byte string for `%s`. `None` renders as `(null)`.
    Str(Option<&'a str>),
    /// Single character for `%c`.
    Char(u8),
    /// Signed integer for `%d`.
    Int(i32),
    /// Unsigned integer for `%u` / `%x` / `%X`.
    Uint(u32),
    /// Pointer-sized value for `%p`.
    Ptr(usize),
}

impl<'a> Value<'a> {
    fn as_unsigned(&self) -> u64 {
        match *self {
            Value::Str(_) => 0,
            Value::Char(c) => c as u64,
            Value::Int(i) => i as u32 as u64,
            Value::Uint(u) => u as u64,
            Value::Ptr(p) => p as u64,
        }
    }

    fn as_signed(&self) -> i64 {
        match *self {
            Value::Str(_) => 0,
            Value::Char(c) => c as i64,
            Value::Int(i) => i as i64,
            Value::Uint(u) => u as i64,
            Value::Ptr(p) => p as i64,
        }
    }
}

/// Counts every byte pushed through to the underlying sink.
struct Counting<'a> {
    inner: &'a mut dyn CharSink,
    written: usize,
}

impl<'a> Counting<'a> {
    fn put(&mut self, byte: u8) {
        self.inner.put_char(byte);
        self.written += 1;
    }

    fn put_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.put(byte);
        }
    }

    fn put_unsigned(&mut self, mut value: u64, base: u64, upper: bool) {
        let digits: &[u8; 16] = if upper {
            b"0123456789ABCDEF"
        } else {
            b"0123456789abcdef"
        };
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
            self.put(scratch[used]);
        }
    }

    fn put_signed(&mut self, value: i64) {
        if value < 0 {
            self.put(b'-');
            // Negate in u64 space so i64::MIN survives.
            self.put_unsigned((value as u64).wrapping_neg(), 10, false);
        } else {
            self.put_unsigned(value as u64, 10, false);
        }
    }
}

/// Drive `sink` with `fmt` and `args`, returning the byte count written.
pub fn format(sink: &mut dyn CharSink, fmt: &str, args: &[Value]) -> usize {
    let mut out = Counting {
        inner: sink,
        written: 0,
    };
    let bytes = fmt.as_bytes();
    let mut next_arg = 0;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte != b'%' {
            out.put(byte);
            i += 1;
            continue;
        }

        // Skip width digits; they are accepted but not honored.
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i >= bytes.len() {
            out.put(b'%');
            break;
        }

        let conv = bytes[i];
        i += 1;
        if conv == b'%' {
            out.put(b'%');
            continue;
        }

        let arg = if next_arg < args.len() {
            let value = args[next_arg];
            next_arg += 1;
            Some(value)
        } else {
            None
        };

        match (conv, arg) {
            (b's', Some(Value::Str(Some(s)))) => out.put_str(s),
            (b's', Some(Value::Str(None))) => out.put_str("(null)"),
            (b's', Some(_)) => out.put_str("(null)"),
            (b'c', Some(value)) => out.put(value.as_unsigned() as u8),
            (b'd', Some(value)) => out.put_signed(value.as_signed()),
            (b'u', Some(value)) => out.put_unsigned(value.as_unsigned(), 10, false),
            (b'x', Some(value)) => out.put_unsigned(value.as_unsigned(), 16, false),
            (b'X', Some(value)) => out.put_unsigned(value.as_unsigned(), 16, true),
            (b'p', Some(value)) => {
                out.put_str("0x");
                out.put_unsigned(value.as_unsigned(), 16, false);
            }
            (b's' | b'c' | b'd' | b'u' | b'x' | b'X' | b'p', None) => {}
            (other, _) => {
                // Unknown specifier: emit it verbatim.
                out.put(b'%');
                out.put(other);
            }
        }
    }

    out.written
}

/// A sink backed by a caller-provided byte buffer.
///
/// Bytes past the end of the buffer are dropped; the caller owns sizing.
pub struct BufferSink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BufferSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        BufferSink { buf, pos: 0 }
    }

    /// Bytes stored so far.
    pub fn written(&self) -> usize {
        self.pos
    }

    /// The filled prefix of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// The filled prefix as text (for diagnostics; the buffer holds what the
    /// formatter produced, which is ASCII).
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }
}

impl<'a> CharSink for BufferSink<'a> {
    fn put_char(&mut self, byte: u8) {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
        }
    }
}

impl<'a> fmt::Write for BufferSink<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.put_char(byte);
        }
        Ok(())
    }
}

/// Format into `buf`, NUL-terminating after the written bytes.
///
/// Returns the count written, excluding the terminator. The terminator is
/// dropped if the buffer is exactly full.
pub fn format_into(buf: &mut [u8], fmt: &str, args: &[Value]) -> usize {
    let written = {
        let mut sink = BufferSink::new(buf);
        format(&mut sink, fmt, args)
    };
    let stored = written.min(buf.len());
    if stored < buf.len() {
        buf[stored] = 0;
    }
    stored
}

// ---------------------------------------------------------------------------
// Global console
// ---------------------------------------------------------------------------

/// Writer that fans bytes out to every active boot console: the VGA text
/// buffer, plus the serial port once `earlycon` has enabled it.
pub struct KernelWriter;

impl CharSink for KernelWriter {
    fn put_char(&mut self, byte: u8) {
        #[cfg(all(target_arch = "x86", not(feature = "std")))]
        crate::vga::write_byte(byte);
        crate::serial::write_byte(byte);
    }
}

impl fmt::Write for KernelWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.put_char(byte);
        }
        Ok(())
    }
}

/// printf-style entry to the boot consoles. Returns bytes written.
pub fn printf(fmt_str: &str, args: &[Value]) -> usize {
    #[cfg(feature = "std")]
    {
        let mut buf = [0u8; 512];
        let mut sink = BufferSink::new(&mut buf);
        let written = format(&mut sink, fmt_str, args);
        print!("{}", sink.as_str());
        written
    }
    #[cfg(not(feature = "std"))]
    {
        crate::arch::without_interrupts(|| format(&mut KernelWriter, fmt_str, args))
    }
}

/// Internal print entry used by the `kprint!`/`kprintln!` macros.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(feature = "std")]
    {
        print!("{}", args);
    }
    #[cfg(not(feature = "std"))]
    {
        use core::fmt::Write;
        crate::arch::without_interrupts(|| {
            KernelWriter.write_fmt(args).ok();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(fmt: &str, args: &[Value]) -> (String, usize) {
        let mut buf = [0u8; 256];
        let mut sink = BufferSink::new(&mut buf);
        let count = format(&mut sink, fmt, args);
        (sink.as_str().to_string(), count)
    }

    #[test]
    fn plain_text_passes_through() {
        let (text, count) = render("hello, kernel", &[]);
        assert_eq!(text, "hello, kernel");
        assert_eq!(count, 13);
    }

    #[test]
    fn signed_and_unsigned_decimals() {
        let (text, _) = render("%d %d %u", &[Value::Int(-42), Value::Int(0), Value::Uint(7)]);
        assert_eq!(text, "-42 0 7");
    }

    #[test]
    fn hex_and_pointer_forms() {
        let (text, _) = render(
            "%x %X %p",
            &[Value::Uint(0xBEEF), Value::Uint(0xBEEF), Value::Ptr(0x1000)],
        );
        assert_eq!(text, "beef BEEF 0x1000");
    }

    #[test]
    fn width_digits_are_skipped() {
        let (text, _) = render("%08x", &[Value::Uint(0xAB)]);
        assert_eq!(text, "ab");
    }

    #[test]
    fn null_string_is_spelled_out() {
        let (text, _) = render("[%s]", &[Value::Str(None)]);
        assert_eq!(text, "[(null)]");
    }

    #[test]
    fn percent_escape_and_unknown_specifier() {
        let (text, _) = render("100%% %q", &[]);
        assert_eq!(text, "100% %q");
    }

    #[test]
    fn char_conversion() {
        let (text, _) = render("%c%c", &[Value::Char(b'o'), Value::Char(b'k')]);
        assert_eq!(text, "ok");
    }

    #[test]
    fn missing_arguments_render_nothing() {
        let (text, _) = render("a%db", &[]);
        assert_eq!(text, "ab");
    }

    #[test]
    fn count_matches_output_length() {
        let (text, count) = render("%s=%u", &[Value::Str(Some("ticks")), Value::Uint(100)]);
        assert_eq!(count, text.len());
    }

    #[test]
    fn buffer_variant_nul_terminates() {
        let mut buf = [0xFFu8; 16];
        let written = format_into(&mut buf, "%s", &[Value::Str(Some("boot"))]);
        assert_eq!(written, 4);
        assert_eq!(&buf[..5], b"boot\0");
    }

    #[test]
    fn buffer_variant_truncates_at_capacity() {
        let mut buf = [0u8; 4];
        let written = format_into(&mut buf, "overflow", &[]);
        assert_eq!(written, 4);
        assert_eq!(&buf, b"over");
    }

    #[test]
    fn trailing_percent_is_emitted() {
        let (text, _) = render("odd%", &[]);
        assert_eq!(text, "odd%");
    }
}
