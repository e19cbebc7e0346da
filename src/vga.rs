//! VGA text-mode sink
//!
//! 80x25 character cells at physical 0xB8000, light grey on black. Writes go
//! through the `volatile` crate so the compiler cannot elide or reorder them
//! behind the memory-mapped hardware's back.

#![cfg(all(target_arch = "x86", not(feature = "std")))]

use crate::console::CharSink;
use core::ptr::NonNull;
use spin::Mutex;
use volatile::VolatilePtr;

const BUFFER_ADDR: usize = 0xB8000;
const WIDTH: usize = 80;
const HEIGHT: usize = 25;

/// Light grey foreground on black background.
const ATTR_NORMAL: u8 = 0x07;

/// Cursor state for the text buffer.
pub struct VgaWriter {
    row: usize,
    col: usize,
    attr: u8,
}

impl VgaWriter {
    const fn new() -> Self {
        VgaWriter {
            row: 0,
            col: 0,
            attr: ATTR_NORMAL,
        }
    }

    fn cell(row: usize, col: usize) -> VolatilePtr<'static, u16> {
        let ptr = (BUFFER_ADDR + (row * WIDTH + col) * 2) as *mut u16;
        unsafe { VolatilePtr::new(NonNull::new_unchecked(ptr)) }
    }

    fn put_at(&self, row: usize, col: usize, byte: u8) {
        Self::cell(row, col).write(u16::from(byte) | (u16::from(self.attr) << 8));
    }

    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.col = 0;
                self.row += 1;
            }
            b'\r' => self.col = 0,
            _ => {
                self.put_at(self.row, self.col, byte);
                self.col += 1;
                if self.col == WIDTH {
                    self.col = 0;
                    self.row += 1;
                }
            }
        }
        if self.row == HEIGHT {
            self.scroll();
            self.row = HEIGHT - 1;
        }
    }

    /// Move every row up by one and blank the bottom line.
    fn scroll(&mut self) {
        for row in 1..HEIGHT {
            for col in 0..WIDTH {
                let value = Self::cell(row, col).read();
                Self::cell(row - 1, col).write(value);
            }
        }
        for col in 0..WIDTH {
            self.put_at(HEIGHT - 1, col, b' ');
        }
    }

    pub fn clear(&mut self) {
        for row in 0..HEIGHT {
            for col in 0..WIDTH {
                self.put_at(row, col, b' ');
            }
        }
        self.row = 0;
        self.col = 0;
    }
}

impl CharSink for VgaWriter {
    fn put_char(&mut self, byte: u8) {
        self.write_byte(byte);
    }
}

static WRITER: Mutex<VgaWriter> = Mutex::new(VgaWriter::new());

/// Blank the screen and home the cursor.
pub fn init() {
    WRITER.lock().clear();
}

/// Put one byte on screen at the current cursor.
pub fn write_byte(byte: u8) {
    WRITER.lock().write_byte(byte);
}
