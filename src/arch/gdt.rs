//! Global descriptor table
//!
//! Flat 4 GiB ring-0 code and data segments - paging does the real work.
//! Every segment here has base zero, so descriptors reduce to a limit, an
//! access byte, and the flag nibble, packed once at compile time into their
//! 64-bit wire format. Loading happens once at boot; the far return reloads
//! CS, the moves reload the rest.

#![cfg(all(target_arch = "x86", not(feature = "std")))]

use core::arch::asm;

/// Present, ring 0, code segment, executable, readable.
const ACCESS_KERNEL_CODE: u8 = 0x9A;
/// Present, ring 0, data segment, writable.
const ACCESS_KERNEL_DATA: u8 = 0x92;
/// 4 KiB granularity, 32-bit operation size.
const FLAGS_PAGE_32BIT: u8 = 0xC;

/// A segment descriptor in the packed form the CPU consumes.
///
/// Bit layout: limit 15:0 in bits 0-15, base 23:0 in bits 16-39, access
/// byte in bits 40-47, limit 19:16 in bits 48-51, flag nibble in bits
/// 52-55, base 31:24 in bits 56-63. Only base-zero segments exist here, so
/// the base contributions are simply absent.
#[repr(transparent)]
#[derive(Clone, Copy)]
struct SegmentDescriptor(u64);

impl SegmentDescriptor {
    const fn null() -> Self {
        SegmentDescriptor(0)
    }

    /// Pack a flat (base-zero) segment from its limit, access byte, and
    /// flag nibble.
    const fn flat(limit: u32, access: u8, flags: u8) -> Self {
        let word = (limit as u64 & 0xFFFF)
            | ((access as u64) << 40)
            | ((limit as u64 >> 16 & 0xF) << 48)
            | ((flags as u64 & 0xF) << 52);
        SegmentDescriptor(word)
    }
}

/// Null descriptor, kernel code at selector 0x08, kernel data at 0x10.
static GDT: [SegmentDescriptor; 3] = [
    SegmentDescriptor::null(),
    SegmentDescriptor::flat(0xFFFFF, ACCESS_KERNEL_CODE, FLAGS_PAGE_32BIT),
    SegmentDescriptor::flat(0xFFFFF, ACCESS_KERNEL_DATA, FLAGS_PAGE_32BIT),
];

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Load the table and reload every segment register.
pub fn init() {
    let pointer = GdtPointer {
        limit: (core::mem::size_of_val(&GDT) - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    unsafe {
        asm!(
            "lgdt [{ptr}]",
            "mov ax, 0x10",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            // Far return to reload CS with the new code selector.
            "push 0x08",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            ptr = in(reg) &pointer,
            out("eax") _,
        );
    }
}
