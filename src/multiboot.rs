//! Multiboot 1 boot information
//!
//! Read-only views over the structures the bootloader leaves in memory: the
//! info block, the optional BIOS memory map, and the optional command line.
//! Records in the memory map are self-sized - each entry's `size` field
//! excludes the field itself, so the iterator steps by `size + 4`.

use bitflags::bitflags;

/// Magic the bootloader hands the kernel entry in a register.
pub const BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Memory-map record type for RAM the kernel may use.
pub const REGION_AVAILABLE: u32 = 1;

bitflags! {
    /// Validity bits for the fields of [`BootInfo`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoFlags: u32 {
        const MEMORY      = 1 << 0;
        const BOOT_DEVICE = 1 << 1;
        const CMDLINE     = 1 << 2;
        const MODULES     = 1 << 3;
        const SYMS_AOUT   = 1 << 4;
        const SYMS_ELF    = 1 << 5;
        const MEMORY_MAP  = 1 << 6;
    }
}

/// The Multiboot 1 information block, as laid out by the bootloader.
#[repr(C)]
pub struct BootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

/// One record of the BIOS memory map. Packed: the bootloader does not align
/// the 64-bit fields.
#[repr(C, packed)]
pub struct MmapEntry {
    pub size: u32,
    pub addr: u64,
    pub len: u64,
    pub kind: u32,
}

/// An unpacked memory-map record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub len: u64,
    pub kind: u32,
}

impl Region {
    pub fn is_available(&self) -> bool {
        self.kind == REGION_AVAILABLE
    }

    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Walks the memory-map records between `addr` and `addr + length`.
#[derive(Clone)]
pub struct MemoryMapIter {
    cursor: usize,
    end: usize,
}

impl MemoryMapIter {
    /// # Safety
    ///
    /// `addr..addr + length` must hold valid Multiboot memory-map records.
    pub unsafe fn new(addr: usize, length: usize) -> Self {
        MemoryMapIter {
            cursor: addr,
            end: addr.saturating_add(length),
        }
    }
}

impl Iterator for MemoryMapIter {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        if self.cursor + core::mem::size_of::<MmapEntry>() > self.end {
            return None;
        }
        let entry = unsafe { core::ptr::read_unaligned(self.cursor as *const MmapEntry) };
        if entry.size == 0 {
            // A zero-sized record would never advance; stop instead.
            self.cursor = self.end;
            return None;
        }
        self.cursor += entry.size as usize + 4;
        Some(Region {
            start: entry.addr,
            len: entry.len,
            kind: entry.kind,
        })
    }
}

impl BootInfo {
    pub fn flags(&self) -> InfoFlags {
        InfoFlags::from_bits_truncate(self.flags)
    }

    /// Whether the bootloader supplied a full memory map.
    pub fn has_memory_map(&self) -> bool {
        self.flags().contains(InfoFlags::MEMORY_MAP)
    }

    /// Whether the lower/upper memory fields are valid.
    pub fn has_basic_memory(&self) -> bool {
        self.flags().contains(InfoFlags::MEMORY)
    }

    /// Iterate the BIOS memory map, if one was provided.
    ///
    /// # Safety
    ///
    /// The `mmap_addr`/`mmap_length` fields must point at memory the
    /// bootloader actually filled in.
    pub unsafe fn memory_map(&self) -> Option<MemoryMapIter> {
        if !self.has_memory_map() {
            return None;
        }
        Some(MemoryMapIter::new(
            self.mmap_addr as usize,
            self.mmap_length as usize,
        ))
    }

    /// The NUL-terminated kernel command line, if one was provided.
    ///
    /// # Safety
    ///
    /// The `cmdline` field must point at a NUL-terminated string.
    pub unsafe fn command_line(&self) -> Option<&'static str> {
        if !self.flags().contains(InfoFlags::CMDLINE) || self.cmdline == 0 {
            return None;
        }
        let base = self.cmdline as usize as *const u8;
        let mut len = 0usize;
        // Bounded scan; a line longer than this is a corrupt pointer.
        while len < 4096 && *base.add(len) != 0 {
            len += 1;
        }
        let bytes = core::slice::from_raw_parts(base, len);
        core::str::from_utf8(bytes).ok()
    }
}
