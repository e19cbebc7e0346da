//! Virtual memory mapper
//!
//! Owns the kernel page directory and the page tables hanging off it. Two
//! levels, 1024 entries each; an entry's high 20 bits are the frame number
//! and the low bits are [`PageFlags`].
//!
//! Paging structures are reached through a *physical window*: a constant
//! offset added to a physical address to get a dereferenceable pointer. On
//! the identity-mapped kernel that offset is zero; hosted tests point it at
//! an arena instead. Tables must therefore come from frames the window
//! covers - on hardware that means below the identity-mapped 4 MiB, which
//! first-fit allocation guarantees in practice.

use super::frames::FrameAllocator;
use super::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::arch;
use bitflags::bitflags;
use spin::Mutex;

/// Entries per directory or table.
pub const TABLE_ENTRIES: usize = 1024;

const ENTRY_ADDR_MASK: u32 = 0xFFFF_F000;

bitflags! {
    /// Low bits of a directory or table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
    }
}

impl PageFlags {
    /// The flags fresh page tables are installed with.
    pub const KERNEL_RW: PageFlags = PageFlags::PRESENT.union(PageFlags::WRITABLE);
}

/// A 4 KiB array of entries; both levels share the shape.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [u32; TABLE_ENTRIES],
}

/// Failure modes of `map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No frame available for a new page table.
    OutOfFrames,
}

/// The kernel's page directory plus the window used to reach tables.
pub struct Mapper {
    directory: PhysAddr,
    window: usize,
}

// Raw table pointers are only followed under the owning lock.
unsafe impl Send for Mapper {}

impl Mapper {
    /// Allocate and zero a fresh directory.
    ///
    /// # Safety
    ///
    /// `window + frame` must be dereferenceable for every frame `frames` can
    /// return.
    pub unsafe fn new(frames: &mut FrameAllocator, window: usize) -> Option<Mapper> {
        let directory = frames.alloc()?;
        let mapper = Mapper { directory, window };
        mapper.zero_table(directory);
        Some(mapper)
    }

    pub fn directory(&self) -> PhysAddr {
        self.directory
    }

    fn table_at(&self, phys: PhysAddr) -> *mut PageTable {
        (self.window + phys.as_usize()) as *mut PageTable
    }

    unsafe fn zero_table(&self, phys: PhysAddr) {
        let table = self.table_at(phys);
        for entry in (*table).entries.iter_mut() {
            *entry = 0;
        }
    }

    /// Map `virt` to `phys` with `flags`, creating the page table on demand.
    ///
    /// The table entry becomes `flags | page-aligned physical address`, and
    /// the TLB entry for `virt` is invalidated.
    ///
    /// # Safety
    ///
    /// Remapping memory the kernel is currently executing from or pointing
    /// into is the caller's responsibility to avoid.
    pub unsafe fn map(
        &mut self,
        frames: &mut FrameAllocator,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let directory = self.table_at(self.directory);
        let slot = &mut (*directory).entries[virt.directory_index()];

        let table_phys = if *slot & PageFlags::PRESENT.bits() != 0 {
            PhysAddr::new((*slot & ENTRY_ADDR_MASK) as usize)
        } else {
            let fresh = frames.alloc().ok_or(MapError::OutOfFrames)?;
            self.zero_table(fresh);
            *slot = (fresh.as_usize() as u32 & ENTRY_ADDR_MASK) | PageFlags::KERNEL_RW.bits();
            fresh
        };

        let table = self.table_at(table_phys);
        (*table).entries[virt.table_index()] =
            (phys.as_usize() as u32 & ENTRY_ADDR_MASK) | flags.bits();
        arch::flush_tlb_entry(virt.as_usize());
        Ok(())
    }

    /// Clear the mapping for `virt`, if any, and invalidate its TLB entry.
    ///
    /// # Safety
    ///
    /// Same contract as [`Mapper::map`].
    pub unsafe fn unmap(&mut self, virt: VirtAddr) {
        let directory = self.table_at(self.directory);
        let entry = (*directory).entries[virt.directory_index()];
        if entry & PageFlags::PRESENT.bits() == 0 {
            return;
        }
        let table = self.table_at(PhysAddr::new((entry & ENTRY_ADDR_MASK) as usize));
        (*table).entries[virt.table_index()] = 0;
        arch::flush_tlb_entry(virt.as_usize());
    }

    /// Walk the tables: the physical address backing `virt`, or `None` if
    /// any level lacks the present bit.
    ///
    /// # Safety
    ///
    /// The directory and its tables must be reachable through the window.
    pub unsafe fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let directory = self.table_at(self.directory);
        let dir_entry = (*directory).entries[virt.directory_index()];
        if dir_entry & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        let table = self.table_at(PhysAddr::new((dir_entry & ENTRY_ADDR_MASK) as usize));
        let entry = (*table).entries[virt.table_index()];
        if entry & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some(PhysAddr::new(
            (entry & ENTRY_ADDR_MASK) as usize | virt.page_offset(),
        ))
    }

    /// Identity-map the first 4 MiB read-write, one page at a time.
    ///
    /// # Safety
    ///
    /// Same contract as [`Mapper::map`].
    pub unsafe fn identity_map_low(&mut self, frames: &mut FrameAllocator) -> Result<(), MapError> {
        for page in 0..TABLE_ENTRIES {
            let addr = page * PAGE_SIZE;
            self.map(
                frames,
                VirtAddr::new(addr),
                PhysAddr::new(addr),
                PageFlags::KERNEL_RW,
            )?;
        }
        Ok(())
    }
}

static MAPPER: Mutex<Option<Mapper>> = Mutex::new(None);

fn with_mapper<R>(f: impl FnOnce(&mut Mapper) -> R) -> Option<R> {
    arch::without_interrupts(|| MAPPER.lock().as_mut().map(f))
}

/// Build the kernel directory, identity-map low memory, and switch paging on.
///
/// # Safety
///
/// Must run once, after the frame allocator is up, before anything relies on
/// virtual addresses outside the identity map.
#[cfg(all(target_arch = "x86", not(feature = "std")))]
pub unsafe fn init() {
    let mapper = super::frames::with_global(|frames| {
        let mut mapper = Mapper::new(frames, 0).expect("out of frames building page directory");
        mapper
            .identity_map_low(frames)
            .expect("out of frames identity-mapping low memory");
        mapper
    });
    let directory = mapper.directory();
    *MAPPER.lock() = Some(mapper);
    arch::load_page_directory(directory.as_usize());
    arch::enable_paging();
}

/// Map one page through the global mapper.
pub fn map(virt: VirtAddr, phys: PhysAddr, flags: PageFlags) -> Result<(), MapError> {
    super::frames::with_global(|frames| {
        with_mapper(|mapper| unsafe { mapper.map(frames, virt, phys, flags) })
            .unwrap_or(Err(MapError::OutOfFrames))
    })
}

/// Unmap one page through the global mapper.
pub fn unmap(virt: VirtAddr) {
    with_mapper(|mapper| unsafe { mapper.unmap(virt) });
}

/// Translate through the global mapper.
pub fn translate(virt: VirtAddr) -> Option<PhysAddr> {
    with_mapper(|mapper| unsafe { mapper.translate(virt) }).flatten()
}

/// Physical address of the kernel page directory, once paging is up.
pub fn kernel_directory() -> PhysAddr {
    with_mapper(|mapper| mapper.directory()).unwrap_or(PhysAddr::NULL)
}

/// Handler for CPU vector 14. With no demand paging there is nothing to
/// recover; decode the error code and report where the access went wrong.
///
/// Error code: bit 0 set means a protection violation (clear: the page was
/// not present), bit 1 set means the access was a write.
pub fn page_fault_handler(frame: &mut crate::interrupts::InterruptFrame) {
    let address = arch::fault_address();
    let action = if frame.err_code & 0x2 != 0 { "Write" } else { "Read" };
    let kind = if frame.err_code & 0x1 != 0 {
        "protected"
    } else {
        "non-present"
    };
    crate::kpanic_regs!(
        frame,
        "Page Fault at 0x%x - %s from %s page",
        crate::console::Value::Uint(address as u32),
        crate::console::Value::Str(Some(action)),
        crate::console::Value::Str(Some(kind))
    );
}
