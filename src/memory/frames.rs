//! Physical frame allocator
//!
//! One bit per 4 KiB frame; a set bit means the frame is not available.
//! Counters move only when a bit actually transitions, so redundant releases
//! and reservations are no-ops and `free + used == total` holds at every
//! observation point.
//!
//! At boot every frame starts out used. RAM the BIOS reported as available is
//! then released, and finally low memory plus the kernel image (including the
//! bitmap itself, which lives right after the image) is re-reserved.

use super::{PhysAddr, PAGE_SIZE};
use crate::arch;
use crate::multiboot::Region;
use spin::Mutex;

const BITS_PER_WORD: usize = 32;
const FULL_WORD: u32 = u32::MAX;

/// Bitmap allocator over a contiguous range of physical frames.
pub struct FrameAllocator {
    bitmap: *mut u32,
    total_frames: usize,
    free_frames: usize,
    used_frames: usize,
}

// The bitmap pointer is only touched under the owning lock.
unsafe impl Send for FrameAllocator {}

impl FrameAllocator {
    pub const fn new() -> Self {
        FrameAllocator {
            bitmap: core::ptr::null_mut(),
            total_frames: 0,
            free_frames: 0,
            used_frames: 0,
        }
    }

    /// Words needed to track `frames` frames.
    pub const fn bitmap_words(frames: usize) -> usize {
        (frames + BITS_PER_WORD - 1) / BITS_PER_WORD
    }

    /// Adopt `bitmap` as storage for `total_frames` bits, all marked used.
    ///
    /// # Safety
    ///
    /// `bitmap` must point at `bitmap_words(total_frames)` writable words that
    /// stay valid for the allocator's lifetime.
    pub unsafe fn init_at(&mut self, bitmap: *mut u32, total_frames: usize) {
        self.bitmap = bitmap;
        self.total_frames = total_frames;
        self.free_frames = 0;
        self.used_frames = total_frames;
        for word in 0..Self::bitmap_words(total_frames) {
            self.bitmap.add(word).write(FULL_WORD);
        }
    }

    fn bit_is_set(&self, frame: usize) -> bool {
        let word = unsafe { self.bitmap.add(frame / BITS_PER_WORD).read() };
        word & (1 << (frame % BITS_PER_WORD)) != 0
    }

    fn mark_used(&mut self, frame: usize) {
        if frame >= self.total_frames || self.bit_is_set(frame) {
            return;
        }
        unsafe {
            let slot = self.bitmap.add(frame / BITS_PER_WORD);
            slot.write(slot.read() | 1 << (frame % BITS_PER_WORD));
        }
        self.free_frames -= 1;
        self.used_frames += 1;
    }

    fn mark_free(&mut self, frame: usize) {
        if frame >= self.total_frames || !self.bit_is_set(frame) {
            return;
        }
        unsafe {
            let slot = self.bitmap.add(frame / BITS_PER_WORD);
            slot.write(slot.read() & !(1 << (frame % BITS_PER_WORD)));
        }
        self.free_frames += 1;
        self.used_frames -= 1;
    }

    /// Release every frame lying entirely inside `[start, start + len)`.
    ///
    /// Region math stays in 64 bits: the BIOS map can describe memory above
    /// what a 32-bit `usize` holds, and those frames are simply out of range.
    pub fn release_region(&mut self, start: u64, len: u64) {
        let page = PAGE_SIZE as u64;
        let first = (start + page - 1) / page;
        let last = (start + len) / page;
        let mut frame = first;
        while frame < last && frame < self.total_frames as u64 {
            self.mark_free(frame as usize);
            frame += 1;
        }
    }

    /// Reserve every frame touching `[start, start + len)`.
    pub fn reserve_region(&mut self, start: u64, len: u64) {
        let page = PAGE_SIZE as u64;
        let first = start / page;
        let last = (start + len + page - 1) / page;
        let mut frame = first;
        while frame < last && frame < self.total_frames as u64 {
            self.mark_used(frame as usize);
            frame += 1;
        }
    }

    /// First-fit: the lowest clear bit, or `None` on exhaustion.
    pub fn alloc(&mut self) -> Option<PhysAddr> {
        if self.free_frames == 0 {
            return None;
        }
        for word_index in 0..Self::bitmap_words(self.total_frames) {
            let word = unsafe { self.bitmap.add(word_index).read() };
            if word == FULL_WORD {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let frame = word_index * BITS_PER_WORD + bit;
            if frame >= self.total_frames {
                break;
            }
            self.mark_used(frame);
            return Some(PhysAddr::new(frame * PAGE_SIZE));
        }
        None
    }

    /// Return a frame. Unaligned addresses are silently ignored.
    pub fn free(&mut self, addr: PhysAddr) {
        if !addr.is_page_aligned() {
            return;
        }
        self.mark_free(addr.frame_index());
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    pub fn used_frames(&self) -> usize {
        self.used_frames
    }

    pub fn total_bytes(&self) -> usize {
        self.total_frames * PAGE_SIZE
    }

    pub fn free_bytes(&self) -> usize {
        self.free_frames * PAGE_SIZE
    }

    pub fn used_bytes(&self) -> usize {
        self.used_frames * PAGE_SIZE
    }

    /// Population count over the bitmap; equals `used_frames` by invariant.
    pub fn set_bit_count(&self) -> usize {
        let mut count = 0usize;
        for word_index in 0..Self::bitmap_words(self.total_frames) {
            let mut word = unsafe { self.bitmap.add(word_index).read() };
            // Ignore padding bits past the end of the tracked range.
            let first_frame = word_index * BITS_PER_WORD;
            if first_frame + BITS_PER_WORD > self.total_frames {
                let valid = self.total_frames - first_frame;
                word &= (1u64 << valid).wrapping_sub(1) as u32;
            }
            count += word.count_ones() as usize;
        }
        count
    }
}

/// Frame count implied by the boot information: the highest end address in
/// the memory map when one is present, otherwise lower + upper memory.
pub fn total_frames_for(
    regions: Option<impl Iterator<Item = Region>>,
    mem_upper_kb: u32,
) -> usize {
    match regions {
        Some(iter) => {
            let highest = iter.map(|r| r.end()).max().unwrap_or(0);
            (highest / PAGE_SIZE as u64) as usize
        }
        None => (super::LOW_MEMORY_END + mem_upper_kb as usize * 1024) / PAGE_SIZE,
    }
}

static FRAMES: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

fn with_frames<R>(f: impl FnOnce(&mut FrameAllocator) -> R) -> R {
    arch::without_interrupts(|| f(&mut FRAMES.lock()))
}

/// Allocate one frame from the global pool.
pub fn alloc_frame() -> Option<PhysAddr> {
    with_frames(|frames| frames.alloc())
}

/// Return one frame to the global pool.
pub fn free_frame(addr: PhysAddr) {
    with_frames(|frames| frames.free(addr));
}

pub fn total_bytes() -> usize {
    with_frames(|frames| frames.total_bytes())
}

pub fn free_bytes() -> usize {
    with_frames(|frames| frames.free_bytes())
}

pub fn used_bytes() -> usize {
    with_frames(|frames| frames.used_bytes())
}

/// Run `f` against the global allocator. The paging and heap layers use this
/// when they need frames while already holding their own locks.
pub(crate) fn with_global<R>(f: impl FnOnce(&mut FrameAllocator) -> R) -> R {
    with_frames(f)
}

/// Build the global allocator from the Multiboot information block.
///
/// The bitmap is placed immediately after the kernel image, rounded up to
/// word alignment. Regions the BIOS reported available are released; low
/// memory and the image-plus-bitmap range are reserved.
///
/// # Safety
///
/// Must run once, before paging, with a valid `info` block.
#[cfg(all(target_arch = "x86", not(feature = "std")))]
pub unsafe fn init_from_boot(info: &crate::multiboot::BootInfo) {
    extern "C" {
        static __kernel_start: u8;
        static __kernel_end: u8;
    }
    let kernel_start = &__kernel_start as *const u8 as usize;
    let kernel_end = &__kernel_end as *const u8 as usize;

    let map = info.memory_map();
    let total_frames = total_frames_for(map.clone(), info.mem_upper);

    let bitmap = super::align_up(kernel_end, 4) as *mut u32;
    let bitmap_end = bitmap as usize + FrameAllocator::bitmap_words(total_frames) * 4;

    let mut frames = FRAMES.lock();
    frames.init_at(bitmap, total_frames);
    match map {
        Some(regions) => {
            for region in regions.filter(|r| r.is_available()) {
                frames.release_region(region.start, region.len);
            }
        }
        None => {
            frames.release_region(
                super::LOW_MEMORY_END as u64,
                info.mem_upper as u64 * 1024,
            );
        }
    }
    frames.reserve_region(0, super::LOW_MEMORY_END as u64);
    frames.reserve_region(kernel_start as u64, (bitmap_end - kernel_start) as u64);
}

/// Hosted bring-up: back the global allocator with a leaked, page-aligned
/// arena of `frame_count` frames and release the whole range.
#[cfg(feature = "std")]
pub fn init_hosted_arena(frame_count: usize) {
    use std::alloc::{alloc_zeroed, Layout};

    let words = FrameAllocator::bitmap_words(frame_count);
    let bitmap =
        unsafe { alloc_zeroed(Layout::from_size_align(words * 4, 4).unwrap()) } as *mut u32;
    let mut frames = FRAMES.lock();
    unsafe { frames.init_at(bitmap, frame_count) };
    frames.release_region(0, (frame_count * PAGE_SIZE) as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A little allocator over `frames` synthetic frames, all free.
    fn fixture(frames: usize) -> (FrameAllocator, Vec<u32>) {
        let mut storage = vec![0u32; FrameAllocator::bitmap_words(frames)];
        let mut alloc = FrameAllocator::new();
        unsafe { alloc.init_at(storage.as_mut_ptr(), frames) };
        alloc.release_region(0, (frames * PAGE_SIZE) as u64);
        (alloc, storage)
    }

    #[test]
    fn starts_fully_used_then_releases() {
        let mut storage = vec![0u32; FrameAllocator::bitmap_words(10)];
        let mut alloc = FrameAllocator::new();
        unsafe { alloc.init_at(storage.as_mut_ptr(), 10) };
        assert_eq!(alloc.free_frames(), 0);
        assert_eq!(alloc.used_frames(), 10);

        alloc.release_region(0, 4 * PAGE_SIZE as u64);
        assert_eq!(alloc.free_frames(), 4);
        assert_eq!(alloc.free_frames() + alloc.used_frames(), alloc.total_frames());
    }

    #[test]
    fn first_fit_reuses_the_lowest_hole() {
        let (mut alloc, _storage) = fixture(64);
        let a = alloc.alloc().unwrap();
        let b = alloc.alloc().unwrap();
        let c = alloc.alloc().unwrap();
        assert!(a < b && b < c);

        let free_before = alloc.free_frames();
        alloc.free(b);
        assert_eq!(alloc.free_frames(), free_before + 1);

        let d = alloc.alloc().unwrap();
        assert_eq!(d, b);
    }

    #[test]
    fn counters_and_popcount_stay_consistent() {
        let (mut alloc, _storage) = fixture(128);
        let mut held = Vec::new();
        for _ in 0..50 {
            held.push(alloc.alloc().unwrap());
        }
        for addr in held.iter().step_by(3) {
            alloc.free(*addr);
        }
        assert_eq!(alloc.free_frames() + alloc.used_frames(), alloc.total_frames());
        assert_eq!(alloc.set_bit_count(), alloc.used_frames());
    }

    #[test]
    fn exhaustion_returns_none() {
        let (mut alloc, _storage) = fixture(3);
        assert!(alloc.alloc().is_some());
        assert!(alloc.alloc().is_some());
        assert!(alloc.alloc().is_some());
        assert!(alloc.alloc().is_none());
        assert_eq!(alloc.free_frames(), 0);
    }

    #[test]
    fn unaligned_free_is_ignored() {
        let (mut alloc, _storage) = fixture(8);
        let a = alloc.alloc().unwrap();
        let used = alloc.used_frames();
        alloc.free(PhysAddr::new(a.as_usize() + 123));
        assert_eq!(alloc.used_frames(), used);
        alloc.free(a);
        assert_eq!(alloc.used_frames(), used - 1);
    }

    #[test]
    fn redundant_transitions_do_not_move_counters() {
        let (mut alloc, _storage) = fixture(8);
        alloc.release_region(0, 8 * PAGE_SIZE as u64); // already free
        assert_eq!(alloc.free_frames(), 8);
        alloc.reserve_region(0, PAGE_SIZE as u64);
        alloc.reserve_region(0, PAGE_SIZE as u64); // already used
        assert_eq!(alloc.used_frames(), 1);
    }

    #[test]
    fn partial_frames_round_inward_on_release_outward_on_reserve() {
        let (mut alloc, _storage) = {
            let mut storage = vec![0u32; FrameAllocator::bitmap_words(16)];
            let mut alloc = FrameAllocator::new();
            unsafe { alloc.init_at(storage.as_mut_ptr(), 16) };
            (alloc, storage)
        };
        // Release a range that only partially covers its edge frames.
        alloc.release_region(0x800, 2 * PAGE_SIZE as u64);
        assert_eq!(alloc.free_frames(), 1); // only frame 1 lies fully inside

        // Reserving any byte of a frame takes the whole frame.
        alloc.reserve_region(0x1800, 0x10);
        assert_eq!(alloc.free_frames(), 0);
    }

    #[test]
    fn frame_total_from_memory_map_or_fallback() {
        use crate::multiboot::{Region, REGION_AVAILABLE};
        let regions = vec![
            Region { start: 0, len: 0x9F000, kind: REGION_AVAILABLE },
            Region { start: 0x100000, len: 0x700_0000, kind: REGION_AVAILABLE },
        ];
        let total = total_frames_for(Some(regions.into_iter()), 0);
        assert_eq!(total, 0x710_0000 / PAGE_SIZE);

        // No map: one MiB of low memory plus mem_upper kilobytes.
        let total = total_frames_for(None::<std::iter::Empty<Region>>, 3072);
        assert_eq!(total, (0x10_0000 + 3072 * 1024) / PAGE_SIZE);
    }
}
