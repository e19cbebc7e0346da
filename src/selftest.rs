//! Boot-time self-tests
//!
//! The `boottest` command-line token runs these against the live kernel:
//! a frame-allocator round trip, an identity-map translation probe, and a
//! heap exercise. Results go through the diagnostic console so a failing
//! machine reports exactly which contract broke.

use crate::console::{printf, Value};
use crate::memory::heap;
use crate::memory::frames;

fn check(name: &str, ok: bool) -> bool {
    printf(
        "[selftest] %s: %s\n",
        &[
            Value::Str(Some(name)),
            Value::Str(Some(if ok { "ok" } else { "FAILED" })),
        ],
    );
    ok
}

/// Run every self-test; true when all pass.
pub fn run() -> bool {
    printf("[selftest] running boot self-tests\n", &[]);
    let mut pass = true;
    pass &= check("frame allocator round trip", frame_round_trip());
    pass &= check("identity translation", identity_translation());
    pass &= check("heap alloc/free/realloc", heap_exercise());
    printf(
        "[selftest] %s\n",
        &[Value::Str(Some(if pass { "all tests passed" } else { "FAILURES above" }))],
    );
    pass
}

/// Allocate three frames, free the middle one, and expect first-fit to hand
/// it straight back.
fn frame_round_trip() -> bool {
    let a = match frames::alloc_frame() {
        Some(frame) => frame,
        None => return false,
    };
    let b = match frames::alloc_frame() {
        Some(frame) => frame,
        None => return false,
    };
    let c = match frames::alloc_frame() {
        Some(frame) => frame,
        None => return false,
    };

    let distinct = a != b && b != c && a != c;
    let free_before = frames::free_bytes();
    frames::free_frame(b);
    let freed_counts = frames::free_bytes() == free_before + crate::memory::PAGE_SIZE;

    let d = frames::alloc_frame();
    let reused = d == Some(b);

    frames::free_frame(a);
    frames::free_frame(c);
    if let Some(d) = d {
        frames::free_frame(d);
    }
    distinct && freed_counts && reused
}

/// The identity map must translate low virtual pages to themselves.
fn identity_translation() -> bool {
    #[cfg(all(target_arch = "x86", not(feature = "std")))]
    {
        use crate::memory::paging;
        use crate::memory::{PhysAddr, VirtAddr};
        paging::translate(VirtAddr::new(0x1000)) == Some(PhysAddr::new(0x1000))
            && paging::translate(VirtAddr::new(0x9F123)) == Some(PhysAddr::new(0x9F123))
    }
    #[cfg(not(all(target_arch = "x86", not(feature = "std"))))]
    {
        // Hosted builds have no live identity map to probe.
        true
    }
}

/// Allocate, write through, read back, free, reallocate.
fn heap_exercise() -> bool {
    let p1 = heap::kmalloc(32);
    let p2 = heap::kmalloc(40);
    let p3 = heap::kmalloc(64);
    if p1.is_null() || p2.is_null() || p3.is_null() {
        return false;
    }

    let slots = p2 as *mut u32;
    unsafe {
        for i in 0..10u32 {
            slots.add(i as usize).write(i * 10);
        }
    }
    let read_back = unsafe { slots.add(5).read() } == 50;

    heap::kfree(p2);
    let p1_grown = heap::krealloc(p1, 128);
    let realloc_ok = !p1_grown.is_null();

    heap::kfree(p1_grown);
    heap::kfree(p3);

    read_back && realloc_ok && heap::verify().is_ok()
}
