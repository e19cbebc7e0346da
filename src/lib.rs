//! Ferrite kernel library
//!
//! A small i386 kernel built around a handful of tightly-coupled services:
//! interrupt dispatch, a periodic timer, physical and virtual memory, a
//! kernel heap, a preemptive round-robin scheduler, and a panic facility.
//! Boots via Multiboot on bare metal; compiles hosted (the default `std`
//! feature) for development and the test suite.
//!
//! Bring-up order matters - each subsystem leans on the previous one:
//! console, interrupt controllers, timer, frames, paging, heap, tasks.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(not(feature = "std"), feature = "alloc"))]
pub extern crate alloc;

/// Print to the boot consoles (VGA, plus serial when `earlycon` is set).
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Print with a trailing newline to the boot consoles.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(
        concat!($fmt, "\n"), $($arg)*));
}

pub mod arch;
pub mod cmdline;
pub mod console;
pub mod interrupts;
pub mod memory;
pub mod multiboot;
pub mod panic;
pub mod selftest;
pub mod serial;
pub mod task;
pub mod timer;

// VGA text mode exists only on the metal.
#[cfg(all(target_arch = "x86", not(feature = "std")))]
pub mod vga;

/// Kernel name.
pub const KERNEL_NAME: &str = "Ferrite";

/// Kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Heap-backed `alloc` support for bare-metal builds.
#[cfg(all(not(feature = "std"), feature = "alloc"))]
#[global_allocator]
static KERNEL_ALLOCATOR: memory::heap::KernelAllocator = memory::heap::KernelAllocator;

/// C-level kernel entry, reached from the Multiboot boot stub with the
/// bootloader's magic and the physical address of the info block.
#[cfg(all(target_arch = "x86", not(feature = "std")))]
#[no_mangle]
pub extern "C" fn kernel_main(magic: u32, info: *const multiboot::BootInfo) -> ! {
    vga::init();
    kprintln!("{} kernel v{}", KERNEL_NAME, VERSION);

    if magic != multiboot::BOOTLOADER_MAGIC {
        kpanic!(
            "Bad bootloader magic: 0x%x (expected 0x%x)",
            console::Value::Uint(magic),
            console::Value::Uint(multiboot::BOOTLOADER_MAGIC)
        );
    }
    let info = unsafe { &*info };

    // Command line first: `earlycon` decides whether the serial sink talks.
    if let Some(line) = unsafe { info.command_line() } {
        cmdline::init(line);
    }
    if cmdline::has_flag("earlycon") {
        serial::enable();
        kprintln!("[boot] serial console enabled");
    }

    arch::gdt::init();
    arch::idt::init();
    kprintln!("[boot] descriptor tables loaded");

    interrupts::init();
    kprintln!("[boot] interrupt controllers remapped");

    let hz = timer::init(timer::DEFAULT_HZ);
    kprintln!("[boot] timer running at {} Hz", hz);

    unsafe { memory::init(info) };
    interrupts::register_vector(14, memory::paging::page_fault_handler);

    task::init();
    kprintln!("[task] scheduler ready, idle task adopted");

    // Boot-time exercises requested on the command line.
    if cmdline::has_flag("boottest") {
        selftest::run();
    }
    if cmdline::has_flag("testpanic") {
        kpanic!(
            "Test panic - this is intentional (value: %d)",
            console::Value::Int(42)
        );
    }
    if cmdline::has_flag("testpagefault") {
        kprintln!("[boot] reading from 0xDEADBEEF...");
        unsafe { core::ptr::read_volatile(0xDEAD_BEEF as *const u8) };
    }

    spawn_demo_tasks();

    timer::set_tick_sink(task::on_timer_tick);
    task::enable();
    arch::enable_interrupts();
    kprintln!("[boot] interrupts on, handing over to the scheduler");

    // The boot context is the idle task from here on.
    loop {
        arch::halt();
    }
}

/// Three kernel tasks that interleave under preemption, print their
/// progress, and exit.
#[cfg(all(target_arch = "x86", not(feature = "std")))]
fn spawn_demo_tasks() {
    extern "C" fn demo_one() {
        demo_loop(1);
    }
    extern "C" fn demo_two() {
        demo_loop(2);
    }
    extern "C" fn demo_three() {
        demo_loop(3);
    }

    fn demo_loop(tag: usize) {
        for i in 0..5 {
            kprintln!("[P{}:{}]", tag, i);
            for _ in 0..500_000 {
                core::hint::spin_loop();
            }
        }
    }

    task::spawn("demo-one", demo_one).expect("spawning demo task");
    task::spawn("demo-two", demo_two).expect("spawning demo task");
    task::spawn("demo-three", demo_three).expect("spawning demo task");
    kprintln!("[task] three demo tasks queued");
}

/// Hosted entry: banner, synthetic arenas, and the self-tests that do not
/// need hardware.
#[cfg(feature = "std")]
pub fn run_hosted() {
    kprintln!("{} kernel v{} (hosted)", KERNEL_NAME, VERSION);
    memory::init_hosted();
    kprintln!(
        "[mem] hosted arenas: {} KiB frames, {} KiB heap",
        memory::frames::total_bytes() / 1024,
        memory::heap::total_bytes() / 1024
    );
    if selftest::run() {
        kprintln!("hosted self-tests passed");
    } else {
        kprintln!("hosted self-tests FAILED");
        std::process::exit(1);
    }
}

/// Rust-level panics funnel into the kernel's fatal path.
#[cfg(all(not(feature = "std"), not(test)))]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    use core::fmt::Write;

    let (file, line) = info
        .location()
        .map(|loc| (loc.file(), loc.line()))
        .unwrap_or(("<unknown>", 0));

    let mut buf = [0u8; 256];
    let mut sink = console::BufferSink::new(&mut buf);
    write!(sink, "{}", info).ok();
    let written = sink.written();
    let message = core::str::from_utf8(&buf[..written]).unwrap_or("(unprintable)");

    panic::panic(file, line, "%s", &[console::Value::Str(Some(message))])
}
