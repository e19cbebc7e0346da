//! Periodic timer
//!
//! Drives the legacy PIT's channel 0 as the kernel's tick source. Every tick
//! bumps a monotonic 64-bit counter and is forwarded - with the mutable
//! interrupt frame - to a single registered sink, which is how the scheduler
//! gets a chance to switch contexts on each tick.

use crate::arch;
use crate::interrupts::{self, InterruptFrame, IRQ_TIMER};
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Base oscillator of the PIT, in Hz.
pub const PIT_FREQUENCY: u32 = 1_193_182;

/// Tick rate the kernel asks for at boot.
pub const DEFAULT_HZ: u32 = 100;

const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0: u16 = 0x40;

/// Channel 0, low-then-high access, square wave (mode 3), binary counting.
const PIT_MODE: u8 = 0x36;

/// Receives each tick's frame before end-of-interrupt is issued.
pub type TickSink = fn(&mut InterruptFrame);

static TICKS: AtomicU64 = AtomicU64::new(0);
static SINK: Mutex<Option<TickSink>> = Mutex::new(None);

/// Reload divisor for a requested rate, clamped to what the chip accepts.
pub fn pit_divisor(hz: u32) -> u16 {
    let raw = if hz == 0 { 1 } else { PIT_FREQUENCY / hz };
    raw.clamp(1, 65_535) as u16
}

/// Program the tick source and take over hardware line 0.
///
/// Returns the frequency actually achieved after divisor clamping.
pub fn init(hz: u32) -> u32 {
    let divisor = pit_divisor(hz);
    unsafe {
        arch::outb(PIT_COMMAND, PIT_MODE);
        arch::outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        arch::outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
    interrupts::register_irq_transformer(IRQ_TIMER, tick_isr);
    interrupts::unmask_irq(IRQ_TIMER);
    PIT_FREQUENCY / u32::from(divisor)
}

/// Ticks since boot. Never decreases.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Register the single tick sink, replacing any prior one.
pub fn set_tick_sink(sink: TickSink) {
    arch::without_interrupts(|| *SINK.lock() = Some(sink));
}

/// Remove the tick sink. Used by hosted tests.
#[cfg(feature = "std")]
pub fn clear_tick_sink() {
    *SINK.lock() = None;
}

/// The timer's interrupt handler: count, then forward to the sink. Runs as a
/// transformer so the sink may rewrite the frame.
fn tick_isr(frame: &mut InterruptFrame) {
    TICKS.fetch_add(1, Ordering::SeqCst);
    let sink = *SINK.lock();
    if let Some(sink) = sink {
        sink(frame);
    }
}
