//! Interrupt dispatch
//!
//! Routes CPU vectors to registered handlers and speaks to the dual 8259
//! interrupt controllers. Vectors 0-31 are CPU exceptions; the controllers
//! are remapped so hardware lines 0-15 arrive on vectors 32-47.
//!
//! Handlers come in two flavors. An *observer* receives the interrupt frame
//! read-only and is limited to side effects. A *transformer* receives it
//! mutably and may rewrite the saved CPU state - when the stub returns, the
//! frame is reloaded into the CPU, which is how the scheduler switches tasks
//! from inside the timer interrupt. Each slot holds at most one handler of
//! either flavor; the most recent registration wins.

use crate::arch;
use crate::console::Value;
use spin::Mutex;

/// First vector the hardware lines are remapped onto.
pub const IRQ_BASE: usize = 32;
/// Number of hardware lines behind the two controllers.
pub const IRQ_LINES: usize = 16;
/// Total vector slots.
pub const VECTOR_COUNT: usize = 256;

/// Hardware line of the periodic timer.
pub const IRQ_TIMER: u8 = 0;

// 8259 controller ports.
const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const PIC_EOI: u8 = 0x20;

/// CPU state captured by the interrupt entry stubs.
///
/// The layout is a contract with the assembly: segment first, then the
/// `pusha` block, the stub-pushed vector and error code (zero-filled when the
/// CPU pushes none), then the hardware frame. `useresp`/`ss` are only pushed
/// by the CPU on privilege crossings; for kernel-mode interrupts those two
/// slots alias whatever sat on the stack beforehand.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptFrame {
    pub ds: usize,
    pub edi: usize,
    pub esi: usize,
    pub ebp: usize,
    pub esp: usize,
    pub ebx: usize,
    pub edx: usize,
    pub ecx: usize,
    pub eax: usize,
    pub vector: usize,
    pub err_code: usize,
    pub eip: usize,
    pub cs: usize,
    pub eflags: usize,
    pub useresp: usize,
    pub ss: usize,
}

impl InterruptFrame {
    /// The hardware line for a remapped vector, if this frame is one.
    pub fn irq_line(&self) -> Option<u8> {
        if (IRQ_BASE..IRQ_BASE + IRQ_LINES).contains(&self.vector) {
            Some((self.vector - IRQ_BASE) as u8)
        } else {
            None
        }
    }
}

/// Handler for a non-IRQ vector slot.
pub type VectorHandler = fn(&mut InterruptFrame);

/// The two handler flavors a hardware line may carry.
#[derive(Clone, Copy)]
pub enum IrqHandler {
    /// Side effects only; the frame is read-only.
    Observer(fn(&InterruptFrame)),
    /// May rewrite the saved context that the stub will reload.
    Transformer(fn(&mut InterruptFrame)),
}

/// Both handler tables, empty at boot.
pub struct DispatchTable {
    irqs: [Option<IrqHandler>; IRQ_LINES],
    vectors: [Option<VectorHandler>; VECTOR_COUNT],
}

impl DispatchTable {
    pub const fn new() -> Self {
        DispatchTable {
            irqs: [None; IRQ_LINES],
            vectors: [None; VECTOR_COUNT],
        }
    }

    pub fn set_irq(&mut self, line: u8, handler: IrqHandler) {
        if (line as usize) < IRQ_LINES {
            self.irqs[line as usize] = Some(handler);
        }
    }

    pub fn set_vector(&mut self, vector: usize, handler: VectorHandler) {
        if vector < VECTOR_COUNT {
            self.vectors[vector] = Some(handler);
        }
    }

    fn irq(&self, line: u8) -> Option<IrqHandler> {
        self.irqs.get(line as usize).copied().flatten()
    }

    fn vector(&self, vector: usize) -> Option<VectorHandler> {
        self.vectors.get(vector).copied().flatten()
    }
}

static TABLE: Mutex<DispatchTable> = Mutex::new(DispatchTable::new());

/// Remap the controllers and mask every line.
///
/// The standard ICW dance: edge-triggered cascade init, vector offsets 32/40,
/// master/slave wiring on line 2, 8086 mode. Lines stay masked until a driver
/// asks for one.
pub fn init() {
    unsafe {
        arch::outb(PIC1_COMMAND, 0x11);
        arch::io_wait();
        arch::outb(PIC2_COMMAND, 0x11);
        arch::io_wait();

        arch::outb(PIC1_DATA, IRQ_BASE as u8);
        arch::io_wait();
        arch::outb(PIC2_DATA, (IRQ_BASE + 8) as u8);
        arch::io_wait();

        arch::outb(PIC1_DATA, 0x04);
        arch::io_wait();
        arch::outb(PIC2_DATA, 0x02);
        arch::io_wait();

        arch::outb(PIC1_DATA, 0x01);
        arch::io_wait();
        arch::outb(PIC2_DATA, 0x01);
        arch::io_wait();

        arch::outb(PIC1_DATA, 0xFF);
        arch::io_wait();
        arch::outb(PIC2_DATA, 0xFF);
        arch::io_wait();
    }
}

/// Let a hardware line through. Unknown lines are ignored.
pub fn unmask_irq(line: u8) {
    if line as usize >= IRQ_LINES {
        return;
    }
    let (port, bit) = if line < 8 {
        (PIC1_DATA, line)
    } else {
        (PIC2_DATA, line - 8)
    };
    unsafe {
        let mask = arch::inb(port) & !(1 << bit);
        arch::outb(port, mask);
    }
}

/// Mask a hardware line off. Unknown lines are ignored.
pub fn mask_irq(line: u8) {
    if line as usize >= IRQ_LINES {
        return;
    }
    let (port, bit) = if line < 8 {
        (PIC1_DATA, line)
    } else {
        (PIC2_DATA, line - 8)
    };
    unsafe {
        let mask = arch::inb(port) | (1 << bit);
        arch::outb(port, mask);
    }
}

/// Signal end-of-interrupt: always to the primary controller, and to the
/// secondary as well for its lines.
pub fn end_of_interrupt(line: u8) {
    unsafe {
        if line >= 8 {
            arch::outb(PIC2_COMMAND, PIC_EOI);
        }
        arch::outb(PIC1_COMMAND, PIC_EOI);
    }
}

/// Install an observer on a hardware line, replacing any prior handler.
pub fn register_irq_observer(line: u8, handler: fn(&InterruptFrame)) {
    arch::without_interrupts(|| TABLE.lock().set_irq(line, IrqHandler::Observer(handler)));
}

/// Install a transformer on a hardware line, replacing any prior handler.
pub fn register_irq_transformer(line: u8, handler: fn(&mut InterruptFrame)) {
    arch::without_interrupts(|| TABLE.lock().set_irq(line, IrqHandler::Transformer(handler)));
}

/// Install a handler on an exception vector, replacing any prior one.
pub fn register_vector(vector: usize, handler: VectorHandler) {
    arch::without_interrupts(|| TABLE.lock().set_vector(vector, handler));
}

/// Entry point the common assembly stub calls with the materialized frame.
#[no_mangle]
pub unsafe extern "C" fn isr_dispatch(frame: &mut InterruptFrame) {
    dispatch(frame);
}

/// Route one interrupt frame: handler first, then (for hardware lines) EOI.
/// An exception vector nobody claimed is fatal.
pub fn dispatch(frame: &mut InterruptFrame) {
    if let Some(line) = frame.irq_line() {
        let handler = TABLE.lock().irq(line);
        match handler {
            Some(IrqHandler::Observer(f)) => f(frame),
            Some(IrqHandler::Transformer(f)) => f(frame),
            None => {}
        }
        end_of_interrupt(line);
        return;
    }

    let handler = TABLE.lock().vector(frame.vector);
    if let Some(f) = handler {
        f(frame);
        return;
    }

    if frame.vector < 32 {
        crate::panic::panic_with_regs(
            file!(),
            line!(),
            frame,
            "Unhandled exception: %s",
            &[Value::Str(Some(exception_name(frame.vector)))],
        );
    }
    // Reserved vectors above the hardware range are ignored.
}

/// Well-known mnemonic for a CPU exception vector.
pub fn exception_name(vector: usize) -> &'static str {
    const NAMES: [&str; 32] = [
        "Division By Zero",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "Bound Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack-Segment Fault",
        "General Protection Fault",
        "Page Fault",
        "Reserved",
        "x87 Floating-Point Exception",
        "Alignment Check",
        "Machine Check",
        "SIMD Floating-Point Exception",
        "Virtualization Exception",
        "Control Protection Exception",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Hypervisor Injection Exception",
        "VMM Communication Exception",
        "Security Exception",
        "Reserved",
    ];
    NAMES.get(vector).copied().unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static OBSERVED: Cell<usize> = Cell::new(0);
        static TRANSFORMED: Cell<bool> = Cell::new(false);
    }

    fn observing(frame: &InterruptFrame) {
        OBSERVED.with(|seen| seen.set(frame.vector));
        // Marker write so EOI ordering is visible in the port journal.
        unsafe { arch::outb(0x99, 0xAA) };
    }

    fn transforming(frame: &mut InterruptFrame) {
        TRANSFORMED.with(|hit| hit.set(true));
        frame.eax = 0x1234;
    }

    fn frame_for(vector: usize) -> InterruptFrame {
        InterruptFrame {
            vector,
            ..Default::default()
        }
    }

    #[test]
    fn observer_runs_and_eoi_follows() {
        register_irq_observer(3, observing);
        let _ = arch::take_port_log();

        let mut frame = frame_for(IRQ_BASE + 3);
        dispatch(&mut frame);

        assert_eq!(OBSERVED.with(|seen| seen.get()), IRQ_BASE + 3);
        let log = arch::take_port_log();
        let marker = log.iter().position(|&w| w == (0x99, 0xAA)).unwrap();
        let eoi = log.iter().position(|&w| w == (PIC1_COMMAND, PIC_EOI)).unwrap();
        assert!(marker < eoi, "handler must run before end-of-interrupt");
    }

    #[test]
    fn transformer_may_rewrite_the_frame() {
        register_irq_transformer(4, transforming);
        let mut frame = frame_for(IRQ_BASE + 4);
        dispatch(&mut frame);
        assert!(TRANSFORMED.with(|hit| hit.get()));
        assert_eq!(frame.eax, 0x1234);
    }

    #[test]
    fn latest_registration_wins() {
        TRANSFORMED.with(|hit| hit.set(false));
        OBSERVED.with(|seen| seen.set(0));
        register_irq_observer(5, observing);
        register_irq_transformer(5, transforming);

        let mut frame = frame_for(IRQ_BASE + 5);
        dispatch(&mut frame);
        assert!(TRANSFORMED.with(|hit| hit.get()));
        assert_eq!(OBSERVED.with(|seen| seen.get()), 0);
    }

    #[test]
    fn secondary_controller_lines_get_both_eois() {
        let _ = arch::take_port_log();
        let mut frame = frame_for(IRQ_BASE + 10);
        dispatch(&mut frame);
        let log = arch::take_port_log();
        assert!(log.contains(&(PIC2_COMMAND, PIC_EOI)));
        assert!(log.contains(&(PIC1_COMMAND, PIC_EOI)));
    }

    #[test]
    fn init_sends_the_icw_sequence() {
        let _ = arch::take_port_log();
        init();
        let log: Vec<(u16, u8)> = arch::take_port_log()
            .into_iter()
            .filter(|&(port, _)| port != 0x80)
            .collect();
        assert_eq!(
            log,
            vec![
                (PIC1_COMMAND, 0x11),
                (PIC2_COMMAND, 0x11),
                (PIC1_DATA, 0x20),
                (PIC2_DATA, 0x28),
                (PIC1_DATA, 0x04),
                (PIC2_DATA, 0x02),
                (PIC1_DATA, 0x01),
                (PIC2_DATA, 0x01),
                (PIC1_DATA, 0xFF),
                (PIC2_DATA, 0xFF),
            ]
        );
    }

    #[test]
    fn unmask_clears_one_bit() {
        arch::set_port_state(PIC1_DATA, 0xFF);
        unmask_irq(0);
        unsafe { assert_eq!(arch::inb(PIC1_DATA), 0xFE) };

        arch::set_port_state(PIC2_DATA, 0xFF);
        unmask_irq(9);
        unsafe { assert_eq!(arch::inb(PIC2_DATA), 0xFD) };

        // Out-of-range lines are a no-op.
        unmask_irq(31);
    }

    #[test]
    fn exception_mnemonics() {
        assert_eq!(exception_name(0), "Division By Zero");
        assert_eq!(exception_name(13), "General Protection Fault");
        assert_eq!(exception_name(14), "Page Fault");
        assert_eq!(exception_name(200), "Unknown");
    }

    #[test]
    fn vector_handler_registration() {
        fn mark(frame: &mut InterruptFrame) {
            frame.ebx = 0xCAFE;
        }
        register_vector(6, mark);
        let mut frame = frame_for(6);
        dispatch(&mut frame);
        assert_eq!(frame.ebx, 0xCAFE);
    }
}
