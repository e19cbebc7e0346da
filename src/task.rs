//! Task scheduler
//!
//! Kernel-mode preemptive multitasking, round robin, driven entirely by the
//! timer tick. There is no hand-written context-switch assembly: the timer
//! interrupt's saved register frame *is* the context. Saving a task copies
//! the frame into its control block; resuming copies the block back into the
//! frame, and the interrupt return does the rest.
//!
//! Task zero is the idle task: the boot execution context, adopted at init.
//! It owns no heap stack (`kernel_stack == 0` means "the boot stack") and is
//! never destroyed.

use crate::arch::{self, EFLAGS_IF, EFLAGS_RESERVED};
use crate::interrupts::InterruptFrame;
use crate::memory::heap::{kfree, kmalloc};
use crate::memory::PhysAddr;
use spin::Mutex;

/// Flat kernel code segment selector.
pub const KERNEL_CODE_SELECTOR: usize = 0x08;
/// Flat kernel data segment selector.
pub const KERNEL_DATA_SELECTOR: usize = 0x10;

/// Bytes of kernel stack given to each spawned task.
pub const KERNEL_STACK_SIZE: usize = 8 * 1024;

/// Ticks a task may hold the CPU before rotation bookkeeping resets it.
pub const DEFAULT_TIMESLICE: u32 = 10;

/// Identifier of the idle task.
pub const IDLE_TASK_ID: u32 = 0;

const NAME_LEN: usize = 16;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// Privilege a task runs at. `User` is reserved; everything today is kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeMode {
    Kernel,
    User,
}

/// Saved CPU state, mirroring the interrupt frame field for field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuContext {
    pub ds: usize,
    pub edi: usize,
    pub esi: usize,
    pub ebp: usize,
    pub esp: usize,
    pub ebx: usize,
    pub edx: usize,
    pub ecx: usize,
    pub eax: usize,
    pub eip: usize,
    pub cs: usize,
    pub eflags: usize,
    pub useresp: usize,
    pub ss: usize,
}

impl CpuContext {
    /// Capture every saved register from the frame.
    pub fn save_from(&mut self, frame: &InterruptFrame) {
        self.ds = frame.ds;
        self.edi = frame.edi;
        self.esi = frame.esi;
        self.ebp = frame.ebp;
        self.esp = frame.esp;
        self.ebx = frame.ebx;
        self.edx = frame.edx;
        self.ecx = frame.ecx;
        self.eax = frame.eax;
        self.eip = frame.eip;
        self.cs = frame.cs;
        self.eflags = frame.eflags;
        self.useresp = frame.useresp;
        self.ss = frame.ss;
    }

    /// Install this context into the frame the stub will reload.
    ///
    /// Deliberately leaves `frame.esp` alone: for same-privilege interrupts
    /// the CPU does not reload the stack pointer from the frame, so the stub
    /// unwinds on whatever stack it entered on. Initial contexts are built as
    /// synthetic frames on their own kernel stack to line up with this.
    pub fn restore_to(&self, frame: &mut InterruptFrame) {
        frame.ds = self.ds;
        frame.edi = self.edi;
        frame.esi = self.esi;
        frame.ebp = self.ebp;
        frame.ebx = self.ebx;
        frame.edx = self.edx;
        frame.ecx = self.ecx;
        frame.eax = self.eax;
        frame.eip = self.eip;
        frame.cs = self.cs;
        frame.eflags = self.eflags;
        frame.useresp = self.useresp;
        frame.ss = self.ss;
    }
}

/// One task's control block. Allocated from the kernel heap; owned by the
/// scheduler; linked through `next` while waiting in the ready queue.
pub struct Tcb {
    pub id: u32,
    pub name: [u8; NAME_LEN],
    pub state: TaskState,
    pub mode: PrivilegeMode,
    pub context: CpuContext,
    /// Heap address of the task's kernel stack; 0 means the boot stack.
    pub kernel_stack: usize,
    /// Reserved for ring-3 tasks.
    pub user_stack: usize,
    pub page_directory: PhysAddr,
    pub timeslice: u32,
    /// Static priority; recorded but not yet consulted.
    pub priority: u8,
    next: *mut Tcb,
}

impl Tcb {
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("???")
    }
}

/// Opaque reference to a scheduler-owned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(*mut Tcb);

impl TaskHandle {
    pub fn id(self) -> u32 {
        unsafe { (*self.0).id }
    }
}

/// Intrusive FIFO of Ready tasks, linked through `Tcb::next`.
struct ReadyQueue {
    head: *mut Tcb,
    tail: *mut Tcb,
    len: usize,
}

impl ReadyQueue {
    const fn new() -> Self {
        ReadyQueue {
            head: core::ptr::null_mut(),
            tail: core::ptr::null_mut(),
            len: 0,
        }
    }

    unsafe fn enqueue(&mut self, tcb: *mut Tcb) {
        debug_assert!(!self.contains_ptr(tcb), "task double-queued");
        (*tcb).next = core::ptr::null_mut();
        if self.tail.is_null() {
            self.head = tcb;
        } else {
            (*self.tail).next = tcb;
        }
        self.tail = tcb;
        self.len += 1;
    }

    unsafe fn dequeue(&mut self) -> *mut Tcb {
        let head = self.head;
        if head.is_null() {
            return head;
        }
        self.head = (*head).next;
        if self.head.is_null() {
            self.tail = core::ptr::null_mut();
        }
        (*head).next = core::ptr::null_mut();
        self.len -= 1;
        head
    }

    fn len(&self) -> usize {
        self.len
    }

    unsafe fn contains_ptr(&self, tcb: *mut Tcb) -> bool {
        let mut cursor = self.head;
        while !cursor.is_null() {
            if cursor == tcb {
                return true;
            }
            cursor = (*cursor).next;
        }
        false
    }

    unsafe fn contains_id(&self, id: u32) -> bool {
        let mut cursor = self.head;
        while !cursor.is_null() {
            if (*cursor).id == id {
                return true;
            }
            cursor = (*cursor).next;
        }
        false
    }
}

/// Failure modes of task creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    OutOfMemory,
}

/// All scheduler state: the running task, the ready queue, id allocation and
/// the enable flag that gates preemption.
pub struct Scheduler {
    current: *mut Tcb,
    queue: ReadyQueue,
    kernel_directory: PhysAddr,
    next_id: u32,
    enabled: bool,
}

// TCB pointers are only followed under the owning lock.
unsafe impl Send for Scheduler {}

impl Scheduler {
    pub const fn new() -> Self {
        Scheduler {
            current: core::ptr::null_mut(),
            queue: ReadyQueue::new(),
            kernel_directory: PhysAddr::NULL,
            next_id: 1,
            enabled: false,
        }
    }

    /// Adopt the boot context as the idle task (id 0, Running).
    pub fn init(&mut self, kernel_directory: PhysAddr) -> Result<(), TaskError> {
        let idle = kmalloc(core::mem::size_of::<Tcb>()) as *mut Tcb;
        if idle.is_null() {
            return Err(TaskError::OutOfMemory);
        }
        let mut name = [0u8; NAME_LEN];
        name[..4].copy_from_slice(b"idle");
        unsafe {
            idle.write(Tcb {
                id: IDLE_TASK_ID,
                name,
                state: TaskState::Running,
                mode: PrivilegeMode::Kernel,
                context: CpuContext::default(),
                kernel_stack: 0,
                user_stack: 0,
                page_directory: kernel_directory,
                timeslice: DEFAULT_TIMESLICE,
                priority: 0,
                next: core::ptr::null_mut(),
            });
        }
        self.current = idle;
        self.kernel_directory = kernel_directory;
        Ok(())
    }

    /// Create a kernel task that will start in `entry`, and queue it Ready.
    ///
    /// The new task's kernel stack gets a synthetic interrupt frame whose
    /// return lands in the trampoline with `entry` waiting on top of the
    /// stack: interrupts come on, `entry` runs, and a return from `entry`
    /// becomes task exit.
    pub fn spawn(&mut self, name: &str, entry: extern "C" fn()) -> Result<TaskHandle, TaskError> {
        let tcb = kmalloc(core::mem::size_of::<Tcb>()) as *mut Tcb;
        if tcb.is_null() {
            return Err(TaskError::OutOfMemory);
        }
        let stack = kmalloc(KERNEL_STACK_SIZE);
        if stack.is_null() {
            kfree(tcb as *mut u8);
            return Err(TaskError::OutOfMemory);
        }

        let word = core::mem::size_of::<usize>();
        let stack_top = stack as usize + KERNEL_STACK_SIZE;
        let mut sp = stack_top;
        unsafe {
            // Topmost: the entry pointer, for the trampoline to pop.
            sp -= word;
            (sp as *mut usize).write(entry as usize);
            // Below it the frame the interrupt return consumes: flags, code
            // segment, instruction pointer.
            sp -= word;
            (sp as *mut usize).write(EFLAGS_IF | EFLAGS_RESERVED);
            sp -= word;
            (sp as *mut usize).write(KERNEL_CODE_SELECTOR);
            sp -= word;
            (sp as *mut usize).write(trampoline_entry());
        }

        let context = CpuContext {
            ds: KERNEL_DATA_SELECTOR,
            esp: sp,
            eip: trampoline_entry(),
            cs: KERNEL_CODE_SELECTOR,
            eflags: EFLAGS_IF | EFLAGS_RESERVED,
            ss: KERNEL_DATA_SELECTOR,
            ..CpuContext::default()
        };

        let mut name_buf = [0u8; NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LEN - 1);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        let id = self.next_id;
        self.next_id += 1;
        unsafe {
            tcb.write(Tcb {
                id,
                name: name_buf,
                state: TaskState::Ready,
                mode: PrivilegeMode::Kernel,
                context,
                kernel_stack: stack as usize,
                user_stack: 0,
                page_directory: self.kernel_directory,
                timeslice: DEFAULT_TIMESLICE,
                priority: 0,
                next: core::ptr::null_mut(),
            });
            self.queue.enqueue(tcb);
        }
        Ok(TaskHandle(tcb))
    }

    /// Timer-driven rotation, invoked with the tick's mutable frame.
    ///
    /// Saves the interrupted task (if it is still Running), rotates it to the
    /// queue tail, and installs the next Ready task's context into the frame
    /// so the interrupt return resumes it.
    pub fn on_tick(&mut self, frame: &mut InterruptFrame) {
        if !self.enabled || self.current.is_null() {
            return;
        }
        let previous = self.current;
        unsafe {
            match (*previous).state {
                TaskState::Running => {
                    (*previous).context.save_from(frame);
                    (*previous).state = TaskState::Ready;
                    (*previous).timeslice = (*previous).timeslice.saturating_sub(1);
                    if (*previous).timeslice == 0 {
                        (*previous).timeslice = DEFAULT_TIMESLICE;
                    }
                    self.queue.enqueue(previous);
                }
                TaskState::Terminated => {
                    // No save, no requeue; the block is reclaimed below once
                    // a successor exists.
                }
                TaskState::Ready | TaskState::Blocked => {}
            }

            let next = self.queue.dequeue();
            if next.is_null() {
                (*previous).state = TaskState::Running;
                return;
            }

            let previous_directory = (*previous).page_directory;
            if (*previous).state == TaskState::Terminated {
                self.destroy(previous);
            }

            self.current = next;
            (*next).state = TaskState::Running;
            if (*next).page_directory != previous_directory {
                arch::load_page_directory((*next).page_directory.as_usize());
            }
            (*next).timeslice = DEFAULT_TIMESLICE;
            (*next).context.restore_to(frame);
        }
    }

    /// Return a task's stack and control block to the heap.
    unsafe fn destroy(&mut self, tcb: *mut Tcb) {
        if (*tcb).kernel_stack != 0 {
            kfree((*tcb).kernel_stack as *mut u8);
        }
        kfree(tcb as *mut u8);
    }

    /// Mark the running task Blocked. It stops being rotated until unblocked.
    pub fn block_current(&mut self) {
        if !self.current.is_null() {
            unsafe { (*self.current).state = TaskState::Blocked };
        }
    }

    /// Move a Blocked task back to Ready and queue it. Anything else no-ops.
    pub fn unblock(&mut self, handle: TaskHandle) {
        unsafe {
            if (*handle.0).state == TaskState::Blocked {
                (*handle.0).state = TaskState::Ready;
                self.queue.enqueue(handle.0);
            }
        }
    }

    /// Mark the running task Terminated; the next tick evicts and reclaims it.
    pub fn exit_current(&mut self) {
        if !self.current.is_null() {
            unsafe { (*self.current).state = TaskState::Terminated };
        }
    }

    /// Let timer ticks start switching contexts.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_id(&self) -> Option<u32> {
        if self.current.is_null() {
            None
        } else {
            Some(unsafe { (*self.current).id })
        }
    }

    pub fn ready_len(&self) -> usize {
        self.queue.len()
    }

    pub fn ready_contains(&self, id: u32) -> bool {
        unsafe { self.queue.contains_id(id) }
    }

    /// Snapshot of a task's lifecycle state.
    pub fn state_of(&self, handle: TaskHandle) -> TaskState {
        unsafe { (*handle.0).state }
    }

    /// Snapshot of a task's saved context.
    pub fn context_of(&self, handle: TaskHandle) -> CpuContext {
        unsafe { (*handle.0).context }
    }

    /// Snapshot of a task's remaining timeslice.
    pub fn timeslice_of(&self, handle: TaskHandle) -> u32 {
        unsafe { (*handle.0).timeslice }
    }
}

/// Address tasks start at: the assembly trampoline on hardware, a stub in
/// hosted builds where synthetic frames are inspected but never run.
fn trampoline_entry() -> usize {
    #[cfg(all(target_arch = "x86", not(feature = "std")))]
    {
        extern "C" {
            fn task_trampoline();
        }
        task_trampoline as usize
    }
    #[cfg(not(all(target_arch = "x86", not(feature = "std"))))]
    {
        extern "C" fn hosted_trampoline() {}
        hosted_trampoline as usize
    }
}

// ---------------------------------------------------------------------------
// Global scheduler
// ---------------------------------------------------------------------------

static SCHED: Mutex<Scheduler> = Mutex::new(Scheduler::new());

fn with_sched<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    arch::without_interrupts(|| f(&mut SCHED.lock()))
}

/// Adopt the boot context as the idle task of the global scheduler.
pub fn init() {
    let directory = PhysAddr::new(arch::current_page_directory());
    with_sched(|sched| sched.init(directory)).expect("out of memory building the idle task");
}

/// Spawn a kernel task on the global scheduler.
pub fn spawn(name: &str, entry: extern "C" fn()) -> Result<TaskHandle, TaskError> {
    with_sched(|sched| sched.spawn(name, entry))
}

/// The timer's tick sink: rotate the global scheduler.
pub fn on_timer_tick(frame: &mut InterruptFrame) {
    // Already in interrupt context; the lock is uncontended on one CPU.
    SCHED.lock().on_tick(frame);
}

/// Allow preemption to start switching tasks.
pub fn enable() {
    with_sched(|sched| sched.enable());
}

pub fn current_id() -> Option<u32> {
    with_sched(|sched| sched.current_id())
}

/// Give up the rest of this timeslice: halt until the next tick has fired.
pub fn yield_now() {
    #[cfg(all(target_arch = "x86", not(feature = "std")))]
    {
        let seen = crate::timer::ticks();
        while crate::timer::ticks() == seen {
            arch::enable_interrupts_and_halt();
        }
    }
    #[cfg(not(all(target_arch = "x86", not(feature = "std"))))]
    arch::halt();
}

/// Block the running task and yield until something unblocks it.
pub fn block() {
    with_sched(|sched| sched.block_current());
    yield_now();
}

/// Make a blocked task runnable again.
pub fn unblock(handle: TaskHandle) {
    with_sched(|sched| sched.unblock(handle));
}

/// Terminate the running task. The halt loop ends at the next tick, which
/// evicts the task for good.
pub fn exit() -> ! {
    with_sched(|sched| sched.exit_current());
    loop {
        arch::enable_interrupts_and_halt();
    }
}

/// Trampoline target for a task entry that returns.
#[no_mangle]
pub extern "C" fn task_exit() {
    exit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::InterruptFrame;

    extern "C" fn noop_entry() {}

    fn fresh() -> Scheduler {
        crate::memory::init_hosted();
        let mut sched = Scheduler::new();
        sched.init(PhysAddr::new(0x1000)).unwrap();
        sched
    }

    fn tick_frame() -> InterruptFrame {
        InterruptFrame {
            vector: crate::interrupts::IRQ_BASE,
            eip: 0x401000,
            cs: KERNEL_CODE_SELECTOR,
            eflags: EFLAGS_IF | EFLAGS_RESERVED,
            esp: 0xBEEF_0000,
            eax: 0x11,
            ebx: 0x22,
            ..Default::default()
        }
    }

    #[test]
    fn init_adopts_the_boot_context_as_idle() {
        let sched = fresh();
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));
        assert_eq!(sched.ready_len(), 0);
    }

    #[test]
    fn spawn_builds_a_ready_task_with_a_synthetic_frame() {
        let mut sched = fresh();
        let task = sched.spawn("worker", noop_entry).unwrap();
        assert_eq!(task.id(), 1);
        assert_eq!(sched.state_of(task), TaskState::Ready);
        assert_eq!(sched.ready_len(), 1);
        assert!(sched.ready_contains(1));

        let context = sched.context_of(task);
        assert_eq!(context.cs, KERNEL_CODE_SELECTOR);
        assert_eq!(context.ds, KERNEL_DATA_SELECTOR);
        assert_eq!(context.eflags, EFLAGS_IF | EFLAGS_RESERVED);
        assert_eq!(context.eax, 0);
        assert_eq!(context.ebx, 0);

        // The synthetic frame on the new stack: eip, cs, eflags, entry.
        unsafe {
            let sp = context.esp as *const usize;
            assert_eq!(sp.read(), context.eip);
            assert_eq!(sp.add(1).read(), KERNEL_CODE_SELECTOR);
            assert_eq!(sp.add(2).read(), EFLAGS_IF | EFLAGS_RESERVED);
            assert_eq!(sp.add(3).read(), noop_entry as usize);
        }
    }

    #[test]
    fn disabled_scheduler_leaves_the_frame_alone() {
        let mut sched = fresh();
        sched.spawn("worker", noop_entry).unwrap();
        let mut frame = tick_frame();
        let before = frame;
        sched.on_tick(&mut frame);
        assert_eq!(frame.eip, before.eip);
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));
    }

    #[test]
    fn tick_switches_to_the_spawned_task_and_saves_idle() {
        let mut sched = fresh();
        let worker = sched.spawn("worker", noop_entry).unwrap();
        sched.enable();

        let mut frame = tick_frame();
        let boot_esp = frame.esp;
        sched.on_tick(&mut frame);

        // Worker is now running; idle rotated into the queue.
        assert_eq!(sched.current_id(), Some(worker.id()));
        assert_eq!(sched.state_of(worker), TaskState::Running);
        assert!(sched.ready_contains(IDLE_TASK_ID));
        assert!(!sched.ready_contains(worker.id()));

        // The frame now carries the worker's synthetic context...
        let context = sched.context_of(worker);
        assert_eq!(frame.eip, context.eip);
        assert_eq!(frame.cs, context.cs);
        assert_eq!(frame.eax, 0);
        // ...except the kernel stack pointer, which the stub keeps.
        assert_eq!(frame.esp, boot_esp);
    }

    #[test]
    fn idle_context_is_captured_on_eviction() {
        let mut sched = fresh();
        sched.spawn("worker", noop_entry).unwrap();
        sched.enable();

        let mut frame = tick_frame();
        sched.on_tick(&mut frame);

        // Rotate again from a frame with different register values; the
        // restore must overwrite them with idle's saved context.
        let mut idle_frame = tick_frame();
        idle_frame.eip = 0x500000;
        idle_frame.eax = 0x99;
        idle_frame.ebx = 0x98;
        sched.on_tick(&mut idle_frame); // worker -> idle
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));
        assert_eq!(idle_frame.eip, 0x401000);
        assert_eq!(idle_frame.eax, 0x11);
        assert_eq!(idle_frame.ebx, 0x22);
    }

    #[test]
    fn three_tasks_rotate_round_robin() {
        let mut sched = fresh();
        let t1 = sched.spawn("one", noop_entry).unwrap();
        let t2 = sched.spawn("two", noop_entry).unwrap();
        let t3 = sched.spawn("three", noop_entry).unwrap();
        sched.enable();

        let mut order = Vec::new();
        let mut frame = tick_frame();
        for _ in 0..8 {
            sched.on_tick(&mut frame);
            order.push(sched.current_id().unwrap());
        }
        assert_eq!(
            order,
            vec![
                t1.id(),
                t2.id(),
                t3.id(),
                IDLE_TASK_ID,
                t1.id(),
                t2.id(),
                t3.id(),
                IDLE_TASK_ID
            ]
        );
    }

    #[test]
    fn exactly_one_task_runs_and_queue_holds_the_ready_ones() {
        let mut sched = fresh();
        let t1 = sched.spawn("one", noop_entry).unwrap();
        let t2 = sched.spawn("two", noop_entry).unwrap();
        sched.enable();

        let mut frame = tick_frame();
        sched.on_tick(&mut frame);

        let running = [
            sched.state_of(t1) == TaskState::Running,
            sched.state_of(t2) == TaskState::Running,
        ];
        assert_eq!(running.iter().filter(|&&r| r).count(), 1);
        assert_eq!(sched.ready_len(), 2); // the other task plus idle
        let current = sched.current_id().unwrap();
        assert!(!sched.ready_contains(current));
    }

    #[test]
    fn timeslice_decrements_on_eviction_and_resets_on_pick() {
        let mut sched = fresh();
        let worker = sched.spawn("worker", noop_entry).unwrap();
        sched.enable();

        let mut frame = tick_frame();
        sched.on_tick(&mut frame); // worker picked: slice reset to 10
        assert_eq!(sched.timeslice_of(worker), DEFAULT_TIMESLICE);
        sched.on_tick(&mut frame); // worker evicted: decremented to 9
        assert_eq!(sched.timeslice_of(worker), DEFAULT_TIMESLICE - 1);
    }

    #[test]
    fn empty_queue_keeps_the_current_task_running() {
        let mut sched = fresh();
        sched.enable();
        let mut frame = tick_frame();
        sched.on_tick(&mut frame);
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));
        assert_eq!(sched.ready_len(), 0);
    }

    #[test]
    fn blocked_task_leaves_the_rotation_until_unblocked() {
        let mut sched = fresh();
        let worker = sched.spawn("worker", noop_entry).unwrap();
        sched.enable();

        let mut frame = tick_frame();
        sched.on_tick(&mut frame); // worker running
        sched.block_current();
        assert_eq!(sched.state_of(worker), TaskState::Blocked);

        sched.on_tick(&mut frame); // eviction without save or requeue
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));
        assert!(!sched.ready_contains(worker.id()));

        sched.on_tick(&mut frame);
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));

        sched.unblock(worker);
        assert_eq!(sched.state_of(worker), TaskState::Ready);
        assert!(sched.ready_contains(worker.id()));

        sched.on_tick(&mut frame);
        assert_eq!(sched.current_id(), Some(worker.id()));
    }

    #[test]
    fn unblocking_a_ready_task_is_a_noop() {
        let mut sched = fresh();
        let worker = sched.spawn("worker", noop_entry).unwrap();
        sched.unblock(worker);
        assert_eq!(sched.ready_len(), 1, "no duplicate enqueue");
    }

    #[test]
    fn exited_task_is_evicted_and_never_requeued() {
        let mut sched = fresh();
        let worker = sched.spawn("worker", noop_entry).unwrap();
        let worker_id = worker.id();
        sched.enable();

        let mut frame = tick_frame();
        sched.on_tick(&mut frame); // worker running
        sched.exit_current();

        sched.on_tick(&mut frame); // eviction reclaims the block
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));
        assert!(!sched.ready_contains(worker_id));

        // Further rotation never resurrects it.
        sched.on_tick(&mut frame);
        assert_eq!(sched.current_id(), Some(IDLE_TASK_ID));
    }

    #[test]
    fn task_names_are_truncated_cleanly() {
        let mut sched = fresh();
        let task = sched
            .spawn("a-name-much-longer-than-the-field", noop_entry)
            .unwrap();
        unsafe {
            assert_eq!((*task.0).name_str().len(), NAME_LEN - 1);
        }
    }
}
