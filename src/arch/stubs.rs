//! Interrupt entry stubs
//!
//! One tiny stub per vector 0-47. The CPU pushes an error code for a few
//! exceptions only; every other stub pushes a zero placeholder so the common
//! path can materialize a single, uniform frame layout: vector and error
//! code on top of the hardware frame, then the `pusha` block and the data
//! segment. That in-memory layout is `interrupts::InterruptFrame`.
//!
//! The common stub hands the frame pointer to `isr_dispatch`, and on return
//! pops the very same memory back into the CPU - which is why a handler that
//! rewrote the frame ends up switching contexts.
//!
//! `task_trampoline` is the first instruction every spawned task executes:
//! interrupts on, pop the entry pointer the scheduler parked on the new
//! stack, call it, and fall into task exit if it ever returns.

#![cfg(all(target_arch = "x86", not(feature = "std")))]

use core::arch::global_asm;

global_asm!(
    r#"
.section .text

.macro ISR_NOERR vector
    .global isr_stub_\vector
isr_stub_\vector:
    push 0
    push \vector
    jmp isr_common
.endm

.macro ISR_ERR vector
    .global isr_stub_\vector
isr_stub_\vector:
    push \vector
    jmp isr_common
.endm

ISR_NOERR 0
ISR_NOERR 1
ISR_NOERR 2
ISR_NOERR 3
ISR_NOERR 4
ISR_NOERR 5
ISR_NOERR 6
ISR_NOERR 7
ISR_ERR   8
ISR_NOERR 9
ISR_ERR   10
ISR_ERR   11
ISR_ERR   12
ISR_ERR   13
ISR_ERR   14
ISR_NOERR 15
ISR_NOERR 16
ISR_ERR   17
ISR_NOERR 18
ISR_NOERR 19
ISR_NOERR 20
ISR_NOERR 21
ISR_NOERR 22
ISR_NOERR 23
ISR_NOERR 24
ISR_NOERR 25
ISR_NOERR 26
ISR_NOERR 27
ISR_NOERR 28
ISR_NOERR 29
ISR_ERR   30
ISR_NOERR 31
ISR_NOERR 32
ISR_NOERR 33
ISR_NOERR 34
ISR_NOERR 35
ISR_NOERR 36
ISR_NOERR 37
ISR_NOERR 38
ISR_NOERR 39
ISR_NOERR 40
ISR_NOERR 41
ISR_NOERR 42
ISR_NOERR 43
ISR_NOERR 44
ISR_NOERR 45
ISR_NOERR 46
ISR_NOERR 47

isr_common:
    pusha
    push ds
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    cld
    push esp
    call isr_dispatch
    add esp, 4
    pop ds
    popa
    add esp, 8
    iretd

.global task_trampoline
task_trampoline:
    sti
    pop eax
    call eax
    call task_exit
2:
    hlt
    jmp 2b

.section .rodata
.global isr_stub_table
.align 4
isr_stub_table:
    .long isr_stub_0
    .long isr_stub_1
    .long isr_stub_2
    .long isr_stub_3
    .long isr_stub_4
    .long isr_stub_5
    .long isr_stub_6
    .long isr_stub_7
    .long isr_stub_8
    .long isr_stub_9
    .long isr_stub_10
    .long isr_stub_11
    .long isr_stub_12
    .long isr_stub_13
    .long isr_stub_14
    .long isr_stub_15
    .long isr_stub_16
    .long isr_stub_17
    .long isr_stub_18
    .long isr_stub_19
    .long isr_stub_20
    .long isr_stub_21
    .long isr_stub_22
    .long isr_stub_23
    .long isr_stub_24
    .long isr_stub_25
    .long isr_stub_26
    .long isr_stub_27
    .long isr_stub_28
    .long isr_stub_29
    .long isr_stub_30
    .long isr_stub_31
    .long isr_stub_32
    .long isr_stub_33
    .long isr_stub_34
    .long isr_stub_35
    .long isr_stub_36
    .long isr_stub_37
    .long isr_stub_38
    .long isr_stub_39
    .long isr_stub_40
    .long isr_stub_41
    .long isr_stub_42
    .long isr_stub_43
    .long isr_stub_44
    .long isr_stub_45
    .long isr_stub_46
    .long isr_stub_47
"#
);

/// Vectors covered by the stub table.
pub const STUB_COUNT: usize = 48;

extern "C" {
    static isr_stub_table: [usize; STUB_COUNT];
}

/// Entry addresses for vectors 0-47, in vector order.
pub fn stub_table() -> &'static [usize; STUB_COUNT] {
    unsafe { &isr_stub_table }
}
