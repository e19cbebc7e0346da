//! Multiboot boot stub
//!
//! The header the bootloader scans for (page-aligned modules + memory map
//! requested, magic, checksum), a 16 KiB boot stack, and `_start`: set up
//! the stack, push the bootloader's register arguments, and call into
//! `kernel_main`. The boot stack later becomes the idle task's stack.

#![cfg(all(target_arch = "x86", not(feature = "std")))]

use core::arch::global_asm;

global_asm!(
    r#"
.section .multiboot, "a"
.align 4
.long 0x1BADB002
.long 0x00000003
.long -(0x1BADB002 + 0x00000003)

.section .bss
.align 16
boot_stack_bottom:
.skip 16384
boot_stack_top:

.section .text
.global _start
_start:
    lea esp, [boot_stack_top]
    push ebx
    push eax
    call kernel_main
2:
    cli
    hlt
    jmp 2b
"#
);
