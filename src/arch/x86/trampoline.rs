/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Raw entry points for CPU exceptions, IRQs and the system call interrupt.
//!
//! Each stub normalizes the CPU-provided stack frame into the layout of [`super::idt::IntFrame`]
//! and hands it off to [`crate::int::interrupt_handler`]. Vectors 8, 10-14 and 17 receive a CPU
//! error code; the others get a synthetic zero pushed in its place so every stub leaves the same
//! shape on the stack before falling into the common tail.
//!
//! The tail never branches on whether a ring transition occurred: on entry from ring 3 the CPU
//! already pushed `ss`/`esp` ahead of `eflags`/`cs`/`eip`, and `iretd` restores them
//! automatically by inspecting the popped `cs`'s RPL, so the same code path handles both cases.

use core::arch::global_asm;

global_asm!(
	r#"
.macro isr_noerr num
.global error\num
error\num:
	push 0
	push \num
	jmp int_common
.endm

.macro isr_err num
.global error\num
error\num:
	push \num
	jmp int_common
.endm

.macro irq_stub num, vec
.global irq\num
irq\num:
	push 0
	push \vec
	jmp int_common
.endm

int_common:
	push fs
	push gs
	push ebp
	push edi
	push esi
	push edx
	push ecx
	push ebx
	push eax

	push esp
	call interrupt_handler
	add esp, 4

	pop eax
	pop ebx
	pop ecx
	pop edx
	pop esi
	pop edi
	pop ebp
	pop gs
	pop fs

	add esp, 8
	iretd

isr_noerr 0
isr_noerr 1
isr_noerr 2
isr_noerr 3
isr_noerr 4
isr_noerr 5
isr_noerr 6
isr_noerr 7
isr_err   8
isr_noerr 9
isr_err   10
isr_err   11
isr_err   12
isr_err   13
isr_err   14
isr_noerr 15
isr_noerr 16
isr_err   17
isr_noerr 18
isr_noerr 19
isr_noerr 20
isr_noerr 21
isr_noerr 22
isr_noerr 23
isr_noerr 24
isr_noerr 25
isr_noerr 26
isr_noerr 27
isr_noerr 28
isr_noerr 29
isr_noerr 30
isr_noerr 31

irq_stub 0, 32
irq_stub 1, 33
irq_stub 2, 34
irq_stub 3, 35
irq_stub 4, 36
irq_stub 5, 37
irq_stub 6, 38
irq_stub 7, 39
irq_stub 8, 40
irq_stub 9, 41
irq_stub 10, 42
irq_stub 11, 43
irq_stub 12, 44
irq_stub 13, 45
irq_stub 14, 46
irq_stub 15, 47

.global syscall_int
syscall_int:
	push 0
	push 0x80
	jmp int_common
"#
);
