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

//! System call entry point.
//!
//! The core does not define a syscall ABI of its own; `int 0x80` lands here only so a ring-3
//! task started by the scheduler's entry trampoline has somewhere safe to trap into instead of
//! faulting. Every call number reports "not implemented".

use crate::arch::x86::idt::IntFrame;

/// Raw `int 0x80` entry point, installed into the IDT at [`super::arch::x86::idt::SYSCALL_ENTRY`].
///
/// Defined in [`crate::arch::x86::trampoline`]; it builds an [`IntFrame`] the same way every
/// other vector does and falls into the same [`crate::int::interrupt_handler`] dispatch.
extern "C" {
	pub(crate) fn syscall_int();
}

/// Handles a system call trapped through [`syscall_int`].
///
/// Called by [`crate::int::interrupt_handler`] when `frame.int` is
/// [`crate::arch::x86::idt::SYSCALL_ENTRY`]. The core implements no syscalls; it only completes
/// the trap so a ring-3 task faults predictably rather than double-faulting on an unhandled
/// vector.
pub(crate) fn dispatch(frame: &mut IntFrame) {
	frame.set_syscall_return(Err(-1));
}
