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

//! Architecture-specific **Hardware Abstraction Layer** (HAL).
//!
//! The kernel targets a single x86 core running in Protected Mode; there is no APIC/SMP support,
//! so all interrupt routing goes through the legacy 8259 PIC.

#[macro_use]
pub mod x86;

/// The name of the current CPU architecture.
pub const ARCH: &str = "x86";

/// Returns the identifier of the CPU core executing the caller.
///
/// The kernel is single-core, so this is always `0`.
pub fn core_id() -> u32 {
	0
}

/// Architecture-specific initialization. Must be called once, early in boot, with interrupts
/// still disabled.
pub fn init() {
	use x86::*;
	cli();
	pic::enable(0x20, 0x28);
	idt::init();
}

/// Sends an End-Of-Interrupt message for the given interrupt `irq`.
pub fn end_of_interrupt(irq: u8) {
	x86::pic::end_of_interrupt(irq);
}
