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

//! Synchronization primitives.
//!
//! The kernel is single-core, so the only source of concurrency is interrupt handlers running on
//! top of whatever the CPU was doing. [`IntMutex`] protects against that by masking interrupts for
//! the duration of the critical section; plain [`Spin`] leaves them enabled and is for data that
//! interrupt handlers never touch.

pub mod atomic;
pub mod once;
pub mod spin;

use spin::Spin;

pub use spin::SpinGuard;

/// A lock that masks interrupts while held.
///
/// Any global state an interrupt handler may also touch (the scheduler run queue, the PMM bitmap,
/// device registers) must be protected by this rather than [`Spin`], or a handler firing mid
/// critical-section would deadlock the CPU against itself.
pub type IntMutex<T> = Spin<T, false>;
/// Guard returned by locking an [`IntMutex`].
pub type IntMutexGuard<'m, T> = SpinGuard<'m, T, false>;
