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

//! The role of the process scheduler is to interrupt the currently running
//! task periodically to switch to another task that is ready to run.
//!
//! Tasks are kept in a circular doubly-linked list threaded through each [`Process`]'s `prev`
//! and `next` links. Picking the next task to run walks this list starting at the successor of
//! the current task, preferring the [`State::Ready`] task with the numerically smallest
//! priority; the idle task only runs when no other task is ready.

pub mod switch;

use crate::{
	arch::x86::{cli, idt::IntFrame, pic, sti},
	errno,
	int,
	int::{CallbackHook, CallbackResult},
	process::{pid::Pid, scheduler::switch::switch, Process, State},
	sync::{atomic::AtomicU64, once::OnceInit, IntMutex},
	time,
};
use core::sync::atomic::Ordering::Relaxed;
use utils::{
	collections::btreemap::BTreeMap,
	errno::EResult,
	ptr::arc::Arc,
};

/// The process scheduler.
pub static SCHEDULER: OnceInit<IntMutex<Scheduler>> = unsafe { OnceInit::new() };

/// The number of ticks given to a task per quantum.
pub(super) const QUANTUM_TICKS: usize = 10;

/// Initializes the scheduler.
pub fn init() -> EResult<()> {
	let sched = Scheduler::new().map_err(|_| errno!(ENOMEM))?;
	unsafe {
		OnceInit::init(&SCHEDULER, IntMutex::new(sched));
	}
	Ok(())
}

/// A process scheduler.
///
/// The kernel is single-core, so there is exactly one instance of this structure.
pub struct Scheduler {
	/// The ticking callback hook, called at a regular interval to make the scheduler work.
	tick_callback_hook: CallbackHook,
	/// The total number of ticks since the instantiation of the scheduler.
	total_ticks: AtomicU64,

	/// Every task registered to the scheduler, keyed by PID.
	processes: BTreeMap<Pid, Arc<IntMutex<Process>>>,
	/// The task currently being executed.
	curr_proc: Arc<IntMutex<Process>>,
	/// The current number of schedulable (ready or running) tasks.
	running_procs: usize,

	/// The task run when no other task is ready.
	idle_task: Arc<IntMutex<Process>>,
}

impl Scheduler {
	/// Creates a new instance of scheduler.
	pub(super) fn new() -> EResult<Self> {
		// Register tick callback
		let mut clocks = time::hw::CLOCKS.lock();
		let pit = clocks.get_mut(b"pit".as_slice()).unwrap();
		let tick_callback_hook = int::register_callback(
			pit.get_interrupt_vector(),
			|_: u32, _: u32, _: &mut IntFrame, _: u8| {
				Scheduler::tick();
				CallbackResult::Continue
			},
		)?
		.unwrap();
		drop(clocks);
		let idle_task = Process::idle_task()?;
		Ok(Self {
			tick_callback_hook,
			total_ticks: AtomicU64::new(0),

			processes: BTreeMap::new(),
			curr_proc: idle_task.clone(),
			running_procs: 0,

			idle_task,
		})
	}

	/// Returns the total number of ticks since the instantiation of the scheduler.
	pub fn get_total_ticks(&self) -> u64 {
		self.total_ticks.load(Relaxed)
	}

	/// Returns the current number of processes on the scheduler.
	#[inline]
	pub fn processes_count(&self) -> usize {
		self.processes.len()
	}

	/// Returns the process with PID `pid`.
	///
	/// If the process doesn't exist, the function returns `None`.
	pub fn get_by_pid(&self, pid: Pid) -> Option<Arc<IntMutex<Process>>> {
		self.processes.get(&pid).cloned()
	}

	/// Returns the process with TID `tid`.
	///
	/// If the process doesn't exist, the function returns `None`.
	pub fn get_by_tid(&self, tid: Pid) -> Option<Arc<IntMutex<Process>>> {
		self.processes
			.iter()
			.find(|(_, proc)| proc.lock().tid == tid)
			.map(|(_, proc)| proc.clone())
	}

	/// Returns the current running process.
	pub fn get_current_process(&self) -> Arc<IntMutex<Process>> {
		self.curr_proc.clone()
	}

	/// Splices task `pid` into the circular list, right before the current task.
	fn link(&mut self, pid: Pid, proc: &Arc<IntMutex<Process>>) {
		let curr_pid = self.curr_proc.lock().pid;
		if self.processes.is_empty() {
			let mut p = proc.lock();
			p.next = Some(pid);
			p.prev = Some(pid);
			return;
		}
		let Some(curr) = self.processes.get(&curr_pid) else {
			return;
		};
		let prev_pid = curr.lock().prev;
		{
			let mut p = proc.lock();
			p.next = Some(curr_pid);
			p.prev = prev_pid;
		}
		if let Some(prev_pid) = prev_pid {
			if let Some(prev) = self.processes.get(&prev_pid) {
				prev.lock().next = Some(pid);
			}
		}
		curr.lock().prev = Some(pid);
	}

	/// Removes task `pid` from the circular list.
	fn unlink(&mut self, pid: Pid) {
		let Some(proc) = self.processes.get(&pid) else {
			return;
		};
		let (prev_pid, next_pid) = {
			let p = proc.lock();
			(p.prev, p.next)
		};
		if prev_pid == Some(pid) {
			// Was the only task in the list
			return;
		}
		if let Some(prev_pid) = prev_pid {
			if let Some(prev) = self.processes.get(&prev_pid) {
				prev.lock().next = next_pid;
			}
		}
		if let Some(next_pid) = next_pid {
			if let Some(next) = self.processes.get(&next_pid) {
				next.lock().prev = prev_pid;
			}
		}
	}

	/// Adds a process to the scheduler, splicing it into the circular run list.
	pub fn add_process(&mut self, proc: Process) -> EResult<Arc<IntMutex<Process>>> {
		let pid = proc.pid;
		let schedulable = proc.get_state().is_schedulable();
		let arc = Arc::new(IntMutex::new(proc)).map_err(|_| errno!(ENOMEM))?;
		self.link(pid, &arc);
		self.processes.insert(pid, arc.clone()).map_err(|_| errno!(ENOMEM))?;
		if schedulable {
			self.increment_running();
		}
		Ok(arc)
	}

	/// Removes the process with the given pid `pid`.
	///
	/// If the process is not attached to this scheduler, the function does nothing.
	pub fn remove_process(&mut self, pid: Pid) {
		self.unlink(pid);
		let proc = self.processes.remove(&pid);
		if let Some(proc) = proc {
			if proc.lock().get_state().is_schedulable() {
				self.decrement_running();
			}
		}
	}

	/// Returns the current ticking frequency of the scheduler.
	pub fn get_ticking_frequency(&self) -> u32 {
		(10 * self.running_procs.max(1)) as _
	}

	/// Increments the number of schedulable processes.
	pub fn increment_running(&mut self) {
		self.running_procs += 1;
		let mut clocks = time::hw::CLOCKS.lock();
		let pit = clocks.get_mut(b"pit".as_slice()).unwrap();
		pit.set_frequency(self.get_ticking_frequency());
		pit.set_enabled(true);
	}

	/// Decrements the number of schedulable processes.
	pub fn decrement_running(&mut self) {
		self.running_procs = self.running_procs.saturating_sub(1);
		let mut clocks = time::hw::CLOCKS.lock();
		let pit = clocks.get_mut(b"pit".as_slice()).unwrap();
		if self.running_procs == 0 {
			pit.set_enabled(false);
		} else {
			pit.set_frequency(self.get_ticking_frequency());
		}
	}

	/// Selects the next task to run.
	///
	/// Starting at the successor of the current task, walks the circular list once. Among
	/// [`State::Ready`] tasks, the one with the numerically smallest priority wins; ties go to
	/// whichever is encountered first, preserving round-robin fairness within a priority level.
	/// Returns the idle task if none are ready.
	fn next_task(&self) -> Arc<IntMutex<Process>> {
		let (curr_pid, start) = {
			let curr = self.curr_proc.lock();
			(curr.pid, curr.next)
		};
		let Some(start) = start else {
			return self.idle_task.clone();
		};
		let mut best: Option<(usize, Arc<IntMutex<Process>>)> = None;
		let mut pid = start;
		loop {
			let Some(proc) = self.processes.get(&pid) else {
				break;
			};
			let (state, priority, next) = {
				let p = proc.lock();
				(*p.get_state(), p.priority, p.next)
			};
			if state == State::Ready {
				let better = match &best {
					Some((best_prio, _)) => priority < *best_prio,
					None => true,
				};
				if better {
					best = Some((priority, proc.clone()));
				}
			}
			let Some(next_pid) = next else {
				break;
			};
			pid = next_pid;
			if pid == curr_pid {
				break;
			}
		}
		best.map(|(_, proc)| proc).unwrap_or_else(|| self.idle_task.clone())
	}

	/// Swaps the current running task for `next`, returning the previous one.
	///
	/// Demotes the outgoing task from [`State::Running`] to [`State::Ready`] (unless it has
	/// already left `Running`, e.g. by sleeping or exiting) and promotes `next` to `Running`.
	fn swap_current_process(&mut self, next: Arc<IntMutex<Process>>) -> Arc<IntMutex<Process>> {
		let prev = core::mem::replace(&mut self.curr_proc, next.clone());
		{
			let mut p = prev.lock();
			if *p.get_state() == State::Running {
				p.set_state(State::Ready);
			}
		}
		next.lock().set_state(State::Running);
		prev
	}

	/// Performs the low-level context switch from `prev` to `next`.
	///
	/// Locks both tasks just long enough to obtain raw pointers to their data, then drops the
	/// guards before switching stacks. On a single-core kernel with interrupts disabled, nothing
	/// else can observe or mutate a task while it isn't running, so this is sound; it also avoids
	/// leaving the outgoing task's own lock guard frozen on its suspended stack until it resumes.
	fn do_switch(prev: &Arc<IntMutex<Process>>, next: &Arc<IntMutex<Process>>) {
		let prev_ptr = &mut *prev.lock() as *mut Process;
		let next_ptr = &mut *next.lock() as *mut Process;
		unsafe {
			switch(&mut *prev_ptr, &mut *next_ptr);
		}
	}

	/// Promotes every [`State::Sleeping`] task whose wake tick has elapsed to [`State::Ready`].
	fn wake_sleepers(&self, now: u64) {
		for (_, proc) in self.processes.iter() {
			let mut p = proc.lock();
			if *p.get_state() == State::Sleeping && now >= p.wake_tick {
				p.set_state(State::Ready);
			}
		}
	}

	/// Ticks the scheduler.
	///
	/// Wakes elapsed sleepers and decrements the current task's quantum. Once the quantum is
	/// exhausted, picks the next task to run and switches context, unless the same task is
	/// chosen again. The end-of-interrupt signal is always sent, whether or not a switch
	/// happened, so that the next tick can be delivered.
	pub fn tick() {
		cli();
		let switch_targets = {
			let mut sched = SCHEDULER.lock();
			let ticks = sched.total_ticks.fetch_add(1, Relaxed) + 1;
			sched.wake_sleepers(ticks);
			let quantum_expired = {
				let mut curr = sched.curr_proc.lock();
				curr.quantum_remaining = curr.quantum_remaining.saturating_sub(1);
				curr.quantum_remaining == 0
			};
			quantum_expired.then(|| sched.next_task()).and_then(|next| {
				if Arc::ptr_eq(&next, &sched.curr_proc) {
					None
				} else {
					sched.curr_proc.lock().quantum_remaining = QUANTUM_TICKS;
					next.lock().quantum_remaining = QUANTUM_TICKS;
					let prev = sched.swap_current_process(next.clone());
					Some((prev, next))
				}
			})
		};
		pic::end_of_interrupt(0);
		if let Some((prev, next)) = switch_targets {
			Self::do_switch(&prev, &next);
		}
		sti();
	}

	/// Voluntarily gives up the CPU.
	///
	/// Picks the next task to run, demotes the current task to [`State::Ready`] (unless it left
	/// `Running` for another reason, such as exiting or sleeping), promotes the chosen task and
	/// switches context. A no-op if no other task is ready.
	pub fn yield_now() {
		let int_state = crate::arch::x86::is_interrupt_enabled();
		cli();
		let switch_targets = {
			let mut sched = SCHEDULER.lock();
			let next = sched.next_task();
			if Arc::ptr_eq(&next, &sched.curr_proc) {
				None
			} else {
				sched.curr_proc.lock().quantum_remaining = QUANTUM_TICKS;
				next.lock().quantum_remaining = QUANTUM_TICKS;
				let prev = sched.swap_current_process(next.clone());
				Some((prev, next))
			}
		};
		if let Some((prev, next)) = switch_targets {
			Self::do_switch(&prev, &next);
		}
		if int_state {
			sti();
		}
	}

	/// Puts the current task to sleep for at least `ms` milliseconds, then yields.
	///
	/// The wake tick is computed from the PIT's current tick rate; [`Self::wake_sleepers`],
	/// called on every tick, promotes expired sleepers back to [`State::Ready`].
	pub fn sleep_ms(ms: u64) {
		let freq = {
			let sched = SCHEDULER.lock();
			sched.get_ticking_frequency().max(1) as u64
		};
		let ticks = ((ms * freq) / 1000).max(1);
		{
			let sched = SCHEDULER.lock();
			let now = sched.total_ticks.load(Relaxed);
			let mut curr = sched.curr_proc.lock();
			curr.wake_tick = now + ticks;
			curr.set_state(State::Sleeping);
		}
		Self::yield_now();
	}

	/// Terminates the current task with the given exit `code`.
	///
	/// Marks the current task [`State::Finished`] with interrupts disabled, then yields the CPU.
	/// Never returns: a task that has exited must never run again.
	pub fn exit(code: i32) -> ! {
		cli();
		{
			let sched = SCHEDULER.lock();
			sched.curr_proc.lock().exit(code);
		}
		Self::yield_now();
		unreachable!("task resumed after exit()");
	}
}
