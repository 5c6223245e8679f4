//! Global virtual time, the timer queue and executor interleaving state.
//!
//! The scheduler itself never calls into devices; the machine run loop asks
//! it for the next slice boundary, the executor order and the due timers, and
//! reports back what the executors consumed.

mod timer;

pub use timer::{FiredTimer, TimerHandle, TimerOwner, TimerQueue};

use std::collections::HashMap;

use crate::device::DeviceId;
use crate::execute::{ExecSlot, SuspendReason};
use crate::fault::TimerError;
use crate::save::StateIo;
use crate::time::Attotime;

/// Device-local timer identifier passed back to `timer_expired`.
pub type TimerId = u32;

/// Global time keeper and executor bookkeeping.
#[derive(Debug)]
pub struct Scheduler {
    basetime: Attotime,
    min_quantum: Attotime,
    timers: TimerQueue,
    slots: Vec<ExecSlot>,
    by_device: HashMap<DeviceId, usize>,
    current: Option<usize>,
    current_consumed: u64,
    callback_time: Option<Attotime>,
    abort_requested: bool,
    slice_end: Attotime,
}

impl Scheduler {
    /// Creates a scheduler at time zero with the given minimum quantum.
    #[must_use]
    pub fn new(min_quantum: Attotime) -> Self {
        Self {
            basetime: Attotime::ZERO,
            min_quantum,
            timers: TimerQueue::new(),
            slots: Vec::new(),
            by_device: HashMap::new(),
            current: None,
            current_consumed: 0,
            callback_time: None,
            abort_requested: false,
            slice_end: Attotime::NEVER,
        }
    }

    /// Committed global time: the end of the last completed slice.
    #[must_use]
    pub const fn basetime(&self) -> Attotime {
        self.basetime
    }

    /// Current time as observed by whoever is running.
    ///
    /// Inside a timer callback this is the timer's scheduled expiry; inside
    /// an executor it is that executor's local time including any progress it
    /// reported; otherwise it is the base time.
    #[must_use]
    pub fn time(&self) -> Attotime {
        if let Some(time) = self.callback_time {
            return time;
        }
        if let Some(slot) = self.current.and_then(|index| self.slots.get(index)) {
            return slot.local_time_after(self.current_consumed, self.basetime);
        }
        self.basetime
    }

    /// Timer storage.
    #[must_use]
    pub const fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Mutable timer storage.
    pub fn timers_mut(&mut self) -> &mut TimerQueue {
        &mut self.timers
    }

    /// Configured minimum quantum.
    #[must_use]
    pub const fn min_quantum(&self) -> Attotime {
        self.min_quantum
    }

    /// Slice length actually used: never shorter than one cycle of the
    /// slowest runnable executor, so every executor can make progress.
    #[must_use]
    pub fn effective_quantum(&self) -> Attotime {
        self.slots
            .iter()
            .filter(|slot| !slot.is_suspended())
            .map(ExecSlot::cycle_period)
            .fold(self.min_quantum, Attotime::max)
    }

    /// Registers an executor.
    pub fn add_executor(&mut self, slot: ExecSlot) {
        self.by_device.insert(slot.device(), self.slots.len());
        self.slots.push(slot);
    }

    /// Number of registered executors.
    #[must_use]
    pub fn executor_count(&self) -> usize {
        self.slots.len()
    }

    /// Scheduling state of a device, if it executes.
    #[must_use]
    pub fn slot(&self, device: DeviceId) -> Option<&ExecSlot> {
        self.by_device.get(&device).map(|&index| &self.slots[index])
    }

    /// Mutable scheduling state of a device, if it executes.
    pub fn slot_mut(&mut self, device: DeviceId) -> Option<&mut ExecSlot> {
        let index = *self.by_device.get(&device)?;
        self.slots.get_mut(index)
    }

    /// Slot at registration index.
    #[must_use]
    pub fn slot_at(&self, index: usize) -> Option<&ExecSlot> {
        self.slots.get(index)
    }

    /// Local time of a device: its executor time, or the current time for
    /// devices that do not execute.
    #[must_use]
    pub fn local_time(&self, device: DeviceId) -> Attotime {
        if self.current.is_some_and(|index| self.slots[index].device() == device) {
            return self.time();
        }
        self.slot(device)
            .map_or_else(|| self.time(), |slot| slot.local_time(self.basetime))
    }

    /// End of the next slice for a run towards `target`.
    #[must_use]
    pub fn next_slice_end(&self, target: Attotime) -> Attotime {
        let quantum_end = self.basetime + self.effective_quantum();
        target.min(self.timers.next_expire()).min(quantum_end)
    }

    /// End of the slice being executed, [`Attotime::NEVER`] between runs.
    #[must_use]
    pub const fn slice_end(&self) -> Attotime {
        self.slice_end
    }

    /// Moves the end of the current slice.
    pub fn set_slice_end(&mut self, end: Attotime) {
        self.slice_end = end;
    }

    /// Arms `handle` relative to the current time. A timer landing inside
    /// the running slice cuts the running executor short.
    ///
    /// # Errors
    ///
    /// See [`TimerQueue::adjust`].
    pub fn arm_timer(
        &mut self,
        handle: TimerHandle,
        delay: Attotime,
        period: Option<Attotime>,
    ) -> Result<(), TimerError> {
        let now = self.time();
        self.timers.adjust(handle, now, delay, period)?;
        if now.saturating_add(delay) < self.slice_end {
            self.abort_timeslice();
        }
        Ok(())
    }

    /// Applies pending suspend and resume requests.
    pub fn apply_pending_suspensions(&mut self) {
        let now = self.basetime;
        for slot in &mut self.slots {
            if slot.apply_pending(now) {
                log::trace!(
                    "executor {} is now {}",
                    slot.device(),
                    slot.suspend_reason()
                );
            }
        }
    }

    /// Runnable executors in execution order: least local time first, then
    /// registration order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.slots.len())
            .filter(|&index| !self.slots[index].is_suspended())
            .collect();
        order.sort_by_key(|&index| (self.slots[index].local_time(self.basetime), index));
        order
    }

    /// Requests suspension of `device`. Returns `false` for non-executors.
    ///
    /// Suspending the running executor also asks it to yield.
    pub fn suspend(&mut self, device: DeviceId, reason: SuspendReason) -> bool {
        let running = self.current_device() == Some(device);
        let Some(slot) = self.slot_mut(device) else {
            return false;
        };
        slot.request_suspend(reason);
        if running {
            self.abort_requested = true;
        }
        true
    }

    /// Requests clearing `reason` on `device`. Returns `false` for non-executors.
    pub fn resume(&mut self, device: DeviceId, reason: SuspendReason) -> bool {
        let Some(slot) = self.slot_mut(device) else {
            return false;
        };
        slot.request_resume(reason);
        true
    }

    /// `true` when `device` is suspended now or will be at the next slice.
    #[must_use]
    pub fn is_suspended(&self, device: DeviceId) -> bool {
        self.slot(device)
            .is_some_and(|slot| slot.is_suspended() || !slot.pending_suspend().is_empty())
    }

    /// Executor currently inside `execute`, if any.
    #[must_use]
    pub fn current_device(&self) -> Option<DeviceId> {
        self.current
            .and_then(|index| self.slots.get(index))
            .map(ExecSlot::device)
    }

    /// Marks slot `index` as running.
    pub fn begin_execute(&mut self, index: usize) {
        self.current = Some(index);
        self.current_consumed = 0;
        self.abort_requested = false;
    }

    /// Records progress reported by the running executor mid-budget.
    pub fn report_progress(&mut self, cycles: u64) {
        if self.current.is_some() {
            self.current_consumed = cycles;
        }
    }

    /// Ends the running executor's turn; returns whether it was asked to yield.
    pub fn end_execute(&mut self) -> bool {
        self.current = None;
        self.current_consumed = 0;
        std::mem::take(&mut self.abort_requested)
    }

    /// Asks the running executor to yield at its next opportunity.
    pub fn abort_timeslice(&mut self) {
        if self.current.is_some() {
            self.abort_requested = true;
        }
    }

    /// `true` once a yield was requested for the running executor.
    #[must_use]
    pub const fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    /// Accounts consumed cycles to slot `index`.
    pub fn advance_slot(&mut self, index: usize, cycles: u64) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.advance(cycles);
        }
    }

    /// Commits global time. Time never moves backwards.
    pub fn commit(&mut self, time: Attotime) {
        if time > self.basetime {
            self.basetime = time;
        }
    }

    /// Enters a timer callback for `fired`.
    pub fn begin_callback(&mut self, fired: &FiredTimer) {
        self.callback_time = Some(fired.expire.max(self.basetime));
    }

    /// Leaves a timer callback.
    pub fn end_callback(&mut self) {
        self.callback_time = None;
    }

    /// Pops the next timer due at the committed time.
    pub fn pop_due(&mut self) -> Option<FiredTimer> {
        self.timers.pop_due(self.basetime)
    }

    /// Rebases every executor at the committed time.
    pub fn rebase_all(&mut self) {
        let now = self.basetime;
        for slot in &mut self.slots {
            slot.rebase(now);
        }
    }

    pub(crate) fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("$time", &mut self.basetime);
    }
}
