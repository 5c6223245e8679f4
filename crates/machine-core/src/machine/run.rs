//! The run loop: slices of virtual time shared out to executors in
//! least-time order, with timers fired only on slice boundaries.

use super::Machine;
use crate::fault::{FaultReason, MachineError};
use crate::scheduler::TimerOwner;
use crate::time::Attotime;

impl Machine {
    /// Advances the machine until global time reaches `target`.
    ///
    /// Each slice ends at the earliest of `target`, the next timer expiry and
    /// one effective quantum. Every runnable executor is run to the slice end,
    /// least-advanced first; due timers fire once all executors are paused at
    /// the boundary. Timers due exactly at `target` fire before returning.
    ///
    /// # Errors
    ///
    /// [`MachineError::Config`] when the machine is not running and
    /// [`MachineError::Fault`] once a device fault is latched.
    pub fn run_until(&mut self, target: Attotime) -> Result<(), MachineError> {
        if !self.phase.is_running() {
            return Err(self.wrong_phase().into());
        }
        self.check_fault()?;
        self.fire_due_timers();
        self.check_fault()?;
        let result = self.run_slices(target);
        self.scheduler.set_slice_end(Attotime::NEVER);
        result
    }

    /// Advances the machine by `duration` past the committed time.
    ///
    /// # Errors
    ///
    /// See [`Machine::run_until`].
    pub fn run_for(&mut self, duration: Attotime) -> Result<(), MachineError> {
        let target = self.scheduler.basetime().saturating_add(duration);
        self.run_until(target)
    }

    fn run_slices(&mut self, target: Attotime) -> Result<(), MachineError> {
        while self.scheduler.basetime() < target {
            self.scheduler.apply_pending_suspensions();
            let basetime = self.scheduler.basetime();
            let mut slice_end = self.scheduler.next_slice_end(target);
            if slice_end <= basetime {
                slice_end = target.min(self.scheduler.timers().next_expire());
            }
            self.scheduler.set_slice_end(slice_end);
            let planned = slice_end;

            for index in self.scheduler.execution_order() {
                self.run_executor(index, &mut slice_end);
                self.check_fault()?;
            }

            self.scheduler.commit(slice_end);
            self.diag.record_slice(slice_end < planned);
            self.fire_due_timers();
            self.check_fault()?;
        }
        Ok(())
    }

    /// Gives executor `index` its budget up to `slice_end`. A yield shortens
    /// the slice for the executors that run after it.
    fn run_executor(&mut self, index: usize, slice_end: &mut Attotime) {
        let Some(slot) = self.scheduler.slot_at(index) else {
            return;
        };
        let device = slot.device();
        let max_step = slot.max_step_cycles();
        let budget = slot.cycles_until(*slice_end);
        if budget == 0 || slot.is_suspended() {
            return;
        }

        self.scheduler.begin_execute(index);
        let consumed = self
            .with_device(device, |target, ctx| {
                target
                    .executor()
                    .map(|executor| executor.execute(ctx, budget))
            })
            .flatten()
            .unwrap_or(0);
        let suspended = self.scheduler.is_suspended(device);
        let aborted = self.scheduler.end_execute();

        if consumed == 0 && !aborted && !suspended {
            self.latch_fault(device, FaultReason::NoProgress { budget });
        } else if consumed > budget.saturating_add(max_step) {
            self.latch_fault(device, FaultReason::Overrun { budget, consumed });
        }
        self.scheduler.advance_slot(index, consumed);

        let basetime = self.scheduler.basetime();
        if aborted {
            let local = self.scheduler.local_time(device);
            if local > basetime && local < *slice_end {
                *slice_end = local;
            }
        }
        let next_timer = self.scheduler.timers().next_expire().max(basetime);
        *slice_end = (*slice_end).min(next_timer);
        self.scheduler.set_slice_end(*slice_end);
    }

    /// Delivers every timer due at the committed time, in expiry order.
    fn fire_due_timers(&mut self) {
        while self.fault.is_none() {
            let Some(fired) = self.scheduler.pop_due() else {
                break;
            };
            self.scheduler.begin_callback(&fired);
            log::trace!(
                "timer {} (param {:#x}) fired at {}",
                fired.id,
                fired.param,
                fired.expire
            );
            if let TimerOwner::Device(device) = fired.owner {
                self.with_device(device, |target, ctx| {
                    target.timer_expired(ctx, fired.id, fired.param);
                });
            }
            self.scheduler.end_callback();
            if fired.owner == TimerOwner::Sync {
                self.scheduler.timers_mut().remove(fired.handle);
            } else {
                self.scheduler.timers_mut().finish_fire(&fired);
            }
            self.diag.record_timer();
        }
    }
}
