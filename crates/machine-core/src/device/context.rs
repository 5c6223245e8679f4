//! The context handed to every device hook.
//!
//! A device never holds a reference to the machine. Each hook receives a
//! [`DeviceContext`] that borrows the machine for the duration of the call
//! and knows which device it acts for, so timers, lines and bus accesses are
//! attributed to the caller.

use std::any::Any;

use super::finder::Requirement;
use super::{subtag, Device, DeviceFinder, DeviceId, LineInput, RegionFinder, SpaceFinder};
use crate::execute::SuspendReason;
use crate::fault::{FaultReason, ResourceKind, TimerError};
use crate::line::{LineId, LineState};
use crate::machine::Machine;
use crate::memory::{AccessWidth, AddressSpace, SpaceId};
use crate::scheduler::{TimerHandle, TimerId, TimerOwner};
use crate::time::{self, Attotime};

/// Access to the machine on behalf of one device.
pub struct DeviceContext<'a> {
    machine: &'a mut Machine,
    device: DeviceId,
}

impl<'a> DeviceContext<'a> {
    pub(crate) fn new(machine: &'a mut Machine, device: DeviceId) -> Self {
        Self { machine, device }
    }

    /// Device this context acts for.
    #[must_use]
    pub const fn id(&self) -> DeviceId {
        self.device
    }

    /// Full tag of the device.
    #[must_use]
    pub fn tag(&self) -> &str {
        self.machine.tree.tag(self.device)
    }

    /// The whole machine, read-only.
    #[must_use]
    pub fn machine(&self) -> &Machine {
        &*self.machine
    }

    /// The whole machine. Hooks of the calling device are not reachable
    /// through it while the call is in progress.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut *self.machine
    }

    // Time and clocks

    /// Current virtual time as seen by this call.
    #[must_use]
    pub fn time(&self) -> Attotime {
        self.machine.scheduler.time()
    }

    /// Local time of the device; differs from [`DeviceContext::time`] only
    /// for executors that are not the one running.
    #[must_use]
    pub fn local_time(&self) -> Attotime {
        self.machine.scheduler.local_time(self.device)
    }

    /// Effective clock of the device in Hz.
    #[must_use]
    pub fn clock(&self) -> u32 {
        self.machine.tree.clock(self.device).clock()
    }

    /// Changes the unscaled clock of the device. The `clock_changed` hook
    /// runs once the current hook returns.
    pub fn set_clock(&mut self, hz: u32) {
        self.machine.set_clock(self.device, hz);
    }

    /// Changes the clock scale of the device.
    pub fn set_clock_scale(&mut self, num: u32, den: u32) {
        self.machine.set_clock_scale(self.device, num, den);
    }

    /// Duration of `clocks` cycles of the device clock.
    #[must_use]
    pub fn clocks_to_time(&self, clocks: u64) -> Attotime {
        time::clocks_to_time(clocks, u64::from(self.clock()))
    }

    /// Whole device clock cycles that fit in `duration`.
    #[must_use]
    pub fn time_to_clocks(&self, duration: Attotime) -> u64 {
        time::time_to_clocks(duration, u64::from(self.clock()))
    }

    // Timers

    /// Allocates a disabled timer delivered to this device's
    /// [`Device::timer_expired`] with `id` and `param`.
    pub fn timer(&mut self, id: TimerId, param: u64) -> TimerHandle {
        self.machine
            .scheduler
            .timers_mut()
            .allocate(TimerOwner::Device(self.device), id, param)
    }

    /// Allocates and arms a timer in one go.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidPeriod`] for a zero period; nothing is allocated
    /// in that case.
    pub fn add_timer(
        &mut self,
        id: TimerId,
        delay: Attotime,
        param: u64,
        period: Option<Attotime>,
    ) -> Result<TimerHandle, TimerError> {
        if period.is_some_and(Attotime::is_zero) {
            return Err(TimerError::InvalidPeriod);
        }
        let handle = self.timer(id, param);
        self.adjust_timer(handle, delay, period)?;
        Ok(handle)
    }

    /// (Re)arms a timer `delay` from now. Callable from the timer's own
    /// callback.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidPeriod`] for a zero period. A stale handle is
    /// also latched as a device fault.
    pub fn adjust_timer(
        &mut self,
        handle: TimerHandle,
        delay: Attotime,
        period: Option<Attotime>,
    ) -> Result<(), TimerError> {
        let result = self.machine.scheduler.arm_timer(handle, delay, period);
        if result == Err(TimerError::StaleHandle) {
            self.machine.latch_fault(self.device, FaultReason::StaleTimer);
        }
        result
    }

    /// Frees a timer. Removing twice is a no-op.
    pub fn remove_timer(&mut self, handle: TimerHandle) {
        self.machine.scheduler.timers_mut().remove(handle);
    }

    /// Enables or disables a timer without moving its expiry; returns the
    /// previous state.
    pub fn enable_timer(&mut self, handle: TimerHandle, enable: bool) -> bool {
        match self.machine.scheduler.timers_mut().enable(handle, enable) {
            Some(was) => was,
            None => {
                self.machine.latch_fault(self.device, FaultReason::StaleTimer);
                false
            }
        }
    }

    /// `true` while the timer is armed.
    #[must_use]
    pub fn timer_enabled(&self, handle: TimerHandle) -> bool {
        self.machine.scheduler.timers().is_enabled(handle)
    }

    /// Time until the timer fires, [`Attotime::NEVER`] when disarmed.
    #[must_use]
    pub fn timer_remaining(&self, handle: TimerHandle) -> Attotime {
        self.machine.scheduler.timers().remaining(handle, self.time())
    }

    /// Time since the timer was last armed.
    #[must_use]
    pub fn timer_elapsed(&self, handle: TimerHandle) -> Attotime {
        self.machine.scheduler.timers().elapsed(handle, self.time())
    }

    /// Absolute expiry of the timer.
    #[must_use]
    pub fn timer_expire(&self, handle: TimerHandle) -> Attotime {
        self.machine.scheduler.timers().expire(handle)
    }

    // Scheduling

    /// Forces a slice boundary at the current time so every executor catches
    /// up before anything else runs.
    pub fn synchronize(&mut self) {
        let scheduler = &mut self.machine.scheduler;
        let handle = scheduler.timers_mut().allocate(TimerOwner::Sync, 0, 0);
        if scheduler.arm_timer(handle, Attotime::ZERO, None).is_err() {
            scheduler.timers_mut().remove(handle);
        }
    }

    /// Asks the running executor to return from `execute` early.
    pub fn abort_timeslice(&mut self) {
        self.machine.scheduler.abort_timeslice();
    }

    /// `true` once the running executor was asked to yield; executors poll
    /// this between steps.
    #[must_use]
    pub fn abort_requested(&self) -> bool {
        self.machine.scheduler.abort_requested()
    }

    /// Reports cycles consumed so far inside `execute`, so that
    /// [`DeviceContext::time`] and timers armed from here are exact.
    pub fn report_progress(&mut self, cycles: u64) {
        if self.machine.scheduler.current_device() == Some(self.device) {
            self.machine.scheduler.report_progress(cycles);
        }
    }

    /// Requests suspension of `target` at the next slice boundary.
    pub fn suspend(&mut self, target: DeviceId, reason: SuspendReason) -> bool {
        self.machine.suspend(target, reason)
    }

    /// Requests lifting `reason` from `target` at the next slice boundary.
    pub fn resume(&mut self, target: DeviceId, reason: SuspendReason) -> bool {
        self.machine.resume(target, reason)
    }

    /// Cycles executed by this device since start.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.machine.total_cycles(self.device)
    }

    // Lines

    /// Output line `name` declared by this device.
    #[must_use]
    pub fn line(&self, name: &str) -> Option<LineId> {
        self.machine.lines.find(self.device, name)
    }

    /// Drives an owned line. Listeners have run when this returns, except
    /// listeners that are themselves mid-call; those see the new level
    /// through [`DeviceContext::input_state`] at once and get their
    /// callback from [`DeviceContext::deliver_inputs`] or when they return.
    pub fn set_line(&mut self, line: LineId, state: LineState) {
        self.machine.drive_line(self.device, line, state);
    }

    /// Current level of any line.
    #[must_use]
    pub fn line_state(&self, line: LineId) -> LineState {
        self.machine.lines.state(line)
    }

    /// Level on input `input` of this device, including changes this
    /// device caused through its own bus accesses a moment ago.
    #[must_use]
    pub fn input_state(&self, input: u32) -> LineState {
        self.machine.lines.input_state(self.device, input)
    }

    /// Hands input changes that reached this device while it was mid-call
    /// to `listener`, normally the device itself, in arrival order. They are
    /// not delivered again when the hook returns. Returns how many ran.
    ///
    /// An executor calls this after a bus access that may have raised one
    /// of its own inputs, for example a peripheral acknowledging with an
    /// interrupt.
    pub fn deliver_inputs(&mut self, listener: &mut dyn LineInput) -> usize {
        let mut delivered = 0;
        while let Some((input, state)) = self.machine.take_deferred_input(self.device) {
            listener.input_changed(self, input, state);
            delivered += 1;
        }
        delivered
    }

    // Bus

    /// Reads from `space`. Accesses that land on this device's own handlers
    /// latch a re-entrancy fault.
    pub fn read(&mut self, space: SpaceId, addr: u64, width: AccessWidth) -> u64 {
        self.machine.dispatch_read(space, addr, width)
    }

    /// Writes to `space`.
    pub fn write(&mut self, space: SpaceId, addr: u64, width: AccessWidth, data: u64) {
        self.machine.dispatch_write(space, addr, width, data);
    }

    /// Side-effect free read.
    pub fn read_debug(&mut self, space: SpaceId, addr: u64, width: AccessWidth) -> u64 {
        self.machine.read_debug(space, addr, width)
    }

    /// `true` while servicing a debugger read; handlers must not change state.
    #[must_use]
    pub fn side_effects_disabled(&self) -> bool {
        self.machine.side_effects_disabled()
    }

    /// Space `index` declared by this device.
    #[must_use]
    pub fn own_space(&self, index: usize) -> Option<SpaceId> {
        self.machine.tree.node(self.device).spaces.get(index).copied()
    }

    /// Address space by id.
    #[must_use]
    pub fn space(&self, id: SpaceId) -> Option<&AddressSpace> {
        self.machine.space(id)
    }

    /// Mutable address space, for installing handlers or switching banks.
    /// Changes apply from the next access on.
    pub fn space_mut(&mut self, id: SpaceId) -> Option<&mut AddressSpace> {
        self.machine.space_mut(id)
    }

    // Resolution

    fn absolute(&self, tag: &str) -> String {
        subtag(self.tag(), tag)
    }

    fn record(&mut self, requirement: Requirement) {
        self.machine.requirements.retain(|known| {
            !(known.owner == requirement.owner
                && known.kind == requirement.kind
                && known.resource == requirement.resource
                && known.index == requirement.index)
        });
        self.machine.requirements.push(requirement);
    }

    /// Resolves a device finder. The target may exist without being started.
    pub fn resolve_device<T: Device>(&mut self, finder: &mut DeviceFinder<T>) -> bool {
        let tag = self.absolute(finder.tag());
        let target = self
            .machine
            .tree
            .find(&tag)
            .filter(|&id| self.machine.tree.is_type::<T>(id));
        finder.set_target(target);
        self.record(Requirement {
            owner: self.device,
            kind: ResourceKind::Device,
            resource: tag,
            index: 0,
            required: finder.is_required(),
            found: target.is_some(),
        });
        target.is_some()
    }

    /// Resolves a region finder.
    pub fn resolve_region(&mut self, finder: &mut RegionFinder) -> bool {
        let tag = self.absolute(finder.tag());
        let target = self.machine.region_id(&tag);
        finder.set_target(target);
        self.record(Requirement {
            owner: self.device,
            kind: ResourceKind::Region,
            resource: tag,
            index: 0,
            required: finder.is_required(),
            found: target.is_some(),
        });
        target.is_some()
    }

    /// Resolves a space finder.
    pub fn resolve_space(&mut self, finder: &mut SpaceFinder) -> bool {
        let tag = self.absolute(finder.tag());
        let target = self
            .machine
            .tree
            .find(&tag)
            .and_then(|owner| self.machine.tree.node(owner).spaces.get(finder.index()))
            .copied();
        finder.set_target(target);
        self.record(Requirement {
            owner: self.device,
            kind: ResourceKind::Space,
            resource: tag,
            index: finder.index(),
            required: finder.is_required(),
            found: target.is_some(),
        });
        target.is_some()
    }

    /// Borrows a resolved device; `None` while it is unresolved or busy.
    #[must_use]
    pub fn device<T: Device>(&self, finder: &DeviceFinder<T>) -> Option<&T> {
        self.machine.tree.get::<T>(finder.id()?)
    }

    /// Calls `f` on a resolved device with a context of its own, the way
    /// the device's public methods are meant to be reached.
    pub fn with_device<T: Device, R>(
        &mut self,
        finder: &DeviceFinder<T>,
        f: impl FnOnce(&mut T, &mut DeviceContext<'_>) -> R,
    ) -> Option<R> {
        let id = finder.id()?;
        self.machine
            .with_device(id, |device, ctx| {
                let any: &mut dyn Any = device;
                any.downcast_mut::<T>().map(|device| f(device, ctx))
            })
            .flatten()
    }

    /// Contents of a resolved region.
    #[must_use]
    pub fn region(&self, finder: &RegionFinder) -> Option<&[u8]> {
        let id = finder.id()?;
        self.machine.regions.get(id.index()).map(|region| region.data())
    }

    /// Occupant of the slot at `tag`, relative to this device. An empty slot
    /// is `None`.
    #[must_use]
    pub fn slot_card(&self, tag: &str) -> Option<DeviceId> {
        let tag = self.absolute(tag);
        self.machine
            .slots
            .iter()
            .find(|slot| slot.tag == tag)
            .and_then(|slot| slot.card)
    }
}
