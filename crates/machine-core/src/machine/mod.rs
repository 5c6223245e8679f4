//! The machine: device tree, scheduler, address spaces, lines and slots
//! threaded through every device hook as one explicit context.

mod config;
mod dispatch;
mod run;
mod state;

pub use config::{ClockSpec, MachineConfig, MachineOptions};
pub use state::Phase;

use std::collections::{HashMap, VecDeque};

use config::{Connection, DeviceDecl, Entry, SlotDecl, Target};

use crate::device::finder::Requirement;
use crate::device::{
    parent_tag, subtag, Capability, ClockState, Declarations, Device, DeviceContext, DeviceError,
    DeviceId, DeviceTree, ROOT_TAG,
};
use crate::diag::DiagCounters;
use crate::execute::{ExecSlot, SuspendReason};
use crate::fault::{
    ConfigError, DeviceFault, FaultReason, MachineError, ResourceKind, RestoreError, TimerError,
};
use crate::line::{LineId, LineState, Lines, Listener};
use crate::memory::{AddressSpace, MemoryRegion, RegionId, SpaceId};
use crate::save::{image, FieldDesc, SaveState, StateEntry, StateIo};
use crate::scheduler::Scheduler;
use crate::slot::{Slot, SlotDevice};
use crate::time::Attotime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notification {
    Input { input: u32, state: LineState },
    ClockChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deferred {
    device: DeviceId,
    notification: Notification,
}

enum Visit<'a> {
    Register(&'a mut Vec<FieldDesc>),
    Save(&'a mut Vec<StateEntry>),
    Load {
        entries: &'a [StateEntry],
        cursor: usize,
    },
}

impl Visit<'_> {
    fn io<'b>(&'b mut self, tag: &'b str) -> StateIo<'b> {
        match self {
            Self::Register(out) => StateIo::register(tag, &mut **out),
            Self::Save(out) => StateIo::save(tag, &mut **out),
            Self::Load { entries, cursor } => StateIo::load(tag, *entries, cursor),
        }
    }
}

/// A configured machine.
///
/// Owns every device and all shared emulation state; devices reach it only
/// through the [`DeviceContext`] handed to their hooks.
pub struct Machine {
    pub(crate) options: MachineOptions,
    pub(crate) phase: Phase,
    pub(crate) tree: DeviceTree,
    pub(crate) scheduler: Scheduler,
    pub(crate) spaces: Vec<AddressSpace>,
    pub(crate) lines: Lines,
    pub(crate) slots: Vec<Slot>,
    pub(crate) regions: Vec<MemoryRegion>,
    pub(crate) requirements: Vec<Requirement>,
    derived: HashMap<DeviceId, (u32, u32)>,
    deferred: VecDeque<Deferred>,
    fault: Option<DeviceFault>,
    pub(crate) debug_depth: u32,
    pub(crate) diag: DiagCounters,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("phase", &self.phase)
            .field("time", &self.scheduler.time())
            .field("devices", &self.tree.len())
            .field("spaces", &self.spaces.len())
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Instantiates every configured device, declares their spaces and
    /// lines, plugs slot cards and wires connections.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] found in the configuration.
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        let MachineConfig {
            options,
            entries,
            regions,
            connections,
            plugs,
        } = config;
        let mut machine = Self {
            options,
            phase: Phase::Configured,
            tree: DeviceTree::new(),
            scheduler: Scheduler::new(options.minimum_quantum),
            spaces: Vec::new(),
            lines: Lines::new(),
            slots: Vec::new(),
            regions: Vec::new(),
            requirements: Vec::new(),
            derived: HashMap::new(),
            deferred: VecDeque::new(),
            fault: None,
            debug_depth: 0,
            diag: DiagCounters::new(),
        };

        let mut overrides: HashMap<String, Option<String>> = HashMap::new();
        for (slot, option) in plugs {
            let known = entries
                .iter()
                .any(|entry| matches!(entry, Entry::Slot(decl) if decl.tag == slot));
            if !known {
                return Err(ConfigError::UnknownSlot { slot });
            }
            overrides.insert(slot, option);
        }

        for entry in entries {
            match entry {
                Entry::Device(decl) => machine.add_device(decl)?,
                Entry::Slot(decl) => {
                    let plug = overrides.remove(&decl.tag);
                    machine.add_slot(decl, plug)?;
                }
            }
        }
        let ids: Vec<DeviceId> = machine.tree.ids().collect();
        for id in ids {
            machine.declare(id)?;
        }
        for (tag, data) in regions {
            machine.add_region(tag, data)?;
        }
        for connection in connections {
            machine.connect(connection)?;
        }
        log::debug!(
            "configured machine with {} devices, {} spaces and {} executors",
            machine.tree.len(),
            machine.spaces.len(),
            machine.scheduler.executor_count()
        );
        Ok(machine)
    }

    fn add_device(&mut self, decl: DeviceDecl) -> Result<(), ConfigError> {
        let parent_clock = parent_tag(&decl.tag)
            .and_then(|parent| self.tree.find(parent))
            .map_or(0, |parent| self.tree.clock(parent).clock());
        let clock = decl.clock.resolve(parent_clock);
        let id = self.tree.insert(&decl.tag, (decl.factory)(), clock)?;
        if let ClockSpec::Derived { mul, div } = decl.clock {
            self.derived.insert(id, (mul, div));
        }
        Ok(())
    }

    fn add_slot(
        &mut self,
        decl: SlotDecl,
        plug: Option<Option<String>>,
    ) -> Result<(), ConfigError> {
        let SlotDecl {
            tag,
            clock,
            interface,
            mut options,
            default,
            fixed,
        } = decl;
        if fixed && plug.is_some() {
            return Err(ConfigError::FixedSlot { slot: tag });
        }
        let device = self
            .tree
            .insert(&tag, Box::new(SlotDevice::new(interface)), clock)?;
        let names = options.names();
        let selected = plug.unwrap_or(default);
        let mut card = None;
        if let Some(name) = &selected {
            let option = options
                .take(name)
                .ok_or_else(|| ConfigError::UnknownSlotOption {
                    slot: tag.clone(),
                    option: name.clone(),
                })?;
            let (name, card_clock, factory) = option.into_parts();
            let card_clock = if card_clock == 0 { clock } else { card_clock };
            let id = self.tree.insert(&subtag(&tag, &name), factory(), card_clock)?;
            if !self
                .tree
                .capabilities(id)
                .supports(Capability::Card(interface))
            {
                return Err(ConfigError::IncompatibleCard {
                    slot: tag,
                    option: name,
                    interface,
                });
            }
            card = Some(id);
        }
        log::debug!("slot {tag}: {}", selected.as_deref().unwrap_or("empty"));
        self.slots.push(Slot {
            tag,
            device,
            interface,
            options: names,
            selected,
            card,
            fixed,
        });
        Ok(())
    }

    fn declare(&mut self, id: DeviceId) -> Result<(), ConfigError> {
        let Some(mut device) = self.tree.take(id) else {
            return Ok(());
        };
        let mut decl = Declarations::default();
        device.declare(&mut decl);
        let executor = device.executor().map(|executor| {
            (
                executor.clock_multiplier(),
                executor.clock_divider(),
                executor.max_step_cycles(),
            )
        });
        self.tree.restore(id, device);

        let tag = self.tree.tag(id).to_owned();
        for name in &decl.outputs {
            self.lines.declare(id, name);
        }
        let mut spaces = Vec::with_capacity(decl.spaces.len());
        for (index, config) in decl.spaces.into_iter().enumerate() {
            let space_id =
                SpaceId::from_index(u32::try_from(self.spaces.len()).unwrap_or(u32::MAX));
            let mut space =
                AddressSpace::new(space_id, id, index, &tag, config, self.options.open_bus)?;
            space.set_log_unmapped(self.options.log_unmapped);
            self.spaces.push(space);
            spaces.push(space_id);
        }
        let node = self.tree.node_mut(id);
        node.inputs = decl.inputs;
        node.spaces = spaces;
        if let Some((multiplier, divider, max_step)) = executor {
            let clock = self.tree.clock(id).clock();
            self.scheduler.add_executor(ExecSlot::new(
                id,
                clock,
                multiplier,
                divider,
                max_step,
                Attotime::ZERO,
            ));
        }
        Ok(())
    }

    fn add_region(&mut self, tag: String, data: Vec<u8>) -> Result<(), ConfigError> {
        if self.regions.iter().any(|region| region.name() == tag) {
            return Err(ConfigError::DuplicateRegion { name: tag });
        }
        self.regions.push(MemoryRegion::new(tag, data));
        Ok(())
    }

    fn find_configured(&self, tag: &str) -> Result<DeviceId, ConfigError> {
        self.tree.find(tag).ok_or_else(|| ConfigError::UnknownTag {
            tag: tag.to_owned(),
        })
    }

    fn connect(&mut self, connection: Connection) -> Result<(), ConfigError> {
        let Connection {
            source,
            line,
            target,
            to,
            invert,
        } = connection;
        let source_id = self.find_configured(&source)?;
        let line_id = self
            .lines
            .find(source_id, &line)
            .ok_or(ConfigError::UnknownLine {
                device: source,
                line,
            })?;
        let target_id = self.find_configured(&target)?;
        match to {
            Target::Input(input) => {
                if !self
                    .tree
                    .capabilities(target_id)
                    .supports(Capability::LineInput)
                {
                    return Err(ConfigError::MissingCapability {
                        device: target,
                        capability: Capability::LineInput.name(),
                    });
                }
                let Some(index) = self
                    .tree
                    .node(target_id)
                    .inputs
                    .iter()
                    .position(|name| *name == input)
                else {
                    return Err(ConfigError::UnknownInput {
                        device: target,
                        input,
                    });
                };
                let listener = Listener {
                    device: target_id,
                    input: u32::try_from(index).unwrap_or(u32::MAX),
                    invert,
                };
                if !self.lines.connect(line_id, listener) {
                    return Err(ConfigError::FanIn {
                        device: target,
                        input,
                    });
                }
            }
            Target::Line(name) => {
                let Some(next) = self.lines.find(target_id, &name) else {
                    return Err(ConfigError::UnknownLine {
                        device: target,
                        line: name,
                    });
                };
                if !self.lines.chain(line_id, next, invert) {
                    return Err(ConfigError::FanIn {
                        device: target,
                        input: name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Starts every device, retrying those that report missing dependencies,
    /// validates required resources and finally resets the machine.
    ///
    /// # Errors
    ///
    /// [`MachineError::Config`] for configuration problems (including
    /// unresolved dependencies and missing required resources) and
    /// [`MachineError::Fault`] when a device broke an invariant while starting.
    pub fn start(&mut self) -> Result<(), MachineError> {
        if self.phase != Phase::Configured {
            return Err(self.wrong_phase().into());
        }
        let mut pending: Vec<DeviceId> = self.tree.ids().collect();
        loop {
            let attempted = pending.len();
            let mut deferred = Vec::new();
            for id in pending {
                if !self.start_device(id)? {
                    deferred.push(id);
                }
            }
            if deferred.is_empty() {
                break;
            }
            if deferred.len() == attempted {
                return Err(ConfigError::UnresolvedDependencies {
                    tags: deferred
                        .iter()
                        .map(|&id| self.tree.tag(id).to_owned())
                        .collect(),
                }
                .into());
            }
            pending = deferred;
        }
        self.validate_requirements()?;
        self.warn_unsaved_executors();
        self.phase = Phase::Started;
        log::debug!("machine started");
        self.reset_devices();
        self.check_fault()
    }

    fn start_device(&mut self, id: DeviceId) -> Result<bool, MachineError> {
        self.requirements.retain(|requirement| requirement.owner != id);
        let result = self
            .with_device(id, |device, ctx| device.start(ctx))
            .unwrap_or(Ok(()));
        self.check_fault()?;
        let tag = self.tree.tag(id).to_owned();
        match result {
            Ok(()) => {
                self.tree.node_mut(id).started = true;
                log::debug!("{tag} started");
                Ok(true)
            }
            Err(DeviceError::MissingDependencies) => {
                log::warn!("{tag}: start deferred until dependencies are ready");
                self.scheduler.timers_mut().remove_owned_by(id);
                Ok(false)
            }
            Err(DeviceError::Config(err)) => Err(err.into()),
            Err(DeviceError::Timer(TimerError::InvalidPeriod)) => {
                Err(ConfigError::InvalidPeriod { device: tag }.into())
            }
            Err(DeviceError::Timer(TimerError::StaleHandle)) => Err(DeviceFault {
                tag,
                reason: FaultReason::StaleTimer,
            }
            .into()),
        }
    }

    fn validate_requirements(&self) -> Result<(), ConfigError> {
        match self
            .requirements
            .iter()
            .find(|requirement| requirement.required && !requirement.found)
        {
            Some(missing) => Err(ConfigError::MissingRequired {
                device: self.tree.tag(missing.owner).to_owned(),
                kind: missing.kind,
                resource: if missing.kind == ResourceKind::Space {
                    format!("{}/{}", missing.resource, missing.index)
                } else {
                    missing.resource.clone()
                },
            }),
            None => Ok(()),
        }
    }

    fn warn_unsaved_executors(&mut self) {
        let executors: Vec<DeviceId> = (0..self.scheduler.executor_count())
            .filter_map(|index| self.scheduler.slot_at(index).map(ExecSlot::device))
            .collect();
        for id in executors {
            let tag = self.tree.tag(id).to_owned();
            let Some(mut device) = self.tree.take(id) else {
                continue;
            };
            let mut fields = Vec::new();
            device.state(&mut StateIo::register(&tag, &mut fields));
            self.tree.restore(id, device);
            if fields.is_empty() {
                log::warn!("{tag} executes but registers no save state");
            }
        }
    }

    fn reset_devices(&mut self) {
        let ids: Vec<DeviceId> = self.tree.ids().collect();
        for id in ids {
            self.with_device(id, |device, ctx| device.reset(ctx));
        }
    }

    /// Soft reset: runs every device's `reset` hook and clears a latched fault.
    ///
    /// # Errors
    ///
    /// [`ConfigError::WrongPhase`] unless started; a fault raised by a reset hook.
    pub fn reset(&mut self) -> Result<(), MachineError> {
        if !self.phase.is_running() {
            return Err(self.wrong_phase().into());
        }
        self.fault = None;
        log::debug!("machine reset");
        self.reset_devices();
        self.check_fault()
    }

    /// Hard reset: returns every clock to its configured value, lifts host
    /// and halt suspensions, then performs a soft reset.
    ///
    /// # Errors
    ///
    /// See [`Machine::reset`].
    pub fn hard_reset(&mut self) -> Result<(), MachineError> {
        if !self.phase.is_running() {
            return Err(self.wrong_phase().into());
        }
        let ids: Vec<DeviceId> = self.tree.ids().collect();
        for id in ids {
            let configured = self.tree.clock(id).configured();
            self.update_clock(id, |clock| {
                let scaled = clock.set_scale(1, 1);
                clock.set_unscaled(configured) || scaled
            });
            self.scheduler.resume(
                id,
                SuspendReason::HOST | SuspendReason::HALT | SuspendReason::DISABLE,
            );
        }
        self.reset()
    }

    /// Stops every device in reverse configuration order and frees their timers.
    ///
    /// # Errors
    ///
    /// [`ConfigError::WrongPhase`] unless started.
    pub fn stop(&mut self) -> Result<(), ConfigError> {
        if !self.phase.is_running() {
            return Err(self.wrong_phase());
        }
        let ids: Vec<DeviceId> = self.tree.ids().rev().collect();
        for id in ids {
            self.with_device(id, |device, ctx| device.stop(ctx));
            self.scheduler.timers_mut().remove_owned_by(id);
        }
        self.phase = Phase::Stopped;
        log::debug!("machine stopped at {}", self.scheduler.basetime());
        Ok(())
    }

    fn wrong_phase(&self) -> ConfigError {
        ConfigError::WrongPhase {
            phase: self.phase.name(),
        }
    }

    /// Lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Runtime options.
    #[must_use]
    pub const fn options(&self) -> &MachineOptions {
        &self.options
    }

    /// Current virtual time.
    #[must_use]
    pub fn time(&self) -> Attotime {
        self.scheduler.time()
    }

    /// Scheduler state.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Device tree.
    #[must_use]
    pub const fn tree(&self) -> &DeviceTree {
        &self.tree
    }

    /// Fault latched since the last reset or restore.
    #[must_use]
    pub const fn latched_fault(&self) -> Option<&DeviceFault> {
        self.fault.as_ref()
    }

    /// Diagnostics counters.
    #[must_use]
    pub const fn diagnostics(&self) -> &DiagCounters {
        &self.diag
    }

    /// Clears the diagnostics counters.
    pub fn reset_diagnostics(&mut self) {
        self.diag.reset();
    }

    pub(crate) fn latch_fault(&mut self, device: DeviceId, reason: FaultReason) {
        if self.fault.is_some() {
            return;
        }
        let fault = DeviceFault {
            tag: self.tree.tag(device).to_owned(),
            reason,
        };
        log::error!("{fault}");
        self.diag.record_fault(self.scheduler.time(), &fault);
        self.fault = Some(fault);
        self.scheduler.abort_timeslice();
    }

    pub(crate) fn check_fault(&self) -> Result<(), MachineError> {
        match &self.fault {
            Some(fault) => Err(fault.clone().into()),
            None => Ok(()),
        }
    }

    /// Runs `f` on device `id` with a context, then delivers notifications
    /// that queued up while devices were busy. `None` when the device is
    /// already busy.
    pub(crate) fn with_device<R>(
        &mut self,
        id: DeviceId,
        f: impl FnOnce(&mut dyn Device, &mut DeviceContext<'_>) -> R,
    ) -> Option<R> {
        let mut device = self.tree.take(id)?;
        let result = {
            let mut ctx = DeviceContext::new(self, id);
            f(device.as_mut(), &mut ctx)
        };
        self.tree.restore(id, device);
        self.flush_deferred();
        Some(result)
    }

    pub(crate) fn notify(&mut self, device: DeviceId, notification: Notification) {
        if self.tree.is_busy(device) {
            self.diag.record_deferred();
            self.deferred.push_back(Deferred {
                device,
                notification,
            });
        } else {
            self.deliver(device, notification);
        }
    }

    /// Removes the oldest input change queued for `device`.
    pub(crate) fn take_deferred_input(&mut self, device: DeviceId) -> Option<(u32, LineState)> {
        let index = self.deferred.iter().position(|entry| {
            entry.device == device && matches!(entry.notification, Notification::Input { .. })
        })?;
        match self.deferred.remove(index)?.notification {
            Notification::Input { input, state } => Some((input, state)),
            Notification::ClockChanged => None,
        }
    }

    fn deliver(&mut self, device: DeviceId, notification: Notification) {
        self.with_device(device, |target, ctx| match notification {
            Notification::Input { input, state } => {
                if let Some(listener) = target.line_input() {
                    listener.input_changed(ctx, input, state);
                }
            }
            Notification::ClockChanged => target.clock_changed(ctx),
        });
    }

    fn flush_deferred(&mut self) {
        while let Some(index) = self
            .deferred
            .iter()
            .position(|entry| !self.tree.is_busy(entry.device))
        {
            if let Some(entry) = self.deferred.remove(index) {
                self.deliver(entry.device, entry.notification);
            }
        }
    }

    /// Looks up a device by tag, relative to the root.
    #[must_use]
    pub fn find(&self, tag: &str) -> Option<DeviceId> {
        self.tree.find(&subtag(ROOT_TAG, tag))
    }

    /// Full tag of a device.
    #[must_use]
    pub fn tag(&self, id: DeviceId) -> &str {
        self.tree.tag(id)
    }

    /// Borrows a device as its concrete type.
    #[must_use]
    pub fn device<T: Device>(&self, id: DeviceId) -> Option<&T> {
        self.tree.get::<T>(id)
    }

    /// Mutably borrows a device as its concrete type.
    pub fn device_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        self.tree.get_mut::<T>(id)
    }

    /// Borrows the device at `tag` as its concrete type.
    #[must_use]
    pub fn device_by_tag<T: Device>(&self, tag: &str) -> Option<&T> {
        self.device::<T>(self.find(tag)?)
    }

    /// `true` when the device offers `capability`.
    #[must_use]
    pub fn has_capability(&self, id: DeviceId, capability: Capability) -> bool {
        id.index() < self.tree.len() && self.tree.capabilities(id).supports(capability)
    }

    /// Devices offering `capability`, in configuration order.
    #[must_use]
    pub fn devices_with(&self, capability: Capability) -> Vec<DeviceId> {
        self.tree
            .ids()
            .filter(|&id| self.tree.capabilities(id).supports(capability))
            .collect()
    }

    /// Clock state of a device.
    #[must_use]
    pub fn clock(&self, id: DeviceId) -> Option<&ClockState> {
        (id.index() < self.tree.len()).then(|| self.tree.clock(id))
    }

    /// Changes the unscaled clock of a device.
    pub fn set_clock(&mut self, id: DeviceId, hz: u32) {
        self.update_clock(id, |clock| clock.set_unscaled(hz));
    }

    /// Changes the clock scale of a device.
    pub fn set_clock_scale(&mut self, id: DeviceId, num: u32, den: u32) {
        self.update_clock(id, |clock| clock.set_scale(num, den));
    }

    fn update_clock(&mut self, id: DeviceId, change: impl FnOnce(&mut ClockState) -> bool) {
        if id.index() < self.tree.len() && change(&mut self.tree.node_mut(id).clock) {
            self.clock_updated(id);
        }
    }

    /// Applies a changed clock of `id` and carries it to derived children.
    fn clock_updated(&mut self, id: DeviceId) {
        let hz = self.tree.clock(id).clock();
        let now = self.scheduler.basetime();
        if let Some(slot) = self.scheduler.slot_mut(id) {
            slot.set_clock(hz, now);
        }
        log::debug!("{} clock is now {hz} Hz", self.tree.tag(id));
        if self.phase.is_running() {
            self.notify(id, Notification::ClockChanged);
        }
        let children = self.tree.children(id).to_vec();
        for child in children {
            if let Some(&(mul, div)) = self.derived.get(&child) {
                let derived = ClockSpec::Derived { mul, div }.resolve(hz);
                if self.tree.node_mut(child).clock.set_unscaled(derived) {
                    self.clock_updated(child);
                }
            }
        }
    }

    /// Requests suspension of an executor at the next slice boundary.
    pub fn suspend(&mut self, id: DeviceId, reason: SuspendReason) -> bool {
        self.scheduler.suspend(id, reason)
    }

    /// Requests lifting `reason` at the next slice boundary.
    pub fn resume(&mut self, id: DeviceId, reason: SuspendReason) -> bool {
        self.scheduler.resume(id, reason)
    }

    /// `true` when the executor is (or is about to be) suspended.
    #[must_use]
    pub fn is_suspended(&self, id: DeviceId) -> bool {
        self.scheduler.is_suspended(id)
    }

    /// Local time of a device.
    #[must_use]
    pub fn local_time(&self, id: DeviceId) -> Attotime {
        self.scheduler.local_time(id)
    }

    /// Cycles executed by a device since start, zero for non-executors.
    #[must_use]
    pub fn total_cycles(&self, id: DeviceId) -> u64 {
        self.scheduler.slot(id).map_or(0, ExecSlot::total_cycles)
    }

    /// Address space by id.
    #[must_use]
    pub fn space(&self, id: SpaceId) -> Option<&AddressSpace> {
        self.spaces.get(id.index())
    }

    /// Mutable address space by id, for installing handlers.
    pub fn space_mut(&mut self, id: SpaceId) -> Option<&mut AddressSpace> {
        self.spaces.get_mut(id.index())
    }

    /// Space `index` declared by the device at `tag`.
    #[must_use]
    pub fn space_id(&self, tag: &str, index: usize) -> Option<SpaceId> {
        let owner = self.find(tag)?;
        self.tree.node(owner).spaces.get(index).copied()
    }

    /// Output line `name` of the device at `tag`.
    #[must_use]
    pub fn line(&self, tag: &str, name: &str) -> Option<LineId> {
        self.lines.find(self.find(tag)?, name)
    }

    /// Current level of a line.
    #[must_use]
    pub fn line_state(&self, line: LineId) -> LineState {
        self.lines.state(line)
    }

    /// Line registry.
    #[must_use]
    pub const fn lines(&self) -> &Lines {
        &self.lines
    }

    /// Drives a line from the host, bypassing the ownership check.
    pub fn set_line(&mut self, line: LineId, state: LineState) {
        self.propagate(line, state);
    }

    /// Delivers `state` straight to input `input` of the device at `tag`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownTag`] or [`ConfigError::UnknownInput`].
    pub fn drive_input(
        &mut self,
        tag: &str,
        input: &str,
        state: LineState,
    ) -> Result<(), ConfigError> {
        let id = self.find(tag).ok_or_else(|| ConfigError::UnknownTag {
            tag: tag.to_owned(),
        })?;
        let index = self
            .tree
            .node(id)
            .inputs
            .iter()
            .position(|name| name == input)
            .ok_or_else(|| ConfigError::UnknownInput {
                device: self.tree.tag(id).to_owned(),
                input: input.to_owned(),
            })?;
        self.notify(
            id,
            Notification::Input {
                input: u32::try_from(index).unwrap_or(u32::MAX),
                state,
            },
        );
        Ok(())
    }

    /// Slot by tag.
    #[must_use]
    pub fn slot(&self, tag: &str) -> Option<&Slot> {
        let tag = subtag(ROOT_TAG, tag);
        self.slots.iter().find(|slot| slot.tag == tag)
    }

    /// Every configured slot.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Named memory region by tag.
    #[must_use]
    pub fn region(&self, tag: &str) -> Option<&MemoryRegion> {
        self.region_id(tag)
            .and_then(|id| self.regions.get(id.index()))
    }

    pub(crate) fn region_id(&self, tag: &str) -> Option<RegionId> {
        let tag = subtag(ROOT_TAG, tag);
        self.regions
            .iter()
            .position(|region| region.name() == tag)
            .and_then(|index| u32::try_from(index).ok())
            .map(RegionId::from_index)
    }

    fn visit_state(&mut self, visit: &mut Visit<'_>) {
        self.scheduler.state(&mut visit.io(ROOT_TAG));
        let ids: Vec<DeviceId> = self.tree.ids().collect();
        for id in ids {
            let tag = self.tree.tag(id).to_owned();
            let mut io = visit.io(&tag);
            self.tree.node_mut(id).clock.state(&mut io);
            if let Some(slot) = self.scheduler.slot_mut(id) {
                slot.state(&mut io);
            }
            let spaces = self.tree.node(id).spaces.clone();
            for space in spaces {
                if let Some(space) = self.spaces.get_mut(space.index()) {
                    space.state(&mut io);
                }
            }
            let lines: Vec<LineId> = self.lines.owned_by(id).collect();
            for line in lines {
                let field = format!("$line.{}", self.lines.name(line));
                if let Some(state) = self.lines.state_mut(line) {
                    io.item(&field, state);
                }
            }
            if let Some(mut device) = self.tree.take(id) {
                device.state(&mut io);
                self.tree.restore(id, device);
            }
        }
    }

    /// Every registered save-state field, in image order.
    pub fn registrations(&mut self) -> Vec<FieldDesc> {
        let mut fields = Vec::new();
        self.visit_state(&mut Visit::Register(&mut fields));
        fields
    }

    /// Collects a save image after running every `pre_save` hook.
    ///
    /// # Errors
    ///
    /// [`ConfigError::WrongPhase`] unless started.
    pub fn save_state(&mut self) -> Result<SaveState, ConfigError> {
        if !self.phase.is_running() {
            return Err(self.wrong_phase());
        }
        let ids: Vec<DeviceId> = self.tree.ids().collect();
        for id in ids {
            self.with_device(id, |device, ctx| device.pre_save(ctx));
        }
        let mut entries = Vec::new();
        self.visit_state(&mut Visit::Save(&mut entries));
        let mut state = SaveState {
            version: self.options.save_version,
            signature: 0,
            entries,
        };
        state.signature = state.layout_signature();
        log::debug!(
            "saved {} fields ({} bytes) at {}",
            state.entries.len(),
            state.payload_len(),
            self.scheduler.basetime()
        );
        Ok(state)
    }

    /// Applies a save image.
    ///
    /// The image is validated against the registered fields before anything
    /// is touched. On success every timer is disabled, a latched fault is
    /// cleared and `post_load` runs on every device so it can re-arm timers.
    ///
    /// # Errors
    ///
    /// [`RestoreError::Mismatch`] listing every differing field,
    /// [`RestoreError::SignatureMismatch`] for a reordered layout and
    /// [`RestoreError::WrongPhase`] unless started.
    pub fn restore_state(&mut self, image: &SaveState) -> Result<(), RestoreError> {
        if !self.phase.is_running() {
            return Err(RestoreError::WrongPhase {
                phase: self.phase.name(),
            });
        }
        let fields = self.registrations();
        let mismatches = image::diff(&fields, &image.entries);
        if !mismatches.is_empty() {
            let err = RestoreError::Mismatch(mismatches);
            log::warn!("restore rejected: {err}");
            return Err(err);
        }
        let expected = image::signature(&fields);
        for found in [image.signature, image.layout_signature()] {
            if found != expected {
                let err = RestoreError::SignatureMismatch { found, expected };
                log::warn!("restore rejected: {err}");
                return Err(err);
            }
        }

        self.scheduler.timers_mut().disable_all();
        self.visit_state(&mut Visit::Load {
            entries: &image.entries,
            cursor: 0,
        });
        self.fault = None;
        self.deferred.clear();
        let ids: Vec<DeviceId> = self.tree.ids().collect();
        for id in ids {
            self.with_device(id, |device, ctx| device.post_load(ctx));
        }
        log::debug!("restored state at {}", self.scheduler.basetime());
        Ok(())
    }

    /// Decodes and applies a binary save image.
    ///
    /// # Errors
    ///
    /// Decoding errors from [`SaveState::from_bytes`] and everything
    /// [`Machine::restore_state`] reports.
    pub fn restore_bytes(&mut self, bytes: &[u8]) -> Result<(), RestoreError> {
        let image = SaveState::from_bytes(bytes)?;
        self.restore_state(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::{Machine, MachineConfig};

    #[test]
    fn debug_output_summarises_the_machine() {
        let machine = Machine::new(MachineConfig::default()).expect("empty machine");
        let text = format!("{machine:?}");
        assert!(text.starts_with("Machine {"));
        assert!(text.contains("phase: Configured"));
        assert!(text.contains("fault: None"));
    }
}
