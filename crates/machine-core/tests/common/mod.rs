//! Small device models shared by the integration suites.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use machine_core::{
    AccessWidth, Attotime, Declarations, Device, DeviceContext, DeviceError, DeviceFinder,
    DeviceType, Endianness, Executor, LineId, LineInput, LineState, MachineConfig, MemoryDevice,
    RegionFinder, SpaceConfig, SpaceFinder, StateIo, TimerHandle, TimerId,
};

/// Shared hook log for ordering assertions.
pub type Journal = Rc<RefCell<Vec<String>>>;

pub fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

/// Owns one address space and nothing else.
#[derive(Debug)]
pub struct Board {
    config: SpaceConfig,
}

impl Board {
    pub const fn new(width: AccessWidth, endianness: Endianness) -> Self {
        Self {
            config: SpaceConfig::new("program", width, 16, endianness),
        }
    }

    pub const fn with_open_bus(mut self, value: u64) -> Self {
        self.config = self.config.with_open_bus(value);
        self
    }
}

impl Device for Board {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Test Board", "board")
    }

    fn declare(&self, decl: &mut Declarations) {
        decl.address_space(self.config);
    }
}

/// Byte-addressed register file with a read counter standing in for
/// read side effects.
#[derive(Debug, Default)]
pub struct Latch {
    pub regs: Vec<u64>,
    pub reads: u64,
    pub writes: Vec<(u64, u64, u64)>,
}

impl Latch {
    pub fn with_regs(regs: &[u64]) -> Self {
        Self {
            regs: regs.to_vec(),
            ..Self::default()
        }
    }
}

impl MemoryDevice for Latch {
    fn read(&mut self, ctx: &mut DeviceContext<'_>, _map: u32, offset: u64, _mem_mask: u64) -> u64 {
        if !ctx.side_effects_disabled() {
            self.reads += 1;
        }
        usize::try_from(offset)
            .ok()
            .and_then(|index| self.regs.get(index))
            .copied()
            .unwrap_or(0)
    }

    fn write(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _map: u32,
        offset: u64,
        data: u64,
        mem_mask: u64,
    ) {
        self.writes.push((offset, data, mem_mask));
        if let Ok(index) = usize::try_from(offset) {
            if index >= self.regs.len() {
                self.regs.resize(index + 1, 0);
            }
            self.regs[index] = data & mem_mask;
        }
    }
}

impl Device for Latch {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Register Latch", "latch")
    }

    fn memory(&mut self) -> Option<&mut dyn MemoryDevice> {
        Some(self)
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("regs", &mut self.regs);
    }
}

/// Read handler that maps a ROM over `0x2000..=0x20FF` while servicing the
/// read, and a write handler that reads its own range back.
#[derive(Debug)]
pub struct Mapper {
    pub space: SpaceFinder,
}

impl Mapper {
    pub fn new() -> Self {
        Self {
            space: SpaceFinder::required("^board", 0),
        }
    }
}

impl MemoryDevice for Mapper {
    fn read(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        _map: u32,
        _offset: u64,
        _mem_mask: u64,
    ) -> u64 {
        if let Some(space) = self.space.id().and_then(|id| ctx.space_mut(id)) {
            let _ = space.install_rom(machine_core::MapRange::new(0x2000, 0x20FF), &[0x5A]);
        }
        0x11
    }

    fn write(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        _map: u32,
        offset: u64,
        _data: u64,
        _mem_mask: u64,
    ) {
        if let Some(space) = self.space.id() {
            ctx.read(space, 0x1F00 + offset, AccessWidth::Byte);
        }
    }
}

impl Device for Mapper {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Bank Mapper", "mapper")
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        ctx.resolve_space(&mut self.space);
        Ok(())
    }

    fn memory(&mut self) -> Option<&mut dyn MemoryDevice> {
        Some(self)
    }
}

/// Executor that consumes its budget in steps of `step` cycles.
#[derive(Debug)]
pub struct Ticker {
    step: u64,
    pub executed: u64,
    pub calls: u64,
}

impl Ticker {
    pub const fn new() -> Self {
        Self::stepping(1)
    }

    pub const fn stepping(step: u64) -> Self {
        Self {
            step,
            executed: 0,
            calls: 0,
        }
    }
}

impl Executor for Ticker {
    fn execute(&mut self, _ctx: &mut DeviceContext<'_>, cycles: u64) -> u64 {
        let consumed = cycles.div_ceil(self.step) * self.step;
        self.executed += consumed;
        self.calls += 1;
        consumed
    }

    fn max_step_cycles(&self) -> u64 {
        self.step - 1
    }
}

impl Device for Ticker {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Ticker", "ticker")
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {
        self.executed = 0;
        self.calls = 0;
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("executed", &mut self.executed);
    }

    fn executor(&mut self) -> Option<&mut dyn Executor> {
        Some(self)
    }
}

/// Misbehaving executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misbehavior {
    Stall,
    Overrun,
}

#[derive(Debug)]
pub struct Broken(pub Misbehavior);

impl Executor for Broken {
    fn execute(&mut self, _ctx: &mut DeviceContext<'_>, cycles: u64) -> u64 {
        match self.0 {
            Misbehavior::Stall => 0,
            Misbehavior::Overrun => cycles + 10,
        }
    }

    fn max_step_cycles(&self) -> u64 {
        4
    }
}

impl Device for Broken {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Broken Executor", "broken")
    }

    fn executor(&mut self) -> Option<&mut dyn Executor> {
        Some(self)
    }
}

/// Executor that, ten cycles into its first slice, arms a timer five
/// cycles ahead and then yields on request.
#[derive(Debug, Default)]
pub struct Poller {
    armed: bool,
    pub executed: u64,
    pub fired_at: Option<Attotime>,
    pub cycles_at_fire: u64,
}

impl Executor for Poller {
    fn execute(&mut self, ctx: &mut DeviceContext<'_>, cycles: u64) -> u64 {
        let mut done = 0;
        while done < cycles {
            done += 1;
            if !self.armed && self.executed + done == 10 {
                self.armed = true;
                ctx.report_progress(done);
                let delay = ctx.clocks_to_time(5);
                let _ = ctx.add_timer(0, delay, 0, None);
            }
            if ctx.abort_requested() {
                break;
            }
        }
        self.executed += done;
        done
    }
}

impl Device for Poller {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Poller", "poller")
    }

    fn timer_expired(&mut self, ctx: &mut DeviceContext<'_>, _id: TimerId, _param: u64) {
        self.fired_at = Some(ctx.time());
        self.cycles_at_fire = ctx.total_cycles();
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("executed", &mut self.executed);
    }

    fn executor(&mut self) -> Option<&mut dyn Executor> {
        Some(self)
    }
}

/// Non-executing device counting a periodic timer set in device cycles.
#[derive(Debug)]
pub struct Counter {
    every: u64,
    timer: Option<TimerHandle>,
    pub count: u64,
    next_fire: Attotime,
}

impl Counter {
    pub const fn every(cycles: u64) -> Self {
        Self {
            every: cycles,
            timer: None,
            count: 0,
            next_fire: Attotime::NEVER,
        }
    }
}

impl Device for Counter {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Cycle Counter", "counter")
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        let period = ctx.clocks_to_time(self.every);
        self.timer = Some(ctx.add_timer(0, period, 0, Some(period))?);
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        self.count = 0;
        if let Some(timer) = self.timer {
            let period = ctx.clocks_to_time(self.every);
            let _ = ctx.adjust_timer(timer, period, Some(period));
        }
    }

    fn pre_save(&mut self, ctx: &mut DeviceContext<'_>) {
        self.next_fire = self
            .timer
            .map_or(Attotime::NEVER, |timer| ctx.timer_expire(timer));
    }

    fn post_load(&mut self, ctx: &mut DeviceContext<'_>) {
        if let Some(timer) = self.timer {
            let period = ctx.clocks_to_time(self.every);
            let delay = self.next_fire.saturating_sub(ctx.time());
            let _ = ctx.adjust_timer(timer, delay, Some(period));
        }
    }

    fn timer_expired(&mut self, _ctx: &mut DeviceContext<'_>, _id: TimerId, _param: u64) {
        self.count += 1;
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("count", &mut self.count);
        io.item("next_fire", &mut self.next_fire);
    }
}

/// Arms one one-shot timer per delay on reset and records firing order.
#[derive(Debug)]
pub struct Recorder {
    delays: Vec<Attotime>,
    pub fired: Vec<u64>,
}

impl Recorder {
    pub fn new(delays: Vec<Attotime>) -> Self {
        Self {
            delays,
            fired: Vec::new(),
        }
    }
}

impl Device for Recorder {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Timer Recorder", "recorder")
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        self.fired.clear();
        for (param, delay) in (0_u64..).zip(self.delays.iter().copied()) {
            let _ = ctx.add_timer(1, delay, param, None);
        }
    }

    fn timer_expired(&mut self, _ctx: &mut DeviceContext<'_>, _id: TimerId, param: u64) {
        self.fired.push(param);
    }
}

/// Drives `irq` and `nmi` from bus writes (offset 0 and 1) and counts
/// acknowledgements on its `ack` input.
#[derive(Debug, Default)]
pub struct Source {
    irq: Option<LineId>,
    nmi: Option<LineId>,
    pub acks: u32,
    pub foreign: Option<LineId>,
}

impl MemoryDevice for Source {
    fn read(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _map: u32,
        _offset: u64,
        _mem_mask: u64,
    ) -> u64 {
        u64::from(self.acks)
    }

    fn write(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        _map: u32,
        offset: u64,
        data: u64,
        _mem_mask: u64,
    ) {
        let line = match offset {
            0 => self.irq,
            1 => self.nmi,
            _ => self.foreign,
        };
        if let Some(line) = line {
            ctx.set_line(line, LineState::from(data != 0));
        }
    }
}

impl LineInput for Source {
    fn input_changed(&mut self, _ctx: &mut DeviceContext<'_>, _input: u32, state: LineState) {
        if state.is_asserted() {
            self.acks += 1;
        }
    }
}

impl Device for Source {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Line Source", "source")
    }

    fn declare(&self, decl: &mut Declarations) {
        decl.output_line("irq");
        decl.output_line("nmi");
        decl.input_line("ack");
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        self.irq = ctx.line("irq");
        self.nmi = ctx.line("nmi");
        Ok(())
    }

    fn memory(&mut self) -> Option<&mut dyn MemoryDevice> {
        Some(self)
    }

    fn line_input(&mut self) -> Option<&mut dyn LineInput> {
        Some(self)
    }
}

/// Records every input change and answers an asserted `in` on its `ack`
/// output.
#[derive(Debug, Default)]
pub struct Sink {
    ack: Option<LineId>,
    pub flag: bool,
    pub events: Vec<(u32, u32)>,
    pub journal: Option<(Journal, &'static str)>,
}

impl Sink {
    pub fn journaled(journal: &Journal, name: &'static str) -> Self {
        Self {
            journal: Some((Rc::clone(journal), name)),
            ..Self::default()
        }
    }
}

impl LineInput for Sink {
    fn input_changed(&mut self, ctx: &mut DeviceContext<'_>, input: u32, state: LineState) {
        self.events.push((input, state.value()));
        if let Some((journal, name)) = &self.journal {
            journal.borrow_mut().push(format!("{name}:{input}:{}", state.value()));
        }
        if input == 0 {
            self.flag = state.is_asserted();
            if let Some(ack) = self.ack {
                ctx.set_line(ack, state);
            }
        }
    }
}

impl Device for Sink {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Line Sink", "sink")
    }

    fn declare(&self, decl: &mut Declarations) {
        decl.input_line("in");
        decl.input_line("aux");
        decl.output_line("ack");
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        self.ack = ctx.line("ack");
        Ok(())
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("flag", &mut self.flag);
    }

    fn line_input(&mut self) -> Option<&mut dyn LineInput> {
        Some(self)
    }
}

/// Slot card exposing one constant register.
#[derive(Debug)]
pub struct Card {
    pub value: u8,
}

impl Device for Card {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Expansion Card", "card")
    }

    fn card_interface(&self) -> Option<&'static str> {
        Some("expansion")
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("value", &mut self.value);
    }
}

/// Logs its lifecycle hooks and optionally waits for another device to
/// start first or for a region to exist.
#[derive(Debug)]
pub struct Probe {
    name: &'static str,
    journal: Journal,
    pub waits_for: Option<DeviceFinder<Probe>>,
    pub region: Option<RegionFinder>,
    pub rom: Vec<u8>,
}

impl Probe {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Rc::clone(journal),
            waits_for: None,
            region: None,
            rom: Vec::new(),
        }
    }

    pub fn waiting_for(mut self, tag: &str) -> Self {
        self.waits_for = Some(DeviceFinder::required(tag));
        self
    }

    pub fn needing_region(mut self, finder: RegionFinder) -> Self {
        self.region = Some(finder);
        self
    }

    fn log(&self, hook: &str) {
        self.journal.borrow_mut().push(format!("{}:{hook}", self.name));
    }
}

impl Device for Probe {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Lifecycle Probe", "probe")
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        if let Some(finder) = self.waits_for.as_mut() {
            ctx.resolve_device(finder);
            let started = finder
                .id()
                .is_some_and(|id| ctx.machine().tree().is_started(id));
            if !started {
                self.log("deferred");
                return Err(DeviceError::MissingDependencies);
            }
        }
        if let Some(finder) = self.region.as_mut() {
            ctx.resolve_region(finder);
        }
        if let Some(finder) = &self.region {
            self.rom = ctx.region(finder).map(<[u8]>::to_vec).unwrap_or_default();
        }
        self.log("start");
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {
        self.log("reset");
    }

    fn stop(&mut self, _ctx: &mut DeviceContext<'_>) {
        self.log("stop");
    }

    fn post_load(&mut self, _ctx: &mut DeviceContext<'_>) {
        self.log("post_load");
    }

    fn clock_changed(&mut self, ctx: &mut DeviceContext<'_>) {
        let hz = ctx.clock();
        self.log(&format!("clock={hz}"));
    }
}

/// A byte-wide board with a latch over `0x1000..=0x1FFF`.
pub fn latch_machine_config() -> MachineConfig {
    let mut config = MachineConfig::default();
    config
        .device("board", 0, || Board::new(AccessWidth::Byte, Endianness::Little))
        .device("latch", 0, || Latch::with_regs(&[0xAA; 16]));
    config
}
