//! Bus dispatch and line propagation.
//!
//! Every access is planned into bus words first and every word's handler,
//! including the selected entry of any bank, is looked up before the first
//! handler runs, so remaps and bank switches made by a handler only become
//! visible to later accesses.

use super::{Machine, Notification};
use crate::device::DeviceId;
use crate::fault::FaultReason;
use crate::line::{LineId, LineState};
use crate::memory::{
    unit_shift, width_mask, Access, AccessWidth, HandlerEntry, HandlerKind, MapSpan,
    ResolvedEntry, SpaceId, MAX_PARTS,
};

#[derive(Debug, Clone, Copy)]
struct DeviceTarget {
    device: DeviceId,
    map: u32,
    width: AccessWidth,
    unit_mask: u64,
}

impl Machine {
    /// Reads `width` at byte address `addr` of `space`.
    ///
    /// Unmapped and unserved lanes read as the space's open-bus value. An
    /// unknown space reads as all ones.
    pub fn read(&mut self, space: SpaceId, addr: u64, width: AccessWidth) -> u64 {
        self.dispatch_read(space, addr, width)
    }

    /// Writes the low `width` bits of `data` at byte address `addr` of `space`.
    pub fn write(&mut self, space: SpaceId, addr: u64, width: AccessWidth, data: u64) {
        self.dispatch_write(space, addr, width, data);
    }

    /// Reads without side effects: handlers see
    /// [`side_effects_disabled`](crate::device::DeviceContext::side_effects_disabled)
    /// and unmapped accesses are neither logged nor counted.
    pub fn read_debug(&mut self, space: SpaceId, addr: u64, width: AccessWidth) -> u64 {
        self.debug_depth += 1;
        let value = self.dispatch_read(space, addr, width);
        self.debug_depth -= 1;
        value
    }

    /// `true` while a debugger-style access is being serviced.
    #[must_use]
    pub const fn side_effects_disabled(&self) -> bool {
        self.debug_depth > 0
    }

    /// Effective mapping of one direction of `space`.
    #[must_use]
    pub fn dump_map(&self, space: SpaceId, access: Access) -> Vec<MapSpan> {
        self.space(space)
            .map(|space| space.dump(access))
            .unwrap_or_default()
    }

    /// Kind of handler at `addr`, `"unmapped"` for unknown spaces.
    #[must_use]
    pub fn handler_name(&self, space: SpaceId, access: Access, addr: u64) -> &'static str {
        self.space(space)
            .map_or("unmapped", |space| space.handler_name(access, addr))
    }

    pub(crate) fn dispatch_read(&mut self, space: SpaceId, addr: u64, width: AccessWidth) -> u64 {
        let Some(target) = self.spaces.get(space.index()) else {
            return width.mask();
        };
        let plan = target.plan(addr, width);
        let mut entries = [ResolvedEntry::default(); MAX_PARTS];
        for (part, entry) in entries.iter_mut().enumerate().take(plan.parts()) {
            *entry = target.resolve(target.read_entry(plan.part(part).0));
        }
        if plan.is_split() {
            self.diag.record_split();
        }
        let mut data = [0; MAX_PARTS];
        for (part, entry) in entries.iter().enumerate().take(plan.parts()) {
            let (word, mask) = plan.part(part);
            data[part] = self.read_word(space, entry, word, mask);
        }
        plan.merge(&data) & width.mask()
    }

    pub(crate) fn dispatch_write(
        &mut self,
        space: SpaceId,
        addr: u64,
        width: AccessWidth,
        data: u64,
    ) {
        let Some(target) = self.spaces.get(space.index()) else {
            return;
        };
        let plan = target.plan(addr, width);
        let mut entries = [ResolvedEntry::default(); MAX_PARTS];
        for (part, entry) in entries.iter_mut().enumerate().take(plan.parts()) {
            *entry = target.resolve(target.write_entry(plan.part(part).0));
        }
        if plan.is_split() {
            self.diag.record_split();
        }
        let words = plan.split(data & width.mask());
        for (part, entry) in entries.iter().enumerate().take(plan.parts()) {
            let (word, mask) = plan.part(part);
            self.write_word(space, entry, word, words[part], mask);
        }
    }

    fn unmapped(&mut self, space: SpaceId, word: u64, mem_mask: u64, write: Option<u64>) {
        if self.side_effects_disabled() {
            return;
        }
        self.diag.record_unmapped(write.is_some());
        let Some(target) = self.spaces.get(space.index()) else {
            return;
        };
        if !target.logs_unmapped() {
            return;
        }
        let addr = word << target.config().data_width.shift();
        match write {
            Some(data) => log::debug!(
                "{}: unmapped write {data:#x} to {addr:#x} (mask {mem_mask:#x})",
                target.name()
            ),
            None => log::debug!(
                "{}: unmapped read from {addr:#x} (mask {mem_mask:#x})",
                target.name()
            ),
        }
    }

    fn read_word(
        &mut self,
        space: SpaceId,
        resolved: &ResolvedEntry,
        word: u64,
        mem_mask: u64,
    ) -> u64 {
        let Some(target) = self.spaces.get(space.index()) else {
            return u64::MAX;
        };
        let open_bus = target.open_bus();
        let entry = &resolved.entry;
        match entry.kind {
            HandlerKind::Unmapped => {
                self.unmapped(space, word, mem_mask, None);
                open_bus
            }
            HandlerKind::Nop => open_bus,
            HandlerKind::Ram(_) | HandlerKind::Rom(_) | HandlerKind::Bank(_) => {
                target.read_memory(resolved, word, mem_mask)
            }
            HandlerKind::Device {
                device,
                map,
                width,
                unit_mask,
            } => self.read_device(
                space,
                entry,
                word,
                mem_mask,
                DeviceTarget {
                    device,
                    map,
                    width,
                    unit_mask,
                },
            ),
        }
    }

    fn write_word(
        &mut self,
        space: SpaceId,
        resolved: &ResolvedEntry,
        word: u64,
        data: u64,
        mem_mask: u64,
    ) {
        let entry = &resolved.entry;
        match entry.kind {
            HandlerKind::Unmapped => self.unmapped(space, word, mem_mask, Some(data)),
            HandlerKind::Nop => {}
            HandlerKind::Ram(_) | HandlerKind::Rom(_) | HandlerKind::Bank(_) => {
                if let Some(target) = self.spaces.get_mut(space.index()) {
                    target.write_memory(resolved, word, data, mem_mask);
                }
            }
            HandlerKind::Device {
                device,
                map,
                width,
                unit_mask,
            } => self.write_device(
                space,
                entry,
                word,
                data,
                mem_mask,
                DeviceTarget {
                    device,
                    map,
                    width,
                    unit_mask,
                },
            ),
        }
    }

    /// Sub-units of a device handler hit by an access, as
    /// `(offset, lane shift, handler mem_mask)`.
    fn device_units(
        &self,
        space: SpaceId,
        entry: &HandlerEntry,
        word: u64,
        mem_mask: u64,
        target: &DeviceTarget,
    ) -> Vec<(u64, u32, u64)> {
        let Some(bus) = self.spaces.get(space.index()) else {
            return Vec::new();
        };
        let config = bus.config();
        let shift = config.data_width.shift();
        let unit_bits = target.width.bits();
        let count = config.data_width.bits() / unit_bits;
        let unit_mask = width_mask(unit_bits);
        let active: Vec<u32> = (0..count)
            .filter(|&unit| {
                let lane = unit_mask << unit_shift(unit, count, unit_bits, config.endianness);
                target.unit_mask & lane != 0
            })
            .collect();
        let word_offset = entry.byte_offset(word << shift) >> shift;
        let stride = active.len() as u64;
        active
            .iter()
            .enumerate()
            .filter_map(|(ordinal, &unit)| {
                let lane_shift = unit_shift(unit, count, unit_bits, config.endianness);
                let live = ((mem_mask & target.unit_mask) >> lane_shift) & unit_mask;
                (live != 0).then_some((word_offset * stride + ordinal as u64, lane_shift, live))
            })
            .collect()
    }

    fn read_device(
        &mut self,
        space: SpaceId,
        entry: &HandlerEntry,
        word: u64,
        mem_mask: u64,
        target: DeviceTarget,
    ) -> u64 {
        let open_bus = self.spaces.get(space.index()).map_or(u64::MAX, |bus| bus.open_bus());
        if self.tree.is_busy(target.device) {
            self.latch_fault(target.device, FaultReason::Reentrant);
            return open_bus;
        }
        let unit_mask = width_mask(target.width.bits());
        let mut value = open_bus;
        for (offset, lane_shift, live) in self.device_units(space, entry, word, mem_mask, &target) {
            let data = self
                .with_device(target.device, |device, ctx| {
                    device
                        .memory()
                        .map(|memory| memory.read(ctx, target.map, offset, live))
                })
                .flatten()
                .unwrap_or(open_bus >> lane_shift);
            let lane = unit_mask << lane_shift;
            value = (value & !lane) | ((data & unit_mask) << lane_shift);
        }
        value
    }

    fn write_device(
        &mut self,
        space: SpaceId,
        entry: &HandlerEntry,
        word: u64,
        data: u64,
        mem_mask: u64,
        target: DeviceTarget,
    ) {
        if self.tree.is_busy(target.device) {
            self.latch_fault(target.device, FaultReason::Reentrant);
            return;
        }
        let unit_mask = width_mask(target.width.bits());
        for (offset, lane_shift, live) in self.device_units(space, entry, word, mem_mask, &target) {
            let unit = (data >> lane_shift) & unit_mask;
            self.with_device(target.device, |device, ctx| {
                if let Some(memory) = device.memory() {
                    memory.write(ctx, target.map, offset, unit, live);
                }
            });
        }
    }

    /// Drives `line` on behalf of `driver`, which must own it.
    pub(crate) fn drive_line(&mut self, driver: DeviceId, line: LineId, state: LineState) {
        if self.lines.owner(line) != Some(driver) {
            let name = self.lines.name(line).to_owned();
            self.latch_fault(driver, FaultReason::NotLineDriver { line: name });
            return;
        }
        self.propagate(line, state);
    }

    /// Stores a new level and notifies listeners, then chained lines, in
    /// connection order. Returns only after every listener ran, except
    /// listeners that were busy: they read the level through
    /// `DeviceContext::input_state` and get the callback either from
    /// `DeviceContext::deliver_inputs` or as soon as they return.
    pub(crate) fn propagate(&mut self, line: LineId, state: LineState) {
        let listeners = self.lines.set(line, state);
        self.diag.record_line_change();
        for listener in listeners {
            self.notify(
                listener.device,
                Notification::Input {
                    input: listener.input,
                    state: listener.observe(state),
                },
            );
        }
        let chained = self.lines.chained(line).to_vec();
        for (next, invert) in chained {
            let forwarded = if invert { state.inverted() } else { state };
            self.propagate(next, forwarded);
        }
    }
}
