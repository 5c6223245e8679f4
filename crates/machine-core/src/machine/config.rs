//! Declarative machine configuration, consumed by [`Machine::new`](super::Machine::new).

use crate::device::{subtag, Device, ROOT_TAG};
use crate::save::SaveVersion;
use crate::slot::{DeviceFactory, SlotOptions};
use crate::time::Attotime;

/// Runtime knobs that are not part of the device graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineOptions {
    /// Shortest slice the scheduler runs executors for.
    pub minimum_quantum: Attotime,
    /// Value returned by unmapped reads, truncated to each space's data width.
    /// Spaces may override it through
    /// [`SpaceConfig::with_open_bus`](crate::memory::SpaceConfig::with_open_bus).
    pub open_bus: u64,
    /// Log unmapped accesses at `debug`.
    pub log_unmapped: bool,
    /// Save image revision written by [`Machine::save_state`](super::Machine::save_state).
    pub save_version: SaveVersion,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            minimum_quantum: Attotime::from_hz(60),
            open_bus: u64::MAX,
            log_unmapped: true,
            save_version: SaveVersion::CURRENT,
        }
    }
}

/// How a configured device obtains its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSpec {
    /// Fixed frequency in Hz.
    Fixed(u32),
    /// `parent clock * mul / div`.
    Derived {
        /// Multiplier.
        mul: u32,
        /// Divider.
        div: u32,
    },
}

impl ClockSpec {
    pub(crate) fn resolve(self, parent_clock: u32) -> u32 {
        match self {
            Self::Fixed(hz) => hz,
            Self::Derived { mul, div } => {
                let hz = u64::from(parent_clock) * u64::from(mul) / u64::from(div.max(1));
                u32::try_from(hz).unwrap_or(u32::MAX)
            }
        }
    }
}

pub(crate) struct DeviceDecl {
    pub(crate) tag: String,
    pub(crate) clock: ClockSpec,
    pub(crate) factory: DeviceFactory,
}

pub(crate) struct SlotDecl {
    pub(crate) tag: String,
    pub(crate) clock: u32,
    pub(crate) interface: &'static str,
    pub(crate) options: SlotOptions,
    pub(crate) default: Option<String>,
    pub(crate) fixed: bool,
}

pub(crate) enum Entry {
    Device(DeviceDecl),
    Slot(SlotDecl),
}

pub(crate) enum Target {
    Input(String),
    Line(String),
}

pub(crate) struct Connection {
    pub(crate) source: String,
    pub(crate) line: String,
    pub(crate) target: String,
    pub(crate) to: Target,
    pub(crate) invert: bool,
}

/// Builder for the device graph of a machine.
///
/// Tags are resolved against the root, so `"cpu"` and `":cpu"` name the same
/// device. Problems are reported when the configuration is instantiated.
pub struct MachineConfig {
    pub(crate) options: MachineOptions,
    pub(crate) entries: Vec<Entry>,
    pub(crate) regions: Vec<(String, Vec<u8>)>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) plugs: Vec<(String, Option<String>)>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::new(MachineOptions::default())
    }
}

fn full_tag(tag: &str) -> String {
    subtag(ROOT_TAG, tag)
}

impl MachineConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub const fn new(options: MachineOptions) -> Self {
        Self {
            options,
            entries: Vec::new(),
            regions: Vec::new(),
            connections: Vec::new(),
            plugs: Vec::new(),
        }
    }

    /// Runtime options.
    #[must_use]
    pub const fn options(&self) -> &MachineOptions {
        &self.options
    }

    /// Mutable runtime options.
    pub fn options_mut(&mut self) -> &mut MachineOptions {
        &mut self.options
    }

    /// Adds a device at `tag` with a fixed clock. Parents must be added first.
    pub fn device<F, D>(&mut self, tag: &str, clock: u32, factory: F) -> &mut Self
    where
        F: FnOnce() -> D + 'static,
        D: Device,
    {
        self.push_device(tag, ClockSpec::Fixed(clock), factory)
    }

    /// Adds a device clocked at `mul / div` of its parent's clock.
    pub fn derived_device<F, D>(&mut self, tag: &str, mul: u32, div: u32, factory: F) -> &mut Self
    where
        F: FnOnce() -> D + 'static,
        D: Device,
    {
        self.push_device(tag, ClockSpec::Derived { mul, div }, factory)
    }

    fn push_device<F, D>(&mut self, tag: &str, clock: ClockSpec, factory: F) -> &mut Self
    where
        F: FnOnce() -> D + 'static,
        D: Device,
    {
        self.entries.push(Entry::Device(DeviceDecl {
            tag: full_tag(tag),
            clock,
            factory: Box::new(move || Box::new(factory()) as Box<dyn Device>),
        }));
        self
    }

    /// Adds a slot accepting cards that implement `interface`.
    ///
    /// The card, if any, is created as a child of the slot tagged with the
    /// option name.
    pub fn slot(
        &mut self,
        tag: &str,
        clock: u32,
        interface: &'static str,
        options: SlotOptions,
        default: Option<&str>,
    ) -> &mut Self {
        self.push_slot(tag, clock, interface, options, default, false)
    }

    /// Adds a slot whose occupant the host may not change.
    pub fn fixed_slot(
        &mut self,
        tag: &str,
        clock: u32,
        interface: &'static str,
        options: SlotOptions,
        default: Option<&str>,
    ) -> &mut Self {
        self.push_slot(tag, clock, interface, options, default, true)
    }

    fn push_slot(
        &mut self,
        tag: &str,
        clock: u32,
        interface: &'static str,
        options: SlotOptions,
        default: Option<&str>,
        fixed: bool,
    ) -> &mut Self {
        self.entries.push(Entry::Slot(SlotDecl {
            tag: full_tag(tag),
            clock,
            interface,
            options,
            default: default.map(str::to_owned),
            fixed,
        }));
        self
    }

    /// Host override of a slot's default option; `None` leaves it empty.
    pub fn plug(&mut self, slot: &str, option: Option<&str>) -> &mut Self {
        self.plugs
            .push((full_tag(slot), option.map(str::to_owned)));
        self
    }

    /// Adds a named memory region.
    pub fn region(&mut self, tag: &str, data: Vec<u8>) -> &mut Self {
        self.regions.push((full_tag(tag), data));
        self
    }

    /// Connects output `line` of `source` to input `input` of `target`.
    pub fn connect_line(
        &mut self,
        source: &str,
        line: &str,
        target: &str,
        input: &str,
    ) -> &mut Self {
        self.push_connection(source, line, target, Target::Input(input.to_owned()), false)
    }

    /// Like [`MachineConfig::connect_line`] with the level inverted.
    pub fn connect_line_inverted(
        &mut self,
        source: &str,
        line: &str,
        target: &str,
        input: &str,
    ) -> &mut Self {
        self.push_connection(source, line, target, Target::Input(input.to_owned()), true)
    }

    /// Forwards output `line` of `source` to output `target_line` of `target`.
    pub fn chain_line(
        &mut self,
        source: &str,
        line: &str,
        target: &str,
        target_line: &str,
        invert: bool,
    ) -> &mut Self {
        self.push_connection(
            source,
            line,
            target,
            Target::Line(target_line.to_owned()),
            invert,
        )
    }

    fn push_connection(
        &mut self,
        source: &str,
        line: &str,
        target: &str,
        to: Target,
        invert: bool,
    ) -> &mut Self {
        self.connections.push(Connection {
            source: full_tag(source),
            line: line.to_owned(),
            target: full_tag(target),
            to,
            invert,
        });
        self
    }
}
