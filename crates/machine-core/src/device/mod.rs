//! Device model: the uniform contract every hardware model implements.
//!
//! A device is constructed from configuration, declares its address spaces
//! and signal lines, is started exactly once, reset any number of times and
//! finally stopped. Optional behavior (bus handlers, execution, line inputs,
//! slot cards) is exposed through capability accessors instead of
//! downcasting.

/// Per-call device context handed to every lifecycle hook.
pub mod context;
/// Lazy resolution handles for devices, regions and spaces.
pub mod finder;
/// Device tree storage and hierarchical tag resolution.
pub mod tree;

use std::any::Any;
use std::fmt;

use thiserror::Error;

pub use context::DeviceContext;
pub use finder::{DeviceFinder, RegionFinder, SpaceFinder};
pub use tree::{parent_tag, subtag, ClockState, DeviceTree, ROOT_TAG};

use crate::execute::Executor;
use crate::fault::{ConfigError, TimerError};
use crate::line::LineState;
use crate::memory::SpaceConfig;
use crate::save::StateIo;
use crate::scheduler::TimerId;

/// Index of a device node in the machine's device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u32);

impl DeviceId {
    /// The implicit root device.
    pub const ROOT: Self = Self(0);

    /// Creates an id from a raw tree index.
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Raw tree index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static type descriptor of a device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceType {
    /// Human-readable name.
    pub name: &'static str,
    /// Short identifier used in logs and save images.
    pub shortname: &'static str,
}

impl DeviceType {
    /// Creates a type descriptor.
    #[must_use]
    pub const fn new(name: &'static str, shortname: &'static str) -> Self {
        Self { name, shortname }
    }
}

/// Outcome of a failed `start` hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// A dependency is not ready yet; the machine retries this device later.
    #[error("start deferred until dependencies are ready")]
    MissingDependencies,
    /// Configuration problem discovered while starting.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Timer setup failed while starting.
    #[error(transparent)]
    Timer(#[from] TimerError),
}

/// Memory-mapped handler capability.
///
/// `map` distinguishes the handler sets a device installs; `offset` is in
/// units of the installed handler width and `mem_mask` marks the live lanes.
pub trait MemoryDevice {
    /// Services a read. Bits outside `mem_mask` are ignored by the caller.
    fn read(&mut self, ctx: &mut DeviceContext<'_>, map: u32, offset: u64, mem_mask: u64) -> u64;

    /// Services a write. Only bits inside `mem_mask` carry data.
    fn write(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        map: u32,
        offset: u64,
        data: u64,
        mem_mask: u64,
    );
}

/// Listener capability for declared input lines.
pub trait LineInput {
    /// Called synchronously whenever a connected line changes state.
    fn input_changed(&mut self, ctx: &mut DeviceContext<'_>, input: u32, state: LineState);
}

/// Capability a device may offer to the rest of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Services bus reads and writes.
    Memory,
    /// Consumes scheduler time in cycle quanta.
    Execute,
    /// Listens to input lines.
    LineInput,
    /// Can occupy slots requiring the named interface.
    Card(&'static str),
}

impl Capability {
    /// Stable display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Execute => "execute",
            Self::LineInput => "line input",
            Self::Card(_) => "card",
        }
    }
}

/// Capabilities probed from a device once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities {
    memory: bool,
    execute: bool,
    line_input: bool,
    card: Option<&'static str>,
}

impl Capabilities {
    /// Probes the capability accessors of `device`.
    pub fn probe(device: &mut dyn Device) -> Self {
        Self {
            memory: device.memory().is_some(),
            execute: device.executor().is_some(),
            line_input: device.line_input().is_some(),
            card: device.card_interface(),
        }
    }

    /// Returns `true` when the capability is offered.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Memory => self.memory,
            Capability::Execute => self.execute,
            Capability::LineInput => self.line_input,
            Capability::Card(interface) => self.card == Some(interface),
        }
    }

    /// Lists offered capabilities in a stable order.
    #[must_use]
    pub fn list(&self) -> Vec<Capability> {
        let mut list = Vec::new();
        if self.memory {
            list.push(Capability::Memory);
        }
        if self.execute {
            list.push(Capability::Execute);
        }
        if self.line_input {
            list.push(Capability::LineInput);
        }
        if let Some(interface) = self.card {
            list.push(Capability::Card(interface));
        }
        list
    }
}

/// Configuration-time declarations collected from [`Device::declare`].
#[derive(Debug, Default)]
pub struct Declarations {
    pub(crate) spaces: Vec<SpaceConfig>,
    pub(crate) outputs: Vec<String>,
    pub(crate) inputs: Vec<String>,
}

impl Declarations {
    /// Declares an owned address space; returns its space index.
    pub fn address_space(&mut self, config: SpaceConfig) -> usize {
        self.spaces.push(config);
        self.spaces.len() - 1
    }

    /// Declares an output line this device drives.
    pub fn output_line(&mut self, name: &str) {
        self.outputs.push(name.to_owned());
    }

    /// Declares an input pin; returns the index passed to
    /// [`LineInput::input_changed`].
    pub fn input_line(&mut self, name: &str) -> u32 {
        self.inputs.push(name.to_owned());
        u32::try_from(self.inputs.len() - 1).unwrap_or(u32::MAX)
    }
}

/// Contract implemented by every hardware model.
///
/// Only configuration state may be touched before `start`. Runtime state is
/// (re)initialized in `reset` without reallocating what `start` acquired.
pub trait Device: Any {
    /// Static type descriptor.
    fn device_type(&self) -> DeviceType;

    /// Declares address spaces and lines. Called once right after construction.
    fn declare(&self, _decl: &mut Declarations) {}

    /// Resolves references and allocates runtime resources.
    ///
    /// Other devices exist but may not be started yet.
    ///
    /// # Errors
    ///
    /// [`DeviceError::MissingDependencies`] defers the device; other errors
    /// abort the run.
    fn start(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Restores runtime state to power-on values.
    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {}

    /// Releases runtime resources at teardown.
    fn stop(&mut self, _ctx: &mut DeviceContext<'_>) {}

    /// Called before a save image is collected.
    fn pre_save(&mut self, _ctx: &mut DeviceContext<'_>) {}

    /// Called after a save image was applied; re-arm timers here.
    fn post_load(&mut self, _ctx: &mut DeviceContext<'_>) {}

    /// Called after the device clock changed.
    fn clock_changed(&mut self, _ctx: &mut DeviceContext<'_>) {}

    /// Called when one of the device's timers expires.
    fn timer_expired(&mut self, _ctx: &mut DeviceContext<'_>, _id: TimerId, _param: u64) {}

    /// Registers, saves or loads the fields that make up the device's save
    /// state. Must visit the same fields in the same order every time.
    fn state(&mut self, _io: &mut StateIo<'_>) {}

    /// Bus handler capability.
    fn memory(&mut self) -> Option<&mut dyn MemoryDevice> {
        None
    }

    /// Execution capability.
    fn executor(&mut self) -> Option<&mut dyn Executor> {
        None
    }

    /// Input-line listener capability.
    fn line_input(&mut self) -> Option<&mut dyn LineInput> {
        None
    }

    /// Slot interface this device implements as a card.
    fn card_interface(&self) -> Option<&'static str> {
        None
    }
}

/// Placeholder occupying the root of every device tree.
#[derive(Debug, Default)]
pub struct RootDevice;

impl Device for RootDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Root", "root")
    }
}
