//! Device, scheduler and bus substrate for multi-device machine emulation.

/// Fixed-point virtual time.
pub mod time;
pub use time::{clocks_to_time, time_to_clocks, Attotime, ATTOSECONDS_PER_SECOND};

/// Error taxonomy for configuration, device invariants and restore.
pub mod fault;
pub use fault::{
    ConfigError, DeviceFault, ErrorClass, FaultReason, FieldMismatch, MachineError,
    ResourceKind, RestoreError, TimerError,
};

/// Global time keeping and timers.
pub mod scheduler;
pub use scheduler::{FiredTimer, Scheduler, TimerHandle, TimerId, TimerOwner, TimerQueue};

/// Execution capability and cycle accounting.
pub mod execute;
pub use execute::{ExecSlot, Executor, SuspendReason};

/// Device contract, context, tree and finders.
pub mod device;
pub use device::{
    Capabilities, Capability, Declarations, Device, DeviceContext, DeviceError, DeviceFinder,
    DeviceId, DeviceTree, DeviceType, LineInput, MemoryDevice, RegionFinder, RootDevice,
    SpaceFinder,
};

/// Address spaces, handlers and regions.
pub mod memory;
pub use memory::{
    Access, AccessWidth, AddressSpace, Endianness, MapRange, MapSpan, MemoryRegion, RegionId,
    SpaceConfig, SpaceId,
};

/// Signal lines.
pub mod line;
pub use line::{LineId, LineState, Lines};

/// Slots and their cards.
pub mod slot;
pub use slot::{Slot, SlotOptions};

/// Save-state registration and images.
pub mod save;
pub use save::{FieldDesc, SaveItem, SaveState, SaveVersion, StateEntry, StateIo};

/// Diagnostics counters.
pub mod diag;
pub use diag::DiagCounters;

/// The machine and its configuration.
pub mod machine;
pub use machine::{ClockSpec, Machine, MachineConfig, MachineOptions, Phase};

/// Bundled general-purpose devices.
pub mod devices;
pub use devices::{InputMerger, MergeMode, TimerDevice};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
