use std::fmt;

use thiserror::Error;

/// Error classes used for propagation policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorClass {
    /// Wiring or configuration bug detected before execution.
    Configuration,
    /// Unmapped or odd-width bus access, resolved by the open-bus policy.
    Bus,
    /// A device broke one of its own runtime invariants.
    DeviceInvariant,
    /// A save image does not fit the running machine.
    Restore,
}

impl ErrorClass {
    /// Fatal classes terminate the run instead of being handled locally.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Configuration | Self::DeviceInvariant)
    }
}

/// Kind of named sub-resource a device may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Another device in the tree.
    Device,
    /// A named memory region.
    Region,
    /// An address space owned by some device.
    Space,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Device => "device",
            Self::Region => "memory region",
            Self::Space => "address space",
        })
    }
}

/// Fatal configuration errors, detected before any execution begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Two devices were configured with the same full tag.
    #[error("device tag `{tag}` is already in use")]
    DuplicateTag {
        /// Offending full tag.
        tag: String,
    },
    /// A tag did not name any configured device.
    #[error("no device with tag `{tag}`")]
    UnknownTag {
        /// Full tag that failed to resolve.
        tag: String,
    },
    /// A required resource was still missing at the end of start.
    #[error("device `{device}` is missing required {kind} `{resource}`")]
    MissingRequired {
        /// Tag of the device that declared the requirement.
        device: String,
        /// Kind of resource that was required.
        kind: ResourceKind,
        /// Resolved tag or name of the missing resource.
        resource: String,
    },
    /// A periodic timer was configured with a zero interval.
    #[error("device `{device}` configured a periodic timer with a zero interval")]
    InvalidPeriod {
        /// Tag of the device that owns the timer.
        device: String,
    },
    /// An address range could not be installed.
    #[error("malformed address range {start:#x}..={end:#x} in space `{space}`: {reason}")]
    MalformedRange {
        /// Name of the address space.
        space: String,
        /// Requested inclusive start address.
        start: u64,
        /// Requested inclusive end address.
        end: u64,
        /// Human-readable reason.
        reason: &'static str,
    },
    /// An address space configuration is not supported.
    #[error("invalid address space `{space}`: {reason}")]
    InvalidSpace {
        /// Name of the address space.
        space: String,
        /// Human-readable reason.
        reason: &'static str,
    },
    /// A named memory region was defined twice.
    #[error("memory region `{name}` is already defined")]
    DuplicateRegion {
        /// Region name.
        name: String,
    },
    /// A bank was addressed by an unknown name or entry.
    #[error("bank `{bank}` has no entry {entry}")]
    UnknownBankEntry {
        /// Bank name.
        bank: String,
        /// Requested entry index.
        entry: usize,
    },
    /// A slot tag did not name a configured slot.
    #[error("no slot `{slot}`")]
    UnknownSlot {
        /// Slot tag.
        slot: String,
    },
    /// A slot selection named an option the slot does not offer.
    #[error("slot `{slot}` has no option `{option}`")]
    UnknownSlotOption {
        /// Slot tag.
        slot: String,
        /// Requested option name.
        option: String,
    },
    /// The instantiated card does not provide the slot's capability.
    #[error("card `{option}` does not implement interface `{interface}` required by slot `{slot}`")]
    IncompatibleCard {
        /// Slot tag.
        slot: String,
        /// Option that was plugged.
        option: String,
        /// Capability interface the slot requires.
        interface: &'static str,
    },
    /// The host tried to change the occupant of a fixed slot.
    #[error("slot `{slot}` is fixed and cannot be reconfigured")]
    FixedSlot {
        /// Slot tag.
        slot: String,
    },
    /// A line name was not declared by the device.
    #[error("device `{device}` has no output line `{line}`")]
    UnknownLine {
        /// Device tag.
        device: String,
        /// Line name.
        line: String,
    },
    /// An input name was not declared by the device.
    #[error("device `{device}` has no input `{input}`")]
    UnknownInput {
        /// Device tag.
        device: String,
        /// Input name.
        input: String,
    },
    /// An input was connected to more than one source line.
    #[error("input `{input}` of `{device}` already has a driver; fan-in needs a merger")]
    FanIn {
        /// Target device tag.
        device: String,
        /// Target input name.
        input: String,
    },
    /// A device was wired into a role it has no capability for.
    #[error("device `{device}` lacks the {capability} capability")]
    MissingCapability {
        /// Device tag.
        device: String,
        /// Capability name.
        capability: &'static str,
    },
    /// Some devices kept reporting missing dependencies with no progress.
    #[error("devices never finished starting: {}", .tags.join(", "))]
    UnresolvedDependencies {
        /// Tags of the devices that could not start.
        tags: Vec<String>,
    },
    /// The operation is not valid in the current lifecycle phase.
    #[error("operation not allowed while the machine is {phase}")]
    WrongPhase {
        /// Current lifecycle phase.
        phase: &'static str,
    },
}

impl ConfigError {
    /// Configuration errors are always fatal.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

/// Specific invariant a device broke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultReason {
    /// An executor consumed no cycles without yielding or suspending.
    #[error("executor made no progress on a {budget}-cycle budget")]
    NoProgress {
        /// Cycle budget that was offered.
        budget: u64,
    },
    /// An executor ran further past its budget than its declared step length.
    #[error("executor consumed {consumed} cycles on a {budget}-cycle budget")]
    Overrun {
        /// Cycle budget that was offered.
        budget: u64,
        /// Cycles reported as consumed.
        consumed: u64,
    },
    /// A bus access was dispatched into a device already active on the call stack.
    #[error("re-entrant bus access")]
    Reentrant,
    /// A device used a handle of a timer it had already removed.
    #[error("used a stale timer handle")]
    StaleTimer,
    /// A device drove a line it does not own.
    #[error("drove line `{line}` owned by another device")]
    NotLineDriver {
        /// Line name.
        line: String,
    },
}

/// Fatal device-internal invariant violation, attributed to a device tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device `{tag}` violated an invariant: {reason}")]
pub struct DeviceFault {
    /// Tag of the offending device.
    pub tag: String,
    /// Invariant that was broken.
    pub reason: FaultReason,
}

impl DeviceFault {
    /// Device faults are always fatal.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        ErrorClass::DeviceInvariant
    }
}

/// Timer API errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum TimerError {
    /// Periodic interval of zero.
    #[error("periodic timer interval must be non-zero")]
    InvalidPeriod,
    /// The handle refers to a timer that was removed.
    #[error("timer handle is stale")]
    StaleHandle,
}

/// One registered field that differs between a save image and the machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldMismatch {
    /// Registered in the machine but absent from the image.
    Missing {
        /// Device tag.
        tag: String,
        /// Field name.
        field: String,
    },
    /// Present in the image but not registered in the machine.
    Unexpected {
        /// Device tag.
        tag: String,
        /// Field name.
        field: String,
    },
    /// Registered on both sides with different byte sizes.
    SizeMismatch {
        /// Device tag.
        tag: String,
        /// Field name.
        field: String,
        /// Size registered by the machine.
        expected: usize,
        /// Size found in the image.
        found: usize,
    },
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { tag, field } => write!(f, "{tag}/{field} missing from image"),
            Self::Unexpected { tag, field } => write!(f, "{tag}/{field} not registered"),
            Self::SizeMismatch {
                tag,
                field,
                expected,
                found,
            } => write!(f, "{tag}/{field} is {found} bytes, expected {expected}"),
        }
    }
}

fn join_mismatches(mismatches: &[FieldMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Save-state restore failures. The machine is left untouched on any of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    /// The image ended before all declared content was read.
    #[error("save image is truncated")]
    Truncated,
    /// The image does not start with the expected magic.
    #[error("save image header is invalid")]
    InvalidHeader,
    /// The image was written by an incompatible format revision.
    #[error("save image version {found} is not supported (expected {expected})")]
    UnsupportedVersion {
        /// Version stored in the image.
        found: u16,
        /// Version this build writes.
        expected: u16,
    },
    /// Registered fields differ from the image.
    #[error("save image does not match the machine: {}", join_mismatches(.0))]
    Mismatch(Vec<FieldMismatch>),
    /// Fields match by name and size but not by registration order.
    #[error("save image signature {found:#018x} does not match {expected:#018x}")]
    SignatureMismatch {
        /// Signature stored in the image.
        found: u64,
        /// Signature of the running machine.
        expected: u64,
    },
    /// Restore was attempted before start or after stop.
    #[error("restore not allowed while the machine is {phase}")]
    WrongPhase {
        /// Current lifecycle phase.
        phase: &'static str,
    },
}

impl RestoreError {
    /// Restore errors are recoverable.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        ErrorClass::Restore
    }
}

/// Fatal errors that terminate `start` or `run_until`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Device invariant violation; latched until reset.
    #[error(transparent)]
    Fault(#[from] DeviceFault),
}

impl MachineError {
    /// Returns the error class of the wrapped error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Configuration,
            Self::Fault(_) => ErrorClass::DeviceInvariant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigError, DeviceFault, ErrorClass, FaultReason, FieldMismatch, MachineError,
        ResourceKind, RestoreError,
    };

    #[test]
    fn fatal_classes_match_propagation_policy() {
        assert!(ErrorClass::Configuration.is_fatal());
        assert!(ErrorClass::DeviceInvariant.is_fatal());
        assert!(!ErrorClass::Bus.is_fatal());
        assert!(!ErrorClass::Restore.is_fatal());
    }

    #[test]
    fn missing_required_names_device_and_resource() {
        let err = ConfigError::MissingRequired {
            device: ":cpu".to_owned(),
            kind: ResourceKind::Region,
            resource: ":cpu:rom".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "device `:cpu` is missing required memory region `:cpu:rom`"
        );
    }

    #[test]
    fn device_fault_is_attributed_to_tag() {
        let fault = DeviceFault {
            tag: ":maincpu".to_owned(),
            reason: FaultReason::NoProgress { budget: 12 },
        };
        let err = MachineError::from(fault);
        assert_eq!(err.class(), ErrorClass::DeviceInvariant);
        assert!(err.to_string().starts_with("device `:maincpu`"));
    }

    #[test]
    fn restore_mismatch_lists_every_field() {
        let err = RestoreError::Mismatch(vec![
            FieldMismatch::Missing {
                tag: ":a".to_owned(),
                field: "pc".to_owned(),
            },
            FieldMismatch::SizeMismatch {
                tag: ":b".to_owned(),
                field: "acc".to_owned(),
                expected: 2,
                found: 4,
            },
        ]);
        let text = err.to_string();
        assert!(text.contains(":a/pc missing from image"));
        assert!(text.contains(":b/acc is 4 bytes, expected 2"));
        assert_eq!(err.class(), ErrorClass::Restore);
    }

    #[test]
    fn unresolved_dependencies_lists_tags() {
        let err = ConfigError::UnresolvedDependencies {
            tags: vec![":a".to_owned(), ":b".to_owned()],
        };
        assert_eq!(err.to_string(), "devices never finished starting: :a, :b");
    }
}
