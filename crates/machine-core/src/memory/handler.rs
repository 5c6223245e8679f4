//! Handler entries stored in an address space's dispatch tables.

use super::{AccessWidth, BankEntry, BankId, BlockId};
use crate::device::DeviceId;

/// Address range description for an install.
///
/// `start..=end` is inclusive. Bits set in `mirror` are ignored when
/// decoding, replicating the range at every combination of those bits.
/// `mask` is applied to the offset handed to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapRange {
    /// First byte address.
    pub start: u64,
    /// Last byte address (inclusive).
    pub end: u64,
    /// Don't-care address bits.
    pub mirror: u64,
    /// Offset mask.
    pub mask: u64,
    /// Chip-select bits: replicated like mirror bits but kept in the offset.
    pub select: u64,
}

impl MapRange {
    /// Plain range with no mirror and an unmasked offset.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            mirror: 0,
            mask: u64::MAX,
            select: 0,
        }
    }

    /// Adds mirror bits.
    #[must_use]
    pub const fn mirror(mut self, mirror: u64) -> Self {
        self.mirror = mirror;
        self
    }

    /// Sets the offset mask.
    #[must_use]
    pub const fn mask(mut self, mask: u64) -> Self {
        self.mask = mask;
        self
    }

    /// Adds select bits.
    #[must_use]
    pub const fn select(mut self, select: u64) -> Self {
        self.select = select;
        self
    }
}

/// What services a range of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HandlerKind {
    /// Nothing installed; reads return open bus, writes are dropped and logged.
    #[default]
    Unmapped,
    /// Explicitly silent: reads return open bus, writes are dropped.
    Nop,
    /// Device handler of `width`, called once per active sub-unit.
    Device {
        /// Servicing device.
        device: DeviceId,
        /// Device-defined map selector.
        map: u32,
        /// Handler width; narrower than the bus means lane sub-units.
        width: AccessWidth,
        /// Bus lanes the handler is wired to.
        unit_mask: u64,
    },
    /// Writable memory block.
    Ram(BlockId),
    /// Read-only memory block.
    Rom(BlockId),
    /// Switchable window onto bank entries.
    Bank(BankId),
}

impl HandlerKind {
    /// Short lowercase kind name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unmapped => "unmapped",
            Self::Nop => "nop",
            Self::Device { .. } => "device",
            Self::Ram(_) => "ram",
            Self::Rom(_) => "rom",
            Self::Bank(_) => "bank",
        }
    }
}

/// One installed handler, deduplicated per space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HandlerEntry {
    /// What services the range.
    pub kind: HandlerKind,
    /// First byte address of the installed range, mirror bits stripped.
    pub start: u64,
    /// Don't-care bits.
    pub mirror: u64,
    /// Offset mask.
    pub addr_mask: u64,
}

impl HandlerEntry {
    /// Byte offset of `byte_addr` inside the installed range.
    #[must_use]
    pub const fn byte_offset(&self, byte_addr: u64) -> u64 {
        ((byte_addr & !self.mirror).wrapping_sub(self.start)) & self.addr_mask
    }
}

/// A handler entry looked up for one access, with the bank selection it
/// will use pinned at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResolvedEntry {
    /// Installed handler.
    pub entry: HandlerEntry,
    /// Bank entry selected when the access began, for bank handlers.
    pub bank: Option<BankEntry>,
}

/// One contiguous run of a dispatch table, for map dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSpan {
    /// First byte address.
    pub start: u64,
    /// Last byte address (inclusive).
    pub end: u64,
    /// Handler servicing the run.
    pub entry: HandlerEntry,
}
