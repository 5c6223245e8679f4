//! Address spaces and bus dispatch primitives.

/// Access widths, lane math and split planning.
pub mod access;
/// Handler entries and install ranges.
pub mod handler;
/// Regions, backing blocks and banks.
pub mod region;
/// Address space implementation.
pub mod space;
/// Word-granular dispatch tables.
pub mod table;

pub use access::{unit_shift, width_mask, Access, AccessPlan, AccessWidth, Endianness, MAX_PARTS};
pub use handler::{HandlerEntry, HandlerKind, MapRange, MapSpan, ResolvedEntry};
pub use region::{Bank, BankEntry, MemoryBlock, MemoryRegion};
pub use space::{AddressSpace, SpaceConfig};
pub use table::LookupTable;

macro_rules! index_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Creates an id from a raw index.
            #[must_use]
            pub const fn from_index(index: u32) -> Self {
                Self(index)
            }

            /// Raw index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

index_id!(
    /// Machine-wide address space id.
    SpaceId
);
index_id!(
    /// Machine-wide memory region id.
    RegionId
);
index_id!(
    /// Backing block id, local to one address space.
    BlockId
);
index_id!(
    /// Bank id, local to one address space.
    BankId
);
