//! Access widths, lane math and the split plan for wide or unaligned accesses.

/// Width of a single bus access or installed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// 8 bits.
    Byte,
    /// 16 bits.
    Word,
    /// 32 bits.
    Dword,
    /// 64 bits.
    Qword,
}

impl AccessWidth {
    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Dword => 4,
            Self::Qword => 8,
        }
    }

    /// Width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// All-ones mask of this width.
    #[must_use]
    pub const fn mask(self) -> u64 {
        width_mask(self.bits())
    }

    /// `log2(bytes)`.
    #[must_use]
    pub const fn shift(self) -> u32 {
        self.bytes().trailing_zeros()
    }
}

/// Byte order of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Endianness {
    /// Lowest address in the least significant lane.
    #[default]
    Little,
    /// Lowest address in the most significant lane.
    Big,
}

/// Direction(s) a handler is installed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Reads only.
    Read,
    /// Writes only.
    Write,
    /// Reads and writes.
    ReadWrite,
}

impl Access {
    /// `true` when reads are covered.
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// `true` when writes are covered.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// All-ones mask of `bits` bits, saturating at 64.
#[must_use]
pub const fn width_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1_u64 << bits) - 1
    }
}

/// Bit shift of unit `index` of `count` units of `unit_bits` each inside a
/// word, by bus endianness.
#[must_use]
pub const fn unit_shift(index: u32, count: u32, unit_bits: u32, endianness: Endianness) -> u32 {
    match endianness {
        Endianness::Little => index * unit_bits,
        Endianness::Big => (count - 1 - index) * unit_bits,
    }
}

/// Maximum number of bus words one access can touch.
pub const MAX_PARTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ByteRoute {
    part: u8,
    lane_shift: u8,
    value_shift: u8,
}

/// Precomputed decomposition of one access into per-word bus operations.
///
/// Wide and unaligned accesses are split here, before any handler runs, so
/// that handler dispatch only ever sees word-aligned, lane-masked operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPlan {
    words: [u64; MAX_PARTS],
    masks: [u64; MAX_PARTS],
    parts: usize,
    routes: [ByteRoute; MAX_PARTS],
    len: usize,
}

impl AccessPlan {
    /// Plans an access of `width` at byte address `addr` on a bus of
    /// `bus_width` words. Addresses wrap inside `addr_mask`.
    #[must_use]
    pub fn new(
        addr: u64,
        width: AccessWidth,
        bus_width: AccessWidth,
        addr_mask: u64,
        endianness: Endianness,
    ) -> Self {
        let mut plan = Self {
            words: [0; MAX_PARTS],
            masks: [0; MAX_PARTS],
            parts: 0,
            routes: [ByteRoute::default(); MAX_PARTS],
            len: width.bytes() as usize,
        };
        let bus_bytes = u64::from(bus_width.bytes());
        let shift = bus_width.shift();
        let count = width.bytes();
        for index in 0..count {
            let byte_addr = addr.wrapping_add(u64::from(index)) & addr_mask;
            let word = byte_addr >> shift;
            #[allow(clippy::cast_possible_truncation)]
            let lane = (byte_addr & (bus_bytes - 1)) as u32;
            let lane_shift = unit_shift(lane, bus_width.bytes(), 8, endianness);
            let value_shift = unit_shift(index, count, 8, endianness);
            let part = match plan.words[..plan.parts].iter().position(|&w| w == word) {
                Some(part) => part,
                None => {
                    plan.words[plan.parts] = word;
                    plan.parts += 1;
                    plan.parts - 1
                }
            };
            plan.masks[part] |= 0xFF << lane_shift;
            plan.routes[index as usize] = ByteRoute {
                part: u8::try_from(part).unwrap_or(u8::MAX),
                lane_shift: u8::try_from(lane_shift).unwrap_or(u8::MAX),
                value_shift: u8::try_from(value_shift).unwrap_or(u8::MAX),
            };
        }
        plan
    }

    /// Number of bus words touched.
    #[must_use]
    pub const fn parts(&self) -> usize {
        self.parts
    }

    /// `true` when the access spans more than one bus word.
    #[must_use]
    pub const fn is_split(&self) -> bool {
        self.parts > 1
    }

    /// Word index and lane mask of part `index`.
    #[must_use]
    pub const fn part(&self, index: usize) -> (u64, u64) {
        (self.words[index], self.masks[index])
    }

    /// Assembles the access value from per-part bus data.
    #[must_use]
    pub fn merge(&self, data: &[u64; MAX_PARTS]) -> u64 {
        self.routes[..self.len].iter().fold(0, |value, route| {
            let byte = (data[route.part as usize] >> route.lane_shift) & 0xFF;
            value | (byte << route.value_shift)
        })
    }

    /// Distributes an access value into per-part bus data.
    #[must_use]
    pub fn split(&self, value: u64) -> [u64; MAX_PARTS] {
        let mut data = [0; MAX_PARTS];
        for route in &self.routes[..self.len] {
            let byte = (value >> route.value_shift) & 0xFF;
            data[route.part as usize] |= byte << route.lane_shift;
        }
        data
    }
}
