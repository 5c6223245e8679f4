//! Address spaces: handler installation, lookup and direct memory service.

use super::access::unit_shift;
use super::handler::{HandlerEntry, HandlerKind, MapRange, MapSpan, ResolvedEntry};
use super::region::{Bank, BankEntry, MemoryBlock};
use super::table::LookupTable;
use super::{Access, AccessPlan, AccessWidth, BankId, BlockId, Endianness, SpaceId};
use crate::device::DeviceId;
use crate::fault::ConfigError;
use crate::save::StateIo;

/// Static description of an address space, declared by its owning device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SpaceConfig {
    /// Space name, unique within the owner (`"program"`, `"io"`, ...).
    pub name: &'static str,
    /// Data bus width.
    pub data_width: AccessWidth,
    /// Number of byte-address bits.
    pub addr_width: u32,
    /// Lane order.
    pub endianness: Endianness,
    /// Value read from unmapped lanes; machine default when `None`.
    pub open_bus: Option<u64>,
}

impl SpaceConfig {
    /// Describes a space using the machine's default open-bus value.
    #[must_use]
    pub const fn new(
        name: &'static str,
        data_width: AccessWidth,
        addr_width: u32,
        endianness: Endianness,
    ) -> Self {
        Self {
            name,
            data_width,
            addr_width,
            endianness,
            open_bus: None,
        }
    }

    /// Overrides the open-bus value for this space.
    #[must_use]
    pub const fn with_open_bus(mut self, value: u64) -> Self {
        self.open_bus = Some(value);
        self
    }
}

/// Index of the always-present unmapped entry.
const UNMAPPED: u32 = 0;

/// A device-owned address space.
///
/// Reads and writes have separate dispatch tables. Later installs shadow
/// earlier ones on the addresses they cover.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    id: SpaceId,
    owner: DeviceId,
    index: usize,
    name: String,
    config: SpaceConfig,
    addr_mask: u64,
    open_bus: u64,
    log_unmapped: bool,
    entries: Vec<HandlerEntry>,
    read_table: LookupTable,
    write_table: LookupTable,
    blocks: Vec<MemoryBlock>,
    banks: Vec<Bank>,
}

impl AddressSpace {
    /// Creates an empty space; every address starts unmapped.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSpace`] for unsupported address widths.
    pub fn new(
        id: SpaceId,
        owner: DeviceId,
        index: usize,
        owner_tag: &str,
        config: SpaceConfig,
        default_open_bus: u64,
    ) -> Result<Self, ConfigError> {
        let name = format!("{owner_tag}/{}", config.name);
        if config.addr_width == 0 || config.addr_width > 32 {
            return Err(ConfigError::InvalidSpace {
                space: name,
                reason: "address width must be between 1 and 32 bits",
            });
        }
        let shift = config.data_width.shift();
        if config.addr_width < shift {
            return Err(ConfigError::InvalidSpace {
                space: name,
                reason: "address width is narrower than one bus word",
            });
        }
        let word_bits = config.addr_width - shift;
        Ok(Self {
            id,
            owner,
            index,
            name,
            config,
            addr_mask: (1_u64 << config.addr_width) - 1,
            open_bus: config.open_bus.unwrap_or(default_open_bus) & config.data_width.mask(),
            log_unmapped: true,
            entries: vec![HandlerEntry::default()],
            read_table: LookupTable::new(word_bits),
            write_table: LookupTable::new(word_bits),
            blocks: Vec::new(),
            banks: Vec::new(),
        })
    }

    /// Machine-wide id.
    #[must_use]
    pub const fn id(&self) -> SpaceId {
        self.id
    }

    /// Owning device.
    #[must_use]
    pub const fn owner(&self) -> DeviceId {
        self.owner
    }

    /// Index among the owner's spaces.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Display name, `owner_tag/space_name`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared configuration.
    #[must_use]
    pub const fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Mask of valid byte addresses.
    #[must_use]
    pub const fn addr_mask(&self) -> u64 {
        self.addr_mask
    }

    /// Value observed on unmapped lanes.
    #[must_use]
    pub const fn open_bus(&self) -> u64 {
        self.open_bus
    }

    /// Replaces the open-bus value.
    pub fn set_open_bus(&mut self, value: u64) {
        self.open_bus = value & self.config.data_width.mask();
    }

    /// Whether unmapped accesses are logged.
    #[must_use]
    pub const fn logs_unmapped(&self) -> bool {
        self.log_unmapped
    }

    /// Enables or disables unmapped-access logging.
    pub fn set_log_unmapped(&mut self, enable: bool) {
        self.log_unmapped = enable;
    }

    const fn bus_shift(&self) -> u32 {
        self.config.data_width.shift()
    }

    fn malformed(&self, range: &MapRange, reason: &'static str) -> ConfigError {
        ConfigError::MalformedRange {
            space: self.name.clone(),
            start: range.start,
            end: range.end,
            reason,
        }
    }

    fn validate(&self, range: &MapRange) -> Result<(u64, u64, u64, u64), ConfigError> {
        if range.start > range.end {
            return Err(self.malformed(range, "start is after end"));
        }
        if range.end > self.addr_mask {
            return Err(self.malformed(range, "range exceeds the address width"));
        }
        let mirror = range.mirror & self.addr_mask;
        let start = range.start & !mirror;
        let end = range.end & !mirror;
        if start > end {
            return Err(self.malformed(range, "mirror bits swallow the range"));
        }
        let lane = u64::from(self.config.data_width.bytes()) - 1;
        if start & lane != 0 {
            return Err(self.malformed(range, "start is not aligned to the bus width"));
        }
        if end & lane != lane {
            return Err(self.malformed(range, "end does not close a bus word"));
        }
        if mirror & lane != 0 {
            return Err(self.malformed(range, "mirror bits fall inside a bus word"));
        }
        let select = range.select & self.addr_mask;
        if select & (start | end) != 0 {
            return Err(self.malformed(range, "select bits overlap the range"));
        }
        if select & mirror != 0 {
            return Err(self.malformed(range, "select bits overlap the mirror"));
        }
        if select & lane != 0 {
            return Err(self.malformed(range, "select bits fall inside a bus word"));
        }
        Ok((start, end, mirror, select))
    }

    fn intern(&mut self, entry: HandlerEntry) -> u32 {
        let index = self
            .entries
            .iter()
            .position(|existing| *existing == entry)
            .unwrap_or_else(|| {
                self.entries.push(entry);
                self.entries.len() - 1
            });
        u32::try_from(index).unwrap_or(UNMAPPED)
    }

    /// Installs `kind` over `range` for the given direction(s).
    ///
    /// # Errors
    ///
    /// [`ConfigError::MalformedRange`] when the range or handler shape does
    /// not fit this space.
    pub fn install(
        &mut self,
        access: Access,
        range: MapRange,
        mut kind: HandlerKind,
    ) -> Result<(), ConfigError> {
        let (start, end, mirror, select) = self.validate(&range)?;
        match &mut kind {
            HandlerKind::Device {
                width, unit_mask, ..
            } => {
                if *width > self.config.data_width {
                    return Err(self.malformed(&range, "handler is wider than the data bus"));
                }
                *unit_mask &= self.config.data_width.mask();
                if *unit_mask == 0 {
                    return Err(self.malformed(&range, "unit mask selects no lanes"));
                }
            }
            HandlerKind::Ram(block) | HandlerKind::Rom(block) => {
                if block.index() >= self.blocks.len() {
                    return Err(self.malformed(&range, "unknown memory block"));
                }
            }
            HandlerKind::Bank(bank) => {
                if bank.index() >= self.banks.len() {
                    return Err(self.malformed(&range, "unknown bank"));
                }
            }
            HandlerKind::Unmapped | HandlerKind::Nop => {}
        }
        let entry = HandlerEntry {
            kind,
            start,
            mirror,
            addr_mask: range.mask,
        };
        let index = if kind == HandlerKind::Unmapped {
            UNMAPPED
        } else {
            self.intern(entry)
        };
        let shift = self.bus_shift();
        let (first, last) = (start >> shift, end >> shift);
        let mirror_words = (mirror | select) >> shift;
        let mut sub = mirror_words;
        loop {
            if access.reads() {
                self.read_table.fill(first | sub, last | sub, index);
            }
            if access.writes() {
                self.write_table.fill(first | sub, last | sub, index);
            }
            if sub == 0 {
                break;
            }
            sub = (sub - 1) & mirror_words;
        }
        log::debug!(
            "{}: installed {} at {start:#x}..={end:#x} (mirror {mirror:#x}, select {select:#x})",
            self.name,
            kind.name()
        );
        Ok(())
    }

    /// Installs a device handler of `width` on `map`.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::install`].
    pub fn install_device(
        &mut self,
        access: Access,
        range: MapRange,
        device: DeviceId,
        map: u32,
        width: AccessWidth,
    ) -> Result<(), ConfigError> {
        self.install_device_lanes(access, range, device, map, width, u64::MAX)
    }

    /// Installs a device handler wired only to the lanes in `unit_mask`.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::install`].
    pub fn install_device_lanes(
        &mut self,
        access: Access,
        range: MapRange,
        device: DeviceId,
        map: u32,
        width: AccessWidth,
        unit_mask: u64,
    ) -> Result<(), ConfigError> {
        self.install(
            access,
            range,
            HandlerKind::Device {
                device,
                map,
                width,
                unit_mask,
            },
        )
    }

    fn block_len(range: &MapRange, start: u64, end: u64) -> usize {
        let len = (end - start).min(range.mask).saturating_add(1);
        usize::try_from(len).unwrap_or(usize::MAX)
    }

    /// Allocates zeroed RAM and maps it over `range`.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::install`].
    pub fn install_ram(&mut self, access: Access, range: MapRange) -> Result<BlockId, ConfigError> {
        let (start, end, _, _) = self.validate(&range)?;
        let block = self.add_block(MemoryBlock::ram(Self::block_len(&range, start, end)));
        self.install(access, range, HandlerKind::Ram(block))?;
        Ok(block)
    }

    /// Maps a read-only copy of `data` over `range`, zero-padded or truncated
    /// to the range length. Writes to the range are not affected.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::install`].
    pub fn install_rom(&mut self, range: MapRange, data: &[u8]) -> Result<BlockId, ConfigError> {
        let (start, end, _, _) = self.validate(&range)?;
        let mut contents = data.to_vec();
        contents.resize(Self::block_len(&range, start, end), 0);
        let block = self.add_block(MemoryBlock::from_data(contents, false));
        self.install(Access::Read, range, HandlerKind::Rom(block))?;
        Ok(block)
    }

    /// Maps a silent handler: reads return open bus, writes vanish unlogged.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::install`].
    pub fn install_nop(&mut self, access: Access, range: MapRange) -> Result<(), ConfigError> {
        self.install(access, range, HandlerKind::Nop)
    }

    /// Returns `range` to the unmapped state.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::install`].
    pub fn unmap(&mut self, access: Access, range: MapRange) -> Result<(), ConfigError> {
        self.install(access, range, HandlerKind::Unmapped)
    }

    /// Adds a backing block owned by this space.
    pub fn add_block(&mut self, block: MemoryBlock) -> BlockId {
        self.blocks.push(block);
        BlockId::from_index(u32::try_from(self.blocks.len() - 1).unwrap_or(u32::MAX))
    }

    /// Backing block by id.
    #[must_use]
    pub fn block(&self, block: BlockId) -> Option<&MemoryBlock> {
        self.blocks.get(block.index())
    }

    /// Mutable backing block by id.
    pub fn block_mut(&mut self, block: BlockId) -> Option<&mut MemoryBlock> {
        self.blocks.get_mut(block.index())
    }

    /// Creates a named bank with no entries.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateRegion`] when the name is taken in this space.
    pub fn add_bank(&mut self, name: &str) -> Result<BankId, ConfigError> {
        if self.find_bank(name).is_some() {
            return Err(ConfigError::DuplicateRegion {
                name: format!("{}.bank.{name}", self.name),
            });
        }
        self.banks.push(Bank::new(name.to_owned()));
        Ok(BankId::from_index(
            u32::try_from(self.banks.len() - 1).unwrap_or(u32::MAX),
        ))
    }

    /// Looks up a bank by name.
    #[must_use]
    pub fn find_bank(&self, name: &str) -> Option<BankId> {
        self.banks
            .iter()
            .position(|bank| bank.name() == name)
            .and_then(|index| u32::try_from(index).ok())
            .map(BankId::from_index)
    }

    /// Bank by id.
    #[must_use]
    pub fn bank(&self, bank: BankId) -> Option<&Bank> {
        self.banks.get(bank.index())
    }

    fn bank_mut(&mut self, bank: BankId) -> Result<&mut Bank, ConfigError> {
        let name = self.name.clone();
        self.banks
            .get_mut(bank.index())
            .ok_or(ConfigError::UnknownBankEntry {
                bank: format!("{name}.bank#{}", bank.index()),
                entry: 0,
            })
    }

    /// Appends an entry pointing at `offset` inside `block`; returns its index.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownBankEntry`] for an unknown bank or block.
    pub fn add_bank_entry(
        &mut self,
        bank: BankId,
        block: BlockId,
        offset: u64,
    ) -> Result<usize, ConfigError> {
        if block.index() >= self.blocks.len() {
            let bank_name = self.bank(bank).map_or("?", Bank::name).to_owned();
            return Err(ConfigError::UnknownBankEntry {
                bank: bank_name,
                entry: block.index(),
            });
        }
        Ok(self.bank_mut(bank)?.push(BankEntry { block, offset }))
    }

    /// Copies `data` into a new block and adds `count` entries `stride`
    /// bytes apart.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownBankEntry`] for an unknown bank.
    pub fn configure_bank_entries(
        &mut self,
        bank: BankId,
        data: Vec<u8>,
        count: usize,
        stride: u64,
        writable: bool,
    ) -> Result<(), ConfigError> {
        self.bank_mut(bank)?;
        let block = self.add_block(MemoryBlock::from_data(data, writable));
        for entry in 0..count {
            self.add_bank_entry(bank, block, stride * entry as u64)?;
        }
        Ok(())
    }

    /// Maps `bank` over `range`.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::install`].
    pub fn install_bank(
        &mut self,
        access: Access,
        range: MapRange,
        bank: BankId,
    ) -> Result<(), ConfigError> {
        self.install(access, range, HandlerKind::Bank(bank))
    }

    /// Selects the active entry of `bank`. Takes effect on the next access.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownBankEntry`] when `entry` was never configured.
    pub fn set_bank_entry(&mut self, bank: BankId, entry: usize) -> Result<(), ConfigError> {
        let target = self.bank_mut(bank)?;
        if target.select(entry) {
            Ok(())
        } else {
            Err(ConfigError::UnknownBankEntry {
                bank: target.name().to_owned(),
                entry,
            })
        }
    }

    /// Handler servicing reads of bus word `word`.
    #[must_use]
    pub fn read_entry(&self, word: u64) -> HandlerEntry {
        self.entry(self.read_table.get(word))
    }

    /// Handler servicing writes of bus word `word`.
    #[must_use]
    pub fn write_entry(&self, word: u64) -> HandlerEntry {
        self.entry(self.write_table.get(word))
    }

    /// Pins the current bank selection of `entry`, so later bank switches
    /// do not affect an access already under way.
    #[must_use]
    pub fn resolve(&self, entry: HandlerEntry) -> ResolvedEntry {
        let bank = match entry.kind {
            HandlerKind::Bank(bank) => self.bank(bank).and_then(Bank::current_entry),
            _ => None,
        };
        ResolvedEntry { entry, bank }
    }

    /// Kind of handler mapped at byte address `addr` for one direction.
    #[must_use]
    pub fn handler_name(&self, access: Access, addr: u64) -> &'static str {
        let word = (addr & self.addr_mask) >> self.bus_shift();
        let entry = if access.writes() && !access.reads() {
            self.write_entry(word)
        } else {
            self.read_entry(word)
        };
        entry.kind.name()
    }

    fn entry(&self, index: u32) -> HandlerEntry {
        self.entries
            .get(index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Splits an access at byte address `addr` into per-word operations.
    #[must_use]
    pub fn plan(&self, addr: u64, width: AccessWidth) -> AccessPlan {
        AccessPlan::new(
            addr,
            width,
            self.config.data_width,
            self.addr_mask,
            self.config.endianness,
        )
    }

    fn block_target(resolved: &ResolvedEntry, byte_addr: u64) -> Option<(BlockId, u64)> {
        let offset = resolved.entry.byte_offset(byte_addr);
        match resolved.entry.kind {
            HandlerKind::Ram(block) | HandlerKind::Rom(block) => Some((block, offset)),
            HandlerKind::Bank(_) => {
                let selected = resolved.bank?;
                Some((selected.block, selected.offset + offset))
            }
            HandlerKind::Unmapped | HandlerKind::Nop | HandlerKind::Device { .. } => None,
        }
    }

    fn lanes(&self, mem_mask: u64) -> impl Iterator<Item = (u64, u32)> + '_ {
        let bytes = self.config.data_width.bytes();
        let endianness = self.config.endianness;
        (0..bytes)
            .map(move |lane| (u64::from(lane), unit_shift(lane, bytes, 8, endianness)))
            .filter(move |(_, shift)| (mem_mask >> shift) & 0xFF != 0)
    }

    /// Reads the lanes in `mem_mask` of bus word `word` from a memory-backed
    /// entry. Lanes with no backing byte read as open bus.
    #[must_use]
    pub fn read_memory(&self, entry: &ResolvedEntry, word: u64, mem_mask: u64) -> u64 {
        let base = word << self.bus_shift();
        self.lanes(mem_mask).fold(self.open_bus, |value, (lane, shift)| {
            let byte = Self::block_target(entry, base | lane)
                .and_then(|(block, offset)| self.block(block)?.read_byte(offset));
            match byte {
                Some(byte) => (value & !(0xFF << shift)) | (u64::from(byte) << shift),
                None => value,
            }
        })
    }

    /// Writes the lanes in `mem_mask` of bus word `word` into a memory-backed
    /// entry. Read-only blocks ignore the write.
    pub fn write_memory(&mut self, entry: &ResolvedEntry, word: u64, data: u64, mem_mask: u64) {
        if matches!(entry.entry.kind, HandlerKind::Rom(_)) {
            return;
        }
        let base = word << self.bus_shift();
        let lanes: Vec<_> = self.lanes(mem_mask).collect();
        for (lane, shift) in lanes {
            if let Some((block, offset)) = Self::block_target(entry, base | lane) {
                #[allow(clippy::cast_possible_truncation)]
                let byte = (data >> shift) as u8;
                if let Some(block) = self.block_mut(block) {
                    block.write_byte(offset, byte);
                }
            }
        }
    }

    /// Contiguous handler runs of one direction, lowest address first.
    #[must_use]
    pub fn dump(&self, access: Access) -> Vec<MapSpan> {
        let table = if access.writes() && !access.reads() {
            &self.write_table
        } else {
            &self.read_table
        };
        let shift = self.bus_shift();
        table
            .spans()
            .into_iter()
            .map(|(first, last, index)| MapSpan {
                start: first << shift,
                end: ((last + 1) << shift) - 1,
                entry: self.entry(index),
            })
            .collect()
    }

    pub(crate) fn state(&mut self, io: &mut StateIo<'_>) {
        let space = self.config.name;
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if block.is_writable() {
                io.item(&format!("{space}.block{index}"), block.data_mut());
            }
        }
        for bank in &mut self.banks {
            let field = format!("{space}.bank.{}", bank.name());
            io.item(&field, bank.current_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressSpace, SpaceConfig};
    use crate::device::DeviceId;
    use crate::fault::ConfigError;
    use crate::memory::{Access, AccessWidth, Endianness, HandlerKind, MapRange, SpaceId};

    fn space(width: AccessWidth, endianness: Endianness) -> AddressSpace {
        AddressSpace::new(
            SpaceId::from_index(0),
            DeviceId::from_index(1),
            0,
            ":cpu",
            SpaceConfig::new("program", width, 16, endianness),
            u64::MAX,
        )
        .expect("space")
    }

    #[test]
    fn open_bus_is_truncated_to_data_width() {
        let space = space(AccessWidth::Byte, Endianness::Little);
        assert_eq!(space.open_bus(), 0xFF);
        assert_eq!(space.name(), ":cpu/program");
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        let mut space = space(AccessWidth::Word, Endianness::Little);
        let cases = [
            (MapRange::new(0x10, 0x0F), "start is after end"),
            (MapRange::new(0x0, 0x1_0000), "range exceeds the address width"),
            (MapRange::new(0x1, 0x10), "start is not aligned to the bus width"),
            (MapRange::new(0x0, 0x10), "end does not close a bus word"),
        ];
        for (range, expected) in cases {
            match space.install_nop(Access::ReadWrite, range) {
                Err(ConfigError::MalformedRange { reason, .. }) => assert_eq!(reason, expected),
                other => panic!("expected malformed range, got {other:?}"),
            }
        }
    }

    #[test]
    fn ram_round_trips_bytes_in_bus_order() {
        let mut space = space(AccessWidth::Word, Endianness::Big);
        let block = space
            .install_ram(Access::ReadWrite, MapRange::new(0x1000, 0x10FF))
            .expect("ram");
        let entry = space.resolve(space.write_entry(0x1000 >> 1));
        space.write_memory(&entry, 0x1000 >> 1, 0xABCD, 0xFFFF);
        let data = space.block(block).expect("block").data();
        assert_eq!(&data[..2], &[0xAB, 0xCD]);
        let entry = space.resolve(space.read_entry(0x1000 >> 1));
        assert_eq!(space.read_memory(&entry, 0x1000 >> 1, 0xFF00), 0xABFF);
    }

    #[test]
    fn rom_only_claims_reads() {
        let mut space = space(AccessWidth::Byte, Endianness::Little);
        space
            .install_rom(MapRange::new(0x0000, 0x00FF), &[0x11, 0x22])
            .expect("rom");
        assert!(matches!(space.read_entry(0).kind, HandlerKind::Rom(_)));
        assert_eq!(space.write_entry(0).kind, HandlerKind::Unmapped);
        let entry = space.resolve(space.read_entry(1));
        assert_eq!(space.read_memory(&entry, 1, 0xFF), 0x22);
        assert_eq!(space.read_memory(&entry, 2, 0xFF), 0x00);
    }

    #[test]
    fn mirrors_replicate_ranges() {
        let mut space = space(AccessWidth::Byte, Endianness::Little);
        space
            .install_ram(Access::ReadWrite, MapRange::new(0x0000, 0x07FF).mirror(0x1800))
            .expect("ram");
        let spans = space.dump(Access::Read);
        let mapped: Vec<_> = spans
            .iter()
            .filter(|span| span.entry.kind != HandlerKind::Unmapped)
            .map(|span| (span.start, span.end))
            .collect();
        assert_eq!(mapped, vec![(0x0000, 0x1FFF)]);
        assert_eq!(space.read_entry(0x1803), space.read_entry(0x0003));
    }

    #[test]
    fn select_bits_replicate_and_reach_the_offset() {
        let mut space = space(AccessWidth::Byte, Endianness::Little);
        space
            .install_nop(Access::Read, MapRange::new(0x4000, 0x400F).select(0x0300))
            .expect("nop");
        let entry = space.read_entry(0x4205);
        assert_eq!(entry.kind, HandlerKind::Nop);
        assert_eq!(entry.byte_offset(0x4205), 0x205);
        assert_eq!(space.read_entry(0x4405).kind, HandlerKind::Unmapped);
        assert!(space
            .install_nop(Access::Read, MapRange::new(0x4000, 0x40FF).select(0x0080))
            .is_err());
        assert!(space
            .install_nop(Access::Read, MapRange::new(0x0000, 0x00FF).mirror(0x100).select(0x100))
            .is_err());
    }

    #[test]
    fn identical_installs_share_one_entry() {
        let mut space = space(AccessWidth::Byte, Endianness::Little);
        space
            .install_nop(Access::Read, MapRange::new(0x0000, 0x00FF))
            .expect("nop");
        space
            .install_nop(Access::Read, MapRange::new(0x0000, 0x00FF))
            .expect("nop again");
        assert_eq!(space.entries.len(), 2);
    }

    #[test]
    fn bank_switch_redirects_reads() {
        let mut space = space(AccessWidth::Byte, Endianness::Little);
        let bank = space.add_bank("rombank").expect("bank");
        space
            .configure_bank_entries(bank, vec![0xA0, 0xA1, 0xB0, 0xB1], 2, 2, false)
            .expect("entries");
        space
            .install_bank(Access::Read, MapRange::new(0x8000, 0x8001), bank)
            .expect("install");
        let pinned = space.resolve(space.read_entry(0x8001));
        assert_eq!(space.read_memory(&pinned, 0x8001, 0xFF), 0xA1);
        space.set_bank_entry(bank, 1).expect("select");
        assert_eq!(space.read_memory(&pinned, 0x8001, 0xFF), 0xA1);
        let entry = space.resolve(space.read_entry(0x8001));
        assert_eq!(space.read_memory(&entry, 0x8001, 0xFF), 0xB1);
        assert!(matches!(
            space.set_bank_entry(bank, 5),
            Err(ConfigError::UnknownBankEntry { entry: 5, .. })
        ));
    }

    #[test]
    fn device_handler_wider_than_bus_is_rejected() {
        let mut space = space(AccessWidth::Byte, Endianness::Little);
        let result = space.install_device(
            Access::ReadWrite,
            MapRange::new(0, 0xFF),
            DeviceId::from_index(2),
            0,
            AccessWidth::Word,
        );
        assert!(matches!(result, Err(ConfigError::MalformedRange { .. })));
    }

    #[test]
    fn addr_width_is_validated() {
        let result = AddressSpace::new(
            SpaceId::from_index(0),
            DeviceId::from_index(1),
            0,
            ":cpu",
            SpaceConfig::new("wide", AccessWidth::Byte, 40, Endianness::Little),
            0,
        );
        assert!(matches!(result, Err(ConfigError::InvalidSpace { .. })));
    }
}
