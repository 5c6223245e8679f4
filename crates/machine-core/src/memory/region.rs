//! Named memory regions, backing blocks and banks.

use super::BlockId;

/// Named, immutable byte region supplied by configuration (ROM images and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    name: String,
    data: Vec<u8>,
}

impl MemoryRegion {
    /// Creates a region.
    #[must_use]
    pub const fn new(name: String, data: Vec<u8>) -> Self {
        Self { name, data }
    }

    /// Full tag of the region.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` for an empty region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Backing storage owned by an address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    data: Vec<u8>,
    writable: bool,
}

impl MemoryBlock {
    /// Zero-filled writable block.
    #[must_use]
    pub fn ram(len: usize) -> Self {
        Self {
            data: vec![0; len],
            writable: true,
        }
    }

    /// Block holding `data`, read-only unless `writable`.
    #[must_use]
    pub const fn from_data(data: Vec<u8>, writable: bool) -> Self {
        Self { data, writable }
    }

    /// Contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable contents.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether bus writes land in this block.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn read_byte(&self, offset: u64) -> Option<u8> {
        usize::try_from(offset)
            .ok()
            .and_then(|offset| self.data.get(offset))
            .copied()
    }

    pub(crate) fn write_byte(&mut self, offset: u64, value: u8) {
        if !self.writable {
            return;
        }
        if let Some(byte) = usize::try_from(offset)
            .ok()
            .and_then(|offset| self.data.get_mut(offset))
        {
            *byte = value;
        }
    }
}

/// Location a bank entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankEntry {
    /// Backing block.
    pub block: BlockId,
    /// Byte offset inside the block.
    pub offset: u64,
}

/// Switchable window: accesses go to the currently selected entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    name: String,
    entries: Vec<BankEntry>,
    current: u32,
}

impl Bank {
    /// Creates a bank with no entries.
    #[must_use]
    pub const fn new(name: String) -> Self {
        Self {
            name,
            entries: Vec::new(),
            current: 0,
        }
    }

    /// Bank name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured entries.
    #[must_use]
    pub fn entries(&self) -> &[BankEntry] {
        &self.entries
    }

    /// Index of the selected entry.
    #[must_use]
    pub const fn current(&self) -> usize {
        self.current as usize
    }

    /// Selected entry, if any was configured.
    #[must_use]
    pub fn current_entry(&self) -> Option<BankEntry> {
        self.entries.get(self.current()).copied()
    }

    pub(crate) fn push(&mut self, entry: BankEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub(crate) fn select(&mut self, entry: usize) -> bool {
        if entry >= self.entries.len() {
            return false;
        }
        self.current = u32::try_from(entry).unwrap_or(0);
        true
    }

    pub(crate) fn current_mut(&mut self) -> &mut u32 {
        &mut self.current
    }
}

#[cfg(test)]
mod tests {
    use super::{Bank, BankEntry, MemoryBlock};
    use crate::memory::BlockId;

    #[test]
    fn rom_blocks_ignore_writes() {
        let mut block = MemoryBlock::from_data(vec![1, 2, 3], false);
        block.write_byte(1, 9);
        assert_eq!(block.read_byte(1), Some(2));
        assert_eq!(block.read_byte(3), None);
    }

    #[test]
    fn bank_selection_is_bounds_checked() {
        let mut bank = Bank::new("rombank".to_owned());
        assert!(bank.current_entry().is_none());
        bank.push(BankEntry {
            block: BlockId::from_index(0),
            offset: 0,
        });
        bank.push(BankEntry {
            block: BlockId::from_index(0),
            offset: 0x4000,
        });
        assert!(bank.select(1));
        assert!(!bank.select(2));
        assert_eq!(bank.current(), 1);
        assert_eq!(bank.current_entry().map(|e| e.offset), Some(0x4000));
    }
}
