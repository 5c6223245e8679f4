//! Save-state field registration and (de)serialization visitor.
//!
//! Devices describe their state once, in [`Device::state`](crate::device::Device::state),
//! by visiting every field through a [`StateIo`]. The same visit is used to
//! register field names and sizes, to collect a save image and to load one,
//! so the three can never disagree about layout.

/// Binary save image format.
pub mod image;

pub use image::{SaveState, SaveVersion, StateEntry, SAVE_MAGIC};

use crate::line::LineState;
use crate::time::Attotime;

/// A value that can be stored in a save image as a fixed number of bytes.
pub trait SaveItem {
    /// Encoded size in bytes.
    fn byte_len(&self) -> usize;

    /// Appends the encoding to `out`.
    fn save(&self, out: &mut Vec<u8>);

    /// Decodes from `bytes`, which holds exactly [`SaveItem::byte_len`] bytes.
    fn load(&mut self, bytes: &[u8]);
}

macro_rules! int_save_item {
    ($($ty:ty),*) => {
        $(
            impl SaveItem for $ty {
                fn byte_len(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }

                fn save(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn load(&mut self, bytes: &[u8]) {
                    if let Ok(raw) = bytes.try_into() {
                        *self = <$ty>::from_le_bytes(raw);
                    }
                }
            }
        )*
    };
}

int_save_item!(u8, u16, u32, u64, u128, i8, i16, i32, i64);

impl SaveItem for bool {
    fn byte_len(&self) -> usize {
        1
    }

    fn save(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn load(&mut self, bytes: &[u8]) {
        if let Some(byte) = bytes.first() {
            *self = *byte != 0;
        }
    }
}

impl SaveItem for Attotime {
    fn byte_len(&self) -> usize {
        16
    }

    fn save(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.as_attoseconds().to_le_bytes());
    }

    fn load(&mut self, bytes: &[u8]) {
        if let Ok(raw) = bytes.try_into() {
            *self = Self::from_attoseconds(u128::from_le_bytes(raw));
        }
    }
}

impl SaveItem for LineState {
    fn byte_len(&self) -> usize {
        4
    }

    fn save(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value().to_le_bytes());
    }

    fn load(&mut self, bytes: &[u8]) {
        if let Ok(raw) = bytes.try_into() {
            *self = Self::level(u32::from_le_bytes(raw));
        }
    }
}

impl<T: SaveItem> SaveItem for [T] {
    fn byte_len(&self) -> usize {
        self.iter().map(SaveItem::byte_len).sum()
    }

    fn save(&self, out: &mut Vec<u8>) {
        for item in self {
            item.save(out);
        }
    }

    fn load(&mut self, bytes: &[u8]) {
        let mut offset = 0;
        for item in self {
            let len = item.byte_len();
            if let Some(chunk) = bytes.get(offset..offset + len) {
                item.load(chunk);
            }
            offset += len;
        }
    }
}

impl<T: SaveItem, const N: usize> SaveItem for [T; N] {
    fn byte_len(&self) -> usize {
        self.as_slice().byte_len()
    }

    fn save(&self, out: &mut Vec<u8>) {
        self.as_slice().save(out);
    }

    fn load(&mut self, bytes: &[u8]) {
        self.as_mut_slice().load(bytes);
    }
}

impl<T: SaveItem> SaveItem for Vec<T> {
    fn byte_len(&self) -> usize {
        self.as_slice().byte_len()
    }

    fn save(&self, out: &mut Vec<u8>) {
        self.as_slice().save(out);
    }

    fn load(&mut self, bytes: &[u8]) {
        self.as_mut_slice().load(bytes);
    }
}

/// Name and size of one registered field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FieldDesc {
    /// Owning device tag.
    pub tag: String,
    /// Field name, unique within the device.
    pub field: String,
    /// Encoded size in bytes.
    pub size: usize,
}

enum Mode<'a> {
    Register(&'a mut Vec<FieldDesc>),
    Save(&'a mut Vec<StateEntry>),
    Load {
        entries: &'a [StateEntry],
        cursor: &'a mut usize,
    },
}

/// Visitor handed to [`Device::state`](crate::device::Device::state).
pub struct StateIo<'a> {
    tag: &'a str,
    mode: Mode<'a>,
}

impl<'a> StateIo<'a> {
    /// Visitor that records field descriptions for `tag`.
    pub fn register(tag: &'a str, out: &'a mut Vec<FieldDesc>) -> Self {
        Self {
            tag,
            mode: Mode::Register(out),
        }
    }

    /// Visitor that appends field contents for `tag`.
    pub fn save(tag: &'a str, out: &'a mut Vec<StateEntry>) -> Self {
        Self {
            tag,
            mode: Mode::Save(out),
        }
    }

    /// Visitor that loads fields from `entries`, starting at `cursor`.
    ///
    /// Entries must already have been validated against the registration.
    pub fn load(tag: &'a str, entries: &'a [StateEntry], cursor: &'a mut usize) -> Self {
        Self {
            tag,
            mode: Mode::Load { entries, cursor },
        }
    }

    /// Tag of the device being visited.
    #[must_use]
    pub const fn tag(&self) -> &str {
        self.tag
    }

    /// `true` while loading; lets devices skip work on save-only paths.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.mode, Mode::Load { .. })
    }

    /// Visits one field.
    pub fn item<T: SaveItem + ?Sized>(&mut self, name: &str, value: &mut T) {
        match &mut self.mode {
            Mode::Register(out) => out.push(FieldDesc {
                tag: self.tag.to_owned(),
                field: name.to_owned(),
                size: value.byte_len(),
            }),
            Mode::Save(out) => {
                let mut data = Vec::with_capacity(value.byte_len());
                value.save(&mut data);
                out.push(StateEntry {
                    tag: self.tag.to_owned(),
                    field: name.to_owned(),
                    data,
                });
            }
            Mode::Load { entries, cursor } => {
                if let Some(entry) = entries.get(**cursor) {
                    if entry.tag == self.tag && entry.field == name {
                        value.load(&entry.data);
                    } else {
                        log::warn!(
                            "{}/{name}: expected at image position {}, found {}/{}",
                            self.tag,
                            **cursor,
                            entry.tag,
                            entry.field
                        );
                    }
                }
                **cursor += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldDesc, SaveItem, StateEntry, StateIo};
    use crate::time::Attotime;

    struct Regs {
        pc: u16,
        acc: [u8; 4],
        halted: bool,
        next: Attotime,
    }

    impl Regs {
        fn state(&mut self, io: &mut StateIo<'_>) {
            io.item("pc", &mut self.pc);
            io.item("acc", &mut self.acc);
            io.item("halted", &mut self.halted);
            io.item("next", &mut self.next);
        }
    }

    #[test]
    fn registration_lists_names_and_sizes() {
        let mut regs = Regs {
            pc: 0,
            acc: [0; 4],
            halted: false,
            next: Attotime::ZERO,
        };
        let mut fields = Vec::new();
        regs.state(&mut StateIo::register(":cpu", &mut fields));
        let sizes: Vec<_> = fields
            .iter()
            .map(|FieldDesc { field, size, .. }| (field.as_str(), *size))
            .collect();
        assert_eq!(sizes, vec![("pc", 2), ("acc", 4), ("halted", 1), ("next", 16)]);
    }

    #[test]
    fn save_then_load_restores_fields() {
        let mut regs = Regs {
            pc: 0x1234,
            acc: [1, 2, 3, 4],
            halted: true,
            next: Attotime::from_usec(7),
        };
        let mut entries: Vec<StateEntry> = Vec::new();
        regs.state(&mut StateIo::save(":cpu", &mut entries));

        let mut other = Regs {
            pc: 0,
            acc: [0; 4],
            halted: false,
            next: Attotime::ZERO,
        };
        let mut cursor = 0;
        other.state(&mut StateIo::load(":cpu", &entries, &mut cursor));
        assert_eq!(cursor, 4);
        assert_eq!(other.pc, 0x1234);
        assert_eq!(other.acc, [1, 2, 3, 4]);
        assert!(other.halted);
        assert_eq!(other.next, Attotime::from_usec(7));
    }

    #[test]
    fn vectors_encode_element_by_element() {
        let values: Vec<u16> = vec![0x0102, 0x0304];
        let mut out = Vec::new();
        values.save(&mut out);
        assert_eq!(out, vec![0x02, 0x01, 0x04, 0x03]);
        assert_eq!(values.byte_len(), 4);
    }
}
