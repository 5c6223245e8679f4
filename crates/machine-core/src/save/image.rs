//! Self-describing binary save image.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic     8 bytes  "MCSTATE\0"
//! version   u16
//! signature u64      FNV-1a over (tag, field, size) of every entry, in order
//! count     u32
//! entries   count * (tag: u16 len + bytes, field: u16 len + bytes,
//!                    data: u32 len + bytes)
//! ```

use std::collections::HashMap;

use super::FieldDesc;
use crate::fault::{FieldMismatch, RestoreError};

/// Leading bytes of every image.
pub const SAVE_MAGIC: [u8; 8] = *b"MCSTATE\0";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// Save image format revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SaveVersion {
    /// Initial format.
    #[default]
    V1 = 1,
}

impl SaveVersion {
    /// Latest revision; the one this build writes.
    pub const CURRENT: Self = Self::V1;

    /// Converts a wire value to a known revision.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// One saved field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StateEntry {
    /// Owning device tag.
    pub tag: String,
    /// Field name.
    pub field: String,
    /// Encoded contents.
    pub data: Vec<u8>,
}

/// A complete machine snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SaveState {
    /// Format revision.
    pub version: SaveVersion,
    /// Layout signature of the machine that wrote the image.
    pub signature: u64,
    /// Saved fields in registration order.
    pub entries: Vec<StateEntry>,
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(FNV_PRIME);
    }
}

fn hash_field(hash: &mut u64, tag: &str, field: &str, size: usize) {
    hash_bytes(hash, tag.as_bytes());
    hash_bytes(hash, &[0]);
    hash_bytes(hash, field.as_bytes());
    hash_bytes(hash, &[0]);
    hash_bytes(hash, &(size as u64).to_le_bytes());
}

/// Layout signature of a registration list.
#[must_use]
pub fn signature(fields: &[FieldDesc]) -> u64 {
    let mut hash = FNV_OFFSET;
    for field in fields {
        hash_field(&mut hash, &field.tag, &field.field, field.size);
    }
    hash
}

/// Compares a registration list with image entries; returns every difference.
#[must_use]
pub fn diff(registered: &[FieldDesc], entries: &[StateEntry]) -> Vec<FieldMismatch> {
    let found: HashMap<(&str, &str), usize> = entries
        .iter()
        .map(|entry| ((entry.tag.as_str(), entry.field.as_str()), entry.data.len()))
        .collect();
    let expected: HashMap<(&str, &str), usize> = registered
        .iter()
        .map(|desc| ((desc.tag.as_str(), desc.field.as_str()), desc.size))
        .collect();
    let mut mismatches = Vec::new();
    for desc in registered {
        match found.get(&(desc.tag.as_str(), desc.field.as_str())) {
            None => mismatches.push(FieldMismatch::Missing {
                tag: desc.tag.clone(),
                field: desc.field.clone(),
            }),
            Some(&size) if size != desc.size => mismatches.push(FieldMismatch::SizeMismatch {
                tag: desc.tag.clone(),
                field: desc.field.clone(),
                expected: desc.size,
                found: size,
            }),
            Some(_) => {}
        }
    }
    for entry in entries {
        if !expected.contains_key(&(entry.tag.as_str(), entry.field.as_str())) {
            mismatches.push(FieldMismatch::Unexpected {
                tag: entry.tag.clone(),
                field: entry.field.clone(),
            });
        }
    }
    mismatches
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], RestoreError> {
        if self.bytes.len() < len {
            return Err(RestoreError::Truncated);
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], RestoreError> {
        self.take(N)?
            .try_into()
            .map_err(|_| RestoreError::Truncated)
    }

    fn string(&mut self) -> Result<String, RestoreError> {
        let len = u16::from_le_bytes(self.array()?);
        let bytes = self.take(usize::from(len))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| RestoreError::InvalidHeader)
    }
}

impl SaveState {
    /// Layout signature computed from the entries themselves.
    #[must_use]
    pub fn layout_signature(&self) -> u64 {
        let mut hash = FNV_OFFSET;
        for entry in &self.entries {
            hash_field(&mut hash, &entry.tag, &entry.field, entry.data.len());
        }
        hash
    }

    /// Total payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.entries.iter().map(|entry| entry.data.len()).sum()
    }

    /// Looks up one saved field.
    #[must_use]
    pub fn field(&self, tag: &str, field: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|entry| entry.tag == tag && entry.field == field)
            .map(|entry| entry.data.as_slice())
    }

    /// Encodes the image.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(22 + self.payload_len() + self.entries.len() * 24);
        out.extend_from_slice(&SAVE_MAGIC);
        out.extend_from_slice(&self.version.as_u16().to_le_bytes());
        out.extend_from_slice(&self.signature.to_le_bytes());
        let count = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&count.to_le_bytes());
        for entry in &self.entries {
            for text in [&entry.tag, &entry.field] {
                let len = u16::try_from(text.len()).unwrap_or(u16::MAX);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&text.as_bytes()[..usize::from(len)]);
            }
            let len = u32::try_from(entry.data.len()).unwrap_or(u32::MAX);
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&entry.data);
        }
        out
    }

    /// Decodes an image.
    ///
    /// # Errors
    ///
    /// [`RestoreError::InvalidHeader`] for a bad magic or malformed text,
    /// [`RestoreError::UnsupportedVersion`] for an unknown revision and
    /// [`RestoreError::Truncated`] when the image ends early or has trailing
    /// bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RestoreError> {
        let mut reader = Reader { bytes };
        if reader.array::<8>().map_err(|_| RestoreError::InvalidHeader)? != SAVE_MAGIC {
            return Err(RestoreError::InvalidHeader);
        }
        let raw_version = u16::from_le_bytes(reader.array()?);
        let version =
            SaveVersion::from_u16(raw_version).ok_or(RestoreError::UnsupportedVersion {
                found: raw_version,
                expected: SaveVersion::CURRENT.as_u16(),
            })?;
        let signature = u64::from_le_bytes(reader.array()?);
        let count = u32::from_le_bytes(reader.array()?);
        let mut entries = Vec::new();
        for _ in 0..count {
            let tag = reader.string()?;
            let field = reader.string()?;
            let len = u32::from_le_bytes(reader.array()?);
            let data = reader
                .take(usize::try_from(len).map_err(|_| RestoreError::Truncated)?)?
                .to_vec();
            entries.push(StateEntry { tag, field, data });
        }
        if !reader.bytes.is_empty() {
            return Err(RestoreError::Truncated);
        }
        Ok(Self {
            version,
            signature,
            entries,
        })
    }
}
