//! Lazy resolution handles for devices, regions and spaces.
//!
//! Finders are declared at construction with a tag relative to the owning
//! device and resolved during `start` through the device context. Required
//! finders that are still unresolved when start completes fail the machine
//! with [`ConfigError::MissingRequired`](crate::fault::ConfigError::MissingRequired).

use std::marker::PhantomData;

use super::DeviceId;
use crate::fault::ResourceKind;
use crate::memory::{RegionId, SpaceId};

/// Typed reference to another device.
#[derive(Debug)]
pub struct DeviceFinder<T> {
    tag: String,
    required: bool,
    target: Option<DeviceId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DeviceFinder<T> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            required: self.required,
            target: self.target,
            _marker: PhantomData,
        }
    }
}

impl<T> DeviceFinder<T> {
    /// Finder that must resolve before start completes.
    #[must_use]
    pub fn required(tag: impl Into<String>) -> Self {
        Self::with_requirement(tag.into(), true)
    }

    /// Finder that may stay unresolved.
    #[must_use]
    pub fn optional(tag: impl Into<String>) -> Self {
        Self::with_requirement(tag.into(), false)
    }

    const fn with_requirement(tag: String, required: bool) -> Self {
        Self {
            tag,
            required,
            target: None,
            _marker: PhantomData,
        }
    }

    /// Tag as given at construction, relative to the owner.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether resolution is mandatory.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Resolved device, if any.
    #[must_use]
    pub const fn id(&self) -> Option<DeviceId> {
        self.target
    }

    /// `true` once resolved.
    #[must_use]
    pub const fn found(&self) -> bool {
        self.target.is_some()
    }

    pub(crate) fn set_target(&mut self, target: Option<DeviceId>) {
        self.target = target;
    }
}

/// Reference to a named memory region.
#[derive(Debug, Clone)]
pub struct RegionFinder {
    tag: String,
    required: bool,
    target: Option<RegionId>,
}

impl RegionFinder {
    /// Finder that must resolve before start completes.
    #[must_use]
    pub fn required(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            required: true,
            target: None,
        }
    }

    /// Finder that may stay unresolved.
    #[must_use]
    pub fn optional(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            required: false,
            target: None,
        }
    }

    /// Tag as given at construction, relative to the owner.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether resolution is mandatory.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Resolved region, if any.
    #[must_use]
    pub const fn id(&self) -> Option<RegionId> {
        self.target
    }

    /// `true` once resolved.
    #[must_use]
    pub const fn found(&self) -> bool {
        self.target.is_some()
    }

    pub(crate) fn set_target(&mut self, target: Option<RegionId>) {
        self.target = target;
    }
}

/// Reference to an address space of another device, by device tag and index.
#[derive(Debug, Clone)]
pub struct SpaceFinder {
    tag: String,
    index: usize,
    required: bool,
    target: Option<SpaceId>,
}

impl SpaceFinder {
    /// Finder that must resolve before start completes.
    #[must_use]
    pub fn required(tag: impl Into<String>, index: usize) -> Self {
        Self {
            tag: tag.into(),
            index,
            required: true,
            target: None,
        }
    }

    /// Finder that may stay unresolved.
    #[must_use]
    pub fn optional(tag: impl Into<String>, index: usize) -> Self {
        Self {
            tag: tag.into(),
            index,
            required: false,
            target: None,
        }
    }

    /// Owner tag as given at construction, relative to the finder's owner.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Space index within the owner.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Whether resolution is mandatory.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Resolved space, if any.
    #[must_use]
    pub const fn id(&self) -> Option<SpaceId> {
        self.target
    }

    /// `true` once resolved.
    #[must_use]
    pub const fn found(&self) -> bool {
        self.target.is_some()
    }

    pub(crate) fn set_target(&mut self, target: Option<SpaceId>) {
        self.target = target;
    }
}

/// A resolution attempt recorded against the device that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Requirement {
    pub(crate) owner: DeviceId,
    pub(crate) kind: ResourceKind,
    pub(crate) resource: String,
    pub(crate) index: usize,
    pub(crate) required: bool,
    pub(crate) found: bool,
}
