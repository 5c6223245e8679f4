//! Configurable slots: named sockets accepting one card from a set of options.

use crate::device::{Device, DeviceId, DeviceType};

/// Constructor for a slot card or configured device.
pub type DeviceFactory = Box<dyn FnOnce() -> Box<dyn Device>>;

/// One pluggable card type.
pub struct SlotOption {
    name: String,
    clock: u32,
    factory: DeviceFactory,
}

impl SlotOption {
    /// Option name, which also becomes the card's tag under the slot.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Card clock; zero inherits the slot's clock.
    #[must_use]
    pub const fn clock(&self) -> u32 {
        self.clock
    }

    pub(crate) fn into_parts(self) -> (String, u32, DeviceFactory) {
        (self.name, self.clock, self.factory)
    }
}

/// Set of cards a slot accepts.
#[derive(Default)]
pub struct SlotOptions {
    options: Vec<SlotOption>,
}

impl SlotOptions {
    /// Creates an empty option list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option.
    #[must_use]
    pub fn option<F, D>(mut self, name: &str, clock: u32, factory: F) -> Self
    where
        F: FnOnce() -> D + 'static,
        D: Device,
    {
        self.options.push(SlotOption {
            name: name.to_owned(),
            clock,
            factory: Box::new(move || Box::new(factory()) as Box<dyn Device>),
        });
        self
    }

    /// Option names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.options
            .iter()
            .map(|option| option.name.clone())
            .collect()
    }

    pub(crate) fn take(&mut self, name: &str) -> Option<SlotOption> {
        let index = self.options.iter().position(|option| option.name == name)?;
        Some(self.options.swap_remove(index))
    }
}

/// Runtime view of a configured slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub(crate) tag: String,
    pub(crate) device: DeviceId,
    pub(crate) interface: &'static str,
    pub(crate) options: Vec<String>,
    pub(crate) selected: Option<String>,
    pub(crate) card: Option<DeviceId>,
    pub(crate) fixed: bool,
}

impl Slot {
    /// Full tag of the slot.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Slot device in the tree.
    #[must_use]
    pub const fn device(&self) -> DeviceId {
        self.device
    }

    /// Capability interface cards must implement.
    #[must_use]
    pub const fn interface(&self) -> &'static str {
        self.interface
    }

    /// Names of the options the slot accepts.
    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Chosen option, `None` for an empty slot.
    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Instantiated card, `None` for an empty slot.
    #[must_use]
    pub const fn card(&self) -> Option<DeviceId> {
        self.card
    }

    /// Whether the host is barred from changing the occupant.
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        self.fixed
    }
}

/// Tree node standing for a slot; cards are its children.
#[derive(Debug)]
pub struct SlotDevice {
    interface: &'static str,
}

impl SlotDevice {
    /// Creates a slot node for `interface`.
    #[must_use]
    pub const fn new(interface: &'static str) -> Self {
        Self { interface }
    }

    /// Interface cards must implement.
    #[must_use]
    pub const fn interface(&self) -> &'static str {
        self.interface
    }
}

impl Device for SlotDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Slot", "slot")
    }
}
