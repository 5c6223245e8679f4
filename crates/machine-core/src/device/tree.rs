//! Device tree storage and hierarchical tag resolution.

use std::any::Any;
use std::collections::HashMap;

use super::{Capabilities, Device, DeviceId, DeviceType, RootDevice};
use crate::fault::ConfigError;
use crate::memory::SpaceId;
use crate::save::StateIo;

/// Full tag of the root device.
pub const ROOT_TAG: &str = ":";

/// Resolves `tag` relative to the device tagged `base`.
///
/// A leading `:` makes the tag absolute, every `^` climbs to the parent and
/// anything else names a descendant. Trailing separators are dropped.
#[must_use]
pub fn subtag(base: &str, tag: &str) -> String {
    let (mut result, mut rest) = if let Some(stripped) = tag.strip_prefix(':') {
        (String::from(ROOT_TAG), stripped)
    } else {
        let mut result = base.to_owned();
        if result != ROOT_TAG {
            result.push(':');
        }
        (result, tag)
    };
    while let Some(pos) = rest.find('^') {
        result.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        while result.len() > 1 && result.ends_with(':') {
            result.pop();
        }
        if result != ROOT_TAG {
            if let Some(last) = result.rfind(':') {
                result.truncate(last + 1);
            }
        }
    }
    result.push_str(rest);
    while result.len() > 1 && result.ends_with(':') {
        result.pop();
    }
    result
}

/// Full tag of the parent of `tag`, or `None` for the root.
#[must_use]
pub fn parent_tag(tag: &str) -> Option<&str> {
    if tag == ROOT_TAG {
        return None;
    }
    match tag.rfind(':') {
        Some(0) => Some(ROOT_TAG),
        Some(pos) => Some(&tag[..pos]),
        None => None,
    }
}

/// Clock configuration of a device.
///
/// The effective clock is the unscaled clock times `scale_num / scale_den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockState {
    configured: u32,
    unscaled: u32,
    clock: u32,
    scale_num: u32,
    scale_den: u32,
}

impl ClockState {
    /// Creates a clock running at `hz` with unit scale.
    #[must_use]
    pub const fn new(hz: u32) -> Self {
        Self {
            configured: hz,
            unscaled: hz,
            clock: hz,
            scale_num: 1,
            scale_den: 1,
        }
    }

    /// Effective clock in Hz.
    #[must_use]
    pub const fn clock(&self) -> u32 {
        self.clock
    }

    /// Clock before scaling.
    #[must_use]
    pub const fn unscaled(&self) -> u32 {
        self.unscaled
    }

    /// Clock given at configuration time.
    #[must_use]
    pub const fn configured(&self) -> u32 {
        self.configured
    }

    /// Current scale as `(numerator, denominator)`.
    #[must_use]
    pub const fn scale(&self) -> (u32, u32) {
        (self.scale_num, self.scale_den)
    }

    /// Replaces the unscaled clock; returns `true` when the effective clock changed.
    pub fn set_unscaled(&mut self, hz: u32) -> bool {
        self.unscaled = hz;
        self.recompute()
    }

    /// Replaces the scale factor; returns `true` when the effective clock changed.
    pub fn set_scale(&mut self, num: u32, den: u32) -> bool {
        self.scale_num = num;
        self.scale_den = den.max(1);
        self.recompute()
    }

    fn recompute(&mut self) -> bool {
        let scaled =
            u64::from(self.unscaled) * u64::from(self.scale_num) / u64::from(self.scale_den);
        let clock = u32::try_from(scaled).unwrap_or(u32::MAX);
        let changed = clock != self.clock;
        self.clock = clock;
        changed
    }

    pub(crate) fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("$clock", &mut self.clock);
        io.item("$unscaled_clock", &mut self.unscaled);
        io.item("$clock_scale_num", &mut self.scale_num);
        io.item("$clock_scale_den", &mut self.scale_den);
    }
}

pub(crate) struct DeviceNode {
    pub(crate) tag: String,
    pub(crate) parent: Option<DeviceId>,
    pub(crate) children: Vec<DeviceId>,
    pub(crate) device_type: DeviceType,
    pub(crate) clock: ClockState,
    pub(crate) device: Option<Box<dyn Device>>,
    pub(crate) capabilities: Capabilities,
    pub(crate) started: bool,
    pub(crate) inputs: Vec<String>,
    pub(crate) spaces: Vec<SpaceId>,
}

/// Owning storage for every device of a machine, in configuration order.
///
/// Devices are taken out of their node while one of their hooks runs, which
/// is how re-entrant dispatch into a busy device is detected.
pub struct DeviceTree {
    nodes: Vec<DeviceNode>,
    by_tag: HashMap<String, DeviceId>,
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTree {
    /// Creates a tree holding only the root device.
    #[must_use]
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            by_tag: HashMap::new(),
        };
        tree.nodes.push(DeviceNode {
            tag: ROOT_TAG.to_owned(),
            parent: None,
            children: Vec::new(),
            device_type: RootDevice.device_type(),
            clock: ClockState::new(0),
            device: Some(Box::new(RootDevice)),
            capabilities: Capabilities::default(),
            started: false,
            inputs: Vec::new(),
            spaces: Vec::new(),
        });
        tree.by_tag.insert(ROOT_TAG.to_owned(), DeviceId::ROOT);
        tree
    }

    /// Inserts a device under its full `tag`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateTag`] for a tag already in use and
    /// [`ConfigError::UnknownTag`] when the parent does not exist yet.
    pub fn insert(
        &mut self,
        tag: &str,
        mut device: Box<dyn Device>,
        clock: u32,
    ) -> Result<DeviceId, ConfigError> {
        if self.by_tag.contains_key(tag) {
            return Err(ConfigError::DuplicateTag {
                tag: tag.to_owned(),
            });
        }
        let parent = parent_tag(tag)
            .and_then(|parent| self.find(parent))
            .ok_or_else(|| ConfigError::UnknownTag {
                tag: parent_tag(tag).unwrap_or(tag).to_owned(),
            })?;
        let id = DeviceId::from_index(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        let capabilities = Capabilities::probe(device.as_mut());
        self.nodes.push(DeviceNode {
            tag: tag.to_owned(),
            parent: Some(parent),
            children: Vec::new(),
            device_type: device.device_type(),
            clock: ClockState::new(clock),
            device: Some(device),
            capabilities,
            started: false,
            inputs: Vec::new(),
            spaces: Vec::new(),
        });
        self.nodes[parent.index()].children.push(id);
        self.by_tag.insert(tag.to_owned(), id);
        Ok(id)
    }

    /// Looks up a device by full tag.
    #[must_use]
    pub fn find(&self, tag: &str) -> Option<DeviceId> {
        self.by_tag.get(tag).copied()
    }

    /// Number of devices including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the root device is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Device ids in configuration order, root first.
    pub fn ids(&self) -> impl DoubleEndedIterator<Item = DeviceId> + '_ {
        (0..self.nodes.len())
            .map(|index| DeviceId::from_index(u32::try_from(index).unwrap_or(u32::MAX)))
    }

    pub(crate) fn node(&self, id: DeviceId) -> &DeviceNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: DeviceId) -> &mut DeviceNode {
        &mut self.nodes[id.index()]
    }

    /// Full tag of a device.
    #[must_use]
    pub fn tag(&self, id: DeviceId) -> &str {
        self.nodes.get(id.index()).map_or("?", |node| node.tag.as_str())
    }

    /// Type descriptor of a device.
    #[must_use]
    pub fn device_type(&self, id: DeviceId) -> DeviceType {
        self.node(id).device_type
    }

    /// Parent of a device, `None` for the root.
    #[must_use]
    pub fn parent(&self, id: DeviceId) -> Option<DeviceId> {
        self.node(id).parent
    }

    /// Direct children of a device in configuration order.
    #[must_use]
    pub fn children(&self, id: DeviceId) -> &[DeviceId] {
        &self.node(id).children
    }

    /// Probed capabilities of a device.
    #[must_use]
    pub fn capabilities(&self, id: DeviceId) -> Capabilities {
        self.node(id).capabilities
    }

    /// Clock state of a device.
    #[must_use]
    pub fn clock(&self, id: DeviceId) -> &ClockState {
        &self.node(id).clock
    }

    /// `true` once the device's `start` hook succeeded.
    #[must_use]
    pub fn is_started(&self, id: DeviceId) -> bool {
        self.node(id).started
    }

    /// `true` while one of the device's hooks is on the call stack.
    #[must_use]
    pub fn is_busy(&self, id: DeviceId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(|node| node.device.is_none())
    }

    /// `true` when the device is of concrete type `T`. Busy devices cannot be
    /// inspected and are reported as matching.
    #[must_use]
    pub fn is_type<T: Device>(&self, id: DeviceId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(|node| match node.device.as_deref() {
                Some(device) => {
                    let any: &dyn Any = device;
                    any.is::<T>()
                }
                None => true,
            })
    }

    /// Borrows a device as its concrete type.
    #[must_use]
    pub fn get<T: Device>(&self, id: DeviceId) -> Option<&T> {
        let device = self.nodes.get(id.index())?.device.as_deref()?;
        let any: &dyn Any = device;
        any.downcast_ref::<T>()
    }

    /// Mutably borrows a device as its concrete type.
    pub fn get_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        let device = self.nodes.get_mut(id.index())?.device.as_deref_mut()?;
        let any: &mut dyn Any = device;
        any.downcast_mut::<T>()
    }

    pub(crate) fn take(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        self.nodes.get_mut(id.index())?.device.take()
    }

    pub(crate) fn restore(&mut self, id: DeviceId, device: Box<dyn Device>) {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            node.device = Some(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parent_tag, subtag, ClockState, DeviceTree, ROOT_TAG};
    use crate::device::{DeviceId, RootDevice};
    use crate::fault::ConfigError;

    #[test]
    fn subtag_resolves_children_siblings_and_absolute_tags() {
        assert_eq!(subtag(":", "cpu"), ":cpu");
        assert_eq!(subtag(":board:cpu", "rom"), ":board:cpu:rom");
        assert_eq!(subtag(":board:cpu", "^rom"), ":board:rom");
        assert_eq!(subtag(":a:b", "^^x"), ":x");
        assert_eq!(subtag(":a:b", ":c"), ":c");
        assert_eq!(subtag(":a:b", ""), ":a:b");
        assert_eq!(subtag(":a", "^"), ROOT_TAG);
    }

    #[test]
    fn parent_of_top_level_device_is_root() {
        assert_eq!(parent_tag(":cpu"), Some(ROOT_TAG));
        assert_eq!(parent_tag(":board:cpu"), Some(":board"));
        assert_eq!(parent_tag(ROOT_TAG), None);
    }

    #[test]
    fn insert_requires_existing_parent_and_unique_tag() {
        let mut tree = DeviceTree::new();
        let board = tree.insert(":board", Box::new(RootDevice), 0).expect("board");
        let cpu = tree
            .insert(":board:cpu", Box::new(RootDevice), 1_000)
            .expect("cpu");
        assert_eq!(tree.parent(cpu), Some(board));
        assert_eq!(tree.children(board), &[cpu]);
        assert_eq!(tree.clock(cpu).clock(), 1_000);
        assert!(matches!(
            tree.insert(":board", Box::new(RootDevice), 0),
            Err(ConfigError::DuplicateTag { .. })
        ));
        assert!(matches!(
            tree.insert(":nowhere:cpu", Box::new(RootDevice), 0),
            Err(ConfigError::UnknownTag { tag }) if tag == ":nowhere"
        ));
    }

    #[test]
    fn taken_device_is_busy_until_restored() {
        let mut tree = DeviceTree::new();
        let id = tree.insert(":dev", Box::new(RootDevice), 0).expect("dev");
        let device = tree.take(id).expect("present");
        assert!(tree.is_busy(id));
        assert!(tree.get::<RootDevice>(id).is_none());
        tree.restore(id, device);
        assert!(!tree.is_busy(id));
        assert!(tree.get::<RootDevice>(id).is_some());
        assert!(!tree.is_busy(DeviceId::from_index(99)));
    }

    #[test]
    fn clock_scale_changes_effective_clock() {
        let mut clock = ClockState::new(1_000_000);
        assert!(clock.set_scale(1, 4));
        assert_eq!(clock.clock(), 250_000);
        assert!(!clock.set_scale(2, 8));
        assert!(clock.set_unscaled(2_000_000));
        assert_eq!(clock.clock(), 500_000);
        assert_eq!(clock.configured(), 1_000_000);
    }
}
