//! Signal lines between devices.
//!
//! Every line has exactly one driver (the device that declared it) and any
//! number of listeners. Each listener input accepts at most one line; fan-in
//! goes through a combining device such as
//! [`InputMerger`](crate::devices::InputMerger). A line may also forward its
//! level to another line, which then notifies its own listeners.

use std::collections::{HashMap, HashSet};

use crate::device::DeviceId;

/// Level on a signal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LineState(u32);

impl LineState {
    /// De-asserted.
    pub const CLEAR: Self = Self(0);
    /// Asserted.
    pub const ASSERT: Self = Self(1);

    /// Arbitrary level for multi-valued lines.
    #[must_use]
    pub const fn level(value: u32) -> Self {
        Self(value)
    }

    /// Raw level.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// `true` for any non-zero level.
    #[must_use]
    pub const fn is_asserted(self) -> bool {
        self.0 != 0
    }

    /// Logical inversion; multi-valued levels collapse to clear.
    #[must_use]
    pub const fn inverted(self) -> Self {
        if self.is_asserted() {
            Self::CLEAR
        } else {
            Self::ASSERT
        }
    }
}

impl From<bool> for LineState {
    fn from(asserted: bool) -> Self {
        if asserted {
            Self::ASSERT
        } else {
            Self::CLEAR
        }
    }
}

/// Machine-wide line id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineId(u32);

impl LineId {
    /// Raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One listener connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Listener {
    /// Listening device.
    pub device: DeviceId,
    /// Declared input index on that device.
    pub input: u32,
    /// Whether the level is inverted on the way in.
    pub invert: bool,
}

impl Listener {
    /// Level seen by this listener for a line at `state`.
    #[must_use]
    pub const fn observe(&self, state: LineState) -> LineState {
        if self.invert {
            state.inverted()
        } else {
            state
        }
    }
}

#[derive(Debug, Clone)]
struct Line {
    owner: DeviceId,
    name: String,
    state: LineState,
    listeners: Vec<Listener>,
    chained: Vec<(LineId, bool)>,
    chained_from: Option<LineId>,
}

/// Registry of all lines of a machine.
#[derive(Debug, Clone, Default)]
pub struct Lines {
    lines: Vec<Line>,
    by_owner: HashMap<(DeviceId, String), LineId>,
    driven: HashSet<(DeviceId, u32)>,
}

impl Lines {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares output line `name` of `owner`, initially clear.
    pub fn declare(&mut self, owner: DeviceId, name: &str) -> LineId {
        if let Some(id) = self.find(owner, name) {
            return id;
        }
        let id = LineId(u32::try_from(self.lines.len()).unwrap_or(u32::MAX));
        self.lines.push(Line {
            owner,
            name: name.to_owned(),
            state: LineState::CLEAR,
            listeners: Vec::new(),
            chained: Vec::new(),
            chained_from: None,
        });
        self.by_owner.insert((owner, name.to_owned()), id);
        id
    }

    /// Looks up an output line by owner and name.
    #[must_use]
    pub fn find(&self, owner: DeviceId, name: &str) -> Option<LineId> {
        self.by_owner.get(&(owner, name.to_owned())).copied()
    }

    /// Connects `line` to input `input` of `device`.
    ///
    /// Returns `false` if that input already has a driver.
    pub fn connect(&mut self, line: LineId, listener: Listener) -> bool {
        if !self.driven.insert((listener.device, listener.input)) {
            return false;
        }
        if let Some(line) = self.lines.get_mut(line.index()) {
            line.listeners.push(listener);
        }
        true
    }

    /// Forwards every level change of `source` to `target`, optionally inverted.
    ///
    /// Returns `false` when `target` already forwards from another line or
    /// the link would close a loop.
    pub fn chain(&mut self, source: LineId, target: LineId, invert: bool) -> bool {
        if source == target || self.reaches(target, source) {
            return false;
        }
        match self.lines.get(target.index()) {
            Some(line) if line.chained_from.is_none() => {}
            _ => return false,
        }
        let Some(line) = self.lines.get_mut(source.index()) else {
            return false;
        };
        line.chained.push((target, invert));
        if let Some(line) = self.lines.get_mut(target.index()) {
            line.chained_from = Some(source);
        }
        true
    }

    fn reaches(&self, from: LineId, to: LineId) -> bool {
        let mut pending = vec![from];
        while let Some(line) = pending.pop() {
            if line == to {
                return true;
            }
            if let Some(line) = self.lines.get(line.index()) {
                pending.extend(line.chained.iter().map(|(next, _)| *next));
            }
        }
        false
    }

    /// Lines `line` forwards to, with their inversion flag.
    #[must_use]
    pub fn chained(&self, line: LineId) -> &[(LineId, bool)] {
        self.lines
            .get(line.index())
            .map_or(&[][..], |line| line.chained.as_slice())
    }

    /// `true` when the input already has a driver.
    #[must_use]
    pub fn is_driven(&self, device: DeviceId, input: u32) -> bool {
        self.driven.contains(&(device, input))
    }

    /// Driver of `line`.
    #[must_use]
    pub fn owner(&self, line: LineId) -> Option<DeviceId> {
        self.lines.get(line.index()).map(|line| line.owner)
    }

    /// Name of `line`.
    #[must_use]
    pub fn name(&self, line: LineId) -> &str {
        self.lines.get(line.index()).map_or("?", |line| &line.name)
    }

    /// Current level of `line`.
    #[must_use]
    pub fn state(&self, line: LineId) -> LineState {
        self.lines
            .get(line.index())
            .map_or(LineState::CLEAR, |line| line.state)
    }

    /// Level seen by input `input` of `device`; clear when nothing drives it.
    #[must_use]
    pub fn input_state(&self, device: DeviceId, input: u32) -> LineState {
        self.lines
            .iter()
            .find_map(|line| {
                line.listeners
                    .iter()
                    .find(|listener| listener.device == device && listener.input == input)
                    .map(|listener| listener.observe(line.state))
            })
            .unwrap_or(LineState::CLEAR)
    }

    /// Connected listeners of `line`, in connection order.
    #[must_use]
    pub fn listeners(&self, line: LineId) -> &[Listener] {
        self.lines
            .get(line.index())
            .map_or(&[][..], |line| line.listeners.as_slice())
    }

    /// Stores a new level; returns the listeners to notify.
    pub fn set(&mut self, line: LineId, state: LineState) -> Vec<Listener> {
        match self.lines.get_mut(line.index()) {
            Some(line) => {
                line.state = state;
                line.listeners.clone()
            }
            None => Vec::new(),
        }
    }

    /// Lines driven by `owner`, in declaration order.
    pub fn owned_by(&self, owner: DeviceId) -> impl Iterator<Item = LineId> + '_ {
        self.lines
            .iter()
            .enumerate()
            .filter(move |(_, line)| line.owner == owner)
            .map(|(index, _)| LineId(u32::try_from(index).unwrap_or(u32::MAX)))
    }

    pub(crate) fn state_mut(&mut self, line: LineId) -> Option<&mut LineState> {
        self.lines.get_mut(line.index()).map(|line| &mut line.state)
    }
}
