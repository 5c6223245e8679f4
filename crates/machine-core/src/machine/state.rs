/// Lifecycle phase of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Phase {
    /// Devices are instantiated and wired but not started.
    #[default]
    Configured,
    /// Every device started; the machine can run, save and restore.
    Started,
    /// Devices were stopped; no further progress is possible.
    Stopped,
}

impl Phase {
    /// Lowercase phase name used in errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }

    /// `true` while the machine may execute.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Started)
    }
}
