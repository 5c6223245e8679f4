//! Fixed-point virtual time and clock conversion helpers.
//!
//! All scheduling decisions are made on [`Attotime`], an unsigned count of
//! attoseconds. Integer arithmetic keeps two runs of the same machine
//! bit-identical regardless of host floating-point behavior.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of attoseconds in one second.
pub const ATTOSECONDS_PER_SECOND: u128 = 1_000_000_000_000_000_000;
/// Number of attoseconds in one millisecond.
pub const ATTOSECONDS_PER_MILLISECOND: u128 = ATTOSECONDS_PER_SECOND / 1_000;
/// Number of attoseconds in one microsecond.
pub const ATTOSECONDS_PER_MICROSECOND: u128 = ATTOSECONDS_PER_SECOND / 1_000_000;
/// Number of attoseconds in one nanosecond.
pub const ATTOSECONDS_PER_NANOSECOND: u128 = ATTOSECONDS_PER_SECOND / 1_000_000_000;

/// Absolute or relative virtual time measured in attoseconds.
///
/// [`Attotime::NEVER`] is a saturating sentinel: adding anything to it yields
/// `NEVER`, and it compares greater than every reachable time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Attotime(u128);

impl Attotime {
    /// Time zero (machine power-on).
    pub const ZERO: Self = Self(0);
    /// Sentinel for "no expiry".
    pub const NEVER: Self = Self(u128::MAX);

    /// Creates a time from a raw attosecond count.
    #[must_use]
    pub const fn from_attoseconds(attoseconds: u128) -> Self {
        Self(attoseconds)
    }

    /// Returns the raw attosecond count.
    #[must_use]
    pub const fn as_attoseconds(self) -> u128 {
        self.0
    }

    /// Creates a time from whole seconds.
    #[must_use]
    pub const fn from_seconds(seconds: u64) -> Self {
        Self(seconds as u128 * ATTOSECONDS_PER_SECOND)
    }

    /// Creates a time from whole milliseconds.
    #[must_use]
    pub const fn from_msec(msec: u64) -> Self {
        Self(msec as u128 * ATTOSECONDS_PER_MILLISECOND)
    }

    /// Creates a time from whole microseconds.
    #[must_use]
    pub const fn from_usec(usec: u64) -> Self {
        Self(usec as u128 * ATTOSECONDS_PER_MICROSECOND)
    }

    /// Creates a time from whole nanoseconds.
    #[must_use]
    pub const fn from_nsec(nsec: u64) -> Self {
        Self(nsec as u128 * ATTOSECONDS_PER_NANOSECOND)
    }

    /// Returns the period of one cycle at `hz`, or [`Attotime::NEVER`] for an
    /// unclocked (0 Hz) source.
    #[must_use]
    pub const fn from_hz(hz: u32) -> Self {
        if hz == 0 {
            Self::NEVER
        } else {
            Self(ATTOSECONDS_PER_SECOND / hz as u128)
        }
    }

    /// Returns `true` for the [`Attotime::NEVER`] sentinel.
    #[must_use]
    pub const fn is_never(self) -> bool {
        self.0 == u128::MAX
    }

    /// Returns `true` when this is time zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whole seconds component.
    #[must_use]
    pub const fn seconds(self) -> u128 {
        self.0 / ATTOSECONDS_PER_SECOND
    }

    /// Sub-second attosecond component.
    #[must_use]
    pub const fn subsecond_attoseconds(self) -> u128 {
        self.0 % ATTOSECONDS_PER_SECOND
    }

    /// Saturating addition; `NEVER` absorbs everything.
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction clamped at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Checked subtraction; `None` when `rhs` is later than `self`.
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Multiplies by an integer factor, saturating at `NEVER`.
    #[must_use]
    pub const fn saturating_mul(self, factor: u64) -> Self {
        Self(self.0.saturating_mul(factor as u128))
    }

    /// Lossy conversion to floating-point seconds, for display only.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        self.seconds() as f64 + self.subsecond_attoseconds() as f64 / ATTOSECONDS_PER_SECOND as f64
    }
}

impl Add for Attotime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Attotime {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Attotime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for Attotime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            return f.write_str("never");
        }
        write!(f, "{}.{:018}", self.seconds(), self.subsecond_attoseconds())
    }
}

/// Computes `value * mul / div` without intermediate overflow for the ranges
/// used by clock conversion (`mul` below 2^64, `div` below 2^64 * 10^18).
#[must_use]
pub const fn mul_div(value: u128, mul: u128, div: u128) -> u128 {
    if div == 0 {
        return u128::MAX;
    }
    let whole = value / div;
    let rem = value % div;
    whole.saturating_mul(mul).saturating_add(rem.saturating_mul(mul) / div)
}

/// Converts a cycle count at `hz` to elapsed virtual time (floor).
#[must_use]
pub const fn clocks_to_time(clocks: u64, hz: u64) -> Attotime {
    if hz == 0 {
        return Attotime::NEVER;
    }
    Attotime(mul_div(clocks as u128, ATTOSECONDS_PER_SECOND, hz as u128))
}

/// Converts elapsed virtual time to the number of whole cycles at `hz`.
#[must_use]
pub const fn time_to_clocks(duration: Attotime, hz: u64) -> u64 {
    if hz == 0 || duration.is_never() {
        return 0;
    }
    let clocks = mul_div(duration.0, hz as u128, ATTOSECONDS_PER_SECOND);
    if clocks > u64::MAX as u128 {
        u64::MAX
    } else {
        clocks as u64
    }
}
