//! Execution capability and per-executor cycle accounting.
//!
//! An executor's local time is always derived from an integer base time plus
//! a cycle count since that base:
//!
//! `local = base + cycles_since_base * 10^18 / cycles_per_second`
//!
//! so repeated slices never accumulate rounding drift. The base is moved only
//! when the effective clock changes or the executor resumes from suspension.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::device::{DeviceContext, DeviceId};
use crate::save::StateIo;
use crate::time::{clocks_to_time, time_to_clocks, Attotime, ATTOSECONDS_PER_SECOND};

/// Capability of devices that consume scheduler time in cycle quanta.
pub trait Executor {
    /// Runs for up to `cycles` cycles and returns the number consumed.
    ///
    /// Returning fewer cycles is allowed only after a yield request
    /// ([`DeviceContext::abort_timeslice`]) or a self-suspension; returning
    /// more is allowed by at most [`Executor::max_step_cycles`].
    fn execute(&mut self, ctx: &mut DeviceContext<'_>, cycles: u64) -> u64;

    /// Clock multiplier applied to the device clock.
    fn clock_multiplier(&self) -> u32 {
        1
    }

    /// Clock divider applied to the device clock.
    fn clock_divider(&self) -> u32 {
        1
    }

    /// Longest indivisible step, in cycles, the executor may run past its budget.
    fn max_step_cycles(&self) -> u64 {
        0
    }
}

/// Set of reasons an executor is suspended. Empty means runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SuspendReason(u32);

impl SuspendReason {
    /// Not suspended.
    pub const NONE: Self = Self(0);
    /// Halted by a HALT line or instruction.
    pub const HALT: Self = Self(1 << 0);
    /// Held in reset.
    pub const RESET: Self = Self(1 << 1);
    /// Waiting for a spin-until condition.
    pub const SPIN: Self = Self(1 << 2);
    /// Waiting for an external trigger.
    pub const TRIGGER: Self = Self(1 << 3);
    /// Disabled by configuration.
    pub const DISABLE: Self = Self(1 << 4);
    /// Effective clock is zero.
    pub const CLOCK: Self = Self(1 << 5);
    /// Held by the host.
    pub const HOST: Self = Self(1 << 6);

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds a set from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// `true` when no reason is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` when every reason in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set difference.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for SuspendReason {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SuspendReason {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(SuspendReason, &str); 7] = [
            (SuspendReason::HALT, "halt"),
            (SuspendReason::RESET, "reset"),
            (SuspendReason::SPIN, "spin"),
            (SuspendReason::TRIGGER, "trigger"),
            (SuspendReason::DISABLE, "disable"),
            (SuspendReason::CLOCK, "clock"),
            (SuspendReason::HOST, "host"),
        ];
        if self.is_empty() {
            return f.write_str("running");
        }
        let names: Vec<_> = NAMES
            .iter()
            .filter(|(reason, _)| self.contains(*reason))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Scheduling state of one executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSlot {
    device: DeviceId,
    multiplier: u32,
    divider: u32,
    max_step_cycles: u64,
    cycles_per_second: u64,
    base: Attotime,
    cycles_since_base: u64,
    total_cycles: u64,
    suspend: SuspendReason,
    next_suspend: SuspendReason,
}

impl ExecSlot {
    /// Creates a slot for `device` running at `clock` Hz, based at `now`.
    #[must_use]
    pub fn new(
        device: DeviceId,
        clock: u32,
        multiplier: u32,
        divider: u32,
        max_step_cycles: u64,
        now: Attotime,
    ) -> Self {
        let mut slot = Self {
            device,
            multiplier: multiplier.max(1),
            divider: divider.max(1),
            max_step_cycles,
            cycles_per_second: 0,
            base: now,
            cycles_since_base: 0,
            total_cycles: 0,
            suspend: SuspendReason::NONE,
            next_suspend: SuspendReason::NONE,
        };
        slot.set_clock(clock, now);
        slot.suspend = slot.next_suspend;
        slot
    }

    /// Owning device.
    #[must_use]
    pub const fn device(&self) -> DeviceId {
        self.device
    }

    /// Effective cycles per second after multiplier and divider.
    #[must_use]
    pub const fn cycles_per_second(&self) -> u64 {
        self.cycles_per_second
    }

    /// Duration of one cycle, rounded up; [`Attotime::NEVER`] when unclocked.
    #[must_use]
    pub const fn cycle_period(&self) -> Attotime {
        if self.cycles_per_second == 0 {
            return Attotime::NEVER;
        }
        let cps = self.cycles_per_second as u128;
        Attotime::from_attoseconds(ATTOSECONDS_PER_SECOND.div_ceil(cps))
    }

    /// Allowed overrun past a budget.
    #[must_use]
    pub const fn max_step_cycles(&self) -> u64 {
        self.max_step_cycles
    }

    /// Cycles executed since start.
    #[must_use]
    pub const fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Active suspension reasons.
    #[must_use]
    pub const fn suspend_reason(&self) -> SuspendReason {
        self.suspend
    }

    /// `true` when the executor is not runnable this slice.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        !self.suspend.is_empty()
    }

    /// Executor-local virtual time. A suspended executor tracks `now`.
    #[must_use]
    pub fn local_time(&self, now: Attotime) -> Attotime {
        if self.is_suspended() || self.cycles_per_second == 0 {
            return now.max(self.base);
        }
        self.base + clocks_to_time(self.cycles_since_base, self.cycles_per_second)
    }

    /// Local time `cycles` past the current position.
    #[must_use]
    pub fn local_time_after(&self, cycles: u64, now: Attotime) -> Attotime {
        if self.is_suspended() || self.cycles_per_second == 0 {
            return now.max(self.base);
        }
        let total = self.cycles_since_base.saturating_add(cycles);
        self.base + clocks_to_time(total, self.cycles_per_second)
    }

    /// Whole cycles left before local time reaches `target`.
    #[must_use]
    pub fn cycles_until(&self, target: Attotime) -> u64 {
        if self.is_suspended() || target <= self.base {
            return 0;
        }
        time_to_clocks(target - self.base, self.cycles_per_second)
            .saturating_sub(self.cycles_since_base)
    }

    /// Accounts for `cycles` consumed.
    pub fn advance(&mut self, cycles: u64) {
        self.cycles_since_base = self.cycles_since_base.saturating_add(cycles);
        self.total_cycles = self.total_cycles.saturating_add(cycles);
    }

    /// Rebases at the current local time and switches to a new device clock.
    pub fn set_clock(&mut self, clock: u32, now: Attotime) {
        let local = self.local_time(now);
        let cps = u64::from(clock) * u64::from(self.multiplier) / u64::from(self.divider);
        self.base = local;
        self.cycles_since_base = 0;
        self.cycles_per_second = cps;
        if cps == 0 {
            self.next_suspend |= SuspendReason::CLOCK;
        } else {
            self.next_suspend = self.next_suspend.without(SuspendReason::CLOCK);
        }
    }

    /// Requests additional suspension reasons, applied at the next slice start.
    pub fn request_suspend(&mut self, reason: SuspendReason) {
        self.next_suspend |= reason;
    }

    /// Clears suspension reasons, applied at the next slice start.
    pub fn request_resume(&mut self, reason: SuspendReason) {
        self.next_suspend = self.next_suspend.without(reason);
    }

    /// Suspension state that will be applied at the next slice start.
    #[must_use]
    pub const fn pending_suspend(&self) -> SuspendReason {
        self.next_suspend
    }

    /// Applies pending suspension changes. A resuming executor rebases at
    /// `now` so it never executes time that passed while it slept.
    pub fn apply_pending(&mut self, now: Attotime) -> bool {
        if self.suspend == self.next_suspend {
            return false;
        }
        let was_suspended = self.is_suspended();
        if !was_suspended {
            self.base = self.local_time(now);
            self.cycles_since_base = 0;
        }
        self.suspend = self.next_suspend;
        if was_suspended && !self.is_suspended() {
            self.base = now;
            self.cycles_since_base = 0;
        }
        true
    }

    /// Rebases at `now`, dropping any accumulated lead.
    pub fn rebase(&mut self, now: Attotime) {
        self.base = now;
        self.cycles_since_base = 0;
    }

    pub(crate) fn state(&mut self, io: &mut StateIo<'_>) {
        let mut suspend = self.suspend.bits();
        let mut next_suspend = self.next_suspend.bits();
        io.item("$exec_base", &mut self.base);
        io.item("$exec_cycles", &mut self.cycles_since_base);
        io.item("$exec_total_cycles", &mut self.total_cycles);
        io.item("$exec_cycles_per_second", &mut self.cycles_per_second);
        io.item("$exec_suspend", &mut suspend);
        io.item("$exec_next_suspend", &mut next_suspend);
        self.suspend = SuspendReason::from_bits(suspend);
        self.next_suspend = SuspendReason::from_bits(next_suspend);
    }
}
