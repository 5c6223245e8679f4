//! Machine diagnostics counters.

use crate::fault::{DeviceFault, FaultReason};
use crate::time::Attotime;

/// Saturating counters describing what a machine has done so far.
///
/// Counters never influence emulation; they exist for hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiagCounters {
    /// Reads that hit an unmapped handler.
    pub unmapped_reads: u64,
    /// Writes that hit an unmapped handler.
    pub unmapped_writes: u64,
    /// Accesses split into more than one bus word.
    pub split_accesses: u64,
    /// Timer callbacks delivered.
    pub timers_fired: u64,
    /// Scheduler slices completed.
    pub slices: u64,
    /// Slices cut short by a yield request.
    pub aborted_slices: u64,
    /// Line changes propagated.
    pub line_changes: u64,
    /// Notifications queued because the target was busy.
    pub deferred_deliveries: u64,
    /// Device faults latched.
    pub faults: u64,
    /// Most recent latched fault and when it happened.
    pub last_fault: Option<(Attotime, String)>,
}

impl DiagCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an unmapped access.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_unmapped(&mut self, write: bool) {
        if write {
            self.unmapped_writes = self.unmapped_writes.saturating_add(1);
        } else {
            self.unmapped_reads = self.unmapped_reads.saturating_add(1);
        }
    }

    /// Records an access that spanned several bus words.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_split(&mut self) {
        self.split_accesses = self.split_accesses.saturating_add(1);
    }

    /// Records a delivered timer callback.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_timer(&mut self) {
        self.timers_fired = self.timers_fired.saturating_add(1);
    }

    /// Records a finished slice.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_slice(&mut self, aborted: bool) {
        self.slices = self.slices.saturating_add(1);
        if aborted {
            self.aborted_slices = self.aborted_slices.saturating_add(1);
        }
    }

    /// Records a propagated line change.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_line_change(&mut self) {
        self.line_changes = self.line_changes.saturating_add(1);
    }

    /// Records a queued notification.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_deferred(&mut self) {
        self.deferred_deliveries = self.deferred_deliveries.saturating_add(1);
    }

    /// Records a latched fault.
    pub fn record_fault(&mut self, at: Attotime, fault: &DeviceFault) {
        self.faults = self.faults.saturating_add(1);
        let reason = match &fault.reason {
            FaultReason::NoProgress { .. } => "no-progress",
            FaultReason::Overrun { .. } => "overrun",
            FaultReason::Reentrant => "reentrant",
            FaultReason::StaleTimer => "stale-timer",
            FaultReason::NotLineDriver { .. } => "not-line-driver",
        };
        self.last_fault = Some((at, format!("{}: {reason}", fault.tag)));
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::DiagCounters;
    use crate::fault::{DeviceFault, FaultReason};
    use crate::time::Attotime;

    #[test]
    fn counters_start_at_zero() {
        let counters = DiagCounters::new();
        assert_eq!(counters.unmapped_reads, 0);
        assert_eq!(counters.last_fault, None);
    }

    #[test]
    fn unmapped_accesses_are_split_by_direction() {
        let mut counters = DiagCounters::new();
        counters.record_unmapped(false);
        counters.record_unmapped(true);
        counters.record_unmapped(true);
        assert_eq!(counters.unmapped_reads, 1);
        assert_eq!(counters.unmapped_writes, 2);
    }

    #[test]
    fn counters_saturate() {
        let mut counters = DiagCounters {
            timers_fired: u64::MAX,
            ..DiagCounters::default()
        };
        counters.record_timer();
        assert_eq!(counters.timers_fired, u64::MAX);
    }

    #[test]
    fn fault_records_tag_and_reason() {
        let mut counters = DiagCounters::new();
        counters.record_fault(
            Attotime::from_usec(3),
            &DeviceFault {
                tag: ":cpu".to_owned(),
                reason: FaultReason::Reentrant,
            },
        );
        assert_eq!(counters.faults, 1);
        assert_eq!(
            counters.last_fault,
            Some((Attotime::from_usec(3), ":cpu: reentrant".to_owned()))
        );
        counters.reset();
        assert_eq!(counters, DiagCounters::default());
    }

    #[test]
    fn aborted_slices_are_counted_separately() {
        let mut counters = DiagCounters::new();
        counters.record_slice(false);
        counters.record_slice(true);
        assert_eq!(counters.slices, 2);
        assert_eq!(counters.aborted_slices, 1);
    }
}
