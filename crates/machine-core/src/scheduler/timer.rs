//! Timer storage and the time-ordered expiry queue.

use std::collections::BTreeMap;

use crate::device::DeviceId;
use crate::fault::TimerError;
use crate::time::Attotime;

/// Stable handle to an allocated timer.
///
/// Handles carry a generation so that a handle outliving its timer is
/// detected instead of silently addressing a recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

/// Recipient of a timer expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerOwner {
    /// Delivered to the device's `timer_expired` hook.
    Device(DeviceId),
    /// Anonymous timer that only forces a scheduling boundary.
    Sync,
}

#[derive(Debug, Clone)]
struct TimerSlot {
    generation: u32,
    live: bool,
    owner: TimerOwner,
    id: u32,
    param: u64,
    start: Attotime,
    expire: Attotime,
    period: Option<Attotime>,
    enabled: bool,
    seq: u64,
}

/// A timer popped from the queue, ready for callback delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    /// Handle of the fired timer.
    pub handle: TimerHandle,
    /// Recipient.
    pub owner: TimerOwner,
    /// Device-local timer id.
    pub id: u32,
    /// Opaque parameter supplied at creation.
    pub param: u64,
    /// Scheduled expiry time.
    pub expire: Attotime,
    seq: u64,
}

/// All timers of a machine plus their expiry order.
///
/// Ordering key is `(expire, seq)`: `seq` increases on every (re)arm, which
/// makes timers with equal expiry fire in the order they were armed.
#[derive(Debug, Default)]
pub struct TimerQueue {
    slots: Vec<TimerSlot>,
    free: Vec<u32>,
    queue: BTreeMap<(Attotime, u64), u32>,
    next_seq: u64,
}

impl TimerQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a disabled timer.
    pub fn allocate(&mut self, owner: TimerOwner, id: u32, param: u64) -> TimerHandle {
        let slot = TimerSlot {
            generation: 0,
            live: true,
            owner,
            id,
            param,
            start: Attotime::ZERO,
            expire: Attotime::NEVER,
            period: None,
            enabled: false,
            seq: 0,
        };
        if let Some(index) = self.free.pop() {
            let entry = &mut self.slots[index as usize];
            let generation = entry.generation;
            *entry = TimerSlot { generation, ..slot };
            TimerHandle { index, generation }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(slot);
            TimerHandle {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, handle: TimerHandle) -> Option<&TimerSlot> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.live && slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: TimerHandle) -> Option<&mut TimerSlot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.live && slot.generation == handle.generation)
    }

    /// Returns `true` while the handle addresses a live timer.
    #[must_use]
    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.slot(handle).is_some()
    }

    /// Arms `handle` to expire `delay` after `now`, optionally repeating.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidPeriod`] for a zero periodic interval and
    /// [`TimerError::StaleHandle`] when the timer was removed.
    pub fn adjust(
        &mut self,
        handle: TimerHandle,
        now: Attotime,
        delay: Attotime,
        period: Option<Attotime>,
    ) -> Result<(), TimerError> {
        if period.is_some_and(Attotime::is_zero) {
            return Err(TimerError::InvalidPeriod);
        }
        let seq = self.next_seq;
        let Some(slot) = self.slot_mut(handle) else {
            return Err(TimerError::StaleHandle);
        };
        let old_key = slot.enabled.then_some((slot.expire, slot.seq));
        slot.start = now;
        slot.expire = now.saturating_add(delay);
        slot.period = period;
        slot.enabled = true;
        slot.seq = seq;
        let key = (slot.expire, seq);
        self.next_seq += 1;
        if let Some(old_key) = old_key {
            self.queue.remove(&old_key);
        }
        self.queue.insert(key, handle.index);
        Ok(())
    }

    /// Enables or disables a timer without touching its expiry.
    ///
    /// Returns the previous enable state, or `None` for a stale handle.
    pub fn enable(&mut self, handle: TimerHandle, enable: bool) -> Option<bool> {
        let seq = self.next_seq;
        let slot = self.slot_mut(handle)?;
        let was = slot.enabled;
        if was == enable {
            return Some(was);
        }
        let old_key = (slot.expire, slot.seq);
        slot.enabled = enable;
        if enable {
            slot.seq = seq;
            let key = (slot.expire, seq);
            self.next_seq += 1;
            self.queue.insert(key, handle.index);
        } else {
            self.queue.remove(&old_key);
        }
        Some(was)
    }

    /// Frees a timer. Removing a stale or already-removed handle is a no-op.
    pub fn remove(&mut self, handle: TimerHandle) {
        let Some(slot) = self.slot_mut(handle) else {
            return;
        };
        let key = slot.enabled.then_some((slot.expire, slot.seq));
        slot.live = false;
        slot.enabled = false;
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(key) = key {
            self.queue.remove(&key);
        }
        self.free.push(handle.index);
    }

    /// Frees every timer owned by `device`.
    pub fn remove_owned_by(&mut self, device: DeviceId) {
        let handles: Vec<_> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.live && slot.owner == TimerOwner::Device(device))
            .map(|(index, slot)| TimerHandle {
                index: u32::try_from(index).unwrap_or(u32::MAX),
                generation: slot.generation,
            })
            .collect();
        for handle in handles {
            self.remove(handle);
        }
    }

    /// Disables every timer while keeping allocations and handles valid.
    pub fn disable_all(&mut self) {
        for slot in &mut self.slots {
            slot.enabled = false;
        }
        self.queue.clear();
    }

    /// Earliest pending expiry, or [`Attotime::NEVER`].
    #[must_use]
    pub fn next_expire(&self) -> Attotime {
        self.queue
            .first_key_value()
            .map_or(Attotime::NEVER, |((expire, _), _)| *expire)
    }

    /// Pops the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Attotime) -> Option<FiredTimer> {
        let (&(expire, seq), &index) = self.queue.first_key_value()?;
        if expire > now {
            return None;
        }
        self.queue.remove(&(expire, seq));
        let slot = &mut self.slots[index as usize];
        slot.enabled = false;
        Some(FiredTimer {
            handle: TimerHandle {
                index,
                generation: slot.generation,
            },
            owner: slot.owner,
            id: slot.id,
            param: slot.param,
            expire,
            seq,
        })
    }

    /// Completes delivery of `fired`.
    ///
    /// If the callback neither re-armed nor removed the timer, a periodic
    /// timer is re-armed one interval after its scheduled expiry and a
    /// one-shot timer stays allocated but disabled.
    pub fn finish_fire(&mut self, fired: &FiredTimer) {
        let seq = self.next_seq;
        let Some(slot) = self.slot_mut(fired.handle) else {
            return;
        };
        if slot.seq != fired.seq || slot.enabled {
            return;
        }
        if let Some(period) = slot.period {
            slot.start = fired.expire;
            slot.expire = fired.expire.saturating_add(period);
            slot.enabled = true;
            slot.seq = seq;
            let key = (slot.expire, seq);
            self.next_seq += 1;
            self.queue.insert(key, fired.handle.index);
        }
    }

    /// Returns `true` when the timer is armed.
    #[must_use]
    pub fn is_enabled(&self, handle: TimerHandle) -> bool {
        self.slot(handle).is_some_and(|slot| slot.enabled)
    }

    /// Scheduled expiry, or [`Attotime::NEVER`] when disabled or stale.
    #[must_use]
    pub fn expire(&self, handle: TimerHandle) -> Attotime {
        self.slot(handle)
            .filter(|slot| slot.enabled)
            .map_or(Attotime::NEVER, |slot| slot.expire)
    }

    /// Time remaining until expiry as seen from `now`.
    #[must_use]
    pub fn remaining(&self, handle: TimerHandle, now: Attotime) -> Attotime {
        let expire = self.expire(handle);
        if expire.is_never() {
            Attotime::NEVER
        } else {
            expire.saturating_sub(now)
        }
    }

    /// Time elapsed since the timer was last armed.
    #[must_use]
    pub fn elapsed(&self, handle: TimerHandle, now: Attotime) -> Attotime {
        self.slot(handle)
            .map_or(Attotime::ZERO, |slot| now.saturating_sub(slot.start))
    }

    /// Current opaque parameter of a timer.
    #[must_use]
    pub fn param(&self, handle: TimerHandle) -> Option<u64> {
        self.slot(handle).map(|slot| slot.param)
    }

    /// Replaces the opaque parameter of a timer.
    pub fn set_param(&mut self, handle: TimerHandle, param: u64) -> Result<(), TimerError> {
        let slot = self.slot_mut(handle).ok_or(TimerError::StaleHandle)?;
        slot.param = param;
        Ok(())
    }

    /// Number of armed timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
