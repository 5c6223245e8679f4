//! Periodic pulse generator.

use crate::device::{Declarations, Device, DeviceContext, DeviceError, DeviceType};
use crate::fault::TimerError;
use crate::line::{LineId, LineState};
use crate::save::StateIo;
use crate::scheduler::{TimerHandle, TimerId};
use crate::time::Attotime;

const PULSE: TimerId = 0;

/// Pulses its `output` line (assert, then clear) once per period, starting
/// one period after reset.
#[derive(Debug)]
pub struct TimerDevice {
    period: Attotime,
    timer: Option<TimerHandle>,
    output: Option<LineId>,
    pulses: u64,
    next_fire: Attotime,
}

impl TimerDevice {
    /// Creates a generator with the given period.
    #[must_use]
    pub const fn new(period: Attotime) -> Self {
        Self {
            period,
            timer: None,
            output: None,
            pulses: 0,
            next_fire: Attotime::NEVER,
        }
    }

    /// Creates a generator firing once every `cycles` cycles of a `hz` clock.
    #[must_use]
    pub const fn from_cycles(hz: u32, cycles: u64) -> Self {
        Self::new(Attotime::from_hz(hz).saturating_mul(cycles))
    }

    /// Configured period.
    #[must_use]
    pub const fn period(&self) -> Attotime {
        self.period
    }

    /// Pulses emitted since reset.
    #[must_use]
    pub const fn pulses(&self) -> u64 {
        self.pulses
    }

    fn arm(&self, ctx: &mut DeviceContext<'_>, delay: Attotime) {
        if let Some(timer) = self.timer {
            // the period was validated in start
            let _ = ctx.adjust_timer(timer, delay, Some(self.period));
        }
    }
}

impl Device for TimerDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Periodic Timer", "timer")
    }

    fn declare(&self, decl: &mut Declarations) {
        decl.output_line("output");
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        if self.period.is_zero() || self.period.is_never() {
            return Err(TimerError::InvalidPeriod.into());
        }
        self.output = ctx.line("output");
        self.timer = Some(ctx.timer(PULSE, 0));
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        self.pulses = 0;
        if let Some(line) = self.output {
            ctx.set_line(line, LineState::CLEAR);
        }
        self.arm(ctx, self.period);
    }

    fn stop(&mut self, ctx: &mut DeviceContext<'_>) {
        if let Some(timer) = self.timer.take() {
            ctx.remove_timer(timer);
        }
    }

    fn pre_save(&mut self, ctx: &mut DeviceContext<'_>) {
        self.next_fire = self
            .timer
            .map_or(Attotime::NEVER, |timer| ctx.timer_expire(timer));
    }

    fn post_load(&mut self, ctx: &mut DeviceContext<'_>) {
        if !self.next_fire.is_never() {
            let delay = self.next_fire.saturating_sub(ctx.time());
            self.arm(ctx, delay);
        }
    }

    fn timer_expired(&mut self, ctx: &mut DeviceContext<'_>, id: TimerId, _param: u64) {
        if id != PULSE {
            return;
        }
        self.pulses += 1;
        if let Some(line) = self.output {
            ctx.set_line(line, LineState::ASSERT);
            ctx.set_line(line, LineState::CLEAR);
        }
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("pulses", &mut self.pulses);
        io.item("next_fire", &mut self.next_fire);
    }
}
