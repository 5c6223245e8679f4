//! Combines up to 32 input lines into one output line.
//!
//! Inputs are `in0`, `in1`, ... and the output line is `output`. The output
//! is driven only when the combined level changes.

use crate::device::{Declarations, Device, DeviceContext, DeviceError, DeviceType, LineInput};
use crate::line::{LineId, LineState};
use crate::save::StateIo;

/// Largest supported number of inputs.
pub const MAX_INPUTS: usize = 32;

/// How input levels combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MergeMode {
    /// Output asserted while any input is asserted. Inputs start clear.
    AnyHigh,
    /// Output asserted while every input is asserted. Inputs start asserted.
    AllHigh,
    /// Output asserted while any input is clear. Inputs start asserted.
    AnyLow,
}

impl MergeMode {
    const fn initial(self, all: u32) -> u32 {
        match self {
            Self::AnyHigh => 0,
            Self::AllHigh | Self::AnyLow => all,
        }
    }

    const fn combine(self, state: u32, all: u32) -> bool {
        match self {
            Self::AnyHigh => state != 0,
            Self::AllHigh => state == all,
            Self::AnyLow => state != all,
        }
    }
}

/// Fan-in device.
#[derive(Debug)]
pub struct InputMerger {
    mode: MergeMode,
    inputs: usize,
    state: u32,
    output: Option<LineId>,
}

impl InputMerger {
    /// Creates a merger with `inputs` inputs, clamped to `1..=32`.
    #[must_use]
    pub fn new(mode: MergeMode, inputs: usize) -> Self {
        let inputs = inputs.clamp(1, MAX_INPUTS);
        let mut merger = Self {
            mode,
            inputs,
            state: 0,
            output: None,
        };
        merger.state = mode.initial(merger.all());
        merger
    }

    fn all(&self) -> u32 {
        if self.inputs >= MAX_INPUTS {
            u32::MAX
        } else {
            (1 << self.inputs) - 1
        }
    }

    /// Combining rule.
    #[must_use]
    pub const fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Current input levels, one bit per input.
    #[must_use]
    pub const fn inputs(&self) -> u32 {
        self.state
    }

    /// Combined level.
    #[must_use]
    pub fn output(&self) -> bool {
        self.mode.combine(self.state, self.all())
    }
}

impl Device for InputMerger {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Input Merger", "input_merger")
    }

    fn declare(&self, decl: &mut Declarations) {
        for index in 0..self.inputs {
            decl.input_line(&format!("in{index}"));
        }
        decl.output_line("output");
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<(), DeviceError> {
        self.output = ctx.line("output");
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        if let Some(line) = self.output {
            ctx.set_line(line, LineState::from(self.output()));
        }
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("state", &mut self.state);
    }

    fn line_input(&mut self) -> Option<&mut dyn LineInput> {
        Some(self)
    }
}

impl LineInput for InputMerger {
    fn input_changed(&mut self, ctx: &mut DeviceContext<'_>, input: u32, state: LineState) {
        if input as usize >= self.inputs {
            return;
        }
        let before = self.output();
        let bit = 1 << input;
        if state.is_asserted() {
            self.state |= bit;
        } else {
            self.state &= !bit;
        }
        let after = self.output();
        if before != after {
            if let Some(line) = self.output {
                ctx.set_line(line, LineState::from(after));
            }
        }
    }
}
