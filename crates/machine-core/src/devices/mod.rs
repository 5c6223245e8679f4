//! Small general-purpose devices bundled with the core.

/// Explicit fan-in of several lines into one.
pub mod input_merger;
/// Periodic pulse generator.
pub mod timer;

pub use input_merger::{InputMerger, MergeMode};
pub use timer::TimerDevice;
