//! Live progress for long-running agent turns.
//!
//! - [`tools`]: tool-call classification and one-line summaries
//! - [`aggregator`]: coalesces tool steps into one edited anchor message
//! - [`tracker`]: typing heartbeat and status line with pause/backoff

pub mod aggregator;
pub mod tools;
pub mod tracker;

pub use aggregator::{MessageAggregator, Step, StepStatus};
pub use tools::{tool_spec, ToolCategory, ToolInput, ToolSpec, ToolTier};
pub use tracker::{ProgressPhase, ProgressTracker};
