//! Tool Runner: supervision of the wrapped diagnostic processes
//!
//! One [`ToolRunner`] owns one external process at a time. Output lines are
//! forwarded in arrival order over an mpsc channel to the line parser stage;
//! unexpected exits are retried with capped exponential backoff.
//!
//! ```text
//!   Idle ──start──► Running ──stop──► Stopping ──► Stopped
//!                    │   ▲
//!             exit   ▼   │ respawn
//!                 Restarting ──cap exceeded──► Failed
//! ```

mod supervisor;
mod tools;

use std::fmt;

use chrono::{DateTime, Utc};
use domai_common::EventSource;

pub use supervisor::ToolRunner;
pub use tools::{ToolSpec, SYSTEM_TOOL_DIRS};

/// One line of tool output, newline stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub tool: EventSource,
    pub line: String,
    pub received_at: DateTime<Utc>,
}

/// Lifecycle state of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerState {
    #[default]
    Idle,
    Running,
    /// Waiting out the backoff before restart attempt `attempt`
    Restarting { attempt: u32 },
    Stopping,
    Stopped,
    /// Gave up after too many crashes; the grant has been released
    Failed,
}

impl RunnerState {
    /// No supervisor is active in this state
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, RunnerState::Idle | RunnerState::Stopped | RunnerState::Failed)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Idle => f.write_str("IDLE"),
            RunnerState::Running => f.write_str("RUNNING"),
            RunnerState::Restarting { attempt } => write!(f, "RESTARTING({attempt})"),
            RunnerState::Stopping => f.write_str("STOPPING"),
            RunnerState::Stopped => f.write_str("STOPPED"),
            RunnerState::Failed => f.write_str("FAILED"),
        }
    }
}
