//! Domain model for domai
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{next_event_id, EventId, IdSequence, Pid, Seq, SessionId, SubscriptionId};

pub use errors::{ConfigError, ExportError, ProfileError, RunnerError, TuiError};
