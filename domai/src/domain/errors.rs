//! Structured error types for domai
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Parse degradation and queue overflow are deliberately absent: both are
//! recorded as data (a flag on the event, a drop counter) and never fail the
//! pipeline.

use std::path::PathBuf;

use domai_common::EventSource;
use thiserror::Error;

use crate::permissions::Capability;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{tool} not found (searched: {searched})")]
    ToolNotFound { tool: EventSource, searched: String },

    #[error("Permission denied: {tool} requires the {capability} capability")]
    PermissionDenied { tool: EventSource, capability: Capability },

    #[error("{0} is already running")]
    AlreadyRunning(EventSource),

    #[error("{tool} crashed {attempts} times, giving up (last exit: {last_status})")]
    ProcessCrashed { tool: EventSource, attempts: u32, last_status: String },

    #[error("Invalid argument for {tool}: {reason}")]
    InvalidArgument { tool: EventSource, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Invalid profile id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write export record: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TuiError {
    #[error("Terminal error: {0}")]
    TerminalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
