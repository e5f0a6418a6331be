//! # domai - Dual-Stream Security Monitor
//!
//! Runs standard network observation tools (`tcpdump`, `lsof`, `netstat`) as
//! supervised child processes, turns their text output into structured
//! security events and publishes every event on two streams: a **crisis**
//! stream of short action-oriented alerts and a **knowledge** stream of
//! explanations adapted to the reader's expertise tier.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐  lines   ┌──────────────┐  events  ┌──────────────────┐
//! │  ToolRunner  │─────────▶│   Pipeline   │─────────▶│    Dispatcher    │
//! │ (per tool,   │  mpsc    │ LineParser + │          │ per-subscriber   │
//! │  supervised) │          │  severity    │          │ bounded queues   │
//! └──────────────┘          └──────┬───────┘          └───┬──────────┬───┘
//!        ▲                         │ record               │ crisis   │ knowledge
//!        │ grants                  ▼                      ▼          ▼
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────────┐
//! │ Permissions  │          │  Sessions +  │          │ TUI / headless / │
//! │  (audited)   │          │ ContextWindow│          │   JSONL export   │
//! └──────────────┘          └──────────────┘          └──────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`runner`]: spawns and supervises one tool process, restarts it with
//!   capped exponential backoff and stops it with SIGTERM then SIGKILL
//! - [`parser`]: one grammar per tool plus the deterministic severity table;
//!   unrecognized lines become degraded events instead of errors
//! - [`render`]: the tier renderer (raw, novice, intermediate, expert)
//! - [`dispatch`]: fan-out to crisis and knowledge subscribers with
//!   per-stream overflow policies and drop counters
//! - [`pipeline`] / [`monitor`]: glue between runners, parser, sessions and
//!   dispatcher
//!
//! ### Session Modules
//!
//! - [`session`]: sessions own a profile and a [`context`] window; analysis
//!   results combine explanation, correlated events and learning topics
//! - [`profile`]: user profile model and JSON profile store
//!
//! ### Support Modules
//!
//! - [`permissions`]: capability grants with an audit log
//! - [`preflight`]: tool lookup and privilege checks before anything starts
//! - [`ports`]: well-known port table used by severity and rendering
//! - [`config`], [`cli`], [`export`], [`tui`], [`domain`]
//!
//! ## Typical Usage
//!
//! ```bash
//! # Live view of packet capture
//! sudo domai
//!
//! # Socket tables only, expert explanations, exported for later
//! domai --tool lsof --tool netstat --tier expert --headless --export events.jsonl
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod domain;
pub mod export;
pub mod monitor;
pub mod parser;
pub mod permissions;
pub mod pipeline;
pub mod ports;
pub mod preflight;
pub mod profile;
pub mod render;
pub mod runner;
pub mod session;
pub mod tui;
