//! CLI argument definitions

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use domai_common::{EventSource, Severity, Tier};

use crate::config::MonitorConfig;

#[derive(Parser, Debug)]
#[command(
    name = "domai",
    about = "Run network tools and explain what they see, at your level",
    after_help = "\
EXAMPLES:
    sudo domai                               Capture on all interfaces (tcpdump)
    domai --tool lsof --tool netstat         Watch sockets without root
    sudo domai --filter port 22 --tier expert
    sudo domai --headless --export events.jsonl --duration 60"
)]
pub struct Args {
    /// Tool to run (repeatable)
    #[arg(long = "tool", value_name = "TOOL", default_value = "tcpdump")]
    pub tools: Vec<EventSource>,

    /// Capture interface for tcpdump
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Capture filter expression for tcpdump (e.g. `port 22`)
    #[arg(short, long, num_args = 1.., value_name = "EXPR")]
    pub filter: Vec<String>,

    /// Explanation tier: raw, novice, intermediate, expert
    #[arg(short, long)]
    pub tier: Option<Tier>,

    /// Lowest severity shown on the crisis stream
    #[arg(long, value_name = "SEVERITY")]
    pub min_severity: Option<Severity>,

    /// Addresses whose traffic is always critical (repeatable)
    #[arg(long = "watch", value_name = "ADDR")]
    pub watchlist: Vec<IpAddr>,

    /// Print both streams to stdout instead of the TUI
    #[arg(long)]
    pub headless: bool,

    /// Write outbound records as JSON lines to FILE
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding user profiles
    #[arg(long, value_name = "DIR")]
    pub profile_dir: Option<PathBuf>,

    /// Profile to load (created on first use)
    #[arg(long, value_name = "ID", default_value = "default")]
    pub profile: String,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Apply flag overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut MonitorConfig) {
        if let Some(ref interface) = self.interface {
            config.tools.interface.clone_from(interface);
        }
        if !self.filter.is_empty() {
            config.tools.capture_filter.clone_from(&self.filter);
        }
        for addr in &self.watchlist {
            if !config.parser.watchlist.contains(addr) {
                config.parser.watchlist.push(*addr);
            }
        }
    }

    /// Requested tools without duplicates, in the order given
    #[must_use]
    pub fn unique_tools(&self) -> Vec<EventSource> {
        let mut tools = Vec::new();
        for tool in &self.tools {
            if !tools.contains(tool) {
                tools.push(*tool);
            }
        }
        tools
    }
}
