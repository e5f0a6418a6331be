//! Tool catalog: fixed invocations for each wrapped diagnostic tool
//!
//! Arguments are always an argv vector handed to the OS directly. Nothing
//! user-supplied is ever interpolated into a shell command line.

use std::path::PathBuf;

use domai_common::EventSource;

use crate::config::ToolsConfig;
use crate::domain::RunnerError;
use crate::permissions::Capability;

/// Directories searched before `$PATH`
pub const SYSTEM_TOOL_DIRS: &[&str] =
    &["/usr/sbin", "/usr/local/sbin", "/opt/homebrew/bin", "/usr/bin", "/sbin", "/bin"];

/// Everything needed to launch one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub tool: EventSource,
    /// Bare name looked up on the search paths, or a path containing `/`
    pub program: String,
    pub args: Vec<String>,
    pub search_paths: Vec<PathBuf>,
    pub capability: Capability,
}

impl ToolSpec {
    /// Catalog entry for `tool` with the configured parameters
    ///
    /// # Errors
    /// `InvalidArgument` when the interface or capture filter could be
    /// mistaken for a command-line option.
    pub fn for_tool(tool: EventSource, config: &ToolsConfig) -> Result<Self, RunnerError> {
        match tool {
            EventSource::Tcpdump => Self::tcpdump(&config.interface, &config.capture_filter),
            EventSource::Lsof => Ok(Self::lsof(config.lsof_interval_secs)),
            EventSource::Netstat => Ok(Self::netstat()),
        }
    }

    /// `tcpdump -i <iface> -n -l -tttt [filter...]`
    ///
    /// # Errors
    /// `InvalidArgument` for an empty or option-like interface name, or a
    /// filter token starting with `-`.
    pub fn tcpdump(interface: &str, filter: &[String]) -> Result<Self, RunnerError> {
        let valid_iface = !interface.is_empty()
            && !interface.starts_with('-')
            && interface.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'));
        if !valid_iface {
            return Err(RunnerError::InvalidArgument {
                tool: EventSource::Tcpdump,
                reason: format!("bad interface name '{interface}'"),
            });
        }
        if let Some(token) = filter.iter().find(|t| t.starts_with('-')) {
            return Err(RunnerError::InvalidArgument {
                tool: EventSource::Tcpdump,
                reason: format!("filter token '{token}' looks like an option"),
            });
        }

        let mut args: Vec<String> =
            ["-i", interface, "-n", "-l", "-tttt"].iter().map(ToString::to_string).collect();
        args.extend(filter.iter().cloned());
        Ok(Self::system(EventSource::Tcpdump, "tcpdump", args, Capability::PacketCapture))
    }

    /// `lsof -i -n -P -r <secs>`: repeat mode, separated by `=======` lines
    #[must_use]
    pub fn lsof(interval_secs: u64) -> Self {
        let args = vec![
            "-i".to_string(),
            "-n".to_string(),
            "-P".to_string(),
            "-r".to_string(),
            interval_secs.max(1).to_string(),
        ];
        Self::system(EventSource::Lsof, "lsof", args, Capability::ProcessMonitor)
    }

    /// `netstat -t -u -n -a -p -c`: continuous socket table
    #[must_use]
    pub fn netstat() -> Self {
        let args = ["-t", "-u", "-n", "-a", "-p", "-c"].iter().map(ToString::to_string).collect();
        Self::system(EventSource::Netstat, "netstat", args, Capability::NetworkMonitor)
    }

    fn system(tool: EventSource, program: &str, args: Vec<String>, capability: Capability) -> Self {
        Self {
            tool,
            program: program.to_string(),
            args,
            search_paths: SYSTEM_TOOL_DIRS.iter().map(PathBuf::from).collect(),
            capability,
        }
    }

    /// Arbitrary program reporting as `tool` (replay scripts, tests)
    #[must_use]
    pub fn custom(
        tool: EventSource,
        program: impl Into<String>,
        args: Vec<String>,
        capability: Capability,
    ) -> Self {
        Self { tool, program: program.into(), args, search_paths: Vec::new(), capability }
    }

    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Command line for logs
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
