//! Pre-flight checks for domai
//!
//! Locates the wrapped tool binaries and checks privileges before any runner
//! is started, so a failed start names the missing piece (binary vs.
//! permission) instead of surfacing as a generic spawn error.

#![allow(unsafe_code)] // geteuid() requires unsafe

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

use crate::domain::RunnerError;
use crate::permissions::{PermissionService, PrivilegeLevel};
use crate::runner::ToolSpec;

/// Check every requested tool before starting anything
///
/// Errors are `RunnerError`s wrapped in `anyhow`, so the caller can downcast
/// them to pick an exit code.
pub fn run_preflight_checks(
    specs: &[ToolSpec],
    permissions: &dyn PermissionService,
    quiet: bool,
) -> Result<()> {
    for spec in specs {
        resolve_tool(spec).with_context(|| format!("Cannot start {}", spec.tool))?;
        check_privileges(spec, permissions, quiet)
            .with_context(|| format!("Cannot start {}", spec.tool))?;
    }
    Ok(())
}

/// Absolute path of the tool's executable
///
/// # Errors
/// `RunnerError::ToolNotFound` listing every directory searched.
pub fn resolve_tool(spec: &ToolSpec) -> Result<PathBuf, RunnerError> {
    let dirs = search_dirs(&spec.search_paths);
    find_executable(&spec.program, &dirs).ok_or_else(|| RunnerError::ToolNotFound {
        tool: spec.tool,
        searched: if spec.program.contains('/') {
            spec.program.clone()
        } else {
            dirs.iter().map(|d| d.display().to_string()).collect::<Vec<_>>().join(":")
        },
    })
}

fn check_privileges(
    spec: &ToolSpec,
    permissions: &dyn PermissionService,
    quiet: bool,
) -> Result<(), RunnerError> {
    if !permissions.check(spec.capability) {
        return Err(RunnerError::PermissionDenied { tool: spec.tool, capability: spec.capability });
    }
    if !quiet && spec.capability.level() == PrivilegeLevel::Elevated && !is_root() {
        warn!("{} runs without root: processes owned by other users will be missing", spec.tool);
    }
    Ok(())
}

/// Whether this process runs with effective uid 0
#[must_use]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Tool-specific directories first, then `$PATH`, without duplicates
fn search_dirs(preferred: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = preferred.to_vec();
    if let Some(path) = env::var_os("PATH") {
        for dir in env::split_paths(&path) {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs
}

/// Find `program` in `dirs`; a program containing `/` is checked as given
#[must_use]
pub fn find_executable(program: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') {
        let path = Path::new(program);
        return is_executable(path).then(|| path.to_path_buf());
    }
    dirs.iter().map(|dir| dir.join(program)).find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata().is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Capability, LocalPermissions};
    use domai_common::EventSource;

    #[test]
    fn test_missing_tool_lists_search_path() {
        let spec = ToolSpec::custom(
            EventSource::Tcpdump,
            "domai-no-such-tool",
            Vec::new(),
            Capability::ProcessMonitor,
        )
        .with_search_paths(vec![PathBuf::from("/nonexistent/bin")]);

        let err = resolve_tool(&spec).unwrap_err();
        assert!(matches!(err, RunnerError::ToolNotFound { .. }));
        assert!(err.to_string().contains("/nonexistent/bin"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_path_is_checked_directly() {
        assert_eq!(find_executable("/bin/sh", &[]), Some(PathBuf::from("/bin/sh")));
        assert_eq!(find_executable("/nonexistent/sh", &[]), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tcpdump"), "not a program").unwrap();
        assert_eq!(find_executable("tcpdump", &[dir.path().to_path_buf()]), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_preflight_reports_permission_denied() {
        let spec = ToolSpec::custom(
            EventSource::Tcpdump,
            "/bin/sh",
            Vec::new(),
            Capability::PacketCapture,
        );
        let perms = LocalPermissions::with_root(false);
        let err = run_preflight_checks(&[spec], &perms, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::PermissionDenied { .. })
        ));
    }
}
