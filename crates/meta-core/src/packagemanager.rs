//! Package manager detection and invocation. Files present in a
//! component's materialized directory pick the manager (independent of its
//! declared, closed-set build kind); presence of a lockfile picks the exact
//! install invocation within that manager.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::manifest::BuildKind;
use crate::process::{run_command_with_timeout, CommandOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pip,
    Cargo,
    Go,
    Docker,
}

impl PackageManager {
    pub fn program(self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pip => "pip",
            PackageManager::Cargo => "cargo",
            PackageManager::Go => "go",
            PackageManager::Docker => "docker",
        }
    }
}

/// Detects a build kind purely from files present in `dir`, used when a
/// component's manifest entry omits an explicit `type`. `Cargo.toml`/
/// `go.mod` have no dedicated entry in the closed `BuildKind` set, so they
/// classify as `Generic`; see [`detect_package_manager`] for the install-step
/// detection, which does route them to their own managers.
pub fn detect_build_kind(dir: &Path) -> BuildKind {
    if dir.join("Cargo.toml").exists() {
        BuildKind::Generic
    } else if dir.join("package.json").exists() {
        BuildKind::Npm
    } else if dir.join("pyproject.toml").exists() || dir.join("setup.py").exists() {
        BuildKind::Python
    } else if dir.join("go.mod").exists() {
        BuildKind::Generic
    } else if dir.join("Dockerfile").exists() {
        BuildKind::Docker
    } else if dir.join("WORKSPACE").exists() || dir.join("WORKSPACE.bazel").exists() {
        BuildKind::Bazel
    } else {
        BuildKind::Generic
    }
}

/// Detects which package manager to run for the install step purely from
/// files present in `dir`, independent of the component's declared
/// (closed-set) build kind — a `generic`-typed component can still carry its
/// own `Cargo.toml` or `go.mod` that needs its dependencies fetched before a
/// build runs.
pub fn detect_package_manager(dir: &Path) -> Option<PackageManager> {
    if dir.join("package.json").exists() {
        Some(PackageManager::Npm)
    } else if dir.join("requirements.txt").exists()
        || dir.join("setup.py").exists()
        || dir.join("pyproject.toml").exists()
    {
        Some(PackageManager::Pip)
    } else if dir.join("Cargo.toml").exists() {
        Some(PackageManager::Cargo)
    } else if dir.join("go.mod").exists() {
        Some(PackageManager::Go)
    } else if dir.join("Dockerfile").exists() {
        Some(PackageManager::Docker)
    } else {
        None
    }
}

/// True if a lockfile recognized by `manager` is present — install should
/// prefer the lockfile-pinned invocation (`npm ci`, `pip install -r
/// requirements.lock`) over the resolving one (`npm install`) whenever one
/// exists.
pub fn has_lockfile(manager: PackageManager, dir: &Path) -> bool {
    match manager {
        PackageManager::Npm => dir.join("package-lock.json").exists(),
        PackageManager::Pip => {
            dir.join("requirements.lock").exists() || dir.join("Pipfile.lock").exists()
        }
        PackageManager::Cargo => dir.join("Cargo.lock").exists(),
        PackageManager::Go => dir.join("go.sum").exists(),
        PackageManager::Docker => false,
    }
}

fn install_args(manager: PackageManager, dir: &Path) -> Vec<&'static str> {
    match manager {
        PackageManager::Npm if has_lockfile(manager, dir) => vec!["ci"],
        PackageManager::Npm => vec!["install"],
        PackageManager::Pip if dir.join("requirements.lock").exists() => {
            vec!["install", "-r", "requirements.lock"]
        }
        PackageManager::Pip => vec!["install", "-r", "requirements.txt"],
        PackageManager::Cargo => vec!["fetch"],
        PackageManager::Go => vec!["mod", "download"],
        PackageManager::Docker => vec!["build", "."],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallFailureKind {
    /// Couldn't reach the registry — retryable through the usual git-style
    /// backoff policy.
    Network,
    /// Checksum/integrity mismatch or a lockfile that disagrees with the
    /// manifest — never safe to retry, needs a human to resolve.
    Conflict,
    Other,
}

fn classify_failure(output: &CommandOutput) -> InstallFailureKind {
    let combined = format!("{}\n{}", output.stdout, output.stderr).to_lowercase();
    let network_markers = [
        "network",
        "timed out",
        "timeout",
        "could not resolve host",
        "connection reset",
        "etimedout",
        "econnreset",
    ];
    let conflict_markers = [
        "integrity checksum failed",
        "checksum mismatch",
        "lock file",
        "lockfile",
        "does not satisfy",
        "conflicting dependency",
    ];
    if network_markers.iter().any(|m| combined.contains(m)) {
        InstallFailureKind::Network
    } else if conflict_markers.iter().any(|m| combined.contains(m)) {
        InstallFailureKind::Conflict
    } else {
        InstallFailureKind::Other
    }
}

/// Runs the install invocation appropriate for `manager` in `dir`. Network
/// failures map to `Error::Git`-style transience via a synthetic
/// `GitErrorKind::Transient` classification reused from the git module so
/// the same retry policy applies; everything else is a permanent
/// `Error::Dependency`.
pub fn install(
    component: &str,
    manager: PackageManager,
    dir: &Path,
    timeout: Duration,
) -> Result<CommandOutput> {
    let args = install_args(manager, dir);
    let mut cmd = Command::new(manager.program());
    cmd.args(&args).current_dir(dir);

    let output = run_command_with_timeout(cmd, timeout).map_err(|e| {
        Error::dependency(component, format!("failed to spawn {}: {e}", manager.program()))
    })?;

    if output.success() {
        return Ok(output);
    }

    match classify_failure(&output) {
        InstallFailureKind::Network => Err(Error::Git {
            component: component.to_string(),
            operation: format!("{} {}", manager.program(), args.join(" ")),
            kind: crate::error::GitErrorKind::Transient,
            message: output.stderr.clone(),
        }),
        InstallFailureKind::Conflict | InstallFailureKind::Other => Err(Error::dependency(
            component,
            format!(
                "{} {} failed: {}",
                manager.program(),
                args.join(" "),
                output.stderr.trim()
            ),
        )),
    }
}

/// A component directory with no recognized package-manager files has
/// nothing for `install` to do; callers check this before invoking it so
/// "no manager needed" isn't misreported as a failure.
pub fn needs_install(dir: &Path) -> bool {
    detect_package_manager(dir)
        .map(|m| m != PackageManager::Docker && dir.exists())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_npm_from_package_json() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_build_kind(dir.path()), BuildKind::Npm);
    }

    #[test]
    fn detects_python_from_pyproject() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "").unwrap();
        assert_eq!(detect_build_kind(dir.path()), BuildKind::Python);
    }

    #[test]
    fn package_manager_detection_routes_cargo_toml_to_cargo() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"").unwrap();
        assert_eq!(detect_package_manager(dir.path()), Some(PackageManager::Cargo));
        assert!(needs_install(dir.path()));
    }

    #[test]
    fn package_manager_detection_routes_go_mod_to_go() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/x\n").unwrap();
        assert_eq!(detect_package_manager(dir.path()), Some(PackageManager::Go));
        assert!(needs_install(dir.path()));
    }

    #[test]
    fn package_manager_detection_prefers_lockfile_for_go() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/x\n").unwrap();
        std::fs::write(dir.path().join("go.sum"), "").unwrap();
        assert!(has_lockfile(PackageManager::Go, dir.path()));
        assert_eq!(install_args(PackageManager::Go, dir.path()), vec!["mod", "download"]);
    }

    #[test]
    fn no_recognized_files_means_no_install_needed() {
        let dir = tempdir().unwrap();
        assert_eq!(detect_package_manager(dir.path()), None);
        assert!(!needs_install(dir.path()));
    }

    #[test]
    fn prefers_lockfile_install_args_when_lockfile_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(install_args(PackageManager::Npm, dir.path()), vec!["ci"]);
    }

    #[test]
    fn falls_back_to_resolving_install_without_lockfile() {
        let dir = tempdir().unwrap();
        assert_eq!(
            install_args(PackageManager::Npm, dir.path()),
            vec!["install"]
        );
    }

    #[test]
    fn classifies_network_failure_as_transient_git_error() {
        let dir = tempdir().unwrap();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo 'network timeout reaching registry' 1>&2; exit 1")
            .current_dir(dir.path());
        let out = run_command_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(classify_failure(&out), InstallFailureKind::Network);
    }

    #[test]
    fn classifies_checksum_mismatch_as_conflict() {
        let out = CommandOutput {
            status_code: Some(1),
            stdout: String::new(),
            stderr: "integrity checksum failed for package foo".to_string(),
            timed_out: false,
        };
        assert_eq!(classify_failure(&out), InstallFailureKind::Conflict);
    }

    #[test]
    fn install_returns_dependency_error_on_conflict() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo 'lockfile out of date' 1>&2; exit 1")
            .current_dir(dir.path());
        let out = run_command_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(classify_failure(&out), InstallFailureKind::Conflict);
    }
}
