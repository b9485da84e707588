//! Git driver: clone, fetch, checkout, resolve ref -> sha,
//! commit, tag, revert — every network operation retried with the bounded
//! backoff in [`crate::retry`], and errors classified transient vs
//! permanent before the retry loop decides whether to continue.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, GitErrorKind, Result};
use crate::process::run_command_with_timeout;
use crate::retry::{with_retry, RetryConfig};

/// Resolves the `git` binary to invoke. Overridable via `META_GIT_BIN` so
/// tests can point at a fake script instead of a real git binary.
pub fn git_program() -> String {
    std::env::var("META_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

fn classify(stderr: &str) -> GitErrorKind {
    let lowered = stderr.to_lowercase();
    let permanent_markers = [
        "authentication failed",
        "permission denied",
        "could not read username",
        "repository not found",
        "did not match any file(s) known to git",
        "unknown revision or path",
        "pathspec",
    ];
    if permanent_markers.iter().any(|m| lowered.contains(m)) {
        GitErrorKind::Permanent
    } else {
        GitErrorKind::Transient
    }
}

fn run_git(component: &str, operation: &str, args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new(git_program());
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = run_command_with_timeout(cmd, Duration::from_secs(300)).map_err(|e| {
        Error::Git {
            component: component.to_string(),
            operation: operation.to_string(),
            kind: GitErrorKind::Transient,
            message: e.to_string(),
        }
    })?;

    if output.timed_out {
        return Err(Error::Git {
            component: component.to_string(),
            operation: operation.to_string(),
            kind: GitErrorKind::Transient,
            message: "git operation timed out".to_string(),
        });
    }

    if output.success() {
        Ok(output.stdout)
    } else {
        Err(Error::Git {
            component: component.to_string(),
            operation: operation.to_string(),
            kind: classify(&output.stderr),
            message: output.stderr.trim().to_string(),
        })
    }
}

fn run_git_retried(
    component: &str,
    operation: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<String> {
    let config = RetryConfig {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(16),
        jitter: 0.5,
    };
    with_retry(
        &config,
        |d| std::thread::sleep(d),
        |_attempt| run_git(component, operation, args, cwd),
    )
}

pub fn clone(component: &str, repo: &str, target: &Path) -> Result<()> {
    let target_str = target.to_string_lossy().to_string();
    run_git_retried(component, "clone", &["clone", repo, &target_str], None)?;
    Ok(())
}

pub fn fetch(component: &str, dir: &Path) -> Result<()> {
    run_git_retried(component, "fetch", &["fetch", "--all", "--tags"], Some(dir))?;
    Ok(())
}

pub fn checkout(component: &str, dir: &Path, reference: &str) -> Result<()> {
    run_git(component, "checkout", &["checkout", reference], Some(dir))?;
    Ok(())
}

pub fn resolve_sha(component: &str, dir: &Path, reference: &str) -> Result<String> {
    let out = run_git(
        component,
        "resolve-sha",
        &["rev-parse", reference],
        Some(dir),
    )?;
    Ok(out.trim().to_string())
}

pub fn commit_sha(component: &str, dir: &Path) -> Result<String> {
    resolve_sha(component, dir, "HEAD")
}

pub fn commit(component: &str, dir: &Path, message: &str, files: &[String]) -> Result<()> {
    if !files.is_empty() {
        let mut args: Vec<&str> = vec!["add"];
        args.extend(files.iter().map(|s| s.as_str()));
        run_git(component, "add", &args, Some(dir))?;
    }
    run_git(component, "commit", &["commit", "-m", message], Some(dir))?;
    Ok(())
}

pub fn tag(component: &str, dir: &Path, name: &str, message: &str) -> Result<()> {
    run_git(component, "tag", &["tag", "-a", name, "-m", message], Some(dir))?;
    Ok(())
}

/// Creates a revert commit for `sha` without touching any other history.
pub fn revert(component: &str, dir: &Path, sha: &str) -> Result<()> {
    run_git(
        component,
        "revert",
        &["revert", "--no-edit", sha],
        Some(dir),
    )?;
    Ok(())
}

pub fn is_clean(dir: &Path) -> Result<bool> {
    let out = run_git("workspace", "status", &["status", "--porcelain"], Some(dir))?;
    Ok(out.trim().is_empty())
}

pub fn ensure_clean(component: &str, dir: &Path) -> Result<()> {
    if is_clean(dir)? {
        Ok(())
    } else {
        Err(Error::Git {
            component: component.to_string(),
            operation: "ensure_clean".to_string(),
            kind: GitErrorKind::Permanent,
            message: "working tree is dirty".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            unsafe {
                match &self.previous {
                    Some(v) => std::env::set_var(self.key, v),
                    None => std::env::remove_var(self.key),
                }
            }
        }
    }

    fn fake_git_script(dir: &Path, body: &str) -> std::path::PathBuf {
        let script = dir.join("fake-git.sh");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&script).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script, perms).unwrap();
        }
        script
    }

    #[test]
    #[serial]
    fn classifies_transient_vs_permanent_errors() {
        let dir = tempdir().unwrap();
        let script = fake_git_script(
            dir.path(),
            r#"echo "fatal: Authentication failed for repo" 1>&2; exit 128"#,
        );
        let _guard = EnvGuard::set("META_GIT_BIN", script.to_str().unwrap());

        let err = clone("a", "any", dir.path()).unwrap_err();
        match err {
            Error::Git { kind, .. } => assert_eq!(kind, GitErrorKind::Permanent),
            _ => panic!("expected git error"),
        }
    }

    #[test]
    #[serial]
    fn retries_transient_failures_and_eventually_succeeds() {
        let dir = tempdir().unwrap();
        let counter_file = dir.path().join("attempts");
        fs::write(&counter_file, "0").unwrap();
        let script = fake_git_script(
            dir.path(),
            &format!(
                r#"
count=$(cat "{counter}")
count=$((count + 1))
echo "$count" > "{counter}"
if [ "$count" -lt 2 ]; then
  echo "fatal: the remote end hung up unexpectedly" 1>&2
  exit 128
fi
exit 0
"#,
                counter = counter_file.display()
            ),
        );
        let _guard = EnvGuard::set("META_GIT_BIN", script.to_str().unwrap());

        clone("a", "any", dir.path()).unwrap();
        let attempts: u32 = fs::read_to_string(&counter_file).unwrap().trim().parse().unwrap();
        assert_eq!(attempts, 2);
    }

    #[test]
    #[serial]
    fn resolve_sha_reads_stdout() {
        let dir = tempdir().unwrap();
        let script = fake_git_script(dir.path(), r#"echo "deadbeefcafebabe""#);
        let _guard = EnvGuard::set("META_GIT_BIN", script.to_str().unwrap());

        let sha = resolve_sha("a", dir.path(), "HEAD").unwrap();
        assert_eq!(sha, "deadbeefcafebabe");
    }
}
