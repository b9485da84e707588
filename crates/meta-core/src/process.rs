//! Subprocess execution with a deadline, so a hung `git`/package-manager
//! invocation can be killed rather than blocking the orchestrator forever.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }
}

/// Runs `cmd` to completion, polling for exit until `timeout` elapses. On
/// timeout the child is killed and `timed_out` is set; stdout/stderr
/// captured so far are still returned.
pub fn run_command_with_timeout(mut cmd: Command, timeout: Duration) -> std::io::Result<CommandOutput> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child: Child = cmd.spawn()?;

    let deadline = Instant::now() + timeout;
    let status_code;
    let mut timed_out = false;
    loop {
        match child.try_wait()? {
            Some(status) => {
                status_code = status.code();
                break;
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    timed_out = true;
                    status_code = None;
                    break;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }

    Ok(CommandOutput {
        status_code,
        stdout,
        stderr,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_within_timeout() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hi");
        let out = run_command_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let out = run_command_with_timeout(cmd, Duration::from_millis(100)).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn captures_nonzero_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 7");
        let out = run_command_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(out.status_code, Some(7));
        assert!(!out.success());
    }
}
