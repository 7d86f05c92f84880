//! Bounded subprocess execution shared by the generator and the ssh transport.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The child was killed; whatever it printed before that is kept.
    #[error("timed out after {}s", .timeout.as_secs())]
    Timeout {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Run `cmd` to completion or until `timeout`, optionally feeding `stdin`.
///
/// Stdout and stderr are drained on dedicated threads and the wait happens on
/// a third one, so the timeout is a plain `recv_timeout` with no polling.
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let program = cmd.get_program().to_string_lossy().into_owned();

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        program: program.clone(),
        reason: e.to_string(),
    })?;
    let child_pid = child.id();

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_string();
        // Writer thread: a large script must not deadlock against a child
        // that is itself blocked writing output. Dropping the pipe sends EOF.
        std::thread::spawn(move || {
            let _ = pipe.write_all(input.as_bytes());
        });
    }

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || -> String {
        let mut buf = String::new();
        if let Some(mut r) = stdout_handle {
            let _ = r.read_to_string(&mut buf);
        }
        buf
    });
    let stderr_thread = std::thread::spawn(move || -> String {
        let mut buf = String::new();
        if let Some(mut r) = stderr_handle {
            let _ = r.read_to_string(&mut buf);
        }
        buf
    });

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(child.wait());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(status)) => Ok(ProcessOutput {
            status,
            stdout: stdout_thread.join().unwrap_or_default(),
            stderr: stderr_thread.join().unwrap_or_default(),
        }),
        Ok(Err(e)) => Err(ProcessError::Spawn {
            program,
            reason: format!("wait failed: {e}"),
        }),
        Err(_) => {
            kill_process(child_pid);
            // Readers see EOF once the killed child's pipes close, unless a
            // grandchild still holds them; give them a moment, then move on.
            let grace = Duration::from_millis(500);
            Err(ProcessError::Timeout {
                timeout,
                stdout: join_with_grace(stdout_thread, grace),
                stderr: join_with_grace(stderr_thread, grace),
            })
        }
    }
}

fn join_with_grace(handle: std::thread::JoinHandle<String>, grace: Duration) -> String {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(handle.join().unwrap_or_default());
    });
    rx.recv_timeout(grace).unwrap_or_default()
}

/// Terminate a process by PID using SIGKILL. Best-effort; errors are ignored.
fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let out = run_with_timeout(sh("echo out; echo err >&2"), None, Duration::from_secs(10))
            .unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn feeds_stdin() {
        let out = run_with_timeout(sh("cat"), Some("configure\ncommit\n"), Duration::from_secs(10))
            .unwrap();
        assert_eq!(out.stdout, "configure\ncommit\n");
    }

    #[test]
    fn reports_exit_code() {
        let out = run_with_timeout(sh("exit 255"), None, Duration::from_secs(10)).unwrap();
        assert_eq!(out.code(), Some(255));
    }

    #[test]
    fn times_out_and_keeps_partial_output() {
        let err = run_with_timeout(
            sh("echo started; exec sleep 5"),
            None,
            Duration::from_millis(300),
        )
        .unwrap_err();
        match err {
            ProcessError::Timeout { stdout, .. } => assert_eq!(stdout.trim(), "started"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run_with_timeout(
            Command::new("/nonexistent/plsync-test-binary"),
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
