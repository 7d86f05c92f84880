//! [`DeviceTransport`] over the system OpenSSH client.
//!
//! Each session operation is one `ssh` execution with the Junos script on
//! stdin. Password authentication goes through `sshpass -e`; the password is
//! handed over in the child's environment, never on the command line.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RouterTarget;
use crate::credentials::Credentials;
use crate::junos::{self, Reply};
use crate::process::{run_with_timeout, ProcessError, ProcessOutput};
use crate::transport::{Ack, DeviceSession, DeviceTransport, TransportFailure};

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

const AUTH_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "too many authentication failures",
];

#[derive(Debug, Clone)]
pub struct SshTransport {
    ssh: PathBuf,
    sshpass: Option<PathBuf>,
    connect_timeout_secs: u64,
    command_timeout: Duration,
}

impl SshTransport {
    /// Locate `ssh` (required) and `sshpass` (needed only for passwords).
    pub fn detect() -> Result<Self, TransportFailure> {
        let ssh = which::which("ssh")
            .map_err(|_| TransportFailure::Unreachable("ssh client not found on PATH".into()))?;
        Ok(Self {
            ssh,
            sshpass: which::which("sshpass").ok(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    pub fn with_binaries(ssh: impl Into<PathBuf>, sshpass: Option<PathBuf>) -> Self {
        Self {
            ssh: ssh.into(),
            sshpass,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn ssh_args(&self, router: &RouterTarget, username: &str, batch: bool) -> Vec<String> {
        let mut args = vec![
            "-T".to_string(),
            "-p".to_string(),
            router.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if batch {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.push(format!("{username}@{}", router.ip));
        args
    }
}

impl DeviceTransport for SshTransport {
    fn open(
        &self,
        router: &RouterTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>, TransportFailure> {
        if credentials.password.is_some() && self.sshpass.is_none() {
            return Err(TransportFailure::Auth(
                "password authentication needs sshpass on PATH (or use key-based auth)".into(),
            ));
        }
        debug!(router = %router.id(), user = %credentials.username, "opening ssh session");
        Ok(Box::new(SshSession {
            transport: self.clone(),
            router: router.clone(),
            credentials: credentials.clone(),
            closed: false,
        }))
    }
}

pub struct SshSession {
    transport: SshTransport,
    router: RouterTarget,
    credentials: Credentials,
    closed: bool,
}

impl SshSession {
    fn command(&self) -> Command {
        let batch = self.credentials.password.is_none();
        let args = self
            .transport
            .ssh_args(&self.router, &self.credentials.username, batch);
        match (&self.credentials.password, &self.transport.sshpass) {
            (Some(password), Some(sshpass)) => {
                let mut cmd = Command::new(sshpass);
                cmd.arg("-e").arg(&self.transport.ssh).args(args);
                cmd.env("SSHPASS", password);
                cmd
            }
            _ => {
                let mut cmd = Command::new(&self.transport.ssh);
                cmd.args(args);
                cmd
            }
        }
    }

    /// Run `script`; connection-level failures are mapped here, device
    /// replies are left to the caller.
    fn exec(&self, script: &str) -> Result<ProcessOutput, TransportFailure> {
        if self.closed {
            return Err(TransportFailure::Unreachable("session already closed".into()));
        }
        let output = match run_with_timeout(self.command(), Some(script), self.transport.command_timeout)
        {
            Ok(output) => output,
            Err(ProcessError::Spawn { reason, .. }) => {
                return Err(TransportFailure::Unreachable(reason));
            }
            Err(ProcessError::Timeout { stdout, timeout, .. }) => {
                let msg = format!("no reply within {}s", timeout.as_secs());
                return Err(if stdout.trim().is_empty() {
                    TransportFailure::Unreachable(msg)
                } else {
                    TransportFailure::LostAfterCommit(msg)
                });
            }
        };

        let stderr_lower = output.stderr.to_ascii_lowercase();
        if AUTH_MARKERS.iter().any(|m| stderr_lower.contains(m)) {
            return Err(TransportFailure::Auth(output.stderr.trim().to_string()));
        }
        // 255 is ssh's own failure code; sshpass uses 5 for a wrong password.
        let no_device_output = output.stdout.trim().is_empty();
        match output.code() {
            Some(255) if no_device_output => {
                Err(TransportFailure::Unreachable(output.stderr.trim().to_string()))
            }
            Some(5) if no_device_output && self.credentials.password.is_some() => {
                Err(TransportFailure::Auth("sshpass: invalid password".into()))
            }
            _ => Ok(output),
        }
    }
}

impl DeviceSession for SshSession {
    fn commit_confirmed(
        &mut self,
        commands: &[String],
        minutes: u32,
    ) -> Result<Ack, TransportFailure> {
        let script = junos::commit_confirmed_script(commands, minutes);
        info!(router = %self.router.id(), commands = commands.len(), minutes, "sending commit confirmed");
        let output = self.exec(&script)?;
        match junos::classify_commit(&output.stdout, output.status.success()) {
            Reply::Done => {
                for line in junos::load_warnings(&output.stdout) {
                    warn!(router = %self.router.id(), "device reported during load: {line}");
                }
                Ok(Ack {
                    output: output.stdout,
                })
            }
            Reply::Refused(line) => Err(TransportFailure::Rejected(line)),
            Reply::Indeterminate => Err(TransportFailure::LostAfterCommit(format!(
                "no commit acknowledgement (ssh exit {:?})",
                output.code()
            ))),
        }
    }

    fn confirm_commit(&mut self) -> Result<Ack, TransportFailure> {
        info!(router = %self.router.id(), "sending commit check to confirm");
        let output = self.exec(&junos::confirm_script())?;
        match junos::classify_confirm(&output.stdout, output.status.success()) {
            Reply::Done => Ok(Ack {
                output: output.stdout,
            }),
            Reply::Refused(line) => Err(TransportFailure::Rejected(line)),
            Reply::Indeterminate => Err(TransportFailure::LostAfterCommit(format!(
                "no confirmation acknowledgement (ssh exit {:?})",
                output.code()
            ))),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(router = %self.router.id(), "ssh session closed");
            self.closed = true;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Fake `ssh` that discards stdin and prints `stdout`, `stderr`, exits `code`.
    fn fake_ssh(dir: &TempDir, stdout: &str, stderr: &str, code: i32) -> PathBuf {
        let path = dir.path().join("ssh");
        let body = format!(
            "#!/bin/sh\ncat >/dev/null\nprintf '%s' '{stdout}'\nprintf '%s' '{stderr}' >&2\nexit {code}\n"
        );
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn session(ssh: PathBuf) -> Box<dyn DeviceSession> {
        let transport = SshTransport::with_binaries(ssh, None);
        transport
            .open(
                &RouterTarget::new("edge1", "192.0.2.1".parse().unwrap()),
                &Credentials {
                    username: "ops".into(),
                    password: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn args_pin_port_and_batch_mode() {
        let t = SshTransport::with_binaries("ssh", None);
        let mut r = RouterTarget::new("edge1", "192.0.2.1".parse().unwrap());
        r.port = 2222;
        let args = t.ssh_args(&r, "ops", true);
        assert_eq!(args[..3], ["-T", "-p", "2222"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().unwrap(), "ops@192.0.2.1");
    }

    #[test]
    fn password_without_sshpass_is_auth_failure() {
        let t = SshTransport::with_binaries("ssh", None);
        let err = t
            .open(
                &RouterTarget::new("edge1", "192.0.2.1".parse().unwrap()),
                &Credentials {
                    username: "ops".into(),
                    password: Some("pw".into()),
                },
            )
            .err()
            .unwrap();
        assert!(matches!(err, TransportFailure::Auth(_)));
    }

    #[test]
    fn acknowledged_commit() {
        let dir = TempDir::new().unwrap();
        let mut s = session(fake_ssh(&dir, "commit complete", "", 0));
        assert!(s.commit_confirmed(&["set a".to_string()], 3).is_ok());
    }

    #[test]
    fn connection_refused_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let mut s = session(fake_ssh(&dir, "", "ssh: connect to host 192.0.2.1 port 22: Connection refused", 255));
        assert!(matches!(
            s.commit_confirmed(&["set a".to_string()], 3),
            Err(TransportFailure::Unreachable(_))
        ));
    }

    #[test]
    fn permission_denied_is_auth() {
        let dir = TempDir::new().unwrap();
        let mut s = session(fake_ssh(&dir, "", "ops@192.0.2.1: Permission denied (publickey).", 255));
        assert!(matches!(
            s.confirm_commit(),
            Err(TransportFailure::Auth(_))
        ));
    }

    #[test]
    fn dropped_mid_session_is_lost_after_commit() {
        let dir = TempDir::new().unwrap();
        let mut s = session(fake_ssh(&dir, "Entering configuration mode", "Connection reset by peer", 255));
        assert!(matches!(
            s.commit_confirmed(&["set a".to_string()], 3),
            Err(TransportFailure::LostAfterCommit(_))
        ));
    }

    #[test]
    fn error_line_then_drop_is_lost_after_commit() {
        let dir = TempDir::new().unwrap();
        let mut s = session(fake_ssh(
            &dir,
            "error: invalid value: 300.0.0.0/8",
            "Connection reset by peer",
            255,
        ));
        assert!(matches!(
            s.commit_confirmed(&["set a".to_string()], 3),
            Err(TransportFailure::LostAfterCommit(_))
        ));
    }

    #[test]
    fn error_line_with_clean_exit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut s = session(fake_ssh(&dir, "error: invalid value: 300.0.0.0/8", "", 0));
        match s.commit_confirmed(&["set a".to_string()], 3) {
            Err(TransportFailure::Rejected(line)) => assert!(line.contains("300.0.0.0/8")),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn closed_session_refuses_work() {
        let dir = TempDir::new().unwrap();
        let mut s = session(fake_ssh(&dir, "commit complete", "", 0));
        s.close();
        assert!(s.confirm_commit().is_err());
    }
}
