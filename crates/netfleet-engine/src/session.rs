//! Device session capability.
//!
//! The engine only needs "send a command, get text back". Transports live
//! behind [`SessionConnector`]; the production connector drives the system
//! `ssh` client in batch mode, one process per command.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Leading text of every [`SessionError::Rejected`] message.
pub const REJECTED_PREFIX: &str = "command rejected:";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unable to connect to port 22 on {host}: {reason}")]
    Connect { host: String, reason: String },
    #[error("Socket is closed")]
    Closed,
    #[error("command timed out after {0}s")]
    Timeout(u64),
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open command channel to one device.
pub trait DeviceSession: Send {
    /// Send one command and block until its output is available.
    fn send_command(&mut self, command: &str) -> Result<String, SessionError>;
}

/// Opens sessions to devices by address.
pub trait SessionConnector: Send + Sync {
    fn connect(&self, device_ip: &str) -> Result<Box<dyn DeviceSession>, SessionError>;
}

// ── SSH ─────────────────────────────────────────────────────────────

/// Connector that shells out to OpenSSH.
///
/// Authentication is whatever the local ssh client is configured with
/// (agent, keys, `~/.ssh/config`).
#[derive(Debug, Clone)]
pub struct SshConnector {
    pub user: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub ssh_binary: PathBuf,
}

impl SshConnector {
    pub fn new(
        user: impl Into<String>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            user: user.into(),
            connect_timeout,
            command_timeout,
            ssh_binary: PathBuf::from("ssh"),
        }
    }
}

impl SessionConnector for SshConnector {
    fn connect(&self, device_ip: &str) -> Result<Box<dyn DeviceSession>, SessionError> {
        if device_ip.is_empty() {
            return Err(SessionError::Connect {
                host: String::new(),
                reason: "empty device address".into(),
            });
        }
        tracing::debug!(device_ip, user = %self.user, "opening ssh session");
        Ok(Box::new(SshSession {
            host: device_ip.to_string(),
            config: self.clone(),
        }))
    }
}

struct SshSession {
    host: String,
    config: SshConnector,
}

impl DeviceSession for SshSession {
    fn send_command(&mut self, command: &str) -> Result<String, SessionError> {
        let mut child = Command::new(&self.config.ssh_binary)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg(format!("{}@{}", self.config.user, self.host))
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes off-thread so a chatty device cannot fill the
        // pipe buffer while we wait on the deadline.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.config.command_timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::Timeout(self.config.command_timeout.as_secs()));
            }
            thread::sleep(Duration::from_millis(50));
        };

        let stdout = stdout.map(join_output).unwrap_or_default();
        let stderr = stderr.map(join_output).unwrap_or_default();

        match status.code() {
            Some(0) => Ok(stdout),
            // 255 is ssh's own failure code, as opposed to the remote command's.
            Some(255) => Err(classify_ssh_failure(&self.host, &stderr)),
            _ => {
                let text = if stderr.trim().is_empty() { stdout } else { stderr };
                Err(SessionError::Rejected(text.trim().to_string()))
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_output(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn classify_ssh_failure(host: &str, stderr: &str) -> SessionError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("closed by remote host") || lower.contains("connection closed") {
        SessionError::Closed
    } else {
        SessionError::Connect {
            host: host.to_string(),
            reason: stderr.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_messages_carry_the_prefix() {
        let err = SessionError::Rejected("copy sw tftp://fw/x.bin: Error: timed out".into());
        assert!(err.to_string().starts_with(REJECTED_PREFIX));
    }

    #[test]
    fn ssh_exit_255_maps_to_connect_or_closed() {
        let err = classify_ssh_failure(
            "10.0.0.1",
            "ssh: connect to host 10.0.0.1 port 22: Connection refused\n",
        );
        assert!(matches!(err, SessionError::Connect { .. }));
        assert!(err.to_string().starts_with("Unable to connect to port 22"));

        let err = classify_ssh_failure("10.0.0.1", "Connection to 10.0.0.1 closed by remote host.");
        assert!(matches!(err, SessionError::Closed));
        assert_eq!(err.to_string(), "Socket is closed");
    }

    #[test]
    fn connector_rejects_empty_address() {
        let connector = SshConnector::new("admin", Duration::from_secs(5), Duration::from_secs(5));
        assert!(connector.connect("").is_err());
        assert!(connector.connect("10.0.0.1").is_ok());
    }

    #[test]
    fn missing_ssh_binary_is_an_io_error() {
        let mut connector =
            SshConnector::new("admin", Duration::from_secs(1), Duration::from_secs(1));
        connector.ssh_binary = PathBuf::from("/nonexistent/netfleet-ssh");
        let mut session = connector.connect("10.0.0.1").unwrap();
        let err = session.send_command("show sw").unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }
}
