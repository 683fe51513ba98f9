use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;

use crate::error::SshError;
use crate::Result;

// ─── SshTarget ────────────────────────────────────────────────────────────

/// How to reach one device. Every remote command is a separate `ssh`
/// invocation multiplexed over one OpenSSH control master, so a "session"
/// costs a single TCP/authentication handshake.
#[derive(Debug, Clone)]
pub(crate) struct SshTarget {
    pub ssh: PathBuf,
    pub scp: PathBuf,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub control_path: PathBuf,
}

impl SshTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    fn common_options(&self, cmd: &mut Command) {
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("ControlMaster=auto")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg("ControlPersist=300")
            .arg("-o")
            .arg("ServerAliveInterval=10");
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
    }

    /// `ssh ... user@host <command>`
    pub fn ssh_command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.ssh);
        self.common_options(&mut cmd);
        cmd.arg("-p").arg(self.port.to_string());
        cmd.arg(self.destination()).arg(remote);
        cmd
    }

    /// `ssh -T ... user@host`, commands fed on stdin.
    pub fn ssh_shell(&self) -> Command {
        let mut cmd = Command::new(&self.ssh);
        self.common_options(&mut cmd);
        cmd.arg("-T").arg("-p").arg(self.port.to_string());
        cmd.arg(self.destination());
        cmd
    }

    /// `scp ... <local> user@host:<remote>`
    pub fn scp_command(&self, local: &Path, remote: &str) -> Command {
        let mut cmd = Command::new(&self.scp);
        self.common_options(&mut cmd);
        cmd.arg("-P").arg(self.port.to_string());
        cmd.arg(local)
            .arg(format!("{}:{remote}", self.destination()));
        cmd
    }

    /// Tear down the control master. Best-effort.
    pub fn exit_master(&self) {
        let mut cmd = Command::new(&self.ssh);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg(self.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let _ = cmd.status();
    }
}

// ─── Execution ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct Captured {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `cmd` to completion, optionally feeding `input` on stdin.
///
/// stdout and stderr are drained on their own threads so a chatty command
/// cannot fill a pipe and stall; the wait itself runs on a third thread so
/// it can be abandoned (and the child killed) after `timeout`.
pub(crate) fn run(
    mut cmd: Command,
    label: &str,
    input: Option<&str>,
    timeout: Duration,
) -> Result<Captured> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!("running {label} via {program}");

    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|source| SshError::Spawn { program, source })?;
    let pid = child.id();

    if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(text.as_bytes())?;
        // dropping stdin closes it
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
    let status = match rx.recv_timeout(timeout) {
        Ok(result) => result?,
        Err(_) => {
            kill_process(pid);
            return Err(SshError::Timeout {
                command: label.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    Ok(Captured {
        success: status.success(),
        exit_code: status.code(),
        stdout: stdout_thread.join().unwrap_or_default(),
        stderr: stderr_thread.join().unwrap_or_default(),
    })
}

/// Like [`run`], but a non-zero exit is an error.
pub(crate) fn run_checked(
    cmd: Command,
    label: &str,
    input: Option<&str>,
    timeout: Duration,
) -> Result<String> {
    let out = run(cmd, label, input, timeout)?;
    if !out.success {
        let stderr = out.stderr.trim();
        return Err(SshError::CommandFailed {
            command: label.to_string(),
            stderr: if stderr.is_empty() {
                out.stdout.trim().to_string()
            } else {
                stderr.to_string()
            },
        });
    }
    Ok(out.stdout)
}

fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

// ─── Binary resolution ────────────────────────────────────────────────────

pub(crate) fn ssh_bin() -> Result<PathBuf> {
    which::which("ssh").map_err(|_| SshError::BinaryNotFound("ssh"))
}

pub(crate) fn scp_bin() -> Result<PathBuf> {
    which::which("scp").map_err(|_| SshError::BinaryNotFound("scp"))
}

/// `~/.ssh/junos-upgrade-<host>.sock`, falling back to the temp dir.
pub(crate) fn control_path(host: &str) -> PathBuf {
    let safe: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let name = format!("junos-upgrade-{safe}.sock");
    match home::home_dir() {
        Some(home) if home.join(".ssh").is_dir() => home.join(".ssh").join(name),
        _ => std::env::temp_dir().join(name),
    }
}
