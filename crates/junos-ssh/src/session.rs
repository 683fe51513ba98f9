use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use upgrade_core::config::SshConfig;
use upgrade_core::device::{
    ConfigContext, Connector, Credentials, InstallOptions, InstallResult, Presence, RebootScope,
    RemotePath, Session,
};
use upgrade_core::types::{DeviceFacts, Mastership, ReSlot, ReplicationMap, SoftwareInfo};
use upgrade_core::UpgradeError;

use crate::error::SshError;
use crate::process::{self, SshTarget};
use crate::types::{
    DirectoryReply, HardwareReply, NetworkServicesReply, PackageReply, PimConfigReply,
    ReplicationReply, RouteEngineReply, SoftwareReply,
};
use crate::Result;

/// ssh exits 255 when the remote end drops the connection.
const SSH_CONNECTION_LOST: i32 = 255;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ─── SshConnector ─────────────────────────────────────────────────────────

/// Opens [`SshSession`]s through the local OpenSSH client.
#[derive(Debug, Clone)]
pub struct SshConnector {
    ssh: PathBuf,
    scp: PathBuf,
    config: SshConfig,
}

impl SshConnector {
    /// Resolve `ssh` and `scp` on PATH.
    pub fn new(config: &SshConfig) -> Result<Self> {
        Ok(Self {
            ssh: process::ssh_bin()?,
            scp: process::scp_bin()?,
            config: config.clone(),
        })
    }

    pub(crate) fn target(&self, host: &str, credentials: &Credentials) -> SshTarget {
        let username = if credentials.username.is_empty() {
            self.config.username.clone()
        } else {
            credentials.username.clone()
        };
        SshTarget {
            ssh: self.ssh.clone(),
            scp: self.scp.clone(),
            host: host.to_string(),
            port: self.config.port,
            username,
            identity_file: credentials
                .identity_file
                .clone()
                .or_else(|| self.config.identity_file.clone()),
            connect_timeout: Duration::from_secs(self.config.connect_timeout_secs),
            control_path: process::control_path(host),
        }
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }
}

impl Connector for SshConnector {
    fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> upgrade_core::Result<Box<dyn Session>> {
        let target = self.target(host, credentials);
        debug!("ssh {} (control path {})", target.destination(), target.control_path.display());
        let mut session = SshSession::new(target, self.command_timeout());
        // A session that cannot answer a facts query is not a session.
        session.facts().map_err(|e| UpgradeError::Connection {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(session))
    }

    fn probe_reachable(&self, host: &str) -> bool {
        let Ok(mut addrs) = (host, self.config.port).to_socket_addrs() else {
            return false;
        };
        addrs.any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
    }
}

// ─── SshSession ───────────────────────────────────────────────────────────

/// One device, driven through Junos CLI commands over a multiplexed ssh
/// connection. Structured replies use `| display json`.
pub struct SshSession {
    target: SshTarget,
    timeout: Duration,
    master: Option<ReSlot>,
}

impl SshSession {
    pub(crate) fn new(target: SshTarget, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            master: None,
        }
    }

    fn exec(&self, command: &str) -> Result<String> {
        process::run_checked(self.target.ssh_command(command), command, None, self.timeout)
    }

    fn query<T: DeserializeOwned>(&self, command: &str) -> Result<T> {
        let full = format!("{command} | display json");
        let stdout = self.exec(&full)?;
        decode(&full, &stdout)
    }

    /// Commands that take the connection down with them. Losing the
    /// connection counts as success.
    fn exec_disruptive(&self, command: &str, input: Option<&str>) -> Result<()> {
        let out = process::run(self.target.ssh_command(command), command, input, self.timeout)?;
        if out.success || out.exit_code == Some(SSH_CONNECTION_LOST) {
            return Ok(());
        }
        if let Some(line) = error_lines(&out.stdout).into_iter().next() {
            return Err(SshError::CommandFailed {
                command: command.to_string(),
                stderr: line,
            });
        }
        Err(SshError::CommandFailed {
            command: command.to_string(),
            stderr: out.stderr.trim().to_string(),
        })
    }

    fn routing_engines(&self) -> Result<RouteEngineReply> {
        self.query("show chassis routing-engine")
    }

    fn software(&self, multi_re: bool) -> Result<SoftwareReply> {
        if multi_re {
            self.query("show version invoke-on all-routing-engines")
        } else {
            self.query("show version")
        }
    }
}

impl Session for SshSession {
    fn facts(&mut self) -> upgrade_core::Result<DeviceFacts> {
        let mut routing_engines = self.routing_engines()?.routing_engines();
        if routing_engines.is_empty() {
            return Err(SshError::Schema {
                command: "show chassis routing-engine".to_string(),
                reason: "no route-engine entries".to_string(),
            }
            .into());
        }
        let software = self.software(routing_engines.len() > 1)?;
        for re in routing_engines.iter_mut() {
            // Booting REs do not answer invoke-on; their version stays unknown.
            re.version = software.for_re(Some(re.slot)).and_then(|sw| sw.version());
        }

        let master = routing_engines
            .iter()
            .find(|re| re.mastership == Mastership::Master)
            .map(|re| re.slot);
        self.master = master;

        let master_sw = software.for_re(master).or_else(|| software.for_re(None));
        let version = master_sw.and_then(|sw| sw.version()).unwrap_or_default();
        let host = master_sw
            .and_then(|sw| sw.host_name.as_ref())
            .and_then(|l| l.text())
            .map(str::to_string)
            .unwrap_or_else(|| self.target.host.clone());
        let model = master_sw
            .and_then(|sw| sw.product_model.as_ref())
            .and_then(|l| l.text())
            .map(|m| m.to_ascii_uppercase())
            .unwrap_or_default();

        Ok(DeviceFacts {
            host,
            model,
            version,
            routing_engines,
        })
    }

    fn list_file(&mut self, path: &RemotePath) -> upgrade_core::Result<Presence> {
        let command = format!("file list {path} | display json");
        let out = process::run(self.target.ssh_command(&command), &command, None, self.timeout)?;
        let failed = || SshError::CommandFailed {
            command: command.clone(),
            stderr: out.stderr.trim().to_string(),
        };
        let reply: DirectoryReply = match decode(&command, &out.stdout) {
            Ok(reply) => reply,
            Err(_) if !out.success => return Err(failed().into()),
            Err(e) => return Err(e.into()),
        };
        listing_presence(&reply, out.success).ok_or_else(|| failed().into())
    }

    fn file_copy(&mut self, source: &RemotePath, destination: &RemotePath) -> upgrade_core::Result<()> {
        let command = format!("file copy {source} {destination}");
        info!("{command}");
        let stdout = self.exec(&command)?;
        if let Some(line) = error_lines(&stdout).into_iter().next() {
            return Err(SshError::CommandFailed {
                command,
                stderr: line,
            }
            .into());
        }
        Ok(())
    }

    fn install_package(
        &mut self,
        path: &str,
        options: &InstallOptions,
    ) -> upgrade_core::Result<InstallResult> {
        let command = package_add_command(path, options);
        info!("{command}");
        let full = format!("{command} | display json");
        let out = process::run(self.target.ssh_command(&full), &full, None, self.timeout)?;
        if options.reboot && out.exit_code == Some(SSH_CONNECTION_LOST) {
            // The RE may have gone down for the reboot before the reply was
            // flushed, or the session never came up at all.
            return rebooting_install_result(&out.stdout).ok_or_else(|| {
                SshError::CommandFailed {
                    command: full.clone(),
                    stderr: out.stderr.trim().to_string(),
                }
                .into()
            });
        }
        Ok(install_result(&out.stdout, out.success))
    }

    fn request_snapshot(&mut self, target: Option<ReSlot>) -> upgrade_core::Result<()> {
        let command = match target {
            Some(re) if self.master.is_some_and(|m| m != re) => {
                "request system snapshot invoke-on other-routing-engine"
            }
            _ => "request system snapshot",
        };
        info!("{command}");
        let stdout = self.exec(command)?;
        if let Some(line) = error_lines(&stdout).into_iter().next() {
            return Err(SshError::CommandFailed {
                command: command.to_string(),
                stderr: line,
            }
            .into());
        }
        Ok(())
    }

    fn request_reboot(&mut self, scope: RebootScope) -> upgrade_core::Result<()> {
        let command = match scope {
            RebootScope::Local => "request system reboot",
            RebootScope::BothRoutingEngines => "request system reboot both-routing-engines",
        };
        info!("{command}");
        self.exec_disruptive(command, Some("yes\n"))?;
        Ok(())
    }

    fn request_switchover(&mut self) -> upgrade_core::Result<()> {
        let command = "request chassis routing-engine master switch no-confirm";
        info!("{command}");
        self.exec_disruptive(command, None)?;
        Ok(())
    }

    fn open_config(&mut self) -> upgrade_core::Result<Box<dyn ConfigContext + '_>> {
        Ok(Box::new(SshConfigContext::new(&self.target, self.timeout)))
    }

    fn core_dumps(&mut self, target: Option<ReSlot>) -> upgrade_core::Result<Vec<String>> {
        let command = match target {
            Some(re) => format!("show system core-dumps routing-engine {re}"),
            None => "show system core-dumps".to_string(),
        };
        let reply: DirectoryReply = self.query(&command)?;
        Ok(reply.core_dumps())
    }

    fn software_info(&mut self, target: Option<ReSlot>) -> upgrade_core::Result<SoftwareInfo> {
        let reply = self.software(target.is_some())?;
        let command = "show version";
        let sw = reply.for_re(target).ok_or_else(|| SshError::Schema {
            command: command.to_string(),
            reason: match target {
                Some(re) => format!("no software-information for {re}"),
                None => "no software-information".to_string(),
            },
        })?;
        Ok(sw.to_software_info().ok_or_else(|| SshError::Schema {
            command: command.to_string(),
            reason: "no junos version".to_string(),
        })?)
    }

    fn replication_state(&mut self) -> upgrade_core::Result<ReplicationMap> {
        let reply: ReplicationReply = self.query("show task replication")?;
        Ok(reply.to_map())
    }

    fn pim_nonstop_routing_configured(&mut self) -> upgrade_core::Result<bool> {
        let command = "show configuration protocols pim nonstop-routing | display json";
        let stdout = self.exec(command)?;
        if json_body(&stdout).is_empty() {
            return Ok(false);
        }
        let reply: PimConfigReply = decode(command, &stdout)?;
        Ok(reply.nonstop_routing())
    }

    fn network_services_mode(&mut self) -> upgrade_core::Result<String> {
        let command = "show chassis network-services";
        let reply: NetworkServicesReply = self.query(command)?;
        Ok(reply
            .mode()
            .ok_or_else(|| SshError::Schema {
                command: command.to_string(),
                reason: "no network-services name".to_string(),
            })?
            .to_string())
    }

    fn line_cards(&mut self) -> upgrade_core::Result<Vec<String>> {
        let reply: HardwareReply = self.query("show chassis hardware")?;
        Ok(reply.line_cards())
    }

    fn close(self: Box<Self>) {
        debug!("closing control master for {}", self.target.host);
        self.target.exit_master();
    }
}

// ─── SshConfigContext ─────────────────────────────────────────────────────

/// Candidate configuration held locally and replayed inside
/// `configure exclusive` for every diff or commit. Nothing reaches the
/// device's candidate database between calls, so dropping the context
/// discards everything.
pub struct SshConfigContext<'s> {
    target: &'s SshTarget,
    timeout: Duration,
    statements: Vec<String>,
}

impl<'s> SshConfigContext<'s> {
    pub(crate) fn new(target: &'s SshTarget, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            statements: Vec::new(),
        }
    }

    fn script(&self, tail: &[&str]) -> String {
        let mut lines = vec!["configure exclusive"];
        lines.extend(self.statements.iter().map(String::as_str));
        lines.extend_from_slice(tail);
        let mut script = lines.join("\n");
        script.push('\n');
        script
    }

    fn run_script(&self, label: &str, script: &str) -> Result<String> {
        let out = process::run(self.target.ssh_shell(), label, Some(script), self.timeout)?;
        if !out.success && out.stdout.trim().is_empty() {
            return Err(SshError::CommandFailed {
                command: label.to_string(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }
}

impl ConfigContext for SshConfigContext<'_> {
    fn load(&mut self, statement: &str) -> upgrade_core::Result<Vec<String>> {
        debug!("candidate += {statement}");
        self.statements.push(statement.to_string());
        Ok(Vec::new())
    }

    fn diff(&mut self) -> upgrade_core::Result<Option<String>> {
        let script = self.script(&["show | compare", "rollback 0", "exit configuration-mode"]);
        let stdout = self.run_script("show | compare", &script)?;
        let compare = parse_compare(&stdout);
        for w in &compare.warnings {
            warn!("{w}");
        }
        if !compare.errors.is_empty() {
            return Err(UpgradeError::ConfigApply(compare.errors.join("; ")));
        }
        Ok(compare.diff)
    }

    fn commit(&mut self) -> upgrade_core::Result<()> {
        let script = self.script(&["commit and-quit"]);
        let stdout = self.run_script("commit", &script)?;
        if stdout.contains("commit complete") {
            self.statements.clear();
            return Ok(());
        }
        let errors = error_lines(&stdout);
        Err(UpgradeError::ConfigApply(if errors.is_empty() {
            "commit did not complete".to_string()
        } else {
            errors.join("; ")
        }))
    }

    fn rollback(&mut self, id: u32) -> upgrade_core::Result<()> {
        self.statements.clear();
        if id > 0 {
            self.statements.push(format!("rollback {id}"));
        }
        Ok(())
    }
}

// ─── Reply parsing ────────────────────────────────────────────────────────

/// Drop the `{master}` / `{backup}` banner lines dual-RE devices print
/// around every reply.
pub(crate) fn json_body(stdout: &str) -> String {
    stdout
        .lines()
        .filter(|line| {
            let t = line.trim();
            !(t.starts_with('{') && t.ends_with('}') && !t.contains('"') && t.len() > 2)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub(crate) fn decode<T: DeserializeOwned>(command: &str, stdout: &str) -> Result<T> {
    let body = json_body(stdout);
    if body.is_empty() {
        return Err(SshError::Schema {
            command: command.to_string(),
            reason: "empty reply".to_string(),
        });
    }
    serde_json::from_str(&body).map_err(|source| SshError::Decode {
        command: command.to_string(),
        source,
    })
}

pub(crate) fn error_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("error:") || l.starts_with("ERROR:"))
        .map(str::to_string)
        .collect()
}

pub(crate) fn package_add_command(path: &str, options: &InstallOptions) -> String {
    let mut command = format!("request system software add {path}");
    if let Some(re) = options.target {
        command.push(' ');
        command.push_str(re.as_str());
    }
    if options.no_validate {
        command.push_str(" no-validate");
    }
    if options.reboot {
        command.push_str(" reboot");
    }
    if options.force {
        command.push_str(" force");
    }
    command
}

/// Structured reply when the release renders one, otherwise the CLI text
/// with `error:` lines as the failure signal.
pub(crate) fn install_result(stdout: &str, exited_ok: bool) -> InstallResult {
    if let Ok(reply) = decode::<PackageReply>("request system software add", stdout) {
        let codes = reply.result_codes();
        if !codes.is_empty() {
            return InstallResult {
                output: reply.output_lines(),
                package_results: codes,
            };
        }
    }
    let output: Vec<String> = stdout
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let failed = !exited_ok || !error_lines(stdout).is_empty();
    InstallResult {
        output,
        package_results: vec![if failed { 1 } else { 0 }],
    }
}

/// Install result for a session cut off while `reboot` was requested. `None`
/// unless the partial reply shows the package was accepted.
pub(crate) fn rebooting_install_result(stdout: &str) -> Option<InstallResult> {
    if let Ok(reply) = decode::<PackageReply>("request system software add", stdout) {
        let codes = reply.result_codes();
        if !codes.is_empty() {
            return codes.iter().all(|&c| c == 0).then(|| InstallResult {
                output: reply.output_lines(),
                package_results: codes,
            });
        }
    }
    let output: Vec<String> = stdout
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let rebooting = output.iter().any(|l| l.contains("Rebooting"));
    if rebooting && error_lines(stdout).is_empty() {
        return Some(InstallResult {
            output,
            package_results: vec![0],
        });
    }
    None
}

/// Presence of a `file list` target. `None` when the reply neither names the
/// file nor reports it missing and the command failed.
pub(crate) fn listing_presence(reply: &DirectoryReply, exited_ok: bool) -> Option<Presence> {
    if reply.contains_file() {
        Some(Presence::Present)
    } else if reply.reports_missing() || exited_ok {
        Some(Presence::Absent)
    } else {
        None
    }
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Compare {
    pub diff: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Messages the CLI prints under a statement it refused to load.
const CLI_REJECTIONS: [&str; 3] = ["syntax error", "unknown command", "missing argument"];

fn is_rejection(line: &str) -> bool {
    line.starts_with("error:") || CLI_REJECTIONS.iter().any(|r| line.starts_with(r))
}

pub(crate) fn parse_compare(stdout: &str) -> Compare {
    let mut compare = Compare::default();
    let mut diff = Vec::new();
    let mut changed = false;
    let mut statement = "";
    let mut after_caret = false;
    for line in stdout.lines() {
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        if t == "^" {
            after_caret = true;
            continue;
        }
        if after_caret || is_rejection(t) {
            compare.errors.push(if after_caret && !statement.is_empty() {
                format!("{t} ({statement})")
            } else {
                t.to_string()
            });
            after_caret = false;
        } else if t.starts_with("warning:") {
            compare.warnings.push(t.to_string());
        } else if t.starts_with("[edit") {
            diff.push(line.trim_end().to_string());
        } else if t.starts_with('+') || t.starts_with('-') || t.starts_with('!') {
            changed |= !t.starts_with('!');
            diff.push(line.trim_end().to_string());
        }
        statement = t;
    }
    if changed {
        compare.diff = Some(diff.join("\n"));
    }
    compare
}
