//! Collaborator seams: the device management client and file transfer.
//!
//! The engine never talks to a device directly. A [`Connector`] opens
//! [`Session`]s, and [`SessionHandle`] owns the single live session of a run,
//! tearing it down and reopening it around every reboot or switchover.

use crate::error::{Result, UpgradeError};
use crate::types::{DeviceFacts, ReSlot, ReplicationMap, SoftwareInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

/// A path on the device, optionally qualified with the RE that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    pub re: Option<ReSlot>,
    pub path: String,
}

impl RemotePath {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            re: None,
            path: path.into(),
        }
    }

    pub fn on(re: ReSlot, path: impl Into<String>) -> Self {
        Self {
            re: Some(re),
            path: path.into(),
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.re {
            Some(re) => write!(f, "{re}:{}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    pub fn is_present(self) -> bool {
        self == Presence::Present
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOptions {
    pub reboot: bool,
    pub no_validate: bool,
    /// `None` installs on the RE the session is attached to.
    pub target: Option<ReSlot>,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallResult {
    pub output: Vec<String>,
    pub package_results: Vec<i32>,
}

impl InstallResult {
    pub fn succeeded(&self) -> bool {
        self.package_results.iter().all(|code| *code == 0)
    }

    pub fn failure_codes(&self) -> Vec<i32> {
        self.package_results
            .iter()
            .copied()
            .filter(|code| *code != 0)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootScope {
    /// The RE the session is attached to.
    Local,
    BothRoutingEngines,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An exclusive candidate-configuration context. Dropping it releases the
/// lock and discards anything not committed.
pub trait ConfigContext {
    /// Load one statement in merge mode. Returns non-fatal warnings.
    fn load(&mut self, statement: &str) -> Result<Vec<String>>;
    /// Candidate vs. committed diff; `None` when there is nothing to commit.
    fn diff(&mut self) -> Result<Option<String>>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self, id: u32) -> Result<()>;
}

/// A live management session to one device.
pub trait Session {
    fn facts(&mut self) -> Result<DeviceFacts>;
    fn list_file(&mut self, path: &RemotePath) -> Result<Presence>;
    fn file_copy(&mut self, source: &RemotePath, destination: &RemotePath) -> Result<()>;
    fn install_package(&mut self, path: &str, options: &InstallOptions) -> Result<InstallResult>;
    fn request_snapshot(&mut self, target: Option<ReSlot>) -> Result<()>;
    fn request_reboot(&mut self, scope: RebootScope) -> Result<()>;
    fn request_switchover(&mut self) -> Result<()>;
    fn open_config(&mut self) -> Result<Box<dyn ConfigContext + '_>>;
    /// Core dump files on `target` (or the attached RE).
    fn core_dumps(&mut self, target: Option<ReSlot>) -> Result<Vec<String>>;
    fn software_info(&mut self, target: Option<ReSlot>) -> Result<SoftwareInfo>;
    fn replication_state(&mut self) -> Result<ReplicationMap>;
    fn pim_nonstop_routing_configured(&mut self) -> Result<bool>;
    fn network_services_mode(&mut self) -> Result<String>;
    /// Descriptions of the installed line cards.
    fn line_cards(&mut self) -> Result<Vec<String>>;
    fn close(self: Box<Self>);
}

pub trait Connector {
    fn connect(&self, host: &str, credentials: &Credentials) -> Result<Box<dyn Session>>;
    /// Cheap liveness check that does not need a session.
    fn probe_reachable(&self, host: &str) -> bool;
}

pub trait FileTransfer {
    fn copy_local_to_device(&self, source: &Path, host: &str, destination: &RemotePath)
        -> Result<()>;

    /// Copy between two locations on the device, typically to the peer RE.
    fn copy_device_to_device(
        &self,
        session: &mut dyn Session,
        source: &RemotePath,
        destination: &RemotePath,
    ) -> Result<()> {
        session.file_copy(source, destination)
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Exclusive owner of the run's single management session.
pub struct SessionHandle<'a> {
    connector: &'a dyn Connector,
    host: String,
    credentials: Credentials,
    session: Option<Box<dyn Session>>,
    facts: Option<DeviceFacts>,
}

impl<'a> SessionHandle<'a> {
    pub fn open(connector: &'a dyn Connector, host: &str, credentials: Credentials) -> Result<Self> {
        let mut handle = Self {
            connector,
            host: host.to_string(),
            credentials,
            session: None,
            facts: None,
        };
        handle.connect()?;
        Ok(handle)
    }

    fn connect(&mut self) -> Result<()> {
        info!("Connecting to {}...", self.host);
        let session = self
            .connector
            .connect(&self.host, &self.credentials)
            .map_err(|e| match e {
                UpgradeError::Connection { .. } => e,
                other => UpgradeError::Connection {
                    host: self.host.clone(),
                    reason: other.to_string(),
                },
            })?;
        self.session = Some(session);
        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn connector(&self) -> &'a dyn Connector {
        self.connector
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&mut self) -> Result<&mut (dyn Session + 'static)> {
        match self.session.as_deref_mut() {
            Some(s) => Ok(s),
            None => Err(UpgradeError::Connection {
                host: self.host.clone(),
                reason: "session is closed".to_string(),
            }),
        }
    }

    /// Re-query the device. Callers must use the returned snapshot rather
    /// than anything they held before a disruptive step.
    pub fn refresh_facts(&mut self) -> Result<DeviceFacts> {
        let facts = self.session()?.facts()?;
        self.facts = Some(facts.clone());
        Ok(facts)
    }

    pub fn last_facts(&self) -> Option<&DeviceFacts> {
        self.facts.as_ref()
    }

    /// Drop the (stale) session, connect again and refresh facts.
    pub fn reopen(&mut self) -> Result<DeviceFacts> {
        self.close();
        self.connect()?;
        self.refresh_facts()
    }

    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Closing session to {}", self.host);
            session.close();
        }
        self.facts = None;
    }
}

impl Drop for SessionHandle<'_> {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("Session to {} still open at teardown, closing", self.host);
            self.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Event, FakeDevice};

    #[test]
    fn remote_path_display() {
        assert_eq!(RemotePath::local("/var/tmp/a.tgz").to_string(), "/var/tmp/a.tgz");
        assert_eq!(
            RemotePath::on(ReSlot::Re1, "/var/tmp/a.tgz").to_string(),
            "re1:/var/tmp/a.tgz"
        );
    }

    #[test]
    fn install_result_requires_all_zero_codes() {
        let ok = InstallResult {
            output: vec![],
            package_results: vec![0, 0],
        };
        assert!(ok.succeeded());
        let bad = InstallResult {
            output: vec![],
            package_results: vec![0, 1],
        };
        assert!(!bad.succeeded());
        assert_eq!(bad.failure_codes(), vec![1]);
    }

    #[test]
    fn reopen_closes_the_stale_session_first() {
        let device = FakeDevice::single("16.1R6");
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        handle.refresh_facts().unwrap();
        handle.reopen().unwrap();
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(
            device.events(),
            vec![Event::Connect, Event::Close, Event::Connect, Event::Close]
        );
    }

    #[test]
    fn connect_failure_maps_to_connection_error() {
        let device = FakeDevice::single("16.1R6");
        device.sim().connect_fails = true;
        let err = SessionHandle::open(&device, "r1", Credentials::default())
            .err()
            .unwrap();
        assert!(matches!(err, UpgradeError::Connection { .. }));
    }

    #[test]
    fn drop_closes_open_session() {
        let device = FakeDevice::single("16.1R6");
        {
            let _handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        }
        assert_eq!(device.events(), vec![Event::Connect, Event::Close]);
    }
}
