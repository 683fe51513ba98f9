use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ReSlot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReSlot {
    Re0,
    Re1,
}

impl ReSlot {
    pub fn all() -> &'static [ReSlot] {
        &[ReSlot::Re0, ReSlot::Re1]
    }

    pub fn peer(self) -> ReSlot {
        match self {
            ReSlot::Re0 => ReSlot::Re1,
            ReSlot::Re1 => ReSlot::Re0,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReSlot::Re0 => "re0",
            ReSlot::Re1 => "re1",
        }
    }
}

impl fmt::Display for ReSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReSlot {
    type Err = crate::error::UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "re0" | "0" => Ok(ReSlot::Re0),
            "re1" | "1" => Ok(ReSlot::Re1),
            _ => Err(crate::error::UpgradeError::InvalidConfig(format!(
                "unknown routing engine '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Mastership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mastership {
    Master,
    Backup,
    /// Present in the chassis but not participating (booting, offline, ...).
    Unknown,
}

impl Mastership {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Mastership::Master,
            "backup" => Mastership::Backup,
            _ => Mastership::Unknown,
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, Mastership::Master | Mastership::Backup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mastership::Master => "master",
            Mastership::Backup => "backup",
            Mastership::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Mastership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Architecture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "32-bit")]
    Bit32,
    #[serde(rename = "64-bit")]
    Bit64,
}

impl Architecture {
    pub fn all() -> &'static [Architecture] {
        &[Architecture::Bit32, Architecture::Bit64]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::Bit32 => "32-bit",
            Architecture::Bit64 => "64-bit",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Architecture {
    type Err = crate::error::UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "32-bit" | "32" => Ok(Architecture::Bit32),
            "64-bit" | "64" => Ok(Architecture::Bit64),
            _ => Err(crate::error::UpgradeError::InvalidConfig(format!(
                "unknown architecture '{s}': expected 32-bit or 64-bit"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Single,
    Dual,
}

// ---------------------------------------------------------------------------
// RoutingEngine / DeviceFacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEngine {
    pub slot: ReSlot,
    pub mastership: Mastership,
    pub status: String,
    pub model: String,
    pub version: Option<String>,
}

impl RoutingEngine {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Point-in-time snapshot of a device. Only ever replaced wholesale by a
/// fresh query; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFacts {
    pub host: String,
    pub model: String,
    /// Version reported by the master RE.
    pub version: String,
    pub routing_engines: Vec<RoutingEngine>,
}

impl DeviceFacts {
    pub fn topology(&self) -> Topology {
        if self.routing_engines.len() > 1 {
            Topology::Dual
        } else {
            Topology::Single
        }
    }

    pub fn is_dual(&self) -> bool {
        self.topology() == Topology::Dual
    }

    pub fn re(&self, slot: ReSlot) -> Option<&RoutingEngine> {
        self.routing_engines.iter().find(|re| re.slot == slot)
    }

    pub fn master(&self) -> Option<ReSlot> {
        self.routing_engines
            .iter()
            .find(|re| re.mastership == Mastership::Master)
            .map(|re| re.slot)
    }

    /// The current backup RE. Requires both a master and a peer that reports
    /// backup mastership; anything else is ambiguous.
    pub fn backup(&self) -> Option<ReSlot> {
        let master = self.master()?;
        let peer = self.re(master.peer())?;
        (peer.mastership == Mastership::Backup).then_some(peer.slot)
    }

    /// Model family prefix, e.g. `MX` for `MX960`.
    pub fn family(&self) -> String {
        self.model
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase()
    }

    /// Versions of both REs when they disagree.
    pub fn version_mismatch(&self) -> Option<(String, String)> {
        let re0 = self.re(ReSlot::Re0)?.version.clone().unwrap_or_default();
        let re1 = self.re(ReSlot::Re1)?.version.clone().unwrap_or_default();
        (re0 != re1).then_some((re0, re1))
    }
}

// ---------------------------------------------------------------------------
// SoftwareInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwareInfo {
    pub version: String,
    /// Bitness marker found in the installed package descriptions, if any.
    pub architecture: Option<Architecture>,
}

// ---------------------------------------------------------------------------
// ReplicationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationState {
    Complete,
    InProgress,
    Other(String),
}

impl ReplicationState {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "Complete" => ReplicationState::Complete,
            "InProgress" => ReplicationState::InProgress,
            other => ReplicationState::Other(other.to_string()),
        }
    }

    pub fn is_converged(&self) -> bool {
        *self == ReplicationState::Complete
    }
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationState::Complete => f.write_str("Complete"),
            ReplicationState::InProgress => f.write_str("InProgress"),
            ReplicationState::Other(s) => f.write_str(s),
        }
    }
}

pub type ReplicationMap = BTreeMap<String, ReplicationState>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
