use crate::plan::{ImageKind, ImagePlan};
use crate::types::{DeviceFacts, ReSlot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Result of one install on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeOutcome {
    /// `None` for a single-RE device.
    pub target: Option<ReSlot>,
    pub image: String,
    pub kind: ImageKind,
    pub success: bool,
    pub elapsed_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_after: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub core_dumps: Vec<String>,
}

impl UpgradeOutcome {
    pub fn target_label(&self) -> &'static str {
        self.target.map(ReSlot::as_str).unwrap_or("device")
    }
}

/// Something the operator should look at after the run, even though the run
/// was allowed to continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthWarning {
    CoreDumps { target: String, files: Vec<String> },
    ReNotHealthy { re: ReSlot, status: String },
    ReplicationNotConverged { protocol: String, state: String },
    NonstopRoutingDisabled,
    NetworkModeNotChanged { reason: String },
    LeftOnNonPreferredMaster { master: ReSlot },
}

impl fmt::Display for HealthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthWarning::CoreDumps { target, files } => {
                write!(f, "{} core dump(s) on {target}", files.len())
            }
            HealthWarning::ReNotHealthy { re, status } => write!(f, "{re} status is {status}"),
            HealthWarning::ReplicationNotConverged { protocol, state } => {
                write!(f, "task replication for {protocol} is {state}")
            }
            HealthWarning::NonstopRoutingDisabled => {
                f.write_str("nonstop routing was not replicating before switchover")
            }
            HealthWarning::NetworkModeNotChanged { reason } => {
                write!(f, "network-services mode not changed: {reason}")
            }
            HealthWarning::LeftOnNonPreferredMaster { master } => {
                write!(f, "{master} left as master")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ImagePlan>,
    /// Images a dry run found missing on the device.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_images: Vec<String>,
    pub outcomes: Vec<UpgradeOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_facts: Option<DeviceFacts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<HealthWarning>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_serialize_with_kind_tag() {
        let w = HealthWarning::ReNotHealthy {
            re: ReSlot::Re1,
            status: "Testing".to_string(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "re_not_healthy");
        assert_eq!(json["re"], "re1");
        assert_eq!(w.to_string(), "re1 status is Testing");
    }

    #[test]
    fn outcome_label_for_single_re() {
        let o = UpgradeOutcome {
            target: None,
            image: "junos.tgz".to_string(),
            kind: ImageKind::Main,
            success: true,
            elapsed_secs: 600,
            version_after: Some("16.1R6".to_string()),
            core_dumps: Vec::new(),
        };
        assert_eq!(o.target_label(), "device");
        let json = serde_json::to_string(&o).unwrap();
        assert!(!json.contains("core_dumps"));
    }
}
