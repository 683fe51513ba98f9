//! Typed views of Junos `| display json` replies.
//!
//! Junos renders every operational leaf as `[{"data": "..."}]`, wraps
//! multi-RE replies in `multi-routing-engine-results`, and omits empty
//! containers entirely. Everything here is `Option`/`default` so a missing
//! element degrades to "absent" instead of a decode error.

use serde::Deserialize;
use upgrade_core::types::{
    Architecture, Mastership, ReSlot, ReplicationMap, ReplicationState, RoutingEngine,
    SoftwareInfo,
};

// ─── Leaves ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeafData {
    #[serde(default)]
    pub data: String,
}

/// One operational leaf.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Leaf(pub Vec<LeafData>);

impl Leaf {
    pub fn text(&self) -> Option<&str> {
        self.0.first().map(|d| d.data.trim())
    }

    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|d| d.data.trim())
    }
}

fn text(leaf: &Option<Leaf>) -> Option<&str> {
    leaf.as_ref().and_then(Leaf::text)
}

fn parse_slot(s: &str) -> Option<ReSlot> {
    s.trim_start_matches(|c: char| !c.is_ascii_digit()).parse::<ReSlot>().ok()
}

// ─── show chassis routing-engine ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RouteEngineReply {
    #[serde(rename = "route-engine-information", default)]
    pub information: Vec<RouteEngineInformation>,
}

#[derive(Debug, Deserialize)]
pub struct RouteEngineInformation {
    #[serde(rename = "route-engine", default)]
    pub route_engines: Vec<RouteEngineEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RouteEngineEntry {
    pub slot: Option<Leaf>,
    #[serde(rename = "mastership-state")]
    pub mastership_state: Option<Leaf>,
    pub status: Option<Leaf>,
    pub model: Option<Leaf>,
}

impl RouteEngineReply {
    /// Routing engines without versions; a lone RE with no slot or
    /// mastership is RE0 and master.
    pub fn routing_engines(&self) -> Vec<RoutingEngine> {
        let entries: Vec<&RouteEngineEntry> = self
            .information
            .iter()
            .flat_map(|i| i.route_engines.iter())
            .collect();
        let single = entries.len() == 1;
        entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let slot = text(&entry.slot)
                    .and_then(parse_slot)
                    .unwrap_or(if i == 0 { ReSlot::Re0 } else { ReSlot::Re1 });
                let mastership = match text(&entry.mastership_state) {
                    Some(state) => Mastership::parse(state),
                    None if single => Mastership::Master,
                    None => Mastership::Unknown,
                };
                RoutingEngine {
                    slot,
                    mastership,
                    status: text(&entry.status).unwrap_or("").to_string(),
                    model: text(&entry.model).unwrap_or("").to_string(),
                    version: None,
                }
            })
            .collect()
    }
}

// ─── show version invoke-on all-routing-engines ───────────────────────────

#[derive(Debug, Deserialize)]
pub struct SoftwareReply {
    #[serde(rename = "multi-routing-engine-results")]
    pub multi: Option<Vec<MultiReResults>>,
    #[serde(rename = "software-information")]
    pub software: Option<Vec<SoftwareInformation>>,
}

#[derive(Debug, Deserialize)]
pub struct MultiReResults {
    #[serde(rename = "multi-routing-engine-item", default)]
    pub items: Vec<MultiReItem>,
}

#[derive(Debug, Deserialize)]
pub struct MultiReItem {
    #[serde(rename = "re-name")]
    pub re_name: Option<Leaf>,
    #[serde(rename = "software-information", default)]
    pub software: Vec<SoftwareInformation>,
    #[serde(rename = "directory-list", default)]
    pub directory_list: Vec<DirectoryList>,
}

#[derive(Debug, Deserialize)]
pub struct SoftwareInformation {
    #[serde(rename = "host-name")]
    pub host_name: Option<Leaf>,
    #[serde(rename = "product-model")]
    pub product_model: Option<Leaf>,
    #[serde(rename = "junos-version")]
    pub junos_version: Option<Leaf>,
    #[serde(rename = "package-information", default)]
    pub packages: Vec<PackageInformation>,
}

#[derive(Debug, Deserialize)]
pub struct PackageInformation {
    pub name: Option<Leaf>,
    pub comment: Option<Leaf>,
}

impl SoftwareInformation {
    /// `junos-version` when present, else the bracketed release in the
    /// first package comment (`JUNOS Base OS boot [12.3R5.7]`).
    pub fn version(&self) -> Option<String> {
        if let Some(v) = text(&self.junos_version) {
            return Some(v.to_string());
        }
        self.packages.iter().find_map(|p| {
            let comment = text(&p.comment)?;
            let start = comment.find('[')?;
            let end = comment[start..].find(']')? + start;
            Some(comment[start + 1..end].to_string())
        })
    }

    /// Bitness declared by the installed package descriptions.
    pub fn architecture(&self) -> Option<Architecture> {
        let comments: Vec<&str> = self.packages.iter().filter_map(|p| text(&p.comment)).collect();
        if comments.iter().any(|c| c.contains("64-bit")) {
            Some(Architecture::Bit64)
        } else if comments.iter().any(|c| c.contains("32-bit")) {
            Some(Architecture::Bit32)
        } else {
            None
        }
    }

    pub fn to_software_info(&self) -> Option<SoftwareInfo> {
        Some(SoftwareInfo {
            version: self.version()?,
            architecture: self.architecture(),
        })
    }
}

impl SoftwareReply {
    /// `(re, software)` pairs. A single-RE reply is attributed to RE0.
    pub fn per_re(&self) -> Vec<(ReSlot, &SoftwareInformation)> {
        if let Some(multi) = &self.multi {
            return multi
                .iter()
                .flat_map(|m| m.items.iter())
                .filter_map(|item| {
                    let slot = text(&item.re_name).and_then(parse_slot)?;
                    item.software.first().map(|sw| (slot, sw))
                })
                .collect();
        }
        self.software
            .iter()
            .flatten()
            .take(1)
            .map(|sw| (ReSlot::Re0, sw))
            .collect()
    }

    pub fn for_re(&self, re: Option<ReSlot>) -> Option<&SoftwareInformation> {
        let all = self.per_re();
        match re {
            Some(slot) => all.into_iter().find(|(s, _)| *s == slot).map(|(_, sw)| sw),
            None => all.into_iter().next().map(|(_, sw)| sw),
        }
    }
}

// ─── file list / show system core-dumps ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DirectoryReply {
    #[serde(rename = "directory-list", default)]
    pub directory_list: Vec<DirectoryList>,
    #[serde(rename = "multi-routing-engine-results")]
    pub multi: Option<Vec<MultiReResults>>,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryList {
    #[serde(default)]
    pub directory: Vec<Directory>,
    pub output: Option<Leaf>,
}

#[derive(Debug, Deserialize)]
pub struct Directory {
    #[serde(rename = "file-information", default)]
    pub files: Vec<FileInformation>,
}

#[derive(Debug, Deserialize)]
pub struct FileInformation {
    #[serde(rename = "file-name")]
    pub file_name: Option<Leaf>,
}

impl DirectoryReply {
    fn lists(&self) -> Vec<&DirectoryList> {
        let nested = self
            .multi
            .iter()
            .flatten()
            .flat_map(|m| m.items.iter())
            .flat_map(|item| item.directory_list.iter());
        self.directory_list.iter().chain(nested).collect()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.lists()
            .into_iter()
            .flat_map(|l| l.directory.iter())
            .flat_map(|d| d.files.iter())
            .filter_map(|f| text(&f.file_name).map(str::to_string))
            .collect()
    }

    /// True when the listing names at least one file.
    pub fn contains_file(&self) -> bool {
        !self.file_names().is_empty()
    }

    fn output_lines(&self) -> impl Iterator<Item = &str> {
        self.lists()
            .into_iter()
            .flat_map(|l| l.output.iter().flat_map(Leaf::all))
    }

    /// True when the CLI answered with its "No such file" notice.
    pub fn reports_missing(&self) -> bool {
        self.output_lines().any(is_missing_notice)
    }

    /// Core dump files. Output lines other than the "No such file" notice
    /// also count, the way the CLI reports globbed matches on some releases.
    pub fn core_dumps(&self) -> Vec<String> {
        let mut dumps = self.file_names();
        dumps.extend(
            self.output_lines()
                .filter(|line| !line.is_empty() && !is_missing_notice(line))
                .map(str::to_string),
        );
        dumps
    }
}

fn is_missing_notice(line: &str) -> bool {
    line.contains("No such file")
}

// ─── request system software add ──────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PackageReply {
    pub output: Option<Leaf>,
    #[serde(rename = "package-result")]
    pub package_result: Option<Leaf>,
    #[serde(rename = "multi-routing-engine-results")]
    pub multi: Option<Vec<MultiPackageResults>>,
}

#[derive(Debug, Deserialize)]
pub struct MultiPackageResults {
    #[serde(rename = "multi-routing-engine-item", default)]
    pub items: Vec<PackageReply>,
}

impl PackageReply {
    fn flatten(&self) -> Vec<&PackageReply> {
        let mut all = vec![self];
        for m in self.multi.iter().flatten() {
            for item in &m.items {
                all.extend(item.flatten());
            }
        }
        all
    }

    pub fn output_lines(&self) -> Vec<String> {
        self.flatten()
            .into_iter()
            .flat_map(|r| r.output.iter().flat_map(Leaf::all))
            .map(str::to_string)
            .collect()
    }

    /// Package result codes. Unparseable codes count as failures.
    pub fn result_codes(&self) -> Vec<i32> {
        self.flatten()
            .into_iter()
            .flat_map(|r| r.package_result.iter().flat_map(Leaf::all))
            .map(|code| code.parse::<i32>().unwrap_or(-1))
            .collect()
    }
}

// ─── show task replication ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReplicationReply {
    #[serde(rename = "task-replication-state", default)]
    pub state: Vec<TaskReplicationState>,
}

#[derive(Debug, Deserialize)]
pub struct TaskReplicationState {
    #[serde(rename = "task-protocol-replication-name", default)]
    pub names: Vec<LeafData>,
    #[serde(rename = "task-protocol-replication-state", default)]
    pub states: Vec<LeafData>,
}

impl ReplicationReply {
    /// Protocol names and states arrive as two parallel lists.
    pub fn to_map(&self) -> ReplicationMap {
        self.state
            .iter()
            .flat_map(|s| s.names.iter().zip(s.states.iter()))
            .map(|(name, state)| {
                (
                    name.data.trim().to_string(),
                    ReplicationState::parse(&state.data),
                )
            })
            .collect()
    }
}

// ─── show configuration protocols pim nonstop-routing ─────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PimConfigReply {
    pub configuration: Option<PimConfiguration>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PimConfiguration {
    pub protocols: Option<PimProtocols>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PimProtocols {
    pub pim: Option<PimStanza>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PimStanza {
    #[serde(rename = "nonstop-routing")]
    pub nonstop_routing: Option<serde_json::Value>,
}

impl PimConfigReply {
    pub fn nonstop_routing(&self) -> bool {
        self.configuration
            .as_ref()
            .and_then(|c| c.protocols.as_ref())
            .and_then(|p| p.pim.as_ref())
            .is_some_and(|pim| pim.nonstop_routing.is_some())
    }
}

// ─── show chassis network-services ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NetworkServicesReply {
    #[serde(rename = "network-services", default)]
    pub services: Vec<NetworkServices>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkServices {
    pub name: Option<Leaf>,
}

impl NetworkServicesReply {
    pub fn mode(&self) -> Option<&str> {
        self.services.iter().find_map(|s| text(&s.name))
    }
}

// ─── show chassis hardware ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HardwareReply {
    #[serde(rename = "chassis-inventory", default)]
    pub inventory: Vec<ChassisInventory>,
}

#[derive(Debug, Deserialize)]
pub struct ChassisInventory {
    #[serde(default)]
    pub chassis: Vec<Chassis>,
}

#[derive(Debug, Deserialize)]
pub struct Chassis {
    pub description: Option<Leaf>,
    #[serde(rename = "chassis-module", default)]
    pub modules: Vec<ChassisModule>,
}

#[derive(Debug, Deserialize)]
pub struct ChassisModule {
    pub name: Option<Leaf>,
    pub description: Option<Leaf>,
}

impl HardwareReply {
    /// Descriptions of every `FPC n` module.
    pub fn line_cards(&self) -> Vec<String> {
        self.inventory
            .iter()
            .flat_map(|i| i.chassis.iter())
            .flat_map(|c| c.modules.iter())
            .filter(|m| text(&m.name).is_some_and(|n| n.starts_with("FPC")))
            .filter_map(|m| text(&m.description).map(str::to_string))
            .collect()
    }
}
