//! In-memory device used by the unit tests. Records every side effect as an
//! [`Event`] so tests can assert on ordering.

use crate::confirm::Confirmer;
use crate::device::{
    ConfigContext, Connector, Credentials, FileTransfer, InstallOptions, InstallResult, Presence,
    RebootScope, RemotePath, Session,
};
use crate::error::{Result, UpgradeError};
use crate::plan::ImagePlan;
use crate::types::{
    Architecture, DeviceFacts, Mastership, ReSlot, ReplicationMap, ReplicationState,
    RoutingEngine, SoftwareInfo,
};
use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect,
    Close,
    Install {
        target: Option<ReSlot>,
        path: String,
        reboot: bool,
        no_validate: bool,
    },
    Switchover,
    Reboot,
    Snapshot,
    Load(String),
    Commit,
    Rollback(u32),
    LocalCopy(String),
    PeerCopy(String),
}

pub struct DeviceSim {
    pub connect_fails: bool,
    pub peer_copy_fails: bool,
    pub local_copy_fails: bool,
    pub model: String,
    pub routing_engines: Vec<RoutingEngine>,
    pub architecture: Option<Architecture>,
    files: HashSet<(ReSlot, String)>,
    pub pim_nsr: bool,
    pub network_mode: String,
    pub line_cards: Vec<String>,
    /// Package result codes per install, consumed in order. Defaults to `[0]`.
    pub install_codes: VecDeque<Vec<i32>>,
    /// Version a package filename installs.
    pub image_versions: HashMap<String, String>,
    /// RE whose version never changes, whatever is installed.
    pub frozen: Option<ReSlot>,
    /// File an RE loses when a package is installed on its peer.
    pub drop_on_peer_install: Option<(ReSlot, String)>,
    pub core_dumps: Vec<String>,
    /// Replication snapshots, consumed in order; the last one sticks. With
    /// none queued, BGP reports `Complete`.
    pub replication: VecDeque<ReplicationMap>,
    pub committed: Vec<String>,
    candidate: Vec<String>,
    pub commit_error: Option<String>,
    pub bad_statement: Option<String>,
    /// Failed reachability probes after each disruptive step.
    pub down_probes: u32,
    pending_down: u32,
    /// Facts queries during which a rebooting RE still reports itself offline.
    pub boot_polls: u32,
    rebooting: Option<(ReSlot, u32)>,
    events: Vec<Event>,
}

impl DeviceSim {
    fn master(&self) -> ReSlot {
        self.routing_engines
            .iter()
            .find(|re| re.mastership == Mastership::Master)
            .map(|re| re.slot)
            .unwrap_or(ReSlot::Re0)
    }

    fn slot(&self, re: Option<ReSlot>) -> ReSlot {
        re.unwrap_or_else(|| self.master())
    }

    fn re_mut(&mut self, slot: ReSlot) -> Option<&mut RoutingEngine> {
        self.routing_engines.iter_mut().find(|re| re.slot == slot)
    }

    fn version_of(&self, slot: ReSlot) -> String {
        self.routing_engines
            .iter()
            .find(|re| re.slot == slot)
            .and_then(|re| re.version.clone())
            .unwrap_or_default()
    }

    fn record(&mut self, event: Event) {
        self.events.push(event);
    }
}

fn routing_engine(slot: ReSlot, mastership: Mastership, model: &str, version: &str) -> RoutingEngine {
    RoutingEngine {
        slot,
        mastership,
        status: "OK".to_string(),
        model: model.to_string(),
        version: Some(version.to_string()),
    }
}

pub fn single_facts(version: &str) -> DeviceFacts {
    DeviceFacts {
        host: "r1".to_string(),
        model: "MX480".to_string(),
        version: version.to_string(),
        routing_engines: vec![routing_engine(
            ReSlot::Re0,
            Mastership::Master,
            "RE-S-2000-4096",
            version,
        )],
    }
}

pub fn dual_facts(version: &str) -> DeviceFacts {
    DeviceFacts {
        host: "r1".to_string(),
        model: "MX960".to_string(),
        version: version.to_string(),
        routing_engines: vec![
            routing_engine(ReSlot::Re0, Mastership::Master, "RE-S-1800x4-16G", version),
            routing_engine(ReSlot::Re1, Mastership::Backup, "RE-S-1800x4-16G", version),
        ],
    }
}

// ---------------------------------------------------------------------------
// FakeDevice
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FakeDevice {
    sim: Rc<RefCell<DeviceSim>>,
}

impl FakeDevice {
    fn from_facts(facts: DeviceFacts) -> Self {
        let sim = DeviceSim {
            connect_fails: false,
            peer_copy_fails: false,
            local_copy_fails: false,
            model: facts.model,
            routing_engines: facts.routing_engines,
            architecture: Some(Architecture::Bit64),
            files: HashSet::new(),
            pim_nsr: false,
            network_mode: "Enhanced-IP".to_string(),
            line_cards: vec!["MPC7E 3D 40XGE".to_string()],
            install_codes: VecDeque::new(),
            image_versions: HashMap::new(),
            frozen: None,
            drop_on_peer_install: None,
            core_dumps: Vec::new(),
            replication: VecDeque::new(),
            committed: Vec::new(),
            candidate: Vec::new(),
            commit_error: None,
            bad_statement: None,
            down_probes: 1,
            pending_down: 0,
            boot_polls: 1,
            rebooting: None,
            events: Vec::new(),
        };
        Self {
            sim: Rc::new(RefCell::new(sim)),
        }
    }

    pub fn single(version: &str) -> Self {
        Self::from_facts(single_facts(version))
    }

    pub fn dual(version: &str) -> Self {
        Self::from_facts(dual_facts(version))
    }

    pub fn sim(&self) -> RefMut<'_, DeviceSim> {
        self.sim.borrow_mut()
    }

    pub fn events(&self) -> Vec<Event> {
        self.sim.borrow().events.clone()
    }

    /// Place every image of `plan` on both REs.
    pub fn stage_everywhere(&self, plan: &ImagePlan) {
        let mut sim = self.sim();
        for image in plan.install_sequence() {
            for re in ReSlot::all() {
                sim.files.insert((*re, image.destination.clone()));
            }
        }
    }

    /// Installing `filename` moves the target RE to `version`.
    pub fn installs_as(&self, filename: &str, version: &str) {
        self.sim()
            .image_versions
            .insert(filename.to_string(), version.to_string());
    }

    pub fn master(&self) -> ReSlot {
        self.sim.borrow().master()
    }

    pub fn version(&self, re: ReSlot) -> String {
        self.sim.borrow().version_of(re)
    }

    pub fn has_file(&self, re: ReSlot, path: &str) -> bool {
        self.sim.borrow().files.contains(&(re, path.to_string()))
    }
}

impl Connector for FakeDevice {
    fn connect(&self, host: &str, _credentials: &Credentials) -> Result<Box<dyn Session>> {
        let mut sim = self.sim();
        if sim.connect_fails {
            return Err(UpgradeError::Connection {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        sim.record(Event::Connect);
        Ok(Box::new(FakeSession {
            sim: Rc::clone(&self.sim),
            host: host.to_string(),
        }))
    }

    fn probe_reachable(&self, _host: &str) -> bool {
        let mut sim = self.sim();
        if sim.pending_down > 0 {
            sim.pending_down -= 1;
            false
        } else {
            true
        }
    }
}

impl FileTransfer for FakeDevice {
    fn copy_local_to_device(&self, _source: &Path, _host: &str, destination: &RemotePath) -> Result<()> {
        let mut sim = self.sim();
        sim.record(Event::LocalCopy(destination.path.clone()));
        if sim.local_copy_fails {
            return Err(UpgradeError::Device("scp: connection closed".to_string()));
        }
        let slot = sim.slot(destination.re);
        sim.files.insert((slot, destination.path.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeSession
// ---------------------------------------------------------------------------

struct FakeSession {
    sim: Rc<RefCell<DeviceSim>>,
    host: String,
}

impl FakeSession {
    fn sim(&self) -> RefMut<'_, DeviceSim> {
        self.sim.borrow_mut()
    }
}

impl Session for FakeSession {
    fn facts(&mut self) -> Result<DeviceFacts> {
        let mut sim = self.sim();
        if let Some((slot, remaining)) = sim.rebooting {
            if remaining > 0 {
                sim.rebooting = Some((slot, remaining - 1));
                if let Some(re) = sim.re_mut(slot) {
                    re.mastership = Mastership::Unknown;
                }
            } else {
                sim.rebooting = None;
                if let Some(re) = sim.re_mut(slot) {
                    re.mastership = Mastership::Backup;
                }
            }
        }
        let master = sim.master();
        Ok(DeviceFacts {
            host: self.host.clone(),
            model: sim.model.clone(),
            version: sim.version_of(master),
            routing_engines: sim.routing_engines.clone(),
        })
    }

    fn list_file(&mut self, path: &RemotePath) -> Result<Presence> {
        let sim = self.sim();
        let slot = sim.slot(path.re);
        Ok(if sim.files.contains(&(slot, path.path.clone())) {
            Presence::Present
        } else {
            Presence::Absent
        })
    }

    fn file_copy(&mut self, _source: &RemotePath, destination: &RemotePath) -> Result<()> {
        let mut sim = self.sim();
        sim.record(Event::PeerCopy(destination.to_string()));
        if sim.peer_copy_fails {
            return Err(UpgradeError::Device("error: could not copy file".to_string()));
        }
        let slot = sim.slot(destination.re);
        sim.files.insert((slot, destination.path.clone()));
        Ok(())
    }

    fn install_package(&mut self, path: &str, options: &InstallOptions) -> Result<InstallResult> {
        let mut sim = self.sim();
        sim.record(Event::Install {
            target: options.target,
            path: path.to_string(),
            reboot: options.reboot,
            no_validate: options.no_validate,
        });
        let codes = sim.install_codes.pop_front().unwrap_or_else(|| vec![0]);
        let result = InstallResult {
            output: vec![format!("Installing package '{path}' ...")],
            package_results: codes,
        };
        if !result.succeeded() {
            return Ok(result);
        }

        let slot = sim.slot(options.target);
        if let Some((re, lost)) = sim.drop_on_peer_install.take() {
            if re == slot.peer() {
                sim.files.remove(&(re, lost));
            } else {
                sim.drop_on_peer_install = Some((re, lost));
            }
        }
        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        let version = sim.image_versions.get(&filename).cloned();
        if let Some(version) = version.filter(|_| sim.frozen != Some(slot)) {
            if let Some(re) = sim.re_mut(slot) {
                re.version = Some(version);
            }
        }
        if options.reboot {
            match options.target {
                Some(re) => {
                    let polls = sim.boot_polls;
                    sim.rebooting = Some((re, polls));
                }
                None => sim.pending_down = sim.down_probes,
            }
        }
        Ok(result)
    }

    fn request_snapshot(&mut self, _target: Option<ReSlot>) -> Result<()> {
        self.sim().record(Event::Snapshot);
        Ok(())
    }

    fn request_reboot(&mut self, _scope: RebootScope) -> Result<()> {
        let mut sim = self.sim();
        sim.record(Event::Reboot);
        sim.pending_down = sim.down_probes;
        Ok(())
    }

    fn request_switchover(&mut self) -> Result<()> {
        let mut sim = self.sim();
        sim.record(Event::Switchover);
        for re in sim.routing_engines.iter_mut() {
            re.mastership = match re.mastership {
                Mastership::Master => Mastership::Backup,
                Mastership::Backup => Mastership::Master,
                other => other,
            };
        }
        sim.pending_down = sim.down_probes;
        Ok(())
    }

    fn open_config(&mut self) -> Result<Box<dyn ConfigContext + '_>> {
        Ok(Box::new(FakeConfig {
            sim: Rc::clone(&self.sim),
        }))
    }

    fn core_dumps(&mut self, _target: Option<ReSlot>) -> Result<Vec<String>> {
        Ok(self.sim().core_dumps.clone())
    }

    fn software_info(&mut self, target: Option<ReSlot>) -> Result<SoftwareInfo> {
        let sim = self.sim();
        let slot = sim.slot(target);
        Ok(SoftwareInfo {
            version: sim.version_of(slot),
            architecture: sim.architecture,
        })
    }

    fn replication_state(&mut self) -> Result<ReplicationMap> {
        let mut sim = self.sim();
        let map = if sim.replication.len() > 1 {
            sim.replication.pop_front().unwrap_or_default()
        } else {
            sim.replication
                .front()
                .cloned()
                .unwrap_or_else(|| replication(&[("BGP", "Complete")]))
        };
        Ok(map)
    }

    fn pim_nonstop_routing_configured(&mut self) -> Result<bool> {
        Ok(self.sim().pim_nsr)
    }

    fn network_services_mode(&mut self) -> Result<String> {
        Ok(self.sim().network_mode.clone())
    }

    fn line_cards(&mut self) -> Result<Vec<String>> {
        Ok(self.sim().line_cards.clone())
    }

    fn close(self: Box<Self>) {
        self.sim().record(Event::Close);
    }
}

struct FakeConfig {
    sim: Rc<RefCell<DeviceSim>>,
}

impl ConfigContext for FakeConfig {
    fn load(&mut self, statement: &str) -> Result<Vec<String>> {
        let mut sim = self.sim.borrow_mut();
        sim.record(Event::Load(statement.to_string()));
        if sim.bad_statement.as_deref() == Some(statement) {
            return Err(UpgradeError::Device(format!("syntax error: {statement}")));
        }
        sim.candidate.push(statement.to_string());
        Ok(Vec::new())
    }

    fn diff(&mut self) -> Result<Option<String>> {
        let sim = self.sim.borrow();
        let lines: Vec<String> = sim
            .candidate
            .iter()
            .filter(|s| !sim.committed.contains(*s))
            .map(|s| format!("+ {s}"))
            .collect();
        Ok((!lines.is_empty()).then(|| lines.join("\n")))
    }

    fn commit(&mut self) -> Result<()> {
        let mut sim = self.sim.borrow_mut();
        sim.record(Event::Commit);
        if let Some(msg) = sim.commit_error.clone() {
            return Err(UpgradeError::Device(msg));
        }
        let candidate = std::mem::take(&mut sim.candidate);
        sim.committed.extend(candidate);
        Ok(())
    }

    fn rollback(&mut self, id: u32) -> Result<()> {
        let mut sim = self.sim.borrow_mut();
        sim.record(Event::Rollback(id));
        sim.candidate.clear();
        Ok(())
    }
}

impl Drop for FakeConfig {
    fn drop(&mut self) {
        self.sim.borrow_mut().candidate.clear();
    }
}

/// Builds a replication map from `(protocol, state)` pairs.
pub fn replication(pairs: &[(&str, &str)]) -> ReplicationMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), ReplicationState::parse(v)))
        .collect()
}

// ---------------------------------------------------------------------------
// Scripted confirmer
// ---------------------------------------------------------------------------

/// Answers from a script. Once the script runs out it either declines the
/// questions matching `decline` and accepts the rest, or fails like a closed
/// prompt.
#[derive(Default)]
pub struct Scripted {
    answers: VecDeque<bool>,
    decline: Option<String>,
    selection: Option<usize>,
    asked: Vec<String>,
}

impl Scripted {
    pub fn answers(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn selecting(index: usize) -> Self {
        Self {
            selection: Some(index),
            ..Self::default()
        }
    }

    pub fn declining(fragment: &str) -> Self {
        Self {
            decline: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.clone()
    }
}

impl Confirmer for Scripted {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        self.asked.push(question.to_string());
        if let Some(answer) = self.answers.pop_front() {
            return Ok(answer);
        }
        match &self.decline {
            Some(fragment) => Ok(!question.contains(fragment.as_str())),
            None => Err(UpgradeError::Prompt),
        }
    }

    fn select(&mut self, question: &str, choices: &[String]) -> Result<Option<usize>> {
        self.asked.push(question.to_string());
        Ok(self.selection.filter(|i| *i < choices.len()))
    }

    fn is_interactive(&self) -> bool {
        true
    }
}
