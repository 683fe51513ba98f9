//! Routing-engine mastership changes on dual-RE devices.

use crate::config::TimingConfig;
use crate::confirm::Confirmer;
use crate::device::SessionHandle;
use crate::error::{Result, UpgradeError};
use crate::poller::AvailabilityPoller;
use crate::report::HealthWarning;
use crate::types::{DeviceFacts, ReSlot, ReplicationMap, ReplicationState};
use tracing::{info, warn};

pub struct RedundancySwitchController<'t> {
    timing: &'t TimingConfig,
    warnings: Vec<HealthWarning>,
}

impl<'t> RedundancySwitchController<'t> {
    pub fn new(timing: &'t TimingConfig) -> Self {
        Self {
            timing,
            warnings: Vec::new(),
        }
    }

    pub fn take_warnings(&mut self) -> Vec<HealthWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Hand mastership to the backup RE and reconnect to the new master.
    ///
    /// With `question` set the operator must agree first; a refusal aborts
    /// the run.
    pub fn switchover(
        &mut self,
        handle: &mut SessionHandle<'_>,
        confirmer: &mut dyn Confirmer,
        question: Option<&str>,
    ) -> Result<DeviceFacts> {
        let facts = handle.refresh_facts()?;
        if !facts.is_dual() {
            return Err(UpgradeError::NotRedundant("switchover"));
        }
        let backup = facts.backup().ok_or(UpgradeError::NoBackupRe)?;

        info!("Checking task replication...");
        let replication = handle.session()?.replication_state()?;
        self.note_unconverged(&replication);

        if let Some(question) = question {
            warn!("{}", "-".repeat(59));
            warn!("|  Switch to backup RE, THIS WILL BE SERVICE IMPACTING!!! |");
            warn!("{}", "-".repeat(59));
            if !confirmer.confirm(question)? {
                return Err(UpgradeError::Aborted("switchover declined".to_string()));
            }
        }

        info!("Performing switchover to {backup}...");
        handle.session()?.request_switchover()?;
        handle.close();

        let connector = handle.connector();
        let host = handle.host().to_string();
        AvailabilityPoller::new(self.timing.switchover())
            .await_recovery(&host, || connector.probe_reachable(&host));
        let facts = handle.reopen()?;
        if let Some(master) = facts.master() {
            info!("{master} is now master");
        }
        Ok(facts)
    }

    /// An empty map means nothing is replicated: nonstop routing is off.
    fn note_unconverged(&mut self, replication: &ReplicationMap) {
        if replication.is_empty() {
            warn!("Nonstop routing is not replicating any protocol");
            self.warnings.push(HealthWarning::NonstopRoutingDisabled);
            return;
        }
        for (protocol, state) in replication {
            if !state.is_converged() {
                warn!("Protocol {protocol} is {state}");
                self.warnings.push(HealthWarning::ReplicationNotConverged {
                    protocol: protocol.clone(),
                    state: state.to_string(),
                });
            }
        }
    }

    /// Block while any protocol is still replicating. There is no timeout.
    pub fn wait_for_replication(&mut self, handle: &mut SessionHandle<'_>) -> Result<ReplicationMap> {
        info!("Checking task replication...");
        let mut last_pending: Vec<String> = Vec::new();
        loop {
            let replication = handle.session()?.replication_state()?;
            let pending: Vec<String> = replication
                .iter()
                .filter(|(_, state)| **state == ReplicationState::InProgress)
                .map(|(protocol, _)| protocol.clone())
                .collect();
            if pending.is_empty() {
                return Ok(replication);
            }
            if pending != last_pending {
                for protocol in &pending {
                    warn!(
                        "Protocol {protocol} is InProgress...  Waiting {}s...",
                        self.timing.replication_poll().as_secs()
                    );
                }
                last_pending = pending;
            }
            std::thread::sleep(self.timing.replication_poll());
        }
    }

    /// Once replication has converged, make `preferred` master again.
    pub fn return_to_preferred_master(
        &mut self,
        handle: &mut SessionHandle<'_>,
        confirmer: &mut dyn Confirmer,
        preferred: ReSlot,
    ) -> Result<DeviceFacts> {
        let facts = handle.refresh_facts()?;
        if !facts.is_dual() {
            return Err(UpgradeError::NotRedundant("returning to the preferred master"));
        }

        let replication = self.wait_for_replication(handle)?;

        let facts = handle.refresh_facts()?;
        match facts.master() {
            Some(master) if master == preferred => {
                info!("{preferred} is already master");
                self.note_unconverged(&replication);
                Ok(facts)
            }
            master => {
                let question = format!(
                    "Task replication complete, switchover to {}?",
                    preferred.as_str().to_ascii_uppercase()
                );
                if !confirmer.confirm(&question)? {
                    let current = master.unwrap_or(preferred.peer());
                    warn!("Leaving {current} as master");
                    self.note_unconverged(&replication);
                    self.warnings
                        .push(HealthWarning::LeftOnNonPreferredMaster { master: current });
                    return Ok(facts);
                }
                info!("Performing final switchover to {preferred}...");
                self.switchover(handle, confirmer, None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use crate::device::Credentials;
    use crate::fake::{replication, Event, FakeDevice, Scripted};

    /// Says yes, noting how many replication snapshots were still queued.
    struct Watching {
        device: FakeDevice,
        queued_when_asked: Option<usize>,
    }

    impl Confirmer for Watching {
        fn confirm(&mut self, _question: &str) -> Result<bool> {
            self.queued_when_asked = Some(self.device.sim().replication.len());
            Ok(true)
        }

        fn select(&mut self, _question: &str, _choices: &[String]) -> Result<Option<usize>> {
            Ok(None)
        }

        fn is_interactive(&self) -> bool {
            false
        }
    }

    #[test]
    fn switchover_flips_mastership_and_reconnects() {
        let device = FakeDevice::dual("16.1R6");
        device.sim().down_probes = 2;
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut ctl = RedundancySwitchController::new(&timing);

        let facts = ctl
            .switchover(&mut handle, &mut AutoConfirm, Some("Continue with switchover?"))
            .unwrap();
        assert_eq!(facts.master(), Some(ReSlot::Re1));
        assert_eq!(facts.backup(), Some(ReSlot::Re0));
        assert_eq!(
            device.events(),
            vec![Event::Connect, Event::Switchover, Event::Close, Event::Connect]
        );
    }

    #[test]
    fn replication_is_read_before_the_operator_is_asked() {
        let device = FakeDevice::dual("16.1R6");
        {
            let mut sim = device.sim();
            sim.replication.push_back(replication(&[("BGP", "InProgress")]));
            sim.replication.push_back(replication(&[("BGP", "Complete")]));
        }
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut ctl = RedundancySwitchController::new(&timing);

        let mut operator = Watching {
            device: device.clone(),
            queued_when_asked: None,
        };
        ctl.switchover(&mut handle, &mut operator, Some("Continue with switchover?"))
            .unwrap();

        // The first snapshot was consumed before the question.
        assert_eq!(operator.queued_when_asked, Some(1));
        assert_eq!(
            ctl.take_warnings(),
            vec![HealthWarning::ReplicationNotConverged {
                protocol: "BGP".to_string(),
                state: "InProgress".to_string(),
            }]
        );
        assert!(device.events().contains(&Event::Switchover));
    }

    #[test]
    fn nonstop_routing_off_warns_but_still_switches() {
        let device = FakeDevice::dual("16.1R6");
        device.sim().replication.push_back(ReplicationMap::new());
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut ctl = RedundancySwitchController::new(&timing);

        let facts = ctl.switchover(&mut handle, &mut AutoConfirm, None).unwrap();
        assert_eq!(facts.master(), Some(ReSlot::Re1));
        assert_eq!(ctl.take_warnings(), vec![HealthWarning::NonstopRoutingDisabled]);
    }

    #[test]
    fn declined_switchover_still_reports_replication() {
        let device = FakeDevice::dual("16.1R6");
        device
            .sim()
            .replication
            .push_back(replication(&[("IS-IS", "NotStarted")]));
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut ctl = RedundancySwitchController::new(&timing);
        let mut operator = Scripted::answers(&[false]);
        ctl.switchover(&mut handle, &mut operator, Some("Continue with switchover?"))
            .unwrap_err();
        assert_eq!(ctl.take_warnings().len(), 1);
        assert!(!device.events().contains(&Event::Switchover));
    }

    #[test]
    fn single_re_cannot_switch() {
        let device = FakeDevice::single("16.1R6");
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let err = RedundancySwitchController::new(&timing)
            .switchover(&mut handle, &mut AutoConfirm, None)
            .unwrap_err();
        assert!(matches!(err, UpgradeError::NotRedundant(_)));
    }

    #[test]
    fn declined_switchover_aborts_without_side_effects() {
        let device = FakeDevice::dual("16.1R6");
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut operator = Scripted::answers(&[false]);
        let err = RedundancySwitchController::new(&timing)
            .switchover(&mut handle, &mut operator, Some("Continue with switchover?"))
            .unwrap_err();
        assert!(matches!(err, UpgradeError::Aborted(_)));
        assert!(!device.events().contains(&Event::Switchover));
    }

    #[test]
    fn waits_until_nothing_in_progress() {
        let device = FakeDevice::dual("16.1R6");
        {
            let mut sim = device.sim();
            sim.replication.push_back(replication(&[("BGP", "InProgress"), ("IS-IS", "Complete")]));
            sim.replication.push_back(replication(&[("BGP", "InProgress"), ("IS-IS", "Complete")]));
            sim.replication.push_back(replication(&[("BGP", "Complete"), ("IS-IS", "Complete")]));
        }
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let map = RedundancySwitchController::new(&timing)
            .wait_for_replication(&mut handle)
            .unwrap();
        assert!(map.values().all(|s| s.is_converged()));
        assert!(device.sim().replication.len() == 1);
    }

    #[test]
    fn returns_to_re0_after_replication() {
        let device = FakeDevice::dual("16.1R6");
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut ctl = RedundancySwitchController::new(&timing);
        ctl.switchover(&mut handle, &mut AutoConfirm, None).unwrap();
        assert_eq!(device.master(), ReSlot::Re1);

        let mut operator = Scripted::answers(&[true]);
        let facts = ctl
            .return_to_preferred_master(&mut handle, &mut operator, ReSlot::Re0)
            .unwrap();
        assert_eq!(facts.master(), Some(ReSlot::Re0));
        assert_eq!(
            operator.asked(),
            vec!["Task replication complete, switchover to RE0?".to_string()]
        );
    }

    #[test]
    fn already_on_preferred_master_does_nothing() {
        let device = FakeDevice::dual("16.1R6");
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut operator = Scripted::answers(&[]);
        RedundancySwitchController::new(&timing)
            .return_to_preferred_master(&mut handle, &mut operator, ReSlot::Re0)
            .unwrap();
        assert!(operator.asked().is_empty());
        assert!(!device.events().contains(&Event::Switchover));
    }

    #[test]
    fn declining_final_switchover_leaves_warning() {
        let device = FakeDevice::dual("16.1R6");
        let timing = TimingConfig::immediate();
        let mut handle = SessionHandle::open(&device, "r1", Credentials::default()).unwrap();
        let mut ctl = RedundancySwitchController::new(&timing);
        ctl.switchover(&mut handle, &mut AutoConfirm, None).unwrap();

        let mut operator = Scripted::answers(&[false]);
        let facts = ctl
            .return_to_preferred_master(&mut handle, &mut operator, ReSlot::Re0)
            .unwrap();
        assert_eq!(facts.master(), Some(ReSlot::Re1));
        assert_eq!(
            ctl.take_warnings(),
            vec![HealthWarning::LeftOnNonPreferredMaster { master: ReSlot::Re1 }]
        );
    }
}
