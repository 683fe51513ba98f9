//! One upgrade run against one device.
//!
//! ```text
//! local image check -> connect -> facts -> architecture -> plan
//!   -> stage images -> snapshot -> drain traffic
//!   -> single RE:  install sequence (device reboots)
//!      dual RE:    install on backup -> switchover -> install on new backup
//!                  -> final image still on its peer
//!   -> network-services remediation -> version parity -> restore traffic
//!   -> return to preferred master -> report
//! ```
//!
//! Every step that can take the device out of service sits behind a
//! [`Confirmer`] checkpoint. Any error closes the session before it
//! propagates; nothing is retried.

pub mod state;

pub use state::{RunFlags, RunState};

use crate::config::Config;
use crate::confirm::Confirmer;
use crate::device::{Connector, Credentials, FileTransfer, RebootScope, SessionHandle};
use crate::error::{Result, UpgradeError};
use crate::installer::PackageInstaller;
use crate::plan::{detect_architecture, ImagePlan};
use crate::poller::AvailabilityPoller;
use crate::provision::{verify_local_images, ImageProvisioningService};
use crate::report::{HealthWarning, RunReport};
use crate::switchover::RedundancySwitchController;
use crate::transaction::{
    network_mode_change_set, post_upgrade_change_set, pre_upgrade_change_set, Applied,
    CommitPolicy, ConfigChangeSet, ConfigTransactionManager,
};
use crate::types::DeviceFacts;
use chrono::Utc;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

pub struct UpgradeOrchestrator<'a> {
    config: &'a Config,
    connector: &'a dyn Connector,
    transfer: &'a dyn FileTransfer,
    confirmer: &'a mut dyn Confirmer,
    flags: RunFlags,
    state: RunState,
}

impl<'a> UpgradeOrchestrator<'a> {
    pub fn new(
        config: &'a Config,
        connector: &'a dyn Connector,
        transfer: &'a dyn FileTransfer,
        confirmer: &'a mut dyn Confirmer,
        flags: RunFlags,
    ) -> Self {
        Self {
            config,
            connector,
            transfer,
            confirmer,
            flags,
            state: RunState::default(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn run(&mut self, host: &str) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("upgrade", host = %host, run_id = %run_id);
        let _guard = span.enter();

        verify_local_images(&self.config.images)?;

        let credentials = Credentials {
            username: self.config.ssh.username.clone(),
            identity_file: self.config.ssh.identity_file.clone(),
        };
        let mut handle = SessionHandle::open(self.connector, host, credentials)?;
        let result = self.drive(&mut handle);
        handle.close();
        let final_facts = result?;

        Ok(RunReport {
            run_id,
            host: host.to_string(),
            started_at,
            finished_at: Utc::now(),
            dry_run: self.flags.dry_run,
            plan: self.state.plan().cloned(),
            missing_images: self.state.missing_images.clone(),
            outcomes: self.state.outcomes.clone(),
            final_facts,
            warnings: self.state.warnings.clone(),
        })
    }

    fn drive(&mut self, handle: &mut SessionHandle<'_>) -> Result<Option<DeviceFacts>> {
        let config = self.config;

        let facts = handle.refresh_facts()?;
        self.report_facts(&facts);
        if facts.is_dual() {
            if facts.backup().is_none() {
                error!("Trouble finding the backup RE...");
                return Err(UpgradeError::NoBackupRe);
            }
        } else {
            warn!("Single RE device, the upgrade will be service impacting");
            self.checkpoint("Continue with the upgrade?")?;
        }

        let software = handle.session()?.software_info(None)?;
        let architecture = detect_architecture(
            &config.images,
            config.architecture,
            &facts,
            &software,
            &mut *self.confirmer,
        )?;
        let plan = self
            .state
            .resolve_plan(&config.images, architecture, &facts.version)?
            .clone();
        log_plan(&plan);

        let staging = ImageProvisioningService::new(self.transfer, self.flags.dry_run)
            .ensure_staged(&plan, &facts, handle)?;
        self.state.missing_images = staging.missing.iter().map(|p| p.to_string()).collect();

        if !self.flags.dry_run {
            info!("Requesting system snapshot...");
            handle.session()?.request_snapshot(None)?;
        }

        // Drain traffic
        let pre = pre_upgrade_change_set(
            config,
            &facts,
            handle.session()?,
            &mut *self.confirmer,
            &mut self.state.restoration,
        )?;
        let policy = if self.flags.dry_run {
            CommitPolicy::PreviewOnly
        } else {
            CommitPolicy::Confirm
        };
        let applied =
            ConfigTransactionManager::new(&mut *self.confirmer).apply(handle.session()?, &pre, policy)?;

        if self.flags.dry_run {
            info!(
                "Dry run complete: {} image(s) missing on the device, {} install(s) planned",
                self.state.missing_images.len(),
                plan.install_sequence().len() * if facts.is_dual() { 2 } else { 1 }
            );
            return Ok(Some(facts));
        }
        if applied == Applied::NoChanges {
            self.checkpoint("No pre-upgrade configuration changes were made. Continue?")?;
        }

        let restoration = post_upgrade_change_set(config, &self.state.restoration);
        let mut installer = PackageInstaller::new(&config.timing, self.flags.force);

        if facts.is_dual() {
            let mut switch = RedundancySwitchController::new(&config.timing);
            self.upgrade_backup(handle, &mut installer, &plan, &restoration)?;
            let switched = switch.switchover(
                handle,
                &mut *self.confirmer,
                Some("Continue with switchover?"),
            );
            self.state.warnings.extend(switch.take_warnings());
            switched?;
            self.upgrade_backup(handle, &mut installer, &plan, &restoration)?;

            // The RE just upgraded is backup again; its peer must still hold
            // the final image.
            let facts = handle.refresh_facts()?;
            if let Some(upgraded) = facts.backup() {
                ImageProvisioningService::new(self.transfer, false).verify_on(
                    &plan,
                    upgraded.peer(),
                    upgraded,
                    handle,
                )?;
            }
        } else {
            self.ready_checkpoint(handle, "Continue with software add / reboot?", &restoration)?;
            let result = installer.install_sequence(
                handle,
                &plan,
                None,
                &restoration,
                &mut *self.confirmer,
            );
            self.state.warnings.extend(installer.take_warnings());
            self.state.outcomes.extend(result?);
        }

        self.remediate_network_mode(handle)?;
        self.restore_traffic(handle, &restoration)?;

        if handle.last_facts().is_some_and(DeviceFacts::is_dual) {
            let mut switch = RedundancySwitchController::new(&config.timing);
            let returned = switch.return_to_preferred_master(
                handle,
                &mut *self.confirmer,
                config.redundancy.preferred_master,
            );
            self.state.warnings.extend(switch.take_warnings());
            returned?;
        }

        let facts = handle.refresh_facts()?;
        self.report_facts(&facts);
        info!("Upgrade complete");
        Ok(Some(facts))
    }

    /// Install the plan on whichever RE is currently backup.
    fn upgrade_backup(
        &mut self,
        handle: &mut SessionHandle<'_>,
        installer: &mut PackageInstaller<'_>,
        plan: &ImagePlan,
        restoration: &ConfigChangeSet,
    ) -> Result<()> {
        let facts = handle.refresh_facts()?;
        let Some(backup) = facts.backup() else {
            error!("Trouble finding the backup RE...");
            return Err(UpgradeError::NoBackupRe);
        };
        self.ready_checkpoint(
            handle,
            &format!("Continue with software add / reboot on backup RE ({backup})?"),
            restoration,
        )?;
        let result = installer.install_sequence(
            handle,
            plan,
            Some(backup),
            restoration,
            &mut *self.confirmer,
        );
        self.state.warnings.extend(installer.take_warnings());
        self.state.outcomes.extend(result?);
        Ok(())
    }

    fn checkpoint(&mut self, question: &str) -> Result<()> {
        if self.confirmer.confirm(question)? {
            Ok(())
        } else {
            warn!("Exiting...");
            Err(UpgradeError::Aborted(question.to_string()))
        }
    }

    /// Last stop before a software add. Declining offers to restore the
    /// drained configuration first.
    fn ready_checkpoint(
        &mut self,
        handle: &mut SessionHandle<'_>,
        question: &str,
        restoration: &ConfigChangeSet,
    ) -> Result<()> {
        if self.confirmer.confirm(question)? {
            return Ok(());
        }
        if self
            .confirmer
            .confirm("Restore config changes before exiting?")?
        {
            ConfigTransactionManager::new(&mut *self.confirmer).apply(
                handle.session()?,
                restoration,
                CommitPolicy::Confirm,
            )?;
        }
        Err(UpgradeError::Aborted("software add declined".to_string()))
    }

    /// Apply a deferred network-services mode change. The new mode only
    /// takes effect after both REs reboot together.
    fn remediate_network_mode(&mut self, handle: &mut SessionHandle<'_>) -> Result<()> {
        if !self.state.restoration.must_set_enhanced_ip {
            return Ok(());
        }
        let config = self.config;
        let mode = &config.enhanced_ip.required_mode;

        info!("Setting chassis network-services {mode}...");
        let change = network_mode_change_set(config);
        if let Err(e) = ConfigTransactionManager::new(&mut *self.confirmer).apply(
            handle.session()?,
            &change,
            CommitPolicy::Confirm,
        ) {
            warn!("Error committing network-services {mode}: {e}");
            warn!("Device will not be rebooted, please check the network-services configuration");
            self.state.warnings.push(HealthWarning::NetworkModeNotChanged {
                reason: e.to_string(),
            });
            return Ok(());
        }

        warn!("{}", "-".repeat(59));
        warn!("| SERVICE IMPACTING REBOOT WARNING                        |");
        warn!("{}", "-".repeat(59));
        if !self
            .confirmer
            .confirm(&format!("Reboot both REs now to set network-services mode {mode}?"))?
        {
            warn!("Skipping reboot of both REs for network-services mode...");
            self.state.warnings.push(HealthWarning::NetworkModeNotChanged {
                reason: "reboot declined".to_string(),
            });
            return Ok(());
        }

        info!("Rebooting {}... Please wait...", handle.host());
        handle
            .session()?
            .request_reboot(RebootScope::BothRoutingEngines)?;
        handle.close();
        let connector = handle.connector();
        let host = handle.host().to_string();
        AvailabilityPoller::new(config.timing.reboot())
            .await_recovery(&host, || connector.probe_reachable(&host));
        handle.reopen()?;
        Ok(())
    }

    /// Version parity gate, then the restoration change set.
    fn restore_traffic(
        &mut self,
        handle: &mut SessionHandle<'_>,
        restoration: &ConfigChangeSet,
    ) -> Result<()> {
        let facts = handle.refresh_facts()?;
        if facts.is_dual() {
            if let Some((re0, re1)) = facts.version_mismatch() {
                error!("Versions do not match on both routing engines");
                error!("Exiting, please check device status manually.");
                return Err(UpgradeError::VersionMismatch { re0, re1 });
            }
            info!("Version matches on both routing engines.");
        }

        info!("Restoring configuration...");
        ConfigTransactionManager::new(&mut *self.confirmer).apply(
            handle.session()?,
            restoration,
            CommitPolicy::Confirm,
        )?;
        Ok(())
    }

    fn report_facts(&mut self, facts: &DeviceFacts) {
        info!("{}", "-".repeat(60));
        info!("Host:    {}", facts.host);
        info!("Model:   {}", facts.model);
        info!("Version: {}", facts.version);
        for re in &facts.routing_engines {
            info!(
                "{}: {:<8} {:<10} {:<20} {}",
                re.slot.as_str().to_ascii_uppercase(),
                re.mastership.as_str(),
                re.status,
                re.model,
                re.version.as_deref().unwrap_or("-")
            );
            if !re.is_healthy() {
                warn!("{} status is {}", re.slot, re.status);
                self.state.warnings.push(HealthWarning::ReNotHealthy {
                    re: re.slot,
                    status: re.status.clone(),
                });
            }
        }
        info!("{}", "-".repeat(60));
    }
}

fn log_plan(plan: &ImagePlan) {
    info!(
        "Upgrade path from {} ({}):",
        plan.running_version, plan.architecture
    );
    for image in plan.install_sequence() {
        info!("  {:<12} {}", image.kind.as_str(), image.destination);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
