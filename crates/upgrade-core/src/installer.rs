//! Software installation on one target (the whole device or one RE).
//!
//! Each install walks `Idle -> Installing -> AwaitingReboot -> PostCheck ->
//! Done`, or drops to `Failed`. A non-zero package result is fatal; the
//! operator is offered a configuration restore before the error propagates.

use crate::config::TimingConfig;
use crate::confirm::Confirmer;
use crate::device::{InstallOptions, SessionHandle};
use crate::error::{Result, UpgradeError};
use crate::plan::{ImageDescriptor, ImageKind, ImagePlan};
use crate::poller::AvailabilityPoller;
use crate::report::{HealthWarning, UpgradeOutcome};
use crate::transaction::{CommitPolicy, ConfigChangeSet, ConfigTransactionManager};
use crate::types::ReSlot;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerState {
    Idle,
    Installing,
    AwaitingReboot,
    PostCheck,
    Done,
    Failed,
}

/// Selective patches install in place: no reboot and full validation.
pub fn install_options(kind: ImageKind, target: Option<ReSlot>, force: bool) -> InstallOptions {
    let full = kind != ImageKind::Patch;
    InstallOptions {
        reboot: full,
        no_validate: full,
        target,
        force,
    }
}

pub struct PackageInstaller<'t> {
    timing: &'t TimingConfig,
    force: bool,
    state: InstallerState,
    warnings: Vec<HealthWarning>,
}

impl<'t> PackageInstaller<'t> {
    pub fn new(timing: &'t TimingConfig, force: bool) -> Self {
        Self {
            timing,
            force,
            state: InstallerState::Idle,
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> InstallerState {
        self.state
    }

    pub fn take_warnings(&mut self) -> Vec<HealthWarning> {
        std::mem::take(&mut self.warnings)
    }

    fn transition(&mut self, next: InstallerState) {
        debug!("installer: {:?} -> {next:?}", self.state);
        self.state = next;
    }

    /// Install every image of `plan` on `target`, in plan order.
    pub fn install_sequence(
        &mut self,
        handle: &mut SessionHandle<'_>,
        plan: &ImagePlan,
        target: Option<ReSlot>,
        restoration: &ConfigChangeSet,
        confirmer: &mut dyn Confirmer,
    ) -> Result<Vec<UpgradeOutcome>> {
        let mut outcomes = Vec::new();
        for image in plan.install_sequence() {
            outcomes.push(self.install(handle, image, target, restoration, confirmer)?);
        }
        Ok(outcomes)
    }

    pub fn install(
        &mut self,
        handle: &mut SessionHandle<'_>,
        image: &ImageDescriptor,
        target: Option<ReSlot>,
        restoration: &ConfigChangeSet,
        confirmer: &mut dyn Confirmer,
    ) -> Result<UpgradeOutcome> {
        let start = Instant::now();
        let options = install_options(image.kind, target, self.force);
        let label = target.map(ReSlot::as_str).unwrap_or("device");

        self.transition(InstallerState::Installing);
        info!("Installing {} on {label}...", image.destination);
        let result = handle
            .session()?
            .install_package(&image.destination, &options)?;
        for line in &result.output {
            info!("{line}");
        }

        if !result.succeeded() {
            self.transition(InstallerState::Failed);
            let codes = result.failure_codes();
            error!("Encountered issues with software add, package results {codes:?}");
            self.offer_restore(handle, restoration, confirmer);
            return Err(UpgradeError::InstallFailure {
                target: label.to_string(),
                codes,
            });
        }

        if options.reboot {
            self.transition(InstallerState::AwaitingReboot);
            match target {
                None => self.await_device(handle)?,
                Some(re) => self.await_routing_engine(handle, re)?,
            }
        }

        self.transition(InstallerState::PostCheck);
        info!("Checking for core dumps...");
        let core_dumps = handle.session()?.core_dumps(target)?;
        if !core_dumps.is_empty() {
            warn!("Found Core Dumps! Please investigate.");
            for file in &core_dumps {
                warn!("  {file}");
            }
            self.warnings.push(HealthWarning::CoreDumps {
                target: label.to_string(),
                files: core_dumps.clone(),
            });
            if !confirmer.confirm("Continue with upgrade?")? {
                self.transition(InstallerState::Failed);
                return Err(UpgradeError::Aborted(format!(
                    "core dumps found on {label} after installing {}",
                    image.filename
                )));
            }
        }

        let version_after = handle.session()?.software_info(target)?.version;
        info!("{label} software version = {version_after}");

        self.transition(InstallerState::Done);
        Ok(UpgradeOutcome {
            target,
            image: image.filename.clone(),
            kind: image.kind,
            success: true,
            elapsed_secs: start.elapsed().as_secs(),
            version_after: Some(version_after),
            core_dumps,
        })
    }

    fn offer_restore(
        &self,
        handle: &mut SessionHandle<'_>,
        restoration: &ConfigChangeSet,
        confirmer: &mut dyn Confirmer,
    ) {
        match confirmer.confirm("Restore configuration before exiting?") {
            Ok(true) => {}
            Ok(false) => {
                warn!("Leaving pre-upgrade configuration in place");
                return;
            }
            Err(e) => {
                warn!("No answer to restore prompt: {e}");
                return;
            }
        }
        let session = match handle.session() {
            Ok(s) => s,
            Err(e) => {
                error!("Cannot restore configuration: {e}");
                return;
            }
        };
        if let Err(e) = ConfigTransactionManager::new(confirmer).apply(
            session,
            restoration,
            CommitPolicy::Confirm,
        ) {
            error!("Configuration restore failed: {e}");
        }
    }

    /// Whole-device reboot: the session is gone until the device answers
    /// again.
    fn await_device(&self, handle: &mut SessionHandle<'_>) -> Result<()> {
        handle.close();
        let connector = handle.connector();
        let host = handle.host().to_string();
        AvailabilityPoller::new(self.timing.reboot())
            .await_recovery(&host, || connector.probe_reachable(&host));
        handle.reopen()?;
        Ok(())
    }

    /// One RE reboots while the master keeps the session alive. Wait for it
    /// to rejoin, let it settle, then reconnect.
    fn await_routing_engine(&mut self, handle: &mut SessionHandle<'_>, re: ReSlot) -> Result<()> {
        let mut probe_error = None;
        AvailabilityPoller::new(self.timing.reboot()).await_recovery(re.as_str(), || {
            match handle.refresh_facts() {
                Ok(facts) => facts
                    .re(re)
                    .map(|r| r.mastership.is_online())
                    .unwrap_or(false),
                Err(e) => {
                    probe_error = Some(e);
                    true
                }
            }
        });
        if let Some(e) = probe_error {
            return Err(e);
        }

        std::thread::sleep(self.timing.settle());
        let facts = handle.reopen()?;
        if let Some(engine) = facts.re(re) {
            if !engine.is_healthy() {
                warn!("{re} state  = {}", engine.mastership);
                warn!("{re} status = {}", engine.status);
                self.warnings.push(HealthWarning::ReNotHealthy {
                    re,
                    status: engine.status.clone(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
