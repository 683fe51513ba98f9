//! Configuration transactions and the pre/post-upgrade change sets.
//!
//! A transaction ends either fully committed or fully rolled back. A commit
//! rejected by the device leaves the previously committed configuration in
//! place, so no corrective rollback is issued for it.

use crate::config::Config;
use crate::confirm::Confirmer;
use crate::device::Session;
use crate::error::{Result, UpgradeError};
use crate::types::DeviceFacts;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub const PIM_NSR_DEACTIVATE: &str = "deactivate protocols pim nonstop-routing";
pub const PIM_NSR_ACTIVATE: &str = "activate protocols pim nonstop-routing";

// ---------------------------------------------------------------------------
// ConfigChangeSet / RestorationFlags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigChangeSet {
    pub statements: Vec<String>,
}

impl ConfigChangeSet {
    pub fn new(statements: Vec<String>) -> Self {
        Self { statements }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    fn push_once(&mut self, statement: &str) {
        if !self.statements.iter().any(|s| s.trim() == statement) {
            self.statements.push(statement.to_string());
        }
    }
}

/// Decisions taken while draining traffic that the restoration has to undo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationFlags {
    /// PIM nonstop-routing was deactivated and must be re-activated.
    pub must_restore_pim: bool,
    /// The network-services mode change was deferred to its own reboot.
    pub must_set_enhanced_ip: bool,
}

/// Build the traffic-drain change set. Probes PIM nonstop-routing and, on
/// platforms that support it, the network-services mode.
pub fn pre_upgrade_change_set(
    config: &Config,
    facts: &DeviceFacts,
    session: &mut dyn Session,
    confirmer: &mut dyn Confirmer,
    flags: &mut RestorationFlags,
) -> Result<ConfigChangeSet> {
    let mut set = ConfigChangeSet::new(config.pre_upgrade.clone());
    let eip = &config.enhanced_ip;

    if eip.applies_to(&facts.family()) {
        let mode = session.network_services_mode()?;
        if mode != eip.required_mode {
            warn!("Network Services mode is {mode}");
            let cards = session.line_cards()?;
            let blocking = eip.blocking_cards(&cards);
            if !blocking.is_empty() {
                warn!(
                    "Not changing network-services mode to {}: incompatible line cards installed",
                    eip.required_mode
                );
                for card in blocking {
                    warn!("  {card}");
                }
            } else if confirmer.confirm(&format!(
                "Change Network Services Mode to {}?",
                eip.required_mode
            ))? {
                flags.must_set_enhanced_ip = true;
            }
        }
    }

    // PIM nonstop-routing blocks the removal of graceful switchover
    if session.pim_nonstop_routing_configured()? {
        info!("PIM nonstop-routing is configured, deactivating for the upgrade");
        set.push_once(PIM_NSR_DEACTIVATE);
        flags.must_restore_pim = true;
    }

    Ok(set)
}

/// Build the restoration change set from the post-upgrade statements and
/// whatever the drain step deactivated.
pub fn post_upgrade_change_set(config: &Config, flags: &RestorationFlags) -> ConfigChangeSet {
    let mut set = ConfigChangeSet::new(config.post_upgrade.clone());
    if flags.must_restore_pim {
        set.push_once(PIM_NSR_ACTIVATE);
    }
    set
}

pub fn network_mode_change_set(config: &Config) -> ConfigChangeSet {
    let mode = config.enhanced_ip.required_mode.to_ascii_lowercase();
    ConfigChangeSet::new(vec![format!("set chassis network-services {mode}")])
}

// ---------------------------------------------------------------------------
// ConfigTransactionManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Ask the confirmer before committing.
    Confirm,
    /// Show the diff, then roll back. Used by dry runs.
    PreviewOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    NoChanges,
    Committed,
    Previewed,
}

pub struct ConfigTransactionManager<'c> {
    confirmer: &'c mut dyn Confirmer,
}

impl<'c> ConfigTransactionManager<'c> {
    pub fn new(confirmer: &'c mut dyn Confirmer) -> Self {
        Self { confirmer }
    }

    /// Load, diff and (maybe) commit `change_set` in an exclusive context.
    ///
    /// Returns `ConfigDeclined` after rolling back when the operator says no,
    /// and `ConfigApply` when the device rejects the load or the commit.
    pub fn apply(
        &mut self,
        session: &mut dyn Session,
        change_set: &ConfigChangeSet,
        policy: CommitPolicy,
    ) -> Result<Applied> {
        if change_set.is_empty() {
            info!("No configuration statements to apply");
            return Ok(Applied::NoChanges);
        }

        info!("Entering Configuration Mode...");
        let mut cx = session.open_config()?;

        for statement in &change_set.statements {
            match cx.load(statement) {
                Ok(warnings) => {
                    for w in warnings {
                        warn!("{statement}: {w}");
                    }
                }
                Err(e) => {
                    error!("Unable to load '{statement}': {e}");
                    if let Err(rb) = cx.rollback(0) {
                        warn!("Rollback after failed load also failed: {rb}");
                    }
                    return Err(UpgradeError::ConfigApply(format!(
                        "failed to load '{statement}': {e}"
                    )));
                }
            }
        }

        // Some devices only report load errors once the candidate is compared
        let diff = match cx.diff() {
            Ok(diff) => diff,
            Err(e) => {
                error!("Unable to compare candidate configuration: {e}");
                if let Err(rb) = cx.rollback(0) {
                    warn!("Rollback after failed compare also failed: {rb}");
                }
                return Err(UpgradeError::ConfigApply(e.to_string()));
            }
        };
        let Some(diff) = diff else {
            info!("No changes found to commit...");
            return Ok(Applied::NoChanges);
        };

        info!("Configuration Changes:");
        info!("{}", "-".repeat(24));
        for line in diff.lines() {
            info!("{line}");
        }

        if policy == CommitPolicy::PreviewOnly {
            info!("Dry run, discarding changes");
            cx.rollback(0)?;
            return Ok(Applied::Previewed);
        }

        if !self.confirmer.confirm("Commit Changes?")? {
            warn!("Rolling back changes...");
            cx.rollback(0)?;
            return Err(UpgradeError::ConfigDeclined);
        }

        info!("Committing changes...");
        match cx.commit() {
            Ok(()) => Ok(Applied::Committed),
            Err(e) => {
                error!("Commit rejected: {e}");
                Err(UpgradeError::ConfigApply(e.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
