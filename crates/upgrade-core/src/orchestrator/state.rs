use crate::config::ImagesConfig;
use crate::error::{Result, UpgradeError};
use crate::plan::ImagePlan;
use crate::report::{HealthWarning, UpgradeOutcome};
use crate::transaction::RestorationFlags;
use crate::types::Architecture;
use std::cell::OnceCell;

/// Operator switches for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Pass `force` to every software add.
    pub force: bool,
    /// Stage nothing, install nothing, commit nothing.
    pub dry_run: bool,
}

/// Everything a run learns along the way. Owned by one orchestrator and
/// never shared between runs.
#[derive(Debug, Default)]
pub struct RunState {
    plan: OnceCell<ImagePlan>,
    pub restoration: RestorationFlags,
    pub outcomes: Vec<UpgradeOutcome>,
    pub warnings: Vec<HealthWarning>,
    pub missing_images: Vec<String>,
}

impl RunState {
    /// Resolve the image plan. A run resolves it exactly once.
    pub fn resolve_plan(
        &self,
        images: &ImagesConfig,
        architecture: Architecture,
        running_version: &str,
    ) -> Result<&ImagePlan> {
        if self.plan.get().is_some() {
            return Err(UpgradeError::PlanAlreadyResolved);
        }
        let plan = ImagePlan::resolve(images, architecture, running_version)?;
        self.plan
            .set(plan)
            .map_err(|_| UpgradeError::PlanAlreadyResolved)?;
        self.plan.get().ok_or(UpgradeError::PlanAlreadyResolved)
    }

    pub fn plan(&self) -> Option<&ImagePlan> {
        self.plan.get()
    }
}
