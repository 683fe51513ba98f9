//! Image staging.
//!
//! Makes sure every image of the plan sits at its destination on the master
//! RE and, on dual-RE devices, on the backup RE too. Missing images are
//! copied from the local repository (master) or from the master (backup).
//! A backup copy that still fails aborts with the exact command the operator
//! has to run by hand; there is no retry.

use crate::config::ImagesConfig;
use crate::device::{FileTransfer, RemotePath, SessionHandle};
use crate::error::{Result, UpgradeError};
use crate::plan::{ImageDescriptor, ImagePlan};
use crate::types::{DeviceFacts, ReSlot};
use tracing::{error, info, warn};

/// Verify every configured image exists in the local repository. Runs before
/// any session is opened.
pub fn verify_local_images(images: &ImagesConfig) -> Result<()> {
    for filename in images.all_filenames() {
        let path = images.local_path(filename);
        if !path.is_file() {
            error!("Software package does not exist: {}", path.display());
            return Err(UpgradeError::ImageMissing {
                path: path.display().to_string(),
                recipe: None,
            });
        }
    }
    Ok(())
}

/// What staging did (or, in a dry run, would have done).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StagingReport {
    pub copied: Vec<RemotePath>,
    pub missing: Vec<RemotePath>,
}

pub struct ImageProvisioningService<'a> {
    transfer: &'a dyn FileTransfer,
    dry_run: bool,
}

impl<'a> ImageProvisioningService<'a> {
    pub fn new(transfer: &'a dyn FileTransfer, dry_run: bool) -> Self {
        Self { transfer, dry_run }
    }

    pub fn ensure_staged(
        &self,
        plan: &ImagePlan,
        facts: &DeviceFacts,
        handle: &mut SessionHandle<'_>,
    ) -> Result<StagingReport> {
        let backup = if facts.is_dual() {
            Some(facts.backup().ok_or(UpgradeError::NoBackupRe)?)
        } else {
            None
        };

        let mut report = StagingReport::default();
        let images = std::iter::once(&plan.main)
            .chain(plan.intermediate.iter())
            .chain(plan.patch.iter());
        for image in images {
            self.ensure_on_master(image, handle, &mut report)?;
            if let Some(backup) = backup {
                self.ensure_on_backup(image, backup, handle, &mut report)?;
            }
        }
        Ok(report)
    }

    fn ensure_on_master(
        &self,
        image: &ImageDescriptor,
        handle: &mut SessionHandle<'_>,
        report: &mut StagingReport,
    ) -> Result<()> {
        let dest = image.remote();
        info!("Checking for {} image on the active RE...", image.kind);
        if handle.session()?.list_file(&dest)?.is_present() {
            return Ok(());
        }
        if self.dry_run {
            warn!("{dest} not found on the active RE (dry run, not copying)");
            report.missing.push(dest);
            return Ok(());
        }

        if !image.source.is_file() {
            error!("Local file \"{}\" not found", image.source.display());
            return Err(UpgradeError::ImageMissing {
                path: image.source.display().to_string(),
                recipe: None,
            });
        }
        info!("Image not found on active RE, copying {} to {dest}...", image.filename);
        let host = handle.host().to_string();
        self.transfer
            .copy_local_to_device(&image.source, &host, &dest)?;

        if !handle.session()?.list_file(&dest)?.is_present() {
            error!("{dest} still missing after copy");
            return Err(UpgradeError::ImageMissing {
                path: dest.to_string(),
                recipe: None,
            });
        }
        report.copied.push(dest);
        Ok(())
    }

    fn ensure_on_backup(
        &self,
        image: &ImageDescriptor,
        backup: ReSlot,
        handle: &mut SessionHandle<'_>,
        report: &mut StagingReport,
    ) -> Result<()> {
        let src = image.remote();
        let dest = image.on(backup);
        info!("Checking for {} image on the backup RE...", image.kind);
        if handle.session()?.list_file(&dest)?.is_present() {
            return Ok(());
        }
        if self.dry_run {
            warn!("{dest} not found on the backup RE (dry run, not copying)");
            report.missing.push(dest);
            return Ok(());
        }

        info!("Copying {src} to {dest}...");
        if let Err(e) = self
            .transfer
            .copy_device_to_device(handle.session()?, &src, &dest)
        {
            warn!("Copy to backup RE failed: {e}");
        }

        if !handle.session()?.list_file(&dest)?.is_present() {
            let recipe = format!("file copy {src} {dest}");
            error!("Copy the {} image to the backup RE, then re-run", image.kind);
            error!("CMD  : {recipe}");
            return Err(UpgradeError::ImageMissing {
                path: dest.to_string(),
                recipe: Some(recipe),
            });
        }
        report.copied.push(dest);
        Ok(())
    }

    /// Re-check that the final image is still present on `re`. A missing
    /// image is an error carrying the copy command from `source`; nothing is
    /// copied here.
    pub fn verify_on(
        &self,
        plan: &ImagePlan,
        re: ReSlot,
        source: ReSlot,
        handle: &mut SessionHandle<'_>,
    ) -> Result<()> {
        let dest = plan.main.on(re);
        if handle.session()?.list_file(&dest)?.is_present() {
            return Ok(());
        }
        let recipe = format!("file copy {} {dest}", plan.main.on(source));
        error!("{dest} is no longer present on {re}");
        error!("CMD  : {recipe}");
        Err(UpgradeError::ImageMissing {
            path: dest.to_string(),
            recipe: Some(recipe),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
