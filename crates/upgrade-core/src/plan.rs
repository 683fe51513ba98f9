//! Image plan: which images a run installs, where they come from and where
//! they are staged on the device.
//!
//! Intermediate images go to the preserve directory, final images (main and
//! patch) go to the scratch directory. The plan is resolved once per run,
//! after the architecture is known, and is read-only from then on.

use crate::config::{ImagesConfig, PerArch};
use crate::confirm::Confirmer;
use crate::device::RemotePath;
use crate::error::{Result, UpgradeError};
use crate::types::{Architecture, DeviceFacts, ReSlot, SoftwareInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

// ---------------------------------------------------------------------------
// ImageKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    /// Stepping-stone image for a two-stage upgrade.
    Intermediate,
    Main,
    /// Selective update, installed without reboot or validation relaxation.
    Patch,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Intermediate => "intermediate",
            ImageKind::Main => "main",
            ImageKind::Patch => "patch",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ImageDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub kind: ImageKind,
    pub filename: String,
    /// Path in the local image repository.
    pub source: PathBuf,
    /// Absolute path on the device.
    pub destination: String,
}

impl ImageDescriptor {
    /// Destination on the RE the session is attached to.
    pub fn remote(&self) -> RemotePath {
        RemotePath::local(self.destination.clone())
    }

    /// Destination on a specific RE.
    pub fn on(&self, re: ReSlot) -> RemotePath {
        RemotePath::on(re, self.destination.clone())
    }
}

// ---------------------------------------------------------------------------
// ImagePlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePlan {
    pub architecture: Architecture,
    pub running_version: String,
    pub intermediate: Option<ImageDescriptor>,
    pub main: ImageDescriptor,
    pub patch: Option<ImageDescriptor>,
}

impl ImagePlan {
    pub fn resolve(
        images: &ImagesConfig,
        architecture: Architecture,
        running_version: &str,
    ) -> Result<Self> {
        let main = descriptor(images, &images.main, ImageKind::Main, architecture)?.ok_or_else(
            || UpgradeError::InvalidConfig(format!("no {architecture} main image configured")),
        )?;

        let intermediate = if requires_two_stage(running_version, images.two_stage_for.as_deref()) {
            let image = descriptor(images, &images.two_stage, ImageKind::Intermediate, architecture)?
                .ok_or_else(|| {
                    UpgradeError::InvalidConfig(format!(
                        "running version {running_version} requires a two-stage upgrade \
                         but no {architecture} intermediate image is configured"
                    ))
                })?;
            Some(image)
        } else {
            None
        };

        let patch = descriptor(images, &images.patch, ImageKind::Patch, architecture)?;

        Ok(Self {
            architecture,
            running_version: running_version.to_string(),
            intermediate,
            main,
            patch,
        })
    }

    pub fn is_two_stage(&self) -> bool {
        self.intermediate.is_some()
    }

    /// Install order: intermediate, main, patch.
    pub fn install_sequence(&self) -> Vec<&ImageDescriptor> {
        self.intermediate
            .iter()
            .chain(std::iter::once(&self.main))
            .chain(self.patch.iter())
            .collect()
    }
}

fn descriptor(
    images: &ImagesConfig,
    names: &PerArch,
    kind: ImageKind,
    architecture: Architecture,
) -> Result<Option<ImageDescriptor>> {
    let Some(filename) = names.for_arch(architecture) else {
        return Ok(None);
    };
    if filename.contains('/') {
        return Err(UpgradeError::InvalidConfig(format!(
            "image filename '{filename}' must not contain a directory"
        )));
    }
    let dir = match kind {
        ImageKind::Intermediate => &images.preserve_dir,
        ImageKind::Main | ImageKind::Patch => &images.scratch_dir,
    };
    Ok(Some(ImageDescriptor {
        kind,
        filename: filename.to_string(),
        source: images.local_path(filename),
        destination: join_remote(dir, filename),
    }))
}

fn join_remote(dir: &str, filename: &str) -> String {
    let dir = dir.trim();
    if dir.ends_with('/') {
        format!("{dir}{filename}")
    } else {
        format!("{dir}/{filename}")
    }
}

/// True when the major component of the running version (the text before the
/// first `.`) equals the configured marker. Not a version comparison.
pub fn requires_two_stage(running_version: &str, marker: Option<&str>) -> bool {
    match marker.map(str::trim) {
        Some(m) if !m.is_empty() => major_version(running_version) == m,
        _ => false,
    }
}

fn major_version(version: &str) -> &str {
    let version = version.trim();
    version.split('.').next().unwrap_or(version)
}

// ---------------------------------------------------------------------------
// Architecture detection
// ---------------------------------------------------------------------------

pub fn detect_architecture(
    images: &ImagesConfig,
    configured: Option<Architecture>,
    facts: &DeviceFacts,
    software: &SoftwareInfo,
    confirmer: &mut dyn Confirmer,
) -> Result<Architecture> {
    if let Some(arch) = configured {
        info!("Using configured {arch} images");
        return Ok(arch);
    }

    let re_model = facts
        .re(ReSlot::Re0)
        .or_else(|| facts.routing_engines.first())
        .map(|re| re.model.as_str())
        .unwrap_or("");
    if images
        .sixty_four_bit_re_models
        .iter()
        .any(|m| m.eq_ignore_ascii_case(re_model))
    {
        info!("{re_model} requires 64-bit images");
        return Ok(Architecture::Bit64);
    }

    info!("Checking for 32 or 64-bit code...");
    if let Some(arch) = software.architecture {
        info!("Running {arch} software");
        return Ok(arch);
    }

    let choices: Vec<String> = Architecture::all()
        .iter()
        .map(|arch| {
            let name = images.main.for_arch(*arch).unwrap_or("(not configured)");
            format!("{arch} Image - {name}")
        })
        .collect();
    match confirmer.select("Select Image Type", &choices)? {
        Some(i) => {
            let arch = Architecture::all()[i];
            info!("{arch} Code Selected");
            Ok(arch)
        }
        None => Err(UpgradeError::ArchitectureUnknown),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
