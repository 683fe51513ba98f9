use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;
use upgrade_core::config::Config;
use upgrade_core::plan::ImagePlan;
use upgrade_core::types::Architecture;

pub fn run(config_path: &Path, version: &str, arch: &str, json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load config")?;
    let architecture: Architecture = arch.parse()?;
    let plan = ImagePlan::resolve(&config.images, architecture, version)
        .with_context(|| format!("cannot plan an upgrade from {version}"))?;

    if json {
        return print_json(&plan);
    }

    println!(
        "{} {} upgrade from {}",
        plan.architecture,
        if plan.is_two_stage() { "two-stage" } else { "single-stage" },
        plan.running_version
    );
    let rows = plan
        .install_sequence()
        .into_iter()
        .enumerate()
        .map(|(i, image)| {
            vec![
                (i + 1).to_string(),
                image.kind.to_string(),
                image.filename.clone(),
                image.destination.clone(),
                if image.source.is_file() { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    print_table(&["STEP", "KIND", "IMAGE", "DESTINATION", "LOCAL"], rows);
    Ok(())
}
