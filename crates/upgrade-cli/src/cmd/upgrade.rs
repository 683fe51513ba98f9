use crate::output::{print_json, print_table};
use anyhow::Context;
use junos_ssh::{ScpTransfer, SshConnector};
use std::path::Path;
use upgrade_core::config::{Config, WarnLevel};
use upgrade_core::confirm::{AutoConfirm, Confirmer, Interactive};
use upgrade_core::device::Credentials;
use upgrade_core::orchestrator::{RunFlags, UpgradeOrchestrator};
use upgrade_core::provision::verify_local_images;
use upgrade_core::report::RunReport;

pub struct Options {
    pub force: bool,
    pub yes: bool,
    pub dry_run: bool,
}

pub fn run(config_path: &Path, device: &str, opts: Options, json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load config")?;
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => anyhow::bail!("invalid config: {}", w.message),
        }
    }

    // Nothing is opened until every local image is accounted for.
    verify_local_images(&config.images).context("local image check failed")?;

    let connector = SshConnector::new(&config.ssh)?;
    let credentials = Credentials {
        username: config.ssh.username.clone(),
        identity_file: config.ssh.identity_file.clone(),
    };
    let transfer = ScpTransfer::new(&config.ssh, credentials)?;
    let mut confirmer: Box<dyn Confirmer> = if opts.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(Interactive::stdio())
    };

    let flags = RunFlags {
        force: opts.force,
        dry_run: opts.dry_run,
    };
    let mut orchestrator =
        UpgradeOrchestrator::new(&config, &connector, &transfer, confirmer.as_mut(), flags);
    let report = orchestrator
        .run(device)
        .with_context(|| format!("upgrade of {device} failed"))?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if !report.succeeded() {
        anyhow::bail!("one or more installs failed");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{} {} in {}s (run {})",
        report.host,
        if report.dry_run { "dry run finished" } else { "upgrade finished" },
        report.duration_secs(),
        report.run_id
    );

    if let Some(plan) = &report.plan {
        println!(
            "plan: {} {}",
            plan.architecture,
            if plan.is_two_stage() { "two-stage" } else { "single-stage" }
        );
    }
    for path in &report.missing_images {
        println!("missing on device: {path}");
    }

    if !report.outcomes.is_empty() {
        println!();
        let rows = report
            .outcomes
            .iter()
            .map(|o| {
                vec![
                    o.target_label().to_string(),
                    o.kind.to_string(),
                    o.image.clone(),
                    if o.success { "ok" } else { "FAILED" }.to_string(),
                    format!("{}s", o.elapsed_secs),
                    o.version_after.clone().unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();
        print_table(&["TARGET", "KIND", "IMAGE", "RESULT", "ELAPSED", "VERSION"], rows);
    }

    if let Some(facts) = &report.final_facts {
        println!();
        let rows = facts
            .routing_engines
            .iter()
            .map(|re| {
                vec![
                    re.slot.to_string(),
                    re.mastership.to_string(),
                    re.status.clone(),
                    re.model.clone(),
                    re.version.clone().unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();
        print_table(&["RE", "MASTERSHIP", "STATUS", "MODEL", "VERSION"], rows);
    }

    if !report.warnings.is_empty() {
        println!();
        for w in &report.warnings {
            println!("[warning] {w}");
        }
    }
}
