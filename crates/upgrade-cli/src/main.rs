mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use upgrade_core::config::{Config, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(
    name = "junos-upgrade",
    about = "Upgrade Junos firmware on single- and dual-RE devices",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file
    #[arg(long, global = true, env = "JUNOS_UPGRADE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade one device
    Upgrade {
        /// Device hostname or address
        #[arg(long, short = 'd')]
        device: String,

        /// Pass `force` to every software add
        #[arg(long)]
        force: bool,

        /// Answer yes at every checkpoint
        #[arg(long, short = 'y')]
        yes: bool,

        /// Gather facts, resolve the plan and preview config changes only
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the images a device running VERSION would get, without connecting
    #[command(disable_version_flag = true)]
    Plan {
        /// Running version, e.g. 12.3R5.7
        #[arg(long)]
        version: String,

        /// Image architecture: 32-bit or 64-bit
        #[arg(long)]
        arch: String,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let (default_filter, log_file) = match &cli.command {
        Commands::Upgrade { .. } => (
            UPGRADE_LOG_FILTER,
            Config::load(&cli.config).ok().and_then(|c| c.log_file),
        ),
        _ => ("warn", None),
    };
    init_tracing(default_filter, log_file.as_deref());

    let result = match cli.command {
        Commands::Upgrade {
            device,
            force,
            yes,
            dry_run,
        } => cmd::upgrade::run(
            &cli.config,
            &device,
            cmd::upgrade::Options {
                force,
                yes,
                dry_run,
            },
            cli.json,
        ),
        Commands::Plan { version, arch } => cmd::plan::run(&cli.config, &version, &arch, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Progress from the upgrade engine at `info`, everything else at `warn`.
const UPGRADE_LOG_FILTER: &str =
    "warn,[upgrade]=info,upgrade_core=info,junos_ssh=info,junos_upgrade=info";

/// Console logging on stderr, plus a plain-text copy appended to
/// `log_file` when one is configured. `RUST_LOG` replaces `default_filter`.
fn init_tracing(default_filter: &str, log_file: Option<&Path>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("warning: cannot open log file {}: {e}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
}
