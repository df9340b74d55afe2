mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "asset-audit",
    version,
    about = "Incremental JSON audit cache and dependency query server for asset corpora",
    long_about = "Keeps one derived JSON summary per graph asset up to date by content fingerprint, \
                  and serves dependency/referencer queries over a local HTTP endpoint."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (holds Content/ and Saved/)
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Config file (default: <config_dir>/asset-audit/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-audit stale assets (or one asset), then sweep orphaned records
    Audit {
        /// Audit only this asset (e.g. /Game/UI/WBP_Menu)
        #[arg(long)]
        asset: Option<String>,

        /// Write the single asset's record here instead of the record tree
        #[arg(long, requires = "asset")]
        output: Option<PathBuf>,

        /// Re-derive even when the record is up to date
        #[arg(long)]
        force: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show whether one asset's record is up to date
    Status {
        #[arg(long)]
        asset: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete records whose asset no longer exists
    Sweep,

    /// Run the dependency query server until Ctrl-C
    Serve,

    /// Watch the corpus: incremental audits, startup sweep and query server, until Ctrl-C
    Watch {
        /// Coalesce filesystem events arriving within this window
        #[arg(long, default_value = "200")]
        debounce_ms: u64,

        /// Do not start the query server
        #[arg(long)]
        no_server: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("ASSET_AUDIT_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Audit {
            asset,
            output,
            force,
            json,
        } => {
            let session = commands::Session::open(&cli.project, config_path)?;
            commands::audit(&session, asset.as_deref(), output.as_deref(), force, json)?;
        }

        Commands::Status { asset, json } => {
            let session = commands::Session::open(&cli.project, config_path)?;
            commands::status(&session, &asset, json)?;
        }

        Commands::Sweep => {
            let session = commands::Session::open(&cli.project, config_path)?;
            commands::sweep(&session)?;
        }

        Commands::Serve => {
            let session = commands::Session::open(&cli.project, config_path)?;
            commands::serve(&session)?;
        }

        Commands::Watch {
            debounce_ms,
            no_server,
        } => {
            let session = commands::Session::open(&cli.project, config_path)?;
            commands::watch(&session, debounce_ms, !no_server)?;
        }

        Commands::Config => {
            asset_audit::config::show_config(config_path)?;
        }
    }

    Ok(())
}
