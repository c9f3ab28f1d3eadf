use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod config;

use config::FlowConfig;

#[derive(Parser)]
#[command(name = "flow", version, about = "Bank-SMS personal finance engine")]
struct Cli {
    /// Override the data directory (default: platform data dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch rows and lookup tables from the backend and rebuild the ledger.
    Sync {
        /// Ignore the stored watermark and re-fetch everything.
        #[arg(long)]
        full: bool,
    },
    /// Ingest a ledger CSV export instead of syncing.
    Import { file: PathBuf },
    /// Print the salary cycle, forecasts, trends, and goal trajectories.
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Manage local category overrides (they always win, and persist
    /// across syncs).
    Override {
        #[command(subcommand)]
        action: OverrideAction,
    },
}

#[derive(Subcommand)]
enum OverrideAction {
    /// Pin a display name and category to an exact raw SMS text.
    Add {
        raw_text: String,
        display_name: String,
        category: String,
        #[arg(long)]
        consolidated: Option<String>,
    },
    List,
    Remove { raw_text: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => directories::ProjectDirs::from("com", "flow", "Flow")
            .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?
            .data_dir()
            .to_path_buf(),
    };
    std::fs::create_dir_all(&data_dir)?;

    let config = FlowConfig::load(&data_dir.join("config.toml"))?;
    let pool = flow_storage::create_db(&data_dir.join("flow.db")).await?;

    match cli.command {
        Command::Sync { full } => {
            let summary = commands::run_sync(&pool, &config, full).await?;
            println!(
                "synced {} rows ({}), {} transactions in ledger",
                summary.fetched_rows,
                if summary.incremental { "incremental" } else { "full" },
                summary.total_transactions,
            );
        }
        Command::Import { file } => {
            let summary = commands::run_import(&pool, &config, &file).await?;
            println!(
                "imported {} rows, {} transactions in ledger",
                summary.fetched_rows, summary.total_transactions,
            );
        }
        Command::Report { json } => {
            let report = commands::build_report(&pool, &config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                commands::print_report(&report, &config.reporting_currency);
            }
        }
        Command::Override { action } => match action {
            OverrideAction::Add {
                raw_text,
                display_name,
                category,
                consolidated,
            } => {
                commands::override_add(
                    &pool,
                    &raw_text,
                    &display_name,
                    &category,
                    consolidated.as_deref(),
                )
                .await?;
            }
            OverrideAction::List => commands::override_list(&pool).await?,
            OverrideAction::Remove { raw_text } => {
                commands::override_remove(&pool, &raw_text).await?;
            }
        },
    }

    Ok(())
}
