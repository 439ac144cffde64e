//! # List Q&A Sync CLI (`lqs`)
//!
//! Operator interface for the refresh pipeline: database setup, record
//! administration, one-off refreshes and the scheduler loop.
//!
//! ## Usage
//!
//! ```bash
//! lqs --config ./config/lqs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lqs init` | Create the SQLite database and run schema migrations |
//! | `lqs records list` | Table of records and their refresh state |
//! | `lqs records show <id>` | One record as JSON |
//! | `lqs records import <file>` | Insert or merge records from a JSON array |
//! | `lqs records remove <id>` | Delete a record |
//! | `lqs refresh <id>` | Run one refresh attempt now |
//! | `lqs tick` | Refresh every due record once |
//! | `lqs run` | Tick on the configured interval until Ctrl-C |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use list_qna_sync::{config, db, migrate, records_cmd, refresh_cmd};

/// Keeps Q&A knowledge bases in sync with the lists they are built from.
#[derive(Parser)]
#[command(
    name = "lqs",
    about = "List Q&A Sync: refresh Q&A knowledge bases from remote lists",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lqs.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Inspect and administer knowledge records.
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },

    /// Refresh one record now, regardless of its schedule.
    Refresh {
        /// Record id (the knowledge base id).
        id: String,
    },

    /// Refresh every record that is due, once.
    Tick,

    /// Run the scheduler until interrupted.
    Run,
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List all records.
    List,
    /// Print one record as JSON.
    Show { id: String },
    /// Insert or merge records from a JSON array file.
    Import { path: PathBuf },
    /// Remove a record.
    Remove { id: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Records { action } => match action {
            RecordsAction::List => records_cmd::run_list(&cfg).await?,
            RecordsAction::Show { id } => records_cmd::run_show(&cfg, &id).await?,
            RecordsAction::Import { path } => records_cmd::run_import(&cfg, &path).await?,
            RecordsAction::Remove { id } => records_cmd::run_remove(&cfg, &id).await?,
        },
        Commands::Refresh { id } => {
            refresh_cmd::run_refresh(&cfg, &id).await?;
        }
        Commands::Tick => {
            refresh_cmd::run_tick(&cfg).await?;
        }
        Commands::Run => {
            refresh_cmd::run_scheduler(&cfg).await?;
        }
    }

    Ok(())
}
