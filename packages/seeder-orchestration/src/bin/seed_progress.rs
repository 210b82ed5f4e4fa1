//! Seed Progress CLI
//!
//! Operator tooling for seeding checkpoints left behind by partial runs.
//!
//! # Usage
//!
//! ```bash
//! # List checkpoints, newest first
//! seed-progress --config seeder.yaml list
//!
//! # Inspect one batch
//! seed-progress show batch-20240101120000-1a2b3c4d
//!
//! # Drop checkpoints older than a week
//! seed-progress --environment staging prune --older-than-days 7
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use seeder_orchestration::logging::{self, LogConfig};
use seeder_orchestration::{
    BatchId, CheckpointDocument, JsonFileProgressStore, ProgressStore, ResumeHint, SeederConfig,
    StageId,
};

#[derive(Parser)]
#[command(name = "seed-progress")]
#[command(about = "Inspect and clean up seeding checkpoints", long_about = None)]
struct Cli {
    /// Seeder configuration (versioned YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the checkpoint root directory
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    /// Override the environment subdirectory
    #[arg(short, long, global = true)]
    environment: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored checkpoints, newest first
    List,

    /// Show per-stage progress and failures of one batch
    Show {
        batch_id: String,

        /// Print the raw checkpoint document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the checkpoint of one batch
    Clear { batch_id: String },

    /// Delete checkpoints older than the given age
    Prune {
        #[arg(long)]
        older_than_days: i64,

        /// Only print what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SeederConfig::from_yaml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SeederConfig::default(),
    };
    if let Some(dir) = cli.checkpoint_dir {
        config.checkpoint_dir = dir;
    }
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }
    config.validate()?;

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        config.log_config()
    };
    logging::init(&log_config);

    let store = JsonFileProgressStore::new(config.checkpoint_dir.clone(), &config.environment)?;

    match cli.command {
        Commands::List => list(&store).await?,
        Commands::Show { batch_id, json } => show(&store, &config, batch_id, json).await?,
        Commands::Clear { batch_id } => clear(&store, batch_id).await?,
        Commands::Prune {
            older_than_days,
            dry_run,
        } => prune(&store, older_than_days, dry_run).await?,
    }

    Ok(())
}

async fn list(store: &JsonFileProgressStore) -> anyhow::Result<()> {
    let summaries = store.list().await?;
    if summaries.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }

    println!("Checkpoints in {}:", store.dir().display());
    for summary in summaries {
        println!(
            "  {}  {}",
            summary.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            summary.batch_id
        );
    }
    Ok(())
}

async fn show(
    store: &JsonFileProgressStore,
    config: &SeederConfig,
    batch_id: String,
    json: bool,
) -> anyhow::Result<()> {
    let batch_id = BatchId::new(batch_id);
    let Some(doc) = store.load(&batch_id).await? else {
        bail!("no checkpoint for batch {}", batch_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    print_document(&doc);
    let hint = ResumeHint::new(batch_id, &config.resume_command);
    println!("\nResume with: {}", hint.command);
    Ok(())
}

fn print_document(doc: &CheckpointDocument) {
    println!("Batch:   {}", doc.batch_id);
    println!("Updated: {}", doc.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));

    for (stage, outcome) in [
        (StageId::RemoteOrder, &doc.stage1),
        (StageId::DownstreamEntity, &doc.stage2),
    ] {
        println!(
            "\nStage {} ({}): {} succeeded, {} failed",
            stage.number(),
            stage,
            outcome.successful.len(),
            outcome.failed.len()
        );
        for failure in &outcome.failed {
            println!(
                "  {} {}: {}",
                failure.position, failure.identifier, failure.error_message
            );
        }
    }

    match &doc.grouping_record {
        Some(grouping) => println!("\nGrouping: {} ({})", grouping.id, grouping.region),
        None => println!("\nGrouping: none"),
    }
}

async fn clear(store: &JsonFileProgressStore, batch_id: String) -> anyhow::Result<()> {
    let batch_id = BatchId::new(batch_id);
    store.delete(&batch_id).await?;
    println!("Cleared checkpoint for {}", batch_id);
    Ok(())
}

async fn prune(
    store: &JsonFileProgressStore,
    older_than_days: i64,
    dry_run: bool,
) -> anyhow::Result<()> {
    let cutoff = prune_cutoff(Utc::now(), older_than_days)?;

    let mut pruned = 0;
    for summary in store.list().await? {
        if summary.timestamp >= cutoff {
            continue;
        }
        if dry_run {
            println!("Would delete {} ({})", summary.batch_id, summary.timestamp);
        } else {
            store.delete(&summary.batch_id).await?;
            println!("Deleted {} ({})", summary.batch_id, summary.timestamp);
        }
        pruned += 1;
    }

    println!(
        "{} {} checkpoint(s) older than {} day(s)",
        if dry_run { "Would prune" } else { "Pruned" },
        pruned,
        older_than_days
    );
    Ok(())
}

/// Checkpoints last touched before this instant are pruned.
fn prune_cutoff(now: DateTime<Utc>, older_than_days: i64) -> anyhow::Result<DateTime<Utc>> {
    if older_than_days < 0 {
        bail!("--older-than-days must not be negative");
    }
    Duration::try_days(older_than_days)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--older-than-days {} is out of range", older_than_days))
}
