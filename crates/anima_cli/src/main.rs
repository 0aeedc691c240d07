use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use anima_core::{AnimaConfig, EmotionalState, HealthAlert, RawEvent};
use anima_memory::{ArchiveCounts, SqliteArchive};
use anima_organism::{archive_report, CycleReport, HealthSnapshot, MilestoneSnapshot, RegulatoryCore};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config (defaults are used if missing or invalid)
    #[arg(short, long, default_value = "anima.toml")]
    config: PathBuf,

    /// JSON-lines file of raw events to replay
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Idle heartbeats to run after the replay
    #[arg(short, long, default_value_t = 0)]
    idle: u64,

    /// Archive every cycle into this SQLite file
    #[arg(long, env = "ANIMA_DB")]
    db: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Default, Serialize)]
struct ReplayStats {
    lines: u64,
    accepted: u64,
    quarantined: u64,
    unparsable: u64,
    heartbeats: u64,
    pressure_events: u64,
}

#[derive(Serialize)]
struct Summary {
    cycle: u64,
    state: EmotionalState,
    milestone: MilestoneSnapshot,
    alerts: Vec<HealthAlert>,
    health: HealthSnapshot,
    batches: usize,
    semantic_records: usize,
    consolidation_halted: bool,
    replay: ReplayStats,
    archive: Option<ArchiveCounts>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = AnimaConfig::load_or_default(&args.config);
    let mut core = RegulatoryCore::new(config).context("Invalid configuration")?;

    let archive = match &args.db {
        Some(path) => {
            info!("Archiving to {}", path.display());
            Some(SqliteArchive::open(path).await?)
        }
        None => None,
    };

    let mut stats = ReplayStats::default();

    if let Some(path) = &args.events {
        let file = File::open(path)
            .with_context(|| format!("Failed to open events file {}", path.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read events file")?;
            if line.trim().is_empty() {
                continue;
            }
            stats.lines += 1;

            let raw: RawEvent = match serde_json::from_str(&line) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Skipping unparsable line {}: {}", stats.lines, e);
                    stats.unparsable += 1;
                    continue;
                }
            };
            match core.ingest(raw) {
                Ok(report) => {
                    stats.accepted += 1;
                    archive_cycle(archive.as_ref(), &report).await;
                }
                Err(_) => stats.quarantined += 1,
            }
        }
        info!(
            "Replayed {} lines: {} accepted, {} quarantined",
            stats.lines, stats.accepted, stats.quarantined
        );
    }

    for _ in 0..args.idle {
        let report = core.heartbeat();
        stats.heartbeats += 1;
        archive_cycle(archive.as_ref(), &report).await;
        for internal in core.drain_internal() {
            stats.pressure_events += 1;
            archive_cycle(archive.as_ref(), &internal).await;
        }
    }

    let archive_counts = match &archive {
        Some(archive) => Some(archive.counts().await?),
        None => None,
    };

    let summary = Summary {
        cycle: core.cycle(),
        state: core.state(),
        milestone: core.milestone_snapshot(),
        alerts: core.alerts().to_vec(),
        health: core.health_snapshot(),
        batches: core.scheduler().batches().len(),
        semantic_records: core.scheduler().semantic_records().len(),
        consolidation_halted: core.scheduler().is_halted(),
        replay: stats,
        archive: archive_counts,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr; stdout carries the summary
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn archive_cycle(archive: Option<&SqliteArchive>, report: &CycleReport) {
    if let Some(archive) = archive {
        if let Err(e) = archive_report(archive, report).await {
            warn!("Archiving cycle {} failed: {:#}", report.cycle, e);
        }
    }
}
