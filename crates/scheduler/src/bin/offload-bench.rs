//! offload-bench: drive the task scheduler end to end.
//!
//! Enqueues a mix of all task kinds concurrently against the chosen worker
//! mode, waits for every task to settle, then prints outcome counts, the
//! worker status and the scheduler metrics as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use offload_core::config::load_dotenv;
use offload_core::{
    DataPoint, DownsamplePayload, ForecastBlendPayload, ModelForecast, OffloadConfig, Priority,
    QuantileBandsPayload, TaskPayload,
};
use offload_scheduler::{SchedulerError, SilentWorker, TaskScheduler, ThreadWorker};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Dedicated worker thread runs the accelerated kernels.
    Worker,
    /// Worker dispatch disabled; everything runs inline.
    Fallback,
    /// Worker accepts tasks and never answers.
    Silent,
}

/// Exercise the offload scheduler with a synthetic workload.
#[derive(Parser, Debug)]
#[command(name = "offload-bench", version, about)]
struct Cli {
    /// Path to a TOML config file. Defaults plus `OFFLOAD_*` env vars when omitted.
    #[arg(long, env = "OFFLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Which worker to run against.
    #[arg(long, value_enum, env = "OFFLOAD_BENCH_MODE", default_value = "worker")]
    mode: Mode,

    /// Number of tasks to enqueue.
    #[arg(long, env = "OFFLOAD_BENCH_TASKS", default_value_t = 30)]
    tasks: usize,

    /// Per-task timeout in milliseconds. Uses the configured default when omitted.
    #[arg(long, env = "OFFLOAD_BENCH_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Points per generated series.
    #[arg(long, env = "OFFLOAD_BENCH_POINTS", default_value_t = 2_000)]
    points: usize,
}

// ── Workload ────────────────────────────────────────────────────────

fn series(n: usize, phase: f64, level: f64) -> Vec<DataPoint> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            DataPoint::new(i as i64 * 60_000, level + (t / 17.0 + phase).sin() * 5.0 + (t / 3.0).cos())
        })
        .collect()
}

fn workload(index: usize, points: usize) -> TaskPayload {
    let phase = index as f64 * 0.37;
    match index % 3 {
        0 => TaskPayload::ForecastBlend(ForecastBlendPayload {
            forecasts: (0..4)
                .map(|m| ModelForecast {
                    model_id: format!("model-{m}"),
                    points: series(points, phase + m as f64, 100.0 + m as f64),
                    error: Some(0.5 + m as f64),
                })
                .collect(),
        }),
        1 => TaskPayload::QuantileBands(QuantileBandsPayload {
            samples: (0..48)
                .map(|step| {
                    series(points.min(500), phase + step as f64 * 0.1, step as f64)
                        .into_iter()
                        .map(|p| p.value)
                        .collect()
                })
                .collect(),
            quantiles: vec![0.05, 0.25, 0.5, 0.75, 0.95],
        }),
        _ => TaskPayload::Downsample(DownsamplePayload {
            points: series(points, phase, 0.0),
            target: (points / 20).max(3),
        }),
    }
}

fn priority(index: usize) -> Priority {
    match index % 5 {
        0 => Priority::High,
        4 => Priority::Low,
        _ => Priority::Medium,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<OffloadConfig> {
    let mut config = match &cli.config {
        Some(path) => OffloadConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => OffloadConfig::from_env().context("invalid OFFLOAD_* environment")?,
    };
    if cli.mode == Mode::Fallback {
        config.scheduler.worker_enabled = false;
    }
    Ok(config)
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    config.log_summary();

    let scheduler = TaskScheduler::new(config.scheduler.clone());
    match cli.mode {
        Mode::Worker => {
            let session = ThreadWorker::spawn(&config.worker).context("failed to start worker thread")?;
            scheduler.init(session).await?;
        }
        Mode::Silent => {
            let (_, session) = SilentWorker::session(config.worker.name.clone());
            scheduler.init(session).await?;
        }
        Mode::Fallback => {}
    }

    let timeout = cli.timeout_ms.map(Duration::from_millis);
    info!(mode = ?cli.mode, tasks = cli.tasks, points = cli.points, "starting run");

    let started = Instant::now();
    let handles: Vec<_> = (0..cli.tasks)
        .map(|i| {
            let s = scheduler.clone();
            let payload = workload(i, cli.points);
            let kind = payload.kind();
            (kind, tokio::spawn(async move { s.enqueue(payload, priority(i), timeout).await }))
        })
        .collect();

    let mut outcomes: BTreeMap<String, BTreeMap<&'static str, u64>> = BTreeMap::new();
    for (kind, handle) in handles {
        let label = match handle.await.context("enqueue task panicked")? {
            Ok(outcome) if outcome.is_fallback() => "fallback",
            Ok(_) => "worker",
            Err(e) => {
                warn!(kind = %kind, error = %e, "task did not complete");
                match e {
                    SchedulerError::Timeout { .. } => "timeout",
                    SchedulerError::WorkerFailed { .. } => "failed",
                    SchedulerError::Cancelled(_) => "cancelled",
                    _ => "rejected",
                }
            }
        };
        *outcomes.entry(kind.to_string()).or_default().entry(label).or_default() += 1;
    }
    let elapsed = started.elapsed();

    let report = serde_json::json!({
        "mode": format!("{:?}", cli.mode).to_lowercase(),
        "config": config.summary(),
        "elapsedMs": elapsed.as_millis() as u64,
        "outcomes": outcomes,
        "status": scheduler.status(),
        "metrics": scheduler.metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    scheduler.destroy().await;
    info!(elapsed = ?elapsed, "run complete");
    Ok(())
}
