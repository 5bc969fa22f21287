//! diagstream CLI
//!
//! Command-line interface for the telemetry engine:
//! - Ingest JSON lines from stdin
//! - Open/close sessions
//! - Query, aggregate and summarize sessions
//! - Check store health
//! - Simulate a live OBD2 session
//! - Purge expired sessions

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diagstream::config::{generate_default_config, Config, StoreBackend};
use diagstream::{DataPoint, HealthStatus, PointInput, StreamMessage, TelemetryEngine};

#[derive(Parser)]
#[command(name = "diagstream")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time diagnostic telemetry engine")]
#[command(long_about = "diagstream stores vehicle sensor readings per diagnostic session.\nIngest points, query and aggregate them, and watch sessions live.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/diagstream/config.toml or ./diagstream.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the backing store (memory, sqlite)
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest JSON lines from stdin: {"timestamp": 1000, "parameters": {"rpm": 800}}
    Ingest {
        /// Session id
        session: String,
        /// Points per batch
        #[arg(long, default_value = "500")]
        batch_size: usize,
    },

    /// Open a session explicitly
    Open {
        /// Session id
        session: String,
    },

    /// Close a session
    Close {
        /// Session id
        session: String,
        /// End time (default: now). Supports: "now", ISO 8601, Unix milliseconds
        #[arg(short, long)]
        at: Option<String>,
    },

    /// Points in [start, end)
    Query {
        /// Session id
        session: String,
        /// Start time, inclusive (default: beginning of time)
        #[arg(short, long)]
        start: Option<String>,
        /// End time, exclusive (default: end of time)
        #[arg(short, long)]
        end: Option<String>,
        /// Maximum number of points
        #[arg(short, long, default_value = "1000")]
        limit: usize,
    },

    /// Most recent points, oldest first
    Recent {
        /// Session id
        session: String,
        /// Skip this many of the newest points
        #[arg(short, long, default_value = "0")]
        offset: usize,
        /// Number of points
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Bucketed avg/min/max per parameter, newest bucket first
    Aggregate {
        /// Session id
        session: String,
        /// Bucket width (second, minute)
        #[arg(short, long, default_value = "minute")]
        width: String,
        /// Maximum number of buckets
        #[arg(short, long, default_value = "10")]
        max_buckets: usize,
    },

    /// Session statistics
    Stats {
        /// Session id
        session: String,
    },

    /// Whole-session key figures per signal
    Summary {
        /// Session id
        session: String,
    },

    /// List all sessions
    Sessions,

    /// Check backing store health
    Health,

    /// Stream a synthetic OBD2 session and print it live
    Simulate {
        /// Session id (default: random)
        #[arg(short, long)]
        session: Option<String>,
        /// Number of points
        #[arg(short = 'n', long, default_value = "20")]
        points: usize,
        /// Milliseconds between points
        #[arg(short, long, default_value = "100")]
        interval_ms: u64,
    },

    /// Delete a session, or every expired one with --expired
    Purge {
        /// Session id
        session: Option<String>,
        /// Purge closed sessions past retention.session_ttl_secs
        #[arg(long)]
        expired: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the effective configuration instead
        #[arg(long)]
        effective: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(backend) = &cli.backend {
        config.store.backend = backend.parse::<StoreBackend>()?;
    }
    if let Some(data_dir) = &cli.data_dir {
        config.store.data_dir = data_dir.clone();
    }

    init_logging(&config);

    if let Commands::Config { output, effective } = &cli.command {
        let content = if *effective {
            toml::to_string_pretty(&config)?
        } else {
            generate_default_config()
        };
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing config to {:?}", path))?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let engine = TelemetryEngine::from_config(&config)?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Ingest {
            session,
            batch_size,
        } => {
            if batch_size == 0 {
                bail!("--batch-size must be at least 1");
            }

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut batch = Vec::with_capacity(batch_size);
            let mut totals = IngestTotals::default();
            let mut line_no = 0usize;

            while let Some(line) = lines.next_line().await? {
                line_no += 1;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<PointInput>(line) {
                    Ok(point) => batch.push(point),
                    Err(e) => {
                        eprintln!("line {}: {}", line_no, e);
                        totals.rejected += 1;
                    }
                }

                if batch.len() >= batch_size {
                    flush_batch(&engine, &session, &mut batch, &mut totals).await?;
                }
            }
            flush_batch(&engine, &session, &mut batch, &mut totals).await?;

            if json {
                print_json(&totals)?;
            } else {
                println!("Accepted: {}", totals.accepted);
                if totals.rejected > 0 {
                    println!("Rejected: {}", totals.rejected);
                }
                if totals.late_arrivals > 0 {
                    println!("Late arrivals: {}", totals.late_arrivals);
                }
            }
        }

        Commands::Open { session } => {
            let record = engine.open_session(&session).await?;
            if json {
                print_json(&record)?;
            } else {
                println!("Session {} is {}", record.session_id, record.state());
            }
        }

        Commands::Close { session, at } => {
            let end_time = match at.as_deref() {
                None => Utc::now().timestamp_millis(),
                Some(s) => parse_time(s)?,
            };
            let record = engine.close_session_at(&session, end_time).await?;
            if json {
                print_json(&record)?;
            } else {
                println!(
                    "Session {} closed at {} ({} points)",
                    record.session_id,
                    format_time(record.end_time.unwrap_or(end_time)),
                    record.data_point_count
                );
            }
        }

        Commands::Query {
            session,
            start,
            end,
            limit,
        } => {
            let start = start.as_deref().map(parse_time).transpose()?.unwrap_or(i64::MIN);
            let end = end.as_deref().map(parse_time).transpose()?.unwrap_or(i64::MAX);
            let points = engine.range_query(&session, start, end, limit).await?;
            print_points(&points, json)?;
        }

        Commands::Recent {
            session,
            offset,
            count,
        } => {
            let points = engine.recent(&session, offset, count).await?;
            print_points(&points, json)?;
        }

        Commands::Aggregate {
            session,
            width,
            max_buckets,
        } => {
            let buckets = engine.aggregate(&session, &width, max_buckets).await?;
            if json {
                print_json(&buckets)?;
            } else if buckets.is_empty() {
                println!("No data in session {}", session);
            } else {
                println!(
                    "{:<26} {:<16} {:>6} {:>12} {:>12} {:>12}",
                    "Bucket", "Parameter", "Count", "Avg", "Min", "Max"
                );
                println!("{}", "-".repeat(90));
                for bucket in &buckets {
                    for (name, stats) in &bucket.parameters {
                        println!(
                            "{:<26} {:<16} {:>6} {:>12.2} {:>12.2} {:>12.2}",
                            format_time(bucket.bucket_start),
                            name,
                            stats.count,
                            stats.avg,
                            stats.min,
                            stats.max
                        );
                    }
                }
            }
        }

        Commands::Stats { session } => {
            let stats = engine.stats(&session).await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Session: {}", stats.session_id);
                println!("  State: {}", stats.state);
                println!("  Data points: {}", stats.data_point_count);
                println!("  Start: {}", format_time(stats.start_time));
                println!(
                    "  End: {}",
                    stats.end_time.map(format_time).unwrap_or_else(|| "-".to_string())
                );
                println!("  Duration: {}", format_duration(stats.duration_ms));
                if stats.late_arrivals > 0 {
                    println!("  Late arrivals: {}", stats.late_arrivals);
                }
            }
        }

        Commands::Summary { session } => {
            let summary = engine.summary(&session).await?;
            if json {
                print_json(&summary)?;
            } else {
                println!("Session: {}", summary.session_id);
                println!("  Rows: {}", summary.rows);
                println!("  Duration: {}", format_duration(summary.duration_ms));
                println!("  Signals: {}", summary.signals.join(", "));
                println!();
                println!("{:<16} {:>8} {:>12} {:>12} {:>12}", "Signal", "Count", "Mean", "Min", "Max");
                println!("{}", "-".repeat(64));
                for (name, stats) in &summary.parameters {
                    println!(
                        "{:<16} {:>8} {:>12.2} {:>12.2} {:>12.2}",
                        name, stats.count, stats.avg, stats.min, stats.max
                    );
                }
            }
        }

        Commands::Sessions => {
            let ids = engine.list_sessions().await?;
            let mut rows = Vec::with_capacity(ids.len());
            for id in &ids {
                rows.push(engine.stats(id).await?);
            }

            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No sessions yet.");
                println!();
                println!("Stream a demo session with:");
                println!("  diagstream simulate");
            } else {
                println!("{:<38} {:<8} {:>8} {}", "Session", "State", "Points", "Start");
                println!("{}", "-".repeat(80));
                for stats in rows {
                    println!(
                        "{:<38} {:<8} {:>8} {}",
                        stats.session_id,
                        stats.state,
                        stats.data_point_count,
                        format_time(stats.start_time)
                    );
                }
            }
        }

        Commands::Health => {
            let report = engine.health_check().await;
            if json {
                print_json(&report)?;
            } else {
                println!("diagstream v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Store: {} ({})", report.store, report.status);
                println!("  {}", report.detail);
                println!("  Latency: {} ms", report.latency_ms);
                println!("Sessions: {} ({} active)", report.sessions, report.active_sessions);
            }
            if report.status == HealthStatus::Down {
                std::process::exit(1);
            }
        }

        Commands::Simulate {
            session,
            points,
            interval_ms,
        } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            simulate(&engine, &session, points, interval_ms).await?;
        }

        Commands::Purge { session, expired } => {
            let targets = match (session, expired) {
                (Some(id), false) => vec![id],
                (None, true) => {
                    if engine.config().session_ttl.is_none() {
                        bail!("retention.session_ttl_secs is not configured");
                    }
                    engine.expired_sessions(Utc::now().timestamp_millis()).await?
                }
                _ => bail!("pass either a session id or --expired"),
            };

            for id in &targets {
                let removed = engine.purge_session(id).await?;
                println!("Purged {} ({} points)", id, removed);
            }
            if targets.is_empty() {
                println!("Nothing to purge.");
            }
        }

        Commands::Config { .. } => unreachable!("handled before the engine is built"),
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("diagstream={}", config.logging.level).into());

    // stdout carries command output; logs go to stderr
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[derive(Debug, Default, Serialize)]
struct IngestTotals {
    accepted: usize,
    rejected: usize,
    late_arrivals: usize,
}

async fn flush_batch(
    engine: &TelemetryEngine,
    session: &str,
    batch: &mut Vec<PointInput>,
    totals: &mut IngestTotals,
) -> anyhow::Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let outcome = engine.ingest_batch(session, std::mem::take(batch)).await?;
    totals.accepted += outcome.accepted.len();
    totals.rejected += outcome.errors.len();
    totals.late_arrivals += outcome.accepted.iter().filter(|a| a.late_arrival).count();

    for error in &outcome.errors {
        eprintln!("point {}: [{}] {}", error.index, error.kind, error.error);
    }
    Ok(())
}

/// Synthetic idle-to-cruise drive cycle with a live subscriber
async fn simulate(
    engine: &TelemetryEngine,
    session: &str,
    points: usize,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);

    let handle = engine.subscribe(session, move |point| {
        println!("{}", StreamMessage::from_point(point).to_json());
        counter.fetch_add(1, Ordering::Relaxed);
    })?;
    println!(
        "{}",
        StreamMessage::Subscribed {
            session_id: session.to_string(),
            subscription: handle.id(),
        }
        .to_json()
    );

    engine.open_session(session).await?;
    let start = Utc::now().timestamp_millis();

    for i in 0..points {
        let t = i as f64 / points.max(1) as f64;
        let rpm = 800.0 + 2200.0 * t + 150.0 * (i as f64 * 0.7).sin();
        let speed = (110.0 * t).max(0.0);
        let engine_temp = 70.0 + 20.0 * t;

        let input = PointInput::new()
            .at(start + (i as u64 * interval_ms) as i64)
            .param("rpm", rpm.round())
            .param("speed", (speed * 10.0).round() / 10.0)
            .param("engineTemp", (engine_temp * 10.0).round() / 10.0)
            .param("throttle", (15.0 + 45.0 * t).round());

        if let Err(e) = engine.ingest(session, input).await {
            println!("{}", StreamMessage::Error { message: e.to_string() }.to_json());
        }
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }

    // Let the delivery thread drain before cancelling
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while delivered.load(Ordering::Relaxed) < points && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    engine.unsubscribe(&handle);
    println!(
        "{}",
        StreamMessage::Unsubscribed {
            subscription: handle.id(),
        }
        .to_json()
    );

    let end = start + (points as u64 * interval_ms) as i64;
    engine.close_session_at(session, end).await?;
    let stats = engine.stats(session).await?;
    eprintln!(
        "Session {}: {} points over {}",
        stats.session_id,
        stats.data_point_count,
        format_duration(stats.duration_ms)
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_points(points: &[DataPoint], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&points);
    }

    if points.is_empty() {
        println!("No points.");
        return Ok(());
    }

    println!("{:<26} {:>8}  {}", "Timestamp", "Seq", "Parameters");
    println!("{}", "-".repeat(80));
    for point in points {
        let params: Vec<String> = point
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!(
            "{:<26} {:>8}  {}",
            format_time(point.timestamp),
            point.sequence,
            params.join(" ")
        );
    }
    Ok(())
}

/// Parse "now", RFC 3339 or Unix milliseconds
fn parse_time(s: &str) -> anyhow::Result<i64> {
    if s == "now" {
        return Ok(Utc::now().timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    s.parse::<i64>()
        .with_context(|| format!("Invalid timestamp format: {}", s))
}

fn format_time(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn format_duration(ms: i64) -> String {
    let secs = ms / 1000;
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs % 60)
    } else {
        format!("{}.{:03}s", secs, ms % 1000)
    }
}
