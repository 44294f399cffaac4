//! Dual-Venue Hedger - Main Entry Point
//!
//! Runs hedge cycles against the paper venues, journals every cycle and
//! halts on unhedged or unknown exposure until an operator acknowledges it.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dual_venue_hedger::config::Config;
use dual_venue_hedger::exchange::{PaperVenueClient, VenueClient};
use dual_venue_hedger::persistence::{HaltRecord, Journal};
use dual_venue_hedger::risk::{ExposureAlert, ExposureGuard};
use dual_venue_hedger::strategy::HedgeCoordinator;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Dual-Venue Hedger CLI
#[derive(Parser)]
#[command(name = "dual-venue-hedger")]
#[command(version, about = "Delta-neutral hedge pairs across two perpetual venues")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run hedge cycles (default)
    Run {
        /// Stop after this many cycles (overrides runtime.max_cycles)
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Show the halt state and recent cycles from the journal
    Status {
        /// Number of cycles to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Acknowledge a halt so hedging can resume
    Ack {
        /// Name recorded with the acknowledgement
        #[arg(long)]
        operator: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;

    match cli.command {
        Some(Commands::Status { limit }) => show_status(&config.runtime.db_path, limit),
        Some(Commands::Ack { operator }) => acknowledge(&config.runtime.db_path, &operator),
        Some(Commands::Run { cycles }) => run(config, cycles).await,
        None => run(config, None).await,
    }
}

async fn run(config: Config, cycles: Option<u64>) -> Result<()> {
    info!("═══════════════════════════════════════════════════════════");
    info!("  Dual-Venue Hedger starting");
    info!("═══════════════════════════════════════════════════════════");

    if let Err(e) = config.validate() {
        error!("❌ Invalid configuration: {}", e);
        return Err(e.into());
    }
    log_config(&config);

    let journal = Journal::new(&config.runtime.db_path)?;
    let mut guard = ExposureGuard::new(config.runtime.max_consecutive_failed_cycles);
    if let Some(halt) = journal.load_halt()? {
        guard.restore(halt.reason, halt.halted_at);
    }

    let client_a: Arc<dyn VenueClient> = Arc::new(PaperVenueClient::from_config(
        config.venues.venue_a,
        &config.paper.venue_a,
    ));
    let client_b: Arc<dyn VenueClient> = Arc::new(PaperVenueClient::from_config(
        config.venues.venue_b,
        &config.paper.venue_b,
    ));

    let coordinator = HedgeCoordinator::new(&config, client_a, client_b)?;
    if let Err(e) = coordinator.prepare_venues().await {
        if let Some(alert) = guard.record_error(&e) {
            persist_halt(&journal, &guard, &alert)?;
        }
        error!("❌ Venue preparation failed: {}", e);
        return Err(e.into());
    }

    // Setup shutdown signal handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let max_cycles = cycles.unwrap_or(config.runtime.max_cycles);
    let interval = Duration::from_secs(config.runtime.cycle_interval_secs);
    let mut completed: u64 = 0;

    info!("🚀 Starting hedge loop...");

    while !shutdown.load(Ordering::SeqCst) {
        if guard.is_halted() {
            error!(
                reason = guard.halt_reason().unwrap_or_default(),
                "⛔ Hedging halted - inspect both venues, then run `ack --operator <name>`"
            );
            break;
        }

        match coordinator.run_cycle().await {
            Ok(result) => {
                result.emit();
                journal.record_cycle(&result)?;
                info!(
                    cycle_id = %result.cycle_id,
                    outcome = result.outcome.as_str(),
                    filled_a = %result.leg_a.filled_notional,
                    filled_b = %result.leg_b.filled_notional,
                    "Cycle finished"
                );
                if let Some(alert) = guard.record_cycle(&result) {
                    persist_halt(&journal, &guard, &alert)?;
                }
            }
            Err(e) if e.is_skippable() => {
                warn!("⚠️  Cycle skipped: {}", e);
                if let Some(alert) = guard.record_error(&e) {
                    persist_halt(&journal, &guard, &alert)?;
                }
            }
            Err(e) => {
                error!("❌ Cycle aborted: {}", e);
                if let Some(alert) = guard.record_error(&e) {
                    persist_halt(&journal, &guard, &alert)?;
                }
                if !e.is_fatal_for_venue() {
                    return Err(e.into());
                }
            }
        }

        completed += 1;
        if max_cycles > 0 && completed >= max_cycles {
            info!(completed, "Reached cycle limit");
            break;
        }

        // Sleep in short slices so ctrl-c is honored promptly
        let wake_at = tokio::time::Instant::now() + interval;
        while tokio::time::Instant::now() < wake_at && !shutdown.load(Ordering::SeqCst) {
            let remaining = wake_at.saturating_duration_since(tokio::time::Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(500))).await;
        }
    }

    info!(completed, "👋 Hedger stopped");
    Ok(())
}

/// Write the guard's halt to the journal so it survives a restart.
fn persist_halt(journal: &Journal, guard: &ExposureGuard, alert: &ExposureAlert) -> Result<()> {
    let Some(reason) = guard.halt_reason() else {
        return Ok(());
    };

    warn!(alert_id = %alert.alert_id, "Persisting halt");
    journal.save_halt(&HaltRecord {
        reason: reason.to_string(),
        halted_at: guard.halted_at().unwrap_or_else(Utc::now),
    })
}

/// Initialize logging with console and file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "hedger.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dual_venue_hedger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let hedge = &config.hedge;
    info!("📋 Configuration:");
    info!(
        "   Venues: {} ({}) / {} ({})",
        config.venues.venue_a, hedge.symbol_a, config.venues.venue_b, hedge.symbol_b
    );
    info!(
        "   Notional Range: ${} - ${} ({:?})",
        hedge.min_position_usd, hedge.max_position_usd, hedge.size_distribution
    );
    info!("   Imbalance Tolerance: ${}", hedge.imbalance_tolerance_usd);
    info!("   Balance Utilization: {}", hedge.balance_utilization);
    match hedge.venue_a_direction {
        Some(direction) => info!("   Venue A Direction: {}", direction),
        None => info!("   Venue A Direction: random"),
    }
    info!(
        "   Retry Failed Leg: {} | Unwind: {}",
        hedge.retry_failed_leg, hedge.unwind_enabled
    );
    info!(
        "   Leg Timeout: {}ms | Poll: {}ms | Unwind Timeout: {}ms",
        config.execution.per_leg_timeout_ms,
        config.execution.poll_interval_ms,
        config.execution.unwind_timeout_ms
    );
    info!(
        "   Retries: {} attempts, {}-{}ms backoff",
        config.retry.max_retry_attempts,
        config.retry.retry_base_delay_ms,
        config.retry.retry_max_delay_ms
    );
    info!(
        "   Cycle Interval: {}s | Journal: {}",
        config.runtime.cycle_interval_secs, config.runtime.db_path
    );
}

/// Show the halt state and recent cycles from the journal.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              HEDGER STATUS                                 ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The hedger has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let journal = Journal::new(db_path)?;

    match journal.load_halt()? {
        Some(halt) => {
            println!("\n⛔ HALTED");
            println!("   ├─ Reason:  {}", halt.reason);
            println!("   └─ Since:   {}", halt.halted_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("\n✅ Running (no halt)"),
    }
    println!("   Acknowledgements on record: {}", journal.acknowledgement_count()?);

    let cycles = journal.recent_cycles(limit)?;
    if cycles.is_empty() {
        println!("\n📭 No cycles journaled yet.");
        return Ok(());
    }

    println!("\n📜 Recent Cycles ({})", cycles.len());
    for cycle in &cycles {
        let flag = if cycle.exposure_unknown { " ⚠️ unknown" } else { "" };
        println!(
            "   ├─ {} | {} | ${} A:{} | filled {} / {} | {} -> {}{}",
            cycle.started_at.format("%m-%d %H:%M:%S"),
            &cycle.cycle_id[..cycle.cycle_id.len().min(8)],
            cycle.notional,
            cycle.venue_a_leg,
            cycle.filled_a,
            cycle.filled_b,
            cycle.classification,
            cycle.outcome,
            flag,
        );
        if cycle.residual_notional > Decimal::ZERO {
            println!("   │    residual exposure ${}", cycle.residual_notional);
        }
    }

    Ok(())
}

/// Clear a persisted halt.
fn acknowledge(db_path: &str, operator: &str) -> Result<()> {
    let journal = Journal::new(db_path)?;

    match journal.clear_halt(operator)? {
        Some(halt) => {
            println!("✅ Halt cleared by {}", operator);
            println!("   ├─ Reason:  {}", halt.reason);
            println!("   └─ Since:   {}", halt.halted_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("ℹ️  No halt to acknowledge."),
    }

    Ok(())
}
