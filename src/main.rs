//! Delta-Neutral Vault - Main Entry Point
//!
//! Paper-runs a vault over the simulated venue and reports on past runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use delta_neutral_vault::config::Config;
use delta_neutral_vault::keeper::Keeper;
use delta_neutral_vault::market::BASE_DECIMALS;
use delta_neutral_vault::persistence::PersistenceManager;
use delta_neutral_vault::simulation::SimulatedVault;
use delta_neutral_vault::utils::{from_basis_points, from_fixed};
use delta_neutral_vault::vault::{PositionSnapshot, VaultEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Delta-Neutral Vault CLI
#[derive(Parser)]
#[command(name = "delta-neutral-vault")]
#[command(version, about = "Flash-loan orchestrated delta-neutral vault")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the keeper against the simulated venue, following the configured price path
    Run {
        /// Override the keeper interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Show the journaled state of a previous run
    Status {
        /// Path to SQLite database (default: configured db_path)
        #[arg(short, long)]
        db: Option<String>,

        /// Number of recent events to list
        #[arg(short, long, default_value = "10")]
        events: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Some(Commands::Status { db, events }) => {
            let db = db.unwrap_or_else(|| config.persistence.db_path.clone());
            show_status(&db, events)
        }
        Some(Commands::Run { interval_ms }) => run_keeper(&config, interval_ms).await,
        None => run_keeper(&config, None).await,
    }
}

async fn run_keeper(config: &Config, interval_ms: Option<u64>) -> Result<()> {
    info!(
        "Delta-Neutral Vault v{} - paper run",
        env!("CARGO_PKG_VERSION")
    );
    log_config(config);

    let sim = SimulatedVault::from_config(config)?;
    let journal = PersistenceManager::new(&config.persistence.db_path)?;
    let mut keeper =
        Keeper::new(sim.manager.clone(), config.keeper.keeper_address()?).with_journal(journal);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_secs(config.keeper.interval_secs));
    keeper
        .run(interval, shutdown, |tick| sim.apply_tick(tick))
        .await?;

    let snapshot = sim.manager.position_snapshot()?;
    log_snapshot(&snapshot);
    info!("Paper run complete");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "delta-neutral-vault.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("delta_neutral_vault=debug".parse()?)
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

fn log_config(config: &Config) {
    info!("Configuration:");
    info!(
        "   Reserve / Collateral: {} / {}",
        config.simulation.reserve_symbol, config.simulation.collateral_symbol
    );
    info!(
        "   Deposit Bounds: {} - {} {}",
        config.vault.min_deposit, config.vault.max_deposit, config.simulation.reserve_symbol
    );
    info!(
        "   LTV Distance: {:.2}%",
        from_basis_points(config.vault.additional_ltv_distance_bps) * dec!(100)
    );
    info!(
        "   Rebalance Band: {:.2}%",
        from_basis_points(config.vault.min_rebalance_bps) * dec!(100)
    );
    info!(
        "   Flash Fee / Slippage: {} / {} bps",
        config.simulation.flash_fee_bps, config.simulation.swap_slippage_bps
    );
    info!("   Price Path: {} ticks", config.simulation.price_path.len());
}

fn base(amount: u128) -> Decimal {
    from_fixed(amount, BASE_DECIMALS).unwrap_or_default()
}

fn log_snapshot(snapshot: &PositionSnapshot) {
    info!(
        collateral = %base(snapshot.collateral_base),
        debt = %base(snapshot.debt_base),
        idle_reserve = %base(snapshot.idle_reserve_base),
        total = %base(snapshot.total_base),
        ltv_bps = snapshot.current_ltv_bps,
        "Final position"
    );
}

fn describe(event: &VaultEvent) -> String {
    match event {
        VaultEvent::PositionDeposit {
            reserve_amount,
            base_value,
            recipient,
            shares_minted,
        } => format!(
            "deposit {} by {} for ${:.2} ({} shares)",
            reserve_amount,
            recipient,
            base(*base_value),
            shares_minted
        ),
        VaultEvent::PositionWithdraw {
            shares_burned,
            base_value,
            reserve_amount,
            recipient,
        } => format!(
            "withdraw {} to {} for ${:.2} ({} shares)",
            reserve_amount,
            recipient,
            base(*base_value),
            shares_burned
        ),
        VaultEvent::PositionClose { reserve_amount } => {
            format!("close, {} reserve returned", reserve_amount)
        }
        VaultEvent::PositionRebalance {
            debt_change_base,
            used_flash_loan,
            ..
        } => format!(
            "rebalance {}${:.2} debt{}",
            if *debt_change_base >= 0 { "+" } else { "-" },
            base(debt_change_base.unsigned_abs()),
            if *used_flash_loan { " (flash)" } else { "" }
        ),
        VaultEvent::SettingsUpdated { settings } => {
            format!("settings updated, flags {:#x}", settings.flags)
        }
    }
}

/// Show journaled status from the database.
fn show_status(db_path: &str, event_limit: usize) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              DELTA-NEUTRAL VAULT STATUS                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The keeper has not been run yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let Some(latest) = persistence.latest_snapshot()? else {
        println!("\n❌ No snapshots found in database.");
        return Ok(());
    };
    let snapshot = latest.snapshot;

    println!("\n📊 Position");
    println!("   ├─ Collateral:       ${:.2}", base(snapshot.collateral_base));
    println!("   ├─ Debt:             ${:.2}", base(snapshot.debt_base));
    println!("   ├─ Idle Reserve:     ${:.2}", base(snapshot.idle_reserve_base));
    println!("   ├─ Idle Collateral:  ${:.2}", base(snapshot.idle_collateral_base));
    println!("   ├─ Net Value:        ${:.2}", base(snapshot.total_base));
    println!(
        "   ├─ LTV:              {:.2}% (target {:.2}%)",
        from_basis_points(snapshot.current_ltv_bps) * dec!(100),
        from_basis_points(snapshot.target_ltv_bps) * dec!(100)
    );
    println!("   ├─ Shares:           {}", snapshot.total_shares);
    println!("   ├─ Closed:           {}", snapshot.closed);
    println!("   └─ Last Updated:     {}", latest.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));

    let counts = persistence.event_counts()?;
    if !counts.is_empty() {
        println!("\n📈 Activity");
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        for (name, count) in counts {
            println!("   ├─ {:<18} {}", name, count);
        }
    }

    let events = persistence.recent_events(event_limit)?;
    if !events.is_empty() {
        println!("\n🧾 Recent Events");
        for entry in events {
            println!(
                "   {}  {}",
                entry.timestamp.format("%H:%M:%S"),
                describe(&entry.event)
            );
        }
    }

    Ok(())
}
