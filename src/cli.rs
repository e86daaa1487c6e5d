//! CLI surface (spec.md §6): `send-instruction`, `plan`, `run`, `backfill` —
//! the external entry points a real deployment or an operator's cron job
//! drives. Argument shape generalized from the teacher's `clap`-derive idiom.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::controller::{Controller, TickOptions, TickOutcome};
use crate::domain::types::{Action, PricePoint, Timestamp};
use crate::hardware::inverter::{InverterAdapter, SimulatedInverter};
use crate::hardware::price_provider::{PriceProvider, SimulatedPriceProvider};
use crate::planner::{self, PlannerForecast};
use crate::repo::LedgerRepository;

#[derive(Parser)]
#[command(name = "battery-controller")]
#[command(author, version, about = "Price-aware battery optimization controller")]
#[command(long_about = "Drives a home battery from day-ahead spot prices and live telemetry.\n\
    \nSubcommands:\n  \
    send-instruction   Run one quarter-hour tick now\n  \
    plan                Preview the day's schedule without touching hardware\n  \
    run                 Run the controller loop continuously\n  \
    backfill            Recompute cost-ledger fields forward from an interval\n\
    \nExamples:\n  \
    battery-controller send-instruction\n  \
    battery-controller send-instruction --dry-run\n  \
    battery-controller plan\n  \
    battery-controller run\n  \
    battery-controller backfill --since 2026-01-01T00:00:00+01:00")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single controller tick now and exit
    #[command(long_about = "Runs exactly one tick of the controller loop: fetch inputs, decide,\n\
        execute, record. Intended to be invoked by an external scheduler\n\
        (cron, systemd timer) once per quarter hour.\n\
        \nExamples:\n  \
        battery-controller send-instruction\n  \
        battery-controller send-instruction --dry-run\n  \
        battery-controller send-instruction --override=discharge")]
    SendInstruction(SendInstructionArgs),

    /// Preview the Day Planner's schedule for today without touching hardware
    #[command(long_about = "Builds the 96-slot schedule the Day Planner would produce for today's\n\
        price curve, printed as JSON. Read-only: never calls the inverter.\n\
        \nExample:\n  \
        battery-controller plan")]
    Plan(PlanArgs),

    /// Run the controller loop continuously, ticking once per quarter hour
    #[command(long_about = "Long-lived process: sleeps until the next quarter-hour boundary,\n\
        ticks, repeats, until interrupted (SIGINT/SIGTERM).\n\
        \nExample:\n  \
        battery-controller run")]
    Run(RunArgs),

    /// Recompute cost-ledger fields forward from a given interval
    #[command(long_about = "Recomputes cumulative_charge_cost/avg_charge_price/energy_in_battery_kwh\n\
        forward from --since, for when a record was backfilled or corrected\n\
        out of order and the derived cost trail after it is now stale.\n\
        \nExample:\n  \
        battery-controller backfill --since 2026-01-01T00:00:00+01:00")]
    Backfill(BackfillArgs),
}

#[derive(Parser, Default)]
pub struct SendInstructionArgs {
    /// Compute and log the decision but do not call the inverter or write a record
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Run even if the wall clock isn't on a quarter-hour boundary
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Skip the Decision Maker and force this action instead
    #[arg(long, value_name = "ACTION", value_parser = parse_action)]
    pub r#override: Option<Action>,
}

#[derive(Parser, Default)]
pub struct PlanArgs {
    /// Starting SOC to simulate forward from (0-100); defaults to the inverter's current reading
    #[arg(long)]
    pub starting_soc: Option<f64>,
}

#[derive(Parser, Default)]
pub struct RunArgs {}

#[derive(Parser)]
pub struct BackfillArgs {
    /// Recompute forward from this interval (RFC3339), inclusive
    #[arg(long, value_parser = parse_rfc3339)]
    pub since: DateTime<FixedOffset>,
}

fn parse_rfc3339(s: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(s).map_err(|e| format!("invalid RFC3339 timestamp '{s}': {e}"))
}

fn parse_action(s: &str) -> Result<Action, String> {
    match s.to_ascii_lowercase().replace('_', "-").as_str() {
        "charge" => Ok(Action::Charge),
        "discharge" => Ok(Action::Discharge),
        "idle" => Ok(Action::Idle),
        "self-consume" | "selfconsumption" => Ok(Action::SelfConsume),
        "self-consume-grid" | "selfconsumption-grid" => Ok(Action::SelfConsumeGrid),
        other => Err(format!(
            "unknown action '{other}'; expected one of: charge, discharge, idle, self-consume, self-consume-grid"
        )),
    }
}

/// A representative day-ahead shape (cheap overnight, a midday dip, an
/// evening peak) used to seed the default simulated price provider so the
/// `sim` build is runnable without any external price feed configured.
const REPRESENTATIVE_HOURLY_PRICES: [f64; 24] = [
    0.35, 0.30, 0.28, 0.26, 0.25, 0.28, 0.40, 0.55, 0.65, 0.60, 0.55, 0.50, 0.48, 0.50, 0.55, 0.60,
    0.70, 0.85, 0.95, 0.90, 0.75, 0.60, 0.45, 0.38,
];

fn midnight_of(now_in_tz: DateTime<chrono_tz::Tz>, offset: FixedOffset) -> DateTime<FixedOffset> {
    now_in_tz
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_local_timezone(offset)
        .single()
        .expect("fixed offsets are never ambiguous")
}

/// Assembles the adapters the `sim` feature backs by default, and (behind
/// `live-price`) the HTTP price provider for a real deployment.
struct Adapters {
    clock: Arc<dyn Clock>,
    price_provider: Arc<dyn PriceProvider>,
    inverter: Arc<dyn InverterAdapter>,
}

fn build_adapters(config: &AppConfig) -> Result<Adapters> {
    let tz: chrono_tz::Tz = config
        .system
        .timezone
        .parse()
        .map_err(|_| anyhow!("invalid timezone '{}'", config.system.timezone))?;
    let offset = *chrono::Utc::now().with_timezone(&tz).offset();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(offset));

    #[cfg(feature = "live-price")]
    let price_provider: Arc<dyn PriceProvider> = Arc::new(crate::hardware::live_price::HttpPriceProvider::new(
        std::env::var("BATTERY_PRICE_API_URL")
            .context("BATTERY_PRICE_API_URL must be set when the live-price feature is enabled")?,
        std::time::Duration::from_secs(config.controller.call_deadline_secs),
    ));
    // No network access by default: seed two days of a representative
    // day-ahead curve (cheap overnight, expensive evening peak) so
    // send-instruction/plan/run are actually runnable out of the box
    // instead of failing with "no price data available" every time.
    #[cfg(not(feature = "live-price"))]
    let price_provider: Arc<dyn PriceProvider> = {
        let today = midnight_of(chrono::Utc::now().with_timezone(&tz), offset);
        let mut curve = planner::upsample_to_quarters(&REPRESENTATIVE_HOURLY_PRICES, today, 60);
        curve.extend(planner::upsample_to_quarters(
            &REPRESENTATIVE_HOURLY_PRICES,
            today + chrono::Duration::days(1),
            60,
        ));
        Arc::new(SimulatedPriceProvider::new(curve))
    };

    let inverter: Arc<dyn InverterAdapter> = Arc::new(SimulatedInverter::new(
        50.0,
        0.0,
        1.0,
        config.battery.capacity_kwh,
        config.battery.battery_efficiency.sqrt(),
    ));

    Ok(Adapters {
        clock,
        price_provider,
        inverter,
    })
}

pub async fn run(cli: Cli, config: AppConfig) -> Result<i32> {
    match cli.command {
        Commands::SendInstruction(args) => send_instruction(config, args).await,
        Commands::Plan(args) => plan(config, args).await,
        Commands::Run(args) => run_loop(config, args).await,
        Commands::Backfill(args) => backfill(config, args).await,
    }
}

async fn send_instruction(config: AppConfig, args: SendInstructionArgs) -> Result<i32> {
    let adapters = build_adapters(&config)?;
    let repo = LedgerRepository::new(
        crate::database::Database::new(&config.database)
            .await
            .context("failed to open ledger database")?
            .pool()
            .clone(),
    );

    let controller = Controller::bootstrap(
        config,
        adapters.clock,
        adapters.price_provider,
        adapters.inverter,
        repo,
    )
    .await
    .context("failed to bootstrap controller")?;

    let opts = TickOptions {
        dry_run: args.dry_run,
        force: args.force,
        override_action: args.r#override,
    };

    let outcome = controller.tick(opts).await?;
    let exit_code = outcome.exit_code();

    match &outcome {
        TickOutcome::Misaligned { attempted_at } => {
            error!(%attempted_at, "tick attempted off a quarter-hour boundary");
        }
        TickOutcome::Duplicate { interval_start } => {
            info!(%interval_start, "record already exists for this interval, no-op");
        }
        TickOutcome::Aborted { interval_start, reason } => {
            error!(%interval_start, %reason, "tick aborted, external call exceeded its deadline");
        }
        TickOutcome::Recorded(record) => {
            println!("{}", serde_json::to_string_pretty(record)?);
        }
    }

    Ok(exit_code)
}

async fn plan(config: AppConfig, args: PlanArgs) -> Result<i32> {
    let adapters = build_adapters(&config)?;
    let now = adapters.clock.now();
    let day_start = now
        .inner()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_local_timezone(*now.inner().offset())
        .single()
        .expect("fixed offsets are never ambiguous");

    let curve = adapters
        .price_provider
        .fetch_day_ahead(config.system.price_area, day_start)
        .await
        .map_err(|e| anyhow!("failed to fetch today's price curve: {e}"))?;

    let starting_soc = match args.starting_soc {
        Some(soc) => soc,
        None => adapters
            .inverter
            .get_battery_soc()
            .await
            .map_err(|e| anyhow!("failed to read battery soc: {e}"))?,
    };

    let prices: Vec<PricePoint> = curve;
    let schedule = planner::generate_day_schedule(
        &prices,
        starting_soc,
        &config.decision_config(),
        &crate::domain::price::TieringConfig::from(&config.tiering),
        config.system.price_area,
        PlannerForecast {
            solar_kw: None,
            load_kw: None,
        },
        config.battery.capacity_kwh,
        config.battery.battery_efficiency.sqrt(),
    )
    .map_err(|e| anyhow!("failed to build day schedule: {e}"))?;

    println!("{}", serde_json::to_string_pretty(&schedule)?);
    Ok(0)
}

async fn run_loop(config: AppConfig, _args: RunArgs) -> Result<i32> {
    let adapters = build_adapters(&config)?;
    let repo = LedgerRepository::new(
        crate::database::Database::new(&config.database)
            .await
            .context("failed to open ledger database")?
            .pool()
            .clone(),
    );

    let controller = Controller::bootstrap(
        config,
        adapters.clock,
        adapters.price_provider,
        adapters.inverter,
        repo,
    )
    .await
    .context("failed to bootstrap controller")?;

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));

    info!("controller loop starting, ticking once per quarter hour");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match controller.tick(TickOptions::default()).await {
                    Ok(TickOutcome::Misaligned { .. }) => {}
                    Ok(outcome) => {
                        info!(exit_code = outcome.exit_code(), "tick complete");
                    }
                    Err(e) => {
                        error!(error = %e, "tick failed");
                    }
                }
            }
            _ = crate::telemetry::shutdown_signal() => {
                info!("run loop shutting down");
                break;
            }
        }
    }

    Ok(0)
}

async fn backfill(config: AppConfig, args: BackfillArgs) -> Result<i32> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(*args.since.offset()));
    let price_provider: Arc<dyn PriceProvider> = Arc::new(SimulatedPriceProvider::new(Vec::new()));
    let inverter: Arc<dyn InverterAdapter> = Arc::new(SimulatedInverter::new(
        50.0,
        0.0,
        1.0,
        config.battery.capacity_kwh,
        config.battery.battery_efficiency.sqrt(),
    ));
    let repo = LedgerRepository::new(
        crate::database::Database::new(&config.database)
            .await
            .context("failed to open ledger database")?
            .pool()
            .clone(),
    );

    let controller = Controller::bootstrap(config, clock, price_provider, inverter, repo)
        .await
        .context("failed to bootstrap controller")?;

    let updated = controller
        .backfill(Timestamp(args.since))
        .await
        .context("backfill recompute failed")?;

    info!(updated, since = %args.since, "backfill recompute complete");
    println!("{{\"updated\": {updated}}}");
    Ok(0)
}
