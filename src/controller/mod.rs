//! Controller Loop (spec component D): a single-writer, quarter-hour tick.
//! Generalized from the teacher's `BatteryController`/`AppState` task
//! bootstrap, trimmed to the one job this crate actually does: gather
//! inputs, decide, execute, record.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration as StdDuration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AppConfig;
pub use crate::domain::ledger::IntervalRecord;
use crate::domain::decision::{decide, DecisionConfig, Inputs};
use crate::domain::ledger::{self, LedgerInputs, LedgerState};
use crate::domain::price::{PriceTiering, TieringConfig};
use crate::domain::session::{self, Session, SessionTransition};
use crate::domain::types::{Action, Duration, Price, PriceTier, Timestamp};
use crate::error::ControllerError;
use crate::hardware::inverter::{EnergyFlow, InverterAdapter, InverterError};
use crate::hardware::price_provider::{PriceProvider, PriceProviderError};
use crate::repo::LedgerRepository;

/// Flags for one `send-instruction` invocation, per spec.md §4.D/§6.
#[derive(Debug, Clone, Default)]
pub struct TickOptions {
    pub dry_run: bool,
    pub force: bool,
    pub override_action: Option<Action>,
}

/// What happened on one tick. The CLI derives its exit code from this
/// directly rather than from `ControllerError::exit_code()` alone, since
/// spec.md §6's exit-code rule ("0 success including no-op, 1 precondition
/// failure: misaligned, no price data, fatal adapter error") cuts across
/// `ControllerError` variants in a way a single per-error mapping can't
/// capture — e.g. missing telemetry and missing price data are both
/// `InputMissing` but have different exit codes.
#[derive(Debug)]
pub enum TickOutcome {
    /// The wall clock wasn't on a quarter boundary and `--force` wasn't set.
    Misaligned { attempted_at: Timestamp },
    /// A record for this `(system_id, interval_start)` already exists.
    Duplicate { interval_start: Timestamp },
    /// An external call exceeded its deadline (spec.md §5's cancellation
    /// policy): the tick is abandoned outright, no record written.
    Aborted { interval_start: Timestamp, reason: String },
    /// A record was written (possibly a `decision_source=safety` IDLE record).
    Recorded(IntervalRecord),
}

impl TickOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            TickOutcome::Misaligned { .. } => 1,
            TickOutcome::Duplicate { .. } => 0,
            TickOutcome::Aborted { .. } => 1,
            TickOutcome::Recorded(record) => match record
                .decision_factors
                .get("error_kind")
                .and_then(|v| v.as_str())
            {
                Some("no_price_data") | Some("fatal_adapter") => 1,
                _ => 0,
            },
        }
    }
}

/// Cost-basis and session state carried between ticks, seeded from the
/// ledger at startup. Held behind the same mutex that serializes ticks,
/// since both concerns exist to protect the same single-writer invariant
/// (spec.md §5).
struct RuntimeState {
    ledger_state: LedgerState,
    active_session: Option<Session>,
    previous_interval_end: Option<Timestamp>,
}

pub struct Controller {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    price_provider: Arc<dyn PriceProvider>,
    inverter: Arc<dyn InverterAdapter>,
    repo: LedgerRepository,
    state: Mutex<RuntimeState>,
}

/// Outcome of one deadline-guarded external call.
enum Fetched<T> {
    Ready(T),
    Missing(String),
    TimedOut,
}

async fn fetch<T, E, F>(fut: F, deadline: StdDuration) -> Fetched<T>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match timeout(deadline, fut).await {
        Err(_) => Fetched::TimedOut,
        Ok(Err(e)) => Fetched::Missing(e.to_string()),
        Ok(Ok(v)) => Fetched::Ready(v),
    }
}

/// Everything a decided (non-safety) record needs besides the pre-tick
/// ledger state, grouped so `finish_decided_record` doesn't take twenty
/// positional arguments.
struct DecidedTick<'a> {
    interval_start: Timestamp,
    interval_end: Timestamp,
    soc: f64,
    action: Action,
    power_kw: f64,
    price: Price,
    price_tier: PriceTier,
    daily_avg_price: f64,
    decision_source: String,
    reason: String,
    flow: &'a EnergyFlow,
    is_dry_run: bool,
    execution_success: bool,
    execution_error: Option<String>,
}

impl Controller {
    /// Seed cost-basis and session state from the ledger's most recent rows,
    /// so a restarted process picks up where it left off instead of
    /// resetting `cumulative_charge_cost` to zero.
    pub async fn bootstrap(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        price_provider: Arc<dyn PriceProvider>,
        inverter: Arc<dyn InverterAdapter>,
        repo: LedgerRepository,
    ) -> Result<Self, ControllerError> {
        let system_id = config.system.system_id;

        let latest = repo
            .latest_record(system_id)
            .await
            .map_err(|e| ControllerError::Configuration(e.to_string()))?;

        let (ledger_state, previous_interval_end) = match latest {
            Some(row) => {
                let state = LedgerState {
                    cumulative_charge_cost: row.cumulative_charge_cost,
                    energy_in_battery_kwh: row.energy_in_battery_kwh,
                };
                let end = row
                    .interval_start_at()
                    .map_err(|e| ControllerError::Configuration(e.to_string()))?;
                (state, Some(Timestamp(end).add(Duration::minutes(15))))
            }
            None => (LedgerState::default(), None),
        };

        let active_session_row = repo
            .active_session(system_id)
            .await
            .map_err(|e| ControllerError::Configuration(e.to_string()))?;
        let active_session = active_session_row.and_then(session_from_row);

        Ok(Self {
            config,
            clock,
            price_provider,
            inverter,
            repo,
            state: Mutex::new(RuntimeState {
                ledger_state,
                active_session,
                previous_interval_end,
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run one tick: quarter alignment, idempotency guard, fetch inputs,
    /// decide, execute, record. See spec.md §4.D for the numbered steps this
    /// function implements in order.
    pub async fn tick(&self, opts: TickOptions) -> Result<TickOutcome, ControllerError> {
        let mut state = self.state.lock().await;
        let system_id = self.config.system.system_id;

        // Step 1: quarter alignment.
        let now = self.clock.now();
        if !opts.force && !now.is_quarter_aligned() {
            return Ok(TickOutcome::Misaligned { attempted_at: now });
        }
        let interval_start = now.floor_to_quarter();
        let interval_end = interval_start.add(Duration::minutes(15));

        // Step 2: idempotency guard.
        let existing = self
            .repo
            .find_record(system_id, interval_start)
            .await
            .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
        if existing.is_some() {
            return Ok(TickOutcome::Duplicate { interval_start });
        }

        // Step 3: fetch inputs, each under its own deadline. A timeout
        // abandons the tick outright (spec.md §5); a typed adapter error
        // degrades to a safety record instead (spec.md §7 kind 1).
        let deadline = StdDuration::from_secs(self.config.controller.call_deadline_secs);

        let soc_fetch = fetch(self.inverter.get_battery_soc(), deadline).await;
        if matches!(soc_fetch, Fetched::TimedOut) {
            return Ok(TickOutcome::Aborted {
                interval_start,
                reason: "battery soc call exceeded deadline".into(),
            });
        }
        let flow_fetch = fetch(self.inverter.get_energy_flow(), deadline).await;
        if matches!(flow_fetch, Fetched::TimedOut) {
            return Ok(TickOutcome::Aborted {
                interval_start,
                reason: "energy flow call exceeded deadline".into(),
            });
        }
        let day_start = day_start_of(interval_start);
        let curve_fetch = fetch(
            self.price_provider
                .fetch_day_ahead(self.config.system.price_area, day_start),
            deadline,
        )
        .await;
        if matches!(curve_fetch, Fetched::TimedOut) {
            return Ok(TickOutcome::Aborted {
                interval_start,
                reason: "price fetch call exceeded deadline".into(),
            });
        }

        let soc_start = match &soc_fetch {
            Fetched::Ready(v) => Some(*v),
            _ => None,
        };
        let telemetry_missing_reason = match (&soc_fetch, &flow_fetch) {
            (Fetched::Missing(msg), _) => Some(format!("missing telemetry: {msg}")),
            (_, Fetched::Missing(msg)) => Some(format!("missing telemetry: {msg}")),
            _ => None,
        };
        let price_missing_reason = match &curve_fetch {
            Fetched::Missing(_) => Some("No price data available".to_string()),
            _ => None,
        };

        let record = if let Some(reason) = price_missing_reason {
            self.build_safety_record(system_id, interval_start, interval_end, soc_start, "no_price_data", &reason)
        } else if let Some(reason) = telemetry_missing_reason {
            self.build_safety_record(system_id, interval_start, interval_end, soc_start, "missing_telemetry", &reason)
        } else {
            let curve = match curve_fetch {
                Fetched::Ready(c) => c,
                _ => unreachable!("price fetch failure paths already handled above"),
            };
            let flow = match flow_fetch {
                Fetched::Ready(f) => f,
                _ => unreachable!("telemetry failure paths already handled above"),
            };
            let soc = soc_start.expect("soc fetch succeeded");

            let tiering = PriceTiering::build(
                &curve,
                self.config.system.price_area,
                &TieringConfig::from(&self.config.tiering),
            )
            .map_err(|e| ControllerError::InputMissing(e.to_string()))?;

            let current_point = curve
                .iter()
                .find(|p| p.time_start == interval_start.inner())
                .ok_or_else(|| ControllerError::InputMissing("current slot not in price curve".into()))?;
            let current_price = Price::sek_per_kwh(current_point.price_sek_per_kwh);
            let current_tier = tiering.classify(current_price);
            let daily_avg_price = crate::domain::types::round3(
                curve.iter().map(|p| p.price_sek_per_kwh).sum::<f64>() / curve.len() as f64,
            );
            let forward_curve: Vec<Price> = curve
                .iter()
                .filter(|p| p.time_start >= interval_start.inner())
                .map(|p| Price::sek_per_kwh(p.price_sek_per_kwh))
                .collect();

            // Step 4: decide (or apply the manual override).
            let (decision_action, decision_power_kw, decision_source, reason) =
                if let Some(action) = opts.override_action {
                    let power = override_power(action, &self.config);
                    (action, power, "manual".to_string(), "manual override".to_string())
                } else {
                    let inputs = Inputs {
                        current_price,
                        current_tier,
                        forward_curve: &forward_curve,
                        soc,
                        solar_kw: flow.pv_power_kw,
                        load_kw: flow.load_power_kw,
                        // A successful fetch is always this instant's reading;
                        // the adapter has no separate sample timestamp.
                        telemetry_age_minutes: Some(0),
                    };
                    let decision_cfg: DecisionConfig = self.config.decision_config();
                    let decision = decide(&inputs, &decision_cfg, now);
                    (decision.action, decision.power_kw, "decision".to_string(), decision.reason)
                };

            // Step 5: execute. A fatal adapter error overrides the tick to an
            // IDLE safety record (spec.md §7 kind 3); an exhausted transient
            // error keeps the original decision but flags the failure
            // (spec.md §7 kind 2 "record failure, continue").
            if opts.dry_run {
                self.finish_decided_record(
                    system_id,
                    state.ledger_state,
                    DecidedTick {
                        interval_start,
                        interval_end,
                        soc,
                        action: decision_action,
                        power_kw: decision_power_kw,
                        price: current_price,
                        price_tier: current_tier,
                        daily_avg_price,
                        decision_source,
                        reason,
                        flow: &flow,
                        is_dry_run: true,
                        execution_success: true,
                        execution_error: None,
                    },
                )
            } else {
                match self.execute_with_retry(decision_action, decision_power_kw, deadline).await {
                    Ok(()) => self.finish_decided_record(
                        system_id,
                        state.ledger_state,
                        DecidedTick {
                            interval_start,
                            interval_end,
                            soc,
                            action: decision_action,
                            power_kw: decision_power_kw,
                            price: current_price,
                            price_tier: current_tier,
                            daily_avg_price,
                            decision_source,
                            reason,
                            flow: &flow,
                            is_dry_run: false,
                            execution_success: true,
                            execution_error: None,
                        },
                    ),
                    Err(ControllerError::FatalAdapter(msg)) => {
                        let err_msg = format!("fatal adapter error: {msg}");
                        warn!(error = %err_msg, "inverter rejected command, recording safety idle");
                        self.build_safety_record(
                            system_id, interval_start, interval_end, Some(soc), "fatal_adapter", &err_msg,
                        )
                    }
                    Err(e) => {
                        warn!(error = %e, "inverter execution failed after retries, continuing");
                        self.finish_decided_record(
                            system_id,
                            state.ledger_state,
                            DecidedTick {
                                interval_start,
                                interval_end,
                                soc,
                                action: decision_action,
                                power_kw: decision_power_kw,
                                price: current_price,
                                price_tier: current_tier,
                                daily_avg_price,
                                decision_source,
                                reason,
                                flow: &flow,
                                is_dry_run: false,
                                execution_success: false,
                                execution_error: Some(e.to_string()),
                            },
                        )
                    }
                }
            }
        };

        state.ledger_state = LedgerState {
            cumulative_charge_cost: record.cumulative_charge_cost,
            energy_in_battery_kwh: record.energy_in_battery_kwh,
        };

        // Step 6: record — session tracking, then the interval itself.
        let gap_detected = state
            .previous_interval_end
            .map(|prev_end| session::is_gap(prev_end, interval_start))
            .unwrap_or(false);

        let energy_kwh = (record.power_kw * 0.25).abs();
        let transition = session::observe(
            state.active_session.take(),
            gap_detected,
            system_id,
            record.action,
            interval_start,
            record.soc_start,
            record.power_kw,
            Price::sek_per_kwh(record.price),
            energy_kwh,
        );

        let session_id = self.apply_session_transition(&mut state, transition).await?;

        self.repo.insert_record(&record, Some(session_id)).await?;
        state.previous_interval_end = Some(interval_end);

        info!(
            system_id = %system_id,
            interval_start = %interval_start,
            action = %record.action,
            decision_source = %record.decision_source,
            "tick recorded"
        );

        Ok(TickOutcome::Recorded(record))
    }

    fn finish_decided_record(&self, system_id: Uuid, ledger_state: LedgerState, t: DecidedTick<'_>) -> IntervalRecord {
        let ledger_inputs = LedgerInputs {
            action: t.action,
            power_kw: t.power_kw,
            price: t.price,
            soc_start: t.soc,
            capacity_kwh: self.config.battery.capacity_kwh,
            efficiency: self.config.battery.battery_efficiency.sqrt(),
        };
        let (_new_state, outputs) = ledger::advance(ledger_state, &ledger_inputs);

        let mut factors = json!({
            "is_dry_run": t.is_dry_run,
            "execution_success": t.execution_success,
            "reason": t.reason,
        });
        if let Some(err) = t.execution_error {
            factors["error"] = json!(err);
        }

        let grid_import_kw = t.flow.grid_power_kw.max(0.0);
        let grid_export_kw = (-t.flow.grid_power_kw).max(0.0);

        IntervalRecord {
            system_id,
            interval_start: t.interval_start,
            interval_end: t.interval_end,
            date: t.interval_start.date_naive(),
            hour: t.interval_start.hour(),
            soc_start: t.soc,
            action: t.action,
            power_kw: t.power_kw,
            price: t.price.as_sek_per_kwh(),
            price_tier: t.price_tier,
            daily_avg_price: t.daily_avg_price,
            decision_source: t.decision_source,
            decision_factors: factors,
            interval_cost: outputs.interval_cost,
            cumulative_charge_cost: outputs.cumulative_charge_cost,
            cost_of_current_charge: outputs.cumulative_charge_cost,
            avg_charge_price: outputs.avg_charge_price,
            energy_in_battery_kwh: outputs.energy_in_battery_kwh,
            solar_kw: t.flow.pv_power_kw,
            load_kw: t.flow.load_power_kw,
            grid_import_kw,
            grid_export_kw,
        }
    }

    fn build_safety_record(
        &self,
        system_id: Uuid,
        interval_start: Timestamp,
        interval_end: Timestamp,
        soc_start: Option<f64>,
        error_kind: &str,
        message: &str,
    ) -> IntervalRecord {
        IntervalRecord {
            system_id,
            interval_start,
            interval_end,
            date: interval_start.date_naive(),
            hour: interval_start.hour(),
            soc_start: soc_start.unwrap_or(0.0),
            action: Action::Idle,
            power_kw: 0.0,
            price: 0.0,
            price_tier: PriceTier::Middle,
            daily_avg_price: 0.0,
            decision_source: "safety".to_string(),
            decision_factors: json!({ "error_kind": error_kind, "error": message }),
            interval_cost: 0.0,
            cumulative_charge_cost: 0.0,
            cost_of_current_charge: 0.0,
            avg_charge_price: 0.0,
            energy_in_battery_kwh: 0.0,
            solar_kw: 0.0,
            load_kw: 0.0,
            grid_import_kw: 0.0,
            grid_export_kw: 0.0,
        }
    }

    async fn apply_session_transition(
        &self,
        state: &mut RuntimeState,
        transition: SessionTransition,
    ) -> Result<Uuid, ControllerError> {
        let id = match transition {
            SessionTransition::Opened(session) => {
                let id = session.id;
                self.repo
                    .upsert_session(&session)
                    .await
                    .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
                state.active_session = Some(session);
                id
            }
            SessionTransition::Extended(session) => {
                let id = session.id;
                self.repo
                    .upsert_session(&session)
                    .await
                    .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
                state.active_session = Some(session);
                id
            }
            SessionTransition::Rotated { closed, opened } => {
                self.repo
                    .upsert_session(&closed)
                    .await
                    .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
                self.repo
                    .upsert_session(&opened)
                    .await
                    .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
                let id = opened.id;
                state.active_session = Some(opened);
                id
            }
            SessionTransition::AbortedAndOpened { aborted, opened } => {
                self.repo
                    .upsert_session(&aborted)
                    .await
                    .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
                self.repo
                    .upsert_session(&opened)
                    .await
                    .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
                let id = opened.id;
                state.active_session = Some(opened);
                id
            }
        };
        Ok(id)
    }

    /// Execute one command, retrying `TransientAdapter` failures up to
    /// `max_retries` with linear backoff, per spec.md §4.D step 5.
    async fn execute_with_retry(
        &self,
        action: Action,
        power_kw: f64,
        deadline: StdDuration,
    ) -> Result<(), ControllerError> {
        let max_retries = self.config.controller.max_retries;
        let delay = StdDuration::from_secs(self.config.controller.retry_delay_secs);

        let mut attempt = 0;
        loop {
            let result = timeout(deadline, self.inverter.set_mode(action, power_kw)).await;
            match result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(InverterError::Fatal(msg))) => {
                    return Err(ControllerError::FatalAdapter(msg));
                }
                Ok(Err(InverterError::Transient(msg))) if attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries, error = %msg, "inverter command failed, retrying");
                    sleep(delay).await;
                }
                Ok(Err(InverterError::Transient(msg))) => {
                    return Err(ControllerError::TransientAdapter(msg));
                }
                Err(_) if attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries, "inverter command timed out, retrying");
                    sleep(delay).await;
                }
                Err(_) => {
                    return Err(ControllerError::TransientAdapter("call deadline exceeded".into()));
                }
            }
        }
    }

    /// Recompute the ledger's derived cost fields forward from `from`, for
    /// when an operator corrects or backfills a record out of order. Held
    /// behind the same mutex as `tick` so a backfill can't race a live tick
    /// writing the interval it's about to recompute.
    pub async fn backfill(&self, from: Timestamp) -> Result<usize, ControllerError> {
        let mut state = self.state.lock().await;
        let system_id = self.config.system.system_id;
        let updated = self
            .repo
            .backfill_forward(
                system_id,
                from,
                self.config.battery.capacity_kwh,
                self.config.battery.battery_efficiency.sqrt(),
            )
            .await
            .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;

        // The in-memory cost basis a live tick reads may now be stale if the
        // backfill touched the most recent record; reload it from the
        // ledger rather than letting the next tick build on a superseded
        // cumulative_charge_cost.
        if let Some(row) = self
            .repo
            .latest_record(system_id)
            .await
            .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?
        {
            state.ledger_state = LedgerState {
                cumulative_charge_cost: row.cumulative_charge_cost,
                energy_in_battery_kwh: row.energy_in_battery_kwh,
            };
        }

        Ok(updated)
    }
}

/// Power to use for a manually overridden action, since `--override` skips
/// the Decision Maker entirely and so never computes one itself.
fn override_power(action: Action, config: &AppConfig) -> f64 {
    match action {
        Action::Charge => config.battery.safe_charge_power_kw,
        Action::Discharge | Action::SelfConsumeGrid => config.battery.safe_discharge_power_kw,
        Action::Idle | Action::SelfConsume => 0.0,
    }
}

fn day_start_of(ts: Timestamp) -> DateTime<FixedOffset> {
    let date = ts.inner().date_naive();
    let offset = *ts.inner().offset();
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_local_timezone(offset)
        .single()
        .expect("fixed offsets are never ambiguous")
}

fn session_from_row(row: crate::database::models::SessionRow) -> Option<Session> {
    if row.status != "active" {
        return None;
    }
    let action = Action::from_wire_str(&row.action)?;
    let started_at = DateTime::parse_from_rfc3339(&row.started_at).ok()?;
    Some(Session::open(
        Uuid::parse_str(&row.system_id).ok()?,
        action,
        Timestamp(started_at),
        row.start_soc,
        row.power_kw,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{
        BatteryConfig, ControllerConfig, DatabaseConfig, StrategyConfig, SystemConfig,
        TelemetryConfig, TieringSettings,
    };
    use crate::database::Database;
    use crate::domain::types::{PriceArea, PricePoint};
    use crate::hardware::inverter::SimulatedInverter;
    use crate::hardware::price_provider::SimulatedPriceProvider;
    use chrono::TimeZone;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(3600).unwrap()
    }

    fn test_config(system_id: Uuid) -> AppConfig {
        AppConfig {
            system: SystemConfig {
                system_id,
                timezone: "Europe/Stockholm".to_string(),
                price_area: PriceArea::SE3,
            },
            battery: BatteryConfig {
                capacity_kwh: 10.0,
                min_soc: 20.0,
                max_soc: 95.0,
                emergency_reserve: 15.0,
                safe_charge_power_kw: 3.0,
                safe_discharge_power_kw: 3.0,
                battery_efficiency: 0.93,
            },
            strategy: StrategyConfig {
                prioritize_solar: true,
                export_excess_solar: false,
                self_consume_preference: false,
                grid_charge_threshold: 0.5,
                grid_discharge_threshold: 2.0,
                telemetry_stale_after_minutes: 10,
            },
            controller: ControllerConfig {
                optimization_interval_minutes: 15,
                max_retries: 3,
                retry_delay_secs: 0,
                call_deadline_secs: 5,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_json: false,
            },
            tiering: TieringSettings {
                cheapest_fraction: 1.0 / 3.0,
                expensive_fraction: 1.0 / 3.0,
                absolute_cheap_ceiling: None,
                absolute_expensive_floor: None,
            },
        }
    }

    fn day_curve(day_start: DateTime<FixedOffset>, price: f64) -> Vec<PricePoint> {
        (0..96)
            .map(|i| PricePoint {
                time_start: day_start + chrono::Duration::minutes(15 * i),
                time_end: day_start + chrono::Duration::minutes(15 * (i + 1)),
                price_sek_per_kwh: price,
            })
            .collect()
    }

    async fn build_controller(
        system_id: Uuid,
        now: DateTime<FixedOffset>,
        price: f64,
        soc: f64,
    ) -> Controller {
        let config = test_config(system_id);
        let db = Database::new(&config.database).await.unwrap();
        let repo = LedgerRepository::new(db.pool().clone());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Timestamp(now)));
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_local_timezone(tz())
            .unwrap();
        let provider = SimulatedPriceProvider::new(day_curve(day_start, price));
        let price_provider: Arc<dyn PriceProvider> = Arc::new(provider);
        let inverter: Arc<dyn InverterAdapter> =
            Arc::new(SimulatedInverter::new(soc, 0.0, 1.0, 10.0, 0.93_f64.sqrt()));
        Controller::bootstrap(config, clock, price_provider, inverter, repo)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn misaligned_tick_without_force_is_rejected() {
        let system_id = Uuid::new_v4();
        let now = tz().with_ymd_and_hms(2026, 1, 1, 2, 31, 0).unwrap();
        let controller = build_controller(system_id, now, 0.1, 45.0).await;
        let outcome = controller.tick(TickOptions::default()).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Misaligned { .. }));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn repeated_tick_at_same_quarter_is_idempotent() {
        let system_id = Uuid::new_v4();
        let now = tz().with_ymd_and_hms(2026, 1, 1, 2, 30, 0).unwrap();
        let controller = build_controller(system_id, now, 0.1, 45.0).await;
        let first = controller.tick(TickOptions::default()).await.unwrap();
        assert!(matches!(first, TickOutcome::Recorded(_)));
        let second = controller.tick(TickOptions::default()).await.unwrap();
        assert!(matches!(second, TickOutcome::Duplicate { .. }));
        assert_eq!(second.exit_code(), 0);
    }

    #[tokio::test]
    async fn cheap_charge_tick_records_decision_source() {
        let system_id = Uuid::new_v4();
        let now = tz().with_ymd_and_hms(2026, 1, 1, 2, 30, 0).unwrap();
        let controller = build_controller(system_id, now, 0.10, 45.0).await;
        let outcome = controller.tick(TickOptions::default()).await.unwrap();
        match &outcome {
            TickOutcome::Recorded(record) => {
                assert_eq!(record.action, Action::Charge);
                assert_eq!(record.decision_source, "decision");
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn dry_run_skips_execution_but_still_records() {
        let system_id = Uuid::new_v4();
        let now = tz().with_ymd_and_hms(2026, 1, 1, 2, 30, 0).unwrap();
        let controller = build_controller(system_id, now, 0.10, 45.0).await;
        let opts = TickOptions {
            dry_run: true,
            ..Default::default()
        };
        let outcome = controller.tick(opts).await.unwrap();
        match outcome {
            TickOutcome::Recorded(record) => {
                assert_eq!(record.decision_factors["is_dry_run"], true);
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn override_bypasses_decision_maker() {
        let system_id = Uuid::new_v4();
        let now = tz().with_ymd_and_hms(2026, 1, 1, 2, 30, 0).unwrap();
        let controller = build_controller(system_id, now, 0.10, 45.0).await;
        let opts = TickOptions {
            override_action: Some(Action::Discharge),
            ..Default::default()
        };
        let outcome = controller.tick(opts).await.unwrap();
        match outcome {
            TickOutcome::Recorded(record) => {
                assert_eq!(record.action, Action::Discharge);
                assert_eq!(record.decision_source, "manual");
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_price_data_writes_safety_record_and_exits_nonzero() {
        let system_id = Uuid::new_v4();
        let now = tz().with_ymd_and_hms(2026, 1, 1, 2, 30, 0).unwrap();
        let config = test_config(system_id);
        let db = Database::new(&config.database).await.unwrap();
        let repo = LedgerRepository::new(db.pool().clone());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Timestamp(now)));
        let price_provider: Arc<dyn PriceProvider> = Arc::new(SimulatedPriceProvider::new(vec![]));
        let inverter: Arc<dyn InverterAdapter> =
            Arc::new(SimulatedInverter::new(45.0, 0.0, 1.0, 10.0, 0.93_f64.sqrt()));
        let controller = Controller::bootstrap(config, clock, price_provider, inverter, repo)
            .await
            .unwrap();

        let outcome = controller.tick(TickOptions::default()).await.unwrap();
        assert_eq!(outcome.exit_code(), 1);
        match outcome {
            TickOutcome::Recorded(record) => {
                assert_eq!(record.decision_source, "safety");
                assert_eq!(record.action, Action::Idle);
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
    }
}
