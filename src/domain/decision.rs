//! Decision Maker (spec component B): a pure function from the current
//! reading of the world to a single `Decision`. No network or disk access —
//! the controller loop is the only caller that touches I/O.

use serde::{Deserialize, Serialize};

use super::price::PriceTiering;
use super::types::{round3, Action, Confidence, Power, Price, PriceTier, Priority, Timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub power_kw: f64,
    pub confidence: Confidence,
    pub reason: String,
    pub priority: Option<Priority>,
}

impl Decision {
    fn idle(confidence: Confidence, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Idle,
            power_kw: 0.0,
            confidence,
            reason: reason.into(),
            priority: None,
        }
    }
}

/// Battery and strategy thresholds the decision rules are evaluated against.
/// Grouped separately from `AppConfig` so the pure decision module never
/// depends on the config-loading crates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    pub min_soc: f64,
    pub max_soc: f64,
    pub safe_charge_power_kw: f64,
    pub safe_discharge_power_kw: f64,
    pub grid_charge_threshold: f64,
    pub grid_discharge_threshold: f64,
    pub prioritize_solar: bool,
    /// "SELF_CONSUME preference" — distinct from `prioritize_solar`. Clamps
    /// rule 3's discharge power to `load_kw` when set; off by default so the
    /// battery discharges to the grid at full `safe_discharge_power_kw`.
    pub self_consume_preference: bool,
    pub telemetry_stale_after_minutes: i64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_soc: 20.0,
            max_soc: 95.0,
            safe_charge_power_kw: 3.0,
            safe_discharge_power_kw: 3.0,
            grid_charge_threshold: 0.5,
            // Relative to the tier boundary rather than an independent
            // absolute floor: any slot the Price Tierer already classifies
            // as expensive clears this by construction, so the default
            // leaves the tier signal as the sole gate and reserves a
            // positive value for operators who want a stricter floor.
            grid_discharge_threshold: 0.0,
            prioritize_solar: true,
            self_consume_preference: false,
            telemetry_stale_after_minutes: 10,
        }
    }
}

/// Live readings fed into one `decide()` call.
#[derive(Debug, Clone)]
pub struct Inputs<'a> {
    pub current_price: Price,
    pub current_tier: PriceTier,
    /// The day's forward curve, used only to rank the current slot's
    /// confidence among the cheapest/most-expensive remaining slots.
    pub forward_curve: &'a [Price],
    pub soc: f64,
    pub solar_kw: f64,
    pub load_kw: f64,
    pub telemetry_age_minutes: Option<i64>,
}

/// Pure decision function: safety gates first, then the five ordered rules
/// from spec.md §4.B, first match wins.
pub fn decide(inputs: &Inputs, cfg: &DecisionConfig, _clock_now: Timestamp) -> Decision {
    // Safety gates.
    if inputs.soc < cfg.min_soc {
        return Decision::idle(
            Confidence::Low,
            format!("soc {:.1} below min_soc {:.1}", inputs.soc, cfg.min_soc),
        );
    }
    if inputs.soc > cfg.max_soc {
        return Decision::idle(
            Confidence::Low,
            format!("soc {:.1} above max_soc {:.1}", inputs.soc, cfg.max_soc),
        );
    }
    if let Some(age) = inputs.telemetry_age_minutes {
        if age > cfg.telemetry_stale_after_minutes {
            return Decision::idle(Confidence::Low, "stale telemetry".to_string());
        }
    }

    let price = round3(inputs.current_price.as_sek_per_kwh());

    // Rule 1: excess-solar charge.
    let excess_solar = inputs.solar_kw - inputs.load_kw;
    if excess_solar >= 0.5 && inputs.soc < cfg.max_soc {
        let power = excess_solar.min(cfg.safe_charge_power_kw);
        if power > 0.0 {
            return Decision {
                action: Action::Charge,
                power_kw: power,
                confidence: Confidence::High,
                reason: format!("excess solar {excess_solar:.2} kW over load"),
                priority: Some(Priority::Solar),
            };
        }
    }

    // Rule 2: cheap-window charge.
    if inputs.current_tier == PriceTier::Cheapest
        && price <= cfg.grid_charge_threshold
        && inputs.soc < cfg.max_soc - 5.0
    {
        let confidence = cheap_window_confidence(inputs, cfg);
        return Decision {
            action: Action::Charge,
            power_kw: cfg.safe_charge_power_kw,
            confidence,
            reason: format!("cheapest tier at {price:.3} SEK/kWh, below grid_charge_threshold"),
            priority: Some(Priority::Grid),
        };
    }

    // Rule 3: expensive-window discharge.
    if inputs.current_tier == PriceTier::Expensive
        && price >= cfg.grid_discharge_threshold
        && inputs.soc > cfg.min_soc + 5.0
    {
        let mut power = cfg.safe_discharge_power_kw;
        if cfg.self_consume_preference {
            power = power.min(inputs.load_kw.max(0.0));
        }
        if power > 0.0 {
            let confidence = expensive_window_confidence(inputs, cfg);
            return Decision {
                action: Action::Discharge,
                power_kw: power,
                confidence,
                reason: format!(
                    "expensive tier at {price:.3} SEK/kWh, above grid_discharge_threshold"
                ),
                priority: Some(Priority::Grid),
            };
        }
    }

    // Rule 4: load-following.
    if inputs.load_kw > inputs.solar_kw + 1.0 && inputs.soc > cfg.min_soc {
        let power = (inputs.load_kw - inputs.solar_kw).min(cfg.safe_discharge_power_kw);
        if power > 0.0 {
            return Decision {
                action: Action::Discharge,
                power_kw: power,
                confidence: Confidence::Medium,
                reason: format!(
                    "load {:.2} kW exceeds solar {:.2} kW",
                    inputs.load_kw, inputs.solar_kw
                ),
                priority: Some(Priority::LoadBalancing),
            };
        }
    }

    // Rule 5: no trigger.
    Decision::idle(Confidence::Medium, "no trigger".to_string())
}

/// High confidence iff the current slot is among the N cheapest remaining
/// slots today, where N is the number of quarter-hour slots needed to bring
/// the battery from its current SOC up to `max_soc` at full charge power.
fn cheap_window_confidence(inputs: &Inputs, cfg: &DecisionConfig) -> Confidence {
    if inputs.forward_curve.is_empty() {
        return Confidence::Medium;
    }
    // Assume a 10 kWh reference capacity when the caller doesn't know the
    // real pack size; this only affects how many slots count as "needed",
    // never the decision itself.
    let headroom_pct = (cfg.max_soc - inputs.soc).max(0.0);
    let energy_needed_kwh = headroom_pct / 100.0 * 10.0;
    let slots_needed = (energy_needed_kwh / (cfg.safe_charge_power_kw * 0.25))
        .ceil()
        .max(1.0) as usize;

    let mut sorted: Vec<f64> = inputs
        .forward_curve
        .iter()
        .map(|p| p.as_sek_per_kwh())
        .collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let threshold_idx = slots_needed.min(sorted.len()).saturating_sub(1);
    let threshold = sorted[threshold_idx];

    if round3(inputs.current_price.as_sek_per_kwh()) <= round3(threshold) {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

/// Symmetric rule for discharge: high confidence iff the current slot is
/// among the N most expensive remaining slots today.
fn expensive_window_confidence(inputs: &Inputs, _cfg: &DecisionConfig) -> Confidence {
    if inputs.forward_curve.is_empty() {
        return Confidence::Medium;
    }
    let mut sorted: Vec<f64> = inputs
        .forward_curve
        .iter()
        .map(|p| p.as_sek_per_kwh())
        .collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    let n = (sorted.len() / 3).max(1);
    let threshold = sorted[n - 1];
    if round3(inputs.current_price.as_sek_per_kwh()) >= round3(threshold) {
        Confidence::High
    } else {
        Confidence::Medium
    }
}
