//! Cost Ledger math (spec component F): pure cost-accounting formulas shared
//! by the controller (per-tick) and the repository's forward-recompute path
//! (backfill). No I/O here — `src/repo/ledger.rs` owns persistence.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{round3, Action, Price, Timestamp};

/// Fraction of capacity below which the battery is considered "effectively
/// drained" and the charge cost basis resets, per spec.md §4.F.
const RESET_THRESHOLD_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub system_id: Uuid,
    pub interval_start: Timestamp,
    pub interval_end: Timestamp,
    pub date: chrono::NaiveDate,
    pub hour: u32,
    pub soc_start: f64,
    pub action: Action,
    pub power_kw: f64,
    pub price: f64,
    pub price_tier: super::types::PriceTier,
    pub daily_avg_price: f64,
    pub decision_source: String,
    pub decision_factors: serde_json::Value,
    pub interval_cost: f64,
    pub cumulative_charge_cost: f64,
    pub cost_of_current_charge: f64,
    pub avg_charge_price: f64,
    pub energy_in_battery_kwh: f64,
    pub solar_kw: f64,
    pub load_kw: f64,
    pub grid_import_kw: f64,
    pub grid_export_kw: f64,
}

/// The running cost-basis state carried from one tick's record to the next,
/// per system. This is exactly the subset of the previous IntervalRecord the
/// next tick's cost math depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerState {
    pub cumulative_charge_cost: f64,
    pub energy_in_battery_kwh: f64,
}

pub struct LedgerInputs {
    pub action: Action,
    pub power_kw: f64,
    pub price: Price,
    pub soc_start: f64,
    pub capacity_kwh: f64,
    /// One-way efficiency, sqrt(round-trip), per spec.md §3.
    pub efficiency: f64,
}

pub struct LedgerOutputs {
    pub interval_cost: f64,
    pub cumulative_charge_cost: f64,
    pub avg_charge_price: f64,
    pub energy_in_battery_kwh: f64,
}

/// `interval_cost = sign(action) * power_kw * 0.25h * price`.
pub fn interval_cost(action: Action, power_kw: f64, price: Price) -> f64 {
    round3(action.cost_sign() * power_kw * 0.25 * price.as_sek_per_kwh())
}

/// `energy_in_battery_kwh` after this interval, per spec.md §3's formula.
pub fn energy_in_battery_kwh(prev: &LedgerInputs) -> f64 {
    let base = prev.capacity_kwh * prev.soc_start / 100.0;
    match prev.action {
        Action::Charge => base + prev.efficiency * prev.power_kw * 0.25,
        Action::Discharge => base - prev.power_kw * 0.25,
        _ => base,
    }
}

/// Advance the ledger state by one tick, applying spec.md §4.F's rules:
/// charge accumulates cost, idle/self-consume carries forward unchanged,
/// discharge reduces cost proportionally to energy drawn down, and a
/// near-empty battery resets the cost basis on the next charge.
pub fn advance(state: LedgerState, inputs: &LedgerInputs) -> (LedgerState, LedgerOutputs) {
    let cost = interval_cost(inputs.action, inputs.power_kw, inputs.price);
    let new_energy = energy_in_battery_kwh(inputs);

    let near_empty = state.energy_in_battery_kwh < RESET_THRESHOLD_FRACTION * inputs.capacity_kwh;

    let new_cumulative = match inputs.action {
        Action::Charge => {
            let basis = if near_empty { 0.0 } else { state.cumulative_charge_cost };
            basis + cost
        }
        Action::Discharge => {
            let energy_before = state.energy_in_battery_kwh;
            if energy_before > 0.0 {
                let delta_out = (energy_before - new_energy).max(0.0);
                let retained_fraction = (1.0 - delta_out / energy_before).max(0.0);
                state.cumulative_charge_cost * retained_fraction
            } else {
                0.0
            }
        }
        _ => state.cumulative_charge_cost,
    };

    let avg_charge_price = if new_energy > f64::EPSILON {
        new_cumulative / new_energy
    } else {
        0.0
    };

    let new_state = LedgerState {
        cumulative_charge_cost: new_cumulative,
        energy_in_battery_kwh: new_energy,
    };

    (
        new_state,
        LedgerOutputs {
            interval_cost: cost,
            cumulative_charge_cost: round3(new_cumulative),
            avg_charge_price: round3(avg_charge_price),
            energy_in_battery_kwh: round3(new_energy),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(action: Action, power_kw: f64, price: f64, soc_start: f64) -> LedgerInputs {
        LedgerInputs {
            action,
            power_kw,
            price: Price::sek_per_kwh(price),
            soc_start,
            capacity_kwh: 10.0,
            efficiency: 0.93_f64.sqrt(),
        }
    }

    #[test]
    fn cheap_charge_interval_cost_matches_scenario() {
        // scenario 1: SOC=45, price 0.10, charge 3.0 kW -> interval_cost ~ -0.075
        let cost = interval_cost(Action::Charge, 3.0, Price::sek_per_kwh(0.10));
        assert!((cost - (-0.075)).abs() < 1e-9);
    }

    #[test]
    fn expensive_discharge_interval_cost_matches_scenario() {
        // scenario 2: price 5.00, discharge 3.0 kW -> interval_cost ~ +3.75
        let cost = interval_cost(Action::Discharge, 3.0, Price::sek_per_kwh(5.00));
        assert!((cost - 3.75).abs() < 1e-9);
    }

    #[test]
    fn charge_accumulates_cost_basis() {
        let state = LedgerState::default();
        let (state, out) = advance(state, &inputs(Action::Charge, 3.0, 0.10, 50.0));
        assert!(out.cumulative_charge_cost < 0.0);
        assert!(state.energy_in_battery_kwh > 0.0);
    }

    #[test]
    fn idle_carries_cost_basis_forward_unchanged() {
        let state = LedgerState {
            cumulative_charge_cost: -1.5,
            energy_in_battery_kwh: 5.0,
        };
        let (new_state, out) = advance(state, &inputs(Action::Idle, 0.0, 1.0, 50.0));
        assert_eq!(out.cumulative_charge_cost, -1.5);
        assert_eq!(new_state.energy_in_battery_kwh, 5.0);
    }

    #[test]
    fn discharge_reduces_cost_basis_proportionally() {
        let state = LedgerState {
            cumulative_charge_cost: -2.0,
            energy_in_battery_kwh: 4.0,
        };
        let (_new_state, out) = advance(state, &inputs(Action::Discharge, 2.0, 1.0, 40.0));
        // delta_out = 0.5 kWh of 4.0 kWh before -> retain 87.5%
        assert!((out.cumulative_charge_cost - (-1.75)).abs() < 1e-6);
    }

    #[test]
    fn near_empty_battery_resets_cost_basis_on_next_charge() {
        let state = LedgerState {
            cumulative_charge_cost: -3.0,
            energy_in_battery_kwh: 0.1, // < 5% of 10 kWh capacity
        };
        let (_new_state, out) = advance(state, &inputs(Action::Charge, 3.0, 0.20, 1.0));
        // basis resets to 0 before adding this interval's own cost
        let expected = interval_cost(Action::Charge, 3.0, Price::sek_per_kwh(0.20));
        assert!((out.cumulative_charge_cost - expected).abs() < 1e-9);
    }

    #[test]
    fn avg_charge_price_guards_division_by_zero() {
        let state = LedgerState::default();
        let (_new_state, out) = advance(state, &inputs(Action::Idle, 0.0, 1.0, 0.0));
        assert_eq!(out.avg_charge_price, 0.0);
    }
}
