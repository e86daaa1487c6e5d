//! Day Planner (spec component C): produces a 96-slot daily schedule and
//! summary statistics by driving the Decision Maker forward over a
//! simulated SOC trajectory. Read-only — invoked on demand by the `plan`
//! CLI subcommand, never by the controller loop itself.

use serde::{Deserialize, Serialize};

use crate::domain::decision::{decide, Decision, DecisionConfig, Inputs};
use crate::domain::price::{PriceTiering, TieringConfig};
use crate::domain::types::{ActionFamily, Price, PricePoint, Timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySummary {
    pub total_intervals: u32,
    pub charge_intervals: u32,
    pub discharge_intervals: u32,
    pub idle_intervals: u32,
    pub charge_hours: f64,
    pub discharge_hours: f64,
    pub estimated_savings: f64,
    pub estimated_earnings: f64,
    pub net_benefit: f64,
    pub efficiency_utilized: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSlot {
    pub interval_start: Timestamp,
    pub decision: Decision,
    pub soc_before: f64,
    pub soc_after: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySchedule {
    pub schedule: Vec<ScheduledSlot>,
    pub summary: DaySummary,
}

/// Optional per-slot solar/load forecasts; when absent, a flat fallback
/// (from `DecisionConfig`-adjacent defaults the caller supplies) is used.
pub struct PlannerForecast<'a> {
    pub solar_kw: Option<&'a [f64]>,
    pub load_kw: Option<&'a [f64]>,
}

/// Generate the 96-slot schedule for one day, simulating SOC forward under
/// the same `decide` rules the controller uses live.
///
/// `prices` must already cover the day contiguously (the caller is
/// responsible for upsampling coarser curves, per spec.md §6); this
/// function does not validate contiguity itself — callers that need that
/// guarantee should build a `PriceTiering` first, which does.
pub fn generate_day_schedule(
    prices: &[PricePoint],
    starting_soc: f64,
    cfg: &DecisionConfig,
    tiering_cfg: &TieringConfig,
    area: crate::domain::types::PriceArea,
    forecast: PlannerForecast<'_>,
    capacity_kwh: f64,
    efficiency: f64,
) -> Result<DaySchedule, crate::domain::price::TieringError> {
    let tiering = PriceTiering::build(prices, area, tiering_cfg)?;
    let forward_prices: Vec<Price> = prices.iter().map(|p| Price::sek_per_kwh(p.price_sek_per_kwh)).collect();

    let mut soc = starting_soc;
    let mut schedule = Vec::with_capacity(prices.len());

    let mut charge_intervals = 0u32;
    let mut discharge_intervals = 0u32;
    let mut idle_intervals = 0u32;
    let mut estimated_savings = 0.0_f64;
    let mut estimated_earnings = 0.0_f64;

    for (i, point) in prices.iter().enumerate() {
        let price = Price::sek_per_kwh(point.price_sek_per_kwh);
        let tier = tiering.classify(price);
        let solar_kw = forecast.solar_kw.and_then(|s| s.get(i)).copied().unwrap_or(0.0);
        let load_kw = forecast.load_kw.and_then(|l| l.get(i)).copied().unwrap_or(0.0);

        let inputs = Inputs {
            current_price: price,
            current_tier: tier,
            forward_curve: &forward_prices[i..],
            soc,
            solar_kw,
            load_kw,
            telemetry_age_minutes: Some(0),
        };

        let decision = decide(&inputs, cfg, Timestamp(point.time_start));
        let soc_before = soc;

        match decision.action.family() {
            ActionFamily::Charge => {
                charge_intervals += 1;
                let energy_in = efficiency * decision.power_kw * 0.25;
                soc = (soc + energy_in / capacity_kwh * 100.0).min(100.0);
                estimated_savings += decision.power_kw * 0.25 * price.as_sek_per_kwh();
            }
            ActionFamily::Discharge => {
                discharge_intervals += 1;
                let energy_out = decision.power_kw * 0.25;
                soc = (soc - energy_out / capacity_kwh * 100.0).max(0.0);
                estimated_earnings += decision.power_kw * 0.25 * price.as_sek_per_kwh();
            }
            ActionFamily::Idle => {
                idle_intervals += 1;
            }
        }

        schedule.push(ScheduledSlot {
            interval_start: Timestamp(point.time_start),
            decision,
            soc_before,
            soc_after: soc,
        });
    }

    let total_intervals = schedule.len() as u32;
    let charge_hours = charge_intervals as f64 * 0.25;
    let discharge_hours = discharge_intervals as f64 * 0.25;
    let net_benefit = estimated_earnings - estimated_savings;
    let efficiency_utilized = if charge_hours > 0.0 {
        (discharge_hours / charge_hours).min(1.0)
    } else {
        0.0
    };

    Ok(DaySchedule {
        schedule,
        summary: DaySummary {
            total_intervals,
            charge_intervals,
            discharge_intervals,
            idle_intervals,
            charge_hours,
            discharge_hours,
            estimated_savings,
            estimated_earnings,
            net_benefit,
            efficiency_utilized,
        },
    })
}

/// Upsamples an hourly (or otherwise coarser-than-15-minute) curve into
/// quarter-hour `PricePoint`s by repetition, per spec.md §6's "the tierer
/// upsamples coarser curves by repetition" contract.
pub fn upsample_to_quarters(
    hourly_prices: &[f64],
    day_start: chrono::DateTime<chrono::FixedOffset>,
    slot_minutes: i64,
) -> Vec<PricePoint> {
    let slots_per_source = (slot_minutes / 15).max(1) as usize;
    let mut points = Vec::with_capacity(hourly_prices.len() * slots_per_source);
    let mut cursor = day_start;
    for &price in hourly_prices {
        for _ in 0..slots_per_source {
            let end = cursor + chrono::Duration::minutes(15);
            points.push(PricePoint {
                time_start: cursor,
                time_end: end,
                price_sek_per_kwh: price,
            });
            cursor = end;
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PriceArea;
    use chrono::{FixedOffset, TimeZone};

    fn day_start() -> chrono::DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .unwrap()
    }

    #[test]
    fn ninety_six_slots_partition_exhaustively() {
        let hourly = vec![0.5; 24];
        let prices = upsample_to_quarters(&hourly, day_start(), 60);
        assert_eq!(prices.len(), 96);
        let cfg = DecisionConfig::default();
        let day = generate_day_schedule(
            &prices,
            50.0,
            &cfg,
            &TieringConfig::default(),
            PriceArea::SE3,
            PlannerForecast {
                solar_kw: None,
                load_kw: None,
            },
            10.0,
            0.93_f64.sqrt(),
        )
        .unwrap();
        assert_eq!(day.summary.total_intervals, 96);
        assert_eq!(
            day.summary.charge_intervals + day.summary.discharge_intervals + day.summary.idle_intervals,
            96
        );
    }

    #[test]
    fn scenario_daily_planner_curve_produces_both_directions() {
        let hourly = vec![
            0.30, 0.28, 0.25, 0.23, 0.22, 0.25, 0.35, 0.45, 0.55, 0.60, 0.65, 0.70, 0.65, 0.60,
            0.55, 0.50, 0.55, 0.75, 0.85, 0.90, 0.80, 0.65, 0.45, 0.35,
        ];
        let prices = upsample_to_quarters(&hourly, day_start(), 60);
        let cfg = DecisionConfig::default();
        let day = generate_day_schedule(
            &prices,
            50.0,
            &cfg,
            &TieringConfig::default(),
            PriceArea::SE3,
            PlannerForecast {
                solar_kw: None,
                load_kw: None,
            },
            10.0,
            0.93_f64.sqrt(),
        )
        .unwrap();
        assert_eq!(day.summary.total_intervals, 96);
        assert!(day.summary.charge_intervals > 0);
        assert!(day.summary.discharge_intervals > 0);
        assert_eq!(
            day.summary.charge_intervals + day.summary.discharge_intervals + day.summary.idle_intervals,
            96
        );
    }

    #[test]
    fn constant_price_curve_yields_no_net_soc_change_or_all_idle() {
        let hourly = vec![0.42; 24];
        let prices = upsample_to_quarters(&hourly, day_start(), 60);
        let cfg = DecisionConfig::default();
        let day = generate_day_schedule(
            &prices,
            50.0,
            &cfg,
            &TieringConfig::default(),
            PriceArea::SE3,
            PlannerForecast {
                solar_kw: None,
                load_kw: None,
            },
            10.0,
            0.93_f64.sqrt(),
        )
        .unwrap();
        let last = day.schedule.last().unwrap();
        if day.summary.charge_intervals == 0 && day.summary.discharge_intervals == 0 {
            assert_eq!(last.soc_after, 50.0);
        }
    }
}
