//! Price Tierer (spec component A): partitions a day's price curve into
//! cheap/medium/expensive tiers with no I/O of its own.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Price, PriceArea, PricePoint, PriceTier};

#[derive(Debug, Error, PartialEq)]
pub enum TieringError {
    #[error("no price data for the day")]
    NoData,
    #[error("price curve is not contiguous: gap between {previous_end} and {next_start}")]
    BadCurve {
        previous_end: String,
        next_start: String,
    },
}

/// Overrides for the percentile-based tier thresholds. All fields default to
/// the values spec.md §4.A gives; absolute overrides win when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieringConfig {
    pub cheapest_fraction: f64,
    pub expensive_fraction: f64,
    pub absolute_cheap_ceiling: Option<f64>,
    pub absolute_expensive_floor: Option<f64>,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            cheapest_fraction: 1.0 / 3.0,
            expensive_fraction: 1.0 / 3.0,
            absolute_cheap_ceiling: None,
            absolute_expensive_floor: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriceTiering {
    pub area: PriceArea,
    pub cheap_max: f64,
    pub expensive_min: f64,
}

impl PriceTiering {
    /// Build a tiering from one day's contiguous price points.
    ///
    /// Percentile thresholds are taken by linear interpolation on the sorted
    /// curve (the 33rd and 67th percentile by default); ties at the boundary
    /// go to the lower tier.
    pub fn build(
        prices: &[PricePoint],
        area: PriceArea,
        cfg: &TieringConfig,
    ) -> Result<Self, TieringError> {
        if prices.is_empty() {
            return Err(TieringError::NoData);
        }
        check_contiguous(prices)?;

        let mut sorted: Vec<f64> = prices.iter().map(|p| p.price_sek_per_kwh).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let min = sorted[0];
        let max = sorted[sorted.len() - 1];

        let (cheap_max, expensive_min) = if (max - min).abs() < f64::EPSILON {
            // constant curve: everything classifies as middle
            (min - 1.0, max + 1.0)
        } else {
            let cheap_max = cfg
                .absolute_cheap_ceiling
                .unwrap_or_else(|| percentile(&sorted, cfg.cheapest_fraction));
            let expensive_min = cfg
                .absolute_expensive_floor
                .unwrap_or_else(|| percentile(&sorted, 1.0 - cfg.expensive_fraction));
            (cheap_max, expensive_min)
        };

        Ok(Self {
            area,
            cheap_max,
            expensive_min,
        })
    }

    /// Classify a price using the `<=`/`>=` boundary convention: ties go to
    /// the cheaper/more-expensive side rather than `middle`.
    pub fn classify(&self, price: Price) -> PriceTier {
        let v = price.as_sek_per_kwh();
        if v <= self.cheap_max {
            PriceTier::Cheapest
        } else if v >= self.expensive_min {
            PriceTier::Expensive
        } else {
            PriceTier::Middle
        }
    }
}

/// Linear-interpolated percentile on an already-sorted slice, `fraction` in [0,1].
fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let idx = fraction * (sorted.len() - 1) as f64;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = idx - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

fn check_contiguous(prices: &[PricePoint]) -> Result<(), TieringError> {
    for pair in prices.windows(2) {
        if pair[0].time_end != pair[1].time_start {
            return Err(TieringError::BadCurve {
                previous_end: pair[0].time_end.to_rfc3339(),
                next_start: pair[1].time_start.to_rfc3339(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};

    fn curve(values: &[f64]) -> Vec<PricePoint> {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let t0 = tz.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| PricePoint {
                time_start: t0 + Duration::minutes(15 * i as i64),
                time_end: t0 + Duration::minutes(15 * (i as i64 + 1)),
                price_sek_per_kwh: v,
            })
            .collect()
    }

    #[test]
    fn empty_curve_is_no_data() {
        let err = PriceTiering::build(&[], PriceArea::SE3, &TieringConfig::default()).unwrap_err();
        assert_eq!(err, TieringError::NoData);
    }

    #[test]
    fn non_contiguous_curve_is_bad_curve() {
        let mut points = curve(&[1.0, 2.0, 3.0]);
        points[2].time_start = points[2].time_start + Duration::minutes(5);
        let err =
            PriceTiering::build(&points, PriceArea::SE3, &TieringConfig::default()).unwrap_err();
        assert!(matches!(err, TieringError::BadCurve { .. }));
    }

    #[test]
    fn monotonic_tiering_invariant_holds_on_non_constant_curve() {
        let points = curve(&[0.10, 0.20, 0.30, 0.40, 0.50, 0.60, 0.70, 0.80, 0.90]);
        let tiering =
            PriceTiering::build(&points, PriceArea::SE3, &TieringConfig::default()).unwrap();
        let min = 0.10;
        let max = 0.90;
        assert!(min <= tiering.cheap_max);
        assert!(tiering.cheap_max < tiering.expensive_min);
        assert!(tiering.expensive_min <= max);
    }

    #[test]
    fn constant_curve_classifies_everything_middle() {
        let points = curve(&[0.50; 8]);
        let tiering =
            PriceTiering::build(&points, PriceArea::SE3, &TieringConfig::default()).unwrap();
        for p in &points {
            assert_eq!(
                tiering.classify(Price::sek_per_kwh(p.price_sek_per_kwh)),
                PriceTier::Middle
            );
        }
    }

    #[test]
    fn ties_at_boundary_go_to_lower_tier() {
        let points = curve(&[0.10, 0.20, 0.30]);
        let tiering =
            PriceTiering::build(&points, PriceArea::SE3, &TieringConfig::default()).unwrap();
        assert_eq!(
            tiering.classify(Price::sek_per_kwh(tiering.cheap_max)),
            PriceTier::Cheapest
        );
        assert_eq!(
            tiering.classify(Price::sek_per_kwh(tiering.expensive_min)),
            PriceTier::Expensive
        );
    }

    #[test]
    fn absolute_overrides_win_over_percentiles() {
        let points = curve(&[0.10, 0.20, 0.30, 0.40, 0.50]);
        let cfg = TieringConfig {
            absolute_cheap_ceiling: Some(0.15),
            absolute_expensive_floor: Some(0.45),
            ..Default::default()
        };
        let tiering = PriceTiering::build(&points, PriceArea::SE3, &cfg).unwrap();
        assert_eq!(tiering.cheap_max, 0.15);
        assert_eq!(tiering.expensive_min, 0.45);
    }
}
