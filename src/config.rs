#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level application configuration, loaded once at process startup and
/// passed by value into the controller, planner, and CLI handlers. No
/// module-level mutable state per spec.md §9's "Configuration is a plain
/// record" design note.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub system: SystemConfig,

    #[validate(nested)]
    pub battery: BatteryConfig,

    #[validate(nested)]
    pub strategy: StrategyConfig,

    #[validate(nested)]
    pub controller: ControllerConfig,

    #[validate(nested)]
    pub database: DatabaseConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    #[validate(nested)]
    pub tiering: TieringSettings,
}

/// System identity, timezone, and price area — spec.md §6 "timezone
/// (Europe/Stockholm), price area (SE3)".
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SystemConfig {
    pub system_id: uuid::Uuid,

    #[validate(length(min = 1))]
    pub timezone: String,

    pub price_area: crate::domain::types::PriceArea,
}

/// Battery limits from spec.md §6: `min_soc`, `max_soc`, `safe_charge_power`,
/// `safe_discharge_power`, `emergency_reserve`, economics
/// (`battery_efficiency`, `capacity_kwh`).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_battery_config"))]
pub struct BatteryConfig {
    #[validate(range(min = 0.1, max = 1000.0))]
    pub capacity_kwh: f64,

    #[serde(default = "default_min_soc")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc: f64,

    #[serde(default = "default_max_soc")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_soc: f64,

    #[serde(default = "default_emergency_reserve")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub emergency_reserve: f64,

    #[serde(default = "default_safe_power")]
    #[validate(range(min = 0.1, max = 100.0))]
    pub safe_charge_power_kw: f64,

    #[serde(default = "default_safe_power")]
    #[validate(range(min = 0.1, max = 100.0))]
    pub safe_discharge_power_kw: f64,

    #[serde(default = "default_battery_efficiency")]
    #[validate(range(min = 0.5, max = 1.0))]
    pub battery_efficiency: f64,
}

fn validate_battery_config(config: &BatteryConfig) -> Result<(), validator::ValidationError> {
    if config.min_soc >= config.max_soc {
        return Err(validator::ValidationError::new(
            "min_soc must be less than max_soc",
        ));
    }
    Ok(())
}

/// Strategy flags from spec.md §6: `prioritize_solar`, `export_excess_solar`,
/// `grid_charge_threshold`, `grid_discharge_threshold`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StrategyConfig {
    #[serde(default = "default_true")]
    pub prioritize_solar: bool,

    #[serde(default)]
    pub export_excess_solar: bool,

    /// "SELF_CONSUME preference" from spec.md §4.B rule 3: when set, the
    /// expensive-window discharge rule clamps its power to `load_kw` instead
    /// of discharging at `safe_discharge_power_kw` to the grid. Distinct from
    /// `prioritize_solar`, which only affects rule 1's charge side.
    #[serde(default)]
    pub self_consume_preference: bool,

    #[validate(range(min = 0.0))]
    pub grid_charge_threshold: f64,

    #[validate(range(min = 0.0))]
    pub grid_discharge_threshold: f64,

    #[serde(default = "default_telemetry_stale_minutes")]
    #[validate(range(min = 1, max = 120))]
    pub telemetry_stale_after_minutes: i64,
}

/// Controller loop timing and retry policy, spec.md §4.D/§5.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ControllerConfig {
    #[serde(default = "default_optimization_interval_minutes")]
    #[validate(range(min = 15, max = 15))]
    pub optimization_interval_minutes: u32,

    #[serde(default = "default_max_retries")]
    #[validate(range(min = 0, max = 10))]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_call_deadline_secs")]
    pub call_deadline_secs: u64,
}

/// Ledger persistence, adapted from the teacher's Postgres pool config to an
/// embedded SQLite file appropriate for a single edge-device controller.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub url: String,

    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 32))]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

/// Price Tierer overrides, spec.md §4.A.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TieringSettings {
    #[serde(default = "default_tier_fraction")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub cheapest_fraction: f64,

    #[serde(default = "default_tier_fraction")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub expensive_fraction: f64,

    #[serde(default)]
    pub absolute_cheap_ceiling: Option<f64>,

    #[serde(default)]
    pub absolute_expensive_floor: Option<f64>,
}

impl From<&TieringSettings> for crate::domain::price::TieringConfig {
    fn from(s: &TieringSettings) -> Self {
        Self {
            cheapest_fraction: s.cheapest_fraction,
            expensive_fraction: s.expensive_fraction,
            absolute_cheap_ceiling: s.absolute_cheap_ceiling,
            absolute_expensive_floor: s.absolute_expensive_floor,
        }
    }
}

impl AppConfig {
    pub fn decision_config(&self) -> crate::domain::decision::DecisionConfig {
        crate::domain::decision::DecisionConfig {
            min_soc: self.battery.min_soc,
            max_soc: self.battery.max_soc,
            safe_charge_power_kw: self.battery.safe_charge_power_kw,
            safe_discharge_power_kw: self.battery.safe_discharge_power_kw,
            grid_charge_threshold: self.strategy.grid_charge_threshold,
            grid_discharge_threshold: self.strategy.grid_discharge_threshold,
            prioritize_solar: self.strategy.prioritize_solar,
            self_consume_preference: self.strategy.self_consume_preference,
            telemetry_stale_after_minutes: self.strategy.telemetry_stale_after_minutes,
        }
    }
}

// Default value functions
fn default_min_soc() -> f64 {
    20.0
}
fn default_max_soc() -> f64 {
    95.0
}
fn default_emergency_reserve() -> f64 {
    15.0
}
fn default_safe_power() -> f64 {
    3.0
}
fn default_battery_efficiency() -> f64 {
    0.93
}
fn default_true() -> bool {
    true
}
fn default_telemetry_stale_minutes() -> i64 {
    10
}
fn default_optimization_interval_minutes() -> u32 {
    15
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_call_deadline_secs() -> u64 {
    30
}
fn default_db_max_connections() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tier_fraction() -> f64 {
    1.0 / 3.0
}

impl AppConfig {
    /// Load configuration from `config/default.toml` plus any
    /// `BATTERY__`-prefixed environment overrides (mirroring the teacher's
    /// `OEC__` convention, e.g. `BATTERY__BATTERY__MIN_SOC=25`).
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("BATTERY__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;

        config
            .validate()
            .context("configuration validation failed")?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatteryConfig {
        BatteryConfig {
            capacity_kwh: 10.0,
            min_soc: 20.0,
            max_soc: 95.0,
            emergency_reserve: 15.0,
            safe_charge_power_kw: 3.0,
            safe_discharge_power_kw: 3.0,
            battery_efficiency: 0.93,
        }
    }

    #[test]
    fn battery_config_validates_with_defaults() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn battery_config_rejects_inverted_soc_bounds() {
        let mut cfg = sample();
        cfg.min_soc = 96.0;
        cfg.max_soc = 95.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tiering_settings_convert_into_domain_config() {
        let settings = TieringSettings {
            cheapest_fraction: 0.25,
            expensive_fraction: 0.25,
            absolute_cheap_ceiling: Some(0.1),
            absolute_expensive_floor: None,
        };
        let domain_cfg: crate::domain::price::TieringConfig = (&settings).into();
        assert_eq!(domain_cfg.cheapest_fraction, 0.25);
        assert_eq!(domain_cfg.absolute_cheap_ceiling, Some(0.1));
    }
}
