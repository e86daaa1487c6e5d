//! Database models
//!
//! Row shapes that map directly to the SQLite tables created in
//! `database::run_migrations`. Kept separate from the domain types
//! (`domain::ledger::IntervalRecord`, `domain::session::Session`) so the
//! storage representation can change without touching the pure cost and
//! session-tracking math.

use chrono::{DateTime, FixedOffset, NaiveDate};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct IntervalRecordRow {
    pub system_id: String,
    pub interval_start: String,
    pub interval_end: String,
    pub date: String,
    pub hour: i64,
    pub soc_start: f64,
    pub action: String,
    pub power_kw: f64,
    pub price: f64,
    pub price_tier: String,
    pub daily_avg_price: f64,
    pub decision_source: String,
    pub decision_factors: String,
    pub interval_cost: f64,
    pub cumulative_charge_cost: f64,
    pub cost_of_current_charge: f64,
    pub avg_charge_price: f64,
    pub energy_in_battery_kwh: f64,
    pub solar_kw: f64,
    pub load_kw: f64,
    pub grid_import_kw: f64,
    pub grid_export_kw: f64,
    pub session_id: Option<String>,
}

impl IntervalRecordRow {
    pub fn system_id(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.system_id)
    }

    pub fn interval_start_at(&self) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(&self.interval_start)
    }

    pub fn date_naive(&self) -> Result<NaiveDate, chrono::ParseError> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub system_id: String,
    pub action: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub start_soc: f64,
    pub end_soc: Option<f64>,
    pub power_kw: f64,
    pub avg_price: f64,
}
