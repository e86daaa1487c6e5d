//! Append-only ledger repository (spec.md §4.F/§6): insert-only
//! `IntervalRecord` writes guarded by the `(system_id, interval_start)`
//! primary key, a forward-recompute helper for backfill, and the session
//! queries the controller and `plan` CLI need. Uses runtime `sqlx::query`
//! builders rather than the teacher's compile-time `sqlx::query!` macros,
//! since those require `DATABASE_URL` at build time — awkward for a crate
//! whose database is a per-deployment SQLite file (see DESIGN.md).

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::models::{IntervalRecordRow, SessionRow};
use crate::domain::ledger::{self, IntervalRecord, LedgerInputs, LedgerState};
use crate::domain::session::{Session, SessionStatus};
use crate::domain::types::{Action, Price, Timestamp};
use crate::error::ControllerError;

pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one IntervalRecord. Fails with `InvariantViolation` if a record
    /// for `(system_id, interval_start)` already exists, per spec.md §3's
    /// uniqueness invariant — the controller's idempotency guard relies on
    /// this surfacing as a distinguishable error rather than a silent
    /// overwrite.
    pub async fn insert_record(&self, record: &IntervalRecord, session_id: Option<Uuid>) -> Result<(), ControllerError> {
        let existing = self
            .find_record(record.system_id, record.interval_start)
            .await
            .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;
        if existing.is_some() {
            return Err(ControllerError::InvariantViolation(format!(
                "duplicate interval record for system {} at {}",
                record.system_id, record.interval_start
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO interval_records (
                system_id, interval_start, interval_end, date, hour, soc_start, action,
                power_kw, price, price_tier, daily_avg_price, decision_source, decision_factors,
                interval_cost, cumulative_charge_cost, cost_of_current_charge, avg_charge_price,
                energy_in_battery_kwh, solar_kw, load_kw, grid_import_kw, grid_export_kw, session_id
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(record.system_id.to_string())
        .bind(record.interval_start.to_rfc3339_compat())
        .bind(record.interval_end.to_rfc3339_compat())
        .bind(record.date.format("%Y-%m-%d").to_string())
        .bind(record.hour as i64)
        .bind(round2(record.soc_start))
        .bind(record.action.as_wire_str())
        .bind(round3f(record.power_kw))
        .bind(round5(record.price))
        .bind(record.price_tier.to_string())
        .bind(round5(record.daily_avg_price))
        .bind(&record.decision_source)
        .bind(record.decision_factors.to_string())
        .bind(round4(record.interval_cost))
        .bind(round4(record.cumulative_charge_cost))
        .bind(round4(record.cost_of_current_charge))
        .bind(round4(record.avg_charge_price))
        .bind(round3f(record.energy_in_battery_kwh))
        .bind(round3f(record.solar_kw))
        .bind(round3f(record.load_kw))
        .bind(round3f(record.grid_import_kw))
        .bind(round3f(record.grid_export_kw))
        .bind(session_id.map(|s| s.to_string()))
        .execute(&self.pool)
        .await
        .context("failed to insert interval record")
        .map_err(|e| ControllerError::InvariantViolation(e.to_string()))?;

        Ok(())
    }

    pub async fn find_record(
        &self,
        system_id: Uuid,
        interval_start: Timestamp,
    ) -> Result<Option<IntervalRecordRow>> {
        let row = sqlx::query_as::<_, IntervalRecordRow>(
            "SELECT * FROM interval_records WHERE system_id = ? AND interval_start = ?",
        )
        .bind(system_id.to_string())
        .bind(interval_start.to_rfc3339_compat())
        .fetch_optional(&self.pool)
        .await
        .context("failed to query interval record")?;
        Ok(row)
    }

    /// Most recent record for a system, used to seed the ledger cost-basis
    /// state and the session tracker at controller startup.
    pub async fn latest_record(&self, system_id: Uuid) -> Result<Option<IntervalRecordRow>> {
        let row = sqlx::query_as::<_, IntervalRecordRow>(
            "SELECT * FROM interval_records WHERE system_id = ? ORDER BY interval_start DESC LIMIT 1",
        )
        .bind(system_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to query latest interval record")?;
        Ok(row)
    }

    /// The record immediately before `before`, used to seed the cost-basis
    /// state a backfill recompute resumes from.
    pub async fn record_before(&self, system_id: Uuid, before: Timestamp) -> Result<Option<IntervalRecordRow>> {
        let row = sqlx::query_as::<_, IntervalRecordRow>(
            "SELECT * FROM interval_records WHERE system_id = ? AND interval_start < ? ORDER BY interval_start DESC LIMIT 1",
        )
        .bind(system_id.to_string())
        .bind(before.to_rfc3339_compat())
        .fetch_optional(&self.pool)
        .await
        .context("failed to query record preceding backfill start")?;
        Ok(row)
    }

    /// All records for a system from `since` (inclusive) forward, in
    /// `interval_start` order — the shape `plan` and backfill recompute
    /// both need.
    pub async fn records_since(&self, system_id: Uuid, since: Timestamp) -> Result<Vec<IntervalRecordRow>> {
        let rows = sqlx::query_as::<_, IntervalRecordRow>(
            "SELECT * FROM interval_records WHERE system_id = ? AND interval_start >= ? ORDER BY interval_start ASC",
        )
        .bind(system_id.to_string())
        .bind(since.to_rfc3339_compat())
        .fetch_all(&self.pool)
        .await
        .context("failed to query interval records")?;
        Ok(rows)
    }

    /// Drive a forward backfill from `from` (inclusive): seed the cost-basis
    /// state from the record immediately preceding it (or a fresh
    /// `LedgerState` if there is none), replay `domain::ledger::advance`
    /// across every record from `from` onward in order, and persist the
    /// recomputed derived fields via `backfill_recompute`. Invoked when a
    /// late-arriving or corrected record makes the stored
    /// `cumulative_charge_cost`/`avg_charge_price`/`energy_in_battery_kwh`
    /// trail stale, per spec.md §4.F. Returns the number of rows updated.
    pub async fn backfill_forward(
        &self,
        system_id: Uuid,
        from: Timestamp,
        capacity_kwh: f64,
        efficiency: f64,
    ) -> Result<usize> {
        let seed = self.record_before(system_id, from).await?;
        let mut state = match seed {
            Some(row) => LedgerState {
                cumulative_charge_cost: row.cumulative_charge_cost,
                energy_in_battery_kwh: row.energy_in_battery_kwh,
            },
            None => LedgerState::default(),
        };

        let mut rows = self.records_since(system_id, from).await?;
        for row in &mut rows {
            let action = Action::from_wire_str(&row.action)
                .with_context(|| format!("unknown action '{}' during backfill", row.action))?;
            let inputs = LedgerInputs {
                action,
                power_kw: row.power_kw,
                price: Price::sek_per_kwh(row.price),
                soc_start: row.soc_start,
                capacity_kwh,
                efficiency,
            };
            let (new_state, outputs) = ledger::advance(state, &inputs);
            row.cumulative_charge_cost = round4(outputs.cumulative_charge_cost);
            row.avg_charge_price = round4(outputs.avg_charge_price);
            row.energy_in_battery_kwh = round3f(outputs.energy_in_battery_kwh);
            state = new_state;
        }

        let updated = rows.len();
        self.backfill_recompute(system_id, &rows).await?;
        Ok(updated)
    }

    /// Recompute `cumulative_charge_cost`/`avg_charge_price`/
    /// `energy_in_battery_kwh` forward from `from` when a late-arriving
    /// record is backfilled, per spec.md §4.F. The caller supplies the
    /// already-recomputed rows (via `domain::ledger::advance`); this just
    /// persists them, since derived fields may only ever be recomputed, not
    /// mutated arbitrarily.
    pub async fn backfill_recompute(&self, system_id: Uuid, rows: &[IntervalRecordRow]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to start backfill transaction")?;
        for row in rows {
            sqlx::query(
                r#"
                UPDATE interval_records
                SET cumulative_charge_cost = ?, avg_charge_price = ?, energy_in_battery_kwh = ?
                WHERE system_id = ? AND interval_start = ?
                "#,
            )
            .bind(row.cumulative_charge_cost)
            .bind(row.avg_charge_price)
            .bind(row.energy_in_battery_kwh)
            .bind(system_id.to_string())
            .bind(&row.interval_start)
            .execute(&mut *tx)
            .await
            .context("failed to update interval record during backfill")?;
        }
        tx.commit().await.context("failed to commit backfill transaction")?;
        Ok(())
    }

    pub async fn active_session(&self, system_id: Uuid) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE system_id = ? AND status = 'active' LIMIT 1",
        )
        .bind(system_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to query active session")?;
        Ok(row)
    }

    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, system_id, action, status, started_at, ended_at, start_soc, end_soc, power_kw, avg_price)
            VALUES (?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                end_soc = excluded.end_soc,
                power_kw = excluded.power_kw,
                avg_price = excluded.avg_price
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.system_id.to_string())
        .bind(session.action.as_wire_str())
        .bind(status_wire(session.status))
        .bind(session.started_at.to_rfc3339_compat())
        .bind(session.ended_at.map(|t| t.to_rfc3339_compat()))
        .bind(round2(session.start_soc))
        .bind(session.end_soc.map(round2))
        .bind(round3f(session.power_kw))
        .bind(round5(session.avg_price))
        .execute(&self.pool)
        .await
        .context("failed to upsert session")?;
        Ok(())
    }
}

fn status_wire(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Completed => "completed",
        SessionStatus::Aborted => "aborted",
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
fn round3f(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}
fn round5(v: f64) -> f64 {
    (v * 100000.0).round() / 100000.0
}

trait Rfc3339Compat {
    fn to_rfc3339_compat(&self) -> String;
}

impl Rfc3339Compat for Timestamp {
    fn to_rfc3339_compat(&self) -> String {
        self.inner().to_rfc3339()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::IntervalRecord;
    use crate::domain::types::{Action, PriceArea, PriceTier};
    use chrono::{FixedOffset, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE interval_records (
                system_id TEXT NOT NULL, interval_start TEXT NOT NULL, interval_end TEXT NOT NULL,
                date TEXT NOT NULL, hour INTEGER NOT NULL, soc_start REAL NOT NULL, action TEXT NOT NULL,
                power_kw REAL NOT NULL, price REAL NOT NULL, price_tier TEXT NOT NULL, daily_avg_price REAL NOT NULL,
                decision_source TEXT NOT NULL, decision_factors TEXT NOT NULL, interval_cost REAL NOT NULL,
                cumulative_charge_cost REAL NOT NULL, cost_of_current_charge REAL NOT NULL, avg_charge_price REAL NOT NULL,
                energy_in_battery_kwh REAL NOT NULL, solar_kw REAL NOT NULL, load_kw REAL NOT NULL,
                grid_import_kw REAL NOT NULL, grid_export_kw REAL NOT NULL, session_id TEXT,
                PRIMARY KEY (system_id, interval_start)
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE sessions (
                id TEXT PRIMARY KEY, system_id TEXT NOT NULL, action TEXT NOT NULL, status TEXT NOT NULL,
                started_at TEXT NOT NULL, ended_at TEXT, start_soc REAL NOT NULL, end_soc REAL,
                power_kw REAL NOT NULL, avg_price REAL NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn sample_record(system_id: Uuid, minute: u32) -> IntervalRecord {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let start = tz.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap();
        IntervalRecord {
            system_id,
            interval_start: Timestamp(start),
            interval_end: Timestamp(start + chrono::Duration::minutes(15)),
            date: start.date_naive(),
            hour: start.format("%H").to_string().parse().unwrap(),
            soc_start: 50.0,
            action: Action::Charge,
            power_kw: 3.0,
            price: 0.1,
            price_tier: PriceTier::Cheapest,
            daily_avg_price: 0.3,
            decision_source: "decision".to_string(),
            decision_factors: serde_json::json!({}),
            interval_cost: -0.075,
            cumulative_charge_cost: -0.075,
            cost_of_current_charge: -0.075,
            avg_charge_price: 0.1,
            energy_in_battery_kwh: 5.7,
            solar_kw: 0.0,
            load_kw: 1.0,
            grid_import_kw: 0.0,
            grid_export_kw: 0.0,
        }
    }

    #[tokio::test]
    async fn inserting_duplicate_interval_is_rejected() {
        let repo = LedgerRepository::new(pool().await);
        let system_id = Uuid::new_v4();
        let record = sample_record(system_id, 0);
        repo.insert_record(&record, None).await.unwrap();
        let err = repo.insert_record(&record, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn records_since_returns_in_chronological_order() {
        let repo = LedgerRepository::new(pool().await);
        let system_id = Uuid::new_v4();
        repo.insert_record(&sample_record(system_id, 15), None).await.unwrap();
        repo.insert_record(&sample_record(system_id, 0), None).await.unwrap();
        let since = Timestamp(FixedOffset::east_opt(3600).unwrap().with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let rows = repo.records_since(system_id, since).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].interval_start < rows[1].interval_start);
    }

    #[tokio::test]
    async fn active_session_round_trips() {
        let repo = LedgerRepository::new(pool().await);
        let system_id = Uuid::new_v4();
        let tz = FixedOffset::east_opt(3600).unwrap();
        let session = Session::open(
            system_id,
            Action::Charge,
            Timestamp(tz.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            50.0,
            3.0,
        );
        repo.upsert_session(&session).await.unwrap();
        let active = repo.active_session(system_id).await.unwrap();
        assert!(active.is_some());
    }

    #[test]
    fn area_type_used_for_compile_sanity() {
        let _ = PriceArea::SE3;
    }

    /// End-to-end exercise of the forward-recompute path spec.md §4.F
    /// mandates: a charge interval followed by a discharge, persisted with
    /// deliberately-wrong derived fields (as if corrected or backfilled out
    /// of order), then recomputed forward and checked against
    /// `domain::ledger::advance`'s own math.
    #[tokio::test]
    async fn backfill_forward_recomputes_derived_fields_end_to_end() {
        let repo = LedgerRepository::new(pool().await);
        let system_id = Uuid::new_v4();
        let tz = FixedOffset::east_opt(3600).unwrap();
        let t0 = tz.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut charge = sample_record(system_id, 0);
        charge.action = Action::Charge;
        charge.power_kw = 3.0;
        charge.price = 0.10;
        charge.soc_start = 50.0;
        charge.cumulative_charge_cost = 999.0; // deliberately wrong, to be recomputed away
        charge.avg_charge_price = 999.0;
        charge.energy_in_battery_kwh = 999.0;

        let mut discharge = sample_record(system_id, 15);
        discharge.interval_start = Timestamp(t0 + chrono::Duration::minutes(15));
        discharge.interval_end = Timestamp(t0 + chrono::Duration::minutes(30));
        discharge.action = Action::Discharge;
        discharge.power_kw = 2.0;
        discharge.price = 1.0;
        discharge.soc_start = 52.79; // soc after the charge interval above
        discharge.cumulative_charge_cost = -1.0; // deliberately wrong
        discharge.avg_charge_price = -1.0;
        discharge.energy_in_battery_kwh = -1.0;

        repo.insert_record(&charge, None).await.unwrap();
        repo.insert_record(&discharge, None).await.unwrap();

        let capacity_kwh = 10.0;
        let efficiency = 0.93_f64.sqrt();
        let updated = repo
            .backfill_forward(system_id, charge.interval_start, capacity_kwh, efficiency)
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let expected_state_after_charge = {
            let (state, _) = crate::domain::ledger::advance(
                crate::domain::ledger::LedgerState::default(),
                &crate::domain::ledger::LedgerInputs {
                    action: Action::Charge,
                    power_kw: 3.0,
                    price: crate::domain::types::Price::sek_per_kwh(0.10),
                    soc_start: 50.0,
                    capacity_kwh,
                    efficiency,
                },
            );
            state
        };

        let row = repo
            .find_record(system_id, charge.interval_start)
            .await
            .unwrap()
            .unwrap();
        assert!((row.cumulative_charge_cost - round4(expected_state_after_charge.cumulative_charge_cost)).abs() < 1e-6);
        assert_ne!(row.cumulative_charge_cost, 999.0);

        let row2 = repo
            .find_record(system_id, discharge.interval_start)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(row2.cumulative_charge_cost, -1.0);
        assert_ne!(row2.energy_in_battery_kwh, -1.0);
    }
}
