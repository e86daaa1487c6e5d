//! Session Tracker (spec component E): groups consecutive same-action
//! intervals into sessions and tracks their realized cost/energy. Pure state
//! machine — the controller is the only caller, and only after an
//! IntervalRecord is durable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Action, ActionFamily, Price, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub system_id: Uuid,
    pub action: Action,
    pub status: SessionStatus,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub start_soc: f64,
    pub end_soc: Option<f64>,
    pub power_kw: f64,
    pub avg_price: f64,
    /// Running totals backing the energy-weighted average price; not part
    /// of the spec's public fields, kept so `extend` can update `avg_price`
    /// without re-reading every member interval.
    energy_weighted_price_sum: f64,
    energy_kwh: f64,
}

impl Session {
    pub fn open(system_id: Uuid, action: Action, started_at: Timestamp, start_soc: f64, power_kw: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_id,
            action,
            status: SessionStatus::Active,
            started_at,
            ended_at: None,
            start_soc,
            end_soc: None,
            power_kw,
            avg_price: 0.0,
            energy_weighted_price_sum: 0.0,
            energy_kwh: 0.0,
        }
    }

    /// Append an interval belonging to this session's action, updating the
    /// energy-weighted mean price.
    pub fn extend(&mut self, price: Price, energy_kwh: f64) {
        self.energy_weighted_price_sum += price.as_sek_per_kwh() * energy_kwh;
        self.energy_kwh += energy_kwh;
        if self.energy_kwh > 0.0 {
            self.avg_price = self.energy_weighted_price_sum / self.energy_kwh;
        }
    }

    pub fn complete(&mut self, ended_at: Timestamp, end_soc: f64) {
        self.status = SessionStatus::Completed;
        self.ended_at = Some(ended_at);
        self.end_soc = Some(end_soc);
    }

    pub fn abort(&mut self, ended_at: Timestamp, end_soc: f64) {
        self.status = SessionStatus::Aborted;
        self.ended_at = Some(ended_at);
        self.end_soc = Some(end_soc);
    }

    pub fn family(&self) -> ActionFamily {
        self.action.family()
    }
}

/// Result of observing one new IntervalRecord against the current session
/// state. The controller applies this and persists the result.
pub enum SessionTransition {
    /// No prior session existed; this record opens a new one.
    Opened(Session),
    /// The record extends the still-active session (same action family).
    /// Carries the updated session so the caller can persist it.
    Extended(Session),
    /// The action family changed: the old session closes, a new one opens.
    Rotated { closed: Session, opened: Session },
    /// A gap (missing quarters) was observed before this record arrived; the
    /// prior session is aborted and a new one opens for this record.
    AbortedAndOpened { aborted: Session, opened: Session },
}

/// Number of consecutive missing quarters that constitute a gap, per
/// spec.md §4.E ("two or more consecutive missing quarters").
const GAP_QUARTERS: i64 = 2;

/// Explicit gap check used by the controller before calling `observe`: given
/// the previous tick's `interval_end` and the new tick's `interval_start`,
/// did two or more quarters go missing?
pub fn is_gap(previous_interval_end: Timestamp, new_interval_start: Timestamp) -> bool {
    let missing_minutes = new_interval_start
        .inner()
        .signed_duration_since(previous_interval_end.inner())
        .num_minutes();
    missing_minutes >= GAP_QUARTERS * 15
}

/// Decide what should happen to `active` (if any) given a new record's
/// action/soc/price/energy arriving at `interval_start`. `gap_detected` must
/// be computed by the caller via `is_gap` against the previous tick's
/// `interval_end`, since only the controller knows whether intervening
/// quarters were actually attempted.
pub fn observe(
    active: Option<Session>,
    gap_detected: bool,
    system_id: Uuid,
    record_action: Action,
    interval_start: Timestamp,
    soc_start: f64,
    power_kw: f64,
    price: Price,
    energy_kwh: f64,
) -> SessionTransition {
    match active {
        None => {
            let mut opened = Session::open(system_id, record_action, interval_start, soc_start, power_kw);
            opened.extend(price, energy_kwh);
            SessionTransition::Opened(opened)
        }
        Some(mut session) => {
            if gap_detected {
                let mut aborted = session;
                aborted.abort(interval_start, soc_start);
                let mut opened = Session::open(system_id, record_action, interval_start, soc_start, power_kw);
                opened.extend(price, energy_kwh);
                return SessionTransition::AbortedAndOpened { aborted, opened };
            }

            if session.family() == record_action.family() {
                session.extend(price, energy_kwh);
                session.power_kw = power_kw;
                SessionTransition::Extended(session)
            } else {
                let mut closed = session;
                closed.complete(interval_start, soc_start);
                let mut opened = Session::open(system_id, record_action, interval_start, soc_start, power_kw);
                opened.extend(price, energy_kwh);
                SessionTransition::Rotated { closed, opened }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn ts(minute: u32) -> Timestamp {
        let tz = FixedOffset::east_opt(3600).unwrap();
        Timestamp(tz.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap())
    }

    #[test]
    fn opens_session_when_none_active() {
        let sid = Uuid::new_v4();
        let t = observe(
            None,
            false,
            sid,
            Action::Charge,
            ts(0),
            50.0,
            3.0,
            Price::sek_per_kwh(0.1),
            0.75,
        );
        match t {
            SessionTransition::Opened(s) => {
                assert_eq!(s.status, SessionStatus::Active);
                assert_eq!(s.start_soc, 50.0);
            }
            _ => panic!("expected Opened"),
        }
    }

    #[test]
    fn extends_when_action_family_matches() {
        let sid = Uuid::new_v4();
        let mut session = Session::open(sid, Action::Charge, ts(0), 50.0, 3.0);
        session.extend(Price::sek_per_kwh(0.1), 0.75);
        let before_avg = session.avg_price;
        let t = observe(
            Some(session),
            false,
            sid,
            Action::Charge,
            ts(15),
            50.75,
            3.0,
            Price::sek_per_kwh(0.2),
            0.75,
        );
        assert!(matches!(t, SessionTransition::Extended(_)));
        assert_ne!(before_avg, 0.0);
    }

    #[test]
    fn rotates_on_action_family_change() {
        let sid = Uuid::new_v4();
        let session = Session::open(sid, Action::Charge, ts(0), 50.0, 3.0);
        let t = observe(
            Some(session),
            false,
            sid,
            Action::Discharge,
            ts(15),
            50.75,
            3.0,
            Price::sek_per_kwh(0.2),
            0.75,
        );
        match t {
            SessionTransition::Rotated { closed, opened } => {
                assert_eq!(closed.status, SessionStatus::Completed);
                assert_eq!(opened.action, Action::Discharge);
            }
            _ => panic!("expected Rotated"),
        }
    }

    #[test]
    fn gap_of_two_quarters_is_detected() {
        let prev_end = ts(15);
        let new_start = ts(45);
        assert!(is_gap(prev_end, new_start));
        let new_start_one_gap = ts(30);
        assert!(!is_gap(prev_end, new_start_one_gap));
    }
}
