use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

// ============================================================================
// Time helper types
// ============================================================================

/// Wraps `chrono::Duration` with the conversions the controller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(pub chrono::Duration);

impl Duration {
    pub fn seconds(secs: i64) -> Self {
        Self(chrono::Duration::seconds(secs))
    }

    pub fn minutes(mins: i64) -> Self {
        Self(chrono::Duration::minutes(mins))
    }

    pub fn hours(hours: i64) -> Self {
        Self(chrono::Duration::hours(hours))
    }

    pub fn as_seconds(&self) -> i64 {
        self.0.num_seconds()
    }

    pub fn as_minutes(&self) -> i64 {
        self.0.num_minutes()
    }

    pub fn as_hours_f64(&self) -> f64 {
        self.0.num_seconds() as f64 / 3600.0
    }

    pub fn inner(&self) -> chrono::Duration {
        self.0
    }
}

impl From<chrono::Duration> for Duration {
    fn from(d: chrono::Duration) -> Self {
        Self(d)
    }
}

impl From<Duration> for chrono::Duration {
    fn from(d: Duration) -> Self {
        d.0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.as_minutes();
        write!(f, "{}h{}m", minutes / 60, minutes % 60)
    }
}

/// A point in time in the local market timezone. Every comparison the
/// controller does (quarter alignment, staleness, session gaps) goes through
/// this type rather than a bare `DateTime` so the offset convention is fixed
/// in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<FixedOffset>);

impl Timestamp {
    pub fn from_unix(secs: i64) -> Option<Self> {
        chrono::DateTime::from_timestamp(secs, 0).map(|dt| Self(dt.fixed_offset()))
    }

    pub fn as_unix(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn add(&self, duration: Duration) -> Self {
        Self(self.0 + duration.0)
    }

    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        Duration(self.0 - other.0)
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn date_naive(&self) -> chrono::NaiveDate {
        self.0.date_naive()
    }

    /// True if this timestamp lands exactly on a `{:00,:15,:30,:45}` quarter boundary.
    pub fn is_quarter_aligned(&self) -> bool {
        self.minute() % 15 == 0 && self.0.second() == 0
    }

    /// Floor this timestamp down to the most recent quarter-hour boundary.
    pub fn floor_to_quarter(&self) -> Self {
        let floored_minute = (self.minute() / 15) * 15;
        let dt = self
            .0
            .with_minute(floored_minute)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(self.0);
        Self(dt)
    }

    pub fn inner(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self(dt)
    }
}

impl From<Timestamp> for DateTime<FixedOffset> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%:z"))
    }
}

// ============================================================================
// Physical unit newtypes
// ============================================================================

/// Power in kilowatts (kW). Positive values always mean "into the battery"
/// wherever the sign carries meaning (decisions, interval records); negative
/// means discharge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Power(pub f64);

impl Power {
    pub fn kilowatts(kw: f64) -> Self {
        Self(kw)
    }

    pub fn as_kilowatts(&self) -> f64 {
        self.0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} kW", self.0)
    }
}

impl Add for Power {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Power {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Energy in kilowatt-hours (kWh).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Energy(pub f64);

impl Energy {
    pub fn kilowatt_hours(kwh: f64) -> Self {
        Self(kwh)
    }

    pub fn as_kilowatt_hours(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} kWh", self.0)
    }
}

impl Add for Energy {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Energy {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// State of charge, 0-100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Percentage(pub f64);

impl Percentage {
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 100.0))
    }

    pub fn as_percent(&self) -> f64 {
        self.0
    }

    pub fn as_ratio(&self) -> f64 {
        self.0 / 100.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

/// Price in SEK per kilowatt-hour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Price(pub f64);

impl Price {
    pub fn sek_per_kwh(price: f64) -> Self {
        Self(price)
    }

    pub fn as_sek_per_kwh(&self) -> f64 {
        self.0
    }

    /// Round to the three decimal places the spec mandates for price comparisons.
    pub fn rounded(&self) -> Self {
        Self(round3(self.0))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5} SEK/kWh", self.0)
    }
}

impl Mul<Energy> for Price {
    type Output = f64;
    fn mul(self, energy: Energy) -> Self::Output {
        self.0 * energy.as_kilowatt_hours()
    }
}

impl Div for Price {
    type Output = f64;
    fn div(self, rhs: Self) -> Self::Output {
        self.0 / rhs.0
    }
}

/// Round to three decimal places, matching the spec's price-comparison convention.
pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ============================================================================
// Market geography
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceArea {
    SE1,
    SE2,
    SE3,
    SE4,
}

impl fmt::Display for PriceArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SE1 => "SE1",
            Self::SE2 => "SE2",
            Self::SE3 => "SE3",
            Self::SE4 => "SE4",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PriceArea {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SE1" => Ok(Self::SE1),
            "SE2" => Ok(Self::SE2),
            "SE3" => Ok(Self::SE3),
            "SE4" => Ok(Self::SE4),
            _ => Err("invalid area; expected SE1..SE4"),
        }
    }
}

/// One quarter-hour (or coarser, pre-upsampling) price slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub time_start: DateTime<FixedOffset>,
    pub time_end: DateTime<FixedOffset>,
    pub price_sek_per_kwh: f64,
}

// ============================================================================
// Decision vocabulary
// ============================================================================

/// The five modes the inverter can be told to run in. Serializes via the
/// fixed textual mapping from the design notes, not the derive default,
/// because `SELF_CONSUME_GRID`'s wire form has a space and a dash in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Charge,
    Discharge,
    Idle,
    SelfConsume,
    SelfConsumeGrid,
}

impl Action {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Action::Charge => "charge",
            Action::Discharge => "discharge",
            Action::Idle => "idle",
            Action::SelfConsume => "selfConsumption",
            Action::SelfConsumeGrid => "selfConsumption - grid",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "charge" => Some(Action::Charge),
            "discharge" => Some(Action::Discharge),
            "idle" => Some(Action::Idle),
            "selfConsumption" => Some(Action::SelfConsume),
            "selfConsumption - grid" => Some(Action::SelfConsumeGrid),
            _ => None,
        }
    }

    /// Sign convention for `interval_cost`: charging is a negative cash flow.
    pub fn cost_sign(&self) -> f64 {
        match self {
            Action::Charge => -1.0,
            Action::Discharge | Action::SelfConsumeGrid => 1.0,
            Action::Idle | Action::SelfConsume => 0.0,
        }
    }

    /// The "action family" sessions key on: self-consume variants are grouped
    /// with discharge for the day planner's summary counters (spec.md 4.C).
    pub fn family(&self) -> ActionFamily {
        match self {
            Action::Charge => ActionFamily::Charge,
            Action::Discharge | Action::SelfConsumeGrid | Action::SelfConsume => {
                ActionFamily::Discharge
            }
            Action::Idle => ActionFamily::Idle,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

impl Serialize for Action {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Action::from_wire_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown action: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFamily {
    Charge,
    Discharge,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTier {
    Cheapest,
    Middle,
    Expensive,
}

impl fmt::Display for PriceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceTier::Cheapest => write!(f, "cheapest"),
            PriceTier::Middle => write!(f, "middle"),
            PriceTier::Expensive => write!(f, "expensive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Solar,
    LoadBalancing,
    Grid,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Solar => write!(f, "solar"),
            Priority::LoadBalancing => write!(f, "load_balancing"),
            Priority::Grid => write!(f, "grid"),
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
