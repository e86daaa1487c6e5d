//! Price provider adapter (spec.md §6): fetches the day-ahead curve from a
//! remote HTTP source. Out of scope per spec.md §1 beyond its contract;
//! `SimulatedPriceProvider` exists for local development, backtesting, and
//! the test suite.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::types::{PriceArea, PricePoint};

#[derive(Debug, Error)]
pub enum PriceProviderError {
    #[error("no price data available")]
    NoData,
    #[error("transient error fetching prices: {0}")]
    Transient(String),
    #[error("fatal error fetching prices: {0}")]
    Fatal(String),
}

/// Returns an ordered, contiguous list of `PricePoint`s covering at least
/// the current and next calendar day, per spec.md §6.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch_day_ahead(
        &self,
        area: PriceArea,
        day_start: DateTime<FixedOffset>,
    ) -> Result<Vec<PricePoint>, PriceProviderError>;
}

/// A fixed, in-memory curve — swappable per test, and the default for local
/// runs without network access.
pub struct SimulatedPriceProvider {
    curve: RwLock<Vec<PricePoint>>,
}

impl SimulatedPriceProvider {
    pub fn new(curve: Vec<PricePoint>) -> Self {
        Self {
            curve: RwLock::new(curve),
        }
    }

    pub async fn set_curve(&self, curve: Vec<PricePoint>) {
        *self.curve.write().await = curve;
    }
}

#[async_trait]
impl PriceProvider for SimulatedPriceProvider {
    async fn fetch_day_ahead(
        &self,
        _area: PriceArea,
        day_start: DateTime<FixedOffset>,
    ) -> Result<Vec<PricePoint>, PriceProviderError> {
        let curve = self.curve.read().await;
        if curve.is_empty() {
            return Err(PriceProviderError::NoData);
        }
        let day_end = day_start + chrono::Duration::hours(24);
        let slice: Vec<PricePoint> = curve
            .iter()
            .filter(|p| p.time_start >= day_start && p.time_start < day_end)
            .cloned()
            .collect();
        if slice.is_empty() {
            return Err(PriceProviderError::NoData);
        }
        Ok(slice)
    }
}
