//! HTTP-backed price provider, behind the `live-price` Cargo feature. Not
//! wired into the default build (spec.md §1 keeps the provider "out of
//! scope, specified only by the contracts it must satisfy") — this exists
//! as a sketch an operator can enable for a real deployment.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::domain::types::{PriceArea, PricePoint};

use super::price_provider::{PriceProvider, PriceProviderError};

#[derive(Debug, Deserialize)]
struct WireEntry {
    time_start: DateTime<FixedOffset>,
    time_end: DateTime<FixedOffset>,
    value: f64,
}

pub struct HttpPriceProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceProvider {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client, base_url }
    }
}

#[async_trait]
impl PriceProvider for HttpPriceProvider {
    async fn fetch_day_ahead(
        &self,
        area: PriceArea,
        day_start: DateTime<FixedOffset>,
    ) -> Result<Vec<PricePoint>, PriceProviderError> {
        let url = format!(
            "{}/prices?area={}&from={}",
            self.base_url,
            area,
            day_start.to_rfc3339()
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PriceProviderError::Transient(e.to_string()))?;

        if response.status().is_server_error() || response.status().as_u16() == 408 {
            return Err(PriceProviderError::Transient(response.status().to_string()));
        }
        if response.status().is_client_error() {
            return Err(PriceProviderError::Fatal(response.status().to_string()));
        }

        let entries: Vec<WireEntry> = response
            .json()
            .await
            .map_err(|e| PriceProviderError::Transient(e.to_string()))?;

        if entries.is_empty() {
            return Err(PriceProviderError::NoData);
        }

        Ok(entries
            .into_iter()
            .map(|e| PricePoint {
                time_start: e.time_start,
                time_end: e.time_end,
                price_sek_per_kwh: e.value,
            })
            .collect())
    }
}
