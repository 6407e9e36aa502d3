use std::sync::RwLock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::error::{Result, RewardsError};

/// Cached USD exchange rates, refreshed periodically from an external feed.
/// Degrades to the last successfully fetched rate on feed failure, and to
/// 1.0 (USD parity) when a currency has never been fetched - the degraded
/// path is logged, never hidden.
pub struct RateCache {
    feed_url: Option<String>,
    client: reqwest::Client,
    rates: DashMap<String, Decimal>,
    last_refreshed_at: RwLock<Option<DateTime<Utc>>>,
}

impl RateCache {
    pub fn new(feed_url: Option<String>) -> Self {
        Self {
            feed_url,
            client: reqwest::Client::new(),
            rates: DashMap::new(),
            last_refreshed_at: RwLock::new(None),
        }
    }

    pub fn rate(&self, currency: &str) -> Decimal {
        let code = currency.to_uppercase();
        if code == "USD" {
            return Decimal::ONE;
        }

        match self.rates.get(&code) {
            Some(rate) => *rate,
            None => {
                tracing::warn!(
                    currency = %code,
                    "No rate cached, falling back to USD parity (degraded)"
                );
                Decimal::ONE
            }
        }
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        *self.last_refreshed_at.read().expect("rate cache lock poisoned")
    }

    pub async fn refresh_once(&self) -> Result<usize> {
        let Some(url) = self.feed_url.as_deref() else {
            return Err(RewardsError::RateFeed("no rate feed configured".to_string()));
        };

        let body: serde_json::Value = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RewardsError::RateFeed(e.to_string()))?
            .error_for_status()
            .map_err(|e| RewardsError::RateFeed(e.to_string()))?
            .json()
            .await
            .map_err(|e| RewardsError::RateFeed(e.to_string()))?;

        let parsed = parse_feed(&body);
        if parsed.is_empty() {
            return Err(RewardsError::RateFeed("feed returned no usable rates".to_string()));
        }

        let count = parsed.len();
        for (code, rate) in parsed {
            self.rates.insert(code, rate);
        }
        *self.last_refreshed_at.write().expect("rate cache lock poisoned") = Some(Utc::now());

        Ok(count)
    }

    pub async fn run_periodic_refresh(&self, interval_seconds: u64) {
        loop {
            match self.refresh_once().await {
                Ok(count) => tracing::info!(count, "Currency rates refreshed"),
                // keep serving last-known rates; the next tick retries
                Err(e) => tracing::warn!("Rate refresh failed, keeping stale rates: {}", e),
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(interval_seconds)).await;
        }
    }

    #[cfg(test)]
    fn seed(&self, currency: &str, rate: Decimal) {
        self.rates.insert(currency.to_uppercase(), rate);
    }
}

/// Accepts the common `{"rates": {"EUR": 0.92, ...}}` feed shape, or a bare
/// top-level object of the same form. Non-positive rates are dropped.
fn parse_feed(body: &serde_json::Value) -> Vec<(String, Decimal)> {
    let table = body.get("rates").and_then(|v| v.as_object()).or_else(|| body.as_object());

    let Some(table) = table else {
        return Vec::new();
    };

    table
        .iter()
        .filter_map(|(code, value)| {
            let rate = value.as_f64().and_then(|f| Decimal::try_from(f).ok())?;
            (rate > Decimal::ZERO).then(|| (code.to_uppercase(), rate))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn usd_is_always_parity() {
        let cache = RateCache::new(None);
        assert_eq!(cache.rate("USD"), Decimal::ONE);
        assert_eq!(cache.rate("usd"), Decimal::ONE);
    }

    #[test]
    fn unknown_currency_degrades_to_parity() {
        let cache = RateCache::new(None);
        assert_eq!(cache.rate("EUR"), Decimal::ONE);
        assert!(cache.last_refreshed_at().is_none());
    }

    #[test]
    fn cached_rate_is_served() {
        let cache = RateCache::new(None);
        cache.seed("EUR", dec!(0.92));
        assert_eq!(cache.rate("eur"), dec!(0.92));
    }

    #[test]
    fn feed_parsing_handles_wrapped_and_bare_shapes() {
        let wrapped = serde_json::json!({ "rates": { "EUR": 0.92, "INR": 83.1, "BAD": -1.0 } });
        let mut parsed = parse_feed(&wrapped);
        parsed.sort();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "EUR");

        let bare = serde_json::json!({ "gbp": 0.79 });
        let parsed = parse_feed(&bare);
        assert_eq!(parsed, vec![("GBP".to_string(), dec!(0.79))]);

        assert!(parse_feed(&serde_json::json!([1, 2])).is_empty());
    }
}
