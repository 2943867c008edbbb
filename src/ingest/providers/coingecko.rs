//! CoinGecko spot prices with 24 h change.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::model::{Category, DerivedMetric, MetricKind, SourceRecords};

pub const ID: &str = "coingecko";
pub const DEFAULT_ENDPOINT: &str = "https://api.coingecko.com/api/v3/simple/price";

/// (CoinGecko id, ticker)
const COINS: &[(&str, &str)] = &[("bitcoin", "BTC"), ("ethereum", "ETH"), ("solana", "SOL")];

#[derive(Debug, Deserialize)]
struct Quote {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
    #[serde(default)]
    last_updated_at: Option<i64>,
}

pub struct CoinGeckoAdapter {
    ctx: AdapterContext,
    endpoint: String,
}

impl CoinGeckoAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
        }
    }

    fn url(&self) -> String {
        let ids: Vec<&str> = COINS.iter().map(|(id, _)| *id).collect();
        format!(
            "{}?ids={}&vs_currencies=usd&include_24hr_change=true&include_last_updated_at=true",
            self.endpoint,
            ids.join(",")
        )
    }
}

#[async_trait]
impl SourceAdapter for CoinGeckoAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let quotes: BTreeMap<String, Quote> = self
            .ctx
            .fetcher
            .fetch_json(&self.url(), RequestOptions::get(), self.ctx.timeout)
            .await?;
        to_records(&quotes, self.ctx.clock.now())
    }
}

fn to_records(
    quotes: &BTreeMap<String, Quote>,
    now: DateTime<Utc>,
) -> Result<SourceRecords, SourceError> {
    let mut metrics = Vec::new();
    for (coin, ticker) in COINS {
        let Some(q) = quotes.get(*coin) else { continue };
        if !q.usd.is_finite() {
            continue;
        }
        let ts = q
            .last_updated_at
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .unwrap_or(now);
        metrics.push(DerivedMetric::new(
            ID,
            format!("{}_price_usd", ticker.to_ascii_lowercase()),
            format!("{ticker} price"),
            q.usd,
            "USD",
            MetricKind::PriceUsd,
            Category::Finance,
            ts,
        ));
        if let Some(change) = q.usd_24h_change.filter(|c| c.is_finite()) {
            metrics.push(DerivedMetric::new(
                ID,
                format!("{}_change_24h", ticker.to_ascii_lowercase()),
                format!("{ticker} 24h change"),
                change,
                "%",
                MetricKind::PriceChangePercent24h,
                Category::Finance,
                ts,
            ));
        }
    }
    if metrics.is_empty() {
        return Err(SourceError::parse("coingecko: no requested coin in response"));
    }
    Ok(SourceRecords::metrics(metrics))
}
