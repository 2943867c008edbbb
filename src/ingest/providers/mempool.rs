//! mempool.space Bitcoin tip height (primary) and recommended fees (follow-up).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::model::{Category, DerivedMetric, MetricKind, SourceRecords};

pub const ID: &str = "mempool";
pub const DEFAULT_ENDPOINT: &str = "https://mempool.space/api";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fees {
    fastest_fee: f64,
    #[serde(default)]
    half_hour_fee: Option<f64>,
    #[serde(default)]
    economy_fee: Option<f64>,
}

pub struct MempoolAdapter {
    ctx: AdapterContext,
    base: String,
}

impl MempoolAdapter {
    pub fn new(ctx: AdapterContext, base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            ctx,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn tip_height(&self) -> Result<u64, SourceError> {
        let body = self
            .ctx
            .fetcher
            .fetch_text(
                &format!("{}/blocks/tip/height", self.base),
                RequestOptions::get().header("Accept", "text/plain"),
                self.ctx.timeout,
            )
            .await?;
        body.trim()
            .parse()
            .map_err(|_| SourceError::parse(format!("mempool: tip height {:?}", body.trim())))
    }

    async fn fees(&self) -> Result<Fees, SourceError> {
        self.ctx
            .fetcher
            .fetch_json(
                &format!("{}/v1/fees/recommended", self.base),
                RequestOptions::get(),
                self.ctx.timeout,
            )
            .await
    }
}

#[async_trait]
impl SourceAdapter for MempoolAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let height = self.tip_height().await?;
        let fees = match self.fees().await {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::debug!(target: "ingest", source = ID, error = %e, "fee estimate unavailable");
                None
            }
        };
        Ok(to_records(height, fees, self.ctx.clock.now()))
    }
}

fn to_records(height: u64, fees: Option<Fees>, now: DateTime<Utc>) -> SourceRecords {
    let mut metrics = vec![DerivedMetric::new(
        ID,
        "btc_block_height",
        "Bitcoin block height",
        height as f64,
        "blocks",
        MetricKind::BlockHeight,
        Category::Finance,
        now,
    )];
    if let Some(f) = fees.filter(|f| f.fastest_fee.is_finite()) {
        let mut m = DerivedMetric::new(
            ID,
            "btc_fastest_fee",
            "Bitcoin fastest fee",
            f.fastest_fee,
            "sat/vB",
            MetricKind::FeeRateSatVb,
            Category::Finance,
            now,
        );
        // Keep the slower tiers in the label for the dashboard tooltip.
        if let (Some(h), Some(e)) = (f.half_hour_fee, f.economy_fee) {
            m.label = format!("Bitcoin fastest fee (30m {h}, economy {e})");
        }
        metrics.push(m);
    }
    SourceRecords::metrics(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{MockReply, MockTransport};
    use crate::ingest::types::test_support::mock_context;
    use crate::model::SourceOutcome;
    use serde_json::json;

    const TIP: &str = "https://mempool.space/api/blocks/tip/height";
    const FEES: &str = "https://mempool.space/api/v1/fees/recommended";

    #[tokio::test]
    async fn height_and_fees() {
        let (_, ctx) = mock_context(
            MockTransport::new()
                .route(TIP, MockReply::ok("893123\n"))
                .route(
                    FEES,
                    MockReply::json(json!({"fastestFee": 310, "halfHourFee": 200, "hourFee": 150,
                                           "economyFee": 40, "minimumFee": 1})),
                ),
        );
        let res = MempoolAdapter::new(ctx, "https://mempool.space/api/").fetch().await;
        let SourceOutcome::Success(r) = res.outcome else { panic!("expected success") };
        assert_eq!(r.metrics[0].value, 893_123.0);
        assert_eq!(r.metrics[1].kind, MetricKind::FeeRateSatVb);
        assert_eq!(r.metrics[1].value, 310.0);
    }

    #[tokio::test]
    async fn fee_timeout_keeps_height() {
        let (_, ctx) = mock_context(
            MockTransport::new()
                .route(TIP, MockReply::ok("893123"))
                .route(FEES, MockReply::ok("{}").delayed(std::time::Duration::from_secs(5))),
        );
        let res = MempoolAdapter::new(ctx, DEFAULT_ENDPOINT).fetch().await;
        let SourceOutcome::Success(r) = res.outcome else { panic!("expected success") };
        assert_eq!(r.metrics.len(), 1);
        assert_eq!(r.metrics[0].kind, MetricKind::BlockHeight);
    }

    #[tokio::test]
    async fn primary_failure_fails_the_source() {
        let (_, ctx) = mock_context(MockTransport::new().route(TIP, MockReply::ok("not-a-number")));
        let res = MempoolAdapter::new(ctx, DEFAULT_ENDPOINT).fetch().await;
        assert!(matches!(res.outcome, SourceOutcome::ParseError(_)));
    }
}
