// tests/metrics.rs
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use serde_json::json;
use tower::ServiceExt;

use situation_aggregator::assemble::{AggregateFilters, Limits};
use situation_aggregator::clock::ManualClock;
use situation_aggregator::config::credentials::Credentials;
use situation_aggregator::config::AggregatorConfig;
use situation_aggregator::fetch::{MockReply, MockTransport};
use situation_aggregator::ingest::providers::coingecko;
use situation_aggregator::metrics::Metrics;
use situation_aggregator::Aggregator;

/// Only CoinGecko (ok) and mempool (503) enabled.
fn aggregator() -> Aggregator {
    let mut cfg = AggregatorConfig::builtin();
    cfg.statuspages.clear();
    cfg.sources.disabled = [
        "threatfox", "urlhaus", "feodo", "ransomware", "cisa_kev", "cisa_advisories",
        "swpc_kp", "swpc_alerts", "donki_flares", "opensky", "ethereum",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let mock = MockTransport::new()
        .route(
            coingecko::DEFAULT_ENDPOINT,
            MockReply::json(json!({"bitcoin": {"usd": 64000.0, "usd_24h_change": 1.5}})),
        )
        .route("https://mempool.space", MockReply::Status(503, "busy".into()));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap(),
    ));
    Aggregator::with_transport(&cfg, &Credentials::default(), Arc::new(mock), clock)
}

async fn scrape(metrics: &Metrics) -> String {
    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let metrics = Metrics::global(Limits::default()).expect("recorder");
    aggregator()
        .aggregate(&AggregateFilters::default())
        .await
        .expect("aggregate");

    let text = scrape(metrics).await;
    for needle in [
        "source_fetch_total",
        "source_fetch_ms",
        "source_records_total",
        "aggregate_runs_total",
        "aggregate_duration_ms",
        "aggregate_last_run_ts",
        "aggregate_limit",
    ] {
        assert!(text.contains(needle), "missing series {needle} in:\n{text}");
    }
}

#[cfg(feature = "strict-metrics")]
#[tokio::test]
async fn per_source_outcomes_are_labelled() {
    let metrics = Metrics::global(Limits::default()).expect("recorder");
    aggregator()
        .aggregate(&AggregateFilters::default())
        .await
        .expect("aggregate");

    let text = scrape(metrics).await;
    let has = |source: &str, outcome: &str| {
        text.lines().any(|l| {
            l.starts_with("source_fetch_total")
                && l.contains(&format!("source=\"{source}\""))
                && l.contains(&format!("outcome=\"{outcome}\""))
        })
    };
    assert!(has("coingecko", "success"), "{text}");
    assert!(has("mempool", "http_error"), "{text}");
}
