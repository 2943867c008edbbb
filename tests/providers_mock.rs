// tests/providers_mock.rs
//
// The production adapter registry over a scripted transport: real payload
// shapes in, assembled response out. No sockets.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use situation_aggregator::assemble::AggregateFilters;
use situation_aggregator::clock::ManualClock;
use situation_aggregator::config::credentials::Credentials;
use situation_aggregator::config::{AggregatorConfig, StatusPageConfig};
use situation_aggregator::fetch::{MockReply, MockTransport};
use situation_aggregator::ingest::providers::{
    cisa_advisories, cisa_kev, feodo, mempool, opensky, swpc_kp,
};
use situation_aggregator::model::{Category, MetricStatus, Severity};
use situation_aggregator::token_cache::ClientCredentials;
use situation_aggregator::Aggregator;

const GITHUB_SUMMARY: &str = "https://www.githubstatus.com/api/v2/summary.json";

fn config() -> AggregatorConfig {
    let mut cfg = AggregatorConfig::builtin();
    cfg.statuspages = vec![StatusPageConfig {
        id: "github".into(),
        name: "GitHub".into(),
        url: GITHUB_SUMMARY.into(),
    }];
    cfg.sources.disabled = [
        "threatfox",
        "urlhaus",
        "ransomware",
        "swpc_alerts",
        "donki_flares",
        "coingecko",
        "ethereum",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    cfg.fetch.timeout_ms = 500;
    cfg.fetch.adapter_budget_ms = 2_000;
    cfg
}

fn creds() -> Credentials {
    Credentials {
        opensky: Some(ClientCredentials {
            client_id: "dashboard".into(),
            client_secret: "s3cret".into(),
        }),
        abuse_ch_key: Some("test-key".into()),
        ..Credentials::default()
    }
}

fn squawk(icao: &str, callsign: &str, country: &str, code: &str) -> Value {
    json!([icao, callsign, country, 1746878000, 1746878390, 8.55, 47.45, 10972.8,
           false, 231.5, 90.0, 0.0, null, 11277.6, code, false, 0])
}

fn transport() -> MockTransport {
    MockTransport::new()
        .route(
            feodo::DEFAULT_ENDPOINT,
            MockReply::json(json!([
                {"ip_address": "1.2.3.4", "port": 443, "status": "online", "country": "US",
                 "malware": "Dridex", "last_online": "2025-05-09"},
                {"ip_address": "5.6.7.8", "port": 8080, "status": "offline", "country": "USA",
                 "malware": "QakBot", "first_seen": "2025-05-01 10:00:00"}
            ])),
        )
        .route(
            cisa_kev::DEFAULT_ENDPOINT,
            MockReply::json(json!({
                "title": "CISA Catalog of Known Exploited Vulnerabilities",
                "vulnerabilities": [
                    {"cveID": "CVE-2025-1111", "vendorProject": "Fortinet", "product": "FortiOS",
                     "vulnerabilityName": "FortiOS Heap Overflow", "dateAdded": "2025-05-09",
                     "knownRansomwareCampaignUse": "Known"}
                ]
            })),
        )
        .route(
            cisa_advisories::DEFAULT_ENDPOINT,
            MockReply::ok(include_str!("fixtures/cisa_advisories.xml")),
        )
        .route(
            swpc_kp::DEFAULT_ENDPOINT,
            MockReply::json(json!([
                ["time_tag", "Kp", "a_running", "station_count"],
                ["2025-05-10 06:00:00.000", "5.67", "48", "8"]
            ])),
        )
        .route(
            opensky::DEFAULT_TOKEN_ENDPOINT,
            MockReply::json(json!({"access_token": "stale", "expires_in": 1800})),
        )
        .route(
            opensky::DEFAULT_TOKEN_ENDPOINT,
            MockReply::json(json!({"access_token": "fresh", "expires_in": 1800})),
        )
        .route(opensky::DEFAULT_ENDPOINT, MockReply::Status(401, "{}".into()))
        .route(
            opensky::DEFAULT_ENDPOINT,
            MockReply::json(json!({
                "time": 1746878400,
                "states": [
                    squawk("3c6444", "DLH4X", "Germany", "7500"),
                    squawk("a0b1c2", "UAL9", "United States", "1200")
                ]
            })),
        )
        .route(mempool::DEFAULT_ENDPOINT, MockReply::Status(503, "busy".into()))
        .route(GITHUB_SUMMARY, MockReply::ok(include_str!("fixtures/statuspage_github.json")))
}

fn aggregator(mock: Arc<MockTransport>) -> Aggregator {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap(),
    ));
    Aggregator::with_transport(&config(), &creds(), mock, clock).with_seed(42)
}

#[tokio::test]
async fn registry_over_mock_transport_assembles_everything() {
    let mock = Arc::new(transport());
    let agg = aggregator(mock.clone());
    assert_eq!(
        agg.source_ids(),
        vec![
            "feodo",
            "cisa_kev",
            "cisa_advisories",
            "swpc_kp",
            "opensky",
            "mempool",
            "status:github"
        ]
    );

    let out = agg.aggregate(&AggregateFilters::default()).await.expect("aggregate");

    assert_eq!(out.sources.len(), 7);
    assert!(out.sources["feodo"].ok);
    assert_eq!(out.sources["feodo"].events, 2);
    assert_eq!(out.sources["opensky"].status, "auth_error");
    assert_eq!(out.sources["mempool"].status, "http_error");
    assert_eq!(out.sources["mempool"].http_status, Some(503));
    assert!(out.sources["status:github"].ok);
    assert_eq!(mock.count("https://threatfox"), 0);

    // Critical first: the online C2 and the ransomware-linked KEV entry.
    assert_eq!(out.events[0].severity, Severity::Critical);
    assert!(out
        .events
        .windows(2)
        .all(|w| (w[0].severity, std::cmp::Reverse(w[0].timestamp))
            <= (w[1].severity, std::cmp::Reverse(w[1].timestamp))));

    // "US" and "USA" land in one bucket.
    let us = out.clusters.iter().find(|c| c.key == "US").expect("US cluster");
    assert!(us.count >= 2);

    let kp = out.metrics.iter().find(|m| m.id == "kp_index").expect("kp metric");
    assert_eq!(kp.status, MetricStatus::Elevated);
    assert!(out
        .alerts
        .iter()
        .any(|a| a.title.starts_with("Major service degradation") && a.source == "status:github"));
}

#[tokio::test]
async fn opensky_recovers_on_next_request_after_401() {
    let mock = Arc::new(transport());
    let agg = aggregator(mock.clone());

    let first = agg.aggregate(&AggregateFilters::default()).await.expect("first");
    assert_eq!(first.sources["opensky"].status, "auth_error");

    let second = agg.aggregate(&AggregateFilters::default()).await.expect("second");
    assert!(second.sources["opensky"].ok);
    assert_eq!(mock.count(opensky::DEFAULT_TOKEN_ENDPOINT), 2);

    let hijack = second
        .events
        .iter()
        .find(|e| e.id == "OPENSKY-3c6444-7500")
        .expect("hijack squawk event");
    assert_eq!(hijack.severity, Severity::Critical);
    assert!(second.alerts.iter().any(|a| a.title.starts_with("Hijack squawk")));
}

#[tokio::test]
async fn category_filter_narrows_events_and_stats() {
    let agg = aggregator(Arc::new(transport()));
    let filters = AggregateFilters {
        category: Some(Category::Infrastructure),
        ..AggregateFilters::default()
    };
    let out = agg.aggregate(&filters).await.expect("aggregate");

    assert!(!out.events.is_empty());
    assert!(out.events.iter().all(|e| e.category == Category::Infrastructure));
    assert_eq!(out.stats.total, out.events.len());
    assert!(out.metrics.iter().all(|m| m.category == Category::Infrastructure));
    // Source status still covers every adapter.
    assert_eq!(out.sources.len(), 7);
}
