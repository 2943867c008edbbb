// tests/aggregate_flow.rs
//
// Fan-out + assembly through the public library surface, with scripted
// adapters instead of HTTP.
//
// Covered:
// - three adapters, one timing out: ranked events + per-source status
// - 24h price change of 22% -> exactly one critical alert
// - "US" and "USA" merge into one cluster
// - caps cut the lists but not the statistics

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use situation_aggregator::assemble::{AggregateFilters, Limits, ResponseAssembler};
use situation_aggregator::error::SourceError;
use situation_aggregator::ingest::types::SourceAdapter;
use situation_aggregator::model::{
    CanonicalEvent, Category, DerivedMetric, MetricKind, Severity, SourceRecords,
};
use situation_aggregator::pipeline;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 10, 8, 0, 0).unwrap()
}

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 10, 9, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()
}

struct Canned {
    id: &'static str,
    records: SourceRecords,
    delay: Option<Duration>,
}

#[async_trait]
impl SourceAdapter for Canned {
    fn id(&self) -> &str {
        self.id
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.records.clone())
    }
}

fn canned(id: &'static str, events: Vec<CanonicalEvent>) -> Arc<dyn SourceAdapter> {
    Arc::new(Canned {
        id,
        records: SourceRecords::events(events),
        delay: None,
    })
}

fn event(source: &str, id: &str, sev: Severity, ts: DateTime<Utc>, region: &str) -> CanonicalEvent {
    CanonicalEvent::new(source, id, Category::Cyber, sev, ts, format!("{source} {id}"))
        .region(Some(region))
}

#[tokio::test]
async fn timeout_is_isolated_and_events_are_ranked() {
    let adapters = vec![
        canned(
            "a",
            vec![
                event("a", "1", Severity::Critical, t0(), "DE"),
                event("a", "2", Severity::Critical, t0(), "DE"),
            ],
        ),
        Arc::new(Canned {
            id: "b",
            records: SourceRecords::events(vec![event("b", "late", Severity::Critical, t1(), "DE")]),
            delay: Some(Duration::from_secs(30)),
        }) as Arc<dyn SourceAdapter>,
        canned("c", vec![event("c", "3", Severity::High, t1(), "FR")]),
    ];

    let results = pipeline::run_all(&adapters, Duration::from_millis(150)).await;
    let out = ResponseAssembler::default()
        .assemble(results, &AggregateFilters::default(), now(), &mut StdRng::seed_from_u64(3))
        .expect("assemble");

    let ranked: Vec<(Severity, DateTime<Utc>)> =
        out.events.iter().map(|e| (e.severity, e.timestamp)).collect();
    assert_eq!(
        ranked,
        vec![
            (Severity::Critical, t0()),
            (Severity::Critical, t0()),
            (Severity::High, t1()),
        ]
    );
    assert_eq!(out.sources["a"].status, "success");
    assert_eq!(out.sources["b"].status, "timeout");
    assert_eq!(out.sources["c"].status, "success");
    assert!(out.events.iter().all(|e| e.source != "b"));
}

#[tokio::test]
async fn price_move_of_22_percent_yields_one_critical_alert() {
    let adapter: Arc<dyn SourceAdapter> = Arc::new(Canned {
        id: "coingecko",
        records: SourceRecords::metrics(vec![DerivedMetric::new(
            "coingecko",
            "btc_change_24h",
            "BTC 24h change",
            22.0,
            "%",
            MetricKind::PriceChangePercent24h,
            Category::Finance,
            now(),
        )]),
        delay: None,
    });

    let results = pipeline::run_all(&[adapter], Duration::from_secs(1)).await;
    let out = ResponseAssembler::default()
        .assemble(results, &AggregateFilters::default(), now(), &mut StdRng::seed_from_u64(3))
        .expect("assemble");

    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.alerts[0].severity, Severity::Critical);
    assert_eq!(out.alerts[0].category, Category::Finance);
}

#[tokio::test]
async fn us_aliases_merge_into_one_cluster() {
    let adapters = vec![
        canned("a", vec![event("a", "1", Severity::Medium, t0(), "US")]),
        canned("b", vec![event("b", "1", Severity::High, t1(), "USA")]),
    ];
    let results = pipeline::run_all(&adapters, Duration::from_secs(1)).await;
    let out = ResponseAssembler::default()
        .assemble(results, &AggregateFilters::default(), now(), &mut StdRng::seed_from_u64(3))
        .expect("assemble");

    assert_eq!(out.clusters.len(), 1);
    let us = &out.clusters[0];
    assert_eq!(us.key, "US");
    assert_eq!(us.count, 2);
    assert_eq!(us.severity, Severity::High);
    assert_eq!(out.stats.by_region.get("US"), Some(&2));
}

#[tokio::test]
async fn caps_trim_lists_but_not_statistics() {
    let many: Vec<CanonicalEvent> = (0..40)
        .map(|i| {
            CanonicalEvent::new("r", i.to_string(), Category::Ransomware, Severity::High, t0(), "victim")
                .region(Some("GB"))
        })
        .collect();
    let limits = Limits {
        events: 5,
        alerts: 3,
        clusters: 1,
        metrics: 1,
        cluster_members: 4,
    };

    let results = pipeline::run_all(&[canned("r", many)], Duration::from_secs(1)).await;
    let out = ResponseAssembler::new(limits)
        .assemble(results, &AggregateFilters::default(), now(), &mut StdRng::seed_from_u64(3))
        .expect("assemble");

    assert_eq!(out.stats.total, 40);
    assert_eq!(out.stats.by_category.get(&Category::Ransomware), Some(&40));
    assert_eq!(out.events.len(), 5);
    assert_eq!(out.truncation.events.total, 40);
    assert_eq!(out.alerts.len(), 3);
    assert_eq!(out.truncation.alerts.total, 40);
    assert_eq!(out.clusters[0].count, 40);
    assert_eq!(out.clusters[0].members.len(), 4);
}
