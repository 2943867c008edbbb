// src/analytics/mod.rs
//! Pure stage over the merged records: dedup, rank, statistics, alerts and
//! metric status. No I/O; `now` is passed in so 24 h windows are testable.

pub mod geo;

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::AnalyticsError;
use crate::model::{
    Alert, AlertOrigin, CanonicalEvent, Category, DerivedMetric, MetricStatus, Severity,
};
use crate::thresholds::metric_table;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub duplicates: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_region: BTreeMap<String, usize>,
    pub by_group: BTreeMap<String, usize>,
    pub last_24h: usize,
    pub last_24h_by_category: BTreeMap<Category, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsOutput {
    /// Deduplicated and ranked.
    pub events: Vec<CanonicalEvent>,
    /// With `status` filled in.
    pub metrics: Vec<DerivedMetric>,
    /// Event and metric alerts, ranked like events.
    pub alerts: Vec<Alert>,
    pub stats: Statistics,
}

/// An event rule: predicate plus the title prefix of the alert it raises.
struct EventRule {
    matches: fn(&CanonicalEvent) -> bool,
    title: &'static str,
}

const EVENT_RULES: &[EventRule] = &[
    EventRule {
        matches: |e| e.category == Category::Ransomware,
        title: "Ransomware victim",
    },
    EventRule {
        matches: |e| e.category == Category::Infrastructure && e.has_tag("major_degradation"),
        title: "Major service degradation",
    },
    EventRule {
        matches: |e| e.category == Category::Aviation && e.has_tag("hijack"),
        title: "Hijack squawk",
    },
    EventRule {
        matches: |e| e.has_tag("kev_ransomware"),
        title: "Exploited in ransomware campaigns",
    },
];

pub struct AnalyticsEngine {
    now: DateTime<Utc>,
}

impl AnalyticsEngine {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn run(
        &self,
        events: Vec<CanonicalEvent>,
        mut metrics: Vec<DerivedMetric>,
    ) -> Result<AnalyticsOutput, AnalyticsError> {
        let (mut events, duplicates) = dedup(events);
        rank_events(&mut events);

        let stats = self.statistics(&events, duplicates);

        let mut alerts = event_alerts(&events);
        alerts.extend(classify_metrics(&mut metrics)?);
        rank_alerts(&mut alerts);

        Ok(AnalyticsOutput {
            events,
            metrics,
            alerts,
            stats,
        })
    }

    pub fn statistics(&self, events: &[CanonicalEvent], duplicates: usize) -> Statistics {
        let cutoff = self.now - Duration::hours(24);
        let mut s = Statistics {
            total: events.len(),
            duplicates,
            ..Statistics::default()
        };
        for e in events {
            *s.by_category.entry(e.category).or_default() += 1;
            *s.by_severity.entry(e.severity).or_default() += 1;
            *s.by_source.entry(e.source.clone()).or_default() += 1;
            if let Some(r) = e.region.as_deref() {
                *s.by_region.entry(geo::region_key(r)).or_default() += 1;
            }
            if let Some(g) = e.group.as_deref() {
                *s.by_group.entry(g.to_string()).or_default() += 1;
            }
            if e.timestamp >= cutoff {
                s.last_24h += 1;
                *s.last_24h_by_category.entry(e.category).or_default() += 1;
            }
        }
        s
    }
}

/// First occurrence of each id wins. Returns the survivors and the number
/// of dropped duplicates.
pub fn dedup(events: Vec<CanonicalEvent>) -> (Vec<CanonicalEvent>, usize) {
    let before = events.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(before);
    let kept: Vec<CanonicalEvent> = events
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Stable: severity first, then newest first; ties keep input order.
pub fn rank_events(events: &mut [CanonicalEvent]) {
    events.sort_by_key(|e| (e.severity, Reverse(e.timestamp)));
}

pub fn rank_alerts(alerts: &mut [Alert]) {
    alerts.sort_by_key(|a| (a.severity, Reverse(a.timestamp)));
}

pub fn event_alerts(events: &[CanonicalEvent]) -> Vec<Alert> {
    events
        .iter()
        .filter_map(|e| {
            let rule = EVENT_RULES.iter().find(|r| (r.matches)(e))?;
            Some(Alert {
                id: format!("ALERT-{}", e.id),
                severity: e.severity,
                category: e.category,
                title: format!("{}: {}", rule.title, e.label),
                detail: e.label.clone(),
                source: e.source.clone(),
                timestamp: e.timestamp,
                origin: AlertOrigin::Event {
                    event_id: e.id.clone(),
                },
            })
        })
        .collect()
}

/// Sets each metric's `status` and returns an alert for every metric that
/// crosses a band. A non-finite value is a defect upstream and fails the run.
pub fn classify_metrics(metrics: &mut [DerivedMetric]) -> Result<Vec<Alert>, AnalyticsError> {
    let mut alerts = Vec::new();
    for m in metrics.iter_mut() {
        if !m.value.is_finite() {
            return Err(AnalyticsError::NonFiniteMetric { id: m.id.clone() });
        }
        let Some(table) = metric_table(m.kind) else {
            m.status = MetricStatus::Normal;
            continue;
        };
        let band = table.matching_band(m.value);
        m.status = MetricStatus::from(band.map(|b| b.severity));
        if let Some(b) = band {
            alerts.push(Alert {
                id: format!("ALERT-{}-{}", m.source.to_ascii_uppercase(), m.id),
                severity: b.severity,
                category: m.category,
                title: format!("{} at {} {}", m.label, format_value(m.value), m.unit),
                detail: format!(
                    "{} crossed the {} threshold ({} {})",
                    m.label,
                    b.severity.as_str(),
                    format_value(b.min),
                    m.unit
                ),
                source: m.source.clone(),
                timestamp: m.timestamp,
                origin: AlertOrigin::Metric {
                    metric_id: m.id.clone(),
                    value: m.value,
                    threshold: b.min,
                },
            });
        }
    }
    Ok(alerts)
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKind;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, h, 0, 0).unwrap()
    }

    fn ev(source: &str, id: &str, cat: Category, sev: Severity, ts: DateTime<Utc>) -> CanonicalEvent {
        CanonicalEvent::new(source, id, cat, sev, ts, format!("event {id}"))
    }

    fn metric(id: &str, kind: MetricKind, value: f64) -> DerivedMetric {
        DerivedMetric::new("coingecko", id, id, value, "%", kind, Category::Finance, t(12))
    }

    #[test]
    fn dedup_keeps_first_and_counts() {
        let a1 = ev("a", "1", Category::Cyber, Severity::Low, t(1)).tag("first");
        let a1_dup = ev("a", "1", Category::Cyber, Severity::Critical, t(2));
        let b = ev("b", "1", Category::Cyber, Severity::Low, t(1));
        let (kept, dropped) = dedup(vec![a1, a1_dup, b]);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].has_tag("first"));
    }

    #[test]
    fn ranking_is_severity_then_recency_and_stable() {
        let mut events = vec![
            ev("s", "low-new", Category::Cyber, Severity::Low, t(11)),
            ev("s", "crit-old", Category::Cyber, Severity::Critical, t(1)),
            ev("s", "crit-new", Category::Cyber, Severity::Critical, t(10)),
            ev("s", "tie-a", Category::Cyber, Severity::High, t(5)),
            ev("s", "tie-b", Category::Cyber, Severity::High, t(5)),
        ];
        rank_events(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["S-crit-new", "S-crit-old", "S-tie-a", "S-tie-b", "S-low-new"]);
    }

    #[test]
    fn statistics_cover_all_dimensions() {
        let engine = AnalyticsEngine::new(t(12));
        let yesterday = t(12) - Duration::hours(30);
        let events = vec![
            ev("feodo", "1", Category::Cyber, Severity::Critical, t(11)).region(Some("USA")),
            ev("feodo", "2", Category::Cyber, Severity::Medium, yesterday).region(Some("United States")),
            ev("ransomware", "3", Category::Ransomware, Severity::High, t(9))
                .region(Some("DE"))
                .group(Some("akira")),
        ];
        let s = engine.statistics(&events, 4);
        assert_eq!(s.total, 3);
        assert_eq!(s.duplicates, 4);
        assert_eq!(s.by_region.get("US"), Some(&2));
        assert_eq!(s.by_source.get("feodo"), Some(&2));
        assert_eq!(s.by_group.get("akira"), Some(&1));
        assert_eq!(s.by_severity.get(&Severity::Critical), Some(&1));
        assert_eq!(s.last_24h, 2);
        assert_eq!(s.last_24h_by_category.get(&Category::Cyber), Some(&1));
    }

    #[test]
    fn event_rules() {
        let events = vec![
            ev("ransomware", "v", Category::Ransomware, Severity::High, t(1)),
            ev("status:gh", "i", Category::Infrastructure, Severity::High, t(1)).tag("major_degradation"),
            ev("status:gh", "j", Category::Infrastructure, Severity::Medium, t(1)),
            ev("opensky", "h", Category::Aviation, Severity::Critical, t(1)).tag("hijack"),
            ev("cisa_kev", "k", Category::Vulnerability, Severity::Critical, t(1)).tag("kev_ransomware"),
            ev("feodo", "c", Category::Cyber, Severity::Critical, t(1)),
        ];
        let alerts = event_alerts(&events);
        assert_eq!(alerts.len(), 4);
        assert!(alerts.iter().all(|a| matches!(a.origin, AlertOrigin::Event { .. })));
        assert_eq!(alerts[0].title, "Ransomware victim: event v");
        assert_eq!(alerts[2].severity, Severity::Critical);
    }

    #[test]
    fn price_change_of_22_raises_one_critical_alert() {
        let mut metrics = vec![
            metric("btc_change_24h", MetricKind::PriceChangePercent24h, 22.0),
            metric("btc_price_usd", MetricKind::PriceUsd, 103_000.0),
        ];
        let alerts = classify_metrics(&mut metrics).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(
            alerts[0].origin,
            AlertOrigin::Metric {
                metric_id: "btc_change_24h".into(),
                value: 22.0,
                threshold: 20.0
            }
        );
        assert_eq!(metrics[0].status, MetricStatus::Critical);
        assert_eq!(metrics[1].status, MetricStatus::Normal);
    }

    #[test]
    fn non_finite_metric_fails_the_run() {
        let engine = AnalyticsEngine::new(t(12));
        let err = engine
            .run(vec![], vec![metric("kp", MetricKind::KpIndex, f64::NAN)])
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::NonFiniteMetric { .. }));
    }

    #[test]
    fn run_merges_and_ranks_alerts() {
        let engine = AnalyticsEngine::new(t(12));
        let out = engine
            .run(
                vec![ev("ransomware", "v", Category::Ransomware, Severity::High, t(3))],
                vec![metric("kp", MetricKind::KpIndex, 8.3)],
            )
            .unwrap();
        let sev: Vec<Severity> = out.alerts.iter().map(|a| a.severity).collect();
        assert_eq!(sev, vec![Severity::Critical, Severity::High]);
    }
}
