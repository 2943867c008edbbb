//! Response assembly: merge source results, apply request filters, run
//! analytics and clustering, then cap each collection.
//!
//! Caps apply only after statistics are computed, so `stats` always
//! describes the full (filtered) set and `truncation` says how much was cut.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analytics::{geo, AnalyticsEngine, Statistics};
use crate::error::AnalyticsError;
use crate::model::{
    Alert, CanonicalEvent, Category, DerivedMetric, GeoCluster, MetricStatus, SourceOutcome,
    SourceResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub events: usize,
    pub alerts: usize,
    pub clusters: usize,
    pub metrics: usize,
    pub cluster_members: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            events: 200,
            alerts: 50,
            clusters: 100,
            metrics: 60,
            cluster_members: 25,
        }
    }
}

impl Limits {
    pub fn sanitized(self) -> Self {
        Self {
            events: self.events.max(1),
            alerts: self.alerts.max(1),
            clusters: self.clusters.max(1),
            metrics: self.metrics.max(1),
            cluster_members: self.cluster_members.max(1),
        }
    }
}

/// Optional request filters, applied after fan-in and before analytics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AggregateFilters {
    pub region: Option<String>,
    pub category: Option<Category>,
    /// Event list size; never above the configured cap.
    pub limit: Option<usize>,
}

impl AggregateFilters {
    fn keeps_event(&self, e: &CanonicalEvent) -> bool {
        if self.category.is_some_and(|c| c != e.category) {
            return false;
        }
        match self.region.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            None => true,
            Some(want) => e
                .region
                .as_deref()
                .is_some_and(|have| geo::region_key(have) == geo::region_key(want)),
        }
    }

    /// Metrics carry no geography; only the category filter applies.
    fn keeps_metric(&self, m: &DerivedMetric) -> bool {
        self.category.map_or(true, |c| c == m.category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub ok: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: usize,
    pub metrics: usize,
    pub elapsed_ms: u64,
}

impl SourceStatus {
    fn from_result(r: &SourceResult) -> Self {
        let (events, metrics) = match &r.outcome {
            SourceOutcome::Success(rec) => (rec.events.len(), rec.metrics.len()),
            _ => (0, 0),
        };
        let (http_status, error) = match &r.outcome {
            SourceOutcome::Success(_) => (None, None),
            SourceOutcome::Timeout => (None, Some(format!("timed out after {}ms", r.elapsed_ms))),
            SourceOutcome::HttpError(s) => (Some(*s), Some(format!("http status {s}"))),
            SourceOutcome::NetworkError(m)
            | SourceOutcome::ParseError(m)
            | SourceOutcome::AuthError(m)
            | SourceOutcome::ConfigError(m) => (None, Some(m.clone())),
        };
        Self {
            ok: r.outcome.is_success(),
            status: r.outcome.kind(),
            http_status,
            error,
            events,
            metrics,
            elapsed_ms: r.elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Shown {
    pub total: usize,
    pub shown: usize,
}

impl Shown {
    pub fn is_truncated(&self) -> bool {
        self.shown < self.total
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub events: Shown,
    pub alerts: Shown,
    pub clusters: Shown,
    pub metrics: Shown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    pub generated_at: DateTime<Utc>,
    pub events: Vec<CanonicalEvent>,
    pub metrics: Vec<DerivedMetric>,
    pub alerts: Vec<Alert>,
    pub clusters: Vec<GeoCluster>,
    pub stats: Statistics,
    pub sources: BTreeMap<String, SourceStatus>,
    pub truncation: Truncation,
}

fn cap<T>(mut v: Vec<T>, n: usize) -> (Vec<T>, Shown) {
    let total = v.len();
    v.truncate(n);
    let shown = v.len();
    (v, Shown { total, shown })
}

fn status_rank(s: MetricStatus) -> u8 {
    match s {
        MetricStatus::Critical => 0,
        MetricStatus::Warning => 1,
        MetricStatus::Elevated => 2,
        MetricStatus::Normal => 3,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseAssembler {
    limits: Limits,
}

impl ResponseAssembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits: limits.sanitized(),
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn assemble<R: Rng>(
        &self,
        results: Vec<SourceResult>,
        filters: &AggregateFilters,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<AggregatedResult, AnalyticsError> {
        let mut sources = BTreeMap::new();
        let mut events = Vec::new();
        let mut metrics = Vec::new();
        for r in results {
            sources.insert(r.source_id.clone(), SourceStatus::from_result(&r));
            if let SourceOutcome::Success(rec) = r.outcome {
                events.extend(rec.events);
                metrics.extend(rec.metrics);
            }
        }

        events.retain(|e| filters.keeps_event(e));
        metrics.retain(|m| filters.keeps_metric(m));

        let out = AnalyticsEngine::new(now).run(events, metrics)?;
        let clusters = geo::cluster(&out.events, self.limits.cluster_members, rng)?;

        let mut metrics = out.metrics;
        metrics.sort_by_key(|m| status_rank(m.status));

        let event_cap = filters
            .limit
            .map_or(self.limits.events, |l| l.min(self.limits.events));
        let (events, ev_shown) = cap(out.events, event_cap);
        let (alerts, al_shown) = cap(out.alerts, self.limits.alerts);
        let (clusters, cl_shown) = cap(clusters, self.limits.clusters);
        let (metrics, me_shown) = cap(metrics, self.limits.metrics);

        Ok(AggregatedResult {
            generated_at: now,
            events,
            metrics,
            alerts,
            clusters,
            stats: out.stats,
            sources,
            truncation: Truncation {
                events: ev_shown,
                alerts: al_shown,
                clusters: cl_shown,
                metrics: me_shown,
            },
        })
    }
}
