//! model.rs — canonical record types shared by adapters, analytics and the API.
//!
//! Everything here is created fresh per request and thrown away once the
//! response has been serialized.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordinal severity. Declaration order is the ranking order: `Critical`
/// sorts first, so `Critical < High < Medium < Low` under `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// The more severe of the two.
    pub fn most_severe(self, other: Severity) -> Severity {
        self.min(other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cyber,
    Ransomware,
    Vulnerability,
    Infrastructure,
    Space,
    Aviation,
    Finance,
    Intel,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cyber => "cyber",
            Category::Ransomware => "ransomware",
            Category::Vulnerability => "vulnerability",
            Category::Infrastructure => "infrastructure",
            Category::Space => "space",
            Category::Aviation => "aviation",
            Category::Finance => "finance",
            Category::Intel => "intel",
        }
    }

    /// Case-insensitive parse used by query filters.
    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cyber" => Some(Category::Cyber),
            "ransomware" => Some(Category::Ransomware),
            "vulnerability" | "vuln" => Some(Category::Vulnerability),
            "infrastructure" | "infra" => Some(Category::Infrastructure),
            "space" => Some(Category::Space),
            "aviation" => Some(Category::Aviation),
            "finance" | "markets" => Some(Category::Finance),
            "intel" => Some(Category::Intel),
            _ => None,
        }
    }

    /// Events of this category are useless on a map without a real position,
    /// so unknown geography keys are dropped instead of approximated.
    pub fn geo_essential(self) -> bool {
        matches!(self, Category::Aviation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// The universal normalized unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// `"<SOURCE>-<nativeId>"`, unique within the source namespace.
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    /// UTC; may be the provider's report time rather than the occurrence time.
    pub timestamp: DateTime<Utc>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
    pub source: String,
    /// Raw geography key as the provider reported it (country code or name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Grouping name (malware family, ransomware gang, vendor...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Provider-specific fields for category renderers; never read by ranking.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl CanonicalEvent {
    pub fn new(
        source: &str,
        native_id: impl AsRef<str>,
        category: Category,
        severity: Severity,
        timestamp: DateTime<Utc>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{}-{}", source.to_ascii_uppercase(), native_id.as_ref()),
            category,
            severity,
            timestamp,
            label: label.into(),
            indicator: None,
            source: source.to_string(),
            region: None,
            location: None,
            group: None,
            tags: BTreeSet::new(),
            metadata: Map::new(),
        }
    }

    pub fn indicator(mut self, indicator: impl Into<String>) -> Self {
        self.indicator = Some(indicator.into());
        self
    }

    /// Sets the geography key; blank values are ignored.
    pub fn region(mut self, region: Option<&str>) -> Self {
        self.region = region
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        self
    }

    pub fn location(mut self, lat: f64, lon: f64) -> Self {
        if lat.is_finite() && lon.is_finite() {
            self.location = Some(GeoPoint { lat, lon });
        }
        self
    }

    pub fn group(mut self, group: Option<&str>) -> Self {
        self.group = group
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let t: String = tag.into();
        let t = t.trim().to_ascii_lowercase();
        if !t.is_empty() {
            self.tags.insert(t);
        }
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for t in tags {
            self = self.tag(t);
        }
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        let v = value.into();
        if !v.is_null() {
            self.metadata.insert(key.to_string(), v);
        }
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Links a metric to its threshold table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    PriceUsd,
    PriceChangePercent24h,
    KpIndex,
    GasPriceGwei,
    FeeRateSatVb,
    BlockHeight,
    AircraftTracked,
    AircraftEmergencies,
    DegradedComponents,
    KevAdditions7d,
}

/// Threshold class assigned to a metric by the analytics stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    #[default]
    Normal,
    Elevated,
    Warning,
    Critical,
}

impl From<Option<Severity>> for MetricStatus {
    fn from(s: Option<Severity>) -> Self {
        match s {
            None => MetricStatus::Normal,
            Some(Severity::Low) | Some(Severity::Medium) => MetricStatus::Elevated,
            Some(Severity::High) => MetricStatus::Warning,
            Some(Severity::Critical) => MetricStatus::Critical,
        }
    }
}

/// A single scalar KPI (Kp index, block height, 24h change...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetric {
    pub id: String,
    pub label: String,
    pub value: f64,
    pub unit: String,
    pub kind: MetricKind,
    pub category: Category,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: MetricStatus,
}

impl DerivedMetric {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &str,
        id: impl Into<String>,
        label: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        kind: MetricKind,
        category: Category,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value,
            unit: unit.into(),
            kind,
            category,
            source: source.to_string(),
            timestamp,
            status: MetricStatus::Normal,
        }
    }
}

/// Where an alert came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertOrigin {
    Event {
        event_id: String,
    },
    Metric {
        metric_id: String,
        value: f64,
        threshold: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    pub detail: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub origin: AlertOrigin,
}

/// Jittered marker for one cluster member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub event_id: String,
    pub severity: Severity,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCluster {
    /// Canonical region key (e.g. `US`).
    pub key: String,
    pub name: String,
    pub centroid: GeoPoint,
    /// True when the centroid is a random stand-in for an unknown key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approximate: bool,
    pub count: usize,
    pub severity: Severity,
    pub categories: std::collections::BTreeMap<Category, usize>,
    pub members: Vec<ClusterMember>,
}

/// Records produced by one adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecords {
    pub events: Vec<CanonicalEvent>,
    pub metrics: Vec<DerivedMetric>,
}

impl SourceRecords {
    pub fn events(events: Vec<CanonicalEvent>) -> Self {
        Self {
            events,
            metrics: Vec::new(),
        }
    }

    pub fn metrics(metrics: Vec<DerivedMetric>) -> Self {
        Self {
            events: Vec::new(),
            metrics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.metrics.is_empty()
    }
}

/// Outcome of invoking one adapter. Failures carry no records.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Success(SourceRecords),
    Timeout,
    NetworkError(String),
    ParseError(String),
    AuthError(String),
    HttpError(u16),
    ConfigError(String),
}

impl SourceOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceOutcome::Success(_) => "success",
            SourceOutcome::Timeout => "timeout",
            SourceOutcome::NetworkError(_) => "network_error",
            SourceOutcome::ParseError(_) => "parse_error",
            SourceOutcome::AuthError(_) => "auth_error",
            SourceOutcome::HttpError(_) => "http_error",
            SourceOutcome::ConfigError(_) => "config_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SourceOutcome::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceResult {
    pub source_id: String,
    pub outcome: SourceOutcome,
    pub elapsed_ms: u64,
}

impl SourceResult {
    pub fn new(source_id: impl Into<String>, outcome: SourceOutcome, elapsed_ms: u64) -> Self {
        Self {
            source_id: source_id.into(),
            outcome,
            elapsed_ms,
        }
    }
}
