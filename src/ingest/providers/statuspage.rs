//! Atlassian Statuspage `summary.json`, one adapter per configured page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{normalize_text, parse_provider_time, LABEL_MAX_CHARS};
use crate::model::{
    CanonicalEvent, Category, DerivedMetric, MetricKind, Severity, SourceRecords,
};

pub const ID_PREFIX: &str = "status:";
const CAP: usize = 20;
const MAJOR_TAG: &str = "major_degradation";

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    components: Vec<Component>,
    #[serde(default)]
    incidents: Vec<Incident>,
}

#[derive(Debug, Deserialize)]
struct Component {
    id: String,
    name: String,
    status: String,
    #[serde(default)]
    updated_at: Option<String>,
    /// Group containers mirror their children's status.
    #[serde(default)]
    group: bool,
}

#[derive(Debug, Deserialize)]
struct Incident {
    id: String,
    name: String,
    status: String,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    shortlink: Option<String>,
}

fn impact_severity(impact: Option<&str>) -> Severity {
    match impact.unwrap_or("none") {
        "critical" => Severity::Critical,
        "major" => Severity::High,
        "minor" => Severity::Medium,
        _ => Severity::Low,
    }
}

fn component_severity(status: &str) -> Option<Severity> {
    match status {
        "major_outage" => Some(Severity::High),
        "partial_outage" => Some(Severity::Medium),
        "degraded_performance" => Some(Severity::Low),
        _ => None,
    }
}

fn is_resolved(status: &str) -> bool {
    matches!(status, "resolved" | "postmortem" | "completed")
}

pub struct StatusPageAdapter {
    ctx: AdapterContext,
    id: String,
    name: String,
    url: String,
}

impl StatusPageAdapter {
    pub fn new(ctx: AdapterContext, id: &str, name: &str, url: &str) -> Self {
        Self {
            ctx,
            id: format!("{ID_PREFIX}{}", id.trim().to_ascii_lowercase()),
            name: name.trim().to_string(),
            url: url.trim().to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for StatusPageAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let summary: Summary = self
            .ctx
            .fetcher
            .fetch_json(&self.url, RequestOptions::get(), self.ctx.timeout)
            .await?;
        Ok(to_records(&self.id, &self.name, summary, self.ctx.clock.now()))
    }
}

fn to_records(source: &str, vendor: &str, summary: Summary, now: DateTime<Utc>) -> SourceRecords {
    let mut events = Vec::new();

    for inc in summary.incidents.into_iter().filter(|i| !is_resolved(&i.status)) {
        let impact = inc.impact.as_deref();
        let ts = inc
            .updated_at
            .as_deref()
            .or(inc.created_at.as_deref())
            .and_then(parse_provider_time)
            .unwrap_or(now);
        let mut ev = CanonicalEvent::new(
            source,
            &inc.id,
            Category::Infrastructure,
            impact_severity(impact),
            ts,
            normalize_text(&format!("{vendor}: {}", inc.name), LABEL_MAX_CHARS),
        )
        .group(Some(vendor))
        .tag("incident")
        .meta("status", inc.status.as_str())
        .meta("impact", impact)
        .meta("link", inc.shortlink);
        if matches!(impact, Some("major" | "critical")) {
            ev = ev.tag(MAJOR_TAG);
        }
        events.push(ev);
    }

    let mut degraded = 0usize;
    for c in summary.components.into_iter().filter(|c| !c.group) {
        let Some(severity) = component_severity(&c.status) else { continue };
        degraded += 1;
        let ts = c.updated_at.as_deref().and_then(parse_provider_time).unwrap_or(now);
        let mut ev = CanonicalEvent::new(
            source,
            format!("component-{}", c.id),
            Category::Infrastructure,
            severity,
            ts,
            normalize_text(
                &format!("{vendor} {}: {}", c.name, c.status.replace('_', " ")),
                LABEL_MAX_CHARS,
            ),
        )
        .group(Some(vendor))
        .tag("component")
        .meta("status", c.status.as_str());
        if c.status == "major_outage" {
            ev = ev.tag(MAJOR_TAG);
        }
        events.push(ev);
    }

    events.truncate(CAP);
    SourceRecords {
        events,
        metrics: vec![DerivedMetric::new(
            source,
            format!("{}_degraded_components", source.trim_start_matches(ID_PREFIX)),
            format!("{vendor} degraded components"),
            degraded as f64,
            "components",
            MetricKind::DegradedComponents,
            Category::Infrastructure,
            now,
        )],
    }
}
