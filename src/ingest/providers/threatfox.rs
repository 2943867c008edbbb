//! ThreatFox (abuse.ch) indicators of compromise from the last 24 h.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{abuse_ch_key, normalize_text, parse_provider_time, LABEL_MAX_CHARS};
use crate::model::{CanonicalEvent, Category, Severity, SourceRecords};
use crate::thresholds::IOC_CONFIDENCE;

pub const ID: &str = "threatfox";
pub const DEFAULT_ENDPOINT: &str = "https://threatfox-api.abuse.ch/api/v1/";
const CAP: usize = 50;

#[derive(Debug, Deserialize)]
struct Response {
    query_status: String,
    #[serde(default)]
    data: Option<Data>,
}

/// `data` is a list on success and a message string otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Data {
    Rows(Vec<Ioc>),
    Message(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct Ioc {
    id: Value,
    ioc: String,
    #[serde(default)]
    ioc_type: Option<String>,
    #[serde(default)]
    threat_type: Option<String>,
    #[serde(default)]
    malware_printable: Option<String>,
    #[serde(default)]
    first_seen: Option<String>,
    #[serde(default)]
    confidence_level: Option<f64>,
    #[serde(default)]
    reporter: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct ThreatFoxAdapter {
    ctx: AdapterContext,
    endpoint: String,
    auth_key: Option<String>,
}

impl ThreatFoxAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>, auth_key: Option<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
            auth_key,
        }
    }
}

#[async_trait]
impl SourceAdapter for ThreatFoxAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let key = abuse_ch_key(self.auth_key.as_deref())?;
        let opts = RequestOptions::post_json(json!({"query": "get_iocs", "days": 1}))
            .header("Auth-Key", key);
        let resp: Response = self
            .ctx
            .fetcher
            .fetch_json(&self.endpoint, opts, self.ctx.timeout)
            .await?;
        parse_response(resp, self.ctx.clock.now())
    }
}

fn parse_response(resp: Response, now: DateTime<Utc>) -> Result<SourceRecords, SourceError> {
    let rows = match (resp.query_status.as_str(), resp.data) {
        ("ok", Some(Data::Rows(rows))) => rows,
        ("no_result", _) => return Ok(SourceRecords::default()),
        ("ok", _) => return Err(SourceError::parse("threatfox: data is not a list")),
        (status, _) => {
            return Err(SourceError::parse(format!("threatfox: query_status {status}")))
        }
    };

    let events = rows
        .into_iter()
        .filter(|r| !r.ioc.trim().is_empty())
        .take(CAP)
        .map(|r| to_event(r, now))
        .collect();
    Ok(SourceRecords::events(events))
}

fn to_event(r: Ioc, now: DateTime<Utc>) -> CanonicalEvent {
    let confidence = r.confidence_level.unwrap_or(0.0);
    let severity = IOC_CONFIDENCE.classify_or(confidence, Severity::Low);
    let native_id = match &r.id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let family = r.malware_printable.as_deref().unwrap_or("Unknown malware");
    let threat = r.threat_type.as_deref().unwrap_or("ioc").replace('_', " ");
    let ts = r
        .first_seen
        .as_deref()
        .and_then(parse_provider_time)
        .unwrap_or(now);

    CanonicalEvent::new(
        ID,
        native_id,
        Category::Cyber,
        severity,
        ts,
        normalize_text(&format!("{family} {threat}: {}", r.ioc), LABEL_MAX_CHARS),
    )
    .indicator(r.ioc.trim())
    .group(r.malware_printable.as_deref())
    .tag("ioc")
    .tags(r.threat_type.clone())
    .tags(r.tags.unwrap_or_default())
    .meta("ioc_type", r.ioc_type)
    .meta("confidence", confidence)
    .meta("reporter", r.reporter)
}
