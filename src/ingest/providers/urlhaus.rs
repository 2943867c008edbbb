//! URLhaus (abuse.ch) recently reported malware distribution URLs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{abuse_ch_key, normalize_text, parse_provider_time, LABEL_MAX_CHARS};
use crate::model::{CanonicalEvent, Category, Severity, SourceRecords};

pub const ID: &str = "urlhaus";
pub const DEFAULT_ENDPOINT: &str = "https://urlhaus-api.abuse.ch/v1/urls/recent/limit/100/";
const CAP: usize = 50;

#[derive(Debug, Deserialize)]
struct Response {
    query_status: String,
    #[serde(default)]
    urls: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    id: Value,
    url: String,
    #[serde(default)]
    url_status: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    date_added: Option<String>,
    #[serde(default)]
    threat: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    urlhaus_reference: Option<String>,
}

pub struct UrlhausAdapter {
    ctx: AdapterContext,
    endpoint: String,
    auth_key: Option<String>,
}

impl UrlhausAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>, auth_key: Option<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
            auth_key,
        }
    }
}

#[async_trait]
impl SourceAdapter for UrlhausAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let key = abuse_ch_key(self.auth_key.as_deref())?;
        let opts = RequestOptions::get().header("Auth-Key", key);
        let resp: Response = self
            .ctx
            .fetcher
            .fetch_json(&self.endpoint, opts, self.ctx.timeout)
            .await?;
        parse_response(resp, self.ctx.clock.now())
    }
}

fn parse_response(resp: Response, now: DateTime<Utc>) -> Result<SourceRecords, SourceError> {
    match resp.query_status.as_str() {
        "ok" => {}
        "no_results" | "no_result" => return Ok(SourceRecords::default()),
        other => return Err(SourceError::parse(format!("urlhaus: query_status {other}"))),
    }

    let events = resp
        .urls
        .into_iter()
        .filter(|u| !u.url.trim().is_empty())
        .take(CAP)
        .map(|u| {
            let online = u.url_status.as_deref() == Some("online");
            let severity = if online { Severity::High } else { Severity::Medium };
            let native_id = match &u.id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let threat = u.threat.as_deref().unwrap_or("malware").replace('_', " ");
            let host = u.host.as_deref().unwrap_or("unknown host");
            CanonicalEvent::new(
                ID,
                native_id,
                Category::Cyber,
                severity,
                u.date_added.as_deref().and_then(parse_provider_time).unwrap_or(now),
                normalize_text(&format!("{threat} on {host}"), LABEL_MAX_CHARS),
            )
            .indicator(u.url.trim())
            .tag("malware_url")
            .tags(u.threat.clone())
            .tags(u.tags.unwrap_or_default())
            .meta("url_status", u.url_status)
            .meta("host", u.host)
            .meta("reference", u.urlhaus_reference)
        })
        .collect();
    Ok(SourceRecords::events(events))
}
