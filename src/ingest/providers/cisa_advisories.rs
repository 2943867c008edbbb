use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{normalize_text, LABEL_MAX_CHARS};
use crate::model::{CanonicalEvent, Category, Severity, SourceRecords};

pub const ID: &str = "cisa_advisories";
pub const DEFAULT_ENDPOINT: &str = "https://www.cisa.gov/cybersecurity-advisories/all.xml";
const CAP: usize = 15;

/// First match wins; titles and descriptions are matched lowercased.
const KEYWORDS: &[(&str, Severity)] = &[
    ("emergency directive", Severity::Critical),
    ("actively exploit", Severity::Critical),
    ("zero-day", Severity::Critical),
    ("ransomware", Severity::High),
    ("state-sponsored", Severity::High),
    ("nation-state", Severity::High),
    ("critical infrastructure", Severity::High),
    ("vulnerabilit", Severity::Medium),
    ("ics advisory", Severity::Medium),
    ("alert", Severity::Medium),
];

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn classify(text: &str) -> Severity {
    let t = text.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(k, _)| t.contains(k))
        .map(|(_, s)| *s)
        .unwrap_or(Severity::Low)
}

/// Last non-empty path segment of the advisory link (`aa25-130a`, `icsa-25-130-01`).
fn native_id(it: &Item) -> Option<String> {
    it.link
        .as_deref()
        .or(it.guid.as_deref())
        .and_then(|l| l.trim_end_matches('/').rsplit('/').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct CisaAdvisoriesAdapter {
    ctx: AdapterContext,
    endpoint: String,
}

impl CisaAdvisoriesAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for CisaAdvisoriesAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let opts = RequestOptions::get().header("Accept", "application/rss+xml, application/xml");
        let body = self
            .ctx
            .fetcher
            .fetch_text(&self.endpoint, opts, self.ctx.timeout)
            .await?;
        parse_feed(&body, self.ctx.clock.now())
    }
}

pub fn parse_feed(xml: &str, now: DateTime<Utc>) -> Result<SourceRecords, SourceError> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).map_err(|e| SourceError::parse(format!("rss: {e}")))?;

    let events = rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let id = native_id(&it)?;
            let title = normalize_text(it.title.as_deref().unwrap_or_default(), LABEL_MAX_CHARS);
            if title.is_empty() {
                return None;
            }
            let summary = normalize_text(it.description.as_deref().unwrap_or_default(), 400);
            let severity = classify(&format!("{title} {summary}"));
            let ts = it.pub_date.as_deref().and_then(parse_rfc2822).unwrap_or(now);
            Some(
                CanonicalEvent::new(ID, id.to_ascii_uppercase(), Category::Intel, severity, ts, title)
                    .region(Some("US"))
                    .tag("advisory")
                    .meta("link", it.link)
                    .meta("summary", (!summary.is_empty()).then_some(summary)),
            )
        })
        .take(CAP)
        .collect();
    Ok(SourceRecords::events(events))
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
