//! ransomware.live recent victim postings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{normalize_text, parse_provider_time, LABEL_MAX_CHARS};
use crate::model::{CanonicalEvent, Category, Severity, SourceRecords};

pub const ID: &str = "ransomware";
pub const DEFAULT_ENDPOINT: &str = "https://api.ransomware.live/v2/recentvictims";
const CAP: usize = 40;

/// Sectors whose compromise is treated as critical (matched case-insensitively
/// as substrings of the provider's `activity` field).
const CRITICAL_SECTORS: &[&str] = &[
    "healthcare",
    "hospital",
    "energy",
    "utilities",
    "water",
    "government",
    "public sector",
    "transportation",
    "logistics",
    "telecommunication",
    "financial",
    "critical manufacturing",
    "defense",
];

#[derive(Debug, Deserialize)]
struct Victim {
    #[serde(alias = "victim")]
    post_title: String,
    #[serde(alias = "group")]
    group_name: String,
    #[serde(default, alias = "attackdate")]
    discovered: Option<String>,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    activity: Option<String>,
    #[serde(default)]
    website: Option<String>,
}

pub struct RansomwareAdapter {
    ctx: AdapterContext,
    endpoint: String,
}

impl RansomwareAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for RansomwareAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let rows: Vec<Victim> = self
            .ctx
            .fetcher
            .fetch_json(&self.endpoint, RequestOptions::get(), self.ctx.timeout)
            .await?;
        Ok(to_records(rows, self.ctx.clock.now()))
    }
}

fn is_critical_sector(activity: Option<&str>) -> bool {
    let Some(a) = activity else { return false };
    let a = a.to_ascii_lowercase();
    CRITICAL_SECTORS.iter().any(|s| a.contains(s))
}

/// Stable native id: the feed has none, so group + victim is the key.
fn native_id(group: &str, victim: &str) -> String {
    format!("{group}:{victim}")
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn to_records(mut rows: Vec<Victim>, now: DateTime<Utc>) -> SourceRecords {
    rows.retain(|v| !v.post_title.trim().is_empty() && !v.group_name.trim().is_empty());
    let mut events: Vec<CanonicalEvent> = rows
        .into_iter()
        .map(|v| {
            let victim = normalize_text(&v.post_title, LABEL_MAX_CHARS);
            let group = v.group_name.trim().to_string();
            let ts = v
                .discovered
                .as_deref()
                .or(v.published.as_deref())
                .and_then(parse_provider_time)
                .unwrap_or(now);
            let critical = is_critical_sector(v.activity.as_deref());
            let mut ev = CanonicalEvent::new(
                ID,
                native_id(&group, &victim),
                Category::Ransomware,
                if critical { Severity::Critical } else { Severity::High },
                ts,
                format!("{group} claims {victim}"),
            )
            .region(v.country.as_deref())
            .group(Some(group.as_str()))
            .tag("ransomware")
            .meta("sector", v.activity.clone())
            .meta("website", v.website);
            if critical {
                ev = ev.tag("critical_sector");
            }
            ev
        })
        .collect();
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(CAP);
    SourceRecords::events(events)
}
