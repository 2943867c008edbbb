//! Feodo Tracker botnet C2 blocklist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::{abuse_ch_key, parse_provider_time};
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::model::{CanonicalEvent, Category, Severity, SourceRecords};

pub const ID: &str = "feodo";
pub const DEFAULT_ENDPOINT: &str = "https://feodotracker.abuse.ch/downloads/ipblocklist.json";
const CAP: usize = 60;

#[derive(Debug, Deserialize)]
struct C2Server {
    ip_address: String,
    port: u16,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    as_number: Option<u64>,
    #[serde(default)]
    as_name: Option<String>,
    #[serde(default)]
    malware: Option<String>,
    #[serde(default)]
    first_seen: Option<String>,
    #[serde(default)]
    last_online: Option<String>,
}

pub struct FeodoAdapter {
    ctx: AdapterContext,
    endpoint: String,
    auth_key: Option<String>,
}

impl FeodoAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>, auth_key: Option<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
            auth_key,
        }
    }
}

#[async_trait]
impl SourceAdapter for FeodoAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let key = abuse_ch_key(self.auth_key.as_deref())?;
        let rows: Vec<C2Server> = self
            .ctx
            .fetcher
            .fetch_json(
                &self.endpoint,
                RequestOptions::get().header("Auth-Key", key),
                self.ctx.timeout,
            )
            .await?;
        Ok(to_records(rows, self.ctx.clock.now()))
    }
}

fn to_records(rows: Vec<C2Server>, now: DateTime<Utc>) -> SourceRecords {
    // Online servers first; the blocklist itself is ordered by first_seen.
    let (online, offline): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .filter(|r| !r.ip_address.trim().is_empty())
        .partition(|r| r.status.as_deref() == Some("online"));

    let events = online
        .into_iter()
        .chain(offline)
        .take(CAP)
        .map(|r| {
            let online = r.status.as_deref() == Some("online");
            let endpoint = format!("{}:{}", r.ip_address.trim(), r.port);
            let family = r.malware.as_deref().unwrap_or("botnet");
            // last_online is a bare date; first_seen has the full timestamp
            let ts = r
                .last_online
                .as_deref()
                .and_then(parse_provider_time)
                .or_else(|| r.first_seen.as_deref().and_then(parse_provider_time))
                .unwrap_or(now);
            CanonicalEvent::new(
                ID,
                &endpoint,
                Category::Cyber,
                if online { Severity::Critical } else { Severity::Medium },
                ts,
                format!("{family} C2 server {endpoint}"),
            )
            .indicator(endpoint.as_str())
            .region(r.country.as_deref())
            .group(r.malware.as_deref())
            .tag("botnet_c2")
            .meta("status", r.status)
            .meta("asn", r.as_number)
            .meta("as_name", r.as_name)
        })
        .collect();
    SourceRecords::events(events)
}
