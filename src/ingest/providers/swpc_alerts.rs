//! NOAA SWPC space weather alerts, warnings and watches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{normalize_text, parse_provider_time, LABEL_MAX_CHARS};
use crate::model::{CanonicalEvent, Category, Severity, SourceRecords};

pub const ID: &str = "swpc_alerts";
pub const DEFAULT_ENDPOINT: &str = "https://services.swpc.noaa.gov/products/alerts.json";
const CAP: usize = 20;

#[derive(Debug, Deserialize)]
struct Message {
    product_id: String,
    issue_datetime: String,
    message: String,
}

fn severity_rules() -> &'static [(Regex, Severity)] {
    static RULES: OnceCell<Vec<(Regex, Severity)>> = OnceCell::new();
    RULES.get_or_init(|| {
        [
            // NOAA scale level 4-5 (severe/extreme) storms and blackouts
            (r"\b[GSR][45]\b|K-index of [89]", Severity::Critical),
            (r"(?m)^ALERT:|\bG3\b|K-index of 7", Severity::High),
            (r"(?m)^(EXTENDED )?(WARNING|WATCH):", Severity::Medium),
        ]
        .into_iter()
        .map(|(p, s)| (Regex::new(p).unwrap(), s))
        .collect()
    })
}

fn classify(message: &str) -> Severity {
    severity_rules()
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, s)| *s)
        .unwrap_or(Severity::Low)
}

/// The headline line (`ALERT: ...`, `WARNING: ...`), if any.
fn headline(message: &str) -> Option<&str> {
    message.lines().map(str::trim).find(|l| {
        ["ALERT:", "WARNING:", "WATCH:", "EXTENDED WARNING:", "SUMMARY:", "CANCEL"]
            .iter()
            .any(|p| l.starts_with(p))
    })
}

fn serial_number(message: &str) -> Option<&str> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"Serial Number:\s*(\d+)").unwrap());
    re.captures(message).and_then(|c| c.get(1)).map(|m| m.as_str())
}

pub struct SwpcAlertsAdapter {
    ctx: AdapterContext,
    endpoint: String,
}

impl SwpcAlertsAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for SwpcAlertsAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let rows: Vec<Message> = self
            .ctx
            .fetcher
            .fetch_json(&self.endpoint, RequestOptions::get(), self.ctx.timeout)
            .await?;
        Ok(to_records(rows, self.ctx.clock.now()))
    }
}

fn to_records(rows: Vec<Message>, now: DateTime<Utc>) -> SourceRecords {
    let mut events: Vec<CanonicalEvent> = rows
        .into_iter()
        .map(|m| {
            let ts = parse_provider_time(&m.issue_datetime).unwrap_or(now);
            let native = match serial_number(&m.message) {
                Some(sn) => format!("{}-{sn}", m.product_id),
                None => format!("{}-{}", m.product_id, ts.timestamp()),
            };
            let label = headline(&m.message).unwrap_or(m.product_id.as_str());
            CanonicalEvent::new(
                ID,
                native,
                Category::Space,
                classify(&m.message),
                ts,
                normalize_text(label, LABEL_MAX_CHARS),
            )
            .tag("space_weather")
            .meta("product_id", m.product_id.as_str())
            .meta("message", normalize_text(&m.message, 1_000))
        })
        .collect();
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(CAP);
    SourceRecords::events(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::test_support::fixed_now as now;
    use serde_json::json;

    fn msgs() -> Vec<Message> {
        serde_json::from_value(json!([
            {"product_id": "K05A", "issue_datetime": "2025-05-10 06:27:13.837",
             "message": "Space Weather Message Code: ALTK05\r\nSerial Number: 2071\r\nIssue Time: 2025 May 10 0627 UTC\r\n\r\nALERT: Geomagnetic K-index of 5\r\nNOAA Scale: G1 - Minor"},
            {"product_id": "K08W", "issue_datetime": "2025-05-10 09:00:00.000",
             "message": "Serial Number: 120\r\n\r\nWARNING: Geomagnetic K-index of 8 expected\r\nNOAA Scale: G4 - Severe"},
            {"product_id": "A20F", "issue_datetime": "2025-05-09 12:00:00.000",
             "message": "Serial Number: 999\r\n\r\nWATCH: Geomagnetic Storm Category G2 Predicted"},
            {"product_id": "SUMX01", "issue_datetime": "2025-05-08 12:00:00.000",
             "message": "SUMMARY: X-ray Event exceeded M5"}
        ]))
        .unwrap()
    }

    #[test]
    fn keyword_classification() {
        let out = to_records(msgs(), now());
        let got: Vec<(&str, Severity)> = out
            .events
            .iter()
            .map(|e| (e.id.as_str(), e.severity))
            .collect();
        assert_eq!(
            got,
            vec![
                ("SWPC_ALERTS-K08W-120", Severity::Critical),
                ("SWPC_ALERTS-K05A-2071", Severity::High),
                ("SWPC_ALERTS-A20F-999", Severity::Medium),
                ("SWPC_ALERTS-SUMX01-1746705600", Severity::Low),
            ]
        );
        assert_eq!(out.events[1].label, "ALERT: Geomagnetic K-index of 5");
    }

    #[test]
    fn missing_message_fails_validation() {
        let r: Result<Vec<Message>, _> =
            serde_json::from_value(json!([{"product_id": "X", "issue_datetime": "2025-05-10"}]));
        assert!(r.is_err());
    }
}
