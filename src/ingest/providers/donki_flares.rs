//! NASA DONKI solar flare notifications (GOES X-ray class).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::parse_provider_time;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::model::{CanonicalEvent, Category, Severity, SourceRecords};
use crate::thresholds::FLARE_CLASS;

pub const ID: &str = "donki_flares";
pub const DEFAULT_ENDPOINT: &str = "https://api.nasa.gov/DONKI/FLR";
const CAP: usize = 20;
const LOOKBACK_DAYS: i64 = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Flare {
    #[serde(rename = "flrID")]
    flr_id: String,
    begin_time: String,
    #[serde(default)]
    peak_time: Option<String>,
    #[serde(default)]
    class_type: Option<String>,
    #[serde(default)]
    source_location: Option<String>,
    #[serde(default)]
    active_region_num: Option<u32>,
    #[serde(default)]
    link: Option<String>,
}

/// `X1.2` → 3, `M5.0` → 2, `C3.4` → 1; A/B and unknown → 0.
fn class_magnitude(class: &str) -> f64 {
    match class.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('X') => 3.0,
        Some('M') => 2.0,
        Some('C') => 1.0,
        _ => 0.0,
    }
}

pub struct DonkiFlaresAdapter {
    ctx: AdapterContext,
    endpoint: String,
    api_key: String,
}

impl DonkiFlaresAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, now: DateTime<Utc>) -> String {
        let start = (now - Duration::days(LOOKBACK_DAYS)).format("%Y-%m-%d");
        let end = now.format("%Y-%m-%d");
        format!(
            "{}?startDate={start}&endDate={end}&api_key={}",
            self.endpoint, self.api_key
        )
    }
}

#[async_trait]
impl SourceAdapter for DonkiFlaresAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let now = self.ctx.clock.now();
        let rows: Vec<Flare> = self
            .ctx
            .fetcher
            .fetch_json(&self.url(now), RequestOptions::get(), self.ctx.timeout)
            .await?;
        Ok(to_records(rows, now))
    }
}

fn to_records(rows: Vec<Flare>, now: DateTime<Utc>) -> SourceRecords {
    let mut events: Vec<CanonicalEvent> = rows
        .into_iter()
        .map(|f| {
            let class = f.class_type.as_deref().unwrap_or("unknown").trim().to_string();
            let severity = FLARE_CLASS.classify_or(class_magnitude(&class), Severity::Low);
            let ts = f
                .peak_time
                .as_deref()
                .and_then(parse_provider_time)
                .or_else(|| parse_provider_time(&f.begin_time))
                .unwrap_or(now);
            let label = match f.active_region_num {
                Some(ar) => format!("{class} solar flare from AR{ar}"),
                None => format!("{class} solar flare"),
            };
            CanonicalEvent::new(ID, &f.flr_id, Category::Space, severity, ts, label)
                .tag("solar_flare")
                .meta("class", class.as_str())
                .meta("source_location", f.source_location)
                .meta("link", f.link)
        })
        .collect();
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(CAP);
    SourceRecords::events(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{MockReply, MockTransport};
    use crate::ingest::types::test_support::{fixed_now as now, mock_context};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn flare_class_drives_severity() {
        let rows: Vec<Flare> = serde_json::from_value(json!([
            {"flrID": "2025-05-10T06:27:00-FLR-001", "beginTime": "2025-05-10T06:27Z",
             "peakTime": "2025-05-10T06:40Z", "classType": "X1.2", "activeRegionNum": 13664},
            {"flrID": "2025-05-09T01:00:00-FLR-001", "beginTime": "2025-05-09T01:00Z", "classType": "M5.0"},
            {"flrID": "2025-05-08T01:00:00-FLR-001", "beginTime": "2025-05-08T01:00Z", "classType": "C3.4"},
            {"flrID": "2025-05-07T01:00:00-FLR-001", "beginTime": "2025-05-07T01:00Z", "classType": "B9.9"}
        ]))
        .unwrap();
        let out = to_records(rows, now());
        let sev: Vec<Severity> = out.events.iter().map(|e| e.severity).collect();
        assert_eq!(
            sev,
            vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Low]
        );
        assert_eq!(out.events[0].label, "X1.2 solar flare from AR13664");
        assert_eq!(
            out.events[0].timestamp,
            Utc.with_ymd_and_hms(2025, 5, 10, 6, 40, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn query_window_and_key() {
        let (mock, ctx) =
            mock_context(MockTransport::new().route(DEFAULT_ENDPOINT, MockReply::json(json!([]))));
        let res = DonkiFlaresAdapter::new(ctx, DEFAULT_ENDPOINT, "DEMO_KEY").fetch().await;
        assert!(res.outcome.is_success());
        assert_eq!(
            mock.calls()[0].endpoint,
            "https://api.nasa.gov/DONKI/FLR?startDate=2025-05-07&endDate=2025-05-10&api_key=DEMO_KEY"
        );
    }
}
