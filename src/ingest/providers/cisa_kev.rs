//! CISA Known Exploited Vulnerabilities catalog.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::fetch::RequestOptions;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{normalize_text, parse_provider_time, LABEL_MAX_CHARS};
use crate::model::{
    CanonicalEvent, Category, DerivedMetric, MetricKind, Severity, SourceRecords,
};

pub const ID: &str = "cisa_kev";
pub const DEFAULT_ENDPOINT: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";
const CAP: usize = 25;
const RECENT_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Catalog {
    vulnerabilities: Vec<Kev>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Kev {
    #[serde(rename = "cveID")]
    cve_id: String,
    #[serde(default)]
    vendor_project: Option<String>,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    vulnerability_name: Option<String>,
    date_added: String,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    known_ransomware_campaign_use: Option<String>,
}

pub struct CisaKevAdapter {
    ctx: AdapterContext,
    endpoint: String,
}

impl CisaKevAdapter {
    pub fn new(ctx: AdapterContext, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for CisaKevAdapter {
    fn id(&self) -> &str {
        ID
    }

    async fn collect(&self) -> Result<SourceRecords, SourceError> {
        let catalog: Catalog = self
            .ctx
            .fetcher
            .fetch_json(&self.endpoint, RequestOptions::get(), self.ctx.timeout)
            .await?;
        Ok(to_records(catalog, self.ctx.clock.now()))
    }
}

fn to_records(catalog: Catalog, now: DateTime<Utc>) -> SourceRecords {
    let mut dated: Vec<(DateTime<Utc>, Kev)> = catalog
        .vulnerabilities
        .into_iter()
        .filter_map(|k| parse_provider_time(&k.date_added).map(|ts| (ts, k)))
        .collect();
    // Newest first; CVE id breaks ties so the order is stable across runs.
    dated.sort_by(|(ta, a), (tb, b)| tb.cmp(ta).then_with(|| b.cve_id.cmp(&a.cve_id)));

    let window_start = now - Duration::days(RECENT_DAYS);
    let recent = dated.iter().filter(|(ts, _)| *ts >= window_start).count();

    let events = dated
        .into_iter()
        .take(CAP)
        .map(|(ts, k)| {
            let ransomware = k
                .known_ransomware_campaign_use
                .as_deref()
                .is_some_and(|v| v.eq_ignore_ascii_case("known"));
            let name = k
                .vulnerability_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "{} {}",
                        k.vendor_project.as_deref().unwrap_or_default(),
                        k.product.as_deref().unwrap_or_default()
                    )
                });
            let mut ev = CanonicalEvent::new(
                ID,
                &k.cve_id,
                Category::Vulnerability,
                if ransomware { Severity::Critical } else { Severity::High },
                ts,
                normalize_text(&format!("{}: {name}", k.cve_id), LABEL_MAX_CHARS),
            )
            .indicator(k.cve_id.as_str())
            .group(k.vendor_project.as_deref())
            .tag("kev")
            .meta("product", k.product)
            .meta("due_date", k.due_date);
            if ransomware {
                ev = ev.tag("kev_ransomware");
            }
            ev
        })
        .collect();

    SourceRecords {
        events,
        metrics: vec![DerivedMetric::new(
            ID,
            "kev_additions_7d",
            "KEV additions (7 days)",
            recent as f64,
            "count",
            MetricKind::KevAdditions7d,
            Category::Vulnerability,
            now,
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::test_support::fixed_now as now;
    use serde_json::json;

    fn catalog() -> Catalog {
        serde_json::from_value(json!({
            "title": "CISA Catalog of Known Exploited Vulnerabilities",
            "count": 4,
            "vulnerabilities": [
                {"cveID": "CVE-2020-0001", "vendorProject": "Old", "product": "Thing",
                 "vulnerabilityName": "Old Bug", "dateAdded": "2021-11-03",
                 "knownRansomwareCampaignUse": "Unknown"},
                {"cveID": "CVE-2025-1111", "vendorProject": "Fortinet", "product": "FortiOS",
                 "vulnerabilityName": "FortiOS Heap Overflow", "dateAdded": "2025-05-09",
                 "dueDate": "2025-05-30", "knownRansomwareCampaignUse": "Known"},
                {"cveID": "CVE-2025-2222", "vendorProject": "Microsoft", "product": "Windows",
                 "vulnerabilityName": "", "dateAdded": "2025-05-05",
                 "knownRansomwareCampaignUse": "Unknown"},
                {"cveID": "CVE-2025-3333", "dateAdded": "not a date"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn newest_first_with_ransomware_escalation() {
        let out = to_records(catalog(), now());
        let ids: Vec<&str> = out.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["CISA_KEV-CVE-2025-1111", "CISA_KEV-CVE-2025-2222", "CISA_KEV-CVE-2020-0001"]
        );
        assert_eq!(out.events[0].severity, Severity::Critical);
        assert!(out.events[0].has_tag("kev_ransomware"));
        assert_eq!(out.events[1].severity, Severity::High);
        assert_eq!(out.events[1].label, "CVE-2025-2222: Microsoft Windows");
    }

    #[test]
    fn additions_metric_counts_last_seven_days() {
        let out = to_records(catalog(), now());
        assert_eq!(out.metrics.len(), 1);
        assert_eq!(out.metrics[0].kind, MetricKind::KevAdditions7d);
        assert_eq!(out.metrics[0].value, 2.0);
    }
}
