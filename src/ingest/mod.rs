// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::config::credentials::{Credentials, ENV_ABUSE_CH_AUTH_KEY};
use crate::config::AggregatorConfig;
use crate::error::SourceError;
use crate::ingest::providers::*;
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::token_cache::TokenCache;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "source_fetch_total",
            "Adapter invocations by source and outcome."
        );
        describe_histogram!("source_fetch_ms", "Adapter wall time in milliseconds.");
        describe_counter!(
            "source_records_total",
            "Events and metrics produced by successful adapters."
        );
        describe_counter!(
            "token_exchange_total",
            "OAuth2 client-credentials exchanges by outcome."
        );
        describe_counter!("aggregate_runs_total", "Completed aggregation runs.");
        describe_histogram!(
            "aggregate_duration_ms",
            "End-to-end aggregation time in milliseconds."
        );
        describe_gauge!(
            "aggregate_last_run_ts",
            "Unix ts when an aggregation last completed."
        );
    });
}

/// Normalize provider text for labels: decode entities, strip tags,
/// straighten quotes, collapse whitespace, cap at `max_chars`.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
        out.push('…');
    }
    out
}

/// Default cap for event labels.
pub const LABEL_MAX_CHARS: usize = 200;

/// The abuse.ch APIs reject anonymous calls; without a key the adapter
/// reports a config error and sends nothing.
pub fn abuse_ch_key(key: Option<&str>) -> Result<&str, SourceError> {
    key.ok_or_else(|| {
        SourceError::Config(format!("{ENV_ABUSE_CH_AUTH_KEY} not configured"))
    })
}

/// Best-effort timestamp parser for the formats the feeds actually send:
/// RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff][ UTC]`, DONKI's `YYYY-MM-DDTHH:MMZ`
/// and bare dates. Naive values are taken as UTC.
pub fn parse_provider_time(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let s = s.trim_end_matches(" UTC").trim_end_matches('Z');
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for f in FORMATS {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, f) {
            return Some(n.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// Build the adapter registry in its fixed registration order, skipping
/// sources disabled in config. The OpenSky token cache is created here and
/// lives as long as the registry.
pub fn build_adapters(
    ctx: &AdapterContext,
    cfg: &AggregatorConfig,
    creds: &Credentials,
) -> Vec<Arc<dyn SourceAdapter>> {
    let ep = |id: &str, default: &str| cfg.sources.endpoint_for(id, default);

    let token_cache = Arc::new(TokenCache::new(
        cfg.opensky.token_endpoint.clone(),
        creds.opensky.clone(),
        ctx.fetcher.clone(),
        ctx.clock.clone(),
        cfg.fetch.token_timeout(),
    ));

    let mut all: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(threatfox::ThreatFoxAdapter::new(
            ctx.clone(),
            ep(threatfox::ID, threatfox::DEFAULT_ENDPOINT),
            creds.abuse_ch_key.clone(),
        )),
        Arc::new(urlhaus::UrlhausAdapter::new(
            ctx.clone(),
            ep(urlhaus::ID, urlhaus::DEFAULT_ENDPOINT),
            creds.abuse_ch_key.clone(),
        )),
        Arc::new(feodo::FeodoAdapter::new(
            ctx.clone(),
            ep(feodo::ID, feodo::DEFAULT_ENDPOINT),
            creds.abuse_ch_key.clone(),
        )),
        Arc::new(ransomware::RansomwareAdapter::new(
            ctx.clone(),
            ep(ransomware::ID, ransomware::DEFAULT_ENDPOINT),
        )),
        Arc::new(cisa_kev::CisaKevAdapter::new(
            ctx.clone(),
            ep(cisa_kev::ID, cisa_kev::DEFAULT_ENDPOINT),
        )),
        Arc::new(cisa_advisories::CisaAdvisoriesAdapter::new(
            ctx.clone(),
            ep(cisa_advisories::ID, cisa_advisories::DEFAULT_ENDPOINT),
        )),
        Arc::new(swpc_kp::SwpcKpAdapter::new(
            ctx.clone(),
            ep(swpc_kp::ID, swpc_kp::DEFAULT_ENDPOINT),
        )),
        Arc::new(swpc_alerts::SwpcAlertsAdapter::new(
            ctx.clone(),
            ep(swpc_alerts::ID, swpc_alerts::DEFAULT_ENDPOINT),
        )),
        Arc::new(donki_flares::DonkiFlaresAdapter::new(
            ctx.clone(),
            ep(donki_flares::ID, donki_flares::DEFAULT_ENDPOINT),
            creds.nasa_key(),
        )),
        Arc::new(opensky::OpenSkyAdapter::new(
            ctx.clone(),
            ep(opensky::ID, opensky::DEFAULT_ENDPOINT),
            token_cache,
            cfg.opensky.bbox,
        )),
        Arc::new(coingecko::CoinGeckoAdapter::new(
            ctx.clone(),
            ep(coingecko::ID, coingecko::DEFAULT_ENDPOINT),
        )),
        Arc::new(ethereum::EthereumAdapter::new(
            ctx.clone(),
            ep(ethereum::ID, ethereum::DEFAULT_ENDPOINT),
        )),
        Arc::new(mempool::MempoolAdapter::new(
            ctx.clone(),
            ep(mempool::ID, mempool::DEFAULT_ENDPOINT),
        )),
    ];
    for page in &cfg.statuspages {
        all.push(Arc::new(statuspage::StatusPageAdapter::new(
            ctx.clone(),
            &page.id,
            &page.name,
            &page.url,
        )));
    }

    all.retain(|a| {
        let on = cfg.sources.is_enabled(a.id());
        if !on {
            tracing::info!(target: "ingest", source = a.id(), "source disabled by config");
        }
        on
    });
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::fetch::{DeadlineFetcher, MockTransport};
    use chrono::{TimeZone, Timelike};
    use std::time::Duration;

    #[test]
    fn normalize_text_decodes_strips_and_collapses() {
        let s = "  <b>Hello,</b>&nbsp;&nbsp; \u{201C}world\u{201D}  ";
        assert_eq!(normalize_text(s, 100), "Hello, \"world\"");
    }

    #[test]
    fn normalize_text_caps_length() {
        let out = normalize_text(&"x".repeat(50), 10);
        assert_eq!(out.chars().count(), 11);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn provider_time_formats() {
        let want = Utc.with_ymd_and_hms(2025, 5, 10, 6, 27, 0).unwrap();
        assert_eq!(parse_provider_time("2025-05-10T06:27:00Z"), Some(want));
        assert_eq!(parse_provider_time("2025-05-10T08:27:00+02:00"), Some(want));
        assert_eq!(parse_provider_time("2025-05-10 06:27:00 UTC"), Some(want));
        assert_eq!(parse_provider_time("2025-05-10 06:27:00"), Some(want));
        assert_eq!(parse_provider_time("2025-05-10T06:27Z"), Some(want));
        assert_eq!(
            parse_provider_time("2025-05-10 06:27:00.123456").map(|d| d.with_nanosecond(0).unwrap()),
            Some(want)
        );
        assert_eq!(
            parse_provider_time("2025-05-10"),
            Some(Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_provider_time(""), None);
        assert_eq!(parse_provider_time("yesterday"), None);
    }

    fn ctx() -> AdapterContext {
        AdapterContext {
            fetcher: DeadlineFetcher::new(Arc::new(MockTransport::new())),
            clock: Arc::new(SystemClock),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn registry_order_and_disabled_sources() {
        let mut cfg = AggregatorConfig::builtin();
        let ids: Vec<String> = build_adapters(&ctx(), &cfg, &Credentials::default())
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        assert_eq!(ids.first().map(String::as_str), Some("threatfox"));
        assert!(ids.contains(&"opensky".to_string()));
        assert!(ids.contains(&"status:github".to_string()));
        assert_eq!(ids.len(), 13 + cfg.statuspages.len());

        cfg.sources.disabled = vec!["OPENSKY".into(), "status:github".into()];
        let ids: Vec<String> = build_adapters(&ctx(), &cfg, &Credentials::default())
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        assert!(!ids.contains(&"opensky".to_string()));
        assert!(!ids.contains(&"status:github".to_string()));
        assert!(ids.contains(&"status:cloudflare".to_string()));
    }
}
