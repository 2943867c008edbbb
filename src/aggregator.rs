//! Request-scoped aggregation facade: fan out to every adapter, then hand the
//! settled results to the assembler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use metrics::{counter, gauge, histogram};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};

use crate::assemble::{AggregateFilters, AggregatedResult, Limits, ResponseAssembler};
use crate::clock::{Clock, SystemClock};
use crate::config::credentials::Credentials;
use crate::config::AggregatorConfig;
use crate::error::AnalyticsError;
use crate::fetch::{CachingTransport, DeadlineFetcher, ReqwestTransport, Transport};
use crate::ingest::types::{AdapterContext, SourceAdapter};
use crate::ingest::{build_adapters, ensure_metrics_described};
use crate::pipeline;

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    assembler: ResponseAssembler,
    budget: Duration,
    clock: Arc<dyn Clock>,
    /// Fixed seed for cluster jitter; `None` draws from the OS.
    seed: Option<u64>,
}

impl Aggregator {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        limits: Limits,
        budget: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            adapters,
            assembler: ResponseAssembler::new(limits),
            budget,
            clock,
            seed: None,
        }
    }

    /// Production wiring: reqwest transport, optional response cache, system clock.
    pub fn from_config(cfg: &AggregatorConfig, creds: &Credentials) -> anyhow::Result<Self> {
        let reqwest = ReqwestTransport::new(cfg.fetch.connect_timeout())
            .context("building HTTP client")?;
        let mut transport: Arc<dyn Transport> = Arc::new(reqwest);
        if cfg.cache.enabled {
            info!(target: "aggregate", ttl_secs = cfg.cache.ttl_secs, "response cache enabled");
            transport = Arc::new(CachingTransport::new(
                transport,
                Duration::from_secs(cfg.cache.ttl_secs),
            ));
        }
        Ok(Self::with_transport(cfg, creds, transport, Arc::new(SystemClock)))
    }

    /// Same wiring over any transport and clock.
    pub fn with_transport(
        cfg: &AggregatorConfig,
        creds: &Credentials,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fetcher = DeadlineFetcher::new(transport).with_user_agent(cfg.fetch.user_agent.clone());
        let ctx = AdapterContext::new(fetcher, clock.clone(), cfg.fetch.timeout());
        let adapters = build_adapters(&ctx, cfg, creds);
        info!(
            target: "aggregate",
            sources = adapters.len(),
            budget_ms = cfg.fetch.adapter_budget_ms,
            "aggregator ready"
        );
        Self::new(adapters, cfg.limits, cfg.fetch.adapter_budget(), clock)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.id().to_string()).collect()
    }

    pub fn limits(&self) -> Limits {
        self.assembler.limits()
    }

    /// One full pass. Source failures are reported per source; only an
    /// analytics defect fails the call.
    pub async fn aggregate(
        &self,
        filters: &AggregateFilters,
    ) -> Result<AggregatedResult, AnalyticsError> {
        ensure_metrics_described();
        let t0 = Instant::now();

        let results = pipeline::run_all(&self.adapters, self.budget).await;
        let now = self.clock.now();
        let mut rng = match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        let assembled = self.assembler.assemble(results, filters, now, &mut rng);

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        histogram!("aggregate_duration_ms").record(elapsed_ms as f64);
        match &assembled {
            Ok(out) => {
                counter!("aggregate_runs_total", "outcome" => "ok").increment(1);
                gauge!("aggregate_last_run_ts").set(now.timestamp() as f64);
                info!(
                    target: "aggregate",
                    elapsed_ms,
                    events = out.stats.total,
                    alerts = out.alerts.len(),
                    sources_ok = out.sources.values().filter(|s| s.ok).count(),
                    sources = out.sources.len(),
                    "aggregation complete"
                );
            }
            Err(e) => {
                counter!("aggregate_runs_total", "outcome" => "error").increment(1);
                error!(target: "aggregate", error = %e, elapsed_ms, "aggregation failed");
            }
        }
        assembled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::{MockReply, MockTransport};
    use crate::ingest::types::test_support::fixed_now;
    use serde_json::json;

    fn quiet_config() -> AggregatorConfig {
        let mut cfg = AggregatorConfig::builtin();
        cfg.statuspages.clear();
        cfg.sources.disabled = [
            "threatfox", "urlhaus", "feodo", "ransomware", "cisa_kev", "cisa_advisories",
            "swpc_kp", "swpc_alerts", "donki_flares", "opensky", "ethereum", "mempool",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        cfg.fetch.timeout_ms = 200;
        cfg.fetch.adapter_budget_ms = 500;
        cfg
    }

    #[tokio::test]
    async fn single_source_end_to_end() {
        let mock = MockTransport::new().route(
            "https://api.coingecko.com",
            MockReply::json(json!({
                "bitcoin": {"usd": 64000.0, "usd_24h_change": 22.0}
            })),
        );
        let agg = Aggregator::with_transport(
            &quiet_config(),
            &Credentials::default(),
            Arc::new(mock),
            Arc::new(ManualClock::new(fixed_now())),
        )
        .with_seed(7);
        assert_eq!(agg.source_ids(), vec!["coingecko"]);

        let out = agg.aggregate(&AggregateFilters::default()).await.unwrap();
        assert!(out.sources["coingecko"].ok);
        assert_eq!(out.generated_at, fixed_now());
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].severity, crate::model::Severity::Critical);
    }

    #[tokio::test]
    async fn transport_failure_is_reported_not_raised() {
        let mock = MockTransport::new()
            .route("https://api.coingecko.com", MockReply::Fail("connection reset".into()));
        let agg = Aggregator::with_transport(
            &quiet_config(),
            &Credentials::default(),
            Arc::new(mock),
            Arc::new(ManualClock::new(fixed_now())),
        );
        let out = agg.aggregate(&AggregateFilters::default()).await.unwrap();
        let st = &out.sources["coingecko"];
        assert!(!st.ok);
        assert_eq!(st.status, "network_error");
        assert!(out.metrics.is_empty());
    }
}
