use anyhow::Context;
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::assemble::Limits;
use crate::ingest::ensure_metrics_described;

static GLOBAL: OnceCell<Metrics> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder once; later calls reuse it.
    pub fn global(limits: Limits) -> anyhow::Result<&'static Metrics> {
        let m = GLOBAL.get_or_try_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("prometheus: install recorder")?;
            ensure_metrics_described();
            Ok::<_, anyhow::Error>(Self { handle })
        })?;

        // Static gauges with the active response caps.
        gauge!("aggregate_limit", "collection" => "events").set(limits.events as f64);
        gauge!("aggregate_limit", "collection" => "alerts").set(limits.alerts as f64);
        gauge!("aggregate_limit", "collection" => "clusters").set(limits.clusters as f64);
        gauge!("aggregate_limit", "collection" => "metrics").set(limits.metrics as f64);
        Ok(m)
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
