// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod model;
pub mod error;
pub mod clock;
pub mod fetch;
pub mod token_cache;
pub mod thresholds;
pub mod config;

// Source adapters and the concurrent fan-out over them
pub mod ingest;
pub mod pipeline;

// Pure stages: dedup, ranking, stats, alerts, geo clusters, caps
pub mod analytics;
pub mod assemble;
pub mod aggregator;

pub mod api;
pub mod metrics;

pub use crate::aggregator::Aggregator;
pub use crate::api::router;
pub use crate::assemble::{AggregateFilters, AggregatedResult};

use axum::Router;
use tracing::info;

/// Full in-process app: config + credentials from the environment, the
/// aggregation API, and `/metrics`.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = config::load_default()?;
    let creds = config::credentials::Credentials::from_env();
    let aggregator = Aggregator::from_config(&cfg, &creds)?;
    let metrics = metrics::Metrics::global(cfg.limits)?;
    info!(sources = aggregator.source_ids().len(), "app wired");

    Ok(api::router(api::AppState::new(aggregator)).merge(metrics.router()))
}
