// src/ingest/types.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};

use crate::clock::Clock;
use crate::error::SourceError;
use crate::fetch::DeadlineFetcher;
use crate::model::{SourceOutcome, SourceRecords, SourceResult};

/// Shared handles every adapter is built from.
#[derive(Clone)]
pub struct AdapterContext {
    pub fetcher: DeadlineFetcher,
    pub clock: Arc<dyn Clock>,
    /// Deadline for each individual provider call.
    pub timeout: Duration,
}

impl AdapterContext {
    pub fn new(fetcher: DeadlineFetcher, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            fetcher,
            clock,
            timeout,
        }
    }
}

/// One external provider: fetch → validate → normalize → classify → cap.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable source id (`"threatfox"`, `"status:github"`...).
    fn id(&self) -> &str;

    /// Provider-specific work. Errors are fine here; `fetch` converts them.
    async fn collect(&self) -> Result<SourceRecords, SourceError>;

    /// Never fails: every error becomes a typed outcome.
    async fn fetch(&self) -> SourceResult {
        let t0 = Instant::now();
        let outcome = match self.collect().await {
            Ok(records) => {
                counter!("source_records_total", "source" => self.id().to_string())
                    .increment((records.events.len() + records.metrics.len()) as u64);
                SourceOutcome::Success(records)
            }
            Err(e) => {
                tracing::warn!(target: "ingest", source = self.id(), error = %e, "source degraded");
                SourceOutcome::from(e)
            }
        };
        let elapsed_ms = t0.elapsed().as_millis() as u64;
        counter!(
            "source_fetch_total",
            "source" => self.id().to_string(),
            "outcome" => outcome.kind()
        )
        .increment(1);
        histogram!("source_fetch_ms", "source" => self.id().to_string()).record(elapsed_ms as f64);
        SourceResult::new(self.id(), outcome, elapsed_ms)
    }
}
