//! Concurrent settle-all fan-out over the adapter registry.
//!
//! Every adapter runs on its own task under an outer budget. The function
//! never fails: a slow adapter becomes `Timeout`, a panicking one becomes
//! `NetworkError`, and the rest are unaffected. Results come back in
//! registration order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::ingest::ensure_metrics_described;
use crate::ingest::types::SourceAdapter;
use crate::model::{SourceOutcome, SourceResult};

pub const PANIC_MESSAGE: &str = "adapter task panicked";

pub async fn run_all(adapters: &[Arc<dyn SourceAdapter>], budget: Duration) -> Vec<SourceResult> {
    ensure_metrics_described();

    let mut set = JoinSet::new();
    for (idx, adapter) in adapters.iter().enumerate() {
        let adapter = Arc::clone(adapter);
        set.spawn(async move {
            let t0 = Instant::now();
            let res = match tokio::time::timeout(budget, adapter.fetch()).await {
                Ok(r) => r,
                Err(_) => {
                    warn!(
                        target: "ingest",
                        source = adapter.id(),
                        budget_ms = budget.as_millis() as u64,
                        "adapter exceeded budget"
                    );
                    counter!(
                        "source_fetch_total",
                        "source" => adapter.id().to_string(),
                        "outcome" => "timeout"
                    )
                    .increment(1);
                    SourceResult::new(
                        adapter.id(),
                        SourceOutcome::Timeout,
                        t0.elapsed().as_millis() as u64,
                    )
                }
            };
            (idx, res)
        });
    }

    let mut slots: Vec<Option<SourceResult>> = vec![None; adapters.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, res)) => slots[idx] = Some(res),
            Err(e) => warn!(target: "ingest", error = %e, "adapter task failed"),
        }
    }

    let results: Vec<SourceResult> = slots
        .into_iter()
        .zip(adapters)
        .map(|(slot, adapter)| {
            slot.unwrap_or_else(|| {
                counter!(
                    "source_fetch_total",
                    "source" => adapter.id().to_string(),
                    "outcome" => "network_error"
                )
                .increment(1);
                SourceResult::new(
                    adapter.id(),
                    SourceOutcome::NetworkError(PANIC_MESSAGE.to_string()),
                    0,
                )
            })
        })
        .collect();

    debug!(
        target: "ingest",
        sources = results.len(),
        ok = results.iter().filter(|r| r.outcome.is_success()).count(),
        "fan-in settled"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::model::SourceRecords;
    use async_trait::async_trait;

    enum Behaviour {
        Ok,
        Sleep(Duration),
        Fail,
        Panic,
    }

    struct Scripted {
        id: &'static str,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl SourceAdapter for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn collect(&self) -> Result<SourceRecords, SourceError> {
            match &self.behaviour {
                Behaviour::Ok => Ok(SourceRecords::default()),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(SourceRecords::default())
                }
                Behaviour::Fail => Err(SourceError::Http(502)),
                Behaviour::Panic => panic!("boom"),
            }
        }
    }

    fn adapter(id: &'static str, behaviour: Behaviour) -> Arc<dyn SourceAdapter> {
        Arc::new(Scripted { id, behaviour })
    }

    #[tokio::test]
    async fn settles_all_in_registration_order() {
        let adapters = vec![
            adapter("slow", Behaviour::Sleep(Duration::from_secs(10))),
            adapter("bad", Behaviour::Fail),
            adapter("crash", Behaviour::Panic),
            adapter("good", Behaviour::Ok),
        ];
        let t0 = Instant::now();
        let results = run_all(&adapters, Duration::from_millis(100)).await;
        assert!(t0.elapsed() < Duration::from_secs(5));

        let ids: Vec<&str> = results.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "bad", "crash", "good"]);
        assert_eq!(results[0].outcome, SourceOutcome::Timeout);
        assert_eq!(results[1].outcome, SourceOutcome::HttpError(502));
        assert_eq!(
            results[2].outcome,
            SourceOutcome::NetworkError(PANIC_MESSAGE.to_string())
        );
        assert!(results[3].outcome.is_success());
    }

    #[tokio::test]
    async fn empty_registry_is_fine() {
        assert!(run_all(&[], Duration::from_secs(1)).await.is_empty());
    }
}
