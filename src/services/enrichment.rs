//! Post-commit enrichment hand-off
//!
//! After a point commits, `(point_id, content)` is handed to a background
//! worker (e.g. semantic indexing). The hand-off is a non-blocking `try_send`
//! on a bounded channel: the committing caller never waits on, and never
//! learns about, enrichment.
//!
//! ```text
//! LedgerService ──try_send──▶ EnrichmentQueue ══mpsc══▶ EnrichmentWorker ──▶ Enricher
//!                                                        (retry + backoff)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::PointId;
use crate::error::LedgerError;

/// Work item for the enrichment collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentJob {
    pub point_id: PointId,
    pub content: String,
}

/// Enrichment collaborator
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, job: &EnrichmentJob) -> Result<(), LedgerError>;
}

/// Retry schedule for a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based count of failed attempts)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Sending half handed to the ledger service
#[derive(Clone)]
pub struct EnrichmentQueue {
    sender: mpsc::Sender<EnrichmentJob>,
}

impl EnrichmentQueue {
    /// Queue a job without blocking. Returns whether it was accepted.
    pub fn dispatch(&self, job: EnrichmentJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(point_id = job.point_id, "Enrichment queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(point_id = job.point_id, "Enrichment worker gone, dropping job");
                false
            }
        }
    }
}

/// Outcome counters returned when the worker shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub succeeded: u64,
    pub failed: u64,
    pub attempts: u64,
}

/// Background consumer of the enrichment queue
pub struct EnrichmentWorker {
    receiver: mpsc::Receiver<EnrichmentJob>,
    enricher: Arc<dyn Enricher>,
    policy: RetryPolicy,
}

impl EnrichmentWorker {
    pub fn new(
        capacity: usize,
        enricher: Arc<dyn Enricher>,
        policy: RetryPolicy,
    ) -> (EnrichmentQueue, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            EnrichmentQueue { sender },
            Self {
                receiver,
                enricher,
                policy,
            },
        )
    }

    /// Create a queue and spawn its worker on the current runtime.
    ///
    /// The worker exits once every `EnrichmentQueue` clone is dropped and
    /// the backlog is drained.
    pub fn spawn(
        capacity: usize,
        enricher: Arc<dyn Enricher>,
        policy: RetryPolicy,
    ) -> (EnrichmentQueue, JoinHandle<EnrichmentStats>) {
        let (queue, worker) = Self::new(capacity, enricher, policy);
        (queue, tokio::spawn(worker.run()))
    }

    pub async fn run(mut self) -> EnrichmentStats {
        let mut stats = EnrichmentStats::default();

        while let Some(job) = self.receiver.recv().await {
            let (ok, attempts) = self.process(&job).await;
            stats.attempts += u64::from(attempts);
            if ok {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }

        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Enrichment worker stopped"
        );
        stats
    }

    async fn process(&self, job: &EnrichmentJob) -> (bool, u32) {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.enricher.enrich(job).await {
                Ok(()) => {
                    debug!(point_id = job.point_id, attempt, "Point enriched");
                    return (true, attempt);
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    error!(
                        point_id = job.point_id,
                        attempts = attempt,
                        error = %e,
                        "Giving up on enrichment"
                    );
                    return (false, attempt);
                }
                Err(e) => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        point_id = job.point_id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Enrichment failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Enricher that POSTs jobs as JSON to an HTTP endpoint
pub struct HttpEnricher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEnricher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, job: &EnrichmentJob) -> Result<(), LedgerError> {
        self.client
            .post(&self.endpoint)
            .json(job)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| LedgerError::Enrichment(format!("POST {}: {}", self.endpoint, e)))?;

        Ok(())
    }
}
