//! Background job seam for webhook processing.
//!
//! The engine assumes at-least-once delivery with a single consumer per
//! job; handlers are idempotent, so redelivery after a worker crash is
//! safe. Swap [`JobQueue`] for a durable backend in production — the
//! in-memory queue covers tests and single-instance deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, sleep};

use crate::dispatch::{EventRouter, Outcome};
use crate::error::Result;
use crate::handlers::SyncContext;
use crate::model::Provider;
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

/// A queued webhook processing job. Carries only the ledger key — the
/// worker reloads the payload from the idempotency ledger, so a replayed
/// job always sees the stored body, not a stale copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookJob {
    pub provider: Provider,
    pub event_id: String,
    pub attempt: u32,
}

impl WebhookJob {
    #[must_use]
    pub fn new(provider: Provider, event_id: impl Into<String>) -> Self {
        Self {
            provider,
            event_id: event_id.into(),
            attempt: 0,
        }
    }
}

/// Trait for job queue backends.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: WebhookJob) -> Result<()>;

    /// Pop the next job, or `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<WebhookJob>>;
}

/// In-memory FIFO queue for tests and single-instance deployments.
#[derive(Default, Clone)]
pub struct InMemoryJobQueue {
    jobs: Arc<Mutex<VecDeque<WebhookJob>>>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting (for assertions).
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: WebhookJob) -> Result<()> {
        self.jobs.lock().await.push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<WebhookJob>> {
        Ok(self.jobs.lock().await.pop_front())
    }
}

/// Maximum redeliveries before a job is dropped with an error log.
const MAX_ATTEMPTS: u32 = 5;

/// Worker loop: dequeues webhook jobs and runs them through the router.
///
/// Failed jobs are re-enqueued with a bumped attempt counter; handler
/// idempotency makes the retry safe.
pub struct WebhookWorker<S: BillingStore> {
    queue: Arc<dyn JobQueue>,
    router: Arc<EventRouter<S>>,
    ctx: SyncContext<S>,
}

impl<S: BillingStore + Clone + 'static> WebhookWorker<S> {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, router: Arc<EventRouter<S>>, ctx: SyncContext<S>) -> Self {
        Self { queue, router, ctx }
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(target: "paysync::worker", "webhook worker started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(target: "paysync::worker", "shutdown signal received");
                    break;
                }
                result = self.process_next() => {
                    match result {
                        Ok(true) => {} // processed one, poll again immediately
                        Ok(false) => {
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = sleep(Duration::from_millis(100)) => {}
                            }
                        }
                        Err(e) => {
                            tracing::error!(target: "paysync::worker", error = %e, "worker iteration failed");
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = sleep(Duration::from_secs(1)) => {}
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(target: "paysync::worker", "webhook worker stopped");
    }

    /// Process a single job. Returns `Ok(true)` when a job was handled.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        match self.process_job(&job).await {
            Ok(outcome) => {
                tracing::debug!(
                    target: "paysync::worker",
                    provider = %job.provider,
                    event_id = %job.event_id,
                    outcome = ?outcome,
                    "webhook job processed"
                );
            }
            Err(e) if job.attempt + 1 < MAX_ATTEMPTS => {
                tracing::warn!(
                    target: "paysync::worker",
                    provider = %job.provider,
                    event_id = %job.event_id,
                    attempt = job.attempt,
                    error = %e,
                    "webhook job failed, re-enqueueing"
                );
                let mut retry = job.clone();
                retry.attempt += 1;
                self.queue.enqueue(retry).await?;
            }
            Err(e) => {
                tracing::error!(
                    target: "paysync::worker",
                    provider = %job.provider,
                    event_id = %job.event_id,
                    error = %e,
                    "webhook job dropped after max attempts"
                );
            }
        }

        Ok(true)
    }

    async fn process_job(&self, job: &WebhookJob) -> Result<Outcome> {
        let Some(event) = self
            .ctx
            .store()
            .get_event(job.provider, &job.event_id)
            .await?
        else {
            // The ledger row vanished (cleanup raced the job); nothing to do.
            tracing::warn!(
                target: "paysync::worker",
                provider = %job.provider,
                event_id = %job.event_id,
                "ledger entry missing for queued job"
            );
            return Ok(Outcome::Ignored);
        };

        let envelope = WebhookEnvelope {
            provider: event.provider,
            id: event.event_id,
            event_type: event.event_type,
            payload: event.payload,
        };

        self.router.dispatch(&self.ctx, &envelope).await
    }
}
