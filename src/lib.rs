//! paysync - multi-provider billing reconciliation engine.
//!
//! Accepts webhook notifications from Stripe, Paddle and Lemon Squeezy,
//! normalizes their event shapes into one internal model, and applies
//! updates idempotently despite out-of-order delivery, provider retries
//! and duplicate deliveries. A separate catalog service reconciles local
//! products/prices against each provider's remote catalog by natural key.
//!
//! # Architecture
//!
//! - **Ingestion** ([`webhook`]): signature verification, envelope
//!   normalization, and the idempotency gate — exactly one processing job
//!   per `(provider, event_id)`, ever.
//! - **Dispatch** ([`dispatch`]): `(provider, event_type)` routing to type
//!   handlers; unknown event types are ignored, not errors.
//! - **Handlers** ([`handlers`]): idempotent entity upserts keyed by
//!   `(provider, provider_id)`, with lifecycle transitions derived from
//!   persisted before/after state ([`lifecycle`]).
//! - **Catalog** ([`catalog`]): batch import/export reconciliation with
//!   natural-key matching and claim-and-remove linking.
//! - **Storage** ([`storage`]): the `BillingStore` seam; bring your own
//!   database, or use the in-memory store in tests.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use paysync::{
//!     EngineConfig, EventRouter, InMemoryJobQueue, SyncContext, TracingNotifier,
//!     WebhookIntake, WebhookState, WebhookWorker, default_router, webhook_routes,
//! };
//! use paysync::storage::test::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     paysync::init_tracing();
//!
//!     let config = EngineConfig::builder().from_env().build()?;
//!     let store = InMemoryStore::new();
//!     let queue = Arc::new(InMemoryJobQueue::new());
//!
//!     // HTTP side: verify, dedupe, enqueue.
//!     let intake = WebhookIntake::from_config(&config, store.clone(), queue.clone())?;
//!     let app = webhook_routes(Arc::new(WebhookState { intake }));
//!
//!     // Worker side: dequeue, dispatch, reconcile.
//!     let ctx = SyncContext::new(store, Arc::new(TracingNotifier));
//!     let router: Arc<EventRouter<_>> = Arc::new(default_router());
//!     let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
//!     tokio::spawn(WebhookWorker::new(queue, router, ctx).run(shutdown_rx));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//!     axum::serve(listener, app).await?;
//!     drop(shutdown_tx);
//!     Ok(())
//! }
//! ```

pub mod catalog;
mod config;
pub mod dispatch;
mod error;
pub mod handlers;
pub mod lifecycle;
pub mod model;
pub mod providers;
pub mod queue;
mod routes;
pub mod storage;
pub mod webhook;

// Re-exports for the public API.
pub use catalog::{CatalogExporter, CatalogImporter, SyncOptions, SyncReport, SyncSummary};
pub use config::{
    EngineConfig, EngineConfigBuilder, Environment, LemonSqueezyConfig, PaddleConfig,
    RetryConfig, StripeConfig,
};
pub use dispatch::{EventHandler, EventRouter, Outcome, default_router};
pub use error::{Error, Result};
pub use handlers::SyncContext;
pub use lifecycle::{LifecycleEvent, NoOpNotifier, Notifier, TracingNotifier, Transition};
pub use model::Provider;
pub use providers::CatalogClient;
pub use queue::{InMemoryJobQueue, JobQueue, WebhookJob, WebhookWorker};
pub use routes::{WebhookState, webhook_routes};
pub use storage::BillingStore;
pub use webhook::{IntakeOutcome, WebhookEnvelope, WebhookIntake, WebhookVerifier};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults.
///
/// Call early in `main()`, before building the engine.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log level filter (e.g. "info", "paysync=debug")
/// - `PAYSYNC_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("PAYSYNC_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
