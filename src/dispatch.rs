//! Event routing: maps `(provider, event_type)` to a type handler.
//!
//! Each handler declares the event types it owns per provider. Unknown
//! event types are accepted and ignored — providers add event types over
//! time and old deployments must not fail hard on novel events.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::handlers::SyncContext;
use crate::model::Provider;
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event mutated local state (or confirmed it was already correct).
    Processed,
    /// No handler owns this event type; nothing happened.
    Ignored,
    /// The event was recognized but references something that cannot be
    /// mapped to a local entity. A designed no-op, not an error — retrying
    /// would not help.
    Skipped { reason: String },
}

impl Outcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// A reconciliation handler for one entity type.
#[async_trait]
pub trait EventHandler<S: BillingStore>: Send + Sync {
    /// The event type strings this handler owns for a provider. Empty when
    /// the provider has no events of this kind.
    fn event_types(&self, provider: Provider) -> &'static [&'static str];

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome>;
}

/// Routing table from `(provider, event_type)` to handler.
pub struct EventRouter<S: BillingStore> {
    routes: HashMap<Provider, HashMap<&'static str, Arc<dyn EventHandler<S>>>>,
}

impl<S: BillingStore> EventRouter<S> {
    #[must_use]
    pub fn builder() -> RouterBuilder<S> {
        RouterBuilder {
            routes: HashMap::new(),
        }
    }

    /// Dispatch an envelope to its handler. Events without a type, and
    /// types no handler owns, are ignored.
    pub async fn dispatch(
        &self,
        ctx: &SyncContext<S>,
        envelope: &WebhookEnvelope,
    ) -> Result<Outcome> {
        let Some(event_type) = envelope.event_type.as_deref() else {
            tracing::debug!(
                target: "paysync::dispatch",
                provider = %envelope.provider,
                event_id = %envelope.id,
                "event without type ignored"
            );
            return Ok(Outcome::Ignored);
        };

        let handler = self
            .routes
            .get(&envelope.provider)
            .and_then(|table| table.get(event_type));

        let Some(handler) = handler else {
            tracing::debug!(
                target: "paysync::dispatch",
                provider = %envelope.provider,
                event_type = %event_type,
                "unrecognized event type ignored"
            );
            return Ok(Outcome::Ignored);
        };

        let outcome = handler.handle(ctx, envelope).await?;
        if let Outcome::Skipped { reason } = &outcome {
            tracing::info!(
                target: "paysync::dispatch",
                provider = %envelope.provider,
                event_type = %event_type,
                event_id = %envelope.id,
                reason = %reason,
                "event skipped"
            );
        }
        Ok(outcome)
    }
}

/// Builder for [`EventRouter`]. Registration order is a configuration
/// concern: when two handlers claim the same event type, the last
/// registration wins.
pub struct RouterBuilder<S: BillingStore> {
    routes: HashMap<Provider, HashMap<&'static str, Arc<dyn EventHandler<S>>>>,
}

impl<S: BillingStore> RouterBuilder<S> {
    pub fn register(mut self, handler: Arc<dyn EventHandler<S>>) -> Self {
        for provider in Provider::ALL {
            let table = self.routes.entry(provider).or_default();
            for &event_type in handler.event_types(provider) {
                table.insert(event_type, handler.clone());
            }
        }
        self
    }

    #[must_use]
    pub fn build(self) -> EventRouter<S> {
        EventRouter {
            routes: self.routes,
        }
    }
}

/// The full routing table: every type handler registered for all providers.
#[must_use]
pub fn default_router<S: BillingStore + Clone + 'static>() -> EventRouter<S> {
    use crate::handlers::{
        CatalogPriceHandler, CatalogProductHandler, CheckoutHandler, CustomerHandler,
        InvoiceHandler, OrderHandler, SubscriptionHandler,
    };

    EventRouter::builder()
        .register(Arc::new(SubscriptionHandler))
        .register(Arc::new(OrderHandler))
        .register(Arc::new(InvoiceHandler))
        .register(Arc::new(CustomerHandler))
        .register(Arc::new(CheckoutHandler))
        .register(Arc::new(CatalogProductHandler))
        .register(Arc::new(CatalogPriceHandler))
        .build()
}
