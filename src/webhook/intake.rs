//! The webhook idempotency gate.
//!
//! `accept` is the synchronous half of webhook handling: verify the
//! signature, parse the envelope, insert into the idempotency ledger, and
//! enqueue a processing job — only when this delivery created the ledger
//! row. Duplicate deliveries are acknowledged without enqueueing anything,
//! which is what makes provider retries harmless.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::Provider;
use crate::queue::{JobQueue, WebhookJob};
use crate::storage::BillingStore;
use crate::webhook::envelope::parse_envelope;
use crate::webhook::verify::{WebhookVerifier, verifier_for};

/// What happened to an accepted delivery. Both outcomes map to HTTP 204 —
/// providers must not retry deliveries we have already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// First sight: ledger row created, job enqueued.
    Accepted,
    /// Already in the ledger; nothing enqueued.
    Duplicate,
}

/// Webhook ingestion service.
pub struct WebhookIntake<S: BillingStore> {
    store: S,
    queue: Arc<dyn JobQueue>,
    verifiers: HashMap<Provider, Arc<dyn WebhookVerifier>>,
}

impl<S: BillingStore> WebhookIntake<S> {
    /// Build the intake from engine configuration, constructing one
    /// verifier per configured provider.
    pub fn from_config(
        config: &EngineConfig,
        store: S,
        queue: Arc<dyn JobQueue>,
    ) -> Result<Self> {
        let mut verifiers: HashMap<Provider, Arc<dyn WebhookVerifier>> = HashMap::new();
        for provider in config.configured_providers() {
            verifiers.insert(provider, verifier_for(config, provider)?);
        }
        Ok(Self {
            store,
            queue,
            verifiers,
        })
    }

    /// Build with explicit verifiers (tests, custom setups).
    #[must_use]
    pub fn new(
        store: S,
        queue: Arc<dyn JobQueue>,
        verifiers: HashMap<Provider, Arc<dyn WebhookVerifier>>,
    ) -> Self {
        Self {
            store,
            queue,
            verifiers,
        }
    }

    /// Accept one webhook delivery.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigMissing`] when the provider has no verifier.
    /// - [`Error::SignatureInvalid`] / [`Error::TimestampExpired`] /
    ///   [`Error::InvalidPayload`] when verification or parsing fails.
    pub async fn accept(
        &self,
        provider: Provider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<IntakeOutcome> {
        let verifier = self
            .verifiers
            .get(&provider)
            .ok_or_else(|| Error::config_missing(format!("webhook secret for {provider}")))?;

        let valid = verifier.verify(body, signature.unwrap_or("")).await?;
        if !valid {
            return Err(Error::SignatureInvalid { provider });
        }

        let envelope = parse_envelope(provider, body)?;

        let (_, was_new) = self
            .store
            .record_event_if_new(
                provider,
                &envelope.id,
                envelope.event_type.as_deref(),
                &envelope.payload,
            )
            .await?;

        if !was_new {
            tracing::debug!(
                target: "paysync::webhook",
                provider = %provider,
                event_id = %envelope.id,
                "duplicate webhook delivery ignored"
            );
            return Ok(IntakeOutcome::Duplicate);
        }

        self.queue
            .enqueue(WebhookJob::new(provider, envelope.id.clone()))
            .await?;

        tracing::info!(
            target: "paysync::webhook",
            provider = %provider,
            event_id = %envelope.id,
            event_type = envelope.event_type.as_deref().unwrap_or("-"),
            "webhook accepted"
        );

        Ok(IntakeOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryJobQueue;
    use crate::storage::test::InMemoryStore;
    use crate::webhook::verify::NoVerification;

    fn intake_with_noop(
        store: InMemoryStore,
        queue: Arc<InMemoryJobQueue>,
    ) -> WebhookIntake<InMemoryStore> {
        let mut verifiers: HashMap<Provider, Arc<dyn WebhookVerifier>> = HashMap::new();
        verifiers.insert(Provider::Stripe, Arc::new(NoVerification));
        WebhookIntake::new(store, queue, verifiers)
    }

    #[tokio::test]
    async fn first_delivery_enqueues_duplicate_does_not() {
        let store = InMemoryStore::new();
        let queue = Arc::new(InMemoryJobQueue::new());
        let intake = intake_with_noop(store.clone(), queue.clone());

        let body = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;

        let first = intake.accept(Provider::Stripe, None, body).await.unwrap();
        let second = intake.accept(Provider::Stripe, None, body).await.unwrap();

        assert_eq!(first, IntakeOutcome::Accepted);
        assert_eq!(second, IntakeOutcome::Duplicate);
        assert_eq!(queue.len().await, 1);
        assert_eq!(store.event_ids(), vec!["evt_1".to_string()]);
    }

    #[tokio::test]
    async fn unconfigured_provider_rejected() {
        let store = InMemoryStore::new();
        let queue = Arc::new(InMemoryJobQueue::new());
        let intake = intake_with_noop(store, queue);

        let err = intake
            .accept(Provider::Paddle, None, b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigMissing { .. }));
    }

    #[tokio::test]
    async fn invalid_signature_rejected_and_not_recorded() {
        let store = InMemoryStore::new();
        let queue = Arc::new(InMemoryJobQueue::new());

        let mut verifiers: HashMap<Provider, Arc<dyn WebhookVerifier>> = HashMap::new();
        verifiers.insert(
            Provider::Stripe,
            Arc::new(crate::webhook::verify::StripeVerifier::new("whsec_x".into())),
        );
        let intake = WebhookIntake::new(store.clone(), queue.clone(), verifiers);

        let err = intake
            .accept(Provider::Stripe, Some("t=1,v1=bad"), b"{}")
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert!(store.event_ids().is_empty());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_duplicates_enqueue_once() {
        let store = InMemoryStore::new();
        let queue = Arc::new(InMemoryJobQueue::new());
        let intake = Arc::new(intake_with_noop(store, queue.clone()));

        let body: &[u8] = br#"{"id":"evt_race","type":"invoice.paid","data":{"object":{}}}"#;
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let intake = intake.clone();
            tasks.push(tokio::spawn(async move {
                intake.accept(Provider::Stripe, None, body).await.unwrap()
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() == IntakeOutcome::Accepted {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(queue.len().await, 1);
    }
}
