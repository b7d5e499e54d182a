//! Subscription reconciliation.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::dispatch::{EventHandler, Outcome};
use crate::error::Result;
use crate::lifecycle::{self, LifecycleEvent, Transition, UNKNOWN_PLAN};
use crate::model::{Provider, Subscription};
use crate::providers::{self, SubscriptionUpdate};
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

use super::SyncContext;

/// Handles subscription lifecycle events for all providers.
pub struct SubscriptionHandler;

#[async_trait]
impl<S: BillingStore> EventHandler<S> for SubscriptionHandler {
    fn event_types(&self, provider: Provider) -> &'static [&'static str] {
        match provider {
            Provider::Stripe => &[
                "customer.subscription.created",
                "customer.subscription.updated",
                "customer.subscription.deleted",
            ],
            Provider::Paddle => &[
                "subscription.created",
                "subscription.updated",
                "subscription.canceled",
                "subscription.paused",
                "subscription.resumed",
            ],
            Provider::LemonSqueezy => &[
                "subscription_created",
                "subscription_updated",
                "subscription_cancelled",
                "subscription_resumed",
                "subscription_expired",
                "subscription_paused",
                "subscription_unpaused",
                "subscription_plan_changed",
            ],
        }
    }

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome> {
        let update = match envelope.provider {
            Provider::Stripe => providers::stripe::subscription_update(&envelope.payload)?,
            Provider::Paddle => providers::paddle::subscription_update(&envelope.payload)?,
            Provider::LemonSqueezy => {
                providers::lemonsqueezy::subscription_update(&envelope.payload)?
            }
        };
        sync_subscription(ctx, update).await
    }
}

/// Apply one webhook's view of a subscription.
///
/// The upsert is a full replace of status/quantity/dates/metadata —
/// last-writer-wins, no merge across fields. Lifecycle transitions are
/// classified from the persisted before/after states afterwards, and each
/// notification's guard timestamp is set only once the send succeeded.
pub async fn sync_subscription<S: BillingStore>(
    ctx: &SyncContext<S>,
    update: SubscriptionUpdate,
) -> Result<Outcome> {
    let store = ctx.store();
    let previous = store
        .get_subscription(update.provider, &update.provider_id)
        .await?;

    let Some(owner_id) = update
        .owner_id
        .clone()
        .or_else(|| previous.as_ref().map(|p| p.owner_id.clone()))
    else {
        return Ok(Outcome::skipped(format!(
            "no owner resolvable for subscription {}",
            update.provider_id
        )));
    };

    let plan_key = resolve_plan_key(ctx, &update, previous.as_ref()).await?;
    let now = Utc::now();

    let current = Subscription {
        id: previous
            .as_ref()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        owner_id: owner_id.clone(),
        provider: update.provider,
        provider_id: update.provider_id.clone(),
        plan_key: plan_key.clone(),
        status: update.status,
        quantity: update.quantity,
        trial_ends_at: update.trial_ends_at,
        renews_at: update.renews_at,
        ends_at: update.ends_at,
        canceled_at: update.canceled_at,
        metadata: update.metadata,
        welcome_sent_at: previous.as_ref().and_then(|p| p.welcome_sent_at),
        trial_started_sent_at: previous.as_ref().and_then(|p| p.trial_started_sent_at),
        cancellation_sent_at: previous.as_ref().and_then(|p| p.cancellation_sent_at),
        created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
        updated_at: now,
    };

    store.save_subscription(&current).await?;

    if let Some(transition) = lifecycle::classify(previous.as_ref(), &current) {
        let (amount, currency) =
            providers::resolve_subscription_amount(current.provider, &current.metadata);
        let event = LifecycleEvent {
            transition: transition.clone(),
            owner_id,
            plan_key,
            subscription_provider_id: current.provider_id.clone(),
            amount,
            currency,
            occurred_at: now,
        };

        // A failed send propagates so the job retries; the guard stays
        // unset, which makes delivery at-least-once rather than lost.
        ctx.notifier().notify(&event).await?;

        let mut guarded = current.clone();
        match &transition {
            Transition::TrialStarted => guarded.trial_started_sent_at = Some(now),
            Transition::Activated => guarded.welcome_sent_at = Some(now),
            Transition::Canceled => guarded.cancellation_sent_at = Some(now),
            // A resume clears the cancellation notice so a later cancel
            // can notify again.
            Transition::Resumed => guarded.cancellation_sent_at = None,
            Transition::PlanChanged { .. } => {}
        }
        store.save_subscription(&guarded).await?;
    }

    Ok(Outcome::Processed)
}

/// Resolve the plan key for a subscription sync, in priority order:
/// explicit metadata, the price mapping tables, the previously stored key,
/// then the sentinel.
async fn resolve_plan_key<S: BillingStore>(
    ctx: &SyncContext<S>,
    update: &SubscriptionUpdate,
    previous: Option<&Subscription>,
) -> Result<String> {
    if let Some(key) = &update.plan_key {
        return Ok(key.clone());
    }

    if let Some(price_id) = &update.price_provider_id {
        if let Some(price) = ctx
            .store()
            .find_price_by_provider_id(update.provider, price_id)
            .await?
        {
            if let Some(product) = ctx.store().get_product(&price.product_id).await? {
                return Ok(product.key);
            }
        }
    }

    Ok(previous
        .map(|p| p.plan_key.clone())
        .unwrap_or_else(|| UNKNOWN_PLAN.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::RecordingNotifier;
    use crate::model::{
        BillingInterval, Price, PriceMapping, Product, ProductKind, ProductMapping,
        SubscriptionStatus,
    };
    use crate::storage::test::InMemoryStore;
    use std::sync::Arc;

    fn context() -> (SyncContext<InMemoryStore>, RecordingNotifier, InMemoryStore) {
        let store = InMemoryStore::new();
        let notifier = RecordingNotifier::new();
        let ctx = SyncContext::new(store.clone(), Arc::new(notifier.clone()));
        (ctx, notifier, store)
    }

    fn update(status: SubscriptionStatus) -> SubscriptionUpdate {
        SubscriptionUpdate {
            provider: Provider::Stripe,
            provider_id: "sub_1".into(),
            owner_id: Some("team_1".into()),
            plan_key: Some("pro".into()),
            price_provider_id: None,
            status,
            quantity: 1,
            trial_ends_at: None,
            renews_at: None,
            ends_at: None,
            canceled_at: None,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn first_active_sync_creates_and_welcomes() {
        let (ctx, notifier, store) = context();

        let outcome = sync_subscription(&ctx, update(SubscriptionStatus::Active))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Processed);

        let stored = store
            .get_subscription(Provider::Stripe, "sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.plan_key, "pro");
        assert!(stored.welcome_sent_at.is_some());
        assert_eq!(notifier.transitions(), vec![Transition::Activated]);
    }

    #[tokio::test]
    async fn replayed_sync_notifies_once() {
        let (ctx, notifier, _) = context();

        sync_subscription(&ctx, update(SubscriptionStatus::Active))
            .await
            .unwrap();
        sync_subscription(&ctx, update(SubscriptionStatus::Active))
            .await
            .unwrap();

        assert_eq!(notifier.transitions(), vec![Transition::Activated]);
    }

    #[tokio::test]
    async fn trial_then_activation_fires_each_once() {
        let (ctx, notifier, _) = context();

        sync_subscription(&ctx, update(SubscriptionStatus::Trialing))
            .await
            .unwrap();
        sync_subscription(&ctx, update(SubscriptionStatus::Active))
            .await
            .unwrap();

        assert_eq!(
            notifier.transitions(),
            vec![Transition::TrialStarted, Transition::Activated]
        );
    }

    #[tokio::test]
    async fn cancel_then_resume_then_cancel_notifies_three_times() {
        let (ctx, notifier, _) = context();

        sync_subscription(&ctx, update(SubscriptionStatus::Active))
            .await
            .unwrap();
        sync_subscription(&ctx, update(SubscriptionStatus::Canceled))
            .await
            .unwrap();
        sync_subscription(&ctx, update(SubscriptionStatus::Active))
            .await
            .unwrap();
        sync_subscription(&ctx, update(SubscriptionStatus::Canceled))
            .await
            .unwrap();

        assert_eq!(
            notifier.transitions(),
            vec![
                Transition::Activated,
                Transition::Canceled,
                Transition::Resumed,
                Transition::Canceled,
            ]
        );
    }

    #[tokio::test]
    async fn missing_owner_is_skipped_without_mutation() {
        let (ctx, notifier, store) = context();

        let mut no_owner = update(SubscriptionStatus::Active);
        no_owner.owner_id = None;

        let outcome = sync_subscription(&ctx, no_owner).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped { .. }));
        assert!(store
            .get_subscription(Provider::Stripe, "sub_1")
            .await
            .unwrap()
            .is_none());
        assert!(notifier.transitions().is_empty());
    }

    #[tokio::test]
    async fn owner_falls_back_to_stored_subscription() {
        let (ctx, _, store) = context();

        sync_subscription(&ctx, update(SubscriptionStatus::Active))
            .await
            .unwrap();

        // Later webhook without metadata still resolves through the row.
        let mut bare = update(SubscriptionStatus::PastDue);
        bare.owner_id = None;
        bare.plan_key = None;

        let outcome = sync_subscription(&ctx, bare).await.unwrap();
        assert_eq!(outcome, Outcome::Processed);

        let stored = store
            .get_subscription(Provider::Stripe, "sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.owner_id, "team_1");
        assert_eq!(stored.plan_key, "pro");
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn plan_key_resolves_through_price_mapping() {
        let (ctx, _, store) = context();

        let product = Product::new("scale", "Scale", ProductKind::Subscription);
        let price = Price::new(&product.id, "monthly", BillingInterval::Month, "USD", 4900);
        store.upsert_product(&product).await.unwrap();
        store.upsert_price(&price).await.unwrap();
        store
            .upsert_product_mapping(&ProductMapping {
                product_id: product.id.clone(),
                provider: Provider::Stripe,
                provider_id: "prod_x".into(),
            })
            .await
            .unwrap();
        store
            .upsert_price_mapping(&PriceMapping {
                price_id: price.id.clone(),
                provider: Provider::Stripe,
                provider_id: "price_x".into(),
            })
            .await
            .unwrap();

        let mut by_price = update(SubscriptionStatus::Active);
        by_price.plan_key = None;
        by_price.price_provider_id = Some("price_x".into());

        sync_subscription(&ctx, by_price).await.unwrap();

        let stored = store
            .get_subscription(Provider::Stripe, "sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.plan_key, "scale");
    }

    #[tokio::test]
    async fn unmapped_price_yields_unknown_plan() {
        let (ctx, _, store) = context();

        let mut by_price = update(SubscriptionStatus::Active);
        by_price.plan_key = None;
        by_price.price_provider_id = Some("price_missing".into());

        sync_subscription(&ctx, by_price).await.unwrap();

        let stored = store
            .get_subscription(Provider::Stripe, "sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.plan_key, UNKNOWN_PLAN);
    }
}
