//! Checkout completion reconciliation.
//!
//! A completed checkout is the one event class that can touch several
//! entities in a single sync: the billing customer, the order, a
//! subscription (for subscription-mode checkouts), and a discount
//! redemption. Each sub-step is idempotent on its own, so a duplicate
//! delivery that slips past the ledger still converges to one row each.

use async_trait::async_trait;
use chrono::Utc;

use crate::dispatch::{EventHandler, Outcome};
use crate::error::Result;
use crate::model::{Discount, DiscountRedemption, OrderStatus, Provider, SubscriptionStatus};
use crate::providers::{self, CheckoutUpdate, OrderUpdate, SubscriptionUpdate};
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

use super::SyncContext;

/// Handles checkout-completion events for all providers.
pub struct CheckoutHandler;

#[async_trait]
impl<S: BillingStore> EventHandler<S> for CheckoutHandler {
    fn event_types(&self, provider: Provider) -> &'static [&'static str] {
        match provider {
            Provider::Stripe => &["checkout.session.completed"],
            Provider::Paddle => &["transaction.completed"],
            Provider::LemonSqueezy => &["order_created"],
        }
    }

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome> {
        let update = match envelope.provider {
            Provider::Stripe => providers::stripe::checkout_update(&envelope.payload)?,
            Provider::Paddle => providers::paddle::checkout_update(&envelope.payload)?,
            Provider::LemonSqueezy => providers::lemonsqueezy::checkout_update(&envelope.payload)?,
        };
        apply_checkout(ctx, update).await
    }
}

/// Apply a completed checkout.
pub async fn apply_checkout<S: BillingStore>(
    ctx: &SyncContext<S>,
    update: CheckoutUpdate,
) -> Result<Outcome> {
    // Customer first, so later steps can resolve the owner through it.
    if let Some(customer) = update.customer.clone() {
        // Unresolvable owner is fine here; the order still records.
        super::customer::apply_customer(ctx, customer).await?;
    }

    let order = super::order::apply_order(
        ctx,
        OrderUpdate {
            provider: update.provider,
            provider_id: update.provider_id.clone(),
            owner_id: update.owner_id.clone(),
            status: if update.paid {
                OrderStatus::Paid
            } else {
                OrderStatus::Pending
            },
            amount: update.amount,
            currency: update.currency.clone(),
            paid_at: update.paid.then(Utc::now),
            refunded_at: None,
        },
    )
    .await?;

    if !update.paid {
        // Asynchronous payment still settling; the paid webhook follows.
        return Ok(Outcome::Processed);
    }

    // Subscription-mode checkout: create the subscription row if the
    // dedicated subscription webhook has not landed yet. When it has, its
    // richer view wins and this step must not overwrite it.
    if let Some(subscription_id) = &update.subscription_provider_id {
        let exists = ctx
            .store()
            .get_subscription(update.provider, subscription_id)
            .await?
            .is_some();
        if !exists {
            super::subscription::sync_subscription(
                ctx,
                SubscriptionUpdate {
                    provider: update.provider,
                    provider_id: subscription_id.clone(),
                    owner_id: update.owner_id.clone(),
                    plan_key: update.plan_key.clone(),
                    price_provider_id: None,
                    status: SubscriptionStatus::Active,
                    quantity: 1,
                    trial_ends_at: None,
                    renews_at: None,
                    ends_at: None,
                    canceled_at: None,
                    metadata: update.metadata.clone(),
                },
            )
            .await?;
        }
    }

    if let Some(code) = &update.discount_code {
        record_discount_redemption(ctx, &update, code).await?;
    }

    Ok(Outcome::Processed)
}

/// Record a discount redemption with first-or-create semantics: the
/// redemption row is unique per `(discount, provider, provider_id)` and
/// the counter increments exactly once with its first insertion.
async fn record_discount_redemption<S: BillingStore>(
    ctx: &SyncContext<S>,
    update: &CheckoutUpdate,
    code: &str,
) -> Result<()> {
    let store = ctx.store();

    let discount = match store.get_discount(update.provider, code).await? {
        Some(discount) => discount,
        None => {
            let discount = Discount::new(update.provider, code);
            store.save_discount(&discount).await?;
            discount
        }
    };

    let created = store
        .record_redemption(&DiscountRedemption {
            discount_id: discount.id.clone(),
            owner_id: update.owner_id.clone(),
            provider: update.provider,
            provider_id: update.provider_id.clone(),
            plan_key: update.plan_key.clone(),
            price_key: update.price_key.clone(),
            metadata: update.metadata.clone(),
            redeemed_at: Utc::now(),
        })
        .await?;

    if !created {
        tracing::debug!(
            target: "paysync::handlers",
            provider = %update.provider,
            code = %code,
            checkout = %update.provider_id,
            "redemption already recorded, counter unchanged"
        );
    }

    Ok(())
}
