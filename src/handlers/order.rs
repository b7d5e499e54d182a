//! Order reconciliation.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::dispatch::{EventHandler, Outcome};
use crate::error::Result;
use crate::model::{Order, Provider};
use crate::providers::{self, OrderUpdate};
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

use super::SyncContext;

/// Handles order/transaction events. Stripe has no standalone order
/// object — its orders are created by the checkout handler.
pub struct OrderHandler;

#[async_trait]
impl<S: BillingStore> EventHandler<S> for OrderHandler {
    fn event_types(&self, provider: Provider) -> &'static [&'static str] {
        match provider {
            Provider::Stripe => &[],
            Provider::Paddle => &["transaction.updated", "transaction.billed"],
            Provider::LemonSqueezy => &["order_refunded"],
        }
    }

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome> {
        let update = match envelope.provider {
            Provider::Stripe => {
                return Ok(Outcome::Ignored);
            }
            Provider::Paddle => providers::paddle::order_update(&envelope.payload)?,
            Provider::LemonSqueezy => providers::lemonsqueezy::order_update(&envelope.payload)?,
        };
        apply_order(ctx, update).await?;
        Ok(Outcome::Processed)
    }
}

/// Upsert an order from one webhook's view (full replace of status and
/// monetary fields; identity and creation time survive).
pub async fn apply_order<S: BillingStore>(
    ctx: &SyncContext<S>,
    update: OrderUpdate,
) -> Result<Order> {
    let store = ctx.store();
    let existing = store.get_order(update.provider, &update.provider_id).await?;
    let now = Utc::now();

    let order = Order {
        id: existing
            .as_ref()
            .map(|o| o.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        owner_id: update
            .owner_id
            .or_else(|| existing.as_ref().and_then(|o| o.owner_id.clone())),
        provider: update.provider,
        provider_id: update.provider_id,
        status: update.status,
        amount: update.amount,
        currency: update.currency.to_uppercase(),
        paid_at: update.paid_at,
        refunded_at: update.refunded_at,
        created_at: existing.as_ref().map(|o| o.created_at).unwrap_or(now),
        updated_at: now,
    };

    store.save_order(&order).await?;
    Ok(order)
}
