//! Invoice reconciliation.
//!
//! Line items are replaced wholesale on every sync: they have no identity
//! across provider updates, so delete-then-reinsert is both simpler and
//! idempotent where merge semantics would not be.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::dispatch::{EventHandler, Outcome};
use crate::error::Result;
use crate::model::{Invoice, InvoiceLineItem, Provider};
use crate::providers::{self, InvoiceUpdate};
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

use super::SyncContext;

/// Normalized invoice statuses that indicate a failed payment, in addition
/// to explicit payment-failed event types.
const FAILED_STATUSES: &[&str] = &["uncollectible", "past_due", "failed"];

/// Handles invoice and payment events for all providers.
pub struct InvoiceHandler;

#[async_trait]
impl<S: BillingStore> EventHandler<S> for InvoiceHandler {
    fn event_types(&self, provider: Provider) -> &'static [&'static str] {
        match provider {
            Provider::Stripe => &[
                "invoice.paid",
                "invoice.payment_succeeded",
                "invoice.payment_failed",
                "invoice.finalized",
            ],
            Provider::Paddle => &["transaction.payment_failed"],
            Provider::LemonSqueezy => &[
                "subscription_payment_success",
                "subscription_payment_failed",
                "subscription_payment_recovered",
            ],
        }
    }

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome> {
        let event_type = envelope.event_type.as_deref().unwrap_or("");
        let update = match envelope.provider {
            Provider::Stripe => providers::stripe::invoice_update(event_type, &envelope.payload)?,
            Provider::Paddle => providers::paddle::invoice_update(event_type, &envelope.payload)?,
            Provider::LemonSqueezy => {
                providers::lemonsqueezy::invoice_update(event_type, &envelope.payload)?
            }
        };
        apply_invoice(ctx, update).await
    }
}

/// Derive a tax rate from amounts when the provider does not send one.
///
/// Only derived when both inputs are positive; otherwise the rate stays
/// unset — `None` means "unknown", zero would claim "confirmed no tax".
#[must_use]
pub fn derive_tax_rate(tax_amount: i64, subtotal: i64) -> Option<f64> {
    if tax_amount > 0 && subtotal > 0 {
        let rate = tax_amount as f64 / subtotal as f64 * 100.0;
        Some((rate * 100.0).round() / 100.0)
    } else {
        None
    }
}

/// Upsert an invoice from one webhook's view, link it to its order and
/// subscription when resolvable, replace its line items, and fire the
/// at-most-once payment-failure notification.
pub async fn apply_invoice<S: BillingStore>(
    ctx: &SyncContext<S>,
    update: InvoiceUpdate,
) -> Result<Outcome> {
    let store = ctx.store();
    let existing = store
        .get_invoice(update.provider, &update.provider_id)
        .await?;
    let now = Utc::now();

    let order = match &update.order_provider_id {
        Some(id) => store.get_order(update.provider, id).await?,
        None => None,
    };
    let subscription = match &update.subscription_provider_id {
        Some(id) => store.get_subscription(update.provider, id).await?,
        None => None,
    };

    let tax_rate = update
        .tax_rate
        .or_else(|| derive_tax_rate(update.tax_amount, update.subtotal));

    let invoice = Invoice {
        id: existing
            .as_ref()
            .map(|i| i.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        provider: update.provider,
        provider_id: update.provider_id.clone(),
        order_id: order.as_ref().map(|o| o.id.clone()),
        subscription_id: subscription.as_ref().map(|s| s.id.clone()),
        status: update.status.clone(),
        amount_due: update.amount_due,
        amount_paid: update.amount_paid,
        tax_amount: update.tax_amount,
        tax_rate,
        currency: update.currency.to_uppercase(),
        hosted_url: update.hosted_url.clone(),
        pdf_url: update.pdf_url.clone(),
        pdf_url_expires_at: update.pdf_url_expires_at,
        payment_failed_notified_at: existing.as_ref().and_then(|i| i.payment_failed_notified_at),
        created_at: existing.as_ref().map(|i| i.created_at).unwrap_or(now),
        updated_at: now,
    };

    store.save_invoice(&invoice).await?;

    let lines: Vec<InvoiceLineItem> = update
        .lines
        .iter()
        .map(|line| InvoiceLineItem {
            invoice_id: invoice.id.clone(),
            description: line.description.clone(),
            quantity: line.quantity,
            unit_amount: line.unit_amount,
            amount: line.amount,
        })
        .collect();
    store.replace_invoice_lines(&invoice.id, &lines).await?;

    let failed = update.payment_failed
        || update
            .status
            .as_deref()
            .is_some_and(|s| FAILED_STATUSES.contains(&s));

    if failed && invoice.payment_failed_notified_at.is_none() {
        let owner = order
            .as_ref()
            .and_then(|o| o.owner_id.clone())
            .or_else(|| subscription.as_ref().map(|s| s.owner_id.clone()));

        match owner {
            Some(owner_id) => {
                // Guard is set only after the send succeeds; a crash in
                // between re-sends on retry rather than losing the notice.
                ctx.notifier()
                    .payment_failed(&owner_id, &invoice.provider_id)
                    .await?;
                store
                    .mark_invoice_payment_failed_notified(&invoice.id, now)
                    .await?;
            }
            None => {
                // No resolvable owner: nobody to notify. Not an error.
                tracing::debug!(
                    target: "paysync::handlers",
                    provider = %invoice.provider,
                    invoice = %invoice.provider_id,
                    "payment failed but no owner resolvable, notification skipped"
                );
            }
        }
    }

    Ok(Outcome::Processed)
}
