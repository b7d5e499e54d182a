//! Billing customer reconciliation.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::dispatch::{EventHandler, Outcome};
use crate::error::Result;
use crate::model::{BillingCustomer, Provider};
use crate::providers::{self, CustomerUpdate};
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

use super::SyncContext;

/// Handles provider customer events. Lemon Squeezy has no standalone
/// customer webhooks — its customers arrive embedded in orders.
pub struct CustomerHandler;

#[async_trait]
impl<S: BillingStore> EventHandler<S> for CustomerHandler {
    fn event_types(&self, provider: Provider) -> &'static [&'static str] {
        match provider {
            Provider::Stripe => &["customer.created", "customer.updated"],
            Provider::Paddle => &["customer.created", "customer.updated"],
            Provider::LemonSqueezy => &[],
        }
    }

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome> {
        let update = match envelope.provider {
            Provider::Stripe => providers::stripe::customer_update(&envelope.payload)?,
            Provider::Paddle => providers::paddle::customer_update(&envelope.payload)?,
            Provider::LemonSqueezy => return Ok(Outcome::Ignored),
        };
        apply_customer(ctx, update).await
    }
}

/// Upsert a billing customer. Customers whose owner cannot be resolved are
/// skipped — a row without an owner would be unreachable anyway.
///
/// Absent incoming fields never clear stored ones: customer payloads are
/// frequently partial.
pub async fn apply_customer<S: BillingStore>(
    ctx: &SyncContext<S>,
    update: CustomerUpdate,
) -> Result<Outcome> {
    let store = ctx.store();
    let existing = store
        .get_customer(update.provider, &update.provider_id)
        .await?;

    let Some(owner_id) = update
        .owner_id
        .clone()
        .or_else(|| existing.as_ref().map(|c| c.owner_id.clone()))
    else {
        return Ok(Outcome::skipped(format!(
            "no owner resolvable for customer {}",
            update.provider_id
        )));
    };

    let now = Utc::now();
    let customer = BillingCustomer {
        id: existing
            .as_ref()
            .map(|c| c.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        owner_id,
        provider: update.provider,
        provider_id: update.provider_id,
        email: update
            .email
            .or_else(|| existing.as_ref().and_then(|c| c.email.clone())),
        name: update
            .name
            .or_else(|| existing.as_ref().and_then(|c| c.name.clone())),
        created_at: existing.as_ref().map(|c| c.created_at).unwrap_or(now),
        updated_at: now,
    };

    store.save_customer(&customer).await?;
    Ok(Outcome::Processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::NoOpNotifier;
    use crate::storage::test::InMemoryStore;
    use std::sync::Arc;

    fn context() -> (SyncContext<InMemoryStore>, InMemoryStore) {
        let store = InMemoryStore::new();
        let ctx = SyncContext::new(store.clone(), Arc::new(NoOpNotifier));
        (ctx, store)
    }

    #[tokio::test]
    async fn upsert_preserves_fields_a_partial_payload_omits() {
        let (ctx, store) = context();

        apply_customer(
            &ctx,
            CustomerUpdate {
                provider: Provider::Stripe,
                provider_id: "cus_1".into(),
                owner_id: Some("team_1".into()),
                email: Some("ada@example.com".into()),
                name: Some("Ada".into()),
            },
        )
        .await
        .unwrap();

        apply_customer(
            &ctx,
            CustomerUpdate {
                provider: Provider::Stripe,
                provider_id: "cus_1".into(),
                owner_id: None,
                email: None,
                name: None,
            },
        )
        .await
        .unwrap();

        let stored = store
            .get_customer(Provider::Stripe, "cus_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.owner_id, "team_1");
        assert_eq!(stored.email.as_deref(), Some("ada@example.com"));
        assert_eq!(store.all_customers().len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_owner_is_skipped() {
        let (ctx, store) = context();

        let outcome = apply_customer(
            &ctx,
            CustomerUpdate {
                provider: Provider::Paddle,
                provider_id: "ctm_1".into(),
                owner_id: None,
                email: None,
                name: None,
            },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, Outcome::Skipped { .. }));
        assert!(store.all_customers().is_empty());
    }
}
