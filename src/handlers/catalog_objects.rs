//! Remote catalog change events.
//!
//! Webhooks only UPDATE local catalog records that are already mapped to
//! the remote object; creation of local records is the import service's
//! job. Provider-side deletion soft-deactivates, never deletes — orders
//! and invoices keep referencing historical products and prices.

use async_trait::async_trait;
use chrono::Utc;

use crate::dispatch::{EventHandler, Outcome};
use crate::error::Result;
use crate::model::Provider;
use crate::providers::{self, CatalogObjectUpdate};
use crate::storage::BillingStore;
use crate::webhook::WebhookEnvelope;

use super::SyncContext;

/// Handles remote product change events.
pub struct CatalogProductHandler;

#[async_trait]
impl<S: BillingStore> EventHandler<S> for CatalogProductHandler {
    fn event_types(&self, provider: Provider) -> &'static [&'static str] {
        match provider {
            Provider::Stripe => &["product.created", "product.updated", "product.deleted"],
            Provider::Paddle => &["product.created", "product.updated"],
            Provider::LemonSqueezy => &[],
        }
    }

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome> {
        let update = parse(envelope)?;

        let Some(mut product) = ctx
            .store()
            .find_product_by_provider_id(update.provider, &update.provider_id)
            .await?
        else {
            return Ok(Outcome::skipped(format!(
                "remote product {} has no local mapping",
                update.provider_id
            )));
        };

        // Partial-payload safety: absent fields never clear local ones.
        if let Some(name) = update.name.filter(|n| !n.is_empty()) {
            product.name = name;
        }
        if update.summary.is_some() {
            product.summary = update.summary;
        }
        product.active = update.active;
        product.updated_at = Utc::now();

        ctx.store().upsert_product(&product).await?;
        Ok(Outcome::Processed)
    }
}

/// Handles remote price change events.
pub struct CatalogPriceHandler;

#[async_trait]
impl<S: BillingStore> EventHandler<S> for CatalogPriceHandler {
    fn event_types(&self, provider: Provider) -> &'static [&'static str] {
        match provider {
            Provider::Stripe => &["price.created", "price.updated", "price.deleted"],
            Provider::Paddle => &["price.created", "price.updated"],
            Provider::LemonSqueezy => &[],
        }
    }

    async fn handle(&self, ctx: &SyncContext<S>, envelope: &WebhookEnvelope) -> Result<Outcome> {
        let update = parse(envelope)?;

        let Some(mut price) = ctx
            .store()
            .find_price_by_provider_id(update.provider, &update.provider_id)
            .await?
        else {
            return Ok(Outcome::skipped(format!(
                "remote price {} has no local mapping",
                update.provider_id
            )));
        };

        // Amounts are immutable remote-side; only the active flag moves.
        price.active = update.active;
        price.updated_at = Utc::now();

        ctx.store().upsert_price(&price).await?;
        Ok(Outcome::Processed)
    }
}

fn parse(envelope: &WebhookEnvelope) -> Result<CatalogObjectUpdate> {
    let event_type = envelope.event_type.as_deref().unwrap_or("");
    match envelope.provider {
        Provider::Stripe => providers::stripe::catalog_object_update(event_type, &envelope.payload),
        Provider::Paddle => providers::paddle::catalog_object_update(&envelope.payload),
        Provider::LemonSqueezy => Err(crate::error::Error::invalid_payload(
            "Lemon Squeezy sends no catalog webhooks",
        )),
    }
}
