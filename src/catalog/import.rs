//! Import reconciliation: pull a provider's remote catalog into the local
//! database, for backfill and migration.
//!
//! Remote metadata is normalized into candidate product/price payloads;
//! whether anything changed is decided by a field-by-field diff against
//! the existing local record. Empty or absent incoming fields never
//! overwrite populated local fields — provider payloads are frequently
//! partial, and a backfill must not erase curated local data.

use chrono::Utc;

use crate::error::Result;
use crate::model::{
    BillingInterval, Price, PriceMapping, Product, ProductKind, ProductMapping,
};
use crate::providers::{CatalogClient, RemotePrice, RemoteProduct};
use crate::storage::BillingStore;

use super::{SyncOptions, SyncReport};

/// Pulls one provider's catalog into the local database.
pub struct CatalogImporter<S: BillingStore, C: CatalogClient> {
    store: S,
    client: C,
}

impl<S: BillingStore, C: CatalogClient> CatalogImporter<S, C> {
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Compute actions without writing anything.
    pub async fn preview(&self, options: &SyncOptions) -> Result<SyncReport> {
        self.run(options, false).await
    }

    /// Perform the import.
    pub async fn apply(&self, options: &SyncOptions) -> Result<SyncReport> {
        self.run(options, true).await
    }

    async fn run(&self, options: &SyncOptions, apply: bool) -> Result<SyncReport> {
        let provider = self.client.provider();
        let mut report = SyncReport::default();

        let catalog = self.client.list_catalog().await?;

        for remote in &catalog.products {
            let Some(key) = remote.key.clone().filter(|k| !k.is_empty()) else {
                report.warn(format!(
                    "remote product {} carries no recognizable key, skipped",
                    remote.provider_id
                ));
                continue;
            };
            if !options.includes(&key) {
                continue;
            }

            let prices: Vec<&RemotePrice> = catalog
                .prices
                .iter()
                .filter(|p| p.product_provider_id == remote.provider_id)
                .collect();

            let product = match self
                .import_product(remote, &key, &prices, apply, &mut report)
                .await
            {
                Ok(product) => product,
                Err(e) => {
                    report.warn(format!("product {key}: {e}"));
                    continue;
                }
            };

            for remote_price in prices {
                if let Err(e) = self
                    .import_price(&product, remote_price, apply, &mut report)
                    .await
                {
                    report.warn(format!(
                        "price {} under {key}: {e}",
                        remote_price.provider_id
                    ));
                }
            }
        }

        tracing::info!(
            target: "paysync::catalog",
            provider = %provider,
            apply,
            products_create = report.summary.products.create,
            products_update = report.summary.products.update,
            prices_create = report.summary.prices.create,
            warnings = report.warnings.len(),
            "import reconciliation finished"
        );

        Ok(report)
    }

    async fn import_product(
        &self,
        remote: &RemoteProduct,
        key: &str,
        prices: &[&RemotePrice],
        apply: bool,
        report: &mut SyncReport,
    ) -> Result<Product> {
        let provider = self.client.provider();

        // A product already mapped to this remote id wins over key lookup:
        // the mapping is the stronger identity claim.
        let existing = match self
            .store
            .find_product_by_provider_id(provider, &remote.provider_id)
            .await?
        {
            Some(product) => Some(product),
            None => self.store.get_product_by_key(key).await?,
        };

        let product = match existing {
            Some(local) => {
                let (merged, changed) = merge_product(&local, remote);
                if changed {
                    report.summary.products.update += 1;
                    if apply {
                        self.store.upsert_product(&merged).await?;
                    }
                } else {
                    report.summary.products.skip += 1;
                }
                if apply {
                    self.ensure_product_mapping(&merged, &remote.provider_id).await?;
                }
                merged
            }
            None => {
                report.summary.products.create += 1;

                // Any recurring remote price marks the product as a
                // subscription product.
                let kind = if prices
                    .iter()
                    .any(|p| p.interval.is_some_and(|i| i != BillingInterval::Once))
                {
                    ProductKind::Subscription
                } else {
                    ProductKind::OneTime
                };

                let mut product = Product::new(key, remote.name.clone(), kind);
                product.summary = remote.summary.clone();
                product.active = remote.active;

                if apply {
                    self.store.upsert_product(&product).await?;
                    self.ensure_product_mapping(&product, &remote.provider_id).await?;
                }
                product
            }
        };

        Ok(product)
    }

    async fn import_price(
        &self,
        product: &Product,
        remote: &RemotePrice,
        apply: bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        let provider = self.client.provider();

        // A price without a usable amount cannot become a local price.
        let Some(amount) = remote.amount else {
            report.warn(format!(
                "remote price {} has no usable amount, skipped",
                remote.provider_id
            ));
            return Ok(());
        };

        let key = price_key_for(remote);

        let existing = match self
            .store
            .find_price_by_provider_id(provider, &remote.provider_id)
            .await?
        {
            Some(price) => Some(price),
            None => self.store.get_price_by_key(&product.id, &key).await?,
        };

        match existing {
            Some(local) => {
                let had_mapping = self
                    .store
                    .get_price_mapping(&local.id, provider)
                    .await?
                    .is_some();
                let (merged, changed) = merge_price(&local, remote, amount);

                if changed {
                    report.summary.prices.update += 1;
                    if apply {
                        self.store.upsert_price(&merged).await?;
                    }
                } else if had_mapping {
                    report.summary.prices.skip += 1;
                } else {
                    // Only the mapping is new: link, not update.
                    report.summary.prices.link += 1;
                }

                if apply {
                    self.store
                        .upsert_price_mapping(&PriceMapping {
                            price_id: merged.id.clone(),
                            provider,
                            provider_id: remote.provider_id.clone(),
                        })
                        .await?;
                }
            }
            None => {
                report.summary.prices.create += 1;
                if !apply {
                    return Ok(());
                }

                let mut price = Price::new(
                    &product.id,
                    &key,
                    remote.interval.unwrap_or(BillingInterval::Once),
                    remote.currency.clone().unwrap_or_else(|| "USD".to_string()),
                    amount,
                );
                price.interval_count = remote.interval_count.max(1);
                price.active = remote.active;

                self.store.upsert_price(&price).await?;
                self.store
                    .upsert_price_mapping(&PriceMapping {
                        price_id: price.id.clone(),
                        provider,
                        provider_id: remote.provider_id.clone(),
                    })
                    .await?;
            }
        }

        Ok(())
    }

    async fn ensure_product_mapping(&self, product: &Product, provider_id: &str) -> Result<()> {
        let provider = self.client.provider();
        let current = self.store.get_product_mapping(&product.id, provider).await?;
        if current.as_ref().map(|m| m.provider_id.as_str()) != Some(provider_id) {
            self.store
                .upsert_product_mapping(&ProductMapping {
                    product_id: product.id.clone(),
                    provider,
                    provider_id: provider_id.to_string(),
                })
                .await?;
        }
        Ok(())
    }
}

/// Natural key for a remote price: its recovered key metadata, else a key
/// derived from its billing cadence.
fn price_key_for(remote: &RemotePrice) -> String {
    if let Some(key) = remote.price_key.clone().filter(|k| !k.is_empty()) {
        return key;
    }
    match remote.interval.unwrap_or(BillingInterval::Once) {
        BillingInterval::Once => "one-time".to_string(),
        BillingInterval::Day => "daily".to_string(),
        BillingInterval::Week => "weekly".to_string(),
        BillingInterval::Month => "monthly".to_string(),
        BillingInterval::Year => "yearly".to_string(),
    }
}

/// Merge an incoming remote product into the local record, field by field.
/// Returns the merged record plus whether anything actually changed.
fn merge_product(local: &Product, remote: &RemoteProduct) -> (Product, bool) {
    let mut merged = local.clone();
    let mut changed = false;

    if !remote.name.is_empty() && remote.name != local.name {
        merged.name = remote.name.clone();
        changed = true;
    }
    if let Some(summary) = remote.summary.clone().filter(|s| !s.is_empty()) {
        if Some(&summary) != local.summary.as_ref() {
            merged.summary = Some(summary);
            changed = true;
        }
    }
    if remote.active != local.active {
        merged.active = remote.active;
        changed = true;
    }

    if changed {
        merged.updated_at = Utc::now();
    }
    (merged, changed)
}

/// Merge an incoming remote price into the local record, field by field.
fn merge_price(local: &Price, remote: &RemotePrice, amount: i64) -> (Price, bool) {
    let mut merged = local.clone();
    let mut changed = false;

    if amount != local.amount {
        merged.amount = amount;
        changed = true;
    }
    if let Some(currency) = remote.currency.clone().filter(|c| !c.is_empty()) {
        let currency = currency.to_uppercase();
        if currency != local.currency {
            merged.currency = currency;
            changed = true;
        }
    }
    if let Some(interval) = remote.interval {
        if interval != local.interval {
            merged.interval = interval;
            changed = true;
        }
    }
    if remote.interval_count >= 1 && remote.interval_count != local.interval_count {
        merged.interval_count = remote.interval_count;
        changed = true;
    }
    if remote.active != local.active {
        merged.active = remote.active;
        changed = true;
    }

    if changed {
        merged.updated_at = Utc::now();
    }
    (merged, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provider;
    use crate::providers::test::MockCatalogClient;
    use crate::providers::RemoteCatalog;
    use crate::storage::test::InMemoryStore;

    fn remote_product(id: &str, key: &str, name: &str) -> RemoteProduct {
        RemoteProduct {
            provider_id: id.to_string(),
            key: Some(key.to_string()),
            name: name.to_string(),
            summary: Some("Synced".into()),
            active: true,
        }
    }

    fn remote_price(id: &str, product_id: &str, key: Option<&str>, amount: Option<i64>) -> RemotePrice {
        RemotePrice {
            provider_id: id.to_string(),
            product_provider_id: product_id.to_string(),
            product_key: None,
            price_key: key.map(str::to_string),
            amount,
            currency: Some("USD".into()),
            interval: Some(BillingInterval::Month),
            interval_count: 1,
            active: true,
        }
    }

    #[tokio::test]
    async fn import_creates_products_and_prices() {
        let store = InMemoryStore::new();
        let client = MockCatalogClient::new(Provider::Paddle);
        client.seed(RemoteCatalog {
            products: vec![remote_product("pro_r", "pro", "Pro")],
            prices: vec![remote_price("pri_r", "pro_r", Some("monthly"), Some(900))],
        });

        let importer = CatalogImporter::new(store.clone(), client);

        let preview = importer.preview(&SyncOptions::default()).await.unwrap();
        assert_eq!(preview.summary.products.create, 1);
        assert_eq!(preview.summary.prices.create, 1);
        assert!(store.get_product_by_key("pro").await.unwrap().is_none());

        let applied = importer.apply(&SyncOptions::default()).await.unwrap();
        assert_eq!(applied.summary.products.create, 1);

        let product = store.get_product_by_key("pro").await.unwrap().unwrap();
        assert_eq!(product.kind, ProductKind::Subscription);
        let price = store
            .get_price_by_key(&product.id, "monthly")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(price.amount, 900);

        // Mappings persisted alongside.
        assert!(store
            .get_product_mapping(&product.id, Provider::Paddle)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_price_mapping(&price.id, Provider::Paddle)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let store = InMemoryStore::new();
        let client = MockCatalogClient::new(Provider::Paddle);
        client.seed(RemoteCatalog {
            products: vec![remote_product("pro_r", "pro", "Pro")],
            prices: vec![remote_price("pri_r", "pro_r", Some("monthly"), Some(900))],
        });

        let importer = CatalogImporter::new(store.clone(), client);
        importer.apply(&SyncOptions::default()).await.unwrap();
        let second = importer.apply(&SyncOptions::default()).await.unwrap();

        assert_eq!(second.summary.products.skip, 1);
        assert_eq!(second.summary.prices.skip, 1);
        assert_eq!(second.summary.products.create, 0);
        assert_eq!(store.list_products().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn price_without_amount_warns_and_skips() {
        let store = InMemoryStore::new();
        let client = MockCatalogClient::new(Provider::Paddle);
        client.seed(RemoteCatalog {
            products: vec![remote_product("pro_r", "pro", "Pro")],
            prices: vec![remote_price("pri_bad", "pro_r", Some("monthly"), None)],
        });

        let importer = CatalogImporter::new(store.clone(), client);
        let report = importer.apply(&SyncOptions::default()).await.unwrap();

        assert!(report.warnings.iter().any(|w| w.contains("no usable amount")));
        let product = store.get_product_by_key("pro").await.unwrap().unwrap();
        assert!(store.list_prices(&product.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_incoming_fields_never_overwrite_local() {
        let store = InMemoryStore::new();
        let mut product = Product::new("pro", "Pro Plan", ProductKind::Subscription);
        product.summary = Some("Curated local copy".into());
        store.upsert_product(&product).await.unwrap();

        let client = MockCatalogClient::new(Provider::Paddle);
        client.seed(RemoteCatalog {
            products: vec![RemoteProduct {
                provider_id: "pro_r".into(),
                key: Some("pro".into()),
                name: String::new(),
                summary: None,
                active: true,
            }],
            prices: vec![remote_price("pri_r", "pro_r", Some("monthly"), Some(900))],
        });

        let importer = CatalogImporter::new(store.clone(), client);
        importer.apply(&SyncOptions::default()).await.unwrap();

        let stored = store.get_product_by_key("pro").await.unwrap().unwrap();
        assert_eq!(stored.name, "Pro Plan");
        assert_eq!(stored.summary.as_deref(), Some("Curated local copy"));
    }

    #[tokio::test]
    async fn changed_remote_fields_update_with_diff() {
        let store = InMemoryStore::new();
        let product = Product::new("pro", "Pro", ProductKind::Subscription);
        let price = Price::new(&product.id, "monthly", BillingInterval::Month, "USD", 900);
        store.upsert_product(&product).await.unwrap();
        store.upsert_price(&price).await.unwrap();

        let client = MockCatalogClient::new(Provider::Paddle);
        client.seed(RemoteCatalog {
            products: vec![remote_product("pro_r", "pro", "Pro")],
            prices: vec![remote_price("pri_r", "pro_r", Some("monthly"), Some(1200))],
        });

        let importer = CatalogImporter::new(store.clone(), client);
        let report = importer.apply(&SyncOptions::default()).await.unwrap();

        // Name matched ("Pro" vs "Pro") but summary arrived: update.
        assert_eq!(report.summary.products.update, 1);
        assert_eq!(report.summary.prices.update, 1);

        let stored = store
            .get_price_by_key(&product.id, "monthly")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.amount, 1200);
    }

    #[tokio::test]
    async fn keyless_remote_product_is_warned_about() {
        let store = InMemoryStore::new();
        let client = MockCatalogClient::new(Provider::Stripe);
        client.seed(RemoteCatalog {
            products: vec![RemoteProduct {
                provider_id: "prod_x".into(),
                key: None,
                name: "Untagged".into(),
                summary: None,
                active: true,
            }],
            prices: vec![],
        });

        let importer = CatalogImporter::new(store.clone(), client);
        let report = importer.apply(&SyncOptions::default()).await.unwrap();

        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("no recognizable key")));
        assert!(store.list_products().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyless_price_derives_cadence_key() {
        let store = InMemoryStore::new();
        let client = MockCatalogClient::new(Provider::LemonSqueezy);
        client.seed(RemoteCatalog {
            products: vec![remote_product("77", "pro", "Pro")],
            prices: vec![remote_price("424", "77", None, Some(900))],
        });

        let importer = CatalogImporter::new(store.clone(), client);
        importer.apply(&SyncOptions::default()).await.unwrap();

        let product = store.get_product_by_key("pro").await.unwrap().unwrap();
        assert!(store
            .get_price_by_key(&product.id, "monthly")
            .await
            .unwrap()
            .is_some());
    }
}
