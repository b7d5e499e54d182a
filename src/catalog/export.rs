//! Export reconciliation: publish the local catalog to a provider.
//!
//! Remote resolution is layered: an explicit provider mapping (validated
//! against the prefetched catalog, never assumed alive), then natural-key
//! lookup, then — for storefronts with auto-created default variants — a
//! claim-and-remove pass over the unmapped pool, then creation. The
//! claim-and-remove pool guarantees two local prices can never adopt the
//! same remote object: once claimed, the candidate is spliced out.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::{Price, PriceMapping, Product, ProductMapping};
use crate::providers::{CatalogClient, RemoteCatalog, RemotePrice, RemoteProduct};
use crate::storage::BillingStore;

use super::{SyncOptions, SyncReport};

/// Prefetched remote catalog, indexed for the lookup strategies.
struct RemoteIndex {
    products_by_id: HashMap<String, RemoteProduct>,
    products_by_key: HashMap<String, RemoteProduct>,
    prices_by_id: HashMap<String, RemotePrice>,
    prices_by_slug: HashMap<String, RemotePrice>,
    /// Remote prices with no recognizable key, grouped by remote product.
    /// Claiming removes the entry so a second local price cannot reuse it.
    unmapped_by_product: HashMap<String, Vec<RemotePrice>>,
}

impl RemoteIndex {
    fn new(catalog: RemoteCatalog) -> Self {
        let mut products_by_id = HashMap::new();
        let mut products_by_key = HashMap::new();
        for product in catalog.products {
            if let Some(key) = &product.key {
                products_by_key.insert(key.clone(), product.clone());
            }
            products_by_id.insert(product.provider_id.clone(), product);
        }

        let mut prices_by_id = HashMap::new();
        let mut prices_by_slug = HashMap::new();
        let mut unmapped_by_product: HashMap<String, Vec<RemotePrice>> = HashMap::new();
        for price in catalog.prices {
            match price.slug() {
                Some(slug) => {
                    prices_by_slug.insert(slug, price.clone());
                }
                None => {
                    unmapped_by_product
                        .entry(price.product_provider_id.clone())
                        .or_default()
                        .push(price.clone());
                }
            }
            prices_by_id.insert(price.provider_id.clone(), price);
        }

        Self {
            products_by_id,
            products_by_key,
            prices_by_id,
            prices_by_slug,
            unmapped_by_product,
        }
    }

    /// Claim the first unmapped remote price under a remote product,
    /// removing it from the pool.
    fn claim_unmapped(&mut self, product_provider_id: &str) -> Option<RemotePrice> {
        let pool = self.unmapped_by_product.get_mut(product_provider_id)?;
        if pool.is_empty() {
            return None;
        }
        Some(pool.remove(0))
    }
}

/// Publishes local products and prices to one provider's catalog.
pub struct CatalogExporter<S: BillingStore, C: CatalogClient> {
    store: S,
    client: C,
}

impl<S: BillingStore, C: CatalogClient> CatalogExporter<S, C> {
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Compute actions without performing any of them.
    pub async fn preview(&self, options: &SyncOptions) -> Result<SyncReport> {
        self.run(options, false).await
    }

    /// Perform the reconciliation: create/update remote objects and
    /// persist mappings.
    pub async fn apply(&self, options: &SyncOptions) -> Result<SyncReport> {
        self.run(options, true).await
    }

    async fn run(&self, options: &SyncOptions, apply: bool) -> Result<SyncReport> {
        let provider = self.client.provider();
        let mut report = SyncReport::default();

        // Systemic: a failed list call aborts the whole run.
        let mut index = RemoteIndex::new(self.client.list_catalog().await?);

        let products = self.store.list_products().await?;
        for product in products.iter().filter(|p| options.includes(&p.key)) {
            let remote_product_id = match self
                .resolve_product(product, &mut index, options, apply, &mut report)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    report.warn(format!("product {}: {e}", product.key));
                    continue;
                }
            };

            let prices = self.store.list_prices(&product.id).await?;
            if prices.is_empty() {
                report.warn(format!("product {} has no prices to publish", product.key));
                continue;
            }

            for price in &prices {
                if let Err(e) = self
                    .resolve_price(
                        product,
                        price,
                        remote_product_id.as_deref(),
                        &mut index,
                        options,
                        apply,
                        &mut report,
                    )
                    .await
                {
                    report.warn(format!("price {}:{}: {e}", product.key, price.key));
                }
            }
        }

        tracing::info!(
            target: "paysync::catalog",
            provider = %provider,
            apply,
            products_create = report.summary.products.create,
            prices_create = report.summary.prices.create,
            prices_link = report.summary.prices.link,
            warnings = report.warnings.len(),
            "export reconciliation finished"
        );

        Ok(report)
    }

    /// Resolve one product's remote counterpart. Returns its remote id
    /// when one exists (or was just created).
    async fn resolve_product(
        &self,
        product: &Product,
        index: &mut RemoteIndex,
        options: &SyncOptions,
        apply: bool,
        report: &mut SyncReport,
    ) -> Result<Option<String>> {
        let provider = self.client.provider();

        // Explicit mapping first, but validated against the prefetch: the
        // remote object may have been deleted out from under the mapping.
        if let Some(mapping) = self.store.get_product_mapping(&product.id, provider).await? {
            if index.products_by_id.contains_key(&mapping.provider_id) {
                if options.update_existing {
                    if apply {
                        self.client
                            .update_product(&mapping.provider_id, product)
                            .await?;
                    }
                    report.summary.products.update += 1;
                } else {
                    report.summary.products.skip += 1;
                }
                return Ok(Some(mapping.provider_id));
            }
            report.warn(format!(
                "product {}: mapped remote object {} no longer exists",
                product.key, mapping.provider_id
            ));
        }

        // Natural-key lookup.
        if let Some(remote) = index.products_by_key.get(&product.key).cloned() {
            if apply {
                self.store
                    .upsert_product_mapping(&ProductMapping {
                        product_id: product.id.clone(),
                        provider,
                        provider_id: remote.provider_id.clone(),
                    })
                    .await?;
            }
            if options.update_existing {
                if apply {
                    self.client
                        .update_product(&remote.provider_id, product)
                        .await?;
                }
                report.summary.products.update += 1;
            } else {
                report.summary.products.skip += 1;
            }
            return Ok(Some(remote.provider_id));
        }

        // Nothing remote: create.
        report.summary.products.create += 1;
        if !apply {
            return Ok(None);
        }

        let remote = self.client.create_product(product).await?;
        self.store
            .upsert_product_mapping(&ProductMapping {
                product_id: product.id.clone(),
                provider,
                provider_id: remote.provider_id.clone(),
            })
            .await?;
        index
            .products_by_id
            .insert(remote.provider_id.clone(), remote.clone());
        Ok(Some(remote.provider_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_price(
        &self,
        product: &Product,
        price: &Price,
        remote_product_id: Option<&str>,
        index: &mut RemoteIndex,
        options: &SyncOptions,
        apply: bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        let provider = self.client.provider();

        // (a) explicit mapping, validated against the prefetch.
        if let Some(mapping) = self.store.get_price_mapping(&price.id, provider).await? {
            if index.prices_by_id.contains_key(&mapping.provider_id) {
                if options.update_existing {
                    // Some providers treat prices as immutable: report the
                    // action, perform nothing.
                    if apply && !self.client.prices_immutable() {
                        self.client.update_price(&mapping.provider_id, price).await?;
                    }
                    report.summary.prices.update += 1;
                } else {
                    report.summary.prices.skip += 1;
                }
                return Ok(());
            }
            report.warn(format!(
                "price {}:{}: mapped remote object {} no longer exists",
                product.key, price.key, mapping.provider_id
            ));
        }

        // (b) natural-key lookup by composite slug.
        let slug = format!("{}:{}", product.key, price.key);
        if let Some(remote) = index.prices_by_slug.get(&slug).cloned() {
            if apply {
                self.store
                    .upsert_price_mapping(&PriceMapping {
                        price_id: price.id.clone(),
                        provider,
                        provider_id: remote.provider_id.clone(),
                    })
                    .await?;
            }
            report.summary.prices.link += 1;
            return Ok(());
        }

        // (c) claim the storefront's auto-created default variant. Claimed
        // objects leave the pool, so a second local price falls to create.
        if self.client.has_default_variants() {
            if let Some(remote_id) = remote_product_id {
                if let Some(remote) = index.claim_unmapped(remote_id) {
                    if apply {
                        self.store
                            .upsert_price_mapping(&PriceMapping {
                                price_id: price.id.clone(),
                                provider,
                                provider_id: remote.provider_id.clone(),
                            })
                            .await?;
                    }
                    report.summary.prices.link += 1;
                    return Ok(());
                }
            }
        }

        // (d) create remotely.
        report.summary.prices.create += 1;
        if !apply {
            return Ok(());
        }
        let Some(remote_id) = remote_product_id else {
            // Product creation was previewed or failed; nothing to attach to.
            return Ok(());
        };

        let remote = self.client.create_price(remote_id, product, price).await?;
        self.store
            .upsert_price_mapping(&PriceMapping {
                price_id: price.id.clone(),
                provider,
                provider_id: remote.provider_id.clone(),
            })
            .await?;
        index
            .prices_by_id
            .insert(remote.provider_id.clone(), remote);
        Ok(())
    }
}
