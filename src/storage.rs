//! Storage trait for reconciliation state.
//!
//! Implement [`BillingStore`] to persist engine state to your database. The
//! trait surfaces the handful of operations that must be atomic at the
//! storage layer:
//!
//! - [`BillingStore::record_event_if_new`] — the webhook idempotency ledger
//!   insert. Database implementations MUST back this with a unique
//!   constraint on `(provider, event_id)`; concurrent duplicate deliveries
//!   must yield exactly one `true`.
//! - [`BillingStore::record_redemption`] — first-or-create semantics where
//!   the discount's `redeemed_count` increments only when the row did not
//!   already exist, inside the same atomic unit.
//! - Entity upserts keyed by `(provider, provider_id)` — enforced by unique
//!   constraints, not application-level locking.
//!
//! An in-memory implementation is provided for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    BillingCustomer, Discount, DiscountRedemption, Invoice, InvoiceLineItem, Order, Price,
    PriceMapping, Product, ProductMapping, Provider, Subscription, WebhookEvent,
};

/// Trait for storing reconciliation state.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Webhook idempotency ledger

    /// Record a webhook event if it has not been seen before.
    ///
    /// Returns the ledger row plus `true` when this call created it. Must be
    /// atomic under concurrent duplicate deliveries: only one caller
    /// observes `true`, and only that caller enqueues downstream processing.
    async fn record_event_if_new(
        &self,
        provider: Provider,
        event_id: &str,
        event_type: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<(WebhookEvent, bool)>;

    /// Fetch a previously recorded webhook event.
    async fn get_event(&self, provider: Provider, event_id: &str) -> Result<Option<WebhookEvent>>;

    // Local catalog

    async fn list_products(&self) -> Result<Vec<Product>>;

    async fn get_product(&self, product_id: &str) -> Result<Option<Product>>;

    async fn get_product_by_key(&self, key: &str) -> Result<Option<Product>>;

    /// Insert or fully replace a product, keyed by its synthetic id.
    async fn upsert_product(&self, product: &Product) -> Result<()>;

    async fn list_prices(&self, product_id: &str) -> Result<Vec<Price>>;

    async fn get_price_by_key(&self, product_id: &str, key: &str) -> Result<Option<Price>>;

    async fn upsert_price(&self, price: &Price) -> Result<()>;

    // Provider mappings

    async fn get_product_mapping(
        &self,
        product_id: &str,
        provider: Provider,
    ) -> Result<Option<ProductMapping>>;

    /// Insert or replace the product's mapping for one provider (at most one
    /// mapping per `(product, provider)`).
    async fn upsert_product_mapping(&self, mapping: &ProductMapping) -> Result<()>;

    async fn get_price_mapping(
        &self,
        price_id: &str,
        provider: Provider,
    ) -> Result<Option<PriceMapping>>;

    async fn upsert_price_mapping(&self, mapping: &PriceMapping) -> Result<()>;

    /// Reverse lookup: local product for a remote product id.
    async fn find_product_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<Product>>;

    /// Reverse lookup: local price for a remote price id.
    async fn find_price_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<Price>>;

    // Subscriptions

    async fn get_subscription(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<Subscription>>;

    /// Insert or fully replace a subscription, keyed by
    /// `(provider, provider_id)`.
    async fn save_subscription(&self, subscription: &Subscription) -> Result<()>;

    // Orders

    async fn get_order(&self, provider: Provider, provider_id: &str) -> Result<Option<Order>>;

    async fn save_order(&self, order: &Order) -> Result<()>;

    // Invoices

    async fn get_invoice(&self, provider: Provider, provider_id: &str) -> Result<Option<Invoice>>;

    async fn save_invoice(&self, invoice: &Invoice) -> Result<()>;

    /// Replace ALL line items for an invoice with the given set
    /// (delete-then-reinsert, not merge).
    async fn replace_invoice_lines(
        &self,
        invoice_id: &str,
        lines: &[InvoiceLineItem],
    ) -> Result<()>;

    async fn list_invoice_lines(&self, invoice_id: &str) -> Result<Vec<InvoiceLineItem>>;

    /// Set the payment-failed notification guard. Returns `false` when the
    /// guard was already set (notification must not be repeated).
    async fn mark_invoice_payment_failed_notified(
        &self,
        invoice_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    // Customers

    async fn get_customer(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<BillingCustomer>>;

    async fn save_customer(&self, customer: &BillingCustomer) -> Result<()>;

    // Discounts

    async fn get_discount(&self, provider: Provider, code: &str) -> Result<Option<Discount>>;

    async fn save_discount(&self, discount: &Discount) -> Result<()>;

    /// Record a redemption if none exists for
    /// `(discount, provider, provider_id)`, incrementing the discount's
    /// `redeemed_count` in the same atomic unit. Returns `true` when the
    /// row was created, `false` on a duplicate (no counter change).
    async fn record_redemption(&self, redemption: &DiscountRedemption) -> Result<bool>;
}

/// In-memory store for testing.
#[cfg(any(test, feature = "test-store"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory billing store.
    ///
    /// Wraps data in `Arc` for cheap cloning. Every operation the trait
    /// documents as atomic takes a single write lock here, which gives the
    /// same observable guarantees as a unique constraint would.
    #[derive(Default, Clone)]
    pub struct InMemoryStore {
        inner: Arc<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        events: RwLock<HashMap<(Provider, String), WebhookEvent>>,
        products: RwLock<HashMap<String, Product>>,
        prices: RwLock<HashMap<String, Price>>,
        product_mappings: RwLock<HashMap<(String, Provider), ProductMapping>>,
        price_mappings: RwLock<HashMap<(String, Provider), PriceMapping>>,
        subscriptions: RwLock<HashMap<(Provider, String), Subscription>>,
        orders: RwLock<HashMap<(Provider, String), Order>>,
        invoices: RwLock<HashMap<(Provider, String), Invoice>>,
        invoice_lines: RwLock<HashMap<String, Vec<InvoiceLineItem>>>,
        customers: RwLock<HashMap<(Provider, String), BillingCustomer>>,
        discounts: RwLock<HashMap<(Provider, String), Discount>>,
        redemptions: RwLock<HashMap<(String, Provider, String), DiscountRedemption>>,
    }

    impl InMemoryStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All recorded event ids (for assertions).
        pub fn event_ids(&self) -> Vec<String> {
            self.inner
                .events
                .read()
                .unwrap()
                .keys()
                .map(|(_, id)| id.clone())
                .collect()
        }

        /// All stored subscriptions (for assertions).
        pub fn all_subscriptions(&self) -> Vec<Subscription> {
            self.inner
                .subscriptions
                .read()
                .unwrap()
                .values()
                .cloned()
                .collect()
        }

        /// All stored orders (for assertions).
        pub fn all_orders(&self) -> Vec<Order> {
            self.inner.orders.read().unwrap().values().cloned().collect()
        }

        /// All stored customers (for assertions).
        pub fn all_customers(&self) -> Vec<BillingCustomer> {
            self.inner
                .customers
                .read()
                .unwrap()
                .values()
                .cloned()
                .collect()
        }

        /// All redemption rows (for assertions).
        pub fn all_redemptions(&self) -> Vec<DiscountRedemption> {
            self.inner
                .redemptions
                .read()
                .unwrap()
                .values()
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl BillingStore for InMemoryStore {
        async fn record_event_if_new(
            &self,
            provider: Provider,
            event_id: &str,
            event_type: Option<&str>,
            payload: &serde_json::Value,
        ) -> Result<(WebhookEvent, bool)> {
            let mut events = self.inner.events.write().unwrap();
            let key = (provider, event_id.to_string());
            if let Some(existing) = events.get(&key) {
                return Ok((existing.clone(), false));
            }
            let event = WebhookEvent {
                provider,
                event_id: event_id.to_string(),
                event_type: event_type.map(str::to_string),
                payload: payload.clone(),
                received_at: Utc::now(),
            };
            events.insert(key, event.clone());
            Ok((event, true))
        }

        async fn get_event(
            &self,
            provider: Provider,
            event_id: &str,
        ) -> Result<Option<WebhookEvent>> {
            Ok(self
                .inner
                .events
                .read()
                .unwrap()
                .get(&(provider, event_id.to_string()))
                .cloned())
        }

        async fn list_products(&self) -> Result<Vec<Product>> {
            let mut products: Vec<Product> =
                self.inner.products.read().unwrap().values().cloned().collect();
            products.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(products)
        }

        async fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
            Ok(self.inner.products.read().unwrap().get(product_id).cloned())
        }

        async fn get_product_by_key(&self, key: &str) -> Result<Option<Product>> {
            Ok(self
                .inner
                .products
                .read()
                .unwrap()
                .values()
                .find(|p| p.key == key)
                .cloned())
        }

        async fn upsert_product(&self, product: &Product) -> Result<()> {
            self.inner
                .products
                .write()
                .unwrap()
                .insert(product.id.clone(), product.clone());
            Ok(())
        }

        async fn list_prices(&self, product_id: &str) -> Result<Vec<Price>> {
            let mut prices: Vec<Price> = self
                .inner
                .prices
                .read()
                .unwrap()
                .values()
                .filter(|p| p.product_id == product_id)
                .cloned()
                .collect();
            prices.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(prices)
        }

        async fn get_price_by_key(&self, product_id: &str, key: &str) -> Result<Option<Price>> {
            Ok(self
                .inner
                .prices
                .read()
                .unwrap()
                .values()
                .find(|p| p.product_id == product_id && p.key == key)
                .cloned())
        }

        async fn upsert_price(&self, price: &Price) -> Result<()> {
            self.inner
                .prices
                .write()
                .unwrap()
                .insert(price.id.clone(), price.clone());
            Ok(())
        }

        async fn get_product_mapping(
            &self,
            product_id: &str,
            provider: Provider,
        ) -> Result<Option<ProductMapping>> {
            Ok(self
                .inner
                .product_mappings
                .read()
                .unwrap()
                .get(&(product_id.to_string(), provider))
                .cloned())
        }

        async fn upsert_product_mapping(&self, mapping: &ProductMapping) -> Result<()> {
            self.inner
                .product_mappings
                .write()
                .unwrap()
                .insert((mapping.product_id.clone(), mapping.provider), mapping.clone());
            Ok(())
        }

        async fn get_price_mapping(
            &self,
            price_id: &str,
            provider: Provider,
        ) -> Result<Option<PriceMapping>> {
            Ok(self
                .inner
                .price_mappings
                .read()
                .unwrap()
                .get(&(price_id.to_string(), provider))
                .cloned())
        }

        async fn upsert_price_mapping(&self, mapping: &PriceMapping) -> Result<()> {
            self.inner
                .price_mappings
                .write()
                .unwrap()
                .insert((mapping.price_id.clone(), mapping.provider), mapping.clone());
            Ok(())
        }

        async fn find_product_by_provider_id(
            &self,
            provider: Provider,
            provider_id: &str,
        ) -> Result<Option<Product>> {
            let mappings = self.inner.product_mappings.read().unwrap();
            let product_id = mappings
                .values()
                .find(|m| m.provider == provider && m.provider_id == provider_id)
                .map(|m| m.product_id.clone());
            drop(mappings);

            match product_id {
                Some(id) => Ok(self.inner.products.read().unwrap().get(&id).cloned()),
                None => Ok(None),
            }
        }

        async fn find_price_by_provider_id(
            &self,
            provider: Provider,
            provider_id: &str,
        ) -> Result<Option<Price>> {
            let mappings = self.inner.price_mappings.read().unwrap();
            let price_id = mappings
                .values()
                .find(|m| m.provider == provider && m.provider_id == provider_id)
                .map(|m| m.price_id.clone());
            drop(mappings);

            match price_id {
                Some(id) => Ok(self.inner.prices.read().unwrap().get(&id).cloned()),
                None => Ok(None),
            }
        }

        async fn get_subscription(
            &self,
            provider: Provider,
            provider_id: &str,
        ) -> Result<Option<Subscription>> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .get(&(provider, provider_id.to_string()))
                .cloned())
        }

        async fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
            self.inner.subscriptions.write().unwrap().insert(
                (subscription.provider, subscription.provider_id.clone()),
                subscription.clone(),
            );
            Ok(())
        }

        async fn get_order(&self, provider: Provider, provider_id: &str) -> Result<Option<Order>> {
            Ok(self
                .inner
                .orders
                .read()
                .unwrap()
                .get(&(provider, provider_id.to_string()))
                .cloned())
        }

        async fn save_order(&self, order: &Order) -> Result<()> {
            self.inner
                .orders
                .write()
                .unwrap()
                .insert((order.provider, order.provider_id.clone()), order.clone());
            Ok(())
        }

        async fn get_invoice(
            &self,
            provider: Provider,
            provider_id: &str,
        ) -> Result<Option<Invoice>> {
            Ok(self
                .inner
                .invoices
                .read()
                .unwrap()
                .get(&(provider, provider_id.to_string()))
                .cloned())
        }

        async fn save_invoice(&self, invoice: &Invoice) -> Result<()> {
            self.inner
                .invoices
                .write()
                .unwrap()
                .insert((invoice.provider, invoice.provider_id.clone()), invoice.clone());
            Ok(())
        }

        async fn replace_invoice_lines(
            &self,
            invoice_id: &str,
            lines: &[InvoiceLineItem],
        ) -> Result<()> {
            self.inner
                .invoice_lines
                .write()
                .unwrap()
                .insert(invoice_id.to_string(), lines.to_vec());
            Ok(())
        }

        async fn list_invoice_lines(&self, invoice_id: &str) -> Result<Vec<InvoiceLineItem>> {
            Ok(self
                .inner
                .invoice_lines
                .read()
                .unwrap()
                .get(invoice_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn mark_invoice_payment_failed_notified(
            &self,
            invoice_id: &str,
            at: DateTime<Utc>,
        ) -> Result<bool> {
            let mut invoices = self.inner.invoices.write().unwrap();
            for invoice in invoices.values_mut() {
                if invoice.id == invoice_id {
                    if invoice.payment_failed_notified_at.is_some() {
                        return Ok(false);
                    }
                    invoice.payment_failed_notified_at = Some(at);
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn get_customer(
            &self,
            provider: Provider,
            provider_id: &str,
        ) -> Result<Option<BillingCustomer>> {
            Ok(self
                .inner
                .customers
                .read()
                .unwrap()
                .get(&(provider, provider_id.to_string()))
                .cloned())
        }

        async fn save_customer(&self, customer: &BillingCustomer) -> Result<()> {
            self.inner.customers.write().unwrap().insert(
                (customer.provider, customer.provider_id.clone()),
                customer.clone(),
            );
            Ok(())
        }

        async fn get_discount(&self, provider: Provider, code: &str) -> Result<Option<Discount>> {
            Ok(self
                .inner
                .discounts
                .read()
                .unwrap()
                .get(&(provider, code.to_string()))
                .cloned())
        }

        async fn save_discount(&self, discount: &Discount) -> Result<()> {
            self.inner
                .discounts
                .write()
                .unwrap()
                .insert((discount.provider, discount.code.clone()), discount.clone());
            Ok(())
        }

        async fn record_redemption(&self, redemption: &DiscountRedemption) -> Result<bool> {
            // Take both locks for the duration so the row insert and the
            // counter increment are one atomic unit.
            let mut redemptions = self.inner.redemptions.write().unwrap();
            let mut discounts = self.inner.discounts.write().unwrap();

            let key = (
                redemption.discount_id.clone(),
                redemption.provider,
                redemption.provider_id.clone(),
            );
            if redemptions.contains_key(&key) {
                return Ok(false);
            }
            redemptions.insert(key, redemption.clone());

            for discount in discounts.values_mut() {
                if discount.id == redemption.discount_id {
                    discount.redeemed_count += 1;
                    break;
                }
            }
            Ok(true)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::model::{BillingInterval, ProductKind};

        #[tokio::test]
        async fn record_event_if_new_dedupes() {
            let store = InMemoryStore::new();
            let payload = serde_json::json!({"hello": "world"});

            let (_, first) = store
                .record_event_if_new(Provider::Stripe, "evt_1", Some("x"), &payload)
                .await
                .unwrap();
            let (_, second) = store
                .record_event_if_new(Provider::Stripe, "evt_1", Some("x"), &payload)
                .await
                .unwrap();

            assert!(first);
            assert!(!second);
            assert_eq!(store.event_ids().len(), 1);
        }

        #[tokio::test]
        async fn same_event_id_different_providers_are_distinct() {
            let store = InMemoryStore::new();
            let payload = serde_json::json!({});

            let (_, a) = store
                .record_event_if_new(Provider::Stripe, "evt_1", None, &payload)
                .await
                .unwrap();
            let (_, b) = store
                .record_event_if_new(Provider::Paddle, "evt_1", None, &payload)
                .await
                .unwrap();

            assert!(a);
            assert!(b);
        }

        #[tokio::test]
        async fn redemption_increments_counter_once() {
            let store = InMemoryStore::new();
            let discount = Discount::new(Provider::LemonSqueezy, "LAUNCH20");
            store.save_discount(&discount).await.unwrap();

            let redemption = DiscountRedemption {
                discount_id: discount.id.clone(),
                owner_id: Some("owner_1".into()),
                provider: Provider::LemonSqueezy,
                provider_id: "order_9".into(),
                plan_key: Some("pro".into()),
                price_key: None,
                metadata: serde_json::json!({}),
                redeemed_at: Utc::now(),
            };

            assert!(store.record_redemption(&redemption).await.unwrap());
            assert!(!store.record_redemption(&redemption).await.unwrap());

            let stored = store
                .get_discount(Provider::LemonSqueezy, "LAUNCH20")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.redeemed_count, 1);
        }

        #[tokio::test]
        async fn invoice_lines_replaced_wholesale() {
            let store = InMemoryStore::new();
            let first = vec![InvoiceLineItem {
                invoice_id: "inv_1".into(),
                description: "Pro plan".into(),
                quantity: 1,
                unit_amount: 900,
                amount: 900,
            }];
            let second = vec![
                InvoiceLineItem {
                    invoice_id: "inv_1".into(),
                    description: "Pro plan".into(),
                    quantity: 2,
                    unit_amount: 900,
                    amount: 1800,
                },
                InvoiceLineItem {
                    invoice_id: "inv_1".into(),
                    description: "Extra seat".into(),
                    quantity: 1,
                    unit_amount: 300,
                    amount: 300,
                },
            ];

            store.replace_invoice_lines("inv_1", &first).await.unwrap();
            store.replace_invoice_lines("inv_1", &second).await.unwrap();

            let lines = store.list_invoice_lines("inv_1").await.unwrap();
            assert_eq!(lines, second);
        }

        #[tokio::test]
        async fn provider_id_reverse_lookups() {
            let store = InMemoryStore::new();
            let product = Product::new("pro", "Pro", ProductKind::Subscription);
            let price = Price::new(&product.id, "monthly", BillingInterval::Month, "USD", 900);
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

            let found = store
                .find_product_by_provider_id(Provider::Stripe, "prod_x")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.key, "pro");

            let found = store
                .find_price_by_provider_id(Provider::Stripe, "price_x")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.key, "monthly");

            assert!(store
                .find_price_by_provider_id(Provider::Paddle, "price_x")
                .await
                .unwrap()
                .is_none());
        }
    }
}
