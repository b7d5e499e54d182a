//! Provider adapters.
//!
//! Each provider module owns three things:
//!
//! 1. typed payload structs for its webhook events, parsed ONCE at the top
//!    of each handler into the normalized `*Update` shapes below;
//! 2. its status normalization tables and metadata path lists;
//! 3. a [`CatalogClient`] implementation over its REST API.

pub mod lemonsqueezy;
pub mod paddle;
pub mod stripe;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::{Duration, sleep};

use crate::config::RetryConfig;
use crate::error::Result;
use crate::model::{
    BillingInterval, OrderStatus, Price, Product, Provider, SubscriptionStatus,
};

// ============================================================================
// Normalized event payloads
// ============================================================================

/// One webhook's view of a subscription. Applied as a full replace
/// (last-writer-wins); `None` plan key means the webhook could not name the
/// plan and resolution falls back to mapping tables.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub provider: Provider,
    pub provider_id: String,
    pub owner_id: Option<String>,
    pub plan_key: Option<String>,
    /// Remote price id, for plan-key resolution through mapping tables.
    pub price_provider_id: Option<String>,
    pub status: SubscriptionStatus,
    pub quantity: u32,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub renews_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// One webhook's view of an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub provider: Provider,
    pub provider_id: String,
    pub owner_id: Option<String>,
    pub status: OrderStatus,
    pub amount: i64,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// One webhook's view of an invoice, including the full line-item set
/// (line items are replaced wholesale on every sync).
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceUpdate {
    pub provider: Provider,
    pub provider_id: String,
    pub order_provider_id: Option<String>,
    pub subscription_provider_id: Option<String>,
    pub status: Option<String>,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub subtotal: i64,
    pub tax_amount: i64,
    /// Directly provided rate, when the provider sends one.
    pub tax_rate: Option<f64>,
    pub currency: String,
    pub hosted_url: Option<String>,
    pub pdf_url: Option<String>,
    pub pdf_url_expires_at: Option<DateTime<Utc>>,
    pub lines: Vec<LineUpdate>,
    /// Set when the event itself is an explicit payment failure.
    pub payment_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineUpdate {
    pub description: String,
    pub quantity: u32,
    pub unit_amount: i64,
    pub amount: i64,
}

/// One webhook's view of a provider customer.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerUpdate {
    pub provider: Provider,
    pub provider_id: String,
    pub owner_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// A completed checkout: the one event class that can touch customer,
/// order, subscription and discount redemption in a single sync.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutUpdate {
    pub provider: Provider,
    /// The provider id of the checkout's order/session object.
    pub provider_id: String,
    pub owner_id: Option<String>,
    pub plan_key: Option<String>,
    pub price_key: Option<String>,
    pub discount_code: Option<String>,
    pub subscription_provider_id: Option<String>,
    pub customer: Option<CustomerUpdate>,
    pub paid: bool,
    pub amount: i64,
    pub currency: String,
    pub metadata: serde_json::Value,
}

/// Remote-side catalog change pushed over a webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogObjectUpdate {
    pub provider: Provider,
    pub provider_id: String,
    /// `false` for deletion events (local records are soft-deactivated,
    /// never removed).
    pub active: bool,
    pub name: Option<String>,
    pub summary: Option<String>,
}

// ============================================================================
// Remote catalog shapes
// ============================================================================

/// A product as listed from a provider's catalog API. `key` is the local
/// natural key recovered from the object's custom metadata, when present.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProduct {
    pub provider_id: String,
    pub key: Option<String>,
    pub name: String,
    pub summary: Option<String>,
    pub active: bool,
}

/// A price/variant as listed from a provider's catalog API.
///
/// Objects carrying no recognizable key metadata (e.g. a storefront's
/// auto-generated default variant) have `price_key == None` and form the
/// "unmapped" pool during export reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePrice {
    pub provider_id: String,
    pub product_provider_id: String,
    pub product_key: Option<String>,
    pub price_key: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<BillingInterval>,
    pub interval_count: u32,
    pub active: bool,
}

impl RemotePrice {
    /// The composite natural-key slug, when both halves are known.
    #[must_use]
    pub fn slug(&self) -> Option<String> {
        match (&self.product_key, &self.price_key) {
            (Some(p), Some(k)) => Some(format!("{p}:{k}")),
            _ => None,
        }
    }
}

/// The full remote catalog, prefetched before a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteCatalog {
    pub products: Vec<RemoteProduct>,
    pub prices: Vec<RemotePrice>,
}

/// Catalog API surface of one provider.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Remote prices cannot be mutated in place; the exporter's update
    /// branch no-ops while still reporting the action.
    fn prices_immutable(&self) -> bool {
        true
    }

    /// The storefront auto-creates a default variant per product, claimable
    /// by the first unmapped local price.
    fn has_default_variants(&self) -> bool {
        false
    }

    /// Fetch the full remote catalog. Systemic failure here aborts the
    /// whole reconciliation run.
    async fn list_catalog(&self) -> Result<RemoteCatalog>;

    async fn create_product(&self, product: &Product) -> Result<RemoteProduct>;

    async fn update_product(&self, provider_id: &str, product: &Product) -> Result<()>;

    async fn create_price(
        &self,
        remote_product_id: &str,
        product: &Product,
        price: &Price,
    ) -> Result<RemotePrice>;

    async fn update_price(&self, provider_id: &str, price: &Price) -> Result<()>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Convert a unix-seconds value to UTC. Zero and negative values are
/// treated as absent (providers use 0 for "not set").
#[must_use]
pub fn epoch_to_utc(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Utc.timestamp_opt(seconds, 0).single()
}

/// Parse an RFC 3339 timestamp, tolerating `None`/empty input.
#[must_use]
pub fn rfc3339_to_utc(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Walk a dotted path into nested JSON. Numeric segments index arrays.
#[must_use]
pub fn lookup_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match segment.parse::<usize>() {
            Ok(index) => current.as_array()?.get(index)?,
            Err(_) => current.as_object()?.get(segment)?,
        };
    }
    Some(current)
}

/// Coerce a JSON value into an integer minor-unit amount. Paddle sends
/// amounts as decimal strings; Stripe and Lemon Squeezy send integers.
#[must_use]
pub fn coerce_amount(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve the recurring amount and currency for a subscription from its
/// stored metadata snapshot.
///
/// Each provider nests price data differently; the probe walks that
/// provider's documented path list in order and falls back to `0`/`USD`
/// when nothing resolves. Deterministic by construction — the lists are
/// constants, not per-call guesses.
#[must_use]
pub fn resolve_subscription_amount(provider: Provider, metadata: &serde_json::Value) -> (i64, String) {
    let (amount_paths, currency_paths) = match provider {
        Provider::Stripe => (stripe::AMOUNT_PATHS, stripe::CURRENCY_PATHS),
        Provider::Paddle => (paddle::AMOUNT_PATHS, paddle::CURRENCY_PATHS),
        Provider::LemonSqueezy => (lemonsqueezy::AMOUNT_PATHS, lemonsqueezy::CURRENCY_PATHS),
    };

    let amount = amount_paths
        .iter()
        .find_map(|path| lookup_path(metadata, path).and_then(coerce_amount))
        .unwrap_or(0);

    let currency = currency_paths
        .iter()
        .find_map(|path| lookup_path(metadata, path).and_then(|v| v.as_str()))
        .map(str::to_uppercase)
        .unwrap_or_else(|| "USD".to_string());

    (amount, currency)
}

/// Run a provider API call with bounded exponential backoff.
///
/// Retries only on [`crate::error::Error::is_retryable`] failures (429,
/// 5xx, transport errors). Never call this while holding a store lock or
/// inside a database transaction.
pub(crate) async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    operation: &str,
    operation_fn: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        match operation_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempts < retry.max_retries => {
                let delay = (retry.base_delay_ms * 2u64.saturating_pow(attempts))
                    .min(retry.max_delay_ms);
                tracing::warn!(
                    target: "paysync::providers",
                    operation = %operation,
                    attempt = attempts + 1,
                    delay_ms = delay,
                    error = %e,
                    "provider call failed, retrying"
                );
                sleep(Duration::from_millis(delay)).await;
                attempts += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Mock catalog client for tests.
#[cfg(any(test, feature = "test-store"))]
pub mod test {
    use super::*;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// In-memory catalog client. Seed it with a remote catalog and inspect
    /// the create calls it received.
    #[derive(Clone)]
    pub struct MockCatalogClient {
        provider: Provider,
        prices_immutable: bool,
        default_variants: bool,
        catalog: Arc<Mutex<RemoteCatalog>>,
        pub created_products: Arc<Mutex<Vec<String>>>,
        pub created_prices: Arc<Mutex<Vec<String>>>,
        pub updated_products: Arc<Mutex<Vec<String>>>,
        pub updated_prices: Arc<Mutex<Vec<String>>>,
    }

    impl MockCatalogClient {
        #[must_use]
        pub fn new(provider: Provider) -> Self {
            Self {
                provider,
                prices_immutable: true,
                default_variants: provider == Provider::LemonSqueezy,
                catalog: Arc::new(Mutex::new(RemoteCatalog::default())),
                created_products: Arc::new(Mutex::new(Vec::new())),
                created_prices: Arc::new(Mutex::new(Vec::new())),
                updated_products: Arc::new(Mutex::new(Vec::new())),
                updated_prices: Arc::new(Mutex::new(Vec::new())),
            }
        }

        #[must_use]
        pub fn with_default_variants(mut self, enabled: bool) -> Self {
            self.default_variants = enabled;
            self
        }

        pub fn seed(&self, catalog: RemoteCatalog) {
            *self.catalog.lock().unwrap() = catalog;
        }
    }

    #[async_trait]
    impl CatalogClient for MockCatalogClient {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn prices_immutable(&self) -> bool {
            self.prices_immutable
        }

        fn has_default_variants(&self) -> bool {
            self.default_variants
        }

        async fn list_catalog(&self) -> Result<RemoteCatalog> {
            Ok(self.catalog.lock().unwrap().clone())
        }

        async fn create_product(&self, product: &Product) -> Result<RemoteProduct> {
            let remote = RemoteProduct {
                provider_id: format!("rp_{}", Uuid::new_v4().simple()),
                key: Some(product.key.clone()),
                name: product.name.clone(),
                summary: product.summary.clone(),
                active: product.active,
            };
            self.created_products.lock().unwrap().push(product.key.clone());
            self.catalog.lock().unwrap().products.push(remote.clone());
            Ok(remote)
        }

        async fn update_product(&self, provider_id: &str, _product: &Product) -> Result<()> {
            self.updated_products
                .lock()
                .unwrap()
                .push(provider_id.to_string());
            Ok(())
        }

        async fn create_price(
            &self,
            remote_product_id: &str,
            product: &Product,
            price: &Price,
        ) -> Result<RemotePrice> {
            let remote = RemotePrice {
                provider_id: format!("rpr_{}", Uuid::new_v4().simple()),
                product_provider_id: remote_product_id.to_string(),
                product_key: Some(product.key.clone()),
                price_key: Some(price.key.clone()),
                amount: Some(price.amount),
                currency: Some(price.currency.clone()),
                interval: Some(price.interval),
                interval_count: price.interval_count,
                active: price.active,
            };
            self.created_prices
                .lock()
                .unwrap()
                .push(format!("{}:{}", product.key, price.key));
            self.catalog.lock().unwrap().prices.push(remote.clone());
            Ok(remote)
        }

        async fn update_price(&self, provider_id: &str, _price: &Price) -> Result<()> {
            self.updated_prices
                .lock()
                .unwrap()
                .push(provider_id.to_string());
            Ok(())
        }
    }
}
