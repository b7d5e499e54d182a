//! Lemon Squeezy adapter: webhook payload parsing and catalog API client.
//!
//! Lemon Squeezy is a JSON:API storefront: events arrive as
//! `{meta: {event_name, custom_data}, data: {id, attributes}}` with no
//! first-class event id (the envelope derives one), numeric entity ids in
//! attributes, and a dashboard-managed catalog — products and variants
//! cannot be created through the API, so the exporter can only link or
//! claim existing objects and reports everything else as a warning.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{LemonSqueezyConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::model::{BillingInterval, OrderStatus, Price, Product, Provider, SubscriptionStatus};

use super::{
    CatalogClient, CheckoutUpdate, CustomerUpdate, InvoiceUpdate, OrderUpdate, RemoteCatalog,
    RemotePrice, RemoteProduct, SubscriptionUpdate, rfc3339_to_utc, with_retry,
};

/// Metadata path list for resolving a subscription's recurring amount from
/// its stored snapshot, probed in order. Lemon Squeezy subscription
/// payloads do not carry the unit price directly; the order-total paths
/// cover snapshots taken from payment events.
pub const AMOUNT_PATHS: &[&str] = &[
    "attributes.first_subscription_item.price",
    "attributes.total",
    "attributes.subtotal",
];

/// Metadata path list for the subscription currency, probed in order.
pub const CURRENCY_PATHS: &[&str] = &["attributes.currency"];

/// The name Lemon Squeezy gives the variant it auto-creates per product.
const DEFAULT_VARIANT_NAME: &str = "Default";

/// Normalize a Lemon Squeezy subscription status string.
#[must_use]
pub fn subscription_status(raw: &str) -> SubscriptionStatus {
    match raw {
        "active" => SubscriptionStatus::Active,
        "on_trial" => SubscriptionStatus::Trialing,
        "past_due" => SubscriptionStatus::PastDue,
        "cancelled" => SubscriptionStatus::Canceled,
        "expired" => SubscriptionStatus::Expired,
        "paused" => SubscriptionStatus::Paused,
        "unpaid" => SubscriptionStatus::Unpaid,
        _ => SubscriptionStatus::Canceled,
    }
}

/// Normalize a Lemon Squeezy order status into the closed order enum.
#[must_use]
pub fn order_status(raw: &str) -> OrderStatus {
    match raw {
        "pending" => OrderStatus::Pending,
        "paid" => OrderStatus::Paid,
        "failed" => OrderStatus::Failed,
        "refunded" => OrderStatus::Refunded,
        "partial_refund" => OrderStatus::PartiallyRefunded,
        _ => OrderStatus::Pending,
    }
}

fn data(payload: &serde_json::Value) -> Result<&serde_json::Value> {
    payload
        .get("data")
        .ok_or_else(|| Error::invalid_payload("Lemon Squeezy event missing data"))
}

fn parse_data<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(data(payload)?.clone())
        .map_err(|e| Error::invalid_payload(format!("Lemon Squeezy object: {e}")))
}

fn custom_data(payload: &serde_json::Value) -> CustomData {
    payload
        .get("meta")
        .and_then(|m| m.get("custom_data"))
        .and_then(|c| serde_json::from_value(c.clone()).ok())
        .unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
struct CustomData {
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    plan_key: Option<String>,
    #[serde(default)]
    price_key: Option<String>,
    #[serde(default)]
    discount_code: Option<String>,
}

// ============================================================================
// Typed event objects
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubscriptionData {
    id: String,
    attributes: SubscriptionAttributes,
}

#[derive(Debug, Deserialize)]
struct SubscriptionAttributes {
    status: String,
    #[serde(default)]
    trial_ends_at: Option<String>,
    #[serde(default)]
    renews_at: Option<String>,
    #[serde(default)]
    ends_at: Option<String>,
    #[serde(default)]
    cancelled: bool,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    first_subscription_item: Option<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    #[serde(default)]
    price_id: Option<i64>,
    #[serde(default)]
    quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    id: String,
    attributes: OrderAttributes,
}

#[derive(Debug, Deserialize)]
struct OrderAttributes {
    status: String,
    #[serde(default)]
    customer_id: Option<i64>,
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    refunded_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceData {
    id: String,
    attributes: InvoiceAttributes,
}

#[derive(Debug, Deserialize)]
struct InvoiceAttributes {
    #[serde(default)]
    subscription_id: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    subtotal: i64,
    #[serde(default)]
    tax: i64,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    urls: Option<InvoiceUrls>,
}

#[derive(Debug, Deserialize)]
struct InvoiceUrls {
    #[serde(default)]
    invoice_url: Option<String>,
}

// ============================================================================
// Parse functions
// ============================================================================

pub fn subscription_update(payload: &serde_json::Value) -> Result<SubscriptionUpdate> {
    let object: SubscriptionData = parse_data(payload)?;
    let snapshot = data(payload)?.clone();
    let custom = custom_data(payload);
    let attributes = object.attributes;

    let status = subscription_status(&attributes.status);

    // `cancelled` with a future `ends_at` is the grace period; the webhook
    // still reports status "active" until the period lapses.
    let canceled_at = if attributes.cancelled {
        rfc3339_to_utc(attributes.updated_at.as_deref())
    } else {
        None
    };

    Ok(SubscriptionUpdate {
        provider: Provider::LemonSqueezy,
        provider_id: object.id,
        owner_id: custom.owner_id,
        plan_key: custom.plan_key,
        price_provider_id: attributes
            .first_subscription_item
            .as_ref()
            .and_then(|i| i.price_id)
            .map(|id| id.to_string()),
        status,
        quantity: attributes
            .first_subscription_item
            .as_ref()
            .and_then(|i| i.quantity)
            .unwrap_or(1),
        trial_ends_at: rfc3339_to_utc(attributes.trial_ends_at.as_deref()),
        renews_at: rfc3339_to_utc(attributes.renews_at.as_deref()),
        ends_at: rfc3339_to_utc(attributes.ends_at.as_deref()),
        canceled_at,
        metadata: snapshot,
    })
}

pub fn order_update(payload: &serde_json::Value) -> Result<OrderUpdate> {
    let object: OrderData = parse_data(payload)?;
    let custom = custom_data(payload);
    let attributes = object.attributes;
    let status = order_status(&attributes.status);

    Ok(OrderUpdate {
        provider: Provider::LemonSqueezy,
        provider_id: object.id,
        owner_id: custom.owner_id,
        status,
        amount: attributes.total,
        currency: attributes.currency.unwrap_or_default().to_uppercase(),
        paid_at: if status == OrderStatus::Paid {
            rfc3339_to_utc(attributes.created_at.as_deref())
        } else {
            None
        },
        refunded_at: rfc3339_to_utc(attributes.refunded_at.as_deref()),
    })
}

pub fn invoice_update(event_type: &str, payload: &serde_json::Value) -> Result<InvoiceUpdate> {
    let object: InvoiceData = parse_data(payload)?;
    let attributes = object.attributes;

    let paid = attributes.status.as_deref() == Some("paid");
    let hosted_url = attributes.urls.and_then(|u| u.invoice_url);

    // Invoice URLs are signed and lapse after a day; the stored expiry lets
    // readers know when a re-fetch is needed.
    let pdf_url_expires_at = hosted_url
        .as_ref()
        .map(|_| chrono::Utc::now() + chrono::Duration::hours(24));

    Ok(InvoiceUpdate {
        provider: Provider::LemonSqueezy,
        provider_id: object.id,
        order_provider_id: None,
        subscription_provider_id: attributes.subscription_id.map(|id| id.to_string()),
        status: attributes.status,
        amount_due: attributes.total,
        amount_paid: if paid { attributes.total } else { 0 },
        subtotal: attributes.subtotal,
        tax_amount: attributes.tax,
        tax_rate: None,
        currency: attributes.currency.unwrap_or_default().to_uppercase(),
        hosted_url: hosted_url.clone(),
        pdf_url: hosted_url,
        pdf_url_expires_at,
        lines: Vec::new(),
        payment_failed: event_type == "subscription_payment_failed",
    })
}

pub fn checkout_update(payload: &serde_json::Value) -> Result<CheckoutUpdate> {
    let object: OrderData = parse_data(payload)?;
    let snapshot = data(payload)?.clone();
    let custom = custom_data(payload);
    let attributes = object.attributes;
    let status = order_status(&attributes.status);

    let customer = attributes.customer_id.map(|id| CustomerUpdate {
        provider: Provider::LemonSqueezy,
        provider_id: id.to_string(),
        owner_id: custom.owner_id.clone(),
        email: attributes.user_email.clone(),
        name: attributes.user_name.clone(),
    });

    Ok(CheckoutUpdate {
        provider: Provider::LemonSqueezy,
        provider_id: object.id,
        owner_id: custom.owner_id,
        plan_key: custom.plan_key,
        price_key: custom.price_key,
        discount_code: custom.discount_code,
        // The subscription arrives on its own subscription_created event.
        subscription_provider_id: None,
        customer,
        paid: status == OrderStatus::Paid,
        amount: attributes.total,
        currency: attributes.currency.unwrap_or_default().to_uppercase(),
        metadata: snapshot,
    })
}

// ============================================================================
// Catalog client
// ============================================================================

const API_BASE: &str = "https://api.lemonsqueezy.com/v1";
const PAGE_SIZE: &str = "100";

/// Lemon Squeezy catalog API client (JSON:API, bearer auth).
///
/// The catalog is dashboard-managed: list works, create/update do not, and
/// report as unsupported so reconciliation surfaces them as warnings.
pub struct LemonSqueezyCatalogClient {
    http: reqwest::Client,
    api_key: SecretString,
    store_id: String,
    retry: RetryConfig,
    base_url: String,
}

impl LemonSqueezyCatalogClient {
    pub fn new(config: &LemonSqueezyConfig, retry: RetryConfig) -> Result<Self> {
        if config.store_id.is_empty() {
            return Err(Error::config_missing("PAYSYNC_LEMON_SQUEEZY_STORE_ID"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(retry.timeout_seconds))
            .build()
            .map_err(|e| {
                Error::provider_api(Provider::LemonSqueezy, "client_init", e.to_string(), None)
            })?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            store_id: config.store_id.clone(),
            retry,
            base_url: API_BASE.to_string(),
        })
    }

    async fn get_json(&self, operation: &str, path_and_query: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.api_key.expose_secret())
            .header("Accept", "application/vnd.api+json")
            .send()
            .await
            .map_err(|e| {
                Error::provider_api(Provider::LemonSqueezy, operation, e.to_string(), None)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_api(
                Provider::LemonSqueezy,
                operation,
                body,
                Some(status.as_u16()),
            ));
        }
        response.json().await.map_err(|e| {
            Error::provider_api(Provider::LemonSqueezy, operation, e.to_string(), None)
        })
    }

    /// Fetch every page of a JSON:API list endpoint.
    async fn list_all(&self, operation: &str, path: &str) -> Result<Vec<serde_json::Value>> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let query = format!(
                "{path}?filter[store_id]={}&page[size]={PAGE_SIZE}&page[number]={page}",
                self.store_id
            );
            let body = with_retry(&self.retry, operation, || self.get_json(operation, &query))
                .await?;

            let data = body
                .get("data")
                .and_then(|d| d.as_array())
                .cloned()
                .unwrap_or_default();
            items.extend(data);

            let last_page = body
                .get("meta")
                .and_then(|m| m.get("page"))
                .and_then(|p| p.get("lastPage"))
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32;

            if page >= last_page {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    fn unsupported(&self, operation: &str) -> Error {
        Error::provider_api(
            Provider::LemonSqueezy,
            operation,
            "the Lemon Squeezy catalog is dashboard-managed; create the object in the store and re-run the sync",
            Some(405),
        )
    }
}

fn remote_product_from_value(value: &serde_json::Value) -> RemoteProduct {
    let attributes = value.get("attributes");
    RemoteProduct {
        provider_id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        // The storefront slug is the only stable natural-key carrier.
        key: attributes
            .and_then(|a| a.get("slug"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        name: attributes
            .and_then(|a| a.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        summary: attributes
            .and_then(|a| a.get("description"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        active: attributes.and_then(|a| a.get("status")).and_then(|v| v.as_str())
            == Some("published"),
    }
}

fn remote_price_from_value(value: &serde_json::Value) -> RemotePrice {
    let attributes = value.get("attributes");
    let name = attributes
        .and_then(|a| a.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    // The auto-generated default variant carries no recognizable key and
    // lands in the unmapped pool, claimable by the first local price.
    let price_key = if name == DEFAULT_VARIANT_NAME || name.is_empty() {
        None
    } else {
        attributes
            .and_then(|a| a.get("slug"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let is_subscription = attributes
        .and_then(|a| a.get("is_subscription"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    RemotePrice {
        provider_id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        product_provider_id: attributes
            .and_then(|a| a.get("product_id"))
            .and_then(|v| v.as_i64())
            .map(|id| id.to_string())
            .unwrap_or_default(),
        // Filled from the parent product during list_catalog.
        product_key: None,
        price_key,
        amount: attributes.and_then(|a| a.get("price")).and_then(|v| v.as_i64()),
        currency: None,
        interval: Some(if is_subscription {
            BillingInterval::parse(
                attributes
                    .and_then(|a| a.get("interval"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("month"),
            )
        } else {
            BillingInterval::Once
        }),
        interval_count: attributes
            .and_then(|a| a.get("interval_count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32,
        active: attributes.and_then(|a| a.get("status")).and_then(|v| v.as_str())
            != Some("draft"),
    }
}

#[async_trait::async_trait]
impl CatalogClient for LemonSqueezyCatalogClient {
    fn provider(&self) -> Provider {
        Provider::LemonSqueezy
    }

    fn prices_immutable(&self) -> bool {
        true
    }

    fn has_default_variants(&self) -> bool {
        true
    }

    async fn list_catalog(&self) -> Result<RemoteCatalog> {
        let products: Vec<RemoteProduct> = self
            .list_all("list_products", "/products")
            .await?
            .iter()
            .map(remote_product_from_value)
            .collect();

        let mut prices: Vec<RemotePrice> = self
            .list_all("list_variants", "/variants")
            .await?
            .iter()
            .map(remote_price_from_value)
            .collect();

        // Variants do not know their product's key; join it in from the
        // parent so the composite natural-key slug resolves.
        for price in &mut prices {
            price.product_key = products
                .iter()
                .find(|p| p.provider_id == price.product_provider_id)
                .and_then(|p| p.key.clone());
        }

        Ok(RemoteCatalog { products, prices })
    }

    async fn create_product(&self, _product: &Product) -> Result<RemoteProduct> {
        Err(self.unsupported("create_product"))
    }

    async fn update_product(&self, _provider_id: &str, _product: &Product) -> Result<()> {
        Err(self.unsupported("update_product"))
    }

    async fn create_price(
        &self,
        _remote_product_id: &str,
        _product: &Product,
        _price: &Price,
    ) -> Result<RemotePrice> {
        Err(self.unsupported("create_price"))
    }

    async fn update_price(&self, _provider_id: &str, _price: &Price) -> Result<()> {
        Err(self.unsupported("update_price"))
    }
}
