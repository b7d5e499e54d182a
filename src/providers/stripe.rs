//! Stripe adapter: webhook payload parsing and catalog API client.
//!
//! Stripe wraps every event as `{id, type, data: {object}}`; the typed
//! structs below deserialize `data.object` once per event. The catalog API
//! is form-encoded REST.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::{RetryConfig, StripeConfig};
use crate::error::{Error, Result};
use crate::model::{BillingInterval, Price, Product, Provider, SubscriptionStatus};

use super::{
    CatalogClient, CatalogObjectUpdate, CheckoutUpdate, CustomerUpdate, InvoiceUpdate, LineUpdate,
    RemoteCatalog, RemotePrice, RemoteProduct, SubscriptionUpdate, epoch_to_utc, with_retry,
};

/// Metadata path list for resolving a subscription's recurring amount from
/// its stored snapshot, probed in order. The items path is current API
/// shape; `plan.amount` covers legacy subscriptions.
pub const AMOUNT_PATHS: &[&str] = &[
    "items.data.0.price.unit_amount",
    "items.data.0.plan.amount",
    "plan.amount",
];

/// Metadata path list for the subscription currency, probed in order.
pub const CURRENCY_PATHS: &[&str] = &[
    "items.data.0.price.currency",
    "plan.currency",
    "currency",
];

/// Metadata keys the engine writes onto Stripe objects it creates.
const META_PRODUCT_KEY: &str = "product_key";
const META_PRICE_KEY: &str = "price_key";

/// Normalize a Stripe subscription status string.
#[must_use]
pub fn subscription_status(raw: &str) -> SubscriptionStatus {
    match raw {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" => SubscriptionStatus::PastDue,
        "canceled" => SubscriptionStatus::Canceled,
        "incomplete" => SubscriptionStatus::Incomplete,
        "incomplete_expired" => SubscriptionStatus::Expired,
        "paused" => SubscriptionStatus::Paused,
        "unpaid" => SubscriptionStatus::Unpaid,
        _ => SubscriptionStatus::Canceled,
    }
}

/// Extract `data.object` from a Stripe event payload.
fn data_object(payload: &serde_json::Value) -> Result<&serde_json::Value> {
    payload
        .get("data")
        .and_then(|d| d.get("object"))
        .ok_or_else(|| Error::invalid_payload("Stripe event missing data.object"))
}

fn parse_object<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(data_object(payload)?.clone())
        .map_err(|e| Error::invalid_payload(format!("Stripe object: {e}")))
}

// ============================================================================
// Typed event objects
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    items: ItemList,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    trial_end: Option<i64>,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at: Option<i64>,
    #[serde(default)]
    canceled_at: Option<i64>,
    #[serde(default)]
    ended_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemList {
    #[serde(default)]
    data: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    price: Option<PriceRef>,
    #[serde(default)]
    quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PriceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: String,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount_due: i64,
    #[serde(default)]
    amount_paid: i64,
    #[serde(default)]
    subtotal: i64,
    #[serde(default)]
    tax: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    hosted_invoice_url: Option<String>,
    #[serde(default)]
    invoice_pdf: Option<String>,
    #[serde(default)]
    lines: LineList,
}

#[derive(Debug, Default, Deserialize)]
struct LineList {
    #[serde(default)]
    data: Vec<LineObject>,
}

#[derive(Debug, Deserialize)]
struct LineObject {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct CustomerObject {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Parse functions (one typed parse per event)
// ============================================================================

pub fn subscription_update(payload: &serde_json::Value) -> Result<SubscriptionUpdate> {
    let object: SubscriptionObject = parse_object(payload)?;
    let snapshot = data_object(payload)?.clone();

    let first_item = object.items.data.first();
    let quantity = object
        .quantity
        .or_else(|| first_item.and_then(|i| i.quantity))
        .unwrap_or(1);

    Ok(SubscriptionUpdate {
        provider: Provider::Stripe,
        provider_id: object.id,
        owner_id: object.metadata.get("owner_id").cloned(),
        plan_key: object.metadata.get("plan_key").cloned(),
        price_provider_id: first_item.and_then(|i| i.price.as_ref()).map(|p| p.id.clone()),
        status: subscription_status(&object.status),
        quantity,
        trial_ends_at: object.trial_end.and_then(epoch_to_utc),
        renews_at: object.current_period_end.and_then(epoch_to_utc),
        ends_at: object
            .ended_at
            .and_then(epoch_to_utc)
            .or_else(|| object.cancel_at.and_then(epoch_to_utc)),
        canceled_at: object.canceled_at.and_then(epoch_to_utc),
        metadata: snapshot,
    })
}

pub fn invoice_update(event_type: &str, payload: &serde_json::Value) -> Result<InvoiceUpdate> {
    let object: InvoiceObject = parse_object(payload)?;

    let lines = object
        .lines
        .data
        .iter()
        .map(|line| {
            let quantity = line.quantity.unwrap_or(1).max(1);
            LineUpdate {
                description: line.description.clone().unwrap_or_default(),
                quantity,
                unit_amount: line.amount / i64::from(quantity),
                amount: line.amount,
            }
        })
        .collect();

    Ok(InvoiceUpdate {
        provider: Provider::Stripe,
        provider_id: object.id,
        order_provider_id: None,
        subscription_provider_id: object.subscription,
        status: object.status,
        amount_due: object.amount_due,
        amount_paid: object.amount_paid,
        subtotal: object.subtotal,
        tax_amount: object.tax.unwrap_or(0),
        tax_rate: None,
        currency: object.currency.unwrap_or_default().to_uppercase(),
        hosted_url: object.hosted_invoice_url,
        pdf_url: object.invoice_pdf,
        pdf_url_expires_at: None,
        lines,
        payment_failed: event_type == "invoice.payment_failed",
    })
}

pub fn customer_update(payload: &serde_json::Value) -> Result<CustomerUpdate> {
    let object: CustomerObject = parse_object(payload)?;
    Ok(CustomerUpdate {
        provider: Provider::Stripe,
        provider_id: object.id,
        owner_id: object.metadata.get("owner_id").cloned(),
        email: object.email,
        name: object.name,
    })
}

pub fn checkout_update(payload: &serde_json::Value) -> Result<CheckoutUpdate> {
    let object: CheckoutSessionObject = parse_object(payload)?;
    let snapshot = data_object(payload)?.clone();

    let owner_id = object.metadata.get("owner_id").cloned();
    let customer = object.customer.as_ref().map(|customer_id| CustomerUpdate {
        provider: Provider::Stripe,
        provider_id: customer_id.clone(),
        owner_id: owner_id.clone(),
        email: object
            .customer_details
            .as_ref()
            .and_then(|d| d.email.clone()),
        name: object
            .customer_details
            .as_ref()
            .and_then(|d| d.name.clone()),
    });

    // `mode` distinguishes subscription checkouts from one-time payments;
    // the subscription id is only present for the former.
    let subscription_provider_id = match object.mode.as_deref() {
        Some("subscription") => object.subscription,
        _ => None,
    };

    Ok(CheckoutUpdate {
        provider: Provider::Stripe,
        provider_id: object.id,
        owner_id,
        plan_key: object.metadata.get("plan_key").cloned(),
        price_key: object.metadata.get("price_key").cloned(),
        discount_code: object.metadata.get("discount_code").cloned(),
        subscription_provider_id,
        customer,
        paid: object.payment_status.as_deref() == Some("paid"),
        amount: object.amount_total.unwrap_or(0),
        currency: object.currency.unwrap_or_default().to_uppercase(),
        metadata: snapshot,
    })
}

/// Product/price catalog events. Deletion events force `active = false`;
/// local records are soft-deactivated, never removed.
pub fn catalog_object_update(
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<CatalogObjectUpdate> {
    let object: CatalogObject = parse_object(payload)?;
    let deleted = event_type.ends_with(".deleted");
    Ok(CatalogObjectUpdate {
        provider: Provider::Stripe,
        provider_id: object.id,
        active: !deleted && object.active,
        name: object.name,
        summary: object.description,
    })
}

// ============================================================================
// Catalog client
// ============================================================================

const API_BASE: &str = "https://api.stripe.com/v1";
const PAGE_LIMIT: &str = "100";

/// Stripe catalog API client (form-encoded REST).
pub struct StripeCatalogClient {
    http: reqwest::Client,
    secret_key: SecretString,
    retry: RetryConfig,
    base_url: String,
}

impl StripeCatalogClient {
    pub fn new(config: &StripeConfig, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(retry.timeout_seconds))
            .build()
            .map_err(|e| Error::provider_api(Provider::Stripe, "client_init", e.to_string(), None))?;
        Ok(Self {
            http,
            secret_key: config.secret_key.clone(),
            retry,
            base_url: API_BASE.to_string(),
        })
    }

    async fn get_json(&self, operation: &str, path_and_query: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .http
            .get(&url)
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
            .send()
            .await
            .map_err(|e| Error::provider_api(Provider::Stripe, operation, e.to_string(), None))?;
        read_json(operation, response).await
    }

    async fn post_form(
        &self,
        operation: &str,
        path: &str,
        form: &[(String, String)],
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .form(form)
            .send()
            .await
            .map_err(|e| Error::provider_api(Provider::Stripe, operation, e.to_string(), None))?;
        read_json(operation, response).await
    }

    /// Fetch every page of a list endpoint.
    async fn list_all(&self, operation: &str, path: &str) -> Result<Vec<serde_json::Value>> {
        let mut items = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let query = match &starting_after {
                Some(cursor) => format!("{path}?limit={PAGE_LIMIT}&starting_after={cursor}"),
                None => format!("{path}?limit={PAGE_LIMIT}"),
            };
            let page = with_retry(&self.retry, operation, || {
                self.get_json(operation, &query)
            })
            .await?;

            let data = page
                .get("data")
                .and_then(|d| d.as_array())
                .cloned()
                .unwrap_or_default();
            let has_more = page.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false);

            starting_after = data
                .last()
                .and_then(|v| v.get("id"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            items.extend(data);

            if !has_more || starting_after.is_none() {
                break;
            }
        }

        Ok(items)
    }
}

async fn read_json(operation: &str, response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::provider_api(
            Provider::Stripe,
            operation,
            body,
            Some(status.as_u16()),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| Error::provider_api(Provider::Stripe, operation, e.to_string(), None))
}

fn remote_product_from_value(value: &serde_json::Value) -> RemoteProduct {
    RemoteProduct {
        provider_id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        key: value
            .get("metadata")
            .and_then(|m| m.get(META_PRODUCT_KEY))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        name: value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        summary: value
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        active: value.get("active").and_then(|v| v.as_bool()).unwrap_or(true),
    }
}

fn remote_price_from_value(value: &serde_json::Value) -> RemotePrice {
    let metadata = value.get("metadata");
    let recurring = value.get("recurring");
    RemotePrice {
        provider_id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        product_provider_id: value
            .get("product")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        product_key: metadata
            .and_then(|m| m.get(META_PRODUCT_KEY))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        price_key: metadata
            .and_then(|m| m.get(META_PRICE_KEY))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        amount: value.get("unit_amount").and_then(|v| v.as_i64()),
        currency: value
            .get("currency")
            .and_then(|v| v.as_str())
            .map(str::to_uppercase),
        interval: Some(match recurring.and_then(|r| r.get("interval")).and_then(|v| v.as_str()) {
            Some(interval) => BillingInterval::parse(interval),
            None => BillingInterval::Once,
        }),
        interval_count: recurring
            .and_then(|r| r.get("interval_count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32,
        active: value.get("active").and_then(|v| v.as_bool()).unwrap_or(true),
    }
}

#[async_trait::async_trait]
impl CatalogClient for StripeCatalogClient {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn prices_immutable(&self) -> bool {
        // Stripe prices cannot change amount/currency after creation.
        true
    }

    async fn list_catalog(&self) -> Result<RemoteCatalog> {
        let products = self.list_all("list_products", "/products").await?;
        let prices = self.list_all("list_prices", "/prices").await?;

        Ok(RemoteCatalog {
            products: products.iter().map(remote_product_from_value).collect(),
            prices: prices.iter().map(remote_price_from_value).collect(),
        })
    }

    async fn create_product(&self, product: &Product) -> Result<RemoteProduct> {
        let mut form = vec![
            ("name".to_string(), product.name.clone()),
            (
                format!("metadata[{META_PRODUCT_KEY}]"),
                product.key.clone(),
            ),
            ("active".to_string(), product.active.to_string()),
        ];
        if let Some(summary) = &product.summary {
            form.push(("description".to_string(), summary.clone()));
        }

        let value = with_retry(&self.retry, "create_product", || {
            self.post_form("create_product", "/products", &form)
        })
        .await?;
        Ok(remote_product_from_value(&value))
    }

    async fn update_product(&self, provider_id: &str, product: &Product) -> Result<()> {
        let mut form = vec![
            ("name".to_string(), product.name.clone()),
            ("active".to_string(), product.active.to_string()),
        ];
        if let Some(summary) = &product.summary {
            form.push(("description".to_string(), summary.clone()));
        }

        let path = format!("/products/{provider_id}");
        with_retry(&self.retry, "update_product", || {
            self.post_form("update_product", &path, &form)
        })
        .await?;
        Ok(())
    }

    async fn create_price(
        &self,
        remote_product_id: &str,
        product: &Product,
        price: &Price,
    ) -> Result<RemotePrice> {
        let mut form = vec![
            ("product".to_string(), remote_product_id.to_string()),
            ("unit_amount".to_string(), price.amount.to_string()),
            ("currency".to_string(), price.currency.to_lowercase()),
            (format!("metadata[{META_PRODUCT_KEY}]"), product.key.clone()),
            (format!("metadata[{META_PRICE_KEY}]"), price.key.clone()),
        ];
        if price.interval != BillingInterval::Once {
            form.push((
                "recurring[interval]".to_string(),
                price.interval.as_str().to_string(),
            ));
            form.push((
                "recurring[interval_count]".to_string(),
                price.interval_count.to_string(),
            ));
        }
        if let Some(label) = &price.label {
            form.push(("nickname".to_string(), label.clone()));
        }

        let value = with_retry(&self.retry, "create_price", || {
            self.post_form("create_price", "/prices", &form)
        })
        .await?;
        Ok(remote_price_from_value(&value))
    }

    async fn update_price(&self, provider_id: &str, price: &Price) -> Result<()> {
        // Amount and currency are immutable; only the active flag can move.
        let form = vec![("active".to_string(), price.active.to_string())];
        let path = format!("/prices/{provider_id}");
        with_retry(&self.retry, "update_price", || {
            self.post_form("update_price", &path, &form)
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, object: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "id": "evt_1",
            "type": event_type,
            "data": {"object": object}
        })
    }

    #[test]
    fn parses_subscription_object() {
        let payload = event(
            "customer.subscription.updated",
            serde_json::json!({
                "id": "sub_123",
                "customer": "cus_123",
                "status": "trialing",
                "items": {"data": [{
                    "id": "si_1",
                    "price": {"id": "price_abc", "unit_amount": 900, "currency": "usd"},
                    "quantity": 3
                }]},
                "metadata": {"owner_id": "team_7", "plan_key": "pro"},
                "trial_end": 1700000000i64,
                "current_period_end": 1702592000i64
            }),
        );

        let update = subscription_update(&payload).unwrap();
        assert_eq!(update.provider_id, "sub_123");
        assert_eq!(update.owner_id.as_deref(), Some("team_7"));
        assert_eq!(update.plan_key.as_deref(), Some("pro"));
        assert_eq!(update.price_provider_id.as_deref(), Some("price_abc"));
        assert_eq!(update.status, SubscriptionStatus::Trialing);
        assert_eq!(update.quantity, 3);
        assert_eq!(update.trial_ends_at.unwrap().timestamp(), 1700000000);
        assert_eq!(update.renews_at.unwrap().timestamp(), 1702592000);
        assert!(update.canceled_at.is_none());
    }

    #[test]
    fn unknown_status_maps_to_canceled() {
        assert_eq!(subscription_status("something_new"), SubscriptionStatus::Canceled);
    }

    #[test]
    fn parses_invoice_with_lines() {
        let payload = event(
            "invoice.payment_failed",
            serde_json::json!({
                "id": "in_9",
                "subscription": "sub_123",
                "status": "open",
                "amount_due": 1180,
                "amount_paid": 0,
                "subtotal": 1000,
                "tax": 180,
                "currency": "eur",
                "hosted_invoice_url": "https://invoice.stripe.com/i/abc",
                "invoice_pdf": "https://pay.stripe.com/invoice/abc/pdf",
                "lines": {"data": [
                    {"description": "Pro plan", "quantity": 2, "amount": 1000}
                ]}
            }),
        );

        let update = invoice_update("invoice.payment_failed", &payload).unwrap();
        assert_eq!(update.provider_id, "in_9");
        assert_eq!(update.subscription_provider_id.as_deref(), Some("sub_123"));
        assert_eq!(update.currency, "EUR");
        assert_eq!(update.tax_amount, 180);
        assert_eq!(update.subtotal, 1000);
        assert!(update.payment_failed);
        assert_eq!(update.lines.len(), 1);
        assert_eq!(update.lines[0].unit_amount, 500);
        assert_eq!(update.lines[0].amount, 1000);
    }

    #[test]
    fn parses_checkout_session() {
        let payload = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "mode": "subscription",
                "payment_status": "paid",
                "customer": "cus_9",
                "customer_details": {"email": "ada@example.com", "name": "Ada"},
                "subscription": "sub_55",
                "amount_total": 900,
                "currency": "usd",
                "metadata": {
                    "owner_id": "team_1",
                    "plan_key": "pro",
                    "discount_code": "LAUNCH20"
                }
            }),
        );

        let update = checkout_update(&payload).unwrap();
        assert!(update.paid);
        assert_eq!(update.subscription_provider_id.as_deref(), Some("sub_55"));
        assert_eq!(update.discount_code.as_deref(), Some("LAUNCH20"));
        assert_eq!(update.currency, "USD");

        let customer = update.customer.unwrap();
        assert_eq!(customer.provider_id, "cus_9");
        assert_eq!(customer.owner_id.as_deref(), Some("team_1"));
        assert_eq!(customer.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn payment_mode_checkout_has_no_subscription() {
        let payload = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_2",
                "mode": "payment",
                "payment_status": "paid",
                "subscription": "sub_should_be_ignored",
                "amount_total": 4900,
                "currency": "usd",
                "metadata": {"owner_id": "team_1"}
            }),
        );

        let update = checkout_update(&payload).unwrap();
        assert!(update.subscription_provider_id.is_none());
    }

    #[test]
    fn deleted_product_is_deactivated() {
        let payload = event(
            "product.deleted",
            serde_json::json!({"id": "prod_1", "name": "Pro", "active": true}),
        );
        let update = catalog_object_update("product.deleted", &payload).unwrap();
        assert!(!update.active);
        assert_eq!(update.provider_id, "prod_1");
    }

    #[test]
    fn remote_price_parsing_recognizes_metadata_keys() {
        let value = serde_json::json!({
            "id": "price_1",
            "product": "prod_1",
            "unit_amount": 900,
            "currency": "usd",
            "recurring": {"interval": "month", "interval_count": 1},
            "metadata": {"product_key": "pro", "price_key": "monthly"},
            "active": true
        });
        let remote = remote_price_from_value(&value);
        assert_eq!(remote.slug().as_deref(), Some("pro:monthly"));
        assert_eq!(remote.amount, Some(900));
        assert_eq!(remote.currency.as_deref(), Some("USD"));
        assert_eq!(remote.interval, Some(BillingInterval::Month));
    }

    #[test]
    fn remote_price_without_metadata_is_unmapped() {
        let value = serde_json::json!({
            "id": "price_default",
            "product": "prod_1",
            "unit_amount": 500,
            "currency": "usd"
        });
        let remote = remote_price_from_value(&value);
        assert!(remote.slug().is_none());
        assert_eq!(remote.interval, Some(BillingInterval::Once));
    }

    #[test]
    fn missing_data_object_is_invalid_payload() {
        let payload = serde_json::json!({"id": "evt_1", "type": "x"});
        assert!(matches!(
            subscription_update(&payload).unwrap_err(),
            Error::InvalidPayload { .. }
        ));
    }
}
