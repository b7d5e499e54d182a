//! Paddle adapter: webhook payload parsing and catalog API client.
//!
//! Paddle (Billing API) wraps events as `{event_id, event_type, data}` and
//! sends monetary amounts as decimal strings in minor units. Transactions
//! double as both orders and invoices; checkout completion arrives as
//! `transaction.completed`.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{PaddleConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::model::{BillingInterval, OrderStatus, Price, Product, Provider, SubscriptionStatus};

use super::{
    CatalogClient, CatalogObjectUpdate, CheckoutUpdate, CustomerUpdate, InvoiceUpdate, LineUpdate,
    OrderUpdate, RemoteCatalog, RemotePrice, RemoteProduct, SubscriptionUpdate, rfc3339_to_utc,
    with_retry,
};

/// Metadata path list for resolving a subscription's recurring amount from
/// its stored snapshot, probed in order. Paddle nests the unit price inside
/// the first item; amounts are decimal strings.
pub const AMOUNT_PATHS: &[&str] = &[
    "items.0.price.unit_price.amount",
    "items.0.unit_price.amount",
];

/// Metadata path list for the subscription currency, probed in order.
pub const CURRENCY_PATHS: &[&str] = &[
    "currency_code",
    "items.0.price.unit_price.currency_code",
];

/// Normalize a Paddle subscription status string.
#[must_use]
pub fn subscription_status(raw: &str) -> SubscriptionStatus {
    match raw {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" => SubscriptionStatus::PastDue,
        "paused" => SubscriptionStatus::Paused,
        "canceled" => SubscriptionStatus::Canceled,
        _ => SubscriptionStatus::Canceled,
    }
}

/// Normalize a Paddle transaction status into the closed order enum.
#[must_use]
pub fn order_status(raw: &str) -> OrderStatus {
    match raw {
        "draft" | "ready" | "billed" => OrderStatus::Pending,
        "paid" => OrderStatus::Paid,
        "completed" => OrderStatus::Completed,
        "canceled" | "past_due" => OrderStatus::Failed,
        _ => OrderStatus::Pending,
    }
}

fn data(payload: &serde_json::Value) -> Result<&serde_json::Value> {
    payload
        .get("data")
        .ok_or_else(|| Error::invalid_payload("Paddle event missing data"))
}

fn parse_data<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(data(payload)?.clone())
        .map_err(|e| Error::invalid_payload(format!("Paddle object: {e}")))
}

fn parse_amount(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

// ============================================================================
// Typed event objects
// ============================================================================

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

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
    #[serde(default)]
    items: Vec<SubscriptionItem>,
    #[serde(default)]
    custom_data: Option<CustomData>,
    #[serde(default)]
    current_billing_period: Option<BillingPeriod>,
    #[serde(default)]
    scheduled_change: Option<ScheduledChange>,
    #[serde(default)]
    canceled_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
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
struct BillingPeriod {
    #[serde(default)]
    ends_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduledChange {
    action: String,
    #[serde(default)]
    effective_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionObject {
    id: String,
    status: String,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    subscription_id: Option<String>,
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    custom_data: Option<CustomData>,
    #[serde(default)]
    details: Option<TransactionDetails>,
    #[serde(default)]
    billed_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TransactionDetails {
    #[serde(default)]
    totals: Option<Totals>,
    #[serde(default)]
    line_items: Vec<TransactionLine>,
}

#[derive(Debug, Deserialize)]
struct Totals {
    #[serde(default)]
    subtotal: Option<String>,
    #[serde(default)]
    tax: Option<String>,
    #[serde(default)]
    total: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionLine {
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    totals: Option<LineTotals>,
    #[serde(default)]
    product: Option<ProductRef>,
}

#[derive(Debug, Deserialize)]
struct LineTotals {
    #[serde(default)]
    total: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProductRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerObject {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    custom_data: Option<CustomData>,
}

#[derive(Debug, Deserialize)]
struct CatalogObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

// ============================================================================
// Parse functions
// ============================================================================

pub fn subscription_update(payload: &serde_json::Value) -> Result<SubscriptionUpdate> {
    let object: SubscriptionObject = parse_data(payload)?;
    let snapshot = data(payload)?.clone();
    let custom = object.custom_data.unwrap_or_default();

    let status = subscription_status(&object.status);
    let period_end = object
        .current_billing_period
        .as_ref()
        .and_then(|p| rfc3339_to_utc(p.ends_at.as_deref()));

    // Paddle reports the trial through the billing period while trialing.
    let trial_ends_at = if status.is_trialing() { period_end } else { None };

    let ends_at = object
        .scheduled_change
        .as_ref()
        .filter(|c| c.action == "cancel")
        .and_then(|c| rfc3339_to_utc(c.effective_at.as_deref()));

    Ok(SubscriptionUpdate {
        provider: Provider::Paddle,
        provider_id: object.id,
        owner_id: custom.owner_id,
        plan_key: custom.plan_key,
        price_provider_id: object
            .items
            .first()
            .and_then(|i| i.price.as_ref())
            .map(|p| p.id.clone()),
        status,
        quantity: object.items.first().and_then(|i| i.quantity).unwrap_or(1),
        trial_ends_at,
        renews_at: period_end,
        ends_at,
        canceled_at: rfc3339_to_utc(object.canceled_at.as_deref()),
        metadata: snapshot,
    })
}

pub fn order_update(payload: &serde_json::Value) -> Result<OrderUpdate> {
    let object: TransactionObject = parse_data(payload)?;
    let custom = object.custom_data.unwrap_or_default();
    let totals = object.details.as_ref().and_then(|d| d.totals.as_ref());
    let status = order_status(&object.status);

    Ok(OrderUpdate {
        provider: Provider::Paddle,
        provider_id: object.id,
        owner_id: custom.owner_id,
        status,
        amount: parse_amount(totals.and_then(|t| t.total.as_deref())),
        currency: object.currency_code.unwrap_or_default().to_uppercase(),
        paid_at: if matches!(status, OrderStatus::Paid | OrderStatus::Completed) {
            rfc3339_to_utc(object.billed_at.as_deref())
        } else {
            None
        },
        refunded_at: None,
    })
}

pub fn invoice_update(event_type: &str, payload: &serde_json::Value) -> Result<InvoiceUpdate> {
    let object: TransactionObject = parse_data(payload)?;
    let details = object.details.unwrap_or_default();
    let totals = details.totals.as_ref();
    let status = order_status(&object.status);

    let total = parse_amount(totals.and_then(|t| t.total.as_deref()));
    let paid = matches!(status, OrderStatus::Paid | OrderStatus::Completed);

    let lines = details
        .line_items
        .iter()
        .map(|line| {
            let quantity = line.quantity.unwrap_or(1).max(1);
            let amount = parse_amount(line.totals.as_ref().and_then(|t| t.total.as_deref()));
            LineUpdate {
                description: line
                    .product
                    .as_ref()
                    .and_then(|p| p.name.clone())
                    .unwrap_or_default(),
                quantity,
                unit_amount: amount / i64::from(quantity),
                amount,
            }
        })
        .collect();

    let transaction_id = object.id;
    Ok(InvoiceUpdate {
        provider: Provider::Paddle,
        provider_id: transaction_id.clone(),
        order_provider_id: Some(transaction_id),
        subscription_provider_id: object.subscription_id,
        status: Some(object.status),
        amount_due: total,
        amount_paid: if paid { total } else { 0 },
        subtotal: parse_amount(totals.and_then(|t| t.subtotal.as_deref())),
        tax_amount: parse_amount(totals.and_then(|t| t.tax.as_deref())),
        tax_rate: None,
        currency: object.currency_code.unwrap_or_default().to_uppercase(),
        hosted_url: None,
        pdf_url: None,
        pdf_url_expires_at: None,
        lines,
        payment_failed: event_type == "transaction.payment_failed",
    })
}

pub fn customer_update(payload: &serde_json::Value) -> Result<CustomerUpdate> {
    let object: CustomerObject = parse_data(payload)?;
    let custom = object.custom_data.unwrap_or_default();
    Ok(CustomerUpdate {
        provider: Provider::Paddle,
        provider_id: object.id,
        owner_id: custom.owner_id,
        email: object.email,
        name: object.name,
    })
}

pub fn checkout_update(payload: &serde_json::Value) -> Result<CheckoutUpdate> {
    let object: TransactionObject = parse_data(payload)?;
    let snapshot = data(payload)?.clone();
    let custom = object.custom_data.unwrap_or_default();
    let totals = object.details.as_ref().and_then(|d| d.totals.as_ref());
    let status = order_status(&object.status);

    let customer = object.customer_id.as_ref().map(|id| CustomerUpdate {
        provider: Provider::Paddle,
        provider_id: id.clone(),
        owner_id: custom.owner_id.clone(),
        email: None,
        name: None,
    });

    Ok(CheckoutUpdate {
        provider: Provider::Paddle,
        provider_id: object.id,
        owner_id: custom.owner_id,
        plan_key: custom.plan_key,
        price_key: custom.price_key,
        discount_code: custom.discount_code,
        subscription_provider_id: object.subscription_id,
        customer,
        paid: matches!(status, OrderStatus::Paid | OrderStatus::Completed),
        amount: parse_amount(totals.and_then(|t| t.total.as_deref())),
        currency: object.currency_code.unwrap_or_default().to_uppercase(),
        metadata: snapshot,
    })
}

/// Product/price catalog events. Paddle archives rather than deletes;
/// archived objects deactivate the local record.
pub fn catalog_object_update(payload: &serde_json::Value) -> Result<CatalogObjectUpdate> {
    let object: CatalogObject = parse_data(payload)?;
    Ok(CatalogObjectUpdate {
        provider: Provider::Paddle,
        provider_id: object.id,
        active: object.status.as_deref() != Some("archived"),
        name: object.name,
        summary: object.description,
    })
}

// ============================================================================
// Catalog client
// ============================================================================

const API_BASE: &str = "https://api.paddle.com";
const SANDBOX_API_BASE: &str = "https://sandbox-api.paddle.com";
const PAGE_LIMIT: &str = "200";

/// Paddle catalog API client (JSON REST, bearer auth).
pub struct PaddleCatalogClient {
    http: reqwest::Client,
    api_key: SecretString,
    retry: RetryConfig,
    base_url: String,
}

impl PaddleCatalogClient {
    pub fn new(config: &PaddleConfig, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(retry.timeout_seconds))
            .build()
            .map_err(|e| Error::provider_api(Provider::Paddle, "client_init", e.to_string(), None))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            retry,
            base_url: if config.sandbox {
                SANDBOX_API_BASE.to_string()
            } else {
                API_BASE.to_string()
            },
        })
    }

    async fn get_json(&self, operation: &str, path_and_query: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Error::provider_api(Provider::Paddle, operation, e.to_string(), None))?;
        read_json(operation, response).await
    }

    async fn send_json(
        &self,
        operation: &str,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .request(method, &url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| Error::provider_api(Provider::Paddle, operation, e.to_string(), None))?;
        read_json(operation, response).await
    }

    async fn list_all(&self, operation: &str, path: &str) -> Result<Vec<serde_json::Value>> {
        let mut items = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let query = match &after {
                Some(cursor) => format!("{path}?per_page={PAGE_LIMIT}&after={cursor}"),
                None => format!("{path}?per_page={PAGE_LIMIT}"),
            };
            let page = with_retry(&self.retry, operation, || self.get_json(operation, &query))
                .await?;

            let data = page
                .get("data")
                .and_then(|d| d.as_array())
                .cloned()
                .unwrap_or_default();
            let has_more = page
                .get("meta")
                .and_then(|m| m.get("pagination"))
                .and_then(|p| p.get("has_more"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            after = data
                .last()
                .and_then(|v| v.get("id"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            items.extend(data);

            if !has_more || after.is_none() {
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
            Provider::Paddle,
            operation,
            body,
            Some(status.as_u16()),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| Error::provider_api(Provider::Paddle, operation, e.to_string(), None))
}

fn remote_product_from_value(value: &serde_json::Value) -> RemoteProduct {
    RemoteProduct {
        provider_id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        key: value
            .get("custom_data")
            .and_then(|m| m.get("product_key"))
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
        active: value.get("status").and_then(|v| v.as_str()) != Some("archived"),
    }
}

fn remote_price_from_value(value: &serde_json::Value) -> RemotePrice {
    let custom = value.get("custom_data");
    let unit_price = value.get("unit_price");
    let cycle = value.get("billing_cycle").filter(|v| !v.is_null());

    RemotePrice {
        provider_id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        product_provider_id: value
            .get("product_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        product_key: custom
            .and_then(|m| m.get("product_key"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        price_key: custom
            .and_then(|m| m.get("price_key"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        amount: unit_price
            .and_then(|p| p.get("amount"))
            .and_then(super::coerce_amount),
        currency: unit_price
            .and_then(|p| p.get("currency_code"))
            .and_then(|v| v.as_str())
            .map(str::to_uppercase),
        interval: Some(match cycle.and_then(|c| c.get("interval")).and_then(|v| v.as_str()) {
            Some(interval) => BillingInterval::parse(interval),
            None => BillingInterval::Once,
        }),
        interval_count: cycle
            .and_then(|c| c.get("frequency"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32,
        active: value.get("status").and_then(|v| v.as_str()) != Some("archived"),
    }
}

#[async_trait::async_trait]
impl CatalogClient for PaddleCatalogClient {
    fn provider(&self) -> Provider {
        Provider::Paddle
    }

    fn prices_immutable(&self) -> bool {
        // The exporter reports price updates without calling the API.
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
        let body = serde_json::json!({
            "name": product.name,
            "description": product.summary,
            "tax_category": "standard",
            "custom_data": {"product_key": product.key},
        });
        let value = with_retry(&self.retry, "create_product", || {
            self.send_json("create_product", reqwest::Method::POST, "/products", &body)
        })
        .await?;
        Ok(remote_product_from_value(
            value.get("data").unwrap_or(&value),
        ))
    }

    async fn update_product(&self, provider_id: &str, product: &Product) -> Result<()> {
        let body = serde_json::json!({
            "name": product.name,
            "description": product.summary,
            "status": if product.active { "active" } else { "archived" },
        });
        let path = format!("/products/{provider_id}");
        with_retry(&self.retry, "update_product", || {
            self.send_json("update_product", reqwest::Method::PATCH, &path, &body)
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
        let billing_cycle = if price.interval == BillingInterval::Once {
            serde_json::Value::Null
        } else {
            serde_json::json!({
                "interval": price.interval.as_str(),
                "frequency": price.interval_count,
            })
        };
        let body = serde_json::json!({
            "product_id": remote_product_id,
            "description": price.label.clone().unwrap_or_else(|| price.key.clone()),
            "unit_price": {
                "amount": price.amount.to_string(),
                "currency_code": price.currency,
            },
            "billing_cycle": billing_cycle,
            "custom_data": {"product_key": product.key, "price_key": price.key},
        });
        let value = with_retry(&self.retry, "create_price", || {
            self.send_json("create_price", reqwest::Method::POST, "/prices", &body)
        })
        .await?;
        Ok(remote_price_from_value(value.get("data").unwrap_or(&value)))
    }

    async fn update_price(&self, provider_id: &str, price: &Price) -> Result<()> {
        let body = serde_json::json!({
            "status": if price.active { "active" } else { "archived" },
        });
        let path = format!("/prices/{provider_id}");
        with_retry(&self.retry, "update_price", || {
            self.send_json("update_price", reqwest::Method::PATCH, &path, &body)
        })
        .await?;
        Ok(())
    }
}
