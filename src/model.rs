//! Core entities for the reconciliation engine.
//!
//! Cross-provider identity is always the `(provider, provider_id)` pair;
//! synthetic ids exist only so rows can reference each other locally.
//! Monetary amounts are integers in minor currency units and currencies are
//! upper-cased ISO codes. All timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An external payment platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Paddle,
    LemonSqueezy,
}

impl Provider {
    /// All supported providers.
    pub const ALL: [Provider; 3] = [Provider::Stripe, Provider::Paddle, Provider::LemonSqueezy];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paddle => "paddle",
            Self::LemonSqueezy => "lemon_squeezy",
        }
    }

    /// The request header carrying the webhook signature for this provider.
    #[must_use]
    pub fn signature_header(&self) -> &'static str {
        match self {
            Self::Stripe => "Stripe-Signature",
            Self::Paddle => "Paddle-Signature",
            Self::LemonSqueezy => "X-Signature",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "paddle" => Ok(Self::Paddle),
            "lemon_squeezy" | "lemon-squeezy" | "lemonsqueezy" => Ok(Self::LemonSqueezy),
            other => Err(crate::error::Error::invalid_payload(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

/// How a product is sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Subscription,
    OneTime,
}

/// Billing cadence of a price. `Once` marks one-time prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Once,
    Day,
    Week,
    Month,
    Year,
}

impl BillingInterval {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Parse a provider interval string. Unknown values fall back to `Month`,
    /// the overwhelmingly common cadence across all three providers.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "once" | "one_time" => Self::Once,
            "day" | "daily" => Self::Day,
            "week" | "weekly" => Self::Week,
            "month" | "monthly" => Self::Month,
            "year" | "yearly" | "annual" => Self::Year,
            _ => Self::Month,
        }
    }
}

/// Subscription status, normalized across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    Expired,
    Paused,
    Unpaid,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Paused => "paused",
            Self::Unpaid => "unpaid",
        }
    }

    /// Check if the subscription is live (including trials).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    #[must_use]
    pub fn is_trialing(&self) -> bool {
        *self == Self::Trialing
    }

    /// Statuses that count as "canceled or on the way out" for lifecycle
    /// classification.
    #[must_use]
    pub fn is_canceled_or_expired(&self) -> bool {
        matches!(self, Self::Canceled | Self::Expired | Self::Unpaid)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order status, normalized through per-provider tables in `providers::*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }
}

/// A sellable product in the local catalog.
///
/// `key` is the natural key: a stable, globally unique slug used to match
/// local products against remote catalog objects when no explicit mapping
/// exists yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub key: String,
    pub name: String,
    pub summary: Option<String>,
    pub kind: ProductKind,
    pub active: bool,
    pub features: Vec<String>,
    /// Free-form entitlement map (feature -> limit/flag).
    pub entitlements: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Create a product with a fresh synthetic id.
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>, kind: ProductKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            key: key.into(),
            name: name.into(),
            summary: None,
            kind,
            active: true,
            features: Vec::new(),
            entitlements: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Links one local product to its object on one provider.
///
/// A product may be sold through several providers concurrently, but carries
/// at most one mapping per provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMapping {
    pub product_id: String,
    pub provider: Provider,
    pub provider_id: String,
}

/// A price attached to a product. `key` is unique within the product scope
/// (e.g. `monthly`); the composite `product_key:price_key` slug is the
/// natural key used during catalog reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub product_id: String,
    pub key: String,
    pub label: Option<String>,
    pub interval: BillingInterval,
    pub interval_count: u32,
    /// Upper-cased ISO currency code.
    pub currency: String,
    /// Integer amount in minor currency units.
    pub amount: i64,
    pub trial_interval: Option<BillingInterval>,
    pub trial_count: Option<u32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Price {
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        key: impl Into<String>,
        interval: BillingInterval,
        currency: impl Into<String>,
        amount: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            key: key.into(),
            label: None,
            interval,
            interval_count: 1,
            currency: currency.into().to_uppercase(),
            amount,
            trial_interval: None,
            trial_count: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Links one local price to its object on one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMapping {
    pub price_id: String,
    pub provider: Provider,
    pub provider_id: String,
}

/// A customer's subscription, synced from provider webhooks.
///
/// The `*_sent_at` timestamps are idempotency guards for lifecycle
/// notifications: a guard being set means that notification already went out
/// and must not be repeated for the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// The local user/team that owns this subscription.
    pub owner_id: String,
    pub provider: Provider,
    pub provider_id: String,
    /// Denormalized product key at sync time; may reference a retired plan.
    pub plan_key: String,
    pub status: SubscriptionStatus,
    /// Seat count.
    pub quantity: u32,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub renews_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    /// Free-form snapshot of the provider's subscription object.
    pub metadata: serde_json::Value,
    pub welcome_sent_at: Option<DateTime<Utc>>,
    pub trial_started_sent_at: Option<DateTime<Utc>>,
    pub cancellation_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Canceled, or canceled-at-period-end but still running (grace period).
    #[must_use]
    pub fn is_canceled_or_grace(&self) -> bool {
        self.status.is_canceled_or_expired()
            || (self.canceled_at.is_some() && self.ends_at.is_some())
    }
}

/// A one-time purchase or checkout-initiated purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub owner_id: Option<String>,
    pub provider: Provider,
    pub provider_id: String,
    pub status: OrderStatus,
    pub amount: i64,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An invoice, linked to its order and/or subscription when resolvable.
///
/// `payment_failed_notified_at` guards the at-most-once payment failure
/// notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub provider: Provider,
    pub provider_id: String,
    pub order_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: Option<String>,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub tax_amount: i64,
    /// Percentage with two decimals. `None` means unknown, NOT zero.
    pub tax_rate: Option<f64>,
    pub currency: String,
    pub hosted_url: Option<String>,
    pub pdf_url: Option<String>,
    pub pdf_url_expires_at: Option<DateTime<Utc>>,
    pub payment_failed_notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single invoice line. Lines have no identity across provider updates and
/// are replaced wholesale on every invoice sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub invoice_id: String,
    pub description: String,
    pub quantity: u32,
    pub unit_amount: i64,
    pub amount: i64,
}

/// A provider-side customer record linked to a local owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingCustomer {
    pub id: String,
    pub owner_id: String,
    pub provider: Provider,
    pub provider_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A discount code, scoped per provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: String,
    pub provider: Provider,
    pub code: String,
    /// Incremented strictly once per new redemption row.
    pub redeemed_count: u64,
}

impl Discount {
    #[must_use]
    pub fn new(provider: Provider, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider,
            code: code.into(),
            redeemed_count: 0,
        }
    }
}

/// One redemption of a discount, recorded at most once per
/// `(discount, provider, provider_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRedemption {
    pub discount_id: String,
    pub owner_id: Option<String>,
    pub provider: Provider,
    /// The provider object (order/subscription) the redemption arrived on.
    pub provider_id: String,
    pub plan_key: Option<String>,
    pub price_key: Option<String>,
    pub metadata: serde_json::Value,
    pub redeemed_at: DateTime<Utc>,
}

/// Append-only idempotency ledger entry, unique on `(provider, event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: Provider,
    pub event_id: String,
    pub event_type: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
