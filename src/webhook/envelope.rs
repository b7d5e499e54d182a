//! Normalized webhook envelope.
//!
//! Each provider wraps events differently; ingestion parses the raw body
//! once into `{id, type, payload}` so everything downstream works with one
//! shape.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::Provider;

/// A verified, parsed webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEnvelope {
    pub provider: Provider,
    /// Provider-stable event id, or a deterministic hash when the provider
    /// omits one.
    pub id: String,
    pub event_type: Option<String>,
    /// The full parsed body; handlers extract their typed payloads from it.
    pub payload: serde_json::Value,
}

/// Parse a raw webhook body into the normalized envelope.
pub fn parse_envelope(provider: Provider, body: &[u8]) -> Result<WebhookEnvelope> {
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| Error::invalid_payload(format!("malformed JSON body: {e}")))?;

    let (id, event_type) = match provider {
        Provider::Stripe => (
            str_field(&payload, "id"),
            str_field(&payload, "type"),
        ),
        Provider::Paddle => (
            str_field(&payload, "event_id"),
            str_field(&payload, "event_type"),
        ),
        Provider::LemonSqueezy => (
            // Lemon Squeezy webhooks carry no first-class event id.
            None,
            payload
                .get("meta")
                .and_then(|m| m.get("event_name"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
        ),
    };

    let id = match id {
        Some(id) => id,
        None => deterministic_id(event_type.as_deref(), &payload),
    };

    Ok(WebhookEnvelope {
        provider,
        id,
        event_type,
        payload,
    })
}

fn str_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Derive a stable event id from the payload content.
///
/// serde_json's default map representation is sorted, so re-serializing the
/// parsed value is canonical: two deliveries of the same content hash to the
/// same id regardless of the provider's key ordering on the wire.
fn deterministic_id(event_type: Option<&str>, payload: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(event_type.unwrap_or("").as_bytes());
    hasher.update(b".");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
