//! Per-provider webhook signature verification.
//!
//! All three providers sign with HMAC-SHA256 over provider-defined input;
//! comparison is constant-time via the `subtle` crate so timing cannot be
//! used to discover a valid signature byte-by-byte.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::Provider;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed timestamp before the webhook is rejected.
/// Stripe and Paddle both recommend 5 minutes.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Allowed clock skew for timestamps from the future.
const FUTURE_SKEW_SECS: i64 = 60;

/// Trait for verifying webhook signatures.
///
/// `Ok(true)` means the signature matches, `Ok(false)` means it does not;
/// errors are reserved for structurally broken input (bad timestamp, bad
/// header format).
#[async_trait]
pub trait WebhookVerifier: Send + Sync + std::fmt::Debug {
    async fn verify(&self, payload: &[u8], signature: &str) -> Result<bool>;
}

/// Verifier that accepts everything.
///
/// Selected only when the engine runs in a designated test environment;
/// never use in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVerification;

#[async_trait]
impl WebhookVerifier for NoVerification {
    async fn verify(&self, _payload: &[u8], _signature: &str) -> Result<bool> {
        tracing::warn!(
            target: "paysync::webhook",
            "NoVerification in use - all webhooks accepted without signature checks"
        );
        Ok(true)
    }
}

/// Stripe: `Stripe-Signature: t=<unix>,v1=<hex>`, HMAC over `"{t}.{body}"`.
#[derive(Debug)]
pub struct StripeVerifier {
    secret: SecretString,
}

impl StripeVerifier {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl WebhookVerifier for StripeVerifier {
    async fn verify(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let parts = parse_kv_header(signature, ',', '=');
        let timestamp = parts
            .iter()
            .find(|(k, _)| k == "t")
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::invalid_payload("missing timestamp in Stripe-Signature"))?;
        let provided = parts
            .iter()
            .find(|(k, _)| k == "v1")
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::invalid_payload("missing v1 signature in Stripe-Signature"))?;

        check_timestamp(timestamp)?;

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        Ok(hmac_matches(
            self.secret.expose_secret(),
            signed_payload.as_bytes(),
            provided,
        ))
    }
}

/// Paddle: `Paddle-Signature: ts=<unix>;h1=<hex>`, HMAC over `"{ts}:{body}"`.
#[derive(Debug)]
pub struct PaddleVerifier {
    secret: SecretString,
}

impl PaddleVerifier {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl WebhookVerifier for PaddleVerifier {
    async fn verify(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let parts = parse_kv_header(signature, ';', '=');
        let timestamp = parts
            .iter()
            .find(|(k, _)| k == "ts")
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::invalid_payload("missing ts in Paddle-Signature"))?;
        let provided = parts
            .iter()
            .find(|(k, _)| k == "h1")
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::invalid_payload("missing h1 in Paddle-Signature"))?;

        check_timestamp(timestamp)?;

        let signed_payload = format!("{}:{}", timestamp, String::from_utf8_lossy(payload));
        Ok(hmac_matches(
            self.secret.expose_secret(),
            signed_payload.as_bytes(),
            provided,
        ))
    }
}

/// Lemon Squeezy: `X-Signature: <hex>`, HMAC over the raw body.
#[derive(Debug)]
pub struct LemonSqueezyVerifier {
    secret: SecretString,
}

impl LemonSqueezyVerifier {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl WebhookVerifier for LemonSqueezyVerifier {
    async fn verify(&self, payload: &[u8], signature: &str) -> Result<bool> {
        Ok(hmac_matches(
            self.secret.expose_secret(),
            payload,
            signature.trim(),
        ))
    }
}

/// Build the verifier for a provider from engine configuration.
///
/// In test environments this returns [`NoVerification`] for every provider —
/// a documented bypass, selected here and nowhere else.
pub fn verifier_for(config: &EngineConfig, provider: Provider) -> Result<Arc<dyn WebhookVerifier>> {
    if config.environment.is_test() {
        return Ok(Arc::new(NoVerification));
    }

    let secret = config.webhook_secret(provider)?.clone();
    Ok(match provider {
        Provider::Stripe => Arc::new(StripeVerifier::new(secret)),
        Provider::Paddle => Arc::new(PaddleVerifier::new(secret)),
        Provider::LemonSqueezy => Arc::new(LemonSqueezyVerifier::new(secret)),
    })
}

/// Split a `k=v<sep>k=v` style signature header into pairs.
fn parse_kv_header(header: &str, pair_sep: char, kv_sep: char) -> Vec<(String, String)> {
    header
        .split(pair_sep)
        .filter_map(|part| {
            part.trim()
                .split_once(kv_sep)
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Reject timestamps outside the tolerance window (replay protection).
fn check_timestamp(raw: &str) -> Result<()> {
    let timestamp: i64 = raw
        .parse()
        .map_err(|_| Error::invalid_payload("invalid timestamp in signature header"))?;

    let age = chrono::Utc::now().timestamp() - timestamp;
    if age > TIMESTAMP_TOLERANCE_SECS || age < -FUTURE_SKEW_SECS {
        return Err(Error::TimestampExpired { age_seconds: age });
    }
    Ok(())
}

fn hmac_matches(secret: &str, signed_payload: &[u8], provided_hex: &str) -> bool {
    let provided = match hex::decode(provided_hex) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::debug!(target: "paysync::webhook", "failed to decode webhook signature hex");
            return false;
        }
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(signed_payload);
    let expected = mac.finalize().into_bytes();

    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(&provided).into()
}
