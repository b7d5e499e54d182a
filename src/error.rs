use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::model::Provider;

/// The main error type for the reconciliation engine.
///
/// Handler-level "the webhook references something we cannot map" situations
/// are deliberately NOT errors: handlers return [`crate::dispatch::Outcome::Skipped`]
/// for those, so job runners do not retry events that can never resolve.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required API key / webhook secret is absent. Fatal for the operation.
    #[error("missing configuration: {key}")]
    ConfigMissing { key: String },

    /// The webhook signature did not match the provider secret.
    #[error("invalid webhook signature for {provider}")]
    SignatureInvalid { provider: Provider },

    /// The signed timestamp is outside the accepted window (replay protection).
    #[error("webhook timestamp expired ({age_seconds} seconds old)")]
    TimestampExpired { age_seconds: i64 },

    /// The webhook body could not be parsed into the expected shape.
    #[error("invalid webhook payload: {message}")]
    InvalidPayload { message: String },

    /// A provider API call failed.
    #[error("{provider} API error during '{operation}': {message}")]
    ProviderApi {
        provider: Provider,
        operation: String,
        message: String,
        http_status: Option<u16>,
    },

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn config_missing(key: impl Into<String>) -> Self {
        Self::ConfigMissing { key: key.into() }
    }

    pub fn provider_api(
        provider: Provider,
        operation: impl Into<String>,
        message: impl Into<String>,
        http_status: Option<u16>,
    ) -> Self {
        Self::ProviderApi {
            provider,
            operation: operation.into(),
            message: message.into(),
            http_status,
        }
    }

    /// Check if this is a client error (maps to a 4xx response).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::SignatureInvalid { .. }
            | Self::TimestampExpired { .. }
            | Self::InvalidPayload { .. } => true,
            Self::ProviderApi { http_status, .. } => matches!(http_status, Some(400..=499)),
            _ => false,
        }
    }

    /// Check if retrying the operation could succeed.
    ///
    /// Signature failures and malformed payloads never become valid on retry;
    /// rate limits and provider 5xx responses might.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderApi { http_status, .. } => {
                matches!(http_status, Some(429) | Some(500..=599) | None)
            }
            Self::Storage(_) => true,
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            Error::SignatureInvalid { .. }
            | Error::TimestampExpired { .. }
            | Error::InvalidPayload { .. } => {
                tracing::warn!(target: "paysync::webhook", error = %self, "webhook rejected");
                (StatusCode::BAD_REQUEST, "Bad request", Some(self.to_string()))
            }
            Error::ConfigMissing { key } => {
                tracing::error!(target: "paysync", key = %key, "missing configuration");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            Error::ProviderApi { .. } => {
                tracing::error!(target: "paysync", error = %self, "provider API failure");
                (StatusCode::BAD_GATEWAY, "Upstream provider error", None)
            }
            Error::Storage(msg) => {
                tracing::error!(target: "paysync", error = %msg, "storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            Error::Other(e) => {
                tracing::error!(target: "paysync", error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
