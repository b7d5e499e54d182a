//! Webhook HTTP endpoint.
//!
//! `POST /webhooks/{provider}` does the minimal synchronous work — verify,
//! dedupe-insert, enqueue — and responds immediately. Providers only ever
//! see `204 No Content` (accepted, including "already seen") or `400` with
//! an error body (verification failure); everything else is internal.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};

use crate::error::Error;
use crate::model::Provider;
use crate::storage::BillingStore;
use crate::webhook::WebhookIntake;

/// Shared state for the webhook routes.
pub struct WebhookState<S: BillingStore> {
    pub intake: WebhookIntake<S>,
}

/// Build the webhook router. Mount it into the host application.
pub fn webhook_routes<S: BillingStore + 'static>(state: Arc<WebhookState<S>>) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(receive_webhook::<S>))
        .with_state(state)
}

async fn receive_webhook<S: BillingStore>(
    State(state): State<Arc<WebhookState<S>>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider: Provider = match provider.parse() {
        Ok(provider) => provider,
        Err(_) => {
            // Unknown path segment: reject without touching the body.
            return Error::invalid_payload(format!("unknown provider: {provider}"))
                .into_response();
        }
    };

    let signature = headers
        .get(provider.signature_header())
        .and_then(|v| v.to_str().ok());

    match state.intake.accept(provider, signature, &body).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryJobQueue;
    use crate::storage::test::InMemoryStore;
    use crate::webhook::{NoVerification, WebhookVerifier};
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryJobQueue>) {
        let store = InMemoryStore::new();
        let queue = Arc::new(InMemoryJobQueue::new());
        let queue_dyn: Arc<dyn crate::queue::JobQueue> = queue.clone();
        let mut verifiers: HashMap<Provider, Arc<dyn WebhookVerifier>> = HashMap::new();
        verifiers.insert(Provider::Stripe, Arc::new(NoVerification));
        let intake = WebhookIntake::new(store, queue_dyn, verifiers);
        (webhook_routes(Arc::new(WebhookState { intake })), queue)
    }

    #[tokio::test]
    async fn accepted_delivery_returns_204() {
        let (app, queue) = app();

        let response = app
            .oneshot(
                Request::post("/webhooks/stripe")
                    .body(Body::from(
                        r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_also_returns_204() {
        let (app, queue) = app();
        let request = || {
            Request::post("/webhooks/stripe")
                .body(Body::from(
                    r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#,
                ))
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        let second = app.oneshot(request()).await.unwrap();

        assert_eq!(first.status(), StatusCode::NO_CONTENT);
        assert_eq!(second.status(), StatusCode::NO_CONTENT);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_provider_returns_400() {
        let (app, _) = app();

        let response = app
            .oneshot(
                Request::post("/webhooks/braintree")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unconfigured_provider_returns_500() {
        let (app, _) = app();

        // Paddle has no verifier registered: server-side config problem.
        let response = app
            .oneshot(
                Request::post("/webhooks/paddle")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
