//! End-to-end webhook flow: signed delivery through the intake gate, the
//! job queue, the dispatcher and the type handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use paysync::lifecycle::{LifecycleEvent, Notifier, Transition};
use paysync::providers::resolve_subscription_amount;
use paysync::storage::test::InMemoryStore;
use paysync::webhook::StripeVerifier;
use paysync::{
    BillingStore, EventRouter, InMemoryJobQueue, IntakeOutcome, Provider, Result, SyncContext,
    WebhookIntake, WebhookVerifier, WebhookWorker, default_router,
};

type HmacSha256 = Hmac<Sha256>;

const WEBHOOK_SECRET: &str = "whsec_integration";

fn stripe_signature(body: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(body));
    let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(signed_payload.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={sig}")
}

#[derive(Default, Clone)]
struct CountingNotifier {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

#[async_trait::async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Harness {
    store: InMemoryStore,
    queue: Arc<InMemoryJobQueue>,
    intake: WebhookIntake<InMemoryStore>,
    worker: WebhookWorker<InMemoryStore>,
    notifier: CountingNotifier,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();
    let queue = Arc::new(InMemoryJobQueue::new());
    let notifier = CountingNotifier::default();

    let mut verifiers: HashMap<Provider, Arc<dyn WebhookVerifier>> = HashMap::new();
    verifiers.insert(
        Provider::Stripe,
        Arc::new(StripeVerifier::new(WEBHOOK_SECRET.into())),
    );

    let queue_dyn: Arc<dyn paysync::JobQueue> = queue.clone();
    let intake = WebhookIntake::new(store.clone(), queue_dyn.clone(), verifiers);

    let ctx = SyncContext::new(store.clone(), Arc::new(notifier.clone()));
    let router: Arc<EventRouter<InMemoryStore>> = Arc::new(default_router());
    let worker = WebhookWorker::new(queue_dyn, router, ctx);

    Harness {
        store,
        queue,
        intake,
        worker,
        notifier,
    }
}

fn checkout_completed_body() -> Vec<u8> {
    serde_json::json!({
        "id": "evt_checkout_1",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_1",
            "mode": "subscription",
            "payment_status": "paid",
            "customer": "cus_1",
            "customer_details": {"email": "ada@example.com", "name": "Ada"},
            "subscription": "sub_1",
            "amount_total": 900,
            "currency": "usd",
            "metadata": {
                "owner_id": "team_1",
                "plan_key": "pro",
                "discount_code": "LAUNCH20"
            }
        }}
    })
    .to_string()
    .into_bytes()
}

async fn drain(harness: &Harness) {
    while harness.worker.process_next().await.unwrap() {}
}

#[tokio::test]
async fn duplicate_checkout_delivery_converges_to_one_of_everything() {
    let harness = harness();
    let body = checkout_completed_body();
    let signature = stripe_signature(&body);

    // The provider retries: the same event lands twice.
    let first = harness
        .intake
        .accept(Provider::Stripe, Some(&signature), &body)
        .await
        .unwrap();
    let second = harness
        .intake
        .accept(Provider::Stripe, Some(&signature), &body)
        .await
        .unwrap();

    assert_eq!(first, IntakeOutcome::Accepted);
    assert_eq!(second, IntakeOutcome::Duplicate);
    assert_eq!(harness.queue.len().await, 1);

    drain(&harness).await;

    // Exactly one of each entity, despite the duplicate delivery.
    assert_eq!(harness.store.event_ids().len(), 1);
    assert_eq!(harness.store.all_customers().len(), 1);
    assert_eq!(harness.store.all_orders().len(), 1);
    assert_eq!(harness.store.all_subscriptions().len(), 1);
    assert_eq!(harness.store.all_redemptions().len(), 1);

    let subscription = harness
        .store
        .get_subscription(Provider::Stripe, "sub_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status.as_str(), "active");
    assert_eq!(subscription.plan_key, "pro");
    assert_eq!(subscription.owner_id, "team_1");

    let discount = harness
        .store
        .get_discount(Provider::Stripe, "LAUNCH20")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(discount.redeemed_count, 1);

    // One welcome notification.
    let events = harness.notifier.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transition, Transition::Activated);
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let harness = harness();
    let body = checkout_completed_body();
    let signature = stripe_signature(&body);

    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");

    let err = harness
        .intake
        .accept(Provider::Stripe, Some(&signature), &tampered)
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(harness.store.event_ids().is_empty());
}

#[tokio::test]
async fn subscription_lifecycle_across_webhooks() {
    let harness = harness();

    let subscription_body = |event_id: &str, status: &str| {
        serde_json::json!({
            "id": event_id,
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_9",
                "status": status,
                "items": {"data": [{
                    "price": {"id": "price_x", "unit_amount": 900, "currency": "usd"},
                    "quantity": 1
                }]},
                "metadata": {"owner_id": "team_2", "plan_key": "pro"}
            }}
        })
        .to_string()
        .into_bytes()
    };

    for (event_id, status) in [
        ("evt_1", "trialing"),
        ("evt_2", "active"),
        ("evt_3", "canceled"),
    ] {
        let body = subscription_body(event_id, status);
        let signature = stripe_signature(&body);
        harness
            .intake
            .accept(Provider::Stripe, Some(&signature), &body)
            .await
            .unwrap();
        drain(&harness).await;
    }

    let transitions: Vec<Transition> = harness
        .notifier
        .events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.transition.clone())
        .collect();
    assert_eq!(
        transitions,
        vec![
            Transition::TrialStarted,
            Transition::Activated,
            Transition::Canceled
        ]
    );

    // The notification amount resolves through the stored metadata
    // snapshot's documented path list.
    let subscription = harness
        .store
        .get_subscription(Provider::Stripe, "sub_9")
        .await
        .unwrap()
        .unwrap();
    let (amount, currency) = resolve_subscription_amount(Provider::Stripe, &subscription.metadata);
    assert_eq!(amount, 900);
    assert_eq!(currency, "USD");

    let events = harness.notifier.events.lock().unwrap();
    assert!(events.iter().all(|e| e.amount == 900 && e.currency == "USD"));
}

#[tokio::test]
async fn unknown_event_types_are_accepted_and_ignored() {
    let harness = harness();

    let body = serde_json::json!({
        "id": "evt_novel",
        "type": "entitlements.active_entitlement_summary.updated",
        "data": {"object": {}}
    })
    .to_string()
    .into_bytes();
    let signature = stripe_signature(&body);

    let outcome = harness
        .intake
        .accept(Provider::Stripe, Some(&signature), &body)
        .await
        .unwrap();
    assert_eq!(outcome, IntakeOutcome::Accepted);

    // Processing is a clean no-op.
    drain(&harness).await;
    assert_eq!(harness.store.event_ids().len(), 1);
    assert!(harness.store.all_subscriptions().is_empty());
}
