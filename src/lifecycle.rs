//! Subscription lifecycle transitions.
//!
//! Transitions are derived by diffing the previously persisted subscription
//! against the freshly synced one, never by trusting a webhook's
//! self-described intent: providers do not guarantee delivery order, so the
//! stored before/after states are the only reliable signal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::Subscription;

/// Sentinel plan key used when a webhook's plan cannot be resolved.
pub const UNKNOWN_PLAN: &str = "unknown";

/// A classified change in subscription state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Was canceled or in grace period, now live again.
    Resumed,
    /// Moved to a different (known) plan.
    PlanChanged { from: String, to: String },
    /// Entered trial for the first time.
    TrialStarted,
    /// First time active outside a trial.
    Activated,
    /// Canceled (immediately or at period end).
    Canceled,
}

impl Transition {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resumed => "resumed",
            Self::PlanChanged { .. } => "plan_changed",
            Self::TrialStarted => "trial_started",
            Self::Activated => "activated",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify the lifecycle transition for one sync call.
///
/// At most one transition fires per sync. Checks run in precedence order;
/// each is guarded by its own "already notified" timestamp (carried on the
/// subscription), so replayed webhooks for the same state classify as
/// `None`.
///
/// `previous` is the state persisted before this sync; `current` is the
/// state just written, with guard timestamps carried over from `previous`.
#[must_use]
pub fn classify(previous: Option<&Subscription>, current: &Subscription) -> Option<Transition> {
    // Resumed: was on the way out, came back, and we had told the customer
    // about the cancellation.
    if let Some(prev) = previous {
        if prev.is_canceled_or_grace()
            && current.status.is_active()
            && prev.cancellation_sent_at.is_some()
        {
            return Some(Transition::Resumed);
        }

        if prev.plan_key != current.plan_key && current.plan_key != UNKNOWN_PLAN {
            return Some(Transition::PlanChanged {
                from: prev.plan_key.clone(),
                to: current.plan_key.clone(),
            });
        }
    }

    if current.status.is_trialing() && current.trial_started_sent_at.is_none() {
        return Some(Transition::TrialStarted);
    }

    if current.status == crate::model::SubscriptionStatus::Active
        && current.welcome_sent_at.is_none()
    {
        return Some(Transition::Activated);
    }

    if current.is_canceled_or_grace() && current.cancellation_sent_at.is_none() {
        return Some(Transition::Canceled);
    }

    None
}

/// A lifecycle notification ready to be delivered.
///
/// `amount`/`currency` are resolved from the subscription's stored metadata
/// snapshot through the provider's documented path list, falling back to
/// `0`/`USD` when nothing resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub transition: Transition,
    pub owner_id: String,
    pub plan_key: String,
    pub subscription_provider_id: String,
    pub amount: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Seam for delivering lifecycle notifications (email, in-app, ...).
///
/// Delivery is fire-and-forget from the engine's point of view, but the
/// guard timestamp is only set after `notify` returns `Ok`, so a crash
/// mid-send results in at-least-once delivery, never silent loss.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()>;

    /// Payment-failure notification for an invoice. At most once per
    /// invoice, guarded by the invoice's notified-at timestamp.
    async fn payment_failed(&self, _owner_id: &str, _invoice_provider_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Notifier that does nothing. Use when lifecycle emails are handled
/// entirely outside the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn notify(&self, _event: &LifecycleEvent) -> Result<()> {
        Ok(())
    }
}

/// Notifier that records events through `tracing` at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
        tracing::info!(
            target: "paysync::lifecycle",
            transition = %event.transition,
            owner_id = %event.owner_id,
            plan_key = %event.plan_key,
            subscription = %event.subscription_provider_id,
            amount = event.amount,
            currency = %event.currency,
            "lifecycle notification"
        );
        Ok(())
    }

    async fn payment_failed(&self, owner_id: &str, invoice_provider_id: &str) -> Result<()> {
        tracing::info!(
            target: "paysync::lifecycle",
            owner_id = %owner_id,
            invoice = %invoice_provider_id,
            "payment failure notification"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Notifier that captures events for assertions.
    #[derive(Default, Clone)]
    pub struct RecordingNotifier {
        pub events: Arc<Mutex<Vec<LifecycleEvent>>>,
        pub payment_failures: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn transitions(&self) -> Vec<Transition> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.transition.clone())
                .collect()
        }

        pub fn failure_count(&self) -> usize {
            self.payment_failures.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn payment_failed(&self, owner_id: &str, invoice_provider_id: &str) -> Result<()> {
            self.payment_failures
                .lock()
                .unwrap()
                .push((owner_id.to_string(), invoice_provider_id.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Provider, SubscriptionStatus};

    fn sub(status: SubscriptionStatus, plan_key: &str) -> Subscription {
        Subscription {
            id: "s1".into(),
            owner_id: "owner".into(),
            provider: Provider::Stripe,
            provider_id: "sub_1".into(),
            plan_key: plan_key.into(),
            status,
            quantity: 1,
            trial_ends_at: None,
            renews_at: None,
            ends_at: None,
            canceled_at: None,
            metadata: serde_json::json!({}),
            welcome_sent_at: None,
            trial_started_sent_at: None,
            cancellation_sent_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn first_trial_sync_is_trial_started() {
        let current = sub(SubscriptionStatus::Trialing, "pro");
        assert_eq!(classify(None, &current), Some(Transition::TrialStarted));
    }

    #[test]
    fn trial_to_active_fires_only_activated() {
        // The trial sync already happened and the guard was set then.
        let mut previous = sub(SubscriptionStatus::Trialing, "pro");
        previous.trial_started_sent_at = Some(Utc::now());

        let mut current = sub(SubscriptionStatus::Active, "pro");
        current.trial_started_sent_at = previous.trial_started_sent_at;

        assert_eq!(classify(Some(&previous), &current), Some(Transition::Activated));
    }

    #[test]
    fn replayed_active_sync_is_silent() {
        let mut previous = sub(SubscriptionStatus::Active, "pro");
        previous.welcome_sent_at = Some(Utc::now());
        let current = previous.clone();

        assert_eq!(classify(Some(&previous), &current), None);
    }

    #[test]
    fn plan_change_detected() {
        let mut previous = sub(SubscriptionStatus::Active, "starter");
        previous.welcome_sent_at = Some(Utc::now());
        let mut current = sub(SubscriptionStatus::Active, "pro");
        current.welcome_sent_at = previous.welcome_sent_at;

        assert_eq!(
            classify(Some(&previous), &current),
            Some(Transition::PlanChanged { from: "starter".into(), to: "pro".into() })
        );
    }

    #[test]
    fn plan_change_to_unknown_is_not_a_change() {
        let mut previous = sub(SubscriptionStatus::Active, "starter");
        previous.welcome_sent_at = Some(Utc::now());
        let mut current = sub(SubscriptionStatus::Active, UNKNOWN_PLAN);
        current.welcome_sent_at = previous.welcome_sent_at;

        assert_eq!(classify(Some(&previous), &current), None);
    }

    #[test]
    fn cancellation_fires_once() {
        let mut previous = sub(SubscriptionStatus::Active, "pro");
        previous.welcome_sent_at = Some(Utc::now());

        let mut current = sub(SubscriptionStatus::Canceled, "pro");
        current.welcome_sent_at = previous.welcome_sent_at;

        assert_eq!(classify(Some(&previous), &current), Some(Transition::Canceled));

        // Replay with the guard now set: silent.
        current.cancellation_sent_at = Some(Utc::now());
        let replay = current.clone();
        assert_eq!(classify(Some(&current), &replay), None);
    }

    #[test]
    fn resume_requires_prior_cancellation_notice() {
        let mut canceled = sub(SubscriptionStatus::Canceled, "pro");
        canceled.welcome_sent_at = Some(Utc::now());
        canceled.cancellation_sent_at = Some(Utc::now());

        let mut current = sub(SubscriptionStatus::Active, "pro");
        current.welcome_sent_at = canceled.welcome_sent_at;
        current.cancellation_sent_at = canceled.cancellation_sent_at;

        assert_eq!(classify(Some(&canceled), &current), Some(Transition::Resumed));

        // Without the notice, an out-of-order "canceled" blip that we never
        // told the customer about must not produce a "resumed" email.
        canceled.cancellation_sent_at = None;
        let mut current = sub(SubscriptionStatus::Active, "pro");
        current.welcome_sent_at = canceled.welcome_sent_at;
        assert_eq!(classify(Some(&canceled), &current), None);
    }
}
