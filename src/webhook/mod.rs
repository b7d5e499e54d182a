//! Webhook ingestion: signature verification, envelope normalization and the
//! idempotency gate.
//!
//! The HTTP-facing flow does minimal synchronous work — verify the
//! signature, insert into the idempotency ledger, enqueue a job — and
//! returns immediately. All reconciliation happens in background workers.

mod envelope;
mod intake;
mod verify;

pub use envelope::{WebhookEnvelope, parse_envelope};
pub use intake::{IntakeOutcome, WebhookIntake};
pub use verify::{
    LemonSqueezyVerifier, NoVerification, PaddleVerifier, StripeVerifier, WebhookVerifier,
    verifier_for,
};
