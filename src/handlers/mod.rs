//! Type handlers: pure reconciliation logic per entity type.
//!
//! Each handler parses the provider's payload once into a normalized
//! update shape (see `providers`), then applies an idempotent upsert keyed
//! by `(provider, provider_id)`. Unresolvable references produce
//! `Outcome::Skipped`, never errors — replaying them would not help.

mod catalog_objects;
mod checkout;
mod customer;
mod invoice;
mod order;
mod subscription;

pub use catalog_objects::{CatalogPriceHandler, CatalogProductHandler};
pub use checkout::CheckoutHandler;
pub use customer::CustomerHandler;
pub use invoice::InvoiceHandler;
pub use order::OrderHandler;
pub use subscription::SubscriptionHandler;

use std::sync::Arc;

use crate::lifecycle::Notifier;
use crate::storage::BillingStore;

/// Shared services injected into every handler call.
///
/// This replaces scattered per-handler lookups with one dependency-injected
/// utility object: the store for entity access and the notifier seam for
/// lifecycle side effects.
pub struct SyncContext<S: BillingStore> {
    store: S,
    notifier: Arc<dyn Notifier>,
}

impl<S: BillingStore> SyncContext<S> {
    #[must_use]
    pub fn new(store: S, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }
}

impl<S: BillingStore + Clone> Clone for SyncContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
