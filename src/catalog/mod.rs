//! Catalog reconciliation: batch import/export between the local catalog
//! and a provider's remote catalog, independent of webhooks.
//!
//! Both directions share the same contract: a `preview` run computes the
//! per-item actions without touching anything, an `apply` run performs
//! them, and either way the caller gets a summary histogram plus
//! human-readable warnings. Per-item problems become warnings and never
//! abort the batch; only systemic failures (missing credentials, a failed
//! full-list call) propagate as errors.
//!
//! The whole run deliberately issues its provider API calls outside any
//! held database transaction — a full sync can mean dozens of sequential
//! network calls, and holding locks across them would serialize every
//! other writer. Only the per-row mapping persistence is transactional.

mod export;
mod import;

pub use export::CatalogExporter;
pub use import::CatalogImporter;

use serde::Serialize;

/// Options for one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Also update remote/local objects that already exist and differ.
    pub update_existing: bool,
    /// Restrict the run to these product keys (None = everything).
    pub product_keys: Option<Vec<String>>,
}

impl SyncOptions {
    pub(crate) fn includes(&self, key: &str) -> bool {
        match &self.product_keys {
            Some(keys) => keys.iter().any(|k| k == key),
            None => true,
        }
    }
}

/// Per-action counters for products.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProductCounts {
    pub create: u32,
    pub update: u32,
    pub skip: u32,
}

/// Per-action counters for prices. `link` means a mapping was persisted
/// without mutating the remote side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriceCounts {
    pub create: u32,
    pub update: u32,
    pub skip: u32,
    pub link: u32,
}

/// Summary histogram of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub products: ProductCounts,
    pub prices: PriceCounts,
}

/// The result of a reconciliation run: what happened (or would happen),
/// plus everything worth a human's attention. Never a partial silent
/// failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub summary: SyncSummary,
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "paysync::catalog", "{message}");
        self.warnings.push(message);
    }
}
