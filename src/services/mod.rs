//! Service layer for negation-ledger
//!
//! Services encapsulate business logic between callers (CLI, HTTP handlers)
//! and repositories:
//! - Identity resolution
//! - Input validation
//! - Transaction boundaries
//! - Post-commit event emission and enrichment hand-off
//!
//! ## Architecture
//!
//! ```text
//! Callers (thin)
//!     ↓
//! LedgerService (business logic)
//!     ↓                    ↘ after commit
//! Repository Layer (db/*.rs)   EventBus, EnrichmentQueue
//!     ↓
//! SQLite Database
//! ```

pub mod enrichment;
pub mod events;
pub mod ledger_service;

// Re-exports
pub use enrichment::{
    EnrichmentJob, EnrichmentQueue, EnrichmentStats, EnrichmentWorker, Enricher, HttpEnricher,
    RetryPolicy,
};
pub use events::{spawn_logging_listener, EventBus, EventListener, LedgerEvent};
pub use ledger_service::LedgerService;
