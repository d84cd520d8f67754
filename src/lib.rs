//! Negation Ledger - cred-backed point creation for the Negation Game
//!
//! Authenticated identities create points (immutable statements) and may
//! back them with cred from a per-identity balance. Creating a point with
//! cred is one atomic unit of work: the point, the conditional debit and the
//! endorsement commit together or not at all, and no balance ever goes
//! negative, even under concurrent calls from the same identity.
//!
//! ## Architecture
//!
//! ```text
//! CallerContext ──▶ IdentityResolver ──▶ LedgerService ──▶ LedgerDb (SQLite)
//!                                             │ after commit
//!                                             ├──▶ EventBus
//!                                             └──▶ EnrichmentQueue ──▶ EnrichmentWorker
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/negation-ledger/
//! ├── ledger.db       # SQLite database (WAL)
//! └── config.toml     # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod services;

// Re-exports
pub use config::{AuthConfig, Config, EnrichmentConfig};
pub use db::{ConnectionOptions, DbStats, Endorsement, LedgerDb, Point, PointId, PointView};
pub use error::LedgerError;
pub use identity::{CallerContext, Identity, IdentityResolver, JwtIdentityResolver};
pub use services::{
    EnrichmentJob, EnrichmentQueue, EnrichmentWorker, Enricher, EventBus, HttpEnricher,
    LedgerEvent, LedgerService, RetryPolicy,
};
