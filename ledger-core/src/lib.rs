//! Audit Ledger Core
//!
//! Tamper-evident, append-only audit ledger for bookkeeping records.
//!
//! # Architecture
//!
//! - **Hash Chain**: Every entry commits to its predecessor's hash
//! - **Per-Tenant Chains**: One chain per tenant, each starting at genesis
//! - **Lifecycle Guard**: Finalized records reject mutation of frozen fields
//! - **Verification**: Read-only walk that reports every broken entry
//!
//! # Invariants
//!
//! - Append-only: Entries are never modified or deleted
//! - No forks: Each predecessor has at most one successor
//! - Atomic: A record write and its audit entry commit together
//! - Deterministic: Same stored fields → same hash

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod record_store;
pub mod records;
pub mod retention;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use crypto::{KeyPair, GENESIS_HASH};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use lifecycle::{FinancialRecord, LifecyclePolicy};
pub use record_store::{RecordStore, RecordWrite, Versioned};
pub use retention::{RetentionClass, RetentionPolicy};
pub use storage::Storage;
pub use types::{
    AnonymizationRequest, AppendReceipt, AppendRequest, ChainId, ChainTail, EntryFilter,
    IntegrityCheck, IntegrityReport, IntegrityViolation, LedgerEntry, ViolationKind,
    SYSTEM_ACTOR,
};
