//! Core types for the ledger
//!
//! All persisted types are designed for:
//! - Deterministic hashing (canonical JSON with sorted keys)
//! - Insert-only storage (no update or delete path)
//! - Self-verification (every stored field is checked on verification)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::crypto::{self, GENESIS_HASH};
use crate::{Error, Result};

/// Actor id used for entries written by the platform itself
pub const SYSTEM_ACTOR: &str = "system";

/// Chain identifier (one hash chain per tenant/company)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(String);

impl ChainId {
    /// Create new chain ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject ids that cannot be used as a storage key prefix
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(Error::Validation("chain id must not be empty".to_string()));
        }
        if self.0.contains('\0') {
            return Err(Error::Validation("chain id must not contain NUL".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append input, supplied by the business layer for every financial mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    /// Action tag, e.g. `INVOICE_UPDATED`
    pub action: String,
    /// Resource type, drives the retention class
    pub resource_type: String,
    /// Resource id
    pub resource_id: String,
    /// User id or [`SYSTEM_ACTOR`]
    pub actor_id: String,
    /// Values before the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_values: Option<Value>,
    /// Values after the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_values: Option<Value>,
    /// Human-readable justification
    pub reason: String,
    /// Business time of the action (defaults to now)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl AppendRequest {
    /// Create a request with the required fields
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        actor_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            actor_id: actor_id.into(),
            old_values: None,
            new_values: None,
            reason: reason.into(),
            occurred_at: None,
        }
    }

    /// Attach the values before the mutation
    pub fn with_old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    /// Attach the values after the mutation
    pub fn with_new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }

    /// Set the business time of the action
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Validate required fields before anything touches storage
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("action", &self.action),
            ("resourceType", &self.resource_type),
            ("resourceId", &self.resource_id),
            ("actorId", &self.actor_id),
            ("reason", &self.reason),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} is required", name)));
            }
            if value.contains('\0') {
                return Err(Error::Validation(format!("{} must not contain NUL", name)));
            }
        }

        for (name, values) in [("oldValues", &self.old_values), ("newValues", &self.new_values)] {
            if let Some(values) = values {
                if !values.is_object() {
                    return Err(Error::Validation(format!("{} must be an object", name)));
                }
            }
        }

        // Allow 60s clock skew
        if let Some(at) = self.occurred_at {
            if at > Utc::now() + chrono::Duration::seconds(60) {
                return Err(Error::Validation("occurredAt is in the future".to_string()));
            }
        }

        Ok(())
    }
}

/// Privacy request: document that a data subject's personal fields were anonymized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizationRequest {
    /// Data subject id (customer, employee, ...)
    pub subject_id: String,
    /// Names of the fields that were anonymized
    pub fields: Vec<String>,
    /// User id or [`SYSTEM_ACTOR`]
    pub actor_id: String,
    /// Legal basis / ticket reference
    pub reason: String,
}

/// One append-only ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub id: Uuid,
    /// Chain this entry belongs to
    pub chain_id: ChainId,
    /// Monotonic position within the chain, starting at 0
    pub sequence: u64,
    /// Action tag
    pub action: String,
    /// Resource type
    pub resource_type: String,
    /// Resource id
    pub resource_id: String,
    /// User id or [`SYSTEM_ACTOR`]
    pub actor_id: String,
    /// Business time of the action (microsecond precision)
    pub timestamp: DateTime<Utc>,
    /// Values before the change
    pub old_values: Option<Value>,
    /// Values after the change
    pub new_values: Option<Value>,
    /// Human-readable justification
    pub reason: String,
    /// Minimum retention in years (advisory)
    pub retention_years: u32,
    /// Hash of the previous entry, or [`GENESIS_HASH`]
    pub previous_hash: String,
    /// SHA-256 over action, snapshot, timestamp and previous hash
    pub hash: String,
    /// Optional Ed25519 seal over `hash` (hex)
    #[serde(default)]
    pub signature: Option<String>,
    /// Always true once persisted
    pub immutable: bool,
    /// Wall-clock time the entry was recorded
    pub created_at: DateTime<Utc>,
}

/// Hashed payload: every stored field except the four chain inputs
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotPayload<'a> {
    entry_id: &'a Uuid,
    chain_id: &'a ChainId,
    sequence: u64,
    resource_type: &'a str,
    resource_id: &'a str,
    actor_id: &'a str,
    reason: &'a str,
    retention_years: u32,
    created_at: String,
    old_values: &'a Option<Value>,
    new_values: &'a Option<Value>,
}

impl LedgerEntry {
    /// Canonical payload snapshot fed into the hash
    pub fn snapshot(&self) -> String {
        let payload = SnapshotPayload {
            entry_id: &self.id,
            chain_id: &self.chain_id,
            sequence: self.sequence,
            resource_type: &self.resource_type,
            resource_id: &self.resource_id,
            actor_id: &self.actor_id,
            reason: &self.reason,
            retention_years: self.retention_years,
            created_at: crypto::timestamp_iso(&self.created_at),
            old_values: &self.old_values,
            new_values: &self.new_values,
        };
        crypto::canonical_json(&payload)
    }

    /// Recompute the hash from this entry's own stored fields
    pub fn compute_hash(&self) -> String {
        crypto::compute_hash(
            &self.action,
            &self.snapshot(),
            &crypto::timestamp_iso(&self.timestamp),
            &self.previous_hash,
        )
    }

    /// Check the stored hash against a recomputation
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// First entry of its chain
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }

    /// Wire shape returned to the business layer
    pub fn receipt(&self) -> AppendReceipt {
        AppendReceipt {
            id: self.id,
            sequence_index: self.sequence,
            hash: self.hash.clone(),
            previous_hash: self.previous_hash.clone(),
            retention_years: self.retention_years,
            immutable: self.immutable,
            created_at: self.created_at,
        }
    }
}

/// Append output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendReceipt {
    /// Entry id
    pub id: Uuid,
    /// Position in the chain, from 0
    pub sequence_index: u64,
    /// Hash of the entry
    pub hash: String,
    /// Hash it was chained off
    pub previous_hash: String,
    /// Years the entry must be kept
    pub retention_years: u32,
    /// Always true for committed entries
    pub immutable: bool,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

/// Chain-tail marker record; the row every writer must lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTail {
    /// Sequence of the last entry
    pub sequence: u64,
    /// Hash of the last entry
    pub hash: String,
}

/// Kind of integrity violation found by verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Stored hash does not match recomputation
    HashMismatch,
    /// previousHash differs from the predecessor's stored hash
    BrokenLink,
    /// Sequence index skipped or repeated
    SequenceGap,
    /// First entry does not carry the genesis sentinel
    InvalidGenesis,
    /// Immutable flag was cleared
    MutableFlag,
    /// Ed25519 seal missing, invalid, or unverifiable for lack of a key
    BadSignature,
    /// Stored bytes are not a readable entry
    Unreadable,
    /// Tail marker disagrees with the stored entries
    TailMismatch,
}

/// A single integrity violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityViolation {
    /// Offending entry (absent when the entry itself is unreadable or missing)
    pub entry_id: Option<Uuid>,
    /// Position in the chain
    pub sequence: u64,
    /// What failed
    pub kind: ViolationKind,
    /// Operator-facing detail
    pub detail: String,
}

/// verifyIntegrity() output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// No violations found
    pub valid: bool,
    /// Entries that failed a check, in chain order
    pub invalid_entry_ids: Vec<Uuid>,
    /// Entries scanned
    pub total_entries: u64,
}

/// Detailed verification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityCheck {
    /// Chain that was verified
    pub chain_id: ChainId,
    /// Entries scanned
    pub total_entries: u64,
    /// Every violation, in chain order
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityCheck {
    /// Whether no violation was found
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Distinct entry ids that failed a check, in chain order
    pub fn invalid_entry_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = Vec::new();
        for id in self.violations.iter().filter_map(|v| v.entry_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Collapse into the summary shape
    pub fn report(&self) -> IntegrityReport {
        IntegrityReport {
            valid: self.is_valid(),
            invalid_entry_ids: self.invalid_entry_ids(),
            total_entries: self.total_entries,
        }
    }
}

/// Filter for ledger searches
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Exact action tag
    pub action: Option<String>,
    /// Exact actor id
    pub actor_id: Option<String>,
    /// Exact resource type
    pub resource_type: Option<String>,
    /// Entries at or after this time
    pub from: Option<DateTime<Utc>>,
    /// Entries at or before this time
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    /// Whether an entry passes every set criterion
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(ref action) = self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(ref actor) = self.actor_id {
            if &entry.actor_id != actor {
                return false;
            }
        }
        if let Some(ref resource_type) = self.resource_type {
            if &entry.resource_type != resource_type {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}
