//! Main ledger orchestration layer
//!
//! Ties storage, hashing, retention and sealing together into the audit
//! ledger API: append, read, search and verify.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AppendRequest, ChainId, Config, Ledger};
//!
//! fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     let chain = ChainId::new("tenant-42");
//!
//!     let entry = ledger.append(
//!         &chain,
//!         AppendRequest::new("TAX_REPORT_DELETED", "TaxReport", "tr-9", "u-7", "User deleted draft"),
//!     )?;
//!     assert!(ledger.verify_integrity(&chain)?.valid);
//!     println!("appended #{} {}", entry.sequence, entry.hash);
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Writers to one chain are serialized by an in-process lock, and every
//! commit is additionally checked by RocksDB against the chain-tail marker,
//! so two entries can never claim the same predecessor. Readers and
//! verification never take the lock.

use crate::{
    crypto::{self, is_digest, KeyPair, GENESIS_HASH},
    metrics::Metrics,
    record_store::RecordStore,
    retention::RetentionPolicy,
    storage::{ScannedEntry, StorageTxn},
    types::{
        AnonymizationRequest, AppendRequest, ChainId, ChainTail, EntryFilter, IntegrityCheck,
        IntegrityReport, IntegrityViolation, LedgerEntry, ViolationKind,
    },
    Config, Error, Result, Storage,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Action recorded for a subject anonymization
pub const ANONYMIZATION_ACTION: &str = "SUBJECT_ANONYMIZED";

/// Resource type recorded for a subject anonymization
pub const DATA_SUBJECT_RESOURCE: &str = "DataSubject";

/// Main ledger interface
pub struct Ledger {
    /// Shared storage
    storage: Arc<Storage>,

    /// One writer lock per chain
    locks: DashMap<ChainId, Arc<Mutex<()>>>,

    /// Retention table
    retention: RetentionPolicy,

    /// Key pair for sealing (if enabled)
    keypair: Option<KeyPair>,

    /// Public key seals are verified against
    verifying_key: Option<[u8; 32]>,

    /// Prometheus metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let verifying_key = config.verifying_key()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            anonymization = config.features.anonymization,
            require_seals = config.features.require_seals,
            "Ledger opened"
        );

        Ok(Self {
            storage,
            locks: DashMap::new(),
            retention: RetentionPolicy::from_config(&config.retention),
            keypair: None,
            verifying_key,
            metrics,
            config,
        })
    }

    /// Seal every new entry with this key pair (and verify against its public key)
    pub fn with_keypair(mut self, keypair: KeyPair) -> Self {
        self.verifying_key = Some(keypair.public_key());
        self.keypair = Some(keypair);
        self
    }

    /// Verify seals against this public key without sealing new entries
    pub fn with_verifying_key(mut self, public_key: [u8; 32]) -> Self {
        self.verifying_key = Some(public_key);
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Prometheus metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Retention table in effect
    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Underlying storage
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Guarded financial records stored alongside this ledger
    pub fn records(&self) -> RecordStore<'_> {
        RecordStore::new(self)
    }

    // Writes

    /// Append one entry to the end of a chain.
    ///
    /// Input is validated before storage is touched. The returned entry is
    /// exactly what was committed.
    pub fn append(&self, chain: &ChainId, request: AppendRequest) -> Result<LedgerEntry> {
        chain.validate()?;
        request.validate()?;
        self.append_with(chain, |_| Ok(request.clone()))
    }

    /// Record that a data subject's personal fields were anonymized
    pub fn append_anonymization(
        &self,
        chain: &ChainId,
        request: AnonymizationRequest,
    ) -> Result<LedgerEntry> {
        if !self.config.features.anonymization {
            return Err(Error::FeatureDisabled("anonymization".to_string()));
        }
        if request.fields.is_empty() {
            return Err(Error::Validation("fields must not be empty".to_string()));
        }
        if request.fields.iter().any(|f| f.trim().is_empty()) {
            return Err(Error::Validation("field names must not be blank".to_string()));
        }

        let append = AppendRequest::new(
            ANONYMIZATION_ACTION,
            DATA_SUBJECT_RESOURCE,
            request.subject_id,
            request.actor_id,
            request.reason,
        )
        .with_new_values(json!({ "anonymizedFields": request.fields }));

        self.append(chain, append)
    }

    /// Append an entry that corrects an earlier one on the same chain.
    ///
    /// The original is never touched; the correction carries its id in
    /// `newValues.correctsEntryId`.
    pub fn append_correction(
        &self,
        chain: &ChainId,
        corrects: Uuid,
        request: AppendRequest,
    ) -> Result<LedgerEntry> {
        let original = self.storage.get_entry(corrects)?;
        if &original.chain_id != chain {
            return Err(Error::Validation(format!(
                "entry {} belongs to chain {}, not {}",
                corrects, original.chain_id, chain
            )));
        }

        let mut values = match request.new_values.clone() {
            Some(Value::Object(map)) => map,
            Some(_) => return Err(Error::Validation("newValues must be an object".to_string())),
            None => serde_json::Map::new(),
        };
        values.insert("correctsEntryId".to_string(), json!(corrects));

        self.append(chain, request.with_new_values(Value::Object(values)))
    }

    /// Append with staged side writes.
    ///
    /// `stage` runs inside the append transaction on every attempt. It may
    /// read and write records through the transaction and returns the entry
    /// to append; everything commits together or not at all.
    pub(crate) fn append_with<F>(&self, chain: &ChainId, mut stage: F) -> Result<LedgerEntry>
    where
        F: FnMut(&StorageTxn<'_>) -> Result<AppendRequest>,
    {
        chain.validate()?;
        let started = Instant::now();

        let lock = self.chain_lock(chain);
        let _writer = lock.lock();

        let mut attempt: u32 = 0;
        loop {
            match self.try_append(chain, &mut stage) {
                Ok(entry) => {
                    self.metrics.record_append(started.elapsed().as_secs_f64());
                    tracing::debug!(
                        chain = %chain,
                        sequence = entry.sequence,
                        action = %entry.action,
                        hash = %entry.hash,
                        "Entry appended"
                    );
                    return Ok(entry);
                }
                Err(Error::ChainConflict(detail))
                    if attempt < self.config.chain.max_append_retries =>
                {
                    attempt += 1;
                    self.metrics.record_retry();
                    let backoff = self
                        .config
                        .chain
                        .retry_backoff_ms
                        .saturating_mul(1 << (attempt - 1).min(10));
                    tracing::warn!(
                        chain = %chain,
                        attempt,
                        backoff_ms = backoff,
                        detail = %detail,
                        "Chain tail moved during append, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(backoff));
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!(chain = %chain, error = %e, "Append failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn try_append<F>(&self, chain: &ChainId, stage: &mut F) -> Result<LedgerEntry>
    where
        F: FnMut(&StorageTxn<'_>) -> Result<AppendRequest>,
    {
        let txn = self.storage.begin();
        let tail = txn.tail_for_update(chain)?;

        let request = stage(&txn)?;
        request.validate()?;

        let entry = self.build_entry(chain, tail, request)?;
        txn.append_entry(&entry)?;
        txn.commit()?;
        Ok(entry)
    }

    fn build_entry(
        &self,
        chain: &ChainId,
        tail: Option<ChainTail>,
        request: AppendRequest,
    ) -> Result<LedgerEntry> {
        let (sequence, previous_hash) = match tail {
            Some(tail) => {
                // Never chain off an empty or corrupt link
                if !is_digest(&tail.hash) {
                    return Err(Error::ChainIntegrity(format!(
                        "tail marker of {} does not hold a digest",
                        chain
                    )));
                }
                (tail.sequence + 1, tail.hash)
            }
            None => (0, GENESIS_HASH.to_string()),
        };

        let created_at = crypto::truncate_micros(Utc::now());
        let timestamp = request
            .occurred_at
            .map(crypto::truncate_micros)
            .unwrap_or(created_at);

        let mut entry = LedgerEntry {
            id: Uuid::now_v7(),
            chain_id: chain.clone(),
            sequence,
            retention_years: self.retention.years_for(&request.resource_type),
            action: request.action,
            resource_type: request.resource_type,
            resource_id: request.resource_id,
            actor_id: request.actor_id,
            timestamp,
            old_values: request.old_values,
            new_values: request.new_values,
            reason: request.reason,
            previous_hash,
            hash: String::new(),
            signature: None,
            immutable: true,
            created_at,
        };
        entry.hash = entry.compute_hash();
        entry.signature = self.keypair.as_ref().map(|kp| kp.seal(&entry.hash));

        Ok(entry)
    }

    fn chain_lock(&self, chain: &ChainId) -> Arc<Mutex<()>> {
        self.locks
            .entry(chain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    // Reads

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        self.storage.get_entry(entry_id)
    }

    /// Full chain in sequence order
    pub fn chain_entries(&self, chain: &ChainId) -> Result<Vec<LedgerEntry>> {
        self.storage.chain_entries(chain)
    }

    /// Every entry that touched one resource, oldest first
    pub fn resource_history(
        &self,
        chain: &ChainId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        self.storage.resource_entries(chain, resource_type, resource_id)
    }

    /// Entries of a chain matching a filter, oldest first
    pub fn search(&self, chain: &ChainId, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .storage
            .chain_entries(chain)?
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .collect())
    }

    /// Current tail marker of a chain
    pub fn chain_tail(&self, chain: &ChainId) -> Result<Option<ChainTail>> {
        self.storage.tail(chain)
    }

    /// Every chain with at least one entry
    pub fn chains(&self) -> Result<Vec<ChainId>> {
        self.storage.chains()
    }

    // Verification

    /// Summary verification: `valid` iff every check passes
    pub fn verify_integrity(&self, chain: &ChainId) -> Result<IntegrityReport> {
        Ok(self.verify_detailed(chain)?.report())
    }

    /// Verify every chain in the store
    pub fn verify_all(&self) -> Result<Vec<IntegrityCheck>> {
        self.chains()?
            .iter()
            .map(|chain| self.verify_detailed(chain))
            .collect()
    }

    /// Walk a chain and report every violation found.
    ///
    /// Read-only and idempotent. A corrupt entry is reported, never fatal;
    /// only a storage failure aborts the walk.
    pub fn verify_detailed(&self, chain: &ChainId) -> Result<IntegrityCheck> {
        // Tail first: entries committed after this read are still walked,
        // they just are not compared against the marker
        let tail = self.storage.tail(chain)?;
        let scanned = self.storage.scan_chain(chain)?;

        let tail_missing = tail.is_none();
        let mut walk = ChainWalk::new(tail);
        for item in &scanned {
            match item {
                ScannedEntry::Entry(entry) => walk.check_entry(
                    entry,
                    self.verifying_key.as_ref(),
                    self.config.features.require_seals,
                ),
                ScannedEntry::Unreadable { sequence, error } => {
                    walk.check_unreadable(*sequence, error)
                }
            }
        }

        // Re-read: a marker that appeared after the scan began is a concurrent first append
        let marker_lost =
            tail_missing && !scanned.is_empty() && self.storage.tail(chain)?.is_none();

        let check = IntegrityCheck {
            chain_id: chain.clone(),
            total_entries: scanned.len() as u64,
            violations: walk.finish(marker_lost),
        };

        if check.is_valid() {
            tracing::info!(chain = %chain, entries = check.total_entries, "Chain verified");
        } else {
            self.metrics.record_violations(check.violations.len());
            for violation in &check.violations {
                tracing::error!(
                    chain = %chain,
                    sequence = violation.sequence,
                    entry_id = ?violation.entry_id,
                    kind = ?violation.kind,
                    detail = %violation.detail,
                    "Integrity violation"
                );
            }
        }

        Ok(check)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("data_dir", &self.config.data_dir)
            .field("sealing", &self.keypair.is_some())
            .finish_non_exhaustive()
    }
}

/// What the next entry must link to
enum Link {
    Genesis,
    Hash(String),
    /// Predecessor was unreadable; the link cannot be checked
    Unknown,
}

/// Running state of one verification pass
struct ChainWalk {
    tail: Option<ChainTail>,
    tail_seen: bool,
    expected_sequence: u64,
    link: Link,
    violations: Vec<IntegrityViolation>,
}

impl ChainWalk {
    fn new(tail: Option<ChainTail>) -> Self {
        Self {
            tail,
            tail_seen: false,
            expected_sequence: 0,
            link: Link::Genesis,
            violations: Vec::new(),
        }
    }

    fn flag(&mut self, entry: &LedgerEntry, kind: ViolationKind, detail: String) {
        self.violations.push(IntegrityViolation {
            entry_id: Some(entry.id),
            sequence: entry.sequence,
            kind,
            detail,
        });
    }

    fn check_entry(
        &mut self,
        entry: &LedgerEntry,
        verifying_key: Option<&[u8; 32]>,
        require_seals: bool,
    ) {
        if entry.sequence != self.expected_sequence {
            let detail = format!(
                "expected sequence {}, found {}",
                self.expected_sequence, entry.sequence
            );
            self.flag(entry, ViolationKind::SequenceGap, detail);
        }

        match std::mem::replace(&mut self.link, Link::Hash(entry.hash.clone())) {
            Link::Genesis if !entry.is_genesis() => {
                let detail = format!("first entry links to {}", entry.previous_hash);
                self.flag(entry, ViolationKind::InvalidGenesis, detail);
            }
            Link::Hash(expected) if entry.previous_hash != expected => {
                let detail = format!(
                    "previous hash {} does not match predecessor {}",
                    entry.previous_hash, expected
                );
                self.flag(entry, ViolationKind::BrokenLink, detail);
            }
            _ => {}
        }

        if !entry.immutable {
            self.flag(entry, ViolationKind::MutableFlag, "immutable flag cleared".to_string());
        }

        let recomputed = entry.compute_hash();
        if entry.hash != recomputed {
            let detail = format!("stored {} but recomputed {}", entry.hash, recomputed);
            self.flag(entry, ViolationKind::HashMismatch, detail);
        }

        match (&entry.signature, verifying_key) {
            (Some(seal), Some(key)) => {
                if let Err(e) = crypto::verify_seal(&entry.hash, seal, key) {
                    self.flag(entry, ViolationKind::BadSignature, e.to_string());
                }
            }
            (Some(_), None) => {
                let detail = "seal present but no verifying key configured".to_string();
                self.flag(entry, ViolationKind::BadSignature, detail);
            }
            (None, _) if require_seals => {
                self.flag(entry, ViolationKind::BadSignature, "seal missing".to_string());
            }
            (None, _) => {}
        }

        if let Some(tail) = &self.tail {
            if tail.sequence == entry.sequence {
                self.tail_seen = true;
                if tail.hash != entry.hash {
                    let detail = format!("tail marker holds {}", tail.hash);
                    self.flag(entry, ViolationKind::TailMismatch, detail);
                }
            }
        }

        self.expected_sequence = entry.sequence + 1;
    }

    fn finish(mut self, marker_lost: bool) -> Vec<IntegrityViolation> {
        match &self.tail {
            Some(tail) if !self.tail_seen => self.violations.push(IntegrityViolation {
                entry_id: None,
                sequence: tail.sequence,
                kind: ViolationKind::TailMismatch,
                detail: "tail marker points at a missing entry".to_string(),
            }),
            None if marker_lost => self.violations.push(IntegrityViolation {
                entry_id: None,
                sequence: 0,
                kind: ViolationKind::TailMismatch,
                detail: "chain has entries but no tail marker".to_string(),
            }),
            _ => {}
        }
        self.violations
    }

    fn check_unreadable(&mut self, sequence: u64, error: &str) {
        self.violations.push(IntegrityViolation {
            entry_id: None,
            sequence,
            kind: ViolationKind::Unreadable,
            detail: error.to_string(),
        });
        if self.tail.as_ref().is_some_and(|t| t.sequence == sequence) {
            self.tail_seen = true;
        }
        self.link = Link::Unknown;
        self.expected_sequence = sequence + 1;
    }
}
