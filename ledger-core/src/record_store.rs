//! Guarded record persistence
//!
//! Every create, update and delete of a [`FinancialRecord`] runs the
//! lifecycle guard and appends its audit entry inside one transaction:
//! the record write and the ledger entry commit together or not at all.

use std::collections::BTreeSet;

use crate::{
    lifecycle::{action_name, changed_fields, project, FinancialRecord},
    storage::{StorageTxn, StoredRecord},
    types::{AppendRequest, ChainId, LedgerEntry},
    Error, Ledger, Result,
};

/// A record together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<R> {
    /// Pass back as `expected_version` on the next write
    pub version: u64,
    /// Decoded record
    pub record: R,
}

/// Outcome of a committed record write
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
    /// Record version after the write
    pub version: u64,
    /// Audit entry committed with it
    pub entry: LedgerEntry,
}

/// Record store bound to one ledger
#[derive(Debug, Clone, Copy)]
pub struct RecordStore<'a> {
    ledger: &'a Ledger,
}

impl<'a> RecordStore<'a> {
    /// Bind to a ledger
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Current version of a record
    pub fn get<R: FinancialRecord>(
        &self,
        chain: &ChainId,
        id: &str,
    ) -> Result<Option<Versioned<R>>> {
        match self.ledger.storage().get_record(chain, R::RESOURCE_TYPE, id)? {
            Some(stored) => Ok(Some(Versioned {
                version: stored.version,
                record: serde_json::from_value(stored.body)?,
            })),
            None => Ok(None),
        }
    }

    /// Store a new record (version 1)
    pub fn create<R: FinancialRecord>(
        &self,
        chain: &ChainId,
        record: &R,
        actor_id: &str,
        reason: &str,
    ) -> Result<RecordWrite> {
        let id = record.record_id();
        let action = action_name(R::RESOURCE_TYPE, "CREATED");
        let body = serde_json::to_value(record)?;
        let state = record.lifecycle_state();

        let request = AppendRequest::new(action, R::RESOURCE_TYPE, id.as_str(), actor_id, reason)
            .with_new_values(body.clone());
        request.validate()?;

        let entry = self.ledger.append_with(chain, |txn| {
            if txn.record_for_update(chain, R::RESOURCE_TYPE, &id)?.is_some() {
                return Err(Error::Validation(format!(
                    "{} {} already exists",
                    R::RESOURCE_TYPE,
                    id
                )));
            }
            txn.put_record(
                chain,
                R::RESOURCE_TYPE,
                &id,
                &StoredRecord {
                    version: 1,
                    state: state.clone(),
                    body: body.clone(),
                },
            )?;
            Ok(request.clone())
        })?;

        Ok(RecordWrite { version: 1, entry })
    }

    /// Replace a record, subject to its lifecycle guard.
    ///
    /// `expected_version` must match the stored version, otherwise
    /// `ConcurrentModification`. The audit entry carries only the changed
    /// fields, before and after.
    pub fn update<R: FinancialRecord>(
        &self,
        chain: &ChainId,
        record: &R,
        expected_version: u64,
        actor_id: &str,
        reason: &str,
    ) -> Result<RecordWrite> {
        let id = record.record_id();
        let action = action_name(R::RESOURCE_TYPE, "UPDATED");
        let policy = R::policy();
        let body = serde_json::to_value(record)?;
        let next_state = record.lifecycle_state();

        AppendRequest::new(action.as_str(), R::RESOURCE_TYPE, id.as_str(), actor_id, reason)
            .validate()?;

        let mut version = 0;
        let result = self.ledger.append_with(chain, |txn| {
            let stored = Self::locked(txn, chain, R::RESOURCE_TYPE, &id, expected_version)?;

            let changed = changed_fields(&stored.body, &body);
            policy.guard(&id, &stored.state, &changed)?;
            policy.check_transition(&id, &stored.state, &next_state)?;
            if changed.is_empty() {
                return Err(Error::Validation(format!(
                    "{} {} update changes nothing",
                    R::RESOURCE_TYPE,
                    id
                )));
            }

            version = stored.version + 1;
            txn.put_record(
                chain,
                R::RESOURCE_TYPE,
                &id,
                &StoredRecord {
                    version,
                    state: next_state.clone(),
                    body: body.clone(),
                },
            )?;

            Ok(
                AppendRequest::new(action.as_str(), R::RESOURCE_TYPE, id.as_str(), actor_id, reason)
                    .with_old_values(project(&stored.body, &changed))
                    .with_new_values(project(&body, &changed)),
            )
        });

        let entry = self.count_rejection(result)?;
        Ok(RecordWrite { version, entry })
    }

    /// Remove a non-final record; final records must be corrected instead
    pub fn delete<R: FinancialRecord>(
        &self,
        chain: &ChainId,
        id: &str,
        expected_version: u64,
        actor_id: &str,
        reason: &str,
    ) -> Result<LedgerEntry> {
        let action = action_name(R::RESOURCE_TYPE, "DELETED");
        let policy = R::policy();

        AppendRequest::new(action.as_str(), R::RESOURCE_TYPE, id, actor_id, reason).validate()?;

        let result = self.ledger.append_with(chain, |txn| {
            let stored = Self::locked(txn, chain, R::RESOURCE_TYPE, id, expected_version)?;

            let fields: BTreeSet<String> = stored
                .body
                .as_object()
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default();
            policy.guard_delete(id, &stored.state, &fields)?;

            txn.delete_record(chain, R::RESOURCE_TYPE, id)?;
            Ok(
                AppendRequest::new(action.as_str(), R::RESOURCE_TYPE, id, actor_id, reason)
                    .with_old_values(stored.body),
            )
        });

        self.count_rejection(result)
    }

    /// Read a record for update and check its version
    fn locked(
        txn: &StorageTxn<'_>,
        chain: &ChainId,
        resource_type: &str,
        id: &str,
        expected_version: u64,
    ) -> Result<StoredRecord> {
        let stored = txn
            .record_for_update(chain, resource_type, id)?
            .ok_or_else(|| Error::NotFound(format!("{} {}", resource_type, id)))?;

        if stored.version != expected_version {
            return Err(Error::ConcurrentModification {
                resource_type: resource_type.to_string(),
                resource_id: id.to_string(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        Ok(stored)
    }

    fn count_rejection<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::ImmutableRecord { .. } | Error::InvalidTransition { .. }) = &result {
            self.ledger.metrics().record_guard_rejection();
        }
        result
    }
}
