//! Lifecycle guard
//!
//! One engine protects every guarded record type. A type supplies its
//! [`LifecyclePolicy`]: which states are final, which fields may still change
//! once final, and the rank of each state so that a final record can only
//! move forward. An empty allow-list means full freeze.
//!
//! The guard itself is pure. [`crate::RecordStore`] runs it inside the same
//! transaction as the write it protects.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::{Error, Result};

/// Per-type guard parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    resource_type: String,
    /// (state, rank); higher rank is further along
    states: Vec<(String, u8)>,
    final_states: BTreeSet<String>,
    allowed_when_final: BTreeSet<String>,
}

impl LifecyclePolicy {
    /// Create a policy for a resource type
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            states: Vec::new(),
            final_states: BTreeSet::new(),
            allowed_when_final: BTreeSet::new(),
        }
    }

    /// Register a state with its rank
    pub fn state(mut self, name: &str, rank: u8, is_final: bool) -> Self {
        self.states.push((name.to_string(), rank));
        if is_final {
            self.final_states.insert(name.to_string());
        }
        self
    }

    /// Fields that remain mutable once final
    pub fn allow_when_final(mut self, fields: &[&str]) -> Self {
        self.allowed_when_final.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Resource type this policy guards
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Whether a state is terminal for ordinary mutation
    pub fn is_final(&self, state: &str) -> bool {
        self.final_states.contains(state)
    }

    /// Final record accepts no change at all
    pub fn is_full_freeze(&self) -> bool {
        self.allowed_when_final.is_empty()
    }

    fn rank(&self, state: &str) -> Option<u8> {
        self.states
            .iter()
            .find(|(name, _)| name == state)
            .map(|(_, rank)| *rank)
    }

    /// Reject changes to frozen fields of a final record.
    ///
    /// Non-final records pass unconditionally. A fully frozen record rejects
    /// every attempt, even one that changes nothing the caller can see.
    pub fn guard(
        &self,
        resource_id: &str,
        previous_state: &str,
        changed_fields: &BTreeSet<String>,
    ) -> Result<()> {
        if !self.is_final(previous_state) {
            return Ok(());
        }

        let offending: Vec<String> = if self.is_full_freeze() {
            changed_fields.iter().cloned().collect()
        } else {
            changed_fields
                .difference(&self.allowed_when_final)
                .cloned()
                .collect()
        };

        if offending.is_empty() && !self.is_full_freeze() {
            return Ok(());
        }

        tracing::warn!(
            resource_type = %self.resource_type,
            resource_id,
            previous_state,
            fields = ?offending,
            "Rejected mutation of finalized record"
        );

        Err(Error::ImmutableRecord {
            resource_type: self.resource_type.clone(),
            resource_id: resource_id.to_string(),
            fields: offending,
        })
    }

    /// Final records are never deleted; every field counts as offending
    pub fn guard_delete(
        &self,
        resource_id: &str,
        state: &str,
        fields: &BTreeSet<String>,
    ) -> Result<()> {
        if !self.is_final(state) {
            return Ok(());
        }
        Err(Error::ImmutableRecord {
            resource_type: self.resource_type.clone(),
            resource_id: resource_id.to_string(),
            fields: fields.iter().cloned().collect(),
        })
    }

    /// Reject backward moves out of a final state
    pub fn check_transition(&self, resource_id: &str, from: &str, to: &str) -> Result<()> {
        if from == to || !self.is_final(from) {
            return Ok(());
        }

        let forward = match (self.rank(from), self.rank(to)) {
            (Some(from_rank), Some(to_rank)) => to_rank > from_rank,
            _ => false,
        };

        if forward {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                resource_type: self.resource_type.clone(),
                resource_id: resource_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// A record type whose mutations are guarded and audited
pub trait FinancialRecord: Serialize + DeserializeOwned {
    /// Resource type used for keys, actions and retention
    const RESOURCE_TYPE: &'static str;

    /// Stable record id
    fn record_id(&self) -> String;

    /// Current lifecycle state
    fn lifecycle_state(&self) -> String;

    /// Guard parameters for this type
    fn policy() -> LifecyclePolicy;
}

/// Top-level fields whose values differ between two serialized records
pub fn changed_fields(before: &Value, after: &Value) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}

/// Project the given fields out of a serialized record
pub fn project(values: &Value, fields: &BTreeSet<String>) -> Value {
    let mut out = serde_json::Map::new();
    for field in fields {
        out.insert(
            field.clone(),
            values.get(field).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}

/// `BankTransaction` + `UPDATED` → `BANK_TRANSACTION_UPDATED`
pub fn action_name(resource_type: &str, verb: &str) -> String {
    let mut name = String::with_capacity(resource_type.len() + verb.len() + 4);
    for (i, c) in resource_type.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            name.push('_');
        }
        name.push(c.to_ascii_uppercase());
    }
    name.push('_');
    name.push_str(verb);
    name
}
