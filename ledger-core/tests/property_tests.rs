//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Chain validity: N appends always verify
//! - Linkage: Each entry commits to its predecessor, the first to genesis
//! - Tamper evidence: Editing any stored field flags that entry
//! - Idempotency: Repeated verification always agrees

use ledger_core::{
    crypto, AppendRequest, ChainId, Config, KeyPair, Ledger, Storage, GENESIS_HASH,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

const SEED: [u8; 32] = [42u8; 32];

/// Strategy for generating action tags
fn action_strategy() -> impl Strategy<Value = String> {
    "[A-Z]{3,8}_(CREATED|UPDATED|DELETED)"
}

/// Strategy for generating append requests
fn request_strategy() -> impl Strategy<Value = AppendRequest> {
    (
        action_strategy(),
        prop_oneof![
            Just("Invoice"),
            Just("Expense"),
            Just("Receipt"),
            Just("Contract"),
            Just("CustomThing"),
        ],
        "[a-z0-9]{1,12}",
        "u-[0-9]{1,4}",
        "[a-zA-Z ]{1,40}",
        proptest::option::of(any::<i64>()),
    )
        .prop_filter("reason must not be blank", |(_, _, _, _, reason, _)| {
            !reason.trim().is_empty()
        })
        .prop_map(|(action, resource_type, resource_id, actor, reason, amount)| {
            let request = AppendRequest::new(action, resource_type, resource_id, actor, reason);
            match amount {
                Some(cents) => request.with_new_values(json!({ "amountCents": cents })),
                None => request,
            }
        })
}

/// Stored entry fields, as named on disk
fn field_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("id"),
        Just("chainId"),
        Just("sequence"),
        Just("action"),
        Just("resourceType"),
        Just("resourceId"),
        Just("actorId"),
        Just("timestamp"),
        Just("oldValues"),
        Just("newValues"),
        Just("reason"),
        Just("retentionYears"),
        Just("previousHash"),
        Just("hash"),
        Just("signature"),
        Just("immutable"),
        Just("createdAt"),
    ]
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config
}

fn create_test_ledger() -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(test_config(temp_dir.path()))
        .unwrap()
        .with_keypair(KeyPair::from_seed(&SEED));
    (ledger, temp_dir)
}

/// Change one field so that it differs from what was stored
fn tamper(entry: &mut Value, field: &str) {
    let slot = &mut entry[field];
    *slot = match field {
        "id" => json!(Uuid::new_v4()),
        "sequence" => json!(slot.as_u64().unwrap_or(0) + 100),
        "retentionYears" => json!(slot.as_u64().unwrap_or(0) + 1),
        "timestamp" | "createdAt" => json!("2001-02-03T04:05:06.000007Z"),
        "oldValues" | "newValues" => json!({ "tampered": true }),
        "previousHash" | "hash" => json!("ab".repeat(32)),
        "signature" => json!("00".repeat(64)),
        "immutable" => json!(false),
        _ => json!(format!("{}-edited", slot.as_str().unwrap_or_default())),
    };
}

/// Edit one stored entry behind the ledger's back
fn tamper_on_disk(dir: &Path, chain: &ChainId, sequence: u64, field: &str) -> Uuid {
    let mut opts = rocksdb::Options::default();
    opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
    let db = rocksdb::DB::open_cf(&opts, dir, Storage::COLUMN_FAMILIES).unwrap();
    let cf = db.cf_handle("entries").unwrap();
    let key = Storage::entry_key(chain, sequence);

    let bytes = db.get_cf(cf, &key).unwrap().unwrap();
    let mut entry: Value = serde_json::from_slice(&bytes).unwrap();
    tamper(&mut entry, field);
    db.put_cf(cf, &key, serde_json::to_vec(&entry).unwrap()).unwrap();

    serde_json::from_value(entry["id"].clone()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: Any sequence of appends verifies and every hash recomputes
    #[test]
    fn prop_appends_always_verify(requests in prop::collection::vec(request_strategy(), 1..20)) {
        let (ledger, _dir) = create_test_ledger();
        let chain = ChainId::new("tenant-prop");

        for request in requests.iter().cloned() {
            ledger.append(&chain, request).unwrap();
        }

        let report = ledger.verify_integrity(&chain).unwrap();
        prop_assert!(report.valid);
        prop_assert_eq!(report.total_entries, requests.len() as u64);

        for entry in ledger.chain_entries(&chain).unwrap() {
            prop_assert_eq!(&entry.hash, &entry.compute_hash());
        }
    }

    /// Property: entry[i].previousHash == entry[i-1].hash; entry[0] links to genesis
    #[test]
    fn prop_entries_link(requests in prop::collection::vec(request_strategy(), 1..20)) {
        let (ledger, _dir) = create_test_ledger();
        let chain = ChainId::new("tenant-prop");

        for request in requests {
            ledger.append(&chain, request).unwrap();
        }

        let entries = ledger.chain_entries(&chain).unwrap();
        prop_assert_eq!(&entries[0].previous_hash, GENESIS_HASH);
        for pair in entries.windows(2) {
            prop_assert_eq!(&pair[1].previous_hash, &pair[0].hash);
            prop_assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
    }

    /// Property: Editing any single stored field flags that entry
    #[test]
    fn prop_single_field_tamper_detected(
        requests in prop::collection::vec(request_strategy(), 2..8),
        victim in any::<prop::sample::Index>(),
        field in field_strategy(),
    ) {
        let temp_dir = tempfile::tempdir().unwrap();
        let chain = ChainId::new("tenant-prop");
        let victim = victim.index(requests.len()) as u64;

        {
            let ledger = Ledger::open(test_config(temp_dir.path()))
                .unwrap()
                .with_keypair(KeyPair::from_seed(&SEED));
            for request in requests {
                ledger.append(&chain, request).unwrap();
            }
        }

        let tampered_id = tamper_on_disk(temp_dir.path(), &chain, victim, field);

        let ledger = Ledger::open(test_config(temp_dir.path()))
            .unwrap()
            .with_verifying_key(KeyPair::from_seed(&SEED).public_key());
        let report = ledger.verify_integrity(&chain).unwrap();

        prop_assert!(!report.valid);
        prop_assert!(
            report.invalid_entry_ids.contains(&tampered_id),
            "field {} of entry {} not flagged: {:?}",
            field,
            victim,
            report
        );
    }

    /// Property: Without seals or keys, editing any single stored field still flags that entry
    #[test]
    fn prop_single_field_tamper_detected_unsealed(
        requests in prop::collection::vec(request_strategy(), 2..8),
        victim in any::<prop::sample::Index>(),
        field in field_strategy(),
    ) {
        let temp_dir = tempfile::tempdir().unwrap();
        let chain = ChainId::new("tenant-prop");
        let victim = victim.index(requests.len()) as u64;

        {
            let ledger = Ledger::open(test_config(temp_dir.path())).unwrap();
            for request in requests {
                ledger.append(&chain, request).unwrap();
            }
        }

        let tampered_id = tamper_on_disk(temp_dir.path(), &chain, victim, field);

        let ledger = Ledger::open(test_config(temp_dir.path())).unwrap();
        let report = ledger.verify_integrity(&chain).unwrap();

        prop_assert!(!report.valid);
        prop_assert!(
            report.invalid_entry_ids.contains(&tampered_id),
            "field {} of entry {} not flagged: {:?}",
            field,
            victim,
            report
        );
    }

    /// Property: Verification of an unchanged chain always agrees with itself
    #[test]
    fn prop_verification_idempotent(requests in prop::collection::vec(request_strategy(), 0..10)) {
        let (ledger, _dir) = create_test_ledger();
        let chain = ChainId::new("tenant-prop");

        for request in requests {
            ledger.append(&chain, request).unwrap();
        }

        let first = ledger.verify_detailed(&chain).unwrap();
        let second = ledger.verify_detailed(&chain).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Property: Fetch-by-id returns what was appended
    #[test]
    fn prop_append_roundtrip(request in request_strategy()) {
        let (ledger, _dir) = create_test_ledger();
        let chain = ChainId::new("tenant-prop");

        let entry = ledger.append(&chain, request.clone()).unwrap();
        let fetched = ledger.get_entry(entry.id).unwrap();

        prop_assert_eq!(&fetched.action, &request.action);
        prop_assert_eq!(&fetched.resource_type, &request.resource_type);
        prop_assert_eq!(&fetched.resource_id, &request.resource_id);
        prop_assert_eq!(&fetched.reason, &request.reason);
        prop_assert_eq!(&fetched, &entry);
    }
}

#[test]
fn test_tax_report_deleted_links_to_tail() {
    let (ledger, _dir) = create_test_ledger();
    let chain = ChainId::new("tenant-1");

    ledger
        .append(
            &chain,
            AppendRequest::new("TAX_REPORT_CREATED", "TaxReport", "42", "7", "quarterly filing"),
        )
        .unwrap();
    let tail = ledger.chain_tail(&chain).unwrap().unwrap();

    let entry = ledger
        .append(
            &chain,
            AppendRequest::new("TAX_REPORT_DELETED", "TaxReport", "42", "7", "duplicate filing"),
        )
        .unwrap();

    assert_eq!(entry.previous_hash, tail.hash);
    assert_eq!(
        entry.hash,
        crypto::compute_hash(
            "TAX_REPORT_DELETED",
            &entry.snapshot(),
            &crypto::timestamp_iso(&entry.timestamp),
            &tail.hash,
        )
    );

    let receipt = entry.receipt();
    assert_eq!(receipt.sequence_index, 1);
    assert_eq!(receipt.retention_years, 10);
    assert!(receipt.immutable);
}

#[test]
fn test_two_concurrent_appends_are_ordered() {
    for _ in 0..10 {
        let (ledger, _dir) = create_test_ledger();
        let chain = ChainId::new("tenant-1");

        let (a, b) = std::thread::scope(|scope| {
            let a = scope.spawn(|| {
                ledger.append(&chain, AppendRequest::new("A", "Invoice", "1", "u-1", "first"))
            });
            let b = scope.spawn(|| {
                ledger.append(&chain, AppendRequest::new("B", "Invoice", "2", "u-2", "second"))
            });
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });

        assert_ne!(a.previous_hash, b.previous_hash);
        let (first, second) = if a.sequence < b.sequence { (a, b) } else { (b, a) };
        assert_eq!(second.previous_hash, first.hash);
        assert!(ledger.verify_integrity(&chain).unwrap().valid);
    }
}

#[test]
fn test_concurrent_appends_across_chains() {
    let (ledger, _dir) = create_test_ledger();
    let chains = [ChainId::new("tenant-a"), ChainId::new("tenant-b")];

    std::thread::scope(|scope| {
        for chain in &chains {
            for worker in 0..3 {
                let ledger = &ledger;
                scope.spawn(move || {
                    for i in 0..10 {
                        let id = format!("{}-{}", worker, i);
                        ledger
                            .append(chain, AppendRequest::new("A", "Invoice", id, "u-1", "load"))
                            .unwrap();
                    }
                });
            }
        }
    });

    for chain in &chains {
        let report = ledger.verify_integrity(chain).unwrap();
        assert!(report.valid);
        assert_eq!(report.total_entries, 30);
    }
}
