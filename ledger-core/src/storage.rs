//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only ledger entries (key: chain || 0x00 || sequence)
//! - `tails` - Chain-tail marker per chain (key: chain)
//! - `entry_index` - Entry id → entries key
//! - `resource_index` - Per-resource history (key: chain || type || id || sequence)
//! - `records` - Guarded financial records (key: chain || type || id)
//!
//! All writes go through optimistic transactions. Writers read the chain
//! tail with `get_for_update`, so two commits built on the same tail can
//! never both succeed: the loser fails with `Busy` and is retried by the
//! ledger. There is no update or delete path for `entries`.

use crate::{
    error::{Error, Result},
    types::{ChainId, ChainTail, LedgerEntry},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    OptimisticTransactionDB, Options, SingleThreaded, Transaction,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_TAILS: &str = "tails";
const CF_ENTRY_INDEX: &str = "entry_index";
const CF_RESOURCE_INDEX: &str = "resource_index";
const CF_RECORDS: &str = "records";

/// Key separator; forbidden inside chain ids, resource types and ids
const SEP: u8 = 0x00;

type Db = OptimisticTransactionDB<SingleThreaded>;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Db,
}

/// A guarded record as persisted in the `records` column family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Incremented on every committed write, starting at 1
    pub version: u64,
    /// Lifecycle state at the time of the write
    pub state: String,
    /// Serialized record
    pub body: Value,
}

/// Result of scanning one stored entry
#[derive(Debug, Clone)]
pub enum ScannedEntry {
    /// Entry decoded successfully
    Entry(LedgerEntry),
    /// Bytes under this key are not a valid entry
    Unreadable {
        /// Sequence taken from the storage key
        sequence: u64,
        /// Decoder error
        error: String,
    },
}

impl Storage {
    /// Every column family, in open order (offline tooling must open all of them)
    pub const COLUMN_FAMILIES: [&'static str; 5] =
        [CF_ENTRIES, CF_TAILS, CF_ENTRY_INDEX, CF_RESOURCE_INDEX, CF_RECORDS];

    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Append-heavy, read-rarely workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_TAILS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ENTRY_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_RESOURCE_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_RECORDS, Self::cf_options_hot()),
        ];

        let db = Db::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = Self::COLUMN_FAMILIES.len(),
            "Opened ledger store"
        );

        Ok(Self { db })
    }

    // Column family options

    fn cf_options_cold() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Read on every write; favour speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Begin an optimistic transaction
    pub fn begin(&self) -> StorageTxn<'_> {
        StorageTxn {
            storage: self,
            txn: self.db.transaction(),
        }
    }

    // Entry reads

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf_index = self.cf_handle(CF_ENTRY_INDEX)?;
        let entry_key = self
            .db
            .get_cf(cf_index, entry_id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("entry {}", entry_id)))?;

        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(cf, &entry_key)?
            .ok_or_else(|| Error::NotFound(format!("entry {}", entry_id)))?;

        Ok(serde_json::from_slice(&value)?)
    }

    /// Get entry by chain position
    pub fn get_entry_at(&self, chain: &ChainId, sequence: u64) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(cf, Self::entry_key(chain, sequence))?
            .ok_or_else(|| Error::NotFound(format!("entry {}#{}", chain, sequence)))?;

        Ok(serde_json::from_slice(&value)?)
    }

    /// All entries of a chain in sequence order; fails on the first unreadable one
    pub fn chain_entries(&self, chain: &ChainId) -> Result<Vec<LedgerEntry>> {
        self.scan_chain(chain)?
            .into_iter()
            .map(|scanned| match scanned {
                ScannedEntry::Entry(entry) => Ok(entry),
                ScannedEntry::Unreadable { sequence, error } => Err(Error::ChainIntegrity(
                    format!("entry {}#{} unreadable: {}", chain, sequence, error),
                )),
            })
            .collect()
    }

    /// All entries of a chain in sequence order, tolerating corrupt values
    pub fn scan_chain(&self, chain: &ChainId) -> Result<Vec<ScannedEntry>> {
        let prefix = Self::chain_prefix(chain);
        let mut scanned = Vec::new();

        for (key, value) in self.scan_prefix(CF_ENTRIES, &prefix)? {
            let sequence = Self::trailing_sequence(&key)?;
            scanned.push(match serde_json::from_slice::<LedgerEntry>(&value) {
                Ok(entry) => ScannedEntry::Entry(entry),
                Err(e) => ScannedEntry::Unreadable {
                    sequence,
                    error: e.to_string(),
                },
            });
        }

        Ok(scanned)
    }

    /// Entries that touched one resource, in sequence order
    pub fn resource_entries(
        &self,
        chain: &ChainId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let prefix = Self::resource_prefix(chain, resource_type, resource_id);

        self.scan_prefix(CF_RESOURCE_INDEX, &prefix)?
            .into_iter()
            .map(|(key, _)| {
                let sequence = Self::trailing_sequence(&key)?;
                self.get_entry_at(chain, sequence)
            })
            .collect()
    }

    /// Current chain tail marker
    pub fn tail(&self, chain: &ChainId) -> Result<Option<ChainTail>> {
        let cf = self.cf_handle(CF_TAILS)?;
        match self.db.get_cf(cf, chain.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every chain with an entry or a tail marker, sorted.
    ///
    /// Entries are authoritative: a chain whose marker was removed is still
    /// listed, so whole-store verification cannot lose it.
    pub fn chains(&self) -> Result<Vec<ChainId>> {
        let mut ids = BTreeSet::new();

        // One seek per chain: jump past `chain || 0x00 || *` to the next chain
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let mut seek: Vec<u8> = Vec::new();
        loop {
            let mode = IteratorMode::From(seek.as_slice(), Direction::Forward);
            let next = self.db.iterator_cf(cf_entries, mode).next();
            let Some(item) = next else { break };
            let (key, _) = item?;
            let chain = Self::chain_of_entry_key(&key)?;
            seek = chain.to_vec();
            seek.push(SEP + 1);
            ids.insert(Self::chain_id_from(chain)?);
        }

        let cf_tails = self.cf_handle(CF_TAILS)?;
        for item in self.db.iterator_cf(cf_tails, IteratorMode::Start) {
            let (key, _) = item?;
            ids.insert(Self::chain_id_from(&key)?);
        }

        Ok(ids.into_iter().map(ChainId::new).collect())
    }

    // Record reads

    /// Get a guarded record
    pub fn get_record(
        &self,
        chain: &ChainId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<StoredRecord>> {
        let cf = self.cf_handle(CF_RECORDS)?;
        match self
            .db
            .get_cf(cf, Self::record_key(chain, resource_type, resource_id))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf_name)?;
        let mut items = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push((key, value));
        }

        Ok(items)
    }

    // Key helpers

    /// Storage key of one entry (offline tooling)
    pub fn entry_key(chain: &ChainId, sequence: u64) -> Vec<u8> {
        let mut key = Self::chain_prefix(chain);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn chain_prefix(chain: &ChainId) -> Vec<u8> {
        let mut key = chain.as_str().as_bytes().to_vec();
        key.push(SEP);
        key
    }

    fn record_key(chain: &ChainId, resource_type: &str, resource_id: &str) -> Vec<u8> {
        let mut key = Self::chain_prefix(chain);
        key.extend_from_slice(resource_type.as_bytes());
        key.push(SEP);
        key.extend_from_slice(resource_id.as_bytes());
        key
    }

    fn resource_prefix(chain: &ChainId, resource_type: &str, resource_id: &str) -> Vec<u8> {
        let mut key = Self::record_key(chain, resource_type, resource_id);
        key.push(SEP);
        key
    }

    fn chain_of_entry_key(key: &[u8]) -> Result<&[u8]> {
        // chain || 0x00 || sequence(8)
        if key.len() < 9 || key[key.len() - 9] != SEP {
            return Err(Error::Storage("malformed entry key".to_string()));
        }
        Ok(&key[..key.len() - 9])
    }

    fn chain_id_from(bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Storage(format!("chain key is not UTF-8: {}", e)))
    }

    fn trailing_sequence(key: &[u8]) -> Result<u64> {
        if key.len() < 8 {
            return Err(Error::Storage("key too short for a sequence".to_string()));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&key[key.len() - 8..]);
        Ok(u64::from_be_bytes(bytes))
    }

    // Test hooks: bypass the append path to simulate tampering

    #[cfg(test)]
    pub(crate) fn put_raw_entry(&self, chain: &ChainId, sequence: u64, bytes: &[u8]) -> Result<()> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        self.db.put_cf(cf, Self::entry_key(chain, sequence), bytes)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn delete_raw_tail(&self, chain: &ChainId) -> Result<()> {
        let cf = self.cf_handle(CF_TAILS)?;
        self.db.delete_cf(cf, chain.as_str().as_bytes())?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn delete_raw_entry(&self, chain: &ChainId, sequence: u64) -> Result<()> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        self.db.delete_cf(cf, Self::entry_key(chain, sequence))?;
        Ok(())
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        for chain in self.chains()? {
            if let Some(tail) = self.tail(&chain)? {
                stats.total_chains += 1;
                stats.total_entries += tail.sequence + 1;
            }
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .finish()
    }
}

/// One atomic unit of work: entry, tail marker and record writes commit together
pub struct StorageTxn<'a> {
    storage: &'a Storage,
    txn: Transaction<'a, Db>,
}

impl std::fmt::Debug for StorageTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageTxn")
            .field("storage", self.storage)
            .finish_non_exhaustive()
    }
}

impl<'a> StorageTxn<'a> {
    /// Read the tail marker and register it for conflict detection
    pub fn tail_for_update(&self, chain: &ChainId) -> Result<Option<ChainTail>> {
        let cf = self.storage.cf_handle(CF_TAILS)?;
        match self.txn.get_for_update_cf(cf, chain.as_str().as_bytes(), true)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage an entry with its indices and advance the tail marker
    pub fn append_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let cf_entries = self.storage.cf_handle(CF_ENTRIES)?;
        let entry_key = Storage::entry_key(&entry.chain_id, entry.sequence);

        // Insert-only: an occupied slot means the chain forked
        if self
            .txn
            .get_for_update_cf(cf_entries, &entry_key, true)?
            .is_some()
        {
            return Err(Error::ChainIntegrity(format!(
                "slot {}#{} already occupied",
                entry.chain_id, entry.sequence
            )));
        }
        self.txn
            .put_cf(cf_entries, &entry_key, serde_json::to_vec(entry)?)?;

        let cf_entry_index = self.storage.cf_handle(CF_ENTRY_INDEX)?;
        self.txn
            .put_cf(cf_entry_index, entry.id.as_bytes(), &entry_key)?;

        let cf_resource_index = self.storage.cf_handle(CF_RESOURCE_INDEX)?;
        let mut resource_key =
            Storage::resource_prefix(&entry.chain_id, &entry.resource_type, &entry.resource_id);
        resource_key.extend_from_slice(&entry.sequence.to_be_bytes());
        self.txn.put_cf(cf_resource_index, &resource_key, b"")?;

        let tail = ChainTail {
            sequence: entry.sequence,
            hash: entry.hash.clone(),
        };
        let cf_tails = self.storage.cf_handle(CF_TAILS)?;
        self.txn.put_cf(
            cf_tails,
            entry.chain_id.as_str().as_bytes(),
            bincode::serialize(&tail)?,
        )?;

        Ok(())
    }

    /// Read a guarded record and register it for conflict detection
    pub fn record_for_update(
        &self,
        chain: &ChainId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<StoredRecord>> {
        let cf = self.storage.cf_handle(CF_RECORDS)?;
        match self.txn.get_for_update_cf(
            cf,
            Storage::record_key(chain, resource_type, resource_id),
            true,
        )? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage a record write
    pub fn put_record(
        &self,
        chain: &ChainId,
        resource_type: &str,
        resource_id: &str,
        record: &StoredRecord,
    ) -> Result<()> {
        let cf = self.storage.cf_handle(CF_RECORDS)?;
        self.txn.put_cf(
            cf,
            Storage::record_key(chain, resource_type, resource_id),
            serde_json::to_vec(record)?,
        )?;
        Ok(())
    }

    /// Stage a record removal
    pub fn delete_record(
        &self,
        chain: &ChainId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<()> {
        let cf = self.storage.cf_handle(CF_RECORDS)?;
        self.txn
            .delete_cf(cf, Storage::record_key(chain, resource_type, resource_id))?;
        Ok(())
    }

    /// Atomic commit; `ChainConflict` if a concurrent commit touched the same keys
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Chains with a tail marker
    pub total_chains: u64,
    /// Entries according to the tail markers
    pub total_entries: u64,
}
