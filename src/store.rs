//! Durable storage for UTXO ledger records.
//!
//! The debit ledger sees storage through the [`LedgerStore`] capability: a
//! string-keyed get/put with single-key atomicity. "Record not found" is
//! the `Ok(None)` variant of `get`, distinct from [`StoreError`] (store
//! unreachable or corrupt). The two must never be conflated: a store
//! outage mistaken for "not found" would re-create a record at full
//! balance and reset the spent counter.
//!
//! [`SledLedgerStore`] persists records as JSON values in a single sled
//! tree and flushes on every put. [`MemoryLedgerStore`] holds records in a
//! dashmap for tests and ephemeral deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;

use crate::types::{UtxoId, UtxoLedgerRecord};

/// Errors from the ledger store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Ledger store unavailable: {0}")]
    Backend(String),
    #[error("Ledger record corrupt: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Durable mapping from UTXO identity to its debit record.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    async fn get(&self, utxo_id: &UtxoId) -> Result<Option<UtxoLedgerRecord>, StoreError>;
    async fn put(&self, utxo_id: &UtxoId, record: &UtxoLedgerRecord) -> Result<(), StoreError>;
}

/// Sled-backed [`LedgerStore`], one `utxo` tree holding JSON records.
#[derive(Debug, Clone)]
pub struct SledLedgerStore {
    tree: sled::Tree,
}

impl SledLedgerStore {
    /// Open (or create) the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Use an already-opened sled database.
    pub fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db.open_tree("utxo")?;
        Ok(SledLedgerStore { tree })
    }
}

#[async_trait]
impl LedgerStore for SledLedgerStore {
    async fn get(&self, utxo_id: &UtxoId) -> Result<Option<UtxoLedgerRecord>, StoreError> {
        let raw = self.tree.get(utxo_id.as_str().as_bytes())?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let record: UtxoLedgerRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(record))
            }
        }
    }

    async fn put(&self, utxo_id: &UtxoId, record: &UtxoLedgerRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.tree.insert(utxo_id.as_str().as_bytes(), bytes)?;
        self.tree
            .flush_async()
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

/// In-memory [`LedgerStore`] used by tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    records: DashMap<UtxoId, UtxoLedgerRecord>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get(&self, utxo_id: &UtxoId) -> Result<Option<UtxoLedgerRecord>, StoreError> {
        Ok(self.records.get(utxo_id).map(|entry| entry.clone()))
    }

    async fn put(&self, utxo_id: &UtxoId, record: &UtxoLedgerRecord) -> Result<(), StoreError> {
        self.records.insert(utxo_id.clone(), record.clone());
        Ok(())
    }
}

#[async_trait]
impl<T: LedgerStore> LedgerStore for std::sync::Arc<T> {
    async fn get(&self, utxo_id: &UtxoId) -> Result<Option<UtxoLedgerRecord>, StoreError> {
        self.as_ref().get(utxo_id).await
    }

    async fn put(&self, utxo_id: &UtxoId, record: &UtxoLedgerRecord) -> Result<(), StoreError> {
        self.as_ref().put(utxo_id, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Satoshis, TxId, UnixTimestamp};
    use std::str::FromStr;

    fn sample_record(utxo_id: &UtxoId, txid: &TxId) -> UtxoLedgerRecord {
        let now = UnixTimestamp::now();
        UtxoLedgerRecord {
            utxo_id: utxo_id.clone(),
            txid: txid.clone(),
            vout: 0,
            payer_address: "bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk"
                .parse()
                .unwrap(),
            receiver_address: "bitcoincash:qqlrzp23w08434twmvr4fxw672whkjy0py26r63g3d"
                .parse()
                .unwrap(),
            transaction_value_sat: Satoshis(5000),
            remaining_balance_sat: Satoshis(4000),
            total_debited_sat: Satoshis(1000),
            first_seen: now,
            last_updated: now,
            last_checked: now,
        }
    }

    #[tokio::test]
    async fn test_memory_store_get_put() {
        let store = MemoryLedgerStore::new();
        let txid =
            TxId::from_str("b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7")
                .unwrap();
        let utxo_id = UtxoId::new(&txid, 0);
        assert!(store.get(&utxo_id).await.unwrap().is_none());
        let record = sample_record(&utxo_id, &txid);
        store.put(&utxo_id, &record).await.unwrap();
        assert_eq!(store.get(&utxo_id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let txid =
            TxId::from_str("b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7")
                .unwrap();
        let utxo_id = UtxoId::new(&txid, 0);
        let record = sample_record(&utxo_id, &txid);

        {
            let store = SledLedgerStore::open(dir.path()).unwrap();
            store.put(&utxo_id, &record).await.unwrap();
        }
        let reopened = SledLedgerStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&utxo_id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_sled_store_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledLedgerStore::open(dir.path()).unwrap();
        let txid =
            TxId::from_str("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap();
        assert!(store.get(&UtxoId::new(&txid, 3)).await.unwrap().is_none());
    }
}
