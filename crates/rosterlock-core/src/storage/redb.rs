//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! [`RedbTransaction`] is a redb `WriteTransaction`; dropping it aborts.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use super::{Storage, StorageError, Transaction};

/// Table: entries
/// Key: (collection, key)
/// Value: CBOR-encoded value
const ENTRIES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("entries");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc). Redb
/// admits one write transaction at a time, so `begin` blocks while another
/// transaction is open.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    type Transaction = RedbTransaction;

    fn begin(&self) -> Result<RedbTransaction, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(RedbTransaction { txn })
    }
}

/// Write transaction over [`RedbStorage`].
pub struct RedbTransaction {
    txn: WriteTransaction,
}

impl RedbTransaction {
    fn collection_keys(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.scan(collection)?.into_iter().map(|(key, _)| key).collect())
    }
}

impl Transaction for RedbTransaction {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let table = self.txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        let value =
            table.get((collection, key)).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn set(&mut self, collection: &str, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut table =
            self.txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        table
            .insert((collection, key), value.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove(&mut self, collection: &str, key: &str) -> Result<(), StorageError> {
        let mut table =
            self.txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        table.remove((collection, key)).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove_collection(&mut self, collection: &str) -> Result<(), StorageError> {
        let keys = self.collection_keys(collection)?;

        let mut table =
            self.txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
        for key in keys {
            table
                .remove((collection, key.as_str()))
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        Ok(())
    }

    fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let table = self.txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        let results =
            table.range((collection, "")..).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut entries = Vec::new();
        for result in results {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let (key_collection, key) = key.value();

            if key_collection != collection {
                break;
            }

            entries.push((key.to_string(), value.value().to_vec()));
        }

        Ok(entries)
    }

    fn commit(self) -> Result<(), StorageError> {
        self.txn.commit().map_err(|e| StorageError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open() -> (TempDir, RedbStorage) {
        let dir = TempDir::new().unwrap();
        let storage = RedbStorage::open(dir.path().join("rosterlock.redb")).unwrap();
        (dir, storage)
    }

    #[test]
    fn commit_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rosterlock.redb");

        {
            let storage = RedbStorage::open(&path).unwrap();
            let mut txn = storage.begin().unwrap();
            txn.set("threads", "g", vec![7]).unwrap();
            txn.commit().unwrap();
        }

        let storage = RedbStorage::open(&path).unwrap();
        let txn = storage.begin().unwrap();
        assert_eq!(txn.get("threads", "g").unwrap(), Some(vec![7]));
    }

    #[test]
    fn drop_aborts() {
        let (_dir, storage) = open();
        {
            let mut txn = storage.begin().unwrap();
            txn.set("threads", "g", vec![7]).unwrap();
        }

        let txn = storage.begin().unwrap();
        assert_eq!(txn.get("threads", "g").unwrap(), None);
    }

    #[test]
    fn scan_stays_within_collection() {
        let (_dir, storage) = open();
        let mut txn = storage.begin().unwrap();
        txn.set("a", "2", vec![2]).unwrap();
        txn.set("a", "1", vec![1]).unwrap();
        txn.set("ab", "0", vec![0]).unwrap();
        txn.set("b", "0", vec![0]).unwrap();

        assert_eq!(
            txn.scan("a").unwrap(),
            vec![("1".to_string(), vec![1]), ("2".to_string(), vec![2])]
        );
    }

    #[test]
    fn remove_collection_leaves_other_collections() {
        let (_dir, storage) = open();
        let mut txn = storage.begin().unwrap();
        txn.set("a", "1", vec![1]).unwrap();
        txn.set("a", "2", vec![2]).unwrap();
        txn.set("b", "1", vec![3]).unwrap();

        txn.remove_collection("a").unwrap();

        assert!(txn.scan("a").unwrap().is_empty());
        assert_eq!(txn.get("b", "1").unwrap(), Some(vec![3]));
    }
}
