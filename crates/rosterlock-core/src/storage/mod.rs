//! Transactional key-value storage consumed by the protocol.
//!
//! Every control message is applied inside one [`Transaction`]. Stores never
//! hold a transaction of their own: callers pass it by `&mut` reference so
//! reads observe earlier writes of the same message and a dropped transaction
//! discards all of them.
//!
//! Values are CBOR-encoded (ciborium). Keys are grouped into named
//! collections that can be scanned in key order.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Serialize, de::DeserializeOwned};

pub use self::redb::RedbStorage;

/// Handle to a transactional key-value engine.
///
/// Must be Clone (shared by the processor and read accessors), Send + Sync
/// and synchronous. Implementations share internal state via Arc, so clones
/// access the same underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Transaction type produced by [`begin`](Self::begin).
    type Transaction: Transaction;

    /// Open a read-write transaction.
    fn begin(&self) -> Result<Self::Transaction, StorageError>;
}

/// A unit of atomic work.
///
/// # Invariants
///
/// - Reads observe the transaction's own uncommitted writes
/// - Dropping without [`commit`](Self::commit) discards every write
/// - [`scan`](Self::scan) returns entries ordered by key
pub trait Transaction {
    /// Raw value under `key`, `None` if absent.
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or overwrite a raw value.
    fn set(&mut self, collection: &str, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove one entry. Removing an absent key is a no-op.
    fn remove(&mut self, collection: &str, key: &str) -> Result<(), StorageError>;

    /// Remove every entry of a collection.
    fn remove_collection(&mut self, collection: &str) -> Result<(), StorageError>;

    /// All entries of a collection, ordered by key.
    fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    /// Make every write durable and visible to later transactions.
    fn commit(self) -> Result<(), StorageError>;

    /// Typed read of a CBOR value.
    fn get_value<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        self.get(collection, key)?.map(|bytes| decode(&bytes)).transpose()
    }

    /// Typed write of a CBOR value.
    fn set_value<T: Serialize>(
        &mut self,
        collection: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = encode(value)?;
        self.set(collection, key, bytes)
    }

    /// Typed scan of a collection, ordered by key.
    fn scan_values<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, T)>, StorageError> {
        self.scan(collection)?
            .into_iter()
            .map(|(key, bytes)| Ok::<_, StorageError>((key, decode(&bytes)?)))
            .collect()
    }
}

/// CBOR-encode a value for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

/// Decode a CBOR value read from storage.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
