//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails `begin` and `commit` to verify that a
//! failed message leaves no partial state behind.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use super::{Storage, StorageError, Transaction};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails transaction
/// boundaries based on a configured failure rate. Uses Arc<Mutex<>> for the
/// RNG state, making it Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos tests are reproducible with the
/// same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self { inner, failure_rate, rng: Arc::new(Mutex::new(ChaoticRng::new(seed))) }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn should_fail(rng: &Mutex<ChaoticRng>, failure_rate: f64) -> Result<bool, StorageError> {
    let mut rng = rng.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(rng.next() < failure_rate)
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    type Transaction = ChaoticTransaction<S::Transaction>;

    fn begin(&self) -> Result<Self::Transaction, StorageError> {
        if should_fail(&self.rng, self.failure_rate)? {
            return Err(StorageError::Io("injected begin failure".to_string()));
        }

        Ok(ChaoticTransaction {
            inner: self.inner.begin()?,
            failure_rate: self.failure_rate,
            rng: Arc::clone(&self.rng),
        })
    }
}

/// Transaction whose commit may fail without applying anything.
pub struct ChaoticTransaction<T: Transaction> {
    inner: T,
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
}

impl<T: Transaction> Transaction for ChaoticTransaction<T> {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(collection, key)
    }

    fn set(&mut self, collection: &str, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.inner.set(collection, key, value)
    }

    fn remove(&mut self, collection: &str, key: &str) -> Result<(), StorageError> {
        self.inner.remove(collection, key)
    }

    fn remove_collection(&mut self, collection: &str) -> Result<(), StorageError> {
        self.inner.remove_collection(collection)
    }

    fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.inner.scan(collection)
    }

    fn commit(self) -> Result<(), StorageError> {
        if should_fail(&self.rng, self.failure_rate)? {
            // inner dropped uncommitted
            return Err(StorageError::Io("injected commit failure".to_string()));
        }
        self.inner.commit()
    }
}
