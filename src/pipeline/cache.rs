//! Run-scoped answer cache keyed by normalized question signatures.
//!
//! Each signature maps to a shared [`OnceCell`] so that concurrent jobs asking
//! the same question resolve through a single in-flight lookup: the first
//! caller runs retrieval and generation, the others wait for its value. A
//! failed resolution leaves the cell empty and a later caller may try again.
//! There is no eviction; the cache lives for one run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::retrieval::{normalize_country, normalize_topic};

/// Normalized identity of a `(country, topic, question)` lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Computes the signature of a lookup.
    ///
    /// Country and topic go through the same normalization as the retrieval
    /// lookup ([`normalize_country`], [`normalize_topic`]), and the question
    /// has its whitespace collapsed before hashing.
    pub fn compute(country: &str, topic: &str, question: &str) -> Self {
        let country = normalize_country(country);
        let topic = normalize_topic(topic);
        let question = question
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let mut hasher = Sha256::new();
        hasher.update(country.as_bytes());
        hasher.update([0x1f]);
        hasher.update(topic.as_bytes());
        hasher.update([0x1f]);
        hasher.update(question.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Get the hash string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub answer: String,
    /// Context as stored in results, already truncated.
    pub context: String,
}

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered without running a resolution.
    pub hits: u64,
    /// Lookups that ran a resolution.
    pub misses: u64,
    /// Signatures with a stored entry.
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate as a value between 0.0 and 1.0, or 0.0 if no accesses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type Slot = Arc<OnceCell<CacheEntry>>;

/// Concurrent memoization layer for answers.
#[derive(Default)]
pub struct AnswerCache {
    slots: RwLock<HashMap<Signature, Slot>>,
    counters: RwLock<(u64, u64)>,
}

impl AnswerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored entry, if a resolution has succeeded.
    pub fn get(&self, signature: &Signature) -> Option<CacheEntry> {
        let slots = self.slots.read().expect("cache read lock poisoned");
        slots.get(signature).and_then(|cell| cell.get().cloned())
    }

    /// Stores an entry. An existing entry for the signature is kept.
    pub fn put(&self, signature: Signature, entry: CacheEntry) {
        let slot = self.slot(&signature);
        // a racing resolution may have filled the slot first; either value is valid
        let _ = slot.set(entry);
    }

    /// Resolves `signature`, running `init` only if no entry exists and no
    /// other caller is currently resolving it.
    ///
    /// Returns the entry and whether it was served without running `init`.
    /// Errors from `init` are returned to the caller that ran it and are not
    /// stored.
    pub async fn resolve<F, Fut, E>(
        &self,
        signature: &Signature,
        init: F,
    ) -> Result<(CacheEntry, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, E>>,
    {
        let slot = self.slot(signature);

        let mut ran_init = false;
        let entry = slot
            .get_or_try_init(|| {
                ran_init = true;
                init()
            })
            .await?
            .clone();

        {
            let mut counters = self.counters.write().expect("stats write lock poisoned");
            if ran_init {
                counters.1 += 1;
            } else {
                counters.0 += 1;
            }
        }

        Ok((entry, !ran_init))
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        let slots = self.slots.read().expect("cache read lock poisoned");
        slots.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (hits, misses) = *self.counters.read().expect("stats read lock poisoned");
        CacheStats {
            hits,
            misses,
            entries: self.len(),
        }
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&self) {
        self.slots.write().expect("cache write lock poisoned").clear();
        *self.counters.write().expect("stats write lock poisoned") = (0, 0);
    }

    fn slot(&self, signature: &Signature) -> Slot {
        {
            let slots = self.slots.read().expect("cache read lock poisoned");
            if let Some(cell) = slots.get(signature) {
                return cell.clone();
            }
        }
        let mut slots = self.slots.write().expect("cache write lock poisoned");
        slots
            .entry(signature.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}
