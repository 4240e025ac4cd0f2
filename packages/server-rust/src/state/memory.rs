//! In-memory [`SharedStateStore`] backed by [`DashMap`].
//!
//! Every read-modify-write goes through the `DashMap` entry API, which holds
//! the shard write lock for the duration of the closure, so compare-and-swap
//! is atomic per key. There is no cross-key transaction.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{Expiry, StateError, StateKey, StateValue};
use crate::traits::SharedStateStore;

#[derive(Debug, Clone)]
struct Entry {
    value: StateValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

fn deadline(expiry: Expiry, previous: Option<&Entry>, now: Instant) -> Option<Instant> {
    match expiry {
        Expiry::Never => None,
        Expiry::After(ttl) => Some(now + ttl),
        Expiry::Preserve => previous.and_then(|e| e.expires_at),
    }
}

/// Single-process shared state with strict per-key consistency.
pub struct InMemorySharedState {
    entries: DashMap<StateKey, Entry>,
}

impl InMemorySharedState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemorySharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStateStore for InMemorySharedState {
    async fn get(&self, key: &StateKey) -> Result<Option<StateValue>, StateError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &StateKey, value: StateValue, expiry: Expiry) -> Result<(), StateError> {
        let now = Instant::now();
        match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let previous = Some(occupied.get()).filter(|e| e.is_live(now));
                let expires_at = deadline(expiry, previous, now);
                occupied.insert(Entry { value, expires_at });
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value,
                    expires_at: deadline(expiry, None, now),
                });
            }
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected: Option<&StateValue>,
        new: StateValue,
        expiry: Expiry,
    ) -> Result<bool, StateError> {
        let now = Instant::now();
        match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let live = Some(occupied.get()).filter(|e| e.is_live(now));
                if live.map(|e| &e.value) != expected {
                    return Ok(false);
                }
                let expires_at = deadline(expiry, live, now);
                occupied.insert(Entry {
                    value: new,
                    expires_at,
                });
                Ok(true)
            }
            MapEntry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(Entry {
                    value: new,
                    expires_at: deadline(expiry, None, now),
                });
                Ok(true)
            }
        }
    }

    async fn remove(&self, key: &StateKey) -> Result<Option<StateValue>, StateError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| e)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}
