//! Shared-state coordination for policies.
//!
//! - [`memory`]: single-node, strictly consistent store backed by `DashMap`
//! - [`sweeper`]: background purge of expired entries
//!
//! Policies never see the store directly: they receive a [`ScopedState`]
//! whose keys are prefixed with the namespace and identity of the policy
//! instance, so two policies can never collide on a logical key.

pub mod memory;
pub mod sweeper;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::traits::SharedStateStore;

pub use memory::InMemorySharedState;
pub use sweeper::{ExpirySweeper, SweepTask};

/// Values are JSON so counters, timestamps and small documents share one shape.
pub type StateValue = serde_json::Value;

/// Fully qualified key of a shared-state entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub namespace: String,
    pub policy: String,
    pub key: String,
}

impl StateKey {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        policy: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            policy: policy.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.namespace, self.policy, self.key)
    }
}

/// Expiry applied by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    /// Expire this long after the write.
    After(Duration),
    /// Keep whatever expiry the entry already had (none for new entries).
    Preserve,
}

/// Errors surfaced by a shared-state backend.
///
/// Unavailability is never reported as absence: a policy receiving
/// `Unavailable` must decide explicitly whether to fail open or closed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    #[error("shared state unavailable: {0}")]
    Unavailable(String),
}

/// Store handle bound to one policy instance's key space.
#[derive(Clone)]
pub struct ScopedState {
    store: Arc<dyn SharedStateStore>,
    namespace: String,
    policy: String,
}

impl ScopedState {
    #[must_use]
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        namespace: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            policy: policy.into(),
        }
    }

    #[must_use]
    pub fn key(&self, key: &str) -> StateKey {
        StateKey::new(&self.namespace, &self.policy, key)
    }

    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if the backend cannot be reached.
    pub async fn get(&self, key: &str) -> Result<Option<StateValue>, StateError> {
        self.store.get(&self.key(key)).await
    }

    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if the backend cannot be reached.
    pub async fn put(&self, key: &str, value: StateValue, expiry: Expiry) -> Result<(), StateError> {
        self.store.put(&self.key(key), value, expiry).await
    }

    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if the backend cannot be reached.
    pub async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&StateValue>,
        new: StateValue,
        expiry: Expiry,
    ) -> Result<bool, StateError> {
        self.store
            .compare_and_swap(&self.key(key), expected, new, expiry)
            .await
    }

    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if the backend cannot be reached.
    pub async fn remove(&self, key: &str) -> Result<Option<StateValue>, StateError> {
        self.store.remove(&self.key(key)).await
    }
}

impl fmt::Debug for ScopedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedState")
            .field("namespace", &self.namespace)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
