//! Namespaced key-value persistence shared by stateful policies.
//!
//! Each policy owns a namespace (e.g. `rate_limit:standard`) and stores JSON
//! values under keys inside it (user ids, ticket ids, `_config`). Backends
//! never let one namespace observe or affect another.

mod memory;

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GateError, Result};

pub use memory::MemoryStore;

/// Storage backend contract.
///
/// Writes to the same `(namespace, key)` are last-write-wins; there is no
/// transaction spanning several keys.
#[async_trait]
pub trait Store: Send + Sync {
    /// Stored value, or `None` if absent.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;

    /// Create or overwrite a value.
    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()>;

    /// Delete a value. No-op if absent.
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;

    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>>;

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Delete every key within a namespace.
    async fn clear_namespace(&self, namespace: &str) -> Result<()>;
}

pub type SharedStore = Arc<dyn Store>;

/// Holder for the store a policy receives in `setup`.
#[derive(Default)]
pub struct StoreSlot {
    inner: RwLock<Option<SharedStore>>,
}

impl StoreSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held store (a later `setup` wins).
    pub fn attach(&self, store: SharedStore) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(store);
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The attached store, or a config error naming the policy.
    pub fn get(&self, policy: &str) -> Result<SharedStore> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| GateError::config(policy, "used before setup(store) was called"))
    }
}
