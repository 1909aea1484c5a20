use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use policygate_core::error::{GateError, Result};
use policygate_core::{SharedStore, StoreSlot};

/// Key under which stateful policies keep their configuration.
pub const CONFIG_KEY: &str = "_config";

/// Configuration held in memory and mirrored into the policy's namespace.
///
/// `setup` writes the in-memory value and marks it synced. A store bound
/// with `bind` (no priming) is unsynced: every evaluation reloads `_config`
/// first, so the latest store write beats the constructor defaults.
pub(crate) struct Persisted<T> {
    policy: String,
    namespace: String,
    state: RwLock<T>,
    synced: AtomicBool,
    store: StoreSlot,
}

impl<T> Persisted<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(policy: &str, namespace: String, initial: T) -> Self {
        Self {
            policy: policy.to_string(),
            namespace,
            state: RwLock::new(initial),
            synced: AtomicBool::new(false),
            store: StoreSlot::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let g = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&g)
    }

    pub fn snapshot(&self) -> T {
        self.read(T::clone)
    }

    pub fn store(&self) -> Result<SharedStore> {
        self.store.get(&self.policy)
    }

    /// Attach the store and prime it with the current configuration.
    pub async fn setup(&self, store: SharedStore) -> Result<()> {
        self.store.attach(store);
        self.persist().await
    }

    /// Attach the store without priming it.
    pub fn bind(&self, store: SharedStore) {
        self.store.attach(store);
        self.synced.store(false, Ordering::Release);
    }

    pub async fn reload_if_stale(&self) -> Result<()> {
        if self.is_synced() {
            return Ok(());
        }
        let store = self.store()?;
        if let Some(raw) = store.get(&self.namespace, CONFIG_KEY).await? {
            let loaded: T = serde_json::from_value(raw).map_err(|e| GateError::store("load", e))?;
            let mut g = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *g = loaded;
        }
        Ok(())
    }

    /// Mutate in memory; re-persist the whole value if already synced.
    pub async fn update(&self, f: impl FnOnce(&mut T) + Send) -> Result<()> {
        {
            let mut g = self.state.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut g);
        }
        if self.is_synced() {
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let store = self.store()?;
        let value = serde_json::to_value(self.snapshot()).map_err(|e| GateError::store("persist", e))?;
        store.set(&self.namespace, CONFIG_KEY, value).await?;
        self.synced.store(true, Ordering::Release);
        Ok(())
    }
}
