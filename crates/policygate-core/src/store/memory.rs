use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;

use super::Store;

/// Volatile store: `namespace -> {key -> value}`. Data is lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .data
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned()))
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        if let Some(mut ns) = self.data.get_mut(namespace) {
            ns.remove(key);
            if ns.is_empty() {
                drop(ns);
                self.data.remove_if(namespace, |_, v| v.is_empty());
            }
        }
        Ok(())
    }

    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .data
            .get(namespace)
            .map(|ns| ns.contains_key(key))
            .unwrap_or(false))
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<()> {
        self.data.remove(namespace);
        Ok(())
    }
}
