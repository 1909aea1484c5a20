//! Store backends and construction from configuration.
//!
//! - `memory`: volatile map-of-maps (re-exported from core), the default.
//! - `file`: durable single-file backend (`FileStore`).

mod file;

use std::sync::Arc;

use serde::Deserialize;

use policygate_core::error::{GateError, Result};
use policygate_core::SharedStore;

pub use file::FileStore;
pub use policygate_core::MemoryStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    #[serde(alias = "sqlite")]
    File,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub path: String,
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            kind: StoreKind::File,
            path: path.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind == StoreKind::File && self.path.trim().is_empty() {
            return Err(GateError::config("store", "file store requires 'path'"));
        }
        Ok(())
    }
}

/// Build a store from configuration.
pub fn open_store(cfg: &StoreConfig) -> Result<SharedStore> {
    cfg.validate()?;
    match cfg.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::File => Ok(Arc::new(FileStore::open(&cfg.path)?)),
    }
}
