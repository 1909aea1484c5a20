//! Durable single-file store backed by redb.
//!
//! Logical schema: one table `policy_store` of `(namespace, key) -> value`
//! rows, `value` being serialized JSON text. Every write runs in its own
//! write transaction and is committed before returning.
//!
//! redb locks its file per process, so every `FileStore` opened on the same
//! path inside one process shares a single `Database`. Another process
//! holding the lock is waited on with bounded backoff.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, DatabaseError, ReadableTable, TableDefinition};
use serde_json::Value;

use policygate_core::error::{GateError, Result};
use policygate_core::Store;

const POLICY_STORE: TableDefinition<(&str, &str), &str> = TableDefinition::new("policy_store");

const LOCK_RETRIES: u32 = 40;
const LOCK_BACKOFF_START: Duration = Duration::from_millis(5);
const LOCK_BACKOFF_MAX: Duration = Duration::from_millis(100);

type OpenDatabases = Mutex<HashMap<PathBuf, Weak<Database>>>;

fn open_databases() -> &'static OpenDatabases {
    static OPEN: OnceLock<OpenDatabases> = OnceLock::new();
    OPEN.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Stable identity for a database file, whether or not it exists yet.
fn canonical(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

/// `Database::create`, waiting while another process holds the file.
fn create_with_backoff(path: &Path) -> Result<Database> {
    let mut delay = LOCK_BACKOFF_START;
    let mut attempt = 0;
    loop {
        match Database::create(path) {
            Ok(db) => return Ok(db),
            Err(DatabaseError::DatabaseAlreadyOpen) if attempt < LOCK_RETRIES => {
                attempt += 1;
                tracing::debug!(path = %path.display(), attempt, "store file locked, retrying");
                std::thread::sleep(delay);
                delay = (delay * 2).min(LOCK_BACKOFF_MAX);
            }
            Err(e) => return Err(GateError::store("open", e)),
        }
    }
}

fn shared_database(path: &Path) -> Result<Arc<Database>> {
    let key = canonical(path);
    let mut open = open_databases()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(db) = open.get(&key).and_then(Weak::upgrade) {
        return Ok(db);
    }
    open.retain(|_, w| w.strong_count() > 0);

    let db = Arc::new(create_with_backoff(path)?);
    let txn = db.begin_write().map_err(|e| GateError::store("open", e))?;
    txn.open_table(POLICY_STORE)
        .map_err(|e| GateError::store("open", e))?;
    txn.commit().map_err(|e| GateError::store("open", e))?;

    open.insert(key, Arc::downgrade(&db));
    Ok(db)
}

pub struct FileStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl FileStore {
    /// Open (or create) the database file and make sure the table exists.
    ///
    /// Blocks while another process holds the file, so call it from a
    /// blocking context inside a runtime.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = shared_database(&path)?;
        tracing::debug!(path = %path.display(), "file store opened");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a redb operation off the async executor.
    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> std::result::Result<T, redb::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| GateError::store(operation, e))?
            .map_err(|e| GateError::store(operation, e))
    }
}

fn keys_in(
    table: &impl ReadableTable<(&'static str, &'static str), &'static str>,
    namespace: &str,
) -> std::result::Result<Vec<String>, redb::Error> {
    let mut keys = Vec::new();
    for entry in table.range((namespace, "")..)? {
        let (k, _) = entry?;
        let (ns, key) = k.value();
        if ns != namespace {
            break;
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let (ns, k) = (namespace.to_string(), key.to_string());
        let raw = self
            .blocking("get", move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(POLICY_STORE)?;
                let row = table.get((ns.as_str(), k.as_str()))?;
                Ok(row.map(|v| v.value().to_string()))
            })
            .await?;

        raw.map(|text| serde_json::from_str(&text).map_err(|e| GateError::store("get", e)))
            .transpose()
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value).map_err(|e| GateError::store("set", e))?;
        let (ns, k) = (namespace.to_string(), key.to_string());
        self.blocking("set", move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(POLICY_STORE)?;
                table.insert((ns.as_str(), k.as_str()), text.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let (ns, k) = (namespace.to_string(), key.to_string());
        self.blocking("delete", move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(POLICY_STORE)?;
                table.remove((ns.as_str(), k.as_str()))?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let ns = namespace.to_string();
        self.blocking("list_keys", move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(POLICY_STORE)?;
            keys_in(&table, &ns)
        })
        .await
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        let (ns, k) = (namespace.to_string(), key.to_string());
        self.blocking("exists", move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(POLICY_STORE)?;
            let found = table.get((ns.as_str(), k.as_str()))?.is_some();
            Ok(found)
        })
        .await
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<()> {
        let ns = namespace.to_string();
        self.blocking("clear_namespace", move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(POLICY_STORE)?;
                let keys = keys_in(&table, &ns)?;
                for k in &keys {
                    table.remove((ns.as_str(), k.as_str()))?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }
}
