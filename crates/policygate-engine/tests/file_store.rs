#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use serde_json::json;

use policygate_core::{Policy, RequestContext, SharedStore, Store};
use policygate_engine::policies::{AccessGroupConfig, AccessGroupPolicy};
use policygate_engine::store::{open_store, FileStore, StoreConfig};

#[tokio::test]
async fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");

    {
        let store = FileStore::open(&path).unwrap();
        store
            .set("ns", "k", json!({"nested": [1, 2.5, "x", null]}))
            .await
            .unwrap();
    }

    let store = FileStore::open(&path).unwrap();
    assert_eq!(store.path(), path.as_path());
    assert_eq!(
        store.get("ns", "k").await.unwrap(),
        Some(json!({"nested": [1, 2.5, "x", null]}))
    );
    assert!(store.exists("ns", "k").await.unwrap());
    assert_eq!(store.get("ns", "missing").await.unwrap(), None);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("gate.db")).unwrap();

    store.set("a", "k", json!(1)).await.unwrap();
    store.set("ab", "k", json!(2)).await.unwrap();
    store.set("a", "j", json!(3)).await.unwrap();

    assert_eq!(store.list_keys("a").await.unwrap(), ["j", "k"]);
    assert_eq!(store.list_keys("ab").await.unwrap(), ["k"]);
    assert!(store.list_keys("zzz").await.unwrap().is_empty());

    store.clear_namespace("a").await.unwrap();
    assert!(store.list_keys("a").await.unwrap().is_empty());
    assert_eq!(store.get("ab", "k").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn handles_on_one_path_share_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");

    let first = FileStore::open(&path).unwrap();
    let second = FileStore::open(dir.path().join(".").join("gate.db")).unwrap();
    first.set("ns", "k", json!("from first")).await.unwrap();
    assert_eq!(second.get("ns", "k").await.unwrap(), Some(json!("from first")));

    second.set("ns", "k", json!("from second")).await.unwrap();
    assert_eq!(first.get("ns", "k").await.unwrap(), Some(json!("from second")));

    drop((first, second));
    let reopened = FileStore::open(&path).unwrap();
    assert_eq!(reopened.get("ns", "k").await.unwrap(), Some(json!("from second")));
}

#[tokio::test]
async fn clear_removes_every_key_written_before_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path().join("gate.db")).unwrap());

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.set("busy", &format!("k{i:02}"), json!(i)).await })
        })
        .collect();
    for w in writers {
        w.await.unwrap().unwrap();
    }
    store.set("other", "keep", json!(true)).await.unwrap();

    store.clear_namespace("busy").await.unwrap();
    assert!(store.list_keys("busy").await.unwrap().is_empty());
    assert_eq!(store.list_keys("other").await.unwrap(), ["keep"]);
}

#[tokio::test]
async fn set_overwrites_and_delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("gate.db")).unwrap();

    store.set("ns", "k", json!("old")).await.unwrap();
    store.set("ns", "k", json!("new")).await.unwrap();
    assert_eq!(store.get("ns", "k").await.unwrap(), Some(json!("new")));

    store.delete("ns", "k").await.unwrap();
    store.delete("ns", "k").await.unwrap();
    assert!(!store.exists("ns", "k").await.unwrap());
}

#[tokio::test]
async fn policy_state_outlives_the_process_view() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");
    let cfg = || AccessGroupConfig {
        users: vec!["alice".into()],
        ..Default::default()
    };

    {
        let store: SharedStore = Arc::new(FileStore::open(&path).unwrap());
        let group = AccessGroupPolicy::new("team", cfg());
        group.setup(store).await.unwrap();
        group.add_users(&["bob"]).await.unwrap();
    }

    let store = open_store(&StoreConfig::file(path.to_string_lossy())).unwrap();
    let group = AccessGroupPolicy::new("team", cfg());
    group.bind_store(store);

    let mut ctx = RequestContext::new("bob");
    assert!(group.pre_execute(&mut ctx).await.unwrap().allowed());
}

#[test]
fn memory_is_the_default_backend() {
    assert!(open_store(&StoreConfig::memory()).is_ok());
    let err = open_store(&StoreConfig::file("  ")).err().expect("must fail");
    assert_eq!(err.error_type().as_str(), "PolicyConfigError");
}
