#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use policygate::prelude::*;

#[tokio::test]
async fn chain_from_yaml_and_by_hand_agree() {
    let yaml = r#"
version: 1
policies:
  - name: team
    type: access_group
    config: { users: [alice] }
"#;
    let from_file = load_from_str(yaml)
        .unwrap()
        .build_manager(PolicyRegistry::default())
        .await
        .unwrap();

    let mut factory = PolicyFactory::new();
    let built = factory
        .create_all(&[PolicyConfig::new(
            "team",
            "access_group",
            serde_json::json!({ "users": ["alice"] }),
        )])
        .unwrap();
    let mut by_hand = PolicyManager::new(Arc::new(MemoryStore::new()));
    for p in built {
        by_hand.add_policy(p).await.unwrap();
    }

    assert_eq!(from_file.export(), by_hand.export());

    for manager in [&from_file, &by_hand] {
        let mut ctx = RequestContext::new("bob");
        let r = manager.check_pre_exec_policies(&mut ctx).await.unwrap();
        assert!(!r.allowed());
    }
}
