//! Exercises `EtcdCoordination` against a live etcd at `localhost:2379`:
//! `cargo test -p coordination -- --ignored`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coordination::etcd::{EtcdConfig, EtcdCoordination};
use coordination::util::join_path;
use coordination::{CoordinationService, Error, SessionState};

const ETCD_ENDPOINT: &str = "http://localhost:2379";

fn service() -> EtcdCoordination {
    EtcdCoordination::new(EtcdConfig {
        endpoints: vec![ETCD_ENDPOINT.to_string()],
        session_ttl: 3,
        keepalive_interval: Duration::from_secs(1),
        ..Default::default()
    })
}

fn test_root(test_name: &str) -> String {
    format!("/test-{}-{}", test_name, uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires etcd at localhost:2379"]
async fn node_crud_and_children() {
    let root = test_root("crud");
    let session = service().connect().await.unwrap();

    session.create(&join_path(&root, "g/0"), b"i-1").await.unwrap();
    session.create(&join_path(&root, "g/1"), b"i-2").await.unwrap();
    session.create(&join_path(&root, "other/0"), b"i-3").await.unwrap();

    let err = session.create(&join_path(&root, "g/0"), b"i-9").await.unwrap_err();
    assert!(matches!(err, Error::NodeExists(_)));

    let mut children = session.children(&join_path(&root, "g")).await.unwrap();
    children.sort();
    assert_eq!(children, vec!["0", "1"]);

    assert_eq!(
        session.get(&join_path(&root, "g/0")).await.unwrap(),
        Some(b"i-1".to_vec())
    );
    session.delete(&join_path(&root, "g/0")).await.unwrap();
    assert_eq!(session.get(&join_path(&root, "g/0")).await.unwrap(), None);

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Lost);
}

#[tokio::test]
#[ignore = "requires etcd at localhost:2379"]
async fn lock_is_exclusive_until_released() {
    let root = test_root("lock");
    let lock_name = join_path(&root, "_locks/g");
    let service = service();
    let first = service.connect().await.unwrap();
    let second = service.connect().await.unwrap();

    let held = first.lock(&lock_name).await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(300), second.lock(&lock_name)).await;
    assert!(blocked.is_err(), "second session should wait for the lock");

    first.unlock(held).await.unwrap();
    let lock = tokio::time::timeout(Duration::from_secs(5), second.lock(&lock_name))
        .await
        .expect("lock should be granted after release")
        .unwrap();
    second.unlock(lock).await.unwrap();

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires etcd at localhost:2379"]
async fn closing_a_session_notifies_listeners_and_releases_locks() {
    let root = test_root("close");
    let lock_name = join_path(&root, "_locks/g");
    let service = service();
    let first = service.connect().await.unwrap();

    let lost = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&lost);
    first.add_listener(Arc::new(move |state| {
        if state == SessionState::Lost {
            flag.store(true, Ordering::SeqCst);
        }
    }));

    let _held = first.lock(&lock_name).await.unwrap();
    first.close().await.unwrap();
    assert!(lost.load(Ordering::SeqCst));
    assert!(matches!(
        first.get(&lock_name).await,
        Err(Error::SessionLost(_))
    ));

    let second = service.connect().await.unwrap();
    let lock = tokio::time::timeout(Duration::from_secs(2), second.lock(&lock_name))
        .await
        .expect("revoked lease should release the lock")
        .unwrap();
    second.unlock(lock).await.unwrap();
    second.close().await.unwrap();
}
