use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use idsync_kvstore::{Error, Store};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    name: String,
    enabled: bool,
    tags: Vec<String>,
}

fn sample_record() -> Record {
    Record {
        name: "alice".to_owned(),
        enabled: true,
        tags: vec!["staff".to_owned(), "eng".to_owned()],
    }
}

fn open_store() -> (Store, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("state.db")).unwrap();
    (store, dir)
}

#[tokio::test]
async fn set_get_round_trip() {
    let (store, _dir) = open_store();
    let record = sample_record();

    let mut tx = store.begin_tx(true).await.unwrap();
    tx.set("users", b"alice", &record).unwrap();

    // Reads observe staged writes before commit.
    let staged: Record = tx.get("users", b"alice").unwrap();
    assert_eq!(staged, record);

    tx.commit().unwrap();

    let tx = store.begin_tx(false).await.unwrap();
    let loaded: Record = tx.get("users", b"alice").unwrap();
    assert_eq!(loaded, record);
}

#[tokio::test]
async fn missing_bucket_and_key_are_distinct() {
    let (store, _dir) = open_store();

    let mut tx = store.begin_tx(true).await.unwrap();
    let err = tx.get::<Record>("users", b"alice").unwrap_err();
    assert!(matches!(err, Error::BucketNotFound(_)));
    assert!(err.is_not_found());

    tx.set("users", b"alice", &sample_record()).unwrap();
    let err = tx.get::<Record>("users", b"bob").unwrap_err();
    assert!(matches!(err, Error::KeyNotFound));
    assert!(err.is_not_found());

    tx.rollback();
}

#[tokio::test]
async fn set_on_read_only_transaction_fails() {
    let (store, _dir) = open_store();

    let mut tx = store.begin_tx(false).await.unwrap();
    let err = tx.set("users", b"alice", &sample_record()).unwrap_err();
    assert!(matches!(err, Error::ReadOnly));
}

#[tokio::test]
async fn rollback_discards_staged_writes() {
    let (store, _dir) = open_store();

    let mut tx = store.begin_tx(true).await.unwrap();
    tx.set("users", b"alice", &sample_record()).unwrap();
    tx.rollback();

    let tx = store.begin_tx(false).await.unwrap();
    let err = tx.get::<Record>("users", b"alice").unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let (store, _dir) = open_store();

    {
        let mut tx = store.begin_tx(true).await.unwrap();
        tx.set("users", b"alice", &sample_record()).unwrap();
    }

    let tx = store.begin_tx(false).await.unwrap();
    assert!(tx.get::<Record>("users", b"alice").unwrap_err().is_not_found());
}

#[tokio::test]
async fn reopen_recovers_committed_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    let record = sample_record();

    {
        let store = Store::open(&path).unwrap();
        let mut tx = store.begin_tx(true).await.unwrap();
        tx.set("users", b"alice", &record).unwrap();
        tx.commit().unwrap();
    }

    let store = Store::open(&path).unwrap();
    let tx = store.begin_tx(false).await.unwrap();
    let loaded: Record = tx.get("users", b"alice").unwrap();
    assert_eq!(loaded, record);
}

#[tokio::test]
async fn for_each_visits_keys_in_order() {
    let (store, _dir) = open_store();

    let mut tx = store.begin_tx(true).await.unwrap();
    for key in [b"c".as_slice(), b"a", b"b"] {
        tx.set("rows", key, &String::from_utf8_lossy(key).into_owned())
            .unwrap();
    }
    tx.commit().unwrap();

    // One persisted row is shadowed by a staged overwrite.
    let mut tx = store.begin_tx(true).await.unwrap();
    tx.set("rows", b"b", &"staged".to_owned()).unwrap();
    tx.set("rows", b"d", &"d".to_owned()).unwrap();

    let mut seen = Vec::new();
    tx.for_each("rows", |key, value| {
        let value: String = serde_json::from_slice(value).map_err(Error::Decode)?;
        seen.push((key.to_vec(), value));
        Ok(())
    })
    .unwrap();

    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), "a".to_owned()),
            (b"b".to_vec(), "staged".to_owned()),
            (b"c".to_vec(), "c".to_owned()),
            (b"d".to_vec(), "d".to_owned()),
        ]
    );

    tx.rollback();
}

#[tokio::test]
async fn for_each_on_missing_bucket_fails() {
    let (store, _dir) = open_store();

    let tx = store.begin_tx(false).await.unwrap();
    let err = tx.for_each("rows", |_, _| Ok(())).unwrap_err();
    assert!(matches!(err, Error::BucketNotFound(_)));
}

#[tokio::test]
async fn for_each_propagates_visitor_error() {
    let (store, _dir) = open_store();

    let mut tx = store.begin_tx(true).await.unwrap();
    tx.set("rows", b"a", &"a".to_owned()).unwrap();
    tx.commit().unwrap();

    let tx = store.begin_tx(false).await.unwrap();
    let err = tx
        .for_each("rows", |_, _| Err(Error::KeyNotFound))
        .unwrap_err();
    assert!(matches!(err, Error::KeyNotFound));
}

#[tokio::test]
async fn failed_set_poisons_commit() {
    let (store, _dir) = open_store();

    let mut tx = store.begin_tx(true).await.unwrap();
    tx.set("users", b"ok", &sample_record()).unwrap();

    // serde_json cannot encode maps with non-string keys.
    let unencodable: std::collections::HashMap<Vec<u8>, u32> =
        [(vec![1], 1)].into_iter().collect();
    let err = tx.set("users", b"bad", &unencodable).unwrap_err();
    assert!(matches!(err, Error::Encode(_)));

    let err = tx.commit().unwrap_err();
    assert!(matches!(err, Error::Failed(_)));

    // Nothing from the poisoned transaction is visible.
    let tx = store.begin_tx(false).await.unwrap();
    assert!(tx.get::<Record>("users", b"ok").unwrap_err().is_not_found());
}

#[tokio::test]
async fn run_transaction_commits_on_success() {
    let (store, _dir) = open_store();
    let record = sample_record();

    store
        .run_transaction(true, |tx| tx.set("users", b"alice", &record))
        .await
        .unwrap();

    let tx = store.begin_tx(false).await.unwrap();
    let loaded: Record = tx.get("users", b"alice").unwrap();
    assert_eq!(loaded, record);
}

#[tokio::test]
async fn run_transaction_rolls_back_on_error() {
    let (store, _dir) = open_store();

    let err = store
        .run_transaction(true, |tx| {
            tx.set("users", b"alice", &sample_record())?;
            Err(Error::KeyNotFound)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeyNotFound));

    let tx = store.begin_tx(false).await.unwrap();
    assert!(tx.get::<Record>("users", b"alice").unwrap_err().is_not_found());
}

#[tokio::test]
async fn run_transaction_converts_panic_to_error() {
    let (store, _dir) = open_store();

    let err = store
        .run_transaction(true, |tx| {
            tx.set("users", b"alice", &sample_record())?;
            panic!("boom");
        })
        .await
        .unwrap_err();

    match err {
        Error::Panic(message) => assert!(message.contains("boom")),
        other => panic!("unexpected error: {other}"),
    }

    let tx = store.begin_tx(false).await.unwrap();
    assert!(tx.get::<Record>("users", b"alice").unwrap_err().is_not_found());
}

#[tokio::test]
async fn single_writable_transaction_at_a_time() {
    let (store, _dir) = open_store();

    let tx = store.begin_tx(true).await.unwrap();

    // A second writer must block until the first one finishes.
    let blocked = tokio::time::timeout(Duration::from_millis(50), store.begin_tx(true)).await;
    assert!(blocked.is_err());

    // Read-only transactions are not serialized against the writer.
    let read = tokio::time::timeout(Duration::from_millis(50), store.begin_tx(false)).await;
    assert!(read.is_ok());

    tx.commit().unwrap();

    let tx = tokio::time::timeout(Duration::from_secs(1), store.begin_tx(true))
        .await
        .expect("writer slot should be free after commit")
        .unwrap();
    tx.rollback();
}
