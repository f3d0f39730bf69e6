#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use threadhub_kernel_contracts::account::{
    Account, AccountContext, AccountKind, ApiKey, ApiKeyKind, OwnerKey, SessionId,
};
use threadhub_kernel_contracts::ownership::{IpnsKeyRecord, ThreadOwnershipInput};
use threadhub_kernel_contracts::thread::{ThreadId, ThreadVariant};
use threadhub_kernel_contracts::MonotonicTimeNs;
use threadhub_storage::repo::{
    IpnsKeyRepo, SessionDirectory, SharedThreadStore, ThreadOwnershipRepo,
};
use threadhub_storage::StorageError;

fn journal_path(tag: &str) -> PathBuf {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "threadhub_journal_{tag}_{}_{seed}.jsonl",
        std::process::id()
    ))
}

fn owner() -> OwnerKey {
    OwnerKey::new("dbw_journal_owner").unwrap()
}

#[tokio::test]
async fn at_journal_db_01_mutations_survive_reopen() {
    let path = journal_path("reopen");
    let kept = ThreadId::random_v1(ThreadVariant::Raw);
    let dropped = ThreadId::random_v1(ThreadVariant::Raw);
    {
        let s = SharedThreadStore::open(&path).unwrap();
        s.create(
            ThreadOwnershipInput::v1(kept.clone(), owner(), None, Some("kept".to_string()), true)
                .unwrap(),
        )
        .await
        .unwrap();
        s.create(ThreadOwnershipInput::v1(dropped.clone(), owner(), None, None, false).unwrap())
            .await
            .unwrap();
        s.create_key(IpnsKeyRecord::v1("key_1", "cid_1", kept.clone(), MonotonicTimeNs(5)).unwrap())
            .await
            .unwrap();
        s.delete(&dropped, &owner()).await.unwrap();
    }

    let lines = std::fs::read_to_string(&path).unwrap();
    assert_eq!(lines.lines().count(), 4);

    let reopened = SharedThreadStore::open(&path).unwrap();
    let rows = reopened.list_by_owner(&owner()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, kept);
    assert_eq!(rows[0].name.as_deref(), Some("kept"));
    assert_eq!(reopened.list_by_thread_id(&kept).await.unwrap().len(), 1);
    assert!(reopened.get(&dropped, &owner()).await.unwrap_err().is_not_found());

    let _ = std::fs::remove_file(path);
}

#[test]
fn at_journal_db_02_unknown_schema_version_fails_replay() {
    let path = journal_path("schema");
    std::fs::write(
        &path,
        "{\"schema_version\":9,\"op\":{\"ipns_key_deleted\":{\"name\":\"k\"}}}\n",
    )
    .unwrap();

    let err = SharedThreadStore::open(&path).unwrap_err();
    let StorageError::Journal { reason, .. } = err else {
        panic!("expected journal error");
    };
    assert!(reason.contains("schema_version=9"));

    let _ = std::fs::remove_file(path);
}

#[test]
fn at_journal_db_03_garbage_line_fails_replay() {
    let path = journal_path("garbage");
    std::fs::write(&path, "\nnot json\n").unwrap();

    let err = SharedThreadStore::open(&path).unwrap_err();
    let StorageError::Journal { reason, .. } = err else {
        panic!("expected journal error");
    };
    assert!(reason.contains("line 2"));

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn at_journal_db_04_failed_append_leaves_no_directory_rows() {
    let path = journal_path("unwritable");
    let s = SharedThreadStore::open(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();

    let key = ApiKey::v1("ak_lost", owner(), ApiKeyKind::Account, true).unwrap();
    let err = s.register_api_key(key.clone()).unwrap_err();
    assert!(matches!(err, StorageError::Journal { .. }));
    assert!(s.api_key("ak_lost").await.unwrap().is_none());

    let session = SessionId::new("sess_lost").unwrap();
    let user = Account::v1(owner(), "alice", AccountKind::Developer).unwrap();
    let err = s
        .register_session(session.clone(), AccountContext::for_user(user.clone()))
        .unwrap_err();
    assert!(matches!(err, StorageError::Journal { .. }));
    assert!(s.account_for_session(&session).await.unwrap().is_none());

    std::fs::remove_dir(&path).unwrap();
    std::fs::write(&path, "").unwrap();
    s.register_api_key(key).unwrap();
    s.register_session(session.clone(), AccountContext::for_user(user))
        .unwrap();
    assert!(s.account_for_session(&session).await.unwrap().is_some());

    let _ = std::fs::remove_file(path);
}
