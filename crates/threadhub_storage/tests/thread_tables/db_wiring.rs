#![forbid(unsafe_code)]

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

fn owner(key: &str) -> OwnerKey {
    OwnerKey::new(key).unwrap()
}

fn db_input(id: &ThreadId, owner_key: &str) -> ThreadOwnershipInput {
    ThreadOwnershipInput::v1(id.clone(), owner(owner_key), None, None, true).unwrap()
}

#[tokio::test]
async fn at_threads_db_01_create_then_get_round_trips() {
    let s = SharedThreadStore::new_in_memory();
    let id = ThreadId::random_v1(ThreadVariant::AccessControlled);
    let input = ThreadOwnershipInput::v1(
        id.clone(),
        owner("dbw_owner_1"),
        Some("ak_user_1".to_string()),
        Some("notes".to_string()),
        true,
    )
    .unwrap();

    let created = s.create(input).await.unwrap();
    let fetched = s.get(&id, &owner("dbw_owner_1")).await.unwrap();
    assert_eq!(created, fetched);
    assert_eq!(fetched.id, id);
    assert_eq!(fetched.owner, owner("dbw_owner_1"));
    assert!(fetched.is_db);
    assert_eq!(fetched.api_key.as_deref(), Some("ak_user_1"));
    assert_eq!(
        s.get_by_name("notes", &owner("dbw_owner_1")).await.unwrap().id,
        id
    );
}

#[tokio::test]
async fn at_threads_db_02_rows_are_scoped_to_owner() {
    let s = SharedThreadStore::new_in_memory();
    let id = ThreadId::random_v1(ThreadVariant::Raw);
    s.create(db_input(&id, "dbw_owner_1")).await.unwrap();

    let err = s.get(&id, &owner("dbw_owner_2")).await.unwrap_err();
    assert!(err.is_not_found());
    let err = s.delete(&id, &owner("dbw_owner_2")).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(s.list_by_owner(&owner("dbw_owner_2")).await.unwrap().len(), 0);
    assert_eq!(s.list_by_owner(&owner("dbw_owner_1")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn at_threads_db_03_one_row_per_thread_id() {
    let s = SharedThreadStore::new_in_memory();
    let id = ThreadId::random_v1(ThreadVariant::Raw);
    s.create(db_input(&id, "dbw_owner_1")).await.unwrap();

    let err = s.create(db_input(&id, "dbw_owner_2")).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey { table: "threads", .. }));
    assert_eq!(s.list_by_owner(&owner("dbw_owner_2")).await.unwrap().len(), 0);
}

#[tokio::test]
async fn at_threads_db_04_delete_removes_row() {
    let s = SharedThreadStore::new_in_memory();
    let id = ThreadId::random_v1(ThreadVariant::Raw);
    s.create(db_input(&id, "dbw_owner_1")).await.unwrap();

    s.delete(&id, &owner("dbw_owner_1")).await.unwrap();
    assert!(s.get(&id, &owner("dbw_owner_1")).await.unwrap_err().is_not_found());
    assert!(s.delete(&id, &owner("dbw_owner_1")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn at_threads_db_05_ipns_keys_listed_per_thread() {
    let s = SharedThreadStore::new_in_memory();
    let a = ThreadId::random_v1(ThreadVariant::Raw);
    let b = ThreadId::random_v1(ThreadVariant::Raw);
    s.create_key(IpnsKeyRecord::v1("key_a1", "cid_a1", a.clone(), MonotonicTimeNs(1)).unwrap())
        .await
        .unwrap();
    s.create_key(IpnsKeyRecord::v1("key_a2", "cid_a2", a.clone(), MonotonicTimeNs(1)).unwrap())
        .await
        .unwrap();

    assert_eq!(s.list_by_thread_id(&a).await.unwrap().len(), 2);
    assert!(s.list_by_thread_id(&b).await.unwrap().is_empty());

    s.delete_key("key_a1").await.unwrap();
    assert_eq!(s.list_by_thread_id(&a).await.unwrap().len(), 1);
    assert!(s.delete_key("key_a1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn at_threads_db_06_session_directory_resolves_registered_rows() {
    let s = SharedThreadStore::new_in_memory();
    let user = Account::v1(owner("dbw_user_1"), "alice", AccountKind::Developer).unwrap();
    let session = SessionId::new("sess_1").unwrap();
    s.register_session(session.clone(), AccountContext::for_user(user.clone()))
        .unwrap();
    s.register_api_key(ApiKey::v1("ak_1", owner("dbw_user_1"), ApiKeyKind::Account, true).unwrap())
        .unwrap();

    let account = s.account_for_session(&session).await.unwrap().unwrap();
    assert_eq!(account.owner(), &user);
    assert!(s
        .account_for_session(&SessionId::new("sess_2").unwrap())
        .await
        .unwrap()
        .is_none());
    assert_eq!(s.api_key("ak_1").await.unwrap().unwrap().kind, ApiKeyKind::Account);
    assert!(s.api_key("ak_missing").await.unwrap().is_none());

    let err = s
        .register_session(session, AccountContext::for_user(user))
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey { table: "sessions", .. }));
}
