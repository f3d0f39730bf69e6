#![forbid(unsafe_code)]

use threadhub_adapter::call_context::{SESSION_HEADER, THREAD_HEADER};
use threadhub_adapter::grpc_api::db::api_server::Api as DbApi;
use threadhub_adapter::grpc_api::net::api_server::Api as NetApi;
use threadhub_adapter::grpc_api::{db, net};
use threadhub_adapter::status::REASON_CODE_METADATA_KEY;
use threadhub_adapter::{AdapterConfig, AdapterRuntime};
use threadhub_kernel_contracts::account::{Account, AccountContext, AccountKind, OwnerKey, SessionId};
use threadhub_kernel_contracts::ownership::IpnsKeyRecord;
use threadhub_kernel_contracts::thread::{ThreadId, ThreadVariant};
use threadhub_kernel_contracts::MonotonicTimeNs;
use threadhub_os::thread_guard::ThreadGuardConfig;
use threadhub_storage::repo::{IpnsKeyRepo, SharedThreadStore, ThreadOwnershipRepo};
use tonic::{Code, Request};

fn runtime(guard: ThreadGuardConfig) -> AdapterRuntime {
    let store = SharedThreadStore::new_in_memory();
    for (session, key) in [("sess_a", "owner_a"), ("sess_b", "owner_b")] {
        let owner = OwnerKey::new(key).unwrap();
        let account = Account::v1(owner, key, AccountKind::Developer).unwrap();
        store
            .register_session(SessionId::new(session).unwrap(), AccountContext::for_user(account))
            .unwrap();
    }
    let config = AdapterConfig {
        bind: "127.0.0.1:6006".parse().unwrap(),
        store_path: None,
        guard,
    };
    AdapterRuntime::with_store(&config, store).unwrap()
}

fn as_session<M>(session: &str, message: M) -> Request<M> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(SESSION_HEADER, session.parse().unwrap());
    request
}

fn new_db(id: &ThreadId, collection: &str) -> db::NewDbRequest {
    db::NewDbRequest {
        db_id: id.as_bytes().to_vec(),
        name: String::new(),
        collections: vec![db::CollectionConfig {
            name: collection.to_string(),
            schema: b"{}".to_vec(),
            indexes: vec![],
        }],
    }
}

fn owner(key: &str) -> OwnerKey {
    OwnerKey::new(key).unwrap()
}

#[tokio::test]
async fn at_grpc_01_owner_creates_and_reads_db_other_owner_denied() {
    let rt = runtime(ThreadGuardConfig::unlimited());
    let svc = rt.guarded_db();
    let id = ThreadId::random_v1(ThreadVariant::Raw);

    svc.new_db(as_session("sess_a", new_db(&id, "person")))
        .await
        .unwrap();
    assert!(rt.store().get(&id, &owner("owner_a")).await.is_ok());

    let info = svc
        .get_db_info(as_session(
            "sess_a",
            db::GetDbInfoRequest {
                db_id: id.as_bytes().to_vec(),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.db_id, id.as_bytes().to_vec());

    let denied = svc
        .get_db_info(as_session(
            "sess_b",
            db::GetDbInfoRequest {
                db_id: id.as_bytes().to_vec(),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(denied.code(), Code::PermissionDenied);
    assert!(denied.metadata().get(REASON_CODE_METADATA_KEY).is_some());
}

#[tokio::test]
async fn at_grpc_02_token_is_open_and_list_dbs_is_blocked() {
    let rt = runtime(ThreadGuardConfig::unlimited());
    let svc = rt.guarded_db();
    let token = svc
        .get_token(Request::new(db::GetTokenRequest {
            identity: String::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(token.token.starts_with("tok_"));

    let blocked = svc
        .list_d_bs(as_session("sess_a", db::ListDbsRequest {}))
        .await
        .unwrap_err();
    assert_eq!(blocked.code(), Code::PermissionDenied);

    let anonymous = svc
        .get_db_info(Request::new(db::GetDbInfoRequest { db_id: vec![0xff] }))
        .await
        .unwrap_err();
    assert_eq!(anonymous.code(), Code::FailedPrecondition);

    let malformed = svc
        .get_db_info(as_session("sess_a", db::GetDbInfoRequest { db_id: vec![0xff] }))
        .await
        .unwrap_err();
    assert_eq!(malformed.code(), Code::InvalidArgument);
    assert_eq!(
        malformed
            .metadata()
            .get(REASON_CODE_METADATA_KEY)
            .and_then(|v| v.to_str().ok()),
        Some("0x54480103")
    );
}

#[tokio::test]
async fn at_grpc_03_engine_failure_rolls_back_registration() {
    let rt = runtime(ThreadGuardConfig::unlimited());
    let svc = rt.guarded_db();
    let id = ThreadId::random_v1(ThreadVariant::Raw);

    let err = svc
        .new_db(as_session("sess_a", new_db(&id, "")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.metadata().get(REASON_CODE_METADATA_KEY).is_none());
    assert!(rt
        .store()
        .get(&id, &owner("owner_a"))
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(svc.inner().db_count().unwrap(), 0);
}

#[tokio::test]
async fn at_grpc_04_delete_db_waits_for_ipns_keys() {
    let rt = runtime(ThreadGuardConfig::unlimited());
    let svc = rt.guarded_db();
    let id = ThreadId::random_v1(ThreadVariant::Raw);
    svc.new_db(as_session("sess_a", new_db(&id, "person")))
        .await
        .unwrap();
    rt.store()
        .create_key(IpnsKeyRecord::v1("key_1", "cid_1", id.clone(), MonotonicTimeNs(1)).unwrap())
        .await
        .unwrap();

    let delete = || {
        as_session(
            "sess_a",
            db::DeleteDbRequest {
                db_id: id.as_bytes().to_vec(),
            },
        )
    };
    let err = svc.delete_db(delete()).await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(svc.inner().db_count().unwrap(), 1);

    rt.store().delete_key("key_1").await.unwrap();
    svc.delete_db(delete()).await.unwrap();
    assert_eq!(svc.inner().db_count().unwrap(), 0);
    assert!(rt
        .store()
        .get(&id, &owner("owner_a"))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn at_grpc_05_quota_rejects_before_engine() {
    let rt = runtime(ThreadGuardConfig {
        max_threads_per_owner: 1,
        internal_session: None,
    });
    let svc = rt.guarded_db();
    svc.new_db(as_session(
        "sess_a",
        new_db(&ThreadId::random_v1(ThreadVariant::Raw), "person"),
    ))
    .await
    .unwrap();
    let err = svc
        .new_db(as_session(
            "sess_a",
            new_db(&ThreadId::random_v1(ThreadVariant::Raw), "person"),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);
    assert_eq!(svc.inner().db_count().unwrap(), 1);
}

#[tokio::test]
async fn at_grpc_06_instance_calls_use_context_thread_and_cross_accounts() {
    let rt = runtime(ThreadGuardConfig::unlimited());
    let svc = rt.guarded_db();
    let id = ThreadId::random_v1(ThreadVariant::Raw);
    svc.new_db(as_session("sess_a", new_db(&id, "person")))
        .await
        .unwrap();

    let mut create = as_session(
        "sess_b",
        db::CreateRequest {
            db_id: id.as_bytes().to_vec(),
            collection_name: "person".to_string(),
            instances: vec![br#"{"name":"ada"}"#.to_vec()],
        },
    );
    create
        .metadata_mut()
        .insert(THREAD_HEADER, id.encode().parse().unwrap());
    let created = svc.create(create).await.unwrap().into_inner();
    assert_eq!(created.instance_ids.len(), 1);

    let mut listing = as_session(
        "sess_b",
        db::ListCollectionsRequest {
            db_id: id.as_bytes().to_vec(),
        },
    );
    listing
        .metadata_mut()
        .insert(THREAD_HEADER, id.encode().parse().unwrap());
    assert_eq!(
        svc.list_collections(listing).await.unwrap_err().code(),
        Code::PermissionDenied
    );
}

#[tokio::test]
async fn at_grpc_07_net_threads_are_owner_scoped() {
    let rt = runtime(ThreadGuardConfig::unlimited());
    let svc = rt.guarded_net();
    let id = ThreadId::random_v1(ThreadVariant::AccessControlled);
    svc.create_thread(as_session(
        "sess_a",
        net::CreateThreadRequest {
            thread_id: id.as_bytes().to_vec(),
            key: vec![],
            name: "chat".to_string(),
        },
    ))
    .await
    .unwrap();
    assert_eq!(
        rt.store()
            .get_by_name("chat", &owner("owner_a"))
            .await
            .unwrap()
            .id,
        id
    );

    let record = svc
        .create_record(as_session(
            "sess_a",
            net::CreateRecordRequest {
                thread_id: id.as_bytes().to_vec(),
                body: b"hi".to_vec(),
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .record
        .unwrap();

    let fetched = svc
        .get_record(as_session(
            "sess_b",
            net::GetRecordRequest {
                thread_id: id.as_bytes().to_vec(),
                record_id: record.record_id.clone(),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(fetched.record.unwrap().body, b"hi".to_vec());

    let denied = svc
        .create_record(as_session(
            "sess_b",
            net::CreateRecordRequest {
                thread_id: id.as_bytes().to_vec(),
                body: b"intrude".to_vec(),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(denied.code(), Code::PermissionDenied);

    let host = svc
        .get_host_id(Request::new(net::GetHostIdRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(host.peer_id.len(), 16);
}

#[tokio::test]
async fn at_grpc_08_internal_session_bypasses_guard() {
    let rt = runtime(ThreadGuardConfig {
        max_threads_per_owner: 0,
        internal_session: Some(SessionId::new("internal_1").unwrap()),
    });
    let svc = rt.guarded_net();
    let id = ThreadId::random_v1(ThreadVariant::Raw);
    svc.create_thread(as_session(
        "internal_1",
        net::CreateThreadRequest {
            thread_id: id.as_bytes().to_vec(),
            key: vec![],
            name: String::new(),
        },
    ))
    .await
    .unwrap();
    assert_eq!(rt.store().snapshot().unwrap().thread_count(), 0);
}
