#![forbid(unsafe_code)]

//! In-process thread services used behind the guard when no external
//! thread daemon is configured, and by tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::RngCore;
use serde_json::{Map, Value};
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_kernel_contracts::thread_addr::{
    encode_components, parse_components, thread_id_from_addr, AddrComponent, PROTOCOL_P2P,
};
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::grpc_api::{db, net};

const INSTANCE_ID_FIELD: &str = "_id";

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn cast_id(field: &str, bytes: &[u8]) -> Result<ThreadId, Status> {
    ThreadId::cast(bytes).map_err(|err| Status::invalid_argument(format!("{field}: {err}")))
}

fn host_addr(port: u16, id: &ThreadId) -> Vec<u8> {
    encode_components(&[
        AddrComponent::ip4([127, 0, 0, 1]),
        AddrComponent::tcp(port),
        AddrComponent::thread(id),
    ])
}

#[derive(Debug, Clone, Default)]
struct CollectionState {
    schema: Vec<u8>,
    indexes: Vec<db::Index>,
    instances: BTreeMap<String, Map<String, Value>>,
}

impl CollectionState {
    fn info(&self, name: &str) -> db::GetCollectionInfoReply {
        db::GetCollectionInfoReply {
            name: name.to_string(),
            schema: self.schema.clone(),
            indexes: self.indexes.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DbState {
    name: String,
    addrs: Vec<Vec<u8>>,
    collections: BTreeMap<String, CollectionState>,
}

/// Database thread service holding collections and JSON instances in memory.
#[derive(Debug, Clone)]
pub struct MemoryDbEngine {
    port: u16,
    dbs: Arc<Mutex<BTreeMap<ThreadId, DbState>>>,
}

impl MemoryDbEngine {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            dbs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn db_count(&self) -> Result<usize, Status> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<ThreadId, DbState>>, Status> {
        self.dbs
            .lock()
            .map_err(|_| Status::internal("db engine lock poisoned"))
    }

    fn insert_db(
        &self,
        id: ThreadId,
        name: String,
        collections: Vec<db::CollectionConfig>,
    ) -> Result<(), Status> {
        let mut dbs = self.lock()?;
        if dbs.contains_key(&id) {
            return Err(Status::already_exists(format!("db {id} already exists")));
        }
        let mut state = DbState {
            name,
            addrs: vec![host_addr(self.port, &id)],
            collections: BTreeMap::new(),
        };
        for config in collections {
            add_collection(&mut state, config)?;
        }
        debug!(db_id = %id, "created db");
        dbs.insert(id, state);
        Ok(())
    }

    fn with_collection<T>(
        &self,
        db_id: &[u8],
        name: &str,
        f: impl FnOnce(&mut CollectionState) -> Result<T, Status>,
    ) -> Result<T, Status> {
        let id = cast_id("db_id", db_id)?;
        let mut dbs = self.lock()?;
        let state = dbs
            .get_mut(&id)
            .ok_or_else(|| Status::not_found(format!("db {id} not found")))?;
        let collection = state
            .collections
            .get_mut(name)
            .ok_or_else(|| Status::not_found(format!("collection {name} not found")))?;
        f(collection)
    }

    fn with_db<T>(
        &self,
        db_id: &[u8],
        f: impl FnOnce(&mut DbState) -> Result<T, Status>,
    ) -> Result<T, Status> {
        let id = cast_id("db_id", db_id)?;
        let mut dbs = self.lock()?;
        let state = dbs
            .get_mut(&id)
            .ok_or_else(|| Status::not_found(format!("db {id} not found")))?;
        f(state)
    }
}

fn add_collection(state: &mut DbState, config: db::CollectionConfig) -> Result<(), Status> {
    if config.name.trim().is_empty() {
        return Err(Status::invalid_argument("collection name is required"));
    }
    if state.collections.contains_key(&config.name) {
        return Err(Status::already_exists(format!(
            "collection {} already exists",
            config.name
        )));
    }
    state.collections.insert(
        config.name,
        CollectionState {
            schema: config.schema,
            indexes: config.indexes,
            instances: BTreeMap::new(),
        },
    );
    Ok(())
}

fn parse_instance(raw: &[u8]) -> Result<Map<String, Value>, Status> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Status::invalid_argument("instance must be a JSON object")),
        Err(err) => Err(Status::invalid_argument(format!("invalid instance JSON: {err}"))),
    }
}

fn instance_id(instance: &Map<String, Value>) -> Option<String> {
    instance
        .get(INSTANCE_ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn encode_instance(instance: &Map<String, Value>) -> Result<Vec<u8>, Status> {
    serde_json::to_vec(instance).map_err(|err| Status::internal(err.to_string()))
}

/// Equality match on every top-level field of the query object.
fn matches_query(instance: &Map<String, Value>, query: &Map<String, Value>) -> bool {
    query
        .iter()
        .all(|(field, want)| instance.get(field) == Some(want))
}

#[tonic::async_trait]
impl db::api_server::Api for MemoryDbEngine {
    async fn get_token(
        &self,
        _request: Request<db::GetTokenRequest>,
    ) -> Result<Response<db::GetTokenReply>, Status> {
        Ok(Response::new(db::GetTokenReply {
            token: format!("tok_{}", random_hex(16)),
        }))
    }

    async fn new_db(
        &self,
        request: Request<db::NewDbRequest>,
    ) -> Result<Response<db::NewDbReply>, Status> {
        let req = request.into_inner();
        let id = cast_id("db_id", &req.db_id)?;
        self.insert_db(id, req.name, req.collections)?;
        Ok(Response::new(db::NewDbReply {}))
    }

    async fn new_db_from_addr(
        &self,
        request: Request<db::NewDbFromAddrRequest>,
    ) -> Result<Response<db::NewDbReply>, Status> {
        let req = request.into_inner();
        let id = thread_id_from_addr(&req.addr)
            .map_err(|err| Status::invalid_argument(format!("addr: {err}")))?;
        self.insert_db(id, req.name, req.collections)?;
        Ok(Response::new(db::NewDbReply {}))
    }

    async fn list_d_bs(
        &self,
        _request: Request<db::ListDbsRequest>,
    ) -> Result<Response<db::ListDbsReply>, Status> {
        let dbs = self.lock()?;
        Ok(Response::new(db::ListDbsReply {
            dbs: dbs
                .iter()
                .map(|(id, state)| db::GetDbInfoReply {
                    db_id: id.as_bytes().to_vec(),
                    name: state.name.clone(),
                    addrs: state.addrs.clone(),
                })
                .collect(),
        }))
    }

    async fn get_db_info(
        &self,
        request: Request<db::GetDbInfoRequest>,
    ) -> Result<Response<db::GetDbInfoReply>, Status> {
        let req = request.into_inner();
        let reply = self.with_db(&req.db_id, |state| {
            Ok(db::GetDbInfoReply {
                db_id: req.db_id.clone(),
                name: state.name.clone(),
                addrs: state.addrs.clone(),
            })
        })?;
        Ok(Response::new(reply))
    }

    async fn delete_db(
        &self,
        request: Request<db::DeleteDbRequest>,
    ) -> Result<Response<db::DeleteDbReply>, Status> {
        let id = cast_id("db_id", &request.get_ref().db_id)?;
        self.lock()?
            .remove(&id)
            .ok_or_else(|| Status::not_found(format!("db {id} not found")))?;
        Ok(Response::new(db::DeleteDbReply {}))
    }

    async fn new_collection(
        &self,
        request: Request<db::NewCollectionRequest>,
    ) -> Result<Response<db::NewCollectionReply>, Status> {
        let req = request.into_inner();
        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("config is required"))?;
        self.with_db(&req.db_id, |state| add_collection(state, config))?;
        Ok(Response::new(db::NewCollectionReply {}))
    }

    async fn update_collection(
        &self,
        request: Request<db::UpdateCollectionRequest>,
    ) -> Result<Response<db::UpdateCollectionReply>, Status> {
        let req = request.into_inner();
        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("config is required"))?;
        self.with_collection(&req.db_id, &config.name, |collection| {
            collection.schema = config.schema.clone();
            collection.indexes = config.indexes.clone();
            Ok(())
        })?;
        Ok(Response::new(db::UpdateCollectionReply {}))
    }

    async fn delete_collection(
        &self,
        request: Request<db::DeleteCollectionRequest>,
    ) -> Result<Response<db::DeleteCollectionReply>, Status> {
        let req = request.into_inner();
        self.with_db(&req.db_id, |state| {
            state
                .collections
                .remove(&req.name)
                .map(|_| ())
                .ok_or_else(|| Status::not_found(format!("collection {} not found", req.name)))
        })?;
        Ok(Response::new(db::DeleteCollectionReply {}))
    }

    async fn get_collection_info(
        &self,
        request: Request<db::GetCollectionInfoRequest>,
    ) -> Result<Response<db::GetCollectionInfoReply>, Status> {
        let req = request.into_inner();
        let reply = self.with_collection(&req.db_id, &req.name, |c| Ok(c.info(&req.name)))?;
        Ok(Response::new(reply))
    }

    async fn get_collection_indexes(
        &self,
        request: Request<db::GetCollectionIndexesRequest>,
    ) -> Result<Response<db::GetCollectionIndexesReply>, Status> {
        let req = request.into_inner();
        let indexes = self.with_collection(&req.db_id, &req.name, |c| Ok(c.indexes.clone()))?;
        Ok(Response::new(db::GetCollectionIndexesReply { indexes }))
    }

    async fn list_collections(
        &self,
        request: Request<db::ListCollectionsRequest>,
    ) -> Result<Response<db::ListCollectionsReply>, Status> {
        let collections = self.with_db(&request.get_ref().db_id, |state| {
            Ok(state
                .collections
                .iter()
                .map(|(name, c)| c.info(name))
                .collect())
        })?;
        Ok(Response::new(db::ListCollectionsReply { collections }))
    }

    async fn create(
        &self,
        request: Request<db::CreateRequest>,
    ) -> Result<Response<db::CreateReply>, Status> {
        let req = request.into_inner();
        let mut parsed = Vec::with_capacity(req.instances.len());
        for raw in &req.instances {
            let mut instance = parse_instance(raw)?;
            let id = match instance_id(&instance) {
                Some(id) => id,
                None => {
                    let id = random_hex(16);
                    instance.insert(INSTANCE_ID_FIELD.to_string(), Value::String(id.clone()));
                    id
                }
            };
            parsed.push((id, instance));
        }
        let instance_ids = self.with_collection(&req.db_id, &req.collection_name, |c| {
            if let Some((id, _)) = parsed.iter().find(|(id, _)| c.instances.contains_key(id)) {
                return Err(Status::already_exists(format!("instance {id} already exists")));
            }
            let ids = parsed.iter().map(|(id, _)| id.clone()).collect();
            c.instances.extend(parsed);
            Ok(ids)
        })?;
        Ok(Response::new(db::CreateReply { instance_ids }))
    }

    async fn save(
        &self,
        request: Request<db::SaveRequest>,
    ) -> Result<Response<db::SaveReply>, Status> {
        let req = request.into_inner();
        let mut parsed = Vec::with_capacity(req.instances.len());
        for raw in &req.instances {
            let instance = parse_instance(raw)?;
            let id = instance_id(&instance)
                .ok_or_else(|| Status::invalid_argument("saved instance must carry _id"))?;
            parsed.push((id, instance));
        }
        self.with_collection(&req.db_id, &req.collection_name, |c| {
            if let Some((id, _)) = parsed.iter().find(|(id, _)| !c.instances.contains_key(id)) {
                return Err(Status::not_found(format!("instance {id} not found")));
            }
            c.instances.extend(parsed);
            Ok(())
        })?;
        Ok(Response::new(db::SaveReply {}))
    }

    async fn delete(
        &self,
        request: Request<db::DeleteRequest>,
    ) -> Result<Response<db::DeleteReply>, Status> {
        let req = request.into_inner();
        self.with_collection(&req.db_id, &req.collection_name, |c| {
            if let Some(id) = req.instance_ids.iter().find(|id| !c.instances.contains_key(*id)) {
                return Err(Status::not_found(format!("instance {id} not found")));
            }
            for id in &req.instance_ids {
                c.instances.remove(id);
            }
            Ok(())
        })?;
        Ok(Response::new(db::DeleteReply {}))
    }

    async fn has(&self, request: Request<db::HasRequest>) -> Result<Response<db::HasReply>, Status> {
        let req = request.into_inner();
        let exists = self.with_collection(&req.db_id, &req.collection_name, |c| {
            Ok(req.instance_ids.iter().all(|id| c.instances.contains_key(id)))
        })?;
        Ok(Response::new(db::HasReply { exists }))
    }

    async fn find(
        &self,
        request: Request<db::FindRequest>,
    ) -> Result<Response<db::FindReply>, Status> {
        let req = request.into_inner();
        let query = if req.query_json.is_empty() {
            Map::new()
        } else {
            parse_instance(&req.query_json)?
        };
        let instances = self.with_collection(&req.db_id, &req.collection_name, |c| {
            c.instances
                .values()
                .filter(|instance| matches_query(instance, &query))
                .map(encode_instance)
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(Response::new(db::FindReply { instances }))
    }
}

#[derive(Debug, Clone, Default)]
struct NetThreadState {
    name: String,
    addrs: Vec<Vec<u8>>,
    records: Vec<net::Record>,
    replicators: Vec<Vec<u8>>,
}

/// Network thread service keeping each thread's records in memory.
#[derive(Debug, Clone)]
pub struct MemoryNetEngine {
    port: u16,
    host_id: Vec<u8>,
    threads: Arc<Mutex<BTreeMap<ThreadId, NetThreadState>>>,
}

impl MemoryNetEngine {
    pub fn new(port: u16) -> Self {
        let mut host_id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut host_id);
        Self {
            port,
            host_id,
            threads: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<ThreadId, NetThreadState>>, Status> {
        self.threads
            .lock()
            .map_err(|_| Status::internal("net engine lock poisoned"))
    }

    fn insert_thread(&self, id: ThreadId, name: String) -> Result<net::ThreadInfoReply, Status> {
        let mut threads = self.lock()?;
        if threads.contains_key(&id) {
            return Err(Status::already_exists(format!("thread {id} already exists")));
        }
        let state = NetThreadState {
            name,
            addrs: vec![host_addr(self.port, &id)],
            ..NetThreadState::default()
        };
        let reply = info_reply(&id, &state);
        debug!(thread_id = %id, name = %state.name, "created thread");
        threads.insert(id, state);
        Ok(reply)
    }

    fn with_thread<T>(
        &self,
        thread_id: &[u8],
        f: impl FnOnce(&ThreadId, &mut NetThreadState) -> Result<T, Status>,
    ) -> Result<T, Status> {
        let id = cast_id("thread_id", thread_id)?;
        let mut threads = self.lock()?;
        let state = threads
            .get_mut(&id)
            .ok_or_else(|| Status::not_found(format!("thread {id} not found")))?;
        f(&id, state)
    }
}

fn info_reply(id: &ThreadId, state: &NetThreadState) -> net::ThreadInfoReply {
    net::ThreadInfoReply {
        thread_id: id.as_bytes().to_vec(),
        addrs: state.addrs.clone(),
        head_count: state.records.len() as u64,
    }
}

#[tonic::async_trait]
impl net::api_server::Api for MemoryNetEngine {
    async fn get_host_id(
        &self,
        _request: Request<net::GetHostIdRequest>,
    ) -> Result<Response<net::GetHostIdReply>, Status> {
        Ok(Response::new(net::GetHostIdReply {
            peer_id: self.host_id.clone(),
        }))
    }

    async fn get_token(
        &self,
        _request: Request<net::GetTokenRequest>,
    ) -> Result<Response<net::GetTokenReply>, Status> {
        Ok(Response::new(net::GetTokenReply {
            token: format!("tok_{}", random_hex(16)),
        }))
    }

    async fn create_thread(
        &self,
        request: Request<net::CreateThreadRequest>,
    ) -> Result<Response<net::ThreadInfoReply>, Status> {
        let req = request.into_inner();
        let id = cast_id("thread_id", &req.thread_id)?;
        Ok(Response::new(self.insert_thread(id, req.name)?))
    }

    async fn add_thread(
        &self,
        request: Request<net::AddThreadRequest>,
    ) -> Result<Response<net::ThreadInfoReply>, Status> {
        let req = request.into_inner();
        let id = thread_id_from_addr(&req.addr)
            .map_err(|err| Status::invalid_argument(format!("addr: {err}")))?;
        Ok(Response::new(self.insert_thread(id, req.name)?))
    }

    async fn get_thread(
        &self,
        request: Request<net::GetThreadRequest>,
    ) -> Result<Response<net::ThreadInfoReply>, Status> {
        let reply = self.with_thread(&request.get_ref().thread_id, |id, state| {
            Ok(info_reply(id, state))
        })?;
        Ok(Response::new(reply))
    }

    async fn pull_thread(
        &self,
        request: Request<net::PullThreadRequest>,
    ) -> Result<Response<net::PullThreadReply>, Status> {
        self.with_thread(&request.get_ref().thread_id, |_, _| Ok(()))?;
        Ok(Response::new(net::PullThreadReply {}))
    }

    async fn delete_thread(
        &self,
        request: Request<net::DeleteThreadRequest>,
    ) -> Result<Response<net::DeleteThreadReply>, Status> {
        let id = cast_id("thread_id", &request.get_ref().thread_id)?;
        self.lock()?
            .remove(&id)
            .ok_or_else(|| Status::not_found(format!("thread {id} not found")))?;
        Ok(Response::new(net::DeleteThreadReply {}))
    }

    async fn add_replicator(
        &self,
        request: Request<net::AddReplicatorRequest>,
    ) -> Result<Response<net::AddReplicatorReply>, Status> {
        let req = request.into_inner();
        let components = parse_components(&req.addr)
            .map_err(|err| Status::invalid_argument(format!("addr: {err}")))?;
        let peer_id = components
            .into_iter()
            .find(|c| c.code == PROTOCOL_P2P)
            .map(|c| c.value)
            .ok_or_else(|| Status::invalid_argument("addr: missing p2p component"))?;
        self.with_thread(&req.thread_id, |_, state| {
            if !state.replicators.contains(&req.addr) {
                state.replicators.push(req.addr.clone());
            }
            Ok(())
        })?;
        Ok(Response::new(net::AddReplicatorReply { peer_id }))
    }

    async fn create_record(
        &self,
        request: Request<net::CreateRecordRequest>,
    ) -> Result<Response<net::NewRecordReply>, Status> {
        let req = request.into_inner();
        let mut record_id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut record_id);
        let record = net::Record {
            record_id,
            body: req.body,
        };
        self.with_thread(&req.thread_id, |_, state| {
            state.records.push(record.clone());
            Ok(())
        })?;
        Ok(Response::new(net::NewRecordReply {
            thread_id: req.thread_id,
            record: Some(record),
        }))
    }

    async fn add_record(
        &self,
        request: Request<net::AddRecordRequest>,
    ) -> Result<Response<net::AddRecordReply>, Status> {
        let req = request.into_inner();
        let record = req
            .record
            .ok_or_else(|| Status::invalid_argument("record is required"))?;
        if record.record_id.is_empty() {
            return Err(Status::invalid_argument("record_id is required"));
        }
        self.with_thread(&req.thread_id, |_, state| {
            if state.records.iter().any(|r| r.record_id == record.record_id) {
                return Err(Status::already_exists("record already exists"));
            }
            state.records.push(record);
            Ok(())
        })?;
        Ok(Response::new(net::AddRecordReply {}))
    }

    async fn get_record(
        &self,
        request: Request<net::GetRecordRequest>,
    ) -> Result<Response<net::GetRecordReply>, Status> {
        let req = request.into_inner();
        let record = self.with_thread(&req.thread_id, |_, state| {
            state
                .records
                .iter()
                .find(|r| r.record_id == req.record_id)
                .cloned()
                .ok_or_else(|| Status::not_found("record not found"))
        })?;
        Ok(Response::new(net::GetRecordReply {
            record: Some(record),
        }))
    }
}
