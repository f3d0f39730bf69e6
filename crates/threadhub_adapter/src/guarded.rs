#![forbid(unsafe_code)]

//! Service decorators that run every RPC through the thread guard before
//! forwarding it to the wrapped engine.

use std::future::Future;

use threadhub_kernel_contracts::rpc::{db_methods, net_methods, ThreadRequestFields};
use threadhub_os::thread_guard::ThreadGuard;
use tonic::{Request, Response, Status};

use crate::call_context::MetadataCallResolver;
use crate::grpc_api::{db, net};
use crate::status::intercept_status;

#[derive(Clone)]
pub struct ThreadInterceptor {
    guard: ThreadGuard,
    resolver: MetadataCallResolver,
}

impl ThreadInterceptor {
    pub fn new(guard: ThreadGuard, resolver: MetadataCallResolver) -> Self {
        Self { guard, resolver }
    }

    pub fn guard(&self) -> &ThreadGuard {
        &self.guard
    }

    pub async fn run<M, R, H, Fut>(
        &self,
        method: &'static str,
        request: Request<M>,
        handler: H,
    ) -> Result<Response<R>, Status>
    where
        M: ThreadRequestFields,
        H: FnOnce(Request<M>) -> Fut,
        Fut: Future<Output = Result<Response<R>, Status>>,
    {
        let call = self.resolver.resolve(request.metadata()).await?;
        self.guard
            .intercept(&call, method, Incoming(request), |Incoming(request)| {
                handler(request)
            })
            .await
            .map_err(intercept_status)
    }
}

/// Exposes a tonic request's message fields to the guard.
struct Incoming<M>(Request<M>);

impl<M: ThreadRequestFields> ThreadRequestFields for Incoming<M> {
    fn db_id(&self) -> Option<&[u8]> {
        self.0.get_ref().db_id()
    }

    fn thread_id(&self) -> Option<&[u8]> {
        self.0.get_ref().thread_id()
    }

    fn addr(&self) -> Option<&[u8]> {
        self.0.get_ref().addr()
    }

    fn thread_name(&self) -> Option<&str> {
        self.0.get_ref().thread_name()
    }
}

pub struct GuardedDbApi<T> {
    interceptor: ThreadInterceptor,
    inner: T,
}

impl<T> GuardedDbApi<T> {
    pub fn new(interceptor: ThreadInterceptor, inner: T) -> Self {
        Self { interceptor, inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

pub struct GuardedNetApi<T> {
    interceptor: ThreadInterceptor,
    inner: T,
}

impl<T> GuardedNetApi<T> {
    pub fn new(interceptor: ThreadInterceptor, inner: T) -> Self {
        Self { interceptor, inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[tonic::async_trait]
impl<T: db::api_server::Api> db::api_server::Api for GuardedDbApi<T> {
    async fn get_token(
        &self,
        request: Request<db::GetTokenRequest>,
    ) -> Result<Response<db::GetTokenReply>, Status> {
        self.interceptor
            .run(db_methods::GET_TOKEN, request, |r| self.inner.get_token(r))
            .await
    }

    async fn new_db(
        &self,
        request: Request<db::NewDbRequest>,
    ) -> Result<Response<db::NewDbReply>, Status> {
        self.interceptor
            .run(db_methods::NEW_DB, request, |r| self.inner.new_db(r))
            .await
    }

    async fn new_db_from_addr(
        &self,
        request: Request<db::NewDbFromAddrRequest>,
    ) -> Result<Response<db::NewDbReply>, Status> {
        self.interceptor
            .run(db_methods::NEW_DB_FROM_ADDR, request, |r| {
                self.inner.new_db_from_addr(r)
            })
            .await
    }

    async fn list_d_bs(
        &self,
        request: Request<db::ListDbsRequest>,
    ) -> Result<Response<db::ListDbsReply>, Status> {
        self.interceptor
            .run(db_methods::LIST_DBS, request, |r| self.inner.list_d_bs(r))
            .await
    }

    async fn get_db_info(
        &self,
        request: Request<db::GetDbInfoRequest>,
    ) -> Result<Response<db::GetDbInfoReply>, Status> {
        self.interceptor
            .run(db_methods::GET_DB_INFO, request, |r| self.inner.get_db_info(r))
            .await
    }

    async fn delete_db(
        &self,
        request: Request<db::DeleteDbRequest>,
    ) -> Result<Response<db::DeleteDbReply>, Status> {
        self.interceptor
            .run(db_methods::DELETE_DB, request, |r| self.inner.delete_db(r))
            .await
    }

    async fn new_collection(
        &self,
        request: Request<db::NewCollectionRequest>,
    ) -> Result<Response<db::NewCollectionReply>, Status> {
        self.interceptor
            .run(db_methods::NEW_COLLECTION, request, |r| {
                self.inner.new_collection(r)
            })
            .await
    }

    async fn update_collection(
        &self,
        request: Request<db::UpdateCollectionRequest>,
    ) -> Result<Response<db::UpdateCollectionReply>, Status> {
        self.interceptor
            .run(db_methods::UPDATE_COLLECTION, request, |r| {
                self.inner.update_collection(r)
            })
            .await
    }

    async fn delete_collection(
        &self,
        request: Request<db::DeleteCollectionRequest>,
    ) -> Result<Response<db::DeleteCollectionReply>, Status> {
        self.interceptor
            .run(db_methods::DELETE_COLLECTION, request, |r| {
                self.inner.delete_collection(r)
            })
            .await
    }

    async fn get_collection_info(
        &self,
        request: Request<db::GetCollectionInfoRequest>,
    ) -> Result<Response<db::GetCollectionInfoReply>, Status> {
        self.interceptor
            .run(db_methods::GET_COLLECTION_INFO, request, |r| {
                self.inner.get_collection_info(r)
            })
            .await
    }

    async fn get_collection_indexes(
        &self,
        request: Request<db::GetCollectionIndexesRequest>,
    ) -> Result<Response<db::GetCollectionIndexesReply>, Status> {
        self.interceptor
            .run(db_methods::GET_COLLECTION_INDEXES, request, |r| {
                self.inner.get_collection_indexes(r)
            })
            .await
    }

    async fn list_collections(
        &self,
        request: Request<db::ListCollectionsRequest>,
    ) -> Result<Response<db::ListCollectionsReply>, Status> {
        self.interceptor
            .run(db_methods::LIST_COLLECTIONS, request, |r| {
                self.inner.list_collections(r)
            })
            .await
    }

    async fn create(
        &self,
        request: Request<db::CreateRequest>,
    ) -> Result<Response<db::CreateReply>, Status> {
        self.interceptor
            .run(db_methods::CREATE, request, |r| self.inner.create(r))
            .await
    }

    async fn save(
        &self,
        request: Request<db::SaveRequest>,
    ) -> Result<Response<db::SaveReply>, Status> {
        self.interceptor
            .run(db_methods::SAVE, request, |r| self.inner.save(r))
            .await
    }

    async fn delete(
        &self,
        request: Request<db::DeleteRequest>,
    ) -> Result<Response<db::DeleteReply>, Status> {
        self.interceptor
            .run(db_methods::DELETE, request, |r| self.inner.delete(r))
            .await
    }

    async fn has(&self, request: Request<db::HasRequest>) -> Result<Response<db::HasReply>, Status> {
        self.interceptor
            .run(db_methods::HAS, request, |r| self.inner.has(r))
            .await
    }

    async fn find(
        &self,
        request: Request<db::FindRequest>,
    ) -> Result<Response<db::FindReply>, Status> {
        self.interceptor
            .run(db_methods::FIND, request, |r| self.inner.find(r))
            .await
    }
}

#[tonic::async_trait]
impl<T: net::api_server::Api> net::api_server::Api for GuardedNetApi<T> {
    async fn get_host_id(
        &self,
        request: Request<net::GetHostIdRequest>,
    ) -> Result<Response<net::GetHostIdReply>, Status> {
        self.interceptor
            .run(net_methods::GET_HOST_ID, request, |r| self.inner.get_host_id(r))
            .await
    }

    async fn get_token(
        &self,
        request: Request<net::GetTokenRequest>,
    ) -> Result<Response<net::GetTokenReply>, Status> {
        self.interceptor
            .run(net_methods::GET_TOKEN, request, |r| self.inner.get_token(r))
            .await
    }

    async fn create_thread(
        &self,
        request: Request<net::CreateThreadRequest>,
    ) -> Result<Response<net::ThreadInfoReply>, Status> {
        self.interceptor
            .run(net_methods::CREATE_THREAD, request, |r| {
                self.inner.create_thread(r)
            })
            .await
    }

    async fn add_thread(
        &self,
        request: Request<net::AddThreadRequest>,
    ) -> Result<Response<net::ThreadInfoReply>, Status> {
        self.interceptor
            .run(net_methods::ADD_THREAD, request, |r| self.inner.add_thread(r))
            .await
    }

    async fn get_thread(
        &self,
        request: Request<net::GetThreadRequest>,
    ) -> Result<Response<net::ThreadInfoReply>, Status> {
        self.interceptor
            .run(net_methods::GET_THREAD, request, |r| self.inner.get_thread(r))
            .await
    }

    async fn pull_thread(
        &self,
        request: Request<net::PullThreadRequest>,
    ) -> Result<Response<net::PullThreadReply>, Status> {
        self.interceptor
            .run(net_methods::PULL_THREAD, request, |r| self.inner.pull_thread(r))
            .await
    }

    async fn delete_thread(
        &self,
        request: Request<net::DeleteThreadRequest>,
    ) -> Result<Response<net::DeleteThreadReply>, Status> {
        self.interceptor
            .run(net_methods::DELETE_THREAD, request, |r| {
                self.inner.delete_thread(r)
            })
            .await
    }

    async fn add_replicator(
        &self,
        request: Request<net::AddReplicatorRequest>,
    ) -> Result<Response<net::AddReplicatorReply>, Status> {
        self.interceptor
            .run(net_methods::ADD_REPLICATOR, request, |r| {
                self.inner.add_replicator(r)
            })
            .await
    }

    async fn create_record(
        &self,
        request: Request<net::CreateRecordRequest>,
    ) -> Result<Response<net::NewRecordReply>, Status> {
        self.interceptor
            .run(net_methods::CREATE_RECORD, request, |r| {
                self.inner.create_record(r)
            })
            .await
    }

    async fn add_record(
        &self,
        request: Request<net::AddRecordRequest>,
    ) -> Result<Response<net::AddRecordReply>, Status> {
        self.interceptor
            .run(net_methods::ADD_RECORD, request, |r| self.inner.add_record(r))
            .await
    }

    async fn get_record(
        &self,
        request: Request<net::GetRecordRequest>,
    ) -> Result<Response<net::GetRecordReply>, Status> {
        self.interceptor
            .run(net_methods::GET_RECORD, request, |r| self.inner.get_record(r))
            .await
    }
}
