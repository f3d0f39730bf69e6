#![forbid(unsafe_code)]

use crate::thread::ThreadId;
use crate::thread_addr::thread_id_from_addr;
use crate::ContractViolation;

/// Full gRPC method paths of the database thread service (`threads.pb.API`).
pub mod db_methods {
    pub const GET_TOKEN: &str = "/threads.pb.API/GetToken";
    pub const NEW_DB: &str = "/threads.pb.API/NewDB";
    pub const NEW_DB_FROM_ADDR: &str = "/threads.pb.API/NewDBFromAddr";
    pub const LIST_DBS: &str = "/threads.pb.API/ListDBs";
    pub const GET_DB_INFO: &str = "/threads.pb.API/GetDBInfo";
    pub const DELETE_DB: &str = "/threads.pb.API/DeleteDB";
    pub const NEW_COLLECTION: &str = "/threads.pb.API/NewCollection";
    pub const UPDATE_COLLECTION: &str = "/threads.pb.API/UpdateCollection";
    pub const DELETE_COLLECTION: &str = "/threads.pb.API/DeleteCollection";
    pub const GET_COLLECTION_INFO: &str = "/threads.pb.API/GetCollectionInfo";
    pub const GET_COLLECTION_INDEXES: &str = "/threads.pb.API/GetCollectionIndexes";
    pub const LIST_COLLECTIONS: &str = "/threads.pb.API/ListCollections";
    pub const CREATE: &str = "/threads.pb.API/Create";
    pub const SAVE: &str = "/threads.pb.API/Save";
    pub const DELETE: &str = "/threads.pb.API/Delete";
    pub const HAS: &str = "/threads.pb.API/Has";
    pub const FIND: &str = "/threads.pb.API/Find";
}

/// Full gRPC method paths of the network thread service (`threads.net.pb.API`).
pub mod net_methods {
    pub const GET_TOKEN: &str = "/threads.net.pb.API/GetToken";
    pub const GET_HOST_ID: &str = "/threads.net.pb.API/GetHostID";
    pub const CREATE_THREAD: &str = "/threads.net.pb.API/CreateThread";
    pub const ADD_THREAD: &str = "/threads.net.pb.API/AddThread";
    pub const GET_THREAD: &str = "/threads.net.pb.API/GetThread";
    pub const PULL_THREAD: &str = "/threads.net.pb.API/PullThread";
    pub const DELETE_THREAD: &str = "/threads.net.pb.API/DeleteThread";
    pub const ADD_REPLICATOR: &str = "/threads.net.pb.API/AddReplicator";
    pub const CREATE_RECORD: &str = "/threads.net.pb.API/CreateRecord";
    pub const ADD_RECORD: &str = "/threads.net.pb.API/AddRecord";
    pub const GET_RECORD: &str = "/threads.net.pb.API/GetRecord";
}

/// Read access to the request fields that may identify a thread.
///
/// Decoded request messages implement the accessors for the fields they
/// actually carry; everything else stays `None`.
pub trait ThreadRequestFields {
    fn db_id(&self) -> Option<&[u8]> {
        None
    }

    fn thread_id(&self) -> Option<&[u8]> {
        None
    }

    fn addr(&self) -> Option<&[u8]> {
        None
    }

    fn thread_name(&self) -> Option<&str> {
        None
    }
}

impl ThreadRequestFields for () {}

/// Which request field holds a thread id, and how to decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdSource {
    DbId,
    ThreadId,
    Addr,
}

impl IdSource {
    /// `Ok(None)` when the request type does not carry the field at all.
    pub fn extract(
        self,
        request: &(impl ThreadRequestFields + ?Sized),
    ) -> Result<Option<ThreadId>, ContractViolation> {
        match self {
            IdSource::DbId => request.db_id().map(ThreadId::cast).transpose(),
            IdSource::ThreadId => request.thread_id().map(ThreadId::cast).transpose(),
            IdSource::Addr => request.addr().map(thread_id_from_addr).transpose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadVariant;
    use crate::thread_addr::{encode_components, AddrComponent};

    struct AddrRequest(Vec<u8>);

    impl ThreadRequestFields for AddrRequest {
        fn addr(&self) -> Option<&[u8]> {
            Some(&self.0)
        }
    }

    #[test]
    fn at_rpc_01_extract_reads_only_the_named_field() {
        let id = ThreadId::random_v1(ThreadVariant::Raw);
        let req = AddrRequest(encode_components(&[
            AddrComponent::ip4([127, 0, 0, 1]),
            AddrComponent::thread(&id),
        ]));
        assert_eq!(IdSource::Addr.extract(&req).unwrap(), Some(id));
        assert_eq!(IdSource::DbId.extract(&req).unwrap(), None);
        assert_eq!(IdSource::ThreadId.extract(&()).unwrap(), None);
    }

    #[test]
    fn at_rpc_02_extract_fails_on_malformed_field() {
        let req = AddrRequest(vec![0x04, 1, 2]);
        assert!(IdSource::Addr.extract(&req).is_err());
    }
}
