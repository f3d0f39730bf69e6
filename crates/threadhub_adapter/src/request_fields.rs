#![forbid(unsafe_code)]

//! Exposes the thread-identifying fields of each decoded request to the guard.

use threadhub_kernel_contracts::rpc::ThreadRequestFields;

use crate::grpc_api::{db, net};

macro_rules! no_thread_fields {
    ($($ty:ty),* $(,)?) => {
        $(impl ThreadRequestFields for $ty {})*
    };
}

macro_rules! db_id_field {
    ($($ty:ty),* $(,)?) => {
        $(impl ThreadRequestFields for $ty {
            fn db_id(&self) -> Option<&[u8]> {
                Some(&self.db_id)
            }
        })*
    };
}

macro_rules! thread_id_field {
    ($($ty:ty),* $(,)?) => {
        $(impl ThreadRequestFields for $ty {
            fn thread_id(&self) -> Option<&[u8]> {
                Some(&self.thread_id)
            }
        })*
    };
}

no_thread_fields!(
    db::GetTokenRequest,
    db::ListDbsRequest,
    net::GetTokenRequest,
    net::GetHostIdRequest,
);

db_id_field!(
    db::GetDbInfoRequest,
    db::DeleteDbRequest,
    db::NewCollectionRequest,
    db::UpdateCollectionRequest,
    db::DeleteCollectionRequest,
    db::GetCollectionInfoRequest,
    db::GetCollectionIndexesRequest,
    db::ListCollectionsRequest,
    db::CreateRequest,
    db::SaveRequest,
    db::DeleteRequest,
    db::HasRequest,
    db::FindRequest,
);

// AddReplicatorRequest.addr names a peer, not a thread.
thread_id_field!(
    net::GetThreadRequest,
    net::PullThreadRequest,
    net::DeleteThreadRequest,
    net::AddReplicatorRequest,
    net::CreateRecordRequest,
    net::AddRecordRequest,
    net::GetRecordRequest,
);

impl ThreadRequestFields for db::NewDbRequest {
    fn db_id(&self) -> Option<&[u8]> {
        Some(&self.db_id)
    }

    fn thread_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl ThreadRequestFields for db::NewDbFromAddrRequest {
    fn addr(&self) -> Option<&[u8]> {
        Some(&self.addr)
    }

    fn thread_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl ThreadRequestFields for net::CreateThreadRequest {
    fn thread_id(&self) -> Option<&[u8]> {
        Some(&self.thread_id)
    }

    fn thread_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl ThreadRequestFields for net::AddThreadRequest {
    fn addr(&self) -> Option<&[u8]> {
        Some(&self.addr)
    }

    fn thread_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadhub_kernel_contracts::rpc::IdSource;
    use threadhub_kernel_contracts::thread::{ThreadId, ThreadVariant};
    use threadhub_kernel_contracts::thread_addr::{encode_components, AddrComponent};

    #[test]
    fn at_fields_01_requests_expose_their_thread_fields() {
        let id = ThreadId::random_v1(ThreadVariant::AccessControlled);
        let new_db = db::NewDbRequest {
            db_id: id.as_bytes().to_vec(),
            name: "notes".to_string(),
            collections: vec![],
        };
        assert_eq!(IdSource::DbId.extract(&new_db).unwrap(), Some(id.clone()));
        assert_eq!(new_db.thread_name(), Some("notes"));

        let add = net::AddThreadRequest {
            addr: encode_components(&[AddrComponent::tcp(4006), AddrComponent::thread(&id)]),
            key: vec![],
            name: String::new(),
        };
        assert_eq!(IdSource::Addr.extract(&add).unwrap(), Some(id.clone()));
        assert_eq!(IdSource::ThreadId.extract(&add).unwrap(), None);

        let replicate = net::AddReplicatorRequest {
            thread_id: id.as_bytes().to_vec(),
            addr: encode_components(&[AddrComponent::p2p(b"peer")]),
        };
        assert_eq!(IdSource::Addr.extract(&replicate).unwrap(), None);
        assert_eq!(IdSource::ThreadId.extract(&replicate).unwrap(), Some(id));
    }

    #[test]
    fn at_fields_02_empty_id_field_does_not_decode() {
        let req = db::GetDbInfoRequest { db_id: vec![] };
        assert!(IdSource::DbId.extract(&req).is_err());
    }
}
