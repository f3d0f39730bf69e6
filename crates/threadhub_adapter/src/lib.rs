#![forbid(unsafe_code)]

pub mod call_context;
pub mod guarded;
pub mod memory_engine;
pub mod request_fields;
pub mod runtime;
pub mod status;

pub mod grpc_api {
    /// `threads.pb.API`: database threads.
    pub mod db {
        tonic::include_proto!("threads.pb");
    }

    /// `threads.net.pb.API`: network threads.
    pub mod net {
        tonic::include_proto!("threads.net.pb");
    }
}

pub use call_context::MetadataCallResolver;
pub use guarded::{GuardedDbApi, GuardedNetApi, ThreadInterceptor};
pub use runtime::{AdapterConfig, AdapterRuntime};
