#![forbid(unsafe_code)]

pub mod account;
pub mod call;
pub mod common;
pub mod ownership;
pub mod rpc;
pub mod thread;
pub mod thread_addr;

pub use common::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};
