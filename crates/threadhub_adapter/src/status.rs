#![forbid(unsafe_code)]

use threadhub_os::thread_guard::{GuardErrorCode, InterceptError, ThreadGuardError};
use threadhub_storage::StorageError;
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

/// Trailer carrying the guard's reason code, as `0x` + 8 hex digits.
pub const REASON_CODE_METADATA_KEY: &str = "x-threadhub-reason-code";

pub fn guard_code(code: GuardErrorCode) -> Code {
    match code {
        GuardErrorCode::PermissionDenied => Code::PermissionDenied,
        GuardErrorCode::FailedPrecondition => Code::FailedPrecondition,
        GuardErrorCode::ResourceExhausted => Code::ResourceExhausted,
        GuardErrorCode::InvalidArgument => Code::InvalidArgument,
        GuardErrorCode::AlreadyExists => Code::AlreadyExists,
        GuardErrorCode::Internal => Code::Internal,
    }
}

pub fn guard_status(err: &ThreadGuardError) -> Status {
    let mut status = Status::new(guard_code(err.code()), err.to_string());
    if let Ok(val) = MetadataValue::try_from(format!("{:#010x}", err.reason_code().0)) {
        status.metadata_mut().insert(REASON_CODE_METADATA_KEY, val);
    }
    status
}

/// Handler statuses pass through untouched.
pub fn intercept_status(err: InterceptError<Status>) -> Status {
    match err {
        InterceptError::Guard(err) => guard_status(&err),
        InterceptError::Handler(status) => status,
    }
}

pub fn storage_status(err: StorageError) -> Status {
    Status::internal(err.to_string())
}
