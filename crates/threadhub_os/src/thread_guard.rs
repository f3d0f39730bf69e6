#![forbid(unsafe_code)]

//! Per-call thread guard: classifies the method, authenticates the caller,
//! checks ownership and quota, then settles lifecycle bookkeeping around
//! the downstream handler.

use std::env;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use threadhub_kernel_contracts::account::{AccountContext, SessionId};
use threadhub_kernel_contracts::call::CallContext;
use threadhub_kernel_contracts::rpc::ThreadRequestFields;
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};
use threadhub_storage::repo::{IpnsKeyRepo, ThreadOwnershipRepo};
use threadhub_storage::StorageError;
use tracing::{debug, warn};

use crate::thread_dispatch::{classify, method_class, Dispatch, MethodClass};
use crate::thread_lifecycle::{LifecycleTracker, PendingRollback, Tracked};
use crate::thread_owner::OwnershipGuard;

pub mod reason_codes {
    use threadhub_kernel_contracts::ReasonCodeId;

    pub const THREAD_METHOD_BLOCKED: ReasonCodeId = ReasonCodeId(0x5448_0101);
    pub const THREAD_ACCOUNT_REQUIRED: ReasonCodeId = ReasonCodeId(0x5448_0102);
    pub const THREAD_ID_MALFORMED: ReasonCodeId = ReasonCodeId(0x5448_0103);
    pub const THREAD_NOT_OWNER: ReasonCodeId = ReasonCodeId(0x5448_0104);
    pub const THREAD_API_KEY_MISMATCH: ReasonCodeId = ReasonCodeId(0x5448_0105);
    pub const THREAD_DB_NOT_EMPTY: ReasonCodeId = ReasonCodeId(0x5448_0106);
    pub const THREAD_QUOTA_EXCEEDED: ReasonCodeId = ReasonCodeId(0x5448_0107);
    pub const THREAD_ALREADY_TRACKED: ReasonCodeId = ReasonCodeId(0x5448_0108);
    pub const THREAD_REGISTRATION_INVALID: ReasonCodeId = ReasonCodeId(0x5448_0109);
    pub const THREAD_STORE_FAILURE: ReasonCodeId = ReasonCodeId(0x5448_01F1);
    pub const THREAD_COMPENSATION_ABORTED: ReasonCodeId = ReasonCodeId(0x5448_01F2);
}

pub const ENV_MAX_THREADS_PER_OWNER: &str = "THREADHUB_MAX_THREADS_PER_OWNER";
pub const ENV_INTERNAL_SESSION: &str = "THREADHUB_INTERNAL_SESSION";
pub const MAX_THREADS_PER_OWNER_CEILING: usize = 1_000_000;

/// Transport-neutral category of a guard rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardErrorCode {
    PermissionDenied,
    FailedPrecondition,
    ResourceExhausted,
    InvalidArgument,
    AlreadyExists,
    Internal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThreadGuardError {
    #[error("method is not accessible: {method}")]
    MethodBlocked { method: String },
    #[error("account is required")]
    AccountRequired,
    #[error("malformed thread id in {method}: {violation}")]
    MalformedThreadId {
        method: String,
        violation: ContractViolation,
    },
    #[error("account does not own thread {thread_id}")]
    NotThreadOwner { thread_id: ThreadId },
    #[error("bad API key for thread {thread_id}")]
    ApiKeyMismatch { thread_id: ThreadId },
    #[error("DB not empty: {thread_id} still has {dependents} IPNS key(s)")]
    DatabaseNotEmpty {
        thread_id: ThreadId,
        dependents: usize,
    },
    #[error("too many threads for owner {owner} (limit {limit})")]
    TooManyThreads { owner: String, limit: usize },
    #[error("thread already tracked: {key}")]
    AlreadyTracked { key: String },
    #[error("invalid thread registration: {0}")]
    InvalidRegistration(ContractViolation),
    #[error("thread store failure: {0}")]
    Store(StorageError),
    #[error("thread bookkeeping task aborted: {reason}")]
    CompensationAborted { reason: String },
}

impl ThreadGuardError {
    pub fn code(&self) -> GuardErrorCode {
        match self {
            ThreadGuardError::MethodBlocked { .. }
            | ThreadGuardError::NotThreadOwner { .. }
            | ThreadGuardError::ApiKeyMismatch { .. } => GuardErrorCode::PermissionDenied,
            ThreadGuardError::AccountRequired | ThreadGuardError::DatabaseNotEmpty { .. } => {
                GuardErrorCode::FailedPrecondition
            }
            ThreadGuardError::TooManyThreads { .. } => GuardErrorCode::ResourceExhausted,
            ThreadGuardError::MalformedThreadId { .. }
            | ThreadGuardError::InvalidRegistration(_) => GuardErrorCode::InvalidArgument,
            ThreadGuardError::AlreadyTracked { .. } => GuardErrorCode::AlreadyExists,
            ThreadGuardError::Store(_) | ThreadGuardError::CompensationAborted { .. } => {
                GuardErrorCode::Internal
            }
        }
    }

    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            ThreadGuardError::MethodBlocked { .. } => reason_codes::THREAD_METHOD_BLOCKED,
            ThreadGuardError::AccountRequired => reason_codes::THREAD_ACCOUNT_REQUIRED,
            ThreadGuardError::MalformedThreadId { .. } => reason_codes::THREAD_ID_MALFORMED,
            ThreadGuardError::NotThreadOwner { .. } => reason_codes::THREAD_NOT_OWNER,
            ThreadGuardError::ApiKeyMismatch { .. } => reason_codes::THREAD_API_KEY_MISMATCH,
            ThreadGuardError::DatabaseNotEmpty { .. } => reason_codes::THREAD_DB_NOT_EMPTY,
            ThreadGuardError::TooManyThreads { .. } => reason_codes::THREAD_QUOTA_EXCEEDED,
            ThreadGuardError::AlreadyTracked { .. } => reason_codes::THREAD_ALREADY_TRACKED,
            ThreadGuardError::InvalidRegistration(_) => reason_codes::THREAD_REGISTRATION_INVALID,
            ThreadGuardError::Store(_) => reason_codes::THREAD_STORE_FAILURE,
            ThreadGuardError::CompensationAborted { .. } => {
                reason_codes::THREAD_COMPENSATION_ABORTED
            }
        }
    }
}

impl From<StorageError> for ThreadGuardError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateKey { table, key } => ThreadGuardError::AlreadyTracked {
                key: format!("{table}/{key}"),
            },
            other => ThreadGuardError::Store(other),
        }
    }
}

/// Either the guard refused or bookkept the call, or the handler itself failed.
#[derive(Debug)]
pub enum InterceptError<E> {
    Guard(ThreadGuardError),
    Handler(E),
}

impl<E> From<ThreadGuardError> for InterceptError<E> {
    fn from(err: ThreadGuardError) -> Self {
        InterceptError::Guard(err)
    }
}

impl<E: fmt::Display> fmt::Display for InterceptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptError::Guard(err) => write!(f, "{err}"),
            InterceptError::Handler(err) => write!(f, "{err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for InterceptError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InterceptError::Guard(err) => Some(err),
            InterceptError::Handler(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadGuardConfig {
    /// Zero disables the per-owner quota.
    pub max_threads_per_owner: usize,
    /// Calls carrying this session skip every check.
    pub internal_session: Option<SessionId>,
}

impl ThreadGuardConfig {
    pub fn unlimited() -> Self {
        Self {
            max_threads_per_owner: 0,
            internal_session: None,
        }
    }

    pub fn from_env() -> Result<Self, ContractViolation> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, ContractViolation>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::unlimited();
        if let Some(v) = env_getter(ENV_MAX_THREADS_PER_OWNER) {
            config.max_threads_per_owner =
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ContractViolation::InvalidValue {
                        field: "thread_guard_config.max_threads_per_owner",
                        reason: "must be an unsigned integer",
                    })?;
        }
        if let Some(v) = env_getter(ENV_INTERNAL_SESSION) {
            let v = v.trim();
            if !v.is_empty() {
                config.internal_session = Some(SessionId::new(v)?);
            }
        }
        config.validate()?;
        Ok(config)
    }
}

impl Default for ThreadGuardConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Validate for ThreadGuardConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.max_threads_per_owner > MAX_THREADS_PER_OWNER_CEILING {
            return Err(ContractViolation::InvalidRange {
                field: "thread_guard_config.max_threads_per_owner",
                min: 0,
                max: MAX_THREADS_PER_OWNER_CEILING as u64,
                got: self.max_threads_per_owner as u64,
            });
        }
        if let Some(session) = &self.internal_session {
            session.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    IgnoredMethod,
    InternalSession,
}

/// Result of the synchronous checks, before any store access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPlan {
    Bypass(BypassReason),
    Guarded {
        account: AccountContext,
        dispatch: Dispatch,
    },
}

/// Bookkeeping owed once the handler returns. Dropping an admission for a
/// created thread without settling it rolls the registration back.
#[derive(Debug)]
pub struct Admission {
    tracked: Tracked,
    rollback: Option<PendingRollback>,
}

impl Admission {
    pub fn tracked(&self) -> &Tracked {
        &self.tracked
    }
}

#[derive(Clone)]
pub struct ThreadGuard {
    config: ThreadGuardConfig,
    owners: OwnershipGuard,
    lifecycle: LifecycleTracker,
}

impl ThreadGuard {
    pub fn new(
        config: ThreadGuardConfig,
        threads: Arc<dyn ThreadOwnershipRepo>,
        ipns_keys: Arc<dyn IpnsKeyRepo>,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        let lifecycle = LifecycleTracker::new(
            Arc::clone(&threads),
            ipns_keys,
            config.max_threads_per_owner,
        );
        Ok(Self {
            config,
            owners: OwnershipGuard::new(threads),
            lifecycle,
        })
    }

    pub fn config(&self) -> &ThreadGuardConfig {
        &self.config
    }

    /// Ignored and blocked methods, the internal session, the account
    /// requirement, then id decoding. Touches no store.
    pub fn plan(
        &self,
        call: &CallContext,
        method: &str,
        request: &(impl ThreadRequestFields + ?Sized),
    ) -> Result<CallPlan, ThreadGuardError> {
        let class = method_class(method);
        match class {
            MethodClass::Ignored => {
                debug!(method, "thread guard bypass: ignored method");
                return Ok(CallPlan::Bypass(BypassReason::IgnoredMethod));
            }
            MethodClass::Blocked => {
                return Err(rejected(
                    method,
                    ThreadGuardError::MethodBlocked {
                        method: method.to_string(),
                    },
                ));
            }
            _ => {}
        }
        if let (Some(internal), Some(session)) = (&self.config.internal_session, call.session()) {
            if internal == session {
                debug!(method, "thread guard bypass: internal session");
                return Ok(CallPlan::Bypass(BypassReason::InternalSession));
            }
        }
        let account = call
            .account()
            .cloned()
            .ok_or_else(|| rejected(method, ThreadGuardError::AccountRequired))?;
        let dispatch = classify(class, method, call, request).map_err(|err| rejected(method, err))?;
        Ok(CallPlan::Guarded { account, dispatch })
    }

    /// Ownership, dependents and quota checks, plus pre-registration of
    /// created threads.
    pub async fn admit(
        &self,
        call: &CallContext,
        method: &str,
        plan: CallPlan,
    ) -> Result<Admission, ThreadGuardError> {
        let (account, dispatch) = match plan {
            CallPlan::Bypass(_) => {
                return Ok(Admission {
                    tracked: Tracked::Nothing,
                    rollback: None,
                })
            }
            CallPlan::Guarded { account, dispatch } => (account, dispatch),
        };
        let owner = &account.owner().key;
        let tracked = match dispatch {
            Dispatch::Reference { candidates } => {
                self.owners
                    .check_ownership(owner, call.api_key(), &candidates, method)
                    .await
                    .map_err(|err| rejected(method, err))?;
                Tracked::Nothing
            }
            Dispatch::Delete {
                id,
                is_db,
                candidates,
            } => {
                self.owners
                    .check_ownership(owner, call.api_key(), &candidates, method)
                    .await
                    .map_err(|err| rejected(method, err))?;
                if is_db {
                    self.lifecycle
                        .ensure_db_empty(&id)
                        .await
                        .map_err(|err| rejected(method, err))?;
                }
                self.lifecycle.track_delete(id, owner)
            }
            Dispatch::Create { id, is_db, name } => self
                .lifecycle
                .reserve(owner, call.api_key(), id, is_db, name)
                .await
                .map_err(|err| rejected(method, err))?,
        };
        let rollback = self.lifecycle.rollback_on_drop(&tracked);
        Ok(Admission { tracked, rollback })
    }

    pub async fn settle<R, E>(
        &self,
        admission: Admission,
        outcome: Result<R, E>,
    ) -> Result<R, InterceptError<E>> {
        let Admission { tracked, rollback } = admission;
        if let Some(rollback) = rollback {
            rollback.disarm();
        }
        self.lifecycle.settle(tracked, outcome).await
    }

    /// Runs the full guard around `handler`. If this future is dropped while
    /// the handler is pending, a pre-registered thread is rolled back.
    pub async fn intercept<Req, R, E, H, Fut>(
        &self,
        call: &CallContext,
        method: &str,
        request: Req,
        handler: H,
    ) -> Result<R, InterceptError<E>>
    where
        Req: ThreadRequestFields,
        H: FnOnce(Req) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let plan = self.plan(call, method, &request)?;
        let admission = self.admit(call, method, plan).await?;
        let outcome = handler(request).await;
        self.settle(admission, outcome).await
    }
}

fn rejected(method: &str, err: ThreadGuardError) -> ThreadGuardError {
    match err.code() {
        GuardErrorCode::Internal => warn!(method, error = %err, "thread guard store failure"),
        _ => warn!(
            method,
            reason_code = err.reason_code().0,
            error = %err,
            "thread guard rejected call"
        ),
    }
    err
}
