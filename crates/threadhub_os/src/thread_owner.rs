#![forbid(unsafe_code)]

use std::sync::Arc;

use threadhub_kernel_contracts::account::{ApiKey, OwnerKey};
use threadhub_kernel_contracts::rpc::{db_methods, net_methods};
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_storage::repo::ThreadOwnershipRepo;
use tracing::debug;

use crate::thread_guard::ThreadGuardError;

/// Methods that may touch threads the caller does not track. Everything else
/// requires every referenced id to be tracked for the caller's owner.
pub const ALLOWED_CROSS_ACCOUNT_METHODS: &[&str] = &[
    db_methods::CREATE,
    db_methods::SAVE,
    db_methods::DELETE,
    db_methods::HAS,
    db_methods::FIND,
    net_methods::GET_THREAD,
    net_methods::GET_RECORD,
];

pub fn is_cross_account_allowed(method: &str) -> bool {
    ALLOWED_CROSS_ACCOUNT_METHODS.contains(&method)
}

#[derive(Clone)]
pub struct OwnershipGuard {
    threads: Arc<dyn ThreadOwnershipRepo>,
}

impl OwnershipGuard {
    pub fn new(threads: Arc<dyn ThreadOwnershipRepo>) -> Self {
        Self { threads }
    }

    /// Every candidate must pass. An untracked id passes only for
    /// cross-account methods; a tracked one also requires a user-scoped
    /// key to match the key it was created with.
    pub async fn check_ownership(
        &self,
        owner: &OwnerKey,
        api_key: Option<&ApiKey>,
        candidates: &[ThreadId],
        method: &str,
    ) -> Result<(), ThreadGuardError> {
        for id in candidates {
            let record = match self.threads.get(id, owner).await {
                Ok(record) => record,
                Err(err) if err.is_not_found() => {
                    if is_cross_account_allowed(method) {
                        debug!(thread_id = %id, method, "cross-account access to untracked thread");
                        continue;
                    }
                    return Err(ThreadGuardError::NotThreadOwner {
                        thread_id: id.clone(),
                    });
                }
                Err(err) => return Err(ThreadGuardError::Store(err)),
            };
            if let Some(key) = api_key.filter(|key| key.is_user_scoped()) {
                if record.api_key.as_deref() != Some(key.key.as_str()) {
                    return Err(ThreadGuardError::ApiKeyMismatch {
                        thread_id: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
