#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use threadhub_kernel_contracts::account::{ApiKey, OwnerKey};
use threadhub_kernel_contracts::ownership::ThreadOwnershipInput;
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_storage::repo::{IpnsKeyRepo, ThreadOwnershipRepo};
use tracing::{error, info};

use crate::thread_guard::{InterceptError, ThreadGuardError};

/// What the tracker still owes a call once its handler has returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracked {
    Nothing,
    /// Pre-registered before the handler ran; undone if the handler fails.
    Registered { id: ThreadId, owner: OwnerKey },
    /// Removed only once the handler confirms the delete.
    PendingDelete { id: ThreadId, owner: OwnerKey },
}

/// Rolls back a pre-registration if dropped before its call settles, e.g.
/// when the request future is cancelled mid-handler.
pub struct PendingRollback {
    threads: Arc<dyn ThreadOwnershipRepo>,
    armed: Option<(ThreadId, OwnerKey)>,
}

impl PendingRollback {
    pub fn disarm(mut self) {
        self.armed = None;
    }
}

impl fmt::Debug for PendingRollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRollback")
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for PendingRollback {
    fn drop(&mut self) {
        let Some((id, owner)) = self.armed.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                thread_id = %id,
                owner = owner.as_str(),
                "no runtime to roll back abandoned thread pre-registration"
            );
            return;
        };
        let threads = Arc::clone(&self.threads);
        runtime.spawn(async move {
            match threads.delete(&id, &owner).await {
                Ok(()) => info!(
                    thread_id = %id,
                    owner = owner.as_str(),
                    "rolled back abandoned thread pre-registration"
                ),
                Err(err) => error!(
                    thread_id = %id,
                    owner = owner.as_str(),
                    error = %err,
                    "failed to roll back abandoned thread pre-registration"
                ),
            }
        });
    }
}

#[derive(Clone)]
pub struct LifecycleTracker {
    threads: Arc<dyn ThreadOwnershipRepo>,
    ipns_keys: Arc<dyn IpnsKeyRepo>,
    max_threads_per_owner: usize,
}

impl LifecycleTracker {
    /// `max_threads_per_owner == 0` disables the quota.
    pub fn new(
        threads: Arc<dyn ThreadOwnershipRepo>,
        ipns_keys: Arc<dyn IpnsKeyRepo>,
        max_threads_per_owner: usize,
    ) -> Self {
        Self {
            threads,
            ipns_keys,
            max_threads_per_owner,
        }
    }

    /// Quota check then pre-registration. The count and the insert are not
    /// atomic, so concurrent creates may overshoot the quota slightly.
    pub async fn reserve(
        &self,
        owner: &OwnerKey,
        api_key: Option<&ApiKey>,
        id: ThreadId,
        is_db: bool,
        name: Option<String>,
    ) -> Result<Tracked, ThreadGuardError> {
        if self.max_threads_per_owner > 0 {
            let existing = self.threads.list_by_owner(owner).await?;
            if existing.len() >= self.max_threads_per_owner {
                return Err(ThreadGuardError::TooManyThreads {
                    owner: owner.as_str().to_string(),
                    limit: self.max_threads_per_owner,
                });
            }
        }
        let recorded_key = api_key
            .filter(|key| key.is_user_scoped())
            .map(|key| key.key.clone());
        let input = ThreadOwnershipInput::v1(id, owner.clone(), recorded_key, name, is_db)
            .map_err(ThreadGuardError::InvalidRegistration)?;
        let record = self.threads.create(input).await?;
        info!(
            thread_id = %record.id,
            owner = record.owner.as_str(),
            is_db = record.is_db,
            "pre-registered thread"
        );
        Ok(Tracked::Registered {
            id: record.id,
            owner: record.owner,
        })
    }

    /// A database with published IPNS keys cannot be deleted.
    pub async fn ensure_db_empty(&self, id: &ThreadId) -> Result<(), ThreadGuardError> {
        let dependents = self.ipns_keys.list_by_thread_id(id).await?;
        if !dependents.is_empty() {
            return Err(ThreadGuardError::DatabaseNotEmpty {
                thread_id: id.clone(),
                dependents: dependents.len(),
            });
        }
        Ok(())
    }

    /// Arms a rollback for a pre-registered thread; `None` for anything else.
    pub fn rollback_on_drop(&self, tracked: &Tracked) -> Option<PendingRollback> {
        match tracked {
            Tracked::Registered { id, owner } => Some(PendingRollback {
                threads: Arc::clone(&self.threads),
                armed: Some((id.clone(), owner.clone())),
            }),
            _ => None,
        }
    }

    pub fn track_delete(&self, id: ThreadId, owner: &OwnerKey) -> Tracked {
        Tracked::PendingDelete {
            id,
            owner: owner.clone(),
        }
    }

    /// Rollback failures are logged and swallowed so the handler's error
    /// reaches the caller. Post-delete failures are surfaced.
    pub async fn settle<R, E>(
        &self,
        tracked: Tracked,
        outcome: Result<R, E>,
    ) -> Result<R, InterceptError<E>> {
        match (tracked, outcome) {
            (Tracked::Registered { id, owner }, Err(handler_err)) => {
                match self.delete_detached(id.clone(), owner.clone()).await {
                    Ok(()) => info!(
                        thread_id = %id,
                        owner = owner.as_str(),
                        "rolled back thread pre-registration"
                    ),
                    Err(err) => error!(
                        thread_id = %id,
                        owner = owner.as_str(),
                        error = %err,
                        "failed to roll back thread pre-registration"
                    ),
                }
                Err(InterceptError::Handler(handler_err))
            }
            (Tracked::PendingDelete { id, owner }, Ok(response)) => {
                self.delete_detached(id.clone(), owner.clone())
                    .await
                    .map_err(InterceptError::Guard)?;
                info!(thread_id = %id, owner = owner.as_str(), "released thread");
                Ok(response)
            }
            (_, Err(handler_err)) => Err(InterceptError::Handler(handler_err)),
            (_, Ok(response)) => Ok(response),
        }
    }

    /// Runs the delete on its own task so it completes even if the caller's
    /// request future is dropped mid-await.
    async fn delete_detached(&self, id: ThreadId, owner: OwnerKey) -> Result<(), ThreadGuardError> {
        let threads = Arc::clone(&self.threads);
        let task = tokio::spawn(async move { threads.delete(&id, &owner).await });
        match task.await {
            Ok(result) => result.map_err(ThreadGuardError::from),
            Err(join_err) => Err(ThreadGuardError::CompensationAborted {
                reason: join_err.to_string(),
            }),
        }
    }
}
