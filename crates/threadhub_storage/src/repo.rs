#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use threadhub_kernel_contracts::account::{AccountContext, ApiKey, OwnerKey, SessionId};
use threadhub_kernel_contracts::ownership::{
    IpnsKeyRecord, ThreadOwnershipInput, ThreadOwnershipRecord,
};
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_kernel_contracts::MonotonicTimeNs;
use tracing::debug;

use crate::journal::{ThreadJournal, ThreadJournalOp};
use crate::threads::{StorageError, ThreadTables};

/// Typed repository interface for thread ownership rows.
#[async_trait]
pub trait ThreadOwnershipRepo: Send + Sync {
    async fn list_by_owner(
        &self,
        owner: &OwnerKey,
    ) -> Result<Vec<ThreadOwnershipRecord>, StorageError>;

    /// Fails with [`StorageError::NotFound`] when the id is untracked or tracked for another owner.
    async fn get(
        &self,
        id: &ThreadId,
        owner: &OwnerKey,
    ) -> Result<ThreadOwnershipRecord, StorageError>;

    async fn get_by_name(
        &self,
        name: &str,
        owner: &OwnerKey,
    ) -> Result<ThreadOwnershipRecord, StorageError>;

    async fn create(
        &self,
        input: ThreadOwnershipInput,
    ) -> Result<ThreadOwnershipRecord, StorageError>;

    async fn delete(&self, id: &ThreadId, owner: &OwnerKey) -> Result<(), StorageError>;
}

/// Typed repository interface for IPNS key rows that depend on a database thread.
#[async_trait]
pub trait IpnsKeyRepo: Send + Sync {
    async fn create_key(&self, record: IpnsKeyRecord) -> Result<(), StorageError>;
    async fn list_by_thread_id(&self, id: &ThreadId) -> Result<Vec<IpnsKeyRecord>, StorageError>;
    async fn delete_key(&self, name: &str) -> Result<(), StorageError>;
}

/// Resolves transport credentials to accounts and API keys.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn account_for_session(
        &self,
        session: &SessionId,
    ) -> Result<Option<AccountContext>, StorageError>;
    async fn api_key(&self, key: &str) -> Result<Option<ApiKey>, StorageError>;
}

/// Thread tables shared across concurrent calls, optionally backed by a journal.
#[derive(Debug, Clone, Default)]
pub struct SharedThreadStore {
    tables: Arc<Mutex<ThreadTables>>,
    journal: Option<ThreadJournal>,
}

impl SharedThreadStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Opens (or creates) the journal at `path` and replays it into fresh tables.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let journal = ThreadJournal::open(path)?;
        let mut tables = ThreadTables::new_in_memory();
        let applied = journal.replay_into(&mut tables)?;
        debug!(
            path = %journal.path().display(),
            applied,
            threads = tables.thread_count(),
            "replayed thread journal"
        );
        Ok(Self {
            tables: Arc::new(Mutex::new(tables)),
            journal: Some(journal),
        })
    }

    pub fn snapshot(&self) -> Result<ThreadTables, StorageError> {
        Ok(self.lock()?.clone())
    }

    pub fn register_api_key(&self, key: ApiKey) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.insert_api_key(key.clone())?;
        let name = key.key.clone();
        if let Err(err) = self.append(ThreadJournalOp::ApiKeyCreated { key }) {
            tables.remove_api_key(&name);
            return Err(err);
        }
        Ok(())
    }

    pub fn register_session(
        &self,
        session: SessionId,
        account: AccountContext,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.insert_session(session.clone(), account.clone())?;
        if let Err(err) = self.append(ThreadJournalOp::SessionCreated {
            session: session.clone(),
            account,
        }) {
            tables.remove_session(&session);
            return Err(err);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ThreadTables>, StorageError> {
        self.tables
            .lock()
            .map_err(|_| StorageError::LockPoisoned { table: "threads" })
    }

    fn append(&self, op: ThreadJournalOp) -> Result<(), StorageError> {
        match &self.journal {
            Some(journal) => journal.append(&op),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ThreadOwnershipRepo for SharedThreadStore {
    async fn list_by_owner(
        &self,
        owner: &OwnerKey,
    ) -> Result<Vec<ThreadOwnershipRecord>, StorageError> {
        let tables = self.lock()?;
        Ok(tables
            .thread_rows_by_owner(owner)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        id: &ThreadId,
        owner: &OwnerKey,
    ) -> Result<ThreadOwnershipRecord, StorageError> {
        self.lock()?.thread_row(id, owner).cloned()
    }

    async fn get_by_name(
        &self,
        name: &str,
        owner: &OwnerKey,
    ) -> Result<ThreadOwnershipRecord, StorageError> {
        self.lock()?.thread_row_by_name(name, owner).cloned()
    }

    async fn create(
        &self,
        input: ThreadOwnershipInput,
    ) -> Result<ThreadOwnershipRecord, StorageError> {
        let mut tables = self.lock()?;
        let record = tables.insert_thread(input, MonotonicTimeNs::now())?;
        if let Err(err) = self.append(ThreadJournalOp::ThreadCreated {
            record: record.clone(),
        }) {
            tables.remove_thread(&record.id, &record.owner)?;
            return Err(err);
        }
        Ok(record)
    }

    async fn delete(&self, id: &ThreadId, owner: &OwnerKey) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let record = tables.thread_row(id, owner)?.clone();
        tables.remove_thread(id, owner)?;
        if let Err(err) = self.append(ThreadJournalOp::ThreadDeleted {
            id: id.clone(),
            owner: owner.clone(),
        }) {
            tables.restore_thread(record)?;
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl IpnsKeyRepo for SharedThreadStore {
    async fn create_key(&self, record: IpnsKeyRecord) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.insert_ipns_key(record.clone())?;
        if let Err(err) = self.append(ThreadJournalOp::IpnsKeyCreated {
            record: record.clone(),
        }) {
            tables.remove_ipns_key(&record.name)?;
            return Err(err);
        }
        Ok(())
    }

    async fn list_by_thread_id(&self, id: &ThreadId) -> Result<Vec<IpnsKeyRecord>, StorageError> {
        let tables = self.lock()?;
        Ok(tables
            .ipns_key_rows_by_thread(id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn delete_key(&self, name: &str) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let removed = tables.remove_ipns_key(name)?;
        if let Err(err) = self.append(ThreadJournalOp::IpnsKeyDeleted {
            name: name.to_string(),
        }) {
            tables.insert_ipns_key(removed)?;
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionDirectory for SharedThreadStore {
    async fn account_for_session(
        &self,
        session: &SessionId,
    ) -> Result<Option<AccountContext>, StorageError> {
        Ok(self.lock()?.session_row(session).cloned())
    }

    async fn api_key(&self, key: &str) -> Result<Option<ApiKey>, StorageError> {
        Ok(self.lock()?.api_key_row(key).cloned())
    }
}
