#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use threadhub_kernel_contracts::account::{AccountContext, ApiKey, OwnerKey, SessionId};
use threadhub_kernel_contracts::ownership::{
    IpnsKeyRecord, ThreadOwnershipInput, ThreadOwnershipRecord,
};
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_kernel_contracts::{ContractViolation, MonotonicTimeNs, Validate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{table}: no row for key {key}")]
    NotFound { table: &'static str, key: String },
    #[error("{table}: duplicate key {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
    #[error("{table}: lock poisoned")]
    LockPoisoned { table: &'static str },
    #[error("journal {path}: {reason}")]
    Journal { path: String, reason: String },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// In-memory table set backing thread ownership and the records it depends on.
#[derive(Debug, Default, Clone)]
pub struct ThreadTables {
    threads: BTreeMap<ThreadId, ThreadOwnershipRecord>,
    thread_names: BTreeMap<(OwnerKey, String), ThreadId>,
    ipns_keys: BTreeMap<String, IpnsKeyRecord>,
    api_keys: BTreeMap<String, ApiKey>,
    sessions: BTreeMap<SessionId, AccountContext>,
}

impl ThreadTables {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    pub fn insert_thread(
        &mut self,
        input: ThreadOwnershipInput,
        now: MonotonicTimeNs,
    ) -> Result<ThreadOwnershipRecord, StorageError> {
        input.validate()?;
        if self.threads.contains_key(&input.id) {
            return Err(StorageError::DuplicateKey {
                table: "threads",
                key: input.id.encode(),
            });
        }
        if let Some(name) = &input.name {
            let name_key = (input.owner.clone(), name.clone());
            if self.thread_names.contains_key(&name_key) {
                return Err(StorageError::DuplicateKey {
                    table: "threads.owner_name",
                    key: format!("{}/{}", input.owner.as_str(), name),
                });
            }
            self.thread_names.insert(name_key, input.id.clone());
        }
        let record = ThreadOwnershipRecord::from_input(input, now);
        self.threads.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Restores a row exactly as journaled, keeping its creation timestamp.
    pub fn restore_thread(&mut self, record: ThreadOwnershipRecord) -> Result<(), StorageError> {
        let created_at = record.created_at;
        let input = ThreadOwnershipInput::v1(
            record.id,
            record.owner,
            record.api_key,
            record.name,
            record.is_db,
        )?;
        self.insert_thread(input, created_at).map(|_| ())
    }

    /// Rows are scoped to their owner: another owner's thread reads as absent.
    pub fn thread_row(
        &self,
        id: &ThreadId,
        owner: &OwnerKey,
    ) -> Result<&ThreadOwnershipRecord, StorageError> {
        match self.threads.get(id) {
            Some(record) if &record.owner == owner => Ok(record),
            _ => Err(StorageError::NotFound {
                table: "threads",
                key: id.encode(),
            }),
        }
    }

    pub fn thread_row_by_name(
        &self,
        name: &str,
        owner: &OwnerKey,
    ) -> Result<&ThreadOwnershipRecord, StorageError> {
        self.thread_names
            .get(&(owner.clone(), name.to_string()))
            .and_then(|id| self.threads.get(id))
            .ok_or_else(|| StorageError::NotFound {
                table: "threads.owner_name",
                key: format!("{}/{}", owner.as_str(), name),
            })
    }

    pub fn thread_rows_by_owner(&self, owner: &OwnerKey) -> Vec<&ThreadOwnershipRecord> {
        self.threads
            .values()
            .filter(|record| &record.owner == owner)
            .collect()
    }

    pub fn remove_thread(&mut self, id: &ThreadId, owner: &OwnerKey) -> Result<(), StorageError> {
        let record = self.thread_row(id, owner)?.clone();
        if let Some(name) = &record.name {
            self.thread_names.remove(&(record.owner.clone(), name.clone()));
        }
        self.threads.remove(id);
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn insert_ipns_key(&mut self, record: IpnsKeyRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.ipns_keys.contains_key(&record.name) {
            return Err(StorageError::DuplicateKey {
                table: "ipns_keys",
                key: record.name,
            });
        }
        self.ipns_keys.insert(record.name.clone(), record);
        Ok(())
    }

    pub fn ipns_key_rows_by_thread(&self, thread_id: &ThreadId) -> Vec<&IpnsKeyRecord> {
        self.ipns_keys
            .values()
            .filter(|record| &record.thread_id == thread_id)
            .collect()
    }

    pub fn remove_ipns_key(&mut self, name: &str) -> Result<IpnsKeyRecord, StorageError> {
        self.ipns_keys
            .remove(name)
            .ok_or_else(|| StorageError::NotFound {
                table: "ipns_keys",
                key: name.to_string(),
            })
    }

    pub fn insert_api_key(&mut self, key: ApiKey) -> Result<(), StorageError> {
        key.validate()?;
        if self.api_keys.contains_key(&key.key) {
            return Err(StorageError::DuplicateKey {
                table: "api_keys",
                key: key.key,
            });
        }
        self.api_keys.insert(key.key.clone(), key);
        Ok(())
    }

    pub fn api_key_row(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.get(key)
    }

    pub fn remove_api_key(&mut self, key: &str) -> Option<ApiKey> {
        self.api_keys.remove(key)
    }

    pub fn insert_session(
        &mut self,
        session: SessionId,
        account: AccountContext,
    ) -> Result<(), StorageError> {
        account.user.validate()?;
        if let Some(org) = &account.org {
            org.validate()?;
        }
        if self.sessions.contains_key(&session) {
            return Err(StorageError::DuplicateKey {
                table: "sessions",
                key: session.as_str().to_string(),
            });
        }
        self.sessions.insert(session, account);
        Ok(())
    }

    pub fn session_row(&self, session: &SessionId) -> Option<&AccountContext> {
        self.sessions.get(session)
    }

    pub fn remove_session(&mut self, session: &SessionId) -> Option<AccountContext> {
        self.sessions.remove(session)
    }
}
