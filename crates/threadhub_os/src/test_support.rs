#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use threadhub_kernel_contracts::account::{
    Account, AccountContext, AccountKind, ApiKey, ApiKeyKind, OwnerKey,
};
use threadhub_kernel_contracts::ownership::{ThreadOwnershipInput, ThreadOwnershipRecord};
use threadhub_kernel_contracts::rpc::ThreadRequestFields;
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_storage::repo::{SharedThreadStore, ThreadOwnershipRepo};
use threadhub_storage::StorageError;

#[derive(Debug, Default, Clone)]
pub struct FakeRequest {
    pub db_id: Option<Vec<u8>>,
    pub thread_id: Option<Vec<u8>>,
    pub addr: Option<Vec<u8>>,
    pub name: Option<String>,
}

impl FakeRequest {
    pub fn with_db_id(id: &ThreadId) -> Self {
        Self {
            db_id: Some(id.as_bytes().to_vec()),
            ..Self::default()
        }
    }

    pub fn with_thread_id(id: &ThreadId) -> Self {
        Self {
            thread_id: Some(id.as_bytes().to_vec()),
            ..Self::default()
        }
    }
}

impl ThreadRequestFields for FakeRequest {
    fn db_id(&self) -> Option<&[u8]> {
        self.db_id.as_deref()
    }

    fn thread_id(&self) -> Option<&[u8]> {
        self.thread_id.as_deref()
    }

    fn addr(&self) -> Option<&[u8]> {
        self.addr.as_deref()
    }

    fn thread_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

pub fn owner(key: &str) -> OwnerKey {
    OwnerKey::new(key).unwrap()
}

pub fn account(key: &str, kind: AccountKind) -> Account {
    Account::v1(owner(key), key, kind).unwrap()
}

pub fn user_ctx(key: &str) -> AccountContext {
    AccountContext::for_user(account(key, AccountKind::Developer))
}

pub fn user_api_key(key: &str, dev: &str) -> ApiKey {
    ApiKey::v1(key, owner(dev), ApiKeyKind::User, false).unwrap()
}

/// Ownership repo wrapper whose individual operations can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyThreadRepo {
    pub inner: SharedThreadStore,
    pub fail_list: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FlakyThreadRepo {
    pub fn over(inner: SharedThreadStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    fn injected(flag: &AtomicBool) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Journal {
                path: "flaky".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadOwnershipRepo for FlakyThreadRepo {
    async fn list_by_owner(
        &self,
        owner: &OwnerKey,
    ) -> Result<Vec<ThreadOwnershipRecord>, StorageError> {
        Self::injected(&self.fail_list)?;
        self.inner.list_by_owner(owner).await
    }

    async fn get(
        &self,
        id: &ThreadId,
        owner: &OwnerKey,
    ) -> Result<ThreadOwnershipRecord, StorageError> {
        Self::injected(&self.fail_get)?;
        self.inner.get(id, owner).await
    }

    async fn get_by_name(
        &self,
        name: &str,
        owner: &OwnerKey,
    ) -> Result<ThreadOwnershipRecord, StorageError> {
        self.inner.get_by_name(name, owner).await
    }

    async fn create(
        &self,
        input: ThreadOwnershipInput,
    ) -> Result<ThreadOwnershipRecord, StorageError> {
        self.inner.create(input).await
    }

    async fn delete(&self, id: &ThreadId, owner: &OwnerKey) -> Result<(), StorageError> {
        Self::injected(&self.fail_delete)?;
        self.inner.delete(id, owner).await
    }
}
