#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::account::OwnerKey;
use crate::common::{validate_text, validate_token};
use crate::thread::ThreadId;
use crate::{ContractViolation, MonotonicTimeNs, Validate};

/// Fields supplied when a thread is pre-registered for an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOwnershipInput {
    pub id: ThreadId,
    pub owner: OwnerKey,
    pub api_key: Option<String>,
    pub name: Option<String>,
    pub is_db: bool,
}

impl ThreadOwnershipInput {
    pub fn v1(
        id: ThreadId,
        owner: OwnerKey,
        api_key: Option<String>,
        name: Option<String>,
        is_db: bool,
    ) -> Result<Self, ContractViolation> {
        let input = Self {
            id,
            owner,
            api_key,
            name,
            is_db,
        };
        input.validate()?;
        Ok(input)
    }
}

impl Validate for ThreadOwnershipInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.owner.validate()?;
        if let Some(api_key) = &self.api_key {
            validate_token("thread_ownership_input.api_key", api_key, 128)?;
        }
        if let Some(name) = &self.name {
            validate_text("thread_ownership_input.name", name, 128)?;
        }
        Ok(())
    }
}

/// Persisted fact that one owner tracks one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadOwnershipRecord {
    pub id: ThreadId,
    pub owner: OwnerKey,
    /// User-scoped API key the thread was created with, if any.
    pub api_key: Option<String>,
    pub name: Option<String>,
    pub is_db: bool,
    pub created_at: MonotonicTimeNs,
}

impl ThreadOwnershipRecord {
    pub fn from_input(input: ThreadOwnershipInput, created_at: MonotonicTimeNs) -> Self {
        Self {
            id: input.id,
            owner: input.owner,
            api_key: input.api_key,
            name: input.name,
            is_db: input.is_db,
            created_at,
        }
    }
}

/// A published IPNS name that points into a database thread. While any exist,
/// the database cannot be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpnsKeyRecord {
    pub name: String,
    pub cid: String,
    pub thread_id: ThreadId,
    pub created_at: MonotonicTimeNs,
}

impl IpnsKeyRecord {
    pub fn v1(
        name: impl Into<String>,
        cid: impl Into<String>,
        thread_id: ThreadId,
        created_at: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            name: name.into(),
            cid: cid.into(),
            thread_id,
            created_at,
        };
        record.validate()?;
        Ok(record)
    }
}

impl Validate for IpnsKeyRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("ipns_key_record.name", &self.name, 128)?;
        validate_token("ipns_key_record.cid", &self.cid, 128)?;
        if self.created_at.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "ipns_key_record.created_at",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}
