#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::{validate_text, validate_token};
use crate::{ContractViolation, Validate};

/// Identity public key of an account, in its text form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerKey(String);

impl OwnerKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(key.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for OwnerKey {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("owner_key", &self.0, 128)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    Developer,
    Organization,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub key: OwnerKey,
    pub name: String,
    pub kind: AccountKind,
}

impl Account {
    pub fn v1(
        key: OwnerKey,
        name: impl Into<String>,
        kind: AccountKind,
    ) -> Result<Self, ContractViolation> {
        let account = Self {
            key,
            name: name.into(),
            kind,
        };
        account.validate()?;
        Ok(account)
    }
}

impl Validate for Account {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.key.validate()?;
        validate_text("account.name", &self.name, 128)
    }
}

/// The authenticated caller: an end user, optionally acting inside an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    pub user: Account,
    pub org: Option<Account>,
}

impl AccountContext {
    pub fn for_user(user: Account) -> Self {
        Self { user, org: None }
    }

    pub fn for_org(user: Account, org: Account) -> Result<Self, ContractViolation> {
        if org.kind != AccountKind::Organization {
            return Err(ContractViolation::InvalidValue {
                field: "account_context.org.kind",
                reason: "must be Organization",
            });
        }
        Ok(Self {
            user,
            org: Some(org),
        })
    }

    /// The account that owns resources created in this context.
    pub fn owner(&self) -> &Account {
        self.org.as_ref().unwrap_or(&self.user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiKeyKind {
    /// Issued to a developer or organization; acts as the account itself.
    Account,
    /// Issued for end users of a developer's app; each user is isolated.
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub owner: OwnerKey,
    pub kind: ApiKeyKind,
    pub secure: bool,
    pub valid: bool,
}

impl ApiKey {
    pub fn v1(
        key: impl Into<String>,
        owner: OwnerKey,
        kind: ApiKeyKind,
        secure: bool,
    ) -> Result<Self, ContractViolation> {
        let api_key = Self {
            key: key.into(),
            owner,
            kind,
            secure,
            valid: true,
        };
        api_key.validate()?;
        Ok(api_key)
    }

    pub fn is_user_scoped(&self) -> bool {
        self.kind == ApiKeyKind::User
    }
}

impl Validate for ApiKey {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("api_key.key", &self.key, 128)?;
        self.owner.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for SessionId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("session_id", &self.0, 128)
    }
}
