#![forbid(unsafe_code)]

use std::sync::Arc;

use threadhub_kernel_contracts::account::{Account, AccountContext, AccountKind, ApiKey, SessionId};
use threadhub_kernel_contracts::call::CallContext;
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_storage::repo::SessionDirectory;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::status::storage_status;

pub const SESSION_HEADER: &str = "x-threadhub-session";
pub const API_KEY_HEADER: &str = "x-threadhub-api-key";
pub const THREAD_HEADER: &str = "x-threadhub-thread";
pub const THREAD_NAME_HEADER: &str = "x-threadhub-thread-name";

/// Builds a [`CallContext`] from request metadata.
///
/// An unknown session is not an error here: the call simply carries no
/// account and the guard decides. An unknown or revoked API key is rejected.
#[derive(Clone)]
pub struct MetadataCallResolver {
    directory: Arc<dyn SessionDirectory>,
}

impl MetadataCallResolver {
    pub fn new(directory: Arc<dyn SessionDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, metadata: &MetadataMap) -> Result<CallContext, Status> {
        let mut call = CallContext::anonymous();

        if let Some(raw) = header(metadata, SESSION_HEADER)? {
            let session =
                SessionId::new(raw).map_err(|err| Status::unauthenticated(err.to_string()))?;
            if let Some(account) = self
                .directory
                .account_for_session(&session)
                .await
                .map_err(storage_status)?
            {
                call = call.with_account(account);
            }
            call = call.with_session(session);
        }

        if let Some(raw) = header(metadata, API_KEY_HEADER)? {
            let key = self
                .directory
                .api_key(raw)
                .await
                .map_err(storage_status)?
                .filter(|key| key.valid)
                .ok_or_else(|| Status::unauthenticated("invalid API key"))?;
            if call.account().is_none() {
                call = call.with_account(key_owner_context(&key)?);
            }
            call = call.with_api_key(key);
        }

        if let Some(raw) = header(metadata, THREAD_HEADER)? {
            let id = ThreadId::decode(raw)
                .map_err(|err| Status::invalid_argument(format!("{THREAD_HEADER}: {err}")))?;
            call = call.with_thread_id(id);
        }

        if let Some(raw) = header(metadata, THREAD_NAME_HEADER)? {
            call = call.with_thread_name(raw);
        }

        Ok(call)
    }
}

/// An API key used without a session acts as the developer account it was issued to.
fn key_owner_context(key: &ApiKey) -> Result<AccountContext, Status> {
    let account = Account::v1(key.owner.clone(), key.owner.as_str(), AccountKind::Developer)
        .map_err(|err| Status::internal(err.to_string()))?;
    Ok(AccountContext::for_user(account))
}

fn header<'a>(metadata: &'a MetadataMap, key: &str) -> Result<Option<&'a str>, Status> {
    let Some(value) = metadata.get(key) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| Status::invalid_argument(format!("invalid {key} metadata")))?
        .trim();
    Ok(if value.is_empty() { None } else { Some(value) })
}
