#![forbid(unsafe_code)]

use crate::account::{AccountContext, ApiKey, SessionId};
use crate::thread::ThreadId;

/// Per-call values resolved from transport credentials before the thread guard runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    session: Option<SessionId>,
    account: Option<AccountContext>,
    api_key: Option<ApiKey>,
    thread_id: Option<ThreadId>,
    thread_name: Option<String>,
}

impl CallContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_account(mut self, account: AccountContext) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_api_key(mut self, api_key: ApiKey) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_thread_id(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn account(&self) -> Option<&AccountContext> {
        self.account.as_ref()
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    pub fn thread_id(&self) -> Option<&ThreadId> {
        self.thread_id.as_ref()
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }
}
