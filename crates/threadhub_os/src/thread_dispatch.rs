#![forbid(unsafe_code)]

//! Method classification: which calls bypass the guard, which are refused
//! outright, and which create, delete or reference a thread.

use threadhub_kernel_contracts::call::CallContext;
use threadhub_kernel_contracts::rpc::{db_methods, net_methods, IdSource, ThreadRequestFields};
use threadhub_kernel_contracts::thread::ThreadId;
use threadhub_kernel_contracts::ContractViolation;

use crate::thread_guard::ThreadGuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// Reachable before authentication.
    Ignored,
    /// Never reachable from outside.
    Blocked,
    CreatesThread { source: IdSource, is_db: bool },
    DeletesThread { source: IdSource, is_db: bool },
    /// `source: None` means only a context-supplied id is checked.
    References { source: Option<IdSource> },
}

const fn creates(source: IdSource, is_db: bool) -> MethodClass {
    MethodClass::CreatesThread { source, is_db }
}

const fn deletes(source: IdSource, is_db: bool) -> MethodClass {
    MethodClass::DeletesThread { source, is_db }
}

const fn references(source: IdSource) -> MethodClass {
    MethodClass::References {
        source: Some(source),
    }
}

const CONTEXT_ONLY: MethodClass = MethodClass::References { source: None };

pub const METHOD_TABLE: &[(&str, MethodClass)] = &[
    (db_methods::GET_TOKEN, MethodClass::Ignored),
    (net_methods::GET_TOKEN, MethodClass::Ignored),
    (net_methods::GET_HOST_ID, MethodClass::Ignored),
    (db_methods::LIST_DBS, MethodClass::Blocked),
    (db_methods::NEW_DB, creates(IdSource::DbId, true)),
    (db_methods::NEW_DB_FROM_ADDR, creates(IdSource::Addr, true)),
    (net_methods::CREATE_THREAD, creates(IdSource::ThreadId, false)),
    (net_methods::ADD_THREAD, creates(IdSource::Addr, false)),
    (db_methods::DELETE_DB, deletes(IdSource::DbId, true)),
    (net_methods::DELETE_THREAD, deletes(IdSource::ThreadId, false)),
    (db_methods::GET_DB_INFO, references(IdSource::DbId)),
    (db_methods::NEW_COLLECTION, references(IdSource::DbId)),
    (db_methods::UPDATE_COLLECTION, references(IdSource::DbId)),
    (db_methods::DELETE_COLLECTION, references(IdSource::DbId)),
    (db_methods::GET_COLLECTION_INFO, references(IdSource::DbId)),
    (db_methods::GET_COLLECTION_INDEXES, references(IdSource::DbId)),
    (db_methods::LIST_COLLECTIONS, references(IdSource::DbId)),
    (db_methods::CREATE, CONTEXT_ONLY),
    (db_methods::SAVE, CONTEXT_ONLY),
    (db_methods::DELETE, CONTEXT_ONLY),
    (db_methods::HAS, CONTEXT_ONLY),
    (db_methods::FIND, CONTEXT_ONLY),
    (net_methods::GET_THREAD, references(IdSource::ThreadId)),
    (net_methods::PULL_THREAD, references(IdSource::ThreadId)),
    (net_methods::ADD_REPLICATOR, references(IdSource::ThreadId)),
    (net_methods::CREATE_RECORD, references(IdSource::ThreadId)),
    (net_methods::ADD_RECORD, references(IdSource::ThreadId)),
    (net_methods::GET_RECORD, references(IdSource::ThreadId)),
];

/// Methods missing from the table are treated as context-only references.
pub fn method_class(method: &str) -> MethodClass {
    METHOD_TABLE
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, class)| *class)
        .unwrap_or(CONTEXT_ONLY)
}

/// A guarded call with every thread id it touches decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Create {
        id: ThreadId,
        is_db: bool,
        name: Option<String>,
    },
    Delete {
        id: ThreadId,
        is_db: bool,
        candidates: Vec<ThreadId>,
    },
    Reference {
        candidates: Vec<ThreadId>,
    },
}

/// Decodes the ids a guarded call refers to. Must not be called for
/// `Ignored` or `Blocked` methods.
pub fn classify(
    class: MethodClass,
    method: &str,
    call: &CallContext,
    request: &(impl ThreadRequestFields + ?Sized),
) -> Result<Dispatch, ThreadGuardError> {
    let malformed = |violation: ContractViolation| ThreadGuardError::MalformedThreadId {
        method: method.to_string(),
        violation,
    };
    let required = |source: IdSource| -> Result<ThreadId, ThreadGuardError> {
        source.extract(request).map_err(malformed)?.ok_or_else(|| {
            malformed(ContractViolation::InvalidValue {
                field: "request",
                reason: "does not carry the thread id field for this method",
            })
        })
    };

    match class {
        MethodClass::CreatesThread { source, is_db } => {
            let id = required(source)?;
            let name = request
                .thread_name()
                .filter(|name| !name.trim().is_empty())
                .or(call.thread_name())
                .map(str::to_string);
            Ok(Dispatch::Create { id, is_db, name })
        }
        MethodClass::DeletesThread { source, is_db } => {
            let id = required(source)?;
            let candidates = candidate_set(call.thread_id(), Some(id.clone()));
            Ok(Dispatch::Delete {
                id,
                is_db,
                candidates,
            })
        }
        MethodClass::References { source } => {
            let from_request = match source {
                Some(source) => source.extract(request).map_err(malformed)?,
                None => None,
            };
            Ok(Dispatch::Reference {
                candidates: candidate_set(call.thread_id(), from_request),
            })
        }
        MethodClass::Ignored | MethodClass::Blocked => Ok(Dispatch::Reference {
            candidates: Vec::new(),
        }),
    }
}

fn candidate_set(from_context: Option<&ThreadId>, from_request: Option<ThreadId>) -> Vec<ThreadId> {
    let mut candidates: Vec<ThreadId> = from_context.cloned().into_iter().collect();
    if let Some(id) = from_request {
        if !candidates.contains(&id) {
            candidates.push(id);
        }
    }
    candidates
}
