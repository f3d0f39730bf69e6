#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use threadhub_kernel_contracts::account::{AccountContext, ApiKey, OwnerKey, SessionId};
use threadhub_kernel_contracts::ownership::{IpnsKeyRecord, ThreadOwnershipRecord};
use threadhub_kernel_contracts::thread::ThreadId;

use crate::threads::{StorageError, ThreadTables};

pub const THREAD_JOURNAL_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadJournalOp {
    ThreadCreated { record: ThreadOwnershipRecord },
    ThreadDeleted { id: ThreadId, owner: OwnerKey },
    IpnsKeyCreated { record: IpnsKeyRecord },
    IpnsKeyDeleted { name: String },
    ApiKeyCreated { key: ApiKey },
    SessionCreated { session: SessionId, account: AccountContext },
}

impl ThreadJournalOp {
    pub fn apply(self, tables: &mut ThreadTables) -> Result<(), StorageError> {
        match self {
            ThreadJournalOp::ThreadCreated { record } => tables.restore_thread(record),
            ThreadJournalOp::ThreadDeleted { id, owner } => tables.remove_thread(&id, &owner),
            ThreadJournalOp::IpnsKeyCreated { record } => tables.insert_ipns_key(record),
            ThreadJournalOp::IpnsKeyDeleted { name } => tables.remove_ipns_key(&name).map(|_| ()),
            ThreadJournalOp::ApiKeyCreated { key } => tables.insert_api_key(key),
            ThreadJournalOp::SessionCreated { session, account } => {
                tables.insert_session(session, account)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadJournalEntry {
    schema_version: u32,
    op: ThreadJournalOp,
}

/// Append-only JSON-lines log of table mutations.
#[derive(Debug, Clone)]
pub struct ThreadJournal {
    path: PathBuf,
}

impl ThreadJournal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let journal = Self { path: path.into() };
        if let Some(parent) = journal.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    journal.error(format!(
                        "failed to create directory '{}': {err}",
                        parent.display()
                    ))
                })?;
            }
        }
        if !journal.path.exists() {
            File::create(&journal.path)
                .map_err(|err| journal.error(format!("failed to create journal: {err}")))?;
        }
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-applies every journaled mutation in order; returns the number applied.
    pub fn replay_into(&self, tables: &mut ThreadTables) -> Result<usize, StorageError> {
        let file = File::open(&self.path)
            .map_err(|err| self.error(format!("failed to open journal: {err}")))?;
        let mut applied = 0;
        for (line_no, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(|err| {
                self.error(format!("failed reading line {}: {err}", line_no + 1))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ThreadJournalEntry = serde_json::from_str(&line).map_err(|err| {
                self.error(format!("failed parsing line {}: {err}", line_no + 1))
            })?;
            if entry.schema_version != THREAD_JOURNAL_SCHEMA_VERSION {
                return Err(self.error(format!(
                    "unsupported schema_version={} at line {}",
                    entry.schema_version,
                    line_no + 1
                )));
            }
            entry.op.apply(tables).map_err(|err| {
                self.error(format!("replay failed at line {}: {err}", line_no + 1))
            })?;
            applied += 1;
        }
        Ok(applied)
    }

    pub fn append(&self, op: &ThreadJournalOp) -> Result<(), StorageError> {
        let entry = serde_json::json!({
            "schema_version": THREAD_JOURNAL_SCHEMA_VERSION,
            "op": op,
        });
        let line = serde_json::to_string(&entry)
            .map_err(|err| self.error(format!("failed to encode entry: {err}")))?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| self.error(format!("failed opening for append: {err}")))?;
        writeln!(file, "{line}").map_err(|err| self.error(format!("failed writing: {err}")))?;
        Ok(())
    }

    fn error(&self, reason: String) -> StorageError {
        StorageError::Journal {
            path: self.path.display().to_string(),
            reason,
        }
    }
}
