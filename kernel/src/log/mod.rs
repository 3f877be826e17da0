// DDL Statement Log
//
// Ordered record of the schema operations executed within one
// surrounding transaction. Entries are append-only and never reordered;
// the committed prefix only grows.

use serde::{Deserialize, Serialize};

use crate::names::{TableName, TablePath};

/// One executed schema operation, carrying what its compensation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DdlStmt {
    CreateTable {
        path: TablePath,
    },
    RenameTable {
        old: TableName,
        new: TableName,
        /// Backend-internal source of the rename. Differs from `old`
        /// during multi-step renames.
        from_key: String,
        /// Backend-internal target of the rename.
        to_key: String,
        /// Serialized metadata of the table before the rename.
        original_metadata: String,
    },
}

impl DdlStmt {
    pub fn kind(&self) -> &'static str {
        match self {
            DdlStmt::CreateTable { .. } => "create_table",
            DdlStmt::RenameTable { .. } => "rename_table",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlLogEntry {
    pub stmt: DdlStmt,
    /// Whether the operation was already propagated to cooperating nodes.
    pub distributed: bool,
}

/// Append-only statement log with a committed-prefix boundary.
#[derive(Debug, Default)]
pub struct DdlLog {
    entries: Vec<DdlLogEntry>,
    committed: usize,
}

impl DdlLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            committed: 0,
        }
    }

    pub fn append(&mut self, stmt: DdlStmt) {
        self.entries.push(DdlLogEntry {
            stmt,
            distributed: false,
        });
    }

    /// Flag the most recent entry as distributed.
    ///
    /// Returns false if there is no uncommitted entry to flag.
    pub fn mark_last_distributed(&mut self) -> bool {
        if self.entries.len() == self.committed {
            return false;
        }
        match self.entries.last_mut() {
            Some(entry) => {
                entry.distributed = true;
                true
            }
            None => false,
        }
    }

    /// Move the committed boundary to the end of the log.
    pub fn commit_all(&mut self) {
        self.committed = self.entries.len();
    }

    /// All entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &DdlLogEntry> {
        self.entries.iter()
    }

    /// Entries past the committed boundary, most recent first.
    pub fn uncommitted_rev(&self) -> impl Iterator<Item = &DdlLogEntry> {
        self.entries[self.committed..].iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn committed_len(&self) -> usize {
        self.committed
    }

    pub fn has_uncommitted(&self) -> bool {
        self.committed < self.entries.len()
    }
}
