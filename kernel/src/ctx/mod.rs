// DDL Transaction Context
//
// Tracks the schema operations executed by one surrounding transaction
// and undoes the uncommitted ones with compensating actions when the
// transaction rolls back. Physical operations are not transactional in
// the table store, so every logged operation has already taken effect
// by the time it is logged.

use serde::Serialize;

use crate::backend::{CatalogClient, SchemaDistribution, TableStore};
use crate::config::NamingConfig;
use crate::diagnostics::Diagnostics;
use crate::log::{DdlLog, DdlLogEntry, DdlStmt};
use crate::names::{TableName, TablePath};

mod post_hooks;
mod rollback;

/// Lifecycle of the context.
///
/// `Committed` and `RolledBack` are reached through `commit` and
/// `rollback`. Logging after a commit reopens the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DdlStatus {
    /// Nothing logged yet.
    Empty,
    InProgress,
    Committed,
    RolledBack,
}

/// Collaborators of the session driving the surrounding transaction.
pub struct Session<'a> {
    pub store: &'a mut dyn TableStore,
    pub distribution: &'a mut dyn SchemaDistribution,
    pub catalog: &'a mut dyn CatalogClient,
    pub diagnostics: &'a mut Diagnostics,
}

#[derive(Debug)]
pub struct DdlTransactionCtx {
    naming: NamingConfig,
    status: DdlStatus,
    log: DdlLog,
    original_metadata_for_rename: Option<String>,
}

impl DdlTransactionCtx {
    pub fn new(naming: NamingConfig) -> Self {
        Self {
            naming,
            status: DdlStatus::Empty,
            log: DdlLog::new(),
            original_metadata_for_rename: None,
        }
    }

    pub fn log_create_table(&mut self, path: TablePath) {
        self.log_ddl_stmt(DdlStmt::CreateTable { path });
    }

    pub fn log_rename_table(
        &mut self,
        old: TableName,
        new: TableName,
        from_key: impl Into<String>,
        to_key: impl Into<String>,
        original_metadata: impl Into<String>,
    ) {
        self.log_ddl_stmt(DdlStmt::RenameTable {
            old,
            new,
            from_key: from_key.into(),
            to_key: to_key.into(),
            original_metadata: original_metadata.into(),
        });
    }

    fn log_ddl_stmt(&mut self, stmt: DdlStmt) {
        assert!(
            self.status != DdlStatus::RolledBack,
            "cannot log {} after the DDL transaction rolled back",
            stmt.kind()
        );
        tracing::debug!(kind = stmt.kind(), "logging ddl statement");
        self.log.append(stmt);
        self.status = DdlStatus::InProgress;
    }

    /// Record that the most recently logged statement reached the
    /// cooperating nodes, so its rollback gets distributed as well.
    pub fn mark_last_stmt_as_distributed(&mut self) {
        assert!(
            self.log.mark_last_distributed(),
            "no uncommitted ddl statement to mark as distributed"
        );
    }

    /// Freeze everything logged so far.
    ///
    /// The operations already took effect physically when they executed;
    /// committing only moves the committed boundary.
    pub fn commit(&mut self) {
        assert_eq!(
            self.status,
            DdlStatus::InProgress,
            "commit requires a DDL transaction in progress"
        );
        self.status = DdlStatus::Committed;
        self.log.commit_all();
    }

    /// Undo every uncommitted statement, most recent first.
    ///
    /// A failed compensation does not stop the remaining ones. Returns
    /// false if any of them failed; the failures are reported through the
    /// session diagnostics.
    pub fn rollback(&mut self, session: &mut Session<'_>) -> bool {
        assert_eq!(
            self.status,
            DdlStatus::InProgress,
            "rollback requires a DDL transaction in progress"
        );
        self.status = DdlStatus::RolledBack;

        let Self {
            naming,
            log,
            original_metadata_for_rename,
            ..
        } = self;

        log.uncommitted_rev().fold(true, |ok, entry| {
            let undone = match &entry.stmt {
                DdlStmt::CreateTable { path } => {
                    rollback::rollback_create_table(path, entry.distributed, session)
                }
                DdlStmt::RenameTable {
                    original_metadata, ..
                } => {
                    *original_metadata_for_rename = Some(original_metadata.clone());
                    rollback::rollback_rename_table(naming, entry, session)
                }
            };
            ok & undone
        })
    }

    /// Repair catalog bookkeeping once the transaction has ended.
    ///
    /// Walks the whole log in execution order, committed entries
    /// included.
    pub fn run_post_ddl_hooks(&mut self, session: &mut Session<'_>) -> bool {
        if self.status == DdlStatus::Empty {
            return true;
        }
        assert!(
            matches!(self.status, DdlStatus::Committed | DdlStatus::RolledBack),
            "post ddl hooks require a finished DDL transaction, status is {:?}",
            self.status
        );

        let committed = self.status == DdlStatus::Committed;
        self.log.iter().fold(true, |ok, entry| {
            let reconciled = match &entry.stmt {
                DdlStmt::RenameTable { old, .. } => {
                    post_hooks::post_ddl_hook_rename_table(&self.naming, committed, old, session)
                }
                DdlStmt::CreateTable { .. } => true,
            };
            ok & reconciled
        })
    }

    pub fn status(&self) -> DdlStatus {
        self.status
    }

    pub fn is_rolling_back(&self) -> bool {
        self.status == DdlStatus::RolledBack
    }

    pub fn has_uncommitted_schema_changes(&self) -> bool {
        self.log.has_uncommitted()
    }

    /// Pre-rename metadata of the last rename compensated by `rollback`.
    pub fn original_metadata_for_rename(&self) -> Option<&str> {
        self.original_metadata_for_rename.as_deref()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DdlLogEntry> {
        self.log.iter()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn committed_len(&self) -> usize {
        self.log.committed_len()
    }

    pub fn naming(&self) -> &NamingConfig {
        &self.naming
    }
}

impl Default for DdlTransactionCtx {
    fn default() -> Self {
        Self::new(NamingConfig::default_config())
    }
}
