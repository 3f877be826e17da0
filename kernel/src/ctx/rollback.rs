// Compensating Actions
//
// One compensator per statement kind. Collaborator failures are pushed
// as warnings and turned into `false`; distribution failures only
// downgrade the compensation to a local one.

use super::Session;
use crate::backend::RenameRequest;
use crate::config::NamingConfig;
use crate::log::{DdlLogEntry, DdlStmt};
use crate::names::TablePath;

const DISTRIBUTION_FAILED: &str = "Failed to distribute rollback to connected servers.";

/// Drop the table created by the statement.
pub(super) fn rollback_create_table(
    path: &TablePath,
    distributed: bool,
    session: &mut Session<'_>,
) -> bool {
    let table = path.table_name();

    // The create reached the other nodes, so the drop has to as well.
    let handle = if distributed {
        match session.distribution.prepare_drop(table) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::debug!(%table, error = %err, "rollback drop stays local");
                session.diagnostics.push_warning(DISTRIBUTION_FAILED);
                None
            }
        }
    } else {
        None
    };

    tracing::debug!(%table, "rollback: dropping table");

    if let Err(err) = session.store.drop_table(table, handle.as_ref()) {
        session.diagnostics.push_error_warning(&err);
        session
            .diagnostics
            .push_warning("Failed to rollback after CREATE TABLE failure.");
        return false;
    }

    true
}

/// Rename the table back from its new name to its old one.
pub(super) fn rollback_rename_table(
    naming: &NamingConfig,
    entry: &DdlLogEntry,
    session: &mut Session<'_>,
) -> bool {
    let DdlStmt::RenameTable {
        old,
        new,
        from_key,
        to_key,
        ..
    } = &entry.stmt
    else {
        unreachable!("rename compensator called for {}", entry.stmt.kind());
    };

    tracing::debug!(from = %new, to = %old, "rollback: renaming table");

    let renamed = match session.store.load(new) {
        Ok(table) => table,
        Err(err) => {
            session.diagnostics.push_error_warning(&err);
            session
                .diagnostics
                .push_warning("Failed to rename table during rollback.");
            return false;
        }
    };

    let new_is_temp = naming.is_temp(&new.table);
    let old_is_temp = naming.is_temp(&old.table);

    let mut real_rename = None;
    let mut handle = None;
    if entry.distributed {
        // Only a top-level RENAME TABLE is ever distributed; the
        // intermediate steps of a copying alter are not.
        assert!(
            !old_is_temp && !new_is_temp,
            "distributed rename involves a temporary name: {new} -> {old}"
        );
        real_rename = Some(new);

        match session.distribution.prepare_rename(new, old) {
            Ok(prepared) => handle = Some(prepared),
            Err(err) => {
                tracing::debug!(
                    from = %new,
                    to = %old,
                    error = %err,
                    "rollback rename stays local"
                );
                session.diagnostics.push_warning(DISTRIBUTION_FAILED);
            }
        }
    }

    // new is the source and old the target of this rename.
    let request = RenameRequest {
        table: &renamed,
        from_key: to_key,
        to_key: from_key,
        from: new,
        to: old,
        real_rename,
        distribution: handle.as_ref(),
        drop_events: !new_is_temp,
        create_events: !old_is_temp,
    };

    if let Err(err) = session.store.rename_table(&request) {
        session.diagnostics.push_error_warning(&err);
        session
            .diagnostics
            .push_warning("Failed to rollback rename table.");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use crate::backend::memory::{MemoryBackend, StoreCall};
    use crate::backend::DistributedOp;
    use crate::ctx::DdlTransactionCtx;
    use crate::names::TableName;
    use tracing_test::traced_test;

    fn name(table: &str) -> TableName {
        TableName::new("db", table)
    }

    fn rename_call(calls: &[StoreCall]) -> &StoreCall {
        calls
            .iter()
            .find(|c| matches!(c, StoreCall::Rename { .. }))
            .expect("no rename issued")
    }

    #[traced_test]
    #[test]
    fn create_table_rollback_drops_locally() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("t1")).unwrap();
        backend.clear_journals();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_create_table("db.t1".parse().unwrap());

        assert!(ctx.rollback(&mut backend.session()));
        assert_eq!(
            backend.store.calls(),
            &[StoreCall::Drop {
                table: name("t1"),
                distributed: None
            }]
        );
        assert!(!backend.store.contains(&name("t1")));
        assert!(backend.diagnostics.is_empty());
        assert!(logs_contain("rollback: dropping table"));
    }

    #[test]
    fn create_table_rollback_reports_failed_drop() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("t1")).unwrap();
        backend.store.fail_drop(name("t1"));

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_create_table("db.t1".parse().unwrap());

        assert!(!ctx.rollback(&mut backend.session()));
        assert!(backend
            .diagnostics
            .contains("Failed to rollback after CREATE TABLE failure."));
    }

    #[test]
    fn distributed_create_rollback_distributes_the_drop() {
        let mut backend = MemoryBackend::with_peers(["node-2"]);
        backend.create_table(&name("t1")).unwrap();
        backend.clear_journals();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_create_table("./db/t1".parse().unwrap());
        ctx.mark_last_stmt_as_distributed();

        assert!(ctx.rollback(&mut backend.session()));

        let prepared = backend.distribution.prepared();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].op, DistributedOp::Drop { table: name("t1") });
        assert_eq!(
            backend.store.calls(),
            &[StoreCall::Drop {
                table: name("t1"),
                distributed: Some(prepared[0].op_id)
            }]
        );
    }

    #[test]
    fn unreachable_peers_downgrade_create_rollback_to_local() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("t1")).unwrap();
        backend.clear_journals();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_create_table("db.t1".parse().unwrap());
        ctx.mark_last_stmt_as_distributed();

        assert!(ctx.rollback(&mut backend.session()));
        assert!(backend
            .diagnostics
            .contains("Failed to distribute rollback to connected servers."));
        assert!(matches!(
            backend.store.calls(),
            [StoreCall::Drop {
                distributed: None,
                ..
            }]
        ));
    }

    #[test]
    fn distributed_rename_rollback_with_failed_prepare_renames_locally() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("b")).unwrap();
        backend.clear_journals();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_rename_table(name("a"), name("b"), "./db/a", "./db/b", "{}");
        ctx.mark_last_stmt_as_distributed();

        assert!(ctx.rollback(&mut backend.session()));
        assert_eq!(backend.diagnostics.warnings().len(), 1);
        assert!(backend
            .diagnostics
            .contains("Failed to distribute rollback to connected servers."));

        assert_eq!(
            rename_call(backend.store.calls()),
            &StoreCall::Rename {
                from_key: "./db/b".into(),
                to_key: "./db/a".into(),
                from: name("b"),
                to: name("a"),
                real_rename: Some(name("b")),
                distributed: None,
                drop_events: true,
                create_events: true,
            }
        );
        assert!(backend.store.contains(&name("a")));
    }

    #[test]
    fn distributed_rename_rollback_result_reflects_rename_outcome() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("b")).unwrap();
        backend.store.fail_rename(name("b"));

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_rename_table(name("a"), name("b"), "./db/a", "./db/b", "{}");
        ctx.mark_last_stmt_as_distributed();

        assert!(!ctx.rollback(&mut backend.session()));
        assert!(backend.diagnostics.contains("Failed to rollback rename table."));
    }

    #[test]
    fn distributed_rename_rollback_distributes_reverse_rename() {
        let mut backend = MemoryBackend::with_peers(["node-2", "node-3"]);
        backend.create_table(&name("b")).unwrap();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_rename_table(name("a"), name("b"), "./db/a", "./db/b", "{}");
        ctx.mark_last_stmt_as_distributed();

        assert!(ctx.rollback(&mut backend.session()));
        let prepared = &backend.distribution.prepared()[0];
        assert_eq!(
            prepared.op,
            DistributedOp::Rename {
                from: name("b"),
                to: name("a")
            }
        );
        assert!(matches!(
            rename_call(backend.store.calls()),
            StoreCall::Rename { distributed: Some(id), .. } if *id == prepared.op_id
        ));
    }

    #[test]
    fn rename_rollback_fails_when_table_cannot_be_loaded() {
        let mut backend = MemoryBackend::new();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_rename_table(name("a"), name("b"), "./db/a", "./db/b", "{}");

        assert!(!ctx.rollback(&mut backend.session()));
        assert!(backend
            .diagnostics
            .contains("Failed to rename table during rollback."));
        assert!(!backend
            .store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::Rename { .. })));
    }

    #[test]
    fn temp_to_temp_rename_rollback_leaves_event_subscriptions_alone() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("b")).unwrap();
        backend.create_table(&name("#sql2-77")).unwrap();
        backend.clear_journals();

        let mut ctx = DdlTransactionCtx::default();
        // Genuine top-level rename, distributed.
        ctx.log_rename_table(name("a"), name("b"), "./db/a", "./db/b", "{}");
        ctx.mark_last_stmt_as_distributed();
        // Internal step of a copying alter.
        ctx.log_rename_table(
            name("#sql-1"),
            name("#sql2-77"),
            "./db/#sql-1",
            "./db/#sql2-77",
            "",
        );

        assert!(ctx.rollback(&mut backend.session()));

        let renames: Vec<_> = backend
            .store
            .calls()
            .iter()
            .filter_map(|c| match c {
                StoreCall::Rename {
                    from,
                    real_rename,
                    drop_events,
                    create_events,
                    ..
                } => Some((
                    from.table.clone(),
                    real_rename.is_some(),
                    *drop_events,
                    *create_events,
                )),
                _ => None,
            })
            .collect();
        assert_eq!(
            renames,
            vec![
                ("#sql2-77".to_string(), false, false, false),
                ("b".to_string(), true, true, true),
            ]
        );
    }

    #[test]
    fn rename_into_temp_name_rollback_only_recreates_target_events() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("#sql-9")).unwrap();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_rename_table(name("orders"), name("#sql-9"), "./db/orders", "./db/#sql-9", "");

        assert!(ctx.rollback(&mut backend.session()));
        assert!(matches!(
            rename_call(backend.store.calls()),
            StoreCall::Rename {
                drop_events: false,
                create_events: true,
                ..
            }
        ));
        assert!(backend.store.get(&name("orders")).unwrap().events);
    }

    #[test]
    #[should_panic(expected = "distributed rename involves a temporary name")]
    fn distributed_temp_rename_is_a_fault() {
        let mut backend = MemoryBackend::new();
        backend.create_table(&name("#sql-1")).unwrap();

        let mut ctx = DdlTransactionCtx::default();
        ctx.log_rename_table(name("a"), name("#sql-1"), "./db/a", "./db/#sql-1", "");
        ctx.mark_last_stmt_as_distributed();
        ctx.rollback(&mut backend.session());
    }
}
