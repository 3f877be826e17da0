// Post-DDL Reconciliation
//
// A physical rename changes the identity (id, version) of the table
// object even when the rename is later reverted. After a rollback the
// catalog still caches the pre-transaction identity, so it is
// resynchronized from the live object.

use super::Session;
use crate::backend::TableIdentity;
use crate::config::NamingConfig;
use crate::names::TableName;

/// Reconcile the catalog entry of the table a rename was rolled back to.
///
/// `rolled_back_to` is the old name of the rename statement.
pub(super) fn post_ddl_hook_rename_table(
    naming: &NamingConfig,
    committed: bool,
    rolled_back_to: &TableName,
    session: &mut Session<'_>,
) -> bool {
    if committed {
        return true;
    }

    // Temporary tables have no catalog entry to fix.
    if naming.is_temp(&rolled_back_to.table) {
        return true;
    }

    let table = match session.store.load(rolled_back_to) {
        Ok(table) => table,
        Err(err) => {
            session.diagnostics.push_error_warning(&err);
            session
                .diagnostics
                .push_warning("Unable to load table during rollback");
            return false;
        }
    };

    update_identity_in_catalog(rolled_back_to, table.identity, session)
}

fn update_identity_in_catalog(
    table: &TableName,
    identity: TableIdentity,
    session: &mut Session<'_>,
) -> bool {
    if let Err(err) = session.catalog.lock_exclusive(table) {
        tracing::debug!(%table, error = %err, "catalog lock refused");
        session.diagnostics.push_warning(format!(
            "Failed to acquire exclusive lock on table : '{table}' during rollback"
        ));
        return false;
    }

    if let Err(err) = session.catalog.set_identity(table, identity) {
        tracing::debug!(%table, error = %err, "catalog identity write refused");
        session.catalog.abandon();
        session.diagnostics.push_warning(format!(
            "Failed to update id and version of table : '{table}' during rollback"
        ));
        return false;
    }

    session.catalog.commit();
    tracing::debug!(
        %table,
        id = identity.id,
        version = identity.version,
        "catalog identity resynchronized"
    );
    true
}
