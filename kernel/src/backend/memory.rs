// In-Memory Backend
//
// Reference implementations of the backend collaborators. Used by the
// scenario simulator and by tests. Every call is journaled so callers
// can check exactly what the transaction context asked for.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::{
    CatalogClient, CatalogError, DistributedOp, DistributionError, DistributionHandle,
    RenameRequest, SchemaDistribution, StoreError, TableIdentity, TableObject, TableStore,
};
use crate::config::NamingConfig;
use crate::ctx::Session;
use crate::diagnostics::Diagnostics;
use crate::names::TableName;

/// A stored table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryTable {
    pub key: String,
    pub identity: TableIdentity,
    /// Whether a change-event subscription exists for the table.
    pub events: bool,
}

/// Journal record of one table store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoreCall {
    Create {
        table: TableName,
    },
    Load {
        table: TableName,
    },
    Drop {
        table: TableName,
        distributed: Option<Uuid>,
    },
    Rename {
        from_key: String,
        to_key: String,
        from: TableName,
        to: TableName,
        real_rename: Option<TableName>,
        distributed: Option<Uuid>,
        drop_events: bool,
        create_events: bool,
    },
}

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: BTreeMap<TableName, MemoryTable>,
    next_id: u32,
    fail_load: BTreeSet<TableName>,
    fail_drop: BTreeSet<TableName>,
    fail_rename: BTreeSet<TableName>,
    calls: Vec<StoreCall>,
}

fn storage_key(name: &TableName) -> String {
    format!("./{}/{}", name.schema, name.table)
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with a fresh identity.
    pub fn create_table(
        &mut self,
        name: &TableName,
        events: bool,
    ) -> Result<TableObject, StoreError> {
        self.calls.push(StoreCall::Create {
            table: name.clone(),
        });

        if self.tables.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.clone()));
        }

        self.next_id += 1;
        let table = MemoryTable {
            key: storage_key(name),
            identity: TableIdentity {
                id: self.next_id,
                version: 1,
            },
            events,
        };
        let object = TableObject {
            name: name.clone(),
            key: table.key.clone(),
            identity: table.identity,
        };
        self.tables.insert(name.clone(), table);
        Ok(object)
    }

    /// Make subsequent loads of `name` fail.
    pub fn fail_load(&mut self, name: TableName) {
        self.fail_load.insert(name);
    }

    /// Make subsequent drops of `name` fail.
    pub fn fail_drop(&mut self, name: TableName) {
        self.fail_drop.insert(name);
    }

    /// Make subsequent renames whose source is `name` fail.
    pub fn fail_rename(&mut self, name: TableName) {
        self.fail_rename.insert(name);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&mut self) {
        self.fail_load.clear();
        self.fail_drop.clear();
        self.fail_rename.clear();
    }

    pub fn get(&self, name: &TableName) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &TableName) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&TableName, &MemoryTable)> {
        self.tables.iter()
    }

    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl TableStore for MemoryTableStore {
    fn load(&mut self, name: &TableName) -> Result<TableObject, StoreError> {
        self.calls.push(StoreCall::Load {
            table: name.clone(),
        });

        if self.fail_load.contains(name) {
            return Err(StoreError::Backend(format!("injected load failure for {name}")));
        }

        self.tables
            .get(name)
            .map(|t| TableObject {
                name: name.clone(),
                key: t.key.clone(),
                identity: t.identity,
            })
            .ok_or_else(|| StoreError::NotFound(name.clone()))
    }

    fn drop_table(
        &mut self,
        name: &TableName,
        distribution: Option<&DistributionHandle>,
    ) -> Result<(), StoreError> {
        self.calls.push(StoreCall::Drop {
            table: name.clone(),
            distributed: distribution.map(|h| h.op_id),
        });

        if self.fail_drop.contains(name) {
            return Err(StoreError::Backend(format!("injected drop failure for {name}")));
        }

        self.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.clone()))
    }

    fn rename_table(&mut self, request: &RenameRequest<'_>) -> Result<(), StoreError> {
        self.calls.push(StoreCall::Rename {
            from_key: request.from_key.to_string(),
            to_key: request.to_key.to_string(),
            from: request.from.clone(),
            to: request.to.clone(),
            real_rename: request.real_rename.cloned(),
            distributed: request.distribution.map(|h| h.op_id),
            drop_events: request.drop_events,
            create_events: request.create_events,
        });

        if self.fail_rename.contains(request.from) {
            return Err(StoreError::Backend(format!(
                "injected rename failure for {}",
                request.from
            )));
        }
        if self.tables.contains_key(request.to) {
            return Err(StoreError::AlreadyExists(request.to.clone()));
        }

        // The caller's handle must still describe the stored object.
        let stored = self
            .tables
            .get(request.from)
            .ok_or_else(|| StoreError::NotFound(request.from.clone()))?;
        if request.table.key != request.from_key || stored.key != request.from_key {
            return Err(StoreError::Backend(format!(
                "storage key mismatch for {}: expected '{}', found '{}'",
                request.from, request.from_key, stored.key
            )));
        }
        if stored.identity != request.table.identity {
            return Err(StoreError::Backend(format!(
                "stale table object for {}",
                request.from
            )));
        }

        let mut table = self
            .tables
            .remove(request.from)
            .ok_or_else(|| StoreError::NotFound(request.from.clone()))?;

        table.key = request.to_key.to_string();
        // Renaming is a structural change of the object.
        table.identity.version += 1;
        if request.drop_events {
            table.events = false;
        }
        if request.create_events {
            table.events = true;
        }

        self.tables.insert(request.to.clone(), table);
        Ok(())
    }
}

/// Schema distribution towards a fixed set of peers.
#[derive(Debug, Default)]
pub struct MemoryDistribution {
    peers: Vec<String>,
    reject: Option<String>,
    prepared: Vec<DistributionHandle>,
}

impl MemoryDistribution {
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: peers.into_iter().map(Into::into).collect(),
            reject: None,
            prepared: Vec::new(),
        }
    }

    /// A client with no reachable peers.
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// Reject every subsequent handshake with `reason`.
    pub fn reject_all(&mut self, reason: impl Into<String>) {
        self.reject = Some(reason.into());
    }

    pub fn has_peers(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Whether a schema operation executed now would reach the peers.
    pub fn can_distribute(&self) -> bool {
        self.reject.is_none() && self.has_peers()
    }

    pub fn prepared(&self) -> &[DistributionHandle] {
        &self.prepared
    }

    pub fn clear_prepared(&mut self) {
        self.prepared.clear();
    }

    fn prepare(&mut self, op: DistributedOp) -> Result<DistributionHandle, DistributionError> {
        if let Some(reason) = &self.reject {
            return Err(DistributionError::Rejected(reason.clone()));
        }
        if self.peers.is_empty() {
            return Err(DistributionError::NoPeers);
        }

        let handle = DistributionHandle::new(op);
        self.prepared.push(handle.clone());
        Ok(handle)
    }
}

impl SchemaDistribution for MemoryDistribution {
    fn prepare_drop(&mut self, table: &TableName) -> Result<DistributionHandle, DistributionError> {
        self.prepare(DistributedOp::Drop {
            table: table.clone(),
        })
    }

    fn prepare_rename(
        &mut self,
        from: &TableName,
        to: &TableName,
    ) -> Result<DistributionHandle, DistributionError> {
        self.prepare(DistributedOp::Rename {
            from: from.clone(),
            to: to.clone(),
        })
    }
}

/// Persisted metadata of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub identity: TableIdentity,
    /// Serialized table definition.
    pub metadata: String,
}

/// Journal record of one catalog call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CatalogCall {
    Lock { table: TableName },
    SetIdentity { table: TableName, identity: TableIdentity },
    Commit,
    Abandon,
}

/// Transactional in-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: BTreeMap<TableName, CatalogEntry>,
    locks: BTreeSet<TableName>,
    pending: Vec<(TableName, TableIdentity)>,
    fail_lock: BTreeSet<TableName>,
    fail_write: BTreeSet<TableName>,
    calls: Vec<CatalogCall>,
    committed_writes: usize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: TableName, entry: CatalogEntry) {
        self.entries.insert(name, entry);
    }

    pub fn remove(&mut self, name: &TableName) -> Option<CatalogEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &TableName) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&TableName, &CatalogEntry)> {
        self.entries.iter()
    }

    /// Copy of all committed entries.
    pub fn snapshot(&self) -> BTreeMap<TableName, CatalogEntry> {
        self.entries.clone()
    }

    /// Replace all entries with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: BTreeMap<TableName, CatalogEntry>) {
        self.entries = snapshot;
    }

    pub fn fail_lock(&mut self, name: TableName) {
        self.fail_lock.insert(name);
    }

    pub fn fail_write(&mut self, name: TableName) {
        self.fail_write.insert(name);
    }

    pub fn is_locked(&self, name: &TableName) -> bool {
        self.locks.contains(name)
    }

    pub fn calls(&self) -> &[CatalogCall] {
        &self.calls
    }

    /// Clears the journal and the committed write count.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
        self.committed_writes = 0;
    }

    /// Identity writes made visible by `commit` since the journal was last
    /// cleared. Rejected writes are journaled but never counted.
    pub fn committed_writes(&self) -> usize {
        self.committed_writes
    }

    fn release(&mut self) {
        self.pending.clear();
        self.locks.clear();
    }
}

impl CatalogClient for MemoryCatalog {
    fn lock_exclusive(&mut self, table: &TableName) -> Result<(), CatalogError> {
        self.calls.push(CatalogCall::Lock {
            table: table.clone(),
        });

        if self.fail_lock.contains(table) {
            return Err(CatalogError::LockConflict(table.clone()));
        }
        self.locks.insert(table.clone());
        Ok(())
    }

    fn set_identity(
        &mut self,
        table: &TableName,
        identity: TableIdentity,
    ) -> Result<(), CatalogError> {
        self.calls.push(CatalogCall::SetIdentity {
            table: table.clone(),
            identity,
        });

        if !self.locks.contains(table) {
            return Err(CatalogError::Write(format!("`{table}` is not locked")));
        }
        if self.fail_write.contains(table) {
            return Err(CatalogError::Write(format!("injected write failure for {table}")));
        }
        if !self.entries.contains_key(table) {
            return Err(CatalogError::MissingEntry(table.clone()));
        }

        self.pending.push((table.clone(), identity));
        Ok(())
    }

    fn commit(&mut self) {
        self.calls.push(CatalogCall::Commit);

        self.committed_writes += self.pending.len();
        for (table, identity) in std::mem::take(&mut self.pending) {
            if let Some(entry) = self.entries.get_mut(&table) {
                entry.identity = identity;
            }
        }
        self.release();
    }

    fn abandon(&mut self) {
        self.calls.push(CatalogCall::Abandon);
        self.release();
    }
}

/// The three collaborators plus a diagnostics channel, wired together.
///
/// Also executes schema operations forward the way a statement executor
/// would, keeping the catalog in step with the store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    pub naming: NamingConfig,
    pub store: MemoryTableStore,
    pub distribution: MemoryDistribution,
    pub catalog: MemoryCatalog,
    pub diagnostics: Diagnostics,
}

impl MemoryBackend {
    /// A single node backend without reachable peers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            distribution: MemoryDistribution::new(peers),
            ..Self::default()
        }
    }

    pub fn with_naming(mut self, naming: NamingConfig) -> Self {
        self.naming = naming;
        self
    }

    pub fn session(&mut self) -> Session<'_> {
        Session {
            store: &mut self.store,
            distribution: &mut self.distribution,
            catalog: &mut self.catalog,
            diagnostics: &mut self.diagnostics,
        }
    }

    /// Create a table and its catalog entry.
    pub fn create_table(&mut self, name: &TableName) -> Result<TableObject, StoreError> {
        let temp = self.naming.is_temp(&name.table);
        let table = self.store.create_table(name, !temp)?;
        if !temp {
            self.catalog.insert(
                name.clone(),
                CatalogEntry {
                    identity: table.identity,
                    metadata: serde_json::json!({ "name": name }).to_string(),
                },
            );
        }
        Ok(table)
    }

    /// Rename a table and move its catalog entry along.
    pub fn rename_table(
        &mut self,
        from: &TableName,
        to: &TableName,
    ) -> Result<TableObject, StoreError> {
        let from_temp = self.naming.is_temp(&from.table);
        let to_temp = self.naming.is_temp(&to.table);

        let table = self.store.load(from)?;
        let to_key = storage_key(to);
        self.store.rename_table(&RenameRequest {
            table: &table,
            from_key: &table.key,
            to_key: &to_key,
            from,
            to,
            real_rename: None,
            distribution: None,
            drop_events: !from_temp,
            create_events: !to_temp,
        })?;
        let renamed = self.store.load(to)?;

        let previous = if from_temp {
            None
        } else {
            self.catalog.remove(from)
        };
        if !to_temp {
            self.catalog.insert(
                to.clone(),
                CatalogEntry {
                    identity: renamed.identity,
                    metadata: previous.map(|e| e.metadata).unwrap_or_default(),
                },
            );
        }
        Ok(renamed)
    }

    pub fn clear_journals(&mut self) {
        self.store.clear_calls();
        self.distribution.clear_prepared();
        self.catalog.clear_calls();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(table: &str) -> TableName {
        TableName::new("db", table)
    }

    #[test]
    fn rename_bumps_version_and_moves_events() {
        let mut store = MemoryTableStore::new();
        let created = store.create_table(&name("a"), true).unwrap();
        assert_eq!(created.identity.version, 1);

        let from = name("a");
        let to = name("#sql-1");
        store
            .rename_table(&RenameRequest {
                table: &created,
                from_key: "./db/a",
                to_key: "./db/#sql-1",
                from: &from,
                to: &to,
                real_rename: None,
                distribution: None,
                drop_events: true,
                create_events: false,
            })
            .unwrap();

        assert!(!store.contains(&from));
        let moved = store.get(&to).unwrap();
        assert_eq!(moved.identity.id, created.identity.id);
        assert_eq!(moved.identity.version, 2);
        assert_eq!(moved.key, "./db/#sql-1");
        assert!(!moved.events);
    }

    #[test]
    fn rename_refuses_a_stale_object_or_key() {
        let mut store = MemoryTableStore::new();
        let created = store.create_table(&name("a"), true).unwrap();
        let from = name("a");
        let to = name("b");
        let request = RenameRequest {
            table: &created,
            from_key: "./db/a",
            to_key: "./db/b",
            from: &from,
            to: &to,
            real_rename: None,
            distribution: None,
            drop_events: true,
            create_events: true,
        };

        let wrong_key = RenameRequest {
            from_key: "./db/elsewhere",
            ..request
        };
        assert!(matches!(
            store.rename_table(&wrong_key),
            Err(StoreError::Backend(_))
        ));

        let outdated = TableObject {
            identity: TableIdentity {
                version: 0,
                ..created.identity
            },
            ..created.clone()
        };
        let stale = RenameRequest {
            table: &outdated,
            ..request
        };
        assert!(matches!(
            store.rename_table(&stale),
            Err(StoreError::Backend(_))
        ));
        assert!(store.contains(&from));

        store.rename_table(&request).unwrap();
        assert!(store.contains(&to));
    }

    #[test]
    fn injected_faults_fail_calls_but_are_journaled() {
        let mut store = MemoryTableStore::new();
        store.create_table(&name("t1"), true).unwrap();
        store.fail_drop(name("t1"));

        let err = store.drop_table(&name("t1"), None).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.contains(&name("t1")));
        assert_eq!(store.calls().len(), 2);

        store.clear_faults();
        store.drop_table(&name("t1"), None).unwrap();
        assert!(!store.contains(&name("t1")));
    }

    #[test]
    fn load_of_missing_table_is_not_found() {
        let mut store = MemoryTableStore::new();
        assert_eq!(
            store.load(&name("nope")),
            Err(StoreError::NotFound(name("nope")))
        );
    }

    #[test]
    fn distribution_needs_peers() {
        let mut alone = MemoryDistribution::unreachable();
        assert_eq!(
            alone.prepare_drop(&name("t1")),
            Err(DistributionError::NoPeers)
        );

        let mut cluster = MemoryDistribution::new(["node-2", "node-3"]);
        let handle = cluster.prepare_rename(&name("b"), &name("a")).unwrap();
        assert_eq!(
            handle.op,
            DistributedOp::Rename {
                from: name("b"),
                to: name("a")
            }
        );
        assert_eq!(cluster.prepared().len(), 1);

        cluster.reject_all("schema lock held");
        assert!(matches!(
            cluster.prepare_drop(&name("t1")),
            Err(DistributionError::Rejected(_))
        ));
    }

    #[test]
    fn catalog_writes_are_visible_only_after_commit() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(
            name("a"),
            CatalogEntry {
                identity: TableIdentity { id: 1, version: 1 },
                metadata: "{}".into(),
            },
        );

        let fresh = TableIdentity { id: 1, version: 3 };
        assert!(catalog.set_identity(&name("a"), fresh).is_err());

        catalog.lock_exclusive(&name("a")).unwrap();
        catalog.set_identity(&name("a"), fresh).unwrap();
        assert_eq!(catalog.get(&name("a")).unwrap().identity.version, 1);

        catalog.commit();
        assert_eq!(catalog.get(&name("a")).unwrap().identity, fresh);
        assert!(!catalog.is_locked(&name("a")));
        assert_eq!(catalog.committed_writes(), 1);
    }

    #[test]
    fn rejected_writes_are_never_committed() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(
            name("a"),
            CatalogEntry {
                identity: TableIdentity { id: 1, version: 1 },
                metadata: "{}".into(),
            },
        );
        let fresh = TableIdentity { id: 1, version: 3 };

        // Not locked.
        assert!(catalog.set_identity(&name("a"), fresh).is_err());
        // Locked, but the write is refused.
        catalog.fail_write(name("a"));
        catalog.lock_exclusive(&name("a")).unwrap();
        assert!(catalog.set_identity(&name("a"), fresh).is_err());
        // Locked, but there is no entry to update.
        catalog.lock_exclusive(&name("b")).unwrap();
        assert!(matches!(
            catalog.set_identity(&name("b"), fresh),
            Err(CatalogError::MissingEntry(_))
        ));
        catalog.commit();

        let writes = catalog
            .calls()
            .iter()
            .filter(|c| matches!(c, CatalogCall::SetIdentity { .. }))
            .count();
        assert_eq!(writes, 3);
        assert_eq!(catalog.committed_writes(), 0);
        assert_eq!(catalog.get(&name("a")).unwrap().identity.version, 1);
    }

    #[test]
    fn abandon_discards_staged_writes() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(
            name("a"),
            CatalogEntry {
                identity: TableIdentity { id: 1, version: 1 },
                metadata: "{}".into(),
            },
        );

        catalog.lock_exclusive(&name("a")).unwrap();
        catalog
            .set_identity(&name("a"), TableIdentity { id: 9, version: 9 })
            .unwrap();
        catalog.abandon();
        catalog.commit();

        assert_eq!(catalog.get(&name("a")).unwrap().identity.id, 1);
        assert_eq!(catalog.committed_writes(), 0);
    }
}
