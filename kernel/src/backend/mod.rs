// Backend Collaborators
//
// Contracts the transaction context consumes from the table store, the
// schema distribution service and the catalog. Implementations may talk
// to a cluster, a dictionary database, or live in memory.
//
// This module defines *interfaces only*; see `memory` for the in-memory
// reference implementations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::names::TableName;

pub mod memory;

/// Backend-assigned identity of a table object.
///
/// Changes whenever the object is structurally modified, a rename
/// included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentity {
    pub id: u32,
    pub version: u32,
}

/// A table object as currently known by the table store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableObject {
    pub name: TableName,
    /// Backend-internal key the object is stored under.
    pub key: String,
    pub identity: TableIdentity,
}

/// Schema operation prepared for propagation to cooperating nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributedOp {
    Drop { table: TableName },
    Rename { from: TableName, to: TableName },
}

/// Token returned by a successful distribution handshake. Passing it to
/// a table store operation propagates that operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionHandle {
    pub op_id: Uuid,
    pub op: DistributedOp,
}

impl DistributionHandle {
    pub fn new(op: DistributedOp) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            op,
        }
    }
}

/// Arguments of a physical rename.
#[derive(Debug, Clone, Copy)]
pub struct RenameRequest<'a> {
    /// The live object being renamed, as loaded by the caller. A store
    /// refuses the rename when the object no longer matches `from_key` or
    /// its stored identity.
    pub table: &'a TableObject,
    pub from_key: &'a str,
    pub to_key: &'a str,
    pub from: &'a TableName,
    pub to: &'a TableName,
    /// Set only for a genuine top-level rename: the name the operation is
    /// known by on cooperating nodes.
    pub real_rename: Option<&'a TableName>,
    pub distribution: Option<&'a DistributionHandle>,
    /// Drop the change-event subscription on the source side.
    pub drop_events: bool,
    /// Create the change-event subscription on the target side.
    pub create_events: bool,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("table `{0}` not found")]
    NotFound(TableName),

    #[error("table `{0}` already exists")]
    AlreadyExists(TableName),

    #[error("table store error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DistributionError {
    #[error("no cooperating nodes reachable")]
    NoPeers,

    #[error("schema distribution rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("exclusive lock on `{0}` not available")]
    LockConflict(TableName),

    #[error("no catalog entry for `{0}`")]
    MissingEntry(TableName),

    #[error("catalog write failed: {0}")]
    Write(String),
}

/// Physical table store.
///
/// Each operation is atomic at the storage layer and takes effect
/// immediately; nothing here is transactional.
pub trait TableStore {
    fn load(&mut self, name: &TableName) -> Result<TableObject, StoreError>;

    fn drop_table(
        &mut self,
        name: &TableName,
        distribution: Option<&DistributionHandle>,
    ) -> Result<(), StoreError>;

    fn rename_table(&mut self, request: &RenameRequest<'_>) -> Result<(), StoreError>;
}

/// Client propagating schema changes to cooperating nodes.
pub trait SchemaDistribution {
    fn prepare_drop(&mut self, table: &TableName) -> Result<DistributionHandle, DistributionError>;

    fn prepare_rename(
        &mut self,
        from: &TableName,
        to: &TableName,
    ) -> Result<DistributionHandle, DistributionError>;
}

/// Catalog (dictionary) client.
///
/// Writes are staged under an exclusive lock and become visible on
/// `commit`, which also releases the locks. `abandon` discards staged
/// writes and releases the locks.
pub trait CatalogClient {
    fn lock_exclusive(&mut self, table: &TableName) -> Result<(), CatalogError>;

    fn set_identity(&mut self, table: &TableName, identity: TableIdentity)
        -> Result<(), CatalogError>;

    fn commit(&mut self);

    fn abandon(&mut self);
}
