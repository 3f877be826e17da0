// End-to-End DDL Transaction Simulation
//
// Runs a scripted DDL transaction against the in-memory backend:
// execute steps → log → commit or rollback → post hooks → report

use serde::{Deserialize, Serialize};

use crate::backend::memory::MemoryBackend;
use crate::backend::StoreError;
use crate::config::NamingConfig;
use crate::ctx::{DdlStatus, DdlTransactionCtx};
use crate::diagnostics::Warning;
use crate::log::DdlLogEntry;
use crate::names::TablePath;

/// Scripted transaction loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Cooperating nodes reachable during the transaction.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Tables existing before the transaction starts.
    #[serde(default)]
    pub tables: Vec<TablePath>,

    pub steps: Vec<ScenarioStep>,

    pub outcome: Outcome,

    /// Failures injected once all steps have executed.
    #[serde(default)]
    pub faults: Faults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    CreateTable {
        path: TablePath,
        #[serde(default)]
        distribute: bool,
    },
    RenameTable {
        from: TablePath,
        to: TablePath,
        #[serde(default)]
        distribute: bool,
    },
    /// Statement-level commit inside the transaction.
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Faults {
    #[serde(default)]
    pub fail_load: Vec<TablePath>,
    #[serde(default)]
    pub fail_drop: Vec<TablePath>,
    #[serde(default)]
    pub fail_rename: Vec<TablePath>,
    #[serde(default)]
    pub fail_lock: Vec<TablePath>,
    #[serde(default)]
    pub fail_write: Vec<TablePath>,
    /// Reject every distribution handshake with this reason.
    #[serde(default)]
    pub reject_distribution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub name: String,
    pub id: u32,
    pub version: u32,
    pub events: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogReport {
    pub name: String,
    pub id: u32,
    pub version: u32,
}

/// Result of a full simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationResult {
    pub status: DdlStatus,
    pub entries: Vec<DdlLogEntry>,
    /// Outcome of `rollback`, if the transaction was rolled back.
    pub rollback_ok: Option<bool>,
    pub post_hooks_ok: bool,
    pub warnings: Vec<Warning>,
    pub tables: Vec<TableReport>,
    pub catalog: Vec<CatalogReport>,
    /// Every catalog entry names a live table with the same identity.
    pub catalog_consistent: bool,
}

/// Errors that can occur during simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("step failed: {0}")]
    Store(#[from] StoreError),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
}

/// Run a scripted DDL transaction end to end.
pub fn run_scenario(
    scenario: &Scenario,
    naming: &NamingConfig,
) -> Result<SimulationResult, SimulationError> {
    let mut backend =
        MemoryBackend::with_peers(scenario.peers.iter().cloned()).with_naming(naming.clone());

    // 1. Seed pre-existing tables
    for path in &scenario.tables {
        backend.create_table(path.table_name())?;
    }

    // 2. Execute and log each step. The catalog snapshot tracks the last
    //    point the dictionary side would return to on rollback.
    let mut ctx = DdlTransactionCtx::new(naming.clone());
    let mut catalog_at_commit = backend.catalog.snapshot();

    for step in &scenario.steps {
        match step {
            ScenarioStep::CreateTable { path, distribute } => {
                backend.create_table(path.table_name())?;
                ctx.log_create_table(path.clone());
                if *distribute && backend.distribution.can_distribute() {
                    ctx.mark_last_stmt_as_distributed();
                }
            }
            ScenarioStep::RenameTable { from, to, distribute } => {
                let (from, to) = (from.table_name(), to.table_name());
                // Only a top-level rename between real names propagates.
                if *distribute && (naming.is_temp(&from.table) || naming.is_temp(&to.table)) {
                    return Err(SimulationError::InvalidScenario(format!(
                        "distributed rename {from} -> {to} involves a temporary name"
                    )));
                }
                let original = backend.store.get(from).map(|t| t.key.clone());
                let original_metadata = backend
                    .catalog
                    .get(from)
                    .map(|e| e.metadata.clone())
                    .unwrap_or_default();

                let renamed = backend.rename_table(from, to)?;
                let from_key = original.unwrap_or_default();
                ctx.log_rename_table(
                    from.clone(),
                    to.clone(),
                    from_key,
                    renamed.key,
                    original_metadata,
                );
                if *distribute && backend.distribution.can_distribute() {
                    ctx.mark_last_stmt_as_distributed();
                }
            }
            ScenarioStep::Commit => {
                if ctx.status() != DdlStatus::InProgress {
                    return Err(SimulationError::InvalidScenario(
                        "commit step without preceding statements".into(),
                    ));
                }
                ctx.commit();
                catalog_at_commit = backend.catalog.snapshot();
            }
        }
    }

    // 3. Inject faults
    apply_faults(&mut backend, &scenario.faults);

    // 4. End the transaction
    let mut rollback_ok = None;
    if ctx.status() == DdlStatus::InProgress {
        match scenario.outcome {
            Outcome::Commit => ctx.commit(),
            Outcome::Rollback => {
                rollback_ok = Some(ctx.rollback(&mut backend.session()));
                backend.catalog.restore(catalog_at_commit);
            }
        }
    }

    // 5. Reconcile
    let post_hooks_ok = ctx.run_post_ddl_hooks(&mut backend.session());

    tracing::info!(
        status = ?ctx.status(),
        entries = ctx.len(),
        ?rollback_ok,
        post_hooks_ok,
        "simulation finished"
    );

    Ok(report(ctx, rollback_ok, post_hooks_ok, &mut backend))
}

fn apply_faults(backend: &mut MemoryBackend, faults: &Faults) {
    for path in &faults.fail_load {
        backend.store.fail_load(path.table_name().clone());
    }
    for path in &faults.fail_drop {
        backend.store.fail_drop(path.table_name().clone());
    }
    for path in &faults.fail_rename {
        backend.store.fail_rename(path.table_name().clone());
    }
    for path in &faults.fail_lock {
        backend.catalog.fail_lock(path.table_name().clone());
    }
    for path in &faults.fail_write {
        backend.catalog.fail_write(path.table_name().clone());
    }
    if let Some(reason) = &faults.reject_distribution {
        backend.distribution.reject_all(reason.clone());
    }
}

fn report(
    ctx: DdlTransactionCtx,
    rollback_ok: Option<bool>,
    post_hooks_ok: bool,
    backend: &mut MemoryBackend,
) -> SimulationResult {
    let tables: Vec<_> = backend
        .store
        .tables()
        .map(|(name, t)| TableReport {
            name: name.to_string(),
            id: t.identity.id,
            version: t.identity.version,
            events: t.events,
        })
        .collect();

    let catalog_consistent = backend.catalog.entries().all(|(name, entry)| {
        backend
            .store
            .get(name)
            .is_some_and(|t| t.identity == entry.identity)
    });

    let catalog = backend
        .catalog
        .entries()
        .map(|(name, entry)| CatalogReport {
            name: name.to_string(),
            id: entry.identity.id,
            version: entry.identity.version,
        })
        .collect();

    SimulationResult {
        status: ctx.status(),
        entries: ctx.entries().cloned().collect(),
        rollback_ok,
        post_hooks_ok,
        warnings: backend.diagnostics.take(),
        tables,
        catalog,
        catalog_consistent,
    }
}
