//!
//! relcat catalog module
//! ---------------------
//! Implements the relation lifecycle over an in-process system catalog: class
//! rows, attribute rows, constraints/defaults, partition metadata and (for
//! cluster builds) distribution records. All catalog mutation happens inside
//! a `CatalogTransaction`, a snapshot-based RAII guard: commit publishes the
//! whole mutated snapshot atomically and resolves deferred storage actions;
//! dropping the guard without committing discards every catalog write and
//! unlinks any storage the transaction created. That is what makes "physical
//! unlink is scheduled, not immediate" safe — both the catalog change and the
//! storage change become visible together or not at all.
//!
//! Cross-session mutual exclusion uses coarse per-relation exclusive locks
//! held until the transaction ends. There is no finer-grained in-process
//! synchronization; sessions are single-threaded.

pub mod sysattr;
pub mod relation;
pub mod typesys;
pub mod storage;
pub mod dependency;
pub mod cluster;
pub mod builder;
pub mod registrar;
pub mod constraints;
pub mod distribution;
pub mod teardown;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
pub use relation::{ColumnDescriptor, OnCommitAction, Persistence, RelKind, RelationDescriptor};
pub use typesys::{Oid, TypeRegistry, INVALID_OID};
use cluster::NodeCatalog;
use dependency::DependencyGraph;
use distribution::DistributionRow;
use storage::{StorageLocator, StorageManager};

/// Hard maximum on user columns per relation.
pub const MAX_COLUMNS: usize = 1600;

/// Namespace holding the protected system catalogs.
pub const PG_CATALOG_NAMESPACE: Oid = 11;
/// Default user namespace.
pub const PUBLIC_NAMESPACE: Oid = 2200;
/// The database's default tablespace.
pub const DEFAULT_TABLESPACE: Oid = 1663;
/// The only tablespace shared relations may live in.
pub const GLOBAL_TABLESPACE: Oid = 1664;

/// Oid reserved for the statistics catalog, whose columns may use
/// pseudo-types during bootstrap (the documented escape hatch).
pub const STATISTIC_RELATION_OID: Oid = 2619;

pub fn is_system_namespace(ns: Oid) -> bool {
    ns == PG_CATALOG_NAMESPACE
}

/// One row of the class catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRow {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    pub tablespace: Oid,
    pub owner: Oid,
    pub kind: RelKind,
    pub persistence: Persistence,
    /// Storage identifier; INVALID_OID for storage-less kinds.
    pub storage_oid: Oid,
    pub pages: u32,
    pub tuples: u64,
    pub visible_pages: u32,
    pub has_oids: bool,
    /// Running count of check constraints; kept in sync by the constraint store.
    pub check_count: i16,
    /// Frozen-transaction watermark; None for storage-less kinds.
    pub frozen_xid: Option<u64>,
    /// Oldest in-flight multi-transaction watermark; None for storage-less kinds.
    pub min_multixact: Option<u64>,
    pub acl: Option<Vec<String>>,
    pub of_type: Option<Oid>,
    pub is_shared: bool,
    pub is_mapped: bool,
}

/// Partitioning strategy of a partitioned table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    Range,
    List,
    Hash,
}

/// Time interval of a range-partitioned table, consulted by the hot/cold
/// secondary distribution-key validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionInterval {
    OneDay,
    OneMonth,
    OneYear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionKeyRow {
    pub relation: Oid,
    pub strategy: PartitionStrategy,
    pub column: i16,
    pub interval: Option<PartitionInterval>,
    /// Anchor timestamp the interval is aligned to, epoch milliseconds.
    pub anchor_ms: Option<i64>,
    pub default_partition: Option<Oid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintRow {
    pub oid: Oid,
    pub relation: Oid,
    pub namespace: Oid,
    pub name: String,
    /// Lossless re-parseable encoding of the check expression.
    pub stored_expr: String,
    /// Best-effort human-readable form.
    pub deparsed: String,
    pub is_validated: bool,
    pub is_local: bool,
    pub inherit_count: i32,
    pub is_no_inherit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultRow {
    pub oid: Oid,
    pub relation: Oid,
    pub attnum: i16,
    pub stored_expr: String,
    pub deparsed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignTableRow {
    pub relation: Oid,
    pub server: String,
    pub options: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritsRow {
    pub child: Oid,
    pub parent: Oid,
    pub seqno: i32,
}

/// Watermark feed from the transaction manager: "recent oldest running
/// transaction id" and "oldest in-flight multi-transaction id".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransactionWatermarks {
    pub recent_oldest_xid: u64,
    pub oldest_multixact: u64,
}

impl Default for TransactionWatermarks {
    fn default() -> Self {
        TransactionWatermarks { recent_oldest_xid: 3, oldest_multixact: 1 }
    }
}

/// Local-only "in use by this session" bookkeeping consulted before a drop.
#[derive(Debug, Clone, Default)]
pub struct SessionUsage {
    pub open_cursors: HashSet<Oid>,
    pub pending_triggers: HashSet<Oid>,
}

impl SessionUsage {
    pub fn in_use(&self, rel: Oid) -> bool {
        self.open_cursors.contains(&rel) || self.pending_triggers.contains(&rel)
    }
}

/// Build-level configuration for the catalog engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Permit DDL inside the protected system namespace.
    pub allow_system_table_mods: bool,
    /// Bootstrap processing: dependency tracking and array-type creation do
    /// not exist yet.
    pub bootstrap_mode: bool,
    /// Cluster build: relations get a distribution record.
    pub cluster_enabled: bool,
    /// When no distribution column qualifies, fall back to round-robin
    /// instead of erroring out.
    pub round_robin_fallback: bool,
    /// Default hash algorithm id for hash/shard distribution.
    pub default_hash_algorithm: u32,
    /// Default bucket count for hash/shard distribution.
    pub default_bucket_count: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            allow_system_table_mods: false,
            bootstrap_mode: false,
            cluster_enabled: true,
            round_robin_fallback: true,
            default_hash_algorithm: 1,
            default_bucket_count: 16384,
        }
    }
}

/// The whole catalog state. Cloned into each transaction snapshot; rows are
/// metadata-sized so the clone stays cheap relative to DDL frequency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogState {
    pub classes: BTreeMap<Oid, ClassRow>,
    pub attributes: BTreeMap<(Oid, i16), ColumnDescriptor>,
    pub constraints: BTreeMap<Oid, ConstraintRow>,
    pub defaults: BTreeMap<Oid, DefaultRow>,
    pub partition_keys: BTreeMap<Oid, PartitionKeyRow>,
    pub foreign_tables: BTreeMap<Oid, ForeignTableRow>,
    pub distributions: BTreeMap<Oid, DistributionRow>,
    pub inherits: Vec<InheritsRow>,
    pub statistics: BTreeMap<(Oid, i16), String>,
    pub on_commit: BTreeMap<Oid, OnCommitAction>,
    pub deps: DependencyGraph,
    pub types: TypeRegistry,
    pub nodes: NodeCatalog,
    /// Per-namespace default ACL configuration.
    pub default_acls: BTreeMap<Oid, Vec<String>>,
    next_oid: Oid,
    /// Once-only override slots reserved for the cross-process upgrade tool.
    binary_upgrade_next_heap_oid: Option<Oid>,
    binary_upgrade_next_toast_oid: Option<Oid>,
}

impl Default for CatalogState {
    fn default() -> Self {
        CatalogState {
            classes: BTreeMap::new(),
            attributes: BTreeMap::new(),
            constraints: BTreeMap::new(),
            defaults: BTreeMap::new(),
            partition_keys: BTreeMap::new(),
            foreign_tables: BTreeMap::new(),
            distributions: BTreeMap::new(),
            inherits: Vec::new(),
            statistics: BTreeMap::new(),
            on_commit: BTreeMap::new(),
            deps: DependencyGraph::default(),
            types: TypeRegistry::builtin(),
            nodes: NodeCatalog::default(),
            default_acls: BTreeMap::new(),
            next_oid: 16384,
            binary_upgrade_next_heap_oid: None,
            binary_upgrade_next_toast_oid: None,
        }
    }
}

impl CatalogState {
    pub fn lookup_relation_by_name(&self, namespace: Oid, name: &str) -> Option<&ClassRow> {
        self.classes.values().find(|c| c.namespace == namespace && c.name == name)
    }

    pub fn class(&self, oid: Oid) -> CatalogResult<&ClassRow> {
        self.classes.get(&oid).ok_or_else(|| CatalogError::cache_lookup("relation", oid))
    }

    pub fn class_mut(&mut self, oid: Oid) -> CatalogResult<&mut ClassRow> {
        self.classes.get_mut(&oid).ok_or_else(|| CatalogError::cache_lookup("relation", oid))
    }

    /// Attribute rows of a relation ordered for descriptors: user columns in
    /// attnum order first, then system columns in their fixed order
    /// (-1, -2, ... descending attnum).
    pub fn attributes_of(&self, rel: Oid) -> Vec<ColumnDescriptor> {
        let mut user: Vec<ColumnDescriptor> = Vec::new();
        let mut system: Vec<ColumnDescriptor> = Vec::new();
        for ((r, _), col) in self.attributes.range((rel, i16::MIN)..=(rel, i16::MAX)) {
            if *r != rel {
                continue;
            }
            if col.attnum > 0 {
                user.push(col.clone());
            } else {
                system.push(col.clone());
            }
        }
        user.sort_by_key(|c| c.attnum);
        system.sort_by_key(|c| std::cmp::Reverse(c.attnum));
        user.extend(system);
        user
    }

    pub fn constraints_of(&self, rel: Oid) -> Vec<&ConstraintRow> {
        self.constraints.values().filter(|c| c.relation == rel).collect()
    }

    pub fn defaults_of(&self, rel: Oid) -> Vec<&DefaultRow> {
        self.defaults.values().filter(|d| d.relation == rel).collect()
    }

    pub fn parent_of(&self, child: Oid) -> Option<Oid> {
        self.inherits.iter().find(|i| i.child == child).map(|i| i.parent)
    }

    pub fn children_of(&self, parent: Oid) -> Vec<Oid> {
        self.inherits.iter().filter(|i| i.parent == parent).map(|i| i.child).collect()
    }

    pub(crate) fn allocate_oid(&mut self) -> Oid {
        let oid = self.next_oid;
        self.next_oid += 1;
        oid
    }

    /// Allocate the identifier for a new relation, consulting the
    /// binary-upgrade override slots first. Ordinary relations and toast
    /// relations consume distinct slots.
    pub(crate) fn allocate_relation_oid(&mut self, kind: RelKind) -> Oid {
        let slot = if kind == RelKind::Toast {
            self.binary_upgrade_next_toast_oid.take()
        } else {
            self.binary_upgrade_next_heap_oid.take()
        };
        match slot {
            Some(oid) => oid,
            None => self.allocate_oid(),
        }
    }

    pub fn set_binary_upgrade_next_heap_oid(&mut self, oid: Oid) {
        self.binary_upgrade_next_heap_oid = Some(oid);
    }

    pub fn set_binary_upgrade_next_toast_oid(&mut self, oid: Oid) {
        self.binary_upgrade_next_toast_oid = Some(oid);
    }

    /// Default ACL from the owner's/namespace's configuration, or none for
    /// kinds without meaningful ACLs.
    pub fn resolve_default_acl(&self, namespace: Oid, kind: RelKind) -> Option<Vec<String>> {
        if !kind.has_acl() {
            return None;
        }
        self.default_acls.get(&namespace).cloned()
    }

    /// Build the in-memory descriptor for a cataloged relation.
    pub fn descriptor_of(&self, oid: Oid) -> CatalogResult<RelationDescriptor> {
        let class = self.class(oid)?;
        Ok(RelationDescriptor {
            oid: class.oid,
            name: class.name.clone(),
            namespace: class.namespace,
            tablespace: class.tablespace,
            storage_oid: class.storage_oid,
            kind: class.kind,
            persistence: class.persistence,
            is_shared: class.is_shared,
            is_mapped: class.is_mapped,
            columns: self.attributes_of(oid),
        })
    }
}

/// Shared catalog handle. Wraps the state the way the storage layer wraps
/// its `Store` (`Arc` + parking_lot guards); sessions clone the handle.
#[derive(Clone)]
pub struct Catalog {
    state: Arc<RwLock<CatalogState>>,
    storage: Arc<dyn StorageManager>,
    /// Per-relation exclusive locks: oid -> owning transaction id.
    locks: Arc<Mutex<HashMap<Oid, u64>>>,
    /// Cached relation descriptors, invalidated on DDL commit.
    relcache: Arc<Mutex<HashMap<Oid, Arc<RelationDescriptor>>>>,
    watermarks: Arc<Mutex<TransactionWatermarks>>,
    next_txn_id: Arc<AtomicU64>,
    pub config: CatalogConfig,
}

impl Catalog {
    pub fn new(storage: Arc<dyn StorageManager>, config: CatalogConfig) -> Catalog {
        Catalog {
            state: Arc::new(RwLock::new(CatalogState::default())),
            storage,
            locks: Arc::new(Mutex::new(HashMap::new())),
            relcache: Arc::new(Mutex::new(HashMap::new())),
            watermarks: Arc::new(Mutex::new(TransactionWatermarks::default())),
            next_txn_id: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageManager> {
        &self.storage
    }

    pub fn set_watermarks(&self, w: TransactionWatermarks) {
        *self.watermarks.lock() = w;
    }

    pub fn watermarks(&self) -> TransactionWatermarks {
        *self.watermarks.lock()
    }

    /// Read-only snapshot of the committed state.
    pub fn snapshot(&self) -> CatalogState {
        self.state.read().clone()
    }

    /// Seed helper for node/group/default-ACL setup outside any transaction.
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// Cached descriptor lookup; rebuilt from the committed state on miss.
    pub fn descriptor(&self, oid: Oid) -> CatalogResult<Arc<RelationDescriptor>> {
        if let Some(d) = self.relcache.lock().get(&oid) {
            return Ok(Arc::clone(d));
        }
        let d = Arc::new(self.state.read().descriptor_of(oid)?);
        self.relcache.lock().insert(oid, Arc::clone(&d));
        Ok(d)
    }

    pub fn invalidate_descriptor(&self, oid: Oid) {
        self.relcache.lock().remove(&oid);
    }

    /// Begin a catalog transaction: snapshot the committed state.
    pub fn begin(&self) -> CatalogTransaction<'_> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        CatalogTransaction {
            catalog: self,
            txn_id,
            work: self.snapshot(),
            created_storage: Vec::new(),
            pending_unlinks: Vec::new(),
            held_locks: Vec::new(),
            invalidations: HashSet::new(),
            session: SessionUsage::default(),
            finished: false,
        }
    }
}

/// RAII transactional scope for catalog mutation.
///
/// All DDL operations take `&mut CatalogTransaction` and mutate its working
/// snapshot. `commit()` publishes the snapshot and resolves deferred storage
/// removal; dropping the guard without commit rolls everything back,
/// including unlinking storage created inside the transaction.
pub struct CatalogTransaction<'c> {
    catalog: &'c Catalog,
    txn_id: u64,
    pub work: CatalogState,
    /// Storage created inside this transaction; unlinked on abort.
    created_storage: Vec<StorageLocator>,
    /// Storage scheduled for removal; unlinked on commit.
    pending_unlinks: Vec<StorageLocator>,
    held_locks: Vec<Oid>,
    /// Descriptors to force out of the shared cache at commit.
    invalidations: HashSet<Oid>,
    pub session: SessionUsage,
    finished: bool,
}

impl<'c> CatalogTransaction<'c> {
    pub fn catalog(&self) -> &Catalog {
        self.catalog
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.catalog.config
    }

    pub fn watermarks(&self) -> TransactionWatermarks {
        self.catalog.watermarks()
    }

    /// Take the exclusive lock on a relation, held to end of transaction.
    /// Lock waits are not simulated; a conflicting holder surfaces as a
    /// typed error the session can retry after the holder finishes.
    pub fn lock_exclusive(&mut self, rel: Oid) -> CatalogResult<()> {
        let mut locks = self.catalog.locks.lock();
        match locks.get(&rel) {
            Some(owner) if *owner != self.txn_id => Err(CatalogError::lock_conflict(
                "lock_not_available".into(),
                format!("relation {} is locked by another transaction", rel),
            )),
            Some(_) => Ok(()),
            None => {
                locks.insert(rel, self.txn_id);
                self.held_locks.push(rel);
                Ok(())
            }
        }
    }

    pub(crate) fn note_created_storage(&mut self, loc: StorageLocator) {
        self.created_storage.push(loc);
    }

    /// Schedule physical storage removal for commit time.
    pub(crate) fn schedule_storage_removal(&mut self, loc: StorageLocator) {
        debug!(storage = loc.storage_oid, "scheduling storage removal at commit");
        self.pending_unlinks.push(loc);
    }

    /// Force other backends to rebuild their cached descriptor after commit.
    pub(crate) fn invalidate_relcache(&mut self, rel: Oid) {
        self.invalidations.insert(rel);
    }

    pub fn storage(&self) -> Arc<dyn StorageManager> {
        Arc::clone(&self.catalog.storage)
    }

    fn release_locks(&mut self) {
        let mut locks = self.catalog.locks.lock();
        for oid in self.held_locks.drain(..) {
            locks.remove(&oid);
        }
    }

    /// Publish the working snapshot. Deferred unlinks run after the state
    /// swap so no observer can see the catalog row gone while storage
    /// remains visible, or vice versa.
    pub fn commit(mut self) -> CatalogResult<()> {
        {
            let mut committed = self.catalog.state.write();
            *committed = std::mem::take(&mut self.work);
        }
        for oid in self.invalidations.drain() {
            self.catalog.invalidate_descriptor(oid);
        }
        for loc in self.pending_unlinks.drain(..) {
            // Unlink failures at commit are logged, not raised: the catalog
            // row is already gone and retrying cannot bring it back.
            if let Err(e) = self.catalog.storage.unlink_storage(loc) {
                tracing::warn!(storage = loc.storage_oid, error = %e, "deferred unlink failed");
            }
        }
        self.created_storage.clear();
        self.release_locks();
        self.finished = true;
        Ok(())
    }
}

impl<'c> Drop for CatalogTransaction<'c> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abort path: catalog writes vanish with the snapshot; storage the
        // transaction created is removed, scheduled removals are forgotten.
        for loc in self.created_storage.drain(..) {
            if let Err(e) = self.catalog.storage.unlink_storage(loc) {
                tracing::warn!(storage = loc.storage_oid, error = %e, "abort cleanup failed");
            }
        }
        self.release_locks();
    }
}
