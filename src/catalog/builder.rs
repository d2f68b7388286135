//! Relation builder: allocates relation identity, decides storage necessity
//! per kind, and creates the in-memory descriptor plus physical storage.
//! The catalog registrar drives this as step one of the creation protocol.

use tracing::debug;

use super::relation::{ColumnDescriptor, Persistence, RelKind, RelationDescriptor};
use super::storage::StorageLocator;
use super::typesys::{Oid, INVALID_OID};
use super::{is_system_namespace, CatalogTransaction, DEFAULT_TABLESPACE, GLOBAL_TABLESPACE};
use crate::error::{CatalogError, CatalogResult};

/// Inputs for building one relation.
pub struct BuildRelationArgs {
    pub name: String,
    pub namespace: Oid,
    pub tablespace: Oid,
    pub oid: Oid,
    /// Explicit storage identifier: storage is assumed to already exist and
    /// is not (re)created.
    pub existing_storage_oid: Option<Oid>,
    pub columns: Vec<ColumnDescriptor>,
    pub kind: RelKind,
    pub persistence: Persistence,
    pub is_shared: bool,
    pub is_mapped: bool,
}

/// Create the uncataloged relation: descriptor first, then — only if the
/// kind has storage and none was supplied — the physical main fork.
///
/// Storage allocation failure is not locally recovered; it propagates and
/// the storage manager owns partial-file cleanup.
pub fn create_relation(
    txn: &mut CatalogTransaction<'_>,
    args: BuildRelationArgs,
) -> CatalogResult<RelationDescriptor> {
    // Creation inside a protected system namespace needs explicit privilege.
    // Indexes are exempt: upper layers already validated the base relation.
    let is_index = matches!(args.kind, RelKind::Index | RelKind::PartitionedIndex);
    if is_system_namespace(args.namespace) && !txn.config().allow_system_table_mods && !is_index {
        return Err(CatalogError::permission(
            "system_namespace".into(),
            format!(
                "permission denied to create \"{}\" in the system namespace",
                args.name
            ),
        ));
    }

    let has_storage = args.kind.has_storage();

    // Storage-less kinds and sequences pin the null tablespace; a tablespace
    // equal to the database default also normalizes to "unspecified" so
    // clones that change the default stay portable.
    let tablespace = if !has_storage || args.kind == RelKind::Sequence {
        INVALID_OID
    } else if args.tablespace == DEFAULT_TABLESPACE {
        INVALID_OID
    } else {
        args.tablespace
    };

    let storage_oid = if has_storage {
        args.existing_storage_oid.unwrap_or(args.oid)
    } else {
        INVALID_OID
    };

    let descriptor = RelationDescriptor {
        oid: args.oid,
        name: args.name,
        namespace: args.namespace,
        tablespace,
        storage_oid,
        kind: args.kind,
        persistence: args.persistence,
        is_shared: args.is_shared,
        is_mapped: args.is_mapped,
        columns: args.columns,
    };

    if has_storage && args.existing_storage_oid.is_none() {
        let locator = physical_locator(&descriptor);
        debug!(rel = descriptor.oid, name = %descriptor.name, "allocating primary data fork");
        txn.storage().create_storage(locator, descriptor.persistence)?;
        txn.note_created_storage(locator);
    }

    Ok(descriptor)
}

/// Resolve the physical placement of a relation's storage. "Unspecified"
/// tablespace places the object in the database default; shared relations
/// always live in the global tablespace.
pub fn physical_locator(rel: &RelationDescriptor) -> StorageLocator {
    let tablespace = if rel.is_shared {
        GLOBAL_TABLESPACE
    } else if rel.tablespace == INVALID_OID {
        DEFAULT_TABLESPACE
    } else {
        rel.tablespace
    };
    StorageLocator { tablespace, storage_oid: rel.storage_oid }
}
