//! Catalog registrar: the full relation creation protocol.
//! --------------------------------------------------------
//! `create_cataloged_relation` drives every step from column-layout
//! validation through catalog row insertion to unlogged init-fork creation.
//! No step performs compensating deletes: a failure anywhere propagates as a
//! `CatalogResult` error and the enclosing `CatalogTransaction` rolls back
//! both the catalog writes and any storage created along the way.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use super::builder::{self, BuildRelationArgs};
use super::constraints::{self, RawConstraint};
use super::dependency::{DependencyKind, ObjClass, ObjectAddress};
use super::distribution::{self, DistributionClause};
use super::relation::{AlignKind, ColumnDescriptor, OnCommitAction, Persistence, RelKind};
use super::storage::ForkId;
use super::sysattr;
use super::typesys::{
    Oid, BOOL_OID, DATE_OID, DEFAULT_COLLATION_OID, FLOAT8_OID, INT2_OID, INT4_OID, INT8_OID,
    INVALID_OID, NAME_OID, TEXT_OID, TIMESTAMP_OID,
};
use super::{
    CatalogTransaction, ClassRow, ForeignTableRow, GLOBAL_TABLESPACE, MAX_COLUMNS,
    STATISTIC_RELATION_OID,
};

/// One user column of a new relation.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub type_oid: Oid,
    pub typmod: i32,
    pub collation: Option<Oid>,
    pub not_null: bool,
    pub is_local: bool,
    pub inherit_count: i32,
}

impl ColumnSpec {
    pub fn new(name: &str, type_oid: Oid) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            type_oid,
            typmod: -1,
            collation: None,
            not_null: false,
            is_local: true,
            inherit_count: 0,
        }
    }

    /// Text column with the default collation already assigned, the way the
    /// analysis layer hands them over.
    pub fn text(name: &str) -> ColumnSpec {
        let mut c = ColumnSpec::new(name, TEXT_OID);
        c.collation = Some(DEFAULT_COLLATION_OID);
        c
    }

    pub fn with_collation(mut self, collation: Oid) -> ColumnSpec {
        self.collation = Some(collation);
        self
    }
}

/// The full specification of a relation to catalog.
#[derive(Debug, Clone)]
pub struct RelationSpec {
    pub name: String,
    pub namespace: Oid,
    pub tablespace: Oid,
    pub owner: Oid,
    pub kind: RelKind,
    pub persistence: Persistence,
    pub is_shared: bool,
    pub is_mapped: bool,
    pub has_oids: bool,
    /// Caller-supplied identifier; allocated when absent.
    pub oid: Option<Oid>,
    /// Storage already exists under this identifier; do not create it.
    pub existing_storage_oid: Option<Oid>,
    pub of_type: Option<Oid>,
    pub columns: Vec<ColumnSpec>,
    /// Locality/inheritance bookkeeping for the optional oid system column;
    /// oid columns can themselves be inherited.
    pub oid_is_local: bool,
    pub oid_inherit_count: i32,
    pub constraints: Vec<RawConstraint>,
    pub on_commit: Option<OnCommitAction>,
    pub distribution: Option<DistributionClause>,
    /// Foreign-table auxiliary row (server name + options).
    pub foreign_server: Option<(String, Vec<(String, String)>)>,
}

impl RelationSpec {
    pub fn table(name: &str, namespace: Oid, columns: Vec<ColumnSpec>) -> RelationSpec {
        RelationSpec {
            name: name.to_string(),
            namespace,
            tablespace: INVALID_OID,
            owner: 10,
            kind: RelKind::Table,
            persistence: Persistence::Permanent,
            is_shared: false,
            is_mapped: false,
            has_oids: false,
            oid: None,
            existing_storage_oid: None,
            of_type: None,
            columns,
            oid_is_local: true,
            oid_inherit_count: 0,
            constraints: Vec::new(),
            on_commit: None,
            distribution: None,
            foreign_server: None,
        }
    }
}

/// Physical layout of a well-known scalar type. Unknown types are treated
/// as varlena.
fn type_layout(type_oid: Oid) -> (i32, AlignKind) {
    match type_oid {
        BOOL_OID => (1, AlignKind::Char),
        INT2_OID => (2, AlignKind::Short),
        INT4_OID | DATE_OID => (4, AlignKind::Int),
        INT8_OID | FLOAT8_OID | TIMESTAMP_OID => (8, AlignKind::Double),
        NAME_OID => (64, AlignKind::Char),
        _ => (-1, AlignKind::Int),
    }
}

/// Step 1: column-layout validation.
fn validate_column_layout(txn: &CatalogTransaction<'_>, spec: &RelationSpec) -> CatalogResult<()> {
    if spec.columns.len() > MAX_COLUMNS {
        return Err(CatalogError::definition(
            "too_many_columns".into(),
            format!("tables can have at most {} columns", MAX_COLUMNS),
        ));
    }
    // Pseudo-type escape hatch: only the statistics catalog, only while
    // bootstrapping.
    let allow_pseudo = txn.config().bootstrap_mode && spec.oid == Some(STATISTIC_RELATION_OID);

    let mut seen: HashSet<&str> = HashSet::new();
    for col in &spec.columns {
        if spec.kind.has_system_columns() && sysattr::lookup_by_name(&col.name, spec.has_oids).is_some() {
            return Err(CatalogError::duplicate(
                "reserved_column_name".into(),
                format!("column name \"{}\" conflicts with a system column name", col.name),
            ));
        }
        if !seen.insert(col.name.as_str()) {
            return Err(CatalogError::duplicate(
                "duplicate_column".into(),
                format!("column \"{}\" specified more than once", col.name),
            ));
        }
        txn.work.types.check_attribute_type(
            &col.name,
            col.type_oid,
            col.collation,
            &HashSet::new(),
            allow_pseudo,
        )?;
    }
    Ok(())
}

/// Step 2: relation and type name collision pre-checks. A colliding *array*
/// type is renamed out of the way when possible; any other occupant fails.
fn check_name_collisions(txn: &mut CatalogTransaction<'_>, spec: &RelationSpec) -> CatalogResult<()> {
    if txn.work.lookup_relation_by_name(spec.namespace, &spec.name).is_some() {
        return Err(CatalogError::duplicate(
            "duplicate_table".into(),
            format!("relation \"{}\" already exists", spec.name),
        ));
    }
    if txn.work.types.lookup_by_name(spec.namespace, &spec.name).is_some()
        && !txn.work.types.move_array_type_aside(spec.namespace, &spec.name)
    {
        return Err(CatalogError::duplicate(
            "duplicate_type".into(),
            format!("type \"{}\" already exists", spec.name),
        ));
    }
    Ok(())
}

/// Create a relation and all of its catalog rows. Returns the new
/// relation's identifier; the exclusive lock on it stays with the
/// transaction until commit or abort.
pub fn create_cataloged_relation(
    txn: &mut CatalogTransaction<'_>,
    spec: RelationSpec,
) -> CatalogResult<Oid> {
    validate_column_layout(txn, &spec)?;
    check_name_collisions(txn, &spec)?;

    // Step 3: shared relations live only in the designated shared tablespace.
    if spec.is_shared && spec.tablespace != GLOBAL_TABLESPACE {
        return Err(CatalogError::definition(
            "shared_tablespace".into(),
            "shared relations must be placed in the global tablespace".to_string(),
        ));
    }

    // Step 4: identifier allocation, honoring the binary-upgrade slots.
    let rel_oid = match spec.oid {
        Some(oid) => oid,
        None => txn.work.allocate_relation_oid(spec.kind),
    };
    txn.lock_exclusive(rel_oid)?;

    // Step 5.
    let acl = txn.work.resolve_default_acl(spec.namespace, spec.kind);

    // Step 6: the builder creates the descriptor and, when needed, storage.
    let user_columns: Vec<ColumnDescriptor> = spec
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let (len, align) = type_layout(c.type_oid);
            ColumnDescriptor {
                relation: rel_oid,
                name: c.name.clone(),
                type_oid: c.type_oid,
                typmod: c.typmod,
                collation: c.collation,
                attnum: (i + 1) as i16,
                len,
                align,
                not_null: c.not_null,
                has_default: false,
                is_dropped: false,
                inherit_count: c.inherit_count,
                is_local: c.is_local,
                missing_value: None,
            }
        })
        .collect();

    let descriptor = builder::create_relation(
        txn,
        BuildRelationArgs {
            name: spec.name.clone(),
            namespace: spec.namespace,
            tablespace: spec.tablespace,
            oid: rel_oid,
            existing_storage_oid: spec.existing_storage_oid,
            columns: user_columns.clone(),
            kind: spec.kind,
            persistence: spec.persistence,
            is_shared: spec.is_shared,
            is_mapped: spec.is_mapped,
        },
    )?;

    let bootstrap = txn.config().bootstrap_mode;

    // Steps 7 and 8: row type, and the companion array type unless the kind
    // is an implementation detail or we are bootstrapping.
    let row_type = txn.work.types.create_row_type(&spec.name, spec.namespace, rel_oid)?;
    txn.work.types.register_composite_members(
        rel_oid,
        spec.columns.iter().map(|c| (c.name.clone(), c.type_oid, c.collation)).collect(),
    );
    if !bootstrap {
        txn.work.deps.record(
            ObjectAddress::of(ObjClass::Type, row_type),
            ObjectAddress::relation(rel_oid),
            DependencyKind::Internal,
        );
    }
    if !bootstrap && spec.kind.wants_array_type() {
        // The auto array name may itself be squatted by an older array type.
        txn.work.types.move_array_type_aside(spec.namespace, &format!("_{}", spec.name));
        let array_type = txn.work.types.create_array_type(&spec.name, spec.namespace, row_type)?;
        txn.work.deps.record(
            ObjectAddress::of(ObjClass::Type, array_type),
            ObjectAddress::of(ObjClass::Type, row_type),
            DependencyKind::Internal,
        );
    }

    // Step 9: the class row, with derived fields per kind.
    let (pages, tuples) = if spec.kind == RelKind::Sequence { (1u32, 1u64) } else { (0, 0) };
    let (frozen_xid, min_multixact) = if spec.kind.has_row_versions() {
        let w = txn.watermarks();
        (Some(w.recent_oldest_xid), Some(w.oldest_multixact))
    } else {
        (None, None)
    };
    txn.work.classes.insert(
        rel_oid,
        ClassRow {
            oid: rel_oid,
            name: spec.name.clone(),
            namespace: spec.namespace,
            tablespace: descriptor.tablespace,
            owner: spec.owner,
            kind: spec.kind,
            persistence: spec.persistence,
            storage_oid: descriptor.storage_oid,
            pages,
            tuples,
            visible_pages: 0,
            has_oids: spec.has_oids,
            check_count: 0,
            frozen_xid,
            min_multixact,
            acl,
            of_type: spec.of_type,
            is_shared: spec.is_shared,
            is_mapped: spec.is_mapped,
        },
    );

    // Step 10: attribute rows, user columns first, then the applicable
    // system columns.
    for col in &user_columns {
        txn.work.attributes.insert((rel_oid, col.attnum), col.clone());
        if !bootstrap {
            txn.work.deps.record(
                ObjectAddress::column(rel_oid, col.attnum),
                ObjectAddress::of(ObjClass::Type, col.type_oid),
                DependencyKind::Normal,
            );
            // The pinned default collation never gets an edge.
            if let Some(coll) = col.collation {
                if coll != DEFAULT_COLLATION_OID {
                    txn.work.deps.record(
                        ObjectAddress::column(rel_oid, col.attnum),
                        ObjectAddress::of(ObjClass::Collation, coll),
                        DependencyKind::Normal,
                    );
                }
            }
        }
    }
    if spec.kind.has_system_columns() {
        for sa in sysattr::applicable(spec.has_oids) {
            let (is_local, inherit_count) = if sa.attnum == sysattr::OID_ATTRIBUTE_NUMBER {
                (spec.oid_is_local, spec.oid_inherit_count)
            } else {
                (true, 0)
            };
            txn.work.attributes.insert(
                (rel_oid, sa.attnum),
                ColumnDescriptor {
                    relation: rel_oid,
                    name: sa.name.to_string(),
                    type_oid: sa.type_oid,
                    typmod: -1,
                    collation: None,
                    attnum: sa.attnum,
                    len: sa.len,
                    align: sa.align,
                    not_null: true,
                    has_default: false,
                    is_dropped: false,
                    inherit_count,
                    is_local,
                    missing_value: None,
                },
            );
        }
    }

    // Step 11: namespace/owner/of-type edges. Toast and composite-type
    // relations depend transitively; bootstrap has no dependency tracking.
    if !bootstrap && !matches!(spec.kind, RelKind::Toast | RelKind::CompositeType) {
        let rel_addr = ObjectAddress::relation(rel_oid);
        txn.work.deps.record(
            rel_addr,
            ObjectAddress::of(ObjClass::Namespace, spec.namespace),
            DependencyKind::Normal,
        );
        txn.work.deps.record(
            rel_addr,
            ObjectAddress::of(ObjClass::Role, spec.owner),
            DependencyKind::Normal,
        );
        if let Some(of_type) = spec.of_type {
            txn.work.deps.record(
                rel_addr,
                ObjectAddress::of(ObjClass::Type, of_type),
                DependencyKind::Normal,
            );
        }
    }

    // Foreign-table auxiliary row.
    if let Some((server, options)) = spec.foreign_server {
        txn.work.foreign_tables.insert(rel_oid, ForeignTableRow { relation: rel_oid, server, options });
    }

    // Step 12: pre-cooked constraints and defaults.
    if !spec.constraints.is_empty() {
        constraints::add_new_constraints(txn, rel_oid, spec.constraints, false, true, false)?;
    }

    // Cluster builds: compute and persist the distribution record.
    if txn.config().cluster_enabled
        && !spec.is_shared
        && !bootstrap
        && matches!(spec.kind, RelKind::Table | RelKind::PartitionedTable)
    {
        distribution::create_distribution(txn, rel_oid, spec.distribution.as_ref(), &user_columns)?;
    }

    // Step 13: deferred on-commit action for temporary relations.
    if spec.persistence == Persistence::Temporary {
        if let Some(action) = spec.on_commit {
            if action != OnCommitAction::Noop {
                txn.work.on_commit.insert(rel_oid, action);
            }
        }
    }

    // Step 14: the unlogged init fork. Written outside the buffered path,
    // so it must reach disk before an in-flight checkpoint completes.
    if spec.persistence == Persistence::Unlogged && spec.kind.has_storage() {
        let locator = builder::physical_locator(&descriptor);
        txn.storage().create_fork(locator, ForkId::Init, true)?;
        txn.storage().force_sync_fork(locator, ForkId::Init)?;
    }

    // Step 15: catalog-table locks would be released here; the exclusive
    // lock on the new relation itself stays until end of transaction.
    debug!(rel = rel_oid, name = %spec.name, kind = spec.kind.as_str(), "relation cataloged");
    Ok(rel_oid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::storage::FileStorage;
    use crate::catalog::{Catalog, CatalogConfig, PUBLIC_NAMESPACE};
    use crate::ident::dropped_column_name;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn catalog() -> (Catalog, tempfile::TempDir) {
        let tmp = tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(tmp.path()).unwrap());
        (Catalog::new(storage, CatalogConfig::default()), tmp)
    }

    #[test]
    fn attribute_list_round_trips_in_order() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let spec = RelationSpec::table(
            "events",
            PUBLIC_NAMESPACE,
            vec![
                ColumnSpec::new("id", INT8_OID),
                ColumnSpec::text("payload"),
                ColumnSpec::new("created", TIMESTAMP_OID),
            ],
        );
        let rel = create_cataloged_relation(&mut txn, spec).unwrap();
        txn.commit().unwrap();

        let d = cat.descriptor(rel).unwrap();
        let names: Vec<&str> = d.columns.iter().map(|c| c.name.as_str()).collect();
        // user columns in input order, then system columns -1..-7 (no oid)
        assert_eq!(
            names,
            vec!["id", "payload", "created", "ctid", "xmin", "cmin", "xmax", "cmax", "tableoid"]
        );
        assert_eq!(d.columns[3].attnum, -1);
        assert_eq!(d.columns[8].attnum, -7);
    }

    #[test]
    fn with_oids_adds_oid_column() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let mut spec = RelationSpec::table("o", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]);
        spec.has_oids = true;
        let rel = create_cataloged_relation(&mut txn, spec).unwrap();
        let cols = txn.work.attributes_of(rel);
        assert!(cols.iter().any(|c| c.name == "oid" && c.attnum == -2));
    }

    #[test]
    fn duplicate_name_in_same_transaction_fails() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let spec = RelationSpec::table("t", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]);
        create_cataloged_relation(&mut txn, spec.clone()).unwrap();
        let err = create_cataloged_relation(&mut txn, spec).unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate { .. }));
    }

    #[test]
    fn system_column_name_collision_rejected_for_tables_only() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let spec = RelationSpec::table("bad", PUBLIC_NAMESPACE, vec![ColumnSpec::new("xmin", INT4_OID)]);
        assert!(create_cataloged_relation(&mut txn, spec).is_err());

        // views have no system columns, so the name is free there
        let mut spec = RelationSpec::table("v", PUBLIC_NAMESPACE, vec![ColumnSpec::new("xmin", INT4_OID)]);
        spec.kind = RelKind::View;
        assert!(create_cataloged_relation(&mut txn, spec).is_ok());
    }

    #[test]
    fn too_many_columns_rejected() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let cols: Vec<ColumnSpec> = (0..=MAX_COLUMNS)
            .map(|i| ColumnSpec::new(&format!("c{}", i), INT4_OID))
            .collect();
        let err = create_cataloged_relation(&mut txn, RelationSpec::table("wide", PUBLIC_NAMESPACE, cols))
            .unwrap_err();
        assert!(err.message().contains("at most"));
    }

    #[test]
    fn sequence_class_row_starts_at_one_page() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let mut spec = RelationSpec::table("s", PUBLIC_NAMESPACE, vec![ColumnSpec::new("last_value", INT8_OID)]);
        spec.kind = RelKind::Sequence;
        let rel = create_cataloged_relation(&mut txn, spec).unwrap();
        let row = txn.work.class(rel).unwrap();
        assert_eq!((row.pages, row.tuples), (1, 1));
        // sequences hold no transactional row versions
        assert!(row.frozen_xid.is_none());
    }

    #[test]
    fn table_gets_watermarks_view_does_not() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let rel = create_cataloged_relation(
            &mut txn,
            RelationSpec::table("wm", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]),
        )
        .unwrap();
        let row = txn.work.class(rel).unwrap();
        assert_eq!(row.frozen_xid, Some(3));
        assert_eq!(row.min_multixact, Some(1));

        let mut spec = RelationSpec::table("vw", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]);
        spec.kind = RelKind::View;
        let view = create_cataloged_relation(&mut txn, spec).unwrap();
        assert!(txn.work.class(view).unwrap().frozen_xid.is_none());
    }

    #[test]
    fn row_and_array_type_created() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let rel = create_cataloged_relation(
            &mut txn,
            RelationSpec::table("widget", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]),
        )
        .unwrap();
        assert!(txn.work.types.row_type_of(rel).is_some());
        assert!(txn.work.types.lookup_by_name(PUBLIC_NAMESPACE, "_widget").is_some());
    }

    #[test]
    fn toast_gets_no_array_type() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let mut spec = RelationSpec::table("pg_toast_1", PUBLIC_NAMESPACE, vec![ColumnSpec::new("chunk_id", INT4_OID)]);
        spec.kind = RelKind::Toast;
        create_cataloged_relation(&mut txn, spec).unwrap();
        assert!(txn.work.types.lookup_by_name(PUBLIC_NAMESPACE, "_pg_toast_1").is_none());
    }

    #[test]
    fn binary_upgrade_slot_consumed_once() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        txn.work.set_binary_upgrade_next_heap_oid(90_000);
        let a = create_cataloged_relation(
            &mut txn,
            RelationSpec::table("up1", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]),
        )
        .unwrap();
        assert_eq!(a, 90_000);
        let b = create_cataloged_relation(
            &mut txn,
            RelationSpec::table("up2", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]),
        )
        .unwrap();
        assert_ne!(b, 90_000);
    }

    #[test]
    fn shared_relation_requires_global_tablespace() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let mut spec = RelationSpec::table("shr", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]);
        spec.is_shared = true;
        assert!(create_cataloged_relation(&mut txn, spec.clone()).is_err());
        spec.tablespace = GLOBAL_TABLESPACE;
        assert!(create_cataloged_relation(&mut txn, spec).is_ok());
    }

    #[test]
    fn unlogged_table_gets_synced_init_fork() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let mut spec = RelationSpec::table("ul", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]);
        spec.persistence = Persistence::Unlogged;
        let rel = create_cataloged_relation(&mut txn, spec).unwrap();
        let d = txn.work.descriptor_of(rel).unwrap();
        let locator = builder::physical_locator(&d);
        assert!(cat.storage().exists(locator, ForkId::Init));
    }

    #[test]
    fn temp_table_on_commit_recorded() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let mut spec = RelationSpec::table("tmp", PUBLIC_NAMESPACE, vec![ColumnSpec::new("a", INT4_OID)]);
        spec.persistence = Persistence::Temporary;
        spec.on_commit = Some(OnCommitAction::Drop);
        let rel = create_cataloged_relation(&mut txn, spec).unwrap();
        assert_eq!(txn.work.on_commit.get(&rel), Some(&OnCommitAction::Drop));
    }

    #[test]
    fn dropped_column_name_is_reserved_looking() {
        // sanity on the tombstone pattern the descriptor uses
        assert!(dropped_column_name(4).contains("pg.dropped.4"));
    }
}
