//! Constraint and default value store.
//! ------------------------------------
//! Converts parsed default/check expressions into stored form, implements the
//! merge-vs-conflict semantics for constraints inherited from multiple
//! parents, and maintains the running check-count on the owning relation.
//! Constraints are removed via the dependency tracer, never directly.

use tracing::debug;

use crate::expr::{Datum, Expr};
use crate::error::{CatalogError, CatalogResult};
use super::dependency::{DependencyKind, ObjClass, ObjectAddress};
use super::typesys::{Oid, TypeRegistry, DEFAULT_COLLATION_OID};
use super::relation::RelKind;
use super::{CatalogState, CatalogTransaction, ConstraintRow, DefaultRow};

/// A cooked constraint ready for storage, or already stored.
#[derive(Debug, Clone)]
pub struct CookedConstraint {
    pub kind: CookedKind,
    pub expr: Expr,
    pub oid: Oid,
    pub is_local: bool,
    pub inherit_count: i32,
    pub is_no_inherit: bool,
}

#[derive(Debug, Clone)]
pub enum CookedKind {
    Default { attnum: i16 },
    Check { name: String },
}

/// Raw (parser-output) constraint definitions handed to `add_new_constraints`.
#[derive(Debug, Clone)]
pub enum RawConstraint {
    Default { attnum: i16, raw: Expr },
    Check { name: String, raw: Expr, is_no_inherit: bool, is_validated: bool },
}

/// Cook a column default: defaults must be self-contained, so any column
/// reference is rejected; then assignment-coerce toward the column type and
/// assign collations throughout.
pub fn cook_default(
    types: &TypeRegistry,
    raw: Expr,
    target_type: Option<Oid>,
    target_typmod: i32,
) -> CatalogResult<Expr> {
    if raw.contains_column_refs() {
        return Err(CatalogError::definition(
            "default_references_column".into(),
            "cannot use column references in default expression".to_string(),
        ));
    }
    let cooked = match target_type {
        Some(t) => raw.coerce_to(types, t, target_typmod)?,
        None => raw,
    };
    Ok(cooked.assign_collations(types, DEFAULT_COLLATION_OID))
}

/// Cook a check constraint: coerce to boolean, assign collations, and reject
/// references beyond the single implicit target relation.
pub fn cook_check(types: &TypeRegistry, raw: Expr, relation_name: &str) -> CatalogResult<Expr> {
    if raw.contains_foreign_refs() {
        return Err(CatalogError::definition(
            "check_references_other_relation".into(),
            format!(
                "check constraint on \"{}\" may only refer to that relation",
                relation_name
            ),
        ));
    }
    let cooked = raw.coerce_to_boolean(types, "CHECK")?;
    Ok(cooked.assign_collations(types, DEFAULT_COLLATION_OID))
}

/// Constant-fold an expression into a literal, when deterministic and
/// computable without an executor. Used for missing-value precomputation.
fn fold_to_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Const { value, .. } => Some(match value {
            Datum::Null => "NULL".to_string(),
            Datum::Bool(b) => b.to_string(),
            Datum::Int(i) => i.to_string(),
            Datum::Float(f) => f.to_string(),
            Datum::Text(s) => s.clone(),
        }),
        Expr::Coerce { arg, .. } | Expr::Collate { arg, .. } => fold_to_literal(arg),
        _ => None,
    }
}

/// Persist a column default. Marks the owning column "has default" and, only
/// when a new column is being added to an already-populated relation,
/// precomputes the "missing value" substituted for pre-existing rows
/// (skipped for volatile expressions).
pub fn store_default(
    txn: &mut CatalogTransaction<'_>,
    rel: Oid,
    attnum: i16,
    expr: &Expr,
    is_internal: bool,
    allow_missing_backfill: bool,
) -> CatalogResult<Oid> {
    let default_oid = txn.work.allocate_oid();
    txn.work.defaults.insert(
        default_oid,
        DefaultRow {
            oid: default_oid,
            relation: rel,
            attnum,
            stored_expr: expr.to_stored(),
            deparsed: expr.deparse(),
        },
    );

    {
        let col = txn
            .work
            .attributes
            .get_mut(&(rel, attnum))
            .ok_or_else(|| CatalogError::cache_lookup("attribute", rel))?;
        col.has_default = true;
        if allow_missing_backfill && !expr.is_volatile() {
            col.missing_value = fold_to_literal(expr);
        }
    }

    // The default hangs off its column, and off whatever the expression
    // references, so the tracer can clean it up from either direction.
    let addr = ObjectAddress::of(ObjClass::Default, default_oid);
    let kind = if is_internal { DependencyKind::Internal } else { DependencyKind::Auto };
    txn.work.deps.record(addr, ObjectAddress::column(rel, attnum), kind);
    for referenced in expr.referenced_columns() {
        if referenced != attnum {
            txn.work.deps.record(addr, ObjectAddress::column(rel, referenced), DependencyKind::Auto);
        }
    }
    Ok(default_oid)
}

/// Persist a check constraint row.
pub fn store_check_constraint(
    txn: &mut CatalogTransaction<'_>,
    rel: Oid,
    name: &str,
    expr: &Expr,
    is_validated: bool,
    is_local: bool,
    inherit_count: i32,
    is_no_inherit: bool,
    is_internal: bool,
) -> CatalogResult<Oid> {
    let class = txn.work.class(rel)?;
    // Partitioned tables hold no rows themselves; a NO INHERIT constraint
    // there could never apply to anything.
    if is_no_inherit && class.kind == RelKind::PartitionedTable {
        return Err(CatalogError::definition(
            "no_inherit_on_partitioned".into(),
            format!(
                "cannot add NO INHERIT constraint to partitioned table \"{}\"",
                class.name
            ),
        ));
    }
    let namespace = class.namespace;

    let columns = expr.referenced_columns();
    let constraint_oid = txn.work.allocate_oid();
    txn.work.constraints.insert(
        constraint_oid,
        ConstraintRow {
            oid: constraint_oid,
            relation: rel,
            namespace,
            name: name.to_string(),
            stored_expr: expr.to_stored(),
            deparsed: expr.deparse(),
            is_validated,
            is_local,
            inherit_count,
            is_no_inherit,
        },
    );

    let addr = ObjectAddress::of(ObjClass::Constraint, constraint_oid);
    let kind = if is_internal { DependencyKind::Internal } else { DependencyKind::Auto };
    txn.work.deps.record(addr, ObjectAddress::relation(rel), kind);
    for attnum in columns {
        txn.work.deps.record(addr, ObjectAddress::column(rel, attnum), DependencyKind::Auto);
    }
    Ok(constraint_oid)
}

/// Is `rel` a partition, i.e. a child whose parent is a partitioned table?
fn is_partition(state: &CatalogState, rel: Oid) -> bool {
    state
        .parent_of(rel)
        .and_then(|p| state.classes.get(&p))
        .map(|c| c.kind == RelKind::PartitionedTable)
        .unwrap_or(false)
}

/// Look for an existing constraint of the same name bound to this relation.
/// Returns Ok(true) after updating inheritance bookkeeping on a compatible
/// match, Ok(false) when no constraint of that name exists, and an error on
/// an incompatible collision.
pub fn merge_or_reject_constraint(
    txn: &mut CatalogTransaction<'_>,
    rel: Oid,
    name: &str,
    expr: &Expr,
    allow_merge: bool,
    is_local: bool,
    is_initially_valid: bool,
    is_no_inherit: bool,
) -> CatalogResult<bool> {
    let namespace = txn.work.class(rel)?.namespace;
    let existing_oid = txn
        .work
        .constraints
        .values()
        .find(|c| c.relation == rel && c.namespace == namespace && c.name == name)
        .map(|c| c.oid);
    let Some(existing_oid) = existing_oid else {
        return Ok(false);
    };

    let duplicate = || {
        CatalogError::duplicate(
            "duplicate_constraint".into(),
            format!("constraint \"{}\" for relation already exists", name),
        )
    };

    if !allow_merge {
        return Err(duplicate());
    }

    let on_partition = is_partition(&txn.work, rel);
    let existing = txn
        .work
        .constraints
        .get_mut(&existing_oid)
        .ok_or_else(|| CatalogError::cache_lookup("constraint", existing_oid))?;

    // Only structurally identical expressions may merge.
    let existing_expr = Expr::from_stored(&existing.stored_expr)?;
    if existing_expr != *expr {
        return Err(duplicate());
    }
    // NO INHERIT cannot be introduced on a constraint other parents already
    // propagated into.
    if is_no_inherit && !existing.is_no_inherit && existing.inherit_count > 0 {
        return Err(CatalogError::definition(
            "no_inherit_conflict".into(),
            format!(
                "constraint \"{}\" conflicts with inherited constraint on relation",
                name
            ),
        ));
    }
    // An unvalidated local arrival cannot piggyback on a validated one.
    if !is_initially_valid && existing.is_validated {
        return Err(CatalogError::definition(
            "not_valid_conflict".into(),
            format!(
                "constraint \"{}\" conflicts with NOT VALID constraint on relation",
                name
            ),
        ));
    }

    if is_local {
        // A purely inherited constraint is promoted when a same-named local
        // definition arrives — except on partitions, which never gain a
        // local component and cap the inheritance count at one.
        if on_partition {
            existing.inherit_count = 1;
        } else {
            existing.is_local = true;
        }
    } else if on_partition {
        existing.inherit_count = 1;
    } else {
        existing.inherit_count += 1;
    }
    debug!(constraint = %name, rel, inherit_count = existing.inherit_count, "merged constraint");
    Ok(true)
}

/// Write the relation's check-count if it changed. The cache-invalidation
/// broadcast is unconditional: other backends must reload the descriptor
/// even when only constraint internals changed.
pub fn recompute_check_count(txn: &mut CatalogTransaction<'_>, rel: Oid, new_count: i16) -> CatalogResult<()> {
    let class = txn.work.class_mut(rel)?;
    if class.check_count != new_count {
        class.check_count = new_count;
    }
    txn.invalidate_relcache(rel);
    Ok(())
}

fn current_check_count(state: &CatalogState, rel: Oid) -> i16 {
    state.constraints.values().filter(|c| c.relation == rel).count() as i16
}

/// Store a batch of new defaults and checks on a relation. Raw expressions
/// are cooked here; pre-cooked (inherited) ones skip the cooking step.
/// Returns the cooked constraints that were actually stored, merges omitted.
pub fn add_new_constraints(
    txn: &mut CatalogTransaction<'_>,
    rel: Oid,
    raw: Vec<RawConstraint>,
    allow_merge: bool,
    is_local: bool,
    is_internal: bool,
) -> CatalogResult<Vec<CookedConstraint>> {
    let rel_name = txn.work.class(rel)?.name.clone();
    let mut out = Vec::new();
    let mut checks_added = false;

    for item in raw {
        match item {
            RawConstraint::Default { attnum, raw } => {
                let (target_type, target_typmod) = {
                    let col = txn
                        .work
                        .attributes
                        .get(&(rel, attnum))
                        .ok_or_else(|| CatalogError::cache_lookup("attribute", rel))?;
                    (col.type_oid, col.typmod)
                };
                let cooked = cook_default(&txn.work.types, raw, Some(target_type), target_typmod)?;
                let oid = store_default(txn, rel, attnum, &cooked, is_internal, false)?;
                out.push(CookedConstraint {
                    kind: CookedKind::Default { attnum },
                    expr: cooked,
                    oid,
                    is_local,
                    inherit_count: 0,
                    is_no_inherit: false,
                });
            }
            RawConstraint::Check { name, raw, is_no_inherit, is_validated } => {
                let cooked = cook_check(&txn.work.types, raw, &rel_name)?;
                let merged = merge_or_reject_constraint(
                    txn,
                    rel,
                    &name,
                    &cooked,
                    allow_merge,
                    is_local,
                    is_validated,
                    is_no_inherit,
                )?;
                if merged {
                    continue;
                }
                let inherit_count = if is_local { 0 } else { 1 };
                let oid = store_check_constraint(
                    txn,
                    rel,
                    &name,
                    &cooked,
                    is_validated,
                    is_local,
                    inherit_count,
                    is_no_inherit,
                    is_internal,
                )?;
                checks_added = true;
                out.push(CookedConstraint {
                    kind: CookedKind::Check { name },
                    expr: cooked,
                    oid,
                    is_local,
                    inherit_count,
                    is_no_inherit,
                });
            }
        }
    }

    if checks_added {
        let count = current_check_count(&txn.work, rel);
        recompute_check_count(txn, rel, count)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::registrar::{create_cataloged_relation, ColumnSpec, RelationSpec};
    use crate::catalog::storage::FileStorage;
    use crate::catalog::typesys::{BOOL_OID, INT4_OID, TEXT_OID};
    use crate::catalog::{Catalog, CatalogConfig, Persistence, RelKind, PUBLIC_NAMESPACE};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn catalog() -> (Catalog, tempfile::TempDir) {
        let tmp = tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(tmp.path()).unwrap());
        (Catalog::new(storage, CatalogConfig::default()), tmp)
    }

    fn make_table(txn: &mut CatalogTransaction<'_>, name: &str) -> Oid {
        let spec = RelationSpec::table(
            name,
            PUBLIC_NAMESPACE,
            vec![
                ColumnSpec::new("a", INT4_OID),
                ColumnSpec::new("b", INT4_OID),
            ],
        );
        create_cataloged_relation(txn, spec).unwrap()
    }

    fn check_expr(attnum: i16) -> Expr {
        Expr::BinaryOp {
            op: ">".into(),
            left: Box::new(Expr::column(attnum, INT4_OID)),
            right: Box::new(Expr::int_const(0, INT4_OID)),
            return_type: BOOL_OID,
        }
    }

    #[test]
    fn default_with_column_ref_rejected() {
        let types = TypeRegistry::builtin();
        let raw = Expr::column(1, INT4_OID);
        assert!(cook_default(&types, raw, Some(INT4_OID), -1).is_err());
        let ok = cook_default(&types, Expr::int_const(42, INT4_OID), Some(INT4_OID), -1).unwrap();
        assert!(!ok.contains_column_refs());
    }

    #[test]
    fn check_must_be_boolean() {
        let types = TypeRegistry::builtin();
        assert!(cook_check(&types, Expr::text_const("x", TEXT_OID), "t").is_err());
        assert!(cook_check(&types, check_expr(1), "t").is_ok());
    }

    #[test]
    fn check_count_tracks_stored_constraints() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let rel = make_table(&mut txn, "t1");
        add_new_constraints(
            &mut txn,
            rel,
            vec![RawConstraint::Check {
                name: "t1_a_check".into(),
                raw: check_expr(1),
                is_no_inherit: false,
                is_validated: true,
            }],
            false,
            true,
            false,
        )
        .unwrap();
        assert_eq!(txn.work.class(rel).unwrap().check_count, 1);
    }

    #[test]
    fn identical_constraint_merges_instead_of_erroring() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let rel = make_table(&mut txn, "t2");
        let mk = |validated: bool| RawConstraint::Check {
            name: "positive_a".into(),
            raw: check_expr(1),
            is_no_inherit: false,
            is_validated: validated,
        };
        add_new_constraints(&mut txn, rel, vec![mk(true)], true, false, false).unwrap();
        // inherited arrival of the identical constraint is a merge
        let stored = add_new_constraints(&mut txn, rel, vec![mk(true)], true, false, false).unwrap();
        assert!(stored.is_empty());
        let row = txn.work.constraints_of(rel)[0];
        assert_eq!(row.inherit_count, 2);
    }

    #[test]
    fn different_expression_same_name_is_duplicate() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let rel = make_table(&mut txn, "t3");
        add_new_constraints(
            &mut txn,
            rel,
            vec![RawConstraint::Check { name: "c".into(), raw: check_expr(1), is_no_inherit: false, is_validated: true }],
            true,
            true,
            false,
        )
        .unwrap();
        let err = add_new_constraints(
            &mut txn,
            rel,
            vec![RawConstraint::Check { name: "c".into(), raw: check_expr(2), is_no_inherit: false, is_validated: true }],
            true,
            true,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate { .. }));
    }

    #[test]
    fn local_arrival_promotes_inherited_constraint() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let rel = make_table(&mut txn, "t4");
        // purely inherited first
        add_new_constraints(
            &mut txn,
            rel,
            vec![RawConstraint::Check { name: "c".into(), raw: check_expr(1), is_no_inherit: false, is_validated: true }],
            true,
            false,
            false,
        )
        .unwrap();
        assert!(!txn.work.constraints_of(rel)[0].is_local);
        // local definition of the same constraint arrives
        add_new_constraints(
            &mut txn,
            rel,
            vec![RawConstraint::Check { name: "c".into(), raw: check_expr(1), is_no_inherit: false, is_validated: true }],
            true,
            true,
            false,
        )
        .unwrap();
        assert!(txn.work.constraints_of(rel)[0].is_local);
    }

    #[test]
    fn missing_value_backfill_skips_volatile() {
        let (cat, _tmp) = catalog();
        let mut txn = cat.begin();
        let rel = make_table(&mut txn, "t5");
        let det = cook_default(&txn.work.types, Expr::int_const(7, INT4_OID), Some(INT4_OID), -1).unwrap();
        store_default(&mut txn, rel, 1, &det, false, true).unwrap();
        assert_eq!(
            txn.work.attributes.get(&(rel, 1)).unwrap().missing_value.as_deref(),
            Some("7")
        );

        let vol = Expr::FuncCall { name: "random".into(), args: vec![], return_type: INT4_OID, volatile: true };
        let vol = cook_default(&txn.work.types, vol, Some(INT4_OID), -1).unwrap();
        store_default(&mut txn, rel, 2, &vol, false, true).unwrap();
        assert!(txn.work.attributes.get(&(rel, 2)).unwrap().missing_value.is_none());
    }
}
