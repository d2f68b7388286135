//! Relation teardown: drop and truncate.
//! --------------------------------------
//! Drop removes the relation's catalog rows in a fixed order and schedules
//! the physical unlink for commit time; the exclusive locks taken here are
//! held until the enclosing transaction finishes, which is what lets the
//! deferred unlink stay invisible to concurrent transactions.

use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use super::builder;
use super::dependency::{DependencyKind, ObjClass, ObjectAddress, DropBehavior};
use super::relation::RelKind;
use super::typesys::Oid;
use super::CatalogTransaction;

/// Drop a cataloged relation and everything that depends on it.
pub fn drop_cataloged_relation(
    txn: &mut CatalogTransaction<'_>,
    rel: Oid,
    behavior: DropBehavior,
) -> CatalogResult<()> {
    txn.lock_exclusive(rel)?;
    let class = txn.work.class(rel)?.clone();

    // Partitions: concurrent queries may hold a cached partition set derived
    // from the parent, so the parent (and a distinct default partition) are
    // locked and their descriptors force-invalidated after this commits.
    let mut revalidate: Vec<Oid> = Vec::new();
    if let Some(parent) = txn.work.parent_of(rel) {
        let parent_is_partitioned = txn
            .work
            .classes
            .get(&parent)
            .map(|c| c.kind == RelKind::PartitionedTable)
            .unwrap_or(false);
        if parent_is_partitioned {
            txn.lock_exclusive(parent)?;
            revalidate.push(parent);
            if let Some(pk) = txn.work.partition_keys.get(&parent) {
                if let Some(default) = pk.default_partition {
                    if default != rel {
                        txn.lock_exclusive(default)?;
                        revalidate.push(default);
                    }
                }
            }
        }
    }

    // Other sessions are excluded by the lock; only this session's own
    // cursors/triggers can still reference the relation.
    if txn.session.in_use(rel) {
        return Err(CatalogError::definition(
            "object_in_use".into(),
            format!(
                "cannot drop \"{}\" because it is in use by active queries in this session",
                class.name
            ),
        ));
    }

    let order = txn
        .work
        .deps
        .cascading_deletion_order(ObjectAddress::relation(rel), behavior)?;
    for addr in order {
        match addr.class {
            ObjClass::Constraint => {
                txn.work.constraints.remove(&addr.oid);
                txn.work.deps.forget_object(addr);
            }
            ObjClass::Default => {
                txn.work.defaults.remove(&addr.oid);
                txn.work.deps.forget_object(addr);
            }
            ObjClass::Distribution => {
                txn.work.distributions.remove(&addr.oid);
                txn.work.deps.forget_object(addr);
            }
            ObjClass::Relation => {
                // Dependent relations (the target last) get the full ordered
                // teardown; their row types vanish with them.
                remove_relation_rows(txn, addr.oid)?;
            }
            // Row/array types are removed alongside their relation below;
            // other classes are externally owned and never dropped from here.
            _ => {}
        }
    }

    for oid in revalidate {
        txn.invalidate_relcache(oid);
    }
    Ok(())
}

/// The ordered per-relation teardown: auxiliary rows, storage scheduling,
/// caches, links, statistics, attributes, and the class row last.
fn remove_relation_rows(txn: &mut CatalogTransaction<'_>, rel: Oid) -> CatalogResult<()> {
    let Some(class) = txn.work.classes.get(&rel).cloned() else {
        // Already gone as part of this cascade.
        return Ok(());
    };
    debug!(rel, name = %class.name, kind = class.kind.as_str(), "removing relation");

    if class.kind == RelKind::ForeignTable {
        txn.work.foreign_tables.remove(&rel);
    }
    txn.work.partition_keys.remove(&rel);

    // If this relation was the recorded default partition of its parent,
    // that linkage is now stale.
    if let Some(parent) = txn.work.parent_of(rel) {
        if let Some(pk) = txn.work.partition_keys.get_mut(&parent) {
            if pk.default_partition == Some(rel) {
                pk.default_partition = None;
            }
        }
    }

    if class.kind.has_storage() {
        let descriptor = txn.work.descriptor_of(rel)?;
        txn.schedule_storage_removal(builder::physical_locator(&descriptor));
    }

    txn.invalidate_relcache(rel);
    txn.work.on_commit.remove(&rel);
    txn.work.inherits.retain(|i| i.child != rel && i.parent != rel);
    let stat_keys: Vec<(Oid, i16)> = txn
        .work
        .statistics
        .range((rel, i16::MIN)..=(rel, i16::MAX))
        .map(|(k, _)| *k)
        .collect();
    for k in stat_keys {
        txn.work.statistics.remove(&k);
    }
    let att_keys: Vec<(Oid, i16)> = txn
        .work
        .attributes
        .range((rel, i16::MIN)..=(rel, i16::MAX))
        .map(|(k, _)| *k)
        .collect();
    for k in att_keys {
        txn.work.attributes.remove(&k);
    }
    txn.work.types.remove_row_type(rel);
    txn.work.types.forget_composite_members(rel);
    txn.work.deps.forget_object(ObjectAddress::relation(rel));
    txn.work.classes.remove(&rel);
    Ok(())
}

/// Truncate the storage of each listed relation to zero blocks and reset
/// its size counters. Refused when a relation outside the set still holds a
/// normal dependency on a member (the foreign-key analogue of the original
/// engine's truncate sanity check).
pub fn truncate_relations(txn: &mut CatalogTransaction<'_>, rels: &[Oid]) -> CatalogResult<()> {
    for &rel in rels {
        txn.lock_exclusive(rel)?;
        let class = txn.work.class(rel)?;
        if !class.kind.has_storage() {
            return Err(CatalogError::definition(
                "cannot_truncate".into(),
                format!("\"{}\" is not a table and cannot be truncated", class.name),
            ));
        }
        let blocked = txn
            .work
            .deps
            .dependents_of(ObjectAddress::relation(rel))
            .iter()
            .any(|e| {
                e.kind == DependencyKind::Normal
                    && e.dependent.class == ObjClass::Relation
                    && !rels.contains(&e.dependent.oid)
            });
        if blocked {
            let name = txn.work.class(rel)?.name.clone();
            return Err(CatalogError::definition(
                "truncate_referenced".into(),
                format!("cannot truncate \"{}\" because another relation references it", name),
            ));
        }
    }
    for &rel in rels {
        let descriptor = txn.work.descriptor_of(rel)?;
        txn.storage().truncate(builder::physical_locator(&descriptor), 0)?;
        let class = txn.work.class_mut(rel)?;
        class.pages = 0;
        class.tuples = 0;
        class.visible_pages = 0;
        txn.invalidate_relcache(rel);
    }
    Ok(())
}
