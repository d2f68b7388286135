//! Distribution registrar (cluster builds).
//! -----------------------------------------
//! Decides how a new relation's rows are spread across data nodes: either
//! inferred (first hash-distributable column, else round-robin fallback) or
//! driven by an explicit clause. The computed strategy is persisted as a
//! class-distribution row with an auto dependency edge back onto the
//! relation, so dropping the relation takes the record along.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use super::cluster::NodeGroup;
use super::dependency::{DependencyKind, ObjClass, ObjectAddress};
use super::relation::ColumnDescriptor;
use super::sysattr;
use super::typesys::{Oid, DATE_OID, TIMESTAMP_OID};
use super::{CatalogConfig, CatalogState, CatalogTransaction, PartitionInterval, PartitionStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    Hash,
    Modulo,
    Shard,
    Replicate,
    RoundRobin,
}

impl DistributionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionStrategy::Hash => "hash",
            DistributionStrategy::Modulo => "modulo",
            DistributionStrategy::Shard => "shard",
            DistributionStrategy::Replicate => "replication",
            DistributionStrategy::RoundRobin => "roundrobin",
        }
    }
}

/// User-supplied DISTRIBUTE BY clause, pre-parsed.
#[derive(Debug, Clone, Default)]
pub struct DistributionClause {
    pub strategy: Option<DistributionStrategy>,
    pub columns: Vec<String>,
    pub node_group: Option<String>,
    /// Cold group of a hot/cold shard pair.
    pub cold_node_group: Option<String>,
    /// Explicit node-name list; wins over groups when present.
    pub nodes: Vec<String>,
    pub hash_algorithm: Option<u32>,
    pub bucket_count: Option<u32>,
}

/// Computed distribution choice, before node resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionItems {
    pub strategy: DistributionStrategy,
    pub primary_column: Option<i16>,
    pub secondary_column: Option<i16>,
    pub hash_algorithm: u32,
    pub bucket_count: u32,
}

/// Persisted class-distribution row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRow {
    pub relation: Oid,
    pub strategy: DistributionStrategy,
    pub primary_column: Option<i16>,
    pub secondary_column: Option<i16>,
    pub hash_algorithm: u32,
    pub bucket_count: u32,
    /// Target node set, sorted by node name at resolution time.
    pub nodes: Vec<Oid>,
}

/// Validation policy for the secondary (hot/cold) shard column. The
/// underlying requirement is that the distribution key aligns with a
/// time-partition boundary; deployments with different partitioning
/// conventions supply their own policy.
pub trait SecondaryKeyPolicy {
    fn validate(
        &self,
        state: &CatalogState,
        relation: Oid,
        column: &ColumnDescriptor,
    ) -> CatalogResult<()>;
}

/// Default policy: the secondary column must be the relation's range
/// partition column, with a day/month/year interval anchored at midnight,
/// the first of the month, or January 1 respectively.
pub struct TimeAnchorPolicy;

impl SecondaryKeyPolicy for TimeAnchorPolicy {
    fn validate(
        &self,
        state: &CatalogState,
        relation: Oid,
        column: &ColumnDescriptor,
    ) -> CatalogResult<()> {
        if column.type_oid != DATE_OID && column.type_oid != TIMESTAMP_OID {
            return Err(CatalogError::definition(
                "invalid_secondary_column".into(),
                format!("secondary distribution column \"{}\" must be a date or timestamp", column.name),
            ));
        }
        let pk = state.partition_keys.get(&relation).ok_or_else(|| {
            CatalogError::definition(
                "secondary_without_partition".into(),
                "hot/cold distribution requires a range-partitioned relation".to_string(),
            )
        })?;
        if pk.strategy != PartitionStrategy::Range || pk.column != column.attnum {
            return Err(CatalogError::definition(
                "secondary_not_partition_column".into(),
                format!(
                    "secondary distribution column \"{}\" must be the range partition column",
                    column.name
                ),
            ));
        }
        let interval = pk.interval.ok_or_else(|| {
            CatalogError::definition(
                "missing_partition_interval".into(),
                "hot/cold distribution requires an interval-partitioned relation".to_string(),
            )
        })?;
        let anchor_ms = pk.anchor_ms.ok_or_else(|| {
            CatalogError::definition(
                "missing_partition_anchor".into(),
                "partition interval has no anchor timestamp".to_string(),
            )
        })?;
        let anchor: DateTime<Utc> = DateTime::from_timestamp_millis(anchor_ms).ok_or_else(|| {
            CatalogError::definition(
                "invalid_partition_anchor".into(),
                format!("partition anchor {} is out of range", anchor_ms),
            )
        })?;
        let midnight = anchor.hour() == 0 && anchor.minute() == 0 && anchor.second() == 0;
        let aligned = match interval {
            PartitionInterval::OneDay => midnight,
            PartitionInterval::OneMonth => midnight && anchor.day() == 1,
            PartitionInterval::OneYear => midnight && anchor.day() == 1 && anchor.month() == 1,
        };
        if !aligned {
            return Err(CatalogError::validation_hint(
                "misaligned_partition_anchor".to_string(),
                format!("partition anchor {} does not align with the partition interval", anchor),
                "Anchor a 1-day interval at midnight, 1-month at the first of a month, 1-year at January 1.".to_string(),
            ));
        }
        Ok(())
    }
}

fn resolve_user_column<'a>(
    columns: &'a [ColumnDescriptor],
    name: &str,
) -> CatalogResult<&'a ColumnDescriptor> {
    if sysattr::lookup_by_name(name, true).is_some() {
        return Err(CatalogError::definition(
            "system_distribution_column".into(),
            format!("cannot distribute by system column \"{}\"", name),
        ));
    }
    columns
        .iter()
        .filter(|c| !c.is_dropped && c.attnum > 0)
        .find(|c| c.name == name)
        .ok_or_else(|| {
            CatalogError::not_found(
                "undefined_column".into(),
                format!("distribution column \"{}\" does not exist", name),
            )
        })
}

/// Compute (strategy, columns, hash parameters) for a new relation.
pub fn compute_distribution_items(
    state: &CatalogState,
    config: &CatalogConfig,
    relation: Oid,
    clause: Option<&DistributionClause>,
    columns: &[ColumnDescriptor],
    policy: &dyn SecondaryKeyPolicy,
) -> CatalogResult<DistributionItems> {
    let hash_algorithm = clause.and_then(|c| c.hash_algorithm).unwrap_or(config.default_hash_algorithm);
    let bucket_count = clause.and_then(|c| c.bucket_count).unwrap_or(config.default_bucket_count);

    let explicit = clause.and_then(|c| c.strategy);
    let Some(strategy) = explicit else {
        // Inference: first hash-distributable user column wins.
        let candidate = columns
            .iter()
            .filter(|c| c.attnum > 0 && !c.is_dropped)
            .find(|c| state.types.is_hash_distributable(c.type_oid));
        return match candidate {
            Some(col) => Ok(DistributionItems {
                strategy: DistributionStrategy::Hash,
                primary_column: Some(col.attnum),
                secondary_column: None,
                hash_algorithm,
                bucket_count,
            }),
            None if config.round_robin_fallback => Ok(DistributionItems {
                strategy: DistributionStrategy::RoundRobin,
                primary_column: None,
                secondary_column: None,
                hash_algorithm,
                bucket_count,
            }),
            None => Err(CatalogError::definition(
                "no_distribution_column".into(),
                "there is no default distribution column and round-robin fallback is disabled"
                    .to_string(),
            )),
        };
    };

    let named = clause.map(|c| c.columns.as_slice()).unwrap_or(&[]);
    match strategy {
        DistributionStrategy::Replicate | DistributionStrategy::RoundRobin => {
            if !named.is_empty() {
                return Err(CatalogError::definition(
                    "unexpected_distribution_column".into(),
                    format!("{} distribution does not take a column", strategy.as_str()),
                ));
            }
            Ok(DistributionItems {
                strategy,
                primary_column: None,
                secondary_column: None,
                hash_algorithm,
                bucket_count,
            })
        }
        DistributionStrategy::Hash | DistributionStrategy::Modulo => {
            if named.len() != 1 {
                return Err(CatalogError::definition(
                    "invalid_distribution_columns".into(),
                    format!("{} distribution takes exactly one column", strategy.as_str()),
                ));
            }
            let col = resolve_user_column(columns, &named[0])?;
            let admissible = match strategy {
                DistributionStrategy::Hash => state.types.is_hash_distributable(col.type_oid),
                _ => state.types.is_modulo_distributable(col.type_oid),
            };
            if !admissible {
                return Err(CatalogError::definition(
                    "invalid_distribution_type".into(),
                    format!(
                        "column \"{}\" cannot be used for {} distribution because of its type",
                        col.name,
                        strategy.as_str()
                    ),
                ));
            }
            Ok(DistributionItems {
                strategy,
                primary_column: Some(col.attnum),
                secondary_column: None,
                hash_algorithm,
                bucket_count,
            })
        }
        DistributionStrategy::Shard => {
            if named.is_empty() || named.len() > 2 {
                return Err(CatalogError::definition(
                    "invalid_distribution_columns".into(),
                    "shard distribution takes one column, optionally a second for hot/cold"
                        .to_string(),
                ));
            }
            let primary = resolve_user_column(columns, &named[0])?;
            if !state.types.is_hash_distributable(primary.type_oid) {
                return Err(CatalogError::definition(
                    "invalid_distribution_type".into(),
                    format!(
                        "column \"{}\" cannot be used for shard distribution because of its type",
                        primary.name
                    ),
                ));
            }
            let secondary = if named.len() == 2 {
                let col = resolve_user_column(columns, &named[1])?;
                policy.validate(state, relation, col)?;
                Some(col.attnum)
            } else {
                None
            };
            Ok(DistributionItems {
                strategy,
                primary_column: Some(primary.attnum),
                secondary_column: secondary,
                hash_algorithm,
                bucket_count,
            })
        }
    }
}

fn require_shard_ready(group: &NodeGroup) -> CatalogResult<()> {
    if !group.shard_map_initialized {
        return Err(CatalogError::definition(
            "shard_map_uninitialized".into(),
            format!("node group \"{}\" has no initialized shard map", group.name),
        ));
    }
    Ok(())
}

/// Resolve the target node set for a computed distribution. Determinism:
/// every path yields oids sorted by node name, duplicates collapsed.
pub fn resolve_node_set(
    state: &CatalogState,
    clause: Option<&DistributionClause>,
    items: &DistributionItems,
) -> CatalogResult<Vec<Oid>> {
    let shard = items.strategy == DistributionStrategy::Shard;

    if let Some(c) = clause {
        if !c.nodes.is_empty() {
            return state.nodes.resolve_node_names(&c.nodes);
        }
        if let Some(name) = &c.node_group {
            let group = state.nodes.resolve_group_by_name(name)?;
            if shard {
                require_shard_ready(group)?;
                if let Some(cold) = &c.cold_node_group {
                    let cold_group = state.nodes.resolve_group_by_name(cold)?;
                    if cold_group.oid == group.oid {
                        return Err(CatalogError::definition(
                            "hot_cold_same_group".into(),
                            "hot and cold node groups must be distinct".to_string(),
                        ));
                    }
                    require_shard_ready(cold_group)?;
                    let mut nodes = state.nodes.group_members_sorted(group);
                    // a node may belong to both groups; keep its hot slot
                    for n in state.nodes.group_members_sorted(cold_group) {
                        if !nodes.contains(&n) {
                            nodes.push(n);
                        }
                    }
                    return Ok(nodes);
                }
            }
            return Ok(state.nodes.group_members_sorted(group));
        }
    }

    if shard {
        if let Some(group) = state.nodes.default_group() {
            require_shard_ready(group)?;
            return Ok(state.nodes.group_members_sorted(group));
        }
    }
    Ok(state.nodes.all_data_nodes_sorted())
}

/// Persist the computed distribution and its dependency edge.
pub fn register_distribution(
    txn: &mut CatalogTransaction<'_>,
    relation: Oid,
    items: DistributionItems,
    nodes: Vec<Oid>,
) -> CatalogResult<()> {
    debug!(rel = relation, strategy = items.strategy.as_str(), nodes = nodes.len(), "registering distribution");
    txn.work.distributions.insert(
        relation,
        DistributionRow {
            relation,
            strategy: items.strategy,
            primary_column: items.primary_column,
            secondary_column: items.secondary_column,
            hash_algorithm: items.hash_algorithm,
            bucket_count: items.bucket_count,
            nodes,
        },
    );
    txn.work.deps.record(
        ObjectAddress::of(ObjClass::Distribution, relation),
        ObjectAddress::relation(relation),
        DependencyKind::Auto,
    );
    Ok(())
}

/// Compute + resolve + register, as driven by the creation protocol.
pub fn create_distribution(
    txn: &mut CatalogTransaction<'_>,
    relation: Oid,
    clause: Option<&DistributionClause>,
    columns: &[ColumnDescriptor],
) -> CatalogResult<()> {
    let items = compute_distribution_items(
        &txn.work,
        txn.config(),
        relation,
        clause,
        columns,
        &TimeAnchorPolicy,
    )?;
    let nodes = resolve_node_set(&txn.work, clause, &items)?;
    register_distribution(txn, relation, items, nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::relation::AlignKind;
    use crate::catalog::typesys::{FLOAT8_OID, INT4_OID, TEXT_OID};
    use crate::catalog::{PartitionKeyRow, PUBLIC_NAMESPACE};
    use chrono::TimeZone;

    fn col(attnum: i16, name: &str, type_oid: Oid) -> ColumnDescriptor {
        ColumnDescriptor {
            relation: 100,
            name: name.into(),
            type_oid,
            typmod: -1,
            collation: None,
            attnum,
            len: 4,
            align: AlignKind::Int,
            not_null: false,
            has_default: false,
            is_dropped: false,
            inherit_count: 0,
            is_local: true,
            missing_value: None,
        }
    }

    fn state() -> CatalogState {
        let mut s = CatalogState::default();
        s.nodes.add_node(1, "dn2", true);
        s.nodes.add_node(2, "dn1", true);
        s.nodes.add_group(10, "hot", vec![1], true);
        s.nodes.add_group(11, "cold", vec![2], true);
        s.nodes.add_group(12, "raw", vec![2], false);
        s
    }

    fn items(
        s: &CatalogState,
        clause: Option<&DistributionClause>,
        cols: &[ColumnDescriptor],
    ) -> CatalogResult<DistributionItems> {
        compute_distribution_items(s, &CatalogConfig::default(), 100, clause, cols, &TimeAnchorPolicy)
    }

    #[test]
    fn inference_picks_first_hashable() {
        let s = state();
        // float8 is not hashable; position 3 holds the first hashable column
        let cols = vec![col(1, "x", FLOAT8_OID), col(2, "y", FLOAT8_OID), col(3, "id", INT4_OID)];
        let it = items(&s, None, &cols).unwrap();
        assert_eq!(it.strategy, DistributionStrategy::Hash);
        assert_eq!(it.primary_column, Some(3));
        assert_eq!(it.hash_algorithm, 1);
        assert_eq!(it.bucket_count, 16384);
    }

    #[test]
    fn inference_falls_back_to_round_robin() {
        let s = state();
        let cols = vec![col(1, "x", FLOAT8_OID)];
        let it = items(&s, None, &cols).unwrap();
        assert_eq!(it.strategy, DistributionStrategy::RoundRobin);

        let mut cfg = CatalogConfig::default();
        cfg.round_robin_fallback = false;
        let err =
            compute_distribution_items(&s, &cfg, 100, None, &cols, &TimeAnchorPolicy).unwrap_err();
        assert!(err.message().contains("no default distribution column"));
    }

    #[test]
    fn system_column_rejected() {
        let s = state();
        let clause = DistributionClause {
            strategy: Some(DistributionStrategy::Hash),
            columns: vec!["ctid".into()],
            ..Default::default()
        };
        let err = items(&s, Some(&clause), &[col(1, "id", INT4_OID)]).unwrap_err();
        assert!(err.message().contains("system column"));
    }

    #[test]
    fn replicate_takes_no_columns() {
        let s = state();
        let clause = DistributionClause {
            strategy: Some(DistributionStrategy::Replicate),
            columns: vec!["id".into()],
            ..Default::default()
        };
        assert!(items(&s, Some(&clause), &[col(1, "id", INT4_OID)]).is_err());
    }

    #[test]
    fn shard_caps_at_two_columns() {
        let s = state();
        let cols = vec![col(1, "a", INT4_OID), col(2, "b", DATE_OID), col(3, "c", INT4_OID)];
        let clause = DistributionClause {
            strategy: Some(DistributionStrategy::Shard),
            columns: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        assert!(items(&s, Some(&clause), &cols).is_err());
    }

    #[test]
    fn hot_cold_secondary_validated_against_partition_anchor() {
        let mut s = state();
        let cols = vec![col(1, "a", INT4_OID), col(2, "day", DATE_OID)];
        let clause = DistributionClause {
            strategy: Some(DistributionStrategy::Shard),
            columns: vec!["a".into(), "day".into()],
            node_group: Some("hot".into()),
            cold_node_group: Some("cold".into()),
            ..Default::default()
        };
        // no partition key at all
        assert!(items(&s, Some(&clause), &cols).is_err());

        // month interval anchored mid-month: rejected with a hint
        let mid_month = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap().timestamp_millis();
        s.partition_keys.insert(
            100,
            PartitionKeyRow {
                relation: 100,
                strategy: PartitionStrategy::Range,
                column: 2,
                interval: Some(PartitionInterval::OneMonth),
                anchor_ms: Some(mid_month),
                default_partition: None,
            },
        );
        let err = items(&s, Some(&clause), &cols).unwrap_err();
        assert!(err.hint().is_some());

        // first-of-month midnight: accepted
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().timestamp_millis();
        s.partition_keys.get_mut(&100).unwrap().anchor_ms = Some(first);
        let it = items(&s, Some(&clause), &cols).unwrap();
        assert_eq!(it.secondary_column, Some(2));
    }

    #[test]
    fn node_resolution_is_deterministic() {
        let s = state();
        let it = DistributionItems {
            strategy: DistributionStrategy::Hash,
            primary_column: Some(1),
            secondary_column: None,
            hash_algorithm: 1,
            bucket_count: 16384,
        };
        // default: all data nodes sorted by name (dn1 = oid 2 before dn2 = oid 1)
        assert_eq!(resolve_node_set(&s, None, &it).unwrap(), vec![2, 1]);

        let clause = DistributionClause {
            nodes: vec!["dn2".into(), "dn1".into(), "dn2".into()],
            ..Default::default()
        };
        assert_eq!(resolve_node_set(&s, Some(&clause), &it).unwrap(), vec![2, 1]);
    }

    #[test]
    fn shard_requires_initialized_map() {
        let s = state();
        let it = DistributionItems {
            strategy: DistributionStrategy::Shard,
            primary_column: Some(1),
            secondary_column: None,
            hash_algorithm: 1,
            bucket_count: 16384,
        };
        let clause = DistributionClause { node_group: Some("raw".into()), ..Default::default() };
        let err = resolve_node_set(&s, Some(&clause), &it).unwrap_err();
        assert!(err.message().contains("shard map"));

        let ok = DistributionClause { node_group: Some("hot".into()), ..Default::default() };
        assert_eq!(resolve_node_set(&s, Some(&ok), &it).unwrap(), vec![1]);
    }

    #[test]
    fn overlapping_hot_and_cold_groups_collapse_shared_nodes() {
        let mut s = CatalogState::default();
        s.nodes.add_node(1, "dn_b", true);
        s.nodes.add_node(2, "dn_a", true);
        s.nodes.add_node(3, "dn_c", true);
        s.nodes.add_group(10, "hot", vec![1, 2], true);
        s.nodes.add_group(11, "cold", vec![1, 3], true);
        let it = DistributionItems {
            strategy: DistributionStrategy::Shard,
            primary_column: Some(1),
            secondary_column: Some(2),
            hash_algorithm: 1,
            bucket_count: 16384,
        };
        let clause = DistributionClause {
            node_group: Some("hot".into()),
            cold_node_group: Some("cold".into()),
            ..Default::default()
        };
        // dn_b sits in both groups; it appears once, in its hot position
        let nodes = resolve_node_set(&s, Some(&clause), &it).unwrap();
        assert_eq!(nodes, vec![2, 1, 3]);
    }

    #[test]
    fn hot_and_cold_groups_must_differ() {
        let s = state();
        let it = DistributionItems {
            strategy: DistributionStrategy::Shard,
            primary_column: Some(1),
            secondary_column: Some(2),
            hash_algorithm: 1,
            bucket_count: 16384,
        };
        let clause = DistributionClause {
            node_group: Some("hot".into()),
            cold_node_group: Some("hot".into()),
            ..Default::default()
        };
        assert!(resolve_node_set(&s, Some(&clause), &it).is_err());
    }

    #[test]
    fn end_to_end_register_records_dependency() {
        use crate::catalog::storage::FileStorage;
        use crate::catalog::Catalog;
        use crate::catalog::registrar::{create_cataloged_relation, ColumnSpec, RelationSpec};
        use std::sync::Arc;
        use tempfile::tempdir;

        let tmp = tempdir().unwrap();
        let cat = Catalog::new(
            Arc::new(FileStorage::new(tmp.path()).unwrap()),
            CatalogConfig::default(),
        );
        cat.with_state_mut(|s| {
            s.nodes.add_node(1, "dn1", true);
        });
        let mut txn = cat.begin();
        let rel = create_cataloged_relation(
            &mut txn,
            RelationSpec::table(
                "t",
                PUBLIC_NAMESPACE,
                vec![ColumnSpec::new("a", INT4_OID), ColumnSpec::text("b")],
            ),
        )
        .unwrap();
        let row = txn.work.distributions.get(&rel).unwrap();
        assert_eq!(row.strategy, DistributionStrategy::Hash);
        assert_eq!(row.primary_column, Some(1));
        assert_eq!(row.nodes, vec![1]);
        let deps = txn.work.deps.dependents_of(ObjectAddress::relation(rel));
        assert!(deps.iter().any(|e| e.dependent.class == ObjClass::Distribution));
    }

    #[test]
    fn text_column_not_first_choice_when_unhashable_types_lead() {
        let s = state();
        // text is hashable in the registry, so it wins at position 1
        let cols = vec![col(1, "name", TEXT_OID), col(2, "id", INT4_OID)];
        let it = items(&s, None, &cols).unwrap();
        assert_eq!(it.primary_column, Some(1));
    }
}
