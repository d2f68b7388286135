//! Cross-object dependency edges.
//! Records who depends on whom so that dropping an object can cascade into
//! its auto/internal dependents, and refuse when a normal dependent exists
//! under RESTRICT behavior.

use serde::{Deserialize, Serialize};

use super::typesys::Oid;
use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjClass {
    Relation,
    Type,
    Constraint,
    Default,
    Distribution,
    Collation,
    Namespace,
    Role,
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAddress {
    pub class: ObjClass,
    pub oid: Oid,
    /// Column number for column-level addresses, 0 otherwise.
    pub sub_id: i16,
}

impl ObjectAddress {
    pub fn relation(oid: Oid) -> Self {
        ObjectAddress { class: ObjClass::Relation, oid, sub_id: 0 }
    }

    /// A single column of a relation: same class and oid as the relation,
    /// with the attribute number in `sub_id`. Dropping or forgetting the
    /// whole relation therefore covers its column-level edges.
    pub fn column(rel: Oid, attnum: i16) -> Self {
        ObjectAddress { class: ObjClass::Relation, oid: rel, sub_id: attnum }
    }

    pub fn of(class: ObjClass, oid: Oid) -> Self {
        ObjectAddress { class, oid, sub_id: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Dependent can be dropped separately; blocks RESTRICT drops of the referenced.
    Normal,
    /// Dependent is an implementation detail of the referenced; dropped with it,
    /// never alone.
    Internal,
    /// Dependent is dropped automatically when the referenced goes away.
    Auto,
    /// Dependent belongs to an extension.
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropBehavior {
    Restrict,
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub dependent: ObjectAddress,
    pub referenced: ObjectAddress,
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    pub fn record(&mut self, dependent: ObjectAddress, referenced: ObjectAddress, kind: DependencyKind) {
        self.edges.push(DependencyEdge { dependent, referenced, kind });
    }

    pub fn dependencies_of(&self, dependent: ObjectAddress) -> Vec<&DependencyEdge> {
        self.edges.iter().filter(|e| e.dependent == dependent).collect()
    }

    pub fn dependents_of(&self, referenced: ObjectAddress) -> Vec<&DependencyEdge> {
        self.edges.iter().filter(|e| e.referenced == referenced).collect()
    }

    /// Also matches column-level addresses of a relation when asked about
    /// the whole relation.
    fn dependents_of_object(&self, referenced: ObjectAddress) -> Vec<&DependencyEdge> {
        self.edges
            .iter()
            .filter(|e| {
                e.referenced == referenced
                    || (referenced.sub_id == 0
                        && e.referenced.class == referenced.class
                        && e.referenced.oid == referenced.oid)
            })
            .collect()
    }

    /// Remove every edge touching the given object (either side).
    pub fn forget_object(&mut self, addr: ObjectAddress) {
        self.edges.retain(|e| {
            !(e.dependent.class == addr.class && e.dependent.oid == addr.oid)
                && !(e.referenced.class == addr.class && e.referenced.oid == addr.oid)
        });
    }

    /// Compute the ordered closure of objects to delete when `target` is
    /// dropped: dependents first, the target last. RESTRICT refuses when a
    /// Normal-kind dependent exists; Internal/Auto dependents always ride
    /// along.
    pub fn cascading_deletion_order(
        &self,
        target: ObjectAddress,
        behavior: DropBehavior,
    ) -> CatalogResult<Vec<ObjectAddress>> {
        let mut ordered: Vec<ObjectAddress> = Vec::new();
        let mut visiting: Vec<ObjectAddress> = Vec::new();
        self.visit(target, target, behavior, &mut ordered, &mut visiting)?;
        Ok(ordered)
    }

    fn visit(
        &self,
        root: ObjectAddress,
        current: ObjectAddress,
        behavior: DropBehavior,
        ordered: &mut Vec<ObjectAddress>,
        visiting: &mut Vec<ObjectAddress>,
    ) -> CatalogResult<()> {
        if ordered.contains(&current) || visiting.contains(&current) {
            return Ok(());
        }
        visiting.push(current);
        for edge in self.dependents_of_object(current) {
            match edge.kind {
                DependencyKind::Normal | DependencyKind::Extension => {
                    if behavior == DropBehavior::Restrict && edge.dependent != root {
                        visiting.pop();
                        return Err(CatalogError::definition(
                            "dependent_objects_exist".into(),
                            format!(
                                "cannot drop object {:?}/{} because other objects depend on it",
                                current.class, current.oid
                            ),
                        ));
                    }
                    self.visit(root, edge.dependent, behavior, ordered, visiting)?;
                }
                DependencyKind::Internal | DependencyKind::Auto => {
                    self.visit(root, edge.dependent, behavior, ordered, visiting)?;
                }
            }
        }
        visiting.pop();
        ordered.push(current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_dependents_cascade_under_restrict() {
        let mut g = DependencyGraph::default();
        let rel = ObjectAddress::relation(100);
        let dist = ObjectAddress::of(ObjClass::Distribution, 100);
        g.record(dist, rel, DependencyKind::Auto);
        let order = g.cascading_deletion_order(rel, DropBehavior::Restrict).unwrap();
        assert_eq!(order, vec![dist, rel]);
    }

    #[test]
    fn normal_dependents_block_restrict() {
        let mut g = DependencyGraph::default();
        let rel = ObjectAddress::relation(100);
        let view = ObjectAddress::relation(200);
        g.record(view, rel, DependencyKind::Normal);
        assert!(g.cascading_deletion_order(rel, DropBehavior::Restrict).is_err());
        let order = g.cascading_deletion_order(rel, DropBehavior::Cascade).unwrap();
        assert_eq!(order, vec![view, rel]);
    }

    #[test]
    fn column_level_edges_count_for_whole_relation() {
        let mut g = DependencyGraph::default();
        let col = ObjectAddress::column(100, 2);
        let def = ObjectAddress::of(ObjClass::Default, 900);
        g.record(def, col, DependencyKind::Auto);
        let order = g.cascading_deletion_order(ObjectAddress::relation(100), DropBehavior::Restrict).unwrap();
        assert!(order.contains(&def));
    }

    #[test]
    fn forget_relation_scrubs_column_level_edges() {
        let mut g = DependencyGraph::default();
        let col = ObjectAddress::column(100, 2);
        let def = ObjectAddress::of(ObjClass::Default, 900);
        g.record(def, col, DependencyKind::Auto);
        g.forget_object(ObjectAddress::relation(100));
        assert!(g.dependents_of(col).is_empty());
        assert!(g.dependencies_of(def).is_empty());
    }

    #[test]
    fn forget_object_scrubs_both_sides() {
        let mut g = DependencyGraph::default();
        let rel = ObjectAddress::relation(100);
        let ty = ObjectAddress::of(ObjClass::Type, 500);
        g.record(rel, ty, DependencyKind::Normal);
        g.record(ty, rel, DependencyKind::Internal);
        g.forget_object(rel);
        assert!(g.dependencies_of(rel).is_empty());
        assert!(g.dependents_of(ty).is_empty());
    }
}
