//! Type system collaborator for the catalog registrar.
//! ----------------------------------------------------
//! Holds the type entries the relation creation protocol consults: built-in
//! scalar types, row types created alongside cataloged relations, and their
//! companion array types. Also hosts the recursive column-type admissibility
//! check, which threads an immutable set of "currently expanding" composite
//! ids through the recursion instead of a global list.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

pub type Oid = u32;

pub const INVALID_OID: Oid = 0;

// Well-known built-in type oids, numbered as in the original engine so that
// stored expression trees stay recognizable.
pub const BOOL_OID: Oid = 16;
pub const INT2_OID: Oid = 21;
pub const INT4_OID: Oid = 23;
pub const INT8_OID: Oid = 20;
pub const FLOAT8_OID: Oid = 701;
pub const NAME_OID: Oid = 19;
pub const TEXT_OID: Oid = 25;
pub const DATE_OID: Oid = 1082;
pub const TIMESTAMP_OID: Oid = 1114;
pub const UNKNOWN_OID: Oid = 705;
pub const ANY_OID: Oid = 2276;
pub const ANYARRAY_OID: Oid = 2277;
pub const TRIGGER_OID: Oid = 2279;

/// Default collation oid; the "pinned" collation that never gets a
/// dependency edge recorded for it.
pub const DEFAULT_COLLATION_OID: Oid = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Base,
    Composite,
    Domain,
    Enum,
    Pseudo,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeEntry {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    pub kind: TypeKind,
    /// For arrays: the element type. For domains: unset (see `base_type`).
    pub element_type: Option<Oid>,
    /// For domains: the underlying base type.
    pub base_type: Option<Oid>,
    /// Row types point back at the relation that owns them.
    pub relation: Option<Oid>,
    pub collatable: bool,
    /// Distribution admissibility flags.
    pub hashable: bool,
    pub modulo_able: bool,
}

impl TypeEntry {
    fn scalar(oid: Oid, name: &str, hashable: bool, collatable: bool) -> TypeEntry {
        TypeEntry {
            oid,
            name: name.to_string(),
            namespace: 11, // pg_catalog
            kind: TypeKind::Base,
            element_type: None,
            base_type: None,
            relation: None,
            collatable,
            hashable,
            modulo_able: hashable,
        }
    }

    fn pseudo(oid: Oid, name: &str) -> TypeEntry {
        TypeEntry {
            oid,
            name: name.to_string(),
            namespace: 11,
            kind: TypeKind::Pseudo,
            element_type: None,
            base_type: None,
            relation: None,
            collatable: false,
            hashable: false,
            modulo_able: false,
        }
    }
}

/// The registry of known types. Cloned wholesale into catalog transaction
/// snapshots; entries are small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRegistry {
    entries: BTreeMap<Oid, TypeEntry>,
    /// Mirrors the attribute rows of composite relations, for the
    /// self-containment recursion. Rebuilt whenever a composite changes.
    composite_members_table: BTreeMap<Oid, Vec<(String, Oid, Option<Oid>)>>,
    next_oid: Oid,
}

impl TypeRegistry {
    /// Registry pre-seeded with the built-in scalar and pseudo types.
    pub fn builtin() -> TypeRegistry {
        let mut entries = BTreeMap::new();
        for e in [
            TypeEntry::scalar(BOOL_OID, "bool", true, false),
            TypeEntry::scalar(INT2_OID, "int2", true, false),
            TypeEntry::scalar(INT4_OID, "int4", true, false),
            TypeEntry::scalar(INT8_OID, "int8", true, false),
            TypeEntry::scalar(FLOAT8_OID, "float8", false, false),
            TypeEntry::scalar(NAME_OID, "name", true, true),
            TypeEntry::scalar(TEXT_OID, "text", true, true),
            TypeEntry::scalar(DATE_OID, "date", true, false),
            TypeEntry::scalar(TIMESTAMP_OID, "timestamp", true, false),
            TypeEntry::scalar(UNKNOWN_OID, "unknown", false, false),
            TypeEntry::pseudo(ANY_OID, "any"),
            TypeEntry::pseudo(ANYARRAY_OID, "anyarray"),
            TypeEntry::pseudo(TRIGGER_OID, "trigger"),
        ] {
            entries.insert(e.oid, e);
        }
        TypeRegistry { entries, composite_members_table: BTreeMap::new(), next_oid: 16384 }
    }

    pub fn get(&self, oid: Oid) -> CatalogResult<&TypeEntry> {
        self.entries.get(&oid).ok_or_else(|| CatalogError::cache_lookup("type", oid))
    }

    pub fn lookup_by_name(&self, namespace: Oid, name: &str) -> Option<&TypeEntry> {
        self.entries.values().find(|e| e.namespace == namespace && e.name == name)
    }

    pub fn name_of(&self, oid: Oid) -> String {
        self.entries.get(&oid).map(|e| e.name.clone()).unwrap_or_else(|| format!("type{}", oid))
    }

    pub fn is_collatable(&self, oid: Oid) -> bool {
        self.entries.get(&oid).map(|e| e.collatable).unwrap_or(false)
    }

    pub fn is_hash_distributable(&self, oid: Oid) -> bool {
        self.entries.get(&oid).map(|e| e.hashable).unwrap_or(false)
    }

    pub fn is_modulo_distributable(&self, oid: Oid) -> bool {
        self.entries.get(&oid).map(|e| e.modulo_able).unwrap_or(false)
    }

    /// Coercibility check for cooking. Deliberately conservative: numeric
    /// widening, anything to text, unknown literals to anything.
    pub fn can_coerce(&self, from: Oid, to: Oid) -> bool {
        if from == to || from == UNKNOWN_OID {
            return true;
        }
        // Domains coerce like their base type.
        let from = self.entries.get(&from).and_then(|e| e.base_type).unwrap_or(from);
        let to_base = self.entries.get(&to).and_then(|e| e.base_type).unwrap_or(to);
        if from == to_base {
            return true;
        }
        matches!(
            (from, to_base),
            (INT2_OID, INT4_OID)
                | (INT2_OID, INT8_OID)
                | (INT4_OID, INT8_OID)
                | (INT2_OID, FLOAT8_OID)
                | (INT4_OID, FLOAT8_OID)
                | (INT8_OID, FLOAT8_OID)
                | (_, TEXT_OID)
                | (DATE_OID, TIMESTAMP_OID)
        )
    }

    fn allocate_oid(&mut self) -> Oid {
        let oid = self.next_oid;
        self.next_oid += 1;
        oid
    }

    /// Create the row type for a newly cataloged relation.
    pub fn create_row_type(&mut self, name: &str, namespace: Oid, relation: Oid) -> CatalogResult<Oid> {
        if self.lookup_by_name(namespace, name).is_some() {
            return Err(CatalogError::duplicate(
                "duplicate_type".into(),
                format!("type \"{}\" already exists", name),
            ));
        }
        let oid = self.allocate_oid();
        self.entries.insert(
            oid,
            TypeEntry {
                oid,
                name: name.to_string(),
                namespace,
                kind: TypeKind::Composite,
                element_type: None,
                base_type: None,
                relation: Some(relation),
                collatable: false,
                hashable: false,
                modulo_able: false,
            },
        );
        Ok(oid)
    }

    /// Create the companion array type `_name` for a row type.
    pub fn create_array_type(&mut self, element_name: &str, namespace: Oid, element: Oid) -> CatalogResult<Oid> {
        let array_name = format!("_{}", element_name);
        if self.lookup_by_name(namespace, &array_name).is_some() {
            return Err(CatalogError::duplicate(
                "duplicate_type".into(),
                format!("type \"{}\" already exists", array_name),
            ));
        }
        let oid = self.allocate_oid();
        self.entries.insert(
            oid,
            TypeEntry {
                oid,
                name: array_name,
                namespace,
                kind: TypeKind::Array,
                element_type: Some(element),
                base_type: None,
                relation: None,
                collatable: false,
                hashable: false,
                modulo_able: false,
            },
        );
        Ok(oid)
    }

    /// If `name` is taken by an array type, rename that array out of the way
    /// (prepending an underscore) and return true. Non-array occupants are
    /// left alone and the caller reports the collision.
    pub fn move_array_type_aside(&mut self, namespace: Oid, name: &str) -> bool {
        let occupant = self
            .lookup_by_name(namespace, name)
            .filter(|e| e.kind == TypeKind::Array)
            .map(|e| e.oid);
        match occupant {
            Some(oid) => {
                let new_name = format!("_{}", name);
                if self.lookup_by_name(namespace, &new_name).is_some() {
                    return false;
                }
                if let Some(e) = self.entries.get_mut(&oid) {
                    tracing::debug!(old = name, new = %new_name, "renaming array type out of the way");
                    e.name = new_name;
                }
                true
            }
            None => false,
        }
    }

    pub fn remove_row_type(&mut self, relation: Oid) {
        let row: Vec<Oid> = self
            .entries
            .values()
            .filter(|e| e.relation == Some(relation))
            .map(|e| e.oid)
            .collect();
        for oid in row {
            // Drop companion arrays first, then the row type itself.
            let arrays: Vec<Oid> = self
                .entries
                .values()
                .filter(|e| e.element_type == Some(oid))
                .map(|e| e.oid)
                .collect();
            for a in arrays {
                self.entries.remove(&a);
            }
            self.entries.remove(&oid);
        }
    }

    pub fn row_type_of(&self, relation: Oid) -> Option<Oid> {
        self.entries.values().find(|e| e.relation == Some(relation)).map(|e| e.oid)
    }

    /// Recursive admissibility check for a column's declared type.
    ///
    /// `containing` is the set of composite type ids currently being expanded
    /// by callers up-stack; finding the candidate in it means the composite
    /// would contain itself. `allow_pseudo` is the single documented escape
    /// hatch used while bootstrapping the statistics catalog, whose columns
    /// legitimately use pseudo-types.
    pub fn check_attribute_type(
        &self,
        column_name: &str,
        type_oid: Oid,
        collation: Option<Oid>,
        containing: &HashSet<Oid>,
        allow_pseudo: bool,
    ) -> CatalogResult<()> {
        let entry = self.get(type_oid)?;
        match entry.kind {
            TypeKind::Pseudo => {
                if !allow_pseudo {
                    return Err(CatalogError::definition(
                        "invalid_column_type".into(),
                        format!("column \"{}\" has pseudo-type {}", column_name, entry.name),
                    ));
                }
            }
            TypeKind::Domain => {
                if let Some(base) = entry.base_type {
                    self.check_attribute_type(column_name, base, collation, containing, allow_pseudo)?;
                }
            }
            TypeKind::Composite => {
                if containing.contains(&type_oid) {
                    return Err(CatalogError::definition(
                        "self_referential_type".into(),
                        format!(
                            "composite type {} cannot be made a member of itself",
                            entry.name
                        ),
                    ));
                }
                let mut inner = containing.clone();
                inner.insert(type_oid);
                // Members of an embedded row type are checked against the
                // extended expansion set.
                if let Some(rel) = entry.relation {
                    for (member_name, member_type, member_coll) in self.composite_members(rel) {
                        self.check_attribute_type(&member_name, member_type, member_coll, &inner, allow_pseudo)?;
                    }
                }
            }
            TypeKind::Array => {
                if let Some(elem) = entry.element_type {
                    self.check_attribute_type(column_name, elem, collation, containing, allow_pseudo)?;
                }
            }
            TypeKind::Base | TypeKind::Enum => {}
        }
        if entry.collatable && collation.is_none() {
            return Err(CatalogError::definition(
                "no_collation".into(),
                format!(
                    "no collation was derived for column \"{}\" with collatable type {}",
                    column_name, entry.name
                ),
            ));
        }
        Ok(())
    }

    /// Composite member accessor used by the recursion above. The registrar
    /// installs member lists when it creates row types for cataloged
    /// relations with user columns.
    fn composite_members(&self, relation: Oid) -> Vec<(String, Oid, Option<Oid>)> {
        self.composite_members_table.get(&relation).cloned().unwrap_or_default()
    }

    pub fn register_composite_members(&mut self, relation: Oid, members: Vec<(String, Oid, Option<Oid>)>) {
        self.composite_members_table.insert(relation, members);
    }

    pub fn forget_composite_members(&mut self, relation: Oid) {
        self.composite_members_table.remove(&relation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_types_rejected_without_escape_hatch() {
        let reg = TypeRegistry::builtin();
        let err = reg
            .check_attribute_type("c", ANYARRAY_OID, None, &HashSet::new(), false)
            .unwrap_err();
        assert!(err.message().contains("pseudo-type"));
        // bootstrap escape hatch
        assert!(reg.check_attribute_type("c", ANYARRAY_OID, None, &HashSet::new(), true).is_ok());
    }

    #[test]
    fn collatable_type_requires_collation() {
        let reg = TypeRegistry::builtin();
        assert!(reg.check_attribute_type("t", TEXT_OID, None, &HashSet::new(), false).is_err());
        assert!(reg
            .check_attribute_type("t", TEXT_OID, Some(DEFAULT_COLLATION_OID), &HashSet::new(), false)
            .is_ok());
    }

    #[test]
    fn self_containment_guard() {
        let mut reg = TypeRegistry::builtin();
        let row = reg.create_row_type("pair", 2200, 50_001).unwrap();
        // pair contains a member of its own type
        reg.register_composite_members(50_001, vec![("self".into(), row, None)]);
        let mut containing = HashSet::new();
        containing.insert(row);
        let err = reg
            .check_attribute_type("c", row, None, &containing, false)
            .unwrap_err();
        assert!(err.message().contains("member of itself"));
        // Without the set primed, the recursion finds the loop one level down.
        let err = reg.check_attribute_type("c", row, None, &HashSet::new(), false).unwrap_err();
        assert!(err.message().contains("member of itself"));
    }

    #[test]
    fn array_type_rename_out_of_the_way() {
        let mut reg = TypeRegistry::builtin();
        let row = reg.create_row_type("widget", 2200, 50_010).unwrap();
        reg.create_array_type("widget", 2200, row).unwrap();
        // "_widget" is now occupied by the array; a new relation named
        // "_widget" wants that type name.
        assert!(reg.move_array_type_aside(2200, "_widget"));
        assert!(reg.lookup_by_name(2200, "__widget").is_some());
    }

    #[test]
    fn row_type_removal_takes_arrays_along() {
        let mut reg = TypeRegistry::builtin();
        let row = reg.create_row_type("gadget", 2200, 50_020).unwrap();
        reg.create_array_type("gadget", 2200, row).unwrap();
        reg.remove_row_type(50_020);
        assert!(reg.lookup_by_name(2200, "gadget").is_none());
        assert!(reg.lookup_by_name(2200, "_gadget").is_none());
    }
}
