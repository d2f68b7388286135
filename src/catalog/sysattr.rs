//! Fixed system-column definitions.
//! Pure lookups over a static table; the table is immutable after process
//! image load and needs no synchronization.

use once_cell::sync::Lazy;

use super::relation::AlignKind;
use super::typesys::{Oid, INT4_OID, INT8_OID, TEXT_OID};
use crate::error::{CatalogError, CatalogResult};

/// Attribute number of the object-id system column. It is the only system
/// column that is optional per relation.
pub const OID_ATTRIBUTE_NUMBER: i16 = -2;

/// Lowest (most negative) system attribute number in use.
pub const FIRST_LOW_INVALID_ATTRIBUTE_NUMBER: i16 = -8;

#[derive(Debug, Clone)]
pub struct SysAttr {
    pub name: &'static str,
    pub attnum: i16,
    pub type_oid: Oid,
    pub len: i32,
    pub align: AlignKind,
}

static SYS_ATTRS: Lazy<Vec<SysAttr>> = Lazy::new(|| {
    vec![
        SysAttr { name: "ctid", attnum: -1, type_oid: TEXT_OID, len: 6, align: AlignKind::Short },
        SysAttr { name: "oid", attnum: OID_ATTRIBUTE_NUMBER, type_oid: INT4_OID, len: 4, align: AlignKind::Int },
        SysAttr { name: "xmin", attnum: -3, type_oid: INT8_OID, len: 8, align: AlignKind::Double },
        SysAttr { name: "cmin", attnum: -4, type_oid: INT4_OID, len: 4, align: AlignKind::Int },
        SysAttr { name: "xmax", attnum: -5, type_oid: INT8_OID, len: 8, align: AlignKind::Double },
        SysAttr { name: "cmax", attnum: -6, type_oid: INT4_OID, len: 4, align: AlignKind::Int },
        SysAttr { name: "tableoid", attnum: -7, type_oid: INT4_OID, len: 4, align: AlignKind::Int },
    ]
});

/// Lookup by (negative) attribute number. Fails for unknown slots, and for
/// the oid column when the relation was declared WITHOUT OIDS.
pub fn lookup_by_number(attnum: i16, relation_has_oids: bool) -> CatalogResult<&'static SysAttr> {
    if attnum >= 0 || attnum <= FIRST_LOW_INVALID_ATTRIBUTE_NUMBER {
        return Err(CatalogError::definition(
            "invalid_attribute_number".into(),
            format!("invalid system attribute number {}", attnum),
        ));
    }
    if attnum == OID_ATTRIBUTE_NUMBER && !relation_has_oids {
        return Err(CatalogError::definition(
            "invalid_attribute_number".into(),
            "relation has no oid column".to_string(),
        ));
    }
    SYS_ATTRS
        .iter()
        .find(|a| a.attnum == attnum)
        .ok_or_else(|| CatalogError::definition(
            "invalid_attribute_number".into(),
            format!("invalid system attribute number {}", attnum),
        ))
}

/// Exact string match over the fixed table; the oid entry is skipped when
/// oids are disabled.
pub fn lookup_by_name(name: &str, relation_has_oids: bool) -> Option<&'static SysAttr> {
    SYS_ATTRS
        .iter()
        .find(|a| a.name == name && (relation_has_oids || a.attnum != OID_ATTRIBUTE_NUMBER))
}

/// All system attributes applicable to a relation, most-negative last, ready
/// to append after the user columns.
pub fn applicable(relation_has_oids: bool) -> impl Iterator<Item = &'static SysAttr> {
    SYS_ATTRS
        .iter()
        .filter(move |a| relation_has_oids || a.attnum != OID_ATTRIBUTE_NUMBER)
}
