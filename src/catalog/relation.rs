//! In-memory relation and column descriptors.
//! -------------------------------------------
//! The descriptor is built before any catalog row exists (the "uncataloged"
//! phase) and cached afterwards. Column descriptors keep dropped columns in
//! place as tombstones because readers must still interpret rows whose
//! on-disk layout embeds the dropped column's length and alignment.

use serde::{Deserialize, Serialize};

use crate::ident::dropped_column_name;
use super::typesys::Oid;
use super::typesys::INVALID_OID;

/// Discriminator for what a relation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelKind {
    Table,
    Index,
    View,
    MaterializedView,
    Sequence,
    CompositeType,
    ForeignTable,
    PartitionedTable,
    PartitionedIndex,
    Toast,
}

impl RelKind {
    /// Which kinds own a physical storage fork.
    pub fn has_storage(self) -> bool {
        !matches!(
            self,
            RelKind::View
                | RelKind::CompositeType
                | RelKind::ForeignTable
                | RelKind::PartitionedTable
                | RelKind::PartitionedIndex
        )
    }

    /// Kinds whose rows carry transactional row versions, and therefore get
    /// real frozen-xid / min-multixact watermarks.
    pub fn has_row_versions(self) -> bool {
        matches!(self, RelKind::Table | RelKind::MaterializedView | RelKind::Toast)
    }

    /// Views and composite types have no system columns at all, so user
    /// column names may shadow system attribute names there.
    pub fn has_system_columns(self) -> bool {
        !matches!(self, RelKind::View | RelKind::CompositeType)
    }

    /// Implementation-detail kinds never get a companion array type.
    pub fn wants_array_type(self) -> bool {
        !matches!(self, RelKind::Toast | RelKind::Sequence | RelKind::Index | RelKind::PartitionedIndex)
    }

    /// Kinds that carry a meaningful ACL.
    pub fn has_acl(self) -> bool {
        matches!(
            self,
            RelKind::Table | RelKind::View | RelKind::MaterializedView | RelKind::Sequence
                | RelKind::ForeignTable | RelKind::PartitionedTable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelKind::Table => "table",
            RelKind::Index => "index",
            RelKind::View => "view",
            RelKind::MaterializedView => "materialized view",
            RelKind::Sequence => "sequence",
            RelKind::CompositeType => "composite type",
            RelKind::ForeignTable => "foreign table",
            RelKind::PartitionedTable => "partitioned table",
            RelKind::PartitionedIndex => "partitioned index",
            RelKind::Toast => "toast table",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    Permanent,
    Unlogged,
    Temporary,
}

/// Deferred action registered for temporary relations with special commit
/// behavior (ON COMMIT DELETE ROWS / DROP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnCommitAction {
    Noop,
    DeleteRows,
    Drop,
}

/// Storage alignment class for a column, preserved on dropped columns so
/// existing rows stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignKind {
    Char,
    Short,
    Int,
    Double,
}

/// Column descriptor (one attribute row). Ordinal positions are positive for
/// user columns and negative for the fixed system columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub relation: Oid,
    pub name: String,
    pub type_oid: Oid,
    pub typmod: i32,
    pub collation: Option<Oid>,
    pub attnum: i16,
    /// Storage length in bytes; -1 for varlena.
    pub len: i32,
    pub align: AlignKind,
    pub not_null: bool,
    pub has_default: bool,
    pub is_dropped: bool,
    /// Multi-parent inheritance bookkeeping.
    pub inherit_count: i32,
    pub is_local: bool,
    /// Value implicitly substituted for rows written before this column
    /// existed. Stored in deparse-free literal form.
    pub missing_value: Option<String>,
}

impl ColumnDescriptor {
    /// Turn this column into a dropped tombstone: flag it, rename it to the
    /// sentinel pattern, null the type link, clear per-column state. Length
    /// and alignment are kept for row-layout interpretation.
    pub fn mark_dropped(&mut self) {
        self.is_dropped = true;
        self.name = dropped_column_name(self.attnum);
        self.type_oid = INVALID_OID;
        self.collation = None;
        self.not_null = false;
        self.has_default = false;
        self.missing_value = None;
    }
}

/// In-memory handle for a table/index/view/etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    /// Forced to the null tablespace for storage-less kinds and sequences.
    pub tablespace: Oid,
    /// May differ from `oid` when storage was physically relocated; only
    /// valid when the kind has storage.
    pub storage_oid: Oid,
    pub kind: RelKind,
    pub persistence: Persistence,
    pub is_shared: bool,
    pub is_mapped: bool,
    pub columns: Vec<ColumnDescriptor>,
}

impl RelationDescriptor {
    pub fn has_storage(&self) -> bool {
        self.kind.has_storage()
    }

    /// User columns only, in attnum order, dropped ones included.
    pub fn user_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.attnum > 0)
    }

    /// Live (not dropped) user columns, the set that matters for naming.
    pub fn live_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.attnum > 0 && !c.is_dropped)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDescriptor> {
        // Case-sensitive exact match; normalization happened at parse time.
        self.columns.iter().find(|c| !c.is_dropped && c.name == name)
    }

    pub fn column_by_attnum(&self, attnum: i16) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.attnum == attnum)
    }
}
