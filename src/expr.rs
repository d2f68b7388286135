//! Cooked expression trees for column defaults and check constraints.
//! -------------------------------------------------------------------
//! Expressions arrive from the parser as raw trees and are "cooked" by the
//! constraint store: type-coerced, collation-assigned, and validated. The
//! cooked form is persisted twice per the catalog convention: a lossless
//! re-parseable encoding (serde_json over this tree) and a best-effort
//! human-readable deparse.

use serde::{Deserialize, Serialize};

use crate::catalog::typesys::{TypeRegistry, BOOL_OID, UNKNOWN_OID};
use crate::catalog::Oid;
use crate::error::{CatalogError, CatalogResult};

/// Scalar literal carried by a `Const` node. Text keeps its unresolved form
/// until coercion stamps a concrete type oid on the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Datum {
    fn deparse(&self) -> String {
        match self {
            Datum::Null => "NULL".to_string(),
            Datum::Bool(b) => if *b { "true".into() } else { "false".into() },
            Datum::Int(i) => i.to_string(),
            Datum::Float(f) => f.to_string(),
            Datum::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

/// Expression tree node. Structural equality (`PartialEq`) is what the
/// constraint merge logic uses to decide whether two definitions are the
/// same constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Const {
        value: Datum,
        type_oid: Oid,
        collation: Option<Oid>,
    },
    /// Reference to a column of the single target relation, by attribute number.
    ColumnRef {
        attnum: i16,
        type_oid: Oid,
        collation: Option<Oid>,
    },
    /// Reference to a column of a relation other than the target; only legal
    /// transiently in raw trees, rejected during cooking.
    ForeignColumnRef {
        relation: Oid,
        attnum: i16,
    },
    FuncCall {
        name: String,
        args: Vec<Expr>,
        return_type: Oid,
        volatile: bool,
    },
    BinaryOp {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
        return_type: Oid,
    },
    /// Assignment-style coercion inserted while cooking.
    Coerce {
        arg: Box<Expr>,
        target_type: Oid,
        target_typmod: i32,
    },
    /// Explicit collation assignment.
    Collate {
        arg: Box<Expr>,
        collation: Oid,
    },
    /// Minimal searched CASE: arms evaluated in order, optional ELSE.
    /// The cook step has already coerced every arm to `return_type`.
    CaseWhen {
        arms: Vec<CaseArm>,
        otherwise: Option<Box<Expr>>,
        return_type: Oid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseArm {
    pub when: Expr,
    pub then: Expr,
}

impl Expr {
    pub fn result_type(&self) -> Oid {
        match self {
            Expr::Const { type_oid, .. } => *type_oid,
            Expr::ColumnRef { type_oid, .. } => *type_oid,
            Expr::ForeignColumnRef { .. } => UNKNOWN_OID,
            Expr::FuncCall { return_type, .. } => *return_type,
            Expr::BinaryOp { return_type, .. } => *return_type,
            Expr::Coerce { target_type, .. } => *target_type,
            Expr::Collate { arg, .. } => arg.result_type(),
            Expr::CaseWhen { return_type, .. } => *return_type,
        }
    }

    /// True if any node in the tree references a column of the target relation.
    pub fn contains_column_refs(&self) -> bool {
        match self {
            Expr::ColumnRef { .. } => true,
            Expr::Const { .. } => false,
            Expr::ForeignColumnRef { .. } => true,
            Expr::FuncCall { args, .. } => args.iter().any(|a| a.contains_column_refs()),
            Expr::BinaryOp { left, right, .. } => left.contains_column_refs() || right.contains_column_refs(),
            Expr::Coerce { arg, .. } | Expr::Collate { arg, .. } => arg.contains_column_refs(),
            Expr::CaseWhen { arms, otherwise, .. } => {
                arms.iter().any(|a| a.when.contains_column_refs() || a.then.contains_column_refs())
                    || otherwise.as_ref().is_some_and(|e| e.contains_column_refs())
            }
        }
    }

    /// True if any node references a relation other than the single target.
    pub fn contains_foreign_refs(&self) -> bool {
        match self {
            Expr::ForeignColumnRef { .. } => true,
            Expr::Const { .. } | Expr::ColumnRef { .. } => false,
            Expr::FuncCall { args, .. } => args.iter().any(|a| a.contains_foreign_refs()),
            Expr::BinaryOp { left, right, .. } => left.contains_foreign_refs() || right.contains_foreign_refs(),
            Expr::Coerce { arg, .. } | Expr::Collate { arg, .. } => arg.contains_foreign_refs(),
            Expr::CaseWhen { arms, otherwise, .. } => {
                arms.iter().any(|a| a.when.contains_foreign_refs() || a.then.contains_foreign_refs())
                    || otherwise.as_ref().is_some_and(|e| e.contains_foreign_refs())
            }
        }
    }

    /// Distinct attribute numbers referenced, sorted. Nested sub-selects are
    /// not represented here; the cook step has already rejected them.
    pub fn referenced_columns(&self) -> Vec<i16> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    fn collect_columns(&self, out: &mut Vec<i16>) {
        match self {
            Expr::ColumnRef { attnum, .. } => out.push(*attnum),
            Expr::Const { .. } | Expr::ForeignColumnRef { .. } => {}
            Expr::FuncCall { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Coerce { arg, .. } | Expr::Collate { arg, .. } => arg.collect_columns(out),
            Expr::CaseWhen { arms, otherwise, .. } => {
                for a in arms {
                    a.when.collect_columns(out);
                    a.then.collect_columns(out);
                }
                if let Some(e) = otherwise {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// A volatile expression (e.g. now(), random()) cannot be precomputed
    /// into a stored "missing value".
    pub fn is_volatile(&self) -> bool {
        match self {
            Expr::FuncCall { volatile, args, .. } => *volatile || args.iter().any(|a| a.is_volatile()),
            Expr::Const { .. } | Expr::ColumnRef { .. } | Expr::ForeignColumnRef { .. } => false,
            Expr::BinaryOp { left, right, .. } => left.is_volatile() || right.is_volatile(),
            Expr::Coerce { arg, .. } | Expr::Collate { arg, .. } => arg.is_volatile(),
            Expr::CaseWhen { arms, otherwise, .. } => {
                arms.iter().any(|a| a.when.is_volatile() || a.then.is_volatile())
                    || otherwise.as_ref().is_some_and(|e| e.is_volatile())
            }
        }
    }

    /// Lossless re-parseable encoding.
    pub fn to_stored(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    pub fn from_stored(text: &str) -> CatalogResult<Expr> {
        serde_json::from_str(text)
            .map_err(|e| CatalogError::internal("expr_decode".to_string(), format!("stored expression is unreadable: {}", e)))
    }

    /// Best-effort human-readable form.
    pub fn deparse(&self) -> String {
        match self {
            Expr::Const { value, .. } => value.deparse(),
            Expr::ColumnRef { attnum, .. } => format!("col#{}", attnum),
            Expr::ForeignColumnRef { relation, attnum } => format!("rel{}.col#{}", relation, attnum),
            Expr::FuncCall { name, args, .. } => {
                let inner: Vec<String> = args.iter().map(|a| a.deparse()).collect();
                format!("{}({})", name, inner.join(", "))
            }
            Expr::BinaryOp { op, left, right, .. } => {
                format!("({} {} {})", left.deparse(), op, right.deparse())
            }
            Expr::Coerce { arg, target_type, .. } => format!("({})::type{}", arg.deparse(), target_type),
            Expr::Collate { arg, collation } => format!("{} COLLATE coll{}", arg.deparse(), collation),
            Expr::CaseWhen { arms, otherwise, .. } => {
                let mut out = String::from("CASE");
                for a in arms {
                    out.push_str(&format!(" WHEN {} THEN {}", a.when.deparse(), a.then.deparse()));
                }
                if let Some(e) = otherwise {
                    out.push_str(&format!(" ELSE {}", e.deparse()));
                }
                out.push_str(" END");
                out
            }
        }
    }

    /// Assignment-style coercion toward a target type. A no-op when the tree
    /// already yields the target; otherwise wrap in a Coerce node after
    /// checking the cast is known to the type registry.
    pub fn coerce_to(self, types: &TypeRegistry, target_type: Oid, target_typmod: i32) -> CatalogResult<Expr> {
        if self.result_type() == target_type && target_typmod < 0 {
            return Ok(self);
        }
        if !types.can_coerce(self.result_type(), target_type) {
            return Err(CatalogError::definition(
                "cannot_coerce".into(),
                format!(
                    "expression of type {} cannot be coerced to type {}",
                    types.name_of(self.result_type()),
                    types.name_of(target_type)
                ),
            ));
        }
        Ok(Expr::Coerce {
            arg: Box::new(self),
            target_type,
            target_typmod,
        })
    }

    /// Coerce to boolean, as required for check constraints.
    pub fn coerce_to_boolean(self, types: &TypeRegistry, context: &str) -> CatalogResult<Expr> {
        if self.result_type() == BOOL_OID {
            return Ok(self);
        }
        if !types.can_coerce(self.result_type(), BOOL_OID) {
            return Err(CatalogError::definition(
                "not_boolean".into(),
                format!(
                    "argument of {} must be type boolean, not type {}",
                    context,
                    types.name_of(self.result_type())
                ),
            ));
        }
        Ok(Expr::Coerce { arg: Box::new(self), target_type: BOOL_OID, target_typmod: -1 })
    }

    /// Walk the tree assigning the given collation to every collatable node
    /// that does not already carry one.
    pub fn assign_collations(self, types: &TypeRegistry, default_collation: Oid) -> Expr {
        match self {
            Expr::Const { value, type_oid, collation } => {
                let collation = if collation.is_none() && types.is_collatable(type_oid) {
                    Some(default_collation)
                } else {
                    collation
                };
                Expr::Const { value, type_oid, collation }
            }
            Expr::ColumnRef { attnum, type_oid, collation } => {
                let collation = if collation.is_none() && types.is_collatable(type_oid) {
                    Some(default_collation)
                } else {
                    collation
                };
                Expr::ColumnRef { attnum, type_oid, collation }
            }
            Expr::FuncCall { name, args, return_type, volatile } => Expr::FuncCall {
                name,
                args: args.into_iter().map(|a| a.assign_collations(types, default_collation)).collect(),
                return_type,
                volatile,
            },
            Expr::BinaryOp { op, left, right, return_type } => Expr::BinaryOp {
                op,
                left: Box::new(left.assign_collations(types, default_collation)),
                right: Box::new(right.assign_collations(types, default_collation)),
                return_type,
            },
            Expr::Coerce { arg, target_type, target_typmod } => Expr::Coerce {
                arg: Box::new(arg.assign_collations(types, default_collation)),
                target_type,
                target_typmod,
            },
            Expr::CaseWhen { arms, otherwise, return_type } => Expr::CaseWhen {
                arms: arms
                    .into_iter()
                    .map(|a| CaseArm {
                        when: a.when.assign_collations(types, default_collation),
                        then: a.then.assign_collations(types, default_collation),
                    })
                    .collect(),
                otherwise: otherwise
                    .map(|e| Box::new(e.assign_collations(types, default_collation))),
                return_type,
            },
            other @ Expr::Collate { .. } => other,
            other @ Expr::ForeignColumnRef { .. } => other,
        }
    }
}

/// Convenience constructors used widely in tests and by callers assembling
/// raw trees by hand.
impl Expr {
    pub fn int_const(v: i64, type_oid: Oid) -> Expr {
        Expr::Const { value: Datum::Int(v), type_oid, collation: None }
    }

    pub fn text_const(v: &str, type_oid: Oid) -> Expr {
        Expr::Const { value: Datum::Text(v.to_string()), type_oid, collation: None }
    }

    pub fn bool_const(v: bool) -> Expr {
        Expr::Const { value: Datum::Bool(v), type_oid: BOOL_OID, collation: None }
    }

    pub fn column(attnum: i16, type_oid: Oid) -> Expr {
        Expr::ColumnRef { attnum, type_oid, collation: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::typesys::{TypeRegistry, INT4_OID, INT8_OID, TEXT_OID};

    #[test]
    fn stored_form_round_trips() {
        let e = Expr::BinaryOp {
            op: ">".into(),
            left: Box::new(Expr::column(1, INT4_OID)),
            right: Box::new(Expr::int_const(0, INT4_OID)),
            return_type: BOOL_OID,
        };
        let stored = e.to_stored();
        let back = Expr::from_stored(&stored).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn referenced_columns_deduped_and_sorted() {
        let e = Expr::BinaryOp {
            op: "+".into(),
            left: Box::new(Expr::BinaryOp {
                op: "*".into(),
                left: Box::new(Expr::column(3, INT4_OID)),
                right: Box::new(Expr::column(1, INT4_OID)),
                return_type: INT4_OID,
            }),
            right: Box::new(Expr::column(3, INT4_OID)),
            return_type: INT4_OID,
        };
        assert_eq!(e.referenced_columns(), vec![1, 3]);
    }

    #[test]
    fn volatility_propagates() {
        let now = Expr::FuncCall { name: "now".into(), args: vec![], return_type: TEXT_OID, volatile: true };
        let wrapped = Expr::Coerce { arg: Box::new(now), target_type: TEXT_OID, target_typmod: -1 };
        assert!(wrapped.is_volatile());
        assert!(!Expr::int_const(1, INT4_OID).is_volatile());
    }

    #[test]
    fn coercion_checks_registry() {
        let types = TypeRegistry::builtin();
        let e = Expr::int_const(1, INT4_OID).coerce_to(&types, INT8_OID, -1).unwrap();
        assert_eq!(e.result_type(), INT8_OID);

        let bad = Expr::text_const("x", TEXT_OID).coerce_to(&types, BOOL_OID, -1);
        assert!(bad.is_err());
    }

    #[test]
    fn case_when_walks_every_arm() {
        let e = Expr::CaseWhen {
            arms: vec![CaseArm {
                when: Expr::BinaryOp {
                    op: ">".into(),
                    left: Box::new(Expr::column(2, INT4_OID)),
                    right: Box::new(Expr::int_const(0, INT4_OID)),
                    return_type: BOOL_OID,
                },
                then: Expr::column(1, INT4_OID),
            }],
            otherwise: Some(Box::new(Expr::FuncCall {
                name: "random".into(),
                args: vec![],
                return_type: INT4_OID,
                volatile: true,
            })),
            return_type: INT4_OID,
        };
        assert_eq!(e.result_type(), INT4_OID);
        assert_eq!(e.referenced_columns(), vec![1, 2]);
        assert!(e.contains_column_refs());
        assert!(e.is_volatile());
        assert_eq!(e.deparse(), "CASE WHEN (col#2 > 0) THEN col#1 ELSE random() END");
        assert_eq!(Expr::from_stored(&e.to_stored()).unwrap(), e);
    }

    #[test]
    fn deparse_is_readable() {
        let e = Expr::BinaryOp {
            op: ">".into(),
            left: Box::new(Expr::column(2, INT4_OID)),
            right: Box::new(Expr::int_const(10, INT4_OID)),
            return_type: BOOL_OID,
        };
        assert_eq!(e.deparse(), "(col#2 > 10)");
    }
}
