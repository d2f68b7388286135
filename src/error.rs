//! Unified error model for the catalog and configuration engines.
//! This module provides a common error enum used across the DDL protocol,
//! the distribution registrar and the GUC engine, along with a mapping to
//! SQLSTATE codes for wire frontends.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogError {
    /// Invalid relation/column/type definition supplied by the caller.
    Definition { code: String, message: String },
    /// An object with the same name already exists.
    Duplicate { code: String, message: String },
    /// Object being referenced does not exist.
    NotFound { code: String, message: String },
    /// Caller lacks the privilege, or the setting context forbids the change.
    Permission { code: String, message: String },
    /// Value failed validation; carries a hint listing acceptable inputs.
    Validation { code: String, message: String, hint: Option<String> },
    /// Lock on the object is held by another transaction.
    LockConflict { code: String, message: String },
    /// The catalog itself is inconsistent; not user-correctable.
    Internal { code: String, message: String },
    Io { code: String, message: String },
}

impl CatalogError {
    pub fn code_str(&self) -> &str {
        match self {
            CatalogError::Definition { code, .. }
            | CatalogError::Duplicate { code, .. }
            | CatalogError::NotFound { code, .. }
            | CatalogError::Permission { code, .. }
            | CatalogError::Validation { code, .. }
            | CatalogError::LockConflict { code, .. }
            | CatalogError::Internal { code, .. }
            | CatalogError::Io { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CatalogError::Definition { message, .. }
            | CatalogError::Duplicate { message, .. }
            | CatalogError::NotFound { message, .. }
            | CatalogError::Permission { message, .. }
            | CatalogError::Validation { message, .. }
            | CatalogError::LockConflict { message, .. }
            | CatalogError::Internal { message, .. }
            | CatalogError::Io { message, .. } => message.as_str(),
        }
    }

    /// Hint string, present only on validation failures that can list their
    /// acceptable inputs (unit suffixes, enum options).
    pub fn hint(&self) -> Option<&str> {
        match self {
            CatalogError::Validation { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    pub fn definition<S: Into<String>>(code: S, msg: S) -> Self { CatalogError::Definition { code: code.into(), message: msg.into() } }
    pub fn duplicate<S: Into<String>>(code: S, msg: S) -> Self { CatalogError::Duplicate { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { CatalogError::NotFound { code: code.into(), message: msg.into() } }
    pub fn permission<S: Into<String>>(code: S, msg: S) -> Self { CatalogError::Permission { code: code.into(), message: msg.into() } }
    pub fn lock_conflict<S: Into<String>>(code: S, msg: S) -> Self { CatalogError::LockConflict { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { CatalogError::Internal { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { CatalogError::Io { code: code.into(), message: msg.into() } }

    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self {
        CatalogError::Validation { code: code.into(), message: msg.into(), hint: None }
    }

    pub fn validation_hint<S: Into<String>>(code: S, msg: S, hint: S) -> Self {
        CatalogError::Validation { code: code.into(), message: msg.into(), hint: Some(hint.into()) }
    }

    /// "cache lookup failed" class of errors: the catalog row must exist but
    /// does not. Diagnostics-oriented, not meant for end-user remediation.
    pub fn cache_lookup(kind: &str, oid: u32) -> Self {
        CatalogError::Internal {
            code: "cache_lookup_failed".into(),
            message: format!("cache lookup failed for {} {}", kind, oid),
        }
    }

    /// SQLSTATE mapping for wire frontends: (sqlstate, severity).
    pub fn sqlstate(&self) -> (&'static str, &'static str) {
        match self {
            CatalogError::Definition { .. } => ("42P16", "ERROR"), // invalid_table_definition
            CatalogError::Duplicate { .. } => ("42P07", "ERROR"),  // duplicate_table / duplicate_object
            CatalogError::NotFound { .. } => ("42P01", "ERROR"),   // undefined_table
            CatalogError::Permission { .. } => ("42501", "ERROR"), // insufficient_privilege
            CatalogError::Validation { .. } => ("22023", "ERROR"), // invalid_parameter_value
            CatalogError::LockConflict { .. } => ("55P03", "ERROR"), // lock_not_available
            CatalogError::Internal { .. } => ("XX000", "ERROR"),   // internal_error
            CatalogError::Io { .. } => ("58030", "ERROR"),         // io_error
        }
    }
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())?;
        if let Some(h) = self.hint() {
            write!(f, " (hint: {})", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for CatalogError {}

pub type CatalogResult<T> = Result<T, CatalogError>;

impl From<anyhow::Error> for CatalogError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: storage plumbing surfaces as Io unless downcasted elsewhere
        CatalogError::Io { code: "storage_error".into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io { code: "io_error".into(), message: err.to_string() }
    }
}
