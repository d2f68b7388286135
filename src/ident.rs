//! Identifier normalization utilities
//! ----------------------------------
//! Single source of truth for SQL identifier handling shared by the catalog
//! (relation/column/constraint names) and the GUC engine (parameter names,
//! name-like string values).

/// Hard cap on identifier length, matching the catalog's fixed-width name
/// columns. Name-like GUC string values are silently truncated to this.
pub const NAME_DATA_LEN: usize = 63;

/// Normalize an identifier according to SQL rules:
/// - If enclosed in double-quotes, strip quotes and preserve case
/// - Otherwise, convert to lowercase for case-insensitive matching
pub fn normalize_identifier(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        // Double-quoted: preserve case, strip quotes
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        // Unquoted: convert to lowercase
        trimmed.to_ascii_lowercase()
    }
}

/// Truncate to the identifier length limit on a char boundary.
pub fn truncate_identifier(ident: &str) -> String {
    if ident.len() <= NAME_DATA_LEN {
        return ident.to_string();
    }
    let mut end = NAME_DATA_LEN;
    while !ident.is_char_boundary(end) {
        end -= 1;
    }
    ident[..end].to_string()
}

/// GUC parameter names are case-insensitive and stored lower-cased.
pub fn normalize_guc_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// A qualified custom parameter name has exactly one dot separating a
/// non-empty module prefix from a non-empty option name ("module.option").
pub fn is_qualified_guc_name(name: &str) -> bool {
    let mut parts = name.splitn(2, '.');
    match (parts.next(), parts.next()) {
        (Some(module), Some(option)) => {
            !module.is_empty() && !option.is_empty() && !option.contains('.')
        }
        _ => false,
    }
}

/// Sentinel name given to a dropped column. The ordinal is embedded so the
/// tombstone stays unique within the relation.
pub fn dropped_column_name(attnum: i16) -> String {
    format!("........pg.dropped.{}........", attnum)
}

/// Recognize a dropped-column tombstone name.
pub fn is_dropped_column_name(name: &str) -> bool {
    name.starts_with("........pg.dropped.") && name.ends_with("........")
}
