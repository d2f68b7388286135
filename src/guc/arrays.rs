//! Per-role and per-database stored option arrays.
//! ------------------------------------------------
//! ALTER ROLE ... SET / ALTER DATABASE ... SET persist their settings as an
//! array of "name=value" strings on the owning catalog row. These helpers
//! edit such arrays: add replaces any entry for the same (normalized) name,
//! delete removes it, reset drops the whole array.

use crate::error::{CatalogError, CatalogResult};
use crate::ident::normalize_guc_name;

fn split_entry(entry: &str) -> CatalogResult<(String, &str)> {
    let eq = entry.find('=').ok_or_else(|| {
        CatalogError::validation(
            "invalid_option_entry".to_string(),
            format!("option entry \"{}\" is not of the form name=value", entry),
        )
    })?;
    let name = normalize_guc_name(entry[..eq].trim());
    if name.is_empty() {
        return Err(CatalogError::validation(
            "invalid_option_entry".to_string(),
            format!("option entry \"{}\" has an empty name", entry),
        ));
    }
    Ok((name, &entry[eq + 1..]))
}

/// Add `name=value` to the array, replacing an existing entry for the same
/// name in place.
pub fn option_list_add(list: &mut Vec<String>, entry: &str) -> CatalogResult<()> {
    let (name, value) = split_entry(entry)?;
    let stored = format!("{}={}", name, value);
    for slot in list.iter_mut() {
        let (existing, _) = split_entry(slot)?;
        if existing == name {
            *slot = stored;
            return Ok(());
        }
    }
    list.push(stored);
    Ok(())
}

/// Remove the entry for `name`, if present. Removing an absent name is not
/// an error; RESET of an unset option is a no-op.
pub fn option_list_delete(list: &mut Vec<String>, name: &str) -> CatalogResult<()> {
    let wanted = normalize_guc_name(name.trim());
    if wanted.is_empty() {
        return Err(CatalogError::validation(
            "invalid_option_entry".to_string(),
            "option name must not be empty".to_string(),
        ));
    }
    list.retain(|slot| match split_entry(slot) {
        Ok((existing, _)) => existing != wanted,
        Err(_) => true,
    });
    Ok(())
}

/// RESET ALL: drop every stored entry.
pub fn option_list_reset(list: &mut Vec<String>) {
    list.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_appends_and_replaces() {
        let mut list = Vec::new();
        option_list_add(&mut list, "work_mem=64MB").unwrap();
        option_list_add(&mut list, "search_path=app,public").unwrap();
        option_list_add(&mut list, "WORK_MEM=128MB").unwrap();
        assert_eq!(list, vec!["work_mem=128MB", "search_path=app,public"]);
    }

    #[test]
    fn value_may_contain_equals() {
        let mut list = Vec::new();
        option_list_add(&mut list, "app.filter=a=b").unwrap();
        assert_eq!(list, vec!["app.filter=a=b"]);
    }

    #[test]
    fn malformed_entries_rejected() {
        let mut list = Vec::new();
        assert!(option_list_add(&mut list, "no_value_here").is_err());
        assert!(option_list_add(&mut list, "=orphan").is_err());
        assert!(list.is_empty());
    }

    #[test]
    fn delete_is_name_insensitive_and_tolerant() {
        let mut list = Vec::new();
        option_list_add(&mut list, "work_mem=64MB").unwrap();
        option_list_add(&mut list, "statement_timeout=5s").unwrap();
        option_list_delete(&mut list, "Work_Mem").unwrap();
        assert_eq!(list, vec!["statement_timeout=5s"]);
        option_list_delete(&mut list, "never_set").unwrap();
        assert_eq!(list.len(), 1);
        assert!(option_list_delete(&mut list, " ").is_err());
    }

    #[test]
    fn reset_clears_everything() {
        let mut list = vec!["a=1".to_string(), "b=2".to_string()];
        option_list_reset(&mut list);
        assert!(list.is_empty());
    }
}
