//! Worker configuration handoff.
//! ------------------------------
//! A parallel worker must start with the leader's non-default settings.
//! The payload is a flat sequence of length-delimited fields, six per
//! variable: name, textual value, source file, source line, source tag and
//! context tag. Variables whose context is Internal or Postmaster are the
//! worker's own business and are skipped, as are variables still at their
//! default. Records are emitted in a stable topological order over the
//! declared `apply_after` edges so that restoring one variable never
//! clobbers another applied later ("role" is applied after
//! "session_authorization", whatever their alphabetical order says).

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{CatalogError, CatalogResult};
use super::registry::GucRegistry;
use super::variable::{GucAction, GucContext, GucSource, GucVar};

fn is_serialized(var: &GucVar) -> bool {
    !matches!(var.context, GucContext::Internal | GucContext::Postmaster)
        && var.source != GucSource::Default
}

/// Name-sorted, then adjusted so every variable follows the variables its
/// `apply_after` edges name. Cycles are broken with a warning rather than
/// refusing the handoff.
fn serialization_order(registry: &GucRegistry) -> Vec<&GucVar> {
    let mut pending: BTreeMap<&str, &GucVar> = registry
        .iter()
        .filter(|v| is_serialized(v))
        .map(|v| (v.name.as_str(), v))
        .collect();
    let mut ordered: Vec<&GucVar> = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, v)| {
                v.apply_after
                    .iter()
                    .all(|dep| !pending.contains_key(dep.as_str()))
            })
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            warn!("apply-after cycle among configuration variables; falling back to name order");
            ordered.extend(pending.values());
            break;
        }
        for name in ready {
            if let Some(var) = pending.remove(name) {
                ordered.push(var);
            }
        }
    }
    ordered
}

fn field_len(s: &str) -> usize {
    4 + s.len()
}

fn put_field(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn record_fields(var: &GucVar) -> [String; 6] {
    [
        var.name.clone(),
        var.value.as_text(),
        var.source_file.clone().unwrap_or_default(),
        var.source_line.map(|l| l.to_string()).unwrap_or_default(),
        var.source.tag().to_string(),
        var.context.tag().to_string(),
    ]
}

/// Exact byte size `serialize` will produce for the current state.
pub fn estimate_serialized_size(registry: &GucRegistry) -> usize {
    serialization_order(registry)
        .iter()
        .map(|var| record_fields(var).iter().map(|f| field_len(f)).sum::<usize>())
        .sum()
}

pub fn serialize(registry: &GucRegistry) -> Vec<u8> {
    let mut out = Vec::with_capacity(estimate_serialized_size(registry));
    for var in serialization_order(registry) {
        for field in record_fields(var) {
            put_field(&mut out, &field);
        }
    }
    out
}

fn take_field<'a>(payload: &'a [u8], pos: &mut usize) -> CatalogResult<&'a str> {
    let malformed =
        || CatalogError::internal("guc_restore".to_string(), "malformed configuration payload".to_string());
    let len_end = pos.checked_add(4).filter(|e| *e <= payload.len()).ok_or_else(malformed)?;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&payload[*pos..len_end]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    let end = len_end.checked_add(len).filter(|e| *e <= payload.len()).ok_or_else(malformed)?;
    let field = std::str::from_utf8(&payload[len_end..end]).map_err(|_| malformed())?;
    *pos = end;
    Ok(field)
}

/// Apply a serialized configuration to a freshly booted registry, in the
/// order the leader emitted it.
pub fn restore(registry: &mut GucRegistry, payload: &[u8]) -> CatalogResult<()> {
    let malformed = |what: &str| {
        CatalogError::internal(
            "guc_restore".to_string(),
            format!("malformed configuration payload: {}", what),
        )
    };
    let mut pos = 0usize;
    while pos < payload.len() {
        let name = take_field(payload, &mut pos)?.to_string();
        let value = take_field(payload, &mut pos)?.to_string();
        let source_file = take_field(payload, &mut pos)?.to_string();
        let source_line = take_field(payload, &mut pos)?.to_string();
        let source_tag: u8 = take_field(payload, &mut pos)?
            .parse()
            .map_err(|_| malformed("source tag"))?;
        let context_tag: u8 = take_field(payload, &mut pos)?
            .parse()
            .map_err(|_| malformed("context tag"))?;

        let source = GucSource::from_tag(source_tag).ok_or_else(|| malformed("source tag"))?;
        let context = GucContext::from_tag(context_tag).ok_or_else(|| malformed("context tag"))?;

        registry.set_config_option(&name, Some(&value), context, source, GucAction::Set, true)?;
        if let Some(var) = registry.lookup_mut(&name) {
            var.source_file = if source_file.is_empty() { None } else { Some(source_file) };
            var.source_line = source_line.parse().ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader() -> GucRegistry {
        GucRegistry::builtin()
    }

    fn set(r: &mut GucRegistry, name: &str, value: &str) {
        r.set_config_option(name, Some(value), GucContext::UserSet, GucSource::Session, GucAction::Set, true)
            .unwrap();
    }

    fn record_names(payload: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        let mut pos = 0;
        while pos < payload.len() {
            names.push(take_field(payload, &mut pos).unwrap().to_string());
            for _ in 0..5 {
                take_field(payload, &mut pos).unwrap();
            }
        }
        names
    }

    #[test]
    fn defaults_and_startup_contexts_are_skipped() {
        let mut r = leader();
        // server_version is Internal, shared_buffers is Postmaster
        r.set_config_option(
            "shared_buffers",
            Some("1GB"),
            GucContext::Postmaster,
            GucSource::ConfigFile,
            GucAction::Set,
            true,
        )
        .unwrap();
        set(&mut r, "work_mem", "64MB");
        let names = record_names(&serialize(&r));
        assert_eq!(names, vec!["work_mem"]);
    }

    #[test]
    fn estimate_matches_actual_size() {
        let mut r = leader();
        set(&mut r, "work_mem", "64MB");
        set(&mut r, "application_name", "leader");
        assert_eq!(estimate_serialized_size(&r), serialize(&r).len());
    }

    #[test]
    fn round_trip_restores_values_and_sources() {
        let mut r = leader();
        set(&mut r, "work_mem", "64MB");
        set(&mut r, "enable_seqscan", "off");
        if let Some(v) = r.lookup_mut("work_mem") {
            v.source_file = Some("postgresql.conf".into());
            v.source_line = Some(42);
        }
        let payload = serialize(&r);

        let mut w = leader();
        restore(&mut w, &payload).unwrap();
        assert_eq!(w.get_config_option("work_mem", false, false).unwrap().unwrap(), "64MB");
        assert_eq!(w.get_config_option("enable_seqscan", false, false).unwrap().unwrap(), "off");
        let wm = w.lookup("work_mem").unwrap();
        assert_eq!(wm.source, GucSource::Session);
        assert_eq!(wm.source_file.as_deref(), Some("postgresql.conf"));
        assert_eq!(wm.source_line, Some(42));
    }

    #[test]
    fn role_serializes_after_session_authorization() {
        let mut r = leader();
        set(&mut r, "role", "auditor");
        set(&mut r, "session_authorization", "alice");
        let names = record_names(&serialize(&r));
        let role_at = names.iter().position(|n| n == "role").unwrap();
        let auth_at = names.iter().position(|n| n == "session_authorization").unwrap();
        assert!(auth_at < role_at, "order was {:?}", names);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut r = leader();
        set(&mut r, "work_mem", "64MB");
        let payload = serialize(&r);
        assert!(restore(&mut leader(), &payload[..payload.len() - 3]).is_err());
    }

    #[test]
    fn empty_payload_is_a_no_op() {
        restore(&mut leader(), &[]).unwrap();
    }
}
