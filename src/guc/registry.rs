//! The configuration variable registry.
//! -------------------------------------
//! Built once at startup through `GucRegistryBuilder` and addressed by
//! lower-cased name through a sorted map. Unknown qualified names
//! ("module.option") are synthesized as string placeholders and replaced
//! when the owning module defines the real variable. The registry also
//! tracks the session's transaction nesting level and the queue of
//! parameter-changed notices for wire reporting.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{CatalogError, CatalogResult};
use crate::ident::{is_qualified_guc_name, normalize_guc_name};
use super::stack::{pop_level, push_old_value};
use super::value::{parse_bool, parse_enum, parse_int, parse_real, parse_string, GucUnit, GucValue};
use super::variable::{
    GucAction, GucContext, GucKind, GucSource, GucVar, SavedValue,
};

pub struct GucRegistry {
    vars: BTreeMap<String, GucVar>,
    /// Current transaction nesting level; 1 is the top level.
    nest_level: u32,
    reports: Vec<(String, String)>,
}

/// Builder for the startup registry. Each `define_*` returns the variable
/// for flag/hook/bounds tweaks before `build()` freezes the set.
#[derive(Default)]
pub struct GucRegistryBuilder {
    vars: BTreeMap<String, GucVar>,
}

impl GucRegistryBuilder {
    pub fn new() -> GucRegistryBuilder {
        GucRegistryBuilder::default()
    }

    pub fn define(&mut self, var: GucVar) -> &mut GucVar {
        use std::collections::btree_map::Entry;
        match self.vars.entry(normalize_guc_name(&var.name)) {
            Entry::Occupied(mut slot) => {
                slot.insert(var);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(var),
        }
    }

    pub fn define_bool(&mut self, name: &str, context: GucContext, desc: &str, boot: bool) -> &mut GucVar {
        self.define(GucVar::new(name, desc, context, GucKind::Bool, GucValue::Bool(boot)))
    }

    pub fn define_int(
        &mut self,
        name: &str,
        context: GucContext,
        desc: &str,
        boot: i64,
        min: i64,
        max: i64,
        unit: GucUnit,
    ) -> &mut GucVar {
        let var = self.define(GucVar::new(name, desc, context, GucKind::Int { min, max }, GucValue::Int(boot)));
        var.unit = unit;
        var
    }

    pub fn define_real(
        &mut self,
        name: &str,
        context: GucContext,
        desc: &str,
        boot: f64,
        min: f64,
        max: f64,
    ) -> &mut GucVar {
        self.define(GucVar::new(name, desc, context, GucKind::Real { min, max }, GucValue::Real(boot)))
    }

    pub fn define_string(&mut self, name: &str, context: GucContext, desc: &str, boot: &str) -> &mut GucVar {
        self.define(GucVar::new(name, desc, context, GucKind::Str, GucValue::Str(boot.to_string())))
    }

    pub fn define_enum(
        &mut self,
        name: &str,
        context: GucContext,
        desc: &str,
        boot: &str,
        options: &[&str],
    ) -> &mut GucVar {
        self.define(GucVar::new(
            name,
            desc,
            context,
            GucKind::Enum { options: options.iter().map(|s| s.to_string()).collect() },
            GucValue::Enum(boot.to_string()),
        ))
    }

    pub fn build(self) -> GucRegistry {
        GucRegistry { vars: self.vars, nest_level: 1, reports: Vec::new() }
    }
}

impl GucRegistry {
    /// The built-in variable table the engine boots with.
    pub fn builtin() -> GucRegistry {
        let mut b = GucRegistryBuilder::new();

        b.define_int(
            "work_mem",
            GucContext::UserSet,
            "Sets the maximum memory to be used for query workspaces.",
            4096,
            64,
            i64::MAX / 2048,
            GucUnit::KiloBytes,
        );
        b.define_int(
            "shared_buffers",
            GucContext::Postmaster,
            "Sets the number of shared memory buffers used by the server.",
            16384,
            16,
            i64::MAX / 2048,
            GucUnit::KiloBytes,
        );
        b.define_int(
            "statement_timeout",
            GucContext::UserSet,
            "Sets the maximum allowed duration of any statement.",
            0,
            0,
            i64::MAX / 2,
            GucUnit::Milliseconds,
        );
        b.define_int(
            "max_connections",
            GucContext::Postmaster,
            "Sets the maximum number of concurrent connections.",
            100,
            1,
            262_143,
            GucUnit::None,
        );
        b.define_bool(
            "enable_seqscan",
            GucContext::UserSet,
            "Enables the planner's use of sequential-scan plans.",
            true,
        );
        b.define_real(
            "random_page_cost",
            GucContext::UserSet,
            "Sets the planner's estimate of the cost of a nonsequentially fetched disk page.",
            4.0,
            0.0,
            1.0e10,
        );
        b.define_enum(
            "log_min_messages",
            GucContext::Superuser,
            "Sets the message levels that are logged.",
            "warning",
            &["debug", "info", "notice", "warning", "error", "log", "fatal", "panic"],
        );
        b.define_string(
            "search_path",
            GucContext::UserSet,
            "Sets the schema search order for names that are not schema-qualified.",
            "\"$user\",public",
        );
        b.define_string(
            "application_name",
            GucContext::UserSet,
            "Sets the application name to be reported in statistics and logs.",
            "",
        )
        .flags
        .report = true;
        b.define_string(
            "server_version",
            GucContext::Internal,
            "Shows the server version.",
            "9.2.4",
        )
        .flags
        .report = true;
        b.define_bool(
            "is_superuser",
            GucContext::Internal,
            "Shows whether the current user is a superuser.",
            false,
        )
        .flags
        .report = true;
        b.define_string(
            "session_authorization",
            GucContext::UserSet,
            "Sets the session user name.",
            "",
        )
        .flags
        .name_like = true;
        // Applying "role" before session_authorization would let the latter
        // silently overwrite it on restore; the edge makes that explicit.
        let role = b.define_string(
            "role",
            GucContext::UserSet,
            "Sets the current role.",
            "none",
        );
        role.flags.name_like = true;
        role.apply_after.push("session_authorization".to_string());

        b.build()
    }

    pub fn current_nest_level(&self) -> u32 {
        self.nest_level
    }

    pub fn lookup(&self, name: &str) -> Option<&GucVar> {
        self.vars.get(&normalize_guc_name(name))
    }

    /// Iterate all variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = &GucVar> {
        self.vars.values()
    }

    pub(crate) fn lookup_mut(&mut self, name: &str) -> Option<&mut GucVar> {
        self.vars.get_mut(&normalize_guc_name(name))
    }

    fn unknown(name: &str) -> CatalogError {
        CatalogError::not_found(
            "undefined_parameter".to_string(),
            format!("unrecognized configuration parameter \"{}\"", name),
        )
    }

    /// Context compatibility: None when allowed, or the refusal message.
    fn context_violation(var: &GucVar, context: GucContext) -> Option<String> {
        let refused = match var.context {
            GucContext::Internal => context != GucContext::Internal,
            GucContext::Postmaster => context != GucContext::Postmaster,
            GucContext::SigHup => !matches!(context, GucContext::SigHup | GucContext::Postmaster),
            GucContext::Backend => {
                !matches!(context, GucContext::Backend | GucContext::SigHup | GucContext::Postmaster)
            }
            GucContext::Superuser => {
                !matches!(
                    context,
                    GucContext::Superuser | GucContext::Backend | GucContext::SigHup | GucContext::Postmaster
                )
            }
            GucContext::UserSet => false,
        };
        if !refused {
            return None;
        }
        Some(match var.context {
            GucContext::Internal => format!("parameter \"{}\" cannot be changed", var.name),
            GucContext::Postmaster => {
                format!("parameter \"{}\" cannot be changed without restarting the server", var.name)
            }
            GucContext::SigHup => format!("parameter \"{}\" cannot be changed now", var.name),
            GucContext::Backend => {
                format!("parameter \"{}\" cannot be set after connection start", var.name)
            }
            _ => format!("permission denied to set parameter \"{}\"", var.name),
        })
    }

    fn parse_value(var: &GucVar, raw: &str) -> CatalogResult<GucValue> {
        match &var.kind {
            GucKind::Bool => parse_bool(raw).map(GucValue::Bool).ok_or_else(|| {
                CatalogError::validation(
                    "invalid_boolean".to_string(),
                    format!("parameter \"{}\" requires a Boolean value", var.name),
                )
            }),
            GucKind::Int { min, max } => {
                let v = parse_int(&var.name, raw, var.unit)?;
                if v < *min || v > *max {
                    return Err(CatalogError::validation(
                        "out_of_range".to_string(),
                        format!(
                            "{} is outside the valid range for parameter \"{}\" ({} .. {})",
                            v, var.name, min, max
                        ),
                    ));
                }
                Ok(GucValue::Int(v))
            }
            GucKind::Real { min, max } => {
                let v = parse_real(&var.name, raw)?;
                if v < *min || v > *max {
                    return Err(CatalogError::validation(
                        "out_of_range".to_string(),
                        format!(
                            "{} is outside the valid range for parameter \"{}\" ({} .. {})",
                            v, var.name, min, max
                        ),
                    ));
                }
                Ok(GucValue::Real(v))
            }
            GucKind::Str => Ok(GucValue::Str(parse_string(raw, var.flags.name_like))),
            GucKind::Enum { options } => Ok(GucValue::Enum(parse_enum(&var.name, raw, options)?)),
        }
    }

    /// Set (or probe the settability of) a configuration option.
    ///
    /// `value: None` means RESET. With `change_val: false` nothing is
    /// mutated; the return reports whether the set would be accepted.
    /// `Ok(false)` means "refused but not an error": lower-priority source,
    /// or a context violation in probe mode.
    pub fn set_config_option(
        &mut self,
        name: &str,
        value: Option<&str>,
        context: GucContext,
        source: GucSource,
        action: GucAction,
        change_val: bool,
    ) -> CatalogResult<bool> {
        let key = normalize_guc_name(name);
        if !self.vars.contains_key(&key) {
            if !is_qualified_guc_name(&key) {
                return Err(Self::unknown(name));
            }
            // Placeholder until a module claims the prefix.
            let mut placeholder = GucVar::new(
                &key,
                "configuration placeholder",
                GucContext::UserSet,
                GucKind::Str,
                GucValue::Str(String::new()),
            );
            placeholder.flags.placeholder = true;
            debug!(name = %key, "synthesizing placeholder parameter");
            self.vars.insert(key.clone(), placeholder);
        }
        let nest_level = self.nest_level;
        // Non-interactive sources establish the new baseline default.
        let make_default = change_val
            && source <= GucSource::Override
            && (value.is_some() || source == GucSource::Default);

        let Some(var) = self.vars.get_mut(&key) else {
            return Err(Self::unknown(name));
        };

        if let Some(message) = Self::context_violation(var, context) {
            if !change_val {
                return Ok(false);
            }
            return Err(CatalogError::permission("guc_context".to_string(), message));
        }

        let (mut new_value, effective_source, mut extra) = match value {
            Some(raw) => (Self::parse_value(var, raw)?, source, None),
            None => (var.reset_value.clone(), var.reset_source, var.reset_extra.clone()),
        };

        if let Some(check) = var.check_hook.clone() {
            extra = check(&mut new_value)?;
        }

        // Strict source priority: an outranked source does not change the
        // active value, but a baseline-style set still updates the reset
        // value and any stacked priors it outranks.
        if var.source > source {
            if make_default {
                if var.reset_source <= source {
                    var.reset_value = new_value.clone();
                    var.reset_extra = extra.clone();
                    var.reset_source = source;
                }
                for frame in &mut var.stack {
                    if frame.prior.source <= source {
                        frame.prior.value = new_value.clone();
                        frame.prior.extra = extra.clone();
                        frame.prior.source = source;
                    }
                }
            }
            return Ok(false);
        }

        if !change_val {
            return Ok(true);
        }

        if make_default {
            if var.reset_source <= source {
                var.reset_value = new_value.clone();
                var.reset_extra = extra.clone();
                var.reset_source = source;
            }
            for frame in &mut var.stack {
                if frame.prior.source <= source {
                    frame.prior.value = new_value.clone();
                    frame.prior.extra = extra.clone();
                    frame.prior.source = source;
                }
            }
        } else {
            push_old_value(var, action, nest_level);
        }

        let changed = var.install(SavedValue { value: new_value, source: effective_source, extra });
        let report = var.flags.report && changed;
        let shown = if report { var.show() } else { String::new() };
        if report {
            self.reports.push((key, shown));
        }
        Ok(true)
    }

    /// Current textual value.
    pub fn get_config_option(
        &self,
        name: &str,
        missing_ok: bool,
        restrict_superuser: bool,
    ) -> CatalogResult<Option<String>> {
        let key = normalize_guc_name(name);
        let Some(var) = self.vars.get(&key) else {
            if missing_ok {
                return Ok(None);
            }
            return Err(Self::unknown(name));
        };
        if restrict_superuser && var.flags.superuser_show_only {
            return Err(CatalogError::permission(
                "guc_show_restricted".to_string(),
                format!("must be superuser to examine \"{}\"", var.name),
            ));
        }
        Ok(Some(var.show()))
    }

    /// Textual form of the value RESET would install.
    pub fn get_config_option_reset_value(&self, name: &str) -> CatalogResult<String> {
        let key = normalize_guc_name(name);
        self.vars
            .get(&key)
            .map(|v| v.show_reset())
            .ok_or_else(|| Self::unknown(name))
    }

    /// (name, value, description) for every variable, name-sorted; values
    /// only a superuser may see are masked unless allowed.
    pub fn show_all(&self, include_superuser_only: bool) -> Vec<(String, String, String)> {
        self.vars
            .values()
            .filter(|v| !v.flags.placeholder)
            .map(|v| {
                let shown = if v.flags.superuser_show_only && !include_superuser_only {
                    "<superuser only>".to_string()
                } else {
                    v.show()
                };
                (v.name.clone(), shown, v.short_desc.clone())
            })
            .collect()
    }

    /// Register a real variable over a placeholder (or fresh), re-applying
    /// any value the placeholder had absorbed.
    pub fn define_custom(&mut self, var: GucVar) -> CatalogResult<()> {
        let key = normalize_guc_name(&var.name);
        let prior = match self.vars.remove(&key) {
            None => None,
            Some(old) if old.flags.placeholder => Some((old.value.as_text(), old.source)),
            Some(old) => {
                let name = old.name.clone();
                self.vars.insert(key, old);
                return Err(CatalogError::duplicate(
                    "duplicate_parameter".to_string(),
                    format!("parameter \"{}\" is already defined", name),
                ));
            }
        };
        self.vars.insert(key.clone(), var);
        if let Some((text, source)) = prior {
            if source != GucSource::Default {
                if let Err(e) = self.set_config_option(
                    &key,
                    Some(&text),
                    GucContext::UserSet,
                    source,
                    GucAction::Set,
                    true,
                ) {
                    warn!(name = %key, error = %e, "placeholder value rejected by real parameter");
                }
            }
        }
        Ok(())
    }

    /// Enter a subtransaction; returns the new nesting level.
    pub fn begin_nested(&mut self) -> u32 {
        self.nest_level += 1;
        self.nest_level
    }

    /// Exit the current subtransaction, unwinding per-variable frames.
    pub fn end_nested(&mut self, is_commit: bool) {
        let level = self.nest_level;
        self.unwind(level, is_commit);
        if self.nest_level > 1 {
            self.nest_level -= 1;
        }
    }

    /// End the top-level transaction.
    pub fn end_transaction(&mut self, is_commit: bool) {
        self.unwind(1, is_commit);
        self.nest_level = 1;
    }

    fn unwind(&mut self, level: u32, is_commit: bool) {
        let mut changed: Vec<(String, String)> = Vec::new();
        for (name, var) in self.vars.iter_mut() {
            if pop_level(var, level, is_commit) && var.flags.report {
                changed.push((name.clone(), var.show()));
            }
        }
        self.reports.extend(changed);
    }

    /// Drain queued parameter-changed notices for wire reporting.
    pub fn take_report_notices(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.reports)
    }
}
