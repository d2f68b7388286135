//! Per-variable state: declared type, setting context, value source, hooks
//! and the transactional scope stack.

use std::any::Any;
use std::sync::Arc;

use crate::error::CatalogResult;
use super::stack::StackFrame;
use super::value::{GucUnit, GucValue};

/// Who may change a variable, and when. Ordered from most to least
/// restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GucContext {
    /// Computed by the engine; never settable.
    Internal,
    /// Fixed at process start.
    Postmaster,
    /// Changeable only by configuration reload.
    SigHup,
    /// Fixed at backend/session start.
    Backend,
    /// Superuser-only at runtime.
    Superuser,
    /// Any user, any time.
    UserSet,
}

impl GucContext {
    pub fn tag(self) -> u8 {
        match self {
            GucContext::Internal => 0,
            GucContext::Postmaster => 1,
            GucContext::SigHup => 2,
            GucContext::Backend => 3,
            GucContext::Superuser => 4,
            GucContext::UserSet => 5,
        }
    }

    pub fn from_tag(tag: u8) -> Option<GucContext> {
        Some(match tag {
            0 => GucContext::Internal,
            1 => GucContext::Postmaster,
            2 => GucContext::SigHup,
            3 => GucContext::Backend,
            4 => GucContext::Superuser,
            5 => GucContext::UserSet,
            _ => return None,
        })
    }
}

/// Where a value came from. Higher priority sources override lower ones;
/// a set from a lower-priority source is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GucSource {
    Default,
    DynamicDefault,
    EnvVar,
    ConfigFile,
    Database,
    User,
    DatabaseUser,
    Client,
    Override,
    Interactive,
    Test,
    Session,
}

impl GucSource {
    pub fn tag(self) -> u8 {
        match self {
            GucSource::Default => 0,
            GucSource::DynamicDefault => 1,
            GucSource::EnvVar => 2,
            GucSource::ConfigFile => 3,
            GucSource::Database => 4,
            GucSource::User => 5,
            GucSource::DatabaseUser => 6,
            GucSource::Client => 7,
            GucSource::Override => 8,
            GucSource::Interactive => 9,
            GucSource::Test => 10,
            GucSource::Session => 11,
        }
    }

    pub fn from_tag(tag: u8) -> Option<GucSource> {
        Some(match tag {
            0 => GucSource::Default,
            1 => GucSource::DynamicDefault,
            2 => GucSource::EnvVar,
            3 => GucSource::ConfigFile,
            4 => GucSource::Database,
            5 => GucSource::User,
            6 => GucSource::DatabaseUser,
            7 => GucSource::Client,
            8 => GucSource::Override,
            9 => GucSource::Interactive,
            10 => GucSource::Test,
            11 => GucSource::Session,
            _ => return None,
        })
    }
}

/// SQL-visible scoping intent of one SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GucAction {
    /// Plain SET: survives commit.
    Set,
    /// SET LOCAL: transaction-scoped even on commit.
    Local,
    /// Function-scope save/restore.
    Save,
}

/// Declared type with bounds or option table.
#[derive(Debug, Clone)]
pub enum GucKind {
    Bool,
    Int { min: i64, max: i64 },
    Real { min: f64, max: f64 },
    Str,
    Enum { options: Vec<String> },
}

/// Auxiliary payload a check hook computes alongside a value. Shared
/// ownership: the payload lives exactly as long as any value slot or stack
/// frame still references it.
pub type ExtraPayload = Arc<dyn Any + Send + Sync>;

/// Check hook: validate (and possibly canonicalize) a candidate value,
/// optionally producing an extra payload.
pub type CheckHook =
    Arc<dyn Fn(&mut GucValue) -> CatalogResult<Option<ExtraPayload>> + Send + Sync>;
/// Assign hook: side-effecting observer of the new active value.
pub type AssignHook = Arc<dyn Fn(&GucValue, Option<&ExtraPayload>) + Send + Sync>;
/// Show hook: custom display override.
pub type ShowHook = Arc<dyn Fn(&GucValue) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GucFlags {
    /// Emit a parameter-changed notice to the client on every change.
    pub report: bool,
    /// Value only shown to superusers.
    pub superuser_show_only: bool,
    /// String value is an identifier: truncate to the name length limit.
    pub name_like: bool,
    /// Synthesized for an unknown qualified name; replaced when the module
    /// defining it registers the real variable.
    pub placeholder: bool,
}

/// A value together with its provenance and hook payload — the unit the
/// scope stack saves and restores.
#[derive(Clone)]
pub struct SavedValue {
    pub value: GucValue,
    pub source: GucSource,
    pub extra: Option<ExtraPayload>,
}

/// One registered configuration variable.
pub struct GucVar {
    pub name: String,
    pub short_desc: String,
    pub context: GucContext,
    pub kind: GucKind,
    pub unit: GucUnit,
    pub flags: GucFlags,

    pub boot_value: GucValue,
    pub reset_value: GucValue,
    pub reset_source: GucSource,
    pub reset_extra: Option<ExtraPayload>,

    pub value: GucValue,
    pub source: GucSource,
    pub extra: Option<ExtraPayload>,
    /// Config-file provenance, carried through worker serialization.
    pub source_file: Option<String>,
    pub source_line: Option<u32>,

    pub stack: Vec<StackFrame>,

    pub check_hook: Option<CheckHook>,
    pub assign_hook: Option<AssignHook>,
    pub show_hook: Option<ShowHook>,

    /// Names of variables that must be applied before this one when a
    /// serialized configuration is restored.
    pub apply_after: Vec<String>,
}

impl GucVar {
    pub fn new(name: &str, short_desc: &str, context: GucContext, kind: GucKind, boot: GucValue) -> GucVar {
        GucVar {
            name: name.to_string(),
            short_desc: short_desc.to_string(),
            context,
            kind,
            unit: GucUnit::None,
            flags: GucFlags::default(),
            boot_value: boot.clone(),
            reset_value: boot.clone(),
            reset_source: GucSource::Default,
            reset_extra: None,
            value: boot,
            source: GucSource::Default,
            extra: None,
            source_file: None,
            source_line: None,
            stack: Vec::new(),
            check_hook: None,
            assign_hook: None,
            show_hook: None,
            apply_after: Vec::new(),
        }
    }

    /// Snapshot the active value for a stack frame or for masking.
    pub fn saved(&self) -> SavedValue {
        SavedValue {
            value: self.value.clone(),
            source: self.source,
            extra: self.extra.clone(),
        }
    }

    /// Install a saved value as the active one, running the assign hook.
    pub fn install(&mut self, saved: SavedValue) -> bool {
        let changed = self.value != saved.value;
        if let Some(assign) = &self.assign_hook {
            assign(&saved.value, saved.extra.as_ref());
        }
        self.value = saved.value;
        self.source = saved.source;
        self.extra = saved.extra;
        changed
    }

    /// Displayed textual form: show hook, else canonical rendering.
    pub fn show(&self) -> String {
        if let Some(hook) = &self.show_hook {
            return hook(&self.value);
        }
        match &self.value {
            GucValue::Int(i) => super::value::show_int(*i, self.unit),
            other => other.as_text(),
        }
    }

    pub fn show_reset(&self) -> String {
        match &self.reset_value {
            GucValue::Int(i) => super::value::show_int(*i, self.unit),
            other => other.as_text(),
        }
    }
}
