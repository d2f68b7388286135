//! Typed configuration values and unit-suffix parsing.
//! ----------------------------------------------------
//! Raw SET input arrives as text. Parsing is per declared variable type;
//! integer variables may declare a base unit, in which case a recognized
//! suffix is converted through the fixed unit ladders (TB→GB→MB→kB for
//! memory, d→h→min→s→ms for time) before range checking. Failures carry a
//! hint listing the acceptable inputs.

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::ident::truncate_identifier;

/// A parsed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GucValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    /// Canonical (lower-cased) member of the variable's option table.
    Enum(String),
}

impl GucValue {
    pub fn as_text(&self) -> String {
        match self {
            GucValue::Bool(b) => if *b { "on".into() } else { "off".into() },
            GucValue::Int(i) => i.to_string(),
            GucValue::Real(r) => r.to_string(),
            GucValue::Str(s) | GucValue::Enum(s) => s.clone(),
        }
    }
}

/// Base unit a numeric variable is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GucUnit {
    None,
    /// Memory, in kilobytes.
    KiloBytes,
    /// Memory, in megabytes.
    MegaBytes,
    /// Time, in milliseconds.
    Milliseconds,
    /// Time, in seconds.
    Seconds,
    /// Time, in minutes.
    Minutes,
}

impl GucUnit {
    fn is_memory(self) -> bool {
        matches!(self, GucUnit::KiloBytes | GucUnit::MegaBytes)
    }

    /// Factor relative to the smallest unit of the ladder (kB or ms).
    fn base_factor(self) -> i64 {
        match self {
            GucUnit::None => 1,
            GucUnit::KiloBytes => 1,
            GucUnit::MegaBytes => 1024,
            GucUnit::Milliseconds => 1,
            GucUnit::Seconds => 1000,
            GucUnit::Minutes => 60 * 1000,
        }
    }

    fn hint(self) -> &'static str {
        if self.is_memory() {
            "Valid units for this parameter are \"kB\", \"MB\", \"GB\", and \"TB\"."
        } else {
            "Valid units for this parameter are \"ms\", \"s\", \"min\", \"h\", and \"d\"."
        }
    }
}

const MEMORY_LADDER: [(&str, i64); 4] =
    [("TB", 1024 * 1024 * 1024), ("GB", 1024 * 1024), ("MB", 1024), ("kB", 1)];

const TIME_LADDER: [(&str, i64); 5] = [
    ("d", 24 * 60 * 60 * 1000),
    ("h", 60 * 60 * 1000),
    ("min", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

pub fn parse_bool(input: &str) -> Option<bool> {
    let v = input.trim().to_ascii_lowercase();
    // unambiguous prefixes accepted, as for the original engine
    for (word, val) in [
        ("true", true), ("false", false),
        ("yes", true), ("no", false),
        ("on", true), ("off", false),
        ("1", true), ("0", false),
    ] {
        if !v.is_empty() && word.starts_with(&v) && (word != "on" || v == "on" || v == "o") {
            // "o" alone is ambiguous between on/off
            if v == "o" {
                return None;
            }
            return Some(val);
        }
    }
    None
}

/// Parse an integer with an optional unit suffix, converting into the
/// variable's declared base unit.
pub fn parse_int(name: &str, input: &str, unit: GucUnit) -> CatalogResult<i64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '-' && c != '+')
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let value: i64 = digits.trim().parse().map_err(|_| {
        CatalogError::validation(
            "invalid_integer".to_string(),
            format!("parameter \"{}\" requires an integer value: \"{}\"", name, input),
        )
    })?;
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return Ok(value);
    }
    if unit == GucUnit::None {
        return Err(CatalogError::validation(
            "unexpected_unit".to_string(),
            format!("parameter \"{}\" does not take a unit: \"{}\"", name, input),
        ));
    }
    let ladder: &[(&str, i64)] = if unit.is_memory() { &MEMORY_LADDER } else { &TIME_LADDER };
    let factor = ladder.iter().find(|(sfx, _)| *sfx == suffix).map(|(_, f)| *f);
    let Some(factor) = factor else {
        return Err(CatalogError::validation_hint(
            "invalid_unit".to_string(),
            format!("invalid value for parameter \"{}\": \"{}\"", name, input),
            unit.hint().to_string(),
        ));
    };
    // Convert through the smallest unit of the ladder, rounding toward zero
    // when the target base unit is coarser than the given one.
    let smallest = value.checked_mul(factor).ok_or_else(|| {
        CatalogError::validation(
            "out_of_range".to_string(),
            format!("value for parameter \"{}\" is out of range: \"{}\"", name, input),
        )
    })?;
    Ok(smallest / unit.base_factor())
}

pub fn parse_real(name: &str, input: &str) -> CatalogResult<f64> {
    input.trim().parse().map_err(|_| {
        CatalogError::validation(
            "invalid_real".to_string(),
            format!("parameter \"{}\" requires a numeric value: \"{}\"", name, input),
        )
    })
}

/// Match against the option table case-insensitively; the hint lists every
/// available value.
pub fn parse_enum(name: &str, input: &str, options: &[String]) -> CatalogResult<String> {
    let wanted = input.trim().to_ascii_lowercase();
    if options.iter().any(|o| *o == wanted) {
        return Ok(wanted);
    }
    Err(CatalogError::validation_hint(
        "invalid_enum_value".to_string(),
        format!("invalid value for parameter \"{}\": \"{}\"", name, input),
        format!("Available values: {}.", options.join(", ")),
    ))
}

/// String values flagged name-like are truncated to the identifier limit.
pub fn parse_string(input: &str, name_like: bool) -> String {
    if name_like {
        truncate_identifier(input.trim())
    } else {
        input.to_string()
    }
}

/// Canonical display of an integer value: re-expressed in the largest unit
/// of its ladder that divides it exactly.
pub fn show_int(value: i64, unit: GucUnit) -> String {
    if unit == GucUnit::None || value == 0 {
        return value.to_string();
    }
    let ladder: &[(&str, i64)] = if unit.is_memory() { &MEMORY_LADDER } else { &TIME_LADDER };
    // near i64::MAX the base conversion can overflow; show the raw number then
    let Some(in_smallest) = value.checked_mul(unit.base_factor()) else {
        return value.to_string();
    };
    for (sfx, factor) in ladder {
        if in_smallest % factor == 0 {
            return format!("{}{}", in_smallest / factor, sfx);
        }
    }
    value.to_string()
}
