//! Interfaces to the collaborators the synchronizer depends on: the parser
//! that turns a loose source record into typed fields, and the clock that
//! reports when a source file last changed.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Declared type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Int,
    Real,
    Bool,
    String,
    /// Reference to another file; interned case-preserving.
    File,
    Equation,
    /// Intermediate of an equation; never stored.
    EquationVariable,
    /// Template include directive; never stored.
    Include,
}

impl FieldKind {
    /// Kinds that only exist while editing and are never written.
    pub fn is_internal(self) -> bool {
        matches!(self, FieldKind::EquationVariable | FieldKind::Include)
    }

    /// Parse the type names used by record templates.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "int"         => Some(FieldKind::Int),
            "real"        => Some(FieldKind::Real),
            "bool"        => Some(FieldKind::Bool),
            "string"      => Some(FieldKind::String),
            "file"        => Some(FieldKind::File),
            "equation"    => Some(FieldKind::Equation),
            "eqnvariable" => Some(FieldKind::EquationVariable),
            "include"     => Some(FieldKind::Include),
            _             => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldClass {
    #[default]
    Variable,
    Static,
    Picklist,
    /// Value is a `;`-separated list.
    Array,
}

impl FieldClass {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "variable" => Some(FieldClass::Variable),
            "static"   => Some(FieldClass::Static),
            "picklist" => Some(FieldClass::Picklist),
            "array"    => Some(FieldClass::Array),
            _          => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name:  String,
    pub kind:  FieldKind,
    pub class: FieldClass,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind, class: FieldClass, value: impl Into<String>) -> Self {
        Self { name: name.into(), kind, class, value: value.into() }
    }
}

/// A source record with every field resolved against its template.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub path:     PathBuf,
    /// Template file the record was built from, stored as `templateName`.
    pub template: String,
    pub fields:   Vec<Field>,
}

impl ResolvedRecord {
    /// Value of the `Class` field, which doubles as the record's index class.
    pub fn class(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("Class"))
            .map(|f| f.value.as_str())
            .unwrap_or("")
    }
}

/// Turns a loose source record into a [`ResolvedRecord`].
///
/// Called concurrently from sync workers; implementations must not rely on
/// call order.
pub trait RecordParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<ResolvedRecord>;
}

impl<F> RecordParser for F
where
    F: Fn(&Path) -> Result<ResolvedRecord> + Send + Sync,
{
    fn parse(&self, path: &Path) -> Result<ResolvedRecord> {
        self(path)
    }
}

/// Source modification times, in the same unit as stored record timestamps.
pub trait TimeSource: Send + Sync {
    fn modified(&self, path: &Path) -> io::Result<i64>;
}

/// Reads modification times from the file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsTimeSource;

impl TimeSource for FsTimeSource {
    fn modified(&self, path: &Path) -> io::Result<i64> {
        Ok(to_file_time(std::fs::metadata(path)?.modified()?))
    }
}

/// FILETIME ticks (100 ns) between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// Convert to FILETIME: 100 ns ticks since 1601-01-01 UTC.
pub fn to_file_time(t: SystemTime) -> i64 {
    let ticks = |d: std::time::Duration| d.as_secs() as i64 * 10_000_000 + (d.subsec_nanos() / 100) as i64;
    match t.duration_since(UNIX_EPOCH) {
        Ok(d)  => FILETIME_UNIX_EPOCH + ticks(d),
        Err(e) => FILETIME_UNIX_EPOCH - ticks(e.duration()),
    }
}

/// Inverse of [`to_file_time`], for display.
pub fn file_time_to_unix_nanos(ticks: i64) -> i64 {
    (ticks - FILETIME_UNIX_EPOCH).saturating_mul(100)
}
