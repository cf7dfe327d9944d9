//! Stage manifest (`global.json`) parsing.
//!
//! A manifest is a JSON array of objects. Each object is checked against
//! [`FIELD_SCHEMA`] once; every field that is missing or has the wrong type
//! falls back to its default and is reported in [`ParsedEntry::defaulted`].
//! Only a manifest that cannot be read or is not a JSON array is an error.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::ManifestError;
use crate::types::{FileRef, TestCase};

/// File name of the manifest inside every stage directory.
pub const MANIFEST_FILE: &str = "global.json";

/// Visibility tag marking a file as shown to participants.
pub const VISIBLE_TAG: &str = "visible";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Shape expected for a manifest field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String, default `""`.
    Text,
    /// Boolean, default `false`.
    Flag,
    /// `[path, visibilityTag]`, default `("", false)`.
    File,
    /// Integer, default `0`. Fractional numbers truncate toward zero.
    Integer,
    /// Array of strings, default `[]`.
    TextList,
    /// Object, default `{}`.
    Object,
}

/// Destination of a decoded field on [`TestCase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Name,
    NameVisible,
    Active,
    Source,
    Input,
    Output,
    ExitCode,
    CompileExitCode,
    CompileTimeLimit,
    CompileMemoryLimit,
    RunTimeLimit,
    RunMemoryLimit,
    Cmp,
    Provide,
    Metainfo,
}

impl Slot {
    pub fn kind(self) -> FieldKind {
        match self {
            Slot::Name => FieldKind::Text,
            Slot::NameVisible | Slot::Active => FieldKind::Flag,
            Slot::Source | Slot::Input | Slot::Output => FieldKind::File,
            Slot::ExitCode
            | Slot::CompileExitCode
            | Slot::CompileTimeLimit
            | Slot::CompileMemoryLimit
            | Slot::RunTimeLimit
            | Slot::RunMemoryLimit => FieldKind::Integer,
            Slot::Cmp | Slot::Provide => FieldKind::TextList,
            Slot::Metainfo => FieldKind::Object,
        }
    }
}

/// One manifest key and where its value lands.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub slot: Slot,
}

/// Every field a manifest entry may carry.
pub const FIELD_SCHEMA: &[FieldSpec] = &[
    FieldSpec { key: "name", slot: Slot::Name },
    FieldSpec { key: "name_visible", slot: Slot::NameVisible },
    FieldSpec { key: "active", slot: Slot::Active },
    FieldSpec { key: "source", slot: Slot::Source },
    FieldSpec { key: "input", slot: Slot::Input },
    FieldSpec { key: "output", slot: Slot::Output },
    FieldSpec { key: "exitcode", slot: Slot::ExitCode },
    FieldSpec { key: "compileexitcode", slot: Slot::CompileExitCode },
    FieldSpec { key: "compiletimelimit", slot: Slot::CompileTimeLimit },
    FieldSpec { key: "compilememorylimit", slot: Slot::CompileMemoryLimit },
    FieldSpec { key: "runtimelimit", slot: Slot::RunTimeLimit },
    FieldSpec { key: "runtimememorylimit", slot: Slot::RunMemoryLimit },
    FieldSpec { key: "cmp", slot: Slot::Cmp },
    FieldSpec { key: "provide", slot: Slot::Provide },
    FieldSpec { key: "metainfo", slot: Slot::Metainfo },
];

// ---------------------------------------------------------------------------
// Parse results
// ---------------------------------------------------------------------------

/// Why a field fell back to its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultReason {
    Missing,
    WrongType,
}

/// A field of one entry that was replaced by its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultedField {
    pub field: &'static str,
    pub reason: DefaultReason,
}

/// A decoded manifest entry plus the fields that had to be defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub case: TestCase,
    pub defaulted: Vec<DefaultedField>,
}

impl ParsedEntry {
    pub fn was_defaulted(&self, field: &str) -> bool {
        self.defaulted.iter().any(|d| d.field == field)
    }
}

enum FieldValue {
    Text(String),
    Flag(bool),
    File(FileRef),
    Integer(i64),
    TextList(Vec<String>),
    Object(Map<String, Value>),
}

impl FieldKind {
    /// Decode `raw` as this kind; `None` means the value has the wrong type.
    fn decode(self, raw: &Value) -> Option<FieldValue> {
        match self {
            FieldKind::Text => raw.as_str().map(|s| FieldValue::Text(s.to_string())),
            FieldKind::Flag => raw.as_bool().map(FieldValue::Flag),
            FieldKind::File => decode_file_ref(raw).map(FieldValue::File),
            FieldKind::Integer => decode_integer(raw).map(FieldValue::Integer),
            FieldKind::TextList => {
                let items = raw.as_array()?;
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .map(FieldValue::TextList)
            }
            FieldKind::Object => raw.as_object().cloned().map(FieldValue::Object),
        }
    }
}

fn decode_file_ref(raw: &Value) -> Option<FileRef> {
    let items = raw.as_array()?;
    let path = match items.first() {
        None => return Some(FileRef::default()),
        Some(Value::String(path)) => path.as_str(),
        Some(_) => return None,
    };
    let visible = items.get(1).and_then(Value::as_str) == Some(VISIBLE_TAG);
    Some(FileRef::new(path, visible))
}

fn decode_integer(raw: &Value) -> Option<i64> {
    let Value::Number(number) = raw else {
        return None;
    };
    number
        .as_i64()
        .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}

fn apply(case: &mut TestCase, slot: Slot, value: FieldValue) {
    match (slot, value) {
        (Slot::Name, FieldValue::Text(v)) => case.name = v,
        (Slot::NameVisible, FieldValue::Flag(v)) => case.name_visible = v,
        (Slot::Active, FieldValue::Flag(v)) => case.active = v,
        (Slot::Source, FieldValue::File(v)) => case.source = v,
        (Slot::Input, FieldValue::File(v)) => case.input = v,
        (Slot::Output, FieldValue::File(v)) => case.output = v,
        (Slot::ExitCode, FieldValue::Integer(v)) => case.exitcode = v,
        (Slot::CompileExitCode, FieldValue::Integer(v)) => case.compileexitcode = v,
        (Slot::CompileTimeLimit, FieldValue::Integer(v)) => case.compiletimelimit = v,
        (Slot::CompileMemoryLimit, FieldValue::Integer(v)) => case.compilememorylimit = v,
        (Slot::RunTimeLimit, FieldValue::Integer(v)) => case.runtimelimit = v,
        (Slot::RunMemoryLimit, FieldValue::Integer(v)) => case.runtimememorylimit = v,
        (Slot::Cmp, FieldValue::TextList(v)) => case.cmp = v,
        (Slot::Provide, FieldValue::TextList(v)) => case.provide = v,
        (Slot::Metainfo, FieldValue::Object(v)) => case.metainfo = v,
        // decode() always follows slot.kind()
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Decode one manifest object. Never fails.
pub fn parse_entry(object: &Map<String, Value>) -> ParsedEntry {
    let mut case = TestCase::default();
    let mut defaulted = Vec::new();

    for spec in FIELD_SCHEMA {
        let raw = match object.get(spec.key) {
            None | Some(Value::Null) => {
                defaulted.push(DefaultedField {
                    field: spec.key,
                    reason: DefaultReason::Missing,
                });
                continue;
            }
            Some(raw) => raw,
        };
        match spec.slot.kind().decode(raw) {
            Some(value) => apply(&mut case, spec.slot, value),
            None => defaulted.push(DefaultedField {
                field: spec.key,
                reason: DefaultReason::WrongType,
            }),
        }
    }

    ParsedEntry { case, defaulted }
}

/// Parse manifest bytes. `origin` is only used in error messages and logs.
///
/// Array elements that are not objects are skipped with a warning.
pub fn parse_manifest(bytes: &[u8], origin: &Path) -> Result<Vec<ParsedEntry>, ManifestError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|source| ManifestError::Json {
        path: origin.to_path_buf(),
        source,
    })?;
    let entries = match value {
        Value::Array(entries) => entries,
        other => {
            return Err(ManifestError::NotAnArray {
                path: origin.to_path_buf(),
                found: json_type_name(&other),
            })
        }
    };

    let mut parsed = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match entry.as_object() {
            Some(object) => parsed.push(parse_entry(object)),
            None => tracing::warn!(
                "skipping manifest entry #{index} in {}: expected object, found {}",
                origin.display(),
                json_type_name(entry)
            ),
        }
    }
    Ok(parsed)
}

/// Read and parse the manifest at `path`.
pub fn load_manifest(path: &Path) -> Result<Vec<ParsedEntry>, ManifestError> {
    let bytes = std::fs::read(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(&bytes, path)
}

/// Read the manifest at `path`, treating any failure as "no test cases".
pub fn read_manifest(path: &Path) -> Vec<TestCase> {
    match load_manifest(path) {
        Ok(entries) => entries
            .into_iter()
            .map(|entry| {
                let wrong_type: Vec<&str> = entry
                    .defaulted
                    .iter()
                    .filter(|d| d.reason == DefaultReason::WrongType)
                    .map(|d| d.field)
                    .collect();
                if !wrong_type.is_empty() {
                    tracing::debug!(
                        "{}: entry '{}' defaulted wrongly-typed fields {:?}",
                        path.display(),
                        entry.case.name,
                        wrong_type
                    );
                }
                entry.case
            })
            .collect(),
        Err(err) => {
            tracing::warn!("{err}; stage yields no test cases");
            Vec::new()
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> ParsedEntry {
        parse_entry(value.as_object().expect("object"))
    }

    #[test]
    fn name_only_entry_defaults_everything_else() {
        let parsed = entry(json!({ "name": "t1" }));
        let case = &parsed.case;
        assert_eq!(case.name, "t1");
        assert!(!case.name_visible);
        assert!(!case.active);
        assert_eq!(case.source, FileRef::new("", false));
        assert_eq!(case.exitcode, 0);
        assert!(case.cmp.is_empty());
        assert!(case.provide.is_empty());
        assert!(case.metainfo.is_empty());
        assert_eq!(parsed.defaulted.len(), FIELD_SCHEMA.len() - 1);
        assert!(parsed
            .defaulted
            .iter()
            .all(|d| d.reason == DefaultReason::Missing));
    }

    #[test]
    fn schema_keys_are_unique() {
        let mut keys: Vec<_> = FIELD_SCHEMA.iter().map(|f| f.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), FIELD_SCHEMA.len());
    }

    #[test]
    fn wrong_types_are_reported_and_defaulted() {
        let parsed = entry(json!({
            "name": 7,
            "active": "yes",
            "exitcode": "zero",
            "cmp": ["a", 1],
            "metainfo": []
        }));
        assert_eq!(parsed.case.name, "");
        assert!(!parsed.case.active);
        assert_eq!(parsed.case.exitcode, 0);
        assert!(parsed.case.cmp.is_empty());
        assert!(parsed.case.metainfo.is_empty());
        for field in ["name", "active", "exitcode", "cmp", "metainfo"] {
            assert!(
                parsed
                    .defaulted
                    .contains(&DefaultedField { field, reason: DefaultReason::WrongType }),
                "{field} should be reported as wrong type"
            );
        }
    }

    #[test]
    fn fractional_limits_truncate() {
        let parsed = entry(json!({ "runtimelimit": 1500.9, "runtimememorylimit": -2.5 }));
        assert_eq!(parsed.case.runtimelimit, 1500);
        assert_eq!(parsed.case.runtimememorylimit, -2);
    }

    #[test]
    fn null_counts_as_missing() {
        let parsed = entry(json!({ "source": null }));
        assert!(parsed
            .defaulted
            .contains(&DefaultedField { field: "source", reason: DefaultReason::Missing }));
    }

    #[test]
    fn non_array_manifest_is_an_error() {
        let err = parse_manifest(br#"{"name":"t1"}"#, Path::new("s/global.json")).unwrap_err();
        assert!(matches!(err, ManifestError::NotAnArray { found: "object", .. }));
    }

    #[test]
    fn non_object_elements_are_skipped() {
        let parsed =
            parse_manifest(br#"[{"name":"a"}, 3, "x", {"name":"b"}]"#, Path::new("global.json"))
                .expect("parse");
        let names: Vec<_> = parsed.iter().map(|p| p.case.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn read_manifest_swallows_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(read_manifest(&tmp.path().join(MANIFEST_FILE)).is_empty());
    }

    #[test]
    fn read_manifest_swallows_invalid_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);
        std::fs::write(&path, "[{ not json").unwrap();
        assert!(read_manifest(&path).is_empty());
        assert!(matches!(
            load_manifest(&path).unwrap_err(),
            ManifestError::Json { .. }
        ));
    }
}
