//! Scope discovery: which input keys a cube needs, may read, and which
//! other cubes it references.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cell::CellValue;
use crate::column::ColumnValue;
use crate::cube::NCube;
use crate::program::{CellProgram, ReferenceProgram, KIND_REF};
use crate::value::Value;

/// Cube meta key listing extra required input keys.
pub const REQUIRED_SCOPE_KEYS: &str = "requiredScopeKeys";
/// Cube meta key listing extra optional input keys.
pub const OPTIONAL_SCOPE_KEYS: &str = "optionalScopeKeys";

static INPUT_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\binput\.(\w+)").expect("input key pattern"));
static INPUT_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\binput\[\s*['"](\w+)['"]\s*\]"#).expect("input index pattern"));
static CUBE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([\w.]+)\s*\[").expect("cube ref pattern"));
static CUBE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([\w.]+)\s*\(").expect("cube call pattern"));

/// Input keys a program source reads (`input.key`, `input['key']`).
pub fn scan_input_keys(source: &str) -> BTreeSet<String> {
    INPUT_DOT
        .captures_iter(source)
        .chain(INPUT_INDEX.captures_iter(source))
        .map(|c| c[1].to_string())
        .collect()
}

/// Cube names a program source references (`@Cube[...]`, `$Cube(...)`).
pub fn scan_cube_references(source: &str) -> BTreeSet<String> {
    CUBE_REF
        .captures_iter(source)
        .chain(CUBE_CALL.captures_iter(source))
        .map(|c| c[1].to_string())
        .collect()
}

fn declared_keys(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::List(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

impl NCube {
    /// Keys every input must carry: axes without a default column (rule
    /// axes excluded) plus keys declared in cube meta.
    pub fn required_scope(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self
            .axes
            .iter()
            .filter(|a| !a.is_rule() && !a.has_default())
            .map(|a| a.name().to_string())
            .collect();
        keys.extend(declared_keys(self.meta_value(REQUIRED_SCOPE_KEYS)));
        keys
    }

    /// Keys the cube may read but does not require.
    pub fn optional_scope(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self
            .axes
            .iter()
            .filter(|a| a.is_rule() || a.has_default())
            .map(|a| a.name().to_string())
            .collect();
        keys.extend(declared_keys(self.meta_value(OPTIONAL_SCOPE_KEYS)));
        for program in self.programs() {
            if let Some(source) = program.source_text() {
                keys.extend(scan_input_keys(source));
            }
        }
        let required: BTreeSet<String> = self
            .required_scope()
            .into_iter()
            .map(|k| k.to_lowercase())
            .collect();
        keys.retain(|k| !required.contains(&k.to_lowercase()));
        keys
    }

    /// Names of cubes this cube's programs reference.
    pub fn referenced_cube_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for program in self.programs() {
            if let Some(source) = program.source_text() {
                let found = scan_cube_references(source);
                if found.is_empty() && program.kind() == KIND_REF {
                    // `ref` programs may be written as a bare cube name.
                    if let Ok(reference) = ReferenceProgram::parse(source) {
                        names.insert(reference.target().to_string());
                    }
                } else {
                    names.extend(found);
                }
            }
        }
        names
    }

    /// Every program in the cube: cells, the default value, rule conditions.
    pub(crate) fn programs(&self) -> impl Iterator<Item = &Arc<dyn CellProgram>> {
        let cells = self
            .cells
            .values()
            .chain(self.default_cell_value.iter())
            .filter_map(CellValue::as_program);
        let rules = self
            .axes
            .iter()
            .flat_map(|a| a.columns_without_default())
            .filter_map(|c| match c.value() {
                ColumnValue::Rule(p) => Some(p),
                _ => None,
            });
        cells.chain(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_keys_found_in_both_forms() {
        let keys = scan_input_keys("input.age > 5 && input['state'] == 'OH' || input[\"zip\"]");
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        assert_eq!(keys, vec!["age", "state", "zip"]);
    }

    #[test]
    fn cube_references_found_in_both_forms() {
        let refs = scan_cube_references("@Rates[input] + $tax.Table(input) + @ Not[x]");
        let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
        assert_eq!(refs, vec!["Rates", "tax.Table"]);
    }

    #[test]
    fn declared_keys_accept_lists_and_csv() {
        assert_eq!(
            declared_keys(Some(&Value::from("a, b,,c"))),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(
            declared_keys(Some(&Value::List(vec![Value::from("x"), Value::Long(1)]))),
            vec!["x".to_string()]
        );
        assert!(declared_keys(None).is_empty());
    }
}
