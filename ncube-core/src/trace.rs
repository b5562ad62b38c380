//! Evaluation trace returned alongside cell values.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::column::Column;
use crate::coordinate::{ci_eq, ColumnIdSet};
use crate::value::Value;

/// The columns chosen for one executed cell.
#[derive(Clone, Debug)]
pub struct Binding {
    pub cube_name: String,
    pub depth: usize,
    columns: Vec<(String, Column)>,
    pub value: Option<Value>,
}

impl Binding {
    pub fn new(cube_name: impl Into<String>, depth: usize) -> Self {
        Self {
            cube_name: cube_name.into(),
            depth,
            columns: Vec::new(),
            value: None,
        }
    }

    pub(crate) fn bind(&mut self, axis: &str, column: Column) {
        self.columns.push((axis.to_string(), column));
    }

    pub fn column_for(&self, axis: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(name, _)| ci_eq(name, axis))
            .map(|(_, c)| c)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(a, c)| (a.as_str(), c))
    }

    pub fn ids(&self) -> ColumnIdSet {
        self.columns.iter().map(|(_, c)| c.id()).collect()
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cube_name)?;
        for (i, (axis, column)) in self.columns.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{axis}={column}")?;
        }
        if let Some(v) = &self.value {
            write!(f, " -> {v}")?;
        }
        Ok(())
    }
}

/// Rule execution details for one top-level call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RuleInfo {
    #[serde(skip)]
    bindings: Vec<Binding>,
    pub rule_stopped: bool,
    pub jump_count: usize,
    pub conditions_evaluated: usize,
    pub input_keys_used: BTreeSet<String>,
}

impl RuleInfo {
    /// Executed bindings in execution order, across every nested cube.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn bindings_for(&self, cube: &str) -> impl Iterator<Item = &Binding> {
        let cube = cube.to_string();
        self.bindings
            .iter()
            .filter(move |b| ci_eq(&b.cube_name, &cube))
    }

    pub(crate) fn push(&mut self, binding: Binding) {
        self.bindings.push(binding);
    }

    pub(crate) fn note_keys(&mut self, keys: BTreeSet<String>) {
        self.input_keys_used.extend(keys);
    }
}

/// Output map shared by a call and everything it calls.
#[derive(Clone, Debug, Default)]
pub struct Output {
    pub values: BTreeMap<String, Value>,
    pub rule_info: RuleInfo,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}
