//! Axes: typed, ordered collections of columns with value binding.
//!
//! Columns are kept in insertion order; presentation order and the lookup
//! indexes are derived from that list and rebuilt after every mutation.
//!
//! Binding by axis type:
//!
//! - `Discrete`: exact match. Binary search over sorted columns, hash lookup
//!   for display-ordered ones.
//! - `Range`: first half-open interval containing the value, in presentation
//!   order.
//! - `Set`: first column whose set contains the value.
//! - `Nearest`: smallest distance; ties go to the earliest inserted column.
//! - `Rule`: by rule name.
//!
//! When nothing matches, the default column binds if the axis has one.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::column::{Column, ColumnValue, META_NAME};
use crate::coordinate::{ci_eq, fold_case};
use crate::error::{NCubeError, Result};
use crate::ids::{self, AxisId, ColumnId};
use crate::program::CellProgram;
use crate::range::RangeSet;
use crate::value::{Value, ValueType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AxisType {
    Discrete,
    Range,
    Set,
    Nearest,
    Rule,
}

impl AxisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisType::Discrete => "DISCRETE",
            AxisType::Range => "RANGE",
            AxisType::Set => "SET",
            AxisType::Nearest => "NEAREST",
            AxisType::Rule => "RULE",
        }
    }
}

impl fmt::Display for AxisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreferredOrder {
    Sorted,
    Display,
}

impl PreferredOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferredOrder::Sorted => "SORTED",
            PreferredOrder::Display => "DISPLAY",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Axis {
    id: AxisId,
    name: String,
    axis_type: AxisType,
    value_type: ValueType,
    preferred_order: PreferredOrder,
    fire_all: bool,
    meta: BTreeMap<String, Value>,
    columns: Vec<Column>,
    default_column: Option<Column>,
    // derived
    order: Vec<usize>,
    by_id: HashMap<ColumnId, usize>,
    by_key: HashMap<String, usize>,
}

impl Axis {
    pub fn new(
        name: impl Into<String>,
        axis_type: AxisType,
        value_type: ValueType,
        has_default: bool,
        preferred_order: PreferredOrder,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(NCubeError::invalid("axis name cannot be empty"));
        }
        match axis_type {
            AxisType::Rule if value_type != ValueType::Expression => {
                return Err(NCubeError::invalid(format!(
                    "rule axis '{name}' must use value type EXPRESSION"
                )));
            }
            AxisType::Rule if preferred_order != PreferredOrder::Display => {
                return Err(NCubeError::invalid(format!(
                    "rule axis '{name}' must use DISPLAY order"
                )));
            }
            AxisType::Nearest if has_default => {
                return Err(NCubeError::invalid(format!(
                    "nearest axis '{name}' cannot have a default column"
                )));
            }
            t if t != AxisType::Rule && value_type == ValueType::Expression => {
                return Err(NCubeError::invalid(format!(
                    "only rule axes may use value type EXPRESSION (axis '{name}')"
                )));
            }
            _ => {}
        }
        let mut axis = Self {
            id: ids::next_id(),
            name,
            axis_type,
            value_type,
            preferred_order,
            fire_all: true,
            meta: BTreeMap::new(),
            columns: Vec::new(),
            default_column: None,
            order: Vec::new(),
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        };
        if has_default {
            axis.add_default_column(None, BTreeMap::new())?;
        }
        Ok(axis)
    }

    /// Rule axis; `fire_all` decides whether every true condition fires.
    pub fn rule(name: impl Into<String>, has_default: bool, fire_all: bool) -> Result<Self> {
        let mut axis = Self::new(
            name,
            AxisType::Rule,
            ValueType::Expression,
            has_default,
            PreferredOrder::Display,
        )?;
        axis.fire_all = fire_all;
        Ok(axis)
    }

    pub fn discrete(name: impl Into<String>, value_type: ValueType, has_default: bool) -> Result<Self> {
        Self::new(name, AxisType::Discrete, value_type, has_default, PreferredOrder::Sorted)
    }

    pub fn range(name: impl Into<String>, value_type: ValueType, has_default: bool) -> Result<Self> {
        Self::new(name, AxisType::Range, value_type, has_default, PreferredOrder::Sorted)
    }

    // ─── accessors ─────────────────────────────────────────────

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn axis_type(&self) -> AxisType {
        self.axis_type
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn preferred_order(&self) -> PreferredOrder {
        self.preferred_order
    }

    pub fn fire_all(&self) -> bool {
        self.fire_all
    }

    pub fn is_rule(&self) -> bool {
        self.axis_type == AxisType::Rule
    }

    pub fn has_default(&self) -> bool {
        self.default_column.is_some()
    }

    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn default_column(&self) -> Option<&Column> {
        self.default_column.as_ref()
    }

    /// Columns in presentation order, default last.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.order
            .iter()
            .map(move |&i| &self.columns[i])
            .chain(self.default_column.iter())
    }

    /// Non-default columns in presentation order.
    pub fn columns_without_default(&self) -> impl Iterator<Item = &Column> {
        self.order.iter().map(move |&i| &self.columns[i])
    }

    /// Number of columns, default included.
    pub fn column_count(&self) -> usize {
        self.columns.len() + usize::from(self.default_column.is_some())
    }

    pub fn get_column(&self, id: ColumnId) -> Option<&Column> {
        match &self.default_column {
            Some(d) if d.id() == id => Some(d),
            _ => self.by_id.get(&id).map(|&i| &self.columns[i]),
        }
    }

    pub fn find_column_by_name(&self, name: &str) -> Option<&Column> {
        self.by_name(name).map(|i| &self.columns[i])
    }

    // ─── mutation ──────────────────────────────────────────────

    pub fn set_fire_all(&mut self, fire_all: bool) {
        self.fire_all = fire_all;
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.meta.insert(key.into(), value.into());
    }

    pub fn remove_meta(&mut self, key: &str) -> Option<Value> {
        self.meta.remove(key)
    }

    pub(crate) fn set_id(&mut self, id: AxisId) {
        ids::observe(id);
        self.id = id;
    }

    pub(crate) fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn add_column(&mut self, value: impl Into<ColumnValue>) -> Result<ColumnId> {
        self.add_column_with(value.into(), None, BTreeMap::new(), None)
    }

    /// Add a named rule column.
    pub fn add_rule(&mut self, name: &str, condition: Arc<dyn CellProgram>) -> Result<ColumnId> {
        let mut meta = BTreeMap::new();
        meta.insert(META_NAME.to_string(), Value::from(name));
        self.add_column_with(ColumnValue::Rule(condition), None, meta, None)
    }

    /// Full-control insert used by hydration and the cube API.
    pub fn add_column_with(
        &mut self,
        value: ColumnValue,
        display_order: Option<i32>,
        meta: BTreeMap<String, Value>,
        id: Option<ColumnId>,
    ) -> Result<ColumnId> {
        if let Some(id) = id {
            if self.get_column(id).is_some() {
                return Err(NCubeError::invalid(format!(
                    "column id {id} already exists on axis '{}'",
                    self.name
                )));
            }
        }
        if value.is_default() {
            if self.has_default() {
                return Err(NCubeError::invalid(format!(
                    "axis '{}' already has a default column",
                    self.name
                )));
            }
            if self.axis_type == AxisType::Nearest {
                return Err(NCubeError::invalid(format!(
                    "nearest axis '{}' cannot have a default column",
                    self.name
                )));
            }
            return self.add_default_column(id, meta);
        }

        let value = self.normalize(value)?;
        self.check_unique(&value, &meta, None)?;

        let id = match id {
            Some(id) => {
                ids::observe(id);
                id
            }
            None => ids::next_id(),
        };
        let display_order = display_order.unwrap_or(self.columns.len() as i32);
        self.columns.push(Column::new(id, value, display_order, meta));
        self.reindex();
        Ok(id)
    }

    fn add_default_column(
        &mut self,
        id: Option<ColumnId>,
        meta: BTreeMap<String, Value>,
    ) -> Result<ColumnId> {
        let id = match id {
            Some(id) => {
                ids::observe(id);
                id
            }
            None => ids::next_id(),
        };
        self.default_column = Some(Column::new(id, ColumnValue::Default, i32::MAX, meta));
        Ok(id)
    }

    /// Replace a column's value, keeping its ID and therefore its cells.
    pub fn update_column(&mut self, id: ColumnId, value: impl Into<ColumnValue>) -> Result<()> {
        let idx = self.by_id.get(&id).copied().ok_or_else(|| {
            NCubeError::invalid(format!("column {id} not found on axis '{}'", self.name))
        })?;
        let value = self.normalize(value.into())?;
        let meta = self.columns[idx].meta().clone();
        self.check_unique(&value, &meta, Some(id))?;
        self.columns[idx].set_value(value);
        self.reindex();
        Ok(())
    }

    pub fn set_column_meta(&mut self, id: ColumnId, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if key == META_NAME && self.is_rule() {
            if let Some(name) = value.as_str() {
                if let Some(existing) = self.by_name(name) {
                    if self.columns[existing].id() != id {
                        return Err(NCubeError::invalid(format!(
                            "rule '{name}' already exists on axis '{}'",
                            self.name
                        )));
                    }
                }
            }
        }
        self.column_mut(id)?.set_meta(key, value);
        self.reindex();
        Ok(())
    }

    pub fn remove_column_meta(&mut self, id: ColumnId, key: &str) -> Result<Option<Value>> {
        let removed = self.column_mut(id)?.remove_meta(key);
        self.reindex();
        Ok(removed)
    }

    pub fn set_display_order(&mut self, id: ColumnId, order: i32) -> Result<()> {
        self.column_mut(id)?.set_display_order(order);
        self.reindex();
        Ok(())
    }

    pub fn delete_column(&mut self, id: ColumnId) -> Option<Column> {
        if self.default_column.as_ref().map(Column::id) == Some(id) {
            return self.default_column.take();
        }
        let idx = self.by_id.get(&id).copied()?;
        let removed = self.columns.remove(idx);
        self.reindex();
        Some(removed)
    }

    /// Delete the non-default column `value` binds to.
    pub fn delete_column_by_value(&mut self, value: &Value) -> Result<Option<Column>> {
        let id = match self.find_exact(value)? {
            Some(c) => c.id(),
            None => return Ok(None),
        };
        Ok(self.delete_column(id))
    }

    pub fn delete_column_by_name(&mut self, name: &str) -> Option<Column> {
        let id = self.find_column_by_name(name)?.id();
        self.delete_column(id)
    }

    fn column_mut(&mut self, id: ColumnId) -> Result<&mut Column> {
        if let Some(d) = self.default_column.as_mut().filter(|d| d.id() == id) {
            return Ok(d);
        }
        match self.by_id.get(&id) {
            Some(&i) => Ok(&mut self.columns[i]),
            None => Err(NCubeError::invalid(format!(
                "column {id} not found on axis '{}'",
                self.name
            ))),
        }
    }

    // ─── binding ───────────────────────────────────────────────

    /// Column `value` binds to, falling back to the default column.
    ///
    /// `Null` binds only to the default. A value that cannot be promoted to
    /// the axis type is an invalid argument.
    pub fn find_column(&self, value: &Value) -> Result<Option<&Column>> {
        if value.is_null() {
            return Ok(self.default_column.as_ref());
        }
        Ok(self.find_exact(value)?.or(self.default_column.as_ref()))
    }

    fn find_exact(&self, value: &Value) -> Result<Option<&Column>> {
        if self.is_rule() {
            return Ok(value.as_str().and_then(|n| self.find_column_by_name(n)));
        }
        let value = self.value_type.promote(value).map_err(|e| {
            NCubeError::invalid(format!("axis '{}': {}", self.name, strip_prefix(&e)))
        })?;
        if value.is_null() {
            return Ok(None);
        }
        let vt = self.value_type;
        let found = match self.axis_type {
            AxisType::Discrete => self.bind_discrete(&value),
            AxisType::Range => self.bind_range(&value),
            AxisType::Set => self
                .columns_without_default()
                .find(|c| matches!(c.value(), ColumnValue::Set(s) if s.contains(&value, vt))),
            AxisType::Nearest => self.bind_nearest(&value),
            AxisType::Rule => None,
        };
        Ok(found)
    }

    fn bind_discrete(&self, value: &Value) -> Option<&Column> {
        let vt = self.value_type;
        if self.preferred_order == PreferredOrder::Sorted {
            let pos = self
                .order
                .binary_search_by(|&i| match self.columns[i].value() {
                    ColumnValue::Discrete(v) => vt.compare(v, value),
                    _ => Ordering::Less,
                })
                .ok()?;
            Some(&self.columns[self.order[pos]])
        } else {
            self.by_key.get(&vt.key(value)).map(|&i| &self.columns[i])
        }
    }

    fn bind_range(&self, value: &Value) -> Option<&Column> {
        let vt = self.value_type;
        let contains = |c: &&Column| matches!(c.value(), ColumnValue::Range(r) if r.contains(value, vt));
        if self.preferred_order == PreferredOrder::Sorted {
            // Sorted by low bound: only ranges starting at or below the value can match.
            let upper = self.order.partition_point(|&i| match self.columns[i].value() {
                ColumnValue::Range(r) => vt.compare(&r.low, value) != Ordering::Greater,
                _ => true,
            });
            self.order[..upper]
                .iter()
                .map(|&i| &self.columns[i])
                .find(contains)
        } else {
            self.columns_without_default().find(contains)
        }
    }

    fn bind_nearest(&self, value: &Value) -> Option<&Column> {
        let vt = self.value_type;
        let mut best: Option<(f64, &Column)> = None;
        for column in &self.columns {
            let ColumnValue::Discrete(v) = column.value() else {
                continue;
            };
            let Some(d) = vt.distance(v, value) else {
                continue;
            };
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, column));
            }
        }
        best.map(|(_, c)| c)
    }

    /// Rule columns in presentation order, rotated to start at `name`.
    ///
    /// `None` when `name` is given but no rule has it.
    pub fn rule_columns_starting_at(&self, name: Option<&str>) -> Option<Vec<&Column>> {
        let ordered: Vec<&Column> = self.columns_without_default().collect();
        let Some(name) = name else {
            return Some(ordered);
        };
        let start = ordered
            .iter()
            .position(|c| c.name().is_some_and(|n| ci_eq(n, name)))?;
        let mut rotated = ordered[start..].to_vec();
        rotated.extend_from_slice(&ordered[..start]);
        Some(rotated)
    }

    // ─── internals ─────────────────────────────────────────────

    fn by_name(&self, name: &str) -> Option<usize> {
        self.by_key.get(&fold_case(name)).copied().filter(|_| self.is_rule())
    }

    /// Promote and shape-check a column value for this axis.
    fn normalize(&self, value: ColumnValue) -> Result<ColumnValue> {
        let vt = self.value_type;
        let wrong = |v: &ColumnValue| {
            NCubeError::invalid(format!(
                "{} column value not allowed on {} axis '{}'",
                v.kind(),
                self.axis_type,
                self.name
            ))
        };
        let normalized = match (self.axis_type, value) {
            (AxisType::Discrete | AxisType::Nearest, ColumnValue::Discrete(v)) => {
                let v = vt.promote(&v)?;
                if v.is_null() {
                    return Err(NCubeError::invalid(format!(
                        "column value on axis '{}' cannot be null",
                        self.name
                    )));
                }
                ColumnValue::Discrete(v)
            }
            (AxisType::Range, ColumnValue::Range(r)) => ColumnValue::Range(r.promoted(vt)?),
            (AxisType::Set, ColumnValue::Set(s)) => ColumnValue::Set(s.promoted(vt)?),
            (AxisType::Set, ColumnValue::Discrete(v)) => {
                ColumnValue::Set(RangeSet::new().with_value(v).promoted(vt)?)
            }
            (AxisType::Set, ColumnValue::Range(r)) => {
                ColumnValue::Set(RangeSet::new().with_range(r).promoted(vt)?)
            }
            (AxisType::Rule, v @ ColumnValue::Rule(_)) => v,
            (_, v) => return Err(wrong(&v)),
        };
        Ok(normalized)
    }

    fn check_unique(
        &self,
        value: &ColumnValue,
        meta: &BTreeMap<String, Value>,
        except: Option<ColumnId>,
    ) -> Result<()> {
        let vt = self.value_type;
        let others = || self.columns.iter().filter(move |c| Some(c.id()) != except);
        match value {
            ColumnValue::Discrete(v) => {
                if let Some(&i) = self.by_key.get(&vt.key(v)) {
                    if Some(self.columns[i].id()) != except {
                        return Err(NCubeError::invalid(format!(
                            "duplicate column value '{v}' on axis '{}'",
                            self.name
                        )));
                    }
                }
            }
            ColumnValue::Range(r) => {
                for other in others() {
                    if let ColumnValue::Range(o) = other.value() {
                        if r.compare(o, vt) == Ordering::Equal {
                            return Err(NCubeError::invalid(format!(
                                "duplicate range column '{r}' on axis '{}'",
                                self.name
                            )));
                        }
                        if r.overlaps(o, vt) {
                            warn!(axis = %self.name, new = %r, existing = %o, "overlapping range columns");
                        }
                    }
                }
            }
            ColumnValue::Set(set) => {
                if others().any(|o| matches!(o.value(), ColumnValue::Set(x) if x.same_members(set, vt))) {
                    return Err(NCubeError::invalid(format!(
                        "duplicate set column '{}' on axis '{}'",
                        set.canonical(),
                        self.name
                    )));
                }
            }
            ColumnValue::Rule(_) => {
                if let Some(name) = meta.get(META_NAME).and_then(Value::as_str) {
                    if let Some(i) = self.by_name(name) {
                        if Some(self.columns[i].id()) != except {
                            return Err(NCubeError::invalid(format!(
                                "rule '{name}' already exists on axis '{}'",
                                self.name
                            )));
                        }
                    }
                }
            }
            ColumnValue::Default => {}
        }
        Ok(())
    }

    fn column_cmp(&self, a: &Column, b: &Column) -> Ordering {
        let vt = self.value_type;
        match (a.value(), b.value()) {
            (ColumnValue::Discrete(x), ColumnValue::Discrete(y)) => vt.compare(x, y),
            (ColumnValue::Range(x), ColumnValue::Range(y)) => x.compare(y, vt),
            (ColumnValue::Set(x), ColumnValue::Set(y)) => x.compare(y, vt),
            _ => Ordering::Equal,
        }
    }

    fn reindex(&mut self) {
        let mut order: Vec<usize> = (0..self.columns.len()).collect();
        let sorted = self.preferred_order == PreferredOrder::Sorted && !self.is_rule();
        if sorted {
            order.sort_by(|&a, &b| self.column_cmp(&self.columns[a], &self.columns[b]));
        } else {
            order.sort_by_key(|&i| (self.columns[i].display_order(), i));
        }
        self.order = order;

        self.by_id = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id(), i))
            .collect();

        let vt = self.value_type;
        self.by_key = self
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c.value() {
                ColumnValue::Discrete(v) => Some((vt.key(v), i)),
                ColumnValue::Rule(_) => c.name().map(|n| (fold_case(n), i)),
                _ => None,
            })
            .collect();
    }
}

fn strip_prefix(err: &NCubeError) -> String {
    match err {
        NCubeError::InvalidArgument(msg) => msg.clone(),
        other => other.to_string(),
    }
}
