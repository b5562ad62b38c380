//! The n-cube: named axes plus a sparse map of cells keyed by column IDs.
//!
//! Structural edits (axes, columns, cells, meta, default value) go through
//! `&mut NCube` and invalidate the cached content hash and any cached
//! program results. Evaluation lives in `engine`, hashing in `hash`.

use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::advice::Advice;
use crate::axis::Axis;
use crate::cell::CellValue;
use crate::column::{Column, ColumnValue};
use crate::coordinate::{ci_eq, ColumnIdSet, Coordinate};
use crate::error::{NCubeError, Result};
use crate::ids::ColumnId;
use crate::value::Value;

/// Results of cacheable program cells, keyed by cell.
#[derive(Debug, Default)]
pub(crate) struct ResultCache {
    values: RwLock<HashMap<ColumnIdSet, Value>>,
}

impl ResultCache {
    pub(crate) fn get(&self, key: &ColumnIdSet) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Publish a computed result. The first published value wins.
    pub(crate) fn publish(&self, key: &ColumnIdSet, value: Value) -> Value {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert(value)
            .clone()
    }

    pub(crate) fn clear(&self) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Clone for ResultCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct NCube {
    pub(crate) name: String,
    pub(crate) axes: Vec<Axis>,
    pub(crate) cells: HashMap<ColumnIdSet, CellValue>,
    pub(crate) default_cell_value: Option<CellValue>,
    pub(crate) meta: BTreeMap<String, Value>,
    pub(crate) advice: BTreeMap<String, Arc<dyn Advice>>,
    pub(crate) sha: OnceCell<String>,
    pub(crate) results: ResultCache,
}

impl NCube {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(NCubeError::invalid("cube name cannot be empty"));
        }
        Ok(Self {
            name,
            axes: Vec::new(),
            cells: HashMap::new(),
            default_cell_value: None,
            meta: BTreeMap::new(),
            advice: BTreeMap::new(),
            sha: OnceCell::new(),
            results: ResultCache::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy under a new name. Cells, axes and meta are shared by value;
    /// advice is not carried over.
    pub fn duplicate(&self, new_name: impl Into<String>) -> Result<NCube> {
        let mut copy = NCube::new(new_name)?;
        copy.axes = self.axes.clone();
        copy.cells = self.cells.clone();
        copy.default_cell_value = self.default_cell_value.clone();
        copy.meta = self.meta.clone();
        Ok(copy)
    }

    pub(crate) fn invalidate(&mut self) {
        self.sha = OnceCell::new();
        self.results.clear();
    }

    // ─── axes ──────────────────────────────────────────────────

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axis_position(name).map(|i| &self.axes[i])
    }

    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(Axis::name).collect()
    }

    pub fn has_rule_axis(&self) -> bool {
        self.axes.iter().any(Axis::is_rule)
    }

    pub(crate) fn axis_position(&self, name: &str) -> Option<usize> {
        self.axes
            .iter()
            .position(|a| ci_eq(a.name(), name))
    }

    fn axis_mut(&mut self, name: &str) -> Result<&mut Axis> {
        let idx = self.axis_position(name).ok_or_else(|| {
            NCubeError::invalid(format!("axis '{name}' not found on cube '{}'", self.name))
        })?;
        Ok(&mut self.axes[idx])
    }

    /// Add an axis. Existing cells cannot be re-addressed and are dropped.
    pub fn add_axis(&mut self, axis: Axis) -> Result<()> {
        if self.axis_position(axis.name()).is_some() {
            return Err(NCubeError::invalid(format!(
                "axis '{}' already exists on cube '{}'",
                axis.name(),
                self.name
            )));
        }
        if !self.cells.is_empty() {
            warn!(cube = %self.name, axis = axis.name(), cells = self.cells.len(), "adding axis clears existing cells");
            self.cells.clear();
        }
        self.axes.push(axis);
        self.invalidate();
        Ok(())
    }

    pub fn delete_axis(&mut self, name: &str) -> Result<Axis> {
        let idx = self.axis_position(name).ok_or_else(|| {
            NCubeError::invalid(format!("axis '{name}' not found on cube '{}'", self.name))
        })?;
        if !self.cells.is_empty() {
            warn!(cube = %self.name, axis = name, cells = self.cells.len(), "deleting axis clears existing cells");
            self.cells.clear();
        }
        let removed = self.axes.remove(idx);
        self.invalidate();
        Ok(removed)
    }

    pub fn rename_axis(&mut self, old: &str, new: &str) -> Result<()> {
        if new.trim().is_empty() {
            return Err(NCubeError::invalid("axis name cannot be empty"));
        }
        if let Some(existing) = self.axis_position(new) {
            if Some(existing) != self.axis_position(old) {
                return Err(NCubeError::invalid(format!(
                    "axis '{new}' already exists on cube '{}'",
                    self.name
                )));
            }
        }
        self.axis_mut(old)?.rename(new);
        self.invalidate();
        Ok(())
    }

    pub fn set_axis_meta(&mut self, axis: &str, key: &str, value: impl Into<Value>) -> Result<()> {
        self.axis_mut(axis)?.set_meta(key, value);
        self.invalidate();
        Ok(())
    }

    pub fn set_fire_all(&mut self, axis: &str, fire_all: bool) -> Result<()> {
        self.axis_mut(axis)?.set_fire_all(fire_all);
        self.invalidate();
        Ok(())
    }

    // ─── columns ───────────────────────────────────────────────

    pub fn add_column(&mut self, axis: &str, value: impl Into<ColumnValue>) -> Result<ColumnId> {
        let id = self.axis_mut(axis)?.add_column(value)?;
        self.invalidate();
        Ok(id)
    }

    pub fn add_column_with(
        &mut self,
        axis: &str,
        value: ColumnValue,
        display_order: Option<i32>,
        meta: BTreeMap<String, Value>,
    ) -> Result<ColumnId> {
        let id = self
            .axis_mut(axis)?
            .add_column_with(value, display_order, meta, None)?;
        self.invalidate();
        Ok(id)
    }

    pub fn add_rule(
        &mut self,
        axis: &str,
        name: &str,
        condition: Arc<dyn crate::program::CellProgram>,
    ) -> Result<ColumnId> {
        let id = self.axis_mut(axis)?.add_rule(name, condition)?;
        self.invalidate();
        Ok(id)
    }

    pub fn update_column(&mut self, axis: &str, id: ColumnId, value: impl Into<ColumnValue>) -> Result<()> {
        self.axis_mut(axis)?.update_column(id, value)?;
        self.invalidate();
        Ok(())
    }

    pub fn set_column_meta(
        &mut self,
        axis: &str,
        id: ColumnId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.axis_mut(axis)?.set_column_meta(id, key, value)?;
        self.invalidate();
        Ok(())
    }

    pub fn set_display_order(&mut self, axis: &str, id: ColumnId, order: i32) -> Result<()> {
        self.axis_mut(axis)?.set_display_order(id, order)?;
        self.invalidate();
        Ok(())
    }

    /// Delete a column and every cell addressed through it.
    pub fn delete_column(&mut self, axis: &str, id: ColumnId) -> Result<Option<Column>> {
        let removed = self.axis_mut(axis)?.delete_column(id);
        if let Some(column) = &removed {
            self.purge_cells(column.id());
        }
        Ok(removed)
    }

    pub fn delete_column_by_value(&mut self, axis: &str, value: &Value) -> Result<Option<Column>> {
        let removed = self.axis_mut(axis)?.delete_column_by_value(value)?;
        if let Some(column) = &removed {
            self.purge_cells(column.id());
        }
        Ok(removed)
    }

    pub fn delete_column_by_name(&mut self, axis: &str, name: &str) -> Result<Option<Column>> {
        let removed = self.axis_mut(axis)?.delete_column_by_name(name);
        if let Some(column) = &removed {
            self.purge_cells(column.id());
        }
        Ok(removed)
    }

    fn purge_cells(&mut self, id: ColumnId) {
        let before = self.cells.len();
        self.cells.retain(|key, _| !key.contains(id));
        debug!(cube = %self.name, column = id, purged = before - self.cells.len(), "column deleted");
        self.invalidate();
    }

    // ─── cells ─────────────────────────────────────────────────

    /// Cell key for a fully specified coordinate.
    ///
    /// Every axis must bind to exactly one column. Rule axes bind by rule
    /// name, or to their default column when the name is absent.
    pub fn get_coordinate_key(&self, coordinate: &Coordinate) -> Result<ColumnIdSet> {
        let mut key = ColumnIdSet::new();
        for axis in &self.axes {
            let value = coordinate.get(axis.name());
            let column = if axis.is_rule() {
                match value {
                    Some(Value::String(name)) => axis.find_column_by_name(name),
                    Some(Value::Null) | None => axis.default_column(),
                    Some(other) => {
                        return Err(NCubeError::invalid(format!(
                            "rule axis '{}' is addressed by rule name, got {other}",
                            axis.name()
                        )))
                    }
                }
            } else {
                axis.find_column(value.unwrap_or(&Value::Null))?
            };
            let column = column.ok_or_else(|| NCubeError::CoordinateNotFound {
                cube: self.name.clone(),
                axis: Some(axis.name().to_string()),
                value: value.map(Value::to_string),
                message: format!(
                    "value '{}' not found on axis '{}'",
                    value.map(Value::to_string).unwrap_or_else(|| "null".into()),
                    axis.name()
                ),
                chain: None,
            })?;
            key.insert(column.id());
        }
        Ok(key)
    }

    /// Check that `key` names exactly one existing column per axis.
    pub(crate) fn ensure_full_key(&self, key: &ColumnIdSet) -> Result<()> {
        if key.len() != self.axes.len() {
            return Err(NCubeError::invalid(format!(
                "cell key {key} must hold one column per axis ({} axes on cube '{}')",
                self.axes.len(),
                self.name
            )));
        }
        for axis in &self.axes {
            let hits = key.iter().filter(|id| axis.get_column(*id).is_some()).count();
            if hits != 1 {
                return Err(NCubeError::invalid(format!(
                    "cell key {key} must hold exactly one column of axis '{}'",
                    axis.name()
                )));
            }
        }
        Ok(())
    }

    pub fn set_cell(&mut self, coordinate: &Coordinate, value: impl Into<CellValue>) -> Result<()> {
        let key = self.get_coordinate_key(coordinate)?;
        self.cells.insert(key, value.into());
        self.invalidate();
        Ok(())
    }

    pub fn set_cell_by_ids(&mut self, key: ColumnIdSet, value: impl Into<CellValue>) -> Result<()> {
        self.ensure_full_key(&key)?;
        self.cells.insert(key, value.into());
        self.invalidate();
        Ok(())
    }

    pub fn remove_cell(&mut self, coordinate: &Coordinate) -> Result<Option<CellValue>> {
        let key = self.get_coordinate_key(coordinate)?;
        Ok(self.remove_cell_by_ids(&key))
    }

    pub fn remove_cell_by_ids(&mut self, key: &ColumnIdSet) -> Option<CellValue> {
        let removed = self.cells.remove(key);
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    pub fn get_cell_by_ids(&self, key: &ColumnIdSet) -> Option<&CellValue> {
        self.cells.get(key)
    }

    pub fn contains_cell_by_ids(&self, key: &ColumnIdSet) -> bool {
        self.cells.contains_key(key)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&ColumnIdSet, &CellValue)> {
        self.cells.iter()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn clear_cells(&mut self) {
        self.cells.clear();
        self.invalidate();
    }

    // ─── default value, meta, advice ──────────────────────────

    pub fn default_cell_value(&self) -> Option<&CellValue> {
        self.default_cell_value.as_ref()
    }

    pub fn set_default_cell_value(&mut self, value: Option<CellValue>) {
        self.default_cell_value = value;
        self.invalidate();
    }

    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.meta.insert(key.into(), value.into());
        self.invalidate();
    }

    pub fn remove_meta(&mut self, key: &str) -> Option<Value> {
        let removed = self.meta.remove(key);
        self.invalidate();
        removed
    }

    /// Attach advice around this cube's program cells. Replaces advice
    /// registered under the same name.
    pub fn apply_advice(&mut self, advice: Arc<dyn Advice>) {
        self.advice.insert(advice.name().to_string(), advice);
    }

    pub fn remove_advice(&mut self, name: &str) -> Option<Arc<dyn Advice>> {
        self.advice.remove(name)
    }

    pub fn advice_names(&self) -> Vec<&str> {
        self.advice.keys().map(String::as_str).collect()
    }

    /// Number of cached results from cacheable program cells.
    pub fn cached_result_count(&self) -> usize {
        self.results.len()
    }

    pub fn clear_cached_results(&self) {
        self.results.clear();
    }
}

impl PartialEq for NCube {
    /// Cubes are equal when their content hashes are.
    fn eq(&self, other: &Self) -> bool {
        self.content_hash() == other.content_hash()
    }
}

impl fmt::Debug for NCube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NCube")
            .field("name", &self.name)
            .field("axes", &self.axis_names())
            .field("cells", &self.cells.len())
            .field("advice", &self.advice_names())
            .finish()
    }
}

impl fmt::Display for NCube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.axis_names().join(" x "))
    }
}
