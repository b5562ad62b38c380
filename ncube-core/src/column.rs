use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::ids::ColumnId;
use crate::program::CellProgram;
use crate::range::{Range, RangeSet};
use crate::value::Value;

/// Column meta key holding a rule column's name.
pub const META_NAME: &str = "name";

/// What a column holds. `Default` marks the axis' catch-all column.
#[derive(Clone, Debug)]
pub enum ColumnValue {
    Discrete(Value),
    Range(Range),
    Set(RangeSet),
    /// Rule predicate, evaluated for truthiness during a rule pass.
    Rule(Arc<dyn CellProgram>),
    Default,
}

impl ColumnValue {
    pub fn is_default(&self) -> bool {
        matches!(self, ColumnValue::Default)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ColumnValue::Discrete(_) => "discrete",
            ColumnValue::Range(_) => "range",
            ColumnValue::Set(_) => "set",
            ColumnValue::Rule(_) => "rule",
            ColumnValue::Default => "default",
        }
    }

    /// Plain value view: ranges become `[low, high]`, sets become lists,
    /// rules their source text.
    pub fn to_value(&self) -> Value {
        match self {
            ColumnValue::Discrete(v) => v.clone(),
            ColumnValue::Range(r) => r.to_value(),
            ColumnValue::Set(s) => s.to_value(),
            ColumnValue::Rule(p) => p.source_text().map(Value::from).unwrap_or(Value::Null),
            ColumnValue::Default => Value::Null,
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            ColumnValue::Discrete(v) => v.canonical(),
            ColumnValue::Range(r) => format!("{}..{}", r.low.canonical(), r.high.canonical()),
            ColumnValue::Set(s) => s.canonical(),
            ColumnValue::Rule(p) => p.source_text().unwrap_or(p.kind()).to_string(),
            ColumnValue::Default => "default".to_string(),
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Range(r) => write!(f, "{r}"),
            other => f.write_str(&other.canonical()),
        }
    }
}

impl From<Value> for ColumnValue {
    fn from(v: Value) -> Self {
        ColumnValue::Discrete(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(s: &str) -> Self {
        ColumnValue::Discrete(Value::from(s))
    }
}

impl From<i64> for ColumnValue {
    fn from(n: i64) -> Self {
        ColumnValue::Discrete(Value::Long(n))
    }
}

impl From<i32> for ColumnValue {
    fn from(n: i32) -> Self {
        ColumnValue::Discrete(Value::Long(n as i64))
    }
}

impl From<f64> for ColumnValue {
    fn from(f: f64) -> Self {
        ColumnValue::Discrete(Value::Double(f))
    }
}

impl From<Range> for ColumnValue {
    fn from(r: Range) -> Self {
        ColumnValue::Range(r)
    }
}

impl From<RangeSet> for ColumnValue {
    fn from(s: RangeSet) -> Self {
        ColumnValue::Set(s)
    }
}

/// One address on an axis. Identity is the ID alone.
#[derive(Clone, Debug)]
pub struct Column {
    id: ColumnId,
    value: ColumnValue,
    display_order: i32,
    meta: BTreeMap<String, Value>,
}

impl Column {
    pub(crate) fn new(
        id: ColumnId,
        value: ColumnValue,
        display_order: i32,
        meta: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id,
            value,
            display_order,
            meta,
        }
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn value(&self) -> &ColumnValue {
        &self.value
    }

    pub fn display_order(&self) -> i32 {
        self.display_order
    }

    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Rule name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.meta.get(META_NAME).and_then(Value::as_str)
    }

    pub fn is_default(&self) -> bool {
        self.value.is_default()
    }

    pub(crate) fn set_value(&mut self, value: ColumnValue) {
        self.value = value;
    }

    pub(crate) fn set_display_order(&mut self, order: i32) {
        self.display_order = order;
    }

    pub(crate) fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta.insert(key.into(), value);
    }

    pub(crate) fn remove_meta(&mut self, key: &str) -> Option<Value> {
        self.meta.remove(key)
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Column {}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_id() {
        let a = Column::new(7, ColumnValue::from("OH"), 0, BTreeMap::new());
        let b = Column::new(7, ColumnValue::from("TX"), 3, BTreeMap::new());
        let c = Column::new(8, ColumnValue::from("OH"), 0, BTreeMap::new());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_prefers_rule_name() {
        let mut meta = BTreeMap::new();
        meta.insert(META_NAME.to_string(), Value::from("adult"));
        let named = Column::new(1, ColumnValue::from(5), 0, meta);
        assert_eq!(named.to_string(), "adult");
        let range = Column::new(2, ColumnValue::from(Range::new(0, 18)), 0, BTreeMap::new());
        assert_eq!(range.to_string(), "[0, 18)");
    }
}
