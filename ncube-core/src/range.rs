//! Half-open ranges and range sets used as column values.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{NCubeError, Result};
use crate::value::{Value, ValueType};

/// `[low, high)`: low inclusive, high exclusive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub low: Value,
    pub high: Value,
}

impl Range {
    pub fn new(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self {
            low: low.into(),
            high: high.into(),
        }
    }

    /// Promote both bounds to `vt` and check `low < high`.
    pub fn promoted(&self, vt: ValueType) -> Result<Range> {
        let low = vt.promote(&self.low)?;
        let high = vt.promote(&self.high)?;
        if low.is_null() || high.is_null() {
            return Err(NCubeError::invalid("range bounds cannot be null"));
        }
        if vt.compare(&low, &high) != Ordering::Less {
            return Err(NCubeError::invalid(format!(
                "range low '{low}' must be less than high '{high}'"
            )));
        }
        Ok(Range { low, high })
    }

    pub fn contains(&self, value: &Value, vt: ValueType) -> bool {
        vt.compare(&self.low, value) != Ordering::Greater
            && vt.compare(value, &self.high) == Ordering::Less
    }

    pub fn overlaps(&self, other: &Range, vt: ValueType) -> bool {
        vt.compare(&self.low, &other.high) == Ordering::Less
            && vt.compare(&other.low, &self.high) == Ordering::Less
    }

    pub fn compare(&self, other: &Range, vt: ValueType) -> Ordering {
        vt.compare(&self.low, &other.low)
            .then_with(|| vt.compare(&self.high, &other.high))
    }

    pub fn to_value(&self) -> Value {
        Value::List(vec![self.low.clone(), self.high.clone()])
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

/// One member of a [`RangeSet`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetItem {
    Value(Value),
    Range(Range),
}

impl SetItem {
    fn matches(&self, value: &Value, vt: ValueType) -> bool {
        match self {
            SetItem::Value(v) => vt.compare(v, value) == Ordering::Equal,
            SetItem::Range(r) => r.contains(value, vt),
        }
    }

    fn sort_key(&self) -> &Value {
        match self {
            SetItem::Value(v) => v,
            SetItem::Range(r) => &r.low,
        }
    }

    fn canonical(&self) -> String {
        match self {
            SetItem::Value(v) => v.canonical(),
            SetItem::Range(r) => format!("{}..{}", r.low.canonical(), r.high.canonical()),
        }
    }
}

/// A column value made of discrete values and ranges, matched in declared order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeSet {
    pub items: Vec<SetItem>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.items.push(SetItem::Value(value.into()));
        self
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.items.push(SetItem::Range(range));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn promoted(&self, vt: ValueType) -> Result<RangeSet> {
        if self.items.is_empty() {
            return Err(NCubeError::invalid("range set cannot be empty"));
        }
        let items = self
            .items
            .iter()
            .map(|item| match item {
                SetItem::Value(v) => {
                    let v = vt.promote(v)?;
                    if v.is_null() {
                        return Err(NCubeError::invalid("range set values cannot be null"));
                    }
                    Ok(SetItem::Value(v))
                }
                SetItem::Range(r) => Ok(SetItem::Range(r.promoted(vt)?)),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RangeSet { items })
    }

    pub fn contains(&self, value: &Value, vt: ValueType) -> bool {
        self.items.iter().any(|item| item.matches(value, vt))
    }

    /// Columns on a set axis sort by their first member.
    pub fn compare(&self, other: &RangeSet, vt: ValueType) -> Ordering {
        match (self.items.first(), other.items.first()) {
            (Some(a), Some(b)) => vt.compare(a.sort_key(), b.sort_key()),
            (a, b) => a.is_some().cmp(&b.is_some()),
        }
    }

    /// Same members in the same order.
    pub fn same_members(&self, other: &RangeSet, vt: ValueType) -> bool {
        self.items.len() == other.items.len()
            && self.items.iter().zip(&other.items).all(|pair| match pair {
                (SetItem::Value(a), SetItem::Value(b)) => vt.compare(a, b) == Ordering::Equal,
                (SetItem::Range(a), SetItem::Range(b)) => a.compare(b, vt) == Ordering::Equal,
                _ => false,
            })
    }

    pub fn canonical(&self) -> String {
        let parts: Vec<String> = self.items.iter().map(SetItem::canonical).collect();
        format!("[{}]", parts.join(","))
    }

    pub fn to_value(&self) -> Value {
        Value::List(
            self.items
                .iter()
                .map(|item| match item {
                    SetItem::Value(v) => v.clone(),
                    SetItem::Range(r) => r.to_value(),
                })
                .collect(),
        )
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
