//! Coordinates, key-read tracking, and the canonical cell key.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::ids::ColumnId;
use crate::value::Value;

// ─── CiKey ────────────────────────────────────────────────────

/// Case folding shared by every name comparison: axes, cubes, input keys.
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

pub fn ci_eq(a: &str, b: &str) -> bool {
    a == b || fold_case(a) == fold_case(b)
}

/// Case-insensitive string key. Keeps the spelling it was created with.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CiKey(String);

impl CiKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> String {
        fold_case(&self.0)
    }
}

impl PartialEq for CiKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for CiKey {}

impl Hash for CiKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl Ord for CiKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl PartialOrd for CiKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CiKey {
    fn from(s: &str) -> Self {
        CiKey::new(s)
    }
}

impl From<String> for CiKey {
    fn from(s: String) -> Self {
        CiKey(s)
    }
}

// ─── Coordinate ───────────────────────────────────────────────

/// Input map from axis (or scope) name to value. Keys are case-insensitive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coordinate {
    entries: BTreeMap<CiKey, Value>,
}

impl Coordinate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(CiKey::new(key), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&CiKey::new(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(&CiKey::new(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&CiKey::new(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(CiKey::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay `other` on top of this coordinate.
    pub fn merge(&mut self, other: &Coordinate) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Coordinate {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut coord = Coordinate::new();
        for (k, v) in iter {
            coord.insert(k, v);
        }
        coord
    }
}

// ─── TrackedInput ─────────────────────────────────────────────

/// Validated, defensively copied input that logs which keys were read.
#[derive(Debug)]
pub struct TrackedInput {
    coordinate: Coordinate,
    reads: RefCell<BTreeSet<String>>,
}

impl TrackedInput {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            reads: RefCell::new(BTreeSet::new()),
        }
    }

    /// Read a key, recording the access.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let spelled = self
            .coordinate
            .entries
            .get_key_value(&CiKey::new(key))
            .map(|(k, _)| k.as_str().to_string())
            .unwrap_or_else(|| key.to_string());
        self.reads.borrow_mut().insert(spelled);
        self.coordinate.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.coordinate.contains_key(key)
    }

    /// Untracked view of the whole coordinate.
    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    pub fn keys_read(&self) -> BTreeSet<String> {
        self.reads.borrow().clone()
    }
}

// ─── ColumnIdSet ──────────────────────────────────────────────

/// Canonical cell key: one column ID per axis, order-free.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnIdSet(BTreeSet<ColumnId>);

impl ColumnIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ColumnId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.0.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ColumnId> for ColumnIdSet {
    fn from_iter<I: IntoIterator<Item = ColumnId>>(iter: I) -> Self {
        ColumnIdSet(iter.into_iter().collect())
    }
}

impl fmt::Display for ColumnIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "[{}]", ids.join(","))
    }
}
