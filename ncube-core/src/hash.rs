//! Content hashing for cube identity.
//!
//! Algorithm:
//!   1. Cube name, default cell value, meta (sorted by key)
//!   2. Axes sorted by folded name; per axis its properties, sorted meta,
//!      then every non-default column's digest (kind, structural value,
//!      meta). Columns of display-ordered axes are sorted by (display order,
//!      digest) and carry their display order.
//!   3. Cells, independent of insertion order: each cell digests its sorted
//!      column labels plus its content; the sorted cell digests are digested
//!      together. A label is the axis name, the column digest, and how many
//!      columns with that digest precede it in presentation order, so it is
//!      unique within the axis.
//!   4. Hash: SHA-256 of ("v1:" + the above), hex encoded.
//!
//! Column IDs never enter the hash, so two cubes built independently with
//! the same content hash equal. Strings are length-prefixed. Values are
//! owned trees, so the deep digest cannot meet a cycle.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::axis::{Axis, PreferredOrder};
use crate::cell::CellValue;
use crate::column::{Column, ColumnValue};
use crate::coordinate::fold_case;
use crate::cube::NCube;
use crate::ids::ColumnId;
use crate::program::CellProgram;
use crate::range::{Range, RangeSet, SetItem};
use crate::value::Value;

/// Current hash version prefix.
pub const HASH_VERSION: &str = "v1";

impl NCube {
    /// Hex SHA-256 of the cube's content. Cached until the next mutation.
    pub fn content_hash(&self) -> &str {
        self.sha.get_or_init(|| compute_cube_hash(self))
    }
}

pub(crate) fn compute_cube_hash(cube: &NCube) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:", HASH_VERSION).as_bytes());
    hasher.update(cube.name().as_bytes());
    hasher.update(b"\n");

    if let Some(default) = cube.default_cell_value() {
        hasher.update(b"default:");
        update_cell(&mut hasher, default);
        hasher.update(b"\n");
    }
    update_meta(&mut hasher, cube.meta());

    let mut axes: Vec<&Axis> = cube.axes().iter().collect();
    axes.sort_by_key(|a| fold_case(a.name()));
    for axis in &axes {
        update_axis(&mut hasher, axis);
    }

    hasher.update(b"cells:");
    hasher.update(cells_digest(cube).as_bytes());

    hex::encode(hasher.finalize())
}

/// Digest of a single value, type-tagged and structural.
pub fn compute_value_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    update_value(&mut hasher, value);
    hex::encode(hasher.finalize())
}

fn update_axis(hasher: &mut Sha256, axis: &Axis) {
    hasher.update(b"axis:");
    hasher.update(axis.name().as_bytes());
    hasher.update(b"|");
    hasher.update(axis.preferred_order().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(axis.axis_type().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(axis.value_type().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(if axis.has_default() { b"default" as &[u8] } else { b"nodefault" });
    // fire_all=true is the norm; only the exception is recorded.
    if !axis.fire_all() {
        hasher.update(b"|fireOne");
    }
    hasher.update(b"\n");
    update_meta(hasher, axis.meta());

    let mut columns: Vec<(&Column, String)> = axis
        .columns_without_default()
        .map(|c| (c, column_digest(c)))
        .collect();
    let display = axis.preferred_order() == PreferredOrder::Display;
    if display {
        columns.sort_by(|(a, da), (b, db)| {
            a.display_order()
                .cmp(&b.display_order())
                .then_with(|| da.cmp(db))
        });
    }
    for (column, digest) in columns {
        hasher.update(b"col:");
        hasher.update(digest.as_bytes());
        if display {
            hasher.update(format!("@{}", column.display_order()).as_bytes());
        }
        hasher.update(b"\n");
    }
    if let Some(default) = axis.default_column() {
        update_meta(hasher, default.meta());
    }
}

/// Kind, structural value and meta of one column. The rule name lives in
/// meta, so same-condition rules still differ by name.
fn column_digest(column: &Column) -> String {
    let mut hasher = Sha256::new();
    hasher.update(column.value().kind().as_bytes());
    hasher.update(b":");
    match column.value() {
        ColumnValue::Discrete(v) => update_value(&mut hasher, v),
        ColumnValue::Range(r) => update_range(&mut hasher, r),
        ColumnValue::Set(set) => update_range_set(&mut hasher, set),
        ColumnValue::Rule(program) => update_program(&mut hasher, program.as_ref()),
        ColumnValue::Default => {}
    }
    update_meta(&mut hasher, column.meta());
    hex::encode(hasher.finalize())
}

/// Cell labels per column ID, unique within each axis.
fn column_labels(cube: &NCube) -> HashMap<ColumnId, String> {
    let mut labels = HashMap::new();
    for axis in cube.axes() {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for column in axis.columns() {
            let digest = column_digest(column);
            let occurrence = seen.entry(digest.clone()).or_default();
            labels.insert(
                column.id(),
                format!("{}:{}:{}#{}", axis.name().len(), axis.name(), digest, occurrence),
            );
            *occurrence += 1;
        }
    }
    labels
}

fn cells_digest(cube: &NCube) -> String {
    let labels = column_labels(cube);

    let mut digests: Vec<String> = cube
        .cells()
        .map(|(key, cell)| {
            let mut parts: Vec<&str> = key
                .iter()
                .filter_map(|id| labels.get(&id).map(String::as_str))
                .collect();
            parts.sort_unstable();

            let mut hasher = Sha256::new();
            hasher.update(parts.join(",").as_bytes());
            hasher.update(b"=");
            update_cell(&mut hasher, cell);
            hex::encode(hasher.finalize())
        })
        .collect();
    digests.sort_unstable();

    let mut hasher = Sha256::new();
    for d in &digests {
        hasher.update(d.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn update_meta(hasher: &mut Sha256, meta: &BTreeMap<String, Value>) {
    hasher.update(format!("meta:{}:", meta.len()).as_bytes());
    for (key, value) in meta {
        update_str(hasher, key);
        update_value(hasher, value);
    }
    hasher.update(b"\n");
}

fn update_cell(hasher: &mut Sha256, cell: &CellValue) {
    match cell {
        CellValue::Scalar(v) => update_value(hasher, v),
        CellValue::Binary(bytes) => {
            hasher.update(b"binary:");
            hasher.update(bytes);
            hasher.update(b";");
        }
        CellValue::Program(program) => update_program(hasher, program.as_ref()),
        CellValue::Range(r) => update_range(hasher, r),
        CellValue::RangeSet(set) => update_range_set(hasher, set),
    }
}

fn update_program(hasher: &mut Sha256, program: &dyn CellProgram) {
    hasher.update(b"program:");
    update_str(hasher, program.kind());
    update_str(hasher, program.source_url().unwrap_or(""));
    update_str(hasher, program.source_text().unwrap_or(""));
    hasher.update(if program.is_cacheable() { b"|cache;" as &[u8] } else { b"|nocache;" });
}

fn update_range(hasher: &mut Sha256, range: &Range) {
    hasher.update(b"range:");
    update_value(hasher, &range.low);
    update_value(hasher, &range.high);
}

fn update_range_set(hasher: &mut Sha256, set: &RangeSet) {
    hasher.update(format!("set:{}:", set.items.len()).as_bytes());
    for item in &set.items {
        match item {
            SetItem::Value(v) => update_value(hasher, v),
            SetItem::Range(r) => update_range(hasher, r),
        }
    }
}

fn update_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::List(items) => {
            hasher.update(format!("list:{}:", items.len()).as_bytes());
            for item in items {
                update_value(hasher, item);
            }
        }
        Value::Map(map) => {
            hasher.update(format!("map:{}:", map.len()).as_bytes());
            for (k, v) in map {
                update_str(hasher, k);
                update_value(hasher, v);
            }
        }
        scalar => {
            hasher.update(scalar.type_name().as_bytes());
            hasher.update(b":");
            update_str(hasher, &scalar.canonical());
        }
    }
}

fn update_str(hasher: &mut Sha256, s: &str) {
    hasher.update(format!("{}:", s.len()).as_bytes());
    hasher.update(s.as_bytes());
    hasher.update(b";");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_hash_is_deterministic() {
        let v = Value::List(vec![Value::Long(1), Value::from("a")]);
        assert_eq!(compute_value_hash(&v), compute_value_hash(&v.clone()));
        assert_eq!(compute_value_hash(&v).len(), 64);
    }

    #[test]
    fn value_hash_distinguishes_types_and_nesting() {
        assert_ne!(
            compute_value_hash(&Value::Long(1)),
            compute_value_hash(&Value::from("1"))
        );
        let flat = Value::List(vec![Value::Long(1), Value::Long(2)]);
        let nested = Value::List(vec![Value::List(vec![Value::Long(1), Value::Long(2)])]);
        assert_ne!(compute_value_hash(&flat), compute_value_hash(&nested));
    }

    #[test]
    fn empty_cube_hash_depends_on_name() {
        let a = NCube::new("A").unwrap();
        let b = NCube::new("B").unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash(), NCube::new("A").unwrap().content_hash());
    }
}
