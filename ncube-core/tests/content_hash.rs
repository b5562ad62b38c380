//! Content hash: order independence, serialization round trips, sensitivity.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ncube_core::{
    Axis, AxisType, CellValue, ClosureProgram, Coordinate, NCube, OpaqueProgram, PreferredOrder,
    ProgramLibrary, ProgramSpec, Range, ReferenceProgram, Value, ValueType,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rust_decimal::Decimal;

const GENDERS: [&str; 2] = ["male", "female"];
const AGES: [i64; 3] = [5, 30, 70];

fn gender_axis() -> Axis {
    let mut axis = Axis::discrete("Gender", ValueType::String, false).unwrap();
    for g in GENDERS {
        axis.add_column(g).unwrap();
    }
    axis
}

fn age_axis() -> Axis {
    let mut axis = Axis::range("Age", ValueType::Long, true).unwrap();
    axis.add_column(Range::new(0, 18)).unwrap();
    axis.add_column(Range::new(18, 65)).unwrap();
    axis.add_column(Range::new(65, 200)).unwrap();
    axis
}

fn build(age_first: bool, cells: &[((usize, usize), i64)]) -> NCube {
    let mut cube = NCube::new("Premium").unwrap();
    if age_first {
        cube.add_axis(age_axis()).unwrap();
        cube.add_axis(gender_axis()).unwrap();
    } else {
        cube.add_axis(gender_axis()).unwrap();
        cube.add_axis(age_axis()).unwrap();
    }
    for &((g, a), value) in cells {
        let at = Coordinate::new()
            .with("Gender", GENDERS[g])
            .with("Age", AGES[a]);
        cube.set_cell(&at, value).unwrap();
    }
    cube
}

fn arb_cells() -> impl Strategy<Value = (Vec<((usize, usize), i64)>, Vec<((usize, usize), i64)>)> {
    prop::collection::btree_map((0..GENDERS.len(), 0..AGES.len()), any::<i64>(), 0..6).prop_flat_map(
        |cells| {
            let cells: Vec<_> = cells.into_iter().collect();
            (Just(cells.clone()), Just(cells).prop_shuffle())
        },
    )
}

proptest! {
    /// Axis declaration order and cell insertion order never reach the hash.
    #[test]
    fn hash_ignores_axis_and_cell_order((cells, shuffled) in arb_cells()) {
        let a = build(false, &cells);
        let b = build(true, &shuffled);
        prop_assert_eq!(a.content_hash(), b.content_hash());
        prop_assert!(a == b);
    }

    /// Any single cell edit changes the hash.
    #[test]
    fn cell_edit_changes_hash((cells, _) in arb_cells(), bump in 1i64..1000) {
        prop_assume!(!cells.is_empty());
        let before = build(false, &cells);
        let mut edited = cells.clone();
        edited[0].1 = edited[0].1.wrapping_add(bump);
        let after = build(false, &edited);
        prop_assert_ne!(before.content_hash(), after.content_hash());
    }
}

fn library() -> ProgramLibrary {
    let mut lib = ProgramLibrary::new();
    lib.register(ClosureProgram::value("adult", |ctx| {
        ctx.input("age").and_then(Value::as_i64).is_some_and(|a| a >= 18)
    }))
    .register(ClosureProgram::value("minor", |ctx| {
        ctx.input("age").and_then(Value::as_i64).is_some_and(|a| a < 18)
    }));
    lib
}

/// A cube touching every cell and column kind the JSON form carries.
fn kitchen_sink(lib: &ProgramLibrary) -> NCube {
    let mut cube = NCube::new("Everything").unwrap();
    cube.set_meta("owner", "pricing");
    cube.set_meta("requiredScopeKeys", Value::List(vec!["age".into()]));

    let mut rules = Axis::rule("Eligibility", true, false).unwrap();
    rules.set_meta("note", 1);
    for label in ["adult", "minor"] {
        let program = lib.closure(label).unwrap().clone();
        rules.add_rule(label, Arc::new(program)).unwrap();
    }
    cube.add_axis(rules).unwrap();

    let mut state = Axis::new(
        "State",
        AxisType::Discrete,
        ValueType::CiString,
        true,
        PreferredOrder::Display,
    )
    .unwrap();
    let oh = state.add_column("OH").unwrap();
    state.add_column("TX").unwrap();
    state.set_column_meta(oh, "label", "Ohio").unwrap();
    cube.add_axis(state).unwrap();

    let at = |rule: &str, state: &str| Coordinate::new().with("Eligibility", rule).with("State", state);
    cube.set_cell(&at("adult", "OH"), Value::from(Decimal::new(1999, 2)))
        .unwrap();
    cube.set_cell(
        &at("adult", "TX"),
        Value::from(Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()),
    )
    .unwrap();
    cube.set_cell(&at("minor", "OH"), CellValue::Binary(vec![0xde, 0xad])).unwrap();
    cube.set_cell(&at("minor", "TX"), CellValue::program(ReferenceProgram::new("Minors")))
        .unwrap();
    cube.set_cell(
        &Coordinate::new().with("State", "TX"),
        CellValue::program(OpaqueProgram::new(ProgramSpec {
            url: Some("https://rules.example/tx.groovy".into()),
            cacheable: true,
            ..ProgramSpec::new("groovy", "input.age * 2")
        })),
    )
    .unwrap();
    cube.set_default_cell_value(Some(CellValue::Range(Range::new(0, 1))));
    cube
}

#[test]
fn json_round_trip_preserves_hash_and_form() {
    let lib = library();
    let cube = kitchen_sink(&lib);
    let json = cube.to_json().unwrap();
    let back = NCube::from_json(&json, &lib).unwrap();

    assert_eq!(back.content_hash(), cube.content_hash());
    assert_eq!(back.to_json().unwrap(), json);
    assert_eq!(back.referenced_cube_names().into_iter().collect::<Vec<_>>(), vec!["Minors"]);
}

#[test]
fn round_tripped_rules_still_evaluate() {
    let lib = library();
    let back = NCube::from_json(&kitchen_sink(&lib).to_json().unwrap(), &lib).unwrap();
    let mut output = ncube_core::Output::new();
    let value = back
        .get_cell(&Coordinate::new().with("age", 40).with("State", "oh"), &mut output)
        .unwrap();
    assert_eq!(value, Value::Decimal(Decimal::new(1999, 2)));
}

#[test]
fn hash_is_independent_of_column_ids() {
    let lib = library();
    assert_eq!(
        kitchen_sink(&lib).content_hash(),
        kitchen_sink(&lib).content_hash()
    );
}

#[test]
fn duplicate_keeps_content_but_not_name() {
    let cube = build(false, &[((0, 0), 1), ((1, 2), 2)]);
    let same = cube.duplicate("Premium").unwrap();
    let renamed = cube.duplicate("Premium2").unwrap();
    assert_eq!(same.content_hash(), cube.content_hash());
    assert_ne!(renamed.content_hash(), cube.content_hash());
    assert_eq!(renamed.cell_count(), cube.cell_count());
}

#[test]
fn structural_edits_change_hash() {
    let lib = library();
    let base = kitchen_sink(&lib);
    let hash = base.content_hash().to_string();

    let mut meta = base.clone();
    meta.set_meta("owner", "claims");
    assert_ne!(meta.content_hash(), hash);

    let mut fire = base.clone();
    fire.set_fire_all("Eligibility", true).unwrap();
    assert_ne!(fire.content_hash(), hash);

    let mut order = base.clone();
    let tx = order
        .axis("State")
        .and_then(|a| a.find_column(&Value::from("TX")).ok().flatten())
        .map(|c| c.id())
        .unwrap();
    order.set_display_order("State", tx, -1).unwrap();
    assert_ne!(order.content_hash(), hash);

    let mut renamed_axis = base.clone();
    renamed_axis.rename_axis("State", "Region").unwrap();
    assert_ne!(renamed_axis.content_hash(), hash);

    let mut default = base.clone();
    default.set_default_cell_value(None);
    assert_ne!(default.content_hash(), hash);

    let mut cleared = base.clone();
    cleared.clear_cells();
    assert_ne!(cleared.content_hash(), hash);
}

#[test]
fn sorted_axis_ignores_column_insertion_order() {
    let mut forward = Axis::discrete("Code", ValueType::String, false).unwrap();
    let mut backward = Axis::discrete("Code", ValueType::String, false).unwrap();
    for code in ["a", "b", "c"] {
        forward.add_column(code).unwrap();
    }
    for code in ["c", "b", "a"] {
        backward.add_column(code).unwrap();
    }
    let mut x = NCube::new("Codes").unwrap();
    x.add_axis(forward).unwrap();
    let mut y = NCube::new("Codes").unwrap();
    y.add_axis(backward).unwrap();
    assert_eq!(x.content_hash(), y.content_hash());
}

fn twin_rules(a: &str, b: &str) -> NCube {
    let always = Arc::new(ClosureProgram::value("true", |_| true));
    let mut rules = Axis::rule("Route", false, false).unwrap();
    rules.add_rule("A", always.clone()).unwrap();
    rules.add_rule("B", always).unwrap();
    let mut cube = NCube::new("Routing").unwrap();
    cube.add_axis(rules).unwrap();
    cube.set_cell(&Coordinate::new().with("Route", "A"), a).unwrap();
    cube.set_cell(&Coordinate::new().with("Route", "B"), b).unwrap();
    cube
}

#[test]
fn swapping_cells_between_same_condition_rules_changes_hash() {
    let ab = twin_rules("a", "b");
    let ba = twin_rules("b", "a");
    let run = |cube: &NCube| cube.get_cell(&Coordinate::new(), &mut ncube_core::Output::new()).unwrap();
    assert_ne!(run(&ab), run(&ba));
    assert_ne!(ab.content_hash(), ba.content_hash());
    assert!(ab != ba);
    assert_eq!(ab.content_hash(), twin_rules("a", "b").content_hash());
}

#[test]
fn range_bounds_do_not_run_together() {
    let cube = |low: &str, high: &str| {
        let mut axis = Axis::range("Code", ValueType::String, false).unwrap();
        axis.add_column(Range::new(low, high)).unwrap();
        let mut cube = NCube::new("Codes").unwrap();
        cube.add_axis(axis).unwrap();
        cube.set_cell(&Coordinate::new().with("Code", low), 1).unwrap();
        cube
    };
    assert_ne!(cube("a..b", "c").content_hash(), cube("a", "b..c").content_hash());
}
