//! Flat (rule-free) lookup: binding, defaults, maps, column deletion, scope.

use ncube_core::{
    Axis, AxisType, CellValue, Coordinate, NCube, NCubeError, Output, PreferredOrder, Range,
    RangeSet, Value, ValueType,
};
use pretty_assertions::assert_eq;

fn coord<const N: usize>(pairs: [(&str, Value); N]) -> Coordinate {
    pairs.into_iter().collect()
}

fn gender_age() -> NCube {
    let mut cube = NCube::new("Premium").unwrap();
    let mut gender = Axis::discrete("Gender", ValueType::String, false).unwrap();
    gender.add_column("male").unwrap();
    gender.add_column("female").unwrap();
    let mut age = Axis::range("Age", ValueType::Long, false).unwrap();
    age.add_column(Range::new(0, 18)).unwrap();
    age.add_column(Range::new(18, 200)).unwrap();
    cube.add_axis(gender).unwrap();
    cube.add_axis(age).unwrap();
    cube
}

#[test]
fn range_binding_shares_a_cell() {
    let mut cube = gender_age();
    cube.set_cell(&coord([("Gender", "male".into()), ("Age", 10.into())]), 1.0)
        .unwrap();

    let mut output = Output::new();
    let value = cube
        .get_cell(&coord([("Gender", "male".into()), ("Age", 5.into())]), &mut output)
        .unwrap();
    assert_eq!(value, Value::Double(1.0));
    assert_eq!(
        output.rule_info.input_keys_used.iter().cloned().collect::<Vec<_>>(),
        vec!["Age".to_string(), "Gender".to_string()]
    );
}

#[test]
fn missing_cell_without_default_is_coordinate_not_found() {
    let mut cube = gender_age();
    cube.set_cell(&coord([("Gender", "male".into()), ("Age", 10.into())]), 1.0)
        .unwrap();
    let female = coord([("Gender", "female".into()), ("Age", 5.into())]);

    let err = cube.get_cell(&female, &mut Output::new()).unwrap_err();
    assert!(err.is_coordinate_not_found(), "{err}");

    cube.set_default_cell_value(Some(CellValue::from(0.5)));
    assert_eq!(
        cube.get_cell(&female, &mut Output::new()).unwrap(),
        Value::Double(0.5)
    );
}

#[test]
fn get_cell_with_default_applies_only_when_nothing_is_stored() {
    let mut cube = gender_age();
    let male = coord([("Gender", "male".into()), ("Age", 30.into())]);
    assert_eq!(
        cube.get_cell_with_default(&male, &mut Output::new(), 9).unwrap(),
        Value::Long(9)
    );
    cube.set_cell(&male, 2).unwrap();
    assert_eq!(
        cube.get_cell_with_default(&male, &mut Output::new(), 9).unwrap(),
        Value::Long(2)
    );
}

#[test]
fn unmatched_value_without_default_column_fails_binding() {
    let cube = gender_age();
    let err = cube
        .get_cell(&coord([("Gender", "male".into()), ("Age", 250.into())]), &mut Output::new())
        .unwrap_err();
    match err {
        NCubeError::CoordinateNotFound { axis, .. } => assert_eq!(axis.as_deref(), Some("Age")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn missing_required_key_is_invalid_argument() {
    let cube = gender_age();
    let err = cube
        .get_cell(&coord([("Gender", "male".into())]), &mut Output::new())
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(err.to_string().contains("Age"));
}

#[test]
fn default_column_catches_unmatched_and_absent_values() {
    let mut cube = NCube::new("States").unwrap();
    let mut state = Axis::discrete("State", ValueType::String, true).unwrap();
    state.add_column("OH").unwrap();
    cube.add_axis(state).unwrap();
    cube.set_cell(&coord([("State", "OH".into())]), "ohio").unwrap();
    cube.set_cell(&Coordinate::new(), "elsewhere").unwrap();

    assert_eq!(cube.required_scope().len(), 0);
    let mut output = Output::new();
    assert_eq!(
        cube.get_cell(&coord([("State", "TX".into())]), &mut output).unwrap(),
        Value::from("elsewhere")
    );
    assert_eq!(
        cube.get_cell(&Coordinate::new(), &mut output).unwrap(),
        Value::from("elsewhere")
    );
    assert_eq!(
        cube.get_cell(&coord([("state", "OH".into())]), &mut output).unwrap(),
        Value::from("ohio")
    );
}

#[test]
fn values_are_promoted_to_the_axis_type() {
    let mut cube = gender_age();
    cube.set_cell(&coord([("Gender", "female".into()), ("Age", "40".into())]), 3)
        .unwrap();
    assert_eq!(
        cube.get_cell(&coord([("Gender", "female".into()), ("Age", 41.7.into())]), &mut Output::new())
            .unwrap(),
        Value::Long(3)
    );
}

#[test]
fn set_axis_matches_values_and_ranges() {
    let mut cube = NCube::new("Regions").unwrap();
    let mut zip = Axis::new(
        "Zip",
        AxisType::Set,
        ValueType::Long,
        false,
        PreferredOrder::Display,
    )
    .unwrap();
    zip.add_column(RangeSet::new().with_value(10001).with_range(Range::new(20000, 30000)))
        .unwrap();
    zip.add_column(RangeSet::new().with_value(90210)).unwrap();
    cube.add_axis(zip).unwrap();
    cube.set_cell(&coord([("Zip", 10001.into())]), "east").unwrap();
    cube.set_cell(&coord([("Zip", 90210.into())]), "west").unwrap();

    let mut output = Output::new();
    assert_eq!(
        cube.get_cell(&coord([("Zip", 25000.into())]), &mut output).unwrap(),
        Value::from("east")
    );
    assert_eq!(
        cube.get_cell(&coord([("Zip", 90210.into())]), &mut output).unwrap(),
        Value::from("west")
    );
    assert!(cube
        .get_cell(&coord([("Zip", 30000.into())]), &mut output)
        .unwrap_err()
        .is_coordinate_not_found());
}

#[test]
fn nearest_axis_picks_the_closest_column() {
    let mut cube = NCube::new("Sizes").unwrap();
    let mut size = Axis::new(
        "Size",
        AxisType::Nearest,
        ValueType::Long,
        false,
        PreferredOrder::Sorted,
    )
    .unwrap();
    size.add_column(10).unwrap();
    size.add_column(20).unwrap();
    size.add_column(40).unwrap();
    cube.add_axis(size).unwrap();
    for (anchor, label) in [(10, "small"), (20, "medium"), (40, "large")] {
        cube.set_cell(&coord([("Size", anchor.into())]), label).unwrap();
    }

    let mut output = Output::new();
    let at = |n: i64, output: &mut Output| cube.get_cell(&coord([("Size", n.into())]), output).unwrap();
    assert_eq!(at(12, &mut output), Value::from("small"));
    assert_eq!(at(33, &mut output), Value::from("large"));
    // Equidistant from 10 and 20: the earlier column wins.
    assert_eq!(at(15, &mut output), Value::from("small"));
    assert_eq!(at(-100, &mut output), Value::from("small"));
}

#[test]
fn flat_lookup_is_repeatable() {
    let mut cube = gender_age();
    let at = coord([("Gender", "male".into()), ("Age", 30.into())]);
    cube.set_cell(&at, 7).unwrap();
    let first = cube.get_cell(&at, &mut Output::new()).unwrap();
    let second = cube.get_cell(&at, &mut Output::new()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn get_map_walks_one_wildcard_axis() {
    let mut cube = gender_age();
    cube.set_cell(&coord([("Gender", "male".into()), ("Age", 10.into())]), 1)
        .unwrap();
    cube.set_cell(&coord([("Gender", "female".into()), ("Age", 10.into())]), 2)
        .unwrap();

    let mut output = Output::new();
    let all = cube
        .get_map(
            &coord([("Gender", Value::List(vec![])), ("Age", 10.into())]),
            &mut output,
        )
        .unwrap();
    let mut all: Vec<(Value, Value)> = all;
    all.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert_eq!(
        all,
        vec![
            (Value::from("female"), Value::Long(2)),
            (Value::from("male"), Value::Long(1)),
        ]
    );

    let picked = cube
        .get_map(
            &coord([("Gender", Value::List(vec!["male".into()])), ("Age", 40.into())]),
            &mut output,
        )
        .unwrap();
    assert_eq!(picked, vec![(Value::from("male"), Value::Null)]);

    let err = cube
        .get_map(&coord([("Gender", "male".into()), ("Age", 10.into())]), &mut output)
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn contains_cell_honours_use_default() {
    let mut cube = gender_age();
    let male = coord([("Gender", "male".into()), ("Age", 10.into())]);
    let female = coord([("Gender", "female".into()), ("Age", 10.into())]);
    cube.set_cell(&male, 1).unwrap();
    cube.set_default_cell_value(Some(CellValue::from(0)));

    assert!(cube.contains_cell(&male, false));
    assert!(!cube.contains_cell(&female, false));
    assert!(cube.contains_cell(&female, true));
    assert!(!cube.contains_cell(&coord([("Gender", "other".into()), ("Age", 10.into())]), true));
}

#[test]
fn deleting_a_column_purges_exactly_its_cells() {
    let mut cube = gender_age();
    for gender in ["male", "female"] {
        for age in [5, 50] {
            cube.set_cell(&coord([("Gender", gender.into()), ("Age", age.into())]), age)
                .unwrap();
        }
    }
    assert_eq!(cube.cell_count(), 4);
    let survivors: Vec<_> = cube
        .cells()
        .filter(|(_, v)| **v == CellValue::from(50))
        .map(|(k, _)| k.clone())
        .collect();

    let removed = cube
        .delete_column_by_value("Age", &Value::from(5))
        .unwrap()
        .unwrap();
    assert_eq!(cube.cell_count(), 2);
    assert!(cube.cells().all(|(k, _)| !k.contains(removed.id())));
    for key in &survivors {
        assert!(cube.contains_cell_by_ids(key));
    }
}

#[test]
fn declared_scope_keys_extend_required_and_optional() {
    let mut cube = gender_age();
    cube.set_meta("requiredScopeKeys", "region");
    cube.set_meta("optionalScopeKeys", Value::List(vec!["channel".into(), "age".into()]));

    let required: Vec<String> = cube.required_scope().into_iter().collect();
    assert_eq!(required, vec!["Age", "Gender", "region"]);
    let optional: Vec<String> = cube.optional_scope().into_iter().collect();
    assert_eq!(optional, vec!["channel"]);

    let err = cube
        .get_cell(&coord([("Gender", "male".into()), ("Age", 5.into())]), &mut Output::new())
        .unwrap_err();
    assert!(matches!(err, NCubeError::MissingScope { ref missing, .. } if missing == &vec!["region".to_string()]));
}

#[test]
fn non_ascii_axis_names_fold_the_same_for_axes_and_coordinates() {
    let mut cube = NCube::new("Tarif").unwrap();
    let mut age = Axis::range("ÄLTER", ValueType::Long, false).unwrap();
    age.add_column(Range::new(0, 18)).unwrap();
    cube.add_axis(age).unwrap();
    cube.set_cell(&coord([("älter", 10.into())]), "kind").unwrap();

    assert!(cube.axis("älter").is_some());
    assert_eq!(
        cube.get_cell(&coord([("Älter", 3.into())]), &mut Output::new()).unwrap(),
        Value::from("kind")
    );
    cube.rename_axis("älter", "Alter").unwrap();
    assert_eq!(cube.axis_names(), vec!["Alter"]);
}
