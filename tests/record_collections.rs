//! # Record + Collection Integration Tests
//!
//! Cross-module laws: initializer maps project back through `to_values`,
//! records survive adoption round-trips, and the flat collections keep
//! their ordering invariants under mixed workloads.

use std::sync::Arc;

use flatkit::flat::{FlatList, FlatSet};
use flatkit::records::{FieldDef, Record, Schema};
use flatkit::types::{FieldType, Value};

fn sensor_schema() -> Arc<Schema> {
    Schema::intern(
        Some("Sensor"),
        vec![
            FieldDef::new("id", FieldType::Uint32),
            FieldDef::new("reading", FieldType::Float64),
            FieldDef::array("window", FieldType::Float16, 4),
            FieldDef::new("label", FieldType::Utf8),
        ],
    )
    .unwrap()
}

#[test]
fn initializer_values_project_back_out() {
    let schema = sensor_schema();
    let init: Vec<(&str, Value)> = vec![
        ("id", Value::U32(11)),
        ("reading", Value::F64(-2.25)),
        (
            "window",
            Value::Array(vec![
                Value::F32(1.0),
                Value::F32(0.5),
                Value::F32(-1.5),
                Value::F32(2.0),
            ]),
        ),
        ("label", Value::str("室温")),
    ];
    let record = Record::with_values(&schema, &init).unwrap();
    let values = record.to_values().unwrap();

    for (name, expected) in &init {
        assert_eq!(&values[*name], expected, "field {}", name);
    }

    // Reopening the same buffer yields the same projection.
    let reopened = Record::from_bytes(&schema, record.as_bytes().to_vec()).unwrap();
    assert_eq!(reopened.to_values().unwrap(), values);
}

#[test]
fn variable_writes_never_disturb_other_fields() {
    let schema = sensor_schema();
    let mut record = Record::with_values(
        &schema,
        &[
            ("id", Value::U32(3)),
            ("reading", Value::F64(9.5)),
            ("label", Value::str("short")),
        ],
    )
    .unwrap();

    for label in ["a much longer label than before", "", "mid", "🌡️"] {
        record.set_str("label", label).unwrap();
        assert_eq!(record.get_str("label").unwrap(), label);
        assert_eq!(record.get_u64("id").unwrap(), 3);
        assert_eq!(record.get_f64("reading").unwrap(), 9.5);
    }
}

#[test]
fn flat_list_sorts_a_shuffled_load() {
    let schema = Schema::intern(
        Some("Score"),
        vec![
            FieldDef::new("rank", FieldType::Uint32),
            FieldDef::new("delta", FieldType::Int16),
        ],
    )
    .unwrap();
    let mut list = FlatList::new(&schema).unwrap();

    // Deterministic shuffle: stride through the range with a coprime step.
    let n = 101u32;
    for i in 0..n {
        let rank = (i * 37) % n;
        list.push(
            &Record::with_values(
                &schema,
                &[
                    ("rank", Value::U32(rank)),
                    ("delta", Value::I16(-(rank as i16))),
                ],
            )
            .unwrap(),
        )
        .unwrap();
    }

    list.sort_by(|a, b| a.get_u64("rank").unwrap().cmp(&b.get_u64("rank").unwrap()));

    let mut previous = None;
    for view in list.iter() {
        let rank = view.get_u64("rank").unwrap();
        if let Some(p) = previous {
            assert!(p < rank, "ranks out of order: {} then {}", p, rank);
        }
        assert_eq!(view.get_i64("delta").unwrap(), -(rank as i64));
        previous = Some(rank);
    }
}

#[test]
fn flat_set_stays_sorted_and_unique_under_churn() {
    let schema = Schema::intern(
        Some("Member"),
        vec![FieldDef::new("key", FieldType::Uint32)],
    )
    .unwrap();
    let by_key = |a: &flatkit::records::RecordView<'_>, b: &flatkit::records::RecordView<'_>| {
        a.get_u64("key").unwrap().cmp(&b.get_u64("key").unwrap())
    };
    let member = |k: u32| Record::with_values(&schema, &[("key", Value::U32(k))]).unwrap();

    let mut set = FlatSet::new(&schema).unwrap();
    for i in 0..200u32 {
        set.add_by(&member((i * 71) % 100), by_key).unwrap();
    }
    assert_eq!(set.len(), 100, "duplicates rejected");

    for victim in [0usize, 50, 97] {
        set.remove(victim).unwrap();
    }
    for k in [1000u32, 0, 500] {
        set.add_by(&member(k), by_key).unwrap();
    }

    let keys: Vec<u64> = set.iter().map(|v| v.get_u64("key").unwrap()).collect();
    let mut expected = keys.clone();
    expected.sort_unstable();
    expected.dedup();
    assert_eq!(keys, expected);
}

#[test]
fn list_buffers_adopt_across_instances() {
    let schema = Schema::intern(
        Some("Pair2"),
        vec![
            FieldDef::new("a", FieldType::Uint16),
            FieldDef::new("b", FieldType::Uint16),
        ],
    )
    .unwrap();
    let mut list = FlatList::new(&schema).unwrap();
    for i in 0..10u16 {
        list.push(
            &Record::with_values(
                &schema,
                &[("a", Value::U16(i)), ("b", Value::U16(i * 2))],
            )
            .unwrap(),
        )
        .unwrap();
    }

    let adopted = FlatList::from_bytes(&schema, list.as_bytes().to_vec()).unwrap();
    assert_eq!(adopted.len(), 10);
    for (i, view) in adopted.iter().enumerate() {
        assert_eq!(view.get_u64("a").unwrap(), i as u64);
        assert_eq!(view.get_u64("b").unwrap(), (i * 2) as u64);
    }
}
