//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd project team.

use hdx::spec::{HdDimsSpec, HdShapeSpec};
use hdx::{HdAttributeSpec, HdDatasetSpec, HdDtype, HdError, HdGroupSpec, HdQuantity, HdSpec};

#[test]
fn test_quantity_table() {
    let table = [
        ("?", false, false),
        ("zero_or_one", false, false),
        ("1", true, false),
        ("*", false, true),
        ("zero_or_many", false, true),
        ("+", true, true),
        ("one_or_many", true, true),
    ];
    for (symbol, required, many) in table {
        let quantity = HdQuantity::parse(symbol).unwrap();
        assert_eq!(quantity.flags(), (required, many), "symbol {symbol}");
    }
    assert!(HdQuantity::parse("2").is_err());
    assert!(HdQuantity::parse("many").is_err());
    assert_eq!(HdQuantity::from_count(1).unwrap(), HdQuantity::ExactlyOne);
    assert!(HdQuantity::from_count(3).is_err());
}

#[test]
fn test_dims_and_shape_must_agree() {
    let err = HdDatasetSpec::builder("data")
        .name("data")
        .dtype("float")
        .shape(HdShapeSpec::Single(vec![None, Some(3)]))
        .dims(HdDimsSpec::Single(vec!["time".to_string()]))
        .build()
        .unwrap_err();
    assert!(matches!(err, HdError::Schema { .. }));

    let ok = HdDatasetSpec::builder("data")
        .name("data")
        .dtype("float")
        .shape(HdShapeSpec::Alternatives(vec![vec![None], vec![None, Some(3)]]))
        .dims(HdDimsSpec::Alternatives(vec![
            vec!["time".to_string()],
            vec!["time".to_string(), "xyz".to_string()],
        ]))
        .build()
        .unwrap();
    assert!(ok.shape().unwrap().matches(&[10, 3]));
    assert!(!ok.shape().unwrap().matches(&[10, 4]));
}

#[test]
fn test_dtype_synonyms() {
    assert_eq!(HdDtype::parse("float").unwrap(), HdDtype::Float32);
    assert_eq!(HdDtype::parse("double").unwrap(), HdDtype::Float64);
    assert_eq!(HdDtype::parse("utf8").unwrap(), HdDtype::Text);
    assert!(matches!(HdDtype::parse("quaternion"), Err(HdError::Schema { .. })));
}

#[test]
fn test_value_and_default_value_conflict() {
    let err = HdAttributeSpec::builder("attr1", "an attribute")
        .value("fixed")
        .default_value("other")
        .build()
        .unwrap_err();
    assert!(matches!(err, HdError::Schema { .. }));
}

#[test]
fn test_group_spec_from_yaml() {
    let yaml = r#"
data_type_def: Bar
doc: A test group
quantity: '*'
attributes:
  - name: attr1
    dtype: text
    doc: an attribute
datasets:
  - name: data
    dtype: int
    shape: [null]
    doc: some data
groups:
  - data_type_inc: Baz
    doc: nested typed group
    quantity: '?'
"#;
    let group: HdGroupSpec = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(group.data_type_def(), Some("Bar"));
    assert!(group.is_many());
    assert!(!group.required());
    assert!(group.get_attribute("attr1").is_some());
    assert_eq!(group.get_dataset("data").unwrap().dtype().unwrap().primitive(), Some(HdDtype::Int32));
    assert!(group.get_data_type("Baz").is_some());

    let spec = HdSpec::Group(group);
    assert_eq!(spec.data_type(), Some("Bar"));
    assert!(spec.referenced_types().contains("Baz"));
}

#[test]
fn test_invalid_quantity_in_yaml() {
    let yaml = r#"
data_type_def: Bar
doc: A test group
quantity: 'x'
"#;
    assert!(serde_yaml::from_str::<HdGroupSpec>(yaml).is_err());
}
