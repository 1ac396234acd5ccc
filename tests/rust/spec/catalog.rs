//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd project team.

use std::collections::BTreeSet;

use hdx::spec::{resolve_spec, HdChildKind};
use hdx::{HdAttributeSpec, HdError, HdGroupSpec, HdSpec, HdSpecCatalog};

fn text_attribute(name: &str) -> HdAttributeSpec {
    HdAttributeSpec::builder(name, format!("the {name}")).dtype("text").build().unwrap()
}

fn ephys_data() -> HdSpec {
    HdGroupSpec::builder("an ephys group")
        .data_type_def("EphysData")
        .attribute(text_attribute("attribute1"))
        .build()
        .unwrap()
        .into()
}

fn spike_data() -> HdSpec {
    HdGroupSpec::builder("spike data")
        .data_type_def("SpikeData")
        .data_type_inc("EphysData")
        .attribute(text_attribute("attribute2"))
        .build()
        .unwrap()
        .into()
}

fn attribute_names(spec: &HdSpec) -> BTreeSet<String> {
    spec.attributes().map(|attribute| attribute.name().to_string()).collect()
}

#[test]
fn test_identical_registration_succeeds() {
    let mut catalog = HdSpecCatalog::new();
    catalog.register_spec(ephys_data(), "ephys.yaml").unwrap();
    catalog.register_spec(ephys_data(), "ephys.yaml").unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.get_spec("EphysData").unwrap(), &ephys_data());
}

#[test]
fn test_different_registration_fails() {
    let mut catalog = HdSpecCatalog::new();
    catalog.register_spec(ephys_data(), "ephys.yaml").unwrap();
    let changed: HdSpec = HdGroupSpec::builder("a different body")
        .data_type_def("EphysData")
        .build()
        .unwrap()
        .into();
    let err = catalog.register_spec(changed, "other.yaml").unwrap_err();
    assert!(matches!(err, HdError::Catalog { .. }));
}

#[test]
fn test_untyped_spec_cannot_register() {
    let mut catalog = HdSpecCatalog::new();
    let untyped: HdSpec = HdGroupSpec::builder("plain").name("plain").build().unwrap().into();
    assert!(catalog.register_spec(untyped, "plain.yaml").is_err());
}

#[test]
fn test_hierarchy_and_subtypes() {
    let mut catalog = HdSpecCatalog::new();
    catalog.register_spec(ephys_data(), "ephys.yaml").unwrap();
    catalog.register_spec(spike_data(), "ephys.yaml").unwrap();

    assert_eq!(catalog.get_hierarchy("SpikeData").unwrap(), vec!["SpikeData", "EphysData"]);
    assert_eq!(catalog.get_subtypes("EphysData", true), vec!["SpikeData".to_string()]);
    assert!(catalog.get_subtypes("Unknown", true).is_empty());
    assert_eq!(catalog.get_spec_source_file("SpikeData").unwrap(), "ephys.yaml");

    let forest = catalog.get_full_hierarchy();
    assert!(forest["EphysData"].children.contains_key("SpikeData"));
}

#[test]
fn test_resolution_is_additive() {
    let mut catalog = HdSpecCatalog::new();
    catalog.register_spec(ephys_data(), "ephys.yaml").unwrap();
    let resolved = resolve_spec(&spike_data(), &catalog).unwrap();
    catalog.register_spec(resolved, "ephys.yaml").unwrap();

    let spike = catalog.get_spec("SpikeData").unwrap();
    let expected: BTreeSet<String> = ["attribute1", "attribute2"].iter().map(|name| name.to_string()).collect();
    assert_eq!(attribute_names(spike), expected);
    assert!(attribute_names(spike).is_superset(&attribute_names(catalog.get_spec("EphysData").unwrap())));
    assert!(spike.resolved());
    assert!(spike.is_inherited_spec(HdChildKind::Attribute, "attribute1"));
    assert!(!spike.is_inherited_spec(HdChildKind::Attribute, "attribute2"));
}
