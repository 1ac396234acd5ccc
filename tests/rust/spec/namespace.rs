//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd project team.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use hdx::spec::{export_spec, HdIncludeFrom, HdNamespaceBuilder, HdNamespaceInfo};
use hdx::{HdAttributeSpec, HdError, HdGroupSpec, HdNamespaceCatalog, HdSpec};

const NAMESPACE: &str = r#"
namespaces:
  - name: ephys
    doc: electrophysiology test types
    version: 0.1.0
    author: [Test Author]
    contact: [test@example.com]
    schema:
      - source: ephys.extensions.yaml
"#;

const EXTENSIONS: &str = r#"
groups:
  - data_type_def: EphysData
    doc: base ephys type
    attributes:
      - name: attribute1
        dtype: text
        doc: the first attribute
  - data_type_def: SpikeData
    data_type_inc: EphysData
    doc: spike data
    attributes:
      - name: attribute2
        dtype: text
        doc: the second attribute
"#;

fn write_fixture(dir: &Path) -> std::path::PathBuf {
    fs::write(dir.join("ephys.extensions.yaml"), EXTENSIONS).unwrap();
    let path = dir.join("ephys.namespace.yaml");
    fs::write(&path, NAMESPACE).unwrap();
    path
}

fn attribute_names(spec: &HdSpec) -> BTreeSet<String> {
    spec.attributes().map(|attribute| attribute.name().to_string()).collect()
}

#[test]
fn test_load_resolves_inheritance() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let mut catalog = HdNamespaceCatalog::new();
    let deps = catalog.load_namespaces(&path, true).unwrap();
    assert!(deps.contains_key("ephys"));
    assert_eq!(catalog.namespaces(), vec!["ephys"]);

    let spike = catalog.get_spec("ephys", "SpikeData").unwrap();
    let expected: BTreeSet<String> = ["attribute1", "attribute2"].iter().map(|name| name.to_string()).collect();
    assert_eq!(attribute_names(spike), expected);
    assert_eq!(catalog.get_hierarchy("ephys", "SpikeData").unwrap(), vec!["SpikeData", "EphysData"]);
    assert!(catalog.is_sub_data_type("ephys", "SpikeData", "EphysData").unwrap());
    assert!(!catalog.is_sub_data_type("ephys", "EphysData", "SpikeData").unwrap());
    assert_eq!(catalog.get_types("ephys.extensions.yaml"), vec!["EphysData", "SpikeData"]);
    assert_eq!(catalog.get_namespace("ephys").unwrap().version(), "0.1.0");
}

#[test]
fn test_load_without_resolution_keeps_own_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let mut catalog = HdNamespaceCatalog::new();
    catalog.load_namespaces(&path, false).unwrap();
    let spike = catalog.get_spec("ephys", "SpikeData").unwrap();
    assert_eq!(attribute_names(spike).len(), 1);
}

#[test]
fn test_reload_same_document_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let mut catalog = HdNamespaceCatalog::new();
    let first = catalog.load(&path).unwrap();
    let second = catalog.load(&path).unwrap();
    assert_eq!(first, second);
    assert_eq!(catalog.namespaces().len(), 1);
}

#[test]
fn test_reload_with_different_version_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let mut catalog = HdNamespaceCatalog::new();
    catalog.load(&path).unwrap();

    let other = dir.path().join("ephys2.namespace.yaml");
    fs::write(&other, NAMESPACE.replace("0.1.0", "0.2.0")).unwrap();
    let err = catalog.load(&other).unwrap_err();
    assert!(matches!(err, HdError::Catalog { .. }));
}

#[test]
fn test_missing_namespace_file() {
    let mut catalog = HdNamespaceCatalog::new();
    assert!(matches!(catalog.load("does/not/exist.yaml"), Err(HdError::Io(_))));
}

#[test]
fn test_export_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let info = HdNamespaceInfo::new("lab", "lab extensions").with_version("1.0.0");
    let mut builder = HdNamespaceBuilder::new(info).unwrap();

    let probe: HdSpec = HdGroupSpec::builder("a recording probe")
        .data_type_def("Probe")
        .attribute(HdAttributeSpec::builder("serial", "serial number").dtype("text").build().unwrap())
        .build()
        .unwrap()
        .into();
    export_spec(&mut builder, vec![probe], dir.path()).unwrap();
    assert!(dir.path().join("lab.namespace.yaml").exists());
    assert!(dir.path().join("lab.extensions.yaml").exists());

    let mut catalog = HdNamespaceCatalog::new();
    catalog.load(dir.path().join("lab.namespace.yaml")).unwrap();
    let probe = catalog.get_spec("lab", "Probe").unwrap();
    assert!(probe.get_attribute("serial").is_some());
}

#[test]
fn test_included_namespace_brings_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let info = HdNamespaceInfo::new("derived", "uses ephys").with_version("0.0.1");
    let mut builder = HdNamespaceBuilder::new(info).unwrap();
    builder
        .include_type("SpikeData", HdIncludeFrom::Namespace("ephys".to_string()))
        .unwrap();
    builder.export_to("derived.namespace.yaml", dir.path()).unwrap();

    let mut catalog = HdNamespaceCatalog::new();
    catalog.load(&path).unwrap();
    let deps = catalog.load(dir.path().join("derived.namespace.yaml")).unwrap();
    let included = &deps["derived"]["ephys"];
    assert!(included.contains(&"SpikeData".to_string()));
    assert!(included.contains(&"EphysData".to_string()));
    assert!(catalog.get_spec("derived", "EphysData").is_ok());
}

#[test]
fn test_version_required_on_write() {
    let info = HdNamespaceInfo::new("lab", "no version");
    assert!(matches!(HdNamespaceBuilder::new(info), Err(HdError::Validation { .. })));
}
