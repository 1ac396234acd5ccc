//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd project team.

use std::sync::Arc;

use hdx::spec::{HdNamespaceInfo, HdRefSpec, HdShapeSpec, HdSpecNamespace};
use hdx::{
    HdAttributeSpec, HdBuildManager, HdBuildOptions, HdBuilderValue, HdContainerArena, HdContainerClass,
    HdContainerId, HdDatasetSpec, HdDynamicContainer, HdError, HdField, HdGroupSpec, HdMapperProfile,
    HdNamespaceCatalog, HdOverride, HdQuantity, HdReference, HdSpecCatalog, HdSpecDtype, HdTypeMap, HdValue,
};

#[derive(Clone, Debug, PartialEq)]
struct Foo {
    attr1: String,
    my_data: Vec<i64>,
    foos: Vec<HdContainerId>,
    sibling: Option<HdContainerId>,
}

impl Foo {
    fn new(attr1: &str, my_data: Vec<i64>) -> Self {
        Self {
            attr1: attr1.to_string(),
            my_data,
            foos: Vec::new(),
            sibling: None,
        }
    }
}

fn ints(value: &HdValue) -> anyhow::Result<Vec<i64>> {
    value
        .as_list()
        .ok_or_else(|| anyhow::anyhow!("expected a list"))?
        .iter()
        .map(|item| item.as_i64().ok_or_else(|| anyhow::anyhow!("expected integers")))
        .collect()
}

fn foo_spec() -> HdGroupSpec {
    let my_data = HdDatasetSpec::builder("some integers")
        .name("my_data")
        .dtype("int")
        .shape(HdShapeSpec::Single(vec![None]))
        .build()
        .unwrap();
    let children = HdGroupSpec::builder("nested foos")
        .data_type_inc("Foo")
        .quantity(HdQuantity::ZeroOrMany)
        .build()
        .unwrap();
    let sibling = HdAttributeSpec::builder("sibling", "another foo")
        .spec_dtype(HdSpecDtype::Reference(HdRefSpec::new("Foo", "object").unwrap()))
        .required(false)
        .build()
        .unwrap();
    HdGroupSpec::builder("a test group")
        .data_type_def("Foo")
        .attribute(HdAttributeSpec::builder("attr1", "a label").dtype("text").build().unwrap())
        .attribute(sibling)
        .dataset(my_data)
        .group(children)
        .build()
        .unwrap()
}

fn bar_spec() -> HdGroupSpec {
    let values = HdDatasetSpec::builder("optional values")
        .name("values")
        .dtype("float")
        .quantity(HdQuantity::ZeroOrOne)
        .build()
        .unwrap();
    HdGroupSpec::builder("a type without a class")
        .data_type_def("Bar")
        .attribute(HdAttributeSpec::builder("label", "a label").dtype("text").build().unwrap())
        .dataset(values)
        .build()
        .unwrap()
}

/// `attr1_required` false leaves the class argument optional so only the
/// spec marks it required.
fn foo_class(attr1_required: bool) -> HdContainerClass {
    let class = HdContainerClass::typed::<Foo>("Foo");
    let class = if attr1_required {
        class.arg("attr1", true)
    } else {
        class.optional_arg("attr1", None)
    };
    class
        .arg("my_data", true)
        .optional_arg("foos", Some(HdField::Containers(Vec::new())))
        .optional_arg("sibling", None)
        .constructor(|args| {
            Ok(Foo {
                attr1: args
                    .text("attr1")
                    .ok_or_else(|| anyhow::anyhow!("attr1 must be text"))?
                    .to_string(),
                my_data: ints(args.required_value("my_data")?)?,
                foos: args.containers("foos"),
                sibling: args.container("sibling"),
            })
        })
        .getter("attr1", |foo| Some(HdValue::from(foo.attr1.clone()).into()))
        .getter("my_data", |foo| {
            (!foo.my_data.is_empty()).then(|| HdValue::from(foo.my_data.clone()).into())
        })
        .getter("foos", |foo| (!foo.foos.is_empty()).then(|| HdField::Containers(foo.foos.clone())))
        .getter("sibling", |foo| foo.sibling.map(HdField::Container))
        .build()
        .unwrap()
}

fn type_map(profiles: Vec<(&str, HdMapperProfile)>) -> Arc<HdTypeMap> {
    type_map_with(foo_class(true), profiles)
}

fn type_map_with(class: HdContainerClass, profiles: Vec<(&str, HdMapperProfile)>) -> Arc<HdTypeMap> {
    let mut catalog = HdSpecCatalog::new();
    catalog.register_spec(foo_spec().into(), "test.yaml").unwrap();
    catalog.register_spec(bar_spec().into(), "test.yaml").unwrap();
    let info = HdNamespaceInfo::new("test", "types used by the mapping tests").with_version("0.1.0");
    let mut namespaces = HdNamespaceCatalog::new();
    namespaces
        .add_namespace(HdSpecNamespace::new(info, catalog, "unversioned").unwrap())
        .unwrap();

    let mut type_map = HdTypeMap::new(namespaces);
    type_map.register_container_type("test", "Foo", class).unwrap();
    for (data_type, profile) in profiles {
        type_map.register_map(data_type, profile).unwrap();
    }
    Arc::new(type_map)
}

/// Root `Foo` owning one child `Foo`.
fn two_level(arena: &mut HdContainerArena) -> (HdContainerId, HdContainerId) {
    let root = arena.insert("Foo", "root", Foo::new("old", vec![1, 2, 3]));
    let child = arena.insert("Foo", "sub", Foo::new("child", vec![4]));
    arena.set_parent(child, root).unwrap();
    arena.get_mut::<Foo>(root).unwrap().foos.push(child);
    (root, child)
}

fn value_of(data: Option<&HdBuilderValue>) -> Option<&HdValue> {
    data.and_then(HdBuilderValue::as_value)
}

#[test]
fn test_two_level_round_trip() {
    let types = type_map(Vec::new());
    let mut arena = HdContainerArena::new();
    let (root, child) = two_level(&mut arena);

    let mut manager = HdBuildManager::new(types.clone());
    let built = manager.build(&mut arena, root).unwrap();
    {
        let tree = manager.tree();
        let node = tree.get(built).unwrap();
        assert!(node.is_group());
        assert_eq!(value_of(node.attribute("attr1")), Some(&HdValue::from("old")));
        assert_eq!(value_of(node.attribute("data_type")), Some(&HdValue::from("Foo")));
        assert_eq!(value_of(node.attribute("namespace")), Some(&HdValue::from("test")));
        let object_id = arena.object_id(root).unwrap().to_string();
        assert_eq!(value_of(node.attribute("object_id")), Some(&HdValue::from(object_id)));

        let data = tree.get_child(built, "my_data").unwrap();
        assert_eq!(value_of(tree.get(data).unwrap().data()), Some(&HdValue::from(vec![1, 2, 3])));
        let sub = tree.get_child(built, "sub").unwrap();
        assert_eq!(manager.get_builder(child), Some(sub));
        assert_eq!(tree.path(sub).unwrap(), "root/sub");
    }

    let tree = manager.into_tree();
    let mut reader = HdBuildManager::with_tree(types, tree);
    let mut read = HdContainerArena::new();
    let restored = reader.construct(&mut read, built).unwrap();

    let foo = read.get::<Foo>(restored).unwrap();
    assert_eq!(foo.attr1, "old");
    assert_eq!(foo.my_data, vec![1, 2, 3]);
    assert_eq!(foo.foos.len(), 1);
    let restored_child = foo.foos[0];
    assert_eq!(read.get::<Foo>(restored_child).unwrap().attr1, "child");
    assert_eq!(read.get::<Foo>(restored_child).unwrap().my_data, vec![4]);
    assert_eq!(read.parent(restored_child).unwrap(), Some(restored));
    assert_eq!(read.object_id(restored).unwrap(), arena.object_id(root).unwrap());
    assert_eq!(read.meta(restored).unwrap().namespace.as_deref(), Some("test"));
    assert!(!read.modified(restored).unwrap());
}

#[test]
fn test_shared_child_maps_to_one_builder() {
    let types = type_map(Vec::new());
    let mut arena = HdContainerArena::new();
    let root = arena.insert("Foo", "root", Foo::new("root", vec![1]));
    let a = arena.insert("Foo", "a", Foo::new("a", vec![2]));
    let b = arena.insert("Foo", "b", Foo::new("b", vec![3]));
    arena.set_parent(a, root).unwrap();
    arena.set_parent(b, root).unwrap();
    arena.get_mut::<Foo>(root).unwrap().foos.extend([a, b]);
    arena.get_mut::<Foo>(b).unwrap().foos.push(a);

    let mut manager = HdBuildManager::new(types.clone());
    let built = manager.build(&mut arena, root).unwrap();
    let a_builder = manager.get_builder(a).unwrap();
    let b_builder = manager.get_builder(b).unwrap();
    {
        let tree = manager.tree();
        assert_eq!(tree.get_child(built, "a"), Some(a_builder));
        let link = tree.get_child(b_builder, "a").unwrap();
        assert!(tree.get(link).unwrap().is_link());
        assert_eq!(tree.get(link).unwrap().link_target(), Some(a_builder));
    }

    let rebuilt = manager.build(&mut arena, root).unwrap();
    assert_eq!(rebuilt, built);

    let mut reader = HdBuildManager::with_tree(types, manager.into_tree());
    let mut read = HdContainerArena::new();
    let restored = reader.construct(&mut read, built).unwrap();
    let foos = read.get::<Foo>(restored).unwrap().foos.clone();
    assert_eq!(foos.len(), 2);
    let (read_a, read_b) = (foos[0], foos[1]);
    assert_eq!(read.get::<Foo>(read_b).unwrap().foos, vec![read_a]);
    assert_eq!(read.parent(read_a).unwrap(), Some(restored));
    assert_eq!(read.len(), 3);
}

#[test]
fn test_omitted_optional_argument_uses_default() {
    let profile = HdMapperProfile::new().constructor_arg("foos", |_, _| Ok(HdOverride::Omit));
    let types = type_map(vec![("Foo", profile)]);
    let mut arena = HdContainerArena::new();
    let (root, _) = two_level(&mut arena);

    let mut manager = HdBuildManager::new(types.clone());
    let built = manager.build(&mut arena, root).unwrap();
    let mut reader = HdBuildManager::with_tree(types, manager.into_tree());
    let mut read = HdContainerArena::new();
    let restored = reader.construct(&mut read, built).unwrap();
    assert!(read.get::<Foo>(restored).unwrap().foos.is_empty());
    assert_eq!(read.get::<Foo>(restored).unwrap().attr1, "old");
}

#[test]
fn test_omitted_required_argument_fails_and_discards_containers() {
    let profile = HdMapperProfile::new().constructor_arg("attr1", |_, _| Ok(HdOverride::Omit));
    let types = type_map(vec![("Foo", profile)]);
    let mut arena = HdContainerArena::new();
    let root = arena.insert("Foo", "root", Foo::new("old", vec![1, 2, 3]));

    let mut manager = HdBuildManager::new(types.clone());
    let built = manager.build(&mut arena, root).unwrap();
    let mut reader = HdBuildManager::with_tree(types, manager.into_tree());
    let mut read = HdContainerArena::new();
    let err = reader.construct(&mut read, built).unwrap_err();
    assert!(matches!(err, HdError::Construct { ref field, .. } if field == "attr1"));
    assert_eq!(read.len(), 0);
    assert_eq!(reader.get_container(built), None);
}

#[test]
fn test_spec_required_argument_is_enforced_for_optional_class_argument() {
    let profile = HdMapperProfile::new().constructor_arg("attr1", |_, _| Ok(HdOverride::Omit));
    let types = type_map_with(foo_class(false), vec![("Foo", profile)]);
    let mut arena = HdContainerArena::new();
    let root = arena.insert("Foo", "root", Foo::new("old", vec![1, 2, 3]));

    let mut manager = HdBuildManager::new(types.clone());
    let built = manager.build(&mut arena, root).unwrap();
    let mut reader = HdBuildManager::with_tree(types, manager.into_tree());
    let mut read = HdContainerArena::new();
    let err = reader.construct(&mut read, built).unwrap_err();
    assert!(matches!(err, HdError::Construct { ref field, .. } if field == "attr1"));
    assert_eq!(read.len(), 0);
}

#[test]
fn test_optional_reference_attribute_round_trip() {
    let types = type_map(Vec::new());
    let mut arena = HdContainerArena::new();
    let root = arena.insert("Foo", "root", Foo::new("root", vec![1]));
    let a = arena.insert("Foo", "a", Foo::new("first", vec![2]));
    let b = arena.insert("Foo", "b", Foo::new("second", vec![3]));
    for child in [a, b] {
        arena.set_parent(child, root).unwrap();
        arena.get_mut::<Foo>(root).unwrap().foos.push(child);
    }
    arena.get_mut::<Foo>(b).unwrap().sibling = Some(a);

    let mut manager = HdBuildManager::new(types.clone());
    let built = manager.build(&mut arena, root).unwrap();
    let a_builder = manager.get_builder(a).unwrap();
    let b_builder = manager.get_builder(b).unwrap();
    {
        let tree = manager.tree();
        assert_eq!(
            tree.get(b_builder).unwrap().attribute("sibling"),
            Some(&HdBuilderValue::Reference(HdReference::Object(a_builder)))
        );
        assert_eq!(tree.get(a_builder).unwrap().attribute("sibling"), None);
    }

    let mut reader = HdBuildManager::with_tree(types, manager.into_tree());
    let mut read = HdContainerArena::new();
    let restored = reader.construct(&mut read, built).unwrap();
    let foos = read.get::<Foo>(restored).unwrap().foos.clone();
    assert_eq!(foos.len(), 2);
    let (read_a, read_b) = (foos[0], foos[1]);
    assert_eq!(read.get::<Foo>(read_b).unwrap().sibling, Some(read_a));
    assert_eq!(read.get::<Foo>(read_a).unwrap().sibling, None);
    assert_eq!(read.get::<Foo>(read_a).unwrap().attr1, "first");
    assert_eq!(read.parent(read_a).unwrap(), Some(restored));
    assert_eq!(read.len(), 3);
}

#[test]
fn test_object_attribute_hook_overrides_getter() {
    let profile =
        HdMapperProfile::new().object_attr("attr1", |_, _| Ok(HdOverride::value(HdValue::from("hooked"))));
    let types = type_map(vec![("Foo", profile)]);
    let mut arena = HdContainerArena::new();
    let root = arena.insert("Foo", "root", Foo::new("old", vec![1]));

    let mut manager = HdBuildManager::new(types);
    let built = manager.build(&mut arena, root).unwrap();
    let node = manager.tree().get(built).unwrap();
    assert_eq!(value_of(node.attribute("attr1")), Some(&HdValue::from("hooked")));
}

#[test]
fn test_missing_required_field_fails_and_discards_builders() {
    let types = type_map(Vec::new());
    let mut arena = HdContainerArena::new();
    let (root, child) = two_level(&mut arena);
    arena.get_mut::<Foo>(child).unwrap().my_data.clear();

    let mut manager = HdBuildManager::new(types);
    let err = manager.build(&mut arena, root).unwrap_err();
    assert!(matches!(err, HdError::Build { ref field, .. } if field == "my_data"));
    assert!(manager.tree().is_empty());
    assert_eq!(manager.get_builder(root), None);
}

#[test]
fn test_container_source_cannot_change_without_export() {
    let types = type_map(Vec::new());
    let mut arena = HdContainerArena::new();
    let root = arena.insert("Foo", "root", Foo::new("old", vec![1]));

    let mut first = HdBuildManager::new(types.clone());
    let options = HdBuildOptions::default().with_source("first.h5");
    let built = first.build_with(&mut arena, root, &options).unwrap();
    assert_eq!(first.tree().get(built).unwrap().source(), Some("first.h5"));
    assert_eq!(arena.container_source(root).unwrap(), Some("first.h5"));

    let mut second = HdBuildManager::new(types.clone());
    let moved = HdBuildOptions::default().with_source("second.h5");
    let err = second.build_with(&mut arena, root, &moved).unwrap_err();
    assert!(matches!(err, HdError::Build { ref field, .. } if field == "container_source"));

    let mut exporter = HdBuildManager::new(types);
    let exported = exporter.build_with(&mut arena, root, &moved.with_export(true)).unwrap();
    assert_eq!(exporter.tree().get(exported).unwrap().source(), Some("second.h5"));
}

#[test]
fn test_unregistered_type_gets_generated_class() {
    let profile = HdMapperProfile::new().map_spec("@label", "title");
    let types = type_map(vec![("Bar", profile)]);
    let mut arena = HdContainerArena::new();
    let bar = arena.insert(
        "Bar",
        "bar",
        HdDynamicContainer::new("Bar").with_field("title", HdValue::from("generated")),
    );

    let mut manager = HdBuildManager::new(types.clone());
    let built = manager.build(&mut arena, bar).unwrap();
    {
        let tree = manager.tree();
        let node = tree.get(built).unwrap();
        assert_eq!(value_of(node.attribute("label")), Some(&HdValue::from("generated")));
        assert_eq!(tree.get_child(built, "values"), None);
    }

    let class = types.get_dt_container_cls("Bar", Some("test"), true).unwrap();
    assert!(class.is_generated());
    assert!(class.has_arg("title"));
    let generated = types.get_container_classes(Some("test")).unwrap();
    assert!(generated.iter().any(|class| class.data_type() == "Bar"));
    assert!(types.get_dt_container_cls("Bar", Some("test"), false).is_err());

    let mut reader = HdBuildManager::with_tree(types, manager.into_tree());
    let mut read = HdContainerArena::new();
    let restored = reader.construct(&mut read, built).unwrap();
    let payload = read.get::<HdDynamicContainer>(restored).unwrap();
    assert_eq!(payload.data_type, "Bar");
    assert_eq!(payload.get("title"), Some(&HdField::Value(HdValue::from("generated"))));
    assert_eq!(payload.get("values"), None);
}
