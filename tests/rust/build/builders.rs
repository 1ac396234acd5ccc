//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd project team.

use hdx::{HdBuilderTree, HdBuilderValue, HdDtype, HdReference, HdSpecDtype, HdValue};

#[test]
fn test_nested_groups_and_paths() {
    let mut tree = HdBuilderTree::new();
    let root = tree.new_group("root", Some("file.h5"));
    let acquisition = tree.add_group(root, "acquisition").unwrap();
    let series = tree
        .add_dataset(acquisition, "series", Some(HdValue::from(vec![1, 2, 3]).into()), None)
        .unwrap();

    assert_eq!(tree.path(series).unwrap(), "root/acquisition/series");
    assert_eq!(tree.lookup(root, "acquisition/series"), Some(series));
    assert_eq!(tree.lookup(root, "acquisition/missing"), None);
    assert_eq!(tree.root(series).unwrap(), root);
    assert_eq!(tree.get(acquisition).unwrap().source(), Some("file.h5"));
    assert_eq!(tree.groups(root), vec![acquisition]);
    assert_eq!(tree.datasets(acquisition), vec![series]);
}

#[test]
fn test_links_and_references() {
    let mut tree = HdBuilderTree::new();
    let root = tree.new_group("root", None);
    let target = tree.add_dataset(root, "data", Some(HdValue::from(vec![1.0, 2.0]).into()), None).unwrap();
    let processing = tree.add_group(root, "processing").unwrap();
    let link = tree.add_link(processing, "data_link", target).unwrap();

    assert!(tree.get(link).unwrap().is_link());
    assert_eq!(tree.get(link).unwrap().link_target(), Some(target));
    assert_eq!(tree.links(processing), vec![link]);

    tree.set_attribute(processing, "source_data", HdReference::Object(target)).unwrap();
    let value = tree.get(processing).unwrap().attribute("source_data").unwrap();
    assert_eq!(value, &HdBuilderValue::Reference(HdReference::Object(target)));
    assert_eq!(value.references()[0].target(), target);
}

#[test]
fn test_name_collision_between_kinds_fails() {
    let mut tree = HdBuilderTree::new();
    let root = tree.new_group("root", None);
    tree.add_group(root, "shared").unwrap();
    assert!(tree.add_dataset(root, "shared", None, None).is_err());
}

#[test]
fn test_dataset_data_is_write_once() {
    let mut tree = HdBuilderTree::new();
    let dataset = tree.new_dataset("values", None, None);
    tree.set_data(dataset, HdValue::from(vec![1, 2])).unwrap();
    assert!(tree.set_data(dataset, HdValue::from(vec![3])).is_err());

    tree.set_dtype(dataset, HdSpecDtype::Primitive(HdDtype::Int64)).unwrap();
    assert!(tree.set_dtype(dataset, HdSpecDtype::Primitive(HdDtype::Int32)).is_err());
    tree.set_maxshape(dataset, vec![None]).unwrap();
    tree.set_chunks(dataset, vec![1]).unwrap();
    let node = tree.get(dataset).unwrap();
    assert_eq!(node.maxshape(), Some(&vec![None]));
    assert_eq!(node.chunks(), Some(&[1usize][..]));
}

#[test]
fn test_emptiness_and_removal() {
    let mut tree = HdBuilderTree::new();
    let root = tree.new_group("root", None);
    let outer = tree.add_group(root, "outer").unwrap();
    let inner = tree.add_group(outer, "inner").unwrap();
    assert!(tree.is_empty_node(outer).unwrap());

    tree.set_attribute(inner, "note", HdValue::from("x")).unwrap();
    assert!(!tree.is_empty_node(outer).unwrap());

    tree.remove_subtree(outer).unwrap();
    assert_eq!(tree.get_child(root, "outer"), None);
    assert!(!tree.contains(inner));
    assert!(tree.is_empty_node(root).unwrap());
}

#[test]
fn test_written_flag() {
    let mut tree = HdBuilderTree::new();
    let root = tree.new_group("root", None);
    assert!(!tree.get(root).unwrap().written());
    tree.set_written(root, true).unwrap();
    assert!(tree.get(root).unwrap().written());
}
