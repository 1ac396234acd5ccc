//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! # Hdx Spec Resolution Module
//!
//! Expands a spec that extends another type into a copy holding its own
//! children plus every child inherited along its `data_type_inc` chain.
//!
//! Ancestors are merged root first. Children are keyed by name, or by
//! `<Type>` when unnamed; a later child replaces an earlier one with the same
//! key but keeps the position the key first took. Overriding children
//! without `shape`/`dims` take the ancestor's; overriding datasets without a
//! `dtype` take the ancestor's as well. Narrowing of `shape`/`dims` is not
//! checked.

use indexmap::IndexMap;

use crate::errors::{HdError, Result};
use crate::spec::attribute::HdAttributeSpec;
use crate::spec::catalog::HdSpecCatalog;
use crate::spec::storage::{HdChildKind, HdDatasetSpec, HdGroupSpec, HdResolution, HdSpec};

/// Resolves `spec` against the ancestors registered in `catalog`.
///
/// Nested children that both define and include a type are resolved as
/// well. Specs without both keys are returned with only their nested
/// children resolved.
pub fn resolve_spec(spec: &HdSpec, catalog: &HdSpecCatalog) -> Result<HdSpec> {
    let mut resolved = match spec {
        HdSpec::Group(group) => HdSpec::Group(resolve_nested(group, catalog)?),
        HdSpec::Dataset(dataset) => HdSpec::Dataset(dataset.clone()),
    };
    let (Some(def), Some(inc)) = (spec.data_type_def(), spec.data_type_inc()) else {
        return Ok(resolved);
    };

    let chain = catalog.get_hierarchy(inc).map_err(|_| {
        HdError::catalog(format!("Cannot resolve include spec '{inc}' for type '{def}'"))
    })?;
    let mut base: Option<HdSpec> = None;
    for ancestor in chain.iter().rev() {
        let mut next = catalog.get_spec(ancestor)?.clone();
        if let Some(prev) = &base {
            overlay_spec(&mut next, prev)?;
        }
        base = Some(next);
    }
    let Some(base) = base else {
        return Ok(resolved);
    };

    let own = resolved.clone();
    overlay_spec(&mut resolved, &base)?;
    record_resolution(&mut resolved, &own, &base);
    log::debug!("resolved '{def}' against {} ancestor(s) of '{inc}'", chain.len());
    Ok(resolved)
}

fn resolve_nested(group: &HdGroupSpec, catalog: &HdSpecCatalog) -> Result<HdGroupSpec> {
    let mut resolved = group.clone();
    for dataset in resolved.datasets.values_mut() {
        if dataset.data_type_def.is_some() && dataset.data_type_inc.is_some() {
            if let HdSpec::Dataset(expanded) = resolve_spec(&HdSpec::Dataset(dataset.clone()), catalog)? {
                *dataset = expanded;
            }
        }
    }
    for child in resolved.groups.values_mut() {
        if child.data_type_def.is_some() {
            if let HdSpec::Group(expanded) = resolve_spec(&HdSpec::Group(child.clone()), catalog)? {
                *child = expanded;
            }
        } else {
            *child = resolve_nested(child, catalog)?;
        }
    }
    Ok(resolved)
}

fn overlay_spec(spec: &mut HdSpec, ancestor: &HdSpec) -> Result<()> {
    match (spec, ancestor) {
        (HdSpec::Group(group), HdSpec::Group(base)) => {
            overlay_group(group, base);
            Ok(())
        }
        (HdSpec::Dataset(dataset), HdSpec::Dataset(base)) => {
            overlay_dataset(dataset, base);
            Ok(())
        }
        (spec, ancestor) => Err(HdError::catalog(format!(
            "'{}' cannot extend '{}': group and dataset types do not mix",
            spec.key(),
            ancestor.key()
        ))),
    }
}

/// Ancestor entries first, in ancestor order, then entries new in `own`.
fn merge_children<T: Clone>(
    ancestor: &IndexMap<String, T>,
    own: &IndexMap<String, T>,
    overlay: fn(&mut T, &T),
) -> IndexMap<String, T> {
    let mut merged = IndexMap::with_capacity(ancestor.len() + own.len());
    for (key, inherited) in ancestor {
        let value = match own.get(key) {
            Some(child) => {
                let mut child = child.clone();
                overlay(&mut child, inherited);
                child
            }
            None => inherited.clone(),
        };
        merged.insert(key.clone(), value);
    }
    for (key, child) in own {
        if !merged.contains_key(key) {
            merged.insert(key.clone(), child.clone());
        }
    }
    merged
}

fn overlay_attribute(child: &mut HdAttributeSpec, ancestor: &HdAttributeSpec) {
    child.inherit_shape_from(ancestor);
}

fn overlay_dataset(child: &mut HdDatasetSpec, ancestor: &HdDatasetSpec) {
    if child.dtype.is_none() {
        child.dtype = ancestor.dtype.clone();
    }
    child.inherit_shape_from(ancestor);
    child.attributes = merge_children(&ancestor.attributes, &child.attributes, overlay_attribute);
}

fn overlay_group(child: &mut HdGroupSpec, ancestor: &HdGroupSpec) {
    child.attributes = merge_children(&ancestor.attributes, &child.attributes, overlay_attribute);
    child.datasets = merge_children(&ancestor.datasets, &child.datasets, overlay_dataset);
    child.groups = merge_children(&ancestor.groups, &child.groups, overlay_group);
    child.links = merge_children(&ancestor.links, &child.links, |_, _| {});
}

fn classify<T>(
    resolution: &mut HdResolution,
    kind: HdChildKind,
    ancestor: &IndexMap<String, T>,
    own: &IndexMap<String, T>,
) {
    for key in ancestor.keys() {
        if own.contains_key(key) {
            resolution.overridden.insert((kind, key.clone()));
        } else {
            resolution.inherited.insert((kind, key.clone()));
        }
    }
}

fn record_resolution(resolved: &mut HdSpec, own: &HdSpec, base: &HdSpec) {
    let mut resolution = HdResolution {
        resolved: true,
        ..HdResolution::default()
    };
    match (&mut *resolved, own, base) {
        (HdSpec::Group(resolved), HdSpec::Group(own), HdSpec::Group(base)) => {
            classify(&mut resolution, HdChildKind::Attribute, &base.attributes, &own.attributes);
            classify(&mut resolution, HdChildKind::Dataset, &base.datasets, &own.datasets);
            classify(&mut resolution, HdChildKind::Group, &base.groups, &own.groups);
            classify(&mut resolution, HdChildKind::Link, &base.links, &own.links);
            resolved.resolution = resolution;
        }
        (HdSpec::Dataset(resolved), HdSpec::Dataset(own), HdSpec::Dataset(base)) => {
            classify(&mut resolution, HdChildKind::Attribute, &base.attributes, &own.attributes);
            if own.dtype.is_none() && resolved.dtype.is_some() {
                resolution.inherited_fields.insert("dtype".to_string());
            }
            if own.shape.is_none() && resolved.shape.is_some() {
                resolution.inherited_fields.insert("shape".to_string());
            }
            if own.dims.is_none() && resolved.dims.is_some() {
                resolution.inherited_fields.insert("dims".to_string());
            }
            resolved.resolution = resolution;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::dtype::HdShapeSpec;

    #[test]
    fn dataset_type_inherits_dtype_and_shape() {
        let mut catalog = HdSpecCatalog::new();
        let base = HdDatasetSpec::builder("base data")
            .data_type_def("BaseData")
            .dtype("float")
            .shape(HdShapeSpec::Single(vec![None]))
            .build()
            .unwrap();
        catalog.register_spec(HdSpec::Dataset(base), "base.yaml").unwrap();
        let ext = HdDatasetSpec::builder("ext data")
            .data_type_def("ExtData")
            .data_type_inc("BaseData")
            .build()
            .unwrap();
        let resolved = resolve_spec(&HdSpec::Dataset(ext), &catalog).unwrap();
        let dataset = resolved.as_dataset().unwrap();
        assert_eq!(dataset.dtype().and_then(|d| d.primitive()).map(|d| d.name()), Some("float32"));
        assert!(resolved.is_inherited_field("dtype"));
        assert!(resolved.is_inherited_field("shape"));
        assert!(resolved.resolved());
    }

    #[test]
    fn unresolvable_include_is_a_catalog_error() {
        let catalog = HdSpecCatalog::new();
        let ext = HdGroupSpec::builder("ext").data_type_def("Ext").data_type_inc("Missing").build().unwrap();
        let err = resolve_spec(&HdSpec::Group(ext), &catalog).unwrap_err();
        assert!(matches!(err, HdError::Catalog { .. }));
    }
}
