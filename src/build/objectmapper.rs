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

//! # Hdx Object Mapper Module
//!
//! Per-type translator between containers and builder subtrees, driven by
//! the type's resolved spec.
//!
//! Every location inside the spec is addressed by an [`HdSpecKey`] and
//! mapped to an object attribute name (read through the container class
//! getters on build) and a constructor argument name (filled on construct).
//! Default names come from [`HdObjectMapper::get_attr_names`]; an
//! [`HdMapperProfile`] remaps them and registers override hooks.
//!
//! ## Build order
//!
//! Group specs emit datasets, then groups, then links, then attributes.
//! Dataset specs convert the container's data, then emit attributes.
//! Reference values are queued on the build manager and filled once the
//! whole pass has produced its builders.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use regex::Regex;

use crate::build::builders::{HdBuilderId, HdBuilderTree, HdBuilderValue, HdReference};
use crate::build::manager::{HdBuildManager, HdBuildOptions, HdPendingRef};
use crate::container::{HdArgs, HdContainerArena, HdContainerClass, HdContainerId, HdDynamicContainer, HdField};
use crate::errors::{HdError, Result};
use crate::spec::attribute::{HdAttributeSpec, HdSpecDtype};
use crate::spec::dtype::{HdDtype, HdShapeSpec};
use crate::spec::storage::{HdDatasetSpec, HdGroupSpec, HdSpec, HdSpecRef};
use crate::value::HdValue;

/// Path to a location inside a spec: `@attr`, `dataset`, `group/@attr`,
/// `<Type>`. The empty key is the spec itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HdSpecKey(String);

impl HdSpecKey {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the child group, dataset or link `key` below this location.
    pub fn child(&self, key: &str) -> Self {
        if self.is_root() {
            Self(key.to_string())
        } else {
            Self(format!("{}/{key}", self.0))
        }
    }

    pub fn attribute(&self, name: &str) -> Self {
        self.child(&format!("@{name}"))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }
}

impl fmt::Display for HdSpecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for HdSpecKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for HdSpecKey {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

/// Result of an override hook.
#[derive(Clone, Debug, PartialEq)]
pub enum HdOverride {
    /// Use this value instead of the default lookup.
    Value(HdField),
    /// Leave the field out entirely.
    Omit,
    /// Continue with the default lookup.
    Fallthrough,
}

impl HdOverride {
    pub fn value(value: impl Into<HdField>) -> Self {
        HdOverride::Value(value.into())
    }
}

/// Replaces the getter of one object attribute during build.
pub type HdObjectAttrHook =
    Arc<dyn Fn(&HdContainerArena, HdContainerId) -> anyhow::Result<HdOverride> + Send + Sync>;

/// Replaces the builder lookup of one constructor argument during construct.
pub type HdConstructorArgHook = Arc<dyn Fn(&HdBuilderTree, HdBuilderId) -> anyhow::Result<HdOverride> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
enum HdRemap {
    Spec(HdSpecKey, String),
    Attr(HdSpecKey, String),
    ConstArg(HdSpecKey, String),
    Unmap(HdSpecKey),
}

/// Remaps and hooks registered for one data type. Profiles of ancestor
/// types apply first, so subtypes inherit and may override them.
#[derive(Clone, Default)]
pub struct HdMapperProfile {
    remaps: Vec<HdRemap>,
    object_attrs: IndexMap<String, HdObjectAttrHook>,
    constructor_args: IndexMap<String, HdConstructorArgHook>,
}

impl HdMapperProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `key` to both the object attribute and the constructor argument
    /// `name`.
    pub fn map_spec(mut self, key: impl Into<HdSpecKey>, name: &str) -> Self {
        self.remaps.push(HdRemap::Spec(key.into(), name.to_string()));
        self
    }

    pub fn map_attr(mut self, key: impl Into<HdSpecKey>, name: &str) -> Self {
        self.remaps.push(HdRemap::Attr(key.into(), name.to_string()));
        self
    }

    pub fn map_const_arg(mut self, key: impl Into<HdSpecKey>, name: &str) -> Self {
        self.remaps.push(HdRemap::ConstArg(key.into(), name.to_string()));
        self
    }

    pub fn unmap(mut self, key: impl Into<HdSpecKey>) -> Self {
        self.remaps.push(HdRemap::Unmap(key.into()));
        self
    }

    /// Registers a hook computing object attribute `name` during build.
    pub fn object_attr<F>(mut self, name: &str, hook: F) -> Self
    where
        F: Fn(&HdContainerArena, HdContainerId) -> anyhow::Result<HdOverride> + Send + Sync + 'static,
    {
        self.object_attrs.insert(name.to_string(), Arc::new(hook));
        self
    }

    /// Registers a hook computing constructor argument `name` during
    /// construct.
    pub fn constructor_arg<F>(mut self, name: &str, hook: F) -> Self
    where
        F: Fn(&HdBuilderTree, HdBuilderId) -> anyhow::Result<HdOverride> + Send + Sync + 'static,
    {
        self.constructor_args.insert(name.to_string(), Arc::new(hook));
        self
    }
}

impl fmt::Debug for HdMapperProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdMapperProfile")
            .field("remaps", &self.remaps)
            .field("object_attrs", &self.object_attrs.keys().collect::<Vec<_>>())
            .field("constructor_args", &self.constructor_args.keys().collect::<Vec<_>>())
            .finish()
    }
}

enum Lookup {
    Found(HdField),
    Missing,
    Omitted,
}

struct BuildPass<'p> {
    manager: &'p mut HdBuildManager,
    arena: &'p mut HdContainerArena,
    options: &'p HdBuildOptions,
    container: HdContainerId,
    class: Arc<HdContainerClass>,
    source: Option<String>,
}

/// Translator for one data type.
pub struct HdObjectMapper {
    namespace: String,
    data_type: String,
    spec: HdSpec,
    spec_to_attr: IndexMap<HdSpecKey, String>,
    spec_to_carg: IndexMap<HdSpecKey, String>,
    object_attrs: IndexMap<String, HdObjectAttrHook>,
    constructor_args: IndexMap<String, HdConstructorArgHook>,
}

impl fmt::Debug for HdObjectMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdObjectMapper")
            .field("namespace", &self.namespace)
            .field("data_type", &self.data_type)
            .field("spec_to_attr", &self.spec_to_attr)
            .field("spec_to_carg", &self.spec_to_carg)
            .finish()
    }
}

fn camel_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"),
            Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"),
        )
    })
}

impl HdObjectMapper {
    pub fn new(namespace: &str, data_type: &str, spec: HdSpec, profiles: &[&HdMapperProfile]) -> Self {
        let names = Self::get_attr_names(&spec);
        let mut mapper = Self {
            namespace: namespace.to_string(),
            data_type: data_type.to_string(),
            spec,
            spec_to_attr: names.clone(),
            spec_to_carg: names,
            object_attrs: IndexMap::new(),
            constructor_args: IndexMap::new(),
        };
        for profile in profiles {
            for remap in &profile.remaps {
                match remap {
                    HdRemap::Spec(key, name) => mapper.map_spec(key.clone(), name),
                    HdRemap::Attr(key, name) => mapper.map_attr(key.clone(), name),
                    HdRemap::ConstArg(key, name) => mapper.map_const_arg(key.clone(), name),
                    HdRemap::Unmap(key) => mapper.unmap(key),
                }
            }
            for (name, hook) in &profile.object_attrs {
                mapper.object_attrs.insert(name.clone(), hook.clone());
            }
            for (name, hook) in &profile.constructor_args {
                mapper.constructor_args.insert(name.clone(), hook.clone());
            }
        }
        mapper
    }

    /// Snake-case attribute name for a type name, pluralized with `s` when
    /// the child repeats.
    pub fn convert_dt_name(data_type: &str, many: bool) -> String {
        let (first, second) = camel_patterns();
        let step = first.replace_all(data_type, "${1}_${2}");
        let mut name = second.replace_all(&step, "${1}_${2}").to_lowercase();
        if many && !name.ends_with('s') {
            name.push('s');
        }
        name
    }

    /// Default object attribute name for every location of `spec`.
    ///
    /// Children are named by `name`, or by their converted type name when
    /// unnamed. Fields of untyped children are prefixed with the child name
    /// and joined with `__`; typed children are not descended into. The
    /// data of a dataset spec maps to `data`.
    pub fn get_attr_names(spec: &HdSpec) -> IndexMap<HdSpecKey, String> {
        let mut names = IndexMap::new();
        let root = HdSpecKey::root();
        let mut stack = Vec::new();
        match spec {
            HdSpec::Group(group) => {
                for attribute in group.attributes.values() {
                    collect_attribute(&root, &mut stack, attribute, &mut names);
                }
                for child in group.groups.values() {
                    collect_group(&root, &mut stack, child, &mut names);
                }
                for child in group.datasets.values() {
                    collect_dataset(&root, &mut stack, child, &mut names);
                }
                for link in group.links.values() {
                    let name = link
                        .name()
                        .map(str::to_string)
                        .unwrap_or_else(|| Self::convert_dt_name(link.target_type(), link.is_many()));
                    names.insert(root.child(&link.key()), name);
                }
            }
            HdSpec::Dataset(dataset) => {
                names.insert(root.clone(), "data".to_string());
                for attribute in dataset.attributes.values() {
                    collect_attribute(&root, &mut stack, attribute, &mut names);
                }
            }
        }
        names
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn spec(&self) -> &HdSpec {
        &self.spec
    }

    pub fn map_spec(&mut self, key: HdSpecKey, name: &str) {
        self.map_const_arg(key.clone(), name);
        self.map_attr(key, name);
    }

    pub fn map_attr(&mut self, key: HdSpecKey, name: &str) {
        self.spec_to_attr.insert(key, name.to_string());
    }

    pub fn map_const_arg(&mut self, key: HdSpecKey, name: &str) {
        self.spec_to_carg.insert(key, name.to_string());
    }

    pub fn unmap(&mut self, key: &HdSpecKey) {
        self.spec_to_attr.shift_remove(key);
        self.spec_to_carg.shift_remove(key);
    }

    /// Object attribute mapped to `key`.
    pub fn get_attribute(&self, key: &HdSpecKey) -> Option<&str> {
        self.spec_to_attr.get(key).map(String::as_str)
    }

    /// Constructor argument mapped to `key`.
    pub fn get_const_arg(&self, key: &HdSpecKey) -> Option<&str> {
        self.spec_to_carg.get(key).map(String::as_str)
    }

    pub fn get_attr_spec(&self, attr: &str) -> Option<&HdSpecKey> {
        self.spec_to_attr.iter().find(|(_, name)| *name == attr).map(|(key, _)| key)
    }

    pub fn get_carg_spec(&self, carg: &str) -> Option<&HdSpecKey> {
        self.spec_to_carg.iter().find(|(_, name)| *name == carg).map(|(key, _)| key)
    }

    /// Constructor arguments in spec order.
    pub fn const_args(&self) -> impl Iterator<Item = (&HdSpecKey, &str)> {
        self.spec_to_carg.iter().map(|(key, name)| (key, name.as_str()))
    }

    /// The spec at `key`, `None` for the root key or unknown paths.
    pub fn spec_at(&self, key: &HdSpecKey) -> Option<HdSpecRef<'_>> {
        self.spec_path(key)?.pop()
    }

    fn spec_path(&self, key: &HdSpecKey) -> Option<Vec<HdSpecRef<'_>>> {
        let mut path = Vec::new();
        let mut current = self.spec.view();
        for segment in key.segments() {
            let next = if let Some(name) = segment.strip_prefix('@') {
                match current {
                    HdSpecRef::Group(group) => group.get_attribute(name).map(HdSpecRef::Attribute),
                    HdSpecRef::Dataset(dataset) => dataset.get_attribute(name).map(HdSpecRef::Attribute),
                    _ => None,
                }
            } else {
                match current {
                    HdSpecRef::Group(group) => group
                        .datasets
                        .get(segment)
                        .map(HdSpecRef::Dataset)
                        .or_else(|| group.groups.get(segment).map(HdSpecRef::Group))
                        .or_else(|| group.links.get(segment).map(HdSpecRef::Link)),
                    _ => None,
                }
            }?;
            path.push(next);
            current = next;
        }
        Some(path)
    }

    /// True when every spec along `key` is required.
    pub fn field_required(&self, key: &HdSpecKey) -> bool {
        self.spec_path(key)
            .map(|path| path.iter().all(HdSpecRef::required))
            .unwrap_or(false)
    }

    fn build_error(&self, field: &str, message: impl Into<String>) -> HdError {
        HdError::build(self.data_type.clone(), field, message)
    }

    fn construct_error(&self, field: &str, message: impl Into<String>) -> HdError {
        HdError::construct(self.data_type.clone(), field, message)
    }

    fn field_name(&self, key: &HdSpecKey) -> String {
        self.get_attribute(key)
            .map(str::to_string)
            .unwrap_or_else(|| key.to_string())
    }

    // ---- build ----------------------------------------------------------

    /// Converts `container` into a builder subtree and returns its root.
    pub(crate) fn build(
        &self,
        manager: &mut HdBuildManager,
        arena: &mut HdContainerArena,
        container: HdContainerId,
        source: Option<&str>,
        options: &HdBuildOptions,
    ) -> Result<HdBuilderId> {
        let class = manager.type_map().get_dt_container_cls(&self.data_type, Some(&self.namespace), true)?;
        let class = if class.accepts(arena.payload(container)?) {
            class
        } else if arena.payload(container)?.is::<HdDynamicContainer>() {
            manager.type_map().generated_class(&self.namespace, &self.data_type)?
        } else {
            return Err(self.build_error(
                "",
                format!("container '{}' is not a {}", arena.name(container)?, class.type_name()),
            ));
        };
        let name = arena.name(container)?.to_string();
        let mut pass = BuildPass {
            manager,
            arena,
            options,
            container,
            class,
            source: source.map(str::to_string),
        };

        let root = HdSpecKey::root();
        let builder = match &self.spec {
            HdSpec::Group(group) => {
                log::debug!("building {} '{name}' as a group", self.data_type);
                let builder = pass.manager.tree_mut().new_group(&name, source);
                pass.manager.prebuilt(container, builder);
                self.add_datasets(&mut pass, builder, group, &root, true)?;
                self.add_groups(&mut pass, builder, group, &root, true)?;
                self.add_links(&mut pass, builder, group, &root, true)?;
                self.add_attributes(&mut pass, builder, &group.attributes, &root, true)?;
                builder
            }
            HdSpec::Dataset(dataset) => {
                log::debug!("building {} '{name}' as a dataset", self.data_type);
                let builder = pass.manager.tree_mut().new_dataset(&name, None, None);
                if let Some(source) = source {
                    pass.manager.tree_mut().set_source(builder, source)?;
                }
                pass.manager.prebuilt(container, builder);
                let field = match self.get_attr_value(&mut pass, &root, HdSpecRef::Dataset(dataset))? {
                    Lookup::Found(field) => Some(field),
                    Lookup::Omitted => None,
                    Lookup::Missing => dataset
                        .value()
                        .or(dataset.default_value())
                        .cloned()
                        .map(HdField::Value),
                };
                match field {
                    Some(field) => self.set_dataset_data(&mut pass, builder, dataset, field, "data")?,
                    None => return Err(self.build_error("data", "missing required value")),
                }
                self.add_attributes(&mut pass, builder, &dataset.attributes, &root, true)?;
                builder
            }
        };
        Ok(builder)
    }

    fn get_attr_value(&self, pass: &mut BuildPass<'_>, key: &HdSpecKey, spec: HdSpecRef<'_>) -> Result<Lookup> {
        let Some(attr_name) = self.get_attribute(key) else {
            return Ok(Lookup::Missing);
        };
        let mut value = None;
        let mut hooked = false;
        if let Some(hook) = self.object_attrs.get(attr_name) {
            log::debug!("calling object attribute hook for '{attr_name}' of {}", self.data_type);
            match hook(&*pass.arena, pass.container).map_err(|err| self.build_error(attr_name, format!("{err:#}")))? {
                HdOverride::Value(field) => {
                    value = Some(field);
                    hooked = true;
                }
                HdOverride::Omit => return Ok(Lookup::Omitted),
                HdOverride::Fallthrough => {}
            }
        }
        if !hooked {
            let payload = pass.arena.payload(pass.container)?;
            value = match pass.class.get(attr_name, payload) {
                Some(value) => value,
                None => {
                    log::debug!("{} has no getter for '{attr_name}'", pass.class.type_name());
                    None
                }
            };
        }
        let Some(field) = value else {
            return Ok(Lookup::Missing);
        };
        let spec_dt = match spec.data_type() {
            Some(spec_dt) if !key.is_root() => spec_dt,
            _ => return Ok(Lookup::Found(field)),
        };

        // Typed children: keep only containers of the spec's type.
        if !field.is_containers() {
            return Err(self.build_error(attr_name, format!("expected containers of type '{spec_dt}'")));
        }
        let matching: Vec<HdContainerId> = field
            .containers()
            .into_iter()
            .filter(|child| pass.manager.is_container_sub_type(pass.arena, *child, spec_dt))
            .collect();
        let filtered = match (field, matching.len()) {
            (_, 0) => return Ok(Lookup::Missing),
            (HdField::Containers(_), _) => HdField::Containers(matching),
            (field, _) => field,
        };
        let count = filtered.containers().len();
        if count > 1 && !spec.is_many() {
            log::warn!(
                "{} '{}' has {count} values for attribute '{attr_name}' but spec allows {}",
                self.data_type,
                pass.arena.name(pass.container)?,
                quantity_label(spec)
            );
        }
        Ok(Lookup::Found(filtered))
    }

    fn missing(&self, key: &HdSpecKey, required: bool, enforce: bool) -> Result<()> {
        if required && enforce {
            return Err(self.build_error(&self.field_name(key), "missing required value"));
        }
        log::debug!("skipping empty field '{key}' of {}", self.data_type);
        Ok(())
    }

    fn add_attributes(
        &self,
        pass: &mut BuildPass<'_>,
        builder: HdBuilderId,
        attributes: &IndexMap<String, HdAttributeSpec>,
        prefix: &HdSpecKey,
        enforce: bool,
    ) -> Result<()> {
        for (name, spec) in attributes {
            let key = prefix.attribute(name);
            let field = match spec.value() {
                Some(fixed) => Some(HdField::Value(fixed.clone())),
                None => match self.get_attr_value(pass, &key, HdSpecRef::Attribute(spec))? {
                    Lookup::Found(field) => Some(field),
                    Lookup::Omitted => continue,
                    Lookup::Missing => spec.default_value().cloned().map(HdField::Value),
                },
            };
            let Some(field) = field else {
                self.missing(&key, spec.required(), enforce)?;
                continue;
            };
            let field_name = self.field_name(&key);
            if spec.dtype().is_reference() {
                if !field.is_containers() {
                    return Err(self.build_error(&field_name, "reference attributes must hold containers"));
                }
                pass.manager.queue_ref(HdPendingRef::Attribute {
                    builder,
                    name: name.clone(),
                    field,
                    data_type: self.data_type.clone(),
                });
                continue;
            }
            let HdField::Value(value) = field else {
                return Err(self.build_error(&field_name, "attributes hold values, not containers or chunked data"));
            };
            let (converted, _) = convert_value(Some(spec.dtype()), &value)
                .map_err(|message| self.build_error(&field_name, message))?;
            check_shape(spec.shape(), &converted).map_err(|message| self.build_error(&field_name, message))?;
            pass.manager.tree_mut().set_attribute(builder, name, converted)?;
        }
        Ok(())
    }

    fn set_dataset_data(
        &self,
        pass: &mut BuildPass<'_>,
        builder: HdBuilderId,
        spec: &HdDatasetSpec,
        field: HdField,
        field_name: &str,
    ) -> Result<()> {
        match (spec.dtype(), field) {
            (Some(dtype), field) if dtype.is_reference() => {
                if !field.is_containers() {
                    return Err(self.build_error(field_name, "reference datasets must hold containers"));
                }
                pass.manager.tree_mut().set_dtype(builder, dtype.clone())?;
                pass.manager.queue_ref(HdPendingRef::Dataset {
                    builder,
                    field,
                    data_type: self.data_type.clone(),
                });
            }
            (None, field) if field.is_containers() => {
                pass.manager
                    .tree_mut()
                    .set_dtype(builder, HdSpecDtype::Primitive(HdDtype::Object))?;
                pass.manager.queue_ref(HdPendingRef::Dataset {
                    builder,
                    field,
                    data_type: self.data_type.clone(),
                });
            }
            (dtype, HdField::Value(value)) => {
                let (converted, resolved) =
                    convert_value(dtype, &value).map_err(|message| self.build_error(field_name, message))?;
                check_shape(spec.shape(), &converted).map_err(|message| self.build_error(field_name, message))?;
                let tree = pass.manager.tree_mut();
                tree.set_data(builder, converted)?;
                if let Some(resolved) = resolved {
                    tree.set_dtype(builder, resolved)?;
                }
            }
            (dtype, HdField::Chunked(plan)) => {
                let extents: Vec<usize> = plan.extents().to_vec();
                if let Some(shape) = spec.shape() {
                    if !shape.matches(&extents) {
                        return Err(self.build_error(
                            field_name,
                            format!("chunked data of shape {extents:?} does not match spec shape {shape:?}"),
                        ));
                    }
                }
                let resolved = dtype.cloned().unwrap_or(HdSpecDtype::Primitive(plan.dtype()));
                let maxshape = plan.maxshape().clone();
                let chunks = plan.chunk_shape().to_vec();
                let tree = pass.manager.tree_mut();
                tree.set_data(builder, plan)?;
                tree.set_dtype(builder, resolved)?;
                tree.set_maxshape(builder, maxshape)?;
                tree.set_chunks(builder, chunks)?;
            }
            (_, _) => {
                return Err(self.build_error(field_name, "dataset of a non-reference dtype cannot hold containers"));
            }
        }
        Ok(())
    }

    fn add_datasets(
        &self,
        pass: &mut BuildPass<'_>,
        builder: HdBuilderId,
        group: &HdGroupSpec,
        prefix: &HdSpecKey,
        enforce: bool,
    ) -> Result<()> {
        for (child_key, spec) in &group.datasets {
            let key = prefix.child(child_key);
            let lookup = self.get_attr_value(pass, &key, HdSpecRef::Dataset(spec))?;
            if spec.data_type().is_some() {
                match lookup {
                    Lookup::Found(field) => self.add_containers(pass, builder, HdSpecRef::Dataset(spec), field)?,
                    Lookup::Omitted => {}
                    Lookup::Missing => self.missing(&key, spec.required(), enforce)?,
                }
                continue;
            }
            let field = match lookup {
                Lookup::Found(field) => Some(field),
                Lookup::Omitted => continue,
                Lookup::Missing => spec.value().or(spec.default_value()).cloned().map(HdField::Value),
            };
            let Some(field) = field else {
                self.missing(&key, spec.required(), enforce)?;
                continue;
            };
            let name = spec.name().unwrap_or(child_key).to_string();
            log::debug!("adding untyped dataset '{name}' to {}", self.data_type);
            let sub = pass.manager.tree_mut().add_dataset(builder, &name, None, None)?;
            if let Some(source) = pass.source.clone() {
                pass.manager.tree_mut().set_source(sub, &source)?;
            }
            self.set_dataset_data(pass, sub, spec, field, &self.field_name(&key))?;
            self.add_attributes(pass, sub, &spec.attributes, &key, enforce)?;
        }
        Ok(())
    }

    fn add_groups(
        &self,
        pass: &mut BuildPass<'_>,
        builder: HdBuilderId,
        group: &HdGroupSpec,
        prefix: &HdSpecKey,
        enforce: bool,
    ) -> Result<()> {
        for (child_key, spec) in &group.groups {
            let key = prefix.child(child_key);
            if spec.data_type().is_some() {
                match self.get_attr_value(pass, &key, HdSpecRef::Group(spec))? {
                    Lookup::Found(field) => self.add_containers(pass, builder, HdSpecRef::Group(spec), field)?,
                    Lookup::Omitted => {}
                    Lookup::Missing => self.missing(&key, spec.required(), enforce)?,
                }
                continue;
            }
            let name = spec.name().unwrap_or(child_key).to_string();
            log::debug!("adding untyped group '{name}' to {}", self.data_type);
            let source = pass.source.clone();
            let sub = pass.manager.tree_mut().new_group(&name, source.as_deref());
            let nested = enforce && spec.required();
            self.add_datasets(pass, sub, spec, &key, nested)?;
            self.add_groups(pass, sub, spec, &key, nested)?;
            self.add_links(pass, sub, spec, &key, nested)?;
            self.add_attributes(pass, sub, &spec.attributes, &key, nested)?;
            if !pass.manager.tree().is_empty_node(sub)? || spec.required() {
                pass.manager.tree_mut().set_group(builder, sub)?;
            } else {
                pass.manager.tree_mut().remove_subtree(sub)?;
            }
        }
        Ok(())
    }

    fn add_links(
        &self,
        pass: &mut BuildPass<'_>,
        builder: HdBuilderId,
        group: &HdGroupSpec,
        prefix: &HdSpecKey,
        enforce: bool,
    ) -> Result<()> {
        for (child_key, spec) in &group.links {
            let key = prefix.child(child_key);
            match self.get_attr_value(pass, &key, HdSpecRef::Link(spec))? {
                Lookup::Found(field) => self.add_containers(pass, builder, HdSpecRef::Link(spec), field)?,
                Lookup::Omitted => {}
                Lookup::Missing => self.missing(&key, spec.required(), enforce)?,
            }
        }
        Ok(())
    }

    fn add_containers(
        &self,
        pass: &mut BuildPass<'_>,
        builder: HdBuilderId,
        spec: HdSpecRef<'_>,
        field: HdField,
    ) -> Result<()> {
        for child in field.containers() {
            let parent = pass.arena.parent(child)?;
            if parent.is_none() && pass.manager.get_builder(child).is_none() && child != pass.container {
                return Err(self.build_error(
                    spec.name().unwrap_or(""),
                    format!("container '{}' has no parent and was never built", pass.arena.name(child)?),
                ));
            }
            let child_builder = pass.manager.build_node(pass.arena, child, pass.options)?;
            let is_link = matches!(spec, HdSpecRef::Link(_)) || parent != Some(pass.container);
            let tree = pass.manager.tree_mut();
            if is_link {
                let name = match spec.name() {
                    Some(name) => name.to_string(),
                    None => tree.get(child_builder)?.name().to_string(),
                };
                log::debug!("adding link '{name}' to {}", tree.path(child_builder)?);
                tree.add_link(builder, &name, child_builder)?;
            } else if matches!(spec, HdSpecRef::Dataset(_)) {
                tree.set_dataset(builder, child_builder)?;
            } else {
                tree.set_group(builder, child_builder)?;
            }
        }
        Ok(())
    }

    // ---- construct ------------------------------------------------------

    /// Fills the reserved container `id` from `builder`.
    pub(crate) fn construct(
        &self,
        manager: &mut HdBuildManager,
        arena: &mut HdContainerArena,
        builder: HdBuilderId,
        id: HdContainerId,
    ) -> Result<()> {
        let root = HdSpecKey::root();
        let mut values = IndexMap::new();
        match &self.spec {
            HdSpec::Group(group) => self.gather_group(manager, arena, builder, group, &root, &mut values)?,
            HdSpec::Dataset(dataset) => self.gather_dataset(manager, arena, builder, dataset, &root, &mut values)?,
        }

        let class = manager.type_map().get_dt_container_cls(&self.data_type, Some(&self.namespace), true)?;
        let mut mapped: IndexMap<String, HdField> = IndexMap::new();
        let mut leftover: Vec<(String, HdField)> = Vec::new();
        for (key, value) in values {
            match self.get_const_arg(&key) {
                Some(carg) if class.has_arg(carg) => {
                    let many = self.spec_at(&key).map(|spec| spec.is_many()).unwrap_or(false);
                    let merged = match (mapped.shift_remove(carg), value) {
                        (Some(HdField::Containers(mut existing)), HdField::Containers(more)) if many => {
                            existing.extend(more);
                            HdField::Containers(existing)
                        }
                        (_, value) => value,
                    };
                    mapped.insert(carg.to_string(), merged);
                }
                _ => {
                    if let Some(attr) = self.get_attribute(&key) {
                        leftover.push((attr.to_string(), value));
                    }
                }
            }
        }

        let mut args = HdArgs::new();
        for arg in class.args() {
            let value = match self.constructor_args.get(&arg.name) {
                Some(hook) => {
                    log::debug!("calling constructor argument hook for '{}' of {}", arg.name, self.data_type);
                    let result = hook(manager.tree(), builder)
                        .map_err(|err| self.construct_error(&arg.name, format!("{err:#}")))?;
                    match result {
                        HdOverride::Value(value) => {
                            mapped.shift_remove(&arg.name);
                            Some(value)
                        }
                        HdOverride::Omit => {
                            mapped.shift_remove(&arg.name);
                            None
                        }
                        HdOverride::Fallthrough => mapped.shift_remove(&arg.name),
                    }
                }
                None => mapped.shift_remove(&arg.name),
            };
            let spec_required = self
                .get_carg_spec(&arg.name)
                .is_some_and(|key| !key.is_root() && self.field_required(key));
            match (value, &arg.default) {
                (Some(value), _) => args.insert(arg.name.clone(), value),
                (None, _) if arg.required || spec_required => {
                    return Err(self.construct_error(&arg.name, "missing required constructor argument"));
                }
                (None, Some(default)) => args.insert(arg.name.clone(), default.clone()),
                (None, None) => {}
            }
        }

        let payload = class
            .construct(&mut args)
            .map_err(|err| self.construct_error("constructor", format!("{err:#}")))?;
        arena.fill(id, payload)?;

        for (attr, value) in leftover {
            if class.has_setter(&attr) {
                let payload = arena.payload_mut(id)?;
                class
                    .set(&attr, payload, value)
                    .map_err(|err| self.construct_error(&attr, format!("{err:#}")))?;
            } else {
                log::debug!("{} has no constructor argument or setter for '{attr}'", class.type_name());
            }
        }
        Ok(())
    }

    fn to_field(&self, manager: &mut HdBuildManager, arena: &mut HdContainerArena, value: HdBuilderValue) -> Result<HdField> {
        Ok(match value {
            HdBuilderValue::Value(value) => HdField::Value(value),
            HdBuilderValue::Chunked(plan) => HdField::Chunked(plan),
            HdBuilderValue::Reference(HdReference::Object(target)) => {
                HdField::Container(manager.construct_node(arena, target)?)
            }
            HdBuilderValue::Reference(HdReference::Region { target, region }) => HdField::Region {
                target: manager.construct_node(arena, target)?,
                region,
            },
            HdBuilderValue::References(references) => {
                let mut ids = Vec::with_capacity(references.len());
                for reference in references {
                    ids.push(manager.construct_node(arena, reference.target())?);
                }
                HdField::Containers(ids)
            }
        })
    }

    fn gather_attributes(
        &self,
        manager: &mut HdBuildManager,
        arena: &mut HdContainerArena,
        builder: HdBuilderId,
        attributes: &IndexMap<String, HdAttributeSpec>,
        prefix: &HdSpecKey,
        values: &mut IndexMap<HdSpecKey, HdField>,
    ) -> Result<()> {
        for name in attributes.keys() {
            let Some(value) = manager.tree().get(builder)?.attribute(name).cloned() else {
                continue;
            };
            let field = self.to_field(manager, arena, value)?;
            values.insert(prefix.attribute(name), field);
        }
        Ok(())
    }

    fn gather_dataset(
        &self,
        manager: &mut HdBuildManager,
        arena: &mut HdContainerArena,
        builder: HdBuilderId,
        spec: &HdDatasetSpec,
        key: &HdSpecKey,
        values: &mut IndexMap<HdSpecKey, HdField>,
    ) -> Result<()> {
        self.gather_attributes(manager, arena, builder, &spec.attributes, key, values)?;
        if let Some(data) = manager.tree().get(builder)?.data().cloned() {
            let field = match self.to_field(manager, arena, data)? {
                HdField::Value(value) if spec.shape().is_none() => HdField::Value(value.into_scalar_if_single()),
                field => field,
            };
            values.insert(key.clone(), field);
        }
        Ok(())
    }

    fn gather_group(
        &self,
        manager: &mut HdBuildManager,
        arena: &mut HdContainerArena,
        builder: HdBuilderId,
        spec: &HdGroupSpec,
        prefix: &HdSpecKey,
        values: &mut IndexMap<HdSpecKey, HdField>,
    ) -> Result<()> {
        self.gather_attributes(manager, arena, builder, &spec.attributes, prefix, values)?;

        let tree = manager.tree();
        let mut groups: IndexMap<String, HdBuilderId> = IndexMap::new();
        let mut datasets: IndexMap<String, HdBuilderId> = IndexMap::new();
        for child in tree.groups(builder) {
            groups.insert(tree.get(child)?.name().to_string(), child);
        }
        for child in tree.datasets(builder) {
            datasets.insert(tree.get(child)?.name().to_string(), child);
        }
        let mut links: IndexMap<String, HdBuilderId> = IndexMap::new();
        let mut link_types: HashMap<String, Vec<HdBuilderId>> = HashMap::new();
        for link in tree.links(builder) {
            let node = tree.get(link)?;
            let Some(target) = node.link_target() else {
                continue;
            };
            let name = node.name().to_string();
            if tree.get(target)?.is_dataset() {
                datasets.insert(name.clone(), target);
            } else {
                groups.insert(name.clone(), target);
            }
            links.insert(name, target);
            if let Some(dt) = manager.get_builder_dt(target) {
                link_types.entry(dt).or_default().push(target);
            }
        }

        for (child_key, link) in &spec.links {
            let key = prefix.child(child_key);
            let named = link.name().and_then(|name| links.get(name)).copied();
            if let Some(target) = named {
                let id = manager.construct_node(arena, target)?;
                values.insert(key, HdField::Container(id));
            } else if let Some(targets) = link_types.get(link.target_type()) {
                let field = self.flatten(manager, arena, targets, link.is_many())?;
                values.insert(key, field);
            }
        }

        let group_specs: Vec<(&String, HdSpecRef<'_>)> =
            spec.groups.iter().map(|(key, child)| (key, HdSpecRef::Group(child))).collect();
        self.gather_children(manager, arena, &groups, group_specs, prefix, values)?;
        let dataset_specs: Vec<(&String, HdSpecRef<'_>)> =
            spec.datasets.iter().map(|(key, child)| (key, HdSpecRef::Dataset(child))).collect();
        self.gather_children(manager, arena, &datasets, dataset_specs, prefix, values)?;
        Ok(())
    }

    fn gather_children(
        &self,
        manager: &mut HdBuildManager,
        arena: &mut HdContainerArena,
        children: &IndexMap<String, HdBuilderId>,
        specs: Vec<(&String, HdSpecRef<'_>)>,
        prefix: &HdSpecKey,
        values: &mut IndexMap<HdSpecKey, HdField>,
    ) -> Result<()> {
        let mut by_type: HashMap<String, Vec<HdBuilderId>> = HashMap::new();
        for child in children.values() {
            let (Some(dt), Some(ns)) = (manager.get_builder_dt(*child), manager.get_builder_ns(*child)) else {
                continue;
            };
            let hierarchy = manager
                .type_map()
                .namespace_catalog()
                .get_hierarchy(&ns, &dt)
                .unwrap_or_default();
            for ancestor in hierarchy {
                by_type.entry(ancestor).or_default().push(*child);
            }
        }

        for (child_key, spec) in specs {
            let key = prefix.child(child_key);
            let data_type = spec.data_type();
            match spec.name() {
                None => {
                    let Some(found) = data_type.and_then(|dt| by_type.get(dt)) else {
                        continue;
                    };
                    let field = self.flatten(manager, arena, found, spec.is_many())?;
                    values.insert(key, field);
                }
                Some(name) => {
                    let Some(child) = children.get(name).copied() else {
                        continue;
                    };
                    match (data_type, spec) {
                        (None, HdSpecRef::Group(group)) => {
                            self.gather_group(manager, arena, child, group, &key, values)?;
                        }
                        (None, HdSpecRef::Dataset(dataset)) => {
                            self.gather_dataset(manager, arena, child, dataset, &key, values)?;
                        }
                        _ => {
                            let id = manager.construct_node(arena, child)?;
                            values.insert(key, HdField::Container(id));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn flatten(
        &self,
        manager: &mut HdBuildManager,
        arena: &mut HdContainerArena,
        builders: &[HdBuilderId],
        many: bool,
    ) -> Result<HdField> {
        let mut ids = Vec::with_capacity(builders.len());
        for builder in builders {
            ids.push(manager.construct_node(arena, *builder)?);
        }
        if ids.len() == 1 && !many {
            return Ok(HdField::Container(ids[0]));
        }
        Ok(HdField::Containers(ids))
    }
}

fn quantity_label(spec: HdSpecRef<'_>) -> String {
    match spec {
        HdSpecRef::Dataset(dataset) => dataset.quantity().to_string(),
        HdSpecRef::Group(group) => group.quantity().to_string(),
        HdSpecRef::Link(link) => link.quantity().to_string(),
        HdSpecRef::Attribute(_) => "1".to_string(),
    }
}

fn collect_attribute(
    prefix: &HdSpecKey,
    stack: &mut Vec<String>,
    spec: &HdAttributeSpec,
    names: &mut IndexMap<HdSpecKey, String>,
) {
    stack.push(spec.name().to_string());
    names.insert(prefix.attribute(spec.name()), stack.join("__"));
    stack.pop();
}

fn storage_name(name: Option<&str>, data_type: Option<&str>, many: bool) -> String {
    match (name, data_type) {
        (Some(name), _) => name.to_string(),
        (None, Some(data_type)) => HdObjectMapper::convert_dt_name(data_type, many),
        (None, None) => String::new(),
    }
}

fn collect_dataset(
    prefix: &HdSpecKey,
    stack: &mut Vec<String>,
    spec: &HdDatasetSpec,
    names: &mut IndexMap<HdSpecKey, String>,
) {
    let key = prefix.child(&spec.key());
    stack.push(storage_name(spec.name(), spec.data_type(), spec.is_many()));
    names.insert(key.clone(), stack.join("__"));
    if spec.data_type().is_none() {
        for attribute in spec.attributes.values() {
            collect_attribute(&key, stack, attribute, names);
        }
    }
    stack.pop();
}

fn collect_group(
    prefix: &HdSpecKey,
    stack: &mut Vec<String>,
    spec: &HdGroupSpec,
    names: &mut IndexMap<HdSpecKey, String>,
) {
    let key = prefix.child(&spec.key());
    stack.push(storage_name(spec.name(), spec.data_type(), spec.is_many()));
    names.insert(key.clone(), stack.join("__"));
    if spec.data_type().is_none() {
        for attribute in spec.attributes.values() {
            collect_attribute(&key, stack, attribute, names);
        }
        for dataset in spec.datasets.values() {
            collect_dataset(&key, stack, dataset, names);
        }
        for group in spec.groups.values() {
            collect_group(&key, stack, group, names);
        }
        for link in spec.links.values() {
            stack.push(storage_name(link.name(), Some(link.target_type()), link.is_many()));
            names.insert(key.child(&link.key()), stack.join("__"));
            stack.pop();
        }
    }
    stack.pop();
}

/// Converts `value` to `dtype`, inferring the dtype when none is declared.
fn convert_value(
    dtype: Option<&HdSpecDtype>,
    value: &HdValue,
) -> std::result::Result<(HdValue, Option<HdSpecDtype>), String> {
    match dtype {
        None => Ok((value.clone(), HdDtype::infer(value).map(HdSpecDtype::Primitive))),
        Some(HdSpecDtype::Primitive(primitive)) => Ok((primitive.convert(value)?, Some(*primitive).map(Into::into))),
        Some(HdSpecDtype::Compound(fields)) => {
            let converted = value.map_leaves(&mut |leaf| {
                let HdValue::Compound(row) = leaf else {
                    return Err(format!("expected a compound row, got {} value", leaf.kind()));
                };
                let mut out = IndexMap::with_capacity(fields.len());
                for field in fields {
                    let cell = row
                        .get(&field.name)
                        .ok_or_else(|| format!("compound row is missing field '{}'", field.name))?;
                    let cell = match &field.dtype {
                        HdSpecDtype::Primitive(primitive) => primitive.convert(cell)?,
                        _ => return Err(format!("compound field '{}' must have a primitive dtype", field.name)),
                    };
                    out.insert(field.name.clone(), cell);
                }
                Ok(HdValue::Compound(out))
            })?;
            Ok((converted, dtype.cloned()))
        }
        Some(HdSpecDtype::Reference(_)) => Err("reference dtype cannot hold plain values".to_string()),
    }
}

fn check_shape(shape: Option<&HdShapeSpec>, value: &HdValue) -> std::result::Result<(), String> {
    let Some(shape) = shape else {
        return Ok(());
    };
    let actual = value.shape().ok_or_else(|| "ragged data has no shape".to_string())?;
    if shape.matches(&actual) {
        Ok(())
    } else {
        Err(format!("data of shape {actual:?} does not match spec shape {shape:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::quantity::HdQuantity;

    #[test]
    fn type_names_convert_to_snake_case() {
        assert_eq!(HdObjectMapper::convert_dt_name("SpikeData", false), "spike_data");
        assert_eq!(HdObjectMapper::convert_dt_name("HTTPServer", true), "http_servers");
        assert_eq!(HdObjectMapper::convert_dt_name("Bars", true), "bars");
    }

    #[test]
    fn untyped_children_prefix_their_fields() {
        let inner = HdDatasetSpec::builder("inner data")
            .name("data")
            .dtype("int")
            .attribute(HdAttributeSpec::builder("unit", "unit").build().unwrap())
            .build()
            .unwrap();
        let settings = HdGroupSpec::builder("settings").name("settings").dataset(inner).build().unwrap();
        let bars = HdGroupSpec::builder("bars")
            .data_type_inc("Bar")
            .quantity(HdQuantity::ZeroOrMany)
            .build()
            .unwrap();
        let spec = HdGroupSpec::builder("foo")
            .data_type_def("Foo")
            .group(settings)
            .group(bars)
            .build()
            .unwrap();
        let names = HdObjectMapper::get_attr_names(&HdSpec::Group(spec));
        assert_eq!(names.get(&HdSpecKey::from("settings/data")).map(String::as_str), Some("settings__data"));
        assert_eq!(
            names.get(&HdSpecKey::from("settings/data/@unit")).map(String::as_str),
            Some("settings__data__unit")
        );
        assert_eq!(names.get(&HdSpecKey::from("<Bar>")).map(String::as_str), Some("bars"));
    }

    #[test]
    fn profiles_remap_and_unmap() {
        let spec = HdGroupSpec::builder("foo")
            .data_type_def("Foo")
            .attribute(HdAttributeSpec::builder("attr1", "attr").build().unwrap())
            .build()
            .unwrap();
        let profile = HdMapperProfile::new().map_spec("@attr1", "label");
        let mapper = HdObjectMapper::new("test", "Foo", HdSpec::Group(spec), &[&profile]);
        assert_eq!(mapper.get_attribute(&HdSpecKey::from("@attr1")), Some("label"));
        assert_eq!(mapper.get_carg_spec("label"), Some(&HdSpecKey::from("@attr1")));
        let mut mapper = mapper;
        mapper.unmap(&HdSpecKey::from("@attr1"));
        assert_eq!(mapper.get_const_arg(&HdSpecKey::from("@attr1")), None);
    }
}
