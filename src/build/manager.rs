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

//! # Hdx Build Manager Module
//!
//! [`HdTypeMap`] ties loaded namespaces to container classes and caches one
//! [`HdObjectMapper`] per data type. [`HdBuildManager`] drives whole-graph
//! passes over a container arena and a builder tree, keeping identity
//! caches in both directions so shared and cyclic references map to a
//! single builder or container.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut type_map = HdTypeMap::new(catalog);
//! type_map.register_container_type("test", "Foo", foo_class)?;
//! let mut manager = HdBuildManager::new(Arc::new(type_map));
//! let root = manager.build(&mut arena, foo)?;
//! let back = manager.construct(&mut read_arena, root)?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::build::builders::{HdBuilderId, HdBuilderTree, HdBuilderValue, HdReference};
use crate::build::objectmapper::{HdMapperProfile, HdObjectMapper};
use crate::container::{HdArgSpec, HdContainerArena, HdContainerClass, HdContainerId, HdField};
use crate::errors::{HdError, Result};
use crate::spec::namespace::{HdNamespaceCatalog, HdNamespaceDeps};
use crate::spec::storage::{HdGroupSpec, HdSpecRef};
use crate::value::HdValue;

type HdTypeKey = (String, String);

/// Registry of container classes and mapper profiles over a namespace
/// catalog.
pub struct HdTypeMap {
    namespace_catalog: HdNamespaceCatalog,
    container_types: IndexMap<String, IndexMap<String, Arc<HdContainerClass>>>,
    profiles: HashMap<String, HdMapperProfile>,
    mappers: Mutex<HashMap<HdTypeKey, Arc<HdObjectMapper>>>,
    generated: Mutex<HashMap<HdTypeKey, Arc<HdContainerClass>>>,
}

impl std::fmt::Debug for HdTypeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdTypeMap")
            .field("namespaces", &self.namespace_catalog.namespaces())
            .field("container_types", &self.container_types)
            .field("profiles", &self.profiles)
            .finish()
    }
}

fn poisoned<T>(_: T) -> HdError {
    HdError::internal("type map cache lock poisoned")
}

impl HdTypeMap {
    pub fn new(namespace_catalog: HdNamespaceCatalog) -> Self {
        Self {
            namespace_catalog,
            container_types: IndexMap::new(),
            profiles: HashMap::new(),
            mappers: Mutex::new(HashMap::new()),
            generated: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace_catalog(&self) -> &HdNamespaceCatalog {
        &self.namespace_catalog
    }

    /// Loads another namespace document into the catalog.
    pub fn load_namespaces(&mut self, namespace_path: impl AsRef<Path>) -> Result<HdNamespaceDeps> {
        let deps = self.namespace_catalog.load(namespace_path)?;
        self.clear_caches()?;
        Ok(deps)
    }

    fn clear_caches(&mut self) -> Result<()> {
        self.mappers.get_mut().map_err(poisoned)?.clear();
        self.generated.get_mut().map_err(poisoned)?.clear();
        Ok(())
    }

    /// Registers `class` as the container class of `data_type` in
    /// `namespace`. The type must exist in the namespace.
    pub fn register_container_type(&mut self, namespace: &str, data_type: &str, class: HdContainerClass) -> Result<()> {
        self.namespace_catalog.get_spec(namespace, data_type)?;
        if class.data_type() != data_type {
            return Err(HdError::validation(format!(
                "container class for '{}' cannot be registered as '{data_type}'",
                class.data_type()
            )));
        }
        log::debug!("registering {} for {namespace}/{data_type}", class.type_name());
        self.container_types
            .entry(namespace.to_string())
            .or_default()
            .insert(data_type.to_string(), Arc::new(class));
        self.generated
            .get_mut()
            .map_err(poisoned)?
            .remove(&(namespace.to_string(), data_type.to_string()));
        Ok(())
    }

    /// Registers the mapper profile of `data_type`. Subtypes inherit it.
    pub fn register_map(&mut self, data_type: &str, profile: HdMapperProfile) -> Result<()> {
        self.profiles.insert(data_type.to_string(), profile);
        self.clear_caches()
    }

    /// Namespace defining `data_type`, preferring one with a registered
    /// container class.
    pub fn namespace_of(&self, data_type: &str) -> Result<String> {
        if let Some((namespace, _)) = self
            .container_types
            .iter()
            .find(|(_, classes)| classes.contains_key(data_type))
        {
            return Ok(namespace.clone());
        }
        self.namespace_catalog
            .namespaces()
            .into_iter()
            .find(|namespace| self.namespace_catalog.get_spec(namespace, data_type).is_ok())
            .map(str::to_string)
            .ok_or_else(|| HdError::lookup(format!("no namespace defines data type '{data_type}'")))
    }

    /// Container class of `data_type`, generating one from the spec when
    /// none is registered and `autogen` is set.
    pub fn get_dt_container_cls(
        &self,
        data_type: &str,
        namespace: Option<&str>,
        autogen: bool,
    ) -> Result<Arc<HdContainerClass>> {
        let namespace = match namespace {
            Some(namespace) => namespace.to_string(),
            None => self.namespace_of(data_type)?,
        };
        if let Some(class) = self
            .container_types
            .get(&namespace)
            .and_then(|classes| classes.get(data_type))
        {
            return Ok(class.clone());
        }
        if !autogen {
            return Err(HdError::lookup(format!(
                "no container class registered for '{namespace}/{data_type}'"
            )));
        }
        self.generated_class(&namespace, data_type)
    }

    /// Generated class of `data_type`, one field per constructor argument.
    pub fn generated_class(&self, namespace: &str, data_type: &str) -> Result<Arc<HdContainerClass>> {
        let key = (namespace.to_string(), data_type.to_string());
        if let Some(class) = self.generated.lock().map_err(poisoned)?.get(&key) {
            return Ok(class.clone());
        }
        let mapper = self.get_map(namespace, data_type)?;
        let mut args: Vec<HdArgSpec> = Vec::new();
        for (key, name) in mapper.const_args() {
            if args.iter().any(|arg| arg.name == name) {
                continue;
            }
            args.push(HdArgSpec {
                name: name.to_string(),
                required: mapper.field_required(key),
                default: None,
            });
        }
        log::debug!("generating container class for {namespace}/{data_type} with {} fields", args.len());
        let class = Arc::new(HdContainerClass::dynamic(data_type, args));
        self.generated.lock().map_err(poisoned)?.insert(key, class.clone());
        Ok(class)
    }

    /// Registered and generated classes, optionally limited to one
    /// namespace.
    pub fn get_container_classes(&self, namespace: Option<&str>) -> Result<Vec<Arc<HdContainerClass>>> {
        let mut classes: Vec<Arc<HdContainerClass>> = self
            .container_types
            .iter()
            .filter(|(name, _)| namespace.map_or(true, |namespace| namespace == name.as_str()))
            .flat_map(|(_, classes)| classes.values().cloned())
            .collect();
        let generated = self.generated.lock().map_err(poisoned)?;
        classes.extend(
            generated
                .iter()
                .filter(|((name, _), _)| namespace.map_or(true, |namespace| namespace == name.as_str()))
                .map(|(_, class)| class.clone()),
        );
        Ok(classes)
    }

    /// Mapper of `data_type`, with the profiles of its ancestors applied
    /// root first.
    pub fn get_map(&self, namespace: &str, data_type: &str) -> Result<Arc<HdObjectMapper>> {
        let key = (namespace.to_string(), data_type.to_string());
        if let Some(mapper) = self.mappers.lock().map_err(poisoned)?.get(&key) {
            return Ok(mapper.clone());
        }
        let spec = self.namespace_catalog.get_spec(namespace, data_type)?.clone();
        let hierarchy = self.namespace_catalog.get_hierarchy(namespace, data_type)?;
        let profiles: Vec<&HdMapperProfile> = hierarchy
            .iter()
            .rev()
            .filter_map(|ancestor| self.profiles.get(ancestor))
            .collect();
        let mapper = Arc::new(HdObjectMapper::new(namespace, data_type, spec, &profiles));
        self.mappers.lock().map_err(poisoned)?.insert(key, mapper.clone());
        Ok(mapper)
    }

    pub fn is_sub_data_type(&self, namespace: &str, data_type: &str, parent: &str) -> Result<bool> {
        self.namespace_catalog.is_sub_data_type(namespace, data_type, parent)
    }

    /// Subspec of `spec` describing `builder`: by name first, then by the
    /// builder's type hierarchy.
    pub fn get_subspec<'s>(
        &self,
        spec: &'s HdGroupSpec,
        tree: &HdBuilderTree,
        builder: HdBuilderId,
    ) -> Result<Option<HdSpecRef<'s>>> {
        let node = tree.get(builder)?;
        let name = node.name();
        let by_name = if node.is_link() {
            spec.get_link(name).map(HdSpecRef::Link)
        } else if node.is_dataset() {
            spec.get_dataset(name).map(HdSpecRef::Dataset)
        } else {
            spec.get_group(name).map(HdSpecRef::Group)
        };
        if by_name.is_some() {
            return Ok(by_name);
        }
        let data_type = builder_text(tree, builder, "data_type");
        let namespace = builder_text(tree, builder, "namespace");
        let (Some(data_type), Some(namespace)) = (data_type, namespace) else {
            return Ok(None);
        };
        for ancestor in self.namespace_catalog.get_hierarchy(&namespace, &data_type)? {
            if let Some(found) = spec.get_data_type(&ancestor) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Name the builder of `container` will carry.
    pub fn get_builder_name(&self, arena: &HdContainerArena, container: HdContainerId) -> Result<String> {
        Ok(arena.name(container)?.to_string())
    }
}

/// Options of one build pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HdBuildOptions {
    /// Storage location stamped on containers and builders.
    pub source: Option<String>,
    /// Rebuild everything and allow a different source.
    pub export: bool,
}

impl HdBuildOptions {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_export(mut self, export: bool) -> Self {
        self.export = export;
        self
    }
}

/// A reference value waiting for its target builder.
#[derive(Clone, Debug)]
pub(crate) enum HdPendingRef {
    Attribute {
        builder: HdBuilderId,
        name: String,
        field: HdField,
        data_type: String,
    },
    Dataset {
        builder: HdBuilderId,
        field: HdField,
        data_type: String,
    },
}

/// Drives build and construct passes.
#[derive(Debug)]
pub struct HdBuildManager {
    type_map: Arc<HdTypeMap>,
    tree: HdBuilderTree,
    builders: HashMap<HdContainerId, HdBuilderId>,
    containers: HashMap<HdBuilderId, HdContainerId>,
    ref_queue: VecDeque<HdPendingRef>,
    pending_parents: Vec<(HdContainerId, HdBuilderId)>,
}

impl HdBuildManager {
    pub fn new(type_map: Arc<HdTypeMap>) -> Self {
        Self::with_tree(type_map, HdBuilderTree::new())
    }

    /// Manager over a tree produced by a storage backend.
    pub fn with_tree(type_map: Arc<HdTypeMap>, tree: HdBuilderTree) -> Self {
        Self {
            type_map,
            tree,
            builders: HashMap::new(),
            containers: HashMap::new(),
            ref_queue: VecDeque::new(),
            pending_parents: Vec::new(),
        }
    }

    pub fn type_map(&self) -> &HdTypeMap {
        &self.type_map
    }

    pub fn tree(&self) -> &HdBuilderTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut HdBuilderTree {
        &mut self.tree
    }

    pub fn into_tree(self) -> HdBuilderTree {
        self.tree
    }

    pub fn build(&mut self, arena: &mut HdContainerArena, root: HdContainerId) -> Result<HdBuilderId> {
        self.build_with(arena, root, &HdBuildOptions::default())
    }

    /// Builds `root` and every container reachable from it. On failure
    /// every builder created by the pass is discarded.
    pub fn build_with(
        &mut self,
        arena: &mut HdContainerArena,
        root: HdContainerId,
        options: &HdBuildOptions,
    ) -> Result<HdBuilderId> {
        if options.export {
            self.builders.clear();
        }
        let mark = self.tree.mark();
        self.ref_queue.clear();
        let result = self.build_node(arena, root, options).and_then(|builder| {
            self.resolve_refs()?;
            Ok(builder)
        });
        if result.is_err() {
            log::debug!("build failed, discarding builders from #{mark}");
            self.tree.rollback(mark);
            self.builders.retain(|_, builder| builder.index() < mark);
            self.containers.retain(|builder, _| builder.index() < mark);
            self.ref_queue.clear();
        }
        result
    }

    /// Builds one container, reusing its builder when already built.
    pub(crate) fn build_node(
        &mut self,
        arena: &mut HdContainerArena,
        container: HdContainerId,
        options: &HdBuildOptions,
    ) -> Result<HdBuilderId> {
        if let Some(builder) = self.builders.get(&container) {
            return Ok(*builder);
        }
        let data_type = arena.data_type(container)?.to_string();
        let existing = arena.container_source(container)?.map(str::to_string);
        let source = match (existing, &options.source) {
            (None, Some(source)) => {
                arena.set_container_source(container, source)?;
                Some(source.clone())
            }
            (Some(existing), Some(source)) if existing != *source && !options.export => {
                return Err(HdError::build(
                    data_type,
                    "container_source",
                    format!("cannot change container source from '{existing}' to '{source}'"),
                ));
            }
            (Some(_), Some(source)) => Some(source.clone()),
            (existing, None) => existing,
        };
        let namespace = match &arena.meta(container)?.namespace {
            Some(namespace) => namespace.clone(),
            None => self.type_map.namespace_of(&data_type)?,
        };
        let type_map = Arc::clone(&self.type_map);
        let mapper = type_map.get_map(&namespace, &data_type)?;
        log::debug!("building '{}' ({namespace}/{data_type})", arena.name(container)?);
        let builder = mapper.build(self, arena, container, source.as_deref(), options)?;

        let object_id = arena.object_id(container)?.to_string();
        arena.set_namespace(container, &namespace)?;
        self.tree.set_attribute(builder, "namespace", HdValue::from(namespace))?;
        self.tree.set_attribute(builder, "data_type", HdValue::from(data_type))?;
        self.tree.set_attribute(builder, "object_id", HdValue::from(object_id))?;
        Ok(builder)
    }

    pub(crate) fn queue_ref(&mut self, pending: HdPendingRef) {
        self.ref_queue.push_back(pending);
    }

    fn target_builder(&self, container: HdContainerId, data_type: &str, field: &str) -> Result<HdBuilderId> {
        self.builders.get(&container).copied().ok_or_else(|| {
            HdError::build(data_type, field, format!("reference target {container} was never built"))
        })
    }

    fn reference_value(&self, field: &HdField, data_type: &str, name: &str) -> Result<HdBuilderValue> {
        Ok(match field {
            HdField::Container(target) => {
                HdBuilderValue::Reference(HdReference::Object(self.target_builder(*target, data_type, name)?))
            }
            HdField::Region { target, region } => HdBuilderValue::Reference(HdReference::Region {
                target: self.target_builder(*target, data_type, name)?,
                region: region.clone(),
            }),
            HdField::Containers(targets) => {
                let mut references = Vec::with_capacity(targets.len());
                for target in targets {
                    references.push(HdReference::Object(self.target_builder(*target, data_type, name)?));
                }
                HdBuilderValue::References(references)
            }
            _ => return Err(HdError::build(data_type, name, "reference values must point at containers")),
        })
    }

    fn resolve_refs(&mut self) -> Result<()> {
        while let Some(pending) = self.ref_queue.pop_front() {
            match pending {
                HdPendingRef::Attribute {
                    builder,
                    name,
                    field,
                    data_type,
                } => {
                    let value = self.reference_value(&field, &data_type, &name)?;
                    self.tree.set_attribute(builder, &name, value)?;
                }
                HdPendingRef::Dataset {
                    builder,
                    field,
                    data_type,
                } => {
                    let name = self.tree.get(builder)?.name().to_string();
                    let value = self.reference_value(&field, &data_type, &name)?;
                    self.tree.set_data(builder, value)?;
                }
            }
        }
        Ok(())
    }

    /// Constructs the container of `builder` and everything below it. On
    /// failure every container reserved by the pass is discarded.
    pub fn construct(&mut self, arena: &mut HdContainerArena, builder: HdBuilderId) -> Result<HdContainerId> {
        let mark = arena.len();
        self.pending_parents.clear();
        let result = self.construct_node(arena, builder).and_then(|id| {
            self.resolve_parents(arena)?;
            Ok(id)
        });
        if result.is_err() {
            log::debug!("construct failed, discarding containers from #{mark}");
            arena.rollback(mark);
            self.containers.retain(|_, container| container.index() < mark);
            self.builders.retain(|container, _| container.index() < mark);
            self.pending_parents.clear();
        }
        result
    }

    pub(crate) fn construct_node(&mut self, arena: &mut HdContainerArena, builder: HdBuilderId) -> Result<HdContainerId> {
        let mut builder = builder;
        while let Some(target) = self.tree.get(builder)?.link_target() {
            builder = target;
        }
        if let Some(container) = self.containers.get(&builder) {
            return Ok(*container);
        }
        let path = self.tree.path(builder)?;
        let data_type = self
            .get_builder_dt(builder)
            .ok_or_else(|| HdError::lookup(format!("builder '{path}' has no data type")))?;
        let namespace = match self.get_builder_ns(builder) {
            Some(namespace) => namespace,
            None => self.type_map.namespace_of(&data_type)?,
        };
        let type_map = Arc::clone(&self.type_map);
        let mapper = type_map.get_map(&namespace, &data_type)?;

        let node = self.tree.get(builder)?;
        let object_id = builder_text(&self.tree, builder, "object_id");
        let container = arena.reserve(&data_type, node.name(), object_id.as_deref());
        arena.set_namespace(container, &namespace)?;
        if let Some(source) = node.source() {
            arena.set_container_source(container, source)?;
        }
        self.prebuilt(container, builder);
        log::debug!("constructing '{path}' ({namespace}/{data_type})");

        if let Some(ancestor) = self.typed_ancestor(builder)? {
            match self.containers.get(&ancestor) {
                Some(parent) => arena.set_parent(container, *parent)?,
                None => self.pending_parents.push((container, ancestor)),
            }
        }
        mapper.construct(self, arena, builder, container)?;
        arena.set_modified(container, false)?;
        Ok(container)
    }

    fn typed_ancestor(&self, builder: HdBuilderId) -> Result<Option<HdBuilderId>> {
        let mut current = self.tree.get(builder)?.parent();
        while let Some(id) = current {
            if self.get_builder_dt(id).is_some() {
                return Ok(Some(id));
            }
            current = self.tree.get(id)?.parent();
        }
        Ok(None)
    }

    /// Attaches containers whose typed parent was constructed after them.
    fn resolve_parents(&mut self, arena: &mut HdContainerArena) -> Result<()> {
        let mut pending = std::mem::take(&mut self.pending_parents);
        pending.sort();
        for (child, ancestor) in pending {
            let Some(parent) = self.containers.get(&ancestor).copied() else {
                continue;
            };
            if arena.parent(child)?.is_none() {
                arena.set_parent(child, parent)?;
            }
        }
        Ok(())
    }

    /// Records that `container` and `builder` correspond.
    pub fn prebuilt(&mut self, container: HdContainerId, builder: HdBuilderId) {
        self.builders.insert(container, builder);
        self.containers.insert(builder, container);
    }

    pub fn get_builder(&self, container: HdContainerId) -> Option<HdBuilderId> {
        self.builders.get(&container).copied()
    }

    pub fn get_container(&self, builder: HdBuilderId) -> Option<HdContainerId> {
        self.containers.get(&builder).copied()
    }

    /// Data type stamped on `builder`, following links.
    pub fn get_builder_dt(&self, builder: HdBuilderId) -> Option<String> {
        builder_text(&self.tree, builder, "data_type")
    }

    /// Namespace stamped on `builder`, following links.
    pub fn get_builder_ns(&self, builder: HdBuilderId) -> Option<String> {
        builder_text(&self.tree, builder, "namespace")
    }

    /// True when the type of `container` is `data_type` or a subtype.
    pub fn is_container_sub_type(&self, arena: &HdContainerArena, container: HdContainerId, data_type: &str) -> bool {
        let Ok(meta) = arena.meta(container) else {
            return false;
        };
        if meta.data_type == data_type {
            return true;
        }
        let namespace = match &meta.namespace {
            Some(namespace) => namespace.clone(),
            None => match self.type_map.namespace_of(&meta.data_type) {
                Ok(namespace) => namespace,
                Err(_) => return false,
            },
        };
        self.type_map
            .is_sub_data_type(&namespace, &meta.data_type, data_type)
            .unwrap_or(false)
    }
}

fn builder_text(tree: &HdBuilderTree, builder: HdBuilderId, name: &str) -> Option<String> {
    let mut node = tree.get(builder).ok()?;
    while let Some(target) = node.link_target() {
        node = tree.get(target).ok()?;
    }
    node.attribute(name)?.as_value()?.as_text().map(str::to_string)
}
