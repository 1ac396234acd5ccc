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

//! # Hdx Container Module
//!
//! Typed domain objects and the tables that expose them to the object
//! mapper.
//!
//! Containers live in an [`HdContainerArena`]. Each slot carries the
//! bookkeeping the mapper needs (name, object id, parent, children, source,
//! modified flag, data type) next to a type-erased payload. The arena owns
//! every container; parents and children refer to each other by
//! [`HdContainerId`], so parent/child cycles need no shared ownership.
//!
//! An [`HdContainerClass`] describes one payload type as a closure table:
//! the constructor arguments it takes, the constructor itself, and named
//! getters and setters. Field values cross the table as [`HdField`].
//!
//! ```rust,ignore
//! let class = HdContainerClass::typed::<Foo>("Foo")
//!     .arg("my_data", true)
//!     .optional_arg("attr1", None)
//!     .constructor(|args| {
//!         Ok(Foo {
//!             my_data: args.required_value("my_data")?.clone(),
//!             attr1: args.text("attr1").map(str::to_string),
//!         })
//!     })
//!     .getter("my_data", |foo: &Foo| Some(foo.my_data.clone().into()))
//!     .getter("attr1", |foo: &Foo| foo.attr1.clone().map(Into::into))
//!     .build()?;
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data_utils::HdChunkPlan;
use crate::errors::{HdError, Result};
use crate::value::HdValue;

/// Index of a container in an [`HdContainerArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HdContainerId(usize);

impl HdContainerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for HdContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

/// A field value read from or written to a container.
#[derive(Clone, Debug, PartialEq)]
pub enum HdField {
    Value(HdValue),
    Chunked(HdChunkPlan),
    Container(HdContainerId),
    Containers(Vec<HdContainerId>),
    Region {
        target: HdContainerId,
        region: Vec<Range<usize>>,
    },
}

impl HdField {
    pub fn as_value(&self) -> Option<&HdValue> {
        match self {
            HdField::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<HdContainerId> {
        match self {
            HdField::Container(id) => Some(*id),
            HdField::Region { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Every container the field points at.
    pub fn containers(&self) -> Vec<HdContainerId> {
        match self {
            HdField::Container(id) => vec![*id],
            HdField::Containers(ids) => ids.clone(),
            HdField::Region { target, .. } => vec![*target],
            _ => Vec::new(),
        }
    }

    pub fn is_containers(&self) -> bool {
        matches!(self, HdField::Container(_) | HdField::Containers(_) | HdField::Region { .. })
    }
}

impl From<HdValue> for HdField {
    fn from(value: HdValue) -> Self {
        HdField::Value(value)
    }
}

impl From<HdContainerId> for HdField {
    fn from(id: HdContainerId) -> Self {
        HdField::Container(id)
    }
}

impl From<Vec<HdContainerId>> for HdField {
    fn from(ids: Vec<HdContainerId>) -> Self {
        HdField::Containers(ids)
    }
}

impl From<HdChunkPlan> for HdField {
    fn from(plan: HdChunkPlan) -> Self {
        HdField::Chunked(plan)
    }
}

/// Bookkeeping held for every container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HdContainerMeta {
    pub name: String,
    pub object_id: String,
    pub data_type: String,
    pub namespace: Option<String>,
    pub parent: Option<HdContainerId>,
    pub children: Vec<HdContainerId>,
    pub container_source: Option<String>,
    pub modified: bool,
}

type HdPayload = Box<dyn Any + Send + Sync>;

enum HdSlot {
    Reserved(HdContainerMeta),
    Filled(HdContainerMeta, HdPayload),
}

impl HdSlot {
    fn meta(&self) -> &HdContainerMeta {
        match self {
            HdSlot::Reserved(meta) | HdSlot::Filled(meta, _) => meta,
        }
    }

    fn meta_mut(&mut self) -> &mut HdContainerMeta {
        match self {
            HdSlot::Reserved(meta) | HdSlot::Filled(meta, _) => meta,
        }
    }
}

/// Owner of every container of an object graph.
#[derive(Default)]
pub struct HdContainerArena {
    slots: Vec<HdSlot>,
}

impl HdContainerArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_meta(data_type: &str, name: &str) -> HdContainerMeta {
        HdContainerMeta {
            name: name.to_string(),
            object_id: uuid::Uuid::new_v4().to_string(),
            data_type: data_type.to_string(),
            namespace: None,
            parent: None,
            children: Vec::new(),
            container_source: None,
            modified: true,
        }
    }

    /// Adds a container of type `data_type` holding `value`.
    pub fn insert<T: Any + Send + Sync>(&mut self, data_type: &str, name: &str, value: T) -> HdContainerId {
        self.slots.push(HdSlot::Filled(Self::new_meta(data_type, name), Box::new(value)));
        HdContainerId(self.slots.len() - 1)
    }

    /// Reserves a slot whose payload is filled later, so children can find
    /// their parent while it is still being constructed.
    pub(crate) fn reserve(&mut self, data_type: &str, name: &str, object_id: Option<&str>) -> HdContainerId {
        let mut meta = Self::new_meta(data_type, name);
        if let Some(object_id) = object_id {
            meta.object_id = object_id.to_string();
        }
        self.slots.push(HdSlot::Reserved(meta));
        HdContainerId(self.slots.len() - 1)
    }

    pub(crate) fn fill(&mut self, id: HdContainerId, payload: HdPayload) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id.0)
            .ok_or_else(|| HdError::lookup(format!("{id} does not exist")))?;
        match slot {
            HdSlot::Reserved(meta) => {
                let meta = meta.clone();
                *slot = HdSlot::Filled(meta, payload);
                Ok(())
            }
            HdSlot::Filled(..) => Err(HdError::internal(format!("{id} is already filled"))),
        }
    }

    fn slot(&self, id: HdContainerId) -> Result<&HdSlot> {
        self.slots
            .get(id.0)
            .ok_or_else(|| HdError::lookup(format!("{id} does not exist")))
    }

    fn slot_mut(&mut self, id: HdContainerId) -> Result<&mut HdSlot> {
        self.slots
            .get_mut(id.0)
            .ok_or_else(|| HdError::lookup(format!("{id} does not exist")))
    }

    pub fn meta(&self, id: HdContainerId) -> Result<&HdContainerMeta> {
        self.slot(id).map(HdSlot::meta)
    }

    pub fn name(&self, id: HdContainerId) -> Result<&str> {
        Ok(&self.meta(id)?.name)
    }

    pub fn object_id(&self, id: HdContainerId) -> Result<&str> {
        Ok(&self.meta(id)?.object_id)
    }

    pub fn data_type(&self, id: HdContainerId) -> Result<&str> {
        Ok(&self.meta(id)?.data_type)
    }

    pub fn parent(&self, id: HdContainerId) -> Result<Option<HdContainerId>> {
        Ok(self.meta(id)?.parent)
    }

    pub fn children(&self, id: HdContainerId) -> Result<&[HdContainerId]> {
        Ok(&self.meta(id)?.children)
    }

    pub fn container_source(&self, id: HdContainerId) -> Result<Option<&str>> {
        Ok(self.meta(id)?.container_source.as_deref())
    }

    pub fn modified(&self, id: HdContainerId) -> Result<bool> {
        Ok(self.meta(id)?.modified)
    }

    pub fn is_filled(&self, id: HdContainerId) -> bool {
        matches!(self.slots.get(id.0), Some(HdSlot::Filled(..)))
    }

    /// Type-erased payload of a filled slot.
    pub fn payload(&self, id: HdContainerId) -> Result<&(dyn Any + Send + Sync)> {
        match self.slot(id)? {
            HdSlot::Filled(_, payload) => Ok(payload.as_ref()),
            HdSlot::Reserved(_) => Err(HdError::lookup(format!("{id} is still under construction"))),
        }
    }

    pub(crate) fn payload_mut(&mut self, id: HdContainerId) -> Result<&mut (dyn Any + Send + Sync)> {
        match self.slot_mut(id)? {
            HdSlot::Filled(_, payload) => Ok(payload.as_mut()),
            HdSlot::Reserved(_) => Err(HdError::lookup(format!("{id} is still under construction"))),
        }
    }

    pub fn get<T: Any>(&self, id: HdContainerId) -> Result<&T> {
        let data_type = self.data_type(id)?.to_string();
        self.payload(id)?
            .downcast_ref::<T>()
            .ok_or_else(|| HdError::lookup(format!("{id} ({data_type}) is not a {}", std::any::type_name::<T>())))
    }

    pub fn get_mut<T: Any>(&mut self, id: HdContainerId) -> Result<&mut T> {
        let data_type = self.data_type(id)?.to_string();
        let payload = self.payload_mut(id)?;
        payload
            .downcast_mut::<T>()
            .ok_or_else(|| HdError::lookup(format!("{id} ({data_type}) is not a {}", std::any::type_name::<T>())))
    }

    /// Sets the parent of `child` and appends it to the parent's children.
    /// A parent cannot be reassigned once set.
    pub fn set_parent(&mut self, child: HdContainerId, parent: HdContainerId) -> Result<()> {
        self.meta(parent)?;
        match self.meta(child)?.parent {
            Some(existing) if existing == parent => return Ok(()),
            Some(existing) => {
                return Err(HdError::validation(format!(
                    "cannot reassign parent of '{}' from {existing} to {parent}",
                    self.meta(child)?.name
                )))
            }
            None => {}
        }
        if child == parent {
            return Err(HdError::validation(format!("{child} cannot be its own parent")));
        }
        self.slot_mut(child)?.meta_mut().parent = Some(parent);
        self.slot_mut(parent)?.meta_mut().children.push(child);
        Ok(())
    }

    pub fn set_container_source(&mut self, id: HdContainerId, source: &str) -> Result<()> {
        self.slot_mut(id)?.meta_mut().container_source = Some(source.to_string());
        Ok(())
    }

    pub fn set_namespace(&mut self, id: HdContainerId, namespace: &str) -> Result<()> {
        self.slot_mut(id)?.meta_mut().namespace = Some(namespace.to_string());
        Ok(())
    }

    pub fn set_modified(&mut self, id: HdContainerId, modified: bool) -> Result<()> {
        self.slot_mut(id)?.meta_mut().modified = modified;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = HdContainerId> {
        (0..self.slots.len()).map(HdContainerId)
    }

    /// Drops every slot created after `mark` and unhooks survivors from them.
    pub(crate) fn rollback(&mut self, mark: usize) {
        self.slots.truncate(mark);
        for slot in &mut self.slots {
            let meta = slot.meta_mut();
            if meta.parent.is_some_and(|parent| parent.0 >= mark) {
                meta.parent = None;
            }
            meta.children.retain(|child| child.0 < mark);
        }
    }
}

impl fmt::Debug for HdContainerArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter().map(HdSlot::meta)).finish()
    }
}

/// Named field values handed to a container constructor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HdArgs {
    values: IndexMap<String, HdField>,
}

impl HdArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HdField>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&HdField> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn take(&mut self, name: &str) -> Option<HdField> {
        self.values.shift_remove(name)
    }

    pub fn value(&self, name: &str) -> Option<&HdValue> {
        self.get(name).and_then(HdField::as_value)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(HdValue::as_text)
    }

    pub fn required_value(&self, name: &str) -> anyhow::Result<&HdValue> {
        self.value(name)
            .ok_or_else(|| anyhow::anyhow!("missing value for argument '{name}'"))
    }

    pub fn container(&self, name: &str) -> Option<HdContainerId> {
        self.get(name).and_then(HdField::as_container)
    }

    pub fn containers(&self, name: &str) -> Vec<HdContainerId> {
        self.get(name).map(HdField::containers).unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_fields(self) -> IndexMap<String, HdField> {
        self.values
    }
}

/// One constructor argument of a container class.
#[derive(Clone, Debug, PartialEq)]
pub struct HdArgSpec {
    pub name: String,
    pub required: bool,
    pub default: Option<HdField>,
}

pub type HdConstructorFn = Arc<dyn Fn(&mut HdArgs) -> anyhow::Result<Box<dyn Any + Send + Sync>> + Send + Sync>;
pub type HdGetterFn = Arc<dyn Fn(&dyn Any) -> Option<HdField> + Send + Sync>;
pub type HdSetterFn = Arc<dyn Fn(&mut dyn Any, HdField) -> anyhow::Result<()> + Send + Sync>;

/// Closure table describing one container payload type.
#[derive(Clone)]
pub struct HdContainerClass {
    data_type: String,
    type_id: TypeId,
    type_name: &'static str,
    args: Vec<HdArgSpec>,
    constructor: HdConstructorFn,
    getters: IndexMap<String, HdGetterFn>,
    setters: IndexMap<String, HdSetterFn>,
    generated: bool,
}

impl HdContainerClass {
    /// Starts a class table for payload type `T` mapped to `data_type`.
    pub fn typed<T: Any + Send + Sync>(data_type: &str) -> HdContainerClassBuilder<T> {
        HdContainerClassBuilder {
            data_type: data_type.to_string(),
            args: Vec::new(),
            constructor: None,
            getters: IndexMap::new(),
            setters: IndexMap::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Class whose payload is an [`HdDynamicContainer`] with one field per
    /// argument.
    pub fn dynamic(data_type: &str, args: Vec<HdArgSpec>) -> Self {
        let mut getters: IndexMap<String, HdGetterFn> = IndexMap::new();
        let mut setters: IndexMap<String, HdSetterFn> = IndexMap::new();
        for arg in &args {
            let name = arg.name.clone();
            getters.insert(
                arg.name.clone(),
                Arc::new(move |payload: &dyn Any| {
                    payload
                        .downcast_ref::<HdDynamicContainer>()
                        .and_then(|container| container.fields.get(&name).cloned())
                }),
            );
            let name = arg.name.clone();
            setters.insert(
                arg.name.clone(),
                Arc::new(move |payload: &mut dyn Any, value: HdField| {
                    let container = payload
                        .downcast_mut::<HdDynamicContainer>()
                        .ok_or_else(|| anyhow::anyhow!("payload is not a dynamic container"))?;
                    container.fields.insert(name.clone(), value);
                    Ok(())
                }),
            );
        }
        let owner = data_type.to_string();
        let constructor: HdConstructorFn = Arc::new(move |args: &mut HdArgs| {
            let fields = std::mem::take(args).into_fields();
            Ok(Box::new(HdDynamicContainer {
                data_type: owner.clone(),
                fields,
            }) as Box<dyn Any + Send + Sync>)
        });
        Self {
            data_type: data_type.to_string(),
            type_id: TypeId::of::<HdDynamicContainer>(),
            type_name: std::any::type_name::<HdDynamicContainer>(),
            args,
            constructor,
            getters,
            setters,
            generated: true,
        }
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn args(&self) -> &[HdArgSpec] {
        &self.args
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.args.iter().any(|arg| arg.name == name)
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// True when `payload` is an instance of this class's payload type.
    pub fn accepts(&self, payload: &dyn Any) -> bool {
        payload.type_id() == self.type_id
    }

    pub fn construct(&self, args: &mut HdArgs) -> anyhow::Result<Box<dyn Any + Send + Sync>> {
        (self.constructor)(args)
    }

    /// Reads field `name`. `None` when the class has no getter for it.
    pub fn get(&self, name: &str, payload: &dyn Any) -> Option<Option<HdField>> {
        self.getters.get(name).map(|getter| getter(payload))
    }

    pub fn has_setter(&self, name: &str) -> bool {
        self.setters.contains_key(name)
    }

    pub fn set(&self, name: &str, payload: &mut dyn Any, value: HdField) -> anyhow::Result<()> {
        match self.setters.get(name) {
            Some(setter) => setter(payload, value),
            None => Err(anyhow::anyhow!("{} has no setter for '{name}'", self.data_type)),
        }
    }
}

impl fmt::Debug for HdContainerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdContainerClass")
            .field("data_type", &self.data_type)
            .field("type_name", &self.type_name)
            .field("args", &self.args)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("setters", &self.setters.keys().collect::<Vec<_>>())
            .field("generated", &self.generated)
            .finish()
    }
}

/// Builder for a typed [`HdContainerClass`].
pub struct HdContainerClassBuilder<T> {
    data_type: String,
    args: Vec<HdArgSpec>,
    constructor: Option<HdConstructorFn>,
    getters: IndexMap<String, HdGetterFn>,
    setters: IndexMap<String, HdSetterFn>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> HdContainerClassBuilder<T> {
    pub fn arg(mut self, name: &str, required: bool) -> Self {
        self.args.push(HdArgSpec {
            name: name.to_string(),
            required,
            default: None,
        });
        self
    }

    /// Optional argument filled with `default` when no value is mapped.
    pub fn optional_arg(mut self, name: &str, default: Option<HdField>) -> Self {
        self.args.push(HdArgSpec {
            name: name.to_string(),
            required: false,
            default,
        });
        self
    }

    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&mut HdArgs) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(move |args: &mut HdArgs| {
            constructor(args).map(|value| Box::new(value) as Box<dyn Any + Send + Sync>)
        }));
        self
    }

    pub fn getter<F>(mut self, name: &str, getter: F) -> Self
    where
        F: Fn(&T) -> Option<HdField> + Send + Sync + 'static,
    {
        self.getters.insert(
            name.to_string(),
            Arc::new(move |payload: &dyn Any| payload.downcast_ref::<T>().and_then(&getter)),
        );
        self
    }

    pub fn setter<F>(mut self, name: &str, setter: F) -> Self
    where
        F: Fn(&mut T, HdField) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.setters.insert(
            name.to_string(),
            Arc::new(move |payload: &mut dyn Any, value: HdField| {
                let target = payload
                    .downcast_mut::<T>()
                    .ok_or_else(|| anyhow::anyhow!("payload is not a {}", std::any::type_name::<T>()))?;
                setter(target, value)
            }),
        );
        self
    }

    pub fn build(self) -> Result<HdContainerClass> {
        let constructor = self.constructor.ok_or_else(|| {
            HdError::validation(format!("container class for '{}' has no constructor", self.data_type))
        })?;
        Ok(HdContainerClass {
            data_type: self.data_type,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            args: self.args,
            constructor,
            getters: self.getters,
            setters: self.setters,
            generated: false,
        })
    }
}

/// Payload of generated container classes.
#[derive(Clone, Debug, PartialEq)]
pub struct HdDynamicContainer {
    pub data_type: String,
    pub fields: IndexMap<String, HdField>,
}

impl HdDynamicContainer {
    pub fn new(data_type: &str) -> Self {
        Self {
            data_type: data_type.to_string(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<HdField>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&HdField> {
        self.fields.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Foo {
        attr1: String,
    }

    #[test]
    fn typed_class_round_trips_fields() {
        let class = HdContainerClass::typed::<Foo>("Foo")
            .arg("attr1", true)
            .constructor(|args| {
                Ok(Foo {
                    attr1: args.text("attr1").unwrap_or_default().to_string(),
                })
            })
            .getter("attr1", |foo: &Foo| Some(HdValue::from(foo.attr1.as_str()).into()))
            .build()
            .unwrap();
        let mut args = HdArgs::new();
        args.insert("attr1", HdValue::from("old"));
        let payload = class.construct(&mut args).unwrap();
        assert!(class.accepts(payload.as_ref()));
        assert_eq!(
            class.get("attr1", payload.as_ref()),
            Some(Some(HdField::Value(HdValue::from("old"))))
        );
        assert_eq!(class.get("missing", payload.as_ref()), None);
    }

    #[test]
    fn parent_cannot_be_reassigned() {
        let mut arena = HdContainerArena::new();
        let a = arena.insert("Foo", "a", ());
        let b = arena.insert("Foo", "b", ());
        let c = arena.insert("Foo", "c", ());
        arena.set_parent(c, a).unwrap();
        assert!(arena.set_parent(c, b).is_err());
        assert_eq!(arena.children(a).unwrap(), &[c]);
    }
}
