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

//! # Hdx Storage Spec Module
//!
//! Group, dataset and link specifications.
//!
//! Children of a group are keyed by their `name`, or by `<Type>` when the
//! child is an unnamed instance of a data type. Two children sharing a key
//! are rejected when the group is constructed.
//!
//! ## Example
//!
//! ```rust
//! use hdx::spec::{HdAttributeSpec, HdGroupSpec};
//!
//! let spec = HdGroupSpec::builder("an example group")
//!     .data_type_def("EphysData")
//!     .attribute(HdAttributeSpec::builder("attribute1", "an attribute").dtype("text").build()?)
//!     .build()?;
//! assert_eq!(spec.data_type(), Some("EphysData"));
//! # Ok::<(), hdx::HdError>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{HdError, Result};
use crate::spec::attribute::{HdAttributeSpec, HdSpecDtype};
use crate::spec::dtype::{check_shape_dims, HdDimsSpec, HdShapeSpec};
use crate::spec::quantity::HdQuantity;
use crate::value::HdValue;

/// Category of a child spec inside a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdChildKind {
    Attribute,
    Dataset,
    Group,
    Link,
}

/// Key identifying a child within its parent: the name, or `<Type>`.
pub fn child_key(name: Option<&str>, data_type: Option<&str>) -> String {
    match (name, data_type) {
        (Some(name), _) => name.to_string(),
        (None, Some(data_type)) => format!("<{data_type}>"),
        (None, None) => String::new(),
    }
}

/// Bookkeeping left behind by resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HdResolution {
    pub(crate) resolved: bool,
    pub(crate) inherited: BTreeSet<(HdChildKind, String)>,
    pub(crate) overridden: BTreeSet<(HdChildKind, String)>,
    pub(crate) inherited_fields: BTreeSet<String>,
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_exactly_one(quantity: &HdQuantity) -> bool {
    *quantity == HdQuantity::ExactlyOne
}

fn check_storage(
    kind: &str,
    name: Option<&str>,
    default_name: Option<&str>,
    data_type_def: Option<&str>,
    data_type_inc: Option<&str>,
    quantity: HdQuantity,
) -> Result<()> {
    if name.is_none() && data_type_def.is_none() && data_type_inc.is_none() {
        return Err(HdError::schema(format!(
            "Cannot create {kind} spec with no name without specifying 'data_type_def' and/or 'data_type_inc'."
        )));
    }
    if let Some(name) = name {
        if quantity.is_many() {
            return Err(HdError::schema(format!(
                "'{name}': Cannot give specific name to something that can exist multiple times: quantity '{quantity}'"
            )));
        }
        if default_name.is_some() {
            return Err(HdError::schema(format!(
                "'{name}': cannot specify 'name' and 'default_name'"
            )));
        }
    }
    if let (Some(def), Some(inc)) = (data_type_def, data_type_inc) {
        if def == inc {
            return Err(HdError::schema(format!(
                "'{def}': data_type_def and data_type_inc cannot name the same type"
            )));
        }
    }
    Ok(())
}

fn collect_attributes(owner: &str, specs: Vec<HdAttributeSpec>) -> Result<IndexMap<String, HdAttributeSpec>> {
    let mut attributes = IndexMap::with_capacity(specs.len());
    for spec in specs {
        let key = spec.name().to_string();
        if attributes.contains_key(&key) {
            return Err(duplicate_child(owner, &key));
        }
        attributes.insert(key, spec);
    }
    Ok(attributes)
}

fn duplicate_child(owner: &str, key: &str) -> HdError {
    HdError::schema(format!("'{key}' - cannot overwrite existing specification in '{owner}'"))
}

fn log_unknown_keys(kind: &str, owner: &str, extra: &BTreeMap<String, serde_yaml::Value>) {
    if !extra.is_empty() {
        let keys: Vec<&str> = extra.keys().map(String::as_str).collect();
        log::debug!("ignoring unknown keys {keys:?} on {kind} spec '{owner}'");
    }
}

macro_rules! storage_accessors {
    () => {
        pub fn name(&self) -> Option<&str> {
            self.name.as_deref()
        }

        pub fn doc(&self) -> &str {
            &self.doc
        }

        pub fn default_name(&self) -> Option<&str> {
            self.default_name.as_deref()
        }

        pub fn data_type_def(&self) -> Option<&str> {
            self.data_type_def.as_deref()
        }

        pub fn data_type_inc(&self) -> Option<&str> {
            self.data_type_inc.as_deref()
        }

        /// The defined type, else the included type.
        pub fn data_type(&self) -> Option<&str> {
            self.data_type_def().or(self.data_type_inc())
        }

        pub fn quantity(&self) -> HdQuantity {
            self.quantity
        }

        pub fn required(&self) -> bool {
            self.quantity.is_required()
        }

        pub fn is_many(&self) -> bool {
            self.quantity.is_many()
        }

        pub fn linkable(&self) -> bool {
            self.linkable
        }

        pub fn attributes(&self) -> impl Iterator<Item = &HdAttributeSpec> {
            self.attributes.values()
        }

        pub fn get_attribute(&self, name: &str) -> Option<&HdAttributeSpec> {
            self.attributes.get(name)
        }

        /// Key of this spec inside its parent group.
        pub fn key(&self) -> String {
            child_key(self.name(), self.data_type())
        }

        pub fn resolved(&self) -> bool {
            self.resolution.resolved
        }

        /// True when the child was copied unchanged from an ancestor.
        pub fn is_inherited_spec(&self, kind: HdChildKind, key: &str) -> bool {
            self.resolution.inherited.contains(&(kind, key.to_string()))
        }

        /// True when the child replaces a child of the same key in an ancestor.
        pub fn is_overridden_spec(&self, kind: HdChildKind, key: &str) -> bool {
            self.resolution.overridden.contains(&(kind, key.to_string()))
        }

        /// True when a scalar field such as `dtype` came from an ancestor.
        pub fn is_inherited_field(&self, field: &str) -> bool {
            self.resolution.inherited_fields.contains(field)
        }
    };
}

#[derive(Clone, Serialize, Deserialize)]
struct RawDatasetSpec {
    doc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_type_def: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_type_inc: Option<String>,
    #[serde(default, skip_serializing_if = "is_exactly_one")]
    quantity: HdQuantity,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    linkable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dtype: Option<HdSpecDtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shape: Option<HdShapeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dims: Option<HdDimsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<HdValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_value: Option<HdValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<HdAttributeSpec>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Specification of a dataset, typed or untyped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDatasetSpec", into = "RawDatasetSpec")]
pub struct HdDatasetSpec {
    pub(crate) name: Option<String>,
    pub(crate) doc: String,
    pub(crate) default_name: Option<String>,
    pub(crate) data_type_def: Option<String>,
    pub(crate) data_type_inc: Option<String>,
    pub(crate) quantity: HdQuantity,
    pub(crate) linkable: bool,
    pub(crate) attributes: IndexMap<String, HdAttributeSpec>,
    pub(crate) dtype: Option<HdSpecDtype>,
    pub(crate) shape: Option<HdShapeSpec>,
    pub(crate) dims: Option<HdDimsSpec>,
    pub(crate) value: Option<HdValue>,
    pub(crate) default_value: Option<HdValue>,
    pub(crate) resolution: HdResolution,
}

impl TryFrom<RawDatasetSpec> for HdDatasetSpec {
    type Error = HdError;

    fn try_from(raw: RawDatasetSpec) -> Result<Self> {
        check_storage(
            "Dataset",
            raw.name.as_deref(),
            raw.default_name.as_deref(),
            raw.data_type_def.as_deref(),
            raw.data_type_inc.as_deref(),
            raw.quantity,
        )?;
        let owner = child_key(
            raw.name.as_deref(),
            raw.data_type_def.as_deref().or(raw.data_type_inc.as_deref()),
        );
        if raw.value.is_some() && raw.default_value.is_some() {
            return Err(HdError::schema(format!(
                "dataset '{owner}' cannot specify 'value' and 'default_value'"
            )));
        }
        check_shape_dims(raw.shape.as_ref(), raw.dims.as_ref())?;
        log_unknown_keys("dataset", &owner, &raw.extra);
        let shape = match (raw.shape, raw.dims.as_ref()) {
            (None, Some(dims)) => Some(HdShapeSpec::unconstrained_for(dims)),
            (shape, _) => shape,
        };
        Ok(Self {
            attributes: collect_attributes(&owner, raw.attributes)?,
            name: raw.name,
            doc: raw.doc,
            default_name: raw.default_name,
            data_type_def: raw.data_type_def,
            data_type_inc: raw.data_type_inc,
            quantity: raw.quantity,
            linkable: raw.linkable,
            dtype: raw.dtype,
            shape,
            dims: raw.dims,
            value: raw.value,
            default_value: raw.default_value,
            resolution: HdResolution::default(),
        })
    }
}

impl From<HdDatasetSpec> for RawDatasetSpec {
    fn from(spec: HdDatasetSpec) -> Self {
        Self {
            doc: spec.doc,
            name: spec.name,
            default_name: spec.default_name,
            data_type_def: spec.data_type_def,
            data_type_inc: spec.data_type_inc,
            quantity: spec.quantity,
            linkable: spec.linkable,
            dtype: spec.dtype,
            shape: spec.shape,
            dims: spec.dims,
            value: spec.value,
            default_value: spec.default_value,
            attributes: spec.attributes.into_values().collect(),
            extra: BTreeMap::new(),
        }
    }
}

impl HdDatasetSpec {
    storage_accessors!();

    pub fn builder(doc: impl Into<String>) -> HdDatasetSpecBuilder {
        HdDatasetSpecBuilder {
            raw: RawDatasetSpec {
                doc: doc.into(),
                name: None,
                default_name: None,
                data_type_def: None,
                data_type_inc: None,
                quantity: HdQuantity::ExactlyOne,
                linkable: true,
                dtype: None,
                shape: None,
                dims: None,
                value: None,
                default_value: None,
                attributes: Vec::new(),
                extra: BTreeMap::new(),
            },
            error: None,
        }
    }

    pub fn dtype(&self) -> Option<&HdSpecDtype> {
        self.dtype.as_ref()
    }

    pub fn shape(&self) -> Option<&HdShapeSpec> {
        self.shape.as_ref()
    }

    pub fn dims(&self) -> Option<&HdDimsSpec> {
        self.dims.as_ref()
    }

    pub fn value(&self) -> Option<&HdValue> {
        self.value.as_ref()
    }

    pub fn default_value(&self) -> Option<&HdValue> {
        self.default_value.as_ref()
    }

    pub(crate) fn inherit_shape_from(&mut self, ancestor: &HdDatasetSpec) {
        if self.shape.is_none() && self.dims.is_none() {
            self.shape = ancestor.shape.clone();
            self.dims = ancestor.dims.clone();
        }
    }
}

/// Builder for [`HdDatasetSpec`].
#[derive(Clone)]
pub struct HdDatasetSpecBuilder {
    raw: RawDatasetSpec,
    error: Option<HdError>,
}

impl HdDatasetSpecBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.raw.name = Some(name.into());
        self
    }

    pub fn default_name(mut self, name: impl Into<String>) -> Self {
        self.raw.default_name = Some(name.into());
        self
    }

    pub fn data_type_def(mut self, data_type: impl Into<String>) -> Self {
        self.raw.data_type_def = Some(data_type.into());
        self
    }

    pub fn data_type_inc(mut self, data_type: impl Into<String>) -> Self {
        self.raw.data_type_inc = Some(data_type.into());
        self
    }

    pub fn quantity(mut self, quantity: HdQuantity) -> Self {
        self.raw.quantity = quantity;
        self
    }

    pub fn linkable(mut self, linkable: bool) -> Self {
        self.raw.linkable = linkable;
        self
    }

    pub fn dtype(mut self, dtype: &str) -> Self {
        match HdSpecDtype::parse(dtype) {
            Ok(parsed) => self.raw.dtype = Some(parsed),
            Err(err) => self.error = Some(err),
        }
        self
    }

    pub fn spec_dtype(mut self, dtype: HdSpecDtype) -> Self {
        self.raw.dtype = Some(dtype);
        self
    }

    pub fn shape(mut self, shape: HdShapeSpec) -> Self {
        self.raw.shape = Some(shape);
        self
    }

    pub fn dims(mut self, dims: HdDimsSpec) -> Self {
        self.raw.dims = Some(dims);
        self
    }

    pub fn value(mut self, value: impl Into<HdValue>) -> Self {
        self.raw.value = Some(value.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<HdValue>) -> Self {
        self.raw.default_value = Some(value.into());
        self
    }

    pub fn attribute(mut self, spec: HdAttributeSpec) -> Self {
        self.raw.attributes.push(spec);
        self
    }

    pub fn build(self) -> Result<HdDatasetSpec> {
        if let Some(err) = self.error {
            return Err(err);
        }
        HdDatasetSpec::try_from(self.raw)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct RawGroupSpec {
    doc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_type_def: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_type_inc: Option<String>,
    #[serde(default, skip_serializing_if = "is_exactly_one")]
    quantity: HdQuantity,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    linkable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<HdAttributeSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    datasets: Vec<HdDatasetSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    groups: Vec<HdGroupSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    links: Vec<HdLinkSpec>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Specification of a group, typed or untyped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGroupSpec", into = "RawGroupSpec")]
pub struct HdGroupSpec {
    pub(crate) name: Option<String>,
    pub(crate) doc: String,
    pub(crate) default_name: Option<String>,
    pub(crate) data_type_def: Option<String>,
    pub(crate) data_type_inc: Option<String>,
    pub(crate) quantity: HdQuantity,
    pub(crate) linkable: bool,
    pub(crate) attributes: IndexMap<String, HdAttributeSpec>,
    pub(crate) datasets: IndexMap<String, HdDatasetSpec>,
    pub(crate) groups: IndexMap<String, HdGroupSpec>,
    pub(crate) links: IndexMap<String, HdLinkSpec>,
    pub(crate) resolution: HdResolution,
}

impl TryFrom<RawGroupSpec> for HdGroupSpec {
    type Error = HdError;

    fn try_from(raw: RawGroupSpec) -> Result<Self> {
        check_storage(
            "Group",
            raw.name.as_deref(),
            raw.default_name.as_deref(),
            raw.data_type_def.as_deref(),
            raw.data_type_inc.as_deref(),
            raw.quantity,
        )?;
        let owner = child_key(
            raw.name.as_deref(),
            raw.data_type_def.as_deref().or(raw.data_type_inc.as_deref()),
        );
        log_unknown_keys("group", &owner, &raw.extra);

        // Datasets, groups and links share one key space within a group.
        let mut taken = BTreeSet::new();
        let mut claim = |key: String| -> Result<String> {
            if taken.insert(key.clone()) {
                Ok(key)
            } else {
                Err(duplicate_child(&owner, &key))
            }
        };
        let mut datasets = IndexMap::with_capacity(raw.datasets.len());
        for spec in raw.datasets {
            datasets.insert(claim(spec.key())?, spec);
        }
        let mut groups = IndexMap::with_capacity(raw.groups.len());
        for spec in raw.groups {
            groups.insert(claim(spec.key())?, spec);
        }
        let mut links = IndexMap::with_capacity(raw.links.len());
        for spec in raw.links {
            links.insert(claim(spec.key())?, spec);
        }

        Ok(Self {
            attributes: collect_attributes(&owner, raw.attributes)?,
            name: raw.name,
            doc: raw.doc,
            default_name: raw.default_name,
            data_type_def: raw.data_type_def,
            data_type_inc: raw.data_type_inc,
            quantity: raw.quantity,
            linkable: raw.linkable,
            datasets,
            groups,
            links,
            resolution: HdResolution::default(),
        })
    }
}

impl From<HdGroupSpec> for RawGroupSpec {
    fn from(spec: HdGroupSpec) -> Self {
        Self {
            doc: spec.doc,
            name: spec.name,
            default_name: spec.default_name,
            data_type_def: spec.data_type_def,
            data_type_inc: spec.data_type_inc,
            quantity: spec.quantity,
            linkable: spec.linkable,
            attributes: spec.attributes.into_values().collect(),
            datasets: spec.datasets.into_values().collect(),
            groups: spec.groups.into_values().collect(),
            links: spec.links.into_values().collect(),
            extra: BTreeMap::new(),
        }
    }
}

impl HdGroupSpec {
    storage_accessors!();

    pub fn builder(doc: impl Into<String>) -> HdGroupSpecBuilder {
        HdGroupSpecBuilder {
            raw: RawGroupSpec {
                doc: doc.into(),
                name: None,
                default_name: None,
                data_type_def: None,
                data_type_inc: None,
                quantity: HdQuantity::ExactlyOne,
                linkable: true,
                attributes: Vec::new(),
                datasets: Vec::new(),
                groups: Vec::new(),
                links: Vec::new(),
                extra: BTreeMap::new(),
            },
        }
    }

    pub fn datasets(&self) -> impl Iterator<Item = &HdDatasetSpec> {
        self.datasets.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &HdGroupSpec> {
        self.groups.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &HdLinkSpec> {
        self.links.values()
    }

    pub fn get_dataset(&self, name: &str) -> Option<&HdDatasetSpec> {
        self.datasets.get(name)
    }

    pub fn get_group(&self, name: &str) -> Option<&HdGroupSpec> {
        self.groups.get(name)
    }

    pub fn get_link(&self, name: &str) -> Option<&HdLinkSpec> {
        self.links.get(name)
    }

    /// The unnamed child spec holding instances of `data_type`.
    pub fn get_data_type(&self, data_type: &str) -> Option<HdSpecRef<'_>> {
        let key = child_key(None, Some(data_type));
        if let Some(spec) = self.datasets.get(&key) {
            return Some(HdSpecRef::Dataset(spec));
        }
        if let Some(spec) = self.groups.get(&key) {
            return Some(HdSpecRef::Group(spec));
        }
        self.links.get(&key).map(HdSpecRef::Link)
    }

    /// Nested specs carrying a `data_type_def`, depth first.
    pub fn nested_type_defs(&self) -> Vec<HdSpec> {
        let mut found = Vec::new();
        for dataset in self.datasets.values() {
            if dataset.data_type_def.is_some() {
                found.push(HdSpec::Dataset(dataset.clone()));
            }
        }
        for group in self.groups.values() {
            if group.data_type_def.is_some() {
                found.push(HdSpec::Group(group.clone()));
            }
            found.extend(group.nested_type_defs());
        }
        found
    }
}

/// Builder for [`HdGroupSpec`].
#[derive(Clone)]
pub struct HdGroupSpecBuilder {
    raw: RawGroupSpec,
}

impl HdGroupSpecBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.raw.name = Some(name.into());
        self
    }

    pub fn default_name(mut self, name: impl Into<String>) -> Self {
        self.raw.default_name = Some(name.into());
        self
    }

    pub fn data_type_def(mut self, data_type: impl Into<String>) -> Self {
        self.raw.data_type_def = Some(data_type.into());
        self
    }

    pub fn data_type_inc(mut self, data_type: impl Into<String>) -> Self {
        self.raw.data_type_inc = Some(data_type.into());
        self
    }

    pub fn quantity(mut self, quantity: HdQuantity) -> Self {
        self.raw.quantity = quantity;
        self
    }

    pub fn linkable(mut self, linkable: bool) -> Self {
        self.raw.linkable = linkable;
        self
    }

    pub fn attribute(mut self, spec: HdAttributeSpec) -> Self {
        self.raw.attributes.push(spec);
        self
    }

    pub fn dataset(mut self, spec: HdDatasetSpec) -> Self {
        self.raw.datasets.push(spec);
        self
    }

    pub fn group(mut self, spec: HdGroupSpec) -> Self {
        self.raw.groups.push(spec);
        self
    }

    pub fn link(mut self, spec: HdLinkSpec) -> Self {
        self.raw.links.push(spec);
        self
    }

    pub fn build(self) -> Result<HdGroupSpec> {
        HdGroupSpec::try_from(self.raw)
    }
}

/// Specification of a link to a typed container elsewhere in the hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HdLinkSpec {
    doc: String,
    target_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "is_exactly_one")]
    quantity: HdQuantity,
}

impl HdLinkSpec {
    pub fn new(doc: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            doc: doc.into(),
            target_type: target_type.into(),
            name: None,
            quantity: HdQuantity::ExactlyOne,
        }
    }

    /// Link targeting the type a spec defines. Specs that only include a
    /// type cannot be link targets.
    pub fn targeting(doc: impl Into<String>, target: &HdSpec) -> Result<Self> {
        match target.data_type_def() {
            Some(def) => Ok(Self::new(doc, def)),
            None => Err(HdError::schema(format!(
                "link target_type must be a type name or a spec with 'data_type_def', got '{}'",
                target.key()
            ))),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_quantity(mut self, quantity: HdQuantity) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn quantity(&self) -> HdQuantity {
        self.quantity
    }

    pub fn required(&self) -> bool {
        self.quantity.is_required()
    }

    pub fn is_many(&self) -> bool {
        self.quantity.is_many()
    }

    pub fn key(&self) -> String {
        child_key(self.name(), Some(&self.target_type))
    }
}

/// A registered top-level spec.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HdSpec {
    Group(HdGroupSpec),
    Dataset(HdDatasetSpec),
}

/// Borrowed view of any spec kind.
#[derive(Clone, Copy, Debug)]
pub enum HdSpecRef<'a> {
    Attribute(&'a HdAttributeSpec),
    Dataset(&'a HdDatasetSpec),
    Group(&'a HdGroupSpec),
    Link(&'a HdLinkSpec),
}

impl<'a> HdSpecRef<'a> {
    pub fn name(&self) -> Option<&'a str> {
        match self {
            HdSpecRef::Attribute(spec) => Some(spec.name()),
            HdSpecRef::Dataset(spec) => spec.name(),
            HdSpecRef::Group(spec) => spec.name(),
            HdSpecRef::Link(spec) => spec.name(),
        }
    }

    /// Type instantiated by this child; for links, the target type.
    pub fn data_type(&self) -> Option<&'a str> {
        match self {
            HdSpecRef::Attribute(_) => None,
            HdSpecRef::Dataset(spec) => spec.data_type(),
            HdSpecRef::Group(spec) => spec.data_type(),
            HdSpecRef::Link(spec) => Some(spec.target_type()),
        }
    }

    pub fn kind(&self) -> HdChildKind {
        match self {
            HdSpecRef::Attribute(_) => HdChildKind::Attribute,
            HdSpecRef::Dataset(_) => HdChildKind::Dataset,
            HdSpecRef::Group(_) => HdChildKind::Group,
            HdSpecRef::Link(_) => HdChildKind::Link,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            HdSpecRef::Attribute(spec) => spec.required(),
            HdSpecRef::Dataset(spec) => spec.required(),
            HdSpecRef::Group(spec) => spec.required(),
            HdSpecRef::Link(spec) => spec.required(),
        }
    }

    pub fn is_many(&self) -> bool {
        match self {
            HdSpecRef::Attribute(_) => false,
            HdSpecRef::Dataset(spec) => spec.is_many(),
            HdSpecRef::Group(spec) => spec.is_many(),
            HdSpecRef::Link(spec) => spec.is_many(),
        }
    }
}

impl HdSpec {
    pub fn name(&self) -> Option<&str> {
        match self {
            HdSpec::Group(spec) => spec.name(),
            HdSpec::Dataset(spec) => spec.name(),
        }
    }

    pub fn doc(&self) -> &str {
        match self {
            HdSpec::Group(spec) => spec.doc(),
            HdSpec::Dataset(spec) => spec.doc(),
        }
    }

    pub fn data_type_def(&self) -> Option<&str> {
        match self {
            HdSpec::Group(spec) => spec.data_type_def(),
            HdSpec::Dataset(spec) => spec.data_type_def(),
        }
    }

    pub fn data_type_inc(&self) -> Option<&str> {
        match self {
            HdSpec::Group(spec) => spec.data_type_inc(),
            HdSpec::Dataset(spec) => spec.data_type_inc(),
        }
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type_def().or(self.data_type_inc())
    }

    pub fn default_name(&self) -> Option<&str> {
        match self {
            HdSpec::Group(spec) => spec.default_name(),
            HdSpec::Dataset(spec) => spec.default_name(),
        }
    }

    pub fn quantity(&self) -> HdQuantity {
        match self {
            HdSpec::Group(spec) => spec.quantity(),
            HdSpec::Dataset(spec) => spec.quantity(),
        }
    }

    pub fn key(&self) -> String {
        child_key(self.name(), self.data_type())
    }

    pub fn attributes(&self) -> Box<dyn Iterator<Item = &HdAttributeSpec> + '_> {
        match self {
            HdSpec::Group(spec) => Box::new(spec.attributes()),
            HdSpec::Dataset(spec) => Box::new(spec.attributes()),
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<&HdAttributeSpec> {
        match self {
            HdSpec::Group(spec) => spec.get_attribute(name),
            HdSpec::Dataset(spec) => spec.get_attribute(name),
        }
    }

    pub fn as_group(&self) -> Option<&HdGroupSpec> {
        match self {
            HdSpec::Group(spec) => Some(spec),
            HdSpec::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&HdDatasetSpec> {
        match self {
            HdSpec::Dataset(spec) => Some(spec),
            HdSpec::Group(_) => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, HdSpec::Group(_))
    }

    pub fn view(&self) -> HdSpecRef<'_> {
        match self {
            HdSpec::Group(spec) => HdSpecRef::Group(spec),
            HdSpec::Dataset(spec) => HdSpecRef::Dataset(spec),
        }
    }

    pub fn resolved(&self) -> bool {
        match self {
            HdSpec::Group(spec) => spec.resolved(),
            HdSpec::Dataset(spec) => spec.resolved(),
        }
    }

    pub fn is_inherited_spec(&self, kind: HdChildKind, key: &str) -> bool {
        match self {
            HdSpec::Group(spec) => spec.is_inherited_spec(kind, key),
            HdSpec::Dataset(spec) => spec.is_inherited_spec(kind, key),
        }
    }

    pub fn is_overridden_spec(&self, kind: HdChildKind, key: &str) -> bool {
        match self {
            HdSpec::Group(spec) => spec.is_overridden_spec(kind, key),
            HdSpec::Dataset(spec) => spec.is_overridden_spec(kind, key),
        }
    }

    pub fn is_inherited_field(&self, field: &str) -> bool {
        match self {
            HdSpec::Group(spec) => spec.is_inherited_field(field),
            HdSpec::Dataset(spec) => spec.is_inherited_field(field),
        }
    }

    /// Nested specs carrying a `data_type_def`.
    pub fn nested_type_defs(&self) -> Vec<HdSpec> {
        match self {
            HdSpec::Group(spec) => spec.nested_type_defs(),
            HdSpec::Dataset(_) => Vec::new(),
        }
    }

    /// Types this spec depends on: its parent type, the types of nested
    /// children, and link targets.
    pub fn referenced_types(&self) -> BTreeSet<String> {
        let mut types = BTreeSet::new();
        if let Some(inc) = self.data_type_inc() {
            types.insert(inc.to_string());
        }
        if let HdSpec::Group(group) = self {
            collect_referenced(group, &mut types);
        }
        if let Some(def) = self.data_type_def() {
            types.remove(def);
        }
        types
    }
}

fn collect_referenced(group: &HdGroupSpec, types: &mut BTreeSet<String>) {
    for dataset in group.datasets.values() {
        if let Some(data_type) = dataset.data_type() {
            types.insert(data_type.to_string());
        }
        if let Some(inc) = dataset.data_type_inc() {
            types.insert(inc.to_string());
        }
    }
    for child in group.groups.values() {
        if let Some(data_type) = child.data_type() {
            types.insert(data_type.to_string());
        }
        if let Some(inc) = child.data_type_inc() {
            types.insert(inc.to_string());
        }
        collect_referenced(child, types);
    }
    for link in group.links.values() {
        types.insert(link.target_type.clone());
    }
}

impl From<HdGroupSpec> for HdSpec {
    fn from(spec: HdGroupSpec) -> Self {
        HdSpec::Group(spec)
    }
}

impl From<HdDatasetSpec> for HdSpec {
    fn from(spec: HdDatasetSpec) -> Self {
        HdSpec::Dataset(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_untyped_spec_is_rejected() {
        let err = HdGroupSpec::builder("no identity").build().unwrap_err();
        assert!(err.to_string().contains("data_type_def"));
    }

    #[test]
    fn named_repeatable_spec_is_rejected() {
        let err = HdDatasetSpec::builder("data")
            .name("data")
            .quantity(HdQuantity::ZeroOrMany)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("multiple times"));
    }

    #[test]
    fn duplicate_children_are_rejected() {
        let child = HdDatasetSpec::builder("data").data_type_inc("Foo").build().unwrap();
        let err = HdGroupSpec::builder("parent")
            .data_type_def("Parent")
            .dataset(child.clone())
            .dataset(child)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cannot overwrite existing specification"));
    }

    #[test]
    fn link_target_needs_definition() {
        let inc_only = HdSpec::Group(HdGroupSpec::builder("g").data_type_inc("Foo").build().unwrap());
        assert!(HdLinkSpec::targeting("a link", &inc_only).is_err());
        let def = HdSpec::Group(HdGroupSpec::builder("g").data_type_def("Bar").build().unwrap());
        assert_eq!(HdLinkSpec::targeting("a link", &def).unwrap().target_type(), "Bar");
    }

    #[test]
    fn yaml_group_tolerates_unknown_keys() {
        let yaml = r#"
data_type_def: Foo
doc: a group
experimental: true
datasets:
  - name: my_data
    doc: some data
    dtype: int
    dims: [num_values]
links:
  - doc: a link
    target_type: Bar
"#;
        let spec: HdGroupSpec = serde_yaml::from_str(yaml).unwrap();
        let dataset = spec.get_dataset("my_data").unwrap();
        assert_eq!(dataset.shape(), Some(&HdShapeSpec::Single(vec![None])));
        assert_eq!(spec.links().next().unwrap().key(), "<Bar>");
        assert!(HdSpec::Group(spec).referenced_types().contains("Bar"));
    }
}
