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

//! # Hdx Attribute Spec Module
//!
//! Leaf specifications: attributes, reference dtypes, and compound dtype
//! fields. Leaf specs reject unknown keys when read from YAML.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{HdError, Result};
use crate::spec::dtype::{check_shape_dims, HdDimsSpec, HdDtype, HdShapeSpec};
use crate::value::HdValue;

/// Kind of reference stored by a reference-typed attribute or dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdRefType {
    Object,
    Region,
}

impl fmt::Display for HdRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HdRefType::Object => f.write_str("object"),
            HdRefType::Region => f.write_str("region"),
        }
    }
}

/// Reference dtype: points at a container of `target_type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HdRefSpec {
    pub target_type: String,
    pub reftype: HdRefType,
}

impl HdRefSpec {
    pub fn new(target_type: impl Into<String>, reftype: &str) -> Result<Self> {
        let reftype = match reftype {
            "object" => HdRefType::Object,
            "region" => HdRefType::Region,
            other => {
                return Err(HdError::schema(format!(
                    "reftype '{other}' must be 'object' or 'region'"
                )))
            }
        };
        Ok(Self {
            target_type: target_type.into(),
            reftype,
        })
    }

    pub fn is_region(&self) -> bool {
        self.reftype == HdRefType::Region
    }
}

/// One field of a compound dtype.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HdDtypeSpec {
    pub name: String,
    pub doc: String,
    pub dtype: HdSpecDtype,
}

impl HdDtypeSpec {
    pub fn new(name: impl Into<String>, doc: impl Into<String>, dtype: HdSpecDtype) -> Result<Self> {
        if matches!(dtype, HdSpecDtype::Compound(_)) {
            return Err(HdError::schema("compound dtype fields cannot be compound"));
        }
        Ok(Self {
            name: name.into(),
            doc: doc.into(),
            dtype,
        })
    }
}

/// The `dtype` key of a spec.
#[derive(Clone, Debug, PartialEq)]
pub enum HdSpecDtype {
    Primitive(HdDtype),
    Reference(HdRefSpec),
    Compound(Vec<HdDtypeSpec>),
}

impl HdSpecDtype {
    pub fn parse(name: &str) -> Result<Self> {
        HdDtype::parse(name).map(HdSpecDtype::Primitive)
    }

    pub fn compound(fields: Vec<HdDtypeSpec>) -> Result<Self> {
        if fields.is_empty() {
            return Err(HdError::schema("compound dtype must declare at least one field"));
        }
        Ok(HdSpecDtype::Compound(fields))
    }

    pub fn primitive(&self) -> Option<HdDtype> {
        match self {
            HdSpecDtype::Primitive(dtype) => Some(*dtype),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&HdRefSpec> {
        match self {
            HdSpecDtype::Reference(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, HdSpecDtype::Reference(_))
    }

    /// Name stored on builders for this dtype.
    pub fn builder_name(&self) -> String {
        match self {
            HdSpecDtype::Primitive(dtype) => dtype.name().to_string(),
            HdSpecDtype::Reference(spec) => spec.reftype.to_string(),
            HdSpecDtype::Compound(_) => "compound".to_string(),
        }
    }
}

impl From<HdDtype> for HdSpecDtype {
    fn from(value: HdDtype) -> Self {
        HdSpecDtype::Primitive(value)
    }
}

impl From<HdRefSpec> for HdSpecDtype {
    fn from(value: HdRefSpec) -> Self {
        HdSpecDtype::Reference(value)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSpecDtype {
    Name(String),
    Reference(HdRefSpec),
    Compound(Vec<HdDtypeSpec>),
}

impl Serialize for HdSpecDtype {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            HdSpecDtype::Primitive(dtype) => serializer.serialize_str(dtype.name()),
            HdSpecDtype::Reference(spec) => spec.serialize(serializer),
            HdSpecDtype::Compound(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for HdSpecDtype {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let parsed = match RawSpecDtype::deserialize(deserializer)? {
            RawSpecDtype::Name(name) => HdSpecDtype::parse(&name),
            RawSpecDtype::Reference(spec) => Ok(HdSpecDtype::Reference(spec)),
            RawSpecDtype::Compound(fields) => HdSpecDtype::compound(fields),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAttributeSpec {
    name: String,
    doc: String,
    dtype: HdSpecDtype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shape: Option<HdShapeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dims: Option<HdDimsSpec>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<HdValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_value: Option<HdValue>,
}

/// Specification of an attribute on a group or dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAttributeSpec", into = "RawAttributeSpec")]
pub struct HdAttributeSpec {
    name: String,
    doc: String,
    dtype: HdSpecDtype,
    shape: Option<HdShapeSpec>,
    dims: Option<HdDimsSpec>,
    required: bool,
    value: Option<HdValue>,
    default_value: Option<HdValue>,
}

impl TryFrom<RawAttributeSpec> for HdAttributeSpec {
    type Error = HdError;

    fn try_from(raw: RawAttributeSpec) -> Result<Self> {
        if raw.value.is_some() && raw.default_value.is_some() {
            return Err(HdError::schema(format!(
                "attribute '{}' cannot specify 'value' and 'default_value'",
                raw.name
            )));
        }
        check_shape_dims(raw.shape.as_ref(), raw.dims.as_ref())?;
        let shape = match (raw.shape, raw.dims.as_ref()) {
            (None, Some(dims)) => Some(HdShapeSpec::unconstrained_for(dims)),
            (shape, _) => shape,
        };
        Ok(Self {
            name: raw.name,
            doc: raw.doc,
            dtype: raw.dtype,
            shape,
            dims: raw.dims,
            required: raw.required,
            value: raw.value,
            default_value: raw.default_value,
        })
    }
}

impl From<HdAttributeSpec> for RawAttributeSpec {
    fn from(spec: HdAttributeSpec) -> Self {
        Self {
            name: spec.name,
            doc: spec.doc,
            dtype: spec.dtype,
            shape: spec.shape,
            dims: spec.dims,
            required: spec.required,
            value: spec.value,
            default_value: spec.default_value,
        }
    }
}

impl HdAttributeSpec {
    pub fn builder(name: impl Into<String>, doc: impl Into<String>) -> HdAttributeSpecBuilder {
        HdAttributeSpecBuilder {
            raw: RawAttributeSpec {
                name: name.into(),
                doc: doc.into(),
                dtype: HdSpecDtype::Primitive(HdDtype::Text),
                shape: None,
                dims: None,
                required: true,
                value: None,
                default_value: None,
            },
            dtype_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn dtype(&self) -> &HdSpecDtype {
        &self.dtype
    }

    pub fn shape(&self) -> Option<&HdShapeSpec> {
        self.shape.as_ref()
    }

    pub fn dims(&self) -> Option<&HdDimsSpec> {
        self.dims.as_ref()
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn value(&self) -> Option<&HdValue> {
        self.value.as_ref()
    }

    pub fn default_value(&self) -> Option<&HdValue> {
        self.default_value.as_ref()
    }

    /// Copies `shape`/`dims` from an ancestor attribute when this one
    /// declares neither.
    pub(crate) fn inherit_shape_from(&mut self, ancestor: &HdAttributeSpec) {
        if self.shape.is_none() && self.dims.is_none() {
            self.shape = ancestor.shape.clone();
            self.dims = ancestor.dims.clone();
        }
    }
}

/// Builder for [`HdAttributeSpec`]; validation happens in [`build`](Self::build).
#[derive(Clone)]
pub struct HdAttributeSpecBuilder {
    raw: RawAttributeSpec,
    dtype_error: Option<HdError>,
}

impl HdAttributeSpecBuilder {
    pub fn dtype(mut self, dtype: &str) -> Self {
        match HdSpecDtype::parse(dtype) {
            Ok(parsed) => self.raw.dtype = parsed,
            Err(err) => self.dtype_error = Some(err),
        }
        self
    }

    pub fn spec_dtype(mut self, dtype: HdSpecDtype) -> Self {
        self.raw.dtype = dtype;
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

    pub fn required(mut self, required: bool) -> Self {
        self.raw.required = required;
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

    pub fn build(self) -> Result<HdAttributeSpec> {
        if let Some(err) = self.dtype_error {
            return Err(err);
        }
        HdAttributeSpec::try_from(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_and_default_value_conflict() {
        let err = HdAttributeSpec::builder("attr1", "an attribute")
            .value("a")
            .default_value("b")
            .build()
            .unwrap_err();
        assert!(matches!(err, HdError::Schema { .. }));
    }

    #[test]
    fn dims_only_implies_unconstrained_shape() {
        let spec = HdAttributeSpec::builder("attr1", "an attribute")
            .dtype("int")
            .dims(HdDimsSpec::Single(vec!["x".into(), "y".into()]))
            .build()
            .unwrap();
        assert_eq!(spec.shape(), Some(&HdShapeSpec::Single(vec![None, None])));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "name: attr1\ndoc: an attribute\ndtype: text\ncolour: red\n";
        assert!(serde_yaml::from_str::<HdAttributeSpec>(yaml).is_err());
    }

    #[test]
    fn reference_dtype_from_yaml() {
        let yaml = "name: attr1\ndoc: a ref\ndtype:\n  target_type: Foo\n  reftype: object\n";
        let spec: HdAttributeSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.dtype().reference().unwrap().target_type, "Foo");
        assert!(HdRefSpec::new("Foo", "pointer").is_err());
    }
}
