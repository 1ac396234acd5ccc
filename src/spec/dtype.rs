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

//! # Hdx DType and Shape Module
//!
//! Pure helpers deciding whether a declared primitive dtype or a
//! `shape`/`dims` pair is well formed, plus conversion of runtime values to
//! a declared dtype.
//!
//! ## Synonyms
//!
//! Every primitive has one canonical name and any number of synonyms.
//! Specs always store and serialize the canonical name, so two specs written
//! with `float` and `float32` compare equal.
//!
//! | Canonical | Synonyms |
//! |---|---|
//! | `float32` | `float`, `single` |
//! | `float64` | `double` |
//! | `int16` | `short` |
//! | `int32` | `int` |
//! | `int64` | `long` |
//! | `uint32` | `uint` |
//! | `text` | `utf`, `utf8`, `utf-8` |
//! | `ascii` | `bytes` |
//! | `isodatetime` | `datetime`, `date` |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{HdError, Result};
use crate::value::HdValue;

/// Primitive element type of an attribute or dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HdDtype {
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    Text,
    Ascii,
    IsoDatetime,
    Numeric,
    Object,
    Region,
}

const DTYPE_SYNONYMS: &[(HdDtype, &[&str])] = &[
    (HdDtype::Float32, &["float32", "float", "single"]),
    (HdDtype::Float64, &["float64", "double"]),
    (HdDtype::Int8, &["int8"]),
    (HdDtype::Int16, &["int16", "short"]),
    (HdDtype::Int32, &["int32", "int"]),
    (HdDtype::Int64, &["int64", "long"]),
    (HdDtype::UInt8, &["uint8"]),
    (HdDtype::UInt16, &["uint16"]),
    (HdDtype::UInt32, &["uint32", "uint"]),
    (HdDtype::UInt64, &["uint64"]),
    (HdDtype::Bool, &["bool"]),
    (HdDtype::Text, &["text", "utf", "utf8", "utf-8"]),
    (HdDtype::Ascii, &["ascii", "bytes"]),
    (HdDtype::IsoDatetime, &["isodatetime", "datetime", "date"]),
    (HdDtype::Numeric, &["numeric"]),
    (HdDtype::Object, &["object"]),
    (HdDtype::Region, &["region"]),
];

impl HdDtype {
    /// Resolves a dtype name or synonym.
    pub fn parse(name: &str) -> Result<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        DTYPE_SYNONYMS
            .iter()
            .find(|(_, names)| names.contains(&lowered.as_str()))
            .map(|(dtype, _)| *dtype)
            .ok_or_else(|| {
                HdError::schema(format!(
                    "dtype '{name}' is not a valid primary data type; expected one of {}",
                    Self::valid_names().join(", ")
                ))
            })
    }

    /// All accepted names, canonical names first within each group.
    pub fn valid_names() -> Vec<&'static str> {
        DTYPE_SYNONYMS
            .iter()
            .flat_map(|(_, names)| names.iter().copied())
            .collect()
    }

    pub fn name(&self) -> &'static str {
        DTYPE_SYNONYMS
            .iter()
            .find(|(dtype, _)| dtype == self)
            .map(|(_, names)| names[0])
            .unwrap_or("object")
    }

    /// Size of one element in bytes. Variable-length and reference types
    /// count as one pointer.
    pub fn itemsize(&self) -> usize {
        match self {
            HdDtype::Int8 | HdDtype::UInt8 | HdDtype::Bool => 1,
            HdDtype::Int16 | HdDtype::UInt16 => 2,
            HdDtype::Float32 | HdDtype::Int32 | HdDtype::UInt32 => 4,
            _ => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, HdDtype::Float32 | HdDtype::Float64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            HdDtype::Int8 | HdDtype::Int16 | HdDtype::Int32 | HdDtype::Int64
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            HdDtype::UInt8 | HdDtype::UInt16 | HdDtype::UInt32 | HdDtype::UInt64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_float() || self.is_signed() || self.is_unsigned() || *self == HdDtype::Numeric
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, HdDtype::Object | HdDtype::Region)
    }

    /// Dtype describing the leaves of a runtime value.
    pub fn infer(value: &HdValue) -> Option<HdDtype> {
        let mut inferred = None;
        value.for_each_leaf(&mut |leaf| {
            if inferred.is_none() {
                inferred = match leaf {
                    HdValue::Bool(_) => Some(HdDtype::Bool),
                    HdValue::Int(_) => Some(HdDtype::Int64),
                    HdValue::UInt(_) => Some(HdDtype::UInt64),
                    HdValue::Float(_) => Some(HdDtype::Float64),
                    HdValue::Text(_) => Some(HdDtype::Text),
                    _ => None,
                };
            }
        });
        inferred
    }

    /// Converts every leaf of `value` to this dtype, failing on values the
    /// dtype cannot represent.
    pub fn convert(&self, value: &HdValue) -> std::result::Result<HdValue, String> {
        let dtype = *self;
        value.map_leaves(&mut |leaf| dtype.convert_leaf(leaf))
    }

    fn convert_leaf(&self, leaf: &HdValue) -> std::result::Result<HdValue, String> {
        let mismatch = || format!("cannot convert {} value {:?} to {}", leaf.kind(), leaf, self.name());
        match self {
            HdDtype::Float32 | HdDtype::Float64 => leaf.as_f64().map(HdValue::Float).ok_or_else(mismatch),
            HdDtype::Int8 | HdDtype::Int16 | HdDtype::Int32 | HdDtype::Int64 => {
                let v = leaf.as_i64().ok_or_else(mismatch)?;
                let bits = (self.itemsize() * 8) as u32;
                let (min, max) = if bits == 64 {
                    (i64::MIN, i64::MAX)
                } else {
                    (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
                };
                if v < min || v > max {
                    return Err(format!("value {v} out of range for {}", self.name()));
                }
                Ok(HdValue::Int(v))
            }
            HdDtype::UInt8 | HdDtype::UInt16 | HdDtype::UInt32 | HdDtype::UInt64 => {
                let v = match leaf {
                    HdValue::UInt(v) => *v,
                    HdValue::Int(v) if *v >= 0 => *v as u64,
                    _ => return Err(mismatch()),
                };
                let bits = (self.itemsize() * 8) as u32;
                if bits < 64 && v >= (1u64 << bits) {
                    return Err(format!("value {v} out of range for {}", self.name()));
                }
                Ok(HdValue::UInt(v))
            }
            HdDtype::Bool => leaf.as_bool().map(HdValue::Bool).ok_or_else(mismatch),
            HdDtype::Text => leaf
                .as_text()
                .map(|text| HdValue::Text(text.to_string()))
                .ok_or_else(mismatch),
            HdDtype::Ascii => match leaf.as_text() {
                Some(text) if text.is_ascii() => Ok(HdValue::Text(text.to_string())),
                Some(_) => Err(format!("value {leaf:?} contains non-ascii characters")),
                None => Err(mismatch()),
            },
            HdDtype::IsoDatetime => {
                let text = leaf.as_text().ok_or_else(mismatch)?;
                let valid = chrono::DateTime::parse_from_rfc3339(text).is_ok()
                    || chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                    || chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok();
                if valid {
                    Ok(HdValue::Text(text.to_string()))
                } else {
                    Err(format!("value '{text}' is not an ISO 8601 datetime"))
                }
            }
            HdDtype::Numeric => match leaf {
                HdValue::Int(_) | HdValue::UInt(_) | HdValue::Float(_) => Ok(leaf.clone()),
                _ => Err(mismatch()),
            },
            HdDtype::Object | HdDtype::Region => Err(format!(
                "{} dtype holds references to containers, got {} value",
                self.name(),
                leaf.kind()
            )),
        }
    }
}

impl fmt::Display for HdDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for HdDtype {
    type Error = HdError;

    fn try_from(value: String) -> Result<Self> {
        HdDtype::parse(&value)
    }
}

impl From<HdDtype> for String {
    fn from(value: HdDtype) -> Self {
        value.name().to_string()
    }
}

/// One allowed shape: `None` marks an unconstrained axis.
pub type HdShape = Vec<Option<usize>>;

/// Declared `shape` of a spec, either one shape or a list of alternatives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HdShapeSpec {
    Single(HdShape),
    Alternatives(Vec<HdShape>),
}

/// Declared `dims` of a spec, mirroring [`HdShapeSpec`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HdDimsSpec {
    Single(Vec<String>),
    Alternatives(Vec<Vec<String>>),
}

impl HdShapeSpec {
    pub fn alternatives(&self) -> Vec<&HdShape> {
        match self {
            HdShapeSpec::Single(shape) => vec![shape],
            HdShapeSpec::Alternatives(shapes) => shapes.iter().collect(),
        }
    }

    /// Shape of all-unconstrained axes implied by a `dims` declaration.
    pub fn unconstrained_for(dims: &HdDimsSpec) -> Self {
        match dims {
            HdDimsSpec::Single(names) => HdShapeSpec::Single(vec![None; names.len()]),
            HdDimsSpec::Alternatives(groups) => HdShapeSpec::Alternatives(
                groups.iter().map(|names| vec![None; names.len()]).collect(),
            ),
        }
    }

    /// True when `shape` satisfies at least one alternative.
    pub fn matches(&self, shape: &[usize]) -> bool {
        self.alternatives().into_iter().any(|allowed| {
            allowed.len() == shape.len()
                && allowed
                    .iter()
                    .zip(shape)
                    .all(|(limit, actual)| limit.map_or(true, |limit| limit == *actual))
        })
    }
}

impl HdDimsSpec {
    pub fn alternatives(&self) -> Vec<&Vec<String>> {
        match self {
            HdDimsSpec::Single(names) => vec![names],
            HdDimsSpec::Alternatives(groups) => groups.iter().collect(),
        }
    }
}

/// Checks that `shape` and `dims` agree when both are declared.
pub fn check_shape_dims(shape: Option<&HdShapeSpec>, dims: Option<&HdDimsSpec>) -> Result<()> {
    let (Some(shape), Some(dims)) = (shape, dims) else {
        return Ok(());
    };
    let shapes = shape.alternatives();
    let dim_groups = dims.alternatives();
    if shapes.len() != dim_groups.len() {
        return Err(HdError::schema(format!(
            "'dims' declares {} alternatives but 'shape' declares {}",
            dim_groups.len(),
            shapes.len()
        )));
    }
    for (shape, names) in shapes.iter().zip(dim_groups) {
        if shape.len() != names.len() {
            return Err(HdError::schema(format!(
                "'dims' and 'shape' must be the same length: dims {names:?}, shape {shape:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_resolve_to_canonical_names() {
        assert_eq!(HdDtype::parse("float").unwrap(), HdDtype::Float32);
        assert_eq!(HdDtype::parse("single").unwrap(), HdDtype::Float32);
        assert_eq!(HdDtype::parse("utf-8").unwrap().name(), "text");
        assert!(HdDtype::parse("complex").is_err());
    }

    #[test]
    fn conversion_widens_ints_to_float() {
        let converted = HdDtype::Float64.convert(&HdValue::from(vec![1, 2])).unwrap();
        assert_eq!(converted, HdValue::from(vec![1.0, 2.0]));
        assert!(HdDtype::Int32.convert(&HdValue::from(1.5)).is_err());
        assert!(HdDtype::Int8.convert(&HdValue::from(300)).is_err());
    }

    #[test]
    fn shape_alternatives_match() {
        let shape: HdShapeSpec = serde_yaml::from_str("[[null], [null, 3]]").unwrap();
        assert!(shape.matches(&[10]));
        assert!(shape.matches(&[4, 3]));
        assert!(!shape.matches(&[4, 2]));
    }
}
