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

//! # Hdx Value Module
//!
//! Raw values stored in attributes and datasets. A value is a scalar, a
//! nested list (an n-dimensional array in row-major nesting), or a compound
//! row keyed by field name.
//!
//! Values deserialize untagged, so the `value` and `default_value` keys of a
//! YAML spec map straight onto [`HdValue`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scalar, array, or compound payload of an attribute or dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HdValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<HdValue>),
    Compound(IndexMap<String, HdValue>),
}

impl HdValue {
    /// Shape of the value as nested lists. Scalars and compound rows have an
    /// empty shape; ragged lists have none.
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            HdValue::List(items) => {
                let mut shape = vec![items.len()];
                let Some(first) = items.first() else {
                    return Some(shape);
                };
                let inner = first.shape()?;
                for item in &items[1..] {
                    if item.shape()? != inner {
                        return None;
                    }
                }
                shape.extend(inner);
                Some(shape)
            }
            _ => Some(Vec::new()),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, HdValue::List(_))
    }

    /// Number of elements along the first axis, 1 for scalars.
    pub fn len(&self) -> usize {
        match self {
            HdValue::List(items) => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, HdValue::List(items) if items.is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HdValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HdValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HdValue::Int(v) => Some(*v),
            HdValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HdValue::Int(v) => Some(*v as f64),
            HdValue::UInt(v) => Some(*v as f64),
            HdValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HdValue]> {
        match self {
            HdValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Visits every non-list leaf in row-major order.
    pub fn for_each_leaf<'a>(&'a self, visit: &mut dyn FnMut(&'a HdValue)) {
        match self {
            HdValue::List(items) => {
                for item in items {
                    item.for_each_leaf(visit);
                }
            }
            leaf => visit(leaf),
        }
    }

    /// Applies `convert` to every leaf and rebuilds the nesting.
    pub fn map_leaves<E>(
        &self,
        convert: &mut dyn FnMut(&HdValue) -> std::result::Result<HdValue, E>,
    ) -> std::result::Result<HdValue, E> {
        match self {
            HdValue::List(items) => items
                .iter()
                .map(|item| item.map_leaves(convert))
                .collect::<std::result::Result<Vec<_>, E>>()
                .map(HdValue::List),
            leaf => convert(leaf),
        }
    }

    /// Unwraps a one-element list into its only element.
    pub fn into_scalar_if_single(self) -> HdValue {
        match self {
            HdValue::List(mut items) if items.len() == 1 && !items[0].is_list() => items.remove(0),
            other => other,
        }
    }

    /// Short name of the leaf kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            HdValue::Bool(_) => "bool",
            HdValue::Int(_) => "int",
            HdValue::UInt(_) => "uint",
            HdValue::Float(_) => "float",
            HdValue::Text(_) => "text",
            HdValue::List(_) => "list",
            HdValue::Compound(_) => "compound",
        }
    }
}

impl From<bool> for HdValue {
    fn from(v: bool) -> Self {
        HdValue::Bool(v)
    }
}

impl From<i32> for HdValue {
    fn from(v: i32) -> Self {
        HdValue::Int(v as i64)
    }
}

impl From<i64> for HdValue {
    fn from(v: i64) -> Self {
        HdValue::Int(v)
    }
}

impl From<u64> for HdValue {
    fn from(v: u64) -> Self {
        HdValue::UInt(v)
    }
}

impl From<usize> for HdValue {
    fn from(v: usize) -> Self {
        HdValue::UInt(v as u64)
    }
}

impl From<f64> for HdValue {
    fn from(v: f64) -> Self {
        HdValue::Float(v)
    }
}

impl From<&str> for HdValue {
    fn from(v: &str) -> Self {
        HdValue::Text(v.to_string())
    }
}

impl From<String> for HdValue {
    fn from(v: String) -> Self {
        HdValue::Text(v)
    }
}

impl<T: Into<HdValue>> From<Vec<T>> for HdValue {
    fn from(v: Vec<T>) -> Self {
        HdValue::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_of_nested_lists() {
        let value = HdValue::from(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(value.shape(), Some(vec![2, 3]));
        assert_eq!(HdValue::from(1.5).shape(), Some(vec![]));
    }

    #[test]
    fn ragged_lists_have_no_shape() {
        let value = HdValue::List(vec![HdValue::from(vec![1, 2]), HdValue::from(vec![3])]);
        assert_eq!(value.shape(), None);
    }

    #[test]
    fn untagged_yaml_values() {
        let value: HdValue = serde_yaml::from_str("[1, 2.5, text]").unwrap();
        assert_eq!(
            value,
            HdValue::List(vec![HdValue::Int(1), HdValue::Float(2.5), HdValue::from("text")])
        );
    }
}
