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

//! Four-symbol quantity model of groups, datasets and links.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{HdError, Result};

/// How many instances of a child may appear.
///
/// | Symbol | Alias | required | many |
/// |---|---|---|---|
/// | `?` | `zero_or_one` | false | false |
/// | `1` | | true | false |
/// | `*` | `zero_or_many` | false | true |
/// | `+` | `one_or_many` | true | true |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HdQuantity {
    ZeroOrOne,
    #[default]
    ExactlyOne,
    ZeroOrMany,
    OneOrMany,
}

impl HdQuantity {
    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol.trim() {
            "?" | "zero_or_one" => Ok(HdQuantity::ZeroOrOne),
            "1" => Ok(HdQuantity::ExactlyOne),
            "*" | "zero_or_many" => Ok(HdQuantity::ZeroOrMany),
            "+" | "one_or_many" => Ok(HdQuantity::OneOrMany),
            other => Err(HdError::schema(format!(
                "quantity '{other}' is not one of '?', 1, '*', '+'"
            ))),
        }
    }

    pub fn from_count(count: i64) -> Result<Self> {
        if count == 1 {
            Ok(HdQuantity::ExactlyOne)
        } else {
            Err(HdError::schema(format!(
                "quantity {count} is not one of '?', 1, '*', '+'"
            )))
        }
    }

    /// The `(required, many)` flag pair.
    pub fn flags(&self) -> (bool, bool) {
        match self {
            HdQuantity::ZeroOrOne => (false, false),
            HdQuantity::ExactlyOne => (true, false),
            HdQuantity::ZeroOrMany => (false, true),
            HdQuantity::OneOrMany => (true, true),
        }
    }

    pub fn is_required(&self) -> bool {
        self.flags().0
    }

    pub fn is_many(&self) -> bool {
        self.flags().1
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            HdQuantity::ZeroOrOne => "?",
            HdQuantity::ExactlyOne => "1",
            HdQuantity::ZeroOrMany => "*",
            HdQuantity::OneOrMany => "+",
        }
    }
}

impl fmt::Display for HdQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Serialize for HdQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            HdQuantity::ExactlyOne => serializer.serialize_i64(1),
            other => serializer.serialize_str(other.symbol()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Count(i64),
    Symbol(String),
}

impl<'de> Deserialize<'de> for HdQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let parsed = match RawQuantity::deserialize(deserializer)? {
            RawQuantity::Count(count) => HdQuantity::from_count(count),
            RawQuantity::Symbol(symbol) => HdQuantity::parse(&symbol),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_quantities() {
        let parsed: Vec<HdQuantity> = serde_yaml::from_str("['?', 1, '*', '+', zero_or_many]").unwrap();
        assert_eq!(
            parsed,
            vec![
                HdQuantity::ZeroOrOne,
                HdQuantity::ExactlyOne,
                HdQuantity::ZeroOrMany,
                HdQuantity::OneOrMany,
                HdQuantity::ZeroOrMany,
            ]
        );
        assert!(serde_yaml::from_str::<HdQuantity>("2").is_err());
    }
}
