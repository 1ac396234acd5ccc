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

//! # Hdx Spec Catalog Module
//!
//! Registry of data types: type name → (spec, source file), plus an index
//! from each parent type to its direct subtypes.
//!
//! Registration compares specs structurally. The spec is
//! serialized to canonical JSON and hashed with blake3; a second
//! registration under the same name is a no-op when the digests match and
//! an error otherwise.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::Serialize;

use crate::errors::{HdError, Result};
use crate::spec::storage::HdSpec;

/// One node of the type forest returned by
/// [`HdSpecCatalog::get_full_hierarchy`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HdTypeTree {
    pub children: BTreeMap<String, HdTypeTree>,
}

#[derive(Clone, Debug)]
struct HdCatalogEntry {
    spec: HdSpec,
    source: String,
    digest: blake3::Hash,
}

/// Type registry for one namespace.
#[derive(Clone, Debug, Default)]
pub struct HdSpecCatalog {
    entries: IndexMap<String, HdCatalogEntry>,
    subtypes: BTreeMap<String, BTreeSet<String>>,
}

/// Structural digest of a spec's serialized form.
pub fn spec_digest(spec: &HdSpec) -> Result<blake3::Hash> {
    let bytes = serde_json::to_vec(spec)?;
    Ok(blake3::hash(&bytes))
}

impl HdSpecCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a spec that carries a `data_type_def`.
    pub fn register_spec(&mut self, spec: HdSpec, source: &str) -> Result<()> {
        let Some(name) = spec.data_type_def().map(str::to_string) else {
            return Err(HdError::catalog(format!(
                "cannot register spec '{}' without 'data_type_def'",
                spec.key()
            )));
        };
        let digest = spec_digest(&spec)?;
        if let Some(existing) = self.entries.get(&name) {
            if existing.digest != digest {
                return Err(HdError::catalog(format!(
                    "'{name}' - cannot overwrite existing specification"
                )));
            }
            if existing.source != source {
                log::warn!(
                    "'{name}' from '{source}' is identical to the registration from '{}'; keeping the first",
                    existing.source
                );
            }
            return Ok(());
        }
        if let Some(parent) = spec.data_type_inc() {
            self.subtypes
                .entry(parent.to_string())
                .or_default()
                .insert(name.clone());
        }
        log::debug!("registered data type '{name}' from '{source}'");
        self.entries.insert(
            name,
            HdCatalogEntry {
                spec,
                source: source.to_string(),
                digest,
            },
        );
        Ok(())
    }

    /// Registers `spec` and every nested spec carrying a `data_type_def`,
    /// returning the names registered.
    pub fn auto_register(&mut self, spec: HdSpec, source: &str) -> Result<Vec<String>> {
        let mut registered = Vec::new();
        for nested in spec.nested_type_defs() {
            if let Some(name) = nested.data_type_def().map(str::to_string) {
                self.register_spec(nested, source)?;
                registered.push(name);
            }
        }
        if let Some(name) = spec.data_type_def().map(str::to_string) {
            self.register_spec(spec, source)?;
            registered.push(name);
        }
        Ok(registered)
    }

    pub fn get_spec(&self, name: &str) -> Result<&HdSpec> {
        self.entries
            .get(name)
            .map(|entry| &entry.spec)
            .ok_or_else(|| HdError::lookup(format!("data type '{name}' is not registered")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get_spec_source_file(&self, name: &str) -> Result<&str> {
        self.entries
            .get(name)
            .map(|entry| entry.source.as_str())
            .ok_or_else(|| HdError::lookup(format!("data type '{name}' is not registered")))
    }

    /// Registered type names in registration order.
    pub fn get_registered_types(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// The chain from `name` up through each `data_type_inc` to the root.
    pub fn get_hierarchy(&self, name: &str) -> Result<Vec<String>> {
        let mut chain = vec![name.to_string()];
        let mut current = self.get_spec(name)?;
        while let Some(parent) = current.data_type_inc() {
            if chain.iter().any(|seen| seen == parent) {
                return Err(HdError::catalog(format!(
                    "cyclic data_type_inc chain through '{parent}'"
                )));
            }
            current = self.entries.get(parent).map(|entry| &entry.spec).ok_or_else(|| {
                HdError::catalog(format!(
                    "data_type_inc '{parent}' of '{}' is not registered",
                    chain[chain.len() - 1]
                ))
            })?;
            chain.push(parent.to_string());
        }
        Ok(chain)
    }

    /// Registered subtypes of `name`. Unknown names yield an empty list.
    pub fn get_subtypes(&self, name: &str, recursive: bool) -> Vec<String> {
        let mut found = Vec::new();
        let mut pending: Vec<&str> = vec![name];
        while let Some(parent) = pending.pop() {
            let Some(children) = self.subtypes.get(parent) else {
                continue;
            };
            for child in children {
                if found.contains(child) {
                    continue;
                }
                found.push(child.clone());
                if recursive {
                    pending.push(child);
                }
            }
        }
        found
    }

    /// The complete type forest, rooted at types whose parent is not
    /// registered here.
    pub fn get_full_hierarchy(&self) -> BTreeMap<String, HdTypeTree> {
        let mut roots = BTreeMap::new();
        for (name, entry) in &self.entries {
            let is_root = entry
                .spec
                .data_type_inc()
                .map_or(true, |parent| !self.entries.contains_key(parent));
            if is_root {
                let mut visited = BTreeSet::new();
                roots.insert(name.clone(), self.subtree(name, &mut visited));
            }
        }
        roots
    }

    fn subtree(&self, name: &str, visited: &mut BTreeSet<String>) -> HdTypeTree {
        let mut tree = HdTypeTree::default();
        if !visited.insert(name.to_string()) {
            return tree;
        }
        if let Some(children) = self.subtypes.get(name) {
            for child in children {
                tree.children
                    .insert(child.clone(), self.subtree(child, visited));
            }
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::storage::HdGroupSpec;

    fn group(def: &str, inc: Option<&str>, doc: &str) -> HdSpec {
        let mut builder = HdGroupSpec::builder(doc).data_type_def(def);
        if let Some(inc) = inc {
            builder = builder.data_type_inc(inc);
        }
        HdSpec::Group(builder.build().unwrap())
    }

    #[test]
    fn identical_registration_is_a_no_op() {
        let mut catalog = HdSpecCatalog::new();
        catalog.register_spec(group("Foo", None, "foo"), "a.yaml").unwrap();
        catalog.register_spec(group("Foo", None, "foo"), "b.yaml").unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get_spec_source_file("Foo").unwrap(), "a.yaml");
        assert!(catalog.register_spec(group("Foo", None, "changed"), "a.yaml").is_err());
    }

    #[test]
    fn subtypes_and_forest() {
        let mut catalog = HdSpecCatalog::new();
        catalog.register_spec(group("A", None, "a"), "s.yaml").unwrap();
        catalog.register_spec(group("B", Some("A"), "b"), "s.yaml").unwrap();
        catalog.register_spec(group("C", Some("B"), "c"), "s.yaml").unwrap();
        assert_eq!(catalog.get_hierarchy("C").unwrap(), vec!["C", "B", "A"]);
        assert_eq!(catalog.get_subtypes("A", false), vec!["B"]);
        assert_eq!(catalog.get_subtypes("A", true), vec!["B", "C"]);
        assert!(catalog.get_subtypes("Missing", true).is_empty());
        let forest = catalog.get_full_hierarchy();
        assert!(forest["A"].children["B"].children.contains_key("C"));
    }
}
