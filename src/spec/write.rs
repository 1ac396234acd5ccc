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

//! # Hdx Spec Writer Module
//!
//! Writes namespace documents and schema sources as YAML.
//!
//! [`HdNamespaceBuilder`] collects new specs per source file and types
//! included from other sources or namespaces, then [`export`] writes one
//! YAML file per source holding new specs plus the namespace document.
//!
//! [`export`]: HdNamespaceBuilder::export

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use crate::errors::{HdError, Result};
use crate::spec::catalog::HdSpecCatalog;
use crate::spec::namespace::{HdNamespaceInfo, HdSchemaEntry, HdSpecFile};
use crate::spec::storage::HdSpec;

const KEY_ORDER: &[&str] = &[
    "data_type_def",
    "data_type_inc",
    "name",
    "default_name",
    "dtype",
    "target_type",
    "dims",
    "shape",
    "default_value",
    "value",
    "doc",
    "required",
    "quantity",
    "attributes",
    "datasets",
    "groups",
    "links",
];

/// Configuration for [`HdYamlSpecWriter`].
#[derive(Clone, Debug)]
pub struct HdWriterConfig {
    /// Directory the namespace and spec files are written to.
    pub outdir: PathBuf,
    /// Reorder spec keys into the conventional reading order.
    pub sort_keys: bool,
    /// Use atomic write (write to temp then rename).
    pub atomic_write: bool,
}

impl Default for HdWriterConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("."),
            sort_keys: true,
            atomic_write: true,
        }
    }
}

/// Sink for namespace documents and schema sources.
pub trait HdSpecWriter {
    fn write_spec(&self, spec_file: &HdSpecFile, path: &str) -> Result<()>;

    fn write_namespace(&self, namespace: &HdNamespaceInfo, path: &str) -> Result<()>;
}

/// Writes YAML files into a directory.
#[derive(Clone, Debug, Default)]
pub struct HdYamlSpecWriter {
    config: HdWriterConfig,
}

#[derive(Serialize)]
struct NamespaceDocument<'a> {
    namespaces: Vec<&'a HdNamespaceInfo>,
}

impl HdYamlSpecWriter {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            config: HdWriterConfig {
                outdir: outdir.into(),
                ..HdWriterConfig::default()
            },
        }
    }

    pub fn with_config(mut self, config: HdWriterConfig) -> Self {
        self.config = config;
        self
    }

    fn write_yaml(&self, value: serde_yaml::Value, path: &str) -> Result<()> {
        let text = serde_yaml::to_string(&value)?;
        let target = self.config.outdir.join(path);
        if self.config.atomic_write {
            let temp_path = temp_path(&target);
            fs::write(&temp_path, text)?;
            fs::rename(&temp_path, &target)?;
        } else {
            fs::write(&target, text)?;
        }
        log::debug!("wrote '{}'", target.display());
        Ok(())
    }
}

impl HdSpecWriter for HdYamlSpecWriter {
    fn write_spec(&self, spec_file: &HdSpecFile, path: &str) -> Result<()> {
        let mut value = serde_yaml::to_value(spec_file)?;
        if self.config.sort_keys {
            value = sort_keys(value);
        }
        self.write_yaml(value, path)
    }

    fn write_namespace(&self, namespace: &HdNamespaceInfo, path: &str) -> Result<()> {
        let document = NamespaceDocument {
            namespaces: vec![namespace],
        };
        self.write_yaml(serde_yaml::to_value(&document)?, path)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(".{stem}.tmp"))
}

/// Moves known spec keys to the front in [`KEY_ORDER`], recursively.
fn sort_keys(value: serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::Mapping(mapping) => {
            let mut entries: Vec<(serde_yaml::Value, serde_yaml::Value)> = mapping.into_iter().collect();
            let rank = |key: &serde_yaml::Value| {
                key.as_str()
                    .and_then(|key| KEY_ORDER.iter().position(|known| *known == key))
                    .unwrap_or(KEY_ORDER.len())
            };
            entries.sort_by_key(|(key, _)| rank(key));
            // Untyped specs lead with their name.
            let typed = entries.iter().any(|(key, _)| key.as_str() == Some("data_type_def"));
            if !typed {
                if let Some(pos) = entries.iter().position(|(key, _)| key.as_str() == Some("name")) {
                    let entry = entries.remove(pos);
                    entries.insert(0, entry);
                }
            }
            serde_yaml::Value::Mapping(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        serde_yaml::Value::Sequence(items) => {
            serde_yaml::Value::Sequence(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

/// Where an included type comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HdIncludeFrom {
    Source(String),
    Namespace(String),
}

#[derive(Clone, Debug)]
struct SourceDraft {
    entry: HdSchemaEntry,
    specs: Vec<HdSpec>,
    types: Vec<String>,
}

/// Collects specs and includes for a new namespace.
#[derive(Clone, Debug)]
pub struct HdNamespaceBuilder {
    info: HdNamespaceInfo,
    namespaces: IndexMap<String, HdSchemaEntry>,
    sources: IndexMap<String, SourceDraft>,
    catalog: HdSpecCatalog,
}

impl HdNamespaceBuilder {
    /// Starts a namespace. A version is required on write.
    pub fn new(info: HdNamespaceInfo) -> Result<Self> {
        if info.version.is_none() {
            return Err(HdError::validation(format!(
                "Namespace '{}' missing key 'version'. Please specify a version for the extension.",
                info.name
            )));
        }
        Ok(Self {
            info: HdNamespaceInfo {
                schema: Vec::new(),
                ..info
            },
            namespaces: IndexMap::new(),
            sources: IndexMap::new(),
            catalog: HdSpecCatalog::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Types defined so far by added specs.
    pub fn catalog(&self) -> &HdSpecCatalog {
        &self.catalog
    }

    /// Adds a new spec written to `source`.
    pub fn add_spec(&mut self, source: &str, spec: impl Into<HdSpec>) -> Result<()> {
        let spec = spec.into();
        self.catalog.auto_register(spec.clone(), source)?;
        self.add_source(source, None, None)?;
        if let Some(draft) = self.sources.get_mut(source) {
            draft.specs.push(spec);
        }
        Ok(())
    }

    /// Adds a source file, updating its doc and title when given.
    pub fn add_source(&mut self, source: &str, doc: Option<&str>, title: Option<&str>) -> Result<()> {
        if source.contains('/') || source.starts_with('.') {
            return Err(HdError::validation(format!(
                "source '{source}' must be a base file name"
            )));
        }
        let draft = self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| SourceDraft {
                entry: HdSchemaEntry::source(source),
                specs: Vec::new(),
                types: Vec::new(),
            });
        if let Some(doc) = doc {
            draft.entry.doc = Some(doc.to_string());
        }
        if let Some(title) = title {
            draft.entry.title = Some(title.to_string());
        }
        Ok(())
    }

    /// Includes one type from an existing source or namespace.
    pub fn include_type(&mut self, data_type: &str, from: HdIncludeFrom) -> Result<()> {
        match from {
            HdIncludeFrom::Source(source) => {
                self.add_source(&source, None, None)?;
                if let Some(draft) = self.sources.get_mut(&source) {
                    draft.types.push(data_type.to_string());
                }
            }
            HdIncludeFrom::Namespace(namespace) => {
                self.include_namespace(&namespace);
                if let Some(entry) = self.namespaces.get_mut(&namespace) {
                    entry.data_types.get_or_insert_with(Vec::new).push(data_type.to_string());
                }
            }
        }
        Ok(())
    }

    /// Includes a whole namespace.
    pub fn include_namespace(&mut self, namespace: &str) {
        self.namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| HdSchemaEntry::namespace(namespace));
    }

    /// Writes every source holding new specs, then the namespace document
    /// to `path`.
    pub fn export(&self, path: &str, writer: &dyn HdSpecWriter) -> Result<()> {
        let mut info = self.info.clone();
        info.schema = self.namespaces.values().cloned().collect();
        for (source, draft) in &self.sources {
            let mut entry = draft.entry.clone();
            match (draft.specs.is_empty(), draft.types.is_empty()) {
                (false, false) => {
                    return Err(HdError::validation(format!(
                        "cannot include from source '{source}' if writing to source"
                    )));
                }
                (true, false) => entry.data_types = Some(draft.types.clone()),
                (false, true) => {
                    let mut spec_file = HdSpecFile::default();
                    for spec in &draft.specs {
                        spec_file.add_spec(spec.clone());
                    }
                    writer.write_spec(&spec_file, source)?;
                }
                (true, true) => {}
            }
            info.schema.push(entry);
        }
        writer.write_namespace(&info, path)?;
        log::info!("exported namespace '{}' to '{path}'", info.name);
        Ok(())
    }

    /// Exports into `outdir` with the default YAML writer.
    pub fn export_to(&self, path: &str, outdir: impl Into<PathBuf>) -> Result<()> {
        self.export(path, &HdYamlSpecWriter::new(outdir))
    }
}

/// Writes `<name>.namespace.yaml` and `<name>.extensions.yaml` holding
/// `new_data_types` into `output_dir`.
pub fn export_spec(
    builder: &mut HdNamespaceBuilder,
    new_data_types: Vec<HdSpec>,
    output_dir: impl Into<PathBuf>,
) -> Result<()> {
    if new_data_types.is_empty() {
        log::warn!("No data types specified. Exiting.");
        return Ok(());
    }
    let ns_path = format!("{}.namespace.yaml", builder.name());
    let ext_path = format!("{}.extensions.yaml", builder.name());
    for spec in new_data_types {
        builder.add_spec(&ext_path, spec)?;
    }
    builder.export_to(&ns_path, output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_required_on_write() {
        assert!(HdNamespaceBuilder::new(HdNamespaceInfo::new("ext", "an extension")).is_err());
    }

    #[test]
    fn sources_must_be_base_names() {
        let mut builder =
            HdNamespaceBuilder::new(HdNamespaceInfo::new("ext", "an extension").with_version("0.1.0")).unwrap();
        assert!(builder.add_source("sub/dir.yaml", None, None).is_err());
        assert!(builder.add_source("./ext.yaml", None, None).is_err());
        assert!(builder.add_source("ext.yaml", Some("doc"), Some("Title")).is_ok());
    }

    #[test]
    fn key_order_puts_type_keys_first() {
        let value: serde_yaml::Value = serde_yaml::from_str("doc: x\nname: n\ndata_type_def: Foo\n").unwrap();
        let sorted = sort_keys(value);
        let keys: Vec<&str> = sorted
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(|key| key.as_str())
            .collect();
        assert_eq!(keys, vec!["data_type_def", "name", "doc"]);
    }
}
