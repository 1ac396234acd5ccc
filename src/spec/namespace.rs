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

//! # Hdx Namespace Module
//!
//! Namespaces group schema sources under a name and version. A namespace
//! document is a YAML mapping with a `namespaces` list; each namespace lists
//! its `schema` entries in load order, so later sources may extend types
//! defined by earlier sources or by included namespaces.
//!
//! ```yaml
//! namespaces:
//!   - name: test_core
//!     doc: a test namespace
//!     version: 0.1.0
//!     schema:
//!       - source: test_core.base.yaml
//!       - namespace: hdx-common
//!         data_types: [Data]
//! ```
//!
//! [`HdNamespaceCatalog::load_namespaces`] returns, for every namespace it
//! loaded, the types it pulled from each included namespace.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{HdError, Result};
use crate::spec::catalog::HdSpecCatalog;
use crate::spec::resolve::resolve_spec;
use crate::spec::storage::{HdDatasetSpec, HdGroupSpec, HdSpec};

/// Included namespace → sorted type names, per loaded namespace.
pub type HdNamespaceDeps = IndexMap<String, IndexMap<String, Vec<String>>>;

const DEFAULT_TYPES_KEY: &str = "data_types";

/// Options of a [`HdNamespaceCatalog`].
#[derive(Clone, Debug)]
pub struct HdNamespaceConfig {
    /// Resolution mode used by [`HdNamespaceCatalog::load`].
    pub resolve: bool,
    /// Key of a schema entry listing the types to load.
    pub types_key: String,
    /// Version stored for namespaces that declare none.
    pub unversioned: String,
}

impl Default for HdNamespaceConfig {
    fn default() -> Self {
        Self {
            resolve: true,
            types_key: DEFAULT_TYPES_KEY.to_string(),
            unversioned: "unversioned".to_string(),
        }
    }
}

/// One or many authors or contacts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HdPeople {
    One(String),
    Many(Vec<String>),
}

impl HdPeople {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            HdPeople::One(person) => vec![person.clone()],
            HdPeople::Many(people) => people.clone(),
        }
    }
}

/// One entry of a namespace's `schema` list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdSchemaEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl HdSchemaEntry {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_types(mut self, types: Vec<String>) -> Self {
        self.data_types = Some(types);
        self
    }
}

/// Descriptive fields of a namespace, as stored in a namespace document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HdNamespaceInfo {
    pub name: String,
    #[serde(default)]
    pub doc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "version_text")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<HdPeople>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<HdPeople>,
    #[serde(default)]
    pub schema: Vec<HdSchemaEntry>,
}

impl HdNamespaceInfo {
    pub fn new(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            full_name: None,
            version: None,
            date: None,
            author: None,
            contact: None,
            schema: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_author(mut self, author: HdPeople) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_contact(mut self, contact: HdPeople) -> Self {
        self.contact = Some(contact);
        self
    }
}

/// YAML versions such as `1.0` arrive as numbers.
mod version_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(text) => serializer.serialize_str(text),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(serde_yaml::Value::Null) => None,
            Some(serde_yaml::Value::String(text)) => Some(text),
            Some(serde_yaml::Value::Number(number)) => Some(number.to_string()),
            Some(other) => Some(serde_yaml::to_string(&other).map_err(serde::de::Error::custom)?.trim().to_string()),
        })
    }
}

fn parse_date(text: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| chrono::DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
}

/// A loaded namespace and the catalog of its types.
#[derive(Clone, Debug)]
pub struct HdSpecNamespace {
    info: HdNamespaceInfo,
    catalog: HdSpecCatalog,
}

impl HdSpecNamespace {
    /// Validates `info` and attaches `catalog`. A missing version is stored
    /// as `unversioned`.
    pub fn new(mut info: HdNamespaceInfo, catalog: HdSpecCatalog, unversioned: &str) -> Result<Self> {
        if info.name.chars().any(char::is_whitespace) {
            return Err(HdError::validation(format!(
                "namespace name '{}' must not contain any whitespace",
                info.name
            )));
        }
        if info.version.is_none() {
            log::warn!(
                "Loaded namespace '{}' is missing the required key 'version'; version will be set to '{unversioned}'",
                info.name
            );
            info.version = Some(unversioned.to_string());
        }
        if let Some(date) = &info.date {
            if parse_date(date).is_none() {
                return Err(HdError::validation(format!(
                    "namespace '{}' date '{date}' is not an ISO 8601 date",
                    info.name
                )));
            }
        }
        for entry in &info.schema {
            if entry.source.is_none() && entry.namespace.is_none() {
                return Err(HdError::schema(format!(
                    "Spec '{}' schema must have either 'source' or 'namespace' key",
                    info.name
                )));
            }
        }
        Ok(Self { info, catalog })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn doc(&self) -> &str {
        &self.info.doc
    }

    pub fn full_name(&self) -> Option<&str> {
        self.info.full_name.as_deref()
    }

    pub fn version(&self) -> &str {
        self.info.version.as_deref().unwrap_or_default()
    }

    pub fn date(&self) -> Option<chrono::NaiveDate> {
        self.info.date.as_deref().and_then(parse_date)
    }

    pub fn author(&self) -> Vec<String> {
        self.info.author.as_ref().map(HdPeople::to_vec).unwrap_or_default()
    }

    pub fn contact(&self) -> Vec<String> {
        self.info.contact.as_ref().map(HdPeople::to_vec).unwrap_or_default()
    }

    pub fn schema(&self) -> &[HdSchemaEntry] {
        &self.info.schema
    }

    pub fn info(&self) -> &HdNamespaceInfo {
        &self.info
    }

    pub fn catalog(&self) -> &HdSpecCatalog {
        &self.catalog
    }

    /// Schema sources listed by this namespace.
    pub fn get_source_files(&self) -> Vec<&str> {
        self.info
            .schema
            .iter()
            .filter_map(|entry| entry.source.as_deref())
            .collect()
    }

    pub fn get_source_description(&self, source: &str) -> Option<&HdSchemaEntry> {
        self.info
            .schema
            .iter()
            .find(|entry| entry.source.as_deref() == Some(source))
    }

    pub fn get_spec(&self, data_type: &str) -> Result<&HdSpec> {
        self.catalog.get_spec(data_type)
    }

    pub fn get_registered_types(&self) -> Vec<&str> {
        self.catalog.get_registered_types()
    }

    pub fn get_hierarchy(&self, data_type: &str) -> Result<Vec<String>> {
        self.catalog.get_hierarchy(data_type)
    }

    /// True when `other` carries the same version and schema list.
    fn same_content(&self, other: &HdNamespaceInfo, unversioned: &str) -> bool {
        self.version() == other.version.as_deref().unwrap_or(unversioned) && self.info.schema == other.schema
    }
}

/// Contents of one schema source file.
#[derive(Clone, Debug, Default, Serialize)]
pub struct HdSpecFile {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<HdGroupSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<HdDatasetSpec>,
}

impl HdSpecFile {
    pub fn add_spec(&mut self, spec: HdSpec) {
        match spec {
            HdSpec::Group(group) => self.groups.push(group),
            HdSpec::Dataset(dataset) => self.datasets.push(dataset),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.datasets.is_empty()
    }
}

#[derive(Deserialize)]
struct RawSpecFile {
    #[serde(default)]
    groups: Option<Vec<HdGroupSpec>>,
    #[serde(default)]
    datasets: Option<Vec<HdDatasetSpec>>,
}

#[derive(Deserialize)]
struct RawNamespaceFile {
    namespaces: Option<Vec<serde_yaml::Value>>,
}

/// Source of namespace documents and schema files.
pub trait HdSpecReader {
    /// Directory schema sources are relative to.
    fn source(&self) -> &Path;

    /// Raw namespace mappings listed under `namespaces`.
    fn read_namespace(&self, namespace_path: &Path) -> Result<Vec<serde_yaml::Value>>;

    fn read_spec(&self, spec_path: &str) -> Result<HdSpecFile>;
}

/// Reads YAML namespace and schema files from a directory.
#[derive(Clone, Debug)]
pub struct HdYamlSpecReader {
    indir: PathBuf,
}

impl HdYamlSpecReader {
    pub fn new(indir: impl Into<PathBuf>) -> Self {
        Self { indir: indir.into() }
    }

    fn spec_path(&self, spec_path: &str) -> PathBuf {
        let path = Path::new(spec_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.indir.join(path)
        }
    }
}

impl HdSpecReader for HdYamlSpecReader {
    fn source(&self) -> &Path {
        &self.indir
    }

    fn read_namespace(&self, namespace_path: &Path) -> Result<Vec<serde_yaml::Value>> {
        let text = fs::read_to_string(namespace_path)?;
        let file: RawNamespaceFile = serde_yaml::from_str(&text)?;
        file.namespaces.ok_or_else(|| {
            HdError::schema(format!("no 'namespaces' found in {}", namespace_path.display()))
        })
    }

    fn read_spec(&self, spec_path: &str) -> Result<HdSpecFile> {
        let path = self.spec_path(spec_path);
        let text = fs::read_to_string(&path)?;
        let file: RawSpecFile = serde_yaml::from_str(&text)?;
        if file.groups.is_none() && file.datasets.is_none() {
            return Err(HdError::schema(format!(
                "no 'groups' or 'datasets' found in {spec_path}"
            )));
        }
        Ok(HdSpecFile {
            groups: file.groups.unwrap_or_default(),
            datasets: file.datasets.unwrap_or_default(),
        })
    }
}

/// Every loaded namespace, with the bookkeeping needed to load more.
#[derive(Clone, Debug, Default)]
pub struct HdNamespaceCatalog {
    config: HdNamespaceConfig,
    namespaces: IndexMap<String, HdSpecNamespace>,
    loaded_specs: IndexMap<String, Vec<String>>,
    included_sources: IndexMap<String, Vec<String>>,
    included_specs: HashMap<PathBuf, HdNamespaceDeps>,
}

impl HdNamespaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: HdNamespaceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &HdNamespaceConfig {
        &self.config
    }

    /// Loads a namespace document with the configured resolution mode.
    pub fn load(&mut self, namespace_path: impl AsRef<Path>) -> Result<HdNamespaceDeps> {
        let resolve = self.config.resolve;
        self.load_namespaces(namespace_path, resolve)
    }

    /// Loads every namespace in a YAML namespace document, reading schema
    /// sources relative to the document's directory.
    pub fn load_namespaces(&mut self, namespace_path: impl AsRef<Path>, resolve: bool) -> Result<HdNamespaceDeps> {
        let namespace_path = namespace_path.as_ref();
        if !namespace_path.exists() {
            return Err(HdError::Io(format!(
                "namespace file '{}' not found",
                namespace_path.display()
            )));
        }
        let indir = namespace_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let reader = HdYamlSpecReader::new(indir);
        self.load_namespaces_with_reader(namespace_path, resolve, &reader)
    }

    pub fn load_namespaces_with_reader(
        &mut self,
        namespace_path: &Path,
        resolve: bool,
        reader: &dyn HdSpecReader,
    ) -> Result<HdNamespaceDeps> {
        let file_name = namespace_path.file_name().map(PathBuf::from).unwrap_or_default();
        let path_key = reader.source().join(file_name);
        if let Some(cached) = self.included_specs.get(&path_key) {
            log::debug!("namespace document '{}' already loaded", path_key.display());
            return Ok(cached.clone());
        }

        let mut to_load = Vec::new();
        for raw in reader.read_namespace(namespace_path)? {
            let info = self.parse_info(raw)?;
            match self.namespaces.get(&info.name) {
                Some(existing) if existing.same_content(&info, &self.config.unversioned) => {
                    log::debug!("namespace '{}' is already loaded", info.name);
                }
                Some(existing) => {
                    return Err(HdError::catalog(format!(
                        "namespace '{}' from '{}' (version {}) differs from the loaded version {}",
                        info.name,
                        namespace_path.display(),
                        info.version.as_deref().unwrap_or(&self.config.unversioned),
                        existing.version()
                    )));
                }
                None => to_load.push(info),
            }
        }

        let mut loaded = HdNamespaceDeps::new();
        for info in to_load {
            let name = info.name.clone();
            let included = self.load_namespace(info, reader, resolve)?;
            log::info!("loaded namespace '{name}' from '{}'", namespace_path.display());
            loaded.insert(name, included);
        }
        self.included_specs.insert(path_key, loaded.clone());
        Ok(loaded)
    }

    fn parse_info(&self, mut raw: serde_yaml::Value) -> Result<HdNamespaceInfo> {
        if self.config.types_key != DEFAULT_TYPES_KEY {
            if let Some(schema) = raw.get_mut("schema").and_then(serde_yaml::Value::as_sequence_mut) {
                for entry in schema {
                    if let Some(mapping) = entry.as_mapping_mut() {
                        if let Some(types) = mapping.remove(self.config.types_key.as_str()) {
                            mapping.insert(DEFAULT_TYPES_KEY.into(), types);
                        }
                    }
                }
            }
        }
        Ok(serde_yaml::from_value(raw)?)
    }

    fn load_namespace(
        &mut self,
        info: HdNamespaceInfo,
        reader: &dyn HdSpecReader,
        resolve: bool,
    ) -> Result<IndexMap<String, Vec<String>>> {
        // Validate the descriptive fields before touching any schema source.
        let namespace = HdSpecNamespace::new(info, HdSpecCatalog::new(), &self.config.unversioned)?;
        let name = namespace.name().to_string();
        let mut catalog = HdSpecCatalog::new();
        let mut included = IndexMap::new();

        for entry in namespace.schema() {
            let types_to_load: Option<BTreeSet<String>> =
                entry.data_types.as_ref().map(|types| types.iter().cloned().collect());
            if let Some(source) = &entry.source {
                self.load_spec_file(reader, source, &mut catalog, types_to_load.as_ref(), resolve)?;
                self.included_sources
                    .entry(name.clone())
                    .or_default()
                    .push(source.clone());
            } else if let Some(included_name) = &entry.namespace {
                let included_ns = self.namespaces.get(included_name).ok_or_else(|| {
                    HdError::catalog(format!("Could not load namespace '{included_name}'"))
                })?;
                let types: Vec<String> = match &types_to_load {
                    Some(types) => types.iter().cloned().collect(),
                    None => included_ns
                        .get_registered_types()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                };
                let mut registered = BTreeSet::new();
                for data_type in &types {
                    register_type(data_type, included_ns, &mut catalog, &mut registered)?;
                }
                included.insert(included_name.clone(), registered.into_iter().collect());
            }
        }

        let namespace = HdSpecNamespace {
            info: namespace.info,
            catalog,
        };
        self.namespaces.insert(name, namespace);
        Ok(included)
    }

    fn load_spec_file(
        &mut self,
        reader: &dyn HdSpecReader,
        source: &str,
        catalog: &mut HdSpecCatalog,
        types_to_load: Option<&BTreeSet<String>>,
        resolve: bool,
    ) -> Result<Vec<String>> {
        if self.loaded_specs.contains_key(source) {
            return Err(HdError::catalog(format!("spec source '{source}' already loaded")));
        }
        let file = reader.read_spec(source)?;
        let specs = file
            .datasets
            .into_iter()
            .map(HdSpec::Dataset)
            .chain(file.groups.into_iter().map(HdSpec::Group));

        let mut registered = Vec::new();
        for spec in specs {
            let Some(def) = spec.data_type_def() else {
                return Err(HdError::schema(format!(
                    "No data type def key found in spec {source}"
                )));
            };
            if types_to_load.is_some_and(|types| !types.contains(def)) {
                continue;
            }
            let spec = if resolve { resolve_spec(&spec, catalog)? } else { spec };
            for name in catalog.auto_register(spec, source)? {
                if !registered.contains(&name) {
                    registered.push(name);
                }
            }
        }
        self.loaded_specs.insert(source.to_string(), registered.clone());
        Ok(registered)
    }

    /// Adds an already built namespace.
    pub fn add_namespace(&mut self, namespace: HdSpecNamespace) -> Result<()> {
        let name = namespace.name().to_string();
        if self.namespaces.contains_key(&name) {
            return Err(HdError::catalog(format!("namespace '{name}' already exists")));
        }
        let catalog = namespace.catalog();
        for data_type in catalog.get_registered_types() {
            let source = catalog.get_spec_source_file(data_type)?;
            let types = self.loaded_specs.entry(source.to_string()).or_default();
            if !types.iter().any(|known| known == data_type) {
                types.push(data_type.to_string());
            }
        }
        self.included_sources
            .insert(name.clone(), namespace.get_source_files().into_iter().map(str::to_string).collect());
        self.namespaces.insert(name, namespace);
        Ok(())
    }

    /// Adds every namespace of `other` not loaded here. A namespace loaded
    /// in both with different content is an error.
    pub fn merge(&mut self, other: &HdNamespaceCatalog) -> Result<()> {
        for namespace in other.namespaces.values() {
            match self.namespaces.get(namespace.name()) {
                Some(existing) if existing.same_content(namespace.info(), &self.config.unversioned) => {}
                Some(existing) => {
                    return Err(HdError::catalog(format!(
                        "cannot merge namespace '{}' version {} into version {}",
                        namespace.name(),
                        namespace.version(),
                        existing.version()
                    )));
                }
                None => self.add_namespace(namespace.clone())?,
            }
        }
        Ok(())
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.namespaces.keys().map(String::as_str).collect()
    }

    pub fn get_namespace(&self, name: &str) -> Result<&HdSpecNamespace> {
        self.namespaces
            .get(name)
            .ok_or_else(|| HdError::lookup(format!("'{name}' not a namespace")))
    }

    pub fn get_spec(&self, namespace: &str, data_type: &str) -> Result<&HdSpec> {
        self.get_namespace(namespace)?.get_spec(data_type)
    }

    pub fn get_hierarchy(&self, namespace: &str, data_type: &str) -> Result<Vec<String>> {
        self.get_namespace(namespace)?.get_hierarchy(data_type)
    }

    /// True when `parent` appears in the hierarchy of `data_type`.
    pub fn is_sub_data_type(&self, namespace: &str, data_type: &str, parent: &str) -> Result<bool> {
        Ok(self
            .get_hierarchy(namespace, data_type)?
            .iter()
            .any(|ancestor| ancestor == parent))
    }

    /// Every schema source loaded so far.
    pub fn get_sources(&self) -> Vec<&str> {
        self.loaded_specs.keys().map(String::as_str).collect()
    }

    pub fn get_namespace_sources(&self, namespace: &str) -> Result<Vec<&str>> {
        self.get_namespace(namespace)?;
        Ok(self
            .included_sources
            .get(namespace)
            .map(|sources| sources.iter().map(String::as_str).collect())
            .unwrap_or_default())
    }

    /// Types registered from `source`; empty for unknown sources.
    pub fn get_types(&self, source: &str) -> Vec<&str> {
        self.loaded_specs
            .get(source)
            .map(|types| types.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Copies `data_type` and the types it depends on from an included
/// namespace into `catalog`.
fn register_type(
    data_type: &str,
    included: &HdSpecNamespace,
    catalog: &mut HdSpecCatalog,
    registered: &mut BTreeSet<String>,
) -> Result<()> {
    if !registered.insert(data_type.to_string()) {
        return Ok(());
    }
    let spec = included.get_spec(data_type)?;
    let source = included.catalog().get_spec_source_file(data_type)?;
    for dependency in spec.referenced_types() {
        register_type(&dependency, included, catalog, registered)?;
    }
    catalog.register_spec(spec.clone(), source)
}
