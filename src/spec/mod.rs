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

//! # Hdx Spec Module
//!
//! The schema language: specs for groups, datasets, attributes and links,
//! the catalog of registered data types, namespaces that load schema files,
//! inheritance resolution, and the YAML writer.

pub mod attribute;
pub mod catalog;
pub mod dtype;
pub mod namespace;
pub mod quantity;
pub mod resolve;
pub mod storage;
pub mod write;

pub use attribute::{HdAttributeSpec, HdAttributeSpecBuilder, HdDtypeSpec, HdRefSpec, HdRefType, HdSpecDtype};
pub use catalog::{spec_digest, HdSpecCatalog, HdTypeTree};
pub use dtype::{check_shape_dims, HdDimsSpec, HdDtype, HdShape, HdShapeSpec};
pub use namespace::{
    HdNamespaceCatalog, HdNamespaceConfig, HdNamespaceDeps, HdNamespaceInfo, HdPeople, HdSchemaEntry,
    HdSpecFile, HdSpecNamespace, HdSpecReader, HdYamlSpecReader,
};
pub use quantity::HdQuantity;
pub use resolve::resolve_spec;
pub use storage::{
    child_key, HdChildKind, HdDatasetSpec, HdDatasetSpecBuilder, HdGroupSpec, HdGroupSpecBuilder, HdLinkSpec,
    HdSpec, HdSpecRef,
};
pub use write::{export_spec, HdIncludeFrom, HdNamespaceBuilder, HdSpecWriter, HdWriterConfig, HdYamlSpecWriter};
