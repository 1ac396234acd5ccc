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

//! # Hdx Core Library
//!
//! Schema-driven hierarchical data modeling. Data types are declared in
//! YAML schema files, loaded into namespaces, and used to translate typed
//! in-memory containers into storage-neutral builder trees and back.
//!
//! ## Module Overview
//!
//! - **spec**: Spec model, type catalog, namespaces, inheritance resolution
//!   and the YAML writer
//! - **container**: Container arena, field values and per-type class tables
//! - **build**: Builder trees, object mappers and the build manager
//! - **data_utils**: Chunked iteration over large datasets and shape checks
//! - **value**: Dynamic values held by attributes and datasets
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hdx::{HdBuildManager, HdContainerArena, HdNamespaceCatalog, HdTypeMap};
//!
//! let mut catalog = HdNamespaceCatalog::new();
//! catalog.load("schema/test.namespace.yaml")?;
//! let type_map = Arc::new(HdTypeMap::new(catalog));
//!
//! let mut arena = HdContainerArena::new();
//! let foo = arena.insert("Foo", "foo1", my_foo);
//! let mut manager = HdBuildManager::new(type_map);
//! let root = manager.build(&mut arena, foo)?;
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, HdError>`. Build and construct errors
//! name the data type and field that failed.

pub mod build;
pub mod container;
pub mod data_utils;
pub mod errors;
pub mod spec;
pub mod value;

pub use errors::{HdError, Result};
pub use value::HdValue;

pub use build::{
    HdBuildManager, HdBuildOptions, HdBuilderId, HdBuilderKind, HdBuilderNode, HdBuilderTree, HdBuilderValue,
    HdMapperProfile, HdObjectMapper, HdOverride, HdReference, HdSpecKey, HdTypeMap,
};
pub use container::{
    HdArgSpec, HdArgs, HdContainerArena, HdContainerClass, HdContainerId, HdContainerMeta, HdDynamicContainer,
    HdField,
};
pub use data_utils::{
    assert_equal_shape, HdArrayDataSource, HdChunkIterConfig, HdChunkIterator, HdChunkPlan, HdDataChunk,
    HdDataSource, HdSelection, HdShapeError, HdShapeValidatorResult,
};
pub use spec::{
    HdAttributeSpec, HdDatasetSpec, HdDtype, HdGroupSpec, HdLinkSpec, HdNamespaceCatalog, HdQuantity, HdSpec,
    HdSpecCatalog, HdSpecDtype,
};
