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

//! # Hdx Build Module
//!
//! Translation between container graphs and builder trees: the builder
//! arena storage backends read and write, the per-type object mappers, and
//! the manager that drives whole-graph passes.

pub mod builders;
pub mod manager;
pub mod objectmapper;

pub use builders::{HdBuilderId, HdBuilderKind, HdBuilderNode, HdBuilderTree, HdBuilderValue, HdReference};
pub use manager::{HdBuildManager, HdBuildOptions, HdTypeMap};
pub use objectmapper::{
    HdConstructorArgHook, HdMapperProfile, HdObjectAttrHook, HdObjectMapper, HdOverride, HdSpecKey,
};
