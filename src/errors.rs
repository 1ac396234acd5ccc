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

//! # Hdx Error Module
//!
//! This module defines the error types and utilities used throughout Hdx
//! for consistent error handling and reporting.
//!
//! ## Error Handling Philosophy
//!
//! Every failure in Hdx is a contract violation by a schema author or a
//! programmer, never a transient condition. Nothing is retried internally:
//!
//! - **Explicit Error Types**: Each variant names the stage that failed
//!   (schema construction, catalog registration, build, construct, chunking)
//! - **Context-Rich**: Build and construct errors carry the container type
//!   and the offending field so the failing spec location can be found
//! - **Serde Support**: Errors can be serialized for logging and reports
//!
//! ## Error Categories
//!
//! - **Io**: Filesystem errors while reading or writing spec files
//! - **Serde**: YAML/JSON (de)serialization errors
//! - **Schema**: Malformed specifications (dtype, shape/dims, quantity, links)
//! - **Catalog**: Duplicate registrations and unresolved `data_type_inc`
//! - **Lookup**: Unknown type, namespace, or builder
//! - **Build**: Container to builder translation failures
//! - **Construct**: Builder to container translation failures
//! - **Chunk**: Inconsistent chunk/buffer shapes
//! - **Validation**: Invalid arguments to public APIs
//! - **Internal**: Unexpected internal failures
//!
//! ## Usage
//!
//! ```rust
//! use hdx::errors::{Result, HdError};
//!
//! fn check_name(name: &str) -> Result<()> {
//!     if name.chars().any(char::is_whitespace) {
//!         return Err(HdError::validation("'name' must not contain any whitespace"));
//!     }
//!     Ok(())
//! }
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type used throughout Hdx.
pub type Result<T> = std::result::Result<T, HdError>;

/// Canonical error enumeration for Hdx.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum HdError {
    /// Errors originating from filesystem IO.
    #[error("io error: {0}")]
    Io(String),

    /// Wrapper for YAML/JSON serialization issues.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Malformed specification detected while constructing a spec.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Conflicting or unresolvable registrations in a catalog.
    #[error("catalog error: {message}")]
    Catalog { message: String },

    /// A requested type, namespace, builder or container does not exist.
    #[error("lookup error: {message}")]
    Lookup { message: String },

    /// Failure while converting a container into a builder.
    #[error("build error for {data_type} field '{field}': {message}")]
    Build {
        data_type: String,
        field: String,
        message: String,
    },

    /// Failure while converting a builder into a container.
    #[error("construct error for {data_type} field '{field}': {message}")]
    Construct {
        data_type: String,
        field: String,
        message: String,
    },

    /// Chunk or buffer shapes violating the iteration invariants.
    #[error("chunk error: {message}")]
    Chunk { message: String },

    /// Validation errors triggered by invalid parameters or inputs.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Catch-all variant for unexpected situations.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for HdError {
    fn from(err: io::Error) -> Self {
        HdError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HdError {
    fn from(err: serde_json::Error) -> Self {
        HdError::Serde(err.to_string())
    }
}

impl From<serde_yaml::Error> for HdError {
    fn from(err: serde_yaml::Error) -> Self {
        HdError::Serde(err.to_string())
    }
}

impl HdError {
    /// Helper to construct schema errors.
    pub fn schema<T: Into<String>>(message: T) -> Self {
        HdError::Schema {
            message: message.into(),
        }
    }

    /// Helper to construct catalog errors.
    pub fn catalog<T: Into<String>>(message: T) -> Self {
        HdError::Catalog {
            message: message.into(),
        }
    }

    /// Helper to construct lookup errors.
    pub fn lookup<T: Into<String>>(message: T) -> Self {
        HdError::Lookup {
            message: message.into(),
        }
    }

    /// Helper to construct build errors.
    pub fn build(
        data_type: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        HdError::Build {
            data_type: data_type.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Helper to construct construct errors.
    pub fn construct(
        data_type: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        HdError::Construct {
            data_type: data_type.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Helper to construct chunk errors.
    pub fn chunk<T: Into<String>>(message: T) -> Self {
        HdError::Chunk {
            message: message.into(),
        }
    }

    /// Helper to construct simple validation errors.
    pub fn validation<T: Into<String>>(message: T) -> Self {
        HdError::Validation {
            message: message.into(),
        }
    }

    /// Helper to construct internal errors.
    pub fn internal<T: Into<String>>(message: T) -> Self {
        HdError::Internal(message.into())
    }

    /// Name of the field a build or construct error refers to.
    pub fn field(&self) -> Option<&str> {
        match self {
            HdError::Build { field, .. } | HdError::Construct { field, .. } => Some(field),
            _ => None,
        }
    }
}
