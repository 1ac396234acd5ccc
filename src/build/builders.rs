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

//! # Hdx Builder Tree Module
//!
//! Backend-neutral representation of a stored hierarchy. Every node lives in
//! an [`HdBuilderTree`] arena and is addressed by an [`HdBuilderId`]; a
//! parent owns its children by id while links and references hold ids of
//! nodes owned elsewhere.
//!
//! Within one group, groups, datasets and links share a single name space:
//! setting a child under a name taken by a child of another kind fails.
//! Dataset data and dtype are write-once.

use std::fmt;
use std::ops::Range;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data_utils::HdChunkPlan;
use crate::errors::{HdError, Result};
use crate::spec::attribute::HdSpecDtype;
use crate::spec::dtype::HdShape;
use crate::value::HdValue;

/// Index of a node in an [`HdBuilderTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HdBuilderId(usize);

impl HdBuilderId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for HdBuilderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "builder#{}", self.0)
    }
}

/// A reference to another builder, stored as attribute or dataset data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HdReference {
    Object(HdBuilderId),
    Region {
        target: HdBuilderId,
        region: Vec<Range<usize>>,
    },
}

impl HdReference {
    pub fn target(&self) -> HdBuilderId {
        match self {
            HdReference::Object(target) => *target,
            HdReference::Region { target, .. } => *target,
        }
    }
}

/// Data held by an attribute or dataset builder.
#[derive(Clone, Debug, PartialEq)]
pub enum HdBuilderValue {
    Value(HdValue),
    Reference(HdReference),
    References(Vec<HdReference>),
    /// Data streamed from a source when the backend writes it.
    Chunked(HdChunkPlan),
}

impl HdBuilderValue {
    pub fn as_value(&self) -> Option<&HdValue> {
        match self {
            HdBuilderValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn references(&self) -> Vec<&HdReference> {
        match self {
            HdBuilderValue::Reference(reference) => vec![reference],
            HdBuilderValue::References(references) => references.iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<HdValue> for HdBuilderValue {
    fn from(value: HdValue) -> Self {
        HdBuilderValue::Value(value)
    }
}

impl From<HdReference> for HdBuilderValue {
    fn from(reference: HdReference) -> Self {
        HdBuilderValue::Reference(reference)
    }
}

impl From<HdChunkPlan> for HdBuilderValue {
    fn from(plan: HdChunkPlan) -> Self {
        HdBuilderValue::Chunked(plan)
    }
}

/// Node payload per builder kind.
#[derive(Clone, Debug, PartialEq)]
pub enum HdBuilderKind {
    Group {
        children: IndexMap<String, HdBuilderId>,
    },
    Dataset {
        data: Option<HdBuilderValue>,
        dtype: Option<HdSpecDtype>,
        maxshape: Option<HdShape>,
        chunks: Option<Vec<usize>>,
    },
    Link {
        target: HdBuilderId,
    },
}

impl HdBuilderKind {
    fn label(&self) -> &'static str {
        match self {
            HdBuilderKind::Group { .. } => "group",
            HdBuilderKind::Dataset { .. } => "dataset",
            HdBuilderKind::Link { .. } => "link",
        }
    }
}

/// One node of the builder tree.
#[derive(Clone, Debug, PartialEq)]
pub struct HdBuilderNode {
    name: String,
    parent: Option<HdBuilderId>,
    source: Option<String>,
    attributes: IndexMap<String, HdBuilderValue>,
    written: bool,
    kind: HdBuilderKind,
}

impl HdBuilderNode {
    fn new(name: &str, kind: HdBuilderKind) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            source: None,
            attributes: IndexMap::new(),
            written: false,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<HdBuilderId> {
        self.parent
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn attributes(&self) -> &IndexMap<String, HdBuilderValue> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&HdBuilderValue> {
        self.attributes.get(name)
    }

    pub fn written(&self) -> bool {
        self.written
    }

    pub fn kind(&self) -> &HdBuilderKind {
        &self.kind
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, HdBuilderKind::Group { .. })
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self.kind, HdBuilderKind::Dataset { .. })
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, HdBuilderKind::Link { .. })
    }

    pub fn data(&self) -> Option<&HdBuilderValue> {
        match &self.kind {
            HdBuilderKind::Dataset { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    pub fn dtype(&self) -> Option<&HdSpecDtype> {
        match &self.kind {
            HdBuilderKind::Dataset { dtype, .. } => dtype.as_ref(),
            _ => None,
        }
    }

    pub fn maxshape(&self) -> Option<&HdShape> {
        match &self.kind {
            HdBuilderKind::Dataset { maxshape, .. } => maxshape.as_ref(),
            _ => None,
        }
    }

    pub fn chunks(&self) -> Option<&[usize]> {
        match &self.kind {
            HdBuilderKind::Dataset { chunks, .. } => chunks.as_deref(),
            _ => None,
        }
    }

    pub fn link_target(&self) -> Option<HdBuilderId> {
        match &self.kind {
            HdBuilderKind::Link { target } => Some(*target),
            _ => None,
        }
    }

    fn children(&self) -> Option<&IndexMap<String, HdBuilderId>> {
        match &self.kind {
            HdBuilderKind::Group { children } => Some(children),
            _ => None,
        }
    }
}

/// Arena of builder nodes. Removed nodes leave tombstones so ids stay
/// stable.
#[derive(Clone, Debug, Default)]
pub struct HdBuilderTree {
    nodes: Vec<Option<HdBuilderNode>>,
}

impl HdBuilderTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: HdBuilderNode) -> HdBuilderId {
        self.nodes.push(Some(node));
        HdBuilderId(self.nodes.len() - 1)
    }

    /// Creates a detached group builder.
    pub fn new_group(&mut self, name: &str, source: Option<&str>) -> HdBuilderId {
        let mut node = HdBuilderNode::new(
            name,
            HdBuilderKind::Group {
                children: IndexMap::new(),
            },
        );
        node.source = source.map(str::to_string);
        self.push(node)
    }

    /// Creates a detached dataset builder.
    pub fn new_dataset(&mut self, name: &str, data: Option<HdBuilderValue>, dtype: Option<HdSpecDtype>) -> HdBuilderId {
        self.push(HdBuilderNode::new(
            name,
            HdBuilderKind::Dataset {
                data,
                dtype,
                maxshape: None,
                chunks: None,
            },
        ))
    }

    /// Creates a detached link builder.
    pub fn new_link(&mut self, name: &str, target: HdBuilderId) -> Result<HdBuilderId> {
        self.get(target)?;
        Ok(self.push(HdBuilderNode::new(name, HdBuilderKind::Link { target })))
    }

    pub fn get(&self, id: HdBuilderId) -> Result<&HdBuilderNode> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| HdError::lookup(format!("{id} does not exist")))
    }

    fn get_mut(&mut self, id: HdBuilderId) -> Result<&mut HdBuilderNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| HdError::lookup(format!("{id} does not exist")))
    }

    pub fn contains(&self, id: HdBuilderId) -> bool {
        self.get(id).is_ok()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn attach(&mut self, parent: HdBuilderId, child: HdBuilderId, expected: &str) -> Result<()> {
        let (name, kind) = {
            let node = self.get(child)?;
            (node.name.clone(), node.kind.label())
        };
        if kind != expected {
            return Err(HdError::validation(format!(
                "{child} is a {kind} builder, not a {expected} builder"
            )));
        }
        let existing = {
            let parent_node = self.get(parent)?;
            let children = parent_node.children().ok_or_else(|| {
                HdError::validation(format!("'{}' is not a group builder", parent_node.name))
            })?;
            children.get(&name).copied()
        };
        if let Some(existing) = existing {
            let existing_kind = self.get(existing)?.kind.label();
            if existing_kind != expected {
                return Err(HdError::validation(format!(
                    "'{name}' already exists as a {existing_kind} in '{}', cannot set a {expected}",
                    self.path(parent)?
                )));
            }
            if existing != child {
                self.get_mut(existing)?.parent = None;
            }
        }
        if let HdBuilderKind::Group { children } = &mut self.get_mut(parent)?.kind {
            children.insert(name, child);
        }
        self.get_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn set_group(&mut self, parent: HdBuilderId, child: HdBuilderId) -> Result<()> {
        self.attach(parent, child, "group")
    }

    pub fn set_dataset(&mut self, parent: HdBuilderId, child: HdBuilderId) -> Result<()> {
        self.attach(parent, child, "dataset")
    }

    pub fn set_link(&mut self, parent: HdBuilderId, child: HdBuilderId) -> Result<()> {
        self.attach(parent, child, "link")
    }

    /// Creates a group named `name` under `parent`.
    pub fn add_group(&mut self, parent: HdBuilderId, name: &str) -> Result<HdBuilderId> {
        let source = self.get(parent)?.source.clone();
        let child = self.new_group(name, source.as_deref());
        self.set_group(parent, child)?;
        Ok(child)
    }

    /// Creates a dataset named `name` under `parent`.
    pub fn add_dataset(
        &mut self,
        parent: HdBuilderId,
        name: &str,
        data: Option<HdBuilderValue>,
        dtype: Option<HdSpecDtype>,
    ) -> Result<HdBuilderId> {
        let child = self.new_dataset(name, data, dtype);
        self.set_dataset(parent, child)?;
        Ok(child)
    }

    /// Creates a link named `name` under `parent` pointing at `target`.
    pub fn add_link(&mut self, parent: HdBuilderId, name: &str, target: HdBuilderId) -> Result<HdBuilderId> {
        let child = self.new_link(name, target)?;
        self.set_link(parent, child)?;
        Ok(child)
    }

    pub fn set_attribute(&mut self, id: HdBuilderId, name: &str, value: impl Into<HdBuilderValue>) -> Result<()> {
        self.get_mut(id)?.attributes.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn set_source(&mut self, id: HdBuilderId, source: &str) -> Result<()> {
        self.get_mut(id)?.source = Some(source.to_string());
        Ok(())
    }

    pub fn set_written(&mut self, id: HdBuilderId, written: bool) -> Result<()> {
        self.get_mut(id)?.written = written;
        Ok(())
    }

    fn dataset_mut(&mut self, id: HdBuilderId) -> Result<&mut HdBuilderKind> {
        let node = self.get_mut(id)?;
        match &node.kind {
            HdBuilderKind::Dataset { .. } => Ok(&mut node.kind),
            _ => Err(HdError::validation(format!("'{}' is not a dataset builder", node.name))),
        }
    }

    /// Sets dataset data. Data cannot be overwritten once set.
    pub fn set_data(&mut self, id: HdBuilderId, value: impl Into<HdBuilderValue>) -> Result<()> {
        if let HdBuilderKind::Dataset { data, .. } = self.dataset_mut(id)? {
            if data.is_some() {
                return Err(HdError::validation(format!("cannot overwrite data of {id}")));
            }
            *data = Some(value.into());
        }
        Ok(())
    }

    /// Sets dataset dtype. The dtype cannot be overwritten once set.
    pub fn set_dtype(&mut self, id: HdBuilderId, value: HdSpecDtype) -> Result<()> {
        if let HdBuilderKind::Dataset { dtype, .. } = self.dataset_mut(id)? {
            if dtype.is_some() {
                return Err(HdError::validation(format!("cannot overwrite dtype of {id}")));
            }
            *dtype = Some(value);
        }
        Ok(())
    }

    pub fn set_maxshape(&mut self, id: HdBuilderId, value: HdShape) -> Result<()> {
        if let HdBuilderKind::Dataset { maxshape, .. } = self.dataset_mut(id)? {
            *maxshape = Some(value);
        }
        Ok(())
    }

    pub fn set_chunks(&mut self, id: HdBuilderId, value: Vec<usize>) -> Result<()> {
        if let HdBuilderKind::Dataset { chunks, .. } = self.dataset_mut(id)? {
            *chunks = Some(value);
        }
        Ok(())
    }

    /// Child of `parent` named `name`, of any kind.
    pub fn get_child(&self, parent: HdBuilderId, name: &str) -> Option<HdBuilderId> {
        self.get(parent).ok()?.children()?.get(name).copied()
    }

    fn children_of_kind(&self, parent: HdBuilderId, pick: fn(&HdBuilderNode) -> bool) -> Vec<HdBuilderId> {
        let Ok(node) = self.get(parent) else {
            return Vec::new();
        };
        node.children()
            .map(|children| {
                children
                    .values()
                    .copied()
                    .filter(|child| self.get(*child).map(pick).unwrap_or(false))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn groups(&self, parent: HdBuilderId) -> Vec<HdBuilderId> {
        self.children_of_kind(parent, HdBuilderNode::is_group)
    }

    pub fn datasets(&self, parent: HdBuilderId) -> Vec<HdBuilderId> {
        self.children_of_kind(parent, HdBuilderNode::is_dataset)
    }

    pub fn links(&self, parent: HdBuilderId) -> Vec<HdBuilderId> {
        self.children_of_kind(parent, HdBuilderNode::is_link)
    }

    /// Follows `a/b/c` from `start`.
    pub fn lookup(&self, start: HdBuilderId, path: &str) -> Option<HdBuilderId> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(start, |current, part| self.get_child(current, part))
    }

    /// Slash-joined names from the root down to `id`.
    pub fn path(&self, id: HdBuilderId) -> Result<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id)?;
            names.push(node.name.clone());
            current = node.parent;
            if names.len() > self.nodes.len() {
                return Err(HdError::internal(format!("parent cycle at {id}")));
            }
        }
        names.reverse();
        Ok(names.join("/"))
    }

    /// Topmost ancestor of `id`.
    pub fn root(&self, id: HdBuilderId) -> Result<HdBuilderId> {
        let mut current = id;
        while let Some(parent) = self.get(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// True when a group holds no datasets, links or attributes and all its
    /// subgroups are empty. Datasets are empty when they hold no data.
    pub fn is_empty_node(&self, id: HdBuilderId) -> Result<bool> {
        let node = self.get(id)?;
        if !node.attributes.is_empty() {
            return Ok(false);
        }
        match &node.kind {
            HdBuilderKind::Group { children } => {
                for child in children.values() {
                    let child_node = self.get(*child)?;
                    if !child_node.is_group() || !self.is_empty_node(*child)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            HdBuilderKind::Dataset { data, .. } => Ok(data.is_none()),
            HdBuilderKind::Link { .. } => Ok(false),
        }
    }

    /// Removes `id` and every node it owns, detaching it from its parent.
    pub fn remove_subtree(&mut self, id: HdBuilderId) -> Result<()> {
        let parent = self.get(id)?.parent;
        let name = self.get(id)?.name.clone();
        if let Some(parent) = parent {
            if let Ok(HdBuilderNode {
                kind: HdBuilderKind::Group { children },
                ..
            }) = self.get_mut(parent)
            {
                if children.get(&name) == Some(&id) {
                    children.shift_remove(&name);
                }
            }
        }
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) else {
                continue;
            };
            if let HdBuilderKind::Group { children } = node.kind {
                // Children re-parented elsewhere are not owned here.
                pending.extend(children.values().copied().filter(|child| {
                    self.get(*child).map(|c| c.parent == Some(current)).unwrap_or(false)
                }));
            }
        }
        Ok(())
    }

    /// Arena length, used as a rollback mark.
    pub(crate) fn mark(&self) -> usize {
        self.nodes.len()
    }

    /// Drops every node created after `mark` and unhooks surviving nodes
    /// from them.
    pub(crate) fn rollback(&mut self, mark: usize) {
        self.nodes.truncate(mark);
        for node in self.nodes.iter_mut().flatten() {
            if node.parent.is_some_and(|parent| parent.0 >= mark) {
                node.parent = None;
            }
            if let HdBuilderKind::Group { children } = &mut node.kind {
                children.retain(|_, child| child.0 < mark);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_is_write_once() {
        let mut tree = HdBuilderTree::new();
        let root = tree.new_group("root", None);
        let data = tree.add_dataset(root, "data", None, None).unwrap();
        tree.set_data(data, HdValue::from(vec![1, 2, 3])).unwrap();
        assert!(tree.set_data(data, HdValue::from(1)).is_err());
    }

    #[test]
    fn rollback_discards_new_nodes() {
        let mut tree = HdBuilderTree::new();
        let root = tree.new_group("root", None);
        let mark = tree.mark();
        tree.add_group(root, "child").unwrap();
        tree.rollback(mark);
        assert_eq!(tree.len(), 1);
        assert!(tree.groups(root).is_empty());
    }
}
