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

//! # Hdx Data Utilities Module
//!
//! Chunked iteration over large array sources.
//!
//! A [`HdChunkPlan`] fixes the chunk shape (storage granularity handed to a
//! backend) and the buffer shape (the unit of work of one iteration step).
//! Every buffer axis is an exact multiple of the chunk axis, so no storage
//! chunk is touched by two buffer writes. The plan is a restartable factory:
//! each call to [`HdChunkPlan::iter`] yields a fresh single-pass
//! [`HdChunkIterator`].
//!
//! ## Heuristics
//!
//! - Chunk shape: at most `chunk_bytes` (1 MiB by default), filled from the
//!   last axis towards the first so the first axis stays smallest.
//! - Buffer shape: the largest chunk multiple within the extents and
//!   `buffer_bytes` (1 GiB by default), filling earlier axes first.
//!
//! Also holds the shape comparison helper [`assert_equal_shape`].

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{HdError, Result};
use crate::spec::dtype::{HdDtype, HdShape};
use crate::value::HdValue;

/// Multi-dimensional index range, one half-open range per axis.
pub type HdSelection = Vec<Range<usize>>;

/// Array-like data that can be read one selection at a time.
pub trait HdDataSource: Send + Sync {
    /// Materializes the values inside `selection` as nested lists.
    fn fetch(&self, selection: &[Range<usize>]) -> Result<HdValue>;

    /// Maximum extent per axis, `None` for unbounded axes.
    fn max_shape(&self) -> HdShape;

    fn dtype(&self) -> HdDtype;

    /// Current extent per axis, needed to iterate unbounded axes.
    fn current_shape(&self) -> Option<Vec<usize>> {
        None
    }
}

/// Sizing of a chunk plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdChunkIterConfig {
    pub buffer_bytes: usize,
    pub chunk_bytes: usize,
    pub chunk_shape: Option<Vec<usize>>,
    pub buffer_shape: Option<Vec<usize>>,
}

impl Default for HdChunkIterConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 1 << 30,
            chunk_bytes: 1 << 20,
            chunk_shape: None,
            buffer_shape: None,
        }
    }
}

impl HdChunkIterConfig {
    pub fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = bytes;
        self
    }

    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes;
        self
    }

    pub fn with_chunk_shape(mut self, shape: Vec<usize>) -> Self {
        self.chunk_shape = Some(shape);
        self
    }

    pub fn with_buffer_shape(mut self, shape: Vec<usize>) -> Self {
        self.buffer_shape = Some(shape);
        self
    }
}

/// One buffer produced by an [`HdChunkIterator`].
#[derive(Debug, Clone, PartialEq)]
pub struct HdDataChunk {
    pub selection: HdSelection,
    pub data: HdValue,
}

impl HdDataChunk {
    pub fn shape(&self) -> Vec<usize> {
        self.selection.iter().map(|range| range.len()).collect()
    }
}

/// Validated chunk and buffer shapes over one data source.
#[derive(Clone)]
pub struct HdChunkPlan {
    source: Arc<dyn HdDataSource>,
    maxshape: HdShape,
    extents: Vec<usize>,
    dtype: HdDtype,
    chunk_shape: Vec<usize>,
    buffer_shape: Vec<usize>,
}

impl HdChunkPlan {
    pub fn new(source: Arc<dyn HdDataSource>, config: HdChunkIterConfig) -> Result<Self> {
        let maxshape = source.max_shape();
        let dtype = source.dtype();
        let extents = resolve_extents(&maxshape, source.current_shape())?;
        let itemsize = dtype.itemsize().max(1);

        let (chunk_shape, buffer_shape) = match (config.chunk_shape, config.buffer_shape) {
            (Some(chunk), Some(buffer)) => {
                check_axes("chunk_shape", &chunk, &maxshape)?;
                check_axes("buffer_shape", &buffer, &maxshape)?;
                check_multiple(&chunk, &buffer)?;
                (chunk, buffer)
            }
            (Some(chunk), None) => {
                check_axes("chunk_shape", &chunk, &maxshape)?;
                let buffer = default_buffer_shape(&chunk, &extents, config.buffer_bytes, itemsize);
                (chunk, buffer)
            }
            (None, Some(buffer)) => {
                check_axes("buffer_shape", &buffer, &maxshape)?;
                let chunk = chunk_dividing(&buffer, config.chunk_bytes, itemsize);
                (chunk, buffer)
            }
            (None, None) => {
                let chunk = default_chunk_shape(&extents, config.chunk_bytes, itemsize);
                let buffer = default_buffer_shape(&chunk, &extents, config.buffer_bytes, itemsize);
                (chunk, buffer)
            }
        };
        log::debug!("chunk plan over {extents:?}: chunk {chunk_shape:?}, buffer {buffer_shape:?}");

        Ok(Self {
            source,
            maxshape,
            extents,
            dtype,
            chunk_shape,
            buffer_shape,
        })
    }

    pub fn maxshape(&self) -> &HdShape {
        &self.maxshape
    }

    /// Extents iterated over: `maxshape` on bounded axes, the source's
    /// current shape on unbounded ones.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn dtype(&self) -> HdDtype {
        self.dtype
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_shape
    }

    pub fn buffer_shape(&self) -> &[usize] {
        &self.buffer_shape
    }

    pub fn source(&self) -> &Arc<dyn HdDataSource> {
        &self.source
    }

    /// Number of buffers a full iteration yields.
    pub fn num_buffers(&self) -> usize {
        self.extents
            .iter()
            .zip(&self.buffer_shape)
            .map(|(extent, buffer)| extent.div_ceil(*buffer))
            .product()
    }

    /// A fresh iterator over the whole source.
    pub fn iter(&self) -> HdChunkIterator {
        HdChunkIterator::new(self.clone())
    }
}

impl fmt::Debug for HdChunkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdChunkPlan")
            .field("maxshape", &self.maxshape)
            .field("extents", &self.extents)
            .field("dtype", &self.dtype)
            .field("chunk_shape", &self.chunk_shape)
            .field("buffer_shape", &self.buffer_shape)
            .finish()
    }
}

impl PartialEq for HdChunkPlan {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
            && self.chunk_shape == other.chunk_shape
            && self.buffer_shape == other.buffer_shape
    }
}

impl IntoIterator for &HdChunkPlan {
    type Item = Result<HdDataChunk>;
    type IntoIter = HdChunkIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Single-pass iterator over the buffers of a plan, last axis fastest.
pub struct HdChunkIterator {
    plan: HdChunkPlan,
    counts: Vec<usize>,
    position: Option<Vec<usize>>,
}

impl HdChunkIterator {
    fn new(plan: HdChunkPlan) -> Self {
        let counts: Vec<usize> = plan
            .extents
            .iter()
            .zip(&plan.buffer_shape)
            .map(|(extent, buffer)| extent.div_ceil(*buffer))
            .collect();
        let position = if counts.iter().any(|count| *count == 0) {
            None
        } else {
            Some(vec![0; counts.len()])
        };
        Self { plan, counts, position }
    }

    pub fn has_next(&self) -> bool {
        self.position.is_some()
    }

    fn advance(&mut self) {
        let Some(position) = self.position.as_mut() else {
            return;
        };
        for axis in (0..position.len()).rev() {
            position[axis] += 1;
            if position[axis] < self.counts[axis] {
                return;
            }
            position[axis] = 0;
        }
        self.position = None;
    }

    fn selection(&self, position: &[usize]) -> HdSelection {
        position
            .iter()
            .zip(&self.plan.buffer_shape)
            .zip(&self.plan.extents)
            .map(|((index, buffer), extent)| {
                let start = index * buffer;
                start..(start + buffer).min(*extent)
            })
            .collect()
    }
}

impl Iterator for HdChunkIterator {
    type Item = Result<HdDataChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.position.clone()?;
        let selection = self.selection(&position);
        self.advance();
        Some(
            self.plan
                .source
                .fetch(&selection)
                .map(|data| HdDataChunk { selection, data }),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let Some(position) = &self.position else {
            return (0, Some(0));
        };
        let mut done = 0;
        for (index, count) in position.iter().zip(&self.counts) {
            done = done * count + index;
        }
        let remaining = self.counts.iter().product::<usize>() - done;
        (remaining, Some(remaining))
    }
}

fn resolve_extents(maxshape: &HdShape, current: Option<Vec<usize>>) -> Result<Vec<usize>> {
    if let Some(current) = &current {
        if current.len() != maxshape.len() {
            return Err(HdError::chunk(format!(
                "current shape {current:?} does not match maxshape {maxshape:?}"
            )));
        }
    }
    maxshape
        .iter()
        .enumerate()
        .map(|(axis, limit)| match (limit, &current) {
            (Some(limit), _) => Ok(*limit),
            (None, Some(current)) => Ok(current[axis]),
            (None, None) => Err(HdError::chunk(format!(
                "axis {axis} is unbounded and the source reports no current shape"
            ))),
        })
        .map(|extent| match extent {
            Ok(0) => Err(HdError::chunk(format!("cannot iterate over an empty axis in {maxshape:?}"))),
            extent => extent,
        })
        .collect()
}

fn check_axes(label: &str, shape: &[usize], maxshape: &HdShape) -> Result<()> {
    if shape.len() != maxshape.len() {
        return Err(HdError::chunk(format!(
            "{label} {shape:?} has {} axes but maxshape {maxshape:?} has {}",
            shape.len(),
            maxshape.len()
        )));
    }
    for (axis, (size, limit)) in shape.iter().zip(maxshape).enumerate() {
        if *size == 0 {
            return Err(HdError::chunk(format!("{label} {shape:?} has a zero extent on axis {axis}")));
        }
        if let Some(limit) = limit {
            if size > limit {
                return Err(HdError::chunk(format!(
                    "{label} {shape:?} exceeds maxshape {maxshape:?} on axis {axis}"
                )));
            }
        }
    }
    Ok(())
}

fn check_multiple(chunk: &[usize], buffer: &[usize]) -> Result<()> {
    for (axis, (chunk_size, buffer_size)) in chunk.iter().zip(buffer).enumerate() {
        if buffer_size % chunk_size != 0 {
            return Err(HdError::chunk(format!(
                "buffer_shape {buffer:?} is not a multiple of chunk_shape {chunk:?} on axis {axis}"
            )));
        }
    }
    Ok(())
}

/// Chunk within `chunk_bytes`, trailing axes filled first.
pub fn default_chunk_shape(extents: &[usize], chunk_bytes: usize, itemsize: usize) -> Vec<usize> {
    let mut remaining = (chunk_bytes / itemsize.max(1)).max(1);
    let mut chunk = vec![1; extents.len()];
    for axis in (0..extents.len()).rev() {
        let size = extents[axis].max(1).min(remaining).max(1);
        chunk[axis] = size;
        remaining /= size;
    }
    chunk
}

/// Largest chunk multiple within `extents` and `buffer_bytes`, earlier axes
/// filled first.
pub fn default_buffer_shape(chunk: &[usize], extents: &[usize], buffer_bytes: usize, itemsize: usize) -> Vec<usize> {
    let budget = (buffer_bytes / itemsize.max(1)).max(1);
    let mut buffer = chunk.to_vec();
    for axis in 0..chunk.len() {
        let others: usize = buffer
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != axis)
            .map(|(_, size)| *size)
            .product();
        let by_extent = (extents[axis] / chunk[axis]).max(1);
        let by_budget = (budget / (others.max(1) * chunk[axis])).max(1);
        buffer[axis] = chunk[axis] * by_extent.min(by_budget);
    }
    buffer
}

fn chunk_dividing(buffer: &[usize], chunk_bytes: usize, itemsize: usize) -> Vec<usize> {
    default_chunk_shape(buffer, chunk_bytes, itemsize)
        .into_iter()
        .zip(buffer)
        .map(|(target, size)| (1..=target).rev().find(|c| size % c == 0).unwrap_or(1))
        .collect()
}

/// In-memory row-major source backed by nested [`HdValue`] lists.
#[derive(Debug, Clone)]
pub struct HdArrayDataSource {
    data: HdValue,
    shape: Vec<usize>,
    dtype: HdDtype,
}

impl HdArrayDataSource {
    pub fn new(data: HdValue) -> Result<Self> {
        let shape = data
            .shape()
            .ok_or_else(|| HdError::chunk("cannot iterate over ragged data"))?;
        let dtype = HdDtype::infer(&data).unwrap_or(HdDtype::Float64);
        Ok(Self { data, shape, dtype })
    }

    pub fn with_dtype(mut self, dtype: HdDtype) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl HdDataSource for HdArrayDataSource {
    fn fetch(&self, selection: &[Range<usize>]) -> Result<HdValue> {
        if selection.len() != self.shape.len() {
            return Err(HdError::chunk(format!(
                "selection {selection:?} does not match data shape {:?}",
                self.shape
            )));
        }
        slice_value(&self.data, selection)
    }

    fn max_shape(&self) -> HdShape {
        self.shape.iter().map(|size| Some(*size)).collect()
    }

    fn dtype(&self) -> HdDtype {
        self.dtype
    }

    fn current_shape(&self) -> Option<Vec<usize>> {
        Some(self.shape.clone())
    }
}

fn slice_value(value: &HdValue, selection: &[Range<usize>]) -> Result<HdValue> {
    let Some((range, rest)) = selection.split_first() else {
        return Ok(value.clone());
    };
    let items = value
        .as_list()
        .ok_or_else(|| HdError::chunk("selection has more axes than the data"))?;
    let picked = items
        .get(range.clone())
        .ok_or_else(|| HdError::chunk(format!("selection {range:?} out of bounds for axis of {}", items.len())))?;
    picked
        .iter()
        .map(|item| slice_value(item, rest))
        .collect::<Result<Vec<_>>>()
        .map(HdValue::List)
}

/// Error classes reported by [`assert_equal_shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdShapeError {
    NumDims,
    NumAxes,
    AxisOutOfBounds,
    AxisLen,
}

impl HdShapeError {
    pub fn code(&self) -> &'static str {
        match self {
            HdShapeError::NumDims => "NUM_DIMS_ERROR",
            HdShapeError::NumAxes => "NUM_AXES_ERROR",
            HdShapeError::AxisOutOfBounds => "AXIS_OUT_OF_BOUNDS",
            HdShapeError::AxisLen => "AXIS_LEN_ERROR",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            HdShapeError::NumDims => "Unequal number of dimensions.",
            HdShapeError::NumAxes => "Unequal number of axes for comparison.",
            HdShapeError::AxisOutOfBounds => "Axis index for comparison out of bounds.",
            HdShapeError::AxisLen => "Unequal length of axes.",
        }
    }
}

/// Outcome of comparing two shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdShapeValidatorResult {
    pub result: bool,
    pub message: String,
    pub error: Option<HdShapeError>,
    pub ignored: Vec<(usize, usize)>,
    pub unmatched: Vec<(usize, usize)>,
    pub shape1: HdShape,
    pub shape2: HdShape,
    pub axes1: Vec<usize>,
    pub axes2: Vec<usize>,
}

impl HdShapeValidatorResult {
    fn failed(mut self, error: HdShapeError, detail: String) -> Self {
        self.result = false;
        self.error = Some(error);
        self.message = format!("{} {detail}", error.message());
        self
    }
}

/// Compares `shape1` and `shape2` along the paired axes (all axes in order
/// when `axes` is `None`). With `ignore_undetermined`, axes of unknown
/// length never count as a mismatch.
pub fn assert_equal_shape(
    shape1: &[Option<usize>],
    shape2: &[Option<usize>],
    axes: Option<(Vec<usize>, Vec<usize>)>,
    names: (&str, &str),
    ignore_undetermined: bool,
) -> HdShapeValidatorResult {
    let (name1, name2) = names;
    let explicit_axes = axes.is_some();
    let (axes1, axes2) = axes.unwrap_or_else(|| ((0..shape1.len()).collect(), (0..shape2.len()).collect()));
    let response = HdShapeValidatorResult {
        result: false,
        message: String::new(),
        error: None,
        ignored: Vec::new(),
        unmatched: Vec::new(),
        shape1: shape1.to_vec(),
        shape2: shape2.to_vec(),
        axes1,
        axes2,
    };

    if !explicit_axes && shape1.len() != shape2.len() {
        let detail = format!("{name1} is {}D and {name2} is {}D", shape1.len(), shape2.len());
        return response.failed(HdShapeError::NumDims, detail);
    }
    if response.axes1.len() != response.axes2.len() {
        let detail = format!("Cannot compare axes {:?} with {:?}", response.axes1, response.axes2);
        return response.failed(HdShapeError::NumAxes, detail);
    }
    let max1 = response.axes1.iter().max().copied();
    let max2 = response.axes2.iter().max().copied();
    if let Some(max1) = max1.filter(|max| *max >= shape1.len()) {
        let detail = format!(
            "Insufficient number of dimensions for {name1} -- Expected {} found {}",
            max1 + 1,
            shape1.len()
        );
        return response.failed(HdShapeError::AxisOutOfBounds, detail);
    }
    if let Some(max2) = max2.filter(|max| *max >= shape2.len()) {
        let detail = format!(
            "Insufficient number of dimensions for {name2} -- Expected {} found {}",
            max2 + 1,
            shape2.len()
        );
        return response.failed(HdShapeError::AxisOutOfBounds, detail);
    }

    let mut response = response;
    for (ax1, ax2) in response.axes1.iter().copied().zip(response.axes2.iter().copied()) {
        let (len1, len2) = (shape1[ax1], shape2[ax2]);
        if len1 != len2 {
            if ignore_undetermined && (len1.is_none() || len2.is_none()) {
                response.ignored.push((ax1, ax2));
            } else {
                response.unmatched.push((ax1, ax2));
            }
        }
    }
    let ignored_note = if response.ignored.is_empty() {
        String::new()
    } else {
        format!(" Ignored undetermined axes {:?}", response.ignored)
    };
    if response.unmatched.is_empty() {
        response.result = true;
        response.message = format!("All required axes matched{ignored_note}");
        return response;
    }
    let detail = format!(
        "Axes {:?} with size {:?} of {name1} did not match dimensions {:?} with sizes {:?} of {name2}.{ignored_note}",
        response.unmatched.iter().map(|(a, _)| *a).collect::<Vec<_>>(),
        response.unmatched.iter().map(|(a, _)| shape1[*a]).collect::<Vec<_>>(),
        response.unmatched.iter().map(|(_, b)| *b).collect::<Vec<_>>(),
        response.unmatched.iter().map(|(_, b)| shape2[*b]).collect::<Vec<_>>(),
    );
    response.failed(HdShapeError::AxisLen, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: usize, cols: usize) -> HdValue {
        HdValue::List(
            (0..rows)
                .map(|r| HdValue::List((0..cols).map(|c| HdValue::Int((r * cols + c) as i64)).collect()))
                .collect(),
        )
    }

    #[test]
    fn array_source_yields_row_major_buffers() {
        let source = Arc::new(HdArrayDataSource::new(grid(4, 4)).unwrap());
        let config = HdChunkIterConfig::default().with_buffer_shape(vec![2, 2]);
        let plan = HdChunkPlan::new(source, config).unwrap();
        let chunks: Vec<HdDataChunk> = plan.iter().collect::<Result<_>>().unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[1].selection, vec![0..2, 2..4]);
        assert_eq!(chunks[0].data, HdValue::from(vec![vec![0, 1], vec![4, 5]]));
    }

    #[test]
    fn iterator_is_single_pass_but_plan_restarts() {
        let source = Arc::new(HdArrayDataSource::new(grid(2, 2)).unwrap());
        let plan = HdChunkPlan::new(source, HdChunkIterConfig::default()).unwrap();
        let mut iter = plan.iter();
        assert!(iter.by_ref().count() > 0);
        assert!(!iter.has_next());
        assert!(iter.next().is_none());
        assert_eq!(plan.iter().count(), plan.num_buffers());
    }

    #[test]
    fn shape_comparison_reports_error_class() {
        let result = assert_equal_shape(&[Some(3), Some(4)], &[Some(3)], None, ("a", "b"), true);
        assert_eq!(result.error.map(|e| e.code()), Some("NUM_DIMS_ERROR"));
        let result = assert_equal_shape(&[Some(3), None], &[Some(3), Some(5)], None, ("a", "b"), true);
        assert!(result.result);
        assert_eq!(result.ignored, vec![(1, 1)]);
    }
}
