//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd project team.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use hdx::data_utils::{default_buffer_shape, default_chunk_shape};
use hdx::spec::HdShape;
use hdx::{
    assert_equal_shape, HdArrayDataSource, HdChunkIterConfig, HdChunkPlan, HdDataSource, HdDtype, HdError,
    HdShapeError, HdValue,
};
use proptest::prelude::*;

/// Reports a large shape without holding any data.
struct ShapeOnlySource {
    maxshape: HdShape,
    current: Option<Vec<usize>>,
}

impl HdDataSource for ShapeOnlySource {
    fn fetch(&self, selection: &[Range<usize>]) -> hdx::Result<HdValue> {
        let count: usize = selection.iter().map(|range| range.len()).product();
        Ok(HdValue::from(count))
    }

    fn max_shape(&self) -> HdShape {
        self.maxshape.clone()
    }

    fn dtype(&self) -> HdDtype {
        HdDtype::Float64
    }

    fn current_shape(&self) -> Option<Vec<usize>> {
        self.current.clone()
    }
}

fn large_source() -> Arc<dyn HdDataSource> {
    Arc::new(ShapeOnlySource {
        maxshape: vec![Some(20000), Some(5000)],
        current: None,
    })
}

#[test]
fn test_quadrant_buffers() {
    let config = HdChunkIterConfig::default().with_buffer_shape(vec![10000, 2500]);
    let plan = HdChunkPlan::new(large_source(), config).unwrap();
    assert_eq!(plan.num_buffers(), 4);

    let chunks: Vec<_> = plan.iter().collect::<hdx::Result<Vec<_>>>().unwrap();
    assert_eq!(chunks.len(), 4);
    let selections: Vec<Vec<Range<usize>>> = chunks.iter().map(|chunk| chunk.selection.clone()).collect();
    assert_eq!(
        selections,
        vec![
            vec![0..10000, 0..2500],
            vec![0..10000, 2500..5000],
            vec![10000..20000, 0..2500],
            vec![10000..20000, 2500..5000],
        ]
    );
    let covered: usize = chunks.iter().map(|chunk| chunk.shape().iter().product::<usize>()).sum();
    assert_eq!(covered, 20000 * 5000);
    for chunk in &chunks {
        assert_eq!(chunk.data, HdValue::from(10000usize * 2500));
        for (axis, size) in chunk.shape().iter().enumerate() {
            assert_eq!(size % plan.chunk_shape()[axis], 0);
        }
    }
}

#[test]
fn test_plan_is_restartable() {
    let config = HdChunkIterConfig::default().with_buffer_shape(vec![10000, 2500]);
    let plan = HdChunkPlan::new(large_source(), config).unwrap();
    let mut first = plan.iter();
    assert!(first.has_next());
    assert_eq!(first.size_hint(), (4, Some(4)));
    first.by_ref().for_each(drop);
    assert!(!first.has_next());
    assert!(first.next().is_none());
    assert_eq!(plan.iter().count(), 4);
}

#[test]
fn test_invalid_shapes_fail_before_iteration() {
    let too_big = HdChunkIterConfig::default().with_buffer_shape(vec![30000, 2500]);
    assert!(matches!(HdChunkPlan::new(large_source(), too_big), Err(HdError::Chunk { .. })));

    let not_multiple = HdChunkIterConfig::default()
        .with_chunk_shape(vec![300, 100])
        .with_buffer_shape(vec![1000, 1000]);
    assert!(matches!(HdChunkPlan::new(large_source(), not_multiple), Err(HdError::Chunk { .. })));

    let wrong_rank = HdChunkIterConfig::default().with_chunk_shape(vec![10]);
    assert!(HdChunkPlan::new(large_source(), wrong_rank).is_err());
}

#[test]
fn test_unbounded_axis_uses_current_shape() {
    let source = Arc::new(ShapeOnlySource {
        maxshape: vec![None, Some(4)],
        current: Some(vec![10, 4]),
    });
    let config = HdChunkIterConfig::default().with_buffer_shape(vec![4, 4]);
    let plan = HdChunkPlan::new(source, config).unwrap();
    let selections: Vec<_> = plan.iter().map(|chunk| chunk.unwrap().selection).collect();
    assert_eq!(selections, vec![vec![0..4, 0..4], vec![4..8, 0..4], vec![8..10, 0..4]]);

    let unknown = Arc::new(ShapeOnlySource {
        maxshape: vec![None],
        current: None,
    });
    assert!(HdChunkPlan::new(unknown, HdChunkIterConfig::default()).is_err());
}

#[test]
fn test_empty_axis_is_rejected() {
    let bounded = Arc::new(ShapeOnlySource {
        maxshape: vec![Some(0), Some(4)],
        current: None,
    });
    assert!(matches!(
        HdChunkPlan::new(bounded, HdChunkIterConfig::default()),
        Err(HdError::Chunk { .. })
    ));

    let grown = Arc::new(ShapeOnlySource {
        maxshape: vec![None, Some(4)],
        current: Some(vec![0, 4]),
    });
    assert!(matches!(
        HdChunkPlan::new(grown, HdChunkIterConfig::default()),
        Err(HdError::Chunk { .. })
    ));
}

#[test]
fn test_array_source_slices_rows() {
    let data = HdValue::from(vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]);
    let source = Arc::new(HdArrayDataSource::new(data).unwrap());
    assert_eq!(source.shape(), &[3, 3]);
    let config = HdChunkIterConfig::default()
        .with_chunk_shape(vec![1, 3])
        .with_buffer_shape(vec![2, 3]);
    let plan = HdChunkPlan::new(source, config).unwrap();
    let chunks: Vec<_> = plan.iter().map(|chunk| chunk.unwrap()).collect();
    assert_eq!(chunks[0].data, HdValue::from(vec![vec![1, 2, 3], vec![4, 5, 6]]));
    assert_eq!(chunks[1].data, HdValue::from(vec![vec![7, 8, 9]]));
}

#[test]
fn test_ragged_array_source_is_rejected() {
    let ragged = HdValue::List(vec![HdValue::from(vec![1, 2]), HdValue::from(vec![3])]);
    assert!(HdArrayDataSource::new(ragged).is_err());
}

#[test]
fn test_shape_comparison_errors() {
    let same = assert_equal_shape(&[Some(3), Some(4)], &[Some(3), Some(4)], None, ("a", "b"), false);
    assert!(same.result);
    assert!(same.error.is_none());

    let dims = assert_equal_shape(&[Some(3)], &[Some(3), Some(4)], None, ("a", "b"), false);
    assert_eq!(dims.error.map(|error| error.code()), Some("NUM_DIMS_ERROR"));

    let axes = assert_equal_shape(
        &[Some(3), Some(4)],
        &[Some(4)],
        Some((vec![0, 1], vec![0])),
        ("a", "b"),
        false,
    );
    assert_eq!(axes.error, Some(HdShapeError::NumAxes));

    let bounds = assert_equal_shape(&[Some(3)], &[Some(3)], Some((vec![2], vec![0])), ("a", "b"), false);
    assert_eq!(bounds.error, Some(HdShapeError::AxisOutOfBounds));

    let length = assert_equal_shape(&[Some(3), None], &[Some(5), Some(2)], None, ("a", "b"), true);
    assert_eq!(length.error, Some(HdShapeError::AxisLen));
    assert_eq!(length.unmatched, vec![(0, 0)]);
    assert_eq!(length.ignored, vec![(1, 1)]);
}

proptest! {
    #[test]
    fn prop_buffer_is_chunk_multiple_within_extents(
        extents in prop::collection::vec(1usize..5000, 1..4),
        chunk_bytes in 8usize..(1 << 20),
        buffer_bytes in 8usize..(1 << 26),
        itemsize in prop::sample::select(vec![1usize, 2, 4, 8]),
    ) {
        let chunk = default_chunk_shape(&extents, chunk_bytes, itemsize);
        let buffer = default_buffer_shape(&chunk, &extents, buffer_bytes, itemsize);
        prop_assert!(chunk.iter().product::<usize>() * itemsize <= chunk_bytes);
        for axis in 0..extents.len() {
            prop_assert!(chunk[axis] >= 1);
            prop_assert!(chunk[axis] <= extents[axis]);
            prop_assert_eq!(buffer[axis] % chunk[axis], 0);
            prop_assert!(buffer[axis] <= extents[axis]);
        }
    }

    #[test]
    fn prop_buffers_cover_every_element_once(
        rows in 1usize..60,
        cols in 1usize..60,
        buffer_rows in 1usize..20,
        buffer_cols in 1usize..20,
    ) {
        let buffer_rows = buffer_rows.min(rows);
        let buffer_cols = buffer_cols.min(cols);
        let source = Arc::new(ShapeOnlySource {
            maxshape: vec![Some(rows), Some(cols)],
            current: None,
        });
        let config = HdChunkIterConfig::default().with_buffer_shape(vec![buffer_rows, buffer_cols]);
        let plan = HdChunkPlan::new(source, config).unwrap();
        let mut seen = HashSet::new();
        for chunk in plan.iter() {
            let chunk = chunk.unwrap();
            for row in chunk.selection[0].clone() {
                for col in chunk.selection[1].clone() {
                    prop_assert!(seen.insert((row, col)));
                }
            }
            for (axis, size) in plan.buffer_shape().iter().enumerate() {
                prop_assert_eq!(size % plan.chunk_shape()[axis], 0);
            }
        }
        prop_assert_eq!(seen.len(), rows * cols);
    }
}
