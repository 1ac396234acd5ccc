//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Hdx.
//! The Hdx project belongs to the Dunimd project team.

use std::hint::black_box;
use std::ops::Range;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use hdx::spec::{resolve_spec, HdShape};
use hdx::{HdAttributeSpec, HdChunkIterConfig, HdChunkPlan, HdDataSource, HdDtype, HdGroupSpec, HdSpec, HdSpecCatalog, HdValue};

struct ShapeOnlySource {
    maxshape: HdShape,
}

impl HdDataSource for ShapeOnlySource {
    fn fetch(&self, selection: &[Range<usize>]) -> hdx::Result<HdValue> {
        Ok(HdValue::from(selection.iter().map(|range| range.len()).product::<usize>()))
    }

    fn max_shape(&self) -> HdShape {
        self.maxshape.clone()
    }

    fn dtype(&self) -> HdDtype {
        HdDtype::Float64
    }
}

fn source(shape: &[usize]) -> Arc<dyn HdDataSource> {
    Arc::new(ShapeOnlySource {
        maxshape: shape.iter().copied().map(Some).collect(),
    })
}

fn bench_default_plan(c: &mut Criterion) {
    let source = source(&[20_000, 5_000]);
    c.bench_function("plan_20000x5000_default", |b| {
        b.iter(|| HdChunkPlan::new(black_box(source.clone()), HdChunkIterConfig::default()).unwrap())
    });
}

fn bench_buffer_walk(c: &mut Criterion) {
    let config = HdChunkIterConfig::default().with_buffer_shape(vec![100, 100]);
    let plan = HdChunkPlan::new(source(&[10_000, 1_000]), config).unwrap();
    c.bench_function("walk_1000_buffers", |b| {
        b.iter(|| plan.iter().map(|chunk| chunk.unwrap().selection.len()).sum::<usize>())
    });
}

fn type_chain(depth: usize) -> HdSpecCatalog {
    let mut catalog = HdSpecCatalog::new();
    for level in 0..depth {
        let attribute = HdAttributeSpec::builder(format!("attr{level}"), "a level attribute")
            .dtype("text")
            .build()
            .unwrap();
        let mut builder = HdGroupSpec::builder("a level").data_type_def(format!("Level{level}")).attribute(attribute);
        if level > 0 {
            builder = builder.data_type_inc(format!("Level{}", level - 1));
        }
        let spec: HdSpec = builder.build().unwrap().into();
        let resolved = resolve_spec(&spec, &catalog).unwrap();
        catalog.register_spec(resolved, "levels.yaml").unwrap();
    }
    catalog
}

fn bench_resolution(c: &mut Criterion) {
    let catalog = type_chain(16);
    let leaf: HdSpec = HdGroupSpec::builder("the leaf")
        .data_type_def("Leaf")
        .data_type_inc("Level15")
        .build()
        .unwrap()
        .into();
    c.bench_function("resolve_16_level_chain", |b| {
        b.iter(|| resolve_spec(black_box(&leaf), &catalog).unwrap())
    });
    c.bench_function("hierarchy_16_level_chain", |b| b.iter(|| catalog.get_hierarchy(black_box("Level15")).unwrap()));
}

criterion_group!(benches, bench_default_plan, bench_buffer_walk, bench_resolution);
criterion_main!(benches);
