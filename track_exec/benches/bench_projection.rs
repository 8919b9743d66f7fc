//! # Path Projection Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nalgebra::Vector2;
use track_lib::{
    track::{FitParams, ReferencePath},
    track_ctrl::{Params, PathProjector, TrackCtrl, TrackCtrlInput},
};

fn projection_benchmark(c: &mut Criterion) {
    // ---- Build a dummy oval track ----

    let waypoints: Vec<Vector2<f64>> = (0..40)
        .map(|i| {
            let a = 2.0 * std::f64::consts::PI * (i as f64) / 40.0;
            Vector2::new(120.0 * a.cos(), 60.0 * a.sin())
        })
        .collect();

    let path = ReferencePath::fit(&waypoints, &FitParams::default()).unwrap();
    let projector = PathProjector::new(path.points().to_vec()).unwrap();

    let position = Vector2::new(-80.0, 47.0);

    // Bench the projection alone
    c.bench_function("PathProjector::project", |b| {
        b.iter(|| projector.project(black_box(&position)))
    });

    // Bench a full control cycle
    let mut track_ctrl = TrackCtrl::new(
        &path,
        Params {
            k_p: 0.5,
            k_d: 0.1,
            dither_seed: Some(0),
            ..Default::default()
        },
    )
    .unwrap();
    let input = TrackCtrlInput {
        position,
        forward_speed_ms: 8.0,
    };

    c.bench_function("TrackCtrl::proc", |b| {
        b.iter(|| track_ctrl.proc(black_box(&input)).unwrap())
    });

    // Bench fitting the reference path
    c.bench_function("ReferencePath::fit", |b| {
        b.iter(|| ReferencePath::fit(black_box(&waypoints), &FitParams::default()).unwrap())
    });
}

criterion_group!(benches, projection_benchmark);
criterion_main!(benches);
