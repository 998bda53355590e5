//! # Race Planner Benchmark

use criterion::{criterion_group, criterion_main, Criterion};

use nalgebra::Vector3;
use togt_lib::{
    planner::RacePlanner,
    race_params::{DynamicLimits, PlannerParams},
    race_track::{BoundaryState, Gate, Track},
};

fn planner_benchmark(c: &mut Criterion) {
    // ---- Build a small race ----

    let gates = vec![
        Gate::ball("g1", Vector3::new(4.0, 2.0, 1.5), 0.4),
        Gate::ball("g2", Vector3::new(8.0, -2.0, 2.0), 0.4),
        Gate::ball("g3", Vector3::new(12.0, 1.0, 1.0), 0.4),
    ];

    let track = Track::through_gates(
        BoundaryState::at_rest(Vector3::new(0.0, 0.0, 1.0)),
        gates,
        BoundaryState::at_rest(Vector3::new(16.0, 0.0, 1.0)),
    )
    .unwrap();

    let limits = DynamicLimits::new(8.0, 12.0, 120.0)
        .unwrap()
        .with_max_thrust(22.0)
        .unwrap();

    let planner = RacePlanner::new(PlannerParams::default()).unwrap();

    c.bench_function("RacePlanner::plan_togt", |b| {
        b.iter(|| planner.plan_togt(&track, &limits).unwrap())
    });
}

criterion_group!(benches, planner_benchmark);
criterion_main!(benches);
