//! Performance benchmarks for dispatch_core using Criterion.rs.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dispatch_core::city::CityProfileCache;
use dispatch_core::dispatch::DispatchCoordinator;
use dispatch_core::geo::{geo_to_grid, grid_to_geo, GridPoint};
use dispatch_core::order::OrderStatus;
use dispatch_core::test_helpers::{
    shenyang_profile, test_order, InMemoryOrderStore, StaticNearestVehicles,
};

fn bench_transform(c: &mut Criterion) {
    let profile = shenyang_profile();
    let cells: Vec<GridPoint> = (0..1_000)
        .map(|i| GridPoint::new((i * 7) % 1_000, (i * 13) % 1_000))
        .collect();
    let geos: Vec<_> = cells.iter().map(|&cell| grid_to_geo(cell, &profile)).collect();

    let mut group = c.benchmark_group("transform");
    group.bench_function("grid_to_geo_1000", |b| {
        b.iter(|| {
            for &cell in &cells {
                black_box(grid_to_geo(cell, &profile));
            }
        });
    });
    group.bench_function("geo_to_grid_1000", |b| {
        b.iter(|| {
            for &geo in &geos {
                black_box(geo_to_grid(geo, &profile));
            }
        });
    });

    let cache = CityProfileCache::from_profiles([profile.clone()]);
    group.bench_function("cached_geo_to_grid_1000", |b| {
        b.iter(|| {
            for &geo in &geos {
                let _ = black_box(cache.geo_to_grid(geo, "shenyang"));
            }
        });
    });
    group.finish();
}

fn bench_bulk_assign(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");

    let mut group = c.benchmark_group("bulk_auto_assign");
    for orders in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(orders), &orders, |b, &orders| {
            b.iter(|| {
                let ids: Vec<String> = (0..orders).map(|i| format!("o-{i}")).collect();
                let orders = ids.iter().enumerate().map(|(i, id)| {
                    let pickup = GridPoint::new(1 + (i as i32 * 17) % 997, 500);
                    let dropoff = GridPoint::new(500, 900);
                    test_order(id, pickup, dropoff, OrderStatus::PendingAssignment)
                });
                let store = Arc::new(InMemoryOrderStore::with_orders(orders));
                let coordinator = DispatchCoordinator::new(
                    Arc::new(CityProfileCache::from_profiles([shenyang_profile()])),
                    store,
                    Arc::new(StaticNearestVehicles::new().with_fallback("v-bench")),
                );
                black_box(runtime.block_on(coordinator.bulk_auto_assign(&ids)));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transform, bench_bulk_assign);
criterion_main!(benches);
