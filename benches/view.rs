//! Fleet projection benchmarks
//!
//! Benchmarks for the filter/sort/paginate pipeline and snapshot replacement:
//! - Full projection with default sort at growing fleet sizes
//! - Filtered projection (search + status)
//! - Registry replacement under a steady stream of refreshes

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use model_fleet::view::project;
use model_fleet::{
    Engine, FleetFilter, FleetRow, Model, ModelStatus, Page, Registry, SortDirection, SortKey,
    SortState, UsageType,
};
use std::hint::black_box;
use tokio::runtime::Runtime;

fn models(count: usize) -> Vec<Model> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let created = base + Duration::seconds((i * 7919 % count.max(1)) as i64);
            Model {
                id: format!("model-{}", i),
                name: format!("Model-{:05}", (i * 31) % count.max(1)),
                engine: if i % 3 == 0 { Engine::Vllm } else { Engine::Ollama },
                usage_type: if i % 4 == 0 {
                    UsageType::Embedding
                } else {
                    UsageType::Generation
                },
                status: match i % 4 {
                    0 => ModelStatus::Running,
                    1 => ModelStatus::Stopped,
                    2 => ModelStatus::Starting,
                    _ => ModelStatus::Error,
                },
                created_at: created,
                updated_at: created,
                container_id: Some(format!("ctr-{}", i)),
                image: None,
                port: Some(8000),
                gpu_id: Some("0".to_string()),
            }
        })
        .collect()
}

fn rows(count: usize) -> Vec<FleetRow> {
    models(count)
        .into_iter()
        .map(|model| FleetRow {
            display_status: model.status,
            model,
            stalled: false,
            selected: false,
        })
        .collect()
}

/// Benchmark default projection (newest first, first page)
fn bench_project_default(c: &mut Criterion) {
    let mut group = c.benchmark_group("project_default");

    for count in [100, 1000, 10_000] {
        let input = rows(count);
        group.bench_with_input(BenchmarkId::new("models", count), &input, |b, input| {
            b.iter(|| {
                let page = project(
                    input.clone(),
                    &FleetFilter::new(),
                    SortState::default(),
                    Page::new(1, 20),
                );
                black_box(page)
            });
        });
    }
    group.finish();
}

/// Benchmark filtered projection sorted by name
fn bench_project_filtered(c: &mut Criterion) {
    let mut group = c.benchmark_group("project_filtered");
    let filter = FleetFilter::new()
        .with_search("model-00")
        .with_status(ModelStatus::Running);
    let sort = SortState::new(SortKey::Name, SortDirection::Asc);

    for count in [100, 1000, 10_000] {
        let input = rows(count);
        group.bench_with_input(BenchmarkId::new("models", count), &input, |b, input| {
            b.iter(|| black_box(project(input.clone(), &filter, sort, Page::all())));
        });
    }
    group.finish();
}

/// Benchmark registry snapshot replacement
fn bench_registry_replace(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("registry_replace");

    for count in [100, 1000] {
        let registry = Registry::new();
        let listing = models(count);
        rt.block_on(registry.replace(listing.clone()));

        group.bench_with_input(BenchmarkId::new("models", count), &listing, |b, listing| {
            b.to_async(&rt).iter(|| async {
                black_box(registry.replace(listing.clone()).await);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_project_default,
    bench_project_filtered,
    bench_registry_replace
);
criterion_main!(benches);
