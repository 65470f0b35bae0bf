//! Registry and engine benchmarks.
//!
//! Run with: cargo bench --bench registry

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pantry::registry::fnv32;
use pantry::store::MemoryStore;
use pantry::{GetOptions, Pantry, PutOptions, ShardedRegistry};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
}

fn bench_fnv(c: &mut Criterion) {
  c.bench_function("fnv32", |b| b.iter(|| fnv32(black_box("some.topic.name"))));
}

fn bench_registry(c: &mut Criterion) {
  let mut group = c.benchmark_group("registry");
  group.throughput(Throughput::Elements(1));

  for shards in [1, 16, 64] {
    let registry: ShardedRegistry<u64> = ShardedRegistry::with_shards(shards);
    for i in 0..1_000 {
      registry.append(&format!("key-{}", i), i);
    }

    group.bench_with_input(BenchmarkId::new("get", shards), &registry, |b, registry| {
      let mut i = 0u64;
      b.iter(|| {
        i = (i + 1) % 1_000;
        black_box(registry.get(&format!("key-{}", i)));
      });
    });

    group.bench_with_input(BenchmarkId::new("append", shards), &registry, |b, registry| {
      b.iter(|| registry.append(black_box("hot"), 1));
    });
  }

  group.finish();
}

fn bench_pantry(c: &mut Criterion) {
  let rt = create_runtime();
  let _guard = rt.enter();

  let pantry = Pantry::new(Arc::new(MemoryStore::new()));
  rt.block_on(pantry.put("food", "Pizza", PutOptions::new()))
    .unwrap();

  let mut group = c.benchmark_group("pantry");
  group.throughput(Throughput::Elements(1));

  group.bench_function("put", |b| {
    b.iter(|| {
      rt.block_on(async {
        pantry
          .put(black_box("drink"), black_box("Water"), PutOptions::new())
          .await
          .unwrap();
      });
    });
  });

  group.bench_function("get_fresh", |b| {
    b.iter(|| {
      rt.block_on(async {
        black_box(pantry.get("food", GetOptions::new()).await.unwrap());
      });
    });
  });

  group.finish();
}

criterion_group!(benches, bench_fnv, bench_registry, bench_pantry);
criterion_main!(benches);
