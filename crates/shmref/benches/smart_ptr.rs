// Smart pointer benchmarks
//
// Measures the cost of the operations every user of a handle pays for:
// building and releasing an owning pointer, reducing it to a descriptor,
// and rebuilding a handle from one.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use shmref::{Pointer, Ref, Uptr, make_uptr_in};
use shmref_mem::{Allocator, AllocatorId, MemoryConfig, MemoryRegistry, RegionAllocator};

fn setup(major: u32) -> (MemoryRegistry, &'static dyn Allocator) {
    let registry = MemoryRegistry::new(MemoryConfig::default());
    let alloc = registry
        .register(RegionAllocator::new(AllocatorId::new(major, 0), 1 << 20).unwrap())
        .unwrap();
    (registry, alloc)
}

/// Create and drop an owning pointer; after the first iteration every block
/// comes from the free list.
fn bench_make_and_drop(c: &mut Criterion) {
    let mut group = c.benchmark_group("make_and_drop");
    let (_registry, alloc) = setup(1);

    group.bench_function(BenchmarkId::from_parameter("u64"), |b| {
        b.iter(|| drop(make_uptr_in::<u64, _>(alloc, black_box(7u64)).unwrap()));
    });
    group.bench_function(BenchmarkId::from_parameter("[u8; 256]"), |b| {
        b.iter(|| drop(make_uptr_in::<[u8; 256], _>(alloc, black_box([1u8; 256])).unwrap()));
    });

    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let (_registry, alloc) = setup(2);
    let ptr = make_uptr_in::<u64, _>(alloc, 42u64).unwrap();

    c.bench_function("serialize", |b| {
        let mut descriptor = Pointer::<u64>::null();
        b.iter(|| {
            ptr.serialize(black_box(&mut descriptor));
        });
    });
}

/// Registry lookup plus offset translation.
fn bench_deserialize(c: &mut Criterion) {
    let (registry, alloc) = setup(3);
    let ptr = make_uptr_in::<u64, _>(alloc, 42u64).unwrap();
    let descriptor = ptr.to_pointer();

    c.bench_function("deserialize", |b| {
        b.iter(|| {
            let view =
                unsafe { Ref::<u64>::from_pointer_in(&registry, black_box(&descriptor)) }.unwrap();
            black_box(*view)
        });
    });

    c.bench_function("deserialize_uptr", |b| {
        b.iter(|| {
            let view =
                unsafe { Uptr::<u64>::from_pointer_in(&registry, black_box(&descriptor)) }.unwrap();
            black_box(*view)
        });
    });
}

criterion_group!(benches, bench_make_and_drop, bench_serialize, bench_deserialize);
criterion_main!(benches);
