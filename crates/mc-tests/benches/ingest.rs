use std::io::Cursor;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mc_blobs::CancellationToken;
use mc_codec::checksum_of;
use mc_tests::{TestStore, content};
use tokio::runtime::Runtime;

const SIZES: [usize; 3] = [4 * 1024, 256 * 1024, 4 * 1024 * 1024];

fn bench_ingest_new(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("ingest_new");
    for size in SIZES {
        let bytes = content(1, size);
        let checksum = checksum_of(&bytes);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            let store = runtime.block_on(TestStore::with_folders(&[1 << 30]));
            b.iter(|| {
                runtime.block_on(async {
                    let id = store
                        .manager
                        .add_blob(
                            Cursor::new(bytes.clone()),
                            bytes.len() as u64,
                            checksum,
                            &CancellationToken::new(),
                        )
                        .await
                        .unwrap();
                    // Drop it again so every iteration stores new content.
                    store.manager.decrease_reference(&id).await.unwrap();
                });
            });
        });
    }
    group.finish();
}

fn bench_ingest_duplicate(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("ingest_duplicate");
    for size in SIZES {
        let bytes = content(2, size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            let store = runtime.block_on(TestStore::with_folders(&[1 << 30]));
            runtime.block_on(store.add(bytes)).unwrap();
            b.iter(|| runtime.block_on(store.add(bytes)).unwrap());
        });
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let bytes = content(3, 1024 * 1024);
    let store = runtime.block_on(TestStore::with_folders(&[1 << 30]));
    let id = runtime.block_on(store.add(&bytes)).unwrap();

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("lock_and_read_1MiB", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let lock = store.manager.lock_blob(&id).await.unwrap();
                lock.read_to_vec().await.unwrap()
            })
        });
    });
    group.finish();
}

criterion_group!(benches, bench_ingest_new, bench_ingest_duplicate, bench_read);
criterion_main!(benches);
