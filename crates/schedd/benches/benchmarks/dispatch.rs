use criterion::{BatchSize, BenchmarkId, Criterion};
use tokio_util::sync::CancellationToken;

use schedd::scheduler::{FairShareTicketPolicy, dispatch_epoch};

use crate::utils::{NullCoordinator, create_snapshot};

fn bench_dispatch(c: &mut Criterion) {
    for job_count in [10, 1_000, 10_000] {
        for host_count in [1, 16, 128] {
            c.bench_with_input(
                BenchmarkId::new(
                    "dispatch",
                    format!("jobs={job_count}, hosts={host_count}"),
                ),
                &(job_count, host_count),
                |b, &(job_count, host_count)| {
                    b.iter_batched(
                        || create_snapshot(job_count, host_count),
                        |snapshot| {
                            dispatch_epoch(
                                snapshot,
                                &mut FairShareTicketPolicy::new(),
                                &mut NullCoordinator,
                                &CancellationToken::new(),
                            )
                            .unwrap()
                        },
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }
}

fn bench_category_cache(c: &mut Criterion) {
    for enabled in [true, false] {
        c.bench_with_input(
            BenchmarkId::new("category cache", enabled),
            &enabled,
            |b, &enabled| {
                b.iter_batched(
                    || {
                        let mut snapshot = create_snapshot(5_000, 4);
                        snapshot.config.category_cache = enabled;
                        snapshot
                    },
                    |snapshot| {
                        dispatch_epoch(
                            snapshot,
                            &mut FairShareTicketPolicy::new(),
                            &mut NullCoordinator,
                            &CancellationToken::new(),
                        )
                        .unwrap()
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
}

pub fn benchmark(c: &mut Criterion) {
    bench_dispatch(c);
    bench_category_cache(c);
}
