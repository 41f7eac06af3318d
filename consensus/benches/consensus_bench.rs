// Voting-core benchmarks: block admission and poll throughput over
// deep chains and wide forks.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use firn_consensus::{Bag, BlockInfo, ChainConsensus, Id, NoopHooks, Parameters};

fn id(n: u64) -> Id {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_be_bytes());
    Id::new(bytes)
}

fn info(block: Id, parent: Id, height: u64) -> BlockInfo {
    BlockInfo {
        id: block,
        parent_id: parent,
        height,
        timestamp_ms: 0,
        bytes: Default::default(),
    }
}

/// Parameters with a beta high enough that nothing finalizes during the
/// measurement loop, keeping the tree shape stable across iterations.
fn steady_params() -> Parameters {
    Parameters {
        k: 20,
        alpha_preference: 15,
        alpha_confidence: 15,
        beta: 1_000_000,
    }
}

/// A single chain of `depth` undecided blocks on top of genesis.
fn deep_chain(depth: u64) -> ChainConsensus {
    let mut core = ChainConsensus::new(steady_params(), id(0));
    for height in 1..=depth {
        core.add_block(info(id(height), id(height - 1), height))
            .expect("chain insert");
    }
    core
}

fn bench_add_block(c: &mut Criterion) {
    c.bench_function("consensus/add_block_chain_of_100", |b| {
        b.iter_batched(
            || ChainConsensus::new(steady_params(), id(0)),
            |mut core| {
                for height in 1..=100u64 {
                    core.add_block(info(id(height), id(height - 1), height))
                        .unwrap();
                }
                core
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_record_poll_deep_chain(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("consensus/record_poll_deep_chain");

    for depth in [8u64, 32, 128] {
        group.throughput(Throughput::Elements(depth));
        let mut core = deep_chain(depth);
        let mut votes = Bag::new();
        votes.add_count(id(depth), 20);

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                rt.block_on(core.record_poll(&votes, &NoopHooks))
                    .expect("poll")
            });
        });
    }
    group.finish();
}

fn bench_record_poll_wide_fork(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("consensus/record_poll_wide_fork");

    for width in [4u64, 16, 64] {
        group.throughput(Throughput::Elements(width));
        let mut core = ChainConsensus::new(steady_params(), id(0));
        for sibling in 1..=width {
            core.add_block(info(id(sibling), id(0), 1)).expect("fork insert");
        }
        // Votes split across the fork, below every quorum.
        let mut votes = Bag::new();
        for sibling in 1..=width.min(10) {
            votes.add_count(id(sibling), 1);
        }

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                rt.block_on(core.record_poll(&votes, &NoopHooks))
                    .expect("poll")
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_add_block,
    bench_record_poll_deep_chain,
    bench_record_poll_wide_fork
);
criterion_main!(benches);
