//! Benchmarks for the retry decision and node registry.
//!
//! Run with: cargo bench --bench retry

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fcels::protocol::{
    BusyReason, CompletionStatus, ElsCommand, FrameSource, LocalReject, LsRjt, RjtExplanation,
    RjtReason,
};
use fcels::registry::{NodeRegistry, NodeState};
use fcels::retry::{decide, RetryInput, RetryPolicy, Topology};
use fcels::Did;

fn fabric() -> Topology {
    Topology {
        link_up: true,
        is_fabric: true,
        ..Topology::default()
    }
}

fn input(command: ElsCommand, status: CompletionStatus, attempt: u32) -> RetryInput {
    RetryInput {
        command,
        status,
        attempt,
        topology: fabric(),
        target_is_name_server: false,
        node_state: NodeState::PlogiIssued,
    }
}

/// Registry holding `n` nodes at consecutive addresses.
fn populated_registry(n: u32) -> NodeRegistry {
    let mut registry = NodeRegistry::new(n as usize + 1);
    for i in 0..n {
        let _ = registry.create(Did::from_u24(0x01_00_00 + i));
    }
    registry
}

// ===== Retry Decision Benchmarks =====

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_decide");
    let policy = RetryPolicy::default();

    let cases = [
        (
            "flogi_busy",
            input(
                ElsCommand::Flogi,
                CompletionStatus::Busy {
                    source: FrameSource::Fabric,
                    reason: BusyReason::LogicalBusy,
                },
                7,
            ),
        ),
        (
            "plogi_ls_rjt",
            input(
                ElsCommand::Plogi,
                CompletionStatus::LsReject(LsRjt::new(
                    RjtReason::UnableToPerform,
                    RjtExplanation::NothingMore,
                )),
                1,
            ),
        ),
        (
            "prli_no_resources",
            input(
                ElsCommand::Prli,
                CompletionStatus::LocalReject(LocalReject::NoResources),
                120,
            ),
        ),
        (
            "plogi_timeout",
            input(
                ElsCommand::Plogi,
                CompletionStatus::LocalReject(LocalReject::SequenceTimeout),
                0,
            ),
        ),
    ];

    for (name, case) in &cases {
        group.bench_function(*name, |b| b.iter(|| decide(black_box(&policy), black_box(case))));
    }

    group.finish();
}

// ===== Registry Benchmarks =====

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    for &count in &[64u32, 512, 2048] {
        let registry = populated_registry(count);
        let present = Did::from_u24(0x01_00_00 + count / 2);
        let absent = Did::from_u24(0x0f_00_00);

        group.bench_with_input(BenchmarkId::new("find_hit", count), &count, |b, _| {
            b.iter(|| registry.find(black_box(present)))
        });

        group.bench_with_input(BenchmarkId::new("find_miss", count), &count, |b, _| {
            b.iter(|| registry.find(black_box(absent)))
        });

        let mut scratch = populated_registry(count);
        group.bench_with_input(BenchmarkId::new("create_remove", count), &count, |b, _| {
            b.iter(|| {
                if let Ok(handle) = scratch.create(black_box(absent)) {
                    let _ = scratch.remove(handle);
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decide, bench_registry);
criterion_main!(benches);
