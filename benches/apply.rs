// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use rand::{rngs::StdRng, Rng, SeedableRng};
use criterion::{criterion_group, criterion_main, Criterion, BenchmarkId, black_box};
use kmem_waste::{AggregationState, Allocation, CallSite, MemEvent};

fn events(sites: usize, count: usize) -> Vec<MemEvent> {
    let mut rng = StdRng::seed_from_u64(0x6b6d656d);
    let sites = (0..sites).map(|i| CallSite::new(&format!("site_{}", i))).collect::<Vec<_>>();
    let mut live = Vec::new();
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        if !live.is_empty() && rng.gen_bool(0.45) {
            let pointer = live.swap_remove(rng.gen_range(0..live.len()));
            events.push(MemEvent::Free { pointer });
        } else {
            let pointer = rng.gen::<u64>() & !0xf;
            let requested = rng.gen_range(1..4096u64);
            live.push(pointer);
            events.push(MemEvent::Alloc(Allocation {
                site: sites[rng.gen_range(0..sites.len())].clone(),
                pointer,
                requested,
                granted: requested.next_power_of_two(),
            }));
        }
    }
    events
}

fn apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    for &sites in &[16usize, 1024] {
        let events = events(sites, 0x10000);
        group.bench_function(BenchmarkId::new("events", sites), |b| {
            b.iter(|| {
                let mut state = AggregationState::new();
                for event in events.iter().cloned() {
                    state.apply_event(event).unwrap();
                }
                black_box(state.finalize_and_report())
            })
        });
    }
    group.finish()
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = apply
);

criterion_main!(benches);
