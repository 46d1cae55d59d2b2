//! Criterion benchmarks for path discovery.
//!
//! Builds a chain of matrix switchers joined by parallel tie lines and
//! measures `find_paths` from one end to the other.
//!
//! Run with:
//! ```bash
//! cargo bench --package avroute-core --bench path_bench
//! ```

use std::sync::Arc;

use avroute_core::domain::control::{ControlHandle, ControlRegistry, SwitchOutcome, SwitcherControl};
use avroute_core::{
    Address, Connection, ConnectionId, ConnectionType, ConnectorInfo, DeviceControlInfo,
    EndpointInfo, RouteOperation, RoutingGraph,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Tie lines between each pair of neighbouring switchers.
const TIE_LINES: u32 = 8;

struct NullMatrix;

impl SwitcherControl for NullMatrix {
    fn route(&self, _operation: &RouteOperation) -> SwitchOutcome {
        SwitchOutcome::Completed(true)
    }
    fn clear_output(&self, _output: Address, _connection_type: ConnectionType) -> bool {
        true
    }
    fn get_inputs(&self, _output: Address, _connection_type: ConnectionType) -> Vec<ConnectorInfo> {
        Vec::new()
    }
    fn get_outputs(&self, _input: Address, _connection_type: ConnectionType) -> Vec<ConnectorInfo> {
        Vec::new()
    }
}

/// Source device 1 -> switchers 100..100+n -> display device 2.
fn build_chain(n: u32) -> RoutingGraph {
    let registry = Arc::new(ControlRegistry::new());
    for i in 0..n {
        registry.register(
            ControlHandle::new(DeviceControlInfo::new(100 + i, 0)).with_switcher(Arc::new(NullMatrix)),
        );
    }
    let graph = RoutingGraph::new(registry);

    let mut id = 0;
    let mut next_id = || {
        id += 1;
        ConnectionId(id)
    };
    let mut links = vec![Connection::new(
        next_id(),
        EndpointInfo::new(1, 0, 1),
        EndpointInfo::new(100, 0, 1),
        ConnectionType::VIDEO | ConnectionType::AUDIO,
    )];
    for i in 0..n.saturating_sub(1) {
        for tie in 1..=TIE_LINES {
            links.push(Connection::new(
                next_id(),
                EndpointInfo::new(100 + i, 0, tie),
                EndpointInfo::new(101 + i, 0, tie),
                ConnectionType::VIDEO | ConnectionType::AUDIO,
            ));
        }
    }
    links.push(Connection::new(
        next_id(),
        EndpointInfo::new(100 + n - 1, 0, TIE_LINES + 1),
        EndpointInfo::new(2, 0, 1),
        ConnectionType::VIDEO | ConnectionType::AUDIO,
    ));
    graph
        .add_connections(links)
        .expect("generated chain must be valid");
    graph
}

fn bench_find_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_paths");
    for n in [2u32, 8, 32] {
        let graph = build_chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                graph.find_paths(
                    black_box(EndpointInfo::new(1, 0, 1)),
                    black_box(EndpointInfo::new(2, 0, 1)),
                    ConnectionType::VIDEO,
                    1,
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_find_paths);
criterion_main!(benches);
