//! Topological checks over the bus/line graph.
//!
//! The sensitivity kernel reports a disconnected network as a singular
//! Laplacian after the fact; this module lets callers diagnose the topology
//! up front with an explicit message naming the island count.

use petgraph::algo::connected_components;
use petgraph::graph::UnGraph;

use crate::{DucError, DucResult, UnitCommitmentInstance};

/// Build the undirected bus/line multigraph of an instance.
pub fn bus_graph(instance: &UnitCommitmentInstance) -> UnGraph<usize, usize> {
    let mut graph = UnGraph::new_undirected();
    let nodes: Vec<_> = instance
        .buses
        .iter()
        .map(|b| graph.add_node(b.id.value()))
        .collect();
    for line in &instance.lines {
        graph.add_edge(
            nodes[line.source.idx()],
            nodes[line.target.idx()],
            line.id.value(),
        );
    }
    graph
}

/// Number of connected components of the bus/line graph.
pub fn component_count(instance: &UnitCommitmentInstance) -> usize {
    connected_components(&bus_graph(instance))
}

/// Fail with a fatal error if the network has more than one island.
pub fn require_connected(instance: &UnitCommitmentInstance) -> DucResult<()> {
    let islands = component_count(instance);
    if islands > 1 {
        return Err(DucError::Numerical(format!(
            "network is disconnected ({} islands); the susceptance Laplacian is singular",
            islands
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bus, BusId, LineId, TransmissionLine, ZoneId};

    fn instance_with_lines(n_bus: usize, ends: &[(usize, usize)]) -> UnitCommitmentInstance {
        UnitCommitmentInstance {
            name: "graph_test".into(),
            buses: (1..=n_bus)
                .map(|i| Bus {
                    id: BusId::new(i),
                    demand: vec![0.0],
                    zone: ZoneId::new(1),
                })
                .collect(),
            lines: ends
                .iter()
                .enumerate()
                .map(|(i, &(s, t))| TransmissionLine {
                    id: LineId::new(i + 1),
                    source: BusId::new(s),
                    target: BusId::new(t),
                    reactance: 0.1,
                    susceptance: TransmissionLine::susceptance_from_reactance(0.1),
                    normal_limit: 100.0,
                    emergency_limit: 100.0,
                    vulnerable: false,
                    zone: ZoneId::new(1),
                })
                .collect(),
            generators: vec![],
            time_horizon: 1,
        }
    }

    #[test]
    fn connected_triangle() {
        let instance = instance_with_lines(3, &[(1, 2), (2, 3), (1, 3)]);
        assert_eq!(component_count(&instance), 1);
        assert!(require_connected(&instance).is_ok());
    }

    #[test]
    fn two_islands_detected() {
        let instance = instance_with_lines(4, &[(1, 2), (3, 4)]);
        assert_eq!(component_count(&instance), 2);
        assert!(require_connected(&instance).is_err());
    }
}
