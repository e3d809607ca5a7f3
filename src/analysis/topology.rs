use crate::error::{EngineError, Result};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

/// Orders the nodes of a dependency closure so that every node comes after
/// all of its dependencies.
///
/// `deps[i]` lists the nodes node `i` reads from. Edges run dependency ->
/// consumer. Among independent nodes the order follows insertion, so equal
/// inputs always give the same order.
pub fn evaluation_order(names: &[String], deps: &[Vec<usize>]) -> Result<Vec<usize>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(deps.len(), deps.iter().map(Vec::len).sum());
    let nodes: Vec<NodeIndex> = (0..deps.len()).map(|i| graph.add_node(i)).collect();
    for (consumer, inputs) in deps.iter().enumerate() {
        for &input in inputs {
            graph.add_edge(nodes[input], nodes[consumer], ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|n| graph[n]).collect()),
        Err(cycle) => Err(EngineError::CircularDependency { members: cycle_members(&graph, cycle.node_id(), names) }),
    }
}

/// Names of the strongly connected component containing `culprit`, sorted.
fn cycle_members(graph: &DiGraph<usize, ()>, culprit: NodeIndex, names: &[String]) -> Vec<String> {
    let component = tarjan_scc(graph).into_iter().find(|scc| scc.contains(&culprit)).unwrap_or_else(|| vec![culprit]);
    let mut members: Vec<String> = component.into_iter().map(|n| names[graph[n]].clone()).collect();
    members.sort();
    members
}
