//! Call graph of compile units
//!
//! Nodes are unit handles, edges are non-inlined references from the unit
//! whose body contains the reference to the unit it calls. Recursion is read
//! off the strongly connected components; reachability from the root gives the
//! referenced functions.

use std::collections::HashSet;

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;

pub type UnitId = usize;

#[derive(Debug, Default)]
pub struct CallGraph {
    graph: DiGraph<UnitId, ()>,
    nodes: Vec<NodeIndex>,
}

/// What the compiler learns from the finished graph
#[derive(Debug, Clone, Default)]
pub struct GraphAnalysis {
    /// Units taking part in a reference cycle (including self-loops)
    pub recursive: HashSet<UnitId>,
    /// Units reachable from the root, root excluded, in discovery order
    pub reachable: Vec<UnitId>,
    pub has_root_reference: bool,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&mut self, unit: UnitId) -> NodeIndex {
        while self.nodes.len() <= unit {
            let next = self.nodes.len();
            self.nodes.push(self.graph.add_node(next));
        }
        self.nodes[unit]
    }

    pub fn add_unit(&mut self, unit: UnitId) {
        self.ensure(unit);
    }

    pub fn add_call(&mut self, from: UnitId, to: UnitId) {
        let a = self.ensure(from);
        let b = self.ensure(to);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn analyze(&self, root: UnitId) -> GraphAnalysis {
        let mut analysis = GraphAnalysis::default();
        let Some(&root_idx) = self.nodes.get(root) else {
            return analysis;
        };

        for component in kosaraju_scc(&self.graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&n| self.graph.find_edge(n, n).is_some());
            if cyclic {
                analysis
                    .recursive
                    .extend(component.iter().map(|&n| self.graph[n]));
            }
        }

        let mut dfs = Dfs::new(&self.graph, root_idx);
        while let Some(node) = dfs.next(&self.graph) {
            if node != root_idx {
                analysis.reachable.push(self.graph[node]);
            }
        }

        analysis.has_root_reference = self
            .graph
            .neighbors_directed(root_idx, Direction::Incoming)
            .next()
            .is_some();
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursion_and_reachability() {
        let mut graph = CallGraph::new();
        graph.add_unit(0);
        graph.add_call(0, 1);
        graph.add_call(1, 2);
        graph.add_call(2, 1);
        graph.add_call(3, 3);
        let analysis = graph.analyze(0);
        assert!(analysis.recursive.contains(&1));
        assert!(analysis.recursive.contains(&2));
        assert!(analysis.recursive.contains(&3));
        assert!(!analysis.recursive.contains(&0));
        assert_eq!(analysis.reachable.len(), 2);
        assert!(!analysis.has_root_reference);
    }

    #[test]
    fn test_root_reference() {
        let mut graph = CallGraph::new();
        graph.add_call(0, 1);
        graph.add_call(1, 0);
        assert!(graph.analyze(0).has_root_reference);
    }
}
