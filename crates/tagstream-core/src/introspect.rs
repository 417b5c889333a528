//! Graph introspection and Graphviz export.
//!
//! Every node can describe itself and enumerate its downstream subgraph;
//! the result is a pure value that stays valid after the processors are
//! moved or destroyed. This facet is orthogonal to data flow and intended
//! for visualization, debugging, and testing.

use serde::Serialize;

use crate::processor::{NodeId, NodeInfo, Processor};

/// A directed acyclic graph of processors, with edges upstream →
/// downstream and a set of entry points (nodes with no incoming edge).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorGraph {
    nodes: Vec<(NodeId, NodeInfo)>,
    edges: Vec<(NodeId, NodeId)>,
    entry_points: Vec<NodeId>,
}

impl ProcessorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `processor` upstream of every current entry point and make it
    /// the sole entry point.
    ///
    /// Panics if the processor is already part of the graph.
    pub fn push_entry_point<P: Processor>(&mut self, processor: &P) {
        let id = NodeId::of(processor);
        let info = processor.introspect_node();
        let pos = self
            .nodes
            .binary_search_by(|(n, _)| n.cmp(&id))
            .err()
            .expect("processor graph cannot push entry point that already exists");
        self.nodes.insert(pos, (id, info));

        for prev in std::mem::take(&mut self.entry_points) {
            let edge = (id, prev);
            let pos = self.edges.partition_point(|e| *e < edge);
            self.edges.insert(pos, edge);
        }
        self.entry_points = vec![id];
    }

    /// Add `source` upstream of every current entry point, leaving the
    /// graph with no entry point (a source feeds itself).
    pub fn push_source<P: Processor>(&mut self, source: &P) {
        self.push_entry_point(source);
        self.entry_points.clear();
    }

    /// All node ids, in ascending order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|(id, _)| *id).collect()
    }

    /// All edges `(upstream, downstream)`, in ascending order.
    pub fn edges(&self) -> &[(NodeId, NodeId)] {
        &self.edges
    }

    /// All entry points, in ascending order.
    pub fn entry_points(&self) -> &[NodeId] {
        &self.entry_points
    }

    pub fn is_entry_point(&self, id: NodeId) -> bool {
        self.entry_points.contains(&id)
    }

    /// The positional index of `id` among this graph's sorted nodes.
    ///
    /// Panics if `id` is not in the graph.
    pub fn node_index(&self, id: NodeId) -> usize {
        self.nodes
            .binary_search_by(|(n, _)| n.cmp(&id))
            .expect("no such node id in processor graph")
    }

    /// Metadata of the node `id`.
    ///
    /// Panics if `id` is not in the graph.
    pub fn node_info(&self, id: NodeId) -> &NodeInfo {
        let idx = self.node_index(id);
        &self.nodes[idx].1
    }
}

/// Merge two graphs into one, unioning nodes, edges, and entry points.
///
/// Used by nodes with more than one downstream (route) or more than one
/// upstream entry (merge fabric).
pub fn merge_processor_graphs(a: &ProcessorGraph, b: &ProcessorGraph) -> ProcessorGraph {
    let mut merged = ProcessorGraph::new();

    merged.nodes = a.nodes.clone();
    for node in &b.nodes {
        if let Err(pos) = merged.nodes.binary_search_by(|(n, _)| n.cmp(&node.0)) {
            merged.nodes.insert(pos, node.clone());
        }
    }

    merged.edges = a.edges.clone();
    for edge in &b.edges {
        if let Err(pos) = merged.edges.binary_search(edge) {
            merged.edges.insert(pos, *edge);
        }
    }

    merged.entry_points = a.entry_points.clone();
    for ep in &b.entry_points {
        if let Err(pos) = merged.entry_points.binary_search(ep) {
            merged.entry_points.insert(pos, *ep);
        }
    }

    merged
}

/// Render a processor graph as Graphviz dot input.
pub fn graphviz_from_processor_graph(graph: &ProcessorGraph) -> String {
    let mut dot = String::from("digraph G {\n");
    for node in graph.nodes() {
        let info = graph.node_info(node);
        dot.push_str(&format!(
            "    n{} [shape=box label=\"{}\" tooltip=\"{} at {:#x}\"];\n",
            graph.node_index(node),
            info.name,
            info.type_name,
            info.address,
        ));
    }
    for (up, down) in graph.edges() {
        dot.push_str(&format!(
            "    n{} -> n{};\n",
            graph.node_index(*up),
            graph.node_index(*down),
        ));
    }
    dot.push_str("}\n");
    dot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::events::Event;
    use crate::processor::Handle;

    struct Leaf {
        _pad: u8,
    }

    impl Handle<Event> for Leaf {
        fn handle(&mut self, _event: Event) -> Result {
            Ok(())
        }
    }

    impl Processor for Leaf {
        fn flush(&mut self) -> Result {
            Ok(())
        }

        fn introspect_node(&self) -> NodeInfo {
            NodeInfo::new(self, "leaf")
        }

        fn introspect_graph(&self) -> ProcessorGraph {
            let mut g = ProcessorGraph::new();
            g.push_entry_point(self);
            g
        }
    }

    struct Mid {
        downstream: Leaf,
    }

    impl Processor for Mid {
        fn flush(&mut self) -> Result {
            self.downstream.flush()
        }

        fn introspect_node(&self) -> NodeInfo {
            NodeInfo::new(self, "mid")
        }

        fn introspect_graph(&self) -> ProcessorGraph {
            let mut g = self.downstream.introspect_graph();
            g.push_entry_point(self);
            g
        }
    }

    #[test]
    fn two_node_chain() {
        let mid = Mid {
            downstream: Leaf { _pad: 0 },
        };
        let g = mid.introspect_graph();
        assert_eq!(g.nodes().len(), 2);
        assert_eq!(g.edges().len(), 1);
        assert_eq!(g.entry_points().len(), 1);
        let (up, down) = g.edges()[0];
        assert_eq!(g.node_info(up).name, "mid");
        assert_eq!(g.node_info(down).name, "leaf");
        assert!(g.is_entry_point(up));
    }

    #[test]
    fn graphviz_output_shape() {
        let mid = Mid {
            downstream: Leaf { _pad: 0 },
        };
        let g = mid.introspect_graph();
        let dot = graphviz_from_processor_graph(&g);
        assert!(dot.starts_with("digraph G {\n"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("label=\"mid\""));
        assert!(dot.contains("label=\"leaf\""));
        assert!(dot.contains(" -> "));
    }

    #[test]
    fn merge_unions_nodes() {
        let a = Mid {
            downstream: Leaf { _pad: 0 },
        };
        let b = Mid {
            downstream: Leaf { _pad: 0 },
        };
        let merged = merge_processor_graphs(&a.introspect_graph(), &b.introspect_graph());
        assert_eq!(merged.nodes().len(), 4);
        assert_eq!(merged.edges().len(), 2);
        assert_eq!(merged.entry_points().len(), 2);
    }

    #[test]
    fn merge_is_idempotent_for_shared_subgraphs() {
        let a = Mid {
            downstream: Leaf { _pad: 0 },
        };
        let g = a.introspect_graph();
        let merged = merge_processor_graphs(&g, &g);
        assert_eq!(merged.nodes().len(), g.nodes().len());
        assert_eq!(merged.edges().len(), g.edges().len());
    }
}
