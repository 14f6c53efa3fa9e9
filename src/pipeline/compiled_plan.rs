use super::component::Component;
use super::id::{EdgeId, NodeId};
use std::fmt::Write as _;
use std::sync::Arc;

/// A component placed in the compiled graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub component: Arc<Component>,
    /// Source id stamped on this source's frames; `None` for non-sources.
    pub source_id: Option<u32>,
}

/// A link between two placed components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
}

/// Compiled topology of a pipeline, rebuilt whenever membership changes.
#[derive(Debug, Clone, Default)]
pub struct CompiledGraph {
    /// Pipeline name, used for DOT output and logs
    pub pipeline: String,

    /// Components in stage order; `NodeId` indexes into this
    pub nodes: Vec<GraphNode>,

    /// Stage-to-stage links
    pub edges: Vec<GraphEdge>,

    /// Topological visiting order
    pub execution_order: Vec<NodeId>,

    /// Cache invalidation generation number
    pub generation: u64,

    /// Compilation statistics
    pub stats: GraphStats,
}

/// Statistics about the compiled graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub source_nodes: usize,
    pub sink_nodes: usize,
    /// Probe handlers attached across all pads at compile time
    pub attached_handlers: usize,
    pub compile_time_us: u64,
}

impl CompiledGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.index())
    }

    /// `(source_id, component name)` for every source, by id.
    pub fn sources(&self) -> Vec<(u32, &str)> {
        self.nodes
            .iter()
            .filter_map(|n| n.source_id.map(|id| (id, n.component.name())))
            .collect()
    }

    /// Component names in visiting order.
    pub fn order_names(&self) -> Vec<&str> {
        self.execution_order
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|n| n.component.name())
            .collect()
    }

    /// Render the graph as Graphviz DOT text.
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{}\" {{", escape(&self.pipeline));
        let _ = writeln!(dot, "  rankdir=LR;");
        for node in &self.nodes {
            let _ = writeln!(
                dot,
                "  \"{}\" [label=\"{}\\n({})\"];",
                escape(node.component.name()),
                escape(node.component.name()),
                node.component.kind().type_name()
            );
        }
        for edge in &self.edges {
            if let (Some(from), Some(to)) = (self.node(edge.from), self.node(edge.to)) {
                let _ = writeln!(
                    dot,
                    "  \"{}\" -> \"{}\";",
                    escape(from.component.name()),
                    escape(to.component.name())
                );
            }
        }
        dot.push_str("}\n");
        dot
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
