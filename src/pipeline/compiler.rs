use super::compiled_plan::{CompiledGraph, GraphEdge, GraphNode, GraphStats};
use super::component::{Component, Pad, Stage};
use super::id::{EdgeId, NodeId};
use crate::error::{OdeError, Result};
use std::collections::VecDeque;
use std::sync::Arc;

/// Compiles a pipeline's member components into a linked, ordered graph
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Compile the members of a pipeline.
    ///
    /// Components are stage-sorted (stable, so insertion order breaks ties),
    /// sources get ids in insertion order, and links are made stage to stage:
    /// every source feeds the first processing component, processing
    /// components form a chain, and the last of them fans out to every sink.
    ///
    /// Fails with `InvalidState` when there is no source to pull buffers from.
    pub fn compile(
        pipeline: &str,
        members: &[Arc<Component>],
        generation: u64,
    ) -> Result<CompiledGraph> {
        let start_time = std::time::Instant::now();

        // Source ids follow insertion order, before stage sorting
        let mut next_source_id = 0u32;
        let mut placed: Vec<(Arc<Component>, Option<u32>)> = members
            .iter()
            .map(|c| {
                let source_id = (c.stage() == Stage::Source).then(|| {
                    next_source_id += 1;
                    next_source_id - 1
                });
                (c.clone(), source_id)
            })
            .collect();

        if next_source_id == 0 {
            return Err(OdeError::InvalidState(format!(
                "pipeline '{}' has no source component",
                pipeline
            )));
        }

        placed.sort_by_key(|(c, _)| c.stage());

        let nodes: Vec<GraphNode> = placed
            .into_iter()
            .enumerate()
            .map(|(i, (component, source_id))| GraphNode {
                id: NodeId(i as u32),
                component,
                source_id,
            })
            .collect();

        let edges = Self::link(&nodes);
        let execution_order = Self::topological_sort(nodes.len(), &edges);
        if execution_order.len() != nodes.len() {
            return Err(OdeError::InvalidState(format!(
                "pipeline '{}' graph has a cycle: only {} of {} components scheduled",
                pipeline,
                execution_order.len(),
                nodes.len()
            )));
        }

        let attached_handlers = nodes
            .iter()
            .map(|n| {
                n.component.handlers(Pad::Sink).len() + n.component.handlers(Pad::Src).len()
            })
            .sum();

        let stats = GraphStats {
            total_nodes: nodes.len(),
            source_nodes: next_source_id as usize,
            sink_nodes: nodes.iter().filter(|n| n.component.stage() == Stage::Sink).count(),
            attached_handlers,
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(CompiledGraph {
            pipeline: pipeline.to_string(),
            nodes,
            edges,
            execution_order,
            generation,
            stats,
        })
    }

    /// Build stage-to-stage links over stage-sorted nodes.
    fn link(nodes: &[GraphNode]) -> Vec<GraphEdge> {
        let by_stage = |pred: &dyn Fn(Stage) -> bool| -> Vec<NodeId> {
            nodes
                .iter()
                .filter(|n| pred(n.component.stage()))
                .map(|n| n.id)
                .collect()
        };
        let sources = by_stage(&|s: Stage| s == Stage::Source);
        let chain = by_stage(&|s: Stage| s != Stage::Source && s != Stage::Sink);
        let sinks = by_stage(&|s: Stage| s == Stage::Sink);

        let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
        match (chain.first(), chain.last()) {
            (Some(&first), Some(&last)) => {
                pairs.extend(sources.iter().map(|&s| (s, first)));
                pairs.extend(chain.windows(2).map(|w| (w[0], w[1])));
                pairs.extend(sinks.iter().map(|&s| (last, s)));
            }
            _ => {
                for &source in &sources {
                    pairs.extend(sinks.iter().map(|&sink| (source, sink)));
                }
            }
        }

        pairs
            .into_iter()
            .enumerate()
            .map(|(i, (from, to))| GraphEdge {
                id: EdgeId(i as u32),
                from,
                to,
            })
            .collect()
    }

    /// Kahn's algorithm. FIFO over ascending node ids so the order is stable.
    fn topological_sort(n: usize, edges: &[GraphEdge]) -> Vec<NodeId> {
        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

        for edge in edges {
            let from = edge.from.index();
            let to = edge.to.index();
            if from < n && to < n {
                adj[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(NodeId(node as u32));
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        order
    }
}
