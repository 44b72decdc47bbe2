//! The frozen pipeline graph.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::{EdgeDefinition, GraphMetadata, NodeDefinition, NodeId, NodeKind, PipelineOptions};
use crate::error::{Error, Result};
use crate::handler::{DeadLetterSink, PipelineErrorHandler};
use crate::retry::RetryOptions;
use crate::strategy::ExecutionStrategyKind;
use crate::validate::ValidationIssue;

/// An immutable, validated pipeline graph.
///
/// Produced by [`PipelineBuilder::build`](super::PipelineBuilder::build);
/// node identity, kinds, and types cannot change afterwards. Internally
/// backed by petgraph's `DiGraph` for traversal.
pub struct PipelineGraph {
    graph: DiGraph<NodeDefinition, ()>,
    node_indices: HashMap<NodeId, NodeIndex>,
    index_to_id: HashMap<NodeIndex, NodeId>,
    /// All declared edges, in declaration order. Kept separately from the
    /// petgraph structure so validation can report edges whose endpoints
    /// do not resolve.
    edges: Vec<EdgeDefinition>,
    options: PipelineOptions,
    metadata: GraphMetadata,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    pipeline_handler: Option<Arc<dyn PipelineErrorHandler>>,
    warnings: Vec<ValidationIssue>,
}

impl PipelineGraph {
    pub(crate) fn from_parts(
        nodes: Vec<NodeDefinition>,
        edges: Vec<EdgeDefinition>,
        options: PipelineOptions,
        metadata: GraphMetadata,
        dead_letter: Option<Arc<dyn DeadLetterSink>>,
        pipeline_handler: Option<Arc<dyn PipelineErrorHandler>>,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();
        let mut index_to_id = HashMap::new();
        for node in nodes {
            let id = node.id();
            let index = graph.add_node(node);
            node_indices.insert(id, index);
            index_to_id.insert(index, id);
        }
        for edge in &edges {
            if let (Some(&from), Some(&to)) =
                (node_indices.get(&edge.from), node_indices.get(&edge.to))
            {
                graph.add_edge(from, to, ());
            }
        }
        Self {
            graph,
            node_indices,
            index_to_id,
            edges,
            options,
            metadata,
            dead_letter,
            pipeline_handler,
            warnings: Vec::new(),
        }
    }

    /// Returns the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of declared edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns a node definition by ID.
    pub fn node(&self, id: NodeId) -> Option<&NodeDefinition> {
        let index = self.node_indices.get(&id)?;
        self.graph.node_weight(*index)
    }

    /// Returns a node definition by display name.
    pub fn node_by_name(&self, name: &str) -> Option<&NodeDefinition> {
        self.graph.node_weights().find(|n| n.name() == name)
    }

    /// Returns an iterator over all node definitions.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDefinition> {
        self.graph.node_weights()
    }

    /// Returns an iterator over all node IDs.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_indices.keys().copied()
    }

    /// Returns all declared edges, in declaration order.
    pub fn edges(&self) -> &[EdgeDefinition] {
        &self.edges
    }

    /// Returns edges targeting a node, in declaration order.
    pub fn incoming_edges(&self, id: NodeId) -> impl Iterator<Item = &EdgeDefinition> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Returns edges originating from a node, in declaration order.
    pub fn outgoing_edges(&self, id: NodeId) -> impl Iterator<Item = &EdgeDefinition> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Returns all source nodes.
    pub fn source_nodes(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Source)
    }

    /// Returns all sink nodes.
    pub fn sink_nodes(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Sink)
    }

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let node = self.graph.node_weight(index)?;
                (node.kind() == kind).then(|| node.id())
            })
            .collect()
    }

    /// Returns nodes in topological order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .into_iter()
                    .filter_map(|index| self.index_to_id.get(&index).copied())
                    .collect()
            })
            .map_err(|_| Error::Internal("validated graph contains a cycle".into()))
    }

    /// Returns the retry options in effect for a node: node-scoped options
    /// from the resilient strategy, the pipeline default, or the built-in
    /// default, in that order.
    pub fn effective_retry(&self, id: NodeId) -> RetryOptions {
        if let Some(node) = self.node(id)
            && let ExecutionStrategyKind::Resilient(options) = node.strategy()
            && let Some(retry) = &options.retry
        {
            return retry.clone();
        }
        self.options.retry.clone().unwrap_or_default()
    }

    /// Returns the pipeline options.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Returns the graph metadata.
    pub fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    /// Returns the configured dead-letter sink, if any.
    pub fn dead_letter(&self) -> Option<Arc<dyn DeadLetterSink>> {
        self.dead_letter.clone()
    }

    /// Returns the configured pipeline-level error handler, if any.
    pub fn pipeline_handler(&self) -> Option<Arc<dyn PipelineErrorHandler>> {
        self.pipeline_handler.clone()
    }

    /// Validation warnings recorded at build time.
    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    pub(crate) fn set_warnings(&mut self, warnings: Vec<ValidationIssue>) {
        self.warnings = warnings;
    }

    /// Returns the underlying petgraph structure.
    pub(crate) fn inner(&self) -> &DiGraph<NodeDefinition, ()> {
        &self.graph
    }

    /// Returns the petgraph index for a node.
    pub(crate) fn node_index(&self, id: NodeId) -> Option<NodeIndex> {
        self.node_indices.get(&id).copied()
    }

    /// Returns the node ID for a petgraph index.
    pub(crate) fn node_id_of(&self, index: NodeIndex) -> Option<NodeId> {
        self.index_to_id.get(&index).copied()
    }

    /// Returns a serializable structural summary (ids, names, kinds, edges).
    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            metadata: self.metadata.clone(),
            nodes: self
                .nodes()
                .map(|node| NodeSummary {
                    id: node.id(),
                    name: node.name().to_owned(),
                    kind: node.kind(),
                    input: node.input().map(|t| t.name().to_owned()),
                    output: node.output().map(|t| t.name().to_owned()),
                })
                .collect(),
            edges: self.edges.clone(),
        }
    }
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Serializable structural description of a graph, for hosts that persist
/// or display topology.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphSummary {
    /// Graph metadata.
    pub metadata: GraphMetadata,
    /// Node descriptions.
    pub nodes: Vec<NodeSummary>,
    /// Declared edges.
    pub edges: Vec<EdgeDefinition>,
}

/// Serializable description of one node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeSummary {
    /// Node ID.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Input element type name, if any.
    pub input: Option<String>,
    /// Output element type name, if any.
    pub output: Option<String>,
}
