//! Tracing-backed observability sinks.

use std::sync::Arc;
use std::time::Duration;

use super::{
    ItemLineageSink, NodeMetricsSink, ObservabilityFactory, PipelineLineageSink,
    PipelineMetricsSink,
};
use crate::definition::{GraphSummary, NodeId, RunId};
use crate::engine::RunReport;
use crate::pipe::Item;

/// Tracing target for metrics and lineage events.
const TRACING_TARGET: &str = "weir::observe";

#[derive(Debug, Default)]
struct TracingSink;

impl NodeMetricsSink for TracingSink {
    fn item_in(&self, node: NodeId) {
        tracing::trace!(target: TRACING_TARGET, node_id = %node, "item in");
    }

    fn item_out(&self, node: NodeId) {
        tracing::trace!(target: TRACING_TARGET, node_id = %node, "item out");
    }

    fn error(&self, node: NodeId) {
        tracing::debug!(target: TRACING_TARGET, node_id = %node, "item error");
    }

    fn retry(&self, node: NodeId) {
        tracing::debug!(target: TRACING_TARGET, node_id = %node, "item retry");
    }

    fn processing_time(&self, node: NodeId, elapsed: Duration) {
        tracing::trace!(
            target: TRACING_TARGET,
            node_id = %node,
            elapsed_us = elapsed.as_micros() as u64,
            "item processed"
        );
    }
}

impl PipelineMetricsSink for TracingSink {
    fn run_started(&self, run_id: RunId) {
        tracing::info!(target: TRACING_TARGET, run_id = %run_id, "Run started");
    }

    fn run_finished(&self, report: &RunReport) {
        tracing::info!(
            target: TRACING_TARGET,
            run_id = %report.run_id,
            success = report.success,
            nodes = report.nodes.len(),
            "Run finished"
        );
    }

    fn node_restarted(&self, node: NodeId, attempt: u32) {
        tracing::warn!(
            target: TRACING_TARGET,
            node_id = %node,
            attempt,
            "Node restarted"
        );
    }
}

impl ItemLineageSink for TracingSink {
    fn item_derived(&self, node: NodeId, _parent: &Item, _child: &Item) {
        tracing::trace!(target: TRACING_TARGET, node_id = %node, "item derived");
    }
}

impl PipelineLineageSink for TracingSink {
    fn run_structure(&self, run_id: RunId, summary: &GraphSummary) {
        tracing::debug!(
            target: TRACING_TARGET,
            run_id = %run_id,
            nodes = summary.nodes.len(),
            edges = summary.edges.len(),
            "Run structure"
        );
    }
}

/// Observability factory reporting everything through `tracing`.
#[derive(Clone)]
pub struct TracingObservability {
    sink: Arc<TracingSink>,
}

impl TracingObservability {
    /// Creates the factory.
    pub fn new() -> Self {
        Self {
            sink: Arc::new(TracingSink),
        }
    }
}

impl Default for TracingObservability {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservabilityFactory for TracingObservability {
    fn node_metrics(&self) -> Option<Arc<dyn NodeMetricsSink>> {
        Some(self.sink.clone())
    }

    fn pipeline_metrics(&self) -> Option<Arc<dyn PipelineMetricsSink>> {
        Some(self.sink.clone())
    }

    fn item_lineage(&self) -> Option<Arc<dyn ItemLineageSink>> {
        Some(self.sink.clone())
    }

    fn pipeline_lineage(&self) -> Option<Arc<dyn PipelineLineageSink>> {
        Some(self.sink.clone())
    }
}

impl std::fmt::Debug for TracingObservability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingObservability").finish()
    }
}
