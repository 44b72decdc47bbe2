//! Pipeline- and node-scoped options.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::retry::RetryOptions;

/// How a node with several inbound edges consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum MergeOrder {
    /// Drain inbound pipes fully, in edge declaration order. The default.
    #[default]
    Concatenate,
    /// Round-robin between inbound pipes, skipping exhausted ones.
    Interleave,
}

/// Per-node options that are graph configuration rather than node logic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeOptions {
    /// Merge order for nodes with multiple inbound edges.
    pub merge_order: MergeOrder,
}

impl NodeOptions {
    /// Creates default node options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge order.
    pub fn with_merge_order(mut self, order: MergeOrder) -> Self {
        self.merge_order = order;
        self
    }
}

/// Pipeline-scoped options applied where nodes configure nothing narrower.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineOptions {
    /// Default retry options for nodes without their own.
    pub retry: Option<RetryOptions>,
    /// Bounded capacity of the dead-letter sink; reaching it fails the run.
    pub dead_letter_capacity: Option<usize>,
}

impl PipelineOptions {
    /// Creates default pipeline options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default retry options.
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Bounds the dead-letter sink.
    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = Some(capacity);
        self
    }
}
