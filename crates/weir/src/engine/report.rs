//! Run reports and per-node counters.

use std::sync::atomic::{AtomicU64, Ordering};

use jiff::Timestamp;
use serde::Serialize;

use crate::definition::{NodeId, RunId};

/// Live counters updated by a node's workers during a run.
#[derive(Debug, Default)]
pub(crate) struct NodeCounters {
    items_in: AtomicU64,
    items_out: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    restarts: AtomicU64,
    dead_lettered: AtomicU64,
}

impl NodeCounters {
    pub(crate) fn item_in(&self) {
        self.items_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn item_out(&self) {
        self.items_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, node_id: NodeId, name: String) -> NodeReport {
        NodeReport {
            node_id,
            name,
            items_in: self.items_in.load(Ordering::Relaxed),
            items_out: self.items_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Final counters for one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Node ID.
    pub node_id: NodeId,
    /// Display name.
    pub name: String,
    /// Items the node consumed.
    pub items_in: u64,
    /// Items the node produced.
    pub items_out: u64,
    /// Item-level errors raised.
    pub errors: u64,
    /// Item retries performed.
    pub retries: u64,
    /// Times the node was restarted.
    pub restarts: u64,
    /// Items routed to the dead-letter sink.
    pub dead_lettered: u64,
}

/// Summary of one pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: RunId,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
    /// Whether the run completed without a fatal error.
    pub success: bool,
    /// Per-node counters.
    pub nodes: Vec<NodeReport>,
    /// Total items routed to the dead-letter sink.
    pub dead_letters: u64,
}

impl RunReport {
    /// End-to-end wall-clock duration.
    pub fn duration(&self) -> jiff::SignedDuration {
        self.finished_at.duration_since(self.started_at)
    }

    /// Returns the report for a node, by name.
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }
}
