//! Dead-letter sinks for items that failed irrecoverably.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use jiff::Timestamp;

use crate::definition::NodeId;
use crate::error::{Error, Result};
use crate::pipe::Item;

/// Tracing target for dead-letter routing.
const TRACING_TARGET: &str = "weir::dead_letter";

/// A dead-lettered item together with where and why it failed.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    /// Node the item failed in.
    pub node_id: NodeId,
    /// The failed item.
    pub item: Item,
    /// The failure that sent the item here.
    pub error: Arc<Error>,
    /// When the entry was recorded.
    pub time: Timestamp,
}

impl DeadLetterEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(node_id: NodeId, item: Item, error: Arc<Error>) -> Self {
        Self {
            node_id,
            item,
            error,
            time: Timestamp::now(),
        }
    }
}

/// Terminal sink for items that failed irrecoverably.
///
/// Persistence is the sink's concern; the engine only hands entries over.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Records a dead-lettered item.
    async fn dead_letter(&self, entry: DeadLetterEntry) -> Result<()>;
}

/// In-memory recording sink, the default when none is configured.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded entries.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().expect("dead-letter lock poisoned").clone()
    }

    /// Returns how many entries were recorded.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("dead-letter lock poisoned").len()
    }

    /// Returns whether no entries were recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn dead_letter(&self, entry: DeadLetterEntry) -> Result<()> {
        self.entries
            .lock()
            .expect("dead-letter lock poisoned")
            .push(entry);
        Ok(())
    }
}

/// Sink that only logs entries through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn dead_letter(&self, entry: DeadLetterEntry) -> Result<()> {
        tracing::warn!(
            target: TRACING_TARGET,
            node_id = %entry.node_id,
            error = %entry.error,
            "Item dead-lettered"
        );
        Ok(())
    }
}

/// Capacity guard wrapped around the configured sink.
///
/// Reaching the capacity fails the pipeline instead of growing without
/// bound.
pub(crate) struct BoundedDeadLetterSink {
    inner: Arc<dyn DeadLetterSink>,
    capacity: Option<usize>,
    used: AtomicUsize,
}

impl BoundedDeadLetterSink {
    pub(crate) fn new(inner: Arc<dyn DeadLetterSink>, capacity: Option<usize>) -> Self {
        Self {
            inner,
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    /// Returns how many entries passed through this run.
    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeadLetterSink for BoundedDeadLetterSink {
    async fn dead_letter(&self, entry: DeadLetterEntry) -> Result<()> {
        let seen = self.used.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(capacity) = self.capacity
            && seen > capacity
        {
            return Err(Error::DeadLetterCapacityExceeded { capacity });
        }
        self.inner.dead_letter(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DeadLetterEntry {
        DeadLetterEntry::new(
            NodeId::new(),
            Item::new(7u32),
            Arc::new(Error::Internal("boom".into())),
        )
    }

    #[tokio::test]
    async fn test_in_memory_sink_records() {
        let sink = InMemoryDeadLetterSink::new();
        sink.dead_letter(entry()).await.unwrap();
        sink.dead_letter(entry()).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.entries()[0].item.downcast_ref::<u32>(), Some(&7));
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let sink = BoundedDeadLetterSink::new(Arc::new(InMemoryDeadLetterSink::new()), Some(1));
        sink.dead_letter(entry()).await.unwrap();
        let err = sink.dead_letter(entry()).await.unwrap_err();
        assert_eq!(err.code(), "DeadLetterCapacityExceeded");
    }

    #[tokio::test]
    async fn test_unbounded_sink_accepts_everything() {
        let sink = BoundedDeadLetterSink::new(Arc::new(InMemoryDeadLetterSink::new()), None);
        for _ in 0..32 {
            sink.dead_letter(entry()).await.unwrap();
        }
        assert_eq!(sink.used(), 32);
    }
}
