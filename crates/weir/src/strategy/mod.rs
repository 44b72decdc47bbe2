//! Execution strategies: how a transform's per-item function is driven.
//!
//! A strategy turns a [`DynTransform`] plus an input pipe into a worker (or
//! worker pool) feeding an output channel. Item-level failures are routed
//! through the node's error handler here, so retry, skip, and dead-letter
//! decisions resolve locally; only node-fatal failures escape to the
//! scheduler.

mod options;
mod parallel;
mod queue;
mod resilient;
mod sequential;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

pub use options::{
    ExecutionStrategyKind, ParallelOptions, ParallelOptionsBuilder, QueuePolicy, ResilientOptions,
    WorkloadProfile,
};
pub(crate) use options::available_cores;
pub(crate) use queue::{PolicyQueue, PushOutcome};

use crate::definition::{NodeId, PipelineGraph};
use crate::engine::{NodeCounters, PipelineContext};
use crate::error::{Error, Result};
use crate::handler::{
    BoundedDeadLetterSink, DeadLetterEntry, DeadLetterSink, ItemDecision, ItemErrorHandler,
    NodeRef, PipelineErrorHandler,
};
use crate::node::{DynTransform, NodeFactory};
use crate::observe::{ItemLineageSink, NodeMetricsSink, PipelineMetricsSink};
use crate::pipe::{DataPipe, Item};
use crate::retry::{DelayState, RetryOptions};

/// Tracing target for strategy workers.
pub(crate) const TRACING_TARGET: &str = "weir::strategy";

/// Everything a node's workers need, resolved once at wiring time.
pub(crate) struct NodeRuntime {
    pub(crate) node_id: NodeId,
    pub(crate) name: String,
    pub(crate) ctx: PipelineContext,
    pub(crate) graph: Arc<PipelineGraph>,
    pub(crate) factory: Arc<dyn NodeFactory>,
    pub(crate) counters: Arc<NodeCounters>,
    pub(crate) metrics: Option<Arc<dyn NodeMetricsSink>>,
    pub(crate) lineage: Option<Arc<dyn ItemLineageSink>>,
    pub(crate) pipeline_metrics: Option<Arc<dyn PipelineMetricsSink>>,
    pub(crate) handler: Arc<dyn ItemErrorHandler>,
    pub(crate) pipeline_handler: Arc<dyn PipelineErrorHandler>,
    pub(crate) dead_letter: Arc<BoundedDeadLetterSink>,
    pub(crate) retry: RetryOptions,
}

impl NodeRuntime {
    pub(crate) fn node_ref(&self) -> NodeRef<'_> {
        NodeRef {
            id: self.node_id,
            name: &self.name,
        }
    }

    /// Marks one item consumed from upstream.
    pub(crate) fn mark_in(&self) {
        self.counters.item_in();
        if let Some(metrics) = &self.metrics {
            metrics.item_in(self.node_id);
        }
    }
}

/// Outcome of fully processing one item through the error policy.
pub(crate) enum ItemOutcome {
    /// The item produced an output.
    Emitted(Item),
    /// The item was consumed without output (skip or dead-letter).
    Consumed,
    /// Processing failed fatally for this node.
    Fatal(Error),
}

/// Runs one item through the transform, the retry policy, and the node
/// error handler until it is emitted, consumed, or fatal.
pub(crate) async fn process_item(
    rt: &NodeRuntime,
    transform: &dyn DynTransform,
    item: Item,
) -> ItemOutcome {
    let mut attempt: u32 = 1;
    let mut delay_state = DelayState::new();

    loop {
        let started = Instant::now();
        match transform.execute_item(item.clone(), &rt.ctx).await {
            Ok(output) => {
                rt.counters.item_out();
                if let Some(metrics) = &rt.metrics {
                    metrics.processing_time(rt.node_id, started.elapsed());
                    metrics.item_out(rt.node_id);
                }
                if let Some(lineage) = &rt.lineage {
                    lineage.item_derived(rt.node_id, &item, &output);
                }
                return ItemOutcome::Emitted(output);
            }
            Err(Error::Cancelled) => return ItemOutcome::Fatal(Error::Cancelled),
            Err(err) => {
                rt.counters.error();
                if let Some(metrics) = &rt.metrics {
                    metrics.error(rt.node_id);
                }
                let decision = rt.handler.handle(rt.node_ref(), &item, &err, &rt.ctx).await;
                match decision {
                    ItemDecision::Retry => {
                        if !rt.retry.allows_attempt(attempt) {
                            return ItemOutcome::Fatal(Error::RetryLimitExhausted {
                                node_id: rt.node_id,
                                name: rt.name.clone(),
                                attempts: rt.retry.max_attempts,
                                source: err.into_boxed(),
                            });
                        }
                        rt.counters.retry();
                        if let Some(metrics) = &rt.metrics {
                            metrics.retry(rt.node_id);
                        }
                        let delay = rt.retry.delay_for(attempt, &mut delay_state);
                        if !delay.is_zero() {
                            tokio::select! {
                                biased;

                                () = rt.ctx.cancelled() => {
                                    return ItemOutcome::Fatal(Error::Cancelled);
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        attempt += 1;
                    }
                    ItemDecision::Skip => {
                        tracing::warn!(
                            target: TRACING_TARGET,
                            node_id = %rt.node_id,
                            error = %err,
                            "Item skipped by error handler"
                        );
                        return ItemOutcome::Consumed;
                    }
                    ItemDecision::DeadLetter | ItemDecision::Redirect => {
                        return match send_dead_letter(rt, item, err).await {
                            Ok(()) => ItemOutcome::Consumed,
                            Err(fatal) => ItemOutcome::Fatal(fatal),
                        };
                    }
                    ItemDecision::Fail => {
                        return ItemOutcome::Fatal(Error::item_failed(
                            rt.node_id,
                            &rt.name,
                            err.into_boxed(),
                        ));
                    }
                }
            }
        }
    }
}

/// Surfaces an item discarded by a drop queue policy to the error handler.
///
/// The event is non-retryable and sanctioned by configuration:
/// `DeadLetter`/`Redirect` route the discarded item to the dead-letter sink,
/// every other decision lets it go with a warning.
pub(crate) async fn handle_dropped(rt: &NodeRuntime, item: Item) -> Result<()> {
    let err = Error::DroppedByPolicy {
        node_id: rt.node_id,
    };
    rt.counters.error();
    if let Some(metrics) = &rt.metrics {
        metrics.error(rt.node_id);
    }
    let decision = rt.handler.handle(rt.node_ref(), &item, &err, &rt.ctx).await;
    match decision {
        ItemDecision::DeadLetter | ItemDecision::Redirect => send_dead_letter(rt, item, err).await,
        ItemDecision::Retry | ItemDecision::Skip | ItemDecision::Fail => {
            tracing::warn!(
                target: TRACING_TARGET,
                node_id = %rt.node_id,
                "Item dropped by queue policy"
            );
            Ok(())
        }
    }
}

async fn send_dead_letter(rt: &NodeRuntime, item: Item, err: Error) -> Result<()> {
    rt.counters.dead_lettered();
    let entry = DeadLetterEntry::new(rt.node_id, item, Arc::new(err));
    rt.dead_letter.dead_letter(entry).await
}

/// Drives a transform node under its configured strategy until its input is
/// exhausted, its consumers are gone, or it fails fatally.
pub(crate) async fn run_transform(
    kind: ExecutionStrategyKind,
    rt: Arc<NodeRuntime>,
    transform: Arc<dyn DynTransform>,
    mut input: DataPipe,
    out_tx: mpsc::Sender<Item>,
) -> Result<()> {
    match kind {
        ExecutionStrategyKind::Sequential => {
            sequential::run(&rt, transform, &mut input, &out_tx, None).await
        }
        ExecutionStrategyKind::Parallel(options) => {
            parallel::run(&rt, &options, transform, &mut input, &out_tx, None).await
        }
        ExecutionStrategyKind::Resilient(options) => {
            resilient::run(&rt, &options, transform, input, &out_tx).await
        }
    }
}

pub(crate) use resilient::Materializer;
