//! Resilient execution: retries, dead-lettering, and supervised node
//! restarts backed by a bounded materialization buffer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{
    ExecutionStrategyKind, NodeRuntime, ResilientOptions, TRACING_TARGET, parallel, sequential,
};
use crate::definition::NodeId;
use crate::error::{Error, Result};
use crate::handler::PipelineDecision;
use crate::node::{DynTransform, NodeInstance};
use crate::pipe::{DataPipe, Item};

/// Bounded replay buffer of items consumed but not yet fully processed.
///
/// Items enter on intake and leave once their output was emitted (or they
/// were skipped, dead-lettered, or dropped by policy). Exceeding the cap
/// fails the node; the bound is what makes restarts safe without unbounded
/// memory.
pub(crate) struct Materializer {
    node_id: NodeId,
    cap: usize,
    pending: Mutex<BTreeMap<u64, Item>>,
}

impl Materializer {
    pub(crate) fn new(node_id: NodeId, cap: usize) -> Self {
        Self {
            node_id,
            cap,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records an item as pending.
    pub(crate) fn insert(&self, seq: u64, item: Item) -> Result<()> {
        let mut pending = self.pending.lock().expect("materializer lock poisoned");
        if pending.len() >= self.cap {
            return Err(Error::MaterializationCapExceeded {
                node_id: self.node_id,
                cap: self.cap,
            });
        }
        pending.insert(seq, item);
        Ok(())
    }

    /// Marks an item as fully handled.
    pub(crate) fn ack(&self, seq: u64) {
        self.pending
            .lock()
            .expect("materializer lock poisoned")
            .remove(&seq);
    }

    /// Takes all pending items in intake order, clearing the buffer.
    pub(crate) fn drain(&self) -> Vec<Item> {
        let mut pending = self.pending.lock().expect("materializer lock poisoned");
        std::mem::take(&mut *pending).into_values().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().expect("materializer lock poisoned").len()
    }
}

/// Prepends replayed items to the remaining upstream input.
fn chain_replay(replay: Vec<Item>, mut rest: DataPipe, rt: &NodeRuntime) -> DataPipe {
    let element = rest.element();
    let ctx = rt.ctx.clone();
    DataPipe::from_stream(
        element,
        stream! {
            for item in replay {
                yield Ok(item);
            }
            while let Some(next) = rest.next(&ctx).await {
                yield next;
            }
        }
        .boxed(),
    )
}

pub(crate) async fn run(
    rt: &Arc<NodeRuntime>,
    options: &ResilientOptions,
    transform: Arc<dyn DynTransform>,
    input: DataPipe,
    out_tx: &mpsc::Sender<Item>,
) -> Result<()> {
    let materializer = Arc::new(Materializer::new(
        rt.node_id,
        rt.retry.max_materialized_items,
    ));
    let mut transform = transform;
    let mut current_input = input;
    let mut restarts: u32 = 0;

    loop {
        let result = match options.inner.as_deref() {
            Some(ExecutionStrategyKind::Parallel(parallel_options)) => {
                parallel::run(
                    rt,
                    parallel_options,
                    transform.clone(),
                    &mut current_input,
                    out_tx,
                    Some(&materializer),
                )
                .await
            }
            _ => {
                sequential::run(
                    rt,
                    transform.clone(),
                    &mut current_input,
                    out_tx,
                    Some(&materializer),
                )
                .await
            }
        };

        let err = match result {
            Ok(()) => return Ok(()),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => err,
        };

        let decision = rt
            .pipeline_handler
            .handle_node_failure(rt.node_id, &err, &rt.ctx)
            .await;
        match decision {
            PipelineDecision::ContinueWithoutNode => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    node_id = %rt.node_id,
                    error = %err,
                    "Node terminated, pipeline continues without it"
                );
                return Ok(());
            }
            PipelineDecision::FailPipeline => return Err(err),
            PipelineDecision::RestartNode => {
                if restarts >= rt.retry.max_node_restart_attempts {
                    return Err(Error::RetryLimitExhausted {
                        node_id: rt.node_id,
                        name: rt.name.clone(),
                        attempts: rt.retry.max_node_restart_attempts,
                        source: err.into_boxed(),
                    });
                }
                restarts += 1;
                rt.counters.restart();
                if let Some(metrics) = &rt.pipeline_metrics {
                    metrics.node_restarted(rt.node_id, restarts);
                }
                tracing::warn!(
                    target: TRACING_TARGET,
                    node_id = %rt.node_id,
                    attempt = restarts,
                    error = %err,
                    "Restarting node and replaying materialized items"
                );

                // Upstream flow is implicitly paused while nothing pulls.
                // Drop the old instance, rebuild through the factory, and
                // replay pending items ahead of the remaining input.
                let definition = rt.graph.node(rt.node_id).ok_or_else(|| {
                    Error::Internal(format!("node {} missing from graph", rt.node_id))
                })?;
                let instance = rt.factory.create(definition, &rt.graph)?;
                let NodeInstance::Transform(rebuilt) = instance else {
                    return Err(Error::Internal(format!(
                        "factory rebuilt node {} as a non-transform",
                        rt.node_id
                    )));
                };
                transform = rebuilt;

                let replay = materializer.drain();
                current_input = chain_replay(replay, current_input, rt);
            }
        }
    }
}
