//! Parallel execution: a bounded worker pool with queue policies and
//! optional order preservation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{
    ItemOutcome, Materializer, NodeRuntime, ParallelOptions, PolicyQueue, PushOutcome,
    QueuePolicy, TRACING_TARGET, handle_dropped, process_item,
};
use crate::error::{Error, Result};
use crate::node::DynTransform;
use crate::pipe::{DataPipe, Item};

enum WorkerMsg {
    /// Item `seq` produced an output.
    Done(u64, Item),
    /// Item `seq` was consumed without output (skip or dead-letter).
    Consumed(u64),
    /// A worker failed fatally.
    Fatal(Error),
}

/// Heap entry for the reorder buffer; ordered by sequence number.
struct PendingEntry {
    seq: u64,
    output: Option<Item>,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seq.cmp(&other.seq)
    }
}

pub(crate) async fn run(
    rt: &Arc<NodeRuntime>,
    options: &ParallelOptions,
    transform: Arc<dyn DynTransform>,
    input: &mut DataPipe,
    out_tx: &mpsc::Sender<Item>,
    materializer: Option<&Arc<Materializer>>,
) -> Result<()> {
    let mut policy = options.queue_policy;
    if policy.drops() && options.max_queue_length.is_none() {
        tracing::warn!(
            target: TRACING_TARGET,
            node_id = %rt.node_id,
            "Drop policy without a bounded queue never drops; running as Block"
        );
        policy = QueuePolicy::Block;
    }

    let queue = Arc::new(PolicyQueue::new(options.max_queue_length, policy));
    let (result_tx, mut result_rx) = mpsc::channel::<WorkerMsg>(options.output_capacity());
    // Lets the collector stop a dispatcher that is blocked on an idle
    // upstream once the node is shutting down.
    let abort = CancellationToken::new();

    let mut workers: JoinSet<()> = JoinSet::new();
    for _ in 0..options.max_degree_of_parallelism {
        let queue = queue.clone();
        let tx = result_tx.clone();
        let rt = rt.clone();
        let transform = transform.clone();
        workers.spawn(async move {
            while let Some((seq, item)) = queue.pop(&rt.ctx).await {
                let msg = match process_item(&rt, &*transform, item).await {
                    ItemOutcome::Emitted(output) => WorkerMsg::Done(seq, output),
                    ItemOutcome::Consumed => WorkerMsg::Consumed(seq),
                    ItemOutcome::Fatal(err) => {
                        let _ = tx.send(WorkerMsg::Fatal(err)).await;
                        break;
                    }
                };
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    // The dispatcher feeds the queue from upstream; it closes the queue on
    // every exit path so workers always terminate.
    let dispatcher = async {
        let result = async {
            let mut seq: u64 = 0;
            loop {
                let next = tokio::select! {
                    biased;

                    () = abort.cancelled() => None,
                    next = input.next(&rt.ctx) => next,
                };
                let Some(next) = next else { break };
                let item = next?;
                rt.mark_in();
                if let Some(mat) = materializer {
                    mat.insert(seq, item.clone())?;
                }
                match queue.push(seq, item, &rt.ctx).await? {
                    PushOutcome::Queued => {}
                    PushOutcome::DroppedOldest(dropped_seq, dropped)
                    | PushOutcome::DroppedNewest(dropped_seq, dropped) => {
                        if let Some(mat) = materializer {
                            mat.ack(dropped_seq);
                        }
                        handle_dropped(rt, dropped).await?;
                    }
                }
                seq += 1;
            }
            Ok(())
        }
        .await;
        queue.close();
        result
    };

    // The collector forwards worker results downstream, reordering when
    // configured. On failure or when consumers go away it keeps draining
    // worker messages so the pool can wind down without blocking.
    let collector = async {
        let mut outcome: Result<()> = Ok(());
        let mut draining = false;
        let mut pending: BinaryHeap<Reverse<PendingEntry>> = BinaryHeap::new();
        let mut next_emit: u64 = 0;

        while let Some(msg) = result_rx.recv().await {
            if draining {
                continue;
            }
            let (seq, output) = match msg {
                WorkerMsg::Fatal(err) => {
                    outcome = Err(err);
                    draining = true;
                    abort.cancel();
                    queue.close();
                    continue;
                }
                WorkerMsg::Done(seq, output) => (seq, Some(output)),
                WorkerMsg::Consumed(seq) => (seq, None),
            };

            if !options.preserve_ordering {
                if let Some(output) = output {
                    if out_tx.send(output).await.is_err() {
                        draining = true;
                        abort.cancel();
                        queue.close();
                        continue;
                    }
                }
                if let Some(mat) = materializer {
                    mat.ack(seq);
                }
                continue;
            }

            pending.push(Reverse(PendingEntry { seq, output }));
            while pending
                .peek()
                .is_some_and(|Reverse(entry)| entry.seq == next_emit)
            {
                let Reverse(entry) = pending.pop().expect("peeked entry exists");
                if let Some(output) = entry.output
                    && out_tx.send(output).await.is_err()
                {
                    draining = true;
                    abort.cancel();
                    queue.close();
                    break;
                }
                if let Some(mat) = materializer {
                    mat.ack(entry.seq);
                }
                next_emit += 1;
            }
        }
        outcome
    };

    let (dispatch_result, collect_result) = futures::future::join(dispatcher, collector).await;
    while workers.join_next().await.is_some() {}

    collect_result?;
    match dispatch_result {
        // A closed-queue push failure only happens after the collector
        // already shut the run down; the collector's verdict stands.
        Err(Error::Internal(_)) => Ok(()),
        other => other,
    }
}
