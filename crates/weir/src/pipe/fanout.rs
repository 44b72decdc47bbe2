//! Output duplication for nodes with multiple downstream consumers.

use tokio::sync::mpsc;

use super::{DataPipe, Item};
use crate::engine::PipelineContext;
use crate::error::{Error, Result};

/// Tracing target for pipe plumbing.
const TRACING_TARGET: &str = "weir::pipe";

/// Pumps a pipe into one or more bounded consumer channels.
///
/// Each item is cloned per consumer (payloads are shared, see
/// [`Item`]). A full channel suspends the pump, so the slowest consumer
/// applies backpressure end-to-end. Consumers that have gone away are
/// dropped from the set; once every consumer is gone the remaining input is
/// discarded without being pulled.
///
/// Returns an error when the upstream pipe itself fails; the caller owns
/// attributing that failure to the producing node.
pub(crate) async fn pump(
    mut pipe: DataPipe,
    outputs: Vec<mpsc::Sender<Item>>,
    ctx: &PipelineContext,
    mut on_item: impl FnMut(&Item),
) -> Result<()> {
    let mut outputs = outputs;
    loop {
        if outputs.is_empty() {
            tracing::debug!(target: TRACING_TARGET, "All consumers gone, stopping pump");
            return Ok(());
        }
        match pipe.next(ctx).await {
            None => return Ok(()),
            Some(Err(Error::Cancelled)) => return Err(Error::Cancelled),
            Some(Err(err)) => return Err(err),
            Some(Ok(item)) => {
                on_item(&item);
                if outputs.len() == 1 {
                    if outputs[0].send(item).await.is_err() {
                        outputs.clear();
                    }
                    continue;
                }
                let mut gone = Vec::new();
                for (i, out) in outputs.iter().enumerate() {
                    if out.send(item.clone()).await.is_err() {
                        gone.push(i);
                    }
                }
                for i in gone.into_iter().rev() {
                    outputs.remove(i);
                }
            }
        }
    }
}

/// Splits a pipe into `consumers` independent pipes over bounded channels.
///
/// Used by tests and hosts that consume one producer from several places;
/// the scheduler wires fan-out inline through [`pump`].
pub fn fan_out(
    pipe: DataPipe,
    consumers: usize,
    capacity: usize,
    ctx: &PipelineContext,
) -> Vec<DataPipe> {
    let element = pipe.element();
    let mut senders = Vec::with_capacity(consumers);
    let mut pipes = Vec::with_capacity(consumers);
    for _ in 0..consumers {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        senders.push(tx);
        pipes.push(DataPipe::from_channel(element, rx));
    }
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(err) = pump(pipe, senders, &ctx, |_| {}).await {
            if !err.is_cancelled() {
                tracing::warn!(target: TRACING_TARGET, error = %err, "Fan-out source failed");
            }
        }
    });
    pipes
}
