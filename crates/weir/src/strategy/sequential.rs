//! Sequential execution: one in-flight item, strict input order.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ItemOutcome, Materializer, NodeRuntime, process_item};
use crate::error::Result;
use crate::node::DynTransform;
use crate::pipe::{DataPipe, Item};

pub(crate) async fn run(
    rt: &NodeRuntime,
    transform: Arc<dyn DynTransform>,
    input: &mut DataPipe,
    out_tx: &mpsc::Sender<Item>,
    materializer: Option<&Arc<Materializer>>,
) -> Result<()> {
    let mut seq: u64 = 0;
    while let Some(next) = input.next(&rt.ctx).await {
        let item = next?;
        rt.mark_in();
        if let Some(mat) = materializer {
            mat.insert(seq, item.clone())?;
        }
        match process_item(rt, &*transform, item).await {
            ItemOutcome::Emitted(output) => {
                if out_tx.send(output).await.is_err() {
                    // Consumers are gone; the rest of the input is moot.
                    return Ok(());
                }
                if let Some(mat) = materializer {
                    mat.ack(seq);
                }
            }
            ItemOutcome::Consumed => {
                if let Some(mat) = materializer {
                    mat.ack(seq);
                }
            }
            ItemOutcome::Fatal(err) => return Err(err),
        }
        seq += 1;
    }
    Ok(())
}
