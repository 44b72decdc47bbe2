//! Merging multiple pipes of the same element type into one.

use async_stream::stream;
use futures::StreamExt;

use super::DataPipe;
use crate::definition::MergeOrder;
use crate::engine::PipelineContext;
use crate::error::{Error, Result};

/// Merges a set of pipes carrying the same element type into a single pipe.
///
/// With [`MergeOrder::Concatenate`] pipe *i* is drained before pipe *i + 1*
/// is touched; with [`MergeOrder::Interleave`] pipes are polled round-robin,
/// skipping exhausted ones. Within each input pipe, source order is kept.
pub fn merge(pipes: Vec<DataPipe>, order: MergeOrder, ctx: &PipelineContext) -> Result<DataPipe> {
    let mut pipes = pipes;
    let Some(first) = pipes.first() else {
        return Err(Error::Internal("merge requires at least one pipe".into()));
    };
    let element = first.element();
    if let Some(other) = pipes.iter().find(|p| p.element() != element) {
        return Err(Error::PipeTypeMismatch {
            expected: element.name(),
            actual: other.element().name(),
        });
    }
    if pipes.len() == 1 {
        return Ok(pipes.remove(0));
    }

    let ctx = ctx.clone();
    let stream = match order {
        MergeOrder::Concatenate => stream! {
            for mut pipe in pipes {
                while let Some(item) = pipe.next(&ctx).await {
                    yield item;
                }
            }
        }
        .boxed(),
        MergeOrder::Interleave => stream! {
            let mut active: Vec<DataPipe> = pipes;
            let mut idx = 0;
            while !active.is_empty() {
                idx %= active.len();
                match active[idx].next(&ctx).await {
                    Some(item) => {
                        idx += 1;
                        yield item;
                    }
                    None => {
                        active.remove(idx);
                    }
                }
            }
        }
        .boxed(),
    };

    Ok(DataPipe::from_stream(element, stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concatenate_drains_in_declared_order() {
        let ctx = PipelineContext::new();
        let merged = merge(
            vec![DataPipe::from_items([1u32, 2]), DataPipe::from_items([3u32, 4])],
            MergeOrder::Concatenate,
            &ctx,
        )
        .unwrap();
        let values: Vec<u32> = merged
            .into_typed::<u32>()
            .unwrap()
            .collect(&ctx)
            .await
            .unwrap();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_interleave_round_robins() {
        let ctx = PipelineContext::new();
        let merged = merge(
            vec![
                DataPipe::from_items([1u32, 3, 5]),
                DataPipe::from_items([2u32, 4]),
            ],
            MergeOrder::Interleave,
            &ctx,
        )
        .unwrap();
        let values: Vec<u32> = merged
            .into_typed::<u32>()
            .unwrap()
            .collect(&ctx)
            .await
            .unwrap();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_mixed_element_types_are_rejected() {
        let ctx = PipelineContext::new();
        let err = merge(
            vec![DataPipe::from_items([1u32]), DataPipe::from_items(["a".to_owned()])],
            MergeOrder::Concatenate,
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.code(), "PipeTypeMismatch");
    }
}
