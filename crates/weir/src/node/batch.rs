//! Batching and unbatching transforms.

use std::marker::PhantomData;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use derive_builder::Builder;
use futures::StreamExt;

use super::{PipeTransform, Transform};
use crate::engine::PipelineContext;
use crate::error::{BoxedError, Error};
use crate::pipe::{ItemStream, PipelineItem, TypedPipe};

/// Configuration for a [`Batching`] transform.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate")
)]
pub struct BatchOptions {
    /// Target batch size.
    pub size: usize,
    /// Emit a partial batch when this much time passed since its first item.
    #[builder(default)]
    pub timeout: Option<Duration>,
}

impl BatchOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.size.is_some_and(|s| s == 0) {
            return Err("batch size must be greater than 0".into());
        }
        if let Some(Some(timeout)) = self.timeout
            && timeout.is_zero()
        {
            return Err("batch timeout must be positive when set".into());
        }
        Ok(())
    }
}

impl BatchOptions {
    /// Returns a builder for batch options.
    pub fn builder() -> BatchOptionsBuilder {
        BatchOptionsBuilder::default()
    }

    /// Creates options with a size and no timeout.
    pub fn of_size(size: usize) -> crate::error::Result<Self> {
        Self::builder()
            .with_size(size)
            .build()
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))
    }
}

/// Buffers items into `Vec<T>` batches of a target size.
///
/// A batch is emitted when it reaches the configured size, when the timeout
/// since its first item expires, or when the input ends with a partial batch
/// pending. This is a stream-to-stream transform; running it through the
/// item-at-a-time API is a configuration error.
pub struct Batching<T> {
    options: BatchOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Batching<T> {
    /// Creates a batching transform.
    pub fn new(options: BatchOptions) -> Self {
        Self {
            options,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Batching<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batching")
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl<T: PipelineItem> PipeTransform for Batching<T> {
    type Input = T;
    type Output = Vec<T>;

    async fn execute_pipe(
        &mut self,
        mut input: TypedPipe<T>,
        ctx: &PipelineContext,
    ) -> Result<ItemStream<Vec<T>>, BoxedError> {
        let options = self.options.clone();
        let ctx = ctx.clone();

        Ok(stream! {
            let mut batch: Vec<T> = Vec::with_capacity(options.size);
            let mut deadline: Option<tokio::time::Instant> = None;

            loop {
                let next = match (options.timeout, deadline) {
                    (Some(_), Some(at)) => {
                        match tokio::time::timeout_at(at, input.next(&ctx)).await {
                            Ok(next) => next,
                            Err(_) => {
                                if !batch.is_empty() {
                                    yield Ok(std::mem::take(&mut batch));
                                }
                                deadline = None;
                                continue;
                            }
                        }
                    }
                    _ => input.next(&ctx).await,
                };

                match next {
                    None => {
                        if !batch.is_empty() {
                            yield Ok(std::mem::take(&mut batch));
                        }
                        break;
                    }
                    Some(Err(err)) => {
                        yield Err(err.into_boxed());
                        break;
                    }
                    Some(Ok(value)) => {
                        if batch.is_empty()
                            && let Some(timeout) = options.timeout
                        {
                            deadline = Some(tokio::time::Instant::now() + timeout);
                        }
                        batch.push(value);
                        if batch.len() >= options.size {
                            yield Ok(std::mem::take(&mut batch));
                            deadline = None;
                        }
                    }
                }
            }
        }
        .boxed())
    }
}

#[async_trait]
impl<T: PipelineItem> Transform for Batching<T> {
    type Input = T;
    type Output = Vec<T>;

    /// Batching cannot run item-at-a-time.
    async fn execute_item(&self, _item: T, _ctx: &PipelineContext) -> Result<Vec<T>, BoxedError> {
        Err(Box::new(Error::BatchingNotSupported))
    }
}

/// Flattens `Vec<T>` batches back into individual items.
///
/// This is a stream-to-stream transform; running it through the
/// item-at-a-time API is a configuration error.
#[derive(Default)]
pub struct Unbatching<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Unbatching<T> {
    /// Creates an unbatching transform.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Unbatching<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unbatching").finish()
    }
}

#[async_trait]
impl<T: PipelineItem> PipeTransform for Unbatching<T> {
    type Input = Vec<T>;
    type Output = T;

    async fn execute_pipe(
        &mut self,
        mut input: TypedPipe<Vec<T>>,
        ctx: &PipelineContext,
    ) -> Result<ItemStream<T>, BoxedError> {
        let ctx = ctx.clone();
        Ok(stream! {
            while let Some(next) = input.next(&ctx).await {
                match next {
                    Ok(batch) => {
                        for value in batch {
                            yield Ok(value);
                        }
                    }
                    Err(err) => {
                        yield Err(err.into_boxed());
                        break;
                    }
                }
            }
        }
        .boxed())
    }
}

#[async_trait]
impl<T: PipelineItem> Transform for Unbatching<T> {
    type Input = Vec<T>;
    type Output = T;

    /// Unbatching cannot run item-at-a-time.
    async fn execute_item(&self, _item: Vec<T>, _ctx: &PipelineContext) -> Result<T, BoxedError> {
        Err(Box::new(Error::UnbatchingNotSupported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::DataPipe;

    #[tokio::test]
    async fn test_batches_by_size_with_trailing_partial() {
        let ctx = PipelineContext::new();
        let input = DataPipe::from_items([1u32, 2, 3, 4, 5]).into_typed().unwrap();
        let mut batching = Batching::new(BatchOptions::of_size(2).unwrap());
        let stream = batching.execute_pipe(input, &ctx).await.unwrap();
        let batches: Vec<Vec<u32>> = stream.map(|b| b.unwrap()).collect().await;
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn test_unbatching_flattens() {
        let ctx = PipelineContext::new();
        let input = DataPipe::from_items([vec![1u32, 2], vec![3]])
            .into_typed()
            .unwrap();
        let mut unbatching: Unbatching<u32> = Unbatching::new();
        let stream = unbatching.execute_pipe(input, &ctx).await.unwrap();
        let values: Vec<u32> = stream.map(|v| v.unwrap()).collect().await;
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_item_api_is_a_configuration_error() {
        let ctx = PipelineContext::new();
        let batching: Batching<u32> = Batching::new(BatchOptions::of_size(4).unwrap());
        let err = Transform::execute_item(&batching, 1, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("item-at-a-time"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_flushes_partial_batch() {
        let ctx = PipelineContext::new();
        let options = BatchOptions::builder()
            .with_size(10usize)
            .with_timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        // A channel-backed pipe that never closes forces the timeout path.
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let pipe = DataPipe::from_channel(crate::definition::TypeDesc::of::<u32>(), rx);
        tx.send(crate::pipe::Item::new(7u32)).await.unwrap();

        let mut batching: Batching<u32> = Batching::new(options);
        let mut stream = batching
            .execute_pipe(pipe.into_typed().unwrap(), &ctx)
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, vec![7]);
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
