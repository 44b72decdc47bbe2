//! Shared fixtures for end-to-end pipeline tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use weir::pipe::{ItemStream, TypedPipe};
use weir::{BoxedError, Join, PipelineContext, PipelineItem, Sink, Source, Transform};

/// Emits a fixed list of numbers.
pub struct NumberSource {
    values: Vec<u32>,
}

impl NumberSource {
    pub fn new(values: impl Into<Vec<u32>>) -> Self {
        Self {
            values: values.into(),
        }
    }
}

#[async_trait]
impl Source for NumberSource {
    type Output = u32;

    async fn initialize(&mut self, _ctx: &PipelineContext) -> Result<ItemStream<u32>, BoxedError> {
        let values = self.values.clone();
        Ok(futures::stream::iter(values.into_iter().map(Ok)).boxed())
    }
}

/// Multiplies every item by two.
#[derive(Default)]
pub struct Doubler;

#[async_trait]
impl Transform for Doubler {
    type Input = u32;
    type Output = u32;

    async fn execute_item(&self, item: u32, _ctx: &PipelineContext) -> Result<u32, BoxedError> {
        Ok(item * 2)
    }
}

/// Multiplies every item by three.
#[derive(Default)]
pub struct Tripler;

#[async_trait]
impl Transform for Tripler {
    type Input = u32;
    type Output = u32;

    async fn execute_item(&self, item: u32, _ctx: &PipelineContext) -> Result<u32, BoxedError> {
        Ok(item * 3)
    }
}

/// Passes items through, sleeping briefly to simulate work.
pub struct SlowIdentity {
    pub delay_ms: u64,
}

#[async_trait]
impl Transform for SlowIdentity {
    type Input = u32;
    type Output = u32;

    async fn execute_item(&self, item: u32, _ctx: &PipelineContext) -> Result<u32, BoxedError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(item)
    }
}

/// Fails the first `failures` attempts across all items, then succeeds.
pub struct Flaky {
    failures_left: Arc<AtomicU32>,
}

impl Flaky {
    pub fn new(failures: Arc<AtomicU32>) -> Self {
        Self {
            failures_left: failures,
        }
    }
}

#[async_trait]
impl Transform for Flaky {
    type Input = u32;
    type Output = u32;

    async fn execute_item(&self, item: u32, _ctx: &PipelineContext) -> Result<u32, BoxedError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(format!("transient failure, {left} left").into());
        }
        Ok(item)
    }
}

/// Passes items through but always fails on one specific value.
pub struct FailOn {
    pub bad: u32,
}

#[async_trait]
impl Transform for FailOn {
    type Input = u32;
    type Output = u32;

    async fn execute_item(&self, item: u32, _ctx: &PipelineContext) -> Result<u32, BoxedError> {
        if item == self.bad {
            return Err(format!("boom on {item}").into());
        }
        Ok(item)
    }
}

/// Fails on one value only in its first incarnation; rebuilt instances
/// succeed. `always` makes every incarnation fail, to exhaust restarts.
pub struct Fragile {
    generation: u32,
    bad: u32,
    always: bool,
}

impl Fragile {
    pub fn build(counter: &Arc<AtomicU32>, bad: u32, always: bool) -> Self {
        Self {
            generation: counter.fetch_add(1, Ordering::SeqCst) + 1,
            bad,
            always,
        }
    }
}

#[async_trait]
impl Transform for Fragile {
    type Input = u32;
    type Output = u32;

    async fn execute_item(&self, item: u32, _ctx: &PipelineContext) -> Result<u32, BoxedError> {
        if item == self.bad && (self.always || self.generation == 1) {
            return Err(format!("fatal on {item} (incarnation {})", self.generation).into());
        }
        Ok(item)
    }
}

/// Records everything it consumes into a shared vector.
pub struct CollectingSink<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T> CollectingSink<T> {
    pub fn new(seen: Arc<Mutex<Vec<T>>>) -> Self {
        Self { seen }
    }
}

#[async_trait]
impl<T: PipelineItem> Sink for CollectingSink<T> {
    type Input = T;

    async fn execute_pipe(
        &mut self,
        mut input: TypedPipe<T>,
        ctx: &PipelineContext,
    ) -> Result<(), BoxedError> {
        while let Some(next) = input.next(ctx).await {
            match next {
                Ok(value) => self.seen.lock().unwrap().push(value),
                Err(err) => return Err(Box::new(err)),
            }
        }
        Ok(())
    }
}

/// Joins numbers against `(number, word)` rows.
pub struct NumberWords;

impl Join for NumberWords {
    type Left = u32;
    type Right = (u32, String);
    type Key = u32;
    type Output = String;

    fn left_key(&self, left: &u32) -> u32 {
        *left
    }

    fn right_key(&self, right: &(u32, String)) -> u32 {
        right.0
    }

    fn join(&self, left: &u32, right: &(u32, String)) -> String {
        format!("{left}={}", right.1)
    }

    fn left_fallback(&self, left: &u32) -> Option<String> {
        Some(format!("{left}=?"))
    }
}

/// Shared collection handle for sinks.
pub fn shared<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a shared collection.
pub fn snapshot<T: Clone>(seen: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    seen.lock().unwrap().clone()
}
