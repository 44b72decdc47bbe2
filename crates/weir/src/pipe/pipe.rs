//! Lazy, pull-based item pipes between nodes.

use std::marker::PhantomData;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use super::Item;
use crate::definition::TypeDesc;
use crate::engine::{AsyncDisposable, PipelineContext};
use crate::error::{Error, Result};
use crate::pipe::PipelineItem;

/// A boxed stream of typed values, as produced by sources and
/// pipe-to-pipe transforms. Failures carry the user's own error type.
pub type ItemStream<T> = BoxStream<'static, Result<T, crate::error::BoxedError>>;

/// A boxed stream of opaque items.
pub type BoxItemStream = BoxStream<'static, Result<Item>>;

enum PipeInner {
    /// Fully materialized, restartable.
    Memory { items: Vec<Item>, pos: usize },
    /// Single-pass stream, not restartable.
    Stream(BoxItemStream),
    /// Single-pass channel fed by an upstream worker.
    Channel(mpsc::Receiver<Item>),
}

/// A typed, lazily consumed item stream between nodes.
///
/// Pipes own no items past what the current pull yields; buffering policy
/// belongs to the consuming strategy. The in-memory variant can be rewound
/// with [`DataPipe::restart`]; stream and channel variants are single-pass.
pub struct DataPipe {
    element: TypeDesc,
    consumed: bool,
    inner: PipeInner,
    /// Disposal handle for the backing generator, registered with the
    /// context on first pull.
    disposer: Option<Box<dyn AsyncDisposable>>,
}

impl DataPipe {
    /// Creates a materialized pipe from typed values.
    pub fn from_items<T: PipelineItem>(values: impl IntoIterator<Item = T>) -> Self {
        Self {
            element: TypeDesc::of::<T>(),
            consumed: false,
            inner: PipeInner::Memory {
                items: values.into_iter().map(Item::new).collect(),
                pos: 0,
            },
            disposer: None,
        }
    }

    /// Creates a materialized pipe from already-wrapped items.
    pub(crate) fn from_item_vec(element: TypeDesc, items: Vec<Item>) -> Self {
        Self {
            element,
            consumed: false,
            inner: PipeInner::Memory { items, pos: 0 },
            disposer: None,
        }
    }

    /// Creates a streaming pipe from a typed stream.
    pub fn from_typed_stream<T: PipelineItem>(stream: ItemStream<T>) -> Self {
        Self {
            element: TypeDesc::of::<T>(),
            consumed: false,
            inner: PipeInner::Stream(
                stream
                    .map(|r| r.map(Item::new).map_err(Error::User))
                    .boxed(),
            ),
            disposer: None,
        }
    }

    /// Creates a streaming pipe from an opaque item stream.
    pub fn from_stream(element: TypeDesc, stream: BoxItemStream) -> Self {
        Self {
            element,
            consumed: false,
            inner: PipeInner::Stream(stream),
            disposer: None,
        }
    }

    /// Creates a pipe fed by an upstream worker over a bounded channel.
    pub(crate) fn from_channel(element: TypeDesc, rx: mpsc::Receiver<Item>) -> Self {
        Self {
            element,
            consumed: false,
            inner: PipeInner::Channel(rx),
            disposer: None,
        }
    }

    /// Creates an empty, already-exhausted pipe.
    pub fn empty(element: TypeDesc) -> Self {
        Self::from_item_vec(element, Vec::new())
    }

    /// Attaches a disposal handle for the backing generator.
    ///
    /// The handle is handed to the context on the first pull, so generators
    /// that are never consumed are never registered.
    pub fn with_disposer(mut self, disposer: Box<dyn AsyncDisposable>) -> Self {
        self.disposer = Some(disposer);
        self
    }

    /// Returns the element type this pipe carries.
    pub fn element(&self) -> TypeDesc {
        self.element
    }

    /// Returns whether at least one pull has happened.
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Pulls the next item, cooperating with the context's cancellation.
    ///
    /// Returns `None` at end of stream and `Some(Err(Error::Cancelled))`
    /// once the run is cancelled.
    pub async fn next(&mut self, ctx: &PipelineContext) -> Option<Result<Item>> {
        if !self.consumed {
            self.consumed = true;
            if let Some(disposer) = self.disposer.take() {
                ctx.register_disposable(disposer).await;
            }
        }

        match &mut self.inner {
            PipeInner::Memory { items, pos } => {
                if ctx.is_cancelled() {
                    return Some(Err(Error::Cancelled));
                }
                let item = items.get(*pos)?.clone();
                *pos += 1;
                Some(Ok(item))
            }
            PipeInner::Stream(stream) => {
                tokio::select! {
                    biased;

                    () = ctx.cancelled() => Some(Err(Error::Cancelled)),
                    next = stream.next() => next,
                }
            }
            PipeInner::Channel(rx) => {
                tokio::select! {
                    biased;

                    () = ctx.cancelled() => Some(Err(Error::Cancelled)),
                    next = rx.recv() => next.map(Ok),
                }
            }
        }
    }

    /// Rewinds iteration to the first item.
    ///
    /// Only materialized pipes support this; streaming and channel pipes
    /// return [`Error::PipeNotRestartable`].
    pub fn restart(&mut self) -> Result<()> {
        match &mut self.inner {
            PipeInner::Memory { pos, .. } => {
                *pos = 0;
                self.consumed = false;
                Ok(())
            }
            _ => Err(Error::PipeNotRestartable),
        }
    }

    /// Drains the pipe into a vector.
    pub async fn collect(mut self, ctx: &PipelineContext) -> Result<Vec<Item>> {
        let mut out = Vec::new();
        while let Some(item) = self.next(ctx).await {
            out.push(item?);
        }
        Ok(out)
    }

    /// Wraps this pipe in a typed view.
    ///
    /// Fails when `T` does not match the pipe's element type.
    pub fn into_typed<T: PipelineItem>(self) -> Result<TypedPipe<T>> {
        let expected = TypeDesc::of::<T>();
        if !self.element.is_assignable_to(&expected) {
            return Err(Error::PipeTypeMismatch {
                expected: expected.name(),
                actual: self.element.name(),
            });
        }
        Ok(TypedPipe {
            inner: self,
            _marker: PhantomData,
        })
    }
}

impl std::fmt::Debug for DataPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match &self.inner {
            PipeInner::Memory { items, .. } => format!("memory[{}]", items.len()),
            PipeInner::Stream(_) => "stream".to_owned(),
            PipeInner::Channel(_) => "channel".to_owned(),
        };
        f.debug_struct("DataPipe")
            .field("element", &self.element.name())
            .field("shape", &shape)
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// A typed view over a [`DataPipe`], handed to sinks and pipe transforms.
pub struct TypedPipe<T> {
    inner: DataPipe,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PipelineItem> TypedPipe<T> {
    /// Pulls the next value.
    pub async fn next(&mut self, ctx: &PipelineContext) -> Option<Result<T>> {
        match self.inner.next(ctx).await? {
            Ok(item) => Some(item.into_typed::<T>()),
            Err(err) => Some(Err(err)),
        }
    }

    /// Drains the pipe into a vector.
    pub async fn collect(mut self, ctx: &PipelineContext) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(value) = self.next(ctx).await {
            out.push(value?);
        }
        Ok(out)
    }

    /// Returns the underlying untyped pipe.
    pub fn into_inner(self) -> DataPipe {
        self.inner
    }
}

impl<T> std::fmt::Debug for TypedPipe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedPipe")
            .field("inner", &self.inner)
            .finish()
    }
}
