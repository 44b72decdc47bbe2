//! Type-erased node instances produced by the factory.

use async_trait::async_trait;

use super::join::JoinAdapter;
use super::{Join, JoinKind, PipeTransform, Sink, Source, Transform};
use crate::definition::NodeKind;
use crate::engine::PipelineContext;
use crate::error::{Error, Result};
use crate::pipe::{DataPipe, Item};

/// Type-erased [`Source`].
#[async_trait]
pub trait DynSource: Send {
    /// Builds the output pipe for one run.
    async fn initialize(&mut self, ctx: &PipelineContext) -> Result<DataPipe>;
}

/// Type-erased [`Transform`].
#[async_trait]
pub trait DynTransform: Send + Sync {
    /// Processes a single opaque item.
    async fn execute_item(&self, item: Item, ctx: &PipelineContext) -> Result<Item>;
}

/// Type-erased [`PipeTransform`].
#[async_trait]
pub trait DynPipeTransform: Send {
    /// Consumes the input pipe and returns the output pipe.
    async fn execute_pipe(&mut self, input: DataPipe, ctx: &PipelineContext) -> Result<DataPipe>;
}

/// Type-erased [`Sink`].
#[async_trait]
pub trait DynSink: Send {
    /// Consumes the input pipe to completion.
    async fn execute_pipe(&mut self, input: DataPipe, ctx: &PipelineContext) -> Result<()>;
}

/// Type-erased [`Join`].
#[async_trait]
pub trait DynJoin: Send {
    /// Drains both inputs and returns the joined output pipe.
    async fn execute(
        &mut self,
        left: DataPipe,
        right: DataPipe,
        ctx: &PipelineContext,
    ) -> Result<DataPipe>;
}

struct SourceAdapter<S>(S);

#[async_trait]
impl<S: Source> DynSource for SourceAdapter<S> {
    async fn initialize(&mut self, ctx: &PipelineContext) -> Result<DataPipe> {
        let stream = self.0.initialize(ctx).await.map_err(Error::User)?;
        Ok(DataPipe::from_typed_stream(stream))
    }
}

struct TransformAdapter<T>(T);

#[async_trait]
impl<T: Transform> DynTransform for TransformAdapter<T> {
    async fn execute_item(&self, item: Item, ctx: &PipelineContext) -> Result<Item> {
        let input = item.into_typed::<T::Input>()?;
        let output = self
            .0
            .execute_item(input, ctx)
            .await
            .map_err(Error::User)?;
        Ok(Item::new(output))
    }
}

struct PipeTransformAdapter<T>(T);

#[async_trait]
impl<T: PipeTransform> DynPipeTransform for PipeTransformAdapter<T> {
    async fn execute_pipe(&mut self, input: DataPipe, ctx: &PipelineContext) -> Result<DataPipe> {
        let typed = input.into_typed::<T::Input>()?;
        let stream = self
            .0
            .execute_pipe(typed, ctx)
            .await
            .map_err(Error::User)?;
        Ok(DataPipe::from_typed_stream(stream))
    }
}

struct SinkAdapter<S>(S);

#[async_trait]
impl<S: Sink> DynSink for SinkAdapter<S> {
    async fn execute_pipe(&mut self, input: DataPipe, ctx: &PipelineContext) -> Result<()> {
        let typed = input.into_typed::<S::Input>()?;
        self.0.execute_pipe(typed, ctx).await.map_err(Error::User)
    }
}

/// A concrete node instance, ready to be wired into a run.
pub enum NodeInstance {
    /// A source node.
    Source(Box<dyn DynSource>),
    /// An item-at-a-time transform; shared so parallel workers can call it.
    Transform(std::sync::Arc<dyn DynTransform>),
    /// A stream-to-stream transform.
    PipeTransform(Box<dyn DynPipeTransform>),
    /// A sink node.
    Sink(Box<dyn DynSink>),
    /// A join node.
    Join(Box<dyn DynJoin>),
}

impl NodeInstance {
    /// Wraps a typed source.
    pub fn source<S: Source>(source: S) -> Self {
        Self::Source(Box::new(SourceAdapter(source)))
    }

    /// Wraps a typed transform.
    pub fn transform<T: Transform>(transform: T) -> Self {
        Self::Transform(std::sync::Arc::new(TransformAdapter(transform)))
    }

    /// Wraps a typed pipe transform.
    pub fn pipe_transform<T: PipeTransform>(transform: T) -> Self {
        Self::PipeTransform(Box::new(PipeTransformAdapter(transform)))
    }

    /// Wraps a typed sink.
    pub fn sink<S: Sink>(sink: S) -> Self {
        Self::Sink(Box::new(SinkAdapter(sink)))
    }

    /// Wraps a typed join with its configured kind.
    pub fn join<J: Join>(join: J, kind: JoinKind) -> Self {
        Self::Join(Box::new(JoinAdapter::new(join, kind)))
    }

    /// Returns the node kind this instance satisfies.
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Source(_) => NodeKind::Source,
            Self::Transform(_) | Self::PipeTransform(_) => NodeKind::Transform,
            Self::Sink(_) => NodeKind::Sink,
            Self::Join(_) => NodeKind::Join,
        }
    }

    /// Returns whether this is a stream-to-stream transform.
    pub fn is_pipe_transform(&self) -> bool {
        matches!(self, Self::PipeTransform(_))
    }
}

impl std::fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::Source(_) => "Source",
            Self::Transform(_) => "Transform",
            Self::PipeTransform(_) => "PipeTransform",
            Self::Sink(_) => "Sink",
            Self::Join(_) => "Join",
        };
        f.debug_tuple("NodeInstance").field(&shape).finish()
    }
}
