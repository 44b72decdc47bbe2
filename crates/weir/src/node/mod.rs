//! Node contracts: the four shapes a pipeline is built from.
//!
//! Users implement the typed traits in this module; the builder wraps them
//! in type-erased adapters so the scheduler can move opaque
//! [`Item`](crate::pipe::Item)s between nodes. All shapes share the lifecycle
//! instantiate → configure → execute → dispose (disposal through the
//! context's resource registry or plain `Drop`).

mod batch;
mod factory;
mod instance;
mod join;

pub use batch::{BatchOptions, BatchOptionsBuilder, Batching, Unbatching};
pub use factory::{DefaultNodeFactory, NodeFactory};
pub use instance::{DynJoin, DynPipeTransform, DynSink, DynSource, DynTransform, NodeInstance};
pub use join::{JoinKind, LeftTagged, RightTagged, TagLeft, TagRight};

use async_trait::async_trait;

use crate::engine::PipelineContext;
use crate::error::BoxedError;
use crate::pipe::{ItemStream, PipelineItem, TypedPipe};

/// A source node: produces the pipeline's input items.
///
/// The returned stream is consumed lazily; resources it owns should either
/// live inside the stream or be registered with the context for disposal.
#[async_trait]
pub trait Source: Send + 'static {
    /// Element type this source emits.
    type Output: PipelineItem;

    /// Builds the output stream for one run.
    async fn initialize(
        &mut self,
        ctx: &PipelineContext,
    ) -> Result<ItemStream<Self::Output>, BoxedError>;
}

/// An item-at-a-time transform node.
///
/// Takes `&self` so a single instance can serve parallel workers; keep
/// per-node state behind interior mutability when a transform needs it.
#[async_trait]
pub trait Transform: Send + Sync + 'static {
    /// Element type this transform consumes.
    type Input: PipelineItem;
    /// Element type this transform produces.
    type Output: PipelineItem;

    /// Processes a single item.
    async fn execute_item(
        &self,
        item: Self::Input,
        ctx: &PipelineContext,
    ) -> Result<Self::Output, BoxedError>;
}

/// A stream-to-stream transform node.
///
/// Used where per-item wrapping is the wrong shape (batching, windowing,
/// stateful resequencing). Pipe transforms run as a single worker and are
/// not subject to execution strategies.
#[async_trait]
pub trait PipeTransform: Send + 'static {
    /// Element type this transform consumes.
    type Input: PipelineItem;
    /// Element type this transform produces.
    type Output: PipelineItem;

    /// Consumes the input pipe and returns the output stream.
    async fn execute_pipe(
        &mut self,
        input: TypedPipe<Self::Input>,
        ctx: &PipelineContext,
    ) -> Result<ItemStream<Self::Output>, BoxedError>;
}

/// A sink node: terminal consumer of a pipe.
///
/// Sinks must drain their input fully, even when discarding items,
/// so upstream workers are never left blocked on a full channel.
#[async_trait]
pub trait Sink: Send + 'static {
    /// Element type this sink consumes.
    type Input: PipelineItem;

    /// Consumes the input pipe to completion.
    async fn execute_pipe(
        &mut self,
        input: TypedPipe<Self::Input>,
        ctx: &PipelineContext,
    ) -> Result<(), BoxedError>;
}

/// A join node: correlates two typed inputs by key.
///
/// The join kind (inner/outer) is graph configuration, set when the node is
/// added; the trait only supplies key selectors, the output factory, and
/// optional per-side fallbacks for unmatched rows. Same-type joins wrap
/// each side in [`LeftTagged`] / [`RightTagged`] so the wire types stay
/// distinct.
pub trait Join: Send + 'static {
    /// Element type of the primary (left) input.
    type Left: PipelineItem;
    /// Element type of the secondary (right) input.
    type Right: PipelineItem;
    /// Join key.
    type Key: Eq + std::hash::Hash;
    /// Element type of the output.
    type Output: PipelineItem;

    /// Extracts the key from a left-side row.
    fn left_key(&self, left: &Self::Left) -> Self::Key;

    /// Extracts the key from a right-side row.
    fn right_key(&self, right: &Self::Right) -> Self::Key;

    /// Produces an output row for a matched pair.
    fn join(&self, left: &Self::Left, right: &Self::Right) -> Self::Output;

    /// Produces an output row for an unmatched left row (outer joins).
    ///
    /// Returning `None` drops the row.
    fn left_fallback(&self, left: &Self::Left) -> Option<Self::Output> {
        let _ = left;
        None
    }

    /// Produces an output row for an unmatched right row (outer joins).
    ///
    /// Returning `None` drops the row.
    fn right_fallback(&self, right: &Self::Right) -> Option<Self::Output> {
        let _ = right;
        None
    }
}
