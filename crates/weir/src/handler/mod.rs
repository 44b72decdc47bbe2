//! Item-level and pipeline-level error handling.
//!
//! Item errors raised inside a transform are routed through the node's
//! [`ItemErrorHandler`], which decides locally (retry, skip, dead-letter,
//! redirect) or escalates. Node-fatal errors reach the
//! [`PipelineErrorHandler`], which decides whether the run continues without
//! the node, restarts it, or fails.

mod dead_letter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;

pub use dead_letter::{
    DeadLetterEntry, DeadLetterSink, InMemoryDeadLetterSink, TracingDeadLetterSink,
};
pub(crate) use dead_letter::BoundedDeadLetterSink;

use crate::definition::NodeId;
use crate::engine::PipelineContext;
use crate::error::Error;
use crate::pipe::Item;

/// A lightweight reference to the node an error was raised in.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    /// ID of the node.
    pub id: NodeId,
    /// Display name of the node.
    pub name: &'a str,
}

/// Decision for a single failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum ItemDecision {
    /// Try the item again, delayed by the configured retry policy.
    Retry,
    /// Drop the item and continue with the next one.
    Skip,
    /// Hand the item to the dead-letter sink and continue.
    DeadLetter,
    /// Shorthand for [`ItemDecision::DeadLetter`].
    Redirect,
    /// Escalate to the pipeline-level handler.
    Fail,
}

/// Decision for a node-fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum PipelineDecision {
    /// Terminate the node and keep the rest of the run going.
    ContinueWithoutNode,
    /// Rebuild the node and replay its materialized items.
    ///
    /// Only honored for nodes running under the resilient strategy with a
    /// positive restart budget; otherwise degrades to
    /// [`PipelineDecision::FailPipeline`].
    RestartNode,
    /// Cancel the run and surface the failure.
    FailPipeline,
}

/// Per-item error handler attached to a node.
#[async_trait]
pub trait ItemErrorHandler: Send + Sync {
    /// Decides what to do with a failed item.
    async fn handle(
        &self,
        node: NodeRef<'_>,
        item: &Item,
        error: &Error,
        ctx: &PipelineContext,
    ) -> ItemDecision;
}

/// Pipeline-level handler consulted on node-fatal failures.
#[async_trait]
pub trait PipelineErrorHandler: Send + Sync {
    /// Decides what to do after a node failed fatally.
    async fn handle_node_failure(
        &self,
        node_id: NodeId,
        error: &Error,
        ctx: &PipelineContext,
    ) -> PipelineDecision;
}

/// Resolves handlers by node at run start; absence means the defaults apply.
pub trait ErrorHandlerFactory: Send + Sync {
    /// Returns the item handler for a node, if one is registered.
    fn node_handler(&self, node: NodeRef<'_>) -> Option<std::sync::Arc<dyn ItemErrorHandler>> {
        let _ = node;
        None
    }

    /// Returns the pipeline-level handler, if one is registered.
    fn pipeline_handler(&self) -> Option<std::sync::Arc<dyn PipelineErrorHandler>> {
        None
    }
}

/// Default item handler: every failure escalates.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastHandler;

#[async_trait]
impl ItemErrorHandler for FailFastHandler {
    async fn handle(
        &self,
        _node: NodeRef<'_>,
        _item: &Item,
        _error: &Error,
        _ctx: &PipelineContext,
    ) -> ItemDecision {
        ItemDecision::Fail
    }
}

/// Item handler that always asks for a retry (bounded by the retry options).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetryHandler;

#[async_trait]
impl ItemErrorHandler for AlwaysRetryHandler {
    async fn handle(
        &self,
        _node: NodeRef<'_>,
        _item: &Item,
        _error: &Error,
        _ctx: &PipelineContext,
    ) -> ItemDecision {
        ItemDecision::Retry
    }
}

/// Item handler that routes every failure to the dead-letter sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadLetterHandler;

#[async_trait]
impl ItemErrorHandler for DeadLetterHandler {
    async fn handle(
        &self,
        _node: NodeRef<'_>,
        _item: &Item,
        _error: &Error,
        _ctx: &PipelineContext,
    ) -> ItemDecision {
        ItemDecision::DeadLetter
    }
}

/// Default pipeline handler: every node-fatal failure fails the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailPipelineHandler;

#[async_trait]
impl PipelineErrorHandler for FailPipelineHandler {
    async fn handle_node_failure(
        &self,
        _node_id: NodeId,
        _error: &Error,
        _ctx: &PipelineContext,
    ) -> PipelineDecision {
        PipelineDecision::FailPipeline
    }
}

/// Pipeline handler that asks for a node restart on every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestartNodeHandler;

#[async_trait]
impl PipelineErrorHandler for RestartNodeHandler {
    async fn handle_node_failure(
        &self,
        _node_id: NodeId,
        _error: &Error,
        _ctx: &PipelineContext,
    ) -> PipelineDecision {
        PipelineDecision::RestartNode
    }
}
