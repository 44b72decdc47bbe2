#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod definition;
pub mod engine;
mod error;
pub mod handler;
pub mod node;
pub mod observe;
pub mod pipe;
pub mod retry;
pub mod strategy;
pub mod validate;

pub use definition::{NodeId, PipelineBuilder, PipelineGraph, RunId, TypeDesc};
pub use engine::{Engine, EngineConfig, PipelineContext, PipelineDefinition, RunReport};
pub use error::{BoxedError, Error, Result};
pub use handler::{ItemDecision, ItemErrorHandler, PipelineDecision, PipelineErrorHandler};
pub use node::{BatchOptions, Join, JoinKind, PipeTransform, Sink, Source, Transform};
pub use pipe::{DataPipe, Item, PipelineItem};
pub use retry::{Backoff, Jitter, RetryOptions};
pub use strategy::{
    ExecutionStrategyKind, ParallelOptions, QueuePolicy, ResilientOptions, WorkloadProfile,
};

/// Tracing target for runtime operations.
pub const TRACING_TARGET: &str = "weir";
