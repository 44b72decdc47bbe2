//! The pipeline engine: run concurrency, scheduling, and per-run context.

mod context;
mod executor;
mod report;

use std::sync::Arc;

use tokio::sync::Semaphore;

pub use context::{AsyncDisposable, DisposeFn, PipelineContext};
pub use report::{NodeReport, RunReport};
pub(crate) use report::NodeCounters;

use crate::definition::{PipelineBuilder, PipelineGraph};
use crate::error::{Error, Result};
use crate::node::{DefaultNodeFactory, NodeFactory};

/// Tracing target for engine operations.
const TRACING_TARGET: &str = "weir::engine";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum pipeline runs executing concurrently.
    pub max_concurrent_runs: usize,
    /// Capacity, in items, of the bounded channel backing each edge.
    pub channel_capacity: usize,
    /// Capacity of the internal buffer used when a node's output fans out
    /// to several consumers.
    pub fan_out_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 8,
            channel_capacity: 64,
            fan_out_capacity: 16,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of concurrent runs.
    pub fn with_max_concurrent_runs(mut self, runs: usize) -> Self {
        self.max_concurrent_runs = runs;
        self
    }

    /// Sets the per-edge channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the fan-out buffer capacity.
    pub fn with_fan_out_capacity(mut self, capacity: usize) -> Self {
        self.fan_out_capacity = capacity;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_runs == 0 {
            return Err(Error::InvalidConfiguration(
                "max_concurrent_runs must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.fan_out_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "fan_out_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A pipeline described as a type: the engine builds and runs it in one
/// step through [`Engine::run_definition`].
pub trait PipelineDefinition {
    /// Declares the pipeline into the builder.
    fn define(builder: &mut PipelineBuilder, ctx: &PipelineContext) -> Result<()>;
}

/// The pipeline execution engine.
///
/// Stateless across runs: each run allocates its own workers, queues, and
/// report. Graphs are shared (`Arc`) so hosts can run the same graph
/// repeatedly or concurrently, bounded by
/// [`EngineConfig::max_concurrent_runs`].
pub struct Engine {
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
    factory: Arc<dyn NodeFactory>,
}

impl Engine {
    /// Creates an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_runs));

        tracing::info!(
            target: TRACING_TARGET,
            max_concurrent_runs = config.max_concurrent_runs,
            channel_capacity = config.channel_capacity,
            "Pipeline engine initialized"
        );

        Ok(Self {
            config,
            semaphore,
            factory: Arc::new(DefaultNodeFactory),
        })
    }

    /// Creates an engine with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default()).expect("default engine config is valid")
    }

    /// Replaces the node factory (e.g. with a DI-backed implementation).
    pub fn with_factory(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the number of available run slots.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Executes a validated graph against a fresh context.
    ///
    /// On success the run report is returned; on failure the context is
    /// cancelled, resources are disposed, and the structured error is
    /// surfaced.
    pub async fn run(
        &self,
        graph: impl Into<Arc<PipelineGraph>>,
        ctx: PipelineContext,
    ) -> Result<RunReport> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("run semaphore closed: {e}")))?;

        let executor = executor::Executor {
            graph: graph.into(),
            ctx,
            factory: self.factory.clone(),
            config: self.config.clone(),
        };
        executor.execute().await
    }

    /// Builds a pipeline from a typed definition and executes it.
    pub async fn run_definition<D: PipelineDefinition>(
        &self,
        ctx: PipelineContext,
    ) -> Result<RunReport> {
        let mut builder = PipelineBuilder::new();
        D::define(&mut builder, &ctx)?;
        let graph = builder.build()?;
        self.run(graph, ctx).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("available_slots", &self.available_slots())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = EngineConfig::new().with_channel_capacity(0);
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn test_engine_exposes_slots() {
        let engine = Engine::with_defaults();
        assert_eq!(engine.available_slots(), 8);
    }
}
