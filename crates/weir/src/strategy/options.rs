//! Execution strategy configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::retry::RetryOptions;

/// How a transform's per-item function is driven.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExecutionStrategyKind {
    /// One consumer, one producer, strict input order. The default.
    #[default]
    Sequential,
    /// A bounded worker pool with queue policies and optional ordering.
    Parallel(ParallelOptions),
    /// Wraps another strategy with retries, dead-lettering, and
    /// materialized node restarts.
    Resilient(ResilientOptions),
}

impl ExecutionStrategyKind {
    /// Returns whether this is the resilient strategy.
    pub fn is_resilient(&self) -> bool {
        matches!(self, Self::Resilient(_))
    }

    /// Returns the parallel options in effect, if any, looking through the
    /// resilient wrapper.
    pub fn parallel_options(&self) -> Option<&ParallelOptions> {
        match self {
            Self::Sequential => None,
            Self::Parallel(options) => Some(options),
            Self::Resilient(options) => match options.inner.as_deref() {
                Some(Self::Parallel(options)) => Some(options),
                _ => None,
            },
        }
    }
}

/// Enqueue behavior when a parallel transform's input queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum QueuePolicy {
    /// Suspend the producer until a worker dequeues; backpressure is
    /// end-to-end. The default.
    #[default]
    Block,
    /// Discard the oldest queued item to make room for the new one.
    DropOldest,
    /// Discard the arriving item.
    DropNewest,
}

impl QueuePolicy {
    /// Returns whether this policy discards items on overflow.
    pub fn drops(&self) -> bool {
        !matches!(self, Self::Block)
    }
}

/// Workload label used by the parallel preset API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum WorkloadProfile {
    /// Balanced default.
    General,
    /// Saturate cores, keep queues short.
    CpuBound,
    /// More workers than cores to cover blocking waits.
    IoBound,
    /// Many in-flight requests, capped to protect remote peers.
    NetworkBound,
}

/// Configuration for the parallel execution strategy.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate")
)]
pub struct ParallelOptions {
    /// Worker count; defaults to the number of available cores.
    #[builder(default = "available_cores()")]
    pub max_degree_of_parallelism: usize,
    /// Input queue length in items; unbounded when unset.
    #[builder(default)]
    pub max_queue_length: Option<usize>,
    /// Enqueue behavior when the queue is full.
    #[builder(default)]
    pub queue_policy: QueuePolicy,
    /// Maximum buffered results before producers block; defaults to twice
    /// the worker count.
    #[builder(default)]
    pub output_buffer_capacity: Option<usize>,
    /// Preserve input order at the output, at the cost of latency.
    ///
    /// Unset means unordered.
    #[builder(default)]
    pub preserve_ordering: bool,
}

impl ParallelOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_degree_of_parallelism.is_some_and(|n| n == 0) {
            return Err("max_degree_of_parallelism must be at least 1".into());
        }
        if let Some(Some(len)) = self.max_queue_length
            && len == 0
        {
            return Err("max_queue_length must be greater than 0 when set".into());
        }
        if let Some(Some(cap)) = self.output_buffer_capacity
            && cap == 0
        {
            return Err("output_buffer_capacity must be greater than 0 when set".into());
        }
        Ok(())
    }
}

impl Default for ParallelOptions {
    fn default() -> Self {
        ParallelOptionsBuilder::default()
            .build()
            .expect("default parallel options are valid")
    }
}

impl ParallelOptions {
    /// Returns a builder for parallel options.
    pub fn builder() -> ParallelOptionsBuilder {
        ParallelOptionsBuilder::default()
    }

    /// Chooses options from a workload label, scaled to the core count.
    pub fn for_workload(profile: WorkloadProfile) -> Self {
        let cores = available_cores();
        let (workers, queue, buffer) = match profile {
            WorkloadProfile::General => (cores, cores * 4, cores * 2),
            WorkloadProfile::CpuBound => (cores, cores * 2, cores),
            WorkloadProfile::IoBound => (cores * 4, cores * 8, cores * 4),
            WorkloadProfile::NetworkBound => {
                let workers = (cores * 16).min(100);
                (workers, workers * 4, (workers * 4).min(400))
            }
        };
        Self {
            max_degree_of_parallelism: workers,
            max_queue_length: Some(queue),
            queue_policy: QueuePolicy::Block,
            output_buffer_capacity: Some(buffer),
            preserve_ordering: false,
        }
    }

    /// Effective output buffer capacity.
    pub fn output_capacity(&self) -> usize {
        self.output_buffer_capacity
            .unwrap_or(self.max_degree_of_parallelism * 2)
            .max(1)
    }
}

/// Configuration for the resilient execution strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResilientOptions {
    /// The wrapped strategy; sequential when unset. Nesting another
    /// resilient strategy is rejected by the validator.
    pub inner: Option<Box<ExecutionStrategyKind>>,
    /// Retry options for this node; the pipeline-scoped defaults apply
    /// when unset.
    pub retry: Option<RetryOptions>,
}

impl ResilientOptions {
    /// Creates resilient options wrapping the sequential strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the wrapped strategy.
    pub fn with_inner(mut self, inner: ExecutionStrategyKind) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Sets node-scoped retry options.
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Number of cores available to this process.
pub(crate) fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
