//! Per-run pipeline context: parameters, cancellation, factories, and
//! owned resources.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::definition::{NodeId, RunId};
use crate::error::{Error, Result};
use crate::handler::{DeadLetterSink, ErrorHandlerFactory, PipelineErrorHandler};
use crate::observe::ObservabilityFactory;
use crate::pipe::Item;

/// Tracing target for context operations.
const TRACING_TARGET: &str = "weir::context";

/// A resource owned by the context, released at end of run.
#[async_trait]
pub trait AsyncDisposable: Send {
    /// Releases the resource.
    async fn dispose(&mut self) -> Result<()>;
}

/// Wraps a synchronous cleanup closure as an [`AsyncDisposable`].
pub struct DisposeFn(Option<Box<dyn FnOnce() + Send>>);

impl DisposeFn {
    /// Creates a disposable from a cleanup closure.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }
}

#[async_trait]
impl AsyncDisposable for DisposeFn {
    async fn dispose(&mut self) -> Result<()> {
        if let Some(f) = self.0.take() {
            f();
        }
        Ok(())
    }
}

impl std::fmt::Debug for DisposeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeFn").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ResourceRegistry {
    disposed: bool,
    resources: Vec<Box<dyn AsyncDisposable>>,
}

struct ContextInner {
    run_id: RunId,
    parameters: Mutex<HashMap<String, serde_json::Value>>,
    items: Mutex<HashMap<String, Item>>,
    cancellation: CancellationToken,
    current_node: Mutex<Option<NodeId>>,
    handler_factory: Mutex<Option<Arc<dyn ErrorHandlerFactory>>>,
    observability: Mutex<Option<Arc<dyn ObservabilityFactory>>>,
    dead_letter: Mutex<Option<Arc<dyn DeadLetterSink>>>,
    pipeline_handler: Mutex<Option<Arc<dyn PipelineErrorHandler>>>,
    resources: tokio::sync::Mutex<ResourceRegistry>,
}

/// Shared per-run state threaded through every node.
///
/// Cheap to clone; all clones refer to the same run. The context lives for
/// exactly one pipeline execution and is disposed once, at end of run or on
/// failure. Everything registered through
/// [`PipelineContext::register_disposable`] is released then, in reverse
/// registration order.
#[derive(Clone)]
pub struct PipelineContext {
    inner: Arc<ContextInner>,
}

impl PipelineContext {
    /// Creates a fresh context for one run.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id: RunId::new(),
                parameters: Mutex::new(HashMap::new()),
                items: Mutex::new(HashMap::new()),
                cancellation: CancellationToken::new(),
                current_node: Mutex::new(None),
                handler_factory: Mutex::new(None),
                observability: Mutex::new(None),
                dead_letter: Mutex::new(None),
                pipeline_handler: Mutex::new(None),
                resources: tokio::sync::Mutex::new(ResourceRegistry::default()),
            }),
        }
    }

    /// Returns this run's identifier.
    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    // Parameters and the shared items bag

    /// Sets a user parameter.
    pub fn set_parameter(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner
            .parameters
            .lock()
            .expect("parameters lock poisoned")
            .insert(key.into(), value);
    }

    /// Returns a user parameter.
    pub fn parameter(&self, key: &str) -> Option<serde_json::Value> {
        self.inner
            .parameters
            .lock()
            .expect("parameters lock poisoned")
            .get(key)
            .cloned()
    }

    /// Stores an item in the shared bag.
    pub fn put_item(&self, key: impl Into<String>, item: Item) {
        self.inner
            .items
            .lock()
            .expect("items lock poisoned")
            .insert(key.into(), item);
    }

    /// Returns an item from the shared bag.
    pub fn get_item(&self, key: &str) -> Option<Item> {
        self.inner
            .items
            .lock()
            .expect("items lock poisoned")
            .get(key)
            .cloned()
    }

    // Cancellation

    /// Requests cooperative cancellation of the run.
    pub fn cancel(&self) {
        self.inner.cancellation.cancel();
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancellation.cancelled().await;
    }

    /// Returns the underlying cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancellation.clone()
    }

    // Current node

    /// Returns the node currently executing on this worker, if set.
    pub fn current_node(&self) -> Option<NodeId> {
        *self
            .inner
            .current_node
            .lock()
            .expect("current node lock poisoned")
    }

    pub(crate) fn set_current_node(&self, node: Option<NodeId>) {
        *self
            .inner
            .current_node
            .lock()
            .expect("current node lock poisoned") = node;
    }

    // Factories and pipeline-level collaborators

    /// Installs the error-handler factory for this run.
    pub fn set_error_handler_factory(&self, factory: Arc<dyn ErrorHandlerFactory>) {
        *self
            .inner
            .handler_factory
            .lock()
            .expect("handler factory lock poisoned") = Some(factory);
    }

    /// Returns the error-handler factory, if any.
    pub fn error_handler_factory(&self) -> Option<Arc<dyn ErrorHandlerFactory>> {
        self.inner
            .handler_factory
            .lock()
            .expect("handler factory lock poisoned")
            .clone()
    }

    /// Installs the observability factory for this run.
    pub fn set_observability_factory(&self, factory: Arc<dyn ObservabilityFactory>) {
        *self
            .inner
            .observability
            .lock()
            .expect("observability lock poisoned") = Some(factory);
    }

    /// Returns the observability factory, if any.
    pub fn observability_factory(&self) -> Option<Arc<dyn ObservabilityFactory>> {
        self.inner
            .observability
            .lock()
            .expect("observability lock poisoned")
            .clone()
    }

    /// Overrides the dead-letter sink for this run.
    pub fn set_dead_letter_sink(&self, sink: Arc<dyn DeadLetterSink>) {
        *self
            .inner
            .dead_letter
            .lock()
            .expect("dead letter lock poisoned") = Some(sink);
    }

    /// Returns the run-scoped dead-letter sink, if any.
    pub fn dead_letter_sink(&self) -> Option<Arc<dyn DeadLetterSink>> {
        self.inner
            .dead_letter
            .lock()
            .expect("dead letter lock poisoned")
            .clone()
    }

    /// Overrides the pipeline-level error handler for this run.
    pub fn set_pipeline_error_handler(&self, handler: Arc<dyn PipelineErrorHandler>) {
        *self
            .inner
            .pipeline_handler
            .lock()
            .expect("pipeline handler lock poisoned") = Some(handler);
    }

    /// Returns the run-scoped pipeline error handler, if any.
    pub fn pipeline_error_handler(&self) -> Option<Arc<dyn PipelineErrorHandler>> {
        self.inner
            .pipeline_handler
            .lock()
            .expect("pipeline handler lock poisoned")
            .clone()
    }

    // Resource disposal

    /// Registers a resource for disposal at end of run.
    ///
    /// A context that was already disposed releases the resource inline
    /// instead of keeping it.
    pub async fn register_disposable(&self, mut resource: Box<dyn AsyncDisposable>) {
        let mut registry = self.inner.resources.lock().await;
        if registry.disposed {
            drop(registry);
            tracing::debug!(
                target: TRACING_TARGET,
                run_id = %self.inner.run_id,
                "Context already disposed, releasing resource inline"
            );
            if let Err(err) = resource.dispose().await {
                tracing::warn!(
                    target: TRACING_TARGET,
                    error = %err,
                    "Inline disposal failed"
                );
            }
            return;
        }
        registry.resources.push(resource);
    }

    /// Registers a synchronous cleanup closure for disposal at end of run.
    pub async fn register_dispose_fn(&self, f: impl FnOnce() + Send + 'static) {
        self.register_disposable(Box::new(DisposeFn::new(f))).await;
    }

    /// Returns how many resources are currently registered.
    pub async fn registered_resources(&self) -> usize {
        self.inner.resources.lock().await.resources.len()
    }

    /// Disposes every registered resource in reverse registration order.
    ///
    /// Each disposal is individually guarded; failures are collected and
    /// surfaced as [`Error::DisposalFailed`] after all other resources are
    /// released. Disposing twice is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        let resources = {
            let mut registry = self.inner.resources.lock().await;
            if registry.disposed {
                return Ok(());
            }
            registry.disposed = true;
            std::mem::take(&mut registry.resources)
        };

        let mut failures = Vec::new();
        for mut resource in resources.into_iter().rev() {
            if let Err(err) = resource.dispose().await {
                tracing::warn!(
                    target: TRACING_TARGET,
                    run_id = %self.inner.run_id,
                    error = %err,
                    "Resource disposal failed"
                );
                failures.push(err);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::DisposalFailed { errors: failures })
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run_id", &self.inner.run_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
