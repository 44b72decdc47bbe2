//! Declarative construction of pipeline graphs.

use std::sync::Arc;

use super::node::auto_name;
use super::{
    EdgeDefinition, GraphMetadata, InputPort, JoinNodeHandle, NodeDefinition, NodeId, NodeKind,
    NodeOptions, OutputPort, PipelineGraph, PipelineOptions, SinkHandle, SourceHandle,
    TransformHandle, TypeDesc,
};
use crate::error::{Error, Result};
use crate::handler::{DeadLetterSink, ItemErrorHandler, PipelineErrorHandler};
use crate::node::{
    BatchOptions, Batching, Join, JoinKind, NodeInstance, PipeTransform, Sink, Source, Transform,
    Unbatching,
};
use crate::pipe::PipelineItem;
use crate::strategy::ExecutionStrategyKind;
use crate::validate::Validator;

/// Builds an immutable [`PipelineGraph`] from declared nodes and
/// connections.
///
/// All declaration and connection operations are pure with respect to the
/// in-construction graph; [`PipelineBuilder::build`] is the only operation
/// that can fail. Usage mistakes made along the way (unknown node targets,
/// instance collisions) are recorded and surfaced there.
pub struct PipelineBuilder {
    nodes: Vec<NodeDefinition>,
    edges: Vec<EdgeDefinition>,
    options: PipelineOptions,
    metadata: GraphMetadata,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    pipeline_handler: Option<Arc<dyn PipelineErrorHandler>>,
    validator: Validator,
    usage_errors: Vec<Error>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            options: PipelineOptions::default(),
            metadata: GraphMetadata::default(),
            dead_letter: None,
            pipeline_handler: None,
            validator: Validator::new(),
            usage_errors: Vec::new(),
        }
    }

    /// Sets pipeline-scoped options.
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets graph metadata.
    pub fn with_metadata(mut self, metadata: GraphMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Opts out of an extended validation rule by name.
    pub fn without_rule(mut self, rule: &str) -> Self {
        self.validator = self.validator.without_rule(rule);
        self
    }

    // Sources

    /// Declares a source node, auto-named from its type.
    pub fn add_source<S: Source + Default>(&mut self) -> SourceHandle<S::Output> {
        self.add_source_with(auto_name::<S>(), S::default)
    }

    /// Declares a named source node constructed via `Default`.
    pub fn add_source_named<S: Source + Default>(
        &mut self,
        name: impl Into<String>,
    ) -> SourceHandle<S::Output> {
        self.add_source_with(name, S::default)
    }

    /// Declares a named source node with an explicit constructor.
    pub fn add_source_with<S: Source>(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> S + Send + Sync + 'static,
    ) -> SourceHandle<S::Output> {
        let mut def = NodeDefinition::new(
            name.into(),
            NodeKind::Source,
            None,
            None,
            Some(TypeDesc::of::<S::Output>()),
        );
        def.set_constructor(Arc::new(move || NodeInstance::source(constructor())));
        let id = def.id();
        self.nodes.push(def);
        SourceHandle::new(id)
    }

    // Transforms

    /// Declares a transform node, auto-named from its type.
    pub fn add_transform<T: Transform + Default>(&mut self) -> TransformHandle<T::Input, T::Output> {
        self.add_transform_with(auto_name::<T>(), T::default)
    }

    /// Declares a named transform node constructed via `Default`.
    pub fn add_transform_named<T: Transform + Default>(
        &mut self,
        name: impl Into<String>,
    ) -> TransformHandle<T::Input, T::Output> {
        self.add_transform_with(name, T::default)
    }

    /// Declares a named transform node with an explicit constructor.
    pub fn add_transform_with<T: Transform>(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> T + Send + Sync + 'static,
    ) -> TransformHandle<T::Input, T::Output> {
        let mut def = NodeDefinition::new(
            name.into(),
            NodeKind::Transform,
            Some(TypeDesc::of::<T::Input>()),
            None,
            Some(TypeDesc::of::<T::Output>()),
        );
        def.set_constructor(Arc::new(move || NodeInstance::transform(constructor())));
        let id = def.id();
        self.nodes.push(def);
        TransformHandle::new(id)
    }

    /// Declares a named stream-to-stream transform node.
    ///
    /// Pipe transforms run as a single worker; execution strategies do not
    /// apply to them.
    pub fn add_pipe_transform_with<T: PipeTransform>(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> T + Send + Sync + 'static,
    ) -> TransformHandle<T::Input, T::Output> {
        let mut def = NodeDefinition::new(
            name.into(),
            NodeKind::Transform,
            Some(TypeDesc::of::<T::Input>()),
            None,
            Some(TypeDesc::of::<T::Output>()),
        );
        def.set_pipe_based();
        def.set_constructor(Arc::new(move || NodeInstance::pipe_transform(constructor())));
        let id = def.id();
        self.nodes.push(def);
        TransformHandle::new(id)
    }

    /// Declares a batching node collecting `T` into `Vec<T>`.
    pub fn add_batching<T: PipelineItem>(
        &mut self,
        name: impl Into<String>,
        options: BatchOptions,
    ) -> TransformHandle<T, Vec<T>> {
        self.add_pipe_transform_with(name, move || Batching::<T>::new(options.clone()))
    }

    /// Declares an unbatching node flattening `Vec<T>` into `T`.
    pub fn add_unbatching<T: PipelineItem>(
        &mut self,
        name: impl Into<String>,
    ) -> TransformHandle<Vec<T>, T> {
        self.add_pipe_transform_with(name, Unbatching::<T>::new)
    }

    // Sinks

    /// Declares a sink node, auto-named from its type.
    pub fn add_sink<S: Sink + Default>(&mut self) -> SinkHandle<S::Input> {
        self.add_sink_with(auto_name::<S>(), S::default)
    }

    /// Declares a named sink node constructed via `Default`.
    pub fn add_sink_named<S: Sink + Default>(
        &mut self,
        name: impl Into<String>,
    ) -> SinkHandle<S::Input> {
        self.add_sink_with(name, S::default)
    }

    /// Declares a named sink node with an explicit constructor.
    pub fn add_sink_with<S: Sink>(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> S + Send + Sync + 'static,
    ) -> SinkHandle<S::Input> {
        let mut def = NodeDefinition::new(
            name.into(),
            NodeKind::Sink,
            Some(TypeDesc::of::<S::Input>()),
            None,
            None,
        );
        def.set_constructor(Arc::new(move || NodeInstance::sink(constructor())));
        let id = def.id();
        self.nodes.push(def);
        SinkHandle::new(id)
    }

    // Joins

    /// Declares a named join node with an explicit constructor.
    ///
    /// Connect its sides through
    /// [`JoinNodeHandle::left`] and [`JoinNodeHandle::right`].
    pub fn add_join_with<J: Join>(
        &mut self,
        name: impl Into<String>,
        kind: JoinKind,
        constructor: impl Fn() -> J + Send + Sync + 'static,
    ) -> JoinNodeHandle<J::Left, J::Right, J::Output> {
        let mut def = NodeDefinition::new(
            name.into(),
            NodeKind::Join,
            Some(TypeDesc::of::<J::Left>()),
            Some(TypeDesc::of::<J::Right>()),
            Some(TypeDesc::of::<J::Output>()),
        );
        def.set_constructor(Arc::new(move || NodeInstance::join(constructor(), kind)));
        let id = def.id();
        self.nodes.push(def);
        JoinNodeHandle::new(id)
    }

    // Connections

    /// Connects two endpoints whose element types line up.
    pub fn connect<T>(&mut self, from: &impl OutputPort<T>, to: &impl InputPort<T>) {
        let mut edge = EdgeDefinition::new(from.node_id(), to.node_id());
        if let Some(port) = from.port() {
            edge = edge.from_port(port);
        }
        if let Some(port) = to.port() {
            edge = edge.to_port(port);
        }
        self.edges.push(edge);
    }

    /// Connects two nodes by ID, without compile-time type checking.
    ///
    /// The validator still checks the reified types at build time.
    pub fn connect_ids(&mut self, from: NodeId, to: NodeId) {
        self.edges.push(EdgeDefinition::new(from, to));
    }

    /// Adds a fully specified edge.
    pub fn connect_edge(&mut self, edge: EdgeDefinition) {
        self.edges.push(edge);
    }

    // Per-node configuration

    /// Sets the execution strategy for a transform node.
    pub fn set_execution_strategy(&mut self, node: NodeId, strategy: ExecutionStrategyKind) {
        if let ExecutionStrategyKind::Resilient(options) = &strategy
            && matches!(
                options.inner.as_deref(),
                Some(ExecutionStrategyKind::Resilient(_))
            )
        {
            self.usage_errors.push(Error::InvalidConfiguration(
                "resilient strategies cannot nest".into(),
            ));
            return;
        }
        let Some(pos) = self.node_position(node) else {
            self.push_unknown_node(node);
            return;
        };
        let def = &self.nodes[pos];
        if def.kind() != NodeKind::Transform {
            self.usage_errors.push(Error::InvalidConfiguration(format!(
                "execution strategy set on {} node {node}, strategies apply to transforms",
                def.kind()
            )));
        } else if def.is_pipe_based() {
            self.usage_errors.push(Error::InvalidConfiguration(format!(
                "execution strategy set on stream-to-stream transform {node}"
            )));
        } else {
            self.nodes[pos].set_strategy(strategy);
        }
    }

    /// Sets per-node options (merge order).
    pub fn set_node_options(&mut self, node: NodeId, options: NodeOptions) {
        match self.node_position(node) {
            Some(pos) => self.nodes[pos].set_options(options),
            None => self.push_unknown_node(node),
        }
    }

    /// Attaches an item-level error handler to a node.
    pub fn with_error_handler(&mut self, node: NodeId, handler: Arc<dyn ItemErrorHandler>) {
        match self.node_position(node) {
            Some(pos) => self.nodes[pos].set_error_handler(handler),
            None => self.push_unknown_node(node),
        }
    }

    /// Attaches a concrete instance to an already-declared node.
    ///
    /// The instance is used verbatim instead of asking the factory.
    /// Attaching twice to the same node is an error, surfaced at build time.
    pub fn add_preconfigured_instance(&mut self, node: NodeId, instance: NodeInstance) {
        match self.node_position(node) {
            Some(pos) => {
                if let Err(err) = self.nodes[pos].attach_preconfigured(instance) {
                    self.usage_errors.push(err);
                }
            }
            None => self.push_unknown_node(node),
        }
    }

    // Pipeline-level collaborators

    /// Registers the dead-letter sink for this pipeline.
    pub fn add_dead_letter_sink(&mut self, sink: Arc<dyn DeadLetterSink>) {
        self.dead_letter = Some(sink);
    }

    /// Registers the pipeline-level error handler.
    pub fn add_pipeline_error_handler(&mut self, handler: Arc<dyn PipelineErrorHandler>) {
        self.pipeline_handler = Some(handler);
    }

    /// Freezes the graph and validates it.
    ///
    /// Returns the first recorded usage error, or the validation report
    /// wrapped in [`Error::Validation`] when any rule reports an error.
    pub fn build(self) -> Result<PipelineGraph> {
        let Self {
            nodes,
            edges,
            options,
            metadata,
            dead_letter,
            pipeline_handler,
            validator,
            mut usage_errors,
        } = self;
        if !usage_errors.is_empty() {
            return Err(usage_errors.remove(0));
        }

        let mut graph = PipelineGraph::from_parts(
            nodes,
            edges,
            options,
            metadata,
            dead_letter,
            pipeline_handler,
        );
        let report = validator.validate(&graph);
        if !report.is_valid() {
            return Err(Error::Validation(report));
        }
        graph.set_warnings(report.into_warnings());
        Ok(graph)
    }

    fn node_position(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == id)
    }

    fn push_unknown_node(&mut self, id: NodeId) {
        self.usage_errors.push(Error::UnknownNode { node_id: id });
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish_non_exhaustive()
    }
}
