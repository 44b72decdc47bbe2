//! Node definitions: the immutable description side of a node.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use strum::Display;

use super::{NodeId, NodeOptions, TypeDesc};
use crate::error::{Error, Result};
use crate::handler::ItemErrorHandler;
use crate::node::NodeInstance;
use crate::strategy::ExecutionStrategyKind;

/// The shape of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum NodeKind {
    /// Produces items.
    Source,
    /// Maps items (item-at-a-time or stream-to-stream).
    Transform,
    /// Consumes items.
    Sink,
    /// Correlates two typed inputs.
    Join,
}

/// Constructor closure captured when a node is declared, used by the
/// default factory and by resilient restarts.
pub type NodeConstructor = Arc<dyn Fn() -> NodeInstance + Send + Sync>;

/// Immutable description of a node: identity, kind, types, and execution
/// configuration. Instances are produced separately, through the factory.
pub struct NodeDefinition {
    id: NodeId,
    name: String,
    kind: NodeKind,
    input: Option<TypeDesc>,
    secondary_input: Option<TypeDesc>,
    output: Option<TypeDesc>,
    pipe_based: bool,
    strategy: ExecutionStrategyKind,
    options: NodeOptions,
    constructor: Option<NodeConstructor>,
    preconfigured: Mutex<Option<NodeInstance>>,
    preconfigured_attached: bool,
    error_handler: Option<Arc<dyn ItemErrorHandler>>,
}

impl NodeDefinition {
    pub(crate) fn new(
        name: String,
        kind: NodeKind,
        input: Option<TypeDesc>,
        secondary_input: Option<TypeDesc>,
        output: Option<TypeDesc>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            name,
            kind,
            input,
            secondary_input,
            output,
            pipe_based: false,
            strategy: ExecutionStrategyKind::default(),
            options: NodeOptions::default(),
            constructor: None,
            preconfigured: Mutex::new(None),
            preconfigured_attached: false,
            error_handler: None,
        }
    }

    /// Returns the node's stable identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the node's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns the primary input element type, absent for sources.
    pub fn input(&self) -> Option<TypeDesc> {
        self.input
    }

    /// Returns the secondary input element type (joins only).
    pub fn secondary_input(&self) -> Option<TypeDesc> {
        self.secondary_input
    }

    /// Returns the output element type, absent for sinks.
    pub fn output(&self) -> Option<TypeDesc> {
        self.output
    }

    /// Returns whether this transform runs stream-to-stream.
    pub fn is_pipe_based(&self) -> bool {
        self.pipe_based
    }

    /// Returns the configured execution strategy.
    pub fn strategy(&self) -> &ExecutionStrategyKind {
        &self.strategy
    }

    /// Returns the node options.
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Returns the node-scoped item error handler, if any.
    pub fn error_handler(&self) -> Option<Arc<dyn ItemErrorHandler>> {
        self.error_handler.clone()
    }

    /// Returns the captured constructor, if any.
    pub fn constructor(&self) -> Option<NodeConstructor> {
        self.constructor.clone()
    }

    /// Takes the preconfigured instance; it is handed out at most once.
    pub fn take_preconfigured(&self) -> Option<NodeInstance> {
        self.preconfigured
            .lock()
            .expect("preconfigured slot lock poisoned")
            .take()
    }

    /// Returns whether an instance was ever attached.
    pub fn had_preconfigured(&self) -> bool {
        self.preconfigured_attached
    }

    pub(crate) fn set_pipe_based(&mut self) {
        self.pipe_based = true;
    }

    pub(crate) fn set_constructor(&mut self, constructor: NodeConstructor) {
        self.constructor = Some(constructor);
    }

    pub(crate) fn set_strategy(&mut self, strategy: ExecutionStrategyKind) {
        self.strategy = strategy;
    }

    pub(crate) fn set_options(&mut self, options: NodeOptions) {
        self.options = options;
    }

    pub(crate) fn set_error_handler(&mut self, handler: Arc<dyn ItemErrorHandler>) {
        self.error_handler = Some(handler);
    }

    pub(crate) fn attach_preconfigured(&mut self, instance: NodeInstance) -> Result<()> {
        if self.preconfigured_attached {
            return Err(Error::PreconfiguredInstanceCollision { node_id: self.id });
        }
        self.preconfigured_attached = true;
        *self
            .preconfigured
            .lock()
            .expect("preconfigured slot lock poisoned") = Some(instance);
        Ok(())
    }
}

impl std::fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("input", &self.input.map(|t| t.name()))
            .field("output", &self.output.map(|t| t.name()))
            .field("pipe_based", &self.pipe_based)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Derives a node name from a type name by lowercasing its last segment.
pub(crate) fn auto_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let last = full.rsplit("::").next().unwrap_or(full);
    let base = last.split('<').next().unwrap_or(last);
    base.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CamelCaseNode;

    #[test]
    fn test_auto_name_lowercases_type_name() {
        assert_eq!(auto_name::<CamelCaseNode>(), "camelcasenode");
        assert_eq!(auto_name::<Vec<String>>(), "vec");
    }

    #[test]
    fn test_preconfigured_is_single_use() {
        let mut def = NodeDefinition::new(
            "t".into(),
            NodeKind::Transform,
            Some(TypeDesc::of::<u32>()),
            None,
            Some(TypeDesc::of::<u32>()),
        );
        let instance = NodeInstance::transform(crate::node::TagLeft::<u32>::new());
        def.attach_preconfigured(instance).unwrap();

        let second = NodeInstance::transform(crate::node::TagLeft::<u32>::new());
        let err = def.attach_preconfigured(second).unwrap_err();
        assert_eq!(err.code(), "PreconfiguredInstanceCollision");

        assert!(def.take_preconfigured().is_some());
        assert!(def.take_preconfigured().is_none());
        assert!(def.had_preconfigured());
    }
}
