//! Node instantiation.

use super::NodeInstance;
use crate::definition::{NodeDefinition, PipelineGraph};
use crate::error::{Error, Result};

/// Produces concrete node instances for the scheduler.
///
/// The engine asks the factory once per node at wiring time and again when
/// a resilient node is restarted. Hosts with dependency-injection containers
/// implement this to resolve node types from the container; the default
/// implementation covers preconfigured instances and registered
/// constructors.
pub trait NodeFactory: Send + Sync {
    /// Creates the instance for a node definition.
    fn create(&self, definition: &NodeDefinition, graph: &PipelineGraph) -> Result<NodeInstance>;
}

/// Default factory: preconfigured instance first, registered constructor
/// second.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNodeFactory;

impl NodeFactory for DefaultNodeFactory {
    fn create(&self, definition: &NodeDefinition, _graph: &PipelineGraph) -> Result<NodeInstance> {
        if let Some(instance) = definition.take_preconfigured() {
            return Ok(instance);
        }
        if let Some(constructor) = definition.constructor() {
            return Ok(constructor());
        }
        let reason = if definition.had_preconfigured() {
            "its preconfigured instance was already consumed and no constructor is registered"
        } else {
            "no preconfigured instance or constructor is registered"
        };
        Err(Error::NodeNotConstructible {
            node_id: definition.id(),
            name: definition.name().to_owned(),
            reason: reason.to_owned(),
        })
    }
}
