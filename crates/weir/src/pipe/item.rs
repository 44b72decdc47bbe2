//! Opaque items moving through the graph.

use std::any::Any;
use std::sync::Arc;

use crate::definition::TypeDesc;
use crate::error::{Error, Result};

/// Marker trait for element types that can move through a pipeline.
///
/// Blanket-implemented for every `'static` type that is cheap to share
/// across workers. Cloning is required so items can be duplicated for
/// fan-out and buffered for node-restart replay.
pub trait PipelineItem: Any + Clone + Send + Sync + 'static {}

impl<T: Any + Clone + Send + Sync + 'static> PipelineItem for T {}

/// An opaque element moving through the graph.
///
/// The engine routes, counts, and copies items but never inspects their
/// contents. Payloads are reference-counted, so cloning an item for fan-out
/// or materialization never deep-copies user data.
#[derive(Clone)]
pub struct Item {
    value: Arc<dyn Any + Send + Sync>,
    desc: TypeDesc,
}

impl Item {
    /// Wraps a typed value as an opaque item.
    pub fn new<T: PipelineItem>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            desc: TypeDesc::of::<T>(),
        }
    }

    /// Returns the reified type of the wrapped value.
    pub fn type_desc(&self) -> TypeDesc {
        self.desc
    }

    /// Borrows the wrapped value as `T`, if it carries that type.
    pub fn downcast_ref<T: PipelineItem>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Unwraps the item into its typed value.
    ///
    /// Clones the payload only when other holders (fan-out duplicates,
    /// materialization buffers) still reference it.
    pub fn into_typed<T: PipelineItem>(self) -> Result<T> {
        let desc = self.desc;
        Arc::downcast::<T>(self.value)
            .map(Arc::unwrap_or_clone)
            .map_err(|_| Error::PipeTypeMismatch {
                expected: TypeDesc::of::<T>().name(),
                actual: desc.name(),
            })
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("type", &self.desc.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let item = Item::new(42u64);
        assert_eq!(item.type_desc(), TypeDesc::of::<u64>());
        assert_eq!(item.downcast_ref::<u64>(), Some(&42));
        assert_eq!(item.into_typed::<u64>().unwrap(), 42);
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let item = Item::new("text".to_owned());
        let err = item.into_typed::<u64>().unwrap_err();
        assert_eq!(err.code(), "PipeTypeMismatch");
    }

    #[test]
    fn test_clones_share_payload() {
        let item = Item::new(vec![1u8, 2, 3]);
        let copy = item.clone();
        let a: &Vec<u8> = item.downcast_ref().unwrap();
        let b: &Vec<u8> = copy.downcast_ref().unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
