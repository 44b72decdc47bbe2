//! Phantom-typed node handles returned by the builder.
//!
//! Handles are opaque node IDs carrying the node's element types, so
//! `connect` is shape-checked at compile time for graphs built through the
//! typed API. The validator re-checks the reified types at build time, which
//! also covers graphs assembled dynamically.

use std::marker::PhantomData;

use super::NodeId;
use super::edge::{JOIN_LEFT_PORT, JOIN_RIGHT_PORT};

/// A connection endpoint that produces items of type `T`.
pub trait OutputPort<T> {
    /// The node this endpoint belongs to.
    fn node_id(&self) -> NodeId;

    /// Named source port, if any.
    fn port(&self) -> Option<&'static str> {
        None
    }
}

/// A connection endpoint that consumes items of type `T`.
pub trait InputPort<T> {
    /// The node this endpoint belongs to.
    fn node_id(&self) -> NodeId;

    /// Named target port, if any.
    fn port(&self) -> Option<&'static str> {
        None
    }
}

/// Handle to a declared source node.
pub struct SourceHandle<O> {
    id: NodeId,
    _marker: PhantomData<fn() -> O>,
}

/// Handle to a declared transform node.
pub struct TransformHandle<I, O> {
    id: NodeId,
    _marker: PhantomData<fn(I) -> O>,
}

/// Handle to a declared sink node.
pub struct SinkHandle<I> {
    id: NodeId,
    _marker: PhantomData<fn(I)>,
}

/// Handle to a declared join node.
pub struct JoinNodeHandle<L, R, O> {
    id: NodeId,
    _marker: PhantomData<fn(L, R) -> O>,
}

/// One side of a join node, usable as a connection target.
pub struct JoinInput<T> {
    id: NodeId,
    port: &'static str,
    _marker: PhantomData<fn(T)>,
}

macro_rules! handle_common {
    ($name:ident < $($p:ident),+ >) => {
        impl<$($p),+> $name<$($p),+> {
            pub(crate) fn new(id: NodeId) -> Self {
                Self { id, _marker: PhantomData }
            }

            /// The underlying node ID, for the dynamic configuration API.
            pub fn id(&self) -> NodeId {
                self.id
            }
        }

        impl<$($p),+> Clone for $name<$($p),+> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<$($p),+> Copy for $name<$($p),+> {}

        impl<$($p),+> std::fmt::Debug for $name<$($p),+> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.id).finish()
            }
        }
    };
}

handle_common!(SourceHandle<O>);
handle_common!(TransformHandle<I, O>);
handle_common!(SinkHandle<I>);
handle_common!(JoinNodeHandle<L, R, O>);

impl<O> OutputPort<O> for SourceHandle<O> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<I, O> OutputPort<O> for TransformHandle<I, O> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<I, O> InputPort<I> for TransformHandle<I, O> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<I> InputPort<I> for SinkHandle<I> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<L, R, O> OutputPort<O> for JoinNodeHandle<L, R, O> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<L, R, O> JoinNodeHandle<L, R, O> {
    /// The primary (left) input of this join.
    pub fn left(&self) -> JoinInput<L> {
        JoinInput {
            id: self.id,
            port: JOIN_LEFT_PORT,
            _marker: PhantomData,
        }
    }

    /// The secondary (right) input of this join.
    pub fn right(&self) -> JoinInput<R> {
        JoinInput {
            id: self.id,
            port: JOIN_RIGHT_PORT,
            _marker: PhantomData,
        }
    }
}

impl<T> InputPort<T> for JoinInput<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn port(&self) -> Option<&'static str> {
        Some(self.port)
    }
}
