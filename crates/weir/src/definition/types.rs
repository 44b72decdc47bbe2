//! Reified element types carried by edges and pipes.

use std::any::TypeId;

/// A reified description of the element type a node produces or consumes.
///
/// The engine never inspects item contents; it only compares element types
/// when validating edges and when items cross a typed pipe boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDesc {
    id: TypeId,
    name: &'static str,
}

impl TypeDesc {
    /// Returns the descriptor for `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the short type name without its module path.
    pub fn short_name(&self) -> &'static str {
        self.name
            .rsplit("::")
            .next()
            .unwrap_or(self.name)
            .trim_end_matches('>')
            .split('<')
            .next()
            .unwrap_or(self.name)
    }

    /// Returns whether values of this type may flow into a slot of `other`.
    ///
    /// Rust has no runtime subtyping, so assignability is type identity.
    pub fn is_assignable_to(&self, other: &TypeDesc) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

impl std::fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}
