use crate::types::{CategoryFilter, Edge, NodeId};

/// Whether `edge` leaves `origin` and carries an allowed category.
///
/// Node ids are compared in normalized form, so an origin written as
/// `"29983"` matches a row whose `from_node` came back as the number `29983`.
pub fn matches(edge: &Edge, origin: &NodeId, allowed: &CategoryFilter) -> bool {
    edge.from_node == *origin && allowed.allows(&edge.category)
}

/// [`matches`] bound to one origin and allowlist.
#[derive(Clone, Debug)]
pub struct EdgePredicate {
    origin: NodeId,
    allowed: CategoryFilter,
}

impl EdgePredicate {
    /// Predicate for `origin` restricted to `allowed`.
    pub fn new(origin: NodeId, allowed: CategoryFilter) -> Self {
        Self { origin, allowed }
    }

    /// See [`matches`].
    pub fn matches(&self, edge: &Edge) -> bool {
        matches(edge, &self.origin, &self.allowed)
    }
}
