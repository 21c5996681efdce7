//! Island descriptors produced by the external island builder.

/// A maximal set of bodies connected by contacts, solved independently.
///
/// Islands partition the global manifold array into contiguous ranges whose
/// body index sets are disjoint. The solver relies on that disjointness; it
/// never checks it beyond debug assertions.
#[derive(Debug, Clone, Copy)]
pub struct Island {
    /// Offset of the island's first manifold in the global manifold array.
    pub first_manifold: usize,
    /// Number of manifolds in the island.
    pub num_manifolds: usize,
}

impl Island {
    pub fn new(first_manifold: usize, num_manifolds: usize) -> Self {
        Self {
            first_manifold,
            num_manifolds,
        }
    }
}
