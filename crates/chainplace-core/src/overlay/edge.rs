//! Overlay edges: routed connections between two instances.

use crate::network::NodeId;
use crate::overlay::{FlowKey, InstanceKey};
use crate::template::Direction;

/// A directed connection between two instances, derived from a template arc and routed over a
/// concrete substrate path.
///
/// There is at most one edge per ordered instance pair. An edge carries the flows mapped onto it;
/// an edge without flows is dead and removed by the heuristic.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Index of the originating arc in the owning template's arc list.
    pub(crate) arc: usize,
    pub(crate) source: InstanceKey,
    pub(crate) dest: InstanceKey,
    pub(crate) direction: Direction,
    /// The substrate paths the edge is routed over. Currently always exactly one; the edge's
    /// rate is split equally among the paths.
    pub(crate) paths: Vec<Vec<NodeId>>,
    pub(crate) flows: Vec<FlowKey>,
}

impl Edge {
    /// Index of the originating arc in the owning template's arc list.
    pub fn arc(&self) -> usize {
        self.arc
    }

    /// The instance the edge starts at.
    pub fn source(&self) -> InstanceKey {
        self.source
    }

    /// The instance the edge ends at.
    pub fn dest(&self) -> InstanceKey {
        self.dest
    }

    /// The edge's direction, copied from its arc.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The substrate paths the edge is routed over.
    pub fn paths(&self) -> &[Vec<NodeId>] {
        &self.paths
    }

    /// The flows mapped onto the edge.
    pub fn flows(&self) -> &[FlowKey] {
        &self.flows
    }
}
