//! Typed edges of the template graph.

use crate::template::component::ComponentId;

/// The data-plane direction of an arc, edge, or traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// From the source component towards the end components.
    Forward,
    /// From the end components back towards the source component.
    Backward,
}

/// A directed, typed edge between two component ports in a template graph.
///
/// Each arc connects a specific output port of its source component to a specific input port of
/// its destination component and carries the maximum tolerable delay for any overlay edge
/// derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Arc {
    /// The arc's direction.
    pub direction: Direction,
    /// The component the arc starts at.
    pub source: ComponentId,
    /// The output port of `source` the arc starts at.
    pub src_out: usize,
    /// The component the arc ends in.
    pub dest: ComponentId,
    /// The input port of `dest` the arc ends in.
    pub dest_in: usize,
    /// Maximum tolerable path delay for edges derived from this arc.
    pub max_delay: f64,
}

impl Arc {
    /// Creates a new arc.
    pub fn new(
        direction: Direction,
        source: ComponentId,
        src_out: usize,
        dest: ComponentId,
        dest_in: usize,
        max_delay: f64,
    ) -> Self {
        Self {
            direction,
            source,
            src_out,
            dest,
            dest_in,
            max_delay,
        }
    }

    /// Whether this arc starts at the given output port of `component` in `direction`.
    pub(crate) fn starts_at(
        &self,
        direction: Direction,
        port: usize,
        component: ComponentId,
    ) -> bool {
        self.direction == direction && self.src_out == port && self.source == component
    }

    /// Whether this arc ends in the given input port of `component` in `direction`.
    pub(crate) fn ends_in(
        &self,
        direction: Direction,
        port: usize,
        component: ComponentId,
    ) -> bool {
        self.direction == direction && self.dest_in == port && self.dest == component
    }
}
