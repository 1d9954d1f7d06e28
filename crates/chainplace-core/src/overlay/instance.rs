//! Instances: components placed at substrate nodes.

use rustc_hash::FxHashMap;

use crate::network::NodeId;
use crate::overlay::{EdgeKey, FlowKey, InstanceKey};
use crate::template::ComponentId;

/// A placement of a component at a substrate node.
///
/// An overlay holds at most one instance per (component, node) pair. Source instances own the
/// flows they emit; fixed instances are pinned to their node and never removed by the heuristic.
#[derive(Debug, Clone)]
pub struct Instance {
    pub(crate) component: ComponentId,
    pub(crate) location: NodeId,
    /// The flows emitted here. `Some` exactly for source instances.
    pub(crate) src_flows: Option<Vec<FlowKey>>,
    pub(crate) fixed: bool,
    /// Ingoing edges, keyed by the instance at the other end.
    pub(crate) edges_in: FxHashMap<InstanceKey, EdgeKey>,
    /// Outgoing edges, keyed by the instance at the other end.
    pub(crate) edges_out: FxHashMap<InstanceKey, EdgeKey>,
}

impl Instance {
    pub(crate) fn new(component: ComponentId, location: NodeId) -> Self {
        Self {
            component,
            location,
            src_flows: None,
            fixed: false,
            edges_in: FxHashMap::default(),
            edges_out: FxHashMap::default(),
        }
    }

    pub(crate) fn new_source(
        component: ComponentId,
        location: NodeId,
        src_flows: Vec<FlowKey>,
    ) -> Self {
        Self {
            src_flows: Some(src_flows),
            ..Self::new(component, location)
        }
    }

    pub(crate) fn new_fixed(component: ComponentId, location: NodeId) -> Self {
        Self {
            fixed: true,
            ..Self::new(component, location)
        }
    }

    /// The placed component.
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// The node the instance is placed at.
    pub fn location(&self) -> NodeId {
        self.location
    }

    /// Whether the instance is pinned to its node.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// The flows emitted by this instance, or `None` if it is not a source instance.
    pub fn src_flows(&self) -> Option<&[FlowKey]> {
        self.src_flows.as_deref()
    }

    /// An iterator over the ingoing edges.
    pub fn edges_in(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.edges_in.values().copied()
    }

    /// An iterator over the outgoing edges.
    pub fn edges_out(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.edges_out.values().copied()
    }
}
