//! This module defines the substrate network: nodes carrying compute capacities and directed
//! links carrying a data rate capacity and a propagation delay. The network is immutable once
//! constructed; overlays only ever reference it.

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

identifier!(NodeId, usize);

/// A substrate node with CPU and memory capacities.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Node {
    /// The node's ID.
    pub id: NodeId,
    /// CPU capacity.
    pub cpu: f64,
    /// Memory capacity.
    pub mem: f64,
}

impl Node {
    /// Creates a new node.
    pub fn new(id: NodeId, cpu: f64, mem: f64) -> Self {
        Self { id, cpu, mem }
    }
}

/// A directed substrate link with a data rate capacity and a propagation delay.
///
/// Links are unidirectional. Loaders wanting full-duplex connectivity declare each direction
/// explicitly.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Link {
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Data rate capacity.
    pub dr: f64,
    /// Propagation delay.
    pub delay: f64,
}

impl Link {
    /// Creates a new link.
    pub fn new(src: NodeId, dst: NodeId, dr: f64, delay: f64) -> Self {
        Self {
            src,
            dst,
            dr,
            delay,
        }
    }

    /// Link weight used for routing. High-capacity links are preferred, with low delay as a
    /// secondary influence.
    ///
    /// A link without capacity is unusable (infinite weight), and a link without delay is free.
    pub fn weight(&self) -> f64 {
        if self.dr == 0.0 {
            f64::INFINITY
        } else if self.delay == 0.0 {
            0.0
        } else {
            1.0 / (self.dr + 1.0 / self.delay)
        }
    }
}

/// A substrate network of [nodes](Node) and directed [links](Link).
#[derive(Debug, Clone)]
pub struct Network {
    graph: DiGraph<Node, Link>,
    id2idx: FxHashMap<NodeId, NodeIndex>,
    links: Vec<Link>,
}

impl Network {
    /// Creates a network from a list of nodes and links. This function returns an error if the
    /// given records fail to produce a valid network. The checks are not exhaustive.
    ///
    /// Correctness properties:
    ///
    /// - Every node must have a unique ID.
    /// - Node IDs must be contiguous.
    /// - Node capacities and link attributes must be non-negative.
    /// - Every link must have distinct endpoints in `nodes`.
    /// - For any two nodes, there must be at most one link per direction.
    pub fn new(nodes: &[Node], links: &[Link]) -> Result<Self, NetworkError> {
        let mut g = DiGraph::new();
        let mut id2idx = FxHashMap::default();
        let mut sorted = nodes.to_vec();
        sorted.sort_by_key(|n| n.id);
        for (i, n) in sorted.into_iter().enumerate() {
            let id = n.id;
            if n.cpu < 0.0 || n.mem < 0.0 {
                return Err(NetworkError::NegativeCapacity(id));
            }
            let idx = g.add_node(n);
            if id2idx.insert(id, idx).is_some() {
                // CORRECTNESS: Every node must have a unique ID.
                return Err(NetworkError::DuplicateNodeId(id));
            }
            if id.inner() != i {
                // CORRECTNESS: Node IDs must be contiguous.
                return Err(NetworkError::HoleBeforeId(id));
            }
        }
        for &link @ Link {
            src,
            dst,
            dr,
            delay,
        } in links
        {
            if src == dst {
                // CORRECTNESS: Every link must have distinct endpoints in `nodes`.
                return Err(NetworkError::NodeAdjacentSelf(src));
            }
            if dr < 0.0 || delay < 0.0 {
                return Err(NetworkError::NegativeAttribute { src, dst });
            }
            let a = *id2idx
                .get(&src)
                .ok_or(NetworkError::UndeclaredNode(src))?;
            let b = *id2idx
                .get(&dst)
                .ok_or(NetworkError::UndeclaredNode(dst))?;
            if g.find_edge(a, b).is_some() {
                // CORRECTNESS: For any two nodes, there must be at most one link per direction.
                return Err(NetworkError::DuplicateLink { src, dst });
            }
            g.add_edge(a, b, link);
        }
        Ok(Self {
            graph: g,
            id2idx,
            links: Vec::from(links),
        })
    }

    /// Returns the number of nodes in the network.
    pub fn nr_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns an iterator over all node IDs in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nr_nodes()).map(NodeId::new)
    }

    /// Returns the node with the given ID, or `None` if no such node exists.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.id2idx.get(&id).map(|&idx| &self.graph[idx])
    }

    /// Returns whether the network contains a node with the given ID.
    pub fn contains(&self, id: NodeId) -> bool {
        self.id2idx.contains_key(&id)
    }

    /// Returns the link from `src` to `dst`, if any.
    pub fn link(&self, src: NodeId, dst: NodeId) -> Option<&Link> {
        let a = *self.id2idx.get(&src)?;
        let b = *self.id2idx.get(&dst)?;
        let eidx = self.graph.find_edge(a, b)?;
        self.graph.edge_weight(eidx)
    }

    delegate::delegate! {
        to self.links {
            /// Returns an iterator over all links in the network.
            #[call(iter)]
            pub fn links(&self) -> impl Iterator<Item = &Link>;
        }
    }
}

/// An error type listing some of the reasons a network is invalid.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Duplicate node ID.
    #[error("duplicate node ID {0}")]
    DuplicateNodeId(NodeId),

    /// Node IDs are not contiguous.
    #[error("node IDs not contiguous; hole before {0}")]
    HoleBeforeId(NodeId),

    /// A node has a negative capacity.
    #[error("node {0} has a negative CPU or memory capacity")]
    NegativeCapacity(NodeId),

    /// A link has a negative data rate or delay.
    #[error("link from {src} to {dst} has a negative data rate or delay")]
    NegativeAttribute {
        /// The link's source node.
        src: NodeId,
        /// The link's destination node.
        dst: NodeId,
    },

    /// A node is connected to itself.
    #[error("node {0} is connected to itself")]
    NodeAdjacentSelf(NodeId),

    /// A node is referenced by a link but does not exist.
    #[error("node {0} is not declared")]
    UndeclaredNode(NodeId),

    /// Duplicate link between two nodes.
    #[error("duplicate link from {src} to {dst}")]
    DuplicateLink {
        /// The link's source node.
        src: NodeId,
        /// The link's destination node.
        dst: NodeId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn empty_network_succeeds() {
        assert!(
            Network::new(&[], &[]).is_ok(),
            "failed to create empty network"
        );
    }

    #[test]
    fn two_node_network_works() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links)?;
        assert_eq!(network.nr_nodes(), 2);
        assert_eq!(network.links().count(), 2);
        assert!(network.link(NodeId::new(0), NodeId::new(1)).is_some());
        assert!(network.link(NodeId::new(1), NodeId::new(0)).is_some());
        Ok(())
    }

    #[test]
    fn duplicate_node_fails() {
        let nodes = vec![
            Node::new(NodeId::new(0), 1.0, 1.0),
            Node::new(NodeId::new(0), 1.0, 1.0), // error
        ];
        let res = Network::new(&nodes, &[]);
        assert!(matches!(res, Err(NetworkError::DuplicateNodeId(..))));
    }

    #[test]
    fn non_contiguous_node_ids_fails() {
        let nodes = vec![
            Node::new(NodeId::new(0), 1.0, 1.0),
            Node::new(NodeId::new(2), 1.0, 1.0), // error
        ];
        let res = Network::new(&nodes, &[]);
        assert!(matches!(res, Err(NetworkError::HoleBeforeId(..))));
    }

    #[test]
    fn negative_capacity_fails() {
        let nodes = vec![Node::new(NodeId::new(0), -1.0, 1.0)];
        let res = Network::new(&nodes, &[]);
        assert!(matches!(res, Err(NetworkError::NegativeCapacity(..))));
    }

    #[test]
    fn node_adjacent_self_fails() {
        let nodes = vec![Node::new(NodeId::new(0), 1.0, 1.0)];
        let links = vec![Link::new(NodeId::new(0), NodeId::new(0), 1.0, 1.0)];
        let res = Network::new(&nodes, &links);
        assert!(matches!(res, Err(NetworkError::NodeAdjacentSelf(..))));
    }

    #[test]
    fn undeclared_node_fails() {
        let nodes = vec![
            Node::new(NodeId::new(0), 1.0, 1.0),
            Node::new(NodeId::new(1), 1.0, 1.0),
        ];
        let links = vec![Link::new(NodeId::new(0), NodeId::new(2), 1.0, 1.0)];
        let res = Network::new(&nodes, &links);
        assert!(matches!(res, Err(NetworkError::UndeclaredNode(..))));
    }

    #[test]
    fn duplicate_link_fails() {
        let nodes = vec![
            Node::new(NodeId::new(0), 1.0, 1.0),
            Node::new(NodeId::new(1), 1.0, 1.0),
        ];
        let links = vec![
            Link::new(NodeId::new(0), NodeId::new(1), 1.0, 1.0),
            Link::new(NodeId::new(0), NodeId::new(1), 2.0, 2.0), // error
        ];
        let res = Network::new(&nodes, &links);
        assert!(matches!(res, Err(NetworkError::DuplicateLink { .. })));
    }

    #[test]
    fn reverse_links_are_distinct() -> anyhow::Result<()> {
        let nodes = vec![
            Node::new(NodeId::new(0), 1.0, 1.0),
            Node::new(NodeId::new(1), 1.0, 1.0),
        ];
        let links = vec![
            Link::new(NodeId::new(0), NodeId::new(1), 1.0, 1.0),
            Link::new(NodeId::new(1), NodeId::new(0), 2.0, 2.0),
        ];
        let network = Network::new(&nodes, &links)?;
        assert_eq!(network.link(NodeId::new(0), NodeId::new(1)).unwrap().dr, 1.0);
        assert_eq!(network.link(NodeId::new(1), NodeId::new(0)).unwrap().dr, 2.0);
        Ok(())
    }

    #[test]
    fn link_weight_prefers_capacity() {
        let fat = Link::new(NodeId::new(0), NodeId::new(1), 10.0, 1.0);
        let thin = Link::new(NodeId::new(0), NodeId::new(1), 1.0, 1.0);
        assert!(fat.weight() < thin.weight());
    }

    #[test]
    fn link_weight_edge_cases() {
        let dead = Link::new(NodeId::new(0), NodeId::new(1), 0.0, 1.0);
        assert_eq!(dead.weight(), f64::INFINITY);
        let instant = Link::new(NodeId::new(0), NodeId::new(1), 1.0, 0.0);
        assert_eq!(instant.weight(), 0.0);
        let regular = Link::new(NodeId::new(0), NodeId::new(1), 1.0, 1.0);
        assert_eq!(regular.weight(), 0.5);
    }
}
