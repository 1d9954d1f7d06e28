//! All-pairs shortest paths over the substrate network, precomputed once per request.
//!
//! Paths are shortest with respect to the [link weight](crate::network::Link::weight), which
//! prefers high-capacity links and uses delay as a tie breaker. Every entry also carries the
//! total propagation delay along the stored path, since the placement heuristic bounds candidate
//! nodes by delay rather than by weight.

use crate::network::{Network, NodeId};

/// A shortest path between an ordered pair of nodes.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ShortestPath {
    /// The node sequence, starting at the source and ending at the destination.
    pub path: Vec<NodeId>,
    /// The summed link weight along the path. Infinite if the destination is unreachable.
    pub weight: f64,
    /// The summed link delay along the path. Infinite if the destination is unreachable.
    pub delay: f64,
}

/// All-pairs shortest paths, computed with the Floyd-Warshall algorithm.
#[derive(Debug, Clone)]
pub struct AllPairsPaths {
    nr_nodes: usize,
    entries: Vec<ShortestPath>,
}

impl AllPairsPaths {
    /// Computes shortest paths between every ordered pair of nodes in the network.
    ///
    /// Intermediate nodes are considered in ascending ID order, so the result is deterministic
    /// for a given network.
    pub fn new(network: &Network) -> Self {
        let n = network.nr_nodes();
        let mut entries = Vec::with_capacity(n * n);
        for v1 in network.node_ids() {
            for v2 in network.node_ids() {
                let entry = if v1 == v2 {
                    // A node reaches itself at no cost.
                    ShortestPath {
                        path: vec![v1, v2],
                        weight: 0.0,
                        delay: 0.0,
                    }
                } else if let Some(link) = network.link(v1, v2) {
                    ShortestPath {
                        path: vec![v1, v2],
                        weight: link.weight(),
                        delay: 0.0,
                    }
                } else {
                    ShortestPath {
                        path: vec![v1, v2],
                        weight: f64::INFINITY,
                        delay: 0.0,
                    }
                };
                entries.push(entry);
            }
        }

        // Relax every pair through every intermediate node k.
        for k in 0..n {
            for i in 0..n {
                for j in 0..n {
                    let candidate = entries[i * n + k].weight + entries[k * n + j].weight;
                    if entries[i * n + j].weight > candidate {
                        // Concatenate the two sub-paths, dropping the duplicated k.
                        let mut path = entries[i * n + k].path.clone();
                        path.extend_from_slice(&entries[k * n + j].path[1..]);
                        entries[i * n + j] = ShortestPath {
                            path,
                            weight: candidate,
                            delay: 0.0,
                        };
                    }
                }
            }
        }

        // Fill in the delay of every stored path. Unreachable pairs keep an infinite delay so
        // that delay-bounded candidate searches never select them.
        for entry in entries.iter_mut() {
            entry.delay = if entry.weight.is_finite() {
                path_delay(network, &entry.path)
            } else {
                f64::INFINITY
            };
        }

        Self { nr_nodes: n, entries }
    }

    /// Returns the shortest path entry from `src` to `dst`.
    ///
    /// Panics if either node is not part of the network.
    pub fn between(&self, src: NodeId, dst: NodeId) -> &ShortestPath {
        &self.entries[src.inner() * self.nr_nodes + dst.inner()]
    }

    /// Returns the weight of the shortest path from `src` to `dst`.
    pub fn weight(&self, src: NodeId, dst: NodeId) -> f64 {
        self.between(src, dst).weight
    }

    /// Returns the delay of the shortest path from `src` to `dst`.
    pub fn delay(&self, src: NodeId, dst: NodeId) -> f64 {
        self.between(src, dst).delay
    }
}

/// Returns the total link delay along a node sequence.
///
/// Consecutive equal nodes represent co-located instances and contribute no delay. A hop without
/// a backing link yields an infinite delay.
pub fn path_delay(network: &Network, path: &[NodeId]) -> f64 {
    path.windows(2)
        .filter(|pair| pair[0] != pair[1])
        .map(|pair| {
            network
                .link(pair[0], pair[1])
                .map_or(f64::INFINITY, |l| l.delay)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Link, Node};
    use crate::testing;

    fn id(v: usize) -> NodeId {
        NodeId::new(v)
    }

    #[test]
    fn two_node_paths_work() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links)?;
        let paths = AllPairsPaths::new(&network);

        let direct = paths.between(id(0), id(1));
        assert_eq!(direct.path, vec![id(0), id(1)]);
        // weight = 1 / (dr + 1 / delay) with dr = 10 and delay = 1
        assert_eq!(direct.weight, 1.0 / 11.0);
        assert_eq!(direct.delay, 1.0);

        let this = paths.between(id(1), id(1));
        assert_eq!(this.path, vec![id(1), id(1)]);
        assert_eq!(this.weight, 0.0);
        assert_eq!(this.delay, 0.0);
        Ok(())
    }

    #[test]
    fn detour_beats_weak_direct_link() -> anyhow::Result<()> {
        // The direct link from 0 to 2 is so weak that going through 1 is cheaper.
        let nodes = vec![
            Node::new(id(0), 1.0, 1.0),
            Node::new(id(1), 1.0, 1.0),
            Node::new(id(2), 1.0, 1.0),
        ];
        let links = vec![
            Link::new(id(0), id(1), 1.0, 1.0), // weight 0.5
            Link::new(id(1), id(2), 1.0, 1.0), // weight 0.5
            Link::new(id(0), id(2), 0.5, 10.0), // weight 1 / 0.6
        ];
        let network = Network::new(&nodes, &links)?;
        let paths = AllPairsPaths::new(&network);

        let entry = paths.between(id(0), id(2));
        assert_eq!(entry.path, vec![id(0), id(1), id(2)]);
        assert_eq!(entry.weight, 1.0);
        assert_eq!(entry.delay, 2.0);
        Ok(())
    }

    #[test]
    fn unreachable_pair_is_infinite() -> anyhow::Result<()> {
        let nodes = vec![
            Node::new(id(0), 1.0, 1.0),
            Node::new(id(1), 1.0, 1.0),
            Node::new(id(2), 1.0, 1.0),
        ];
        let links = vec![Link::new(id(0), id(1), 1.0, 1.0)];
        let network = Network::new(&nodes, &links)?;
        let paths = AllPairsPaths::new(&network);
        assert_eq!(paths.weight(id(0), id(2)), f64::INFINITY);
        assert_eq!(paths.delay(id(0), id(2)), f64::INFINITY);
        // Links are directed, so the reverse of (0, 1) is also unreachable.
        assert_eq!(paths.weight(id(1), id(0)), f64::INFINITY);
        Ok(())
    }

    #[test]
    fn path_delay_skips_co_located_hops() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links)?;
        let path = vec![id(0), id(0), id(1), id(1)];
        assert_eq!(path_delay(&network, &path), 1.0);
        Ok(())
    }

    #[test]
    fn all_pairs_snapshot() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links)?;
        let paths = AllPairsPaths::new(&network);
        let rendered = network
            .node_ids()
            .flat_map(|v1| network.node_ids().map(move |v2| (v1, v2)))
            .map(|(v1, v2)| {
                let entry = paths.between(v1, v2);
                let hops = entry
                    .path
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("-");
                format!("{} to {}: {} (delay {})", v1, v2, hops, entry.delay)
            })
            .collect::<Vec<_>>();
        insta::assert_yaml_snapshot!(rendered, @r###"
        ---
        - "0 to 0: 0-0 (delay 0)"
        - "0 to 1: 0-1 (delay 1)"
        - "1 to 0: 1-0 (delay 1)"
        - "1 to 1: 1-1 (delay 0)"
        "###);
        Ok(())
    }
}
