//! Objective evaluation over a set of overlays.
//!
//! The objective is evaluated from scratch on every candidate solution. A solution whose edges
//! violate their arcs' delay bounds is infeasible and evaluates to infinity, which makes the
//! improvement loop reject it naturally; over-subscription of node or link capacities is merely
//! penalized, so the search can trade it off against the other criteria.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::network::{Network, NodeId};
use crate::overlay::Overlays;
use crate::paths::path_delay;
use crate::template::{ComponentId, TemplateId, TemplateSet};

/// The optimization criterion.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
pub enum Objective {
    /// All criteria combined lexicographically by weight: over-subscription dominates changed
    /// instances, which dominate total resource consumption, which dominates total delay.
    #[default]
    Combined,
    /// Minimize the maximum over-subscription of node and link capacities.
    OverSub,
    /// Minimize the number of instances changed against the previous embedding.
    Changed,
    /// Minimize the total consumed CPU, memory, and data rate.
    Resources,
    /// Minimize the total delay.
    Delay,
}

// The combined objective assumes fewer than 100 changed instances, a total resource consumption
// below 1000, and a total delay below 1000. Beyond those ceilings the criteria start bleeding
// into each other.
const W_OVER_SUB: f64 = 100_000_000.0;
const W_CHANGED: f64 = 1_000_000.0;
const W_RESOURCES: f64 = 1000.0;

/// Per-node, per-link, and total consumption of a set of overlays.
#[derive(Debug)]
pub(crate) struct Consumption {
    pub(crate) node_cpu: Vec<f64>,
    pub(crate) node_mem: Vec<f64>,
    pub(crate) link_dr: FxHashMap<(NodeId, NodeId), f64>,
    pub(crate) placements: BTreeSet<(ComponentId, NodeId)>,
    pub(crate) delay_feasible: bool,
    pub(crate) max_cpu_over: f64,
    pub(crate) max_mem_over: f64,
    pub(crate) max_dr_over: f64,
    pub(crate) total_cpu: f64,
    pub(crate) total_mem: f64,
    pub(crate) total_dr: f64,
    pub(crate) total_path_delay: f64,
    pub(crate) total_vnf_delay: f64,
}

impl Consumption {
    pub(crate) fn compute(network: &Network, set: &TemplateSet, overlays: &Overlays) -> Self {
        let (node_cpu, node_mem) = overlays.consumed_node_resources(network, set, None);

        let mut delay_feasible = true;
        let mut link_dr: FxHashMap<(NodeId, NodeId), f64> = FxHashMap::default();
        // Links used per (arc, edge endpoints), so the same link contributes its delay once per
        // distinct use.
        let mut link_used: FxHashSet<(TemplateId, usize, NodeId, NodeId, NodeId, NodeId)> =
            FxHashSet::default();
        for (t, ol) in overlays.iter() {
            let template = set.template(t);
            for (key, edge) in ol.edges() {
                let arc = &template.arcs()[edge.arc()];
                let dr_per_path = ol.edge_dr(key) / edge.paths().len() as f64;
                for path in edge.paths() {
                    if path_delay(network, path) > arc.max_delay {
                        warn!(
                            template = %template.name(),
                            "embedding is infeasible because an edge exceeds its delay bound"
                        );
                        delay_feasible = false;
                    }
                    let src_loc = ol.instance(edge.source()).location();
                    let dst_loc = ol.instance(edge.dest()).location();
                    for pair in path.windows(2).filter(|pair| pair[0] != pair[1]) {
                        *link_dr.entry((pair[0], pair[1])).or_insert(0.0) += dr_per_path;
                        link_used.insert((t, edge.arc(), src_loc, dst_loc, pair[0], pair[1]));
                    }
                }
            }
        }

        let mut max_cpu_over = 0.0_f64;
        let mut max_mem_over = 0.0_f64;
        for v in network.node_ids() {
            let node = network.node(v).unwrap();
            max_cpu_over = max_cpu_over.max(node_cpu[v.inner()] - node.cpu);
            max_mem_over = max_mem_over.max(node_mem[v.inner()] - node.mem);
        }
        let mut max_dr_over = 0.0_f64;
        for link in network.links() {
            let consumed = link_dr.get(&(link.src, link.dst)).copied().unwrap_or(0.0);
            max_dr_over = max_dr_over.max(consumed - link.dr);
        }

        let total_path_delay = link_used
            .iter()
            .map(|&(.., u, v)| network.link(u, v).map_or(0.0, |l| l.delay))
            .sum::<f64>();
        let placements = overlays.placements();
        let total_vnf_delay = placements
            .iter()
            .map(|&(c, _)| set.component(c).vnf_delay)
            .sum::<f64>();

        let total_cpu = node_cpu.iter().sum::<f64>();
        let total_mem = node_mem.iter().sum::<f64>();
        let total_dr = network
            .links()
            .map(|l| link_dr.get(&(l.src, l.dst)).copied().unwrap_or(0.0))
            .sum::<f64>();

        Self {
            node_cpu,
            node_mem,
            link_dr,
            placements,
            delay_feasible,
            max_cpu_over,
            max_mem_over,
            max_dr_over,
            total_cpu,
            total_mem,
            total_dr,
            total_path_delay,
            total_vnf_delay,
        }
    }

    /// The number of placements added or removed against a previous embedding.
    pub(crate) fn nr_changed(&self, previous: &BTreeSet<(ComponentId, NodeId)>) -> usize {
        self.placements.symmetric_difference(previous).count()
    }

    pub(crate) fn total_delay(&self) -> f64 {
        self.total_path_delay + self.total_vnf_delay
    }
}

/// Evaluates the objective over the given overlays, or infinity if any edge violates its delay
/// bound.
pub(crate) fn objective_value(
    network: &Network,
    set: &TemplateSet,
    overlays: &Overlays,
    previous: &BTreeSet<(ComponentId, NodeId)>,
    objective: Objective,
) -> f64 {
    let consumption = Consumption::compute(network, set, overlays);
    if !consumption.delay_feasible {
        return f64::INFINITY;
    }
    let over_sub =
        consumption.max_cpu_over + consumption.max_mem_over + consumption.max_dr_over;
    let changed = consumption.nr_changed(previous) as f64;
    let resources = consumption.total_cpu + consumption.total_mem + consumption.total_dr;
    match objective {
        Objective::Combined => {
            W_OVER_SUB * over_sub
                + W_CHANGED * changed
                + W_RESOURCES * resources
                + consumption.total_delay()
        }
        Objective::OverSub => over_sub,
        Objective::Changed => changed,
        Objective::Resources => resources,
        Objective::Delay => consumption.total_delay(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::overlay::{Flow, Instance, Overlay};
    use crate::template::Direction;
    use crate::testing;

    fn node(v: usize) -> NodeId {
        NodeId::new(v)
    }

    /// A chain overlay with the source and vnf at node 0 and the end at node 1, pushing one
    /// unit-rate flow over the link in between.
    fn split_overlay(fixture: &testing::ChainFixture) -> Overlays {
        let mut ol = Overlay::new(fixture.template);
        let flow = ol.flows.insert(Flow::new("f0", 1.0));
        let src = ol.insert_instance(Instance::new_source(fixture.source, node(0), vec![flow]));
        let vnf = ol.insert_instance(Instance::new(fixture.vnf, node(0)));
        let end = ol.insert_instance(Instance::new(fixture.end, node(1)));
        let e0 = ol.add_edge(0, Direction::Forward, src, vnf, vec![node(0), node(0)]);
        ol.map_flow(flow, e0, 1.0);
        let e1 = ol.add_edge(1, Direction::Forward, vnf, end, vec![node(0), node(1)]);
        ol.map_flow(flow, e1, 1.0);
        let mut overlays = Overlays::new();
        overlays.insert(fixture.template, ol);
        overlays
    }

    #[test]
    fn consumption_accounts_nodes_and_links() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links)?;
        let fixture = testing::chain_template()?;
        let overlays = split_overlay(&fixture);
        let consumption = Consumption::compute(&network, &fixture.set, &overlays);

        // Node 0 hosts the source (no ingoing traffic) and the vnf (one unit in forward
        // direction); node 1 hosts the end instance.
        assert_eq!(consumption.node_cpu, vec![1.0, 1.0]);
        assert_eq!(consumption.node_mem, vec![1.0, 1.0]);
        assert_eq!(consumption.link_dr[&(node(0), node(1))], 1.0);
        assert_eq!(consumption.total_dr, 1.0);
        assert_eq!(consumption.max_cpu_over, 0.0);
        assert_eq!(consumption.total_path_delay, 1.0);
        assert!(consumption.delay_feasible);
        Ok(())
    }

    #[test]
    fn combined_objective_weighs_lexicographically() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links)?;
        let fixture = testing::chain_template()?;
        let overlays = split_overlay(&fixture);
        let previous = BTreeSet::new();
        let value = objective_value(
            &network,
            &fixture.set,
            &overlays,
            &previous,
            Objective::Combined,
        );
        // 3 changed instances, 5 consumed resources (2 cpu, 2 mem, 1 dr), path delay 1.
        assert_eq!(value, 3.0 * 1e6 + 5.0 * 1e3 + 1.0);
        assert_eq!(
            objective_value(&network, &fixture.set, &overlays, &previous, Objective::Changed),
            3.0
        );
        assert_eq!(
            objective_value(
                &network,
                &fixture.set,
                &overlays,
                &previous,
                Objective::Resources
            ),
            5.0
        );
        assert_eq!(
            objective_value(&network, &fixture.set, &overlays, &previous, Objective::Delay),
            1.0
        );
        Ok(())
    }

    #[test]
    fn changed_is_empty_against_itself() -> anyhow::Result<()> {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links)?;
        let fixture = testing::chain_template()?;
        let overlays = split_overlay(&fixture);
        let consumption = Consumption::compute(&network, &fixture.set, &overlays);
        assert_eq!(consumption.nr_changed(&overlays.placements()), 0);
        Ok(())
    }

    #[test]
    fn delay_violation_is_infinite() -> anyhow::Result<()> {
        // Raise the link delay beyond the arcs' bound of 5.
        let (nodes, mut links) = testing::two_node_config();
        for l in links.iter_mut() {
            l.delay = 10.0;
        }
        let network = Network::new(&nodes, &links)?;
        let fixture = testing::chain_template()?;
        let overlays = split_overlay(&fixture);
        let value = objective_value(
            &network,
            &fixture.set,
            &overlays,
            &BTreeSet::new(),
            Objective::Combined,
        );
        assert_eq!(value, f64::INFINITY);
        Ok(())
    }

    #[test]
    fn over_subscription_is_positive_excess() -> anyhow::Result<()> {
        let (mut nodes, links) = testing::two_node_config();
        nodes[0].cpu = 0.5; // the source and vnf together need 1.0
        let network = Network::new(&nodes, &links)?;
        let fixture = testing::chain_template()?;
        let overlays = split_overlay(&fixture);
        let value = objective_value(
            &network,
            &fixture.set,
            &overlays,
            &BTreeSet::new(),
            Objective::OverSub,
        );
        assert_eq!(value, 0.5);
        Ok(())
    }
}
