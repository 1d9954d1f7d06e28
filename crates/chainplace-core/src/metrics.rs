//! The report attached to every solution: objective breakdown, consumed resources, and the
//! placement deltas external writers consume.

use std::collections::BTreeSet;
use std::time::Duration;

use itertools::Itertools;

use crate::network::{Network, NodeId};
use crate::objective::{Consumption, Objective};
use crate::overlay::Overlays;
use crate::paths::path_delay;
use crate::template::{ComponentId, TemplateSet};

/// A (component, node) placement, reported by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct Placement {
    /// The component's name.
    pub component: String,
    /// The node the component is placed at.
    pub node: NodeId,
}

/// Consumed resources of a single node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeUse {
    /// The node.
    pub node: NodeId,
    /// Consumed CPU.
    pub cpu: f64,
    /// Consumed memory.
    pub mem: f64,
}

/// Consumed data rate of a single link.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LinkUse {
    /// The link's source node.
    pub src: NodeId,
    /// The link's destination node.
    pub dst: NodeId,
    /// Consumed data rate.
    pub dr: f64,
}

/// The routed delay of one overlay edge.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EdgeDelay {
    /// Name of the edge's template.
    pub template: String,
    /// Location of the edge's source instance.
    pub source: NodeId,
    /// Location of the edge's destination instance.
    pub dest: NodeId,
    /// Total link delay along the edge's path.
    pub delay: f64,
}

/// The rate of one flow on one overlay edge.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowRate {
    /// Name of the edge's template.
    pub template: String,
    /// The flow's ID.
    pub flow: String,
    /// Location of the edge's source instance.
    pub source: NodeId,
    /// Location of the edge's destination instance.
    pub dest: NodeId,
    /// The flow's rate on this edge.
    pub dr: f64,
}

/// Solution metrics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Metrics {
    /// Time spent precomputing all-pairs shortest paths.
    pub init_time: Duration,
    /// Time spent building and improving the embedding.
    pub runtime: Duration,
    /// The evaluated objective.
    pub objective: Objective,
    /// The objective value; infinite if the embedding violates a delay bound.
    pub obj_value: f64,
    /// The seed the run was driven by.
    pub seed: u64,
    /// Number of placed instances across all overlays.
    pub num_instances: usize,
    /// Placements added or removed against the previous embedding.
    pub changed: Vec<Placement>,
    /// Consumed CPU and memory per node.
    pub node_use: Vec<NodeUse>,
    /// Consumed data rate per link.
    pub link_use: Vec<LinkUse>,
    /// Maximum CPU over-subscription on any node.
    pub max_cpu_over: f64,
    /// Maximum memory over-subscription on any node.
    pub max_mem_over: f64,
    /// Maximum data rate over-subscription on any link.
    pub max_dr_over: f64,
    /// Total consumed CPU.
    pub total_consumed_cpu: f64,
    /// Total consumed memory.
    pub total_consumed_mem: f64,
    /// Total consumed data rate.
    pub total_consumed_dr: f64,
    /// Summed link delay over all used links.
    pub total_path_delay: f64,
    /// Summed processing delay over all placed instances.
    pub total_vnf_delay: f64,
    /// `total_path_delay` plus `total_vnf_delay`.
    pub total_delay: f64,
    /// Delay of every routed edge.
    pub path_delays: Vec<EdgeDelay>,
    /// Rate of every flow on every edge it traverses.
    pub flow_rates: Vec<FlowRate>,
    /// Stateful components demoted at validation time because no template routes them
    /// bidirectionally.
    pub demoted_stateful: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn compute(
    network: &Network,
    set: &TemplateSet,
    overlays: &Overlays,
    previous: &BTreeSet<(ComponentId, NodeId)>,
    objective: Objective,
    obj_value: f64,
    seed: u64,
    init_time: Duration,
    runtime: Duration,
    demoted: &[ComponentId],
) -> Metrics {
    let consumption = Consumption::compute(network, set, overlays);

    let changed = consumption
        .placements
        .symmetric_difference(previous)
        .map(|&(c, node)| Placement {
            component: set.component(c).name.clone(),
            node,
        })
        .sorted()
        .collect::<Vec<_>>();

    let node_use = network
        .node_ids()
        .map(|v| NodeUse {
            node: v,
            cpu: consumption.node_cpu[v.inner()],
            mem: consumption.node_mem[v.inner()],
        })
        .collect();
    let link_use = network
        .links()
        .map(|l| LinkUse {
            src: l.src,
            dst: l.dst,
            dr: consumption
                .link_dr
                .get(&(l.src, l.dst))
                .copied()
                .unwrap_or(0.0),
        })
        .sorted_by_key(|l| (l.src, l.dst))
        .collect();

    let mut path_delays = Vec::new();
    let mut flow_rates = Vec::new();
    for (t, ol) in overlays.iter() {
        let template = set.template(t).name().to_owned();
        for (key, edge) in ol.edges() {
            let source = ol.instance(edge.source()).location();
            let dest = ol.instance(edge.dest()).location();
            for path in edge.paths() {
                path_delays.push(EdgeDelay {
                    template: template.clone(),
                    source,
                    dest,
                    delay: path_delay(network, path),
                });
            }
            for &f in edge.flows() {
                let flow = ol.flow(f);
                flow_rates.push(FlowRate {
                    template: template.clone(),
                    flow: flow.id().to_owned(),
                    source,
                    dest,
                    dr: flow.dr_on(key).unwrap_or(0.0),
                });
            }
        }
    }
    path_delays.sort_by(|a, b| {
        (&a.template, a.source, a.dest).cmp(&(&b.template, b.source, b.dest))
    });
    flow_rates.sort_by(|a, b| {
        (&a.template, &a.flow, a.source, a.dest).cmp(&(&b.template, &b.flow, b.source, b.dest))
    });

    let num_instances = overlays.iter().map(|(_, ol)| ol.instances().count()).sum();

    Metrics {
        init_time,
        runtime,
        objective,
        obj_value,
        seed,
        num_instances,
        changed,
        node_use,
        link_use,
        max_cpu_over: consumption.max_cpu_over,
        max_mem_over: consumption.max_mem_over,
        max_dr_over: consumption.max_dr_over,
        total_consumed_cpu: consumption.total_cpu,
        total_consumed_mem: consumption.total_mem,
        total_consumed_dr: consumption.total_dr,
        total_path_delay: consumption.total_path_delay,
        total_vnf_delay: consumption.total_vnf_delay,
        total_delay: consumption.total_delay(),
        path_delays,
        flow_rates,
        demoted_stateful: demoted
            .iter()
            .map(|&c| set.component(c).name.clone())
            .collect(),
    }
}
