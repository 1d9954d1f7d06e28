//! The placement builder: construct or update the overlay of every template by walking the
//! instances in topological order and mapping each instance's outgoing flows onto new or
//! existing edges.
//!
//! The builder is used for the initial embedding and re-used by the improvement loop, which
//! resets part of a solution and rebuilds it with a tabu placement excluded.

use ordered_float::OrderedFloat;
use rand::prelude::*;
use rand::rngs::StdRng;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::network::{Network, NodeId};
use crate::overlay::{Flow, FlowKey, Instance, InstanceKey, Overlay, Overlays};
use crate::paths::AllPairsPaths;
use crate::spec::{FixedInstance, Source};
use crate::template::{ComponentId, Direction, TemplateId, TemplateSet};

/// Placements the current run must not choose.
pub(crate) type Tabu = FxHashSet<(ComponentId, NodeId)>;

/// Builds or updates the overlays for the given templates, in the given order.
///
/// Overlays in `previous` are inherited and updated in place; overlays of templates no longer
/// present are dropped, and templates whose overlay ends up without any instances or edges do
/// not appear in the result.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build(
    network: &Network,
    set: &TemplateSet,
    order: &[TemplateId],
    previous: Overlays,
    sources: &[Source],
    fixed: &[FixedInstance],
    paths: &AllPairsPaths,
    tabu: &Tabu,
    rng: &mut StdRng,
) -> Overlays {
    let mut builder = Builder {
        network,
        set,
        paths,
        tabu,
        rng,
        overlays: previous,
    };
    builder.run(order, sources, fixed);
    builder.overlays
}

struct Builder<'a> {
    network: &'a Network,
    set: &'a TemplateSet,
    paths: &'a AllPairsPaths,
    tabu: &'a Tabu,
    rng: &'a mut StdRng,
    overlays: Overlays,
}

impl<'a> Builder<'a> {
    fn run(&mut self, order: &[TemplateId], sources: &[Source], fixed: &[FixedInstance]) {
        let set = self.set;

        // Keep previous overlays of templates that still exist and start fresh for new ones.
        self.overlays.retain(|t, _| order.contains(t));
        for &t in order {
            if !self.overlays.contains(t) {
                self.overlays.insert(t, Overlay::new(t));
                info!(template = %set.template(t).name(), "created empty overlay");
            }
        }

        // Drop all existing instances of pinned components. The pinned instances are re-added
        // below, which guarantees placement exactly at the pinned locations.
        let fixed_components = fixed.iter().map(|f| f.component).collect::<FxHashSet<_>>();
        for &t in order {
            let Some(ol) = self.overlays.get_mut(t) else {
                continue;
            };
            let doomed = ol
                .instances()
                .filter(|(_, i)| fixed_components.contains(&i.component()))
                .map(|(k, _)| k)
                .collect::<Vec<_>>();
            for k in doomed {
                ol.remove_instance(k);
            }
        }

        for &t in order {
            let template = set.template(t);
            info!(template = %template.name(), "embedding template");

            // A source without flows contributes nothing; treating it as absent lets the
            // flowless overlay collapse and be dropped below.
            let own_sources = sources
                .iter()
                .filter(|src| {
                    template.components().contains(&src.component) && !src.flows.is_empty()
                })
                .collect::<Vec<_>>();
            self.update_sources(t, &own_sources);

            if let Some(ol) = self.overlays.get_mut(t) {
                for f in fixed {
                    if template.components().contains(&f.component)
                        && ol.instance_at(f.component, f.node).is_none()
                    {
                        ol.insert_instance(Instance::new_fixed(f.component, f.node));
                        info!(
                            component = %set.component(f.component).name,
                            node = %f.node,
                            "added pinned instance"
                        );
                    }
                }
            }

            self.embed_template(t);

            if self.overlays.get(t).is_some_and(|ol| ol.is_empty()) {
                self.overlays.remove(t);
                info!(template = %template.name(), "dropped empty overlay");
            }
        }
    }

    /// Walks the overlay's instances in topological order, forward direction first, and maps
    /// every instance's outgoing flows. Unused instances are dropped on the way.
    fn embed_template(&mut self, t: TemplateId) {
        let set = self.set;
        let mut i = 0;
        let mut direction = Direction::Forward;
        loop {
            let Some(ol) = self.overlays.get(t) else {
                break;
            };
            // The order is recomputed every round: mapping a flow may add instances further
            // down, and removals shift the positions.
            let order = ol.topological_order(set);
            let Some(&key) = order.get(i) else {
                break;
            };
            let instance = ol.instance(key);
            let component = instance.component();

            if !instance.is_fixed() && !ol.used(key, direction, set) {
                info!(template = %set.template(t).name(), "removed unused instance");
                if let Some(ol) = self.overlays.get_mut(t) {
                    ol.remove_instance(key);
                }
                continue;
            }

            // The first end instance flips the traversal into the backward direction; outgoing
            // arcs of end components are backward arcs.
            if set.component(component).is_end() {
                direction = Direction::Backward;
            }

            let out_flows = match self.overlays.get_mut(t) {
                Some(ol) => ol.out_flows(key, direction, set),
                None => break,
            };
            for (k, out) in out_flows.into_iter().enumerate() {
                match set.template(t).out_arc(component, k, direction) {
                    Some((arc_idx, _)) => self.update_flow_mapping(t, key, arc_idx, out),
                    // After port adaptation, this output belongs to a different template.
                    None => debug!(output = k, "output belongs to a different template"),
                }
            }

            i += 1;
        }
    }

    /// Reconciles the overlay's source instances and flows with the declared sources: refresh
    /// rates of kept flows, add new flows and source instances, drop everything outdated.
    fn update_sources(&mut self, t: TemplateId, sources: &[&Source]) {
        let set = self.set;
        let Some(ol) = self.overlays.get_mut(t) else {
            return;
        };

        // Stateful waypoints are re-recorded during the forward traversal.
        for (_, flow) in ol.flows.iter_mut() {
            flow.passed_stateful.clear();
        }

        // Drop flows that no source declares anymore, together with edges that carry no other
        // flows.
        let current_ids = sources
            .iter()
            .flat_map(|src| src.flows.iter())
            .map(|f| f.id.as_str())
            .collect::<FxHashSet<_>>();
        let outdated = ol
            .flows()
            .filter(|(_, f)| !current_ids.contains(f.id()))
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
        for f in outdated {
            info!("removing outdated flow and its empty edges");
            remove_flow(ol, f);
        }

        for src in sources {
            if let Some(inst) = ol.instance_at(src.component, src.node) {
                // Drop flows this source no longer emits. Their edges survive; the traversal
                // collects empty edges later.
                let declared = src
                    .flows
                    .iter()
                    .map(|f| f.id.as_str())
                    .collect::<FxHashSet<_>>();
                let listed = ol.instance(inst).src_flows().unwrap_or_default().to_vec();
                for f in listed {
                    if declared.contains(ol.flow(f).id()) {
                        continue;
                    }
                    let edges = ol.flow(f).edges().map(|(e, _)| e).collect::<Vec<_>>();
                    for e in edges {
                        ol.unmap_flow(f, e);
                    }
                    if let Some(flows) = &mut ol.instances[inst].src_flows {
                        flows.retain(|&k| k != f);
                    }
                    ol.flows.remove(f);
                }

                // Refresh kept flows and add new ones.
                for sf in &src.flows {
                    let existing = ol
                        .instance(inst)
                        .src_flows()
                        .unwrap_or_default()
                        .iter()
                        .copied()
                        .find(|&k| ol.flow(k).id() == sf.id);
                    let key = match existing {
                        Some(k) => {
                            ol.flows[k].src_dr = sf.dr;
                            k
                        }
                        None => {
                            let k = ol.flows.insert(Flow::new(sf.id.clone(), sf.dr));
                            if let Some(flows) = &mut ol.instances[inst].src_flows {
                                flows.push(k);
                            }
                            k
                        }
                    };
                    ol.flows[key].passed_stateful.insert(src.component, inst);
                }
                info!(node = %src.node, "reconciled source instance");
            } else {
                let keys = src
                    .flows
                    .iter()
                    .map(|sf| ol.flows.insert(Flow::new(sf.id.clone(), sf.dr)))
                    .collect::<Vec<_>>();
                let inst =
                    ol.insert_instance(Instance::new_source(src.component, src.node, keys.clone()));
                for k in keys {
                    ol.flows[k].passed_stateful.insert(src.component, inst);
                }
                info!(node = %src.node, "added new source instance");
            }
        }

        // Drop source instances whose source is gone.
        let stale = ol
            .instances()
            .filter(|(_, i)| {
                set.component(i.component()).is_source()
                    && !sources
                        .iter()
                        .any(|src| src.component == i.component() && src.node == i.location())
            })
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
        for k in stale {
            info!("removed source instance without a source");
            ol.remove_instance(k);
        }

        // Removing a source instance can orphan flows whose ID was re-declared elsewhere; sweep
        // flows no source instance owns anymore.
        let owned = ol
            .instances()
            .flat_map(|(_, i)| i.src_flows().unwrap_or_default())
            .copied()
            .collect::<FxHashSet<_>>();
        let orphaned = ol
            .flows()
            .map(|(k, _)| k)
            .filter(|k| !owned.contains(k))
            .collect::<Vec<_>>();
        for f in orphaned {
            remove_flow(ol, f);
        }
    }

    /// Updates the mapping of the flows leaving `start` along the given arc: drop outdated
    /// mappings, honor stateful return paths, refresh rates of kept flows, and route new ones.
    fn update_flow_mapping(
        &mut self,
        t: TemplateId,
        start: InstanceKey,
        arc_idx: usize,
        out_flows: FxHashMap<FlowKey, f64>,
    ) {
        let set = self.set;
        let arc = &set.template(t).arcs()[arc_idx];

        let Some(ol) = self.overlays.get_mut(t) else {
            return;
        };
        let mut flow_mapping = FxHashMap::default();
        for e in ol.instance(start).edges_out().collect::<Vec<_>>() {
            if ol.edge(e).arc() == arc_idx {
                for &f in ol.edge(e).flows() {
                    flow_mapping.insert(f, e);
                }
            }
        }

        // Remove outdated flows along this arc.
        flow_mapping.retain(|&f, &mut e| {
            if out_flows.contains_key(&f) {
                true
            } else {
                ol.unmap_flow(f, e);
                false
            }
        });

        if set.component(arc.dest).stateful && arc.direction == Direction::Backward {
            // Flows must return to the stateful instances they passed on the way forward.
            self.map_flows_to_stateful(t, start, arc_idx, &out_flows);
        } else {
            // Deterministic-but-shuffled order: sorting makes runs reproducible for a fixed
            // seed, shuffling varies the mapping order across improvement iterations.
            let mut ordered = out_flows.keys().copied().collect::<Vec<_>>();
            ordered.sort_by(|&a, &b| ol.flow(a).id().cmp(ol.flow(b).id()));
            ordered.shuffle(&mut *self.rng);
            for f in ordered {
                let dr = out_flows[&f];
                if let Some(&e) = flow_mapping.get(&f) {
                    let Some(ol) = self.overlays.get_mut(t) else {
                        return;
                    };
                    ol.map_flow(f, e, dr);
                } else {
                    self.map_flow_to_edge(t, start, arc_idx, f, dr);
                }
            }
        }

        // Drop edges along the arc that lost their last flow.
        if let Some(ol) = self.overlays.get_mut(t) {
            let empty = ol
                .instance(start)
                .edges_out()
                .filter(|&e| ol.edge(e).arc() == arc_idx && ol.edge(e).flows().is_empty())
                .collect::<Vec<_>>();
            for e in empty {
                info!("removed empty edge");
                ol.remove_edge(e);
            }
        }
    }

    /// Maps the given flow onto an edge from `start` along the arc, creating the destination
    /// instance and the edge as needed.
    fn map_flow_to_edge(
        &mut self,
        t: TemplateId,
        start: InstanceKey,
        arc_idx: usize,
        flow: FlowKey,
        flow_dr: f64,
    ) {
        let set = self.set;
        let paths = self.paths;
        let arc = &set.template(t).arcs()[arc_idx];

        let Some(ol) = self.overlays.get(t) else {
            return;
        };
        // Pinned destination components cannot grow new instances, so placement must reuse one
        // of the pinned locations.
        let fixed = ol
            .instances()
            .any(|(_, i)| i.component() == arc.dest && i.is_fixed());
        let start_loc = ol.instance(start).location();

        let best_node = self.find_best_node(t, start_loc, arc_idx, flow_dr, fixed);

        let Some(ol) = self.overlays.get_mut(t) else {
            return;
        };
        let dest = match ol.instance_at(arc.dest, best_node) {
            Some(existing) => existing,
            None => {
                info!(
                    component = %set.component(arc.dest).name,
                    node = %best_node,
                    "added new instance at best node"
                );
                ol.insert_instance(Instance::new(arc.dest, best_node))
            }
        };
        let edge = match ol.instance(start).edges_out.get(&dest) {
            Some(&e) => e,
            None => {
                let path = paths.between(start_loc, best_node).path.clone();
                ol.add_edge(arc_idx, arc.direction, start, dest, path)
            }
        };
        ol.map_flow(flow, edge, flow_dr);
    }

    /// Maps the outgoing flows of a backward arc onto edges back to the same stateful instances
    /// the flows passed in forward direction, creating edges as needed.
    fn map_flows_to_stateful(
        &mut self,
        t: TemplateId,
        start: InstanceKey,
        arc_idx: usize,
        out_flows: &FxHashMap<FlowKey, f64>,
    ) {
        let set = self.set;
        let paths = self.paths;
        let arc = &set.template(t).arcs()[arc_idx];
        let Some(ol) = self.overlays.get_mut(t) else {
            return;
        };

        // Any previous mapping along this arc is rebuilt from scratch.
        let arc_edges = ol
            .instance(start)
            .edges_out()
            .filter(|&e| ol.edge(e).arc() == arc_idx)
            .collect::<Vec<_>>();
        for e in arc_edges {
            for f in ol.edge(e).flows().to_vec() {
                ol.unmap_flow(f, e);
            }
        }

        let start_loc = ol.instance(start).location();
        for (&f, &dr) in out_flows {
            let Some(&dest) = ol.flow(f).passed_stateful.get(&arc.dest) else {
                warn!(
                    component = %set.component(arc.dest).name,
                    "flow never passed the stateful component forward; skipping return mapping"
                );
                continue;
            };
            let edge = match ol.instance(start).edges_out.get(&dest) {
                Some(&e) => e,
                None => {
                    let dest_loc = ol.instance(dest).location();
                    let path = paths.between(start_loc, dest_loc).path.clone();
                    ol.add_edge(arc_idx, arc.direction, start, dest, path)
                }
            };
            ol.map_flow(f, edge, dr);
        }
    }

    /// Picks the node to connect an edge to: among all nodes within the arc's delay bound that
    /// are not tabu and have enough remaining capacity for the destination component at the
    /// increased rate, the one with the lowest path weight from `start`. If no node qualifies,
    /// falls back to the node with the lowest over-subscription.
    fn find_best_node(
        &self,
        t: TemplateId,
        start: NodeId,
        arc_idx: usize,
        delta_dr: f64,
        fixed: bool,
    ) -> NodeId {
        let set = self.set;
        let paths = self.paths;
        let network = self.network;
        let arc = &set.template(t).arcs()[arc_idx];
        let dest = set.component(arc.dest);

        // The increased ingoing rate: `delta_dr` at the arc's input, zero elsewhere.
        let mut delta = vec![0.0; dest.total_inputs()];
        let input = match arc.direction {
            Direction::Forward => arc.dest_in,
            Direction::Backward => dest.inputs + arc.dest_in,
        };
        delta[input] = delta_dr;

        // Consumption without the idle share of existing destination instances, so a flow
        // assigned to one of them is not charged for its idle consumption twice.
        let (cpu_used, mem_used) =
            self.overlays
                .consumed_node_resources(network, set, Some(arc.dest));

        let allowed = network
            .node_ids()
            .filter(|&v| {
                paths.delay(start, v) <= arc.max_delay && !self.tabu.contains(&(arc.dest, v))
            })
            .collect::<Vec<_>>();

        // Pinned components must reuse one of their existing locations.
        let fixed_nodes = if fixed {
            self.overlays
                .get(t)
                .map(|ol| {
                    ol.instances()
                        .filter(|(_, i)| i.component() == arc.dest)
                        .map(|(_, i)| i.location())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut candidates = allowed
            .iter()
            .copied()
            .filter(|&v| {
                let node = network.node(v).unwrap();
                let remaining_cpu = node.cpu - cpu_used[v.inner()];
                let remaining_mem = node.mem - mem_used[v.inner()];
                remaining_cpu - dest.cpu_req(&delta, false) >= 0.0
                    && remaining_mem - dest.mem_req(&delta, false) >= 0.0
            })
            .collect::<Vec<_>>();
        if fixed {
            candidates.retain(|v| fixed_nodes.contains(v));
        }
        for &v in &candidates {
            debug!(node = %v, "candidate node");
        }

        if let Some(&best) = candidates
            .iter()
            .min_by_key(|&&v| OrderedFloat(paths.weight(start, v)))
        {
            return best;
        }

        // No node has enough remaining capacity: pick the node with the lowest resulting
        // over-subscription, tie-broken by path weight.
        info!("no node with enough remaining resources; choosing lowest over-subscription");
        let (cpu_all, mem_all) = self.overlays.consumed_node_resources(network, set, None);
        let mut pool = if fixed {
            fixed_nodes
                .iter()
                .copied()
                .filter(|&v| paths.delay(start, v) <= arc.max_delay)
                .collect::<Vec<_>>()
        } else {
            allowed
        };
        // A pinned component beyond its delay bound, or a fully tabu neighborhood, leaves an
        // empty pool. Relax the bounds step by step so a best-effort placement always exists;
        // the delay violation then surfaces through the infinite objective.
        if pool.is_empty() && fixed {
            pool = fixed_nodes;
        }
        if pool.is_empty() {
            pool = network
                .node_ids()
                .filter(|&v| !self.tabu.contains(&(arc.dest, v)))
                .collect();
        }
        if pool.is_empty() {
            pool = network.node_ids().collect();
        }

        let mut best = start;
        let mut min_over = f64::INFINITY;
        let mut min_weight = f64::INFINITY;
        for v in pool {
            let node = network.node(v).unwrap();
            let over =
                (cpu_all[v.inner()] - node.cpu) + (mem_all[v.inner()] - node.mem);
            if over <= min_over {
                let weight = paths.weight(start, v);
                if over < min_over || weight < min_weight {
                    best = v;
                    min_over = over;
                    min_weight = weight;
                }
            }
        }
        best
    }
}

/// Removes a flow entirely: unmap it from every edge it traverses, drop edges left without
/// flows, and forget the flow.
fn remove_flow(ol: &mut Overlay, f: FlowKey) {
    let edges = ol.flow(f).edges().map(|(e, _)| e).collect::<Vec<_>>();
    for e in edges {
        ol.unmap_flow(f, e);
        if ol.edge(e).flows().is_empty() {
            ol.remove_edge(e);
        }
    }
    for (_, instance) in ol.instances.iter_mut() {
        if let Some(flows) = &mut instance.src_flows {
            flows.retain(|&k| k != f);
        }
    }
    ol.flows.remove(f);
}
