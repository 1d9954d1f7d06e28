//! This module defines overlays, the mutable embedding state of one template: [instances]
//! (Instance) bound to substrate nodes, routed [edges](Edge) between them, and the [flows](Flow)
//! mapped onto those edges.
//!
//! Instances, edges, and flows live in per-overlay slotmap arenas and reference each other by
//! key. Snapshotting an overlay for the improvement loop is therefore a plain [`Clone`]: keys
//! stay valid in the copy and no cross-references can dangle or alias.

pub mod edge;
pub mod flow;
pub mod instance;

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

pub use edge::Edge;
pub use flow::Flow;
pub use instance::Instance;

use crate::network::{Network, NodeId};
use crate::template::{ComponentId, Direction, TemplateId, TemplateSet};

slotmap::new_key_type! {
    /// Key of an [`Instance`] within its overlay.
    pub struct InstanceKey;
    /// Key of an [`Edge`] within its overlay.
    pub struct EdgeKey;
    /// Key of a [`Flow`] within its overlay.
    pub struct FlowKey;
}

/// The embedding of a single template.
#[derive(Debug, Clone)]
pub struct Overlay {
    template: TemplateId,
    pub(crate) instances: SlotMap<InstanceKey, Instance>,
    pub(crate) edges: SlotMap<EdgeKey, Edge>,
    pub(crate) flows: SlotMap<FlowKey, Flow>,
}

impl Overlay {
    /// Creates an empty overlay for the given template.
    pub fn new(template: TemplateId) -> Self {
        Self {
            template,
            instances: SlotMap::with_key(),
            edges: SlotMap::with_key(),
            flows: SlotMap::with_key(),
        }
    }

    /// The embedded template.
    pub fn template(&self) -> TemplateId {
        self.template
    }

    /// Whether the overlay has neither instances nor edges.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.edges.is_empty()
    }

    /// Returns the instance with the given key.
    pub fn instance(&self, key: InstanceKey) -> &Instance {
        &self.instances[key]
    }

    /// Returns the edge with the given key.
    pub fn edge(&self, key: EdgeKey) -> &Edge {
        &self.edges[key]
    }

    /// Returns the flow with the given key.
    pub fn flow(&self, key: FlowKey) -> &Flow {
        &self.flows[key]
    }

    /// An iterator over all instances.
    pub fn instances(&self) -> impl Iterator<Item = (InstanceKey, &Instance)> {
        self.instances.iter()
    }

    /// An iterator over all edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, &Edge)> {
        self.edges.iter()
    }

    /// An iterator over all flows.
    pub fn flows(&self) -> impl Iterator<Item = (FlowKey, &Flow)> {
        self.flows.iter()
    }

    /// Returns the instance of `component` at `node`, if any. Overlays hold at most one instance
    /// per (component, node) pair.
    pub fn instance_at(&self, component: ComponentId, node: NodeId) -> Option<InstanceKey> {
        self.instances
            .iter()
            .find(|(_, i)| i.component == component && i.location == node)
            .map(|(k, _)| k)
    }

    pub(crate) fn insert_instance(&mut self, instance: Instance) -> InstanceKey {
        debug_assert!(
            self.instance_at(instance.component, instance.location).is_none(),
            "only one instance per component and node"
        );
        self.instances.insert(instance)
    }

    /// Creates an edge between two instances and registers it with both endpoints.
    pub(crate) fn add_edge(
        &mut self,
        arc: usize,
        direction: Direction,
        source: InstanceKey,
        dest: InstanceKey,
        path: Vec<NodeId>,
    ) -> EdgeKey {
        let key = self.edges.insert(Edge {
            arc,
            source,
            dest,
            direction,
            paths: vec![path],
            flows: Vec::new(),
        });
        self.instances[source].edges_out.insert(dest, key);
        self.instances[dest].edges_in.insert(source, key);
        key
    }

    /// Removes an edge, unmapping its flows and deregistering it from its endpoints.
    pub(crate) fn remove_edge(&mut self, key: EdgeKey) {
        if let Some(edge) = self.edges.remove(key) {
            for &f in &edge.flows {
                if let Some(flow) = self.flows.get_mut(f) {
                    flow.dr.remove(&key);
                }
            }
            if let Some(source) = self.instances.get_mut(edge.source) {
                source.edges_out.retain(|_, &mut e| e != key);
            }
            if let Some(dest) = self.instances.get_mut(edge.dest) {
                dest.edges_in.retain(|_, &mut e| e != key);
            }
        }
    }

    /// Removes an instance together with all its edges, and forgets it as a stateful waypoint of
    /// any flow.
    pub(crate) fn remove_instance(&mut self, key: InstanceKey) {
        for (_, flow) in self.flows.iter_mut() {
            flow.passed_stateful.retain(|_, &mut inst| inst != key);
        }
        let touching = self
            .edges
            .iter()
            .filter(|(_, e)| e.source == key || e.dest == key)
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
        for e in touching {
            self.remove_edge(e);
        }
        self.instances.remove(key);
    }

    /// Maps a flow onto an edge with the given rate.
    pub(crate) fn map_flow(&mut self, flow: FlowKey, edge: EdgeKey, dr: f64) {
        self.flows[flow].dr.insert(edge, dr);
        if !self.edges[edge].flows.contains(&flow) {
            self.edges[edge].flows.push(flow);
        }
    }

    /// Removes a flow's mapping from an edge.
    pub(crate) fn unmap_flow(&mut self, flow: FlowKey, edge: EdgeKey) {
        self.flows[flow].dr.remove(&edge);
        self.edges[edge].flows.retain(|&f| f != flow);
    }

    /// The total data rate of all flows mapped onto the edge.
    pub fn edge_dr(&self, key: EdgeKey) -> f64 {
        self.edges[key]
            .flows
            .iter()
            .map(|&f| self.flows[f].dr[&key])
            .sum()
    }

    /// The ingoing data rate per input, forward inputs first, based on the flows mapped onto the
    /// ingoing edges.
    pub fn input_dr(&self, key: InstanceKey, set: &TemplateSet) -> Vec<f64> {
        let inst = &self.instances[key];
        let component = set.component(inst.component);
        let template = set.template(self.template);
        let sum_at = |direction: Direction, k: usize| {
            inst.edges_in
                .values()
                .filter(|&&e| {
                    let edge = &self.edges[e];
                    edge.direction == direction && template.arcs()[edge.arc].dest_in == k
                })
                .map(|&e| self.edge_dr(e))
                .sum::<f64>()
        };
        let mut in_dr = Vec::with_capacity(component.total_inputs());
        for k in 0..component.inputs {
            in_dr.push(sum_at(Direction::Forward, k));
        }
        for k in 0..component.inputs_bwd {
            in_dr.push(sum_at(Direction::Backward, k));
        }
        in_dr
    }

    /// The flows that should leave each output of the instance in the given direction, with the
    /// rate each flow leaves at. Derived from the ingoing edges and the component's per-output
    /// rate functions; end components turn their forward traffic around.
    ///
    /// As a side effect, a stateful instance traversed in forward direction records itself as
    /// the waypoint of every ingoing flow.
    pub(crate) fn out_flows(
        &mut self,
        key: InstanceKey,
        direction: Direction,
        set: &TemplateSet,
    ) -> Vec<FxHashMap<FlowKey, f64>> {
        let inst = &self.instances[key];
        let comp_id = inst.component;
        let component = set.component(comp_id);

        if component.stateful && direction == Direction::Forward {
            let passing = inst
                .edges_in
                .values()
                .filter(|&&e| self.edges[e].direction == Direction::Forward)
                .flat_map(|&e| self.edges[e].flows.iter().copied())
                .collect::<Vec<_>>();
            for f in passing {
                self.flows[f].passed_stateful.insert(comp_id, key);
            }
        }

        let inst = &self.instances[key];
        match (direction, component.is_source(), component.is_end()) {
            (Direction::Forward, true, _) => {
                // Source instances emit their own flows at the declared rates.
                let flows = inst.src_flows.as_deref().unwrap_or_default();
                vec![flows
                    .iter()
                    .map(|&f| (f, self.flows[f].src_dr))
                    .collect::<FxHashMap<_, _>>()]
            }
            (Direction::Forward, _, true) | (Direction::Backward, true, _) => Vec::new(),
            (Direction::Forward, ..) => self.spread(
                key,
                Direction::Forward,
                component.inputs,
                component.outputs,
                |in_dr, k| component.outgoing(in_dr, k),
                set,
            ),
            (Direction::Backward, _, true) => self.spread(
                key,
                Direction::Forward,
                component.inputs,
                component.outputs_bwd,
                |in_dr, k| component.outgoing_bwd(in_dr, k),
                set,
            ),
            (Direction::Backward, ..) => self.spread(
                key,
                Direction::Backward,
                component.inputs_bwd,
                component.outputs_bwd,
                |in_dr, k| component.outgoing_bwd(in_dr, k),
                set,
            ),
        }
    }

    /// Applies the per-output rate functions to every flow arriving over an ingoing edge of the
    /// given direction, where each flow's ingoing rate vector is nonzero only at its arrival
    /// input.
    fn spread(
        &self,
        key: InstanceKey,
        in_direction: Direction,
        nr_inputs: usize,
        nr_outputs: usize,
        outgoing: impl Fn(&[f64], usize) -> f64,
        set: &TemplateSet,
    ) -> Vec<FxHashMap<FlowKey, f64>> {
        let template = set.template(self.template);
        let mut out = vec![FxHashMap::default(); nr_outputs];
        let arrivals = self.instances[key]
            .edges_in
            .values()
            .filter(|&&e| self.edges[e].direction == in_direction)
            .flat_map(|&e| {
                let edge = &self.edges[e];
                let dest_in = template.arcs()[edge.arc].dest_in;
                edge.flows
                    .iter()
                    .map(move |&f| (f, self.flows[f].dr[&e], dest_in))
            });
        for (f, dr, dest_in) in arrivals {
            let mut in_dr = vec![0.0; nr_inputs];
            in_dr[dest_in] = dr;
            for (k, flows) in out.iter_mut().enumerate() {
                let rate = outgoing(&in_dr, k);
                if rate > 0.0 {
                    *flows.entry(f).or_insert(0.0) += rate;
                }
            }
        }
        out
    }

    /// Whether the instance carries traffic in the given direction: source instances are always
    /// used, end instances whenever they receive forward traffic, and all others when an ingoing
    /// edge of the direction has a positive rate.
    pub(crate) fn used(&self, key: InstanceKey, direction: Direction, set: &TemplateSet) -> bool {
        let inst = &self.instances[key];
        if inst.src_flows.is_some() {
            return true;
        }
        let direction = if set.component(inst.component).is_end() {
            Direction::Forward
        } else {
            direction
        };
        inst.edges_in
            .values()
            .any(|&e| self.edges[e].direction == direction && self.edge_dr(e) > 0.0)
    }

    /// Returns the instances in topological order: grouped by the template's component order,
    /// forward direction first. Instances of components traversed in both directions appear
    /// once per direction, and only instances carrying traffic in the respective direction (or
    /// without any ingoing edges yet) are listed.
    pub(crate) fn topological_order(&self, set: &TemplateSet) -> Vec<InstanceKey> {
        let mut order = Vec::new();
        let mut direction = Direction::Forward;
        let mut end_reached = false;
        for j in set.topological_component_order(self.template) {
            let component = set.component(j);
            if component.is_end() {
                end_reached = true;
            }
            if end_reached && !component.is_end() {
                direction = Direction::Backward;
            }
            order.extend(
                self.instances
                    .iter()
                    .filter(|&(k, i)| {
                        i.component == j
                            && (component.is_source()
                                || self.used(k, direction, set)
                                || i.edges_in.is_empty())
                    })
                    .map(|(k, _)| k),
            );
        }
        order
    }

    /// Drops everything from the given instance onwards: only instances strictly before it in
    /// topological order survive, along with the edges and flow state confined to that prefix.
    /// The improvement loop uses this to rebuild a solution from the perturbation point.
    pub(crate) fn reset_before(&mut self, key: InstanceKey, set: &TemplateSet) {
        let order = self.topological_order(set);
        let Some(index) = order.iter().position(|&k| k == key) else {
            debug_assert!(false, "reset target is not part of the overlay");
            return;
        };
        let keep = order[..index].iter().copied().collect::<BTreeSet<_>>();
        let doomed = self
            .instances
            .keys()
            .filter(|k| !keep.contains(k))
            .collect::<Vec<_>>();
        for k in doomed {
            self.remove_instance(k);
        }
    }
}

/// The overlays of all templates of a request, keyed by template.
#[derive(Debug, Clone, Default)]
pub struct Overlays {
    inner: FxHashMap<TemplateId, Overlay>,
}

impl Overlays {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the overlay of the given template, if any.
    pub fn get(&self, template: TemplateId) -> Option<&Overlay> {
        self.inner.get(&template)
    }

    pub(crate) fn get_mut(&mut self, template: TemplateId) -> Option<&mut Overlay> {
        self.inner.get_mut(&template)
    }

    pub(crate) fn insert(&mut self, template: TemplateId, overlay: Overlay) {
        self.inner.insert(template, overlay);
    }

    pub(crate) fn remove(&mut self, template: TemplateId) -> Option<Overlay> {
        self.inner.remove(&template)
    }

    pub(crate) fn retain(&mut self, f: impl FnMut(&TemplateId, &mut Overlay) -> bool) {
        self.inner.retain(f);
    }

    /// Whether the collection holds an overlay for the given template.
    pub fn contains(&self, template: TemplateId) -> bool {
        self.inner.contains_key(&template)
    }

    /// An iterator over all overlays.
    pub fn iter(&self) -> impl Iterator<Item = (TemplateId, &Overlay)> {
        self.inner.iter().map(|(&t, ol)| (t, ol))
    }

    delegate::delegate! {
        to self.inner {
            /// The number of overlays.
            #[call(len)]
            pub fn len(&self) -> usize;

            /// Whether there are no overlays.
            pub fn is_empty(&self) -> bool;
        }
    }

    /// The set of (component, node) placements across all overlays. Placements shared by
    /// multiple overlays appear once.
    pub fn placements(&self) -> BTreeSet<(ComponentId, NodeId)> {
        self.inner
            .values()
            .flat_map(|ol| ol.instances.values())
            .map(|i| (i.component, i.location))
            .collect()
    }

    /// Consumed CPU and memory per node across all overlays. Instances shared by overlays are
    /// counted once per overlay, since each overlay routes its own traffic through them.
    ///
    /// When `ignore_idle` names a component, the idle consumption of that component's instances
    /// is skipped. Candidate searches use this to avoid counting an instance's idle consumption
    /// against itself.
    pub(crate) fn consumed_node_resources(
        &self,
        network: &Network,
        set: &TemplateSet,
        ignore_idle: Option<ComponentId>,
    ) -> (Vec<f64>, Vec<f64>) {
        let mut cpu = vec![0.0; network.nr_nodes()];
        let mut mem = vec![0.0; network.nr_nodes()];
        for ol in self.inner.values() {
            for (key, inst) in ol.instances.iter() {
                let component = set.component(inst.component);
                let in_dr = ol.input_dr(key, set);
                let skip_idle = ignore_idle == Some(inst.component);
                cpu[inst.location.inner()] += component.cpu_req(&in_dr, skip_idle);
                mem[inst.location.inner()] += component.mem_req(&in_dr, skip_idle);
            }
        }
        (cpu, mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NodeId;
    use crate::testing;

    fn node(v: usize) -> NodeId {
        NodeId::new(v)
    }

    /// Builds an overlay for the chain fixture with the source at node 0 emitting one flow and
    /// the vnf placed at node 1.
    fn chain_overlay(
        fixture: &testing::ChainFixture,
    ) -> (Overlay, InstanceKey, InstanceKey, FlowKey, EdgeKey) {
        let mut ol = Overlay::new(fixture.template);
        let flow = ol.flows.insert(Flow::new("f0", 2.0));
        let src = ol.insert_instance(Instance::new_source(fixture.source, node(0), vec![flow]));
        let vnf = ol.insert_instance(Instance::new(fixture.vnf, node(1)));
        let edge = ol.add_edge(
            0,
            Direction::Forward,
            src,
            vnf,
            vec![node(0), node(1)],
        );
        ol.map_flow(flow, edge, 2.0);
        (ol, src, vnf, flow, edge)
    }

    #[test]
    fn edge_bookkeeping_works() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (ol, src, vnf, flow, edge) = chain_overlay(&fixture);
        assert_eq!(ol.edge_dr(edge), 2.0);
        assert_eq!(ol.instance(src).edges_out().collect::<Vec<_>>(), vec![edge]);
        assert_eq!(ol.instance(vnf).edges_in().collect::<Vec<_>>(), vec![edge]);
        assert_eq!(ol.flow(flow).dr_on(edge), Some(2.0));
        assert_eq!(ol.instance_at(fixture.vnf, node(1)), Some(vnf));
        assert_eq!(ol.instance_at(fixture.vnf, node(0)), None);
        Ok(())
    }

    #[test]
    fn remove_edge_unmaps_flows() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (mut ol, src, vnf, flow, edge) = chain_overlay(&fixture);
        ol.remove_edge(edge);
        assert!(ol.flow(flow).dr_on(edge).is_none());
        assert_eq!(ol.instance(src).edges_out().count(), 0);
        assert_eq!(ol.instance(vnf).edges_in().count(), 0);
        Ok(())
    }

    #[test]
    fn remove_instance_drops_edges_and_waypoints() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (mut ol, src, vnf, flow, edge) = chain_overlay(&fixture);
        ol.out_flows(vnf, Direction::Forward, &fixture.set); // records the stateful waypoint
        assert!(ol.flow(flow).passed_stateful.contains_key(&fixture.vnf));
        ol.remove_instance(vnf);
        assert!(!ol.flow(flow).passed_stateful.contains_key(&fixture.vnf));
        assert!(!ol.edges.contains_key(edge));
        assert_eq!(ol.instance(src).edges_out().count(), 0);
        Ok(())
    }

    #[test]
    fn input_dr_sums_per_input() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (ol, _, vnf, _, _) = chain_overlay(&fixture);
        assert_eq!(ol.input_dr(vnf, &fixture.set), vec![2.0, 0.0]);
        Ok(())
    }

    #[test]
    fn out_flows_applies_rate_functions() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (mut ol, src, vnf, flow, _) = chain_overlay(&fixture);
        let src_out = ol.out_flows(src, Direction::Forward, &fixture.set);
        assert_eq!(src_out.len(), 1);
        assert_eq!(src_out[0][&flow], 2.0);

        let vnf_out = ol.out_flows(vnf, Direction::Forward, &fixture.set);
        assert_eq!(vnf_out.len(), 1);
        // The vnf forwards its input rate unchanged.
        assert_eq!(vnf_out[0][&flow], 2.0);

        // Backward out flows of the source are empty.
        assert!(ol.out_flows(src, Direction::Backward, &fixture.set).is_empty());
        Ok(())
    }

    #[test]
    fn used_tracks_direction() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (ol, src, vnf, _, _) = chain_overlay(&fixture);
        assert!(ol.used(src, Direction::Forward, &fixture.set));
        assert!(ol.used(src, Direction::Backward, &fixture.set)); // sources are always used
        assert!(ol.used(vnf, Direction::Forward, &fixture.set));
        assert!(!ol.used(vnf, Direction::Backward, &fixture.set));
        Ok(())
    }

    #[test]
    fn topological_order_lists_forward_then_backward() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (ol, src, vnf, _, _) = chain_overlay(&fixture);
        // Source, vnf (forward); the vnf is not used backward, and the source appears again for
        // the backward direction.
        assert_eq!(ol.topological_order(&fixture.set), vec![src, vnf, src]);
        Ok(())
    }

    #[test]
    fn reset_before_keeps_strict_prefix() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (mut ol, src, vnf, flow, edge) = chain_overlay(&fixture);
        ol.reset_before(vnf, &fixture.set);
        assert!(ol.instances.contains_key(src));
        assert!(!ol.instances.contains_key(vnf));
        assert!(!ol.edges.contains_key(edge));
        assert!(ol.flow(flow).dr.is_empty());
        Ok(())
    }

    #[test]
    fn clone_is_independent() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (ol, _, vnf, flow, edge) = chain_overlay(&fixture);
        let mut copy = ol.clone();
        copy.remove_instance(vnf);
        assert!(ol.edges.contains_key(edge));
        assert_eq!(ol.flow(flow).dr_on(edge), Some(2.0));
        assert!(!copy.edges.contains_key(edge));
        Ok(())
    }

    #[test]
    fn idle_consumption_can_be_skipped_per_component() -> anyhow::Result<()> {
        use crate::network::{Link, Node};
        use crate::template::{Arc, Component, ComponentKind, TemplateSet};

        let mut set = TemplateSet::new();
        let src = set.add_component(
            Component::builder()
                .name("src")
                .kind(ComponentKind::Source)
                .outputs(1)
                .cpu(vec![0.0])
                .mem(vec![0.0])
                .build(),
        )?;
        let worker = set.add_component(
            Component::builder()
                .name("worker")
                .kind(ComponentKind::Normal)
                .inputs(1)
                .outputs(1)
                .cpu(vec![1.0, 0.5])
                .mem(vec![1.0, 0.25])
                .dr_fwd(vec![vec![1.0, 0.0]])
                .build(),
        )?;
        let template = set.add_template(
            "line",
            vec![src, worker],
            vec![Arc::new(Direction::Forward, src, 0, worker, 0, 10.0)],
        )?;
        let network = Network::new(
            &[Node::new(node(0), 10.0, 10.0), Node::new(node(1), 10.0, 10.0)],
            &[Link::new(node(0), node(1), 10.0, 1.0)],
        )?;

        let mut ol = Overlay::new(template);
        let flow = ol.flows.insert(Flow::new("f0", 2.0));
        let a = ol.insert_instance(Instance::new_source(src, node(0), vec![flow]));
        let b = ol.insert_instance(Instance::new(worker, node(0)));
        let edge = ol.add_edge(0, Direction::Forward, a, b, vec![node(0), node(0)]);
        ol.map_flow(flow, edge, 2.0);
        let mut overlays = Overlays::new();
        overlays.insert(template, ol);

        // With the idle share: 1 * 2 + 0.5; without it, only the rate-driven part remains.
        let (cpu, mem) = overlays.consumed_node_resources(&network, &set, None);
        assert_eq!(cpu[0], 2.5);
        assert_eq!(mem[0], 2.25);
        let (cpu, mem) = overlays.consumed_node_resources(&network, &set, Some(worker));
        assert_eq!(cpu[0], 2.0);
        assert_eq!(mem[0], 2.0);
        Ok(())
    }

    #[test]
    fn placements_deduplicate_across_overlays() -> anyhow::Result<()> {
        let fixture = testing::chain_template()?;
        let (ol, ..) = chain_overlay(&fixture);
        let mut overlays = Overlays::new();
        overlays.insert(fixture.template, ol.clone());
        let placements = overlays.placements();
        assert_eq!(placements.len(), 2);
        assert!(placements.contains(&(fixture.source, node(0))));
        assert!(placements.contains(&(fixture.vnf, node(1))));
        Ok(())
    }
}
