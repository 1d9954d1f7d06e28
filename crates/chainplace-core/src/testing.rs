//! Utilities for writing tests.

use crate::network::{Link, Node, NodeId};
use crate::template::{
    Arc, Component, ComponentId, ComponentKind, Direction, TemplateError, TemplateId, TemplateSet,
};

/// Generate a configuration with two nodes (IDs 0 and 1, 10 CPU and 10 memory each) connected
/// by a full-duplex pair of links with 10 data rate and a delay of 1.
pub fn two_node_config() -> (Vec<Node>, Vec<Link>) {
    let n0 = Node::new(NodeId::new(0), 10.0, 10.0);
    let n1 = Node::new(NodeId::new(1), 10.0, 10.0);
    let l0 = Link::new(n0.id, n1.id, 10.0, 1.0);
    let l1 = Link::new(n1.id, n0.id, 10.0, 1.0);
    (vec![n0, n1], vec![l0, l1])
}

/// Generate a configuration with a single node (ID 0, 10 CPU and 10 memory) and no links.
pub fn single_node_config() -> (Vec<Node>, Vec<Link>) {
    (vec![Node::new(NodeId::new(0), 10.0, 10.0)], vec![])
}

/// A source component without backward inputs, emitting a single implicit output.
pub fn source_component(name: &str) -> Component {
    Component::builder()
        .name(name)
        .kind(ComponentKind::Source)
        .outputs(1)
        .cpu(vec![0.0])
        .mem(vec![0.0])
        .build()
}

/// A forward-only processing component: one input, one output, unit resource coefficients, and
/// a rate function passing traffic through unchanged.
pub fn forward_component(name: &str) -> Component {
    Component::builder()
        .name(name)
        .kind(ComponentKind::Normal)
        .inputs(1)
        .outputs(1)
        .cpu(vec![1.0, 0.0])
        .mem(vec![1.0, 0.0])
        .dr_fwd(vec![vec![1.0, 0.0]])
        .build()
}

/// A forward-only component merging two inputs into one output.
pub fn merge_component(name: &str) -> Component {
    Component::builder()
        .name(name)
        .kind(ComponentKind::Normal)
        .inputs(2)
        .outputs(1)
        .cpu(vec![1.0, 1.0, 0.0])
        .mem(vec![1.0, 1.0, 0.0])
        .dr_fwd(vec![vec![1.0, 1.0, 0.0]])
        .build()
}

/// An end component without backward outputs, terminating a forward-only chain.
pub fn end_component_forward_only(name: &str) -> Component {
    Component::builder()
        .name(name)
        .kind(ComponentKind::End)
        .inputs(1)
        .cpu(vec![1.0, 0.0])
        .mem(vec![1.0, 0.0])
        .build()
}

/// A bidirectional chain template and the set containing it.
#[derive(Debug, Clone)]
pub struct ChainFixture {
    /// The set owning the chain template.
    pub set: TemplateSet,
    /// The chain template.
    pub template: TemplateId,
    /// The source component.
    pub source: ComponentId,
    /// The stateful middle component.
    pub vnf: ComponentId,
    /// The end component.
    pub end: ComponentId,
}

/// Generate a bidirectional chain `src -> vnf -> end` with the backward path `end -> vnf ->
/// src`. The vnf is stateful, all arcs tolerate a delay of 5, every component consumes one unit
/// of CPU and memory per unit of ingoing forward rate, and all rate functions pass traffic
/// through unchanged.
pub fn chain_template() -> Result<ChainFixture, TemplateError> {
    let mut set = TemplateSet::new();
    let source = set.add_component(
        Component::builder()
            .name("src")
            .kind(ComponentKind::Source)
            .outputs(1)
            .inputs_bwd(1)
            .cpu(vec![1.0, 0.0])
            .mem(vec![1.0, 0.0])
            .build(),
    )?;
    let vnf = set.add_component(
        Component::builder()
            .name("vnf")
            .kind(ComponentKind::Normal)
            .stateful(true)
            .inputs(1)
            .inputs_bwd(1)
            .outputs(1)
            .outputs_bwd(1)
            .cpu(vec![1.0, 0.0, 0.0])
            .mem(vec![1.0, 0.0, 0.0])
            .dr_fwd(vec![vec![1.0, 0.0]])
            .dr_bwd(vec![vec![1.0, 0.0]])
            .build(),
    )?;
    let end = set.add_component(
        Component::builder()
            .name("end")
            .kind(ComponentKind::End)
            .inputs(1)
            .outputs_bwd(1)
            .cpu(vec![1.0, 0.0])
            .mem(vec![1.0, 0.0])
            .dr_bwd(vec![vec![1.0, 0.0]])
            .build(),
    )?;
    let template = set.add_template(
        "chain",
        vec![source, vnf, end],
        vec![
            Arc::new(Direction::Forward, source, 0, vnf, 0, 5.0),
            Arc::new(Direction::Forward, vnf, 0, end, 0, 5.0),
            Arc::new(Direction::Backward, end, 0, vnf, 0, 5.0),
            Arc::new(Direction::Backward, vnf, 0, source, 0, 5.0),
        ],
    )?;
    Ok(ChainFixture {
        set,
        template,
        source,
        vnf,
        end,
    })
}

/// Two forward-only templates sharing a middle component.
#[derive(Debug, Clone)]
pub struct SharedFixture {
    /// The set owning both templates.
    pub set: TemplateSet,
    /// The first template.
    pub first: TemplateId,
    /// The second template.
    pub second: TemplateId,
    /// The shared middle component.
    pub shared: ComponentId,
    /// The first template's source component.
    pub src1: ComponentId,
    /// The second template's source component.
    pub src2: ComponentId,
}

/// Generate two templates `src1 -> shared -> end1` and `src2 -> shared -> end2` sharing their
/// middle component, with all arcs tolerating a delay of 10.
pub fn shared_pair() -> Result<SharedFixture, TemplateError> {
    let mut set = TemplateSet::new();
    let src1 = set.add_component(source_component("src1"))?;
    let src2 = set.add_component(source_component("src2"))?;
    let shared = set.add_component(forward_component("shared"))?;
    let end1 = set.add_component(end_component_forward_only("end1"))?;
    let end2 = set.add_component(end_component_forward_only("end2"))?;
    let fwd = |s, so, d, di| Arc::new(Direction::Forward, s, so, d, di, 10.0);
    let first = set.add_template(
        "t1",
        vec![src1, shared, end1],
        vec![fwd(src1, 0, shared, 0), fwd(shared, 0, end1, 0)],
    )?;
    let second = set.add_template(
        "t2",
        vec![src2, shared, end2],
        vec![fwd(src2, 0, shared, 0), fwd(shared, 0, end2, 0)],
    )?;
    Ok(SharedFixture {
        set,
        first,
        second,
        shared,
        src1,
        src2,
    })
}
