//! This module defines embedding requests ([`Spec`]), which consist of a substrate network, a
//! template set, flow sources, and optionally pinned instances and a previous embedding to
//! prefer. A request is validated before any embedding work happens; all fail-fast input errors
//! surface here.

use rustc_hash::FxHashSet;

use crate::network::{Network, NodeId};
use crate::overlay::Overlays;
use crate::template::{adapter, ComponentId, TemplateError, TemplateSet};

/// A flow injected at a source, identified by a request-unique ID.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SourceFlow {
    /// The flow's ID.
    pub id: String,
    /// The data rate the flow enters the network with.
    pub dr: f64,
}

impl SourceFlow {
    /// Creates a new source flow.
    pub fn new(id: impl Into<String>, dr: f64) -> Self {
        Self { id: id.into(), dr }
    }
}

/// A traffic source: a source component at a node, emitting a set of flows.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// The node the flows enter at.
    pub node: NodeId,
    /// Name of the emitting source component.
    pub component: String,
    /// The emitted flows.
    pub flows: Vec<SourceFlow>,
}

impl SourceSpec {
    /// Creates a new source.
    pub fn new(node: NodeId, component: impl Into<String>, flows: Vec<SourceFlow>) -> Self {
        Self {
            node,
            component: component.into(),
            flows,
        }
    }
}

/// An instance pinned to a node, e.g. a legacy network function that cannot be moved.
#[derive(Debug, Clone)]
pub struct FixedSpec {
    /// The node the instance is pinned to.
    pub node: NodeId,
    /// Name of the pinned component.
    pub component: String,
}

impl FixedSpec {
    /// Creates a new pinned instance.
    pub fn new(node: NodeId, component: impl Into<String>) -> Self {
        Self {
            node,
            component: component.into(),
        }
    }
}

/// An embedding request.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct Spec {
    /// The substrate network.
    pub network: Network,
    /// The templates to embed.
    pub templates: TemplateSet,
    /// The traffic sources.
    pub sources: Vec<SourceSpec>,
    /// Instances pinned to specific nodes.
    #[builder(default)]
    pub fixed: Vec<FixedSpec>,
    /// A previous embedding to prefer, produced by an earlier solve over the same template set.
    #[builder(default)]
    pub previous: Overlays,
}

impl Spec {
    /// Validates the request, adapting shared components for reuse on the way.
    ///
    /// Correctness properties:
    ///
    /// - Every source and pinned instance must reference a declared component and node.
    /// - Sources must reference source components; pinned instances must not.
    /// - At most one source per (component, node) pair.
    /// - Flow IDs must be unique across the request.
    pub(crate) fn validate(self) -> Result<ValidSpec, SpecError> {
        let Spec {
            network,
            mut templates,
            sources,
            fixed,
            previous,
        } = self;

        let demoted = templates.demote_nonbidirectional();
        adapter::adapt_for_reuse(&mut templates)?;

        let resolve = |name: &str| {
            templates
                .component_id(name)
                .ok_or_else(|| SpecError::UnknownComponent {
                    name: name.to_owned(),
                })
        };
        let check_node = |node: NodeId| {
            if network.contains(node) {
                Ok(node)
            } else {
                Err(SpecError::UnknownNode { node })
            }
        };

        let mut seen_sources = FxHashSet::default();
        let mut seen_flows = FxHashSet::default();
        let mut resolved_sources = Vec::with_capacity(sources.len());
        for src in sources {
            let component = resolve(&src.component)?;
            if !templates.component(component).is_source() {
                return Err(SpecError::NotASource {
                    name: src.component,
                });
            }
            let node = check_node(src.node)?;
            // CORRECTNESS: At most one source per (component, node) pair.
            if !seen_sources.insert((component, node)) {
                return Err(SpecError::DuplicateSource {
                    name: src.component,
                    node,
                });
            }
            for flow in &src.flows {
                if !seen_flows.insert(flow.id.clone()) {
                    return Err(SpecError::DuplicateFlow {
                        id: flow.id.clone(),
                    });
                }
                if flow.dr < 0.0 {
                    return Err(SpecError::NegativeFlowRate {
                        id: flow.id.clone(),
                    });
                }
            }
            resolved_sources.push(Source {
                component,
                node,
                flows: src.flows,
            });
        }

        let mut resolved_fixed = Vec::with_capacity(fixed.len());
        for fix in fixed {
            let component = resolve(&fix.component)?;
            if templates.component(component).is_source() {
                return Err(SpecError::SourceFixed {
                    name: fix.component,
                });
            }
            let node = check_node(fix.node)?;
            resolved_fixed.push(FixedInstance { component, node });
        }

        Ok(ValidSpec {
            network,
            templates,
            sources: resolved_sources,
            fixed: resolved_fixed,
            previous,
            demoted,
        })
    }
}

/// A validated request: components resolved, template set adapted for reuse.
#[derive(Debug)]
pub(crate) struct ValidSpec {
    pub(crate) network: Network,
    pub(crate) templates: TemplateSet,
    pub(crate) sources: Vec<Source>,
    pub(crate) fixed: Vec<FixedInstance>,
    pub(crate) previous: Overlays,
    pub(crate) demoted: Vec<ComponentId>,
}

/// A resolved traffic source.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    pub(crate) component: ComponentId,
    pub(crate) node: NodeId,
    pub(crate) flows: Vec<SourceFlow>,
}

impl Source {
    /// The summed rate of all flows leaving this source.
    pub(crate) fn total_flow_dr(&self) -> f64 {
        self.flows.iter().map(|f| f.dr).sum()
    }
}

/// A resolved pinned instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedInstance {
    pub(crate) component: ComponentId,
    pub(crate) node: NodeId,
}

/// Request validation error.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// The template set is invalid.
    #[error("invalid template set")]
    Template(#[from] TemplateError),

    /// A source or pinned instance references an unknown component.
    #[error("component {name} is not declared by any template")]
    UnknownComponent {
        /// The component's name.
        name: String,
    },

    /// A source or pinned instance references an unknown node.
    #[error("node {node} is not part of the network")]
    UnknownNode {
        /// The node ID.
        node: NodeId,
    },

    /// A source references a component that is not a source component.
    #[error("component {name} is not a source component")]
    NotASource {
        /// The component's name.
        name: String,
    },

    /// A source component cannot be pinned.
    #[error("source component {name} cannot be pinned to a node")]
    SourceFixed {
        /// The component's name.
        name: String,
    },

    /// Two sources share a component and node.
    #[error("duplicate source of {name} at node {node}")]
    DuplicateSource {
        /// The component's name.
        name: String,
        /// The node.
        node: NodeId,
    },

    /// Two flows share an ID.
    #[error("duplicate flow ID {id}")]
    DuplicateFlow {
        /// The flow ID.
        id: String,
    },

    /// A flow has a negative data rate.
    #[error("flow {id} has a negative data rate")]
    NegativeFlowRate {
        /// The flow ID.
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::testing;

    fn spec() -> Spec {
        let (nodes, links) = testing::two_node_config();
        let network = Network::new(&nodes, &links).unwrap();
        let fixture = testing::chain_template().unwrap();
        Spec::builder()
            .network(network)
            .templates(fixture.set)
            .sources(vec![SourceSpec::new(
                NodeId::new(0),
                "src",
                vec![SourceFlow::new("f0", 1.0)],
            )])
            .build()
    }

    #[test]
    fn valid_spec_succeeds() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn unknown_component_fails() {
        let mut spec = spec();
        spec.sources[0].component = "nope".to_owned();
        assert!(matches!(
            spec.validate(),
            Err(SpecError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn unknown_node_fails() {
        let mut spec = spec();
        spec.sources[0].node = NodeId::new(7);
        assert!(matches!(spec.validate(), Err(SpecError::UnknownNode { .. })));
    }

    #[test]
    fn non_source_component_as_source_fails() {
        let mut spec = spec();
        spec.sources[0].component = "vnf".to_owned();
        assert!(matches!(spec.validate(), Err(SpecError::NotASource { .. })));
    }

    #[test]
    fn duplicate_source_fails() {
        let mut spec = spec();
        let dup = SourceSpec::new(NodeId::new(0), "src", vec![SourceFlow::new("f1", 1.0)]);
        spec.sources.push(dup);
        assert!(matches!(
            spec.validate(),
            Err(SpecError::DuplicateSource { .. })
        ));
    }

    #[test]
    fn duplicate_flow_id_fails() {
        let mut spec = spec();
        let other = SourceSpec::new(NodeId::new(1), "src", vec![SourceFlow::new("f0", 1.0)]);
        spec.sources.push(other);
        assert!(matches!(
            spec.validate(),
            Err(SpecError::DuplicateFlow { .. })
        ));
    }

    #[test]
    fn fixed_source_fails() {
        let mut spec = spec();
        spec.fixed.push(FixedSpec::new(NodeId::new(1), "src"));
        assert!(matches!(spec.validate(), Err(SpecError::SourceFixed { .. })));
    }
}
