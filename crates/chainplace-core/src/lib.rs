#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

//! The core chainplace library: joint scaling, placement, and routing of bidirectional network
//! service chains on a capacitated substrate network.
//!
//! A request ([`Spec`]) pairs a substrate [`Network`] with a [`TemplateSet`] of service
//! templates, traffic sources, and optionally pinned instances and a previous embedding. The
//! [`solve`] routine adapts shared components for reuse, builds an initial embedding by walking
//! each template in topological order, and then improves it with a tabu-guided search. The
//! result is one [overlay](Overlays) per template plus [metrics](Metrics) describing consumed
//! resources and the objective breakdown.

#[macro_use]
mod ident;

mod heuristic;
mod improve;
mod metrics;
mod network;
mod objective;
mod opts;
mod overlay;
mod paths;
mod run;
mod spec;
mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use metrics::{EdgeDelay, FlowRate, LinkUse, Metrics, NodeUse, Placement};
pub use network::{Link, Network, NetworkError, Node, NodeId};
pub use objective::Objective;
pub use opts::SolveOpts;
pub use overlay::{Edge, EdgeKey, Flow, FlowKey, Instance, InstanceKey, Overlay, Overlays};
pub use paths::{path_delay, AllPairsPaths, ShortestPath};
pub use run::{solve, Error, Solution, VirtualLink};
pub use spec::{FixedSpec, SourceFlow, SourceSpec, Spec, SpecError};
pub use template::{
    Arc, Component, ComponentId, ComponentKind, Direction, Template, TemplateError, TemplateId,
    TemplateSet,
};
