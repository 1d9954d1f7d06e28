//! This module defines the [`solve`] routine, the crate's main entry point.

use std::cmp::Reverse;
use std::time::Instant;

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::heuristic::{self, Tabu};
use crate::improve;
use crate::metrics::{self, Metrics};
use crate::network::NodeId;
use crate::objective::objective_value;
use crate::opts::SolveOpts;
use crate::overlay::Overlays;
use crate::spec::{Spec, SpecError};
use crate::template::{ComponentId, TemplateId, TemplateSet};

/// The embedding produced for a request, together with the template set it refers to and the
/// run's metrics.
///
/// Feeding `overlays` and `templates` back into the next request's [`Spec`] warm-starts the
/// solver on the previous solution.
#[derive(Debug)]
pub struct Solution {
    /// The template set the overlays refer to, adapted for component reuse.
    pub templates: TemplateSet,
    /// The produced overlays, one per template that carries flows.
    pub overlays: Overlays,
    /// The run's metrics.
    pub metrics: Metrics,
}

/// A routed overlay edge in writer-friendly form.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VirtualLink {
    /// Index of the originating arc in the template's arc list.
    pub arc: usize,
    /// Location of the edge's source instance.
    pub source: NodeId,
    /// Location of the edge's destination instance.
    pub dest: NodeId,
    /// The substrate path the edge is routed over.
    pub path: Vec<NodeId>,
}

impl Solution {
    /// The placed instances of one overlay as (component name, node) pairs, or an empty list if
    /// the template carries no flows.
    pub fn vnfs(&self, template: TemplateId) -> Vec<crate::metrics::Placement> {
        let Some(overlay) = self.overlays.get(template) else {
            return Vec::new();
        };
        let mut vnfs = overlay
            .instances()
            .map(|(_, i)| crate::metrics::Placement {
                component: self.templates.component(i.component()).name.clone(),
                node: i.location(),
            })
            .collect::<Vec<_>>();
        vnfs.sort();
        vnfs
    }

    /// The routed edges of one overlay, one entry per assigned path.
    pub fn vlinks(&self, template: TemplateId) -> Vec<VirtualLink> {
        let Some(overlay) = self.overlays.get(template) else {
            return Vec::new();
        };
        let mut vlinks = overlay
            .edges()
            .flat_map(|(_, e)| {
                let source = overlay.instance(e.source()).location();
                let dest = overlay.instance(e.dest()).location();
                e.paths().iter().map(move |path| VirtualLink {
                    arc: e.arc(),
                    source,
                    dest,
                    path: path.clone(),
                })
            })
            .collect::<Vec<_>>();
        vlinks.sort_by_key(|l| (l.arc, l.source, l.dest));
        vlinks
    }
}

/// Embeds a request into its substrate network.
///
/// The request is validated first; shared components are adapted for reuse, shortest paths are
/// precomputed, and the templates are embedded heaviest-first before the improvement loop
/// perturbs the solution. Networks with a single node skip the improvement loop, since there is
/// nothing to move.
///
/// Determinism: the same spec and options produce the same overlays and objective value.
pub fn solve(spec: Spec, opts: SolveOpts) -> Result<Solution, Error> {
    let valid = spec.validate()?;
    let network = valid.network;
    let set = valid.templates;
    let previous_placements = valid.previous.placements();

    let init_start = Instant::now();
    let paths = crate::paths::AllPairsPaths::new(&network);
    let init_time = init_start.elapsed();
    info!(?init_time, "precomputed all-pairs shortest paths");

    let start = Instant::now();

    // Embed the heaviest templates first, weighing each by the total rate its source emits.
    let mut src_drs: FxHashMap<ComponentId, f64> = FxHashMap::default();
    for src in &valid.sources {
        *src_drs.entry(src.component).or_insert(0.0) += src.total_flow_dr();
    }
    let mut order = set.template_ids().collect::<Vec<_>>();
    order.sort_by_key(|&t| {
        let src_dr = src_drs
            .get(&set.template(t).source())
            .copied()
            .unwrap_or(0.0);
        Reverse(OrderedFloat(set.template_weight(t, src_dr)))
    });

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let tabu = Tabu::default();
    let mut overlays = heuristic::build(
        &network,
        &set,
        &order,
        valid.previous,
        &valid.sources,
        &valid.fixed,
        &paths,
        &tabu,
        &mut rng,
    );
    info!(
        obj_value = objective_value(&network, &set, &overlays, &previous_placements, opts.objective),
        "initial solution"
    );

    if network.nr_nodes() > 1 {
        overlays = improve::improve(
            &network,
            &set,
            &order,
            overlays,
            &valid.sources,
            &valid.fixed,
            &paths,
            &previous_placements,
            &opts,
            &mut rng,
        );
    } else {
        info!("skipping improvement for a single-node network");
    }

    let obj_value =
        objective_value(&network, &set, &overlays, &previous_placements, opts.objective);
    let runtime = start.elapsed();
    info!(obj_value, ?runtime, "solved");

    let metrics = metrics::compute(
        &network,
        &set,
        &overlays,
        &previous_placements,
        opts.objective,
        obj_value,
        opts.seed,
        init_time,
        runtime,
        &valid.demoted,
    );

    Ok(Solution {
        templates: set,
        overlays,
        metrics,
    })
}

/// The error type for the [solve] routine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid request.
    #[error("invalid request")]
    InvalidSpec(#[from] SpecError),
}
