//! The improvement loop: tabu-guided perturbation with mild simulated annealing.
//!
//! Each outer iteration perturbs the incumbent solution once per template: a random non-source,
//! non-fixed instance becomes tabu, the overlay is reset to the prefix before it, and the
//! builder reruns with that placement excluded. Strictly better solutions replace the incumbent
//! (and possibly the best solution); slightly worse ones are accepted with a coin flip, which
//! lets the search leave shallow local minima.

use std::collections::BTreeSet;

use rand::prelude::*;
use rand::rngs::StdRng;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::heuristic::{self, Tabu};
use crate::network::{Network, NodeId};
use crate::objective::objective_value;
use crate::overlay::Overlays;
use crate::opts::SolveOpts;
use crate::paths::AllPairsPaths;
use crate::spec::{FixedInstance, Source};
use crate::template::{ComponentId, TemplateId, TemplateSet};

/// Iteratively improves the given overlays and returns the best solution found.
#[allow(clippy::too_many_arguments)]
pub(crate) fn improve(
    network: &Network,
    set: &TemplateSet,
    order: &[TemplateId],
    overlays: Overlays,
    sources: &[Source],
    fixed: &[FixedInstance],
    paths: &AllPairsPaths,
    previous: &BTreeSet<(ComponentId, NodeId)>,
    opts: &SolveOpts,
    rng: &mut StdRng,
) -> Overlays {
    let value = |overlays: &Overlays| {
        objective_value(network, set, overlays, previous, opts.objective)
    };

    let mut best = overlays.clone();
    let mut incumbent = overlays;

    let mut total_iterations = 0_usize;
    let mut unsuccessful = 0_usize;
    while unsuccessful < opts.max_unsuccessful {
        total_iterations += 1;
        unsuccessful += 1;

        // Each outer iteration starts over from the incumbent; a rejected modification is only
        // carried along for the remaining templates of the same iteration.
        let mut modified = incumbent.clone();

        for &t in order {
            // The overlay may have been dropped for lack of a source.
            let Some(ol) = modified.get(t) else {
                continue;
            };

            let movable = ol
                .instances()
                .filter(|(_, i)| !set.component(i.component()).is_source() && !i.is_fixed())
                .map(|(k, _)| k)
                .collect::<Vec<_>>();
            let Some(&target) = movable.choose(&mut *rng) else {
                info!(
                    template = %set.template(t).name(),
                    "skipping modification; all instances are sources or pinned"
                );
                continue;
            };

            let instance = ol.instance(target);
            let tabu: Tabu = [(instance.component(), instance.location())]
                .into_iter()
                .collect::<FxHashSet<_>>();
            info!(
                iteration = total_iterations,
                template = %set.template(t).name(),
                "rebuilding overlay around a tabu instance"
            );

            if let Some(ol) = modified.get_mut(t) {
                ol.reset_before(target, set);
            }
            modified = heuristic::build(
                network, set, order, modified, sources, fixed, paths, &tabu, rng,
            );

            let new_value = value(&modified);
            let incumbent_value = value(&incumbent);
            debug!(new_value, incumbent_value, "evaluated modified overlays");
            if new_value < incumbent_value {
                info!("improved objective value; new incumbent solution");
                incumbent = modified.clone();
                if new_value < value(&best) {
                    info!("new best solution");
                    best = modified.clone();
                    unsuccessful = 0;
                }
            } else if new_value <= opts.slight_worsening_threshold * incumbent_value
                && rng.gen_bool(opts.slight_worsening_probability)
            {
                info!("only slightly worse objective value; new incumbent solution");
                incumbent = modified.clone();
            }
            // Otherwise the modification is discarded when the next outer iteration resets to
            // the incumbent.
        }
    }

    info!(total_iterations, "improvement finished");
    best
}
