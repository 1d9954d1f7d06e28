//! This module defines the [`SolveOpts`] configuration which controls the objective, the seeded
//! randomness, and the improvement loop's stopping and acceptance behavior.

use crate::objective::Objective;

/// Solver options.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct SolveOpts {
    /// The optimization criterion.
    #[builder(default)]
    pub objective: Objective,
    /// Seed for all randomness of the run. The same spec and seed reproduce the same solution.
    #[builder(default = 0)]
    pub seed: u64,
    /// The improvement loop stops after this many outer iterations without a new best solution.
    #[builder(default = 20)]
    pub max_unsuccessful: usize,
    /// A modified solution no worse than this factor times the incumbent may still be accepted.
    #[builder(default = 1.1)]
    pub slight_worsening_threshold: f64,
    /// Probability of accepting such a slightly worse solution.
    #[builder(default = 0.5)]
    pub slight_worsening_probability: f64,
}

impl Default for SolveOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}
