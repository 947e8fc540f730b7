use itertools::Itertools;
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

use agcore::algorithm::stats::normalize_log_weights;
use agcore::model::likelihood::full_log_likelihood;
use agcore::model::partition::{compute_membership, labels_for_viruses};
use agcore::model::spatial;
use agcore::model::state::ModelState;

use crate::ops::{sample_categorical, ProposalContext, ProposalOperator};

/// Exact Gibbs relocation of one active breakpoint.
///
/// For every tree node the selected breakpoint could move to, the full
/// conditional is the joint log target of the state with the breakpoint
/// placed there; nodes occupied by a different active breakpoint (and the
/// root) get weight zero. The candidate scan is data-parallel: each worker
/// evaluates its node on a private scratch copy of the state, then a single
/// log-sum-exp reduction and categorical draw happen on the calling thread.
pub struct BreakpointGibbs;

impl BreakpointGibbs {
    /// Log conditional weight of placing the breakpoint in `slot` at each
    /// tree node. Invalid candidates carry negative infinity.
    pub fn candidate_log_weights(
        context: &ProposalContext,
        state: &ModelState,
        slot: usize,
    ) -> Vec<f64> {
        (0..context.tree.node_count())
            .into_par_iter()
            .map(|node| {
                if context.tree.is_root(node) || state.node_occupied_by_other(node, slot) {
                    return f64::NEG_INFINITY;
                }
                let mut scratch = state.clone();
                scratch.breakpoints[slot].active = true;
                scratch.breakpoints[slot].node = node;
                apply_breakpoints(context, &mut scratch);
                full_log_likelihood(context.table, &scratch)
                    + context.prior.log_prior_for_state(&scratch)
            })
            .collect()
    }

    /// Normalized categorical distribution over candidate nodes.
    pub fn candidate_distribution(
        context: &ProposalContext,
        state: &ModelState,
        slot: usize,
    ) -> Vec<f64> {
        normalize_log_weights(&Self::candidate_log_weights(context, state, slot))
    }
}

/// Recomputes membership, virus labels and locations after a breakpoint
/// write.
fn apply_breakpoints(context: &ProposalContext, state: &mut ModelState) {
    state.membership = compute_membership(context.tree, &state.breakpoints);
    state.virus_labels = labels_for_viruses(&state.membership, &context.taxon_nodes);
    spatial::refresh_locations(state, context.table, context.tree, &context.taxon_nodes);
}

impl ProposalOperator for BreakpointGibbs {
    fn name(&self) -> &'static str {
        "breakpoint_gibbs"
    }

    fn propose(
        &mut self,
        context: &ProposalContext,
        state: &mut ModelState,
        rng: &mut StdRng,
    ) -> f64 {
        state.assert_consistent();
        let active = state.breakpoints.iter().positions(|b| b.active).collect_vec();
        assert!(!active.is_empty(), "Gibbs relocation needs an active breakpoint");
        let slot = active[rng.gen_range(0..active.len())];

        let probabilities = Self::candidate_distribution(context, state, slot);
        let node = sample_categorical(&probabilities, rng);

        state.breakpoints[slot].node = node;
        apply_breakpoints(context, state);
        state.assert_consistent();
        // Exact Gibbs draw from the full conditional; the move already
        // carries its own normalization.
        0.0
    }
}
