use rand::rngs::StdRng;

use agcore::algorithm::stats::normalize_log_weights;
use agcore::model::likelihood::full_log_likelihood;
use agcore::model::partition::{compute_membership_ordered, labels_for_viruses, relabel_by_history};
use agcore::model::spatial;
use agcore::model::state::ModelState;

use crate::ops::{sample_categorical, ProposalContext, ProposalOperator};

/// Rebuilds the complete breakpoint set position by position.
///
/// At step m, with m-1 breakpoints already fixed, the full conditional over
/// all unused non-root nodes is computed exactly as in the Gibbs relocation
/// move and the m-th breakpoint is sampled from it. Labels always follow cut
/// order, so the retained state is exactly what a later slot-order membership
/// recomputation yields; history continuity is kept on the mean parameters
/// instead, by realigning mean vectors so every surviving cluster keeps the
/// mean it addressed under the previous labeling. Each candidate is scored
/// after that same realignment, so the evaluated likelihood is the one the
/// retained state would have. Used to initialize or fully resample the
/// cluster structure.
pub struct SequentialBreakpointConstructor {
    /// Number of breakpoints to place; must not exceed the slot capacity.
    pub target_k: usize,
}

impl SequentialBreakpointConstructor {
    pub fn new(target_k: usize) -> Self {
        SequentialBreakpointConstructor { target_k }
    }

    /// Log conditional weight of extending `cut_nodes` with each tree node,
    /// evaluated with means realigned against `previous_labels`.
    fn step_log_weights(
        context: &ProposalContext,
        state: &ModelState,
        cut_nodes: &[usize],
        previous_labels: &[usize],
    ) -> Vec<f64> {
        let mut weights = vec![f64::NEG_INFINITY; context.tree.node_count()];
        for node in 0..context.tree.node_count() {
            if context.tree.is_root(node) || cut_nodes.contains(&node) {
                continue;
            }
            let mut extended = cut_nodes.to_vec();
            extended.push(node);

            let mut scratch = state.clone();
            apply_cut_step(context, &mut scratch, &extended, previous_labels);
            weights[node] = full_log_likelihood(context.table, &scratch)
                + context.prior.log_prior_for_state(&scratch);
        }
        weights
    }
}

/// Folds labels that overflowed the mean-slot capacity back onto unused
/// slots. History-preserving relabeling can mint labels above the old
/// maximum; the number of distinct labels never exceeds the capacity, so a
/// free slot always exists.
fn compact_labels(labels: &mut [usize], capacity: usize) {
    let mut used = vec![false; capacity];
    for label in labels.iter() {
        if *label < capacity {
            used[*label] = true;
        }
    }
    let mut remapped: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
    for label in labels.iter_mut() {
        if *label >= capacity {
            let target = *remapped.entry(*label).or_insert_with(|| {
                let free = used
                    .iter()
                    .position(|in_use| !in_use)
                    .expect("distinct labels exceed mean-slot capacity");
                used[free] = true;
                free
            });
            *label = target;
        }
    }
}

/// Permutes the mean vectors so each cluster under the fresh cut-order
/// labeling keeps the mean it addressed under `previous_labels`.
///
/// The fresh label of every virus is matched to its history-preserving
/// counterpart; mean slots claimed by no surviving cluster are handed to the
/// fresh labels left without a source.
fn realign_means(state: &mut ModelState, previous_labels: &[usize], fresh_labels: &[usize]) {
    let capacity = state.cluster_count();
    let mut stable = fresh_labels.to_vec();
    relabel_by_history(&mut stable, previous_labels);
    compact_labels(&mut stable, capacity);

    let mut source_of: Vec<Option<usize>> = vec![None; capacity];
    let mut taken = vec![false; capacity];
    for (fresh, slot) in fresh_labels.iter().zip(stable.iter()) {
        source_of[*fresh] = Some(*slot);
        taken[*slot] = true;
    }

    let old_means = state.cluster_means.clone();
    for fresh in 0..capacity {
        let source = match source_of[fresh] {
            Some(slot) => slot,
            None if !taken[fresh] => {
                taken[fresh] = true;
                fresh
            }
            None => {
                let free = taken
                    .iter()
                    .position(|t| !t)
                    .expect("mean slots exhausted during realignment");
                taken[free] = true;
                free
            }
        };
        state.cluster_means[fresh] = old_means[source].clone();
    }
}

/// Writes an explicit cut-node list into the state's breakpoint slots and
/// refreshes everything derived from them. Labels stay in cut order.
fn write_cut_nodes(context: &ProposalContext, state: &mut ModelState, cut_nodes: &[usize]) {
    for (slot, breakpoint) in state.breakpoints.iter_mut().enumerate() {
        match cut_nodes.get(slot) {
            Some(node) => {
                breakpoint.active = true;
                breakpoint.node = *node;
            }
            None => breakpoint.active = false,
        }
    }
    state.k = cut_nodes.len();
    state.membership = compute_membership_ordered(context.tree, cut_nodes);
    state.virus_labels = labels_for_viruses(&state.membership, &context.taxon_nodes);
    spatial::refresh_locations(state, context.table, context.tree, &context.taxon_nodes);
}

/// One construction step: write the cuts, realign the means against the
/// previous labeling and refresh the dependent locations.
fn apply_cut_step(
    context: &ProposalContext,
    state: &mut ModelState,
    cut_nodes: &[usize],
    previous_labels: &[usize],
) {
    write_cut_nodes(context, state, cut_nodes);
    let fresh = state.virus_labels.clone();
    realign_means(state, previous_labels, &fresh);
    spatial::refresh_locations(state, context.table, context.tree, &context.taxon_nodes);
}

impl ProposalOperator for SequentialBreakpointConstructor {
    fn name(&self) -> &'static str {
        "sequential_breakpoint_constructor"
    }

    fn propose(
        &mut self,
        context: &ProposalContext,
        state: &mut ModelState,
        rng: &mut StdRng,
    ) -> f64 {
        assert!(
            self.target_k <= state.bin_size,
            "cannot place {} breakpoints in {} slots",
            self.target_k,
            state.bin_size
        );

        // History reference for the first step is the labeling the proposal
        // started from, not the collapsed one.
        let mut previous_labels = state.virus_labels.clone();
        let mut cut_nodes: Vec<usize> = Vec::with_capacity(self.target_k);
        write_cut_nodes(context, state, &cut_nodes);

        for _ in 0..self.target_k {
            let weights = Self::step_log_weights(context, state, &cut_nodes, &previous_labels);
            let probabilities = normalize_log_weights(&weights);
            cut_nodes.push(sample_categorical(&probabilities, rng));

            apply_cut_step(context, state, &cut_nodes, &previous_labels);
            previous_labels = state.virus_labels.clone();
        }

        state.assert_consistent();
        0.0
    }
}
