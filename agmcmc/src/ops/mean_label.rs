use rand::rngs::StdRng;
use rand::Rng;

use agcore::model::spatial;
use agcore::model::state::ModelState;

use crate::ops::{ProposalContext, ProposalOperator};

/// Cluster life-cycle side effect of a label reassignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelEvent {
    /// No cluster changed occupancy.
    None,
    /// The target cluster went from empty to occupied; its mean was redrawn.
    Birth(usize),
    /// The source cluster lost its last member; its mean was redrawn.
    Death(usize),
    /// The move emptied the source and populated the target in one step.
    BirthAndDeath { born: usize, died: usize },
}

/// Random-walk move over cluster means and virus labels.
///
/// With probability 0.5 perturbs one coordinate of one cluster mean by a
/// symmetric uniform increment; otherwise reassigns one virus to a random
/// cluster label, redrawing the mean of any cluster whose occupancy crosses
/// zero in either direction. Both branches are symmetric, so the log-Hastings
/// ratio is 0. Locations and drift offsets are refreshed before returning.
pub struct MeanAndLabelMetropolis {
    pub window: f64,
    /// Occupancy transition of the most recent label move.
    pub last_event: LabelEvent,
}

impl MeanAndLabelMetropolis {
    pub fn new(window: f64) -> Self {
        assert!(window > 0.0, "proposal window must be positive");
        MeanAndLabelMetropolis {
            window,
            last_event: LabelEvent::None,
        }
    }

    fn propose_mean(&self, state: &mut ModelState, rng: &mut StdRng) {
        let label = rng.gen_range(0..state.cluster_count());
        let dim = rng.gen_range(0..state.mds_dimension);
        state.cluster_means[label][dim] += rng.gen_range(-self.window..self.window);
    }

    fn propose_label(
        &mut self,
        context: &ProposalContext,
        state: &mut ModelState,
        rng: &mut StdRng,
    ) {
        let virus = rng.gen_range(0..state.virus_labels.len());
        let source = state.virus_labels[virus];
        let target = rng.gen_range(0..state.cluster_count());
        if target == source {
            self.last_event = LabelEvent::None;
            return;
        }

        let counts_before = state.member_counts();
        state.virus_labels[virus] = target;
        let counts_after = state.member_counts();

        let born = counts_before[target] == 0;
        let died = counts_after[source] == 0;
        if born {
            state.cluster_means[target] = context.prior.sample_mean(rng, state.mds_dimension);
        }
        if died {
            // Retire the emptied cluster; a fresh draw keeps the slot usable
            // for a later birth.
            state.cluster_means[source] = context.prior.sample_mean(rng, state.mds_dimension);
        }
        self.last_event = match (born, died) {
            (true, true) => LabelEvent::BirthAndDeath {
                born: target,
                died: source,
            },
            (true, false) => LabelEvent::Birth(target),
            (false, true) => LabelEvent::Death(source),
            (false, false) => LabelEvent::None,
        };
    }
}

impl ProposalOperator for MeanAndLabelMetropolis {
    fn name(&self) -> &'static str {
        "mean_and_label_metropolis"
    }

    fn propose(
        &mut self,
        context: &ProposalContext,
        state: &mut ModelState,
        rng: &mut StdRng,
    ) -> f64 {
        if rng.gen_bool(0.5) {
            self.last_event = LabelEvent::None;
            self.propose_mean(state, rng);
        } else {
            self.propose_label(context, state, rng);
        }
        spatial::refresh_locations(state, context.table, context.tree, &context.taxon_nodes);
        state.assert_consistent();
        0.0
    }
}
