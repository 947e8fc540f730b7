pub mod drift;
pub mod gibbs;
pub mod mean_label;
pub mod sequential;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;

use agcore::data::measurement::MeasurementTable;
use agcore::data::tree::FixedTree;
use agcore::model::prior::ClusterPrior;
use agcore::model::state::ModelState;

/// Immutable inputs shared by every proposal operator: the assay table, the
/// fixed tree, the taxon index built once per tree, and the structural prior.
pub struct ProposalContext<'a> {
    pub table: &'a MeasurementTable,
    pub tree: &'a FixedTree,
    pub taxon_nodes: Vec<usize>,
    pub prior: ClusterPrior,
}

impl<'a> ProposalContext<'a> {
    pub fn new(table: &'a MeasurementTable, tree: &'a FixedTree, prior: ClusterPrior) -> Self {
        let names = table.virus_names();
        let taxon_nodes = tree.taxon_node_index(&names);
        ProposalContext {
            table,
            tree,
            taxon_nodes,
            prior,
        }
    }

    /// Joint log target (data likelihood plus structural prior) of a state
    /// whose locations are already refreshed.
    pub fn log_target(&self, state: &ModelState) -> f64 {
        agcore::model::likelihood::full_log_likelihood(self.table, state)
            + self.prior.log_prior_for_state(state)
    }
}

/// Draws an index from a normalized candidate distribution.
///
/// Distinguishes the two ways the distribution can be unusable: a non-finite
/// weight is a numerical defect upstream, while an all-zero distribution
/// means every candidate node was occupied, which valid configurations rule
/// out by construction. Both are fatal state errors, not sampling events.
pub(crate) fn sample_categorical(probabilities: &[f64], rng: &mut StdRng) -> usize {
    assert!(
        probabilities.iter().all(|p| p.is_finite()),
        "non-finite weight in candidate distribution"
    );
    assert!(
        probabilities.iter().any(|p| *p > 0.0),
        "scan found no valid candidate node"
    );
    let distribution =
        WeightedIndex::new(probabilities).expect("candidate distribution must be sampleable");
    distribution.sample(rng)
}

/// One MCMC proposal move. `propose` mutates the state in place and returns
/// the log-Hastings ratio; the chain driver accepts or rejects using that
/// ratio plus the data and prior log-likelihoods, reverting the state (and
/// the likelihood cache) on rejection.
pub trait ProposalOperator {
    fn name(&self) -> &'static str;

    fn propose(&mut self, context: &ProposalContext, state: &mut ModelState, rng: &mut StdRng)
        -> f64;
}
