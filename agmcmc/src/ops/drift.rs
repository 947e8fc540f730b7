use rand::rngs::StdRng;
use rand::Rng;

use agcore::model::spatial;
use agcore::model::state::ModelState;

use crate::ops::{ProposalContext, ProposalOperator};

/// Joint rescaling of the drift rate and everything it multiplies.
///
/// Draws a scale s log-uniformly from `[scale_factor, 1/scale_factor]` and
/// applies drift x s, first mean coordinate x s, mu_mean x s and
/// mu_precision / s^2, so the whole drift axis rescales by consistent powers
/// of s and the precision keeps matching the rescaled means. The Jacobian of
/// the scale move gives a log-Hastings ratio of `-ln s`.
pub struct DriftCoscalingOperator {
    /// Lower bound of the scale range, in (0, 1).
    pub scale_factor: f64,
}

impl DriftCoscalingOperator {
    pub fn new(scale_factor: f64) -> Self {
        assert!(
            scale_factor > 0.0 && scale_factor < 1.0,
            "scale factor must lie in (0, 1)"
        );
        DriftCoscalingOperator { scale_factor }
    }
}

impl ProposalOperator for DriftCoscalingOperator {
    fn name(&self) -> &'static str {
        "drift_coscaling"
    }

    fn propose(
        &mut self,
        context: &ProposalContext,
        state: &mut ModelState,
        rng: &mut StdRng,
    ) -> f64 {
        let span = -self.scale_factor.ln();
        let scale = rng.gen_range(-span..span).exp();

        state.drift_rate *= scale;
        for mean in state.cluster_means.iter_mut() {
            mean[0] *= scale;
        }
        state.mu_mean *= scale;
        state.mu_precision /= scale * scale;

        spatial::refresh_locations(state, context.table, context.tree, &context.taxon_nodes);
        state.assert_consistent();
        -scale.ln()
    }
}
