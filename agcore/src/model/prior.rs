use rand::Rng;
use statrs::distribution::Normal;
use statrs::function::gamma::ln_gamma;

use crate::model::state::ModelState;

/// Prior over the cluster structure and the cluster mean coordinates.
///
/// Poisson(λ) on the cluster count K (unnormalized), a uniform-assignment
/// term `-N ln K` over the N viruses, and an independent zero-mean Gaussian
/// with fixed variance on every coordinate of each occupied cluster's mean.
/// Stateless; K stays small enough that caching buys nothing.
#[derive(Clone, Copy, Debug)]
pub struct ClusterPrior {
    pub lambda: f64,
    pub mean_variance: f64,
}

impl ClusterPrior {
    pub fn new(lambda: f64, mean_variance: f64) -> Self {
        assert!(lambda > 0.0, "cluster count rate must be positive");
        assert!(mean_variance > 0.0, "cluster mean variance must be positive");
        ClusterPrior { lambda, mean_variance }
    }

    /// Log prior density of a cluster configuration.
    ///
    /// Means of empty clusters carry no density; they are bookkeeping slots,
    /// not parameters of the current partition.
    pub fn log_prior(&self, k: usize, cluster_means: &[Vec<f64>], member_counts: &[usize]) -> f64 {
        let k_f = k as f64;
        let n: usize = member_counts.iter().sum();

        let mut log_prior = -self.lambda + k_f * self.lambda.ln() - ln_gamma(k_f + 1.0);
        log_prior -= n as f64 * k_f.ln();

        let half_log_norm = 0.5 * (2.0 * std::f64::consts::PI * self.mean_variance).ln();
        for (label, mean) in cluster_means.iter().enumerate() {
            if member_counts.get(label).copied().unwrap_or(0) == 0 {
                continue;
            }
            for &x in mean {
                log_prior += -half_log_norm - x * x / (2.0 * self.mean_variance);
            }
        }
        log_prior
    }

    /// Log prior of a model state; the cluster count is the active
    /// breakpoint count plus the implicit root cluster.
    pub fn log_prior_for_state(&self, state: &ModelState) -> f64 {
        self.log_prior(state.k + 1, &state.cluster_means, &state.member_counts())
    }

    /// Draws a fresh cluster mean from the prior, for cluster births.
    pub fn sample_mean<R: Rng + ?Sized>(&self, rng: &mut R, dimension: usize) -> Vec<f64> {
        let normal = Normal::new(0.0, self.mean_variance.sqrt())
            .expect("cluster mean prior has positive variance");
        (0..dimension).map(|_| rng.sample(normal)).collect()
    }
}
