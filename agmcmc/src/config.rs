use serde::{Deserialize, Serialize};

use agcore::model::prior::ClusterPrior;
use agcore::model::state::Placement;

/// Relative selection weight of each proposal operator in the chain cycle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorWeights {
    pub mean_and_label: f64,
    pub breakpoint_gibbs: f64,
    pub sequential_constructor: f64,
    pub drift_coscaling: f64,
}

impl Default for OperatorWeights {
    fn default() -> Self {
        OperatorWeights {
            mean_and_label: 30.0,
            breakpoint_gibbs: 10.0,
            sequential_constructor: 1.0,
            drift_coscaling: 2.0,
        }
    }
}

/// Run configuration of one inference chain, deserialized from JSON.
///
/// Every field has a default, so a partial document only needs to name what
/// it overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Dimensionality of the antigenic map.
    pub mds_dimension: usize,
    /// Width of interval-censored titre observations; 0 keeps point titres.
    pub interval_width: f64,
    /// Pool repeat serum bleeds of the same strain into one serum.
    pub merge_serum_isolates: bool,
    /// Breakpoint slot capacity; must stay below the tree's node count.
    pub bin_size: usize,
    /// Accumulate cluster means as increments along the tree instead of
    /// absolute locations.
    pub autocorrelated_placement: bool,
    /// Poisson rate on the cluster count.
    pub cluster_rate: f64,
    /// Variance of the zero-mean Gaussian prior on cluster means.
    pub mean_variance: f64,
    /// Half-width of the uniform window of the mean random walk.
    pub mean_window: f64,
    /// Lower bound of the drift co-scaling range, in (0, 1).
    pub drift_scale_factor: f64,
    pub operator_weights: OperatorWeights,
    /// Worker threads for the Gibbs candidate scan; `None` uses all cores.
    pub threads: Option<usize>,
    pub chain_length: u64,
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mds_dimension: 2,
            interval_width: 0.0,
            merge_serum_isolates: false,
            bin_size: 20,
            autocorrelated_placement: false,
            cluster_rate: 2.0,
            mean_variance: 1.0,
            mean_window: 0.5,
            drift_scale_factor: 0.75,
            operator_weights: OperatorWeights::default(),
            threads: None,
            chain_length: 1_000_000,
            seed: None,
        }
    }
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<RunConfig, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn placement(&self) -> Placement {
        if self.autocorrelated_placement {
            Placement::Autocorrelated
        } else {
            Placement::Flat
        }
    }

    pub fn prior(&self) -> ClusterPrior {
        ClusterPrior::new(self.cluster_rate, self.mean_variance)
    }
}
