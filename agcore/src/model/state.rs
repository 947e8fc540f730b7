use serde::{Deserialize, Serialize};

use crate::data::measurement::MeasurementTable;
use crate::data::tree::FixedTree;

/// One breakpoint slot: a tree node at which a new antigenic cluster starts.
///
/// Slots live in a fixed-capacity array; only active slots count towards K.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub active: bool,
    pub node: usize,
}

/// Tagged handle for a mutable model parameter.
///
/// Operators report their writes through this enum so that dirty-flag
/// propagation is a direct match rather than a chain of identity tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Param {
    VirusLocation(usize),
    SerumLocation(usize),
    VirusEffect(usize),
    SerumEffect(usize),
    Precision,
    Drift,
}

/// Which placement strategy generates virus locations from cluster state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Virus coordinate equals its cluster's mean vector.
    Flat,
    /// Cluster means are increments accumulated root-to-tip along the tree.
    Autocorrelated,
}

/// The complete mutable state of the antigenic clustering model.
///
/// Every component reads and writes this struct by reference; there are no
/// hidden singletons. Cloning yields an independent scratch copy for
/// read-only parallel evaluation.
#[derive(Clone, Debug)]
pub struct ModelState {
    pub mds_dimension: usize,
    pub placement: Placement,

    /// Fixed capacity of the breakpoint array.
    pub bin_size: usize,
    /// Number of active breakpoints; cluster count is `k + 1` (root cluster
    /// is implicit).
    pub k: usize,
    pub breakpoints: Vec<Breakpoint>,

    /// Mean coordinate per cluster label. Label 0 is the root cluster; the
    /// i-th active breakpoint slot (slot order) owns entry `i + 1`, which in
    /// the autocorrelated model is an increment rather than a location.
    pub cluster_means: Vec<Vec<f64>>,
    /// Cluster label per virus.
    pub virus_labels: Vec<usize>,
    /// Cluster label per tree node, derived from the breakpoint set.
    pub membership: Vec<usize>,

    pub virus_locations: Vec<Vec<f64>>,
    pub serum_locations: Vec<Vec<f64>>,
    /// Mean sampling-date offset of each virus's current cluster; feeds the
    /// drift term under the flat placement.
    pub cluster_offsets: Vec<f64>,

    pub drift_rate: f64,
    pub virus_drift: Option<f64>,
    pub serum_drift: Option<f64>,

    pub serum_potencies: Vec<f64>,
    pub serum_breadths: Option<Vec<f64>>,
    pub virus_avidities: Option<Vec<f64>>,

    pub mds_precision: f64,
    /// Hyperparameters of the cluster-mean prior on the drift axis.
    pub mu_mean: f64,
    pub mu_precision: f64,
}

impl ModelState {
    /// Initial state: everything in the root cluster, locations zeroed,
    /// serum potencies and virus avidities seeded from the per-entity
    /// maximum titres.
    pub fn new(
        table: &MeasurementTable,
        tree: &FixedTree,
        mds_dimension: usize,
        bin_size: usize,
        placement: Placement,
    ) -> Self {
        assert!(
            bin_size < tree.node_count(),
            "breakpoint capacity {} must be below node count {}",
            bin_size,
            tree.node_count()
        );
        let virus_count = table.virus_count();
        let serum_count = table.serum_count();
        ModelState {
            mds_dimension,
            placement,
            bin_size,
            k: 0,
            breakpoints: vec![
                Breakpoint {
                    active: false,
                    node: 0
                };
                bin_size
            ],
            cluster_means: vec![vec![0.0; mds_dimension]; bin_size + 1],
            virus_labels: vec![0; virus_count],
            membership: vec![0; tree.node_count()],
            virus_locations: vec![vec![0.0; mds_dimension]; virus_count],
            serum_locations: vec![vec![0.0; mds_dimension]; serum_count],
            cluster_offsets: vec![0.0; virus_count],
            drift_rate: 0.0,
            virus_drift: None,
            serum_drift: None,
            serum_potencies: table.max_serum_titre.clone(),
            serum_breadths: None,
            virus_avidities: Some(table.max_virus_titre.clone()),
            mds_precision: 1.0,
            mu_mean: 0.0,
            mu_precision: 1.0,
        }
    }

    /// Count of active breakpoint slots.
    pub fn active_breakpoint_count(&self) -> usize {
        self.breakpoints.iter().filter(|b| b.active).count()
    }

    /// Tree nodes of the active breakpoints, in slot order.
    pub fn active_breakpoint_nodes(&self) -> Vec<usize> {
        self.breakpoints
            .iter()
            .filter(|b| b.active)
            .map(|b| b.node)
            .collect()
    }

    /// True if some active slot other than `slot` already occupies `node`.
    pub fn node_occupied_by_other(&self, node: usize, slot: usize) -> bool {
        self.breakpoints
            .iter()
            .enumerate()
            .any(|(s, b)| s != slot && b.active && b.node == node)
    }

    /// Per-label virus counts over `cluster_count()` labels.
    pub fn member_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.cluster_count()];
        for label in self.virus_labels.iter() {
            counts[*label] += 1;
        }
        counts
    }

    /// Number of cluster labels currently addressable.
    pub fn cluster_count(&self) -> usize {
        self.cluster_means.len()
    }

    /// Fatal bookkeeping check: the active breakpoint count must equal the
    /// tracked K after every proposal that touches the breakpoint set.
    pub fn assert_consistent(&self) {
        let active = self.active_breakpoint_count();
        assert_eq!(
            active, self.k,
            "active breakpoint count {} does not match tracked K {}",
            active, self.k
        );
    }

    /// Effective drift rate applied to virus coordinates.
    pub fn effective_virus_drift(&self) -> f64 {
        self.virus_drift.unwrap_or(self.drift_rate)
    }

    /// Effective drift rate applied to serum coordinates; a serum-specific
    /// rate always overrides the shared one.
    pub fn effective_serum_drift(&self) -> f64 {
        self.serum_drift.unwrap_or(self.drift_rate)
    }
}
