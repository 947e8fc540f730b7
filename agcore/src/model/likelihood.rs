use rayon::prelude::*;

use crate::algorithm::stats::{log_diff, normal_log_cdf, normal_log_pdf, normal_log_sf};
use crate::data::measurement::{Measurement, MeasurementTable, TitreType};
use crate::model::spatial;
use crate::model::state::{ModelState, Param};

// Compile-time gate: when enabled, a non-finite single-measurement value
// aborts instead of propagating. Off in production because -inf tails are a
// legitimate signal of tail-degenerate data.
const CHECK_INFINITE: bool = false;

/// Incremental log-likelihood over the assay measurements.
///
/// Caches one value per measurement and recomputes an entry only when one of
/// its endpoints (virus or serum location, virus or serum effect) has been
/// flagged dirty since the last full pass. A shadow copy of the cache makes
/// the revert after a rejected proposal a pointer swap.
#[derive(Clone, Debug)]
pub struct MeasurementLikelihood {
    log_likelihoods: Vec<f64>,
    stored_log_likelihoods: Vec<f64>,
    virus_location_changed: Vec<bool>,
    serum_location_changed: Vec<bool>,
    virus_effect_changed: Vec<bool>,
    serum_effect_changed: Vec<bool>,
    likelihood_known: bool,
    log_likelihood: f64,
}

impl MeasurementLikelihood {
    pub fn new(table: &MeasurementTable) -> Self {
        MeasurementLikelihood {
            log_likelihoods: vec![0.0; table.measurement_count()],
            stored_log_likelihoods: vec![0.0; table.measurement_count()],
            virus_location_changed: vec![true; table.virus_count()],
            serum_location_changed: vec![true; table.serum_count()],
            virus_effect_changed: vec![true; table.virus_count()],
            serum_effect_changed: vec![true; table.serum_count()],
            likelihood_known: false,
            log_likelihood: 0.0,
        }
    }

    /// Records a parameter write. Precision and drift invalidate every
    /// location; the rest flag a single row.
    pub fn mark(&mut self, param: Param) {
        match param {
            Param::VirusLocation(virus) => self.virus_location_changed[virus] = true,
            Param::SerumLocation(serum) => self.serum_location_changed[serum] = true,
            Param::VirusEffect(virus) => self.virus_effect_changed[virus] = true,
            Param::SerumEffect(serum) => self.serum_effect_changed[serum] = true,
            Param::Precision | Param::Drift => {
                self.virus_location_changed.iter_mut().for_each(|f| *f = true);
                self.serum_location_changed.iter_mut().for_each(|f| *f = true);
            }
        }
        self.likelihood_known = false;
    }

    /// Flags every measurement for recomputation.
    pub fn make_dirty(&mut self) {
        self.virus_location_changed.iter_mut().for_each(|f| *f = true);
        self.serum_location_changed.iter_mut().for_each(|f| *f = true);
        self.likelihood_known = false;
    }

    /// Snapshots the per-measurement cache ahead of a proposal.
    pub fn store(&mut self) {
        self.stored_log_likelihoods.copy_from_slice(&self.log_likelihoods);
    }

    /// Reverts the cache to the last snapshot after a rejected proposal.
    pub fn restore(&mut self) {
        std::mem::swap(&mut self.log_likelihoods, &mut self.stored_log_likelihoods);
        self.likelihood_known = false;
    }

    /// Whole-model log-likelihood, recomputing only flagged measurements.
    ///
    /// Clears all dirty flags afterwards: the cache is authoritative again.
    pub fn log_likelihood(&mut self, table: &MeasurementTable, state: &ModelState) -> f64 {
        if self.likelihood_known {
            return self.log_likelihood;
        }

        let sd = 1.0 / state.mds_precision.sqrt();
        let MeasurementLikelihood {
            log_likelihoods,
            virus_location_changed,
            serum_location_changed,
            virus_effect_changed,
            serum_effect_changed,
            ..
        } = self;
        let virus_location_changed: &[bool] = virus_location_changed;
        let serum_location_changed: &[bool] = serum_location_changed;
        let virus_effect_changed: &[bool] = virus_effect_changed;
        let serum_effect_changed: &[bool] = serum_effect_changed;

        log_likelihoods
            .par_iter_mut()
            .zip(table.measurements.par_iter())
            .for_each(|(slot, m)| {
                if virus_location_changed[m.virus]
                    || serum_location_changed[m.serum]
                    || virus_effect_changed[m.virus]
                    || serum_effect_changed[m.serum]
                {
                    *slot = measurement_contribution(table, state, m, sd);
                }
            });

        self.log_likelihood = self.log_likelihoods.iter().sum();
        self.likelihood_known = true;
        self.virus_location_changed.iter_mut().for_each(|f| *f = false);
        self.serum_location_changed.iter_mut().for_each(|f| *f = false);
        self.virus_effect_changed.iter_mut().for_each(|f| *f = false);
        self.serum_effect_changed.iter_mut().for_each(|f| *f = false);
        self.log_likelihood
    }
}

/// Cache-free reference recomputation over all measurements.
pub fn full_log_likelihood(table: &MeasurementTable, state: &ModelState) -> f64 {
    let sd = 1.0 / state.mds_precision.sqrt();
    table
        .measurements
        .par_iter()
        .map(|m| measurement_contribution(table, state, m, sd))
        .sum()
}

/// Scratch buffers of one cluster-subset likelihood scan.
#[derive(Clone, Debug, Default)]
pub struct ClusterScan {
    /// Cluster assignment induced on each measurement by the virus labels.
    pub observation_cluster: Vec<usize>,
    /// Per-measurement log-likelihood under those labels.
    pub contribution: Vec<f64>,
}

/// Subset likelihood query for Gibbs scans over cluster assignments.
///
/// Computes the full-data log-likelihood under the candidate per-virus
/// `labels`, recomputing only measurements whose induced cluster assignment
/// differs from `previous`; all others reuse the previous contribution.
/// Virus locations in `state` must already reflect the candidate labels.
pub fn cluster_log_likelihood(
    table: &MeasurementTable,
    state: &ModelState,
    labels: &[usize],
    previous: Option<&ClusterScan>,
    scratch: &mut ClusterScan,
) -> f64 {
    let sd = 1.0 / state.mds_precision.sqrt();
    let count = table.measurement_count();
    scratch.observation_cluster.resize(count, 0);
    scratch.contribution.resize(count, 0.0);

    let mut total = 0.0;
    for (i, m) in table.measurements.iter().enumerate() {
        let cluster = labels[m.virus];
        scratch.observation_cluster[i] = cluster;
        let reusable = previous
            .map(|p| p.observation_cluster[i] == cluster)
            .unwrap_or(false);
        scratch.contribution[i] = if reusable {
            previous.unwrap().contribution[i]
        } else {
            measurement_contribution(table, state, m, sd)
        };
        total += scratch.contribution[i];
    }
    total
}

/// Expected log2 titre at map distance zero.
fn baseline(state: &ModelState, virus: usize, serum: usize) -> f64 {
    let mut expected = state.serum_potencies[serum];
    if let Some(avidities) = &state.virus_avidities {
        expected += avidities[virus];
    }
    expected
}

/// Log-likelihood of a single measurement under the current state.
pub fn measurement_contribution(
    table: &MeasurementTable,
    state: &ModelState,
    m: &Measurement,
    sd: f64,
) -> f64 {
    if m.titre_type == TitreType::Missing {
        return 0.0;
    }
    let expectation =
        baseline(state, m.virus, m.serum) - spatial::distance(state, table, m.virus, m.serum);
    match m.titre_type {
        TitreType::Point => point_log_likelihood(m.log2_titre, expectation, sd),
        TitreType::Interval => interval_log_likelihood(
            m.log2_titre,
            m.log2_titre + table.interval_width,
            expectation,
            sd,
        ),
        TitreType::ThresholdLower => lower_threshold_log_likelihood(m.log2_titre, expectation, sd),
        TitreType::ThresholdUpper => upper_threshold_log_likelihood(m.log2_titre, expectation, sd),
        TitreType::Missing => unreachable!(),
    }
}

fn point_log_likelihood(titre: f64, expectation: f64, sd: f64) -> f64 {
    let lnl = normal_log_pdf(titre, expectation, sd);
    if CHECK_INFINITE && !lnl.is_finite() {
        panic!("non-finite point measurement likelihood");
    }
    lnl
}

/// True titre lies below the recorded threshold: lower-tail log CDF.
fn lower_threshold_log_likelihood(titre: f64, expectation: f64, sd: f64) -> f64 {
    let lnl = normal_log_cdf(titre, expectation, sd);
    if CHECK_INFINITE && !lnl.is_finite() {
        panic!("non-finite lower-threshold measurement likelihood");
    }
    lnl
}

/// True titre lies above the recorded threshold: upper-tail log probability.
fn upper_threshold_log_likelihood(titre: f64, expectation: f64, sd: f64) -> f64 {
    let lnl = normal_log_sf(titre, expectation, sd);
    if CHECK_INFINITE && !lnl.is_finite() {
        panic!("non-finite upper-threshold measurement likelihood");
    }
    lnl
}

/// True titre lies in `[min_titre, max_titre]`.
///
/// When both CDFs saturate to the same tail value the log difference cancels
/// catastrophically; fall back to the log-density at the lower bound.
fn interval_log_likelihood(min_titre: f64, max_titre: f64, expectation: f64, sd: f64) -> f64 {
    let upper = normal_log_cdf(max_titre, expectation, sd);
    let lower = normal_log_cdf(min_titre, expectation, sd);
    let mut lnl = log_diff(upper, lower);
    if !lnl.is_finite() {
        lnl = normal_log_pdf(min_titre, expectation, sd);
        if CHECK_INFINITE && !lnl.is_finite() {
            panic!("non-finite interval measurement likelihood");
        }
    }
    lnl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::measurement::AssayRow;
    use crate::data::tree::chain_tree;
    use crate::model::state::Placement;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn row(virus: &str, vdate: f64, serum: &str, sdate: f64, titre: &str) -> AssayRow {
        AssayRow {
            virus_isolate: format!("{}-iso", virus),
            virus_strain: virus.to_string(),
            virus_date: vdate,
            serum_isolate: format!("{}-iso", serum),
            serum_strain: serum.to_string(),
            serum_date: sdate,
            titre: titre.to_string(),
        }
    }

    /// 3 viruses x 2 sera, one point measurement per pair.
    fn six_point_table() -> MeasurementTable {
        let mut rows = Vec::new();
        for (virus, vdate) in [("A", 2000.0), ("B", 2001.0), ("C", 2002.0)] {
            for (serum, sdate) in [("S", 2000.0), ("T", 2001.0)] {
                rows.push(row(virus, vdate, serum, sdate, "40"));
            }
        }
        MeasurementTable::from_rows(&rows, 0.0, false)
    }

    fn plain_state(table: &MeasurementTable) -> ModelState {
        let tree = chain_tree(&["A", "B", "C"]);
        let mut state = ModelState::new(table, &tree, 2, 2, Placement::Flat);
        // Hand-checkable configuration: no avidities, unit potencies.
        state.virus_avidities = None;
        state.serum_potencies = vec![5.0; table.serum_count()];
        state
    }

    #[test]
    fn test_six_point_measurements_hand_computed() {
        let table = six_point_table();
        let mut state = plain_state(&table);
        state.virus_locations = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![2.0, 0.0]];
        state.serum_locations = vec![vec![0.0, 0.0], vec![1.0, 0.0]];
        state.mds_precision = 1.0;

        // expectation = potency - |virus - serum|; sd = 1.
        let half_log_two_pi = 0.5 * (2.0 * std::f64::consts::PI).ln();
        let titre = 40.0f64.log2();
        let mut expected = 0.0;
        for (virus_x, serum_x) in [
            (0.0, 0.0),
            (0.0, 1.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (2.0, 0.0),
            (2.0, 1.0),
        ] {
            let expectation = 5.0 - (virus_x - serum_x as f64).abs();
            let z: f64 = titre - expectation;
            expected += -half_log_two_pi - 0.5 * z * z;
        }

        let mut likelihood = MeasurementLikelihood::new(&table);
        let actual = likelihood.log_likelihood(&table, &state);
        assert!((actual - expected).abs() < 1e-10);
        assert!((full_log_likelihood(&table, &state) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_threshold_measurements() {
        let rows = vec![
            row("A", 2000.0, "S", 2000.0, "<10"),
            row("A", 2000.0, "S", 2000.0, ">10"),
        ];
        let table = MeasurementTable::from_rows(&rows, 0.0, false);
        let mut state = plain_state(&table);
        state.virus_locations[0] = vec![0.0, 0.0];
        state.serum_locations[0] = vec![3.0, 0.0];

        let sd = 1.0;
        let titre = 10.0f64.log2();
        let expectation = 5.0 - 3.0;
        let lower = measurement_contribution(&table, &state, &table.measurements[0], sd);
        let upper = measurement_contribution(&table, &state, &table.measurements[1], sd);
        assert!((lower - normal_log_cdf(titre, expectation, sd)).abs() < 1e-12);
        assert!((upper - normal_log_sf(titre, expectation, sd)).abs() < 1e-12);
        assert!(lower != upper);

        // As the expectation drops far below the threshold the lower-tail
        // probability approaches 1, so its log approaches 0.
        state.serum_potencies[0] = -60.0;
        let saturated = measurement_contribution(&table, &state, &table.measurements[0], sd);
        assert!(saturated.abs() < 1e-9);
    }

    #[test]
    fn test_interval_fallback_in_far_tail() {
        let lnl = interval_log_likelihood(60.0, 61.0, 0.0, 1.0);
        // Both CDFs saturate to 1; fallback is the log-density at the lower
        // bound, which is finite and extremely small.
        assert!(lnl.is_finite());
        assert!(lnl < -1000.0);
    }

    #[test]
    fn test_missing_contributes_zero() {
        let table = MeasurementTable::from_rows(&[row("A", 2000.0, "S", 2000.0, "")], 0.0, false);
        let state = plain_state(&table);
        assert_eq!(full_log_likelihood(&table, &state), 0.0);
    }

    #[test]
    fn test_incremental_matches_full_after_perturbations() {
        let table = six_point_table();
        let mut state = plain_state(&table);
        let mut likelihood = MeasurementLikelihood::new(&table);
        let mut rng = StdRng::seed_from_u64(7);

        likelihood.log_likelihood(&table, &state);
        for _ in 0..50 {
            match rng.gen_range(0..4) {
                0 => {
                    let virus = rng.gen_range(0..table.virus_count());
                    let dim = rng.gen_range(0..2);
                    state.virus_locations[virus][dim] += rng.gen_range(-1.0..1.0);
                    likelihood.mark(Param::VirusLocation(virus));
                }
                1 => {
                    let serum = rng.gen_range(0..table.serum_count());
                    let dim = rng.gen_range(0..2);
                    state.serum_locations[serum][dim] += rng.gen_range(-1.0..1.0);
                    likelihood.mark(Param::SerumLocation(serum));
                }
                2 => {
                    let serum = rng.gen_range(0..table.serum_count());
                    state.serum_potencies[serum] += rng.gen_range(-0.5..0.5);
                    likelihood.mark(Param::SerumEffect(serum));
                }
                _ => {
                    state.mds_precision = rng.gen_range(0.5..2.0);
                    likelihood.mark(Param::Precision);
                }
            }
            let incremental = likelihood.log_likelihood(&table, &state);
            let reference = full_log_likelihood(&table, &state);
            assert!(
                (incremental - reference).abs() < 1e-9,
                "cache diverged: {} vs {}",
                incremental,
                reference
            );
        }
    }

    #[test]
    fn test_store_restore_round_trip() {
        let table = six_point_table();
        let mut state = plain_state(&table);
        let mut likelihood = MeasurementLikelihood::new(&table);

        let before = likelihood.log_likelihood(&table, &state);
        let cache_before = likelihood.log_likelihoods.clone();

        likelihood.store();
        let saved_location = state.virus_locations[0][0];
        state.virus_locations[0][0] += 2.5;
        likelihood.mark(Param::VirusLocation(0));
        let during = likelihood.log_likelihood(&table, &state);
        assert!(during != before);

        // Reject: revert the state and the cache.
        state.virus_locations[0][0] = saved_location;
        likelihood.restore();
        likelihood.mark(Param::VirusLocation(0));
        let after = likelihood.log_likelihood(&table, &state);
        assert_eq!(before.to_bits(), after.to_bits());
        for (a, b) in cache_before.iter().zip(likelihood.log_likelihoods.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_cluster_scan_reuses_unchanged_contributions() {
        let table = six_point_table();
        let mut state = plain_state(&table);
        state.cluster_means[0] = vec![0.0, 0.0];
        state.cluster_means[1] = vec![2.0, 1.0];
        state.virus_labels = vec![0, 0, 1];
        crate::model::spatial::refresh_flat(&mut state, &table);

        let mut first = ClusterScan::default();
        let labels = state.virus_labels.clone();
        let total_first = cluster_log_likelihood(&table, &state, &labels, None, &mut first);
        assert!((total_first - full_log_likelihood(&table, &state)).abs() < 1e-10);

        // Move virus 1 to cluster 1; only its measurements are recomputed.
        state.virus_labels = vec![0, 1, 1];
        crate::model::spatial::refresh_flat(&mut state, &table);
        let labels = state.virus_labels.clone();
        let mut second = ClusterScan::default();
        let total_second =
            cluster_log_likelihood(&table, &state, &labels, Some(&first), &mut second);
        assert!((total_second - full_log_likelihood(&table, &state)).abs() < 1e-10);
        // Measurements of viruses 0 and 2 kept their previous contributions.
        for (i, m) in table.measurements.iter().enumerate() {
            if m.virus != 1 {
                assert_eq!(first.contribution[i].to_bits(), second.contribution[i].to_bits());
            }
        }
    }
}
