use crate::data::measurement::MeasurementTable;
use crate::data::tree::FixedTree;
use crate::model::state::{ModelState, Placement};

/// Mean sampling-date offset per cluster label, over the viruses currently
/// assigned to it. Empty clusters keep an offset of zero.
pub fn cluster_mean_offsets(state: &ModelState, table: &MeasurementTable) -> Vec<f64> {
    let mut sums = vec![0.0; state.cluster_count()];
    let mut counts = vec![0usize; state.cluster_count()];
    for (virus, label) in state.virus_labels.iter().enumerate() {
        sums[*label] += table.viruses[virus].offset;
        counts[*label] += 1;
    }
    for (sum, count) in sums.iter_mut().zip(counts.iter()) {
        if *count > 0 {
            *sum /= *count as f64;
        }
    }
    sums
}

/// Flat placement: each virus sits exactly on its cluster's mean vector, and
/// its drift offset is the mean sampling-date offset of that cluster.
pub fn refresh_flat(state: &mut ModelState, table: &MeasurementTable) {
    let offsets = cluster_mean_offsets(state, table);
    for virus in 0..state.virus_labels.len() {
        let label = state.virus_labels[virus];
        state.virus_locations[virus] = state.cluster_means[label].clone();
        state.cluster_offsets[virus] = offsets[label];
    }
}

/// Autocorrelated placement: walks the tree root-to-tip once, accumulating
/// the mean increment owned by each active breakpoint along the path, then
/// reads tip locations off the cached taxon index.
pub fn refresh_autocorrelated(
    state: &mut ModelState,
    table: &MeasurementTable,
    tree: &FixedTree,
    taxon_nodes: &[usize],
) {
    let dim = state.mds_dimension;
    let mut increment_of_node = vec![None; tree.node_count()];
    let mut ordinal = 0usize;
    for bp in state.breakpoints.iter().filter(|b| b.active) {
        if !tree.is_root(bp.node) {
            increment_of_node[bp.node] = Some(ordinal + 1);
        }
        ordinal += 1;
    }

    let mut node_locations = vec![vec![0.0; dim]; tree.node_count()];
    for node in tree.topo_order() {
        match tree.parent(*node) {
            None => node_locations[*node] = state.cluster_means[0].clone(),
            Some(parent) => {
                let mut location = node_locations[parent].clone();
                if let Some(mean_index) = increment_of_node[*node] {
                    for (coordinate, increment) in
                        location.iter_mut().zip(state.cluster_means[mean_index].iter())
                    {
                        *coordinate += increment;
                    }
                }
                node_locations[*node] = location;
            }
        }
    }

    for (virus, node) in taxon_nodes.iter().enumerate() {
        state.virus_locations[virus] = node_locations[*node].clone();
    }
    let offsets = cluster_mean_offsets(state, table);
    for virus in 0..state.virus_labels.len() {
        state.cluster_offsets[virus] = offsets[state.virus_labels[virus]];
    }
}

/// Refreshes virus locations and drift offsets from the current cluster
/// state, dispatching on the configured placement strategy.
pub fn refresh_locations(
    state: &mut ModelState,
    table: &MeasurementTable,
    tree: &FixedTree,
    taxon_nodes: &[usize],
) {
    match state.placement {
        Placement::Flat => refresh_flat(state, table),
        Placement::Autocorrelated => refresh_autocorrelated(state, table, tree, taxon_nodes),
    }
}

/// Drift-shifted first coordinate of a virus.
pub fn effective_virus_x(state: &ModelState, virus: usize) -> f64 {
    state.virus_locations[virus][0]
        + state.effective_virus_drift() * state.cluster_offsets[virus]
}

/// Drift-shifted first coordinate of a serum.
pub fn effective_serum_x(state: &ModelState, table: &MeasurementTable, serum: usize) -> f64 {
    state.serum_locations[serum][0]
        + state.effective_serum_drift() * table.sera[serum].offset
}

/// Euclidean map distance between a virus and a serum.
///
/// The first dimension is shifted by the drift term on both sides; the
/// remaining dimensions are not. When serum breadths are present the distance
/// is divided by the serum's breadth.
pub fn distance(state: &ModelState, table: &MeasurementTable, virus: usize, serum: usize) -> f64 {
    let vloc = &state.virus_locations[virus];
    let sloc = &state.serum_locations[serum];

    let mut sum = {
        let difference = effective_virus_x(state, virus) - effective_serum_x(state, table, serum);
        difference * difference
    };
    for dim in 1..state.mds_dimension {
        let difference = vloc[dim] - sloc[dim];
        sum += difference * difference;
    }

    let mut dist = sum.sqrt();
    if let Some(breadths) = &state.serum_breadths {
        dist /= breadths[serum];
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::measurement::AssayRow;
    use crate::data::tree::chain_tree;
    use crate::model::state::Breakpoint;

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

    fn three_virus_table() -> MeasurementTable {
        let rows = vec![
            row("A", 2000.0, "S", 2000.0, "40"),
            row("B", 2001.0, "S", 2000.0, "40"),
            row("C", 2002.0, "T", 2001.0, "40"),
        ];
        MeasurementTable::from_rows(&rows, 0.0, false)
    }

    #[test]
    fn test_flat_placement_uses_cluster_means() {
        let table = three_virus_table();
        let tree = chain_tree(&["A", "B", "C"]);
        let mut state = ModelState::new(&table, &tree, 2, 2, Placement::Flat);
        state.cluster_means[0] = vec![1.0, -1.0];
        state.cluster_means[1] = vec![4.0, 2.0];
        state.virus_labels = vec![0, 1, 1];
        refresh_flat(&mut state, &table);
        assert_eq!(state.virus_locations[0], vec![1.0, -1.0]);
        assert_eq!(state.virus_locations[1], vec![4.0, 2.0]);
        assert_eq!(state.virus_locations[2], vec![4.0, 2.0]);
        // cluster 1 holds viruses B (offset 1) and C (offset 2).
        assert_eq!(state.cluster_offsets[1], 1.5);
        assert_eq!(state.cluster_offsets[0], 0.0);
    }

    #[test]
    fn test_autocorrelated_placement_accumulates_increments() {
        let table = three_virus_table();
        let tree = chain_tree(&["A", "B", "C"]);
        // tips 0,1,2; internal 3 (parent of 0,1); root 4 (parent of 2,3).
        let mut state = ModelState::new(&table, &tree, 2, 2, Placement::Autocorrelated);
        state.cluster_means[0] = vec![1.0, 1.0];
        state.cluster_means[1] = vec![0.5, -0.25];
        state.breakpoints[0] = Breakpoint { active: true, node: 3 };
        state.k = 1;
        let taxon_nodes = tree.taxon_node_index(&["A", "B", "C"]);
        refresh_autocorrelated(&mut state, &table, &tree, &taxon_nodes);
        // A and B sit below the breakpoint: root mean plus one increment.
        assert_eq!(state.virus_locations[0], vec![1.5, 0.75]);
        assert_eq!(state.virus_locations[1], vec![1.5, 0.75]);
        // C hangs straight off the root.
        assert_eq!(state.virus_locations[2], vec![1.0, 1.0]);
    }

    #[test]
    fn test_distance_drift_shift_first_dimension_only() {
        let table = three_virus_table();
        let tree = chain_tree(&["A", "B", "C"]);
        let mut state = ModelState::new(&table, &tree, 2, 2, Placement::Flat);
        state.virus_locations[1] = vec![3.0, 4.0];
        state.serum_locations[0] = vec![0.0, 0.0];
        assert!((distance(&state, &table, 1, 0) - 5.0).abs() < 1e-12);

        // Drift shifts the virus by rate x cluster offset along x only.
        state.drift_rate = 1.0;
        state.cluster_offsets[1] = 1.0;
        let expected = (16.0f64 + 16.0).sqrt();
        assert!((distance(&state, &table, 1, 0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_distance_serum_breadth_scales() {
        let table = three_virus_table();
        let tree = chain_tree(&["A", "B", "C"]);
        let mut state = ModelState::new(&table, &tree, 2, 2, Placement::Flat);
        state.virus_locations[0] = vec![6.0, 0.0];
        state.serum_breadths = Some(vec![2.0, 1.0]);
        assert!((distance(&state, &table, 0, 0) - 3.0).abs() < 1e-12);
    }
}
