use std::collections::HashMap;

use crate::data::tree::FixedTree;
use crate::model::state::Breakpoint;

/// Computes the node → cluster-label assignment induced by a breakpoint set.
///
/// The root is always label 0. A non-root node that carries an active
/// breakpoint opens the label supplied for it in `labels`; every other node
/// inherits its parent's label. Labels come from the caller so that label
/// identity stays stable across proposals instead of following traversal
/// order.
///
/// # Panics
///
/// Panics if two active breakpoints share a tree node.
pub fn compute_membership_with_labels(
    tree: &FixedTree,
    labels: &HashMap<usize, usize>,
) -> Vec<usize> {
    let mut membership = vec![usize::MAX; tree.node_count()];
    membership[tree.root()] = 0;
    for node in tree.topo_order().iter().skip(1) {
        let parent = tree.parent(*node).unwrap();
        membership[*node] = match labels.get(node) {
            Some(label) => *label,
            None => membership[parent],
        };
    }
    membership
}

/// Membership from the breakpoint slot array: the active slot at ordinal
/// position `i` (slot order) opens label `i + 1`.
pub fn compute_membership(tree: &FixedTree, breakpoints: &[Breakpoint]) -> Vec<usize> {
    let mut labels = HashMap::new();
    let mut next = 1usize;
    for bp in breakpoints.iter().filter(|b| b.active) {
        if !tree.is_root(bp.node) && labels.insert(bp.node, next).is_some() {
            panic!("two active breakpoints reference tree node {}", bp.node);
        }
        next += 1;
    }
    compute_membership_with_labels(tree, &labels)
}

/// Membership from an explicit cut-node list: `cut_nodes[i]` opens label
/// `i + 1`. Used while a breakpoint set is being built position by position.
pub fn compute_membership_ordered(tree: &FixedTree, cut_nodes: &[usize]) -> Vec<usize> {
    let mut labels = HashMap::new();
    for (i, node) in cut_nodes.iter().enumerate() {
        if !tree.is_root(*node) && labels.insert(*node, i + 1).is_some() {
            panic!("two active breakpoints reference tree node {}", node);
        }
    }
    compute_membership_with_labels(tree, &labels)
}

/// Remaps a fresh label vector so labels match a previous iteration's labels
/// wherever possible.
///
/// Greedy first-available assignment: the first time a fresh label is seen it
/// is bound to the old label at the same position unless that old label is
/// already taken, in which case a brand-new label (above the old maximum) is
/// allocated.
pub fn relabel_by_history(labels: &mut [usize], old_labels: &[usize]) {
    assert_eq!(labels.len(), old_labels.len());
    let mut max_old = old_labels.iter().copied().max().unwrap_or(0);
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let mut old_used = vec![false; labels.len() + max_old + 2];

    for i in 0..labels.len() {
        let fresh = labels[i];
        let mapped = match mapping.get(&fresh) {
            Some(m) => *m,
            None => {
                let target = if !old_used[old_labels[i]] {
                    old_labels[i]
                } else {
                    max_old += 1;
                    max_old
                };
                old_used[target] = true;
                mapping.insert(fresh, target);
                target
            }
        };
        labels[i] = mapped;
    }
}

/// Cluster label per virus, read off the membership array through the cached
/// taxon → tree-node index.
pub fn labels_for_viruses(membership: &[usize], taxon_nodes: &[usize]) -> Vec<usize> {
    taxon_nodes.iter().map(|node| membership[*node]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tree::chain_tree;

    // chain_tree(&["A","B","C","D"]): tips 0..4, internals 4,5,6; root 6.
    // parents: 0->4, 1->4, 2->5, 3->6, 4->5, 5->6.

    fn bp(active: bool, node: usize) -> Breakpoint {
        Breakpoint { active, node }
    }

    #[test]
    fn test_membership_no_breakpoints() {
        let tree = chain_tree(&["A", "B", "C", "D"]);
        let membership = compute_membership(&tree, &[]);
        assert!(membership.iter().all(|m| *m == 0));
    }

    #[test]
    fn test_membership_propagates_below_breakpoint() {
        let tree = chain_tree(&["A", "B", "C", "D"]);
        // Breakpoint at internal node 5: subtree {5, 4, 0, 1, 2} moves to
        // label 1, the rest stays with the root.
        let membership = compute_membership(&tree, &[bp(true, 5)]);
        assert_eq!(membership[tree.root()], 0);
        assert_eq!(membership[3], 0);
        for node in [5, 4, 0, 1, 2] {
            assert_eq!(membership[node], 1);
        }
    }

    #[test]
    fn test_membership_label_follows_slot_order() {
        let tree = chain_tree(&["A", "B", "C", "D"]);
        let breakpoints = vec![bp(false, 0), bp(true, 5), bp(true, 4)];
        // Slot 1 is the first active slot -> label 1 at node 5; slot 2 ->
        // label 2 at node 4 nested inside it.
        let membership = compute_membership(&tree, &breakpoints);
        assert_eq!(membership[5], 1);
        assert_eq!(membership[2], 1);
        assert_eq!(membership[4], 2);
        assert_eq!(membership[0], 2);
        assert_eq!(membership[1], 2);
    }

    #[test]
    fn test_membership_deterministic() {
        let tree = chain_tree(&["A", "B", "C", "D", "E"]);
        let breakpoints = vec![bp(true, 6), bp(true, 2)];
        let first = compute_membership(&tree, &breakpoints);
        let second = compute_membership(&tree, &breakpoints);
        assert_eq!(first, second);
    }

    #[test]
    #[should_panic(expected = "two active breakpoints")]
    fn test_duplicate_breakpoint_panics() {
        let tree = chain_tree(&["A", "B", "C"]);
        compute_membership(&tree, &[bp(true, 1), bp(true, 1)]);
    }

    #[test]
    fn test_ordered_membership_matches_cut_order() {
        let tree = chain_tree(&["A", "B", "C", "D"]);
        let membership = compute_membership_ordered(&tree, &[4, 5]);
        // Node 4 opens label 1, node 5 opens label 2; node 4 sits below 5 so
        // its subtree keeps label 1.
        assert_eq!(membership[4], 1);
        assert_eq!(membership[0], 1);
        assert_eq!(membership[5], 2);
        assert_eq!(membership[2], 2);
    }

    #[test]
    fn test_relabel_by_history_keeps_stable_labels() {
        let mut fresh = vec![0, 1, 1, 2, 0];
        let old = vec![0, 2, 2, 1, 0];
        relabel_by_history(&mut fresh, &old);
        assert_eq!(fresh, vec![0, 2, 2, 1, 0]);
    }

    #[test]
    fn test_relabel_by_history_allocates_on_collision() {
        // Fresh splits old cluster 1 in two; the second part cannot reuse
        // label 1 and gets a brand-new label above the old maximum.
        let mut fresh = vec![0, 1, 2, 2];
        let old = vec![0, 1, 1, 1];
        relabel_by_history(&mut fresh, &old);
        assert_eq!(fresh, vec![0, 1, 2, 2]);

        let mut fresh = vec![1, 0, 2];
        let old = vec![0, 0, 1];
        relabel_by_history(&mut fresh, &old);
        // fresh 1 -> old 0; fresh 0 collides with used 0 -> new label 2;
        // fresh 2 -> old 1.
        assert_eq!(fresh, vec![0, 2, 1]);
    }

    #[test]
    fn test_labels_for_viruses() {
        let tree = chain_tree(&["A", "B", "C"]);
        let membership = compute_membership(&tree, &[bp(true, 3)]);
        let nodes = tree.taxon_node_index(&["A", "B", "C"]);
        let labels = labels_for_viruses(&membership, &nodes);
        assert_eq!(labels, vec![1, 1, 0]);
    }
}
