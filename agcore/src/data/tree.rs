use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A fixed rooted tree stored as an index arena.
///
/// Node numbering is stable for the lifetime of the run; the tree topology
/// never changes once constructed. The top-down traversal order and the
/// taxon-name lookup are both computed once and cached.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixedTree {
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    taxon: Vec<Option<String>>,
    root: usize,
    topo_order: Vec<usize>,
    taxon_lookup: HashMap<String, usize>,
}

impl FixedTree {
    /// Builds a tree from per-node parent links and optional tip labels.
    ///
    /// `parent[i]` is `None` exactly for the root. Internal nodes carry no
    /// taxon label.
    ///
    /// # Panics
    ///
    /// Panics if there is not exactly one root, if a parent index is out of
    /// range, or if two tips carry the same label.
    pub fn new(parent: Vec<Option<usize>>, taxon: Vec<Option<String>>) -> Self {
        let node_count = parent.len();
        assert_eq!(
            taxon.len(),
            node_count,
            "taxon array length {} does not match node count {}",
            taxon.len(),
            node_count
        );

        let roots: Vec<usize> = (0..node_count).filter(|i| parent[*i].is_none()).collect();
        if roots.len() != 1 {
            panic!("tree must have exactly one root, found {}", roots.len());
        }
        let root = roots[0];

        let mut children = vec![Vec::new(); node_count];
        for (node, p) in parent.iter().enumerate() {
            if let Some(p) = p {
                if *p >= node_count {
                    panic!("parent index {} out of range for node {}", p, node);
                }
                children[*p].push(node);
            }
        }

        let mut taxon_lookup = HashMap::new();
        for (node, label) in taxon.iter().enumerate() {
            if let Some(label) = label {
                if taxon_lookup.insert(label.clone(), node).is_some() {
                    panic!("duplicate tip label in tree: {}", label);
                }
            }
        }

        let topo_order = Self::compute_topo_order(root, &children, node_count);

        FixedTree {
            parent,
            children,
            taxon,
            root,
            topo_order,
            taxon_lookup,
        }
    }

    fn compute_topo_order(root: usize, children: &[Vec<usize>], node_count: usize) -> Vec<usize> {
        let mut order = Vec::with_capacity(node_count);
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            order.push(node);
            for child in children[node].iter() {
                stack.push(*child);
            }
        }
        assert_eq!(
            order.len(),
            node_count,
            "tree is disconnected: visited {} of {} nodes",
            order.len(),
            node_count
        );
        order
    }

    pub fn node_count(&self) -> usize {
        self.parent.len()
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn is_root(&self, node: usize) -> bool {
        node == self.root
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parent[node]
    }

    pub fn children(&self, node: usize) -> &[usize] {
        &self.children[node]
    }

    pub fn taxon_id(&self, node: usize) -> Option<&str> {
        self.taxon[node].as_deref()
    }

    /// Cached top-down node order: every parent appears before its children.
    pub fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    /// Node index of the tip carrying `name`.
    ///
    /// # Panics
    ///
    /// A failed lookup is a consistency error between the assay table and the
    /// tree, so it panics rather than returning an option.
    pub fn tip_index_for(&self, name: &str) -> usize {
        *self
            .taxon_lookup
            .get(name)
            .unwrap_or_else(|| panic!("taxon {:?} not present in tree", name))
    }

    /// Tree-node index for each named virus, built once per tree.
    pub fn taxon_node_index(&self, names: &[&str]) -> Vec<usize> {
        names.iter().map(|name| self.tip_index_for(name)).collect()
    }
}

/// Deterministic caterpillar tree builder: tips hang off a spine of internal
/// nodes. Used for simulation checks and unit tests.
pub fn chain_tree(tip_names: &[&str]) -> FixedTree {
    let tips = tip_names.len();
    assert!(tips >= 2);
    // Nodes 0..tips are tips, nodes tips..2*tips-1 are internal; the last
    // internal node is the root.
    let internal = tips - 1;
    let node_count = tips + internal;
    let root = node_count - 1;
    let mut parent = vec![None; node_count];
    let mut taxon = vec![None; node_count];
    for (i, name) in tip_names.iter().enumerate() {
        taxon[i] = Some(name.to_string());
    }
    // internal node tips+j joins tip j+1 and the previous internal node
    // (or tips 0 and 1 for the first).
    parent[0] = Some(tips);
    parent[1] = Some(tips);
    for j in 1..internal {
        parent[tips + j - 1] = Some(tips + j);
        parent[j + 1] = Some(tips + j);
    }
    parent[root] = None;
    FixedTree::new(parent, taxon)
}
