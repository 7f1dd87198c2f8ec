//! Rooted phylogenetic trees.
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Every node carries a unique
//! name which doubles as the key of the branch above it. Traversal orders
//! and the name index are computed once at construction.

use std::collections::HashMap;

use sylva_core::{Result, Summarizable, SylvaError};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in a phylogenetic tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes, in input order.
    pub children: Vec<NodeId>,
    /// Length of the branch to the parent. Zero for the root.
    pub branch_length: f64,
    /// Unique node label.
    pub name: String,
}

impl Node {
    /// Build a detached node; links are filled in by the caller.
    pub fn new(id: NodeId, name: impl Into<String>, branch_length: f64) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            branch_length,
            name: name.into(),
        }
    }

    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted phylogenetic tree stored as an arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
    post_order: Vec<NodeId>,
    pre_order: Vec<NodeId>,
    index: HashMap<String, NodeId>,
}

impl PhyloTree {
    /// Create a tree from pre-built nodes and a root index.
    ///
    /// Validates that ids match arena positions, parent and child links are
    /// consistent, every node is reachable from the root, names are unique
    /// and non-empty, and branch lengths are finite and non-negative.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(SylvaError::Tree("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(SylvaError::Tree(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        if nodes[root].parent.is_some() {
            return Err(SylvaError::Tree("root node has a parent".into()));
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.id != i {
                return Err(SylvaError::Tree(format!(
                    "node at position {} carries id {}",
                    i, node.id
                )));
            }
            if node.name.is_empty() {
                return Err(SylvaError::Tree(format!("node {} has no name", i)));
            }
            if !(node.branch_length >= 0.0 && node.branch_length.is_finite()) {
                return Err(SylvaError::Tree(format!(
                    "branch '{}' has invalid length {}",
                    node.name, node.branch_length
                )));
            }
            if index.insert(node.name.clone(), i).is_some() {
                return Err(SylvaError::Tree(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
            for &c in &node.children {
                if c >= nodes.len() || nodes[c].parent != Some(i) {
                    return Err(SylvaError::Tree(format!(
                        "child link {} -> {} is inconsistent",
                        i, c
                    )));
                }
            }
        }

        let links: usize = nodes.iter().map(|n| n.children.len()).sum();
        if links + 1 != nodes.len() {
            return Err(SylvaError::Tree(format!(
                "{} child links for {} nodes",
                links,
                nodes.len()
            )));
        }

        let pre_order = preorder(&nodes, root);
        if pre_order.len() != nodes.len() {
            return Err(SylvaError::Tree(format!(
                "{} of {} nodes are unreachable from the root",
                nodes.len() - pre_order.len(),
                nodes.len()
            )));
        }
        let post_order = postorder(&nodes, root);

        Ok(Self {
            nodes,
            root,
            post_order,
            pre_order,
            index,
        })
    }

    /// Parse a Newick format string into a tree.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    /// A copy of this tree with the branch above `name` set to `length`.
    pub fn with_branch_length(&self, name: &str, length: f64) -> Result<Self> {
        let id = self.node_id(name)?;
        if !(length >= 0.0 && length.is_finite()) {
            return Err(SylvaError::Tree(format!(
                "branch '{}' has invalid length {}",
                name, length
            )));
        }
        let mut tree = self.clone();
        tree.nodes[id].branch_length = length;
        Ok(tree)
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes in arena order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Leaf ids in tree (left-to-right) order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.pre_order
            .iter()
            .copied()
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    /// Leaf names in tree order.
    pub fn leaf_names(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .map(|id| self.nodes[id].name.as_str())
            .collect()
    }

    /// Every non-leaf node in pre-order, the root included.
    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.pre_order
            .iter()
            .copied()
            .filter(|&id| !self.nodes[id].is_leaf())
            .collect()
    }

    /// Cached post-order (children before parent); ends at the root.
    pub fn post_order(&self) -> &[NodeId] {
        &self.post_order
    }

    /// Cached pre-order (parent before children); starts at the root.
    pub fn pre_order(&self) -> &[NodeId] {
        &self.pre_order
    }

    /// Branch length above `id`.
    pub fn branch_length(&self, id: NodeId) -> f64 {
        self.nodes[id].branch_length
    }

    /// Parent of `id`, `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Children of `id`.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// True if `id` has no children.
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].is_leaf()
    }

    /// Name of `id`.
    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    /// Look up a node by name.
    pub fn node_id(&self, name: &str) -> Result<NodeId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| SylvaError::Tree(format!("no node named '{}'", name)))
    }

    /// Sum of all branch lengths.
    pub fn total_length(&self) -> f64 {
        self.nodes.iter().map(|n| n.branch_length).sum()
    }
}

fn preorder(nodes: &[Node], root: NodeId) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        order.push(id);
        // Push children in reverse order so leftmost is visited first.
        for &child in nodes[id].children.iter().rev() {
            stack.push(child);
        }
    }
    order
}

fn postorder(nodes: &[Node], root: NodeId) -> Vec<NodeId> {
    // Reverse of a root-first walk that visits right children first.
    let mut order = Vec::with_capacity(nodes.len());
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        order.push(id);
        for &child in &nodes[id].children {
            stack.push(child);
        }
    }
    order.reverse();
    order
}

impl Summarizable for PhyloTree {
    fn summary(&self) -> String {
        let leaves = self.leaf_count();
        format!(
            "PhyloTree: {} nodes ({} leaves, {} internal), total length {:.4}",
            self.node_count(),
            leaves,
            self.node_count() - leaves,
            self.total_length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> PhyloTree {
        PhyloTree::from_newick("((A:0.1,B:0.2)AB:0.3,(C:0.4,D:0.5)CD:0.6)root;").unwrap()
    }

    #[test]
    fn leaf_and_internal_counts() {
        let tree = sample_tree();
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.leaf_names(), vec!["A", "B", "C", "D"]);
        let internal: Vec<&str> = tree.internal_nodes().iter().map(|&i| tree.name(i)).collect();
        assert_eq!(internal, vec!["root", "AB", "CD"]);
    }

    #[test]
    fn cached_orders() {
        let tree = sample_tree();
        let pre: Vec<&str> = tree.pre_order().iter().map(|&i| tree.name(i)).collect();
        assert_eq!(pre, vec!["root", "AB", "A", "B", "CD", "C", "D"]);
        let post: Vec<&str> = tree.post_order().iter().map(|&i| tree.name(i)).collect();
        assert_eq!(post, vec!["A", "B", "AB", "C", "D", "CD", "root"]);
        assert_eq!(*tree.post_order().last().unwrap(), tree.root());
    }

    #[test]
    fn name_lookup() {
        let tree = sample_tree();
        let c = tree.node_id("C").unwrap();
        assert_eq!(tree.name(c), "C");
        assert!((tree.branch_length(c) - 0.4).abs() < 1e-12);
        assert_eq!(tree.name(tree.parent(c).unwrap()), "CD");
        assert!(matches!(tree.node_id("Z"), Err(SylvaError::Tree(_))));
    }

    #[test]
    fn with_branch_length_derives_copy() {
        let tree = sample_tree();
        let longer = tree.with_branch_length("A", 2.5).unwrap();
        let a = tree.node_id("A").unwrap();
        assert!((tree.branch_length(a) - 0.1).abs() < 1e-12);
        assert!((longer.branch_length(a) - 2.5).abs() < 1e-12);
        assert!(tree.with_branch_length("A", -1.0).is_err());
        assert!(tree.with_branch_length("nope", 1.0).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = PhyloTree::from_newick("((A:0.1,A:0.2)X:0.1,C:0.3)R;").unwrap_err();
        assert!(matches!(err, SylvaError::Tree(_)));
    }

    #[test]
    fn rejects_negative_branch() {
        assert!(PhyloTree::from_newick("(A:-0.1,B:0.2)R;").is_err());
    }

    #[test]
    fn rejects_inconsistent_links() {
        let mut root = Node::new(0, "R", 0.0);
        root.children = vec![1];
        let child = Node::new(1, "A", 0.1); // parent missing
        assert!(PhyloTree::from_nodes(vec![root, child], 0).is_err());
    }

    #[test]
    fn summary_format() {
        let tree = sample_tree();
        assert_eq!(
            tree.summary(),
            "PhyloTree: 7 nodes (4 leaves, 3 internal), total length 2.1000"
        );
    }
}
