//! Restrictions on the states nodes may take.
//!
//! A [`Constrainer`] hands out a [`SiteConstraints`] per site, given its
//! index and its leaf states. The reconstructors exclude disallowed internal
//! states, and the simulator rejects draws whose full assignment is not
//! admitted.

use std::collections::BTreeMap;

use sylva_core::{Result, SylvaError};

use crate::alignment::Site;
use crate::alphabet::{Alphabet, StateSet};
use crate::tree::{NodeId, PhyloTree};

/// Allowed states per node for one site. Nodes without an entry may take
/// any state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteConstraints {
    allowed: BTreeMap<NodeId, StateSet>,
}

impl SiteConstraints {
    /// No restrictions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `node` to `states`, intersecting with any earlier restriction.
    pub fn restrict(&mut self, node: NodeId, states: StateSet) {
        let entry = self.allowed.entry(node).or_insert(states);
        *entry = entry.intersect(states);
    }

    /// States `node` may take, out of `full`.
    pub fn allowed(&self, node: NodeId, full: StateSet) -> StateSet {
        self.allowed.get(&node).map_or(full, |s| s.intersect(full))
    }

    /// True if `node` may take `state`.
    pub fn permits(&self, node: NodeId, state: usize) -> bool {
        self.allowed.get(&node).map_or(true, |s| s.contains(state))
    }

    /// True if a full assignment (`states[node]`) satisfies every restriction.
    pub fn admits(&self, states: &[usize]) -> bool {
        self.allowed
            .iter()
            .all(|(&node, set)| states.get(node).is_some_and(|&s| set.contains(s)))
    }

    /// True if nothing is restricted.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Source of per-site constraints.
pub trait Constrainer: Send + Sync {
    /// Constraints for the site at `index` whose leaf states are `site`.
    fn site(&self, index: usize, site: &Site) -> SiteConstraints;
}

impl<F> Constrainer for F
where
    F: Fn(usize, &Site) -> SiteConstraints + Send + Sync,
{
    fn site(&self, index: usize, site: &Site) -> SiteConstraints {
        self(index, site)
    }
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConstraints;

impl Constrainer for NoConstraints {
    fn site(&self, _index: usize, _site: &Site) -> SiteConstraints {
        SiteConstraints::new()
    }
}

/// The same node restrictions at every site.
#[derive(Debug, Clone)]
pub struct NodeConstraints<'a> {
    tree: &'a PhyloTree,
    alphabet: &'a Alphabet,
    constraints: SiteConstraints,
}

impl<'a> NodeConstraints<'a> {
    /// No restrictions yet.
    pub fn new(tree: &'a PhyloTree, alphabet: &'a Alphabet) -> Self {
        Self {
            tree,
            alphabet,
            constraints: SiteConstraints::new(),
        }
    }

    /// Restrict the node named `node` to the states named by `symbols`
    /// (state symbols or ambiguity codes).
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Tree`] for an unknown node and
    /// [`SylvaError::Likelihood`] for an unknown symbol.
    pub fn restrict(mut self, node: &str, symbols: &str) -> Result<Self> {
        let id = self.tree.node_id(node)?;
        let mut set = StateSet::EMPTY;
        for c in symbols.chars() {
            let s = self
                .alphabet
                .parse(c)
                .map_err(|_| SylvaError::Likelihood(format!("unknown state symbol '{}'", c)))?;
            set = set.union(s);
        }
        self.constraints.restrict(id, set);
        Ok(self)
    }
}

impl Constrainer for NodeConstraints<'_> {
    fn site(&self, _index: usize, _site: &Site) -> SiteConstraints {
        self.constraints.clone()
    }
}

/// Explicit constraints per site index; sites past the end are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct PerSiteConstraints {
    sites: Vec<SiteConstraints>,
}

impl PerSiteConstraints {
    /// Wrap a list of site constraints.
    pub fn new(sites: Vec<SiteConstraints>) -> Self {
        Self { sites }
    }
}

impl Constrainer for PerSiteConstraints {
    fn site(&self, index: usize, _site: &Site) -> SiteConstraints {
        self.sites.get(index).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_constraints_membership() {
        let mut c = SiteConstraints::new();
        assert!(c.is_empty());
        c.restrict(2, StateSet::from_states([0, 1]));
        c.restrict(2, StateSet::from_states([1, 3]));
        assert!(c.permits(2, 1));
        assert!(!c.permits(2, 0));
        assert!(c.permits(5, 3));
        assert_eq!(c.allowed(2, StateSet::full(4)), StateSet::single(1));
        assert!(c.admits(&[0, 0, 1]));
        assert!(!c.admits(&[0, 0, 3]));
    }

    #[test]
    fn node_constraints_by_name() {
        let tree = PhyloTree::from_newick("((a:1,b:1)X:1,c:1)R;").unwrap();
        let dna = Alphabet::dna();
        let nc = NodeConstraints::new(&tree, &dna).restrict("X", "R").unwrap();
        let x = tree.node_id("X").unwrap();
        let site = nc.site(17, &Site::new(Vec::<(String, StateSet)>::new()));
        assert!(site.permits(x, 0) && site.permits(x, 2));
        assert!(!site.permits(x, 1));
        assert!(matches!(
            NodeConstraints::new(&tree, &dna).restrict("Q", "A"),
            Err(SylvaError::Tree(_))
        ));
        assert!(matches!(
            NodeConstraints::new(&tree, &dna).restrict("X", "@"),
            Err(SylvaError::Likelihood(_))
        ));
    }

    #[test]
    fn per_site_and_none() {
        let mut one = SiteConstraints::new();
        one.restrict(0, StateSet::single(1));
        let per = PerSiteConstraints::new(vec![SiteConstraints::new(), one.clone()]);
        let empty = Site::new(Vec::<(String, StateSet)>::new());
        assert!(per.site(0, &empty).is_empty());
        assert_eq!(per.site(1, &empty), one);
        assert!(per.site(9, &empty).is_empty());
        assert!(NoConstraints.site(3, &empty).is_empty());
    }

    #[test]
    fn closures_see_site_content() {
        let tree = PhyloTree::from_newick("((a:1,b:1)X:1,c:1)R;").unwrap();
        let dna = Alphabet::dna();
        let x = tree.node_id("X").unwrap();
        // Pin X to whatever leaf `a` shows.
        let follow_a = |_: usize, site: &Site| {
            let mut c = SiteConstraints::new();
            if let Ok(set) = site.get("a") {
                c.restrict(x, set);
            }
            c
        };
        let site = Site::from_symbols(&dna, &["a", "b", "c"], "GTT").unwrap();
        let pinned = follow_a.site(0, &site);
        assert_eq!(pinned.allowed(x, dna.full()), StateSet::single(2));
        let other = Site::from_symbols(&dna, &["a", "b", "c"], "CTT").unwrap();
        assert_eq!(follow_a.site(0, &other).allowed(x, dna.full()), StateSet::single(1));
    }
}
