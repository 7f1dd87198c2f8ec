//! Marginal ancestral state reconstruction.
//!
//! Two passes per site and rate category:
//! 1. **Down (post-order):** pruning gives the likelihood of the data below
//!    each node for every state.
//! 2. **Outside (pre-order):** starting from the root frequencies, each node
//!    receives the likelihood of everything outside its subtree:
//!    `out(v,s) = Σ_a out(p,a) · P_v[a][s] · Π_{siblings w} Σ_b P_w[a][b] · down(w,b)`.
//!
//! The posterior of state `s` at `v` is proportional to
//! `Σ_c w_c · down_c(v,s) · out_c(v,s)`.

use std::marker::PhantomData;

use sylva_core::{Real, Result, ScaledReal, SylvaError};
use tracing::debug_span;

use crate::alignment::{Alignment, Site};
use crate::alphabet::Alphabet;
use crate::constraints::{Constrainer, NoConstraints};
use crate::likelihood::{check_taxa, map_sites, propagate, prune, root_weights, site_seeds};
use crate::probabilities::Probabilities;
use crate::tree::{NodeId, PhyloTree};

/// Posteriors within this of the largest count as tied.
const TIE_TOLERANCE: f64 = 1e-12;

/// Posterior distributions at the internal nodes of one site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteMarginals {
    probabilities: Vec<Vec<f64>>,
    map_states: Vec<usize>,
}

impl SiteMarginals {
    /// Posterior over states at the `i`-th internal node (pre-order).
    pub fn distribution(&self, i: usize) -> &[f64] {
        &self.probabilities[i]
    }

    /// Most probable state at the `i`-th internal node; the first state in
    /// alphabet order wins ties.
    pub fn map_state(&self, i: usize) -> usize {
        self.map_states[i]
    }
}

/// Marginal reconstruction of an alignment, in original site order.
#[derive(Debug, Clone)]
pub struct MarginalReconstruction {
    nodes: Vec<NodeId>,
    node_names: Vec<String>,
    alphabet: Alphabet,
    sites: Vec<SiteMarginals>,
}

impl MarginalReconstruction {
    /// Number of sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// True if there are no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Internal node ids, in the order tables are indexed.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Per-site tables.
    pub fn sites(&self) -> &[SiteMarginals] {
        &self.sites
    }

    fn node_index(&self, node: &str) -> Result<usize> {
        self.node_names
            .iter()
            .position(|n| n == node)
            .ok_or_else(|| SylvaError::Likelihood(format!("no internal node named '{}'", node)))
    }

    fn site(&self, site: usize) -> Result<&SiteMarginals> {
        self.sites
            .get(site)
            .ok_or_else(|| SylvaError::Likelihood(format!("site {} out of range", site)))
    }

    /// Posterior probability that `node` is in state `symbol` at `site`.
    pub fn probability(&self, site: usize, node: &str, symbol: char) -> Result<f64> {
        let i = self.node_index(node)?;
        let s = self
            .alphabet
            .state_index(symbol)
            .ok_or_else(|| SylvaError::Likelihood(format!("unknown state symbol '{}'", symbol)))?;
        Ok(self.site(site)?.probabilities[i][s])
    }

    /// Posterior over all states of `node` at `site`.
    pub fn distribution(&self, site: usize, node: &str) -> Result<&[f64]> {
        let i = self.node_index(node)?;
        Ok(self.site(site)?.distribution(i))
    }

    /// Most probable symbol at `node` for `site`.
    pub fn map_symbol(&self, site: usize, node: &str) -> Result<char> {
        let i = self.node_index(node)?;
        let s = self.site(site)?.map_state(i);
        self.alphabet
            .symbol(s)
            .ok_or_else(|| SylvaError::Likelihood(format!("state {} has no symbol", s)))
    }
}

/// Computes marginal posteriors at internal nodes.
pub struct MarginalReconstructor<'a, R: Real = ScaledReal> {
    tree: &'a PhyloTree,
    alphabet: &'a Alphabet,
    constrainer: &'a dyn Constrainer,
    _real: PhantomData<R>,
}

impl<'a, R: Real> MarginalReconstructor<'a, R> {
    /// Unconstrained reconstructor.
    pub fn new(tree: &'a PhyloTree, alphabet: &'a Alphabet) -> Self {
        Self {
            tree,
            alphabet,
            constrainer: &NoConstraints,
            _real: PhantomData,
        }
    }

    /// Restrict internal node states.
    pub fn with_constraints(mut self, constrainer: &'a dyn Constrainer) -> Self {
        self.constrainer = constrainer;
        self
    }

    /// Reconstruct every site of `alignment` under `probs`.
    pub fn calculate(
        &self,
        probs: &Probabilities,
        alignment: &Alignment,
    ) -> Result<MarginalReconstruction> {
        let span = debug_span!("marginal", sites = alignment.len());
        let _enter = span.enter();
        probs.check_tree(self.tree)?;
        check_taxa(self.tree, alignment)?;
        if probs.n_states() != self.alphabet.len() {
            return Err(SylvaError::Model(format!(
                "snapshot has {} states, alphabet has {}",
                probs.n_states(),
                self.alphabet.len()
            )));
        }

        let sites = map_sites(alignment.sites(), |i, site| self.site(probs, i, site))?;
        let nodes = self.tree.internal_nodes();
        let node_names = nodes.iter().map(|&v| self.tree.name(v).to_string()).collect();
        Ok(MarginalReconstruction {
            nodes,
            node_names,
            alphabet: self.alphabet.clone(),
            sites,
        })
    }

    /// Reconstruct a single site; `index` selects its constraints.
    pub fn site(
        &self,
        probs: &Probabilities,
        index: usize,
        site: &Site,
    ) -> Result<SiteMarginals> {
        let tree = self.tree;
        let n = probs.n_states();
        let full = self.alphabet.full();
        let constraints = self.constrainer.site(index, site);

        let mut seeds = site_seeds(tree, site, n)?;
        let internal = tree.internal_nodes();
        for &v in &internal {
            seeds[v] = constraints.allowed(v, full);
        }
        let down = prune::<R>(probs, tree, &seeds);
        if down.total().is_zero() {
            return Err(SylvaError::Likelihood(format!(
                "site {} has zero likelihood under the constraints",
                index
            )));
        }

        // raw[v][s] = Σ_c w_c · down_c(v,s) · out_c(v,s)
        let mut raw = vec![vec![R::zero(); n]; tree.node_count()];
        for (c, cat) in probs.categories().iter().enumerate() {
            let w = R::from_f64(cat.weight());
            let mut outside = vec![vec![R::zero(); n]; tree.node_count()];
            outside[tree.root()] = root_weights(cat.root(), down.partial(c, tree.root()));

            // Messages from each non-root node to its parent.
            let mut msg: Vec<Vec<R>> = vec![Vec::new(); tree.node_count()];
            for &v in tree.pre_order() {
                if tree.parent(v).is_some() {
                    msg[v] = propagate(cat.matrix(v), down.partial(c, v));
                }
            }

            for &v in tree.pre_order() {
                let Some(p) = tree.parent(v) else { continue };
                // Everything at the parent except v's own subtree.
                let above: Vec<R> = (0..n)
                    .map(|a| {
                        if !seeds[p].contains(a) {
                            return R::zero();
                        }
                        let mut x = outside[p][a];
                        for &w in tree.children(p) {
                            if w != v {
                                x = x * msg[w][a];
                            }
                        }
                        x
                    })
                    .collect();
                let m = cat.matrix(v);
                outside[v] = (0..n)
                    .map(|s| {
                        (0..n).fold(R::zero(), |acc, a| acc + above[a] * R::from_f64(m[a][s]))
                    })
                    .collect();
            }

            for &v in &internal {
                let d = down.partial(c, v);
                for s in 0..n {
                    raw[v][s] = raw[v][s] + w * d[s] * outside[v][s];
                }
            }
        }

        let mut probabilities = Vec::with_capacity(internal.len());
        let mut map_states = Vec::with_capacity(internal.len());
        for &v in &internal {
            let total = raw[v].iter().fold(R::zero(), |acc, &x| acc + x);
            let dist: Vec<f64> = raw[v].iter().map(|&x| (x / total).to_f64()).collect();
            let top = dist.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let best = dist.iter().position(|&p| p >= top - TIE_TOLERANCE).unwrap_or(0);
            probabilities.push(dist);
            map_states.push(best);
        }
        Ok(SiteMarginals {
            probabilities,
            map_states,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::constraints::NodeConstraints;
    use crate::likelihood::tests::{
        enumerate_assignments, gtr_gamma, primate_alignment, primate_tree,
    };
    use crate::model::{EqualRates, Model};
    use crate::parameters::Parameters;
    use approx::assert_abs_diff_eq;

    fn primate_setup() -> (PhyloTree, Alignment, Probabilities) {
        let (model, params) = gtr_gamma();
        let tree = primate_tree();
        let probs = Probabilities::new(&model, &tree, &params, &EngineConfig::default()).unwrap();
        (tree, primate_alignment(), probs)
    }

    #[test]
    fn posteriors_sum_to_one() {
        let (tree, aln, probs) = primate_setup();
        let dna = Alphabet::dna();
        let rec = MarginalReconstructor::<ScaledReal>::new(&tree, &dna)
            .calculate(&probs, &aln)
            .unwrap();
        assert_eq!(rec.len(), aln.len());
        for site in rec.sites() {
            for i in 0..rec.nodes().len() {
                let sum: f64 = site.distribution(i).iter().sum();
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn matches_enumeration() {
        let (tree, aln, probs) = primate_setup();
        let dna = Alphabet::dna();
        let rec = MarginalReconstructor::<f64>::new(&tree, &dna)
            .calculate(&probs, &aln)
            .unwrap();
        for (i, site) in aln.sites().iter().enumerate() {
            let table = enumerate_assignments(&probs, &tree, site);
            let total: f64 = table.iter().map(|(_, p)| p.iter().sum::<f64>()).sum();
            for name in ["A", "B", "C"] {
                let v = tree.node_id(name).unwrap();
                for (s, symbol) in ['A', 'C', 'G', 'T'].into_iter().enumerate() {
                    let mass: f64 = table
                        .iter()
                        .filter(|(states, _)| states[v] == s)
                        .map(|(_, p)| p.iter().sum::<f64>())
                        .sum();
                    let got = rec.probability(i, name, symbol).unwrap();
                    assert_abs_diff_eq!(got, mass / total, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn identical_leaves_reconstruct_their_state() {
        let tree = PhyloTree::from_newick("((a:0.1,b:0.1)X:0.1,c:0.1)R;").unwrap();
        let dna = Alphabet::dna();
        let aln = Alignment::from_sequences(&dna, &["a", "b", "c"], &["GG", "GG", "GG"]).unwrap();
        let model = Model::single(dna.clone(), EqualRates::new(4)).unwrap();
        let probs = Probabilities::new(&model, &tree, &Parameters::new(), &EngineConfig::default())
            .unwrap();
        let rec = MarginalReconstructor::<ScaledReal>::new(&tree, &dna)
            .calculate(&probs, &aln)
            .unwrap();
        for site in 0..2 {
            assert_eq!(rec.map_symbol(site, "X").unwrap(), 'G');
            assert_eq!(rec.map_symbol(site, "R").unwrap(), 'G');
        }
    }

    #[test]
    fn lookups_fail_cleanly() {
        let (tree, aln, probs) = primate_setup();
        let dna = Alphabet::dna();
        let rec = MarginalReconstructor::<ScaledReal>::new(&tree, &dna)
            .calculate(&probs, &aln)
            .unwrap();
        assert!(matches!(rec.probability(0, "Z", 'A'), Err(SylvaError::Likelihood(_))));
        assert!(matches!(rec.probability(0, "A", 'Q'), Err(SylvaError::Likelihood(_))));
        assert!(matches!(rec.probability(0, "Human", 'A'), Err(SylvaError::Likelihood(_))));
        assert!(matches!(rec.distribution(999, "A"), Err(SylvaError::Likelihood(_))));
    }

    #[test]
    fn constraints_pin_internal_states() {
        let (tree, aln, probs) = primate_setup();
        let dna = Alphabet::dna();
        let pinned = NodeConstraints::new(&tree, &dna).restrict("B", "CT").unwrap();
        let rec = MarginalReconstructor::<ScaledReal>::new(&tree, &dna)
            .with_constraints(&pinned)
            .calculate(&probs, &aln)
            .unwrap();
        for i in 0..aln.len() {
            let d = rec.distribution(i, "B").unwrap();
            assert_eq!(d[0], 0.0);
            assert_eq!(d[2], 0.0);
            assert_abs_diff_eq!(d[1] + d[3], 1.0, epsilon = 1e-9);
        }
    }
}
