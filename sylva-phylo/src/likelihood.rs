//! Felsenstein pruning over a transition-probability snapshot.
//!
//! The engine is generic over the [`Real`] representation used for partial
//! likelihoods; the default, [`ScaledReal`], carries a separate binary
//! exponent and cannot underflow on large trees.
//!
//! [`Calculator`] evaluates one model on one tree for a whole alignment,
//! compressing identical sites first. [`ClassCalculator`] assigns each site
//! class its own model and tree and sums the results.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use sylva_core::{Real, Result, ScaledReal, SylvaError};
use tracing::{debug, debug_span};

use crate::alignment::{Alignment, Site};
use crate::alphabet::StateSet;
use crate::config::EngineConfig;
use crate::model::Model;
use crate::parameters::Parameters;
use crate::probabilities::{Probabilities, RootDistribution};
use crate::tree::{NodeId, PhyloTree};

/// Partial likelihoods of one site.
#[derive(Debug, Clone)]
pub struct SiteLikelihood<R: Real = ScaledReal> {
    partials: Vec<Vec<Vec<R>>>,
    categories: Vec<R>,
    total: R,
    best_category: usize,
}

impl<R: Real> SiteLikelihood<R> {
    /// Conditional likelihoods of the subtree below `node` under category `c`,
    /// one per state.
    pub fn partial(&self, c: usize, node: NodeId) -> &[R] {
        &self.partials[c][node]
    }

    /// Site likelihood under category `c`, unweighted.
    pub fn category(&self, c: usize) -> R {
        self.categories[c]
    }

    /// Mixture likelihood `Σ_c w_c L_c`.
    pub fn total(&self) -> R {
        self.total
    }

    /// Natural log of [`total`](Self::total).
    pub fn ln(&self) -> f64 {
        self.total.to_ln()
    }

    /// Category maximizing `w_c L_c`; the lowest index wins ties.
    pub fn best_category(&self) -> usize {
        self.best_category
    }
}

/// Per-node state sets a site is seeded with: observed sets at leaves,
/// the full alphabet at internal nodes.
pub(crate) fn site_seeds(tree: &PhyloTree, site: &Site, n_states: usize) -> Result<Vec<StateSet>> {
    let mut seeds = vec![StateSet::full(n_states); tree.node_count()];
    for leaf in tree.leaves() {
        seeds[leaf] = site.get(tree.name(leaf))?;
    }
    Ok(seeds)
}

/// Check that alignment taxa and tree leaves are the same set.
pub(crate) fn check_taxa(tree: &PhyloTree, alignment: &Alignment) -> Result<()> {
    let leaves = tree.leaf_names();
    for taxon in alignment.taxa() {
        match tree.node_id(taxon) {
            Ok(id) if tree.is_leaf(id) => {}
            _ => {
                return Err(SylvaError::Alignment(format!(
                    "taxon '{}' is not a leaf of the tree",
                    taxon
                )))
            }
        }
    }
    if let Some(missing) = leaves
        .iter()
        .find(|l| !alignment.taxa().iter().any(|t| t == *l))
    {
        return Err(SylvaError::Alignment(format!(
            "leaf '{}' has no data in the alignment",
            missing
        )));
    }
    Ok(())
}

/// `Σ_b P[a][b] · partial[b]` for every parent state `a`.
pub(crate) fn propagate<R: Real>(p: &[Vec<f64>], partial: &[R]) -> Vec<R> {
    p.iter()
        .map(|row| {
            row.iter()
                .zip(partial)
                .fold(R::zero(), |acc, (&pab, &l)| acc + R::from_f64(pab) * l)
        })
        .collect()
}

/// Root frequencies of a category for a site with root partials `root`.
///
/// FitzJohn weights each state by its share of the root likelihood.
pub(crate) fn root_weights<R: Real>(dist: &RootDistribution, root: &[R]) -> Vec<R> {
    match dist {
        RootDistribution::Fixed(f) => f.iter().map(|&x| R::from_f64(x)).collect(),
        RootDistribution::FitzJohn { .. } => {
            let sum = root.iter().fold(R::zero(), |acc, &l| acc + l);
            if sum.is_zero() {
                vec![R::zero(); root.len()]
            } else {
                root.iter().map(|&l| l / sum).collect()
            }
        }
    }
}

/// Run the pruning pass for one site.
///
/// `seeds[v]` restricts the states of node `v`: leaves get their observed
/// set, internal nodes the set they are constrained to.
pub(crate) fn prune<R: Real>(
    probs: &Probabilities,
    tree: &PhyloTree,
    seeds: &[StateSet],
) -> SiteLikelihood<R> {
    let n = probs.n_states();
    let root = tree.root();
    let mut partials = Vec::with_capacity(probs.n_categories());
    let mut categories = Vec::with_capacity(probs.n_categories());
    let mut total = R::zero();
    let mut best = (0usize, R::zero());

    for (c, cat) in probs.categories().iter().enumerate() {
        let mut part: Vec<Vec<R>> = seeds
            .iter()
            .map(|s| {
                (0..n)
                    .map(|i| if s.contains(i) { R::one() } else { R::zero() })
                    .collect()
            })
            .collect();

        for &id in tree.post_order() {
            if let Some(parent) = tree.parent(id) {
                let msg = propagate(cat.matrix(id), &part[id]);
                for (a, m) in msg.into_iter().enumerate() {
                    part[parent][a] = part[parent][a] * m;
                }
            }
        }

        let pi = root_weights(cat.root(), &part[root]);
        let lc = pi
            .iter()
            .zip(&part[root])
            .fold(R::zero(), |acc, (&f, &l)| acc + f * l);
        let weighted = R::from_f64(cat.weight()) * lc;
        total = total + weighted;
        if c == 0 || weighted > best.1 {
            best = (c, weighted);
        }
        categories.push(lc);
        partials.push(part);
    }

    SiteLikelihood {
        partials,
        categories,
        total,
        best_category: best.0,
    }
}

/// Apply `f` to every `(index, site)`, in parallel with the `parallel`
/// feature. Results keep site order.
pub(crate) fn map_sites<T, F>(sites: &[Site], f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, &Site) -> Result<T> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        sites.par_iter().enumerate().map(|(i, s)| f(i, s)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        sites.iter().enumerate().map(|(i, s)| f(i, s)).collect()
    }
}

/// Likelihood of an alignment, reported in original site order.
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodResult {
    /// `Σ multiplicity · ln L(site)`.
    pub log_likelihood: f64,
    /// Log-likelihood of one copy of each site.
    pub site_log_likelihoods: Vec<f64>,
    /// Per site, unweighted log-likelihood under each expanded category.
    pub category_log_likelihoods: Vec<Vec<f64>>,
    /// Per site, the category maximizing weight times likelihood.
    pub best_categories: Vec<usize>,
}

/// Evaluates one model on one tree for a whole alignment.
#[derive(Debug, Clone)]
pub struct Calculator<R: Real = ScaledReal> {
    model: Model,
    tree: PhyloTree,
    unique: Alignment,
    site_map: Vec<usize>,
    multiplicities: Vec<usize>,
    config: EngineConfig,
    _real: PhantomData<R>,
}

impl<R: Real> Calculator<R> {
    /// Prepare a calculator. The alignment is compressed once here.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Alignment`] if the alignment taxa and the
    /// tree leaves differ.
    pub fn new(
        model: Model,
        tree: PhyloTree,
        alignment: &Alignment,
        config: EngineConfig,
    ) -> Result<Self> {
        check_taxa(&tree, alignment)?;
        let (unique, site_map) = alignment.compress();
        let multiplicities = alignment.sites().iter().map(|s| s.multiplicity()).collect();
        debug!(
            sites = alignment.len(),
            unique = unique.len(),
            "compressed alignment"
        );
        Ok(Self {
            model,
            tree,
            unique,
            site_map,
            multiplicities,
            config,
            _real: PhantomData,
        })
    }

    /// The model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The tree.
    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of distinct site patterns.
    pub fn unique_sites(&self) -> usize {
        self.unique.len()
    }

    /// Build the transition-probability snapshot for `params`.
    pub fn probabilities(&self, params: &Parameters) -> Result<Probabilities> {
        Probabilities::new(&self.model, &self.tree, params, &self.config)
    }

    /// Log-likelihood of the alignment at `params`.
    pub fn calculate(&self, params: &Parameters) -> Result<LikelihoodResult> {
        let probs = self.probabilities(params)?;
        self.evaluate(&probs)
    }

    /// Log-likelihood of the alignment under an existing snapshot.
    pub fn evaluate(&self, probs: &Probabilities) -> Result<LikelihoodResult> {
        let span = debug_span!("likelihood", unique_sites = self.unique.len());
        let _enter = span.enter();
        probs.check_tree(&self.tree)?;

        let per_unique: Vec<SiteLikelihood<R>> =
            map_sites(self.unique.sites(), |_, site| self.site_likelihood(probs, site))?;

        let unique_ln: Vec<f64> = per_unique.iter().map(|s| s.ln()).collect();
        let log_likelihood = self
            .unique
            .sites()
            .iter()
            .zip(&unique_ln)
            .map(|(s, &ll)| s.multiplicity() as f64 * ll)
            .sum();

        let mut result = LikelihoodResult {
            log_likelihood,
            site_log_likelihoods: Vec::with_capacity(self.site_map.len()),
            category_log_likelihoods: Vec::with_capacity(self.site_map.len()),
            best_categories: Vec::with_capacity(self.site_map.len()),
        };
        for &u in &self.site_map {
            let s = &per_unique[u];
            result.site_log_likelihoods.push(unique_ln[u]);
            result
                .category_log_likelihoods
                .push((0..probs.n_categories()).map(|c| s.category(c).to_ln()).collect());
            result.best_categories.push(s.best_category());
        }
        debug!(log_likelihood, "calculated likelihood");
        Ok(result)
    }

    /// Partial likelihoods of a single site.
    pub fn site_likelihood(&self, probs: &Probabilities, site: &Site) -> Result<SiteLikelihood<R>> {
        let seeds = site_seeds(&self.tree, site, probs.n_states())?;
        Ok(prune(probs, &self.tree, &seeds))
    }

    /// Multiplicity of every original site.
    pub fn multiplicities(&self) -> &[usize] {
        &self.multiplicities
    }
}

/// Evaluates alignments whose site classes use different models and trees.
#[derive(Debug, Clone)]
pub struct ClassCalculator<R: Real = ScaledReal> {
    classes: BTreeMap<String, (Calculator<R>, Vec<usize>)>,
    n_sites: usize,
}

impl<R: Real> ClassCalculator<R> {
    /// Assign each class label a model and tree.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Alignment`] if a site's class has no model, or
    /// a class tree does not match the alignment taxa.
    pub fn new(
        classes: Vec<(String, Model, PhyloTree)>,
        alignment: &Alignment,
        config: EngineConfig,
    ) -> Result<Self> {
        let mut by_label: BTreeMap<String, (Model, PhyloTree)> = BTreeMap::new();
        for (label, model, tree) in classes {
            by_label.insert(label, (model, tree));
        }

        let mut split: BTreeMap<&str, (Alignment, Vec<usize>)> = BTreeMap::new();
        for (i, site) in alignment.sites().iter().enumerate() {
            if !by_label.contains_key(site.class()) {
                return Err(SylvaError::Alignment(format!(
                    "site {} has class '{}' without a model",
                    i,
                    site.class()
                )));
            }
            let entry = match split.entry(site.class()) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(e) => {
                    e.insert((Alignment::new(alignment.taxa().iter().cloned())?, Vec::new()))
                }
            };
            entry.0.push(site.clone())?;
            entry.1.push(i);
        }

        let mut out = BTreeMap::new();
        for (label, (sub, indices)) in split {
            let (model, tree) = by_label
                .remove(label)
                .ok_or_else(|| SylvaError::Alignment(format!("no model for class '{}'", label)))?;
            let calc = Calculator::new(model, tree, &sub, config.clone())?;
            out.insert(label.to_string(), (calc, indices));
        }
        Ok(Self {
            classes: out,
            n_sites: alignment.len(),
        })
    }

    /// Calculator of one class.
    pub fn class(&self, label: &str) -> Option<&Calculator<R>> {
        self.classes.get(label).map(|(c, _)| c)
    }

    /// Sum of class log-likelihoods, with per-site values in original order.
    pub fn calculate(&self, params: &Parameters) -> Result<LikelihoodResult> {
        let mut result = LikelihoodResult {
            log_likelihood: 0.0,
            site_log_likelihoods: vec![0.0; self.n_sites],
            category_log_likelihoods: vec![Vec::new(); self.n_sites],
            best_categories: vec![0; self.n_sites],
        };
        for (calc, indices) in self.classes.values() {
            let r = calc.calculate(params)?;
            result.log_likelihood += r.log_likelihood;
            for (k, &i) in indices.iter().enumerate() {
                result.site_log_likelihoods[i] = r.site_log_likelihoods[k];
                result.category_log_likelihoods[i] = r.category_log_likelihoods[k].clone();
                result.best_categories[i] = r.best_categories[k];
            }
        }
        Ok(result)
    }
}
