//! Joint ancestral state reconstruction.
//!
//! Finds, per site, the assignment of states to every internal node that
//! maximizes `max_c w_c · P(data, ancestral states | c)`.
//!
//! - [`DynamicProgramming`]: a Pupko-style sweep. Post-order, each node
//!   records for every parent state the best value of its branch and
//!   subtree; states are then fixed top-down from the root.
//! - [`BranchAndBound`]: depth-first enumeration of internal states in
//!   pre-order, cutting partial assignments whose optimistic completion
//!   falls short.
//!
//! Ties are broken the same way by both. The best log value `M` over all
//! categories is found first. The result is then the first category, and
//! within it the first assignment (states in alphabet order, nodes in
//! pre-order), whose value is at least `M - TIE_TOLERANCE`.

use sylva_core::{Real, Result, ScaledReal, SylvaError};
use tracing::{debug, debug_span};

use crate::alignment::{Alignment, Site};
use crate::alphabet::{Alphabet, StateSet};
use crate::config::{EngineConfig, JointStrategy};
use crate::constraints::{Constrainer, NoConstraints};
use crate::likelihood::{check_taxa, map_sites, prune, root_weights, site_seeds};
use crate::probabilities::{Probabilities, RootDistribution};
use crate::tree::{NodeId, PhyloTree};

/// Log-likelihood differences at or below this are ties.
pub const TIE_TOLERANCE: f64 = 1e-9;

/// Best joint assignment of one site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteAssignment {
    states: Vec<usize>,
    category: usize,
    log_likelihood: f64,
}

impl SiteAssignment {
    /// State of each internal node, in pre-order.
    pub fn states(&self) -> &[usize] {
        &self.states
    }

    /// Rate category the assignment was found under.
    pub fn category(&self) -> usize {
        self.category
    }

    /// `ln(w_c · P(data, states | c))`.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }
}

/// Joint reconstruction of an alignment, in original site order.
#[derive(Debug, Clone)]
pub struct JointReconstruction {
    nodes: Vec<NodeId>,
    node_names: Vec<String>,
    alphabet: Alphabet,
    sites: Vec<SiteAssignment>,
}

impl JointReconstruction {
    /// Number of sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// True if there are no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Internal node ids in pre-order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Per-site assignments.
    pub fn sites(&self) -> &[SiteAssignment] {
        &self.sites
    }

    fn lookup(&self, site: usize, node: &str) -> Result<usize> {
        let i = self
            .node_names
            .iter()
            .position(|n| n == node)
            .ok_or_else(|| SylvaError::Likelihood(format!("no internal node named '{}'", node)))?;
        let assignment = self
            .sites
            .get(site)
            .ok_or_else(|| SylvaError::Likelihood(format!("site {} out of range", site)))?;
        Ok(assignment.states[i])
    }

    /// Reconstructed state index of `node` at `site`.
    pub fn state(&self, site: usize, node: &str) -> Result<usize> {
        self.lookup(site, node)
    }

    /// Reconstructed symbol of `node` at `site`.
    pub fn symbol(&self, site: usize, node: &str) -> Result<char> {
        let s = self.lookup(site, node)?;
        self.alphabet
            .symbol(s)
            .ok_or_else(|| SylvaError::Likelihood(format!("state {} has no symbol", s)))
    }

    /// Internal-node sequences as an alignment, one taxon per internal node.
    pub fn to_alignment(&self) -> Result<Alignment> {
        let mut out = Alignment::new(self.node_names.iter().cloned())?;
        for site in &self.sites {
            out.push(Site::new(
                self.node_names
                    .iter()
                    .zip(&site.states)
                    .map(|(name, &s)| (name.clone(), StateSet::single(s))),
            ))?;
        }
        Ok(out)
    }
}

/// Joint ancestral reconstruction.
pub trait JointReconstructor: Send + Sync {
    /// The tree reconstructed on.
    fn tree(&self) -> &PhyloTree;

    /// The state alphabet.
    fn alphabet(&self) -> &Alphabet;

    /// Best assignment for one site; `index` selects its constraints.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Likelihood`] if no assignment admitted by the
    /// constraints has positive probability.
    fn reconstruct_site(
        &self,
        probs: &Probabilities,
        index: usize,
        site: &Site,
    ) -> Result<SiteAssignment>;

    /// Reconstruct every site of `alignment`.
    fn reconstruct(
        &self,
        probs: &Probabilities,
        alignment: &Alignment,
    ) -> Result<JointReconstruction> {
        let tree = self.tree();
        probs.check_tree(tree)?;
        check_taxa(tree, alignment)?;
        if probs.n_states() != self.alphabet().len() {
            return Err(SylvaError::Model(format!(
                "snapshot has {} states, alphabet has {}",
                probs.n_states(),
                self.alphabet().len()
            )));
        }
        let sites = map_sites(alignment.sites(), |i, site| {
            self.reconstruct_site(probs, i, site)
        })?;
        let nodes = tree.internal_nodes();
        let node_names = nodes.iter().map(|&v| tree.name(v).to_string()).collect();
        Ok(JointReconstruction {
            nodes,
            node_names,
            alphabet: self.alphabet().clone(),
            sites,
        })
    }
}

/// Choose a reconstructor for `config.joint_strategy`.
///
/// `Auto` picks branch-and-bound when `states^internal_nodes` is at most
/// `config.bnb_max_assignments`.
pub fn joint_reconstructor<'a>(
    config: &EngineConfig,
    tree: &'a PhyloTree,
    alphabet: &'a Alphabet,
    constrainer: &'a dyn Constrainer,
) -> Box<dyn JointReconstructor + 'a> {
    let use_bnb = match config.joint_strategy {
        JointStrategy::DynamicProgramming => false,
        JointStrategy::BranchAndBound => true,
        JointStrategy::Auto => {
            let internal = tree.internal_nodes().len() as u32;
            (alphabet.len() as u64)
                .checked_pow(internal)
                .is_some_and(|space| space <= config.bnb_max_assignments)
        }
    };
    debug!(
        strategy = if use_bnb { "branch-and-bound" } else { "dynamic-programming" },
        "selected joint reconstructor"
    );
    if use_bnb {
        Box::new(BranchAndBound::new(tree, alphabet).with_constraints(constrainer))
    } else {
        Box::new(DynamicProgramming::new(tree, alphabet).with_constraints(constrainer))
    }
}

/// Log-domain terms of one category for one site.
struct CategoryTerms {
    log_weight: f64,
    log_root: Vec<f64>,
    /// `ln P` on the branch above each internal non-root node.
    edge: Vec<Vec<Vec<f64>>>,
    /// Sum over leaf children of `ln Σ_{b observed} P[s][b]`, per internal node and state.
    own: Vec<Vec<f64>>,
}

/// Everything both algorithms need for one site.
struct SiteProblem {
    order: Vec<NodeId>,
    /// Pre-order position of each internal node's parent (0 for the root).
    parent_pos: Vec<usize>,
    allowed: Vec<StateSet>,
    categories: Vec<CategoryTerms>,
}

impl SiteProblem {
    fn new(
        probs: &Probabilities,
        tree: &PhyloTree,
        constrainer: &dyn Constrainer,
        full: StateSet,
        index: usize,
        site: &Site,
    ) -> Result<Self> {
        let n = probs.n_states();
        if tree.is_leaf(tree.root()) {
            return Err(SylvaError::Tree("tree has no internal nodes".into()));
        }
        let constraints = constrainer.site(index, site);
        let order = tree.internal_nodes();
        let mut position = vec![0usize; tree.node_count()];
        for (k, &v) in order.iter().enumerate() {
            position[v] = k;
        }
        let parent_pos = order
            .iter()
            .map(|&v| tree.parent(v).map_or(0, |p| position[p]))
            .collect();

        let mut seeds = site_seeds(tree, site, n)?;
        for &v in &order {
            seeds[v] = constraints.allowed(v, full);
            if seeds[v].is_empty() {
                return Err(SylvaError::Likelihood(format!(
                    "site {}: node '{}' has no admissible state",
                    index,
                    tree.name(v)
                )));
            }
        }

        let fitzjohn = probs
            .categories()
            .iter()
            .any(|c| matches!(c.root(), RootDistribution::FitzJohn { .. }));
        let down = fitzjohn.then(|| prune::<ScaledReal>(probs, tree, &seeds));

        let mut categories = Vec::with_capacity(probs.n_categories());
        for (c, cat) in probs.categories().iter().enumerate() {
            let log_root = match (cat.root(), &down) {
                (RootDistribution::FitzJohn { .. }, Some(d)) => {
                    root_weights(cat.root(), d.partial(c, tree.root()))
                        .iter()
                        .map(|x| x.to_ln())
                        .collect()
                }
                (root, _) => root.prior().iter().map(|x| x.ln()).collect(),
            };

            let mut edge: Vec<Vec<Vec<f64>>> = vec![Vec::new(); tree.node_count()];
            let mut own: Vec<Vec<f64>> = vec![Vec::new(); tree.node_count()];
            for &v in &order {
                let mut terms = vec![0.0; n];
                for &u in tree.children(v) {
                    let m = cat.matrix(u);
                    if tree.is_leaf(u) {
                        for (s, t) in terms.iter_mut().enumerate() {
                            *t += seeds[u].iter().map(|b| m[s][b]).sum::<f64>().ln();
                        }
                    } else {
                        edge[u] = m
                            .iter()
                            .map(|row| row.iter().map(|p| p.ln()).collect())
                            .collect();
                    }
                }
                own[v] = terms;
            }
            categories.push(CategoryTerms {
                log_weight: cat.weight().ln(),
                log_root,
                edge,
                own,
            });
        }

        Ok(Self {
            order,
            parent_pos,
            allowed: seeds,
            categories,
        })
    }

    /// Contribution of pre-order position `k` in state `s`, given the
    /// states already fixed at earlier positions.
    fn term(&self, terms: &CategoryTerms, k: usize, s: usize, states: &[usize]) -> f64 {
        let v = self.order[k];
        let own = terms.own[v][s];
        if k == 0 {
            terms.log_weight + terms.log_root[s] + own
        } else {
            terms.edge[v][states[self.parent_pos[k]]][s] + own
        }
    }

    /// Log value of a full assignment, summed in pre-order.
    fn score(&self, terms: &CategoryTerms, states: &[usize]) -> f64 {
        (0..states.len()).fold(0.0, |value, k| value + self.term(terms, k, states[k], states))
    }

    /// The first category whose optimum is within [`TIE_TOLERANCE`] of the
    /// best one, and the acceptance threshold for its assignment.
    fn threshold(maxima: &[f64], index: usize) -> Result<(usize, f64)> {
        let best = maxima.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if best == f64::NEG_INFINITY {
            return Err(SylvaError::Likelihood(format!(
                "site {} has no admissible ancestral assignment",
                index
            )));
        }
        let threshold = best - TIE_TOLERANCE;
        let category = maxima.iter().position(|&m| m >= threshold).unwrap_or(0);
        Ok((category, threshold))
    }
}

/// The first `(state, value)` reaching `threshold`, or the largest if none
/// does.
fn first_reaching(scores: &[(usize, f64)], threshold: f64) -> (usize, f64) {
    scores
        .iter()
        .copied()
        .find(|&(_, x)| x >= threshold)
        .or_else(|| scores.iter().copied().max_by(|a, b| a.1.total_cmp(&b.1)))
        .unwrap_or((0, f64::NEG_INFINITY))
}

/// Pupko's dynamic programming.
pub struct DynamicProgramming<'a> {
    tree: &'a PhyloTree,
    alphabet: &'a Alphabet,
    constrainer: &'a dyn Constrainer,
}

/// Subtree optima of one category.
struct Tables {
    /// `sub[v][s]`: best log value of the subtree below `v` with `v` in `s`.
    sub: Vec<Vec<f64>>,
    /// `msg[u][a]`: best value of `u`'s branch and subtree with its parent in `a`.
    msg: Vec<Vec<f64>>,
}

impl<'a> DynamicProgramming<'a> {
    /// Unconstrained reconstructor.
    pub fn new(tree: &'a PhyloTree, alphabet: &'a Alphabet) -> Self {
        Self {
            tree,
            alphabet,
            constrainer: &NoConstraints,
        }
    }

    /// Restrict internal node states.
    pub fn with_constraints(mut self, constrainer: &'a dyn Constrainer) -> Self {
        self.constrainer = constrainer;
        self
    }

    fn tables(&self, problem: &SiteProblem, terms: &CategoryTerms, n: usize) -> Tables {
        let tree = self.tree;
        let mut sub: Vec<Vec<f64>> = vec![Vec::new(); tree.node_count()];
        let mut msg: Vec<Vec<f64>> = vec![Vec::new(); tree.node_count()];

        for &v in tree.post_order() {
            if tree.is_leaf(v) {
                continue;
            }
            let mut values: Vec<f64> = (0..n)
                .map(|s| {
                    if problem.allowed[v].contains(s) {
                        terms.own[v][s]
                    } else {
                        f64::NEG_INFINITY
                    }
                })
                .collect();
            for &u in tree.children(v) {
                if !tree.is_leaf(u) {
                    for (value, m) in values.iter_mut().zip(&msg[u]) {
                        *value += m;
                    }
                }
            }
            if tree.parent(v).is_some() {
                msg[v] = terms.edge[v]
                    .iter()
                    .map(|row| {
                        row.iter()
                            .zip(&values)
                            .map(|(e, x)| e + x)
                            .fold(f64::NEG_INFINITY, f64::max)
                    })
                    .collect();
            }
            sub[v] = values;
        }
        Tables { sub, msg }
    }

    fn maximum(&self, terms: &CategoryTerms, tables: &Tables) -> f64 {
        let root = &tables.sub[self.tree.root()];
        root.iter()
            .zip(&terms.log_root)
            .map(|(x, r)| terms.log_weight + r + x)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Fix states in pre-order, each time taking the first state whose best
    /// completion still reaches `threshold`.
    fn select(
        &self,
        problem: &SiteProblem,
        terms: &CategoryTerms,
        tables: &Tables,
        threshold: f64,
    ) -> Vec<usize> {
        let mut states = vec![0usize; problem.order.len()];
        // Best total reachable from the states fixed so far.
        let mut reachable = f64::NEG_INFINITY;
        for (k, &v) in problem.order.iter().enumerate() {
            let scores: Vec<(usize, f64)> = problem.allowed[v]
                .iter()
                .map(|s| {
                    let completion = if k == 0 {
                        terms.log_weight + terms.log_root[s] + tables.sub[v][s]
                    } else {
                        let a = states[problem.parent_pos[k]];
                        reachable - tables.msg[v][a] + terms.edge[v][a][s] + tables.sub[v][s]
                    };
                    (s, completion)
                })
                .collect();
            let (s, value) = first_reaching(&scores, threshold);
            states[k] = s;
            reachable = value;
        }
        states
    }
}

impl JointReconstructor for DynamicProgramming<'_> {
    fn tree(&self) -> &PhyloTree {
        self.tree
    }

    fn alphabet(&self) -> &Alphabet {
        self.alphabet
    }

    fn reconstruct_site(
        &self,
        probs: &Probabilities,
        index: usize,
        site: &Site,
    ) -> Result<SiteAssignment> {
        let span = debug_span!("joint_dp", site = index);
        let _enter = span.enter();
        let problem = SiteProblem::new(
            probs,
            self.tree,
            self.constrainer,
            self.alphabet.full(),
            index,
            site,
        )?;
        let n = probs.n_states();
        let tables: Vec<Tables> = problem
            .categories
            .iter()
            .map(|terms| self.tables(&problem, terms, n))
            .collect();
        let maxima: Vec<f64> = problem
            .categories
            .iter()
            .zip(&tables)
            .map(|(terms, t)| self.maximum(terms, t))
            .collect();
        let (category, threshold) = SiteProblem::threshold(&maxima, index)?;
        let terms = &problem.categories[category];
        let states = self.select(&problem, terms, &tables[category], threshold);
        Ok(SiteAssignment {
            log_likelihood: problem.score(terms, &states),
            states,
            category,
        })
    }
}

/// Exhaustive search with an admissible bound.
pub struct BranchAndBound<'a> {
    tree: &'a PhyloTree,
    alphabet: &'a Alphabet,
    constrainer: &'a dyn Constrainer,
}

/// Search state shared across the recursion for one category.
struct Search<'p> {
    problem: &'p SiteProblem,
    terms: &'p CategoryTerms,
    /// `bound[k]`: optimistic total for the nodes at pre-order positions `k..`.
    bound: Vec<f64>,
    states: Vec<usize>,
    best: (f64, Vec<usize>),
    visited: u64,
}

impl Search<'_> {
    fn term(&self, k: usize, s: usize) -> f64 {
        self.problem.term(self.terms, k, s, &self.states)
    }

    /// Find the largest value, keeping the first assignment reaching it.
    fn maximize(&mut self, k: usize, value: f64) {
        self.visited += 1;
        if k == self.problem.order.len() {
            if value > self.best.0 {
                self.best = (value, self.states.clone());
            }
            return;
        }
        let allowed = self.problem.allowed[self.problem.order[k]];
        for s in allowed.iter() {
            let next = value + self.term(k, s);
            if next + self.bound[k + 1] <= self.best.0 {
                continue;
            }
            self.states[k] = s;
            self.maximize(k + 1, next);
        }
    }

    /// The first assignment in enumeration order reaching `threshold`.
    fn first_within(&mut self, k: usize, value: f64, threshold: f64) -> Option<f64> {
        self.visited += 1;
        if k == self.problem.order.len() {
            return (value >= threshold).then_some(value);
        }
        let allowed = self.problem.allowed[self.problem.order[k]];
        for s in allowed.iter() {
            let next = value + self.term(k, s);
            if next + self.bound[k + 1] < threshold {
                continue;
            }
            self.states[k] = s;
            if let Some(found) = self.first_within(k + 1, next, threshold) {
                return Some(found);
            }
        }
        None
    }
}

impl<'a> BranchAndBound<'a> {
    /// Unconstrained reconstructor.
    pub fn new(tree: &'a PhyloTree, alphabet: &'a Alphabet) -> Self {
        Self {
            tree,
            alphabet,
            constrainer: &NoConstraints,
        }
    }

    /// Restrict internal node states.
    pub fn with_constraints(mut self, constrainer: &'a dyn Constrainer) -> Self {
        self.constrainer = constrainer;
        self
    }

    fn search<'p>(&self, problem: &'p SiteProblem, terms: &'p CategoryTerms) -> Search<'p> {
        let m = problem.order.len();
        // Best conceivable contribution of each non-root node, whatever its
        // parent's state.
        let mut bound = vec![0.0; m + 1];
        for k in (1..m).rev() {
            let v = problem.order[k];
            let p = problem.order[problem.parent_pos[k]];
            let mut best = f64::NEG_INFINITY;
            for a in problem.allowed[p].iter() {
                for s in problem.allowed[v].iter() {
                    best = best.max(terms.edge[v][a][s] + terms.own[v][s]);
                }
            }
            bound[k] = bound[k + 1] + best;
        }
        Search {
            problem,
            terms,
            bound,
            states: vec![0; m],
            best: (f64::NEG_INFINITY, vec![0; m]),
            visited: 0,
        }
    }
}

impl JointReconstructor for BranchAndBound<'_> {
    fn tree(&self) -> &PhyloTree {
        self.tree
    }

    fn alphabet(&self) -> &Alphabet {
        self.alphabet
    }

    fn reconstruct_site(
        &self,
        probs: &Probabilities,
        index: usize,
        site: &Site,
    ) -> Result<SiteAssignment> {
        let span = debug_span!("joint_bnb", site = index);
        let _enter = span.enter();
        let problem = SiteProblem::new(
            probs,
            self.tree,
            self.constrainer,
            self.alphabet.full(),
            index,
            site,
        )?;
        let mut searches: Vec<Search> = problem
            .categories
            .iter()
            .map(|terms| self.search(&problem, terms))
            .collect();
        let maxima: Vec<f64> = searches
            .iter_mut()
            .map(|search| {
                search.maximize(0, 0.0);
                search.best.0
            })
            .collect();
        let (category, threshold) = SiteProblem::threshold(&maxima, index)?;

        let search = &mut searches[category];
        let log_likelihood = match search.first_within(0, 0.0, threshold) {
            Some(value) => value,
            None => {
                search.states = search.best.1.clone();
                search.best.0
            }
        };
        debug!(category, visited = search.visited, "branch-and-bound search done");
        Ok(SiteAssignment {
            states: search.states.clone(),
            category,
            log_likelihood,
        })
    }
}


#[cfg(test)]
mod proptests {
    use super::tests::enumerated_choice;
    use super::*;
    use crate::model::{FixedRates, Model, RateCategory, RootFrequencies};
    use crate::parameters::Parameters;
    use proptest::collection::vec;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    struct Case {
        states: usize,
        leaves: usize,
        symmetric: bool,
        picks: Vec<usize>,
        lengths: Vec<f64>,
        /// Off-diagonal rates, root weights, mixture weight, rate multiplier.
        categories: Vec<(Vec<f64>, Vec<f64>, f64, f64)>,
        masks: Vec<u64>,
    }

    /// Random 2-4 state mixtures on random trees of up to five leaves.
    /// Symmetric cases use identical equal-rate categories so ties abound.
    fn case() -> impl Strategy<Value = Case> {
        (2usize..=4, 2usize..=5, 1usize..=3, any::<bool>()).prop_flat_map(
            |(states, leaves, n_cats, symmetric)| {
                let merges = 2 * (leaves - 1);
                let category = (
                    vec(0.05f64..3.0, states * states),
                    vec(0.05f64..1.0, states),
                    0.2f64..2.0,
                    0.2f64..3.0,
                );
                (
                    vec(any::<usize>(), merges),
                    vec(0.01f64..1.5, merges),
                    vec(category, n_cats),
                    vec(1u64..(1u64 << states), leaves),
                )
                    .prop_map(move |(picks, lengths, categories, masks)| Case {
                        states,
                        leaves,
                        symmetric,
                        picks,
                        lengths,
                        categories,
                        masks,
                    })
            },
        )
    }

    /// Merge picked pairs of `t0..` until one tree remains.
    fn merged_tree(leaves: usize, picks: &[usize], lengths: &[f64]) -> PhyloTree {
        let mut pool: Vec<String> = (0..leaves).map(|i| format!("t{}", i)).collect();
        let mut j = 0;
        while pool.len() > 1 {
            let a = pool.remove(picks[2 * j] % pool.len());
            let b = pool.remove(picks[2 * j + 1] % pool.len());
            pool.push(format!(
                "({}:{:.3},{}:{:.3})n{}",
                a,
                lengths[2 * j],
                b,
                lengths[2 * j + 1],
                j
            ));
            j += 1;
        }
        PhyloTree::from_newick(&format!("{};", pool[0])).unwrap()
    }

    fn build(case: &Case) -> (PhyloTree, Alphabet, Probabilities, Site) {
        let n = case.states;
        let tree = merged_tree(case.leaves, &case.picks, &case.lengths);
        let alphabet = Alphabet::new(&['0', '1', '2', '3'][..n]).unwrap();
        let categories = case
            .categories
            .iter()
            .map(|(rates, root, weight, rate)| {
                let (rates, root, weight, rate) = if case.symmetric {
                    (vec![1.0; n * n], vec![1.0; n], 1.0, 1.0)
                } else {
                    (rates.clone(), root.clone(), *weight, *rate)
                };
                let total: f64 = root.iter().sum();
                let matrix = rates.chunks(n).map(|r| r.to_vec()).collect();
                RateCategory::new(FixedRates::new(matrix).unwrap())
                    .with_root(RootFrequencies::Explicit(root.iter().map(|x| x / total).collect()))
                    .with_weight(weight)
                    .with_rate(rate)
            })
            .collect();
        let model = Model::new(alphabet.clone(), categories).unwrap();
        let probs = Probabilities::new(&model, &tree, &Parameters::new(), &EngineConfig::default())
            .unwrap();
        let site = Site::new(tree.leaves().into_iter().zip(&case.masks).map(|(leaf, &mask)| {
            let set = StateSet::from_states((0..n).filter(|&s| mask >> s & 1 == 1));
            (tree.name(leaf).to_string(), set)
        }));
        (tree, alphabet, probs, site)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn strategies_agree_with_enumeration(case in case()) {
            let (tree, alphabet, probs, site) = build(&case);
            let dp = DynamicProgramming::new(&tree, &alphabet)
                .reconstruct_site(&probs, 0, &site)
                .unwrap();
            let bnb = BranchAndBound::new(&tree, &alphabet)
                .reconstruct_site(&probs, 0, &site)
                .unwrap();
            prop_assert_eq!(dp.states(), bnb.states());
            prop_assert_eq!(dp.category(), bnb.category());

            let (category, states, value) = enumerated_choice(&probs, &tree, &site);
            prop_assert_eq!(dp.category(), category);
            prop_assert_eq!(dp.states(), &states[..]);
            prop_assert!((dp.log_likelihood() - value).abs() < 1e-9);
            prop_assert!((bnb.log_likelihood() - value).abs() < 1e-9);
        }
    }
}
