//! Forward simulation of site patterns.
//!
//! Each site draws a rate category from the mixture weights and a root
//! state from that category's frequencies (the stationary distribution for
//! FitzJohn roots). It then walks the tree in pre-order, drawing every child
//! from its parent's row of the branch transition matrix. All draws use
//! inverse-CDF sampling over one uniform variate.
//!
//! Sites whose leaf pattern matches an excluded pattern, or whose full
//! assignment fails the constrainer, are discarded and redrawn. The loop is
//! unbounded unless [`Simulator::max_attempts`] is set, so constraints that
//! admit nothing, or almost nothing, can make it run forever.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sylva_core::{Result, SylvaError};
use tracing::debug;

use crate::alignment::{Alignment, Site};
use crate::alphabet::{Alphabet, StateSet};
use crate::config::EngineConfig;
use crate::constraints::{Constrainer, NoConstraints};
use crate::likelihood::check_taxa;
use crate::probabilities::Probabilities;
use crate::tree::PhyloTree;

/// Maps sampled states to the state sets they are emitted as.
#[derive(Debug, Clone, PartialEq)]
pub struct Recoding {
    classes: Vec<StateSet>,
}

impl Recoding {
    /// Every state emitted as itself.
    pub fn new(alphabet: &Alphabet) -> Self {
        Self {
            classes: (0..alphabet.len()).map(StateSet::single).collect(),
        }
    }

    /// Emit every state named in `symbols` as the set of all of them.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::InvalidInput`] if a symbol is not a state of
    /// `alphabet`.
    pub fn group(mut self, alphabet: &Alphabet, symbols: &str) -> Result<Self> {
        let mut set = StateSet::EMPTY;
        for c in symbols.chars() {
            let s = alphabet
                .state_index(c)
                .filter(|&s| s < self.classes.len())
                .ok_or_else(|| SylvaError::InvalidInput(format!("'{}' is not a state", c)))?;
            set = set.with(s);
        }
        for s in set.iter() {
            self.classes[s] = set;
        }
        Ok(self)
    }

    /// Emitted set of `state`.
    pub fn class(&self, state: usize) -> StateSet {
        self.classes[state]
    }
}

/// Inverse-CDF table over one distribution.
#[derive(Debug, Clone)]
struct Cumulative(Vec<f64>);

impl Cumulative {
    fn new(p: &[f64]) -> Self {
        let mut acc = 0.0;
        let mut cum: Vec<f64> = p
            .iter()
            .map(|&x| {
                acc += x.max(0.0);
                acc
            })
            .collect();
        if acc > 0.0 {
            cum.iter_mut().for_each(|c| *c /= acc);
        }
        Self(cum)
    }

    fn sample(&self, u: f64) -> usize {
        self.0
            .iter()
            .position(|&c| u < c)
            .unwrap_or(self.0.len().saturating_sub(1))
    }
}

/// Sampling tables of one category.
#[derive(Debug, Clone)]
struct CategoryTables {
    root: Cumulative,
    /// `rows[node][parent_state]`.
    rows: Vec<Vec<Cumulative>>,
}

/// Draws sites under a transition-probability snapshot.
pub struct Simulator<'a> {
    tree: &'a PhyloTree,
    alphabet: &'a Alphabet,
    rng: StdRng,
    weights: Cumulative,
    tables: Vec<CategoryTables>,
    excluded: Option<&'a Alignment>,
    constrainer: &'a dyn Constrainer,
    recoding: Option<Recoding>,
    max_attempts: Option<u64>,
    drawn: usize,
    rejected: u64,
}

impl<'a> Simulator<'a> {
    /// A simulator seeded with `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Tree`] if the snapshot was built for a different
    /// tree, or [`SylvaError::Model`] if its state count differs from the
    /// alphabet's.
    pub fn new(
        probs: &Probabilities,
        tree: &'a PhyloTree,
        alphabet: &'a Alphabet,
        seed: u64,
    ) -> Result<Self> {
        probs.check_tree(tree)?;
        let n = probs.n_states();
        if n != alphabet.len() {
            return Err(SylvaError::Model(format!(
                "snapshot has {} states, alphabet has {}",
                n,
                alphabet.len()
            )));
        }
        let weights = Cumulative::new(
            &probs.categories().iter().map(|c| c.weight()).collect::<Vec<_>>(),
        );
        let tables = probs
            .categories()
            .iter()
            .map(|cat| CategoryTables {
                root: Cumulative::new(cat.root().prior()),
                rows: (0..tree.node_count())
                    .map(|v| cat.matrix(v).iter().map(|row| Cumulative::new(row)).collect())
                    .collect(),
            })
            .collect();
        Ok(Self {
            tree,
            alphabet,
            rng: StdRng::seed_from_u64(seed),
            weights,
            tables,
            excluded: None,
            constrainer: &NoConstraints,
            recoding: None,
            max_attempts: None,
            drawn: 0,
            rejected: 0,
        })
    }

    /// Reject sites whose leaf states fall inside any site of `patterns`.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Alignment`] if the taxa are not the tree leaves.
    pub fn excluding(mut self, patterns: &'a Alignment) -> Result<Self> {
        check_taxa(self.tree, patterns)?;
        self.excluded = Some(patterns);
        Ok(self)
    }

    /// Reject sites whose full assignment fails `constrainer`. The `i`-th
    /// emitted site is checked against `constrainer.site(i, site)`, where
    /// `site` holds the drawn leaf states.
    pub fn constrained_by(mut self, constrainer: &'a dyn Constrainer) -> Self {
        self.constrainer = constrainer;
        self
    }

    /// Emit leaf states through `recoding`.
    pub fn recoding(mut self, recoding: Recoding) -> Self {
        self.recoding = Some(recoding);
        self
    }

    /// Give up on a site after `attempts` rejected draws.
    pub fn max_attempts(mut self, attempts: u64) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Apply the retry bound from `config`, if it has one.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        if let Some(max) = config.max_attempts {
            self.max_attempts = Some(max);
        }
        self
    }

    /// Total draws rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// One unconditioned draw: category, then a state for every node.
    fn draw(&mut self) -> Vec<usize> {
        let c = self.weights.sample(self.rng.gen::<f64>());
        let table = &self.tables[c];
        let mut states = vec![0usize; self.tree.node_count()];
        for &v in self.tree.pre_order() {
            let u = self.rng.gen::<f64>();
            states[v] = match self.tree.parent(v) {
                None => table.root.sample(u),
                Some(p) => table.rows[v][states[p]].sample(u),
            };
        }
        states
    }

    fn is_excluded(&self, states: &[usize]) -> bool {
        let Some(patterns) = self.excluded else {
            return false;
        };
        let leaves = self.tree.leaves();
        patterns.sites().iter().any(|site| {
            leaves.iter().all(|&leaf| {
                site.get(self.tree.name(leaf))
                    .is_ok_and(|set| set.contains(states[leaf]))
            })
        })
    }

    /// Emitted leaf states of a full assignment.
    fn leaf_site(&self, states: &[usize]) -> Site {
        let tree = self.tree;
        Site::new(tree.leaves().into_iter().map(|leaf| {
            let s = states[leaf];
            let set = self
                .recoding
                .as_ref()
                .map_or(StateSet::single(s), |r| r.class(s));
            (tree.name(leaf), set)
        }))
    }

    /// Draw until a site is admitted; returns node states and the emitted site.
    fn next_site(&mut self) -> Result<(Vec<usize>, Site)> {
        let mut attempts = 0u64;
        loop {
            let states = self.draw();
            let site = self.leaf_site(&states);
            let admitted = !self.is_excluded(&states)
                && self.constrainer.site(self.drawn, &site).admits(&states);
            if admitted {
                if attempts > 0 {
                    debug!(site = self.drawn, rejected = attempts, "rejected simulated patterns");
                }
                self.drawn += 1;
                return Ok((states, site));
            }
            attempts += 1;
            self.rejected += 1;
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(SylvaError::Likelihood(format!(
                    "site {}: every one of {} simulated patterns was rejected",
                    self.drawn, attempts
                )));
            }
        }
    }

    /// Draw states for every node of one admitted site, indexed by node id.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Likelihood`] if a retry bound is set and every
    /// attempt was rejected.
    pub fn simulate_states(&mut self) -> Result<Vec<usize>> {
        self.next_site().map(|(states, _)| states)
    }

    /// One site over the tree leaves.
    pub fn simulate_site(&mut self) -> Result<Site> {
        self.next_site().map(|(_, site)| site)
    }

    /// `length` independent sites.
    pub fn alignment(&mut self, length: usize) -> Result<Alignment> {
        let mut out = Alignment::new(self.tree.leaf_names())?;
        let before = self.rejected;
        for _ in 0..length {
            out.push(self.simulate_site()?)?;
        }
        debug!(
            sites = length,
            states = self.alphabet.len(),
            rejected = self.rejected - before,
            "simulated alignment"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::NodeConstraints;
    use crate::likelihood::{prune, site_seeds};
    use crate::model::{EqualRates, Model, RateCategory, RootFrequencies};
    use crate::parameters::Parameters;
    use sylva_stats::{ChiSquared, Distribution};

    fn binary_setup() -> (PhyloTree, Probabilities) {
        let tree = PhyloTree::from_newick("((a:0.2,b:0.4)x:0.3,(c:0.5,d:0.1)y:0.2)r;").unwrap();
        let model = Model::new(
            Alphabet::binary(),
            vec![
                RateCategory::new(EqualRates::new(2))
                    .with_root(RootFrequencies::Explicit(vec![0.3, 0.7]))
                    .with_weight(2.0),
                RateCategory::new(EqualRates::new(2))
                    .with_root(RootFrequencies::Explicit(vec![0.3, 0.7]))
                    .with_rate(3.0),
            ],
        )
        .unwrap();
        let probs = Probabilities::new(&model, &tree, &Parameters::new(), &EngineConfig::default())
            .unwrap();
        (tree, probs)
    }

    #[test]
    fn pattern_frequencies_pass_chi_squared() {
        let (tree, probs) = binary_setup();
        let binary = Alphabet::binary();
        let taxa = tree.leaf_names();
        let patterns: Vec<String> = (0..16u32)
            .map(|code| (0..4).map(|i| if code >> i & 1 == 1 { '1' } else { '0' }).collect())
            .collect();
        let expected: Vec<f64> = patterns
            .iter()
            .map(|p| {
                let site = Site::from_symbols(&binary, &taxa, p).unwrap();
                let seeds = site_seeds(&tree, &site, 2).unwrap();
                prune::<f64>(&probs, &tree, &seeds).total()
            })
            .collect();
        assert!((expected.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let critical = ChiSquared::new(15.0).unwrap().quantile(0.95).unwrap();
        let n = 4000;
        let mut passes = 0;
        for seed in 0..5 {
            let mut sim = Simulator::new(&probs, &tree, &binary, seed).unwrap();
            let aln = sim.alignment(n).unwrap();
            let mut counts = vec![0usize; 16];
            for site in aln.sites() {
                let code = taxa.iter().enumerate().fold(0usize, |acc, (i, t)| {
                    acc | (site.get(t).unwrap().contains(1) as usize) << i
                });
                counts[code] += 1;
            }
            let stat: f64 = counts
                .iter()
                .zip(&expected)
                .map(|(&o, &p)| {
                    let e = p * n as f64;
                    (o as f64 - e).powi(2) / e
                })
                .sum();
            if stat < critical {
                passes += 1;
            }
        }
        assert!(passes >= 3, "only {} of 5 samples passed", passes);
    }

    #[test]
    fn same_seed_same_alignment() {
        let (tree, probs) = binary_setup();
        let binary = Alphabet::binary();
        let a = Simulator::new(&probs, &tree, &binary, 7).unwrap().alignment(50).unwrap();
        let b = Simulator::new(&probs, &tree, &binary, 7).unwrap().alignment(50).unwrap();
        let c = Simulator::new(&probs, &tree, &binary, 8).unwrap().alignment(50).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.taxa(), &["a", "b", "c", "d"]);
    }

    #[test]
    fn excluded_patterns_never_appear() {
        let (tree, probs) = binary_setup();
        let binary = Alphabet::binary();
        let taxa = tree.leaf_names();
        let constant =
            Alignment::from_sequences(&binary, &taxa, &["01", "01", "01", "01"]).unwrap();
        let mut sim = Simulator::new(&probs, &tree, &binary, 3)
            .unwrap()
            .excluding(&constant)
            .unwrap();
        let aln = sim.alignment(500).unwrap();
        assert!(sim.rejected() > 0);
        for site in aln.sites() {
            let ones = site.states().values().filter(|s| s.contains(1)).count();
            assert!(ones > 0 && ones < 4);
        }
    }

    #[test]
    fn constraints_filter_assignments() {
        // A zero-length branch makes leaf `a` copy the root.
        let tree = PhyloTree::from_newick("(a:0,b:0.3)r;").unwrap();
        let dna = Alphabet::dna();
        let model = Model::single(dna.clone(), EqualRates::new(4)).unwrap();
        let probs = Probabilities::new(&model, &tree, &Parameters::new(), &EngineConfig::default())
            .unwrap();
        let pinned = NodeConstraints::new(&tree, &dna).restrict("r", "G").unwrap();
        let mut sim = Simulator::new(&probs, &tree, &dna, 11)
            .unwrap()
            .constrained_by(&pinned);
        let aln = sim.alignment(200).unwrap();
        assert_eq!(aln.sequence(&dna, "a").unwrap(), "G".repeat(200));
    }

    #[test]
    fn constrainer_sees_drawn_leaves() {
        let (tree, probs) = binary_setup();
        let binary = Alphabet::binary();
        let root = tree.root();
        // Admit only draws whose root matches leaf `a`.
        let root_follows_a = move |_: usize, site: &Site| {
            let mut c = crate::constraints::SiteConstraints::new();
            if let Ok(set) = site.get("a") {
                c.restrict(root, set);
            }
            c
        };
        let a = tree.node_id("a").unwrap();
        let mut sim = Simulator::new(&probs, &tree, &binary, 9)
            .unwrap()
            .constrained_by(&root_follows_a);
        for _ in 0..100 {
            let states = sim.simulate_states().unwrap();
            assert_eq!(states[root], states[a]);
        }
        assert!(sim.rejected() > 0);
    }

    #[test]
    fn retry_bound_is_reported() {
        let (tree, probs) = binary_setup();
        let binary = Alphabet::binary();
        let taxa = tree.leaf_names();
        let everything =
            Alignment::from_sequences(&binary, &taxa, &["?", "?", "?", "?"]).unwrap();
        let config = EngineConfig::default().with_max_attempts(25);
        let mut sim = Simulator::new(&probs, &tree, &binary, 1)
            .unwrap()
            .excluding(&everything)
            .unwrap()
            .with_config(&config);
        assert!(matches!(sim.simulate_site(), Err(SylvaError::Likelihood(_))));
        assert_eq!(sim.rejected(), 25);
    }

    #[test]
    fn recoding_emits_classes() {
        let tree = PhyloTree::from_newick("((a:0.3,b:0.3)x:0.3,c:0.6)r;").unwrap();
        let dna = Alphabet::dna();
        let model = Model::single(dna.clone(), EqualRates::new(4)).unwrap();
        let probs = Probabilities::new(&model, &tree, &Parameters::new(), &EngineConfig::default())
            .unwrap();
        let ry = Recoding::new(&dna).group(&dna, "AG").unwrap().group(&dna, "CT").unwrap();
        let mut sim = Simulator::new(&probs, &tree, &dna, 5).unwrap().recoding(ry);
        let aln = sim.alignment(100).unwrap();
        for taxon in ["a", "b", "c"] {
            let seq = aln.sequence(&dna, taxon).unwrap();
            assert!(seq.chars().all(|ch| ch == 'R' || ch == 'Y'), "{}", seq);
        }
        assert!(matches!(
            Recoding::new(&dna).group(&dna, "AX"),
            Err(SylvaError::InvalidInput(_))
        ));
    }
}
