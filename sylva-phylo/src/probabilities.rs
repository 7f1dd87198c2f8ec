//! Transition-probability snapshots.
//!
//! [`Probabilities`] evaluates a [`Model`] on a [`PhyloTree`] at fixed
//! [`Parameters`]: for every expanded rate category it holds the root
//! frequencies, the mixture weight and `exp(Q · rate · t)` for every branch.
//! A snapshot is immutable and can be shared across threads.

use sylva_core::{Result, SylvaError};
use sylva_stats::discrete_gamma_rates;
use tracing::debug;

use crate::config::{EngineConfig, ExpMethod};
use crate::expm::{self, EigenSystem, Matrix};
use crate::model::{Model, RootFrequencies};
use crate::parameters::Parameters;
use crate::tree::{NodeId, PhyloTree};

/// Root-state distribution of one expanded category.
#[derive(Debug, Clone, PartialEq)]
pub enum RootDistribution {
    /// Fixed frequencies.
    Fixed(Vec<f64>),
    /// Frequencies proportional to each site's root likelihoods. The
    /// stationary distribution is kept for forward simulation.
    FitzJohn { stationary: Vec<f64> },
}

impl RootDistribution {
    /// Frequencies used when no site data is available.
    pub fn prior(&self) -> &[f64] {
        match self {
            RootDistribution::Fixed(f) => f,
            RootDistribution::FitzJohn { stationary } => stationary,
        }
    }
}

/// One rate category after gamma expansion.
#[derive(Debug, Clone)]
pub struct CategoryProbabilities {
    root: RootDistribution,
    weight: f64,
    rate: f64,
    base: usize,
    matrices: Vec<Matrix>,
}

impl CategoryProbabilities {
    /// Normalized mixture weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Overall rate multiplier (category multiplier times gamma rate).
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Index of the model category this was expanded from.
    pub fn base_category(&self) -> usize {
        self.base
    }

    /// Root-state distribution.
    pub fn root(&self) -> &RootDistribution {
        &self.root
    }

    /// Transition matrix on the branch above `node`; identity for the root.
    pub fn matrix(&self, node: NodeId) -> &Matrix {
        &self.matrices[node]
    }
}

/// Immutable transition-probability snapshot keyed by parameter values.
#[derive(Debug, Clone)]
pub struct Probabilities {
    key: Vec<(String, u64)>,
    n_states: usize,
    n_nodes: usize,
    categories: Vec<CategoryProbabilities>,
}

impl Probabilities {
    /// Evaluate `model` on `tree` at `params`.
    ///
    /// # Errors
    ///
    /// - [`SylvaError::Parameter`] for a missing parameter or a rate
    ///   multiplier, weight or gamma shape outside its domain.
    /// - [`SylvaError::Rate`] for a malformed rate matrix, a chain without
    ///   a unique stationary distribution where one is needed, or a
    ///   non-reversible matrix under [`ExpMethod::Eigen`].
    /// - [`SylvaError::Model`] for explicit root frequencies of the wrong
    ///   length or not summing to one.
    pub fn new(
        model: &Model,
        tree: &PhyloTree,
        params: &Parameters,
        config: &EngineConfig,
    ) -> Result<Self> {
        let n = model.n_states();
        let gamma_rates = match model.gamma() {
            Some(g) => {
                let alpha = g.alpha.value(params)?;
                if !(alpha > 0.0 && alpha.is_finite()) {
                    return Err(SylvaError::Parameter(format!(
                        "gamma shape must be positive, got {}",
                        alpha
                    )));
                }
                discrete_gamma_rates(alpha, g.categories, config.gamma_method)
                    .map_err(|e| SylvaError::Parameter(e.to_string()))?
            }
            None => vec![1.0],
        };
        let k = gamma_rates.len() as f64;

        let mut categories = Vec::with_capacity(model.expanded_len());
        for (base, cat) in model.categories().iter().enumerate() {
            let mut q = cat.rates().rates(params)?;
            expm::validate_rates(&q, n)?;
            expm::fill_diagonal(&mut q);

            let multiplier = cat.multiplier().value(params)?;
            if !(multiplier >= 0.0 && multiplier.is_finite()) {
                return Err(SylvaError::Parameter(format!(
                    "rate multiplier of category {} is {}",
                    base, multiplier
                )));
            }
            let weight = cat.weight().value(params)?;
            if !(weight >= 0.0 && weight.is_finite()) {
                return Err(SylvaError::Parameter(format!(
                    "weight of category {} is {}",
                    base, weight
                )));
            }

            let root = match cat.root() {
                RootFrequencies::Explicit(f) => RootDistribution::Fixed(check_frequencies(f, n)?),
                RootFrequencies::Equal => RootDistribution::Fixed(vec![1.0 / n as f64; n]),
                RootFrequencies::Stationary => RootDistribution::Fixed(expm::stationary(&q)?),
                RootFrequencies::FitzJohn => RootDistribution::FitzJohn {
                    stationary: expm::stationary(&q)?,
                },
            };

            let exponentiator = match config.exp_method {
                ExpMethod::Eigen => {
                    Exponentiator::Eigen(EigenSystem::new(&q, &expm::stationary(&q)?)?)
                }
                ExpMethod::Taylor {
                    min_terms,
                    force_square,
                } => Exponentiator::Taylor {
                    q,
                    min_terms,
                    force_square,
                },
            };

            for &g in &gamma_rates {
                let rate = multiplier * g;
                let matrices = tree
                    .nodes()
                    .iter()
                    .map(|node| {
                        let t = if node.is_root() { 0.0 } else { node.branch_length };
                        exponentiator.exp(t * rate)
                    })
                    .collect();
                categories.push(CategoryProbabilities {
                    root: root.clone(),
                    weight: weight / k,
                    rate,
                    base,
                    matrices,
                });
            }
        }

        let total: f64 = categories.iter().map(|c| c.weight).sum();
        if !(total > 0.0) {
            return Err(SylvaError::Parameter(
                "category weights sum to zero".into(),
            ));
        }
        for c in categories.iter_mut() {
            c.weight /= total;
        }

        debug!(
            categories = categories.len(),
            branches = tree.node_count() - 1,
            states = n,
            "built transition probability snapshot"
        );

        Ok(Self {
            key: params.values_key(),
            n_states: n,
            n_nodes: tree.node_count(),
            categories,
        })
    }

    /// True if `params` has exactly the values this snapshot was built from.
    pub fn matches(&self, params: &Parameters) -> bool {
        self.key == params.values_key()
    }

    /// Number of states.
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Number of tree nodes the snapshot covers.
    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of expanded categories.
    pub fn n_categories(&self) -> usize {
        self.categories.len()
    }

    /// Expanded categories in order: model category major, gamma rate minor.
    pub fn categories(&self) -> &[CategoryProbabilities] {
        &self.categories
    }

    /// One expanded category.
    pub fn category(&self, c: usize) -> &CategoryProbabilities {
        &self.categories[c]
    }

    pub(crate) fn check_tree(&self, tree: &PhyloTree) -> Result<()> {
        if tree.node_count() != self.n_nodes {
            return Err(SylvaError::Tree(format!(
                "snapshot covers {} nodes, tree has {}",
                self.n_nodes,
                tree.node_count()
            )));
        }
        Ok(())
    }
}

enum Exponentiator {
    Taylor {
        q: Matrix,
        min_terms: usize,
        force_square: f64,
    },
    Eigen(EigenSystem),
}

impl Exponentiator {
    fn exp(&self, t: f64) -> Matrix {
        match self {
            Exponentiator::Taylor {
                q,
                min_terms,
                force_square,
            } => expm::taylor(&expm::scaled(q, t), *min_terms, *force_square),
            Exponentiator::Eigen(e) => e.exp(t),
        }
    }
}

fn check_frequencies(f: &[f64], n: usize) -> Result<Vec<f64>> {
    if f.len() != n {
        return Err(SylvaError::Model(format!(
            "{} root frequencies for {} states",
            f.len(),
            n
        )));
    }
    if f.iter().any(|&x| !(x >= 0.0 && x.is_finite())) {
        return Err(SylvaError::Model(format!("invalid root frequencies {:?}", f)));
    }
    let total: f64 = f.iter().sum();
    if (total - 1.0).abs() > 1e-6 {
        return Err(SylvaError::Model(format!(
            "root frequencies sum to {}, expected 1",
            total
        )));
    }
    Ok(f.iter().map(|x| x / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::model::{EqualRates, Gtr, ParameterRates, RateCategory};
    use crate::parameters::Domain;

    fn tree() -> PhyloTree {
        PhyloTree::from_newick("((A:0.1,B:0.2)X:0.3,C:0.4)R;").unwrap()
    }

    #[test]
    fn jc69_matrices() {
        let model = Model::single(Alphabet::dna(), EqualRates::new(4)).unwrap();
        let tree = tree();
        let p = Probabilities::new(&model, &tree, &Parameters::new(), &EngineConfig::default())
            .unwrap();
        assert_eq!(p.n_categories(), 1);
        let c = p.category(0);
        assert_eq!(c.root().prior(), &[0.25; 4]);
        let m = c.matrix(tree.node_id("C").unwrap());
        let e = (-4.0 * 0.4 / 3.0f64).exp();
        assert!((m[0][0] - (0.25 + 0.75 * e)).abs() < 1e-12);
        // Root branch is the identity.
        assert!((c.matrix(tree.root())[2][2] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn gamma_expansion_and_weights() {
        let model = Model::single(Alphabet::dna(), EqualRates::new(4))
            .unwrap()
            .with_gamma("alpha", 4)
            .unwrap();
        let params = Parameters::new().free("alpha", 0.5, Domain::Positive).unwrap();
        let p = Probabilities::new(&model, &tree(), &params, &EngineConfig::default()).unwrap();
        assert_eq!(p.n_categories(), 4);
        let mean_rate: f64 = p.categories().iter().map(|c| c.rate() * c.weight()).sum();
        assert!((mean_rate - 1.0).abs() < 1e-9);
        assert!(p.categories().iter().all(|c| (c.weight() - 0.25).abs() < 1e-15));
    }

    #[test]
    fn weights_are_normalized() {
        let model = Model::new(
            Alphabet::binary(),
            vec![
                RateCategory::new(EqualRates::new(2)).with_weight(3.0),
                RateCategory::new(EqualRates::new(2)).with_weight(1.0).with_rate(2.0),
            ],
        )
        .unwrap();
        let p = Probabilities::new(&model, &tree(), &Parameters::new(), &EngineConfig::default())
            .unwrap();
        assert!((p.category(0).weight() - 0.75).abs() < 1e-15);
        assert!((p.category(1).rate() - 2.0).abs() < 1e-15);
    }

    #[test]
    fn eigen_and_taylor_snapshots_agree() {
        let gtr = Gtr::new(
            vec![1.0.into(), 4.0.into(), 0.5.into(), 1.2.into(), 3.3.into(), 1.0.into()],
            vec![0.3.into(), 0.2.into(), 0.2.into(), 0.3.into()],
        )
        .unwrap();
        let model = Model::single(Alphabet::dna(), gtr).unwrap();
        let tree = tree();
        let params = Parameters::new();
        let a = Probabilities::new(&model, &tree, &params, &EngineConfig::default()).unwrap();
        let b = Probabilities::new(
            &model,
            &tree,
            &params,
            &EngineConfig::default().with_exp_method(ExpMethod::Eigen),
        )
        .unwrap();
        for node in 0..tree.node_count() {
            let (ma, mb) = (a.category(0).matrix(node), b.category(0).matrix(node));
            for i in 0..4 {
                for j in 0..4 {
                    assert!((ma[i][j] - mb[i][j]).abs() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn error_kinds() {
        let tree = tree();
        let config = EngineConfig::default();

        let rates = ParameterRates::new(2).rate(0, 1, "r").unwrap();
        let model = Model::single(Alphabet::binary(), rates).unwrap();
        let err = Probabilities::new(&model, &tree, &Parameters::new(), &config).unwrap_err();
        assert!(matches!(err, SylvaError::Parameter(_)));

        // Only 0 -> 1 transitions: state 1 is absorbing, stationary exists (0, 1)
        // but the matrix is not reversible.
        let params = Parameters::new().free("r", 1.0, Domain::Positive).unwrap();
        let eigen = config.clone().with_exp_method(ExpMethod::Eigen);
        assert!(matches!(
            Probabilities::new(&model, &tree, &params, &eigen),
            Err(SylvaError::Rate(_))
        ));

        let bad_root = Model::new(
            Alphabet::binary(),
            vec![RateCategory::new(EqualRates::new(2))
                .with_root(RootFrequencies::Explicit(vec![0.5]))],
        )
        .unwrap();
        assert!(matches!(
            Probabilities::new(&bad_root, &tree, &params, &config),
            Err(SylvaError::Model(_))
        ));
    }

    #[test]
    fn snapshot_identity() {
        let model = Model::single(Alphabet::dna(), EqualRates::new(4))
            .unwrap()
            .with_gamma("alpha", 2)
            .unwrap();
        let mut params = Parameters::new().free("alpha", 1.0, Domain::Positive).unwrap();
        let p = Probabilities::new(&model, &tree(), &params, &EngineConfig::default()).unwrap();
        assert!(p.matches(&params));
        params.set("alpha", 2.0).unwrap();
        assert!(!p.matches(&params));
    }
}
