//! Continuous-time Markov models of character evolution.
//!
//! A [`Model`] is a mixture of [`RateCategory`]s over one [`Alphabet`]. Each
//! category supplies its off-diagonal rates through a [`RateExpression`],
//! a root-frequency policy, a rate multiplier and a mixture weight. A model
//! may add discrete-gamma rate heterogeneity, which splits every category
//! into equally weighted rate-scaled copies.

use std::fmt;
use std::sync::Arc;

use sylva_core::{Result, SylvaError};

use crate::alphabet::Alphabet;
use crate::expm::{validate_rates, Matrix};
use crate::parameters::Parameters;

/// A constant or a reference to a named parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scalar {
    /// Fixed value.
    Const(f64),
    /// Value of the named parameter.
    Param(String),
}

impl Scalar {
    /// Resolve against `params`.
    pub fn value(&self, params: &Parameters) -> Result<f64> {
        match self {
            Scalar::Const(v) => Ok(*v),
            Scalar::Param(name) => params.get(name),
        }
    }

    /// Parameter name, if any.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Scalar::Const(_) => None,
            Scalar::Param(name) => Some(name),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Const(v)
    }
}

impl From<&str> for Scalar {
    fn from(name: &str) -> Self {
        Scalar::Param(name.to_string())
    }
}

/// Off-diagonal rates of a rate matrix as a function of the parameters.
///
/// Diagonal entries of the returned matrix are ignored; they are always
/// derived so rows sum to zero.
pub trait RateExpression: fmt::Debug + Send + Sync {
    /// Number of states the matrix is defined over.
    fn n_states(&self) -> usize;

    /// The `n_states × n_states` rate matrix at `params`.
    fn rates(&self, params: &Parameters) -> Result<Matrix>;

    /// Names of the parameters the expression reads.
    fn parameter_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A rate matrix that does not depend on any parameter.
#[derive(Debug, Clone)]
pub struct FixedRates {
    matrix: Matrix,
}

impl FixedRates {
    /// Wrap a rate matrix; it must be square with non-negative finite off-diagonals.
    pub fn new(matrix: Matrix) -> Result<Self> {
        validate_rates(&matrix, matrix.len())?;
        Ok(Self { matrix })
    }
}

impl RateExpression for FixedRates {
    fn n_states(&self) -> usize {
        self.matrix.len()
    }

    fn rates(&self, _params: &Parameters) -> Result<Matrix> {
        Ok(self.matrix.clone())
    }
}

/// Equal rates between all `n` states (JC69 for DNA, Mk in general),
/// scaled to one expected substitution per unit time.
#[derive(Debug, Clone, Copy)]
pub struct EqualRates {
    states: usize,
}

impl EqualRates {
    /// Equal-rates model over `states` states.
    pub fn new(states: usize) -> Self {
        Self { states }
    }
}

impl RateExpression for EqualRates {
    fn n_states(&self) -> usize {
        self.states
    }

    fn rates(&self, _params: &Parameters) -> Result<Matrix> {
        let n = self.states;
        let r = if n > 1 { 1.0 / (n - 1) as f64 } else { 0.0 };
        Ok((0..n)
            .map(|i| (0..n).map(|j| if i == j { 0.0 } else { r }).collect())
            .collect())
    }
}

/// General time-reversible model: `q_ij = s_ij π_j`, normalized so the
/// expected rate at equilibrium is one.
///
/// Exchangeabilities are given for the upper triangle in row order
/// (for DNA: AC, AG, AT, CG, CT, GT). Frequencies are normalized to sum to one.
#[derive(Debug, Clone)]
pub struct Gtr {
    exchangeabilities: Vec<Scalar>,
    frequencies: Vec<Scalar>,
}

impl Gtr {
    /// GTR over `frequencies.len()` states.
    pub fn new(exchangeabilities: Vec<Scalar>, frequencies: Vec<Scalar>) -> Result<Self> {
        let n = frequencies.len();
        if n < 2 || exchangeabilities.len() != n * (n - 1) / 2 {
            return Err(SylvaError::Rate(format!(
                "GTR over {} states needs {} exchangeabilities, got {}",
                n,
                n * n.saturating_sub(1) / 2,
                exchangeabilities.len()
            )));
        }
        Ok(Self {
            exchangeabilities,
            frequencies,
        })
    }

    /// HKY85: transitions (A↔G, C↔T) scaled by `kappa`.
    pub fn hky(kappa: Scalar, frequencies: [Scalar; 4]) -> Self {
        let one = Scalar::Const(1.0);
        Self {
            exchangeabilities: vec![
                one.clone(),
                kappa.clone(),
                one.clone(),
                one.clone(),
                kappa,
                one,
            ],
            frequencies: frequencies.to_vec(),
        }
    }

    fn resolve_frequencies(&self, params: &Parameters) -> Result<Vec<f64>> {
        let mut pi = Vec::with_capacity(self.frequencies.len());
        for f in &self.frequencies {
            let v = f.value(params)?;
            if !(v > 0.0 && v.is_finite()) {
                return Err(SylvaError::Rate(format!("GTR frequency {} is not positive", v)));
            }
            pi.push(v);
        }
        let total: f64 = pi.iter().sum();
        Ok(pi.into_iter().map(|p| p / total).collect())
    }
}

impl RateExpression for Gtr {
    fn n_states(&self) -> usize {
        self.frequencies.len()
    }

    fn rates(&self, params: &Parameters) -> Result<Matrix> {
        let n = self.n_states();
        let pi = self.resolve_frequencies(params)?;
        let mut q = vec![vec![0.0; n]; n];
        let mut k = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let s = self.exchangeabilities[k].value(params)?;
                k += 1;
                q[i][j] = s * pi[j];
                q[j][i] = s * pi[i];
            }
        }
        let mu: f64 = (0..n)
            .map(|i| pi[i] * (0..n).filter(|&j| j != i).map(|j| q[i][j]).sum::<f64>())
            .sum();
        if mu > 0.0 && mu.is_finite() {
            for row in q.iter_mut() {
                for x in row.iter_mut() {
                    *x /= mu;
                }
            }
        }
        Ok(q)
    }

    fn parameter_names(&self) -> Vec<String> {
        self.exchangeabilities
            .iter()
            .chain(self.frequencies.iter())
            .filter_map(|s| s.parameter().map(str::to_string))
            .collect()
    }
}

/// A rate matrix whose off-diagonal cells are individually given; cells
/// not listed are zero. May be non-reversible.
#[derive(Debug, Clone)]
pub struct ParameterRates {
    states: usize,
    cells: Vec<(usize, usize, Scalar)>,
}

impl ParameterRates {
    /// Empty `states × states` matrix.
    pub fn new(states: usize) -> Self {
        Self {
            states,
            cells: Vec::new(),
        }
    }

    /// Set cell `(from, to)`.
    pub fn rate(mut self, from: usize, to: usize, value: impl Into<Scalar>) -> Result<Self> {
        if from >= self.states || to >= self.states || from == to {
            return Err(SylvaError::Rate(format!(
                "cell ({}, {}) is not an off-diagonal cell of a {}-state matrix",
                from, to, self.states
            )));
        }
        self.cells.push((from, to, value.into()));
        Ok(self)
    }
}

impl RateExpression for ParameterRates {
    fn n_states(&self) -> usize {
        self.states
    }

    fn rates(&self, params: &Parameters) -> Result<Matrix> {
        let mut q = vec![vec![0.0; self.states]; self.states];
        for (from, to, value) in &self.cells {
            q[*from][*to] = value.value(params)?;
        }
        Ok(q)
    }

    fn parameter_names(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter_map(|(_, _, s)| s.parameter().map(str::to_string))
            .collect()
    }
}

/// How a category's root-state distribution is chosen.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootFrequencies {
    /// Given vector, one entry per state.
    Explicit(Vec<f64>),
    /// Uniform over states.
    Equal,
    /// Stationary distribution of the category's rate matrix.
    Stationary,
    /// Proportional to the root's conditional likelihoods, per site
    /// (FitzJohn et al. 2009).
    FitzJohn,
}

/// One component of a model mixture.
#[derive(Debug, Clone)]
pub struct RateCategory {
    rates: Arc<dyn RateExpression>,
    root: RootFrequencies,
    multiplier: Scalar,
    weight: Scalar,
}

impl RateCategory {
    /// Category with stationary root frequencies, rate multiplier one and weight one.
    pub fn new(rates: impl RateExpression + 'static) -> Self {
        Self {
            rates: Arc::new(rates),
            root: RootFrequencies::Stationary,
            multiplier: Scalar::Const(1.0),
            weight: Scalar::Const(1.0),
        }
    }

    /// Set the root-frequency policy.
    pub fn with_root(mut self, root: RootFrequencies) -> Self {
        self.root = root;
        self
    }

    /// Set the rate multiplier.
    pub fn with_rate(mut self, multiplier: impl Into<Scalar>) -> Self {
        self.multiplier = multiplier.into();
        self
    }

    /// Set the mixture weight.
    pub fn with_weight(mut self, weight: impl Into<Scalar>) -> Self {
        self.weight = weight.into();
        self
    }

    /// The rate expression.
    pub fn rates(&self) -> &dyn RateExpression {
        self.rates.as_ref()
    }

    /// The root-frequency policy.
    pub fn root(&self) -> &RootFrequencies {
        &self.root
    }

    /// The rate multiplier.
    pub fn multiplier(&self) -> &Scalar {
        &self.multiplier
    }

    /// The mixture weight.
    pub fn weight(&self) -> &Scalar {
        &self.weight
    }
}

/// Discrete-gamma rate heterogeneity.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaRates {
    /// Shape parameter.
    pub alpha: Scalar,
    /// Number of rate categories.
    pub categories: usize,
}

/// A mixture of rate categories over one alphabet.
#[derive(Debug, Clone)]
pub struct Model {
    alphabet: Alphabet,
    categories: Vec<RateCategory>,
    gamma: Option<GammaRates>,
}

impl Model {
    /// Build a model; every category must be defined over the alphabet's states.
    pub fn new(alphabet: Alphabet, categories: Vec<RateCategory>) -> Result<Self> {
        if categories.is_empty() {
            return Err(SylvaError::Model("model has no rate categories".into()));
        }
        for (i, c) in categories.iter().enumerate() {
            if c.rates.n_states() != alphabet.len() {
                return Err(SylvaError::Model(format!(
                    "category {} has {} states, alphabet has {}",
                    i,
                    c.rates.n_states(),
                    alphabet.len()
                )));
            }
        }
        Ok(Self {
            alphabet,
            categories,
            gamma: None,
        })
    }

    /// Single-category model.
    pub fn single(alphabet: Alphabet, rates: impl RateExpression + 'static) -> Result<Self> {
        Self::new(alphabet, vec![RateCategory::new(rates)])
    }

    /// Add discrete-gamma heterogeneity with shape `alpha` and `categories` classes.
    pub fn with_gamma(mut self, alpha: impl Into<Scalar>, categories: usize) -> Result<Self> {
        if categories == 0 {
            return Err(SylvaError::Model(
                "gamma heterogeneity needs at least one category".into(),
            ));
        }
        self.gamma = Some(GammaRates {
            alpha: alpha.into(),
            categories,
        });
        Ok(self)
    }

    /// The alphabet.
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Number of states.
    pub fn n_states(&self) -> usize {
        self.alphabet.len()
    }

    /// Base categories, before gamma expansion.
    pub fn categories(&self) -> &[RateCategory] {
        &self.categories
    }

    /// Gamma heterogeneity, if any.
    pub fn gamma(&self) -> Option<&GammaRates> {
        self.gamma.as_ref()
    }

    /// Number of categories after gamma expansion.
    pub fn expanded_len(&self) -> usize {
        self.categories.len() * self.gamma.as_ref().map_or(1, |g| g.categories)
    }

    /// Every parameter name the model reads, sorted and deduplicated.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .categories
            .iter()
            .flat_map(|c| {
                let mut n = c.rates.parameter_names();
                n.extend(c.multiplier.parameter().map(str::to_string));
                n.extend(c.weight.parameter().map(str::to_string));
                n
            })
            .chain(
                self.gamma
                    .iter()
                    .filter_map(|g| g.alpha.parameter().map(str::to_string)),
            )
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
