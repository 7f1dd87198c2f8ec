//! Engine configuration.
//!
//! [`EngineConfig`] is passed explicitly to snapshot construction,
//! reconstructors and the simulator.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
pub use sylva_stats::GammaMethod;

/// How transition matrices are computed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExpMethod {
    /// Scaling and squaring with a truncated Taylor series.
    Taylor {
        /// Fewest series terms to sum.
        min_terms: usize,
        /// Largest norm the series is summed at; bigger matrices are halved first.
        force_square: f64,
    },
    /// Eigendecomposition of the symmetrised matrix; time-reversible models only.
    Eigen,
}

impl Default for ExpMethod {
    fn default() -> Self {
        ExpMethod::Taylor {
            min_terms: 10,
            force_square: 0.1,
        }
    }
}

/// Algorithm used for joint ancestral reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointStrategy {
    /// Pupko-style dynamic programming.
    DynamicProgramming,
    /// Exhaustive search with bound-based pruning.
    BranchAndBound,
    /// Branch-and-bound when the assignment space is small, otherwise dynamic programming.
    #[default]
    Auto,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Matrix exponential method.
    pub exp_method: ExpMethod,
    /// How discrete-gamma category rates are chosen.
    pub gamma_method: GammaMethod,
    /// Joint reconstruction algorithm.
    pub joint_strategy: JointStrategy,
    /// Largest `states^internal_nodes` for which `Auto` picks branch-and-bound.
    pub bnb_max_assignments: u64,
    /// Simulator rejection bound per site; `None` retries forever.
    pub max_attempts: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exp_method: ExpMethod::default(),
            gamma_method: GammaMethod::Mean,
            joint_strategy: JointStrategy::Auto,
            bnb_max_assignments: 4096,
            max_attempts: None,
        }
    }
}

impl EngineConfig {
    /// Set the exponentiation method.
    pub fn with_exp_method(mut self, method: ExpMethod) -> Self {
        self.exp_method = method;
        self
    }

    /// Set the discrete-gamma method.
    pub fn with_gamma_method(mut self, method: GammaMethod) -> Self {
        self.gamma_method = method;
        self
    }

    /// Set the joint reconstruction strategy.
    pub fn with_joint_strategy(mut self, strategy: JointStrategy) -> Self {
        self.joint_strategy = strategy;
        self
    }

    /// Set the `Auto` threshold.
    pub fn with_bnb_max_assignments(mut self, max: u64) -> Self {
        self.bnb_max_assignments = max;
        self
    }

    /// Bound the simulator's rejection loop.
    pub fn with_max_attempts(mut self, attempts: u64) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}
