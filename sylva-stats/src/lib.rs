//! Numerical support for the sylva phylogenetic engine.
//!
//! - **Special functions** — log-gamma and the regularized incomplete gamma
//! - **Distributions** — [`Gamma`](distribution::Gamma) and
//!   [`ChiSquared`](distribution::ChiSquared) with quantile inversion
//! - **Rate heterogeneity** — discretized gamma rate categories

pub mod distribution;

pub use distribution::{discrete_gamma_rates, ChiSquared, Distribution, Gamma, GammaMethod};
