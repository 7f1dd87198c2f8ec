//! Shared primitives for the sylva phylogenetic likelihood engine.
//!
//! `sylva-core` provides the foundation the other sylva crates build on:
//!
//! - **Error types** — [`SylvaError`] and [`Result`] for structured error handling
//! - **Numeric representations** — the [`Real`] trait with plain, log-domain
//!   and rescaled implementations for underflow-free likelihood arithmetic
//! - **Traits** — small shared abstractions such as [`Summarizable`]

pub mod error;
pub mod real;
pub mod traits;

pub use error::{Result, SylvaError};
pub use real::{LogProb, Real, ScaledReal};
pub use traits::*;
