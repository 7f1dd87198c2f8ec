//! Probability distributions and numerical helpers.
//!
//! Provides the [`Distribution`] trait with [`Gamma`] and [`ChiSquared`]
//! implementations, the special functions they rest on ([`ln_gamma`],
//! [`gammainc`]), and the discretized gamma used to model rate heterogeneity
//! across sites ([`discrete_gamma_rates`]).

use core::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use sylva_core::{Result, SylvaError};

// ── Numerical helpers ──────────────────────────────────────────────────────

/// Natural log of the gamma function via the Lanczos approximation (g=7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // Reflection formula: Γ(x) = π / (sin(πx) · Γ(1-x))
        let log_pi_over_sin = (PI / (PI * x).sin()).ln();
        log_pi_over_sin - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5; // g + 0.5
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// Regularized lower incomplete gamma function P(a, x) = γ(a, x) / Γ(a).
///
/// Uses the series expansion when x < a + 1 and the continued fraction
/// representation (computing Q = 1 - P) otherwise.
pub fn gammainc(a: f64, x: f64) -> Result<f64> {
    if a <= 0.0 {
        return Err(SylvaError::InvalidInput("gammainc: a must be positive".into()));
    }
    if x < 0.0 {
        return Err(SylvaError::InvalidInput("gammainc: x must be non-negative".into()));
    }
    if x == 0.0 {
        return Ok(0.0);
    }
    if x.is_infinite() {
        return Ok(1.0);
    }

    if x < a + 1.0 {
        Ok(gammainc_series(a, x))
    } else {
        Ok(1.0 - gammainc_cf(a, x))
    }
}

/// Series expansion for P(a, x).
fn gammainc_series(a: f64, x: f64) -> f64 {
    let max_iter = 500;
    let eps = 1e-15;
    let ln_prefix = a * x.ln() - x - ln_gamma(a);

    let mut sum = 1.0 / a;
    let mut term = 1.0 / a;

    for n in 1..=max_iter {
        term *= x / (a + n as f64);
        sum += term;
        if term.abs() < sum.abs() * eps {
            break;
        }
    }

    sum * ln_prefix.exp()
}

/// Continued fraction for Q(a, x) = 1 - P(a, x) via modified Lentz's method.
fn gammainc_cf(a: f64, x: f64) -> f64 {
    let max_iter = 500;
    let eps = 1e-15;
    let tiny = 1e-300_f64;
    let ln_prefix = a * x.ln() - x - ln_gamma(a);

    let mut b = x + 1.0 - a;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;

    for i in 1..=max_iter {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < tiny {
            d = tiny;
        }
        c = b + an / c;
        if c.abs() < tiny {
            c = tiny;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < eps {
            break;
        }
    }

    h * ln_prefix.exp()
}

/// Invert a monotone CDF on `[0, ∞)` by bracketing and bisection.
fn invert_cdf(cdf: impl Fn(f64) -> f64, p: f64, start: f64) -> f64 {
    let mut lo = 0.0;
    let mut hi = start.max(1e-3);
    while cdf(hi) < p {
        lo = hi;
        hi *= 2.0;
        if !hi.is_finite() {
            return f64::INFINITY;
        }
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if cdf(mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-15 * hi {
            break;
        }
    }
    0.5 * (lo + hi)
}

fn check_probability(p: f64, who: &str) -> Result<()> {
    if !(0.0..1.0).contains(&p) {
        return Err(SylvaError::InvalidInput(format!(
            "{}: quantile probability must be in [0, 1), got {}",
            who, p
        )));
    }
    Ok(())
}

// ── Distribution trait ─────────────────────────────────────────────────────

/// A continuous probability distribution on the non-negative reals.
pub trait Distribution {
    /// Probability density function at `x`.
    fn pdf(&self, x: f64) -> f64;

    /// Cumulative distribution function at `x`.
    fn cdf(&self, x: f64) -> f64;

    /// Inverse of the CDF for `p` in `[0, 1)`.
    fn quantile(&self, p: f64) -> Result<f64>;

    /// Distribution mean.
    fn mean(&self) -> f64;

    /// Distribution variance.
    fn variance(&self) -> f64;

    /// Distribution standard deviation (default: sqrt of variance).
    fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

// ── Gamma distribution ─────────────────────────────────────────────────────

/// Gamma distribution with shape `k` and rate `θ⁻¹`.
#[derive(Debug, Clone, Copy)]
pub struct Gamma {
    shape: f64,
    rate: f64,
}

impl Gamma {
    /// Create a gamma distribution. Both `shape` and `rate` must be positive.
    pub fn new(shape: f64, rate: f64) -> Result<Self> {
        if !(shape > 0.0 && shape.is_finite()) {
            return Err(SylvaError::InvalidInput(format!(
                "Gamma: shape must be positive, got {}",
                shape
            )));
        }
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(SylvaError::InvalidInput(format!(
                "Gamma: rate must be positive, got {}",
                rate
            )));
        }
        Ok(Self { shape, rate })
    }

    /// Shape parameter.
    pub fn shape(&self) -> f64 {
        self.shape
    }

    /// Rate parameter.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Distribution for Gamma {
    fn pdf(&self, x: f64) -> f64 {
        if x < 0.0 {
            return 0.0;
        }
        let ln_pdf = self.shape * self.rate.ln() + (self.shape - 1.0) * x.ln()
            - self.rate * x
            - ln_gamma(self.shape);
        ln_pdf.exp()
    }

    fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        gammainc(self.shape, self.rate * x).unwrap_or(0.0)
    }

    fn quantile(&self, p: f64) -> Result<f64> {
        check_probability(p, "Gamma")?;
        if p == 0.0 {
            return Ok(0.0);
        }
        Ok(invert_cdf(|x| self.cdf(x), p, self.mean()))
    }

    fn mean(&self) -> f64 {
        self.shape / self.rate
    }

    fn variance(&self) -> f64 {
        self.shape / (self.rate * self.rate)
    }
}

// ── Chi-squared distribution ──────────────────────────────────────────────

/// Chi-squared distribution with k degrees of freedom.
#[derive(Debug, Clone, Copy)]
pub struct ChiSquared {
    k: f64,
}

impl ChiSquared {
    /// Create a chi-squared distribution with `k` degrees of freedom.
    pub fn new(k: f64) -> Result<Self> {
        if k <= 0.0 {
            return Err(SylvaError::InvalidInput(
                "ChiSquared: k must be positive".into(),
            ));
        }
        Ok(Self { k })
    }

    /// Degrees of freedom.
    pub fn df(&self) -> f64 {
        self.k
    }
}

impl Distribution for ChiSquared {
    fn pdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        let half_k = self.k / 2.0;
        let ln_pdf = (half_k - 1.0) * x.ln() - x / 2.0 - half_k * 2.0_f64.ln() - ln_gamma(half_k);
        ln_pdf.exp()
    }

    fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        gammainc(self.k / 2.0, x / 2.0).unwrap_or(0.0)
    }

    fn quantile(&self, p: f64) -> Result<f64> {
        check_probability(p, "ChiSquared")?;
        if p == 0.0 {
            return Ok(0.0);
        }
        Ok(invert_cdf(|x| self.cdf(x), p, self.k))
    }

    fn mean(&self) -> f64 {
        self.k
    }

    fn variance(&self) -> f64 {
        2.0 * self.k
    }
}

// ── Discrete gamma rate categories ────────────────────────────────────────

/// How a category's representative rate is taken from its gamma interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GammaMethod {
    /// Conditional mean of the interval (Yang 1994).
    #[default]
    Mean,
    /// Median of the interval, rescaled so the rates average to one.
    Median,
}

/// Rates for `categories` equiprobable categories of a mean-one gamma
/// distribution with shape `alpha`.
///
/// The returned rates average to one; each category has weight
/// `1 / categories`.
///
/// # Errors
///
/// Returns an error if `alpha` is not positive or `categories` is zero.
pub fn discrete_gamma_rates(
    alpha: f64,
    categories: usize,
    method: GammaMethod,
) -> Result<Vec<f64>> {
    if categories == 0 {
        return Err(SylvaError::InvalidInput(
            "discrete gamma needs at least one category".into(),
        ));
    }
    let gamma = Gamma::new(alpha, alpha)?;
    if categories == 1 {
        return Ok(vec![1.0]);
    }
    let k = categories as f64;

    match method {
        GammaMethod::Mean => {
            // ∫ x f(x; α, α) dx over [a, b] equals P(α+1, αb) - P(α+1, αa).
            let mut cuts = Vec::with_capacity(categories + 1);
            cuts.push(0.0);
            for i in 1..categories {
                cuts.push(gamma.quantile(i as f64 / k)?);
            }
            let mut lower = Vec::with_capacity(categories + 1);
            for &c in &cuts {
                lower.push(gammainc(alpha + 1.0, alpha * c)?);
            }
            lower.push(1.0);
            Ok((0..categories).map(|i| k * (lower[i + 1] - lower[i])).collect())
        }
        GammaMethod::Median => {
            let mut rates = Vec::with_capacity(categories);
            for i in 0..categories {
                rates.push(gamma.quantile((2.0 * i as f64 + 1.0) / (2.0 * k))?);
            }
            let mean = rates.iter().sum::<f64>() / k;
            Ok(rates.into_iter().map(|r| r / mean).collect())
        }
    }
}
