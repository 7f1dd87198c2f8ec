//! Underflow-resistant numeric representations for likelihood arithmetic.
//!
//! The pruning engine multiplies thousands of probabilities per site, which
//! underflows plain `f64` on deep trees. [`Real`] abstracts over the
//! representation so the engine code never changes when switching between:
//!
//! - `f64` — plain IEEE arithmetic, fastest, may underflow
//! - [`LogProb`] — natural logarithm of the value; addition via log-sum-exp
//! - [`ScaledReal`] — mantissa plus a coarse binary exponent, rescaled lazily
//!
//! All representations only need to hold non-negative values.

use core::cmp::Ordering;
use core::fmt::Debug;
use core::ops::{Add, Div, Mul};

use crate::{Result, SylvaError};

/// A non-negative real number in some internal representation.
pub trait Real:
    Copy
    + Debug
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Additive identity.
    fn zero() -> Self;

    /// Multiplicative identity.
    fn one() -> Self;

    /// Convert from a plain non-negative `f64`.
    fn from_f64(x: f64) -> Self;

    /// Convert to a plain `f64`. May underflow to zero or overflow to infinity.
    fn to_f64(self) -> f64;

    /// Natural logarithm of the value, computed without leaving the representation.
    fn to_ln(self) -> f64;

    /// True if the value is exactly zero.
    fn is_zero(self) -> bool;
}

impl Real for f64 {
    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    fn from_f64(x: f64) -> Self {
        x
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn to_ln(self) -> f64 {
        self.ln()
    }

    fn is_zero(self) -> bool {
        self == 0.0
    }
}

// ── Log-domain representation ─────────────────────────────────────────────

/// A probability stored as its natural logarithm: `ln(p)`.
///
/// Negative infinity represents zero. Values above one are allowed when used
/// through [`Real`], since partial likelihoods are not always probabilities.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogProb(pub f64);

impl LogProb {
    /// Create a [`LogProb`] from a raw probability in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `p` is not in `(0, 1]`.
    pub fn from_prob(p: f64) -> Result<Self> {
        if p <= 0.0 || p > 1.0 {
            return Err(SylvaError::InvalidInput(
                "LogProb::from_prob: p must be in (0, 1]".into(),
            ));
        }
        Ok(Self(p.ln()))
    }

    /// Convert back to a raw probability.
    pub fn to_prob(self) -> f64 {
        self.0.exp()
    }

    /// Log-sum-exp: compute `ln(exp(self) + exp(other))` without overflow.
    pub fn ln_add(self, other: Self) -> Self {
        if self.0 == f64::NEG_INFINITY {
            return other;
        }
        if other.0 == f64::NEG_INFINITY {
            return self;
        }
        let (max, min) = if self.0 >= other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        Self(max + (min - max).exp().ln_1p())
    }

    /// Multiply two probabilities in log-space (addition of log values).
    pub fn ln_mul(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    /// Certain event: `ln(1) = 0`.
    pub const fn certain() -> Self {
        Self(0.0)
    }

    /// Impossible event: `ln(0) = -∞`.
    pub const fn impossible() -> Self {
        Self(f64::NEG_INFINITY)
    }
}

impl Add for LogProb {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.ln_add(rhs)
    }
}

impl Mul for LogProb {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.ln_mul(rhs)
    }
}

impl Div for LogProb {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        if self.0 == f64::NEG_INFINITY {
            return self;
        }
        Self(self.0 - rhs.0)
    }
}

impl Real for LogProb {
    fn zero() -> Self {
        Self::impossible()
    }

    fn one() -> Self {
        Self::certain()
    }

    fn from_f64(x: f64) -> Self {
        Self(x.ln())
    }

    fn to_f64(self) -> f64 {
        self.0.exp()
    }

    fn to_ln(self) -> f64 {
        self.0
    }

    fn is_zero(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }
}

// ── Rescaled representation ───────────────────────────────────────────────

/// Number of binary orders of magnitude in one exponent step.
const SCALE_BITS: i32 = 256;
/// `2^SCALE_BITS`
const SCALE_UP: f64 = 1.157_920_892_373_161_95e77;
/// `2^-SCALE_BITS`
const SCALE_DOWN: f64 = 8.636_168_555_094_444_6e-78;
/// Exponent steps beyond which the smaller addend is negligible.
const MAX_ALIGN: i64 = 4;

/// A non-negative value stored as `mantissa · 2^(256 · exponent)`.
///
/// The mantissa is kept within `[2^-256, 2^256]` so products of two mantissas
/// never leave the `f64` range. Arithmetic is nearly as cheap as `f64` and the
/// representable range is effectively unbounded.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaledReal {
    mantissa: f64,
    exponent: i64,
}

impl ScaledReal {
    fn normalized(mut mantissa: f64, mut exponent: i64) -> Self {
        if mantissa == 0.0 {
            return Self { mantissa: 0.0, exponent: 0 };
        }
        if !mantissa.is_finite() {
            return Self { mantissa, exponent };
        }
        while mantissa.abs() < SCALE_DOWN {
            mantissa *= SCALE_UP;
            exponent -= 1;
        }
        while mantissa.abs() > SCALE_UP {
            mantissa *= SCALE_DOWN;
            exponent += 1;
        }
        Self { mantissa, exponent }
    }

    /// The mantissa, in `[2^-256, 2^256]` unless the value is zero.
    pub fn mantissa(&self) -> f64 {
        self.mantissa
    }

    /// The exponent in units of `2^256`.
    pub fn exponent(&self) -> i64 {
        self.exponent
    }
}

impl Add for ScaledReal {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if self.mantissa == 0.0 {
            return rhs;
        }
        if rhs.mantissa == 0.0 {
            return self;
        }
        let (hi, lo) = if self.exponent >= rhs.exponent {
            (self, rhs)
        } else {
            (rhs, self)
        };
        let shift = hi.exponent - lo.exponent;
        if shift > MAX_ALIGN {
            return hi;
        }
        let aligned = lo.mantissa * SCALE_DOWN.powi(shift as i32);
        Self::normalized(hi.mantissa + aligned, hi.exponent)
    }
}

impl Mul for ScaledReal {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::normalized(self.mantissa * rhs.mantissa, self.exponent + rhs.exponent)
    }
}

impl Div for ScaledReal {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self::normalized(self.mantissa / rhs.mantissa, self.exponent - rhs.exponent)
    }
}

impl PartialEq for ScaledReal {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for ScaledReal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.mantissa == 0.0, other.mantissa == 0.0) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => self.to_ln().partial_cmp(&other.to_ln()),
        }
    }
}

impl Real for ScaledReal {
    fn zero() -> Self {
        Self { mantissa: 0.0, exponent: 0 }
    }

    fn one() -> Self {
        Self { mantissa: 1.0, exponent: 0 }
    }

    fn from_f64(x: f64) -> Self {
        Self::normalized(x, 0)
    }

    fn to_f64(self) -> f64 {
        if self.mantissa == 0.0 {
            return 0.0;
        }
        if self.exponent < -MAX_ALIGN {
            return 0.0;
        }
        if self.exponent > MAX_ALIGN {
            return f64::INFINITY;
        }
        // Two steps keep the intermediate scale factor finite.
        let half = (self.exponent / 2) as i32;
        let rest = self.exponent as i32 - half;
        self.mantissa * SCALE_UP.powi(half) * SCALE_UP.powi(rest)
    }

    fn to_ln(self) -> f64 {
        self.mantissa.ln() + (self.exponent as f64) * (SCALE_BITS as f64) * core::f64::consts::LN_2
    }

    fn is_zero(self) -> bool {
        self.mantissa == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn logprob_from_prob_half() {
        let lp = LogProb::from_prob(0.5).unwrap();
        assert!((lp.0 - 0.5_f64.ln()).abs() < TOL);
    }

    #[test]
    fn logprob_invalid() {
        assert!(LogProb::from_prob(0.0).is_err());
        assert!(LogProb::from_prob(-0.5).is_err());
        assert!(LogProb::from_prob(1.5).is_err());
    }

    #[test]
    fn logprob_ln_add() {
        let a = LogProb::from_prob(0.3).unwrap();
        let b = LogProb::from_prob(0.2).unwrap();
        assert!(((a + b).to_prob() - 0.5).abs() < TOL);
        assert!(((a + LogProb::zero()).to_prob() - 0.3).abs() < TOL);
    }

    #[test]
    fn logprob_div_of_zero_stays_zero() {
        let z = LogProb::zero() / LogProb::from_f64(0.5);
        assert!(z.is_zero());
    }

    #[test]
    fn scale_constants_are_powers_of_two() {
        assert_eq!(SCALE_UP, 2f64.powi(SCALE_BITS));
        assert_eq!(SCALE_DOWN, 2f64.powi(-SCALE_BITS));
    }

    #[test]
    fn scaled_matches_f64_in_range() {
        let a = ScaledReal::from_f64(0.3);
        let b = ScaledReal::from_f64(0.2);
        assert!(((a + b).to_f64() - 0.5).abs() < TOL);
        assert!(((a * b).to_f64() - 0.06).abs() < TOL);
        assert!(((a / b).to_f64() - 1.5).abs() < TOL);
    }

    #[test]
    fn scaled_survives_underflow() {
        // 0.01^500 = 1e-1000, far below f64::MIN_POSITIVE.
        let small = ScaledReal::from_f64(0.01);
        let mut acc = ScaledReal::one();
        for _ in 0..500 {
            acc = acc * small;
        }
        assert!(!acc.is_zero());
        let expected = 500.0 * 0.01_f64.ln();
        assert!((acc.to_ln() - expected).abs() < 1e-8);
        assert_eq!(acc.to_f64(), 0.0);

        let plain: f64 = (0..500).fold(1.0, |p, _| p * 0.01);
        assert_eq!(plain, 0.0);
    }

    #[test]
    fn scaled_addition_aligns_exponents() {
        let tiny = (0..3).fold(ScaledReal::one(), |p, _| p * ScaledReal::from_f64(1e-100));
        let sum = tiny + tiny;
        assert!((sum.to_ln() - (2.0_f64.ln() - 300.0 * 10f64.ln())).abs() < 1e-8);
        // A value 10^300 times larger absorbs the small one.
        let big = ScaledReal::one();
        assert!(((big + tiny).to_f64() - 1.0).abs() < TOL);
    }

    #[test]
    fn scaled_ordering_and_equality() {
        let a = ScaledReal::from_f64(2.0);
        let b = ScaledReal::from_f64(3.0);
        assert!(a < b);
        assert!(ScaledReal::zero() < a);
        let c = ScaledReal::from_f64(6.0) / b;
        assert_eq!(a, c);
    }

    #[test]
    fn representations_agree() {
        fn chain<R: Real>() -> f64 {
            let xs = [0.25, 0.1, 0.7, 0.05];
            let mut acc = R::zero();
            for &x in &xs {
                acc = acc + R::from_f64(x) * R::from_f64(x);
            }
            (acc / R::from_f64(2.0)).to_f64()
        }
        let plain = chain::<f64>();
        assert!((chain::<LogProb>() - plain).abs() < TOL);
        assert!((chain::<ScaledReal>() - plain).abs() < TOL);
    }
}
