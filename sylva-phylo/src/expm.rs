//! Matrix exponentials of rate matrices and stationary distributions.
//!
//! Two routes to `P(t) = exp(Q t)`:
//!
//! - [`taylor`]: scaling and squaring around a truncated Taylor series.
//!   Works for any rate matrix.
//! - [`EigenSystem`]: Jacobi eigendecomposition of the symmetrised matrix
//!   `diag(√π) Q diag(1/√π)`. Valid only for time-reversible `Q`; one
//!   decomposition serves every branch length.

use sylva_core::{Result, SylvaError};

/// Dense square matrix, row-major.
pub type Matrix = Vec<Vec<f64>>;

/// Relative tolerance for the detailed-balance check.
const REVERSIBILITY_TOL: f64 = 1e-9;

/// Check that `q` is an `n`×`n` matrix with finite, non-negative
/// off-diagonal entries. Diagonal entries are ignored.
pub fn validate_rates(q: &[Vec<f64>], n: usize) -> Result<()> {
    if q.len() != n {
        return Err(SylvaError::Rate(format!(
            "rate matrix has {} rows, expected {}",
            q.len(),
            n
        )));
    }
    for (i, row) in q.iter().enumerate() {
        if row.len() != n {
            return Err(SylvaError::Rate(format!(
                "rate matrix row {} has {} entries, expected {}",
                i,
                row.len(),
                n
            )));
        }
        for (j, &r) in row.iter().enumerate() {
            if i == j {
                continue;
            }
            if !r.is_finite() {
                return Err(SylvaError::Rate(format!("rate q[{}][{}] is {}", i, j, r)));
            }
            if r < 0.0 {
                return Err(SylvaError::Rate(format!(
                    "rate q[{}][{}] = {} is negative",
                    i, j, r
                )));
            }
        }
    }
    Ok(())
}

/// Overwrite the diagonal so every row sums to zero.
pub fn fill_diagonal(q: &mut [Vec<f64>]) {
    for i in 0..q.len() {
        let off: f64 = (0..q.len()).filter(|&j| j != i).map(|j| q[i][j]).sum();
        q[i][i] = -off;
    }
}

/// `Q · s` as a new matrix.
pub fn scaled(q: &[Vec<f64>], s: f64) -> Matrix {
    q.iter().map(|row| row.iter().map(|&x| x * s).collect()).collect()
}

fn identity(n: usize) -> Matrix {
    (0..n)
        .map(|i| {
            let mut row = vec![0.0; n];
            row[i] = 1.0;
            row
        })
        .collect()
}

fn matmul(a: &[Vec<f64>], b: &[Vec<f64>]) -> Matrix {
    let n = a.len();
    let mut out = vec![vec![0.0; n]; n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i][k];
            if aik == 0.0 {
                continue;
            }
            for j in 0..n {
                out[i][j] += aik * b[k][j];
            }
        }
    }
    out
}

fn inf_norm(a: &[Vec<f64>]) -> f64 {
    a.iter()
        .map(|row| row.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// `exp(A)` by scaling and squaring a truncated Taylor series.
///
/// `A` is scaled by `2^-s` until its infinity norm is at most
/// `force_square`; the series runs until terms drop below machine
/// precision, but never stops before `min_terms` terms. Tiny negative
/// entries from rounding are clamped to zero.
pub fn taylor(a: &[Vec<f64>], min_terms: usize, force_square: f64) -> Matrix {
    let n = a.len();
    let norm = inf_norm(a);
    let mut squarings = 0u32;
    if norm > force_square && force_square > 0.0 {
        squarings = (norm / force_square).log2().ceil().max(0.0) as u32;
    }
    let scale = 0.5f64.powi(squarings as i32);
    let a = scaled(a, scale);

    let mut sum = identity(n);
    let mut term = identity(n);
    let mut k = 1usize;
    loop {
        term = scaled(&matmul(&term, &a), 1.0 / k as f64);
        for i in 0..n {
            for j in 0..n {
                sum[i][j] += term[i][j];
            }
        }
        let small = inf_norm(&term) <= f64::EPSILON * inf_norm(&sum);
        if (small && k >= min_terms) || k >= 200 {
            break;
        }
        k += 1;
    }

    for _ in 0..squarings {
        sum = matmul(&sum, &sum);
    }
    clamp_negative(&mut sum);
    sum
}

fn clamp_negative(p: &mut [Vec<f64>]) {
    for row in p.iter_mut() {
        for x in row.iter_mut() {
            if *x < 0.0 {
                *x = 0.0;
            }
        }
    }
}

/// Stationary distribution of a rate matrix with zero row sums.
///
/// Solves `π Q = 0` with `Σ π = 1`. Fails with a rate error when the
/// system is singular (the chain is reducible) or the solution has
/// clearly negative entries.
pub fn stationary(q: &[Vec<f64>]) -> Result<Vec<f64>> {
    let n = q.len();
    if n == 1 {
        return Ok(vec![1.0]);
    }
    // Rows of Qᵀ, with the last equation replaced by Σ π = 1.
    let mut a: Matrix = (0..n).map(|i| (0..n).map(|j| q[j][i]).collect()).collect();
    a[n - 1] = vec![1.0; n];
    let mut b = vec![0.0; n];
    b[n - 1] = 1.0;

    let scale = inf_norm(q).max(1.0);
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-13 * scale {
            return Err(SylvaError::Rate(
                "rate matrix has no unique stationary distribution".into(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for r in (col + 1)..n {
            let f = a[r][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for c in col..n {
                a[r][c] -= f * a[col][c];
            }
            b[r] -= f * b[col];
        }
    }
    let mut pi = vec![0.0; n];
    for i in (0..n).rev() {
        let s: f64 = ((i + 1)..n).map(|j| a[i][j] * pi[j]).sum();
        pi[i] = (b[i] - s) / a[i][i];
    }

    if pi.iter().any(|&x| x < -1e-10 || !x.is_finite()) {
        return Err(SylvaError::Rate(format!(
            "stationary distribution has negative entries: {:?}",
            pi
        )));
    }
    for x in pi.iter_mut() {
        *x = x.max(0.0);
    }
    let total: f64 = pi.iter().sum();
    Ok(pi.into_iter().map(|x| x / total).collect())
}

/// Eigendecomposition of a reversible rate matrix, reusable across branch lengths.
#[derive(Debug, Clone)]
pub struct EigenSystem {
    values: Vec<f64>,
    vectors: Matrix,
    sqrt_pi: Vec<f64>,
}

impl EigenSystem {
    /// Decompose `q` with stationary distribution `pi`.
    ///
    /// Fails with a rate error if `pi` has zero entries or `q` violates
    /// detailed balance `π_i q_ij = π_j q_ji`.
    pub fn new(q: &[Vec<f64>], pi: &[f64]) -> Result<Self> {
        let n = q.len();
        if pi.len() != n {
            return Err(SylvaError::Rate(format!(
                "{} frequencies for a {}-state rate matrix",
                pi.len(),
                n
            )));
        }
        if pi.iter().any(|&p| p <= 0.0) {
            return Err(SylvaError::Rate(
                "eigen exponentiation needs strictly positive stationary frequencies".into(),
            ));
        }
        let scale = inf_norm(q).max(f64::MIN_POSITIVE);
        for i in 0..n {
            for j in (i + 1)..n {
                let flow = pi[i] * q[i][j];
                let back = pi[j] * q[j][i];
                if (flow - back).abs() > REVERSIBILITY_TOL * scale {
                    return Err(SylvaError::Rate(format!(
                        "rate matrix is not time-reversible ({} <-> {})",
                        i, j
                    )));
                }
            }
        }

        let sqrt_pi: Vec<f64> = pi.iter().map(|p| p.sqrt()).collect();
        let mut b = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                b[i][j] = sqrt_pi[i] * q[i][j] / sqrt_pi[j];
            }
        }
        // Average out rounding so the Jacobi input is exactly symmetric.
        for i in 0..n {
            for j in (i + 1)..n {
                let m = 0.5 * (b[i][j] + b[j][i]);
                b[i][j] = m;
                b[j][i] = m;
            }
        }
        let (values, vectors) = jacobi(b);
        Ok(Self {
            values,
            vectors,
            sqrt_pi,
        })
    }

    /// Eigenvalues of the rate matrix.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// `exp(Q t)`.
    pub fn exp(&self, t: f64) -> Matrix {
        let n = self.values.len();
        let e: Vec<f64> = self.values.iter().map(|&l| (l * t).exp()).collect();
        let mut p = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += self.vectors[i][k] * e[k] * self.vectors[j][k];
                }
                p[i][j] = (sum * self.sqrt_pi[j] / self.sqrt_pi[i]).max(0.0);
            }
        }
        p
    }
}

/// Cyclic Jacobi eigenvalue iteration for a real symmetric matrix.
///
/// Returns eigenvalues and a matrix whose columns are the eigenvectors.
fn jacobi(mut a: Matrix) -> (Vec<f64>, Matrix) {
    let n = a.len();
    let mut v = identity(n);

    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < 1e-30 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k][p];
                    let vkq = v[k][q];
                    v[k][p] = c * vkp - s * vkq;
                    v[k][q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[i][i]).collect();
    (values, v)
}
