//! Dense helpers for the normal equations of the forecast model.

use anyhow::Result;

/// Symmetric matrix stored row-major.
#[derive(Clone, Debug)]
pub struct SymMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SymMatrix {
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn add_diagonal(&mut self, diag: &[f64]) {
        for (i, d) in diag.iter().enumerate().take(self.n) {
            self.data[i * self.n + i] += d;
        }
    }

    /// Accumulates `x xᵀ` (upper triangle only; mirrored by `symmetrize`).
    pub fn add_outer(&mut self, x: &[f64]) {
        for i in 0..self.n {
            let xi = x[i];
            if xi == 0.0 {
                continue;
            }
            let row = &mut self.data[i * self.n..(i + 1) * self.n];
            for j in i..self.n {
                row[j] += xi * x[j];
            }
        }
    }

    pub fn symmetrize(&mut self) {
        for i in 0..self.n {
            for j in 0..i {
                self.data[i * self.n + j] = self.data[j * self.n + i];
            }
        }
    }
}

/// Solves `A x = b` for symmetric positive definite `A` via Cholesky.
pub fn cholesky_solve(a: &SymMatrix, b: &[f64]) -> Result<Vec<f64>> {
    let n = a.dim();
    if b.len() != n {
        anyhow::bail!("dimension mismatch: matrix {}x{}, rhs {}", n, n, b.len());
    }

    // Lower-triangular factor L with A = L Lᵀ
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a.get(i, j);
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    anyhow::bail!("matrix is not positive definite (pivot {} = {})", i, sum);
                }
                l[i * n + i] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    // Forward: L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i * n + k] * y[k];
        }
        y[i] = sum / l[i * n + i];
    }

    // Backward: Lᵀ x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[k * n + i] * x[k];
        }
        x[i] = sum / l[i * n + i];
    }

    Ok(x)
}

/// Linear-interpolated percentile of an ascending slice, `q` in `[0, 1]`.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cholesky_solves_small_system() {
        // A = [[4, 2], [2, 3]], b = [2, 1] → x = [0.5, 0]
        let mut a = SymMatrix::zeros(2);
        a.add_outer(&[2.0, 1.0]);
        a.add_outer(&[0.0, 1.4142135623730951]);
        a.symmetrize();
        assert!((a.get(0, 0) - 4.0).abs() < 1e-12);
        assert!((a.get(1, 0) - 2.0).abs() < 1e-12);

        let x = cholesky_solve(&a, &[2.0, 1.0]).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-9);
        assert!(x[1].abs() < 1e-9);
    }

    #[test]
    fn test_cholesky_rejects_singular() {
        let mut a = SymMatrix::zeros(2);
        a.add_outer(&[1.0, 1.0]);
        a.symmetrize();
        assert!(cholesky_solve(&a, &[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&v, 0.0), 1.0);
        assert_eq!(percentile_sorted(&v, 0.5), 3.0);
        assert!((percentile_sorted(&v, 0.1) - 1.4).abs() < 1e-12);
        assert!(percentile_sorted(&[], 0.5).is_nan());
    }
}
