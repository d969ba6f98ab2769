//! Linear least squares
//!
//! Solves min ||Ax - b||₂ for tall dense systems without forming the normal
//! equations. A tall system is first reduced with a Householder QR
//! (`Qᵀb` is applied in place, so the thin `Q` is never materialised), then
//! the small triangular factor is solved through an SVD. Singular values
//! below `max(σ) * max(m, n) * ε` are treated as zero, which gives the
//! minimum-norm solution when the columns are linearly dependent.

use nalgebra::{DMatrix, DVector};

use crate::error::{MtnormError, Result};

/// Upper bound on implicit QR sweeps inside the SVD
const MAX_SVD_ITERATIONS: usize = 10_000;

/// Least-squares solution of `a * x = b`
///
/// # Arguments
/// * `a` - Design matrix (m x n), consumed
/// * `b` - Right-hand side of length m, consumed
///
/// # Returns
/// Solution vector of length n, or a numerical error when the decomposition
/// does not converge or the solution is not finite
pub fn least_squares(a: DMatrix<f64>, b: DVector<f64>) -> Result<DVector<f64>> {
    let (m, n) = a.shape();
    if m == 0 || n == 0 {
        return Err(MtnormError::Numerical(format!("empty {}x{} system", m, n)));
    }
    if b.len() != m {
        return Err(MtnormError::Numerical(format!(
            "right-hand side has {} rows, design matrix has {}",
            b.len(),
            m
        )));
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(MtnormError::Numerical("system contains non-finite values".to_string()));
    }

    let (r, qtb) = if m > n {
        let qr = a.qr();
        let mut qtb = b;
        qr.q_tr_mul(&mut qtb);
        (qr.r(), qtb.rows(0, n).into_owned())
    } else {
        (a, b)
    };

    let svd = r
        .try_svd(true, true, f64::EPSILON, MAX_SVD_ITERATIONS)
        .ok_or_else(|| MtnormError::Numerical("SVD did not converge".to_string()))?;

    let tol = svd.singular_values.max() * m.max(n) as f64 * f64::EPSILON;
    let x = svd
        .solve(&qtb, tol)
        .map_err(|e| MtnormError::Numerical(e.to_string()))?;

    if let Some(pos) = x.iter().position(|v| !v.is_finite()) {
        return Err(MtnormError::Numerical(format!(
            "non-finite coefficient at index {}",
            pos
        )));
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_line_fit() {
        // y = 2 + 3x sampled without noise
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let a = DMatrix::from_fn(xs.len(), 2, |r, c| if c == 0 { 1.0 } else { xs[r] });
        let b = DVector::from_iterator(xs.len(), xs.iter().map(|x| 2.0 + 3.0 * x));

        let x = least_squares(a, b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12, "intercept {}", x[0]);
        assert!((x[1] - 3.0).abs() < 1e-12, "slope {}", x[1]);
    }

    #[test]
    fn test_overdetermined_mean() {
        // Single column of ones: least squares picks the mean
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0, 6.0]);
        let a = DMatrix::from_element(4, 1, 1.0);
        let x = least_squares(a, b).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_deficient_gives_minimum_norm() {
        // Two identical columns: any (s, 1 - s) fits, minimum norm is (0.5, 0.5)
        let a = DMatrix::from_element(50, 2, 1.0);
        let b = DVector::from_element(50, 1.0);
        let x = least_squares(a, b).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-10, "x0 = {}", x[0]);
        assert!((x[1] - 0.5).abs() < 1e-10, "x1 = {}", x[1]);
    }

    #[test]
    fn test_underdetermined_system() {
        // Fewer rows than unknowns still yields the minimum-norm solution
        let a = DMatrix::from_row_slice(1, 2, &[3.0, 4.0]);
        let b = DVector::from_vec(vec![25.0]);
        let x = least_squares(a, b).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-10);
        assert!((x[1] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_zero_matrix_gives_zero_solution() {
        let a = DMatrix::zeros(10, 3);
        let b = DVector::from_element(10, 1.0);
        let x = least_squares(a, b).unwrap();
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_empty_system_is_numerical_error() {
        let a = DMatrix::<f64>::zeros(0, 3);
        let b = DVector::<f64>::zeros(0);
        let err = least_squares(a, b).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Numerical);
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let mut a = DMatrix::from_element(5, 2, 1.0);
        a[(0, 1)] = f64::NAN;
        let b = DVector::from_element(5, 1.0);
        assert!(least_squares(a, b).is_err());
    }
}
