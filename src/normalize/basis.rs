//! Polynomial basis for the log-domain bias field
//!
//! Third-order polynomial in scanner coordinates: constant, linear,
//! quadratic and cubic monomials plus the `xyz` cross term.

/// Number of basis functions
pub const BASIS_SIZE: usize = 20;

/// Evaluate the basis at a scanner-space position
#[inline]
pub fn basis_function(pos: [f64; 3]) -> [f64; BASIS_SIZE] {
    let [x, y, z] = pos;
    [
        1.0,
        x,
        y,
        z,
        x * x,
        y * y,
        z * z,
        x * y,
        x * z,
        y * z,
        x * x * x,
        y * y * y,
        z * z * z,
        x * x * y,
        x * x * z,
        y * y * x,
        y * y * z,
        z * z * x,
        z * z * y,
        x * y * z,
    ]
}

/// Dot product of the basis at `pos` with a weight vector
#[inline]
pub fn evaluate(pos: [f64; 3], weights: &[f64]) -> f64 {
    basis_function(pos)
        .iter()
        .zip(weights)
        .map(|(b, w)| b * w)
        .sum()
}
