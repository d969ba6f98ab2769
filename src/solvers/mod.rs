//! Dense solvers
//!
//! - `lstsq`: rank-revealing least squares (Householder QR + SVD)

pub mod lstsq;

pub use lstsq::least_squares;
