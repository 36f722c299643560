//! Numerical utilities: χ² gate table, angle wrap-around, covariance
//! sanitation, Gaussian likelihood.

use crate::error::NumericalError;
use crate::types::{DMat, DVec, StateCov};
use nalgebra::SymmetricEigen;

/// Pre-computed χ² thresholds at 99% confidence, indexed by degrees of
/// freedom [1..=6]. `CHI2_99[3]` ≈ 11.345 is the default position gate.
pub const CHI2_99: [f64; 7] = [0.0, 6.635, 9.210, 11.345, 13.277, 15.086, 16.812];

/// Eigenvalue floor applied after every covariance update.
pub const MIN_EIGENVALUE: f64 = 1e-12;

/// Normalise an angle to [−π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let wrapped = (angle + std::f64::consts::PI).rem_euclid(two_pi) - std::f64::consts::PI;
    // rem_euclid maps exactly +π to −π; keep +π representable
    if wrapped == -std::f64::consts::PI && angle > 0.0 {
        std::f64::consts::PI
    } else {
        wrapped
    }
}

/// Signed difference `a − b` accounting for wrap-around, in [−π, π].
pub fn angle_difference(a: f64, b: f64) -> f64 {
    normalize_angle(a - b)
}

/// Symmetrise in place: P ← ½(P + Pᵀ).
pub fn symmetrize(p: &mut StateCov) {
    *p = (*p + p.transpose()) * 0.5;
}

/// Symmetrise and floor the spectrum at [`MIN_EIGENVALUE`].
///
/// Returns `true` when an eigenvalue repair was applied (symmetrisation
/// alone does not count): callers count these events. A non-finite
/// spectrum is beyond repair and comes back as
/// [`NumericalError::IndefiniteCovariance`].
pub fn repair_covariance(p: &mut StateCov) -> Result<bool, NumericalError> {
    // Checked before the decomposition: the eigen solver is only safe on
    // finite input
    if p.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::IndefiniteCovariance { min_eig: f64::NAN });
    }
    symmetrize(p);
    let eigen = SymmetricEigen::new(*p);
    let min_eig = eigen.eigenvalues.min();
    if min_eig >= MIN_EIGENVALUE {
        return Ok(false);
    }
    let mut values = eigen.eigenvalues;
    for v in values.iter_mut() {
        *v = v.max(MIN_EIGENVALUE);
    }
    *p = eigen.eigenvectors * StateCov::from_diagonal(&values) * eigen.eigenvectors.transpose();
    symmetrize(p);
    Ok(true)
}

/// Repair a measurement-space covariance: S ← ½(S + Sᵀ) + εI.
///
/// The εI nudge only cures borderline conditioning; if the spectrum is
/// still indefinite afterwards the matrix is rejected rather than used.
pub fn repair_innovation_cov(s: &mut DMat) -> Result<(), NumericalError> {
    if s.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::IndefiniteCovariance { min_eig: f64::NAN });
    }
    let sym = (&*s + s.transpose()) * 0.5;
    *s = sym;
    for i in 0..s.nrows() {
        s[(i, i)] += MIN_EIGENVALUE;
    }
    let min_eig = SymmetricEigen::new(s.clone()).eigenvalues.min();
    if min_eig < 0.0 {
        return Err(NumericalError::IndefiniteCovariance { min_eig });
    }
    Ok(())
}

/// Multivariate Gaussian density N(ν; 0, S). Returns 0 for a singular or
/// non-finite S so the IMM mixer weights the model out gracefully.
pub fn gaussian_likelihood(innovation: &DVec, s: &DMat) -> f64 {
    let dim = innovation.len();
    let det = s.determinant();
    if !det.is_finite() || det.abs() < 1e-300 {
        return 0.0;
    }
    let s_inv = match s.clone().lu().try_inverse() {
        Some(inv) => inv,
        None => return 0.0,
    };
    let maha2 = (innovation.transpose() * &s_inv * innovation)[0];
    if !maha2.is_finite() {
        return 0.0;
    }
    let norm = ((2.0 * std::f64::consts::PI).powi(dim as i32) * det.abs()).sqrt();
    // Underflow of the exponential clamps to 0 by construction
    (-0.5 * maha2).exp() / norm
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
