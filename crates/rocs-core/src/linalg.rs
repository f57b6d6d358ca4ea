//! Dense linear-algebra helpers shared by the Riccati passes and the
//! constraint projection.

use crate::types::{Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector,
                   VectorFunctionLinearApproximation};

/// Smallest eigenvalue of a symmetric matrix. Zero-sized matrices report
/// `+inf` so that empty input blocks pass positive-definiteness checks.
pub fn min_eigenvalue(m: &Matrix) -> Scalar {
    if m.nrows() == 0 {
        return Scalar::INFINITY;
    }
    m.clone()
        .symmetric_eigen()
        .eigenvalues
        .iter()
        .fold(Scalar::INFINITY, |a, &b| a.min(b))
}

/// Lifts the eigenvalues of a symmetric matrix to at least `floor`.
pub fn shift_eigenvalues(m: &mut Matrix, floor: Scalar) {
    if m.nrows() == 0 {
        return;
    }
    let mut eigen = m.clone().symmetric_eigen();
    for v in eigen.eigenvalues.iter_mut() {
        if *v < floor {
            *v = floor;
        }
    }
    let d = Matrix::from_diagonal(&eigen.eigenvalues);
    *m = &eigen.eigenvectors * d * eigen.eigenvectors.transpose();
}

/// Lifts the pivots of a `U D U^T` factorization to at least `floor`.
/// Falls back to the eigenvalue lift when the factorization fails.
pub fn shift_cholesky_pivots(m: &mut Matrix, floor: Scalar) {
    if m.nrows() == 0 {
        return;
    }
    match nalgebra::linalg::UDU::new(m.clone()) {
        Some(mut udu) => {
            let mut modified = false;
            for v in udu.d.iter_mut() {
                if *v < floor {
                    *v = floor;
                    modified = true;
                }
            }
            if modified {
                let d = Matrix::from_diagonal(&udu.d);
                *m = &udu.u * d * udu.u.transpose();
            }
        }
        None => shift_eigenvalues(m, floor),
    }
}

/// Moore-Penrose pseudo-inverse.
pub fn pseudo_inverse(m: &Matrix) -> Matrix {
    if m.nrows() == 0 || m.ncols() == 0 {
        return Matrix::zeros(m.ncols(), m.nrows());
    }
    m.clone()
        .pseudo_inverse(1e-9)
        .unwrap_or_else(|_| Matrix::zeros(m.ncols(), m.nrows()))
}

/// Orthonormal basis of the null space of `d` (columns span `ker d`).
///
/// Obtained from the spectral decomposition of the orthogonal projector
/// `I - d⁺ d`, whose eigenvalues are exactly 0 and 1.
pub fn null_space_basis(d: &Matrix) -> Matrix {
    let n = d.ncols();
    if d.nrows() == 0 {
        return Matrix::identity(n, n);
    }
    let projector = Matrix::identity(n, n) - pseudo_inverse(d) * d;
    let eigen = projector.symmetric_eigen();
    let columns: Vec<Vector> = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > 0.5)
        .map(|(i, _)| eigen.eigenvectors.column(i).into_owned())
        .collect();
    if columns.is_empty() {
        Matrix::zeros(n, 0)
    } else {
        Matrix::from_columns(&columns)
    }
}

/// Applies the affine change of input variables `du = pu dv + px dx + u0`
/// to a quadratic cost approximation.
pub fn change_cost_input_variables(
    cost: &mut ScalarFunctionQuadraticApproximation,
    pu: &Matrix,
    px: &Matrix,
    u0: &Vector,
) {
    let r_u0 = &cost.dfduu * u0;
    let r_px = &cost.dfduu * px;

    cost.f += 0.5 * u0.dot(&r_u0) + cost.dfdu.dot(u0);
    let dfdx = cost.dfdx.clone()
        + cost.dfdux.transpose() * u0
        + px.transpose() * (&cost.dfdu + &r_u0);
    let dfdxx = &cost.dfdxx
        + px.transpose() * &cost.dfdux
        + cost.dfdux.transpose() * px
        + px.transpose() * &r_px;
    let dfdu = pu.transpose() * (&cost.dfdu + r_u0);
    let dfdux = pu.transpose() * (&cost.dfdux + &r_px);
    let dfduu = pu.transpose() * &cost.dfduu * pu;

    cost.dfdx = dfdx;
    cost.dfdxx = dfdxx;
    cost.dfdu = dfdu;
    cost.dfdux = dfdux;
    cost.dfduu = dfduu;
}

/// Applies the affine change of input variables `du = pu dv + px dx + u0`
/// to a linear dynamics approximation.
pub fn change_dynamics_input_variables(
    dynamics: &mut VectorFunctionLinearApproximation,
    pu: &Matrix,
    px: &Matrix,
    u0: &Vector,
) {
    dynamics.f += &dynamics.dfdu * u0;
    dynamics.dfdx += &dynamics.dfdu * px;
    dynamics.dfdu = &dynamics.dfdu * pu;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn eigenvalue_shift_makes_indefinite_matrix_psd() {
        let mut m = Matrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -2.0]);
        shift_eigenvalues(&mut m, 1e-3);
        assert!(min_eigenvalue(&m) >= 1e-4);
    }

    #[test]
    fn pivot_shift_keeps_positive_definite_matrix_unchanged() {
        let m0 = Matrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let mut m = m0.clone();
        shift_cholesky_pivots(&mut m, 1e-6);
        assert_relative_eq!(m, m0, epsilon = 1e-12);
    }

    #[test]
    fn null_basis_is_orthonormal_and_annihilated() {
        let d = Matrix::from_row_slice(1, 3, &[1.0, 2.0, 2.0]);
        let basis = null_space_basis(&d);
        assert_eq!(basis.shape(), (3, 2));
        let prod = &d * &basis;
        assert!(prod.norm() < 1e-9);
        let gram = basis.transpose() * &basis;
        assert_relative_eq!(gram, Matrix::identity(2, 2), epsilon = 1e-9);
    }

    #[test]
    fn empty_constraint_null_basis_is_identity() {
        let d = Matrix::zeros(0, 3);
        assert_eq!(null_space_basis(&d), Matrix::identity(3, 3));
    }
}
