//! Positive-definiteness repair of Hessian blocks

use rocs_core::linalg;
use rocs_core::types::{Matrix, Scalar};

use crate::settings::HessianCorrectionStrategy;

/// Renders a symmetric block positive definite in place by lifting its
/// spectrum (or its factorization pivots) to `minimum_eigenvalue`.
pub fn shift_hessian(
    strategy: HessianCorrectionStrategy,
    hessian: &mut Matrix,
    minimum_eigenvalue: Scalar,
) {
    match strategy {
        HessianCorrectionStrategy::CholeskyModification => {
            linalg::shift_cholesky_pivots(hessian, minimum_eigenvalue)
        }
        HessianCorrectionStrategy::EigenvalueModification => {
            linalg::shift_eigenvalues(hessian, minimum_eigenvalue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_strategies_produce_positive_definite_blocks() {
        for strategy in [
            HessianCorrectionStrategy::CholeskyModification,
            HessianCorrectionStrategy::EigenvalueModification,
        ] {
            let mut h = Matrix::from_row_slice(2, 2, &[1e-8, 0.0, 0.0, -3.0]);
            shift_hessian(strategy, &mut h, 1e-4);
            assert!(h.clone().cholesky().is_some(), "{strategy:?} left an indefinite block");
        }
    }
}
