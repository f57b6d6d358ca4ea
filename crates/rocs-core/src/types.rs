//! Dense types and local function approximations
//!
//! All solver data is dynamically sized. Trajectories are plain `Vec`s of
//! these types, indexed by the time-discretization node.

use nalgebra::{DMatrix, DVector};

/// Scalar type used throughout the workspace
pub type Scalar = f64;

/// Dynamically sized dense vector
pub type Vector = DVector<Scalar>;

/// Dynamically sized dense matrix
pub type Matrix = DMatrix<Scalar>;

/// Quadratic approximation of a scalar function
///
/// `f(x + dx, u + du) ≈ 1/2 dx' dfdxx dx + du' dfdux dx + 1/2 du' dfduu du
///                      + dfdx' dx + dfdu' du + f`
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarFunctionQuadraticApproximation {
    /// Second derivative w.r.t. state
    pub dfdxx: Matrix,
    /// Second derivative w.r.t. input (lhs) and state (rhs)
    pub dfdux: Matrix,
    /// Second derivative w.r.t. input
    pub dfduu: Matrix,
    /// First derivative w.r.t. state
    pub dfdx: Vector,
    /// First derivative w.r.t. input
    pub dfdu: Vector,
    /// Constant term
    pub f: Scalar,
}

impl Default for ScalarFunctionQuadraticApproximation {
    fn default() -> Self {
        Self::zero(0, 0)
    }
}

impl ScalarFunctionQuadraticApproximation {
    /// Zero-initialized approximation of the given state/input dimensions.
    ///
    /// Every block has the exact stated shape, including the empty blocks
    /// when `nx == 0` or `nu == 0`.
    pub fn zero(nx: usize, nu: usize) -> Self {
        Self {
            dfdxx: Matrix::zeros(nx, nx),
            dfdux: Matrix::zeros(nu, nx),
            dfduu: Matrix::zeros(nu, nu),
            dfdx: Vector::zeros(nx),
            dfdu: Vector::zeros(nu),
            f: 0.0,
        }
    }

    /// Reallocates every block to the stated shape. Coefficient values are
    /// unspecified afterwards; use [`set_zero`](Self::set_zero) when a
    /// zeroed approximation is needed.
    pub fn resize(&mut self, nx: usize, nu: usize) -> &mut Self {
        self.dfdx.resize_vertically_mut(nx, 0.0);
        self.dfdu.resize_vertically_mut(nu, 0.0);
        self.dfdxx.resize_mut(nx, nx, 0.0);
        self.dfdux.resize_mut(nu, nx, 0.0);
        self.dfduu.resize_mut(nu, nu, 0.0);
        self
    }

    /// Resizes all members and resets them to zero.
    pub fn set_zero(&mut self, nx: usize, nu: usize) {
        *self = Self::zero(nx, nu);
    }

    /// State dimension of the approximation.
    pub fn state_dim(&self) -> usize {
        self.dfdx.len()
    }

    /// Input dimension of the approximation.
    pub fn input_dim(&self) -> usize {
        self.dfdu.len()
    }

    /// Scales every coefficient, e.g. when converting a cost rate into a
    /// stage cost over an interval of length `s`.
    pub fn scale(&mut self, s: Scalar) {
        self.f *= s;
        self.dfdx *= s;
        self.dfdu *= s;
        self.dfdxx *= s;
        self.dfdux *= s;
        self.dfduu *= s;
    }

    /// Evaluates the approximation at a deviation `(dx, du)`.
    pub fn evaluate(&self, dx: &Vector, du: &Vector) -> Scalar {
        let mut v = self.f + self.dfdx.dot(dx) + self.dfdu.dot(du);
        v += 0.5 * dx.dot(&(&self.dfdxx * dx));
        v += du.dot(&(&self.dfdux * dx));
        v += 0.5 * du.dot(&(&self.dfduu * du));
        v
    }

    /// Returns a non-empty description on the first non-finite coefficient.
    pub fn check_finite(&self) -> Result<(), String> {
        if !self.f.is_finite() {
            return Err("cost constant term is not finite".to_string());
        }
        if self.dfdx.iter().any(|v| !v.is_finite()) || self.dfdu.iter().any(|v| !v.is_finite()) {
            return Err("cost gradient is not finite".to_string());
        }
        if self.dfdxx.iter().any(|v| !v.is_finite())
            || self.dfdux.iter().any(|v| !v.is_finite())
            || self.dfduu.iter().any(|v| !v.is_finite())
        {
            return Err("cost Hessian is not finite".to_string());
        }
        Ok(())
    }
}

impl std::ops::AddAssign<&ScalarFunctionQuadraticApproximation> for ScalarFunctionQuadraticApproximation {
    fn add_assign(&mut self, rhs: &ScalarFunctionQuadraticApproximation) {
        self.f += rhs.f;
        self.dfdx += &rhs.dfdx;
        self.dfdu += &rhs.dfdu;
        self.dfdxx += &rhs.dfdxx;
        self.dfdux += &rhs.dfdux;
        self.dfduu += &rhs.dfduu;
    }
}

/// Linear approximation of a vector-valued function
///
/// `f(x + dx, u + du) ≈ dfdx dx + dfdu du + f`
#[derive(Clone, Debug, PartialEq)]
pub struct VectorFunctionLinearApproximation {
    /// Derivative w.r.t. state
    pub dfdx: Matrix,
    /// Derivative w.r.t. input
    pub dfdu: Matrix,
    /// Constant term
    pub f: Vector,
}

impl Default for VectorFunctionLinearApproximation {
    fn default() -> Self {
        Self::zero(0, 0, 0)
    }
}

impl VectorFunctionLinearApproximation {
    /// Zero-initialized approximation: `nv` rows, `nx` state columns, `nu`
    /// input columns. `nu == 0` models pure state functions (jump maps,
    /// state-only constraints).
    pub fn zero(nv: usize, nx: usize, nu: usize) -> Self {
        Self {
            dfdx: Matrix::zeros(nv, nx),
            dfdu: Matrix::zeros(nv, nu),
            f: Vector::zeros(nv),
        }
    }

    /// Reallocates every block to the stated shape. Coefficient values are
    /// unspecified afterwards.
    pub fn resize(&mut self, nv: usize, nx: usize, nu: usize) -> &mut Self {
        self.f.resize_vertically_mut(nv, 0.0);
        self.dfdx.resize_mut(nv, nx, 0.0);
        self.dfdu.resize_mut(nv, nu, 0.0);
        self
    }

    /// Resizes all members and sets every coefficient to zero.
    pub fn set_zero(&mut self, nv: usize, nx: usize, nu: usize) {
        *self = Self::zero(nv, nx, nu);
    }

    /// Number of rows of the approximated function.
    pub fn num_rows(&self) -> usize {
        self.f.len()
    }

    /// Stacks `rhs` below `self`. Column dimensions must match.
    pub fn stack(&mut self, rhs: &VectorFunctionLinearApproximation) {
        debug_assert_eq!(self.dfdx.ncols(), rhs.dfdx.ncols());
        debug_assert_eq!(self.dfdu.ncols(), rhs.dfdu.ncols());
        let nv = self.num_rows() + rhs.num_rows();
        let mut f = Vector::zeros(nv);
        f.rows_mut(0, self.num_rows()).copy_from(&self.f);
        f.rows_mut(self.num_rows(), rhs.num_rows()).copy_from(&rhs.f);

        let mut dfdx = Matrix::zeros(nv, self.dfdx.ncols());
        dfdx.rows_mut(0, self.num_rows()).copy_from(&self.dfdx);
        dfdx.rows_mut(self.num_rows(), rhs.num_rows()).copy_from(&rhs.dfdx);

        let mut dfdu = Matrix::zeros(nv, self.dfdu.ncols());
        dfdu.rows_mut(0, self.num_rows()).copy_from(&self.dfdu);
        dfdu.rows_mut(self.num_rows(), rhs.num_rows()).copy_from(&rhs.dfdu);

        self.f = f;
        self.dfdx = dfdx;
        self.dfdu = dfdu;
    }

    /// Returns a non-empty description on the first non-finite coefficient.
    pub fn check_finite(&self) -> Result<(), String> {
        if self.f.iter().any(|v| !v.is_finite()) {
            return Err("constant term is not finite".to_string());
        }
        if self.dfdx.iter().any(|v| !v.is_finite()) || self.dfdu.iter().any(|v| !v.is_finite()) {
            return Err("Jacobian is not finite".to_string());
        }
        Ok(())
    }
}

/// Quadratic approximation of a vector-valued function, one symmetric
/// Hessian triplet per output row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorFunctionQuadraticApproximation {
    /// Second derivatives w.r.t. state, one per row
    pub dfdxx: Vec<Matrix>,
    /// Second derivatives w.r.t. input and state, one per row
    pub dfdux: Vec<Matrix>,
    /// Second derivatives w.r.t. input, one per row
    pub dfduu: Vec<Matrix>,
    /// First derivative w.r.t. state
    pub dfdx: Matrix,
    /// First derivative w.r.t. input
    pub dfdu: Matrix,
    /// Constant term
    pub f: Vector,
}

impl VectorFunctionQuadraticApproximation {
    /// Zero-initialized approximation of the given shape.
    pub fn zero(nv: usize, nx: usize, nu: usize) -> Self {
        Self {
            dfdxx: vec![Matrix::zeros(nx, nx); nv],
            dfdux: vec![Matrix::zeros(nu, nx); nv],
            dfduu: vec![Matrix::zeros(nu, nu); nv],
            dfdx: Matrix::zeros(nv, nx),
            dfdu: Matrix::zeros(nv, nu),
            f: Vector::zeros(nv),
        }
    }

    /// Reallocates every block, including the per-row Hessian triplets, to
    /// the stated shape. Coefficient values are unspecified afterwards.
    pub fn resize(&mut self, nv: usize, nx: usize, nu: usize) -> &mut Self {
        self.f.resize_vertically_mut(nv, 0.0);
        self.dfdx.resize_mut(nv, nx, 0.0);
        self.dfdu.resize_mut(nv, nu, 0.0);
        self.dfdxx.resize(nv, Matrix::zeros(nx, nx));
        self.dfdux.resize(nv, Matrix::zeros(nu, nx));
        self.dfduu.resize(nv, Matrix::zeros(nu, nu));
        for i in 0..nv {
            self.dfdxx[i].resize_mut(nx, nx, 0.0);
            self.dfdux[i].resize_mut(nu, nx, 0.0);
            self.dfduu[i].resize_mut(nu, nu, 0.0);
        }
        self
    }

    /// Resizes all members and sets every coefficient to zero.
    pub fn set_zero(&mut self, nv: usize, nx: usize, nu: usize) {
        *self = Self::zero(nv, nx, nu);
    }

    /// Drops the curvature blocks, keeping the linear model.
    pub fn to_linear(&self) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            dfdx: self.dfdx.clone(),
            dfdu: self.dfdu.clone(),
            f: self.f.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_factory_has_stated_shapes() {
        for &(nx, nu) in &[(0usize, 0usize), (3, 0), (0, 2), (4, 2)] {
            let q = ScalarFunctionQuadraticApproximation::zero(nx, nu);
            assert_eq!(q.dfdxx.shape(), (nx, nx));
            assert_eq!(q.dfdux.shape(), (nu, nx));
            assert_eq!(q.dfduu.shape(), (nu, nu));
            assert_eq!(q.dfdx.len(), nx);
            assert_eq!(q.dfdu.len(), nu);
            assert_eq!(q.f, 0.0);
        }
    }

    #[test]
    fn add_assign_zero_is_identity() {
        let mut q = ScalarFunctionQuadraticApproximation::zero(3, 2);
        q.f = 1.5;
        q.dfdx[0] = -2.0;
        q.dfduu[(1, 1)] = 4.0;
        let before = q.clone();
        q += &ScalarFunctionQuadraticApproximation::zero(3, 2);
        assert_eq!(q, before);
    }

    #[test]
    fn resize_reallocates_to_the_stated_shapes() {
        let mut q = ScalarFunctionQuadraticApproximation::zero(2, 1);
        q.resize(4, 3);
        assert_eq!(q.dfdxx.shape(), (4, 4));
        assert_eq!(q.dfdux.shape(), (3, 4));
        assert_eq!(q.dfduu.shape(), (3, 3));
        assert_eq!(q.dfdx.len(), 4);
        assert_eq!(q.dfdu.len(), 3);

        let mut g = VectorFunctionLinearApproximation::zero(1, 2, 2);
        g.resize(3, 2, 0);
        assert_eq!(g.num_rows(), 3);
        assert_eq!(g.dfdx.shape(), (3, 2));
        assert_eq!(g.dfdu.shape(), (3, 0));

        let mut v = VectorFunctionQuadraticApproximation::zero(1, 2, 1);
        v.resize(2, 3, 1);
        assert_eq!(v.dfdxx.len(), 2);
        assert_eq!(v.dfdxx[1].shape(), (3, 3));
        assert_eq!(v.dfdux[0].shape(), (1, 3));
        assert_eq!(v.dfdx.shape(), (2, 3));
    }

    #[test]
    fn linear_approximation_empty_input_block() {
        let g = VectorFunctionLinearApproximation::zero(2, 3, 0);
        assert_eq!(g.dfdu.shape(), (2, 0));
        assert_eq!(g.num_rows(), 2);
    }

    #[test]
    fn stacking_concatenates_rows() {
        let mut a = VectorFunctionLinearApproximation::zero(1, 2, 2);
        a.f[0] = 1.0;
        let mut b = VectorFunctionLinearApproximation::zero(2, 2, 2);
        b.f[1] = 3.0;
        a.stack(&b);
        assert_eq!(a.num_rows(), 3);
        assert_eq!(a.f[0], 1.0);
        assert_eq!(a.f[2], 3.0);
    }

    #[test]
    fn vector_quadratic_carries_one_hessian_triplet_per_row() {
        let q = VectorFunctionQuadraticApproximation::zero(3, 2, 1);
        assert_eq!(q.dfdxx.len(), 3);
        assert_eq!(q.dfdux.len(), 3);
        assert_eq!(q.dfduu.len(), 3);
        assert_eq!(q.dfdxx[0].shape(), (2, 2));
        assert_eq!(q.dfdux[2].shape(), (1, 2));

        let linear = q.to_linear();
        assert_eq!(linear.num_rows(), 3);
        assert_eq!(linear.dfdx.shape(), (3, 2));
        assert_eq!(linear.dfdu.shape(), (3, 1));
    }

    #[test]
    fn quadratic_evaluation_matches_manual_expansion() {
        let mut q = ScalarFunctionQuadraticApproximation::zero(2, 1);
        q.f = 0.5;
        q.dfdx = Vector::from_vec(vec![1.0, -1.0]);
        q.dfdu = Vector::from_vec(vec![2.0]);
        q.dfdxx = Matrix::identity(2, 2) * 2.0;
        q.dfduu = Matrix::identity(1, 1);
        let dx = Vector::from_vec(vec![1.0, 2.0]);
        let du = Vector::from_vec(vec![-1.0]);
        // 0.5 + (1 - 2) + (-2) + 0.5*2*(1 + 4) + 0.5*1
        assert!((q.evaluate(&dx, &du) - (0.5 - 1.0 - 2.0 + 5.0 + 0.5)).abs() < 1e-12);
    }
}
