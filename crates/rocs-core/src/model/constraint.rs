//! Constraint term capabilities and reference linear terms

use crate::model::collection::{AsAny, TermCollection};
use crate::model::precomputation::PreComputation;
use crate::types::{Matrix, Scalar, Vector, VectorFunctionLinearApproximation};

/// State-input constraint term `g(t, x, u)`.
///
/// Equality terms require `g = 0`; inequality terms use the feasibility
/// convention `g >= 0`.
pub trait StateInputConstraint: AsAny + Send {
    fn num_constraints(&self, time: Scalar) -> usize;

    fn value(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        precomp: &dyn PreComputation,
    ) -> Vector;

    fn linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation;

    fn clone_boxed(&self) -> Box<dyn StateInputConstraint>;
}

impl Clone for Box<dyn StateInputConstraint> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// State-only constraint term `g(t, x)`.
pub trait StateConstraint: AsAny + Send {
    fn num_constraints(&self, time: Scalar) -> usize;

    fn value(&self, time: Scalar, state: &Vector, precomp: &dyn PreComputation) -> Vector;

    /// Linear approximation with an empty input block.
    fn linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation;

    fn clone_boxed(&self) -> Box<dyn StateConstraint>;
}

impl Clone for Box<dyn StateConstraint> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Affine state-input constraint `g = e + C x + D u`.
#[derive(Clone, Debug)]
pub struct LinearStateInputConstraint {
    pub e: Vector,
    pub c: Matrix,
    pub d: Matrix,
}

impl LinearStateInputConstraint {
    pub fn new(e: Vector, c: Matrix, d: Matrix) -> Self {
        Self { e, c, d }
    }
}

impl StateInputConstraint for LinearStateInputConstraint {
    fn num_constraints(&self, _time: Scalar) -> usize {
        self.e.len()
    }

    fn value(
        &self,
        _time: Scalar,
        state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> Vector {
        &self.e + &self.c * state + &self.d * input
    }

    fn linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.value(time, state, input, precomp),
            dfdx: self.c.clone(),
            dfdu: self.d.clone(),
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateInputConstraint> {
        Box::new(self.clone())
    }
}

/// Stacked values of a state-input constraint collection, insertion order.
pub fn collection_value(
    collection: &TermCollection<dyn StateInputConstraint>,
    time: Scalar,
    state: &Vector,
    input: &Vector,
    precomp: &dyn PreComputation,
) -> Vector {
    let total: usize = collection.iter().map(|c| c.num_constraints(time)).sum();
    let mut value = Vector::zeros(total);
    let mut row = 0;
    for term in collection.iter() {
        let v = term.value(time, state, input, precomp);
        value.rows_mut(row, v.len()).copy_from(&v);
        row += v.len();
    }
    value
}

/// Stacked linear approximation of a state-input constraint collection.
pub fn collection_linear_approximation(
    collection: &TermCollection<dyn StateInputConstraint>,
    time: Scalar,
    state: &Vector,
    input: &Vector,
    precomp: &dyn PreComputation,
) -> VectorFunctionLinearApproximation {
    let mut total = VectorFunctionLinearApproximation::zero(0, state.len(), input.len());
    for term in collection.iter() {
        total.stack(&term.linear_approximation(time, state, input, precomp));
    }
    total
}

/// Stacked values of a state-only constraint collection, insertion order.
pub fn state_collection_value(
    collection: &TermCollection<dyn StateConstraint>,
    time: Scalar,
    state: &Vector,
    precomp: &dyn PreComputation,
) -> Vector {
    let total: usize = collection.iter().map(|c| c.num_constraints(time)).sum();
    let mut value = Vector::zeros(total);
    let mut row = 0;
    for term in collection.iter() {
        let v = term.value(time, state, precomp);
        value.rows_mut(row, v.len()).copy_from(&v);
        row += v.len();
    }
    value
}

/// Stacked linear approximation of a state-only constraint collection.
pub fn state_collection_linear_approximation(
    collection: &TermCollection<dyn StateConstraint>,
    time: Scalar,
    state: &Vector,
    precomp: &dyn PreComputation,
) -> VectorFunctionLinearApproximation {
    let mut total = VectorFunctionLinearApproximation::zero(0, state.len(), 0);
    for term in collection.iter() {
        total.stack(&term.linear_approximation(time, state, precomp));
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::precomputation::DefaultPreComputation;

    #[test]
    fn stacked_collection_keeps_insertion_order() {
        let mut collection: TermCollection<dyn StateInputConstraint> = TermCollection::new();
        collection
            .add(
                "first",
                Box::new(LinearStateInputConstraint::new(
                    Vector::from_vec(vec![1.0]),
                    Matrix::zeros(1, 2),
                    Matrix::zeros(1, 1),
                )),
            )
            .unwrap();
        collection
            .add(
                "second",
                Box::new(LinearStateInputConstraint::new(
                    Vector::from_vec(vec![2.0, 3.0]),
                    Matrix::zeros(2, 2),
                    Matrix::zeros(2, 1),
                )),
            )
            .unwrap();

        let precomp = DefaultPreComputation;
        let x = Vector::zeros(2);
        let u = Vector::zeros(1);
        let v = collection_value(&collection, 0.0, &x, &u, &precomp);
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);

        let lin = collection_linear_approximation(&collection, 0.0, &x, &u, &precomp);
        assert_eq!(lin.num_rows(), 3);
        assert_eq!(lin.dfdx.shape(), (3, 2));
        assert_eq!(lin.dfdu.shape(), (3, 1));
    }

    #[test]
    fn typed_access_fails_clearly_on_mismatch() {
        let mut collection: TermCollection<dyn StateInputConstraint> = TermCollection::new();
        collection
            .add(
                "affine",
                Box::new(LinearStateInputConstraint::new(
                    Vector::zeros(1),
                    Matrix::zeros(1, 1),
                    Matrix::zeros(1, 1),
                )),
            )
            .unwrap();

        assert!(collection.get_as::<LinearStateInputConstraint>("affine").is_ok());
        assert!(collection.get_as::<LinearStateInputConstraint>("missing").is_err());
    }
}
