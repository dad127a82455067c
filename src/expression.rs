//! The `Expression` facade.
//!
//! This module provides the user-facing handle over the expression node
//! graph. An `Expression` is a lightweight value type holding one shared
//! reference to an immutable `Node`; all construction (arithmetic
//! operators, elementary free functions, composition, affine transforms)
//! goes through this facade and allocates new nodes, never mutating
//! existing ones. Cloning a handle shares the underlying graph, so
//! sub-expressions used in several places are evaluated once per traversal.
//!
//! Two flavors of constructor exist for every operation:
//!
//! - checked constructors (`sum`, `product`, `composed_with`, ...) returning
//!   `Result<Expression, ConstructError>`
//! - operator sugar (`+`, `-`, `*`, `/`, `-x`) and the elementary free
//!   functions (`sin`, `cos`, ...), which delegate to the checked
//!   constructors and panic on contract violations; a mismatch there is a
//!   bug in the calling code, not a runtime condition
//!
//! Construction applies algebraic folds at the operator layer: constants
//! fold eagerly, zero operands collapse sums and products, and a constant
//! divisor becomes a scalar product. These are constructions, not a
//! simplification pass; no canonical form is attempted.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use colored::Colorize;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};

use crate::backends::vector::Vector;
use crate::batch::{self, ParameterBlock, ParameterBoundsBlock};
use crate::errors::{ConstructError, EvalError};
use crate::interval::Interval;
use crate::node::{detached_node, BinaryKind, BoundsCache, Node, NodeKind, UnaryKind, ValueCache};

/// A parametric expression: a scalar- or vector-valued function of zero or
/// more real parameters.
///
/// `Expression` is a cheap, clonable handle over one shared `Node`. Equality
/// (`==`) is identity of the shared node; use [`Expression::equivalent`] for
/// structural value comparison. Graphs are immutable once built, so a fully
/// constructed expression may be evaluated from several threads without
/// locking.
#[derive(Clone)]
pub struct Expression(Arc<Node>);

impl From<Node> for Expression {
    fn from(node: Node) -> Self {
        Expression(Arc::new(node))
    }
}

impl PartialEq for Expression {
    /// Identity of the shared node, not structural equality.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Expression {}

impl Expression {
    /// A scalar constant.
    pub fn constant(value: f64) -> Expression {
        Node::constant(DVector::from_element(1, value)).into()
    }

    /// A vector-valued constant.
    pub fn constant_vector(value: DVector<f64>) -> Expression {
        Node::constant(value).into()
    }

    /// The `index`-th of `arity` independent parameters, as a scalar
    /// expression.
    pub fn parameter(arity: usize, index: usize) -> Result<Expression, ConstructError> {
        Ok(Node::parameter(arity, index)?.into())
    }

    /// The curve parameter: the single parameter of a one-parameter
    /// expression.
    pub fn t() -> Expression {
        Node::parameter(1, 0).expect("index 0 < arity 1").into()
    }

    /// The first surface parameter.
    pub fn u() -> Expression {
        Node::parameter(2, 0).expect("index 0 < arity 2").into()
    }

    /// The second surface parameter.
    pub fn v() -> Expression {
        Node::parameter(2, 1).expect("index 1 < arity 2").into()
    }

    /// The affine map `origin + basis * parameters`.
    pub fn linear(
        origin: DVector<f64>,
        basis: DMatrix<f64>,
    ) -> Result<Expression, ConstructError> {
        Ok(Node::linear(origin, basis)?.into())
    }

    /// The identity map on `dimensions` parameters.
    pub fn identity(dimensions: usize) -> Expression {
        Node::linear(
            DVector::zeros(dimensions),
            DMatrix::identity(dimensions, dimensions),
        )
        .expect("square identity basis")
        .into()
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    /// Number of independent parameters this expression depends on; zero for
    /// constants, which broadcast into any parameter space.
    pub fn parameter_count(&self) -> usize {
        self.0.parameters()
    }

    /// Size of the vector this expression produces.
    pub fn value_dimension(&self) -> usize {
        self.0.dimensions()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.0.kind(), NodeKind::Constant(_))
    }

    /// The constant value, when this expression is a constant.
    pub fn constant_value(&self) -> Option<&DVector<f64>> {
        match self.0.kind() {
            NodeKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    fn is_zero_constant(&self) -> bool {
        self.constant_value()
            .is_some_and(|value| value.iter().all(|x| *x == 0.0))
    }

    /// Structural value comparison, for callers that explicitly want it
    /// instead of the identity semantics of `==`.
    pub fn equivalent(&self, other: &Expression) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.equivalent(&other.0)
    }

    /// Checked sum. Operand dimensions must agree; arities must agree or one
    /// operand must be constant.
    pub fn sum(lhs: &Expression, rhs: &Expression) -> Result<Expression, ConstructError> {
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            if a.len() != b.len() {
                return Err(ConstructError::DimensionMismatch {
                    context: "sum",
                    expected: a.len(),
                    got: b.len(),
                });
            }
            return Ok(Expression::constant_vector(a + b));
        }
        if lhs.is_zero_constant() && lhs.value_dimension() == rhs.value_dimension() {
            return Ok(rhs.clone());
        }
        if rhs.is_zero_constant() && lhs.value_dimension() == rhs.value_dimension() {
            return Ok(lhs.clone());
        }
        Ok(Node::binary(BinaryKind::Sum, lhs.clone(), rhs.clone())?.into())
    }

    /// Checked difference, with the same operand rules as [`Expression::sum`].
    pub fn difference(lhs: &Expression, rhs: &Expression) -> Result<Expression, ConstructError> {
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            if a.len() != b.len() {
                return Err(ConstructError::DimensionMismatch {
                    context: "difference",
                    expected: a.len(),
                    got: b.len(),
                });
            }
            return Ok(Expression::constant_vector(a - b));
        }
        if rhs.is_zero_constant() && lhs.value_dimension() == rhs.value_dimension() {
            return Ok(lhs.clone());
        }
        if lhs.is_zero_constant() && lhs.value_dimension() == rhs.value_dimension() {
            return Expression::unary(UnaryKind::Negate, rhs);
        }
        Ok(Node::binary(BinaryKind::Difference, lhs.clone(), rhs.clone())?.into())
    }

    /// Checked product. At least one operand must be scalar-valued; the
    /// scalar operand becomes the multiplier.
    pub fn product(lhs: &Expression, rhs: &Expression) -> Result<Expression, ConstructError> {
        if lhs.value_dimension() != 1 && rhs.value_dimension() != 1 {
            return Err(ConstructError::DimensionMismatch {
                context: "product multiplier",
                expected: 1,
                got: rhs.value_dimension(),
            });
        }
        // The scalar side multiplies the (possibly vector-valued) other
        // side.
        let (multiplicand, multiplier) = if rhs.value_dimension() == 1 {
            (lhs, rhs)
        } else {
            (rhs, lhs)
        };
        if let (Some(a), Some(b)) = (multiplicand.constant_value(), multiplier.constant_value()) {
            if b.len() == 1 {
                return Ok(Expression::constant_vector(a * b[0]));
            }
        }
        if multiplicand.is_zero_constant() {
            return Ok(multiplicand.clone());
        }
        if multiplier.is_zero_constant() && multiplier.value_dimension() == 1 {
            return Ok(Expression::constant_vector(DVector::zeros(
                multiplicand.value_dimension(),
            )));
        }
        if multiplier
            .constant_value()
            .is_some_and(|value| value.len() == 1 && value[0] == 1.0)
        {
            return Ok(multiplicand.clone());
        }
        if multiplicand
            .constant_value()
            .is_some_and(|value| value.len() == 1 && value[0] == 1.0)
        {
            return Ok(multiplier.clone());
        }
        Ok(Node::binary(
            BinaryKind::Product,
            multiplicand.clone(),
            multiplier.clone(),
        )?
        .into())
    }

    /// Checked quotient. The divisor must be scalar-valued; a nonzero
    /// constant divisor folds into a scalar product.
    pub fn quotient(lhs: &Expression, rhs: &Expression) -> Result<Expression, ConstructError> {
        if rhs.value_dimension() != 1 {
            return Err(ConstructError::DimensionMismatch {
                context: "quotient divisor",
                expected: 1,
                got: rhs.value_dimension(),
            });
        }
        if lhs.is_zero_constant() {
            return Ok(lhs.clone());
        }
        if let Some(divisor) = rhs.constant_value() {
            if divisor[0] != 0.0 {
                return Expression::product(lhs, &Expression::constant(1.0 / divisor[0]));
            }
            // An exactly-zero constant divisor is left in place; evaluation
            // reports DivisionByZero rather than construction guessing.
        }
        Ok(Node::binary(BinaryKind::Quotient, lhs.clone(), rhs.clone())?.into())
    }

    /// Checked elementary-function application. The nine elementary kinds
    /// require a scalar operand; `Negate` accepts any dimension.
    pub fn unary(kind: UnaryKind, operand: &Expression) -> Result<Expression, ConstructError> {
        if let Some(value) = operand.constant_value() {
            if kind == UnaryKind::Negate {
                return Ok(Expression::constant_vector(-value));
            }
            if value.len() == 1 {
                // Fold only when the point application is in-domain; an
                // out-of-domain constant keeps the node so evaluation
                // reports the DomainError.
                if let Ok(folded) = kind.apply_point(value[0]) {
                    return Ok(Expression::constant(folded));
                }
            }
        }
        Ok(Node::unary(kind, operand.clone())?.into())
    }

    /// A contiguous slice of this expression's value vector.
    pub fn components(&self, index: usize, count: usize) -> Result<Expression, ConstructError> {
        if count == self.value_dimension() && index == 0 {
            return Ok(self.clone());
        }
        if let Some(value) = self.constant_value() {
            if index + count <= value.len() && count > 0 {
                return Ok(Expression::constant_vector(
                    value.rows(index, count).into_owned(),
                ));
            }
        }
        if let NodeKind::Components {
            operand,
            index: start,
            ..
        } = self.0.kind()
        {
            // Slicing a slice re-indexes into the original operand.
            return operand.components(start + index, count);
        }
        Ok(Node::components(self.clone(), index, count)?.into())
    }

    /// The scalar `index`-th component of this expression's value.
    pub fn component(&self, index: usize) -> Result<Expression, ConstructError> {
        self.components(index, 1)
    }

    /// Stacks two expressions into one vector-valued expression.
    pub fn concatenated(lhs: &Expression, rhs: &Expression) -> Result<Expression, ConstructError> {
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            let mut stacked = DVector::zeros(a.len() + b.len());
            stacked.rows_mut(0, a.len()).copy_from(a);
            stacked.rows_mut(a.len(), b.len()).copy_from(b);
            return Ok(Expression::constant_vector(stacked));
        }
        Ok(Node::concatenation(lhs.clone(), rhs.clone())?.into())
    }

    /// The partial derivative with respect to parameter `index`, as a new
    /// expression of the same arity and value dimension.
    ///
    /// Fails with `IndexOutOfRange` when `index >= parameter_count()` for a
    /// non-constant expression; constants differentiate to zero for any
    /// index.
    pub fn derivative(&self, index: usize) -> Result<Expression, ConstructError> {
        if self.parameter_count() > 0 && index >= self.parameter_count() {
            return Err(ConstructError::IndexOutOfRange {
                kind: "parameter",
                index,
                count: self.parameter_count(),
            });
        }
        self.0.derivative(index)
    }

    /// This expression evaluated on the output of `inner`.
    ///
    /// Fails with `ArityMismatch` unless `inner.value_dimension()` equals
    /// `self.parameter_count()`. A constant `inner` folds to a constant
    /// result when evaluation succeeds.
    pub fn composed_with(&self, inner: &Expression) -> Result<Expression, ConstructError> {
        if self.parameter_count() != inner.value_dimension() {
            return Err(ConstructError::ArityMismatch {
                lhs: self.parameter_count(),
                rhs: inner.value_dimension(),
            });
        }
        if let Some(point) = inner.constant_value() {
            let block = batch::point_block(point.as_slice());
            if let Ok(values) = self.evaluate(&block) {
                tracing::debug!("folded composition with constant inner expression");
                return Ok(Expression::constant_vector(values.column(0).into_owned()));
            }
            // Evaluation at the constant failed (domain or division); keep
            // the composition node so the error surfaces at evaluation time.
        }
        Ok(Node::composition(self.clone(), inner.clone())?.into())
    }

    /// The expression `matrix * self + vector`.
    ///
    /// Constants, affine maps and compositions transform in closed form;
    /// any other variant composes with an injected affine node.
    pub fn transformed(
        &self,
        matrix: &DMatrix<f64>,
        vector: &DVector<f64>,
    ) -> Result<Expression, ConstructError> {
        if matrix.ncols() != self.value_dimension() {
            return Err(ConstructError::DimensionMismatch {
                context: "transform matrix",
                expected: self.value_dimension(),
                got: matrix.ncols(),
            });
        }
        if vector.len() != matrix.nrows() {
            return Err(ConstructError::DimensionMismatch {
                context: "transform offset",
                expected: matrix.nrows(),
                got: vector.len(),
            });
        }
        match self.0.kind() {
            NodeKind::Constant(value) => {
                Ok(Expression::constant_vector(matrix * value + vector))
            }
            NodeKind::Linear { origin, basis } => Expression::linear(
                matrix * origin + vector,
                matrix * basis,
            ),
            NodeKind::Composition { outer, inner } => {
                outer.transformed(matrix, vector)?.composed_with(inner)
            }
            _ => {
                tracing::debug!("transforming through an injected affine composition");
                Expression::linear(vector.clone(), matrix.clone())?.composed_with(self)
            }
        }
    }

    /// Evaluates every column of the parameter block in one traversal of the
    /// graph; shared sub-expressions are computed once per call.
    pub fn evaluate(&self, parameters: &ParameterBlock) -> Result<DMatrix<f64>, EvalError> {
        batch::check_shape(self.parameter_count(), parameters.nrows())?;
        tracing::trace!(
            columns = parameters.ncols(),
            arity = self.parameter_count(),
            "evaluating value block"
        );
        self.values_cached(parameters, &mut ValueCache::new())
    }

    /// Evaluates a sound enclosure of this expression's range over every
    /// parameter box column.
    pub fn evaluate_bounds(
        &self,
        parameters: &ParameterBoundsBlock,
    ) -> Result<DMatrix<Interval>, EvalError> {
        batch::check_shape(self.parameter_count(), parameters.nrows())?;
        tracing::trace!(
            columns = parameters.ncols(),
            arity = self.parameter_count(),
            "evaluating bounds block"
        );
        self.bounds_cached(parameters, &mut BoundsCache::new())
    }

    /// Single-point convenience over [`Expression::evaluate`].
    pub fn evaluate_at<V: Vector>(&self, point: &V) -> Result<DVector<f64>, EvalError> {
        let block = batch::point_block(point.as_slice());
        Ok(self.evaluate(&block)?.column(0).into_owned())
    }

    /// Single-box convenience over [`Expression::evaluate_bounds`].
    pub fn bounds_over(&self, bounds: &[Interval]) -> Result<DVector<Interval>, EvalError> {
        let block = batch::box_block(bounds);
        Ok(self.evaluate_bounds(&block)?.column(0).into_owned())
    }

    /// Human-readable structural dump: one `R{arity} -> R{dim} | Kind` line
    /// per node, children indented below their parent.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        self.0.describe_into(0, &mut lines);
        lines.iter().join("\n")
    }

    pub(crate) fn values_cached(
        &self,
        parameters: &ParameterBlock,
        cache: &mut ValueCache,
    ) -> Result<DMatrix<f64>, EvalError> {
        let key = Arc::as_ptr(&self.0) as usize;
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }
        let computed = self.0.values(parameters, cache)?;
        cache.insert(key, computed.clone());
        Ok(computed)
    }

    pub(crate) fn bounds_cached(
        &self,
        parameters: &ParameterBoundsBlock,
        cache: &mut BoundsCache,
    ) -> Result<DMatrix<Interval>, EvalError> {
        let key = Arc::as_ptr(&self.0) as usize;
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }
        let computed = self.0.bounds(parameters, cache)?;
        cache.insert(key, computed.clone());
        Ok(computed)
    }

    /// Detaches this handle during iterative release, leaving a child-free
    /// placeholder behind.
    pub(crate) fn take_for_release(&mut self) -> Expression {
        std::mem::replace(self, detached_node().into())
    }

    /// Unwraps the node when this handle is the last referent.
    pub(crate) fn into_unique_node(self) -> Option<Node> {
        Arc::into_inner(self.0)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: R{} -> R{}",
            "Expression".cyan(),
            self.parameter_count(),
            self.value_dimension()
        )?;
        write!(f, "{}", self.describe())
    }
}

/// Unwraps a checked construction in the operator layer, where a contract
/// violation is a caller bug.
fn constructed(result: Result<Expression, ConstructError>) -> Expression {
    match result {
        Ok(expression) => expression,
        Err(error) => panic!("invalid expression construction: {error}"),
    }
}

impl Add for Expression {
    type Output = Expression;

    /// # Panics
    /// On arity or dimension mismatch; use [`Expression::sum`] to handle the
    /// error as a value.
    fn add(self, rhs: Expression) -> Expression {
        constructed(Expression::sum(&self, &rhs))
    }
}

impl Add for &Expression {
    type Output = Expression;

    fn add(self, rhs: &Expression) -> Expression {
        constructed(Expression::sum(self, rhs))
    }
}

impl Sub for Expression {
    type Output = Expression;

    /// # Panics
    /// On arity or dimension mismatch; use [`Expression::difference`] to
    /// handle the error as a value.
    fn sub(self, rhs: Expression) -> Expression {
        constructed(Expression::difference(&self, &rhs))
    }
}

impl Sub for &Expression {
    type Output = Expression;

    fn sub(self, rhs: &Expression) -> Expression {
        constructed(Expression::difference(self, rhs))
    }
}

impl Mul for Expression {
    type Output = Expression;

    /// # Panics
    /// When neither operand is scalar-valued or the arities disagree; use
    /// [`Expression::product`] to handle the error as a value.
    fn mul(self, rhs: Expression) -> Expression {
        constructed(Expression::product(&self, &rhs))
    }
}

impl Mul for &Expression {
    type Output = Expression;

    fn mul(self, rhs: &Expression) -> Expression {
        constructed(Expression::product(self, rhs))
    }
}

impl Div for Expression {
    type Output = Expression;

    /// # Panics
    /// When the divisor is not scalar-valued or the arities disagree; use
    /// [`Expression::quotient`] to handle the error as a value.
    fn div(self, rhs: Expression) -> Expression {
        constructed(Expression::quotient(&self, &rhs))
    }
}

impl Div for &Expression {
    type Output = Expression;

    fn div(self, rhs: &Expression) -> Expression {
        constructed(Expression::quotient(self, rhs))
    }
}

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        constructed(Expression::unary(UnaryKind::Negate, &self))
    }
}

impl Neg for &Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        constructed(Expression::unary(UnaryKind::Negate, self))
    }
}

/// Sine of a scalar expression.
///
/// # Panics
/// When the operand is not scalar-valued; use
/// [`Expression::unary`] to handle the error as a value.
pub fn sin(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Sin, operand))
}

/// Cosine of a scalar expression. Panics as [`sin`] does.
pub fn cos(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Cos, operand))
}

/// Tangent of a scalar expression. Panics as [`sin`] does.
pub fn tan(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Tan, operand))
}

/// Arcsine of a scalar expression. Panics as [`sin`] does.
pub fn asin(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Asin, operand))
}

/// Arccosine of a scalar expression. Panics as [`sin`] does.
pub fn acos(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Acos, operand))
}

/// Arctangent of a scalar expression. Panics as [`sin`] does.
pub fn atan(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Atan, operand))
}

/// Exponential of a scalar expression. Panics as [`sin`] does.
pub fn exp(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Exp, operand))
}

/// Natural logarithm of a scalar expression. Panics as [`sin`] does.
pub fn log(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Log, operand))
}

/// Square root of a scalar expression. Panics as [`sin`] does.
pub fn sqrt(operand: &Expression) -> Expression {
    constructed(Expression::unary(UnaryKind::Sqrt, operand))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{boxes_block, points_block};
    use crate::node::NodeKind;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

    #[test]
    fn test_square_evaluation_bounds_and_derivative() {
        // f(t) = t * t, built as a product of the parameter with itself.
        let t = Expression::t();
        let f = &t * &t;

        assert_eq!(f.evaluate_at(&[3.0]).unwrap()[0], 9.0);

        let bounds = f.bounds_over(&[Interval::new(1.0, 3.0)]).unwrap();
        assert!(bounds[0].contains(Interval::new(1.0, 9.0), 0.0));

        // Product rule: 1 * t + t * 1 = 2t, so f'(3) = 6.
        let derivative = f.derivative(0).unwrap();
        assert_eq!(derivative.evaluate_at(&[3.0]).unwrap()[0], 6.0);
    }

    #[test]
    fn test_exp_derivative_is_exp() {
        let g = exp(&Expression::t());
        let derivative = g.derivative(0).unwrap();
        assert_eq!(derivative.evaluate_at(&[0.0]).unwrap()[0], 1.0);
        assert!(derivative.equivalent(&g));
    }

    #[test]
    fn test_composition_with_linear_scaling() {
        // sin(t) composed with the map t -> 2t; at pi/4 this is sin(pi/2).
        let doubled = Expression::linear(
            DVector::from_column_slice(&[0.0]),
            DMatrix::from_element(1, 1, 2.0),
        )
        .unwrap();
        let wave = sin(&Expression::t()).composed_with(&doubled).unwrap();
        let value = wave.evaluate_at(&[FRAC_PI_4]).unwrap();
        assert!((value[0] - 1.0).abs() < 1e-12);

        // Chain rule: d sin(2t) = 2 cos(2t), which is 2 at t = 0.
        let derivative = wave.derivative(0).unwrap();
        assert!((derivative.evaluate_at(&[0.0]).unwrap()[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_arity_mismatch_is_a_construction_error() {
        let f = Expression::u();
        let g = Expression::parameter(3, 2).unwrap();
        assert_eq!(
            Expression::sum(&f, &g).unwrap_err(),
            ConstructError::ArityMismatch { lhs: 2, rhs: 3 }
        );
    }

    #[test]
    #[should_panic(expected = "invalid expression construction")]
    fn test_operator_sugar_panics_on_arity_mismatch() {
        let f = Expression::u();
        let g = Expression::parameter(3, 2).unwrap();
        let _ = f + g;
    }

    #[test]
    fn test_derivative_distributes_over_sums() {
        let u = Expression::u();
        let v = Expression::v();
        let f = sin(&u);
        let g = &u * &v;
        let combined = (&f + &g).derivative(1).unwrap();
        let split = &f.derivative(1).unwrap() + &g.derivative(1).unwrap();
        for point in [[0.3, -1.2], [1.7, 0.4], [-2.0, 2.5]] {
            let lhs = combined.evaluate_at(&point).unwrap()[0];
            let rhs = split.evaluate_at(&point).unwrap()[0];
            assert!((lhs - rhs).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bounds_are_sound_over_sampled_points() {
        // f(t) = sin(t) * t - sqrt(t + 2) over boxes inside [0, 2].
        let t = Expression::t();
        let f = &(&sin(&t) * &t) - &sqrt(&(&t + &Expression::constant(2.0)));
        let boxes = [
            Interval::new(0.0, 0.5),
            Interval::new(0.5, 1.25),
            Interval::new(1.25, 2.0),
        ];
        let bounds = f.evaluate_bounds(&boxes_block(1, &boxes)).unwrap();
        for (column, interval) in boxes.iter().enumerate() {
            let enclosure = bounds[(0, column)];
            let mut sample = interval.lower();
            while sample <= interval.upper() {
                let value = f.evaluate_at(&[sample]).unwrap()[0];
                assert!(
                    enclosure.contains_value(value, 1e-12),
                    "bounds {enclosure} lost f({sample}) = {value}"
                );
                sample += 0.05;
            }
        }
    }

    #[test]
    fn test_quotient_by_zero_surfaces_at_evaluation() {
        let t = Expression::t();
        let reciprocal = Expression::quotient(&Expression::constant(1.0), &t).unwrap();
        assert!(matches!(
            reciprocal.evaluate_at(&[0.0]).unwrap_err(),
            EvalError::DivisionByZero { .. }
        ));
        assert!(matches!(
            reciprocal
                .bounds_over(&[Interval::new(-1.0, 1.0)])
                .unwrap_err(),
            EvalError::DivisionByZero { .. }
        ));
        // A divisor box clear of zero succeeds.
        let bounds = reciprocal.bounds_over(&[Interval::new(1.0, 2.0)]).unwrap();
        assert!(bounds[0].contains(Interval::new(0.5, 1.0), 0.0));
    }

    #[test]
    fn test_asin_bounds_domain_error() {
        let g = asin(&Expression::t());
        assert!(matches!(
            g.bounds_over(&[Interval::new(2.0, 3.0)]).unwrap_err(),
            EvalError::DomainError {
                function: "asin",
                ..
            }
        ));
    }

    #[test]
    fn test_derivative_index_bounds() {
        let t = Expression::t();
        assert_eq!(
            t.derivative(1).unwrap_err(),
            ConstructError::IndexOutOfRange {
                kind: "parameter",
                index: 1,
                count: 1,
            }
        );
        // Constants have arity zero and differentiate to zero for any index.
        let zero = Expression::constant(5.0).derivative(3).unwrap();
        assert!(zero.is_constant());
        assert_eq!(zero.constant_value().unwrap()[0], 0.0);
    }

    #[test]
    fn test_block_shape_validation() {
        let t = Expression::t();
        let err = t
            .evaluate(&points_block(2, &[1.0, 2.0]))
            .unwrap_err();
        assert_eq!(err, EvalError::InvalidBlockShape { expected: 1, got: 2 });
    }

    #[test]
    fn test_operator_folds() {
        let t = Expression::t();
        // Adding a zero constant returns the same handle.
        let folded = &t + &Expression::constant(0.0);
        assert!(folded == t);
        // Constant arithmetic folds eagerly.
        let five = Expression::constant(2.0) + Expression::constant(3.0);
        assert!(five.is_constant());
        assert_eq!(five.constant_value().unwrap()[0], 5.0);
        // Multiplying by a unit constant returns the other operand.
        let same = &t * &Expression::constant(1.0);
        assert!(same == t);
        // Dividing by a constant becomes a scalar product.
        let halved = &t / &Expression::constant(2.0);
        assert!(matches!(
            halved.node().kind(),
            NodeKind::Binary {
                kind: BinaryKind::Product,
                ..
            }
        ));
        assert_eq!(halved.evaluate_at(&[3.0]).unwrap()[0], 1.5);
    }

    #[test]
    fn test_composition_with_constant_inner_folds() {
        let outer = sin(&Expression::t());
        let inner = Expression::constant(FRAC_PI_2);
        let composed = outer.composed_with(&inner).unwrap();
        assert!(composed.is_constant());
        assert!((composed.constant_value().unwrap()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_circle_curve() {
        let t = Expression::t();
        let circle = Expression::concatenated(&cos(&t), &sin(&t)).unwrap();
        assert_eq!(circle.value_dimension(), 2);
        assert_eq!(circle.parameter_count(), 1);

        let start = circle.evaluate_at(&[0.0]).unwrap();
        assert_eq!(start[0], 1.0);
        assert_eq!(start[1], 0.0);

        // A full turn is bounded by the unit square exactly.
        let bounds = circle.bounds_over(&[Interval::new(0.0, TAU)]).unwrap();
        assert_eq!(bounds[0], Interval::new(-1.0, 1.0));
        assert_eq!(bounds[1], Interval::new(-1.0, 1.0));

        // Tangent direction at pi/2 is (-1, 0).
        let tangent = circle.derivative(0).unwrap();
        let direction = tangent.evaluate_at(&[FRAC_PI_2]).unwrap();
        assert!((direction[0] + 1.0).abs() < 1e-12);
        assert!(direction[1].abs() < 1e-12);
    }

    #[test]
    fn test_components_and_flattening() {
        let t = Expression::t();
        let circle = Expression::concatenated(&cos(&t), &sin(&t)).unwrap();
        let ordinate = circle.component(1).unwrap();
        assert_eq!(ordinate.value_dimension(), 1);
        let value = ordinate.evaluate_at(&[FRAC_PI_2]).unwrap();
        assert!((value[0] - 1.0).abs() < 1e-12);

        // Taking every component returns the same handle.
        let all = circle.components(0, 2).unwrap();
        assert!(all == circle);

        // A slice of a slice re-indexes into the original operand.
        let nested = circle.components(1, 1).unwrap().components(0, 1).unwrap();
        assert!(nested.equivalent(&ordinate));
    }

    #[test]
    fn test_transformed_linear_stays_linear() {
        let line = Expression::linear(
            DVector::from_column_slice(&[1.0, 2.0]),
            DMatrix::from_column_slice(2, 1, &[1.0, 3.0]),
        )
        .unwrap();
        let matrix = DMatrix::from_column_slice(2, 2, &[2.0, 0.0, 0.0, 1.0]);
        let offset = DVector::from_column_slice(&[0.5, -0.5]);
        let moved = line.transformed(&matrix, &offset).unwrap();
        assert!(matches!(moved.node().kind(), NodeKind::Linear { .. }));

        let original = line.evaluate_at(&[0.5]).unwrap();
        let transformed = moved.evaluate_at(&[0.5]).unwrap();
        assert_eq!(transformed, &matrix * original + &offset);
    }

    #[test]
    fn test_transformed_generic_injects_affine_composition() {
        let t = Expression::t();
        let circle = Expression::concatenated(&cos(&t), &sin(&t)).unwrap();
        let matrix = DMatrix::from_column_slice(2, 2, &[2.0, 0.0, 0.0, 1.0]);
        let offset = DVector::from_column_slice(&[1.0, 0.0]);
        let ellipse = circle.transformed(&matrix, &offset).unwrap();
        assert!(matches!(
            ellipse.node().kind(),
            NodeKind::Composition { .. }
        ));

        let point = ellipse.evaluate_at(&[0.0]).unwrap();
        assert_eq!(point[0], 3.0);
        assert_eq!(point[1], 0.0);

        // The transform validates its shapes.
        let skinny = DMatrix::from_column_slice(1, 1, &[1.0]);
        assert!(matches!(
            circle
                .transformed(&skinny, &DVector::from_column_slice(&[0.0]))
                .unwrap_err(),
            ConstructError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn test_shared_subexpression_evaluates_consistently() {
        let t = Expression::t();
        let s = sin(&t);
        let f = &(&s * &s) + &s;
        let expected = (0.5f64).sin() * (0.5f64).sin() + (0.5f64).sin();
        let value = f.evaluate_at(&[0.5]).unwrap();
        assert!((value[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_batched_evaluation_covers_every_column() {
        let t = Expression::t();
        let f = &t * &t;
        let block = points_block(1, &[1.0, 2.0, 3.0]);
        let values = f.evaluate(&block).unwrap();
        assert_eq!(values.ncols(), 3);
        assert_eq!(values[(0, 0)], 1.0);
        assert_eq!(values[(0, 1)], 4.0);
        assert_eq!(values[(0, 2)], 9.0);
    }

    #[test]
    fn test_describe_dump() {
        let t = Expression::t();
        let f = &t * &t;
        let dump = f.describe();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "R1 -> R1 | Binary product");
        assert_eq!(lines[1], "  R1 -> R1 | Parameter 0 of 1");
        assert_eq!(lines[2], "  R1 -> R1 | Parameter 0 of 1");
    }

    #[test]
    fn test_evaluate_at_accepts_vector_backends() {
        let f = &Expression::u() + &Expression::v();
        let from_array = f.evaluate_at(&[1.0, 2.0]).unwrap();
        let from_vec = f.evaluate_at(&vec![1.0, 2.0]).unwrap();
        let from_dvector = f
            .evaluate_at(&DVector::from_column_slice(&[1.0, 2.0]))
            .unwrap();
        assert_eq!(from_array, from_vec);
        assert_eq!(from_vec, from_dvector);
        assert_eq!(from_array[0], 3.0);
    }

    #[test]
    fn test_inverse_trig_chain_rules() {
        // d asin(t) = 1 / sqrt(1 - t^2); at t = 0.5 this is 2 / sqrt(3).
        let derivative = asin(&Expression::t()).derivative(0).unwrap();
        let value = derivative.evaluate_at(&[0.5]).unwrap()[0];
        assert!((value - 1.0 / (1.0 - 0.25f64).sqrt()).abs() < 1e-12);

        // d acos is the negation.
        let derivative = acos(&Expression::t()).derivative(0).unwrap();
        let negated = derivative.evaluate_at(&[0.5]).unwrap()[0];
        assert!((negated + value).abs() < 1e-12);

        // d atan(t) = 1 / (1 + t^2).
        let derivative = atan(&Expression::t()).derivative(0).unwrap();
        let value = derivative.evaluate_at(&[2.0]).unwrap()[0];
        assert!((value - 0.2).abs() < 1e-12);

        // d log(t) = 1 / t and d tan(t) = 1 / cos(t)^2.
        let derivative = log(&Expression::t()).derivative(0).unwrap();
        assert!((derivative.evaluate_at(&[4.0]).unwrap()[0] - 0.25).abs() < 1e-12);
        let derivative = tan(&Expression::t()).derivative(0).unwrap();
        let expected = 1.0 / (1.0f64.cos() * 1.0f64.cos());
        assert!((derivative.evaluate_at(&[1.0]).unwrap()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_surface_composition_chain_rule() {
        // outer(u, v) = u * v over a parametric path (t, t^2):
        // d/dt outer(t, t^2) = v + u * 2t = t^2 + 2 t^2 = 3 t^2.
        let outer = &Expression::u() * &Expression::v();
        let t = Expression::t();
        let path = Expression::concatenated(&t, &(&t * &t)).unwrap();
        let composed = outer.composed_with(&path).unwrap();

        let derivative = composed.derivative(0).unwrap();
        for sample in [0.5, 1.0, 2.0] {
            let value = derivative.evaluate_at(&[sample]).unwrap()[0];
            assert!((value - 3.0 * sample * sample).abs() < 1e-12);
        }
    }

    #[test]
    fn test_composition_chain_rule_with_constant_partials() {
        // outer(u, v) = u + v has constant partials; the chain rule must not
        // try to compose them: d/dt (t + t^2) = 1 + 2t.
        let outer = &Expression::u() + &Expression::v();
        let t = Expression::t();
        let path = Expression::concatenated(&t, &(&t * &t)).unwrap();
        let derivative = outer
            .composed_with(&path)
            .unwrap()
            .derivative(0)
            .unwrap();
        for sample in [0.0, 1.0, 2.5] {
            let value = derivative.evaluate_at(&[sample]).unwrap()[0];
            assert!((value - (1.0 + 2.0 * sample)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bounds_match_values_on_degenerate_boxes() {
        let t = Expression::t();
        let f = &(&sin(&t) * &t) + &Expression::constant(1.0);
        let block = points_block(1, &[0.1, 0.7, 2.9]);
        let values = f.evaluate(&block).unwrap();
        let bounds = f
            .evaluate_bounds(&crate::batch::degenerate_bounds(&block))
            .unwrap();
        for column in 0..block.ncols() {
            assert!(bounds[(0, column)].contains_value(values[(0, column)], 1e-12));
        }
    }

    #[test]
    fn test_expression_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Expression>();

        // A built graph can be evaluated from several threads at once.
        let t = Expression::t();
        let f = &(&sin(&t) * &t) + &Expression::constant(1.0);
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let shared = f.clone();
                std::thread::spawn(move || shared.evaluate_at(&[i as f64]).unwrap()[0])
            })
            .collect();
        for (i, handle) in threads.into_iter().enumerate() {
            let expected = (i as f64).sin() * i as f64 + 1.0;
            assert!((handle.join().unwrap() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_identity_expression() {
        let plane = Expression::identity(2);
        assert_eq!(plane.parameter_count(), 2);
        assert_eq!(plane.value_dimension(), 2);
        let point = plane.evaluate_at(&[3.0, -4.0]).unwrap();
        assert_eq!(point[0], 3.0);
        assert_eq!(point[1], -4.0);
    }

    #[test]
    fn test_full_turn_bounds_do_not_depend_on_phase() {
        // Wide boxes collapse the trig bounds to [-1, 1] regardless of where
        // the box sits.
        let wave = sin(&Expression::t());
        for offset in [0.0, 1.0, 100.0, -271.3] {
            let bounds = wave
                .bounds_over(&[Interval::new(offset, offset + PI * 8.0)])
                .unwrap();
            assert_eq!(bounds[0], Interval::new(-1.0, 1.0));
        }
    }
}
