//! Expression node variants.
//!
//! This module defines the core node types that make up a parametric
//! expression graph. The main types are:
//!
//! - `Node`: one immutable mathematical operation plus its cached metadata
//!   (parameter count and value dimension)
//! - `NodeKind`: the closed set of operation variants
//! - `UnaryKind` / `BinaryKind`: operation selectors for the elementary
//!   function and arithmetic variants
//!
//! Nodes reference child expressions by shared ownership (`Expression`
//! handles wrapping `Arc<Node>`), so the overall structure is a DAG: a
//! sub-expression may be a child of several parents. Nothing here mutates a
//! node after construction; every transformation allocates new nodes.
//!
//! Each variant implements three mutually consistent computations:
//!
//! - batched *value* evaluation against a `ParameterBlock`
//! - batched *bounds* evaluation against a `ParameterBoundsBlock`, sound with
//!   respect to the value path (bounds over a box contain the values at every
//!   point inside the box)
//! - *symbolic differentiation*, building a new expression by the usual
//!   calculus rules (sum, product, quotient and chain rules), never by
//!   numerical differencing
//!
//! Both evaluation paths share sub-expression results through a per-call
//! cache keyed on node identity, so a DAG node referenced from several
//! parents is evaluated once per traversal. No cache survives across
//! top-level calls.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::batch::{ParameterBlock, ParameterBoundsBlock};
use crate::errors::{ConstructError, EvalError};
use crate::expression::Expression;
use crate::interval::Interval;

/// Per-call result cache for the value-evaluation path, keyed on node
/// identity.
pub(crate) type ValueCache = HashMap<usize, DMatrix<f64>>;

/// Per-call result cache for the bounds-evaluation path.
pub(crate) type BoundsCache = HashMap<usize, DMatrix<Interval>>;

/// Selector for the unary variants.
///
/// The nine elementary functions require a scalar (one-dimensional) operand;
/// `Negate` applies elementwise to operands of any dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Log,
    Sqrt,
    Negate,
}

impl UnaryKind {
    pub fn name(self) -> &'static str {
        match self {
            UnaryKind::Sin => "sin",
            UnaryKind::Cos => "cos",
            UnaryKind::Tan => "tan",
            UnaryKind::Asin => "asin",
            UnaryKind::Acos => "acos",
            UnaryKind::Atan => "atan",
            UnaryKind::Exp => "exp",
            UnaryKind::Log => "log",
            UnaryKind::Sqrt => "sqrt",
            UnaryKind::Negate => "negate",
        }
    }

    /// Applies the scalar function at a point, checking the function domain.
    pub(crate) fn apply_point(self, x: f64) -> Result<f64, EvalError> {
        let domain_error = |function| EvalError::DomainError {
            function,
            lower: x,
            upper: x,
        };
        match self {
            UnaryKind::Sin => Ok(x.sin()),
            UnaryKind::Cos => Ok(x.cos()),
            UnaryKind::Tan => Ok(x.tan()),
            UnaryKind::Asin if (-1.0..=1.0).contains(&x) => Ok(x.asin()),
            UnaryKind::Asin => Err(domain_error("asin")),
            UnaryKind::Acos if (-1.0..=1.0).contains(&x) => Ok(x.acos()),
            UnaryKind::Acos => Err(domain_error("acos")),
            UnaryKind::Atan => Ok(x.atan()),
            UnaryKind::Exp => Ok(x.exp()),
            UnaryKind::Log if x > 0.0 => Ok(x.ln()),
            UnaryKind::Log => Err(domain_error("log")),
            UnaryKind::Sqrt if x >= 0.0 => Ok(x.sqrt()),
            UnaryKind::Sqrt => Err(domain_error("sqrt")),
            UnaryKind::Negate => Ok(-x),
        }
    }

    /// Applies the interval-sound counterpart of the scalar function.
    pub(crate) fn apply_bounds(self, x: Interval) -> Result<Interval, EvalError> {
        match self {
            UnaryKind::Sin => Ok(x.sin()),
            UnaryKind::Cos => Ok(x.cos()),
            UnaryKind::Tan => Ok(x.tan()),
            UnaryKind::Asin => x.asin(),
            UnaryKind::Acos => x.acos(),
            UnaryKind::Atan => Ok(x.atan()),
            UnaryKind::Exp => Ok(x.exp()),
            UnaryKind::Log => x.log(),
            UnaryKind::Sqrt => x.sqrt(),
            UnaryKind::Negate => Ok(-x),
        }
    }
}

/// Selector for the binary arithmetic variants.
///
/// `Product` and `Quotient` store their scalar operand on the right-hand
/// side (the multiplier / divisor); the facade normalizes operand order
/// before construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Sum,
    Difference,
    Product,
    Quotient,
}

impl BinaryKind {
    pub fn name(self) -> &'static str {
        match self {
            BinaryKind::Sum => "sum",
            BinaryKind::Difference => "difference",
            BinaryKind::Product => "product",
            BinaryKind::Quotient => "quotient",
        }
    }
}

/// The closed set of expression operations.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A fixed vector value, broadcast over every batch column
    Constant(DVector<f64>),
    /// The index-th of `arity` independent parameters
    Parameter { arity: usize, index: usize },
    /// The affine map `origin + basis * parameters`
    Linear {
        origin: DVector<f64>,
        basis: DMatrix<f64>,
    },
    /// An elementary function or negation of one operand
    Unary { kind: UnaryKind, operand: Expression },
    /// Arithmetic on two operands
    Binary {
        kind: BinaryKind,
        lhs: Expression,
        rhs: Expression,
    },
    /// `outer` evaluated on the output of `inner`
    Composition { outer: Expression, inner: Expression },
    /// A contiguous slice `[index, index + count)` of the operand's value
    Components {
        operand: Expression,
        index: usize,
        count: usize,
    },
    /// Two expressions stacked into one vector value
    Concatenation { lhs: Expression, rhs: Expression },
}

/// One immutable operation in an expression graph.
///
/// The parameter count (arity) and value dimension are derived from the
/// operands at construction and cached read-only; they are identical across
/// the value path, the bounds path and every derivative.
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    parameters: usize,
    dimensions: usize,
}

/// Merges two operand arities: equal arities pass through, a constant
/// (arity 0) broadcasts into the other operand's parameter space.
fn merged_arity(lhs: &Expression, rhs: &Expression) -> Result<usize, ConstructError> {
    match (lhs.parameter_count(), rhs.parameter_count()) {
        (a, b) if a == b => Ok(a),
        (0, b) => Ok(b),
        (a, 0) => Ok(a),
        (a, b) => Err(ConstructError::ArityMismatch { lhs: a, rhs: b }),
    }
}

impl Node {
    pub(crate) fn constant(value: DVector<f64>) -> Node {
        debug_assert!(!value.is_empty(), "constant must have at least one component");
        Node {
            parameters: 0,
            dimensions: value.len(),
            kind: NodeKind::Constant(value),
        }
    }

    pub(crate) fn parameter(arity: usize, index: usize) -> Result<Node, ConstructError> {
        if index >= arity {
            return Err(ConstructError::IndexOutOfRange {
                kind: "parameter",
                index,
                count: arity,
            });
        }
        Ok(Node {
            kind: NodeKind::Parameter { arity, index },
            parameters: arity,
            dimensions: 1,
        })
    }

    pub(crate) fn linear(
        origin: DVector<f64>,
        basis: DMatrix<f64>,
    ) -> Result<Node, ConstructError> {
        if origin.len() != basis.nrows() {
            return Err(ConstructError::DimensionMismatch {
                context: "linear origin",
                expected: basis.nrows(),
                got: origin.len(),
            });
        }
        Ok(Node {
            parameters: basis.ncols(),
            dimensions: basis.nrows(),
            kind: NodeKind::Linear { origin, basis },
        })
    }

    pub(crate) fn unary(kind: UnaryKind, operand: Expression) -> Result<Node, ConstructError> {
        if kind != UnaryKind::Negate && operand.value_dimension() != 1 {
            return Err(ConstructError::DimensionMismatch {
                context: kind.name(),
                expected: 1,
                got: operand.value_dimension(),
            });
        }
        Ok(Node {
            parameters: operand.parameter_count(),
            dimensions: operand.value_dimension(),
            kind: NodeKind::Unary { kind, operand },
        })
    }

    pub(crate) fn binary(
        kind: BinaryKind,
        lhs: Expression,
        rhs: Expression,
    ) -> Result<Node, ConstructError> {
        let parameters = merged_arity(&lhs, &rhs)?;
        let dimensions = match kind {
            BinaryKind::Sum | BinaryKind::Difference => {
                if lhs.value_dimension() != rhs.value_dimension() {
                    return Err(ConstructError::DimensionMismatch {
                        context: kind.name(),
                        expected: lhs.value_dimension(),
                        got: rhs.value_dimension(),
                    });
                }
                lhs.value_dimension()
            }
            BinaryKind::Product | BinaryKind::Quotient => {
                if rhs.value_dimension() != 1 {
                    return Err(ConstructError::DimensionMismatch {
                        context: match kind {
                            BinaryKind::Product => "product multiplier",
                            _ => "quotient divisor",
                        },
                        expected: 1,
                        got: rhs.value_dimension(),
                    });
                }
                lhs.value_dimension()
            }
        };
        Ok(Node {
            kind: NodeKind::Binary { kind, lhs, rhs },
            parameters,
            dimensions,
        })
    }

    pub(crate) fn composition(
        outer: Expression,
        inner: Expression,
    ) -> Result<Node, ConstructError> {
        if outer.parameter_count() != inner.value_dimension() {
            return Err(ConstructError::ArityMismatch {
                lhs: outer.parameter_count(),
                rhs: inner.value_dimension(),
            });
        }
        Ok(Node {
            parameters: inner.parameter_count(),
            dimensions: outer.value_dimension(),
            kind: NodeKind::Composition { outer, inner },
        })
    }

    pub(crate) fn components(
        operand: Expression,
        index: usize,
        count: usize,
    ) -> Result<Node, ConstructError> {
        if count == 0 || index + count > operand.value_dimension() {
            return Err(ConstructError::IndexOutOfRange {
                kind: "component",
                index,
                count: operand.value_dimension(),
            });
        }
        Ok(Node {
            parameters: operand.parameter_count(),
            dimensions: count,
            kind: NodeKind::Components {
                operand,
                index,
                count,
            },
        })
    }

    pub(crate) fn concatenation(
        lhs: Expression,
        rhs: Expression,
    ) -> Result<Node, ConstructError> {
        let parameters = merged_arity(&lhs, &rhs)?;
        Ok(Node {
            parameters,
            dimensions: lhs.value_dimension() + rhs.value_dimension(),
            kind: NodeKind::Concatenation { lhs, rhs },
        })
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parameters(&self) -> usize {
        self.parameters
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Evaluates every column of the parameter block in one traversal.
    pub(crate) fn values(
        &self,
        parameters: &ParameterBlock,
        cache: &mut ValueCache,
    ) -> Result<DMatrix<f64>, EvalError> {
        let count = parameters.ncols();
        match &self.kind {
            NodeKind::Constant(value) => {
                Ok(DMatrix::from_fn(self.dimensions, count, |r, _| value[r]))
            }
            NodeKind::Parameter { index, .. } => {
                Ok(DMatrix::from_fn(1, count, |_, c| parameters[(*index, c)]))
            }
            NodeKind::Linear { origin, basis } => {
                let mut result = basis * parameters;
                for mut column in result.column_iter_mut() {
                    column += origin;
                }
                Ok(result)
            }
            NodeKind::Unary { kind, operand } => {
                let operand_values = operand.values_cached(parameters, cache)?;
                if *kind == UnaryKind::Negate {
                    return Ok(-operand_values);
                }
                let mut result = DMatrix::zeros(1, count);
                for c in 0..count {
                    result[(0, c)] = kind.apply_point(operand_values[(0, c)])?;
                }
                Ok(result)
            }
            NodeKind::Binary { kind, lhs, rhs } => {
                let l = lhs.values_cached(parameters, cache)?;
                let r = rhs.values_cached(parameters, cache)?;
                match kind {
                    BinaryKind::Sum => Ok(l + r),
                    BinaryKind::Difference => Ok(l - r),
                    BinaryKind::Product => {
                        Ok(DMatrix::from_fn(self.dimensions, count, |row, c| {
                            l[(row, c)] * r[(0, c)]
                        }))
                    }
                    BinaryKind::Quotient => {
                        let mut result = DMatrix::zeros(self.dimensions, count);
                        for c in 0..count {
                            let divisor = r[(0, c)];
                            if divisor == 0.0 {
                                return Err(EvalError::DivisionByZero {
                                    lower: divisor,
                                    upper: divisor,
                                });
                            }
                            for row in 0..self.dimensions {
                                result[(row, c)] = l[(row, c)] / divisor;
                            }
                        }
                        Ok(result)
                    }
                }
            }
            NodeKind::Composition { outer, inner } => {
                let inner_values = inner.values_cached(parameters, cache)?;
                // The outer subtree is evaluated in a different parameter
                // space, so it gets its own cache.
                outer.values_cached(&inner_values, &mut ValueCache::new())
            }
            NodeKind::Components {
                operand,
                index,
                count: taken,
            } => Ok(operand
                .values_cached(parameters, cache)?
                .rows(*index, *taken)
                .into_owned()),
            NodeKind::Concatenation { lhs, rhs } => {
                let l = lhs.values_cached(parameters, cache)?;
                let r = rhs.values_cached(parameters, cache)?;
                let mut result = DMatrix::zeros(self.dimensions, count);
                result.rows_mut(0, l.nrows()).copy_from(&l);
                result.rows_mut(l.nrows(), r.nrows()).copy_from(&r);
                Ok(result)
            }
        }
    }

    /// Evaluates a sound enclosure of the expression's range over every
    /// parameter box column.
    pub(crate) fn bounds(
        &self,
        parameters: &ParameterBoundsBlock,
        cache: &mut BoundsCache,
    ) -> Result<DMatrix<Interval>, EvalError> {
        let count = parameters.ncols();
        match &self.kind {
            NodeKind::Constant(value) => Ok(DMatrix::from_fn(self.dimensions, count, |r, _| {
                Interval::from(value[r])
            })),
            NodeKind::Parameter { index, .. } => {
                Ok(DMatrix::from_fn(1, count, |_, c| parameters[(*index, c)]))
            }
            NodeKind::Linear { origin, basis } => {
                let interval_basis = basis.map(Interval::from);
                let interval_origin = origin.map(Interval::from);
                let mut result = &interval_basis * parameters;
                for mut column in result.column_iter_mut() {
                    column += &interval_origin;
                }
                Ok(result)
            }
            NodeKind::Unary { kind, operand } => {
                let operand_bounds = operand.bounds_cached(parameters, cache)?;
                if *kind == UnaryKind::Negate {
                    return Ok(-operand_bounds);
                }
                let mut result = DMatrix::zeros(1, count);
                for c in 0..count {
                    result[(0, c)] = kind.apply_bounds(operand_bounds[(0, c)])?;
                }
                Ok(result)
            }
            NodeKind::Binary { kind, lhs, rhs } => {
                let l = lhs.bounds_cached(parameters, cache)?;
                let r = rhs.bounds_cached(parameters, cache)?;
                match kind {
                    BinaryKind::Sum => Ok(l + r),
                    BinaryKind::Difference => Ok(l - r),
                    BinaryKind::Product => {
                        Ok(DMatrix::from_fn(self.dimensions, count, |row, c| {
                            l[(row, c)] * r[(0, c)]
                        }))
                    }
                    BinaryKind::Quotient => {
                        let mut result = DMatrix::zeros(self.dimensions, count);
                        for c in 0..count {
                            let divisor = r[(0, c)];
                            for row in 0..self.dimensions {
                                result[(row, c)] = l[(row, c)].checked_div(divisor)?;
                            }
                        }
                        Ok(result)
                    }
                }
            }
            NodeKind::Composition { outer, inner } => {
                let inner_bounds = inner.bounds_cached(parameters, cache)?;
                outer.bounds_cached(&inner_bounds, &mut BoundsCache::new())
            }
            NodeKind::Components {
                operand,
                index,
                count: taken,
            } => Ok(operand
                .bounds_cached(parameters, cache)?
                .rows(*index, *taken)
                .into_owned()),
            NodeKind::Concatenation { lhs, rhs } => {
                let l = lhs.bounds_cached(parameters, cache)?;
                let r = rhs.bounds_cached(parameters, cache)?;
                let mut result = DMatrix::zeros(self.dimensions, count);
                result.rows_mut(0, l.nrows()).copy_from(&l);
                result.rows_mut(l.nrows(), r.nrows()).copy_from(&r);
                Ok(result)
            }
        }
    }

    /// Builds the partial derivative with respect to parameter `index` as a
    /// new expression.
    ///
    /// The index is validated by the facade before dispatch; children are
    /// differentiated through the facade so the usual constant folds apply
    /// to the derivative structure as it is assembled.
    pub(crate) fn derivative(&self, index: usize) -> Result<Expression, ConstructError> {
        match &self.kind {
            NodeKind::Constant(value) => {
                Ok(Expression::constant_vector(DVector::zeros(value.len())))
            }
            NodeKind::Parameter { index: own, .. } => Ok(Expression::constant(if *own == index {
                1.0
            } else {
                0.0
            })),
            NodeKind::Linear { origin, basis } => {
                if basis.ncols() == 0 {
                    // A zero-parameter affine map is effectively constant.
                    return Ok(Expression::constant_vector(DVector::zeros(origin.len())));
                }
                Ok(Expression::constant_vector(basis.column(index).into_owned()))
            }
            NodeKind::Unary { kind, operand } => {
                let operand_derivative = operand.derivative(index)?;
                match kind {
                    // d sin(g) = cos(g) g'
                    UnaryKind::Sin => Expression::product(
                        &Expression::unary(UnaryKind::Cos, operand)?,
                        &operand_derivative,
                    ),
                    // d cos(g) = -sin(g) g'
                    UnaryKind::Cos => Expression::unary(
                        UnaryKind::Negate,
                        &Expression::product(
                            &Expression::unary(UnaryKind::Sin, operand)?,
                            &operand_derivative,
                        )?,
                    ),
                    // d tan(g) = g' / cos(g)^2
                    UnaryKind::Tan => {
                        let cosine = Expression::unary(UnaryKind::Cos, operand)?;
                        Expression::quotient(
                            &operand_derivative,
                            &Expression::product(&cosine, &cosine)?,
                        )
                    }
                    // d asin(g) = g' / sqrt(1 - g^2)
                    UnaryKind::Asin => Expression::quotient(
                        &operand_derivative,
                        &Self::sqrt_one_minus_squared(operand)?,
                    ),
                    // d acos(g) = -g' / sqrt(1 - g^2)
                    UnaryKind::Acos => Expression::unary(
                        UnaryKind::Negate,
                        &Expression::quotient(
                            &operand_derivative,
                            &Self::sqrt_one_minus_squared(operand)?,
                        )?,
                    ),
                    // d atan(g) = g' / (1 + g^2)
                    UnaryKind::Atan => Expression::quotient(
                        &operand_derivative,
                        &Expression::sum(
                            &Expression::constant(1.0),
                            &Expression::product(operand, operand)?,
                        )?,
                    ),
                    // d exp(g) = exp(g) g'
                    UnaryKind::Exp => Expression::product(
                        &Expression::unary(UnaryKind::Exp, operand)?,
                        &operand_derivative,
                    ),
                    // d log(g) = g' / g
                    UnaryKind::Log => Expression::quotient(&operand_derivative, operand),
                    // d sqrt(g) = g' / (2 sqrt(g))
                    UnaryKind::Sqrt => Expression::quotient(
                        &operand_derivative,
                        &Expression::product(
                            &Expression::unary(UnaryKind::Sqrt, operand)?,
                            &Expression::constant(2.0),
                        )?,
                    ),
                    UnaryKind::Negate => {
                        Expression::unary(UnaryKind::Negate, &operand_derivative)
                    }
                }
            }
            NodeKind::Binary { kind, lhs, rhs } => {
                let lhs_derivative = lhs.derivative(index)?;
                let rhs_derivative = rhs.derivative(index)?;
                match kind {
                    BinaryKind::Sum => Expression::sum(&lhs_derivative, &rhs_derivative),
                    BinaryKind::Difference => {
                        Expression::difference(&lhs_derivative, &rhs_derivative)
                    }
                    // d (f g) = f' g + f g'
                    BinaryKind::Product => Expression::sum(
                        &Expression::product(&lhs_derivative, rhs)?,
                        &Expression::product(lhs, &rhs_derivative)?,
                    ),
                    // d (f / g) = (f' g - f g') / g^2
                    BinaryKind::Quotient => Expression::quotient(
                        &Expression::difference(
                            &Expression::product(&lhs_derivative, rhs)?,
                            &Expression::product(lhs, &rhs_derivative)?,
                        )?,
                        &Expression::product(rhs, rhs)?,
                    ),
                }
            }
            NodeKind::Composition { outer, inner } => {
                // General chain rule: sum over the inner components of
                // (d outer / d u_j)(inner) * d inner_j / d t_index.
                let inner_derivative = inner.derivative(index)?;
                let mut total: Option<Expression> = None;
                for j in 0..inner.value_dimension() {
                    // A partial that folded to a constant needs no
                    // composition; it broadcasts as-is.
                    let outer_partial = outer.derivative(j)?;
                    let composed_partial = if outer_partial.is_constant() {
                        outer_partial
                    } else {
                        outer_partial.composed_with(inner)?
                    };
                    let term = Expression::product(
                        &composed_partial,
                        &inner_derivative.component(j)?,
                    )?;
                    total = Some(match total {
                        None => term,
                        Some(accumulated) => Expression::sum(&accumulated, &term)?,
                    });
                }
                // inner.value_dimension() >= 1, so total is always set.
                total.ok_or(ConstructError::NotImplemented(
                    "composition over a zero-dimensional inner expression",
                ))
            }
            NodeKind::Components {
                operand,
                index: start,
                count,
            } => operand.derivative(index)?.components(*start, *count),
            NodeKind::Concatenation { lhs, rhs } => {
                Expression::concatenated(&lhs.derivative(index)?, &rhs.derivative(index)?)
            }
        }
    }

    /// Builds `sqrt(1 - g^2)` for the inverse-trig chain rules.
    fn sqrt_one_minus_squared(operand: &Expression) -> Result<Expression, ConstructError> {
        Expression::unary(
            UnaryKind::Sqrt,
            &Expression::difference(
                &Expression::constant(1.0),
                &Expression::product(operand, operand)?,
            )?,
        )
    }

    /// Structural value-equality; `Expression` handles compare by identity,
    /// so deep comparison is explicit and opt-in.
    pub(crate) fn equivalent(&self, other: &Node) -> bool {
        if self.parameters != other.parameters || self.dimensions != other.dimensions {
            return false;
        }
        match (&self.kind, &other.kind) {
            (NodeKind::Constant(a), NodeKind::Constant(b)) => a == b,
            (
                NodeKind::Parameter { arity, index },
                NodeKind::Parameter {
                    arity: other_arity,
                    index: other_index,
                },
            ) => arity == other_arity && index == other_index,
            (
                NodeKind::Linear { origin, basis },
                NodeKind::Linear {
                    origin: other_origin,
                    basis: other_basis,
                },
            ) => origin == other_origin && basis == other_basis,
            (
                NodeKind::Unary { kind, operand },
                NodeKind::Unary {
                    kind: other_kind,
                    operand: other_operand,
                },
            ) => kind == other_kind && operand.equivalent(other_operand),
            (
                NodeKind::Binary { kind, lhs, rhs },
                NodeKind::Binary {
                    kind: other_kind,
                    lhs: other_lhs,
                    rhs: other_rhs,
                },
            ) => kind == other_kind && lhs.equivalent(other_lhs) && rhs.equivalent(other_rhs),
            (
                NodeKind::Composition { outer, inner },
                NodeKind::Composition {
                    outer: other_outer,
                    inner: other_inner,
                },
            ) => outer.equivalent(other_outer) && inner.equivalent(other_inner),
            (
                NodeKind::Components {
                    operand,
                    index,
                    count,
                },
                NodeKind::Components {
                    operand: other_operand,
                    index: other_index,
                    count: other_count,
                },
            ) => index == other_index && count == other_count && operand.equivalent(other_operand),
            (
                NodeKind::Concatenation { lhs, rhs },
                NodeKind::Concatenation {
                    lhs: other_lhs,
                    rhs: other_rhs,
                },
            ) => lhs.equivalent(other_lhs) && rhs.equivalent(other_rhs),
            _ => false,
        }
    }

    /// One-line label for the structural dump.
    pub(crate) fn kind_label(&self) -> String {
        use itertools::Itertools;
        match &self.kind {
            NodeKind::Constant(value) => {
                format!("Constant [{}]", value.iter().join(", "))
            }
            NodeKind::Parameter { arity, index } => format!("Parameter {index} of {arity}"),
            NodeKind::Linear { .. } => "Linear".to_string(),
            NodeKind::Unary { kind, .. } => format!("Unary {}", kind.name()),
            NodeKind::Binary { kind, .. } => format!("Binary {}", kind.name()),
            NodeKind::Composition { .. } => "Composition".to_string(),
            NodeKind::Components { index, count, .. } => {
                format!("Components {index}..{}", index + count)
            }
            NodeKind::Concatenation { .. } => "Concatenation".to_string(),
        }
    }

    /// Appends the structural dump lines for this node and its children.
    pub(crate) fn describe_into(&self, indent: usize, lines: &mut Vec<String>) {
        lines.push(format!(
            "{}R{} -> R{} | {}",
            "  ".repeat(indent),
            self.parameters,
            self.dimensions,
            self.kind_label()
        ));
        match &self.kind {
            NodeKind::Constant(_) | NodeKind::Parameter { .. } | NodeKind::Linear { .. } => {}
            NodeKind::Unary { operand, .. } | NodeKind::Components { operand, .. } => {
                operand.node().describe_into(indent + 1, lines);
            }
            NodeKind::Binary { lhs, rhs, .. } | NodeKind::Concatenation { lhs, rhs } => {
                lhs.node().describe_into(indent + 1, lines);
                rhs.node().describe_into(indent + 1, lines);
            }
            NodeKind::Composition { outer, inner } => {
                outer.node().describe_into(indent + 1, lines);
                inner.node().describe_into(indent + 1, lines);
            }
        }
    }
}

/// Moves every child expression of `kind` onto the worklist, leaving
/// detached placeholders behind.
fn detach_children(kind: &mut NodeKind, pending: &mut Vec<Expression>) {
    match kind {
        NodeKind::Constant(_) | NodeKind::Parameter { .. } | NodeKind::Linear { .. } => {}
        NodeKind::Unary { operand, .. } | NodeKind::Components { operand, .. } => {
            pending.push(operand.take_for_release());
        }
        NodeKind::Binary { lhs, rhs, .. } | NodeKind::Concatenation { lhs, rhs } => {
            pending.push(lhs.take_for_release());
            pending.push(rhs.take_for_release());
        }
        NodeKind::Composition { outer, inner } => {
            pending.push(outer.take_for_release());
            pending.push(inner.take_for_release());
        }
    }
}

impl Drop for Node {
    /// Releases children iteratively so that dropping the last handle to a
    /// pathologically deep graph cannot overflow the stack.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(&mut self.kind, &mut pending);
        while let Some(child) = pending.pop() {
            if let Some(mut node) = child.into_unique_node() {
                detach_children(&mut node.kind, &mut pending);
            }
        }
    }
}

// Placeholder used when detaching children during release; carries no
// child references of its own.
pub(crate) fn detached_node() -> Node {
    Node {
        kind: NodeKind::Parameter { arity: 1, index: 0 },
        parameters: 1,
        dimensions: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{sin, Expression};

    #[test]
    fn test_binary_arity_rules() {
        let surface = Expression::u();
        let volume = Expression::parameter(3, 2).unwrap();
        let err = Node::binary(BinaryKind::Sum, surface.clone(), volume).unwrap_err();
        assert_eq!(err, ConstructError::ArityMismatch { lhs: 2, rhs: 3 });

        // Constants broadcast into either side.
        let broadcast =
            Node::binary(BinaryKind::Sum, surface.clone(), Expression::constant(1.0)).unwrap();
        assert_eq!(broadcast.parameters(), 2);
        assert_eq!(broadcast.dimensions(), 1);
    }

    #[test]
    fn test_elementary_functions_require_scalar_operands() {
        let plane = Expression::identity(2);
        let err = Node::unary(UnaryKind::Sin, plane.clone()).unwrap_err();
        assert_eq!(
            err,
            ConstructError::DimensionMismatch {
                context: "sin",
                expected: 1,
                got: 2,
            }
        );
        // Negation stays dimension-generic.
        assert_eq!(Node::unary(UnaryKind::Negate, plane).unwrap().dimensions(), 2);
    }

    #[test]
    fn test_product_requires_scalar_multiplier() {
        let plane = Expression::identity(2);
        let err = Node::binary(BinaryKind::Product, plane.clone(), plane).unwrap_err();
        assert!(matches!(err, ConstructError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_point_evaluation_checks_domains() {
        assert!(matches!(
            UnaryKind::Log.apply_point(-1.0),
            Err(EvalError::DomainError { function: "log", .. })
        ));
        assert!(matches!(
            UnaryKind::Asin.apply_point(2.0),
            Err(EvalError::DomainError { function: "asin", .. })
        ));
        assert_eq!(UnaryKind::Sqrt.apply_point(4.0), Ok(2.0));
    }

    #[test]
    fn test_product_rule_structure_folds_unit_derivatives() {
        // d(t * t) = 1 * t + t * 1, which the constructors fold to t + t.
        let t = Expression::t();
        let square = Expression::product(&t, &t).unwrap();
        let derivative = square.derivative(0).unwrap();
        let expected = Expression::sum(&t, &t).unwrap();
        assert!(derivative.equivalent(&expected));
    }

    #[test]
    fn test_structural_equivalence_vs_identity() {
        let first = sin(&Expression::t());
        let second = sin(&Expression::t());
        assert!(first != second);
        assert!(first.equivalent(&second));
        let shared = first.clone();
        assert!(first == shared);
    }

    #[test]
    fn test_deep_graph_releases_iteratively() {
        // Deep enough that a recursive release would overflow a test-thread
        // stack.
        let mut expression = Expression::t();
        for _ in 0..100_000 {
            expression = Expression::unary(UnaryKind::Negate, &expression).unwrap();
        }
        drop(expression);
    }

    #[test]
    fn test_concatenation_metadata() {
        let curve = Node::concatenation(sin(&Expression::t()), Expression::t()).unwrap();
        assert_eq!(curve.parameters(), 1);
        assert_eq!(curve.dimensions(), 2);
    }

    #[test]
    fn test_components_validation() {
        let plane = Expression::identity(3);
        let err = Node::components(plane.clone(), 2, 2).unwrap_err();
        assert_eq!(
            err,
            ConstructError::IndexOutOfRange {
                kind: "component",
                index: 2,
                count: 3,
            }
        );
        let slice = Node::components(plane, 1, 2).unwrap();
        assert_eq!(slice.dimensions(), 2);
    }
}
