//! Parametric expression graphs for geometric modeling.
//!
//! This crate represents scalar- and vector-valued functions of real
//! parameters (the curves, surfaces, transformations and constraints of a
//! geometric-modeling kernel) as immutable, shared expression graphs. It
//! keeps three computations consistent for every expression shape:
//!
//! - exact batched evaluation at concrete parameter values
//! - guaranteed enclosing bounds over parameter boxes, via interval
//!   arithmetic, for robust intersection and containment testing
//! - exact symbolic derivatives and compositions, built as new expressions
//!   rather than by numerical differencing
//!
//! # Example
//!
//! ```rust
//! use paramexpr::{Expression, Interval, sin};
//!
//! // f(t) = t * t
//! let t = Expression::t();
//! let f = &t * &t;
//!
//! // Exact evaluation: f(3) = 9
//! let value = f.evaluate_at(&[3.0]).unwrap();
//! assert_eq!(value[0], 9.0);
//!
//! // Sound bounds: the range over [1, 3] is enclosed
//! let bounds = f.bounds_over(&[Interval::new(1.0, 3.0)]).unwrap();
//! assert!(bounds[0].contains(Interval::new(1.0, 9.0), 0.0));
//!
//! // Symbolic derivative: f'(3) = 6 by the product rule
//! let derivative = f.derivative(0).unwrap();
//! assert_eq!(derivative.evaluate_at(&[3.0]).unwrap()[0], 6.0);
//!
//! // Composition: sin(2t) at t = pi/4 is 1
//! let doubled = Expression::t() * Expression::constant(2.0);
//! let wave = sin(&Expression::t()).composed_with(&doubled).unwrap();
//! let value = wave.evaluate_at(&[std::f64::consts::FRAC_PI_4]).unwrap();
//! assert!((value[0] - 1.0).abs() < 1e-12);
//! ```

pub use errors::{ConstructError, EvalError};
pub use expression::{acos, asin, atan, cos, exp, log, sin, sqrt, tan, Expression};
pub use interval::Interval;

pub mod prelude {
    pub use crate::backends::matrix::{parameter_block_from, Matrix};
    pub use crate::backends::vector::Vector;
    pub use crate::batch::{
        box_block, boxes_block, degenerate_bounds, point_block, points_block, ParameterBlock,
        ParameterBoundsBlock,
    };
    pub use crate::errors::{ConstructError, EvalError};
    pub use crate::expression::{acos, asin, atan, cos, exp, log, sin, sqrt, tan, Expression};
    pub use crate::interval::Interval;
    pub use crate::node::{BinaryKind, Node, NodeKind, UnaryKind};
}

/// Input-container conversion traits for points and batches
pub mod backends {
    pub mod matrix;
    pub mod vector;
}

/// Parameter blocks, bounds blocks and shape checking
pub mod batch;
/// Fixed-width binary round-trip for scalar values
pub mod codec;
/// Error types for the construction and evaluation failure modes
pub mod errors;
/// The user-facing expression handle, operators and free functions
pub mod expression;
/// Closed-interval arithmetic used by the bounds path
pub mod interval;
/// Expression node variants and their evaluation/derivative logic
pub mod node;
