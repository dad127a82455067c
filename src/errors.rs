//! Error types for the paramexpr crate.
//!
//! This module defines the two error families used throughout the crate:
//!
//! - `ConstructError`: contract violations detected while building new
//!   expression nodes (mismatched arities, non-scalar operands, bad indices)
//! - `EvalError`: conditions that can only be detected while evaluating an
//!   expression against concrete values or boxes (division by zero, domain
//!   violations, badly shaped parameter blocks)
//!
//! The split matters for callers: construction errors indicate a bug in the
//! code assembling the expression and are raised as panics by the operator
//! sugar (`+`, `-`, `*`, `/` and the elementary free functions), while the
//! checked constructors return them as values. Evaluation errors are ordinary
//! runtime conditions that callers are expected to handle; nothing in this
//! crate swallows them or substitutes a default result.

use thiserror::Error;

/// Contract violations detected when constructing an expression node.
///
/// Every variant here is detectable at construction time and is never
/// deferred to evaluation. The checked constructors on `Expression` return
/// these as `Err`; the operator overloads panic with the same message since
/// a mismatch there is a caller bug.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructError {
    /// Operand parameter counts disagree and neither operand is a constant
    #[error("operand parameter counts disagree: {lhs} vs {rhs}")]
    ArityMismatch { lhs: usize, rhs: usize },
    /// An operation requiring an operand of a particular value dimension
    /// received one of a different dimension
    #[error("{context} requires a {expected}-dimensional operand, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    /// A parameter or component index outside the valid range
    #[error("{kind} index {index} out of range (count {count})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        count: usize,
    },
    /// An operation/variant combination that is intentionally unsupported.
    /// Raised loudly instead of returning a default result.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

/// Conditions detected while evaluating an expression.
///
/// These are recoverable: a divisor box straddling zero or an arcsine
/// operand drifting outside [-1, 1] are expected outcomes when probing
/// candidate parameter boxes, and callers handle them (typically by
/// subdividing the box and retrying).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// The divisor bounds contain zero (or a point divisor is exactly zero);
    /// there is no safe finite enclosure for the quotient
    #[error("division by a range containing zero: [{lower}, {upper}]")]
    DivisionByZero { lower: f64, upper: f64 },
    /// An elementary function was evaluated outside its domain
    #[error("{function} undefined over [{lower}, {upper}]")]
    DomainError {
        function: &'static str,
        lower: f64,
        upper: f64,
    },
    /// A parameter block's row count disagrees with the expression arity
    #[error("parameter block has {got} rows, expression expects {expected}")]
    InvalidBlockShape { expected: usize, got: usize },
}
