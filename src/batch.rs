//! Batched parameter blocks.
//!
//! All evaluation in this crate is batched: a parameter block is a
//! `dimension x count` matrix whose columns are individual parameter
//! assignments, and a parameter bounds block is the same shape with interval
//! boxes in place of values. A single `evaluate` call walks the expression
//! graph once for the whole block, so shared sub-expressions are computed
//! once per call rather than once per column or once per parent.
//!
//! The helpers here build blocks from points and boxes and perform the shape
//! checking the facade relies on: an expression of arity `n` accepts only
//! blocks with `n` rows (constants, arity 0, broadcast over any block).

use nalgebra::DMatrix;

use crate::errors::EvalError;
use crate::interval::Interval;

/// A `dimension x count` batch of parameter assignments; each column is one
/// evaluation point.
pub type ParameterBlock = DMatrix<f64>;

/// A `dimension x count` batch of parameter boxes; each column is one box.
pub type ParameterBoundsBlock = DMatrix<Interval>;

/// A single evaluation point as a one-column block.
pub fn point_block(point: &[f64]) -> ParameterBlock {
    DMatrix::from_column_slice(point.len(), 1, point)
}

/// A block of `count` points laid out column-major in `values`.
///
/// # Panics
/// When `values.len()` is not a multiple of `dimension`.
pub fn points_block(dimension: usize, values: &[f64]) -> ParameterBlock {
    assert!(
        dimension > 0 && values.len() % dimension == 0,
        "point data length {} is not a multiple of dimension {dimension}",
        values.len()
    );
    DMatrix::from_column_slice(dimension, values.len() / dimension, values)
}

/// A single parameter box as a one-column bounds block.
pub fn box_block(bounds: &[Interval]) -> ParameterBoundsBlock {
    DMatrix::from_column_slice(bounds.len(), 1, bounds)
}

/// A block of `count` boxes laid out column-major in `bounds`.
///
/// # Panics
/// When `bounds.len()` is not a multiple of `dimension`.
pub fn boxes_block(dimension: usize, bounds: &[Interval]) -> ParameterBoundsBlock {
    assert!(
        dimension > 0 && bounds.len() % dimension == 0,
        "box data length {} is not a multiple of dimension {dimension}",
        bounds.len()
    );
    DMatrix::from_column_slice(dimension, bounds.len() / dimension, bounds)
}

/// The degenerate bounds block enclosing exactly the points of a value
/// block; useful for soundness checks.
pub fn degenerate_bounds(block: &ParameterBlock) -> ParameterBoundsBlock {
    block.map(Interval::from)
}

/// Validates a block's row count against an expression's arity.
pub(crate) fn check_shape(expected: usize, got: usize) -> Result<(), EvalError> {
    if expected != 0 && expected != got {
        return Err(EvalError::InvalidBlockShape { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_block_is_one_column() {
        let block = point_block(&[1.0, 2.0, 3.0]);
        assert_eq!((block.nrows(), block.ncols()), (3, 1));
        assert_eq!(block[(1, 0)], 2.0);
    }

    #[test]
    fn test_points_block_layout_is_column_major() {
        let block = points_block(2, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!((block.nrows(), block.ncols()), (2, 2));
        // Second column is the second point.
        assert_eq!(block[(0, 1)], 3.0);
        assert_eq!(block[(1, 1)], 4.0);
    }

    #[test]
    fn test_degenerate_bounds_are_singletons() {
        let bounds = degenerate_bounds(&point_block(&[1.5, -2.0]));
        assert!(bounds.iter().all(|interval| interval.is_singleton()));
        assert_eq!(bounds[(0, 0)], Interval::from(1.5));
    }

    #[test]
    fn test_shape_check() {
        assert!(check_shape(2, 2).is_ok());
        // Constants broadcast over any block shape.
        assert!(check_shape(0, 7).is_ok());
        assert_eq!(
            check_shape(2, 3).unwrap_err(),
            EvalError::InvalidBlockShape {
                expected: 2,
                got: 3
            }
        );
    }
}
