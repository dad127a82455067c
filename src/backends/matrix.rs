//! Matrix-input conversion trait.
//!
//! Batches of evaluation points can arrive as nalgebra matrices or (behind
//! the `ndarray` feature) ndarray arrays. The `Matrix` trait exposes the
//! shape and element access the block builder needs; `parameter_block_from`
//! copies any implementor into the crate's own column-per-point layout, so
//! the containers' differing storage orders never leak into evaluation.

use nalgebra::DMatrix;

use crate::batch::ParameterBlock;

/// A matrix-like container of `f64` values, `rows x cols`.
pub trait Matrix {
    /// Returns the dimensions as (rows, columns).
    fn dims(&self) -> (usize, usize);

    /// Returns the element at (row, column).
    fn element(&self, row: usize, col: usize) -> f64;

    /// Creates a new matrix of the specified dimensions filled with zeros.
    fn zeros(rows: usize, cols: usize) -> Self;
}

/// Copies a matrix-like batch into a parameter block, one column per
/// evaluation point.
pub fn parameter_block_from<M: Matrix>(matrix: &M) -> ParameterBlock {
    let (rows, cols) = matrix.dims();
    DMatrix::from_fn(rows, cols, |r, c| matrix.element(r, c))
}

impl Matrix for DMatrix<f64> {
    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn element(&self, row: usize, col: usize) -> f64 {
        self[(row, col)]
    }

    fn zeros(rows: usize, cols: usize) -> Self {
        DMatrix::zeros(rows, cols)
    }
}

#[cfg(feature = "ndarray")]
impl Matrix for ndarray::Array2<f64> {
    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn element(&self, row: usize, col: usize) -> f64 {
        self[[row, col]]
    }

    fn zeros(rows: usize, cols: usize) -> Self {
        ndarray::Array2::zeros((rows, cols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nalgebra_conversion_preserves_layout() {
        let mut source = <DMatrix<f64> as Matrix>::zeros(2, 3);
        source[(0, 2)] = 5.0;
        source[(1, 0)] = -1.0;
        let block = parameter_block_from(&source);
        assert_eq!(block, source);
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_ndarray_conversion_transposes_storage_order() {
        let source = ndarray::arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let block = parameter_block_from(&source);
        // Row-major input lands in the same logical positions.
        assert_eq!(block[(0, 1)], 2.0);
        assert_eq!(block[(1, 0)], 3.0);
    }
}
