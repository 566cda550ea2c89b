//! Bridge between `ndarray` storage and the `faer` decompositions.
//!
//! The statistical modules keep all data in `ndarray` types. Only the
//! column-pivoted QR factorization and the triangular solves on its `R` factor
//! are delegated to `faer`.

use faer::linalg::solvers::ColPivQr;
use faer::linalg::triangular_inverse;
use faer::linalg::triangular_solve::solve_upper_triangular_in_place;
use faer::{Mat, MatRef, Par};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

/// Zero-copy `faer` view over an `ndarray` matrix when the memory layout
/// allows it; otherwise an owned copy.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new(array: ArrayView2<'a, f64>) -> Self {
        let (rows, cols) = array.dim();
        let storage = if array.is_standard_layout() {
            match array.to_slice() {
                Some(slice) => {
                    FaerStorage::Borrowed(MatRef::from_row_major_slice(slice, rows, cols))
                }
                None => FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)])),
            }
        } else if array.t().is_standard_layout() {
            match array.to_slice_memory_order() {
                Some(slice) => {
                    FaerStorage::Borrowed(MatRef::from_column_major_slice(slice, rows, cols))
                }
                None => FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)])),
            }
        } else {
            FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        match &self.storage {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Thin column-pivoted QR factorization `A P = Q R`.
///
/// `pivot[j]` is the original column index that ended up in position `j`.
#[derive(Debug, Clone)]
pub struct PivotedQr {
    /// Orthonormal factor, shape `[nrows, min(nrows, ncols)]`.
    pub q: Array2<f64>,
    /// Upper-trapezoidal factor, shape `[min(nrows, ncols), ncols]`.
    pub r: Array2<f64>,
    pub pivot: Vec<usize>,
}

impl PivotedQr {
    /// Numerical rank: the number of leading diagonal entries of `R` whose
    /// magnitude exceeds `tol * |R[0, 0]|`.
    pub fn rank(&self, tol: f64) -> usize {
        let k = self.r.nrows().min(self.r.ncols());
        if k == 0 {
            return 0;
        }
        let scale = self.r[[0, 0]].abs();
        if scale == 0.0 {
            return 0;
        }
        (0..k)
            .take_while(|&j| self.r[[j, j]].abs() > tol * scale)
            .count()
    }
}

/// Perform pivoted QR decomposition using faer's `ColPivQr` solver, which keeps
/// the Q, R and P factors consistent with one another.
pub fn pivoted_qr(matrix: ArrayView2<f64>) -> PivotedQr {
    let view = FaerArrayView::new(matrix);
    let qr = ColPivQr::new(view.as_ref());

    let q = mat_to_array(qr.compute_thin_Q().as_ref());
    let k = matrix.nrows().min(matrix.ncols());
    let r_full = qr.R();
    let r = Array2::from_shape_fn((k, matrix.ncols()), |(i, j)| r_full[(i, j)]);
    let pivot: Vec<usize> = qr.P().arrays().0.to_vec();

    PivotedQr { q, r, pivot }
}

/// Solves `R x = b` for upper-triangular `R` with faer's triangular solver.
/// The caller guarantees a non-zero diagonal.
pub fn solve_upper_triangular(r: ArrayView2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let tri = FaerArrayView::new(r);
    let mut rhs = Mat::from_fn(b.len(), 1, |i, _| b[i]);
    solve_upper_triangular_in_place(tri.as_ref(), rhs.as_mut(), Par::Seq);
    Array1::from_shape_fn(b.len(), |i| rhs[(i, 0)])
}

/// Inverse of an upper-triangular matrix, itself upper triangular.
pub fn invert_upper_triangular(r: ArrayView2<f64>) -> Array2<f64> {
    let n = r.ncols();
    let tri = FaerArrayView::new(r);
    let mut inv = Mat::<f64>::zeros(n, n);
    triangular_inverse::invert_upper_triangular(inv.as_mut(), tri.as_ref(), Par::Seq);
    mat_to_array(inv.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_pivoted_qr_reconstructs_matrix() {
        let a = array![
            [1.0, 2.0, 0.5],
            [1.0, -1.0, 3.0],
            [1.0, 4.0, -2.0],
            [1.0, 0.0, 1.0],
            [1.0, 3.5, 0.0]
        ];
        let qr = pivoted_qr(a.view());
        assert_eq!(qr.q.dim(), (5, 3));
        assert_eq!(qr.r.dim(), (3, 3));
        assert_eq!(qr.rank(1e-7), 3);

        let mut sorted = qr.pivot.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);

        let qr_product = qr.q.dot(&qr.r);
        for (j, &orig) in qr.pivot.iter().enumerate() {
            for i in 0..a.nrows() {
                assert_abs_diff_eq!(qr_product[[i, j]], a[[i, orig]], epsilon = 1e-10);
            }
        }

        let qtq = qr.q.t().dot(&qr.q);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(qtq[[i, j]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_rank_detects_collinear_column() {
        let a = array![
            [1.0, 2.0, 4.0],
            [1.0, 3.0, 6.0],
            [1.0, 5.0, 10.0],
            [1.0, 7.0, 14.0]
        ];
        let qr = pivoted_qr(a.view());
        assert_eq!(qr.rank(1e-7), 2);
    }

    #[test]
    fn test_triangular_inverse() {
        let r = array![[2.0, 1.0, -1.0], [0.0, 3.0, 0.5], [0.0, 0.0, 4.0]];
        let inv = invert_upper_triangular(r.view());
        let product = r.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(product[[i, j]], expected, epsilon = 1e-12);
            }
        }
        let x = solve_upper_triangular(r.view(), array![1.0, 2.0, 8.0].view());
        assert_abs_diff_eq!(x[2], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_triangular_routines_on_column_major_r() {
        // R stored column-major, as the transpose of a lower-triangular array.
        let lower = array![
            [1.5, 0.0, 0.0, 0.0],
            [-0.5, 2.0, 0.0, 0.0],
            [0.25, 1.0, -3.0, 0.0],
            [2.0, 0.0, 0.5, 0.8]
        ];
        let r = lower.t();
        let b = array![1.0, -2.0, 0.5, 4.0];
        let x = solve_upper_triangular(r, b.view());
        let rx = r.dot(&x);
        for i in 0..4 {
            assert_abs_diff_eq!(rx[i], b[i], epsilon = 1e-12);
        }

        let inv = invert_upper_triangular(r);
        let product = inv.dot(&r);
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(product[[i, j]], expected, epsilon = 1e-12);
            }
            for j in 0..i {
                assert_eq!(inv[[i, j]], 0.0);
            }
        }
    }

    #[test]
    fn test_view_over_transposed_layout() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let t = a.t();
        let view = FaerArrayView::new(t);
        let m = view.as_ref();
        assert_eq!((m.nrows(), m.ncols()), (2, 3));
        assert_abs_diff_eq!(m[(1, 2)], 6.0, epsilon = 1e-12);
    }
}
