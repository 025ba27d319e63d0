//! Dense row-major matrices for spectra and features
//!
//! Rows are frequency bins, mel channels or cepstral coefficients; columns
//! are frames. All shape-changing operations check their operands and return
//! [`FeatureError::ShapeMismatch`] instead of truncating or padding.
//!
//! ## Example
//!
//! ```rust
//! use upfe_core::matrix::Matrix;
//!
//! let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
//! let gram = a.matmul(&a.transpose()).unwrap();
//! assert_eq!(gram.shape(), (2, 2));
//! assert_eq!(gram.get(1, 0), 11.0);
//! ```

use crate::types::{Complex, FeatureError, FeatureResult};

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T = f64> {
    /// Matrix stored in row-major order.
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

/// Complex spectral matrix, `[bins, frames]`.
pub type ComplexMatrix = Matrix<Complex>;

impl<T: Copy> Matrix<T> {
    /// Create from a flat row-major vector.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> FeatureResult<Self> {
        if data.len() != rows * cols {
            return Err(FeatureError::shape(
                "Matrix::from_vec",
                (rows, cols),
                (data.len(), 1),
            ));
        }
        Ok(Self { data, rows, cols })
    }

    /// Create from a slice of rows. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<T>]) -> FeatureResult<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            if row.len() != n_cols {
                return Err(FeatureError::shape(
                    "Matrix::from_rows",
                    (n_rows, n_cols),
                    (n_rows, row.len()),
                ));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            rows: n_rows,
            cols: n_cols,
        })
    }

    /// Create a matrix with every entry set to `value`.
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            data: vec![value; rows * cols],
            rows,
            cols,
        }
    }

    /// Create a matrix from a generator `f(row, col)`.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { data, rows, cols }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Element at `(row, col)`. Panics when out of bounds, like slice indexing.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Copy of column `col`.
    pub fn column(&self, col: usize) -> Vec<T> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Apply `f` to every entry.
    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Matrix<U> {
        Matrix {
            data: self.data.iter().map(|&v| f(v)).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Combine two equally shaped matrices entry by entry.
    pub fn zip_map<U: Copy, V: Copy>(
        &self,
        other: &Matrix<U>,
        f: impl Fn(T, U) -> V,
    ) -> FeatureResult<Matrix<V>> {
        if self.shape() != other.shape() {
            return Err(FeatureError::shape(
                "Matrix::zip_map",
                self.shape(),
                other.shape(),
            ));
        }
        Ok(Matrix {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            rows: self.rows,
            cols: self.cols,
        })
    }

    pub fn transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |r, c| self.get(c, r))
    }

    /// Repeat the columns `times` times side by side: `[A, A, ..., A]`.
    pub fn tile_columns(&self, times: usize) -> Self {
        let cols = self.cols * times;
        Self::from_fn(self.rows, cols, |r, c| self.get(r, c % self.cols))
    }

    /// Columns `start..start + len`.
    pub fn column_block(&self, start: usize, len: usize) -> FeatureResult<Self> {
        if start + len > self.cols {
            return Err(FeatureError::shape(
                "Matrix::column_block",
                (self.rows, start + len),
                self.shape(),
            ));
        }
        Ok(Self::from_fn(self.rows, len, |r, c| self.get(r, start + c)))
    }

    /// Stack matrices with equal column counts on top of each other.
    pub fn vstack(blocks: &[&Matrix<T>]) -> FeatureResult<Self> {
        let cols = blocks.first().map_or(0, |b| b.cols);
        let mut data = Vec::new();
        let mut rows = 0;
        for block in blocks {
            if block.cols != cols {
                return Err(FeatureError::shape(
                    "Matrix::vstack",
                    (block.rows, cols),
                    block.shape(),
                ));
            }
            data.extend_from_slice(&block.data);
            rows += block.rows;
        }
        Ok(Self { data, rows, cols })
    }
}

impl Matrix<f64> {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// Matrix product `self · rhs`.
    pub fn matmul(&self, rhs: &Matrix) -> FeatureResult<Matrix> {
        if self.cols != rhs.rows {
            return Err(FeatureError::shape(
                "Matrix::matmul",
                (self.cols, rhs.cols),
                rhs.shape(),
            ));
        }
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            let out_row = &mut out.data[i * rhs.cols..(i + 1) * rhs.cols];
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                if a == 0.0 {
                    continue;
                }
                let rhs_row = &rhs.data[k * rhs.cols..(k + 1) * rhs.cols];
                for (o, &b) in out_row.iter_mut().zip(rhs_row.iter()) {
                    *o += a * b;
                }
            }
        }
        Ok(out)
    }

    /// Matrix-vector product `self · v`.
    pub fn mul_vec(&self, v: &[f64]) -> FeatureResult<Vec<f64>> {
        if self.cols != v.len() {
            return Err(FeatureError::shape(
                "Matrix::mul_vec",
                (self.cols, 1),
                (v.len(), 1),
            ));
        }
        Ok((0..self.rows)
            .map(|i| {
                self.row(i)
                    .iter()
                    .zip(v.iter())
                    .map(|(&a, &b)| a * b)
                    .sum::<f64>()
            })
            .collect())
    }

    /// Entry-wise square, `A ∘ A`.
    pub fn squared(&self) -> Matrix {
        self.map(|v| v * v)
    }

    /// Mean of each row across columns.
    pub fn row_means(&self) -> Vec<f64> {
        if self.cols == 0 {
            return vec![0.0; self.rows];
        }
        (0..self.rows)
            .map(|r| self.row(r).iter().sum::<f64>() / self.cols as f64)
            .collect()
    }

    /// Main diagonal of a square (or rectangular) matrix.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows.min(self.cols)).map(|i| self.get(i, i)).collect()
    }

    /// Largest absolute entry-wise difference. Shapes must agree.
    pub fn max_abs_diff(&self, other: &Matrix) -> FeatureResult<f64> {
        let diff = self.zip_map(other, |a, b| (a - b).abs())?;
        Ok(diff.iter().copied().fold(0.0, f64::max))
    }
}

impl Matrix<Complex> {
    /// `|X|²` entry-wise.
    pub fn norm_sqr(&self) -> Matrix {
        self.map(|c| c.norm_sqr())
    }

    /// `|X|` entry-wise.
    pub fn norm(&self) -> Matrix {
        self.map(|c| c.norm())
    }
}
