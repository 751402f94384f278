//! N-dimensional numeric matrices and look-up tables.
//!
//! Storage is a single flat vector with dimension 0 varying fastest, so
//! `[1, 2 ; 10, 20 ; 100, 200]` (three rows, two columns) is stored as
//! `[1, 10, 100, 2, 20, 200]` with dimensions `[3, 2]`.

use smallvec::SmallVec;

use super::Expression;
use crate::utils::MatrixError;

/// A multi-dimensional index (one coordinate per dimension).
pub type CellIndex = SmallVec<usize, 4>;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    dims: SmallVec<usize, 4>,
}

impl Matrix {
    /// Build a matrix from flat data (dimension 0 fastest) and dimension widths.
    pub fn new(data: Vec<f64>, dims: impl IntoIterator<Item = usize>) -> Result<Self, MatrixError> {
        let dims: SmallVec<usize, 4> = dims.into_iter().collect();
        let expected = dims.iter().product::<usize>();
        if dims.is_empty() || expected != data.len() {
            return Err(MatrixError::ShapeMismatch {
                dims: dims.iter().copied().collect(),
                expected,
                len: data.len(),
            });
        }
        Ok(Self { data, dims })
    }

    /// One-dimensional matrix.
    pub fn vector(data: Vec<f64>) -> Self {
        let mut dims = SmallVec::new();
        dims.push(data.len());
        Self { data, dims }
    }

    /// Build from the rows of a `[a, b ; c, d]` literal. A single row yields a 1-D matrix.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, MatrixError> {
        match rows.len() {
            0 => Ok(Self::vector(Vec::new())),
            1 => Ok(Self::vector(rows.into_iter().next().unwrap_or_default())),
            num_rows => {
                let num_cols = rows[0].len();
                if let Some(bad) = rows.iter().find(|r| r.len() != num_cols) {
                    return Err(MatrixError::RaggedRows {
                        first: num_cols,
                        other: bad.len(),
                    });
                }
                let mut data = Vec::with_capacity(num_rows * num_cols);
                for col in 0..num_cols {
                    for row in &rows {
                        data.push(row[col]);
                    }
                }
                Matrix::new(data, [num_rows, num_cols])
            }
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn dim_width(&self, dim: usize) -> usize {
        self.dims.get(dim).copied().unwrap_or(0)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Position of `index` in the flat backing array.
    pub fn flat_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut flat = 0;
        let mut stride = 1;
        for (&i, &width) in index.iter().zip(self.dims.iter()) {
            if i >= width {
                return None;
            }
            flat += i * stride;
            stride *= width;
        }
        Some(flat)
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        self.flat_index(index).map(|flat| self.data[flat])
    }

    fn unflatten(&self, mut flat: usize) -> CellIndex {
        let mut index = CellIndex::new();
        for &width in self.dims.iter() {
            index.push(flat % width);
            flat /= width;
        }
        index
    }

    /// Every index tuple in storage order.
    pub fn indices(&self) -> impl Iterator<Item = CellIndex> + '_ {
        (0..self.data.len()).map(|flat| self.unflatten(flat))
    }

    /// `(index, value)` pairs in storage order.
    pub fn enumerate(&self) -> impl Iterator<Item = (CellIndex, f64)> + '_ {
        self.indices().zip(self.data.iter().copied())
    }

    /// Rows of a 2-D matrix, or the single row of a 1-D one.
    pub fn rows(&self) -> Option<Vec<Vec<f64>>> {
        match self.dims.len() {
            1 => Some(vec![self.data.clone()]),
            2 => {
                let (num_rows, num_cols) = (self.dims[0], self.dims[1]);
                Some(
                    (0..num_rows)
                        .map(|r| (0..num_cols).map(|c| self.data[r + c * num_rows]).collect())
                        .collect(),
                )
            }
            _ => None,
        }
    }
}

/// `lut([inputs], table, breakpoints...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lut {
    pub inputs: Vec<Expression>,
    pub table: Matrix,
    pub breakpoints: Vec<Matrix>,
}

impl Lut {
    pub fn new(
        inputs: Vec<Expression>,
        table: Matrix,
        breakpoints: Vec<Matrix>,
    ) -> Result<Self, MatrixError> {
        let lut = Self {
            inputs,
            table,
            breakpoints,
        };
        lut.validate()?;
        Ok(lut)
    }

    /// Check that the inputs, table and breakpoint arrays have consistent shapes.
    pub fn validate(&self) -> Result<(), MatrixError> {
        let invalid = |message: String| Err(MatrixError::InvalidLut { message });

        if self.inputs.is_empty() {
            return invalid("at least one input is required".into());
        }
        if self.inputs.len() != self.table.num_dims() {
            return invalid(format!(
                "{} inputs given for a {}-dimensional table",
                self.inputs.len(),
                self.table.num_dims()
            ));
        }
        if self.breakpoints.len() != self.inputs.len() {
            return invalid(format!(
                "{} breakpoint arrays given for {} inputs",
                self.breakpoints.len(),
                self.inputs.len()
            ));
        }
        for (d, bp) in self.breakpoints.iter().enumerate() {
            if bp.num_dims() != 1 {
                return invalid(format!("breakpoint array {d} is not one-dimensional"));
            }
            if bp.len() != self.table.dim_width(d) {
                return invalid(format!(
                    "breakpoint array {d} has {} entries but table dimension {d} has width {}",
                    bp.len(),
                    self.table.dim_width(d)
                ));
            }
            if bp.len() < 2 {
                return invalid(format!("breakpoint array {d} needs at least two entries"));
            }
            if bp.data().windows(2).any(|w| w[1] < w[0]) {
                return invalid(format!("breakpoint array {d} is not sorted"));
            }
        }
        Ok(())
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn breakpoint(&self, dim: usize, index: usize) -> f64 {
        self.breakpoints[dim].data()[index]
    }

    /// Multilinear interpolation at `point`, clamped to the breakpoint range.
    pub fn interpolate(&self, point: &[f64]) -> f64 {
        let dims = self.num_inputs();
        let mut lower = CellIndex::new();
        let mut fraction: SmallVec<f64, 4> = SmallVec::new();
        for d in 0..dims {
            let bp = self.breakpoints[d].data();
            let last = bp.len() - 1;
            let v = point[d].clamp(bp[0], bp[last]);
            let i = bp[..last].iter().rposition(|&b| b <= v).unwrap_or(0);
            let width = bp[i + 1] - bp[i];
            lower.push(i);
            fraction.push(if width > 0.0 { (v - bp[i]) / width } else { 0.0 });
        }

        let mut total = 0.0;
        for corner in 0..(1usize << dims) {
            let mut index = lower.clone();
            let mut weight = 1.0;
            for d in 0..dims {
                if (corner >> d) & 1 == 1 {
                    index[d] += 1;
                    weight *= fraction[d];
                } else {
                    weight *= 1.0 - fraction[d];
                }
            }
            if weight != 0.0 {
                total += weight * self.table.get(&index).unwrap_or(0.0);
            }
        }
        total
    }

    /// Index tuples of every table cell, i.e. every table index except those on the last
    /// breakpoint of some dimension.
    pub fn cells(&self) -> impl Iterator<Item = CellIndex> + '_ {
        self.table.indices().filter(move |index| {
            !index
                .iter()
                .enumerate()
                .any(|(d, &i)| i + 1 == self.table.dim_width(d))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_stored_dimension_zero_first() {
        let m = Matrix::from_rows(vec![vec![1.0, 2.0], vec![10.0, 20.0], vec![100.0, 200.0]])
            .unwrap();
        let reshaped = Matrix::new(vec![1.0, 10.0, 100.0, 2.0, 20.0, 200.0], [3, 2]).unwrap();
        assert_eq!(m, reshaped);
        assert_eq!(m.get(&[1, 1]), Some(20.0));
        assert_eq!(m.get(&[2, 0]), Some(100.0));
        assert_eq!(m.get(&[3, 0]), None);
    }

    #[test]
    fn single_row_is_one_dimensional() {
        let m = Matrix::from_rows(vec![vec![1.0, 2.0, 1.0, 2.0]]).unwrap();
        assert_eq!(m.dims(), &[4]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(err.is_ragged_rows());
    }

    #[test]
    fn cells_skip_last_breakpoint() {
        let table = Matrix::new((0..9).map(f64::from).collect(), [3, 3]).unwrap();
        let bp = Matrix::vector(vec![0.0, 1.0, 2.0]);
        let lut = Lut::new(
            vec![Expression::var("a"), Expression::var("b")],
            table,
            vec![bp.clone(), bp],
        )
        .unwrap();
        let cells: Vec<Vec<usize>> = lut.cells().map(|c| c.iter().copied().collect()).collect();
        assert_eq!(cells, vec![vec![0, 0], vec![1, 0], vec![0, 1], vec![1, 1]]);
    }

    #[test]
    fn interpolation_is_piecewise_linear() {
        let lut = Lut::new(
            vec![Expression::var("t")],
            Matrix::vector(vec![1.0, 2.0, 1.0, 2.0]),
            vec![Matrix::vector(vec![0.0, 10.0, 30.0, 40.0])],
        )
        .unwrap();
        assert!((lut.interpolate(&[5.0]) - 1.5).abs() < 1e-12);
        assert!((lut.interpolate(&[20.0]) - 1.5).abs() < 1e-12);
        assert!((lut.interpolate(&[40.0]) - 2.0).abs() < 1e-12);
        assert!((lut.interpolate(&[-3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lut_breakpoint_width_must_match() {
        let err = Lut::new(
            vec![Expression::var("t")],
            Matrix::vector(vec![1.0, 2.0, 1.0, 2.0]),
            vec![Matrix::vector(vec![0.0, 10.0, 30.0])],
        )
        .unwrap_err();
        assert!(err.is_invalid_lut());
    }
}
