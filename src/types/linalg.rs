//! Dense square-matrix algebra for the orientation engine
//!
//! Matrices are flat row-major buffers whose rank is derived from the element
//! count. Every binary operation validates shape before touching data, so a
//! bad operand aborts the call instead of producing a truncated result.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

// ===== Ranks used by the engine =====
pub const RANK_3: usize = 3;
pub const RANK_4: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    data: Vec<f64>,
}

impl Matrix {
    /// Wrap a row-major buffer. Shape is checked by the operations, not here.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn zeros(rank: usize) -> Self {
        Self {
            data: vec![0.0; rank * rank],
        }
    }

    pub fn identity(rank: usize) -> Self {
        identity(rank)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Rank of a non-empty square buffer.
    pub fn rank(&self) -> EngineResult<usize> {
        if self.data.is_empty() {
            return Err(EngineError::InvalidShape { len: 0 });
        }
        exact_rank(self.data.len()).ok_or(EngineError::InvalidShape {
            len: self.data.len(),
        })
    }

    /// Element at (row, col) for a matrix of the given rank.
    pub fn at(&self, rank: usize, row: usize, col: usize) -> f64 {
        self.data[col + row * rank]
    }

    /// Largest absolute element-wise difference, `None` when lengths differ.
    pub fn max_abs_diff(&self, other: &Matrix) -> Option<f64> {
        if self.data.len() != other.data.len() {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max),
        )
    }
}

impl Index<usize> for Matrix {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.data[index]
    }
}

impl IndexMut<usize> for Matrix {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.data[index]
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:.2}", value)?;
        }
        write!(f, "]")
    }
}

/// Floor of the square root of `len`, computed on integers.
fn floor_rank(len: usize) -> usize {
    let mut r = (len as f64).sqrt() as usize;
    while r * r > len {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= len {
        r += 1;
    }
    r
}

fn exact_rank(len: usize) -> Option<usize> {
    let r = floor_rank(len);
    (r * r == len).then_some(r)
}

/// Standard matrix product `C[i][j] = Σ_k A[i][k]·B[k][j]` for equal ranks.
pub fn multiply(a: &Matrix, b: &Matrix) -> EngineResult<Matrix> {
    let rank_a = a.rank()?;
    let rank_b = b.rank()?;
    if rank_a != rank_b {
        return Err(EngineError::DimensionMismatch {
            left: rank_a,
            right: rank_b,
        });
    }

    let rank = rank_a;
    let mut product = Matrix::zeros(rank);
    for i in 0..rank {
        for j in 0..rank {
            let mut sum = 0.0;
            for k in 0..rank {
                sum += a[k + i * rank] * b[j + k * rank];
            }
            product[j + i * rank] = sum;
        }
    }
    Ok(product)
}

pub fn transpose(a: &Matrix) -> EngineResult<Matrix> {
    let rank = a.rank()?;
    let mut result = Matrix::zeros(rank);
    for i in 0..rank {
        for j in 0..rank {
            result[j + i * rank] = a[i + j * rank];
        }
    }
    Ok(result)
}

pub fn identity(rank: usize) -> Matrix {
    let mut result = Matrix::zeros(rank);
    for i in 0..rank {
        result[i + i * rank] = 1.0;
    }
    result
}

/// Copy the overlapping top-left block of `from` into `to`.
///
/// Cells of `to` outside the block keep their values. Only one operand has to
/// be square; a non-square operand contributes the floor of its root as rank.
pub fn copy(from: &Matrix, to: &mut Matrix) -> EngineResult<()> {
    let from_square = exact_rank(from.len()).is_some();
    let to_square = exact_rank(to.len()).is_some();
    if !from_square && !to_square {
        return Err(EngineError::InvalidShape { len: from.len() });
    }

    let rank_from = floor_rank(from.len());
    let rank_to = floor_rank(to.len());
    let rank = rank_from.min(rank_to);

    for i in 0..rank {
        for j in 0..rank {
            to[j + i * rank_to] = from[j + i * rank_from];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_matrix(rank: usize, seed: f64) -> Matrix {
        Matrix::from_vec(
            (0..rank * rank)
                .map(|i| ((i as f64 + 1.0) * seed).sin() * 10.0)
                .collect(),
        )
    }

    #[test]
    fn test_identity_is_two_sided_unit() {
        for rank in 1..=4 {
            for seed in [0.37, 1.91, 4.2] {
                let a = sample_matrix(rank, seed);
                let id = identity(rank);
                assert_eq!(multiply(&id, &a).unwrap(), a);
                assert_eq!(multiply(&a, &id).unwrap(), a);
            }
        }
    }

    #[test]
    fn test_multiply_known_product() {
        let a = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let b = Matrix::from_vec(vec![5.0, 6.0, 7.0, 8.0]);
        let c = multiply(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_multiply_rank_mismatch() {
        let a = identity(3);
        let b = identity(4);
        assert_eq!(
            multiply(&a, &b),
            Err(EngineError::DimensionMismatch { left: 3, right: 4 })
        );
    }

    #[test]
    fn test_multiply_rejects_non_square_and_empty() {
        let bad = Matrix::from_vec(vec![1.0; 10]);
        assert_eq!(
            multiply(&bad, &identity(3)),
            Err(EngineError::InvalidShape { len: 10 })
        );
        let empty = Matrix::from_vec(Vec::new());
        assert_eq!(
            multiply(&empty, &empty),
            Err(EngineError::InvalidShape { len: 0 })
        );
    }

    #[test]
    fn test_transpose_involution() {
        for rank in 1..=5 {
            let a = sample_matrix(rank, 0.73);
            let t = transpose(&a).unwrap();
            assert_eq!(transpose(&t).unwrap(), a);
        }
    }

    #[test]
    fn test_transpose_moves_elements() {
        let a = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let t = transpose(&a).unwrap();
        assert_eq!(t.as_slice(), &[1.0, 4.0, 7.0, 2.0, 5.0, 8.0, 3.0, 6.0, 9.0]);
        assert!(transpose(&Matrix::from_vec(vec![1.0, 2.0])).is_err());
    }

    #[test]
    fn test_identity_entries() {
        for rank in 0..=6 {
            let id = identity(rank);
            for i in 0..rank {
                for j in 0..rank {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_eq!(id.at(rank, i, j), expected);
                }
            }
        }
    }

    #[test]
    fn test_copy_small_into_large_keeps_border() {
        let from = sample_matrix(3, 1.3);
        let mut to = identity(4);
        copy(&from, &mut to).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(to.at(4, i, j), from.at(3, i, j));
            }
        }
        assert_eq!(to[3], 0.0);
        assert_eq!(to[15], 1.0);
    }

    #[test]
    fn test_copy_large_into_small() {
        let from = sample_matrix(4, 0.9);
        let mut to = Matrix::zeros(3);
        copy(&from, &mut to).unwrap();
        assert_eq!(to[4], from[5]);
        assert_eq!(to[8], from[10]);
    }

    #[test]
    fn test_copy_requires_one_square_operand() {
        let from = Matrix::from_vec(vec![1.0; 10]);
        let mut to = Matrix::from_vec(vec![0.0; 12]);
        assert!(copy(&from, &mut to).is_err());

        // A square destination is enough.
        let mut square = Matrix::zeros(3);
        copy(&from, &mut square).unwrap();
        assert_eq!(square.as_slice(), &[1.0; 9]);
    }

    #[test]
    fn test_display_two_decimals() {
        let m = Matrix::from_vec(vec![1.0, -0.5, 0.126, 2.0]);
        assert_eq!(m.to_string(), "[1.00 -0.50 0.13 2.00]");
    }

    #[test]
    fn test_max_abs_diff() {
        let a = identity(2);
        let mut b = identity(2);
        b[1] = 0.25;
        assert_abs_diff_eq!(a.max_abs_diff(&b).unwrap(), 0.25);
        assert!(a.max_abs_diff(&identity(3)).is_none());
    }
}
