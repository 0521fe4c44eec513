//! Rotation primitives shared by the estimator
//!
//! Conventions follow the usual handheld sensor frame: X to the right of the
//! screen, Y up the screen, Z out of the screen. World frame is X east,
//! Y magnetic north, Z up. All matrices are row-major and rank 3 or rank 4;
//! the rank 4 form carries the same 3×3 block with a unit bottom-right cell.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{multiply, EulerAngles, Matrix, Quaternion, RANK_3, RANK_4};

/// Rejection limits for the gravity + magnetic construction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixThresholds {
    /// Gravity used to derive the free-fall limit (m/s²).
    pub standard_gravity: f64,
    /// Gravity below `fraction · g²` (squared norm) counts as free fall.
    pub free_fall_fraction: f64,
    /// Minimum `|gravity × field|`; typical readings are well above 100.
    pub min_cross_norm: f64,
}

impl Default for FixThresholds {
    fn default() -> Self {
        Self {
            standard_gravity: 9.81,
            free_fall_fraction: 0.01,
            min_cross_norm: 0.1,
        }
    }
}

/// Why a gravity + magnetic fix could not be built.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FixRejection {
    FreeFall { gravity_sq: f64 },
    WeakField { cross_norm: f64 },
}

/// Rotation and inclination matrices from one gravity + magnetic fix.
#[derive(Clone, Debug, PartialEq)]
pub struct GravityMagneticFix {
    pub rotation: Matrix,
    pub inclination: Matrix,
}

fn check_rank(matrix: &Matrix) -> EngineResult<usize> {
    match matrix.rank()? {
        rank @ (RANK_3 | RANK_4) => Ok(rank),
        _ => Err(EngineError::InvalidShape { len: matrix.len() }),
    }
}

/// Write a 3×3 block (given row-major) into a fresh rank 3 or rank 4 matrix.
fn embed3(block: [f64; 9], rank: usize) -> Matrix {
    let mut out = Matrix::identity(rank);
    for row in 0..3 {
        for col in 0..3 {
            out[col + row * rank] = block[col + row * 3];
        }
    }
    out
}

/// Rotation matrix for a (possibly non-unit) quaternion, rank 3 or 4.
pub fn rotation_matrix_from_quaternion(q: &Quaternion, rank: usize) -> Matrix {
    let (q0, q1, q2, q3) = (q.w, q.x, q.y, q.z);

    let sq_q1 = 2.0 * q1 * q1;
    let sq_q2 = 2.0 * q2 * q2;
    let sq_q3 = 2.0 * q3 * q3;
    let q1_q2 = 2.0 * q1 * q2;
    let q3_q0 = 2.0 * q3 * q0;
    let q1_q3 = 2.0 * q1 * q3;
    let q2_q0 = 2.0 * q2 * q0;
    let q2_q3 = 2.0 * q2 * q3;
    let q1_q0 = 2.0 * q1 * q0;

    embed3(
        [
            1.0 - sq_q2 - sq_q3,
            q1_q2 - q3_q0,
            q1_q3 + q2_q0,
            q1_q2 + q3_q0,
            1.0 - sq_q1 - sq_q3,
            q2_q3 - q1_q0,
            q1_q3 - q2_q0,
            q2_q3 + q1_q0,
            1.0 - sq_q1 - sq_q2,
        ],
        rank,
    )
}

/// Build the device rotation from gravity and geomagnetic field vectors.
///
/// East is `field × gravity`, north is `gravity × east`; the rows of the
/// rotation are (east, north, up). The inclination matrix rotates about X by
/// the dip angle of the field below the horizontal plane.
pub fn rotation_from_gravity_magnetic(
    gravity: &Vector3<f64>,
    field: &Vector3<f64>,
    rank: usize,
    limits: &FixThresholds,
) -> Result<GravityMagneticFix, FixRejection> {
    let gravity_sq = gravity.norm_squared();
    let g = limits.standard_gravity;
    if gravity_sq < limits.free_fall_fraction * g * g {
        return Err(FixRejection::FreeFall { gravity_sq });
    }

    let h = field.cross(gravity);
    let cross_norm = h.norm();
    if cross_norm < limits.min_cross_norm {
        return Err(FixRejection::WeakField { cross_norm });
    }

    let h = h / cross_norm;
    let a = gravity / gravity_sq.sqrt();
    let m = a.cross(&h);

    let rotation = embed3([h.x, h.y, h.z, m.x, m.y, m.z, a.x, a.y, a.z], rank);

    let inv_e = 1.0 / field.norm();
    let c = field.dot(&m) * inv_e;
    let s = field.dot(&a) * inv_e;
    let inclination = embed3([1.0, 0.0, 0.0, 0.0, c, s, 0.0, -s, c], rank);

    Ok(GravityMagneticFix {
        rotation,
        inclination,
    })
}

/// Geomagnetic inclination angle (radians) from an inclination matrix.
pub fn inclination(matrix: &Matrix) -> EngineResult<f64> {
    Ok(match check_rank(matrix)? {
        RANK_3 => matrix[5].atan2(matrix[4]),
        _ => matrix[6].atan2(matrix[5]),
    })
}

/// Azimuth (yaw), pitch and roll of a rotation matrix.
pub fn orientation_angles(matrix: &Matrix) -> EngineResult<EulerAngles> {
    let (r1, r_up, r_pitch, r_roll_y, r_roll_x) = match check_rank(matrix)? {
        RANK_3 => (matrix[1], matrix[4], matrix[7], matrix[6], matrix[8]),
        _ => (matrix[1], matrix[5], matrix[9], matrix[8], matrix[10]),
    };
    Ok(EulerAngles {
        yaw: r1.atan2(r_up),
        pitch: (-r_pitch).clamp(-1.0, 1.0).asin(),
        roll: (-r_roll_y).atan2(r_roll_x),
    })
}

// ─── Elementary rotations ────────────────────────────────────────────────────

pub fn rot_x(angle: f64) -> Matrix {
    let (s, c) = angle.sin_cos();
    Matrix::from_vec(vec![1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c])
}

pub fn rot_y(angle: f64) -> Matrix {
    let (s, c) = angle.sin_cos();
    Matrix::from_vec(vec![c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c])
}

pub fn rot_z(angle: f64) -> Matrix {
    let (s, c) = angle.sin_cos();
    Matrix::from_vec(vec![c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0])
}

/// `Rx(a) · Ry(b) · Rz(c)`
pub fn compose_xyz(a: f64, b: f64, c: f64) -> EngineResult<Matrix> {
    let rxy = multiply(&rot_x(a), &rot_y(b))?;
    multiply(&rxy, &rot_z(c))
}

/// Inverse of [`compose_xyz`] for `|b| < π/2`.
pub fn decompose_xyz(matrix: &Matrix) -> EngineResult<(f64, f64, f64)> {
    if matrix.rank()? != RANK_3 {
        return Err(EngineError::InvalidShape { len: matrix.len() });
    }
    let a = -matrix[5].atan2(matrix[8]);
    let b = -(-matrix[2]).clamp(-1.0, 1.0).asin();
    let c = -matrix[1].atan2(matrix[0]);
    Ok((a, b, c))
}

/// True when the 3×3 block has unit, mutually orthogonal columns.
pub fn is_orthonormal(matrix: &Matrix, tolerance: f64) -> bool {
    let rank = match check_rank(matrix) {
        Ok(rank) => rank,
        Err(_) => return false,
    };
    let column = |j: usize| {
        Vector3::new(
            matrix.at(rank, 0, j),
            matrix.at(rank, 1, j),
            matrix.at(rank, 2, j),
        )
    };
    let cols = [column(0), column(1), column(2)];
    for i in 0..3 {
        if (cols[i].norm() - 1.0).abs() > tolerance {
            return false;
        }
        for j in (i + 1)..3 {
            if cols[i].dot(&cols[j]).abs() > tolerance {
                return false;
            }
        }
    }
    true
}
