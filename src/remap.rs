//! Device-frame to screen-frame remapping
//!
//! Each screen rotation picks which device axes become the screen's X and Y.
//! The screen Z axis is chosen so the result stays right-handed, which makes
//! every remap a signed column permutation of the 3×3 block.

use log::debug;

use crate::types::{Matrix, ScreenRotation, RANK_3, RANK_4};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
    MinusX,
    MinusY,
    MinusZ,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X | Axis::MinusX => 0,
            Axis::Y | Axis::MinusY => 1,
            Axis::Z | Axis::MinusZ => 2,
        }
    }

    fn negative(self) -> bool {
        matches!(self, Axis::MinusX | Axis::MinusY | Axis::MinusZ)
    }
}

/// Device axes that become the screen's X and Y for a screen rotation.
pub fn axes_for(rotation: ScreenRotation) -> (Axis, Axis) {
    match rotation {
        ScreenRotation::Rotation0 => (Axis::X, Axis::Y),
        ScreenRotation::Rotation90 => (Axis::Y, Axis::MinusX),
        ScreenRotation::Rotation180 => (Axis::MinusX, Axis::MinusY),
        ScreenRotation::Rotation270 => (Axis::MinusY, Axis::X),
    }
}

/// Rebuild `matrix` so device axis `x` maps to the new X and `y` to the new Y.
///
/// Returns `None` when both axes name the same device axis or the matrix is
/// not rank 3 or rank 4. Cells outside the 3×3 block are copied unchanged.
pub fn remap_axes(matrix: &Matrix, x: Axis, y: Axis) -> Option<Matrix> {
    let rank = match matrix.rank() {
        Ok(rank @ (RANK_3 | RANK_4)) => rank,
        _ => return None,
    };
    let xi = x.index();
    let yi = y.index();
    if xi == yi {
        return None;
    }
    let zi = 3 - xi - yi;

    // Z = X × Y keeps its sign only when (x, y, z) is a cyclic order.
    let cyclic = xi == (zi + 1) % 3 && yi == (zi + 2) % 3;
    let sx = x.negative();
    let sy = y.negative();
    let sz = sx ^ sy ^ !cyclic;

    let signed = |value: f64, negate: bool| if negate { -value } else { value };

    let mut out = matrix.clone();
    for row in 0..3 {
        let offset = row * rank;
        out[offset + xi] = signed(matrix[offset], sx);
        out[offset + yi] = signed(matrix[offset + 1], sy);
        out[offset + zi] = signed(matrix[offset + 2], sz);
    }
    Some(out)
}

/// Remap a device-frame rotation into the frame of the given screen rotation.
pub fn remap(matrix: &Matrix, rotation: ScreenRotation) -> Matrix {
    let (x, y) = axes_for(rotation);
    match remap_axes(matrix, x, y) {
        Some(out) => out,
        None => {
            debug!("remap skipped for {}-element matrix", matrix.len());
            matrix.clone()
        }
    }
}

/// Remap keyed by raw degrees; values other than 0/90/180/270 pass through.
pub fn remap_degrees(matrix: &Matrix, degrees: i32) -> Matrix {
    match ScreenRotation::from_degrees(degrees) {
        Some(rotation) => remap(matrix, rotation),
        None => matrix.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::{compose_xyz, is_orthonormal};
    use nalgebra::Matrix3;

    const ALL_ROTATIONS: [ScreenRotation; 4] = [
        ScreenRotation::Rotation0,
        ScreenRotation::Rotation90,
        ScreenRotation::Rotation180,
        ScreenRotation::Rotation270,
    ];

    fn determinant3(m: &Matrix) -> f64 {
        Matrix3::from_row_slice(&m.as_slice()[..9]).determinant()
    }

    #[test]
    fn test_remap_preserves_orthonormality() {
        let inputs = [
            compose_xyz(0.3, -0.7, 1.1).unwrap(),
            compose_xyz(-2.0, 0.2, 0.4).unwrap(),
            Matrix::identity(3),
        ];
        for input in &inputs {
            for rotation in ALL_ROTATIONS {
                let out = remap(input, rotation);
                assert!(is_orthonormal(&out, 1e-9), "rotation {:?}", rotation);
                assert!((determinant3(&out) - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_natural_rotation_is_identity_map() {
        let input = compose_xyz(0.5, 0.25, -0.75).unwrap();
        assert_eq!(remap(&input, ScreenRotation::Rotation0), input);
    }

    #[test]
    fn test_quarter_turn_columns() {
        let input = Matrix::from_vec((1..=9).map(|v| v as f64).collect());
        let out = remap(&input, ScreenRotation::Rotation90);
        // new X = device Y, new Y = -device X
        assert_eq!(out.as_slice(), &[-2.0, 1.0, 3.0, -5.0, 4.0, 6.0, -8.0, 7.0, 9.0]);

        let out = remap(&input, ScreenRotation::Rotation270);
        assert_eq!(out.as_slice(), &[2.0, -1.0, 3.0, 5.0, -4.0, 6.0, 8.0, -7.0, 9.0]);

        let out = remap(&input, ScreenRotation::Rotation180);
        assert_eq!(out.as_slice(), &[-1.0, -2.0, 3.0, -4.0, -5.0, 6.0, -7.0, -8.0, 9.0]);
    }

    #[test]
    fn test_rank4_border_untouched() {
        let mut input = Matrix::identity(4);
        input[3] = 7.0;
        input[12] = 8.0;
        let out = remap(&input, ScreenRotation::Rotation90);
        assert_eq!(out[3], 7.0);
        assert_eq!(out[12], 8.0);
        assert_eq!(out[15], 1.0);
        assert_eq!(out[1], 1.0);
        assert_eq!(out[4], -1.0);
    }

    #[test]
    fn test_unrecognized_degrees_pass_through() {
        let input = compose_xyz(0.1, 0.2, 0.3).unwrap();
        assert_eq!(remap_degrees(&input, 45), input);
        assert_eq!(remap_degrees(&input, 90), remap(&input, ScreenRotation::Rotation90));
    }

    #[test]
    fn test_remap_axes_rejects_repeated_axis() {
        assert!(remap_axes(&Matrix::identity(3), Axis::X, Axis::MinusX).is_none());
        assert!(remap_axes(&Matrix::identity(2), Axis::X, Axis::Y).is_none());
    }

    #[test]
    fn test_remap_axes_general_pair_is_right_handed() {
        let input = compose_xyz(0.4, 0.9, -0.2).unwrap();
        for (x, y) in [(Axis::X, Axis::Z), (Axis::Z, Axis::MinusY), (Axis::MinusZ, Axis::X)] {
            let out = remap_axes(&input, x, y).unwrap();
            assert!((determinant3(&out) - 1.0).abs() < 1e-9, "{:?} {:?}", x, y);
        }
    }
}
