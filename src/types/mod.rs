pub mod linalg;

pub use linalg::*;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    RotationVector,
    Gravity,
    MagneticField,
    Gyroscope,
}

impl SampleKind {
    pub const ALL: [SampleKind; 4] = [
        SampleKind::RotationVector,
        SampleKind::Gravity,
        SampleKind::MagneticField,
        SampleKind::Gyroscope,
    ];
}

/// Reported reliability of a sensor reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorAccuracy {
    Unreliable,
    Low,
    Medium,
    #[default]
    High,
}

/// Sample as delivered by a sensor source, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub kind: SampleKind,
    pub values: Vec<f64>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub accuracy: SensorAccuracy,
}

impl RawSample {
    pub fn new(kind: SampleKind, values: &[f64], timestamp: Option<f64>) -> Self {
        Self {
            kind,
            values: values.to_vec(),
            timestamp,
            accuracy: SensorAccuracy::High,
        }
    }

    pub fn with_accuracy(mut self, accuracy: SensorAccuracy) -> Self {
        self.accuracy = accuracy;
        self
    }
}

/// Rotation quaternion in rotation-vector order `(x, y, z, w)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Rotation of `angle` radians about a unit `axis`.
    pub fn from_axis_angle(axis: Vector3<f64>, angle: f64) -> Self {
        let half = angle / 2.0;
        let s = half.sin();
        Self::new(axis.x * s, axis.y * s, axis.z * s, half.cos())
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Scalar-first layout `[w, x, y, z]` used by the gimbal-lock test.
    pub fn to_scalar_first(&self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }
}

/// Validated sensor sample.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorSample {
    RotationVector(Quaternion),
    Gravity(Vector3<f64>),
    MagneticField(Vector3<f64>),
    Gyroscope {
        angular_velocity: Vector3<f64>,
        timestamp: f64,
    },
}

impl SensorSample {
    pub fn kind(&self) -> SampleKind {
        match self {
            SensorSample::RotationVector(_) => SampleKind::RotationVector,
            SensorSample::Gravity(_) => SampleKind::Gravity,
            SensorSample::MagneticField(_) => SampleKind::MagneticField,
            SensorSample::Gyroscope { .. } => SampleKind::Gyroscope,
        }
    }

    /// Validate a raw reading. Wrong lengths and non-finite values are rejected.
    pub fn from_raw(raw: &RawSample) -> EngineResult<Self> {
        let kind = raw.kind;
        let values = &raw.values;
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(EngineError::malformed(
                kind,
                format!("non-finite component {}", bad),
            ));
        }

        match kind {
            SampleKind::RotationVector => {
                // 3 = vector part only, 4 = with scalar, 5 = trailing heading accuracy
                if !(3..=5).contains(&values.len()) {
                    return Err(EngineError::malformed(
                        kind,
                        format!("expected 3 to 5 components, got {}", values.len()),
                    ));
                }
                let (x, y, z) = (values[0], values[1], values[2]);
                let w = if values.len() >= 4 {
                    values[3]
                } else {
                    let w2 = 1.0 - x * x - y * y - z * z;
                    if w2 > 0.0 {
                        w2.sqrt()
                    } else {
                        0.0
                    }
                };
                Ok(SensorSample::RotationVector(Quaternion::new(x, y, z, w)))
            }
            SampleKind::Gravity | SampleKind::MagneticField => {
                let v = vector3(kind, values)?;
                Ok(if kind == SampleKind::Gravity {
                    SensorSample::Gravity(v)
                } else {
                    SensorSample::MagneticField(v)
                })
            }
            SampleKind::Gyroscope => {
                let angular_velocity = vector3(kind, values)?;
                let timestamp = match raw.timestamp {
                    Some(ts) if ts.is_finite() => ts,
                    Some(_) => return Err(EngineError::malformed(kind, "non-finite timestamp")),
                    None => return Err(EngineError::malformed(kind, "missing timestamp")),
                };
                Ok(SensorSample::Gyroscope {
                    angular_velocity,
                    timestamp,
                })
            }
        }
    }
}

fn vector3(kind: SampleKind, values: &[f64]) -> EngineResult<Vector3<f64>> {
    if values.len() != 3 {
        return Err(EngineError::malformed(
            kind,
            format!("expected 3 components, got {}", values.len()),
        ));
    }
    Ok(Vector3::new(values[0], values[1], values[2]))
}

/// Yaw / pitch / roll in radians. Always derived, never the source of truth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl EulerAngles {
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Azimuth, pitch and roll of a rank 3 or rank 4 rotation matrix.
    pub fn from_matrix(matrix: &Matrix) -> EngineResult<Self> {
        crate::rotation::orientation_angles(matrix)
    }

    pub fn from_quaternion(q: &Quaternion) -> EngineResult<Self> {
        let r = crate::rotation::rotation_matrix_from_quaternion(q, RANK_3);
        Self::from_matrix(&r)
    }

    pub fn to_degrees(&self) -> (f64, f64, f64) {
        (
            self.yaw.to_degrees(),
            self.pitch.to_degrees(),
            self.roll.to_degrees(),
        )
    }

    /// Yaw folded into `[0, 360)` degrees.
    pub fn yaw_normalized_deg(&self) -> f64 {
        let deg = (self.yaw.to_degrees() + 360.0) % 360.0;
        if deg >= 360.0 {
            deg - 360.0
        } else {
            deg
        }
    }
}

/// Display orientation relative to the device's natural orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ScreenRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl ScreenRotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(ScreenRotation::Rotation0),
            90 => Some(ScreenRotation::Rotation90),
            180 => Some(ScreenRotation::Rotation180),
            270 => Some(ScreenRotation::Rotation270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            ScreenRotation::Rotation0 => 0,
            ScreenRotation::Rotation90 => 90,
            ScreenRotation::Rotation180 => 180,
            ScreenRotation::Rotation270 => 270,
        }
    }

    pub fn is_natural(&self) -> bool {
        *self == ScreenRotation::Rotation0
    }
}

impl TryFrom<i32> for ScreenRotation {
    type Error = String;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        ScreenRotation::from_degrees(degrees)
            .ok_or_else(|| format!("unsupported screen rotation {} degrees", degrees))
    }
}

impl From<ScreenRotation> for i32 {
    fn from(rotation: ScreenRotation) -> i32 {
        rotation.degrees()
    }
}
