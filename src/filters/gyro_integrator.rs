use nalgebra::Vector3;

use crate::rotation::rotation_matrix_from_quaternion;
use crate::types::{Matrix, Quaternion, RANK_4};

/// Angular speeds at or below this are integrated without normalizing the axis.
pub const DEFAULT_OMEGA_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct GyroDelta {
    /// Rank 4 incremental rotation.
    pub rotation: Matrix,
    /// Seconds integrated; zero when the delta is the identity placeholder.
    pub dt: f64,
}

/// Turns successive angular-velocity readings into incremental rotations.
#[derive(Clone, Debug)]
pub struct GyroIntegrator {
    last_timestamp: Option<f64>,
    epsilon: f64,
}

impl GyroIntegrator {
    pub fn new(epsilon: f64) -> Self {
        Self {
            last_timestamp: None,
            epsilon,
        }
    }

    /// Delta rotation for the interval since the previous reading.
    ///
    /// The first reading only primes the clock and yields the identity. A
    /// timestamp that does not advance also yields the identity and leaves the
    /// stored clock where it was.
    pub fn integrate(&mut self, angular_velocity: &Vector3<f64>, timestamp: f64) -> GyroDelta {
        let previous = match self.last_timestamp {
            None => {
                self.last_timestamp = Some(timestamp);
                return GyroDelta::identity();
            }
            Some(previous) => previous,
        };
        if timestamp <= previous {
            return GyroDelta::identity();
        }
        self.last_timestamp = Some(timestamp);

        let dt = timestamp - previous;
        let omega = angular_velocity.norm();
        let axis = if omega > self.epsilon {
            angular_velocity / omega
        } else {
            *angular_velocity
        };

        let half_theta = omega * dt / 2.0;
        let (sin_half, cos_half) = half_theta.sin_cos();
        let dq = Quaternion::new(
            sin_half * axis.x,
            sin_half * axis.y,
            sin_half * axis.z,
            cos_half,
        );

        GyroDelta {
            rotation: rotation_matrix_from_quaternion(&dq, RANK_4),
            dt,
        }
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }
}

impl Default for GyroIntegrator {
    fn default() -> Self {
        Self::new(DEFAULT_OMEGA_EPSILON)
    }
}

impl GyroDelta {
    fn identity() -> Self {
        Self {
            rotation: Matrix::identity(RANK_4),
            dt: 0.0,
        }
    }
}
