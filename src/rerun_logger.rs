use anyhow::Result;
use rerun::{
    archetypes::{Scalar, TextLog},
    RecordingStreamBuilder,
};

use crate::filters::orientation::Pole;
use crate::sensor_fusion::FusionEvent;
use crate::types::EulerAngles;

/// Rerun time-series logger for orientation sessions
/// Supports Rerun v0.15+ API with archetype-based logging
pub struct RerunLogger {
    rec: rerun::RecordingStream,
}

impl RerunLogger {
    /// Initialize Rerun recording to file
    /// Takes output path (e.g., "orientation_sessions/rerun_20251122_120000.rrd")
    pub fn new(output_path: &str) -> Result<Self> {
        let rec = RecordingStreamBuilder::new("orientation_tracker")
            .save(output_path)
            .map_err(|e| anyhow::anyhow!("Failed to create Rerun recording: {}", e))?;

        log::info!("rerun recording initialized to {}", output_path);

        Ok(RerunLogger { rec })
    }

    /// Set the current time for all subsequent logs
    pub fn set_time(&self, elapsed_secs: f64) {
        self.rec.set_time_seconds("stable_time", elapsed_secs);
    }

    pub fn log_scalar(&self, path: &str, value: f64) {
        let _ = self.rec.log(path, &Scalar::new(value));
    }

    /// Log yaw/pitch/roll in degrees
    pub fn log_angles(&self, prefix: &str, angles: &EulerAngles) {
        let (yaw, pitch, roll) = angles.to_degrees();
        self.log_scalar(&format!("{}/yaw_deg", prefix), yaw);
        self.log_scalar(&format!("{}/pitch_deg", prefix), pitch);
        self.log_scalar(&format!("{}/roll_deg", prefix), roll);
    }

    /// Log the 3×3 block of a row-major rank 4 rotation, one series per cell
    pub fn log_rotation_matrix(&self, matrix: &[f32; 16]) {
        for row in 0..3 {
            for col in 0..3 {
                let path = format!("orientation/matrix/m{}{}", row, col);
                self.log_scalar(&path, matrix[row * 4 + col] as f64);
            }
        }
    }

    pub fn log_gyro_raw(&self, x: f64, y: f64, z: f64) {
        self.log_scalar("sensors/gyro/raw_x", x);
        self.log_scalar("sensors/gyro/raw_y", y);
        self.log_scalar("sensors/gyro/raw_z", z);
    }

    /// Log whatever a fusion event carries
    pub fn log_event(&self, event: &FusionEvent) {
        match event {
            FusionEvent::RotationVectorApplied { angles } => {
                self.log_angles("orientation/rotation_vector", angles);
            }
            FusionEvent::SingularityDetected { pole, test } => {
                let name = match pole {
                    Pole::North => "north",
                    Pole::South => "south",
                };
                self.log_scalar("orientation/singularity_test", *test);
                let _ = self.rec.log(
                    "events/singularity",
                    &TextLog::new(format!("{} pole (test {:.4})", name, test)),
                );
            }
            FusionEvent::GravityMagneticFix {
                yaw_deg,
                pitch_deg,
                roll_deg,
                inclination_deg,
                ..
            } => {
                self.log_scalar("orientation/gravity_magnetic/yaw_deg", *yaw_deg);
                self.log_scalar("orientation/gravity_magnetic/pitch_deg", *pitch_deg);
                self.log_scalar("orientation/gravity_magnetic/roll_deg", *roll_deg);
                self.log_scalar("orientation/gravity_magnetic/inclination_deg", *inclination_deg);
            }
            FusionEvent::GyroApplied {
                dt,
                angular_velocity,
            } => {
                self.log_gyro_raw(angular_velocity.x, angular_velocity.y, angular_velocity.z);
                self.log_scalar("orientation/gyro/dt", *dt);
            }
            FusionEvent::GravityMagneticRejected { rejection } => {
                let _ = self.rec.log(
                    "events/fix_rejected",
                    &TextLog::new(format!("{:?}", rejection)),
                );
            }
            FusionEvent::SampleDropped { kind, reason } => {
                let _ = self.rec.log(
                    "events/dropped",
                    &TextLog::new(format!("{:?}: {}", kind, reason)),
                );
            }
            FusionEvent::AccuracyChanged { kind, from, to } => {
                let _ = self.rec.log(
                    "events/accuracy",
                    &TextLog::new(format!("{:?}: {:?} -> {:?}", kind, from, to)),
                );
            }
        }
    }
}
