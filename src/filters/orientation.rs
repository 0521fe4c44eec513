//! Orientation estimator
//!
//! Three sources write the same rotation:
//!   - rotation vector: absolute fix, decomposed to pitch/roll and rebuilt
//!   - gyroscope: relative delta composed onto the current rotation
//!   - gravity + magnetic field: absolute fix, checked after every sample
//!
//! Which of the absolute fixes may overwrite the published rotation is decided
//! by [`SourcePolicy`]. The current rotation is always held in the rank 4
//! renderer form.

use std::f64::consts::{FRAC_PI_2, PI};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::filters::gyro_integrator::GyroIntegrator;
use crate::ingest::SampleIngestor;
use crate::remap::remap;
use crate::rotation::{
    inclination, orientation_angles, rot_x, rot_y, rot_z, rotation_from_gravity_magnetic,
    rotation_matrix_from_quaternion, FixThresholds,
};
use crate::sensor_fusion::{FusionConfig, FusionEvent, FusionSource, SourcePolicy};
use crate::types::{
    copy, multiply, EulerAngles, Matrix, Quaternion, RawSample, ScreenRotation, SensorSample,
    RANK_3, RANK_4,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    /// No absolute fix yet; rotation is the identity (gyro deltas may still compose).
    Uninitialized,
    /// Entered on the first rotation vector or applied gravity/magnetic fix; rejected fixes do not count.
    Tracking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pole {
    North,
    South,
}

/// Gimbal-lock test value over the scalar-first quaternion `[w, x, y, z]`.
///
/// Equals half of the `R[7]` entry the pitch formula reads, so it reaches
/// ±0.5 exactly where that decomposition degenerates.
pub fn gimbal_test(q: &Quaternion) -> f64 {
    let qa = q.to_scalar_first();
    qa[3] * qa[2] + qa[1] * qa[0]
}

pub fn classify_pole(test: f64, threshold: f64) -> Option<Pole> {
    if test > threshold {
        Some(Pole::North)
    } else if test < -threshold {
        Some(Pole::South)
    } else {
        None
    }
}

pub struct OrientationEstimator {
    rotation: Matrix,
    ingestor: SampleIngestor,
    gyro: GyroIntegrator,
    screen_rotation: ScreenRotation,
    gimbal_threshold: f64,
    policy: SourcePolicy,
    fold_yaw: bool,
    thresholds: FixThresholds,
    state: TrackingState,
    has_rotation_vector_fix: bool,
    last_source: FusionSource,
    last_angles: Option<EulerAngles>,
    revision: u64,
}

impl OrientationEstimator {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            rotation: Matrix::identity(RANK_4),
            ingestor: SampleIngestor::new(),
            gyro: GyroIntegrator::new(config.gyro_epsilon),
            screen_rotation: config.screen_rotation,
            gimbal_threshold: config.gimbal_threshold,
            policy: config.source_policy,
            fold_yaw: config.fold_yaw,
            thresholds: config.fix_thresholds,
            state: TrackingState::Uninitialized,
            has_rotation_vector_fix: false,
            last_source: FusionSource::Initial,
            last_angles: None,
            revision: 0,
        }
    }

    /// Validate and apply one raw reading.
    ///
    /// Malformed readings are dropped with a diagnostic and leave all state
    /// untouched. An `Err` means an internal matrix precondition failed.
    pub fn process(&mut self, raw: &RawSample) -> EngineResult<Vec<FusionEvent>> {
        let mut events = Vec::new();

        let sample = match SensorSample::from_raw(raw) {
            Ok(sample) => sample,
            Err(err) => {
                warn!("dropping sample: {}", err);
                events.push(FusionEvent::SampleDropped {
                    kind: raw.kind,
                    reason: err.to_string(),
                });
                return Ok(events);
            }
        };

        if let Some(previous) = self.ingestor.note_accuracy(raw.kind, raw.accuracy) {
            info!(
                "{:?} accuracy changed: {:?} -> {:?}",
                raw.kind, previous, raw.accuracy
            );
            events.push(FusionEvent::AccuracyChanged {
                kind: raw.kind,
                from: previous,
                to: raw.accuracy,
            });
        }

        self.apply(&sample, &mut events)?;
        Ok(events)
    }

    /// Apply an already validated sample.
    pub fn apply(&mut self, sample: &SensorSample, events: &mut Vec<FusionEvent>) -> EngineResult<()> {
        self.ingestor.ingest(sample);

        match sample {
            SensorSample::RotationVector(q) => self.apply_rotation_vector(q, events)?,
            SensorSample::Gyroscope {
                angular_velocity,
                timestamp,
            } => {
                let delta = self.gyro.integrate(angular_velocity, *timestamp);
                let composed = multiply(&self.rotation, &delta.rotation)?;
                self.commit(composed, FusionSource::Gyroscope);
                events.push(FusionEvent::GyroApplied {
                    dt: delta.dt,
                    angular_velocity: *angular_velocity,
                });
            }
            SensorSample::Gravity(_) | SensorSample::MagneticField(_) => {}
        }

        self.apply_gravity_magnetic(events)
    }

    // ─── Rotation vector ────────────────────────────────────────────────────

    fn apply_rotation_vector(
        &mut self,
        q: &Quaternion,
        events: &mut Vec<FusionEvent>,
    ) -> EngineResult<()> {
        let device = rotation_matrix_from_quaternion(q, RANK_3);
        let r = remap(&device, self.screen_rotation);
        let natural = self.screen_rotation.is_natural();

        let tilt_x = (-r[7]).clamp(-1.0, 1.0).asin();
        let tilt_y = -(-r[6]).atan2(r[8]);
        let (mut pitch, mut roll) = if natural {
            (tilt_x, tilt_y)
        } else {
            (tilt_y, tilt_x)
        };
        let mut yaw = (-r[1]).atan2(r[4]);

        let test = gimbal_test(q);
        let qa = q.to_scalar_first();
        match classify_pole(test, self.gimbal_threshold) {
            Some(Pole::North) => {
                info!("north pole singularity (test {:.4})", test);
                yaw = 2.0 * qa[3].atan2(qa[0]);
                (pitch, roll) = if natural { (-FRAC_PI_2, 0.0) } else { (0.0, -FRAC_PI_2) };
                events.push(FusionEvent::SingularityDetected {
                    pole: Pole::North,
                    test,
                });
            }
            Some(Pole::South) => {
                info!("south pole singularity (test {:.4})", test);
                yaw = -2.0 * qa[3].atan2(qa[0]);
                (pitch, roll) = if natural { (FRAC_PI_2, 0.0) } else { (0.0, PI) };
                events.push(FusionEvent::SingularityDetected {
                    pole: Pole::South,
                    test,
                });
            }
            None => {}
        }

        // Yaw is reported but only folded into the rebuilt rotation on request.
        let mut rebuilt = multiply(&rot_x(pitch), &rot_y(roll))?;
        if self.fold_yaw {
            rebuilt = multiply(&rebuilt, &rot_z(yaw))?;
        }

        let mut next = self.rotation.clone();
        copy(&rebuilt, &mut next)?;
        self.commit(next, FusionSource::RotationVector);
        self.has_rotation_vector_fix = true;
        self.state = TrackingState::Tracking;

        let angles = EulerAngles { yaw, pitch, roll };
        self.last_angles = Some(angles);
        debug!(
            "rotation vector: yaw {:.1} pitch {:.1} roll {:.1}",
            yaw.to_degrees(),
            pitch.to_degrees(),
            roll.to_degrees()
        );
        events.push(FusionEvent::RotationVectorApplied { angles });
        Ok(())
    }

    // ─── Gravity + magnetic field ───────────────────────────────────────────

    fn apply_gravity_magnetic(&mut self, events: &mut Vec<FusionEvent>) -> EngineResult<()> {
        let (gravity, field) = match self.ingestor.fusion_inputs() {
            Some(inputs) => inputs,
            None => return Ok(()),
        };

        let fix = match rotation_from_gravity_magnetic(&gravity, &field, RANK_4, &self.thresholds) {
            Ok(fix) => fix,
            Err(rejection) => {
                debug!("gravity/magnetic fix rejected: {:?}", rejection);
                events.push(FusionEvent::GravityMagneticRejected { rejection });
                return Ok(());
            }
        };

        let angles = orientation_angles(&fix.rotation)?;
        let inclination_deg = inclination(&fix.inclination)?.to_degrees();
        let applied = match self.policy {
            SourcePolicy::LastWriteWins => true,
            SourcePolicy::RotationVectorFirst => !self.has_rotation_vector_fix,
        };

        if applied {
            self.commit(fix.rotation, FusionSource::GravityMagnetic);
            self.last_angles = Some(angles);
            self.state = TrackingState::Tracking;
        }

        let yaw_deg = angles.yaw_normalized_deg();
        let pitch_deg = angles.pitch.to_degrees();
        let roll_deg = angles.roll.to_degrees();
        debug!(
            "gravity/magnetic: yaw {:.1} pitch {:.1} roll {:.1} inclination {:.1} (applied: {})",
            yaw_deg, pitch_deg, roll_deg, inclination_deg, applied
        );
        events.push(FusionEvent::GravityMagneticFix {
            yaw_deg,
            pitch_deg,
            roll_deg,
            inclination_deg,
            applied,
        });
        Ok(())
    }

    fn commit(&mut self, rotation: Matrix, source: FusionSource) {
        self.rotation = rotation;
        self.last_source = source;
        self.revision += 1;
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    /// Current rotation, rank 4 row-major.
    pub fn rotation(&self) -> &Matrix {
        &self.rotation
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn last_source(&self) -> FusionSource {
        self.last_source
    }

    /// Angles reported by the most recent absolute fix that was applied.
    pub fn last_angles(&self) -> Option<EulerAngles> {
        self.last_angles
    }

    /// Incremented on every write to the rotation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn screen_rotation(&self) -> ScreenRotation {
        self.screen_rotation
    }

    pub fn set_screen_rotation(&mut self, rotation: ScreenRotation) {
        if rotation != self.screen_rotation {
            info!("screen rotation {} -> {}", self.screen_rotation.degrees(), rotation.degrees());
            self.screen_rotation = rotation;
        }
    }

    pub fn ingestor(&self) -> &SampleIngestor {
        &self.ingestor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::{is_orthonormal, rot_z};
    use crate::types::SampleKind;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;
    use std::f64::consts::FRAC_1_SQRT_2;

    fn estimator() -> OrientationEstimator {
        OrientationEstimator::new(&FusionConfig::default())
    }

    fn rv(q: Quaternion) -> RawSample {
        RawSample::new(SampleKind::RotationVector, &[q.x, q.y, q.z, q.w], None)
    }

    fn block3(m: &Matrix) -> Matrix {
        let mut out = Matrix::zeros(3);
        copy(m, &mut out).unwrap();
        out
    }

    #[test]
    fn test_starts_uninitialized_at_identity() {
        let est = estimator();
        assert_eq!(est.state(), TrackingState::Uninitialized);
        assert_eq!(est.rotation(), &Matrix::identity(4));
        assert_eq!(est.last_source(), FusionSource::Initial);
    }

    #[test]
    fn test_identity_quaternion_end_to_end() {
        let mut est = estimator();
        let events = est.process(&rv(Quaternion::identity())).unwrap();

        assert!(est.rotation().max_abs_diff(&Matrix::identity(4)).unwrap() < 1e-12);
        let angles = est.last_angles().unwrap();
        assert_abs_diff_eq!(angles.yaw, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.pitch, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.roll, 0.0, epsilon = 1e-12);
        assert_eq!(est.state(), TrackingState::Tracking);
        assert!(!events
            .iter()
            .any(|e| matches!(e, FusionEvent::SingularityDetected { .. })));
    }

    #[test]
    fn test_pole_classification_bounds() {
        assert_eq!(classify_pole(0.5 + 1e-6, 0.499), Some(Pole::North));
        assert_eq!(classify_pole(-0.5 - 1e-6, 0.499), Some(Pole::South));
        assert_eq!(classify_pole(0.4995, 0.499), Some(Pole::North));
        assert_eq!(classify_pole(0.499, 0.499), None);
        assert_eq!(classify_pole(-0.499, 0.499), None);
        assert_eq!(classify_pole(0.0, 0.499), None);
    }

    #[test]
    fn test_gimbal_test_matches_pitch_entry() {
        let q = Quaternion::new(0.3, -0.2, 0.5, 0.787);
        let r = rotation_matrix_from_quaternion(&q, RANK_3);
        assert_abs_diff_eq!(gimbal_test(&q) * 2.0, r[7], epsilon = 1e-12);
    }

    #[test]
    fn test_north_pole_branch() {
        // Slightly over-unit quaternion pushes the test just past 0.5.
        let s = FRAC_1_SQRT_2 * 1.0005;
        let q = Quaternion::new(s, 0.0, 0.0, s);
        assert!(gimbal_test(&q) > 0.5);

        let mut est = estimator();
        let events = est.process(&rv(q)).unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            FusionEvent::SingularityDetected { pole: Pole::North, .. }
        )));

        let angles = est.last_angles().unwrap();
        assert_abs_diff_eq!(angles.pitch, -FRAC_PI_2, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.roll, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.yaw, 0.0, epsilon = 1e-12);

        let expected = rot_x(-FRAC_PI_2);
        assert!(block3(est.rotation()).max_abs_diff(&expected).unwrap() < 1e-12);
    }

    #[test]
    fn test_south_pole_branch() {
        let s = FRAC_1_SQRT_2 * 1.0005;
        let q = Quaternion::new(-s, 0.0, 0.0, s);
        assert!(gimbal_test(&q) < -0.5);

        let mut est = estimator();
        let events = est.process(&rv(q)).unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            FusionEvent::SingularityDetected { pole: Pole::South, .. }
        )));
        let angles = est.last_angles().unwrap();
        assert_abs_diff_eq!(angles.pitch, FRAC_PI_2, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.roll, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pole_angles_for_rotated_screen() {
        let config = FusionConfig {
            screen_rotation: ScreenRotation::Rotation90,
            ..FusionConfig::default()
        };
        let s = FRAC_1_SQRT_2;
        let mut est = OrientationEstimator::new(&config);
        est.process(&rv(Quaternion::new(s, 0.0, 0.0, s))).unwrap();
        let north = est.last_angles().unwrap();
        assert_abs_diff_eq!(north.pitch, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(north.roll, -FRAC_PI_2, epsilon = 1e-12);

        est.process(&rv(Quaternion::new(-s, 0.0, 0.0, s))).unwrap();
        let south = est.last_angles().unwrap();
        assert_abs_diff_eq!(south.pitch, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(south.roll, PI, epsilon = 1e-12);
    }

    #[test]
    fn test_generic_branch_tilt_about_x() {
        let q = Quaternion::from_axis_angle(Vector3::x(), 0.3);
        let test = gimbal_test(&q);
        assert!(test > -0.499 && test < 0.499);

        let mut est = estimator();
        let events = est.process(&rv(q)).unwrap();
        assert!(!events
            .iter()
            .any(|e| matches!(e, FusionEvent::SingularityDetected { .. })));

        let angles = est.last_angles().unwrap();
        assert_abs_diff_eq!(angles.pitch, -0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.roll, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.yaw, 0.0, epsilon = 1e-12);
        assert!(block3(est.rotation()).max_abs_diff(&rot_x(-0.3)).unwrap() < 1e-12);
    }

    #[test]
    fn test_yaw_reported_but_not_published() {
        let q = Quaternion::from_axis_angle(Vector3::z(), 0.8);
        let mut est = estimator();
        est.process(&rv(q)).unwrap();
        let angles = est.last_angles().unwrap();
        assert_abs_diff_eq!(angles.yaw, 0.8, epsilon = 1e-12);
        assert!(est.rotation().max_abs_diff(&Matrix::identity(4)).unwrap() < 1e-12);
    }

    #[test]
    fn test_fold_yaw_option() {
        let config = FusionConfig {
            fold_yaw: true,
            ..FusionConfig::default()
        };
        let mut est = OrientationEstimator::new(&config);
        est.process(&rv(Quaternion::from_axis_angle(Vector3::z(), 0.8)))
            .unwrap();
        assert!(block3(est.rotation()).max_abs_diff(&rot_z(0.8)).unwrap() < 1e-12);
    }

    #[test]
    fn test_gyro_steps_compose() {
        let mut est = estimator();
        let omega = [0.1, -0.2, 0.4];
        let dt = 0.02;
        for i in 0..3 {
            let raw = RawSample::new(SampleKind::Gyroscope, &omega, Some(i as f64 * dt));
            est.process(&raw).unwrap();
        }

        let mut single = GyroIntegrator::default();
        let w = Vector3::new(omega[0], omega[1], omega[2]);
        single.integrate(&w, 0.0);
        let delta = single.integrate(&w, dt).rotation;
        let expected = multiply(&delta, &delta).unwrap();

        assert!(est.rotation().max_abs_diff(&expected).unwrap() < 1e-12);
        assert!(is_orthonormal(est.rotation(), 1e-9));
        assert_eq!(est.last_source(), FusionSource::Gyroscope);
        // Gyro alone does not count as an absolute fix.
        assert_eq!(est.state(), TrackingState::Uninitialized);
    }

    #[test]
    fn test_gyro_event_carries_rate() {
        let mut est = estimator();
        est.process(&RawSample::new(SampleKind::Gyroscope, &[0.1, -0.2, 0.4], Some(0.0)))
            .unwrap();
        let events = est
            .process(&RawSample::new(SampleKind::Gyroscope, &[0.3, 0.0, -0.5], Some(0.02)))
            .unwrap();
        match &events[..] {
            [FusionEvent::GyroApplied { dt, angular_velocity }] => {
                assert_abs_diff_eq!(*dt, 0.02, epsilon = 1e-12);
                assert_eq!(*angular_velocity, Vector3::new(0.3, 0.0, -0.5));
            }
            other => panic!("expected a single GyroApplied, got {:?}", other),
        }
    }

    #[test]
    fn test_gravity_magnetic_end_to_end() {
        let mut est = estimator();
        est.process(&RawSample::new(SampleKind::Gravity, &[0.0, 0.0, 9.8], None))
            .unwrap();
        let events = est
            .process(&RawSample::new(SampleKind::MagneticField, &[0.0, 50.0, 0.0], None))
            .unwrap();

        let fix = events
            .iter()
            .find_map(|e| match e {
                FusionEvent::GravityMagneticFix {
                    yaw_deg,
                    pitch_deg,
                    roll_deg,
                    applied,
                    ..
                } => Some((*yaw_deg, *pitch_deg, *roll_deg, *applied)),
                _ => None,
            })
            .unwrap();
        assert!(fix.0 >= 0.0 && fix.0 < 360.0);
        assert_abs_diff_eq!(fix.1, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fix.2, 0.0, epsilon = 1e-9);
        assert!(fix.3);
        assert_eq!(est.last_source(), FusionSource::GravityMagnetic);
        assert_eq!(est.state(), TrackingState::Tracking);
    }

    #[test]
    fn test_last_write_wins_overwrites_rotation_vector() {
        let mut est = estimator();
        est.process(&RawSample::new(SampleKind::Gravity, &[0.0, 0.0, 9.8], None))
            .unwrap();
        est.process(&RawSample::new(SampleKind::MagneticField, &[-50.0, 0.0, 0.0], None))
            .unwrap();
        // The same ingest runs the rotation vector and then the cached fix.
        est.process(&rv(Quaternion::from_axis_angle(Vector3::x(), 0.3)))
            .unwrap();
        assert_eq!(est.last_source(), FusionSource::GravityMagnetic);
    }

    #[test]
    fn test_rotation_vector_first_policy() {
        let config = FusionConfig {
            source_policy: SourcePolicy::RotationVectorFirst,
            ..FusionConfig::default()
        };
        let mut est = OrientationEstimator::new(&config);
        est.process(&rv(Quaternion::from_axis_angle(Vector3::x(), 0.3)))
            .unwrap();
        let before = est.rotation().clone();

        est.process(&RawSample::new(SampleKind::Gravity, &[0.0, 0.0, 9.8], None))
            .unwrap();
        let events = est
            .process(&RawSample::new(SampleKind::MagneticField, &[-50.0, 0.0, 0.0], None))
            .unwrap();

        assert!(events
            .iter()
            .any(|e| matches!(e, FusionEvent::GravityMagneticFix { applied: false, .. })));
        assert_eq!(est.rotation(), &before);
        assert_eq!(est.last_source(), FusionSource::RotationVector);
    }

    #[test]
    fn test_rejected_fix_keeps_rotation() {
        let mut est = estimator();
        est.process(&RawSample::new(SampleKind::Gravity, &[0.0, 0.0, 0.2], None))
            .unwrap();
        let events = est
            .process(&RawSample::new(SampleKind::MagneticField, &[0.0, 50.0, 0.0], None))
            .unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, FusionEvent::GravityMagneticRejected { .. })));
        assert_eq!(est.rotation(), &Matrix::identity(4));
        assert_eq!(est.revision(), 0);
        // Both inputs are cached, but a rejected fix is not a first fix.
        assert!(est.ingestor().is_fusion_ready());
        assert_eq!(est.state(), TrackingState::Uninitialized);
    }

    #[test]
    fn test_malformed_sample_dropped() {
        let mut est = estimator();
        est.process(&rv(Quaternion::from_axis_angle(Vector3::x(), 0.3)))
            .unwrap();
        let before = est.rotation().clone();
        let revision = est.revision();

        let events = est
            .process(&RawSample::new(SampleKind::RotationVector, &[f64::INFINITY, 0.0, 0.0, 1.0], None))
            .unwrap();
        assert!(matches!(events.as_slice(), [FusionEvent::SampleDropped { .. }]));
        assert_eq!(est.rotation(), &before);
        assert_eq!(est.revision(), revision);

        est.process(&RawSample::new(SampleKind::Gravity, &[9.8], None))
            .unwrap();
        assert!(!est.ingestor().has_gravity());
    }

    #[test]
    fn test_accuracy_change_event() {
        let mut est = estimator();
        est.process(&rv(Quaternion::identity())).unwrap();
        let raw = rv(Quaternion::identity()).with_accuracy(crate::types::SensorAccuracy::Low);
        let events = est.process(&raw).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, FusionEvent::AccuracyChanged { .. })));
    }
}
