// sensor_fusion.rs: orientation engine (config, events, inbound queue, publication)
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - the concrete sensor source (simulated, recorded, hardware)
//   - file I/O and Rerun logging
//
// Raw samples go into a bounded queue, `pump()` drains it synchronously through
// the estimator, and every accepted write is published as a fresh snapshot.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::filters::gyro_integrator::DEFAULT_OMEGA_EPSILON;
use crate::filters::orientation::{OrientationEstimator, Pole, TrackingState};
use crate::rotation::{compose_xyz, decompose_xyz, FixRejection, FixThresholds};
use crate::sensors::SensorSource;
use crate::snapshot::{RotationSnapshot, SharedRotation};
use crate::types::{EulerAngles, RawSample, SampleKind, ScreenRotation, SensorAccuracy};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Which absolute source may overwrite the published rotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePolicy {
    /// Every accepted fix overwrites, in arrival order.
    #[default]
    LastWriteWins,
    /// Gravity + magnetic fixes only apply until a rotation vector has arrived.
    RotationVectorFirst,
}

impl FromStr for SourcePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "last-write-wins" | "lww" => Ok(SourcePolicy::LastWriteWins),
            "rotation-vector-first" | "rv-first" => Ok(SourcePolicy::RotationVectorFirst),
            other => Err(format!("unknown source policy '{}'", other)),
        }
    }
}

impl fmt::Display for SourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePolicy::LastWriteWins => write!(f, "last-write-wins"),
            SourcePolicy::RotationVectorFirst => write!(f, "rotation-vector-first"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── Estimator ──
    pub screen_rotation: ScreenRotation,
    pub gimbal_threshold: f64,
    pub source_policy: SourcePolicy,
    /// Multiply the reported yaw into the rebuilt rotation-vector matrix.
    pub fold_yaw: bool,
    pub gyro_epsilon: f64,
    pub fix_thresholds: FixThresholds,

    // ── Inbound queue ──
    pub queue_capacity: usize,

    // ── Subscriptions ──
    pub enable_rotation_vector: bool,
    pub enable_gravity: bool,
    pub enable_magnetic: bool,
    pub enable_gyro: bool,

    // ── Startup ──
    pub self_check: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            screen_rotation: ScreenRotation::Rotation0,
            gimbal_threshold: 0.499,
            source_policy: SourcePolicy::LastWriteWins,
            fold_yaw: false,
            gyro_epsilon: DEFAULT_OMEGA_EPSILON,
            fix_thresholds: FixThresholds::default(),
            queue_capacity: 500,
            enable_rotation_vector: true,
            enable_gravity: false,
            enable_magnetic: false,
            enable_gyro: false,
            self_check: true,
        }
    }
}

impl FusionConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the estimator cannot run with.
    ///
    /// The gimbal test compares `|x·w + y·z|` against the threshold, and that
    /// product never exceeds 0.5 for a unit quaternion, so the threshold must
    /// lie in `(0, 0.5]`.
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.gimbal_threshold > 0.0 && self.gimbal_threshold <= 0.5) {
            return Err(EngineError::InvalidConfig(format!(
                "gimbal_threshold {} outside (0, 0.5]",
                self.gimbal_threshold
            )));
        }
        if !self.gyro_epsilon.is_finite() || self.gyro_epsilon < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "gyro_epsilon {} must be finite and non-negative",
                self.gyro_epsilon
            )));
        }
        Ok(())
    }

    pub fn enabled_kinds(&self) -> Vec<SampleKind> {
        SampleKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                SampleKind::RotationVector => self.enable_rotation_vector,
                SampleKind::Gravity => self.enable_gravity,
                SampleKind::MagneticField => self.enable_magnetic,
                SampleKind::Gyroscope => self.enable_gyro,
            })
            .collect()
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Which path last wrote the published rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionSource {
    Initial,
    RotationVector,
    Gyroscope,
    GravityMagnetic,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    RotationVectorApplied { angles: EulerAngles },
    SingularityDetected { pole: Pole, test: f64 },
    GyroApplied { dt: f64, angular_velocity: Vector3<f64> },
    GravityMagneticFix { yaw_deg: f64, pitch_deg: f64, roll_deg: f64, inclination_deg: f64, applied: bool },
    GravityMagneticRejected { rejection: FixRejection },
    SampleDropped { kind: SampleKind, reason: String },
    AccuracyChanged { kind: SampleKind, from: SensorAccuracy, to: SensorAccuracy },
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct SelfCheckReport {
    /// Angles fed in, radians `(a, b, c)`.
    pub input: (f64, f64, f64),
    /// Angles recovered from the composed matrix.
    pub recovered: (f64, f64, f64),
    pub max_error: f64,
    pub passed: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStats {
    pub processed: u64,
    pub dropped_malformed: u64,
    pub singularities: u64,
    pub rejected_fixes: u64,
    pub published: u64,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct OrientationEngine {
    config: FusionConfig,
    estimator: OrientationEstimator,
    shared: SharedRotation,
    queue_tx: Sender<RawSample>,
    queue_rx: Receiver<RawSample>,
    published_revision: u64,
    sequence: u64,
    stats: EngineStats,
    recording: Option<Vec<RawSample>>,
}

impl OrientationEngine {
    pub fn new(config: FusionConfig) -> Self {
        let (queue_tx, queue_rx) = bounded(config.queue_capacity.max(1));
        Self {
            estimator: OrientationEstimator::new(&config),
            shared: SharedRotation::new(),
            queue_tx,
            queue_rx,
            published_revision: 0,
            sequence: 0,
            stats: EngineStats::default(),
            recording: None,
            config,
        }
    }

    /// Sender side of the inbound queue, handed to sensor sources.
    pub fn sink(&self) -> Sender<RawSample> {
        self.queue_tx.clone()
    }

    /// Reader handle for the published rotation.
    pub fn shared_rotation(&self) -> SharedRotation {
        self.shared.clone()
    }

    // ── Sources ──────────────────────────────────────────────────────────

    /// Log what the source offers and subscribe every enabled kind.
    ///
    /// Enabled kinds the source lacks are skipped with a warning. Returns the
    /// kinds actually subscribed.
    pub fn connect(&self, source: &mut dyn SensorSource) -> EngineResult<Vec<SampleKind>> {
        for kind in SampleKind::ALL {
            info!("sensor {:?}: {}", kind, if source.is_available(kind) { "available" } else { "missing" });
        }

        let mut subscribed = Vec::new();
        for kind in self.config.enabled_kinds() {
            match source.subscribe(kind, self.sink()) {
                Ok(()) => subscribed.push(kind),
                Err(EngineError::SensorUnavailable(kind)) => {
                    warn!("{:?} enabled but not available, skipping", kind);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(subscribed)
    }

    pub fn disconnect(&self, source: &mut dyn SensorSource) {
        for kind in SampleKind::ALL {
            source.unsubscribe(kind);
        }
    }

    // ── Processing ───────────────────────────────────────────────────────

    /// Run one sample through the estimator and publish if the rotation changed.
    pub fn process(&mut self, raw: &RawSample) -> EngineResult<Vec<FusionEvent>> {
        let events = self.estimator.process(raw)?;
        self.stats.processed += 1;

        for event in &events {
            match event {
                FusionEvent::SampleDropped { .. } => self.stats.dropped_malformed += 1,
                FusionEvent::SingularityDetected { .. } => self.stats.singularities += 1,
                FusionEvent::GravityMagneticRejected { .. } => self.stats.rejected_fixes += 1,
                _ => {}
            }
        }

        if let Some(recording) = self.recording.as_mut() {
            recording.push(raw.clone());
        }

        if self.estimator.revision() != self.published_revision {
            self.publish(raw.timestamp)?;
        }
        Ok(events)
    }

    /// Drain everything currently queued, in arrival order.
    pub fn pump(&mut self) -> EngineResult<Vec<FusionEvent>> {
        let mut events = Vec::new();
        // `queue_tx` lives as long as the engine, so the queue never disconnects
        // and an empty receive is the only way out.
        while let Ok(raw) = self.queue_rx.try_recv() {
            events.extend(self.process(&raw)?);
        }
        Ok(events)
    }

    fn publish(&mut self, timestamp: Option<f64>) -> EngineResult<()> {
        let snapshot = RotationSnapshot::from_matrix(
            self.estimator.rotation(),
            self.estimator.last_angles(),
            self.estimator.last_source(),
            self.sequence,
            timestamp,
        )?;
        self.shared.publish(snapshot);
        self.sequence += 1;
        self.stats.published += 1;
        self.published_revision = self.estimator.revision();
        Ok(())
    }

    // ── Diagnostics ──────────────────────────────────────────────────────

    /// Compose `Rx(30°)·Ry(45°)·Rz(60°)` and recover the angles.
    pub fn self_check(&self) -> EngineResult<SelfCheckReport> {
        let input = (30f64.to_radians(), 45f64.to_radians(), 60f64.to_radians());
        let composed = compose_xyz(input.0, input.1, input.2)?;
        let recovered = decompose_xyz(&composed)?;
        let max_error = (input.0 - recovered.0)
            .abs()
            .max((input.1 - recovered.1).abs())
            .max((input.2 - recovered.2).abs());
        let passed = max_error < 1e-9;

        info!("self-check matrix {}", composed);
        info!(
            "self-check angles {:.2}/{:.2}/{:.2} -> {:.2}/{:.2}/{:.2} ({})",
            input.0.to_degrees(),
            input.1.to_degrees(),
            input.2.to_degrees(),
            recovered.0.to_degrees(),
            recovered.1.to_degrees(),
            recovered.2.to_degrees(),
            if passed { "ok" } else { "MISMATCH" }
        );
        if !passed {
            warn!("rotation self-check off by {:.3e} rad", max_error);
        }

        Ok(SelfCheckReport {
            input,
            recovered,
            max_error,
            passed,
        })
    }

    // ── Recording ────────────────────────────────────────────────────────

    /// Start keeping a copy of every processed sample.
    pub fn start_recording(&mut self) {
        self.recording.get_or_insert_with(Vec::new);
    }

    pub fn take_recording(&mut self) -> Vec<RawSample> {
        self.recording.take().unwrap_or_default()
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// Latest published rotation as 16 row-major floats.
    pub fn current_rotation_matrix(&self) -> [f32; 16] {
        self.shared.current_rotation_matrix()
    }

    pub fn set_screen_rotation(&mut self, rotation: ScreenRotation) {
        self.config.screen_rotation = rotation;
        self.estimator.set_screen_rotation(rotation);
    }

    pub fn state(&self) -> TrackingState {
        self.estimator.state()
    }

    pub fn estimator(&self) -> &OrientationEstimator {
        &self.estimator
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}
