use std::collections::HashMap;

use nalgebra::Vector3;

use crate::types::{SampleKind, SensorAccuracy, SensorSample};

/// Latest-value caches for the absolute vector sensors.
///
/// Gravity and magnetic field overwrite their cache on every arrival; there is
/// no staleness check. Rotation-vector and gyroscope samples are only counted
/// here and handed to the estimator untouched.
#[derive(Clone, Debug)]
pub struct SampleIngestor {
    gravity: Vector3<f64>,
    magnetic: Vector3<f64>,
    has_gravity: bool,
    has_magnetic: bool,
    accuracy: HashMap<SampleKind, SensorAccuracy>,
    counts: HashMap<SampleKind, u64>,
}

impl SampleIngestor {
    pub fn new() -> Self {
        Self {
            gravity: Vector3::zeros(),
            magnetic: Vector3::zeros(),
            has_gravity: false,
            has_magnetic: false,
            accuracy: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, sample: &SensorSample) {
        *self.counts.entry(sample.kind()).or_insert(0) += 1;
        match sample {
            SensorSample::Gravity(v) => {
                self.gravity = *v;
                self.has_gravity = true;
            }
            SensorSample::MagneticField(v) => {
                self.magnetic = *v;
                self.has_magnetic = true;
            }
            SensorSample::RotationVector(_) | SensorSample::Gyroscope { .. } => {}
        }
    }

    /// Record the accuracy of a reading; returns the previous value when it changed.
    pub fn note_accuracy(
        &mut self,
        kind: SampleKind,
        accuracy: SensorAccuracy,
    ) -> Option<SensorAccuracy> {
        match self.accuracy.insert(kind, accuracy) {
            Some(previous) if previous != accuracy => Some(previous),
            _ => None,
        }
    }

    pub fn is_fusion_ready(&self) -> bool {
        self.has_gravity && self.has_magnetic
    }

    /// Cached (gravity, magnetic field) once both have arrived.
    pub fn fusion_inputs(&self) -> Option<(Vector3<f64>, Vector3<f64>)> {
        self.is_fusion_ready()
            .then_some((self.gravity, self.magnetic))
    }

    pub fn has_gravity(&self) -> bool {
        self.has_gravity
    }

    pub fn has_magnetic(&self) -> bool {
        self.has_magnetic
    }

    pub fn sample_count(&self, kind: SampleKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

impl Default for SampleIngestor {
    fn default() -> Self {
        Self::new()
    }
}
