// snapshot.rs: Published rotation for render-cadence readers
//
// The engine swaps in a fresh immutable snapshot after every accepted write.
// Readers clone the inner Arc and never observe a half-written matrix.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::error::EngineResult;
use crate::sensor_fusion::FusionSource;
use crate::types::{copy, EulerAngles, Matrix, RANK_4};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RotationSnapshot {
    /// Rank 4 row-major rotation in renderer precision.
    pub matrix: [f32; 16],
    pub angles: Option<EulerAngles>,
    pub source: FusionSource,
    /// Number of snapshots published before this one.
    pub sequence: u64,
    pub timestamp: Option<f64>,
}

impl RotationSnapshot {
    pub fn identity() -> Self {
        Self {
            matrix: to_f32(&Matrix::identity(RANK_4)),
            angles: None,
            source: FusionSource::Initial,
            sequence: 0,
            timestamp: None,
        }
    }

    /// Build from a rank 3 or rank 4 rotation; rank 3 is embedded in a rank 4 identity.
    pub fn from_matrix(
        rotation: &Matrix,
        angles: Option<EulerAngles>,
        source: FusionSource,
        sequence: u64,
        timestamp: Option<f64>,
    ) -> EngineResult<Self> {
        let mut full = Matrix::identity(RANK_4);
        copy(rotation, &mut full)?;
        Ok(Self {
            matrix: to_f32(&full),
            angles,
            source,
            sequence,
            timestamp,
        })
    }

    /// Column-major glam matrix for GL-style consumers.
    ///
    /// The rotation is stored row-major, so reading the same 16 values as
    /// columns yields its transpose, which is what the GL pipeline expects.
    pub fn to_gl_mat4(&self) -> glam::Mat4 {
        glam::Mat4::from_cols_array(&self.matrix)
    }
}

fn to_f32(matrix: &Matrix) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for (dst, src) in out.iter_mut().zip(matrix.as_slice()) {
        *dst = *src as f32;
    }
    out
}

/// Handle to the latest published rotation. Cheap to clone across threads.
#[derive(Clone, Debug)]
pub struct SharedRotation {
    inner: Arc<Mutex<Arc<RotationSnapshot>>>,
}

impl SharedRotation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(RotationSnapshot::identity()))),
        }
    }

    pub fn publish(&self, snapshot: RotationSnapshot) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(snapshot);
    }

    pub fn load(&self) -> Arc<RotationSnapshot> {
        let slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&slot)
    }

    /// Latest rotation as 16 row-major floats.
    pub fn current_rotation_matrix(&self) -> [f32; 16] {
        self.load().matrix
    }
}

impl Default for SharedRotation {
    fn default() -> Self {
        Self::new()
    }
}
