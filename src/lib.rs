// Orientation tracker library
//
// Turns rotation-vector, gravity, magnetic-field and gyroscope samples into a
// device rotation matrix published for a renderer.

pub mod error;
pub mod filters;
pub mod ingest;
pub mod remap;
pub mod rerun_logger;
pub mod rotation;
pub mod sensor_fusion;
pub mod sensors;
pub mod session;
pub mod snapshot;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use filters::orientation::{OrientationEstimator, Pole, TrackingState};
pub use sensor_fusion::{FusionConfig, FusionEvent, FusionSource, OrientationEngine, SourcePolicy};
pub use snapshot::{RotationSnapshot, SharedRotation};
pub use types::{EulerAngles, Matrix, Quaternion, RawSample, SampleKind, ScreenRotation};
