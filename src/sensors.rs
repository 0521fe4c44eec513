use std::collections::HashMap;

use crossbeam::channel::{Sender, TrySendError};
use log::{debug, warn};
use nalgebra::{UnitQuaternion, Vector3};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::types::{RawSample, SampleKind};

/// Sender side of the engine's inbound queue.
pub type SampleSink = Sender<RawSample>;

/// Anything that can deliver raw samples of the four supported kinds.
pub trait SensorSource {
    fn is_available(&self, kind: SampleKind) -> bool;

    /// Start delivering `kind` into `sink`. Re-subscribing replaces the old sink.
    fn subscribe(&mut self, kind: SampleKind, sink: SampleSink) -> EngineResult<()>;

    /// Stop delivering `kind`; a no-op when not subscribed.
    fn unsubscribe(&mut self, kind: SampleKind);
}

/// Non-blocking hand-off. `Ok(false)` means the queue was full and the sample dropped.
pub fn deliver(sink: &SampleSink, sample: RawSample) -> EngineResult<bool> {
    match sink.try_send(sample) {
        Ok(()) => Ok(true),
        Err(TrySendError::Full(_)) => Ok(false),
        Err(TrySendError::Disconnected(_)) => Err(EngineError::QueueClosed),
    }
}

// ─── Simulated device ────────────────────────────────────────────────────────

/// Device spinning about world Z at a constant rate, tilted about its own X.
#[derive(Clone, Copy, Debug)]
pub struct SimulatedMotion {
    /// rad/s about world Z
    pub yaw_rate: f64,
    /// Fixed tilt about device X (rad)
    pub tilt: f64,
    pub gravity: f64,
    /// World-frame field (east, north, up) in µT
    pub field: Vector3<f64>,
}

impl Default for SimulatedMotion {
    fn default() -> Self {
        Self {
            yaw_rate: 0.3,
            tilt: 0.2,
            gravity: 9.81,
            field: Vector3::new(0.0, 22.0, -42.0),
        }
    }
}

impl SimulatedMotion {
    fn tilt_rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), self.tilt)
    }

    /// Device-to-world rotation at `t` seconds.
    pub fn attitude(&self, t: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.yaw_rate * t) * self.tilt_rotation()
    }

    pub fn sample(&self, kind: SampleKind, t: f64) -> RawSample {
        let attitude = self.attitude(t);
        let values = match kind {
            SampleKind::RotationVector => {
                let q = attitude.quaternion();
                vec![q.i, q.j, q.k, q.w]
            }
            SampleKind::Gravity => {
                let g = attitude.inverse_transform_vector(&Vector3::new(0.0, 0.0, self.gravity));
                vec![g.x, g.y, g.z]
            }
            SampleKind::MagneticField => {
                let m = attitude.inverse_transform_vector(&self.field);
                vec![m.x, m.y, m.z]
            }
            SampleKind::Gyroscope => {
                let w = self
                    .tilt_rotation()
                    .inverse_transform_vector(&Vector3::new(0.0, 0.0, self.yaw_rate));
                vec![w.x, w.y, w.z]
            }
        };
        RawSample::new(kind, &values, Some(t))
    }
}

/// Source backed by [`SimulatedMotion`], one tokio interval task per kind.
pub struct SimulatedSource {
    motion: SimulatedMotion,
    periods: HashMap<SampleKind, Duration>,
    available: Vec<SampleKind>,
    tasks: HashMap<SampleKind, JoinHandle<()>>,
    start: Instant,
}

impl SimulatedSource {
    pub fn new(motion: SimulatedMotion) -> Self {
        let periods = HashMap::from([
            (SampleKind::RotationVector, Duration::from_millis(20)), // ~50Hz
            (SampleKind::Gravity, Duration::from_millis(20)),
            (SampleKind::MagneticField, Duration::from_millis(50)), // ~20Hz
            (SampleKind::Gyroscope, Duration::from_millis(10)),     // ~100Hz
        ]);
        Self {
            motion,
            periods,
            available: SampleKind::ALL.to_vec(),
            tasks: HashMap::new(),
            start: Instant::now(),
        }
    }

    /// Pretend the device lacks some sensors.
    pub fn with_available(mut self, kinds: &[SampleKind]) -> Self {
        self.available = kinds.to_vec();
        self
    }

    pub fn with_period(mut self, kind: SampleKind, period: Duration) -> Self {
        self.periods.insert(kind, period);
        self
    }

    pub fn subscribed(&self) -> Vec<SampleKind> {
        SampleKind::ALL
            .into_iter()
            .filter(|kind| self.tasks.contains_key(kind))
            .collect()
    }
}

impl SensorSource for SimulatedSource {
    fn is_available(&self, kind: SampleKind) -> bool {
        self.available.contains(&kind)
    }

    fn subscribe(&mut self, kind: SampleKind, sink: SampleSink) -> EngineResult<()> {
        if !self.is_available(kind) {
            return Err(EngineError::SensorUnavailable(kind));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            warn!("no tokio runtime; cannot start {:?} loop", kind);
            EngineError::SensorUnavailable(kind)
        })?;

        let period = self
            .periods
            .get(&kind)
            .copied()
            .unwrap_or(Duration::from_millis(20));
        let task = runtime.spawn(sample_loop(kind, sink, period, self.motion, self.start));
        if let Some(previous) = self.tasks.insert(kind, task) {
            previous.abort();
        }
        Ok(())
    }

    fn unsubscribe(&mut self, kind: SampleKind) {
        if let Some(task) = self.tasks.remove(&kind) {
            task.abort();
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

async fn sample_loop(
    kind: SampleKind,
    sink: SampleSink,
    period: Duration,
    motion: SimulatedMotion,
    start: Instant,
) {
    let mut ticker = interval(period);
    let mut sent = 0u64;
    let mut dropped = 0u64;

    loop {
        ticker.tick().await;
        let t = start.elapsed().as_secs_f64();

        match deliver(&sink, motion.sample(kind, t)) {
            Ok(true) => {
                sent += 1;
                if sent % 500 == 0 {
                    debug!("[{:?}] {} samples ({} dropped)", kind, sent, dropped);
                }
            }
            Ok(false) => dropped += 1, // queue full, drop this sample
            Err(_) => {
                debug!("[{:?}] queue closed after {} samples", kind, sent);
                break;
            }
        }
    }
}

// ─── Recorded session ────────────────────────────────────────────────────────

/// Plays recorded samples back one at a time, in recorded order.
pub struct ReplaySource {
    samples: Vec<RawSample>,
    cursor: usize,
    sinks: HashMap<SampleKind, SampleSink>,
    dropped: u64,
}

impl ReplaySource {
    pub fn new(samples: Vec<RawSample>) -> Self {
        Self {
            samples,
            cursor: 0,
            sinks: HashMap::new(),
            dropped: 0,
        }
    }

    /// Deliver the next recorded sample; returns `false` once exhausted.
    ///
    /// Samples of unsubscribed kinds are consumed without delivery.
    pub fn step(&mut self) -> EngineResult<bool> {
        let sample = match self.samples.get(self.cursor) {
            Some(sample) => sample.clone(),
            None => return Ok(false),
        };
        self.cursor += 1;

        if let Some(sink) = self.sinks.get(&sample.kind) {
            if !deliver(sink, sample)? {
                self.dropped += 1;
            }
        }
        Ok(true)
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl SensorSource for ReplaySource {
    fn is_available(&self, kind: SampleKind) -> bool {
        self.samples.iter().any(|s| s.kind == kind)
    }

    fn subscribe(&mut self, kind: SampleKind, sink: SampleSink) -> EngineResult<()> {
        if !self.is_available(kind) {
            return Err(EngineError::SensorUnavailable(kind));
        }
        self.sinks.insert(kind, sink);
        Ok(())
    }

    fn unsubscribe(&mut self, kind: SampleKind) {
        self.sinks.remove(&kind);
    }
}
