use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::json;

use orientation_tracker_rs::rerun_logger::RerunLogger;
use orientation_tracker_rs::sensors::ReplaySource;
use orientation_tracker_rs::session::load_session;
use orientation_tracker_rs::{
    FusionConfig, FusionEvent, OrientationEngine, SampleKind, ScreenRotation, SourcePolicy,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.json[.gz]
    #[arg(long)]
    session: PathBuf,

    /// JSON fusion config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Screen rotation in degrees (0, 90, 180, 270)
    #[arg(long)]
    screen_rotation: Option<i32>,

    /// Source policy (last-write-wins, rotation-vector-first)
    #[arg(long)]
    policy: Option<SourcePolicy>,

    /// Fold the reported yaw into the rotation-vector matrix
    #[arg(long, default_value_t = false)]
    fold_yaw: bool,

    /// Only replay these kinds (default: everything recorded)
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Write a Rerun .rrd recording of the replay
    #[arg(long)]
    rerun: Option<PathBuf>,
}

fn parse_kind(name: &str) -> Result<SampleKind> {
    serde_json::from_value(json!(name)).map_err(|_| anyhow!("unknown sample kind '{}'", name))
}

fn event_name(event: &FusionEvent) -> &'static str {
    match event {
        FusionEvent::RotationVectorApplied { .. } => "rotation_vector_applied",
        FusionEvent::SingularityDetected { .. } => "singularity_detected",
        FusionEvent::GyroApplied { .. } => "gyro_applied",
        FusionEvent::GravityMagneticFix { .. } => "gravity_magnetic_fix",
        FusionEvent::GravityMagneticRejected { .. } => "gravity_magnetic_rejected",
        FusionEvent::SampleDropped { .. } => "sample_dropped",
        FusionEvent::AccuracyChanged { .. } => "accuracy_changed",
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let session = load_session(&args.session)?;

    let mut config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    if let Some(degrees) = args.screen_rotation {
        config.screen_rotation = ScreenRotation::from_degrees(degrees)
            .ok_or_else(|| anyhow!("unsupported screen rotation {} degrees", degrees))?;
    }
    if let Some(policy) = args.policy {
        config.source_policy = policy;
    }
    config.fold_yaw |= args.fold_yaw;

    let only = args
        .only
        .iter()
        .map(|name| parse_kind(name.as_str()))
        .collect::<Result<Vec<_>>>()?;
    let wanted = |kind: SampleKind| only.is_empty() || only.contains(&kind);
    config.enable_rotation_vector = wanted(SampleKind::RotationVector);
    config.enable_gravity = wanted(SampleKind::Gravity);
    config.enable_magnetic = wanted(SampleKind::MagneticField);
    config.enable_gyro = wanted(SampleKind::Gyroscope);
    config.validate()?;

    let rerun = match &args.rerun {
        Some(path) => Some(RerunLogger::new(&path.to_string_lossy())?),
        None => None,
    };

    let mut engine = OrientationEngine::new(config.clone());
    let mut source = ReplaySource::new(session.samples);
    let subscribed = engine.connect(&mut source)?;

    let mut event_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut last_time = 0.0;

    while source.step()? {
        let events = engine.pump()?;
        if events.is_empty() {
            continue;
        }

        if let Some(rr) = &rerun {
            if let Some(ts) = engine.shared_rotation().load().timestamp {
                last_time = ts;
            }
            rr.set_time(last_time);
            rr.log_rotation_matrix(&engine.current_rotation_matrix());
        }

        for event in &events {
            *event_counts.entry(event_name(event)).or_insert(0) += 1;
            if let Some(rr) = &rerun {
                rr.log_event(event);
            }
            if let FusionEvent::SingularityDetected { pole, test } = event {
                println!("[SINGULARITY] {:?} pole (test {:.4})", pole, test);
            }
        }
    }

    let snapshot = engine.shared_rotation().load();
    let summary = json!({
        "session": args.session.display().to_string(),
        "started_at": session.started_at,
        "samples": source.len(),
        "subscribed": subscribed,
        "screen_rotation": config.screen_rotation.degrees(),
        "source_policy": config.source_policy.to_string(),
        "state": format!("{:?}", engine.state()),
        "stats": engine.stats(),
        "events": event_counts,
        "final_rotation": snapshot.as_ref(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
