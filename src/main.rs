use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio::time::{interval, Duration};

use orientation_tracker_rs::rerun_logger::RerunLogger;
use orientation_tracker_rs::sensor_fusion::{EngineStats, SelfCheckReport};
use orientation_tracker_rs::sensors::{SimulatedMotion, SimulatedSource};
use orientation_tracker_rs::session::{save_session, SessionLog};
use orientation_tracker_rs::{
    FusionConfig, FusionEvent, OrientationEngine, RotationSnapshot, SampleKind, ScreenRotation,
    SourcePolicy,
};

#[derive(Parser, Debug)]
#[command(name = "orientation_tracker")]
#[command(about = "Device orientation tracker - rotation vector, gravity/magnetic and gyro fusion", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON fusion config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Screen rotation in degrees (0, 90, 180, 270)
    #[arg(long)]
    screen_rotation: Option<i32>,

    /// Source policy (last-write-wins, rotation-vector-first)
    #[arg(long)]
    policy: Option<SourcePolicy>,

    /// Subscribe to the gyroscope
    #[arg(long)]
    enable_gyro: bool,

    /// Subscribe to gravity and magnetic field
    #[arg(long)]
    enable_gravity_magnetic: bool,

    /// Fold the reported yaw into the rotation-vector matrix
    #[arg(long)]
    fold_yaw: bool,

    /// Simulated spin rate about world Z (rad/s)
    #[arg(long, default_value = "0.3")]
    yaw_rate: f64,

    /// Renderer read rate (Hz)
    #[arg(long, default_value = "60")]
    render_hz: u32,

    /// Save every consumed sample as a replayable session
    #[arg(long)]
    record: bool,

    /// Write a Rerun .rrd recording
    #[arg(long)]
    rerun: bool,

    /// Output directory
    #[arg(long, default_value = "orientation_sessions")]
    output_dir: String,
}

#[derive(Serialize)]
struct RunSummary {
    started_at: String,
    duration_secs: f64,
    config: FusionConfig,
    subscribed: Vec<SampleKind>,
    stats: EngineStats,
    self_check: Option<SelfCheckReport>,
    render_frames: u64,
    final_rotation: RotationSnapshot,
}

fn build_config(args: &Args) -> Result<FusionConfig> {
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
    if args.enable_gyro {
        config.enable_gyro = true;
    }
    if args.enable_gravity_magnetic {
        config.enable_gravity = true;
        config.enable_magnetic = true;
    }
    if args.fold_yaw {
        config.fold_yaw = true;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = build_config(&args)?;

    println!("[{}] Orientation Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Screen Rotation: {}", config.screen_rotation.degrees());
    println!("  Source Policy: {}", config.source_policy);
    println!("  Sensors: {:?}", config.enabled_kinds());
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let mut engine = OrientationEngine::new(config.clone());
    let self_check = if config.self_check {
        let report = engine.self_check()?;
        println!(
            "[{}] Self-check {} (max error {:.2e} rad)",
            ts_now(),
            if report.passed { "passed" } else { "FAILED" },
            report.max_error
        );
        Some(report)
    } else {
        None
    };
    if args.record {
        engine.start_recording();
    }

    let rerun = if args.rerun {
        let path = format!("{}/rerun_{}.rrd", args.output_dir, ts_now_clean());
        Some(RerunLogger::new(&path)?)
    } else {
        None
    };

    let mut source = SimulatedSource::new(SimulatedMotion {
        yaw_rate: args.yaw_rate,
        ..SimulatedMotion::default()
    });
    let subscribed = engine.connect(&mut source)?;
    println!("[{}] Subscribed: {:?}", ts_now(), subscribed);

    // Renderer stand-in: reads the published rotation at frame cadence.
    let reader = engine.shared_rotation();
    let frames = Arc::new(AtomicU64::new(0));
    let frames_clone = frames.clone();
    let render_hz = args.render_hz.max(1);
    let render_handle = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / render_hz as f64));
        let mut last_sequence = None;
        loop {
            ticker.tick().await;
            let snapshot = reader.load();
            let model = snapshot.to_gl_mat4();
            let count = frames_clone.fetch_add(1, Ordering::Relaxed) + 1;
            if last_sequence != Some(snapshot.sequence) && count % (render_hz as u64 * 5) == 0 {
                let up = model.transform_vector3(glam::Vec3::Z);
                log::debug!("frame {}: seq {} screen-out axis {:?}", count, snapshot.sequence, up);
            }
            last_sequence = Some(snapshot.sequence);
        }
    });

    let start = Utc::now();
    let mut last_status = Utc::now();
    let mut pump_tick = interval(Duration::from_millis(5));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("[{}] Tracking...", ts_now());

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = pump_tick.tick() => {}
        }

        let elapsed = Utc::now().signed_duration_since(start);
        let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
        if args.duration > 0 && elapsed.num_seconds() >= args.duration as i64 {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        let events = engine.pump()?;
        if let Some(rr) = &rerun {
            if !events.is_empty() {
                rr.set_time(elapsed_secs);
                rr.log_rotation_matrix(&engine.current_rotation_matrix());
            }
        }
        for event in &events {
            if let Some(rr) = &rerun {
                rr.log_event(event);
            }
            match event {
                FusionEvent::SingularityDetected { pole, test } => {
                    println!("[{}] {:?} pole singularity (test {:.4})", ts_now(), pole, test);
                }
                FusionEvent::AccuracyChanged { kind, from, to } => {
                    println!("[{}] {:?} accuracy {:?} -> {:?}", ts_now(), kind, from, to);
                }
                _ => {}
            }
        }

        let now = Utc::now();
        if now.signed_duration_since(last_status).num_seconds() >= 2 {
            let snapshot = engine.shared_rotation().load();
            let (yaw, pitch, roll) = snapshot
                .angles
                .map(|a| a.to_degrees())
                .unwrap_or((0.0, 0.0, 0.0));
            println!(
                "[{}] {:?} via {:?} | yaw {:>7.1} pitch {:>6.1} roll {:>6.1} | seq {} | dropped {}",
                ts_now(),
                engine.state(),
                snapshot.source,
                yaw,
                pitch,
                roll,
                snapshot.sequence,
                engine.stats().dropped_malformed
            );
            last_status = now;
        }
    }

    engine.disconnect(&mut source);
    render_handle.abort();
    // Whatever arrived before the sources stopped.
    engine.pump()?;

    let duration_secs = Utc::now().signed_duration_since(start).num_milliseconds() as f64 / 1000.0;
    let summary = RunSummary {
        started_at: start.to_rfc3339(),
        duration_secs,
        config,
        subscribed,
        stats: engine.stats().clone(),
        self_check,
        render_frames: frames.load(Ordering::Relaxed),
        final_rotation: (*engine.shared_rotation().load()).clone(),
    };
    let filename = format!("{}/orientation_{}.json", args.output_dir, ts_now_clean());
    std::fs::write(&filename, serde_json::to_string_pretty(&summary)?)?;
    println!("[{}] Summary saved to {}", ts_now(), filename);

    if args.record {
        let samples = engine.take_recording();
        let filename = format!("{}/session_{}.json.gz", args.output_dir, ts_now_clean());
        let count = samples.len();
        save_session(
            std::path::Path::new(&filename),
            &SessionLog::new(Some(start.to_rfc3339()), samples),
        )?;
        println!("[{}] Recorded {} samples to {}", ts_now(), count, filename);
    }

    println!("\n=== Final Stats ===");
    println!("Processed samples: {}", summary.stats.processed);
    println!("Dropped (malformed): {}", summary.stats.dropped_malformed);
    println!("Singularities: {}", summary.stats.singularities);
    println!("Rejected fixes: {}", summary.stats.rejected_fixes);
    println!("Published snapshots: {}", summary.stats.published);
    println!("Render frames: {}", summary.render_frames);

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
