use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tokio::time::{sleep, Duration, Instant};

use position_fusion_rs::sources::{
    LocationWatch, OrientationWatch, ReplayLocationSource, SimulatedCompass,
    SimulatedLocationSource,
};
use position_fusion_rs::{
    ChannelSubscriber, EstimatorKind, FusionConfig, FusionStats, PositionOutput, RawFix,
    SessionOptions, TrackingSession,
};

#[derive(Parser, Debug)]
#[command(name = "fusion_tracker")]
#[command(about = "GPS position fusion tracker - gated, smoothed, Kalman-filtered positions", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON file with fusion tunables (missing fields use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay fixes from a JSON array of RawFix instead of simulating
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Estimator override (scalar, position-velocity)
    #[arg(long, value_parser = parse_estimator)]
    estimator: Option<EstimatorKind>,

    /// Fix period in milliseconds for replay and simulation
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Dead-reckoning tick period in milliseconds (0 = off)
    #[arg(long, default_value = "250")]
    tick_ms: u64,

    /// Output directory
    #[arg(long, default_value = "fusion_sessions")]
    output_dir: String,
}

#[derive(Serialize, Deserialize)]
struct SessionOutput {
    config: FusionConfig,
    fixes: Vec<RawFix>,
    outputs: Vec<PositionOutput>,
    stats: FusionStats,
}

fn parse_estimator(s: &str) -> Result<EstimatorKind, String> {
    match s {
        "scalar" => Ok(EstimatorKind::Scalar),
        "position-velocity" | "position_velocity" | "pv" => Ok(EstimatorKind::PositionVelocity),
        other => Err(format!("unknown estimator '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FusionConfig::default(),
    };
    if let Some(kind) = args.estimator {
        config.estimator = kind;
    }

    println!("[{}] Fusion Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Estimator: {:?}", config.estimator);
    println!("  Source: {}", args.replay.as_ref().map_or("simulated".to_string(), |p| p.display().to_string()));
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let period = Duration::from_millis(args.interval_ms.max(1));
    let (location, orientation): (Box<dyn LocationWatch>, Option<Box<dyn OrientationWatch>>) =
        match &args.replay {
            Some(path) => {
                let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                let fixes: Vec<RawFix> = serde_json::from_reader(BufReader::new(file))?;
                println!("[{}] Loaded {} fixes", ts_now(), fixes.len());
                let location: Box<dyn LocationWatch> =
                    Box::new(ReplayLocationSource::from_fixes(fixes, period));
                (location, None)
            }
            None => {
                let location: Box<dyn LocationWatch> = Box::new(SimulatedLocationSource {
                    period,
                    ..SimulatedLocationSource::default()
                });
                let compass: Box<dyn OrientationWatch> = Box::new(SimulatedCompass::default());
                (location, Some(compass))
            }
        };

    let options = SessionOptions {
        tick_interval: (args.tick_ms > 0).then(|| Duration::from_millis(args.tick_ms)),
        record_fixes: true,
        ..SessionOptions::default()
    };
    let mut session = TrackingSession::new(config.clone(), options)?;
    let (tx, rx) = crossbeam::channel::unbounded::<PositionOutput>();
    session.subscribe(ChannelSubscriber::new(tx));
    session.start(location, orientation)?;

    let started = Instant::now();
    let mut last_status = Instant::now();
    let mut outputs = Vec::new();
    let status_path = format!("{}/live_status.json", args.output_dir);

    loop {
        if args.duration > 0 && started.elapsed().as_secs() >= args.duration {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        for out in rx.try_iter() {
            if !out.extrapolated {
                log::info!(
                    "fix {:.6}, {:.6} ±{:.1} m  {:.1} m/s  heading {}",
                    out.latitude,
                    out.longitude,
                    out.accuracy,
                    out.speed,
                    out.heading.map_or("-".to_string(), |h| format!("{:.0}°", h))
                );
            }
            outputs.push(out);
        }

        if last_status.elapsed() >= Duration::from_secs(2) {
            println!("[{}] {}", ts_now(), session.health().format_status());
            if let Err(e) = session.live_status().save(&status_path) {
                log::warn!("Failed to write {}: {}", status_path, e);
            }
            last_status = Instant::now();
        }

        tokio::select! {
            _ = sleep(Duration::from_millis(50)) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
        }
    }

    let final_status = session.live_status();
    let stats = session.with_pipeline(|p| p.stats().clone());
    let fixes = session.take_fix_log();
    session.stop().await?;
    outputs.extend(rx.try_iter());

    let status_path = format!("{}/live_status_final.json", args.output_dir);
    final_status.save(&status_path)?;

    let output = SessionOutput {
        config,
        fixes,
        outputs,
        stats,
    };
    let filename = format!("{}/session_{}.json", args.output_dir, ts_now_clean());
    std::fs::write(&filename, serde_json::to_string_pretty(&output)?)?;
    println!(
        "[{}] Saved {} fixes, {} outputs to {}",
        ts_now(),
        output.fixes.len(),
        output.outputs.len(),
        filename
    );
    println!(
        "Accepted {} / {} fixes ({} accuracy, {} drift rejections, {} re-anchors)",
        output.stats.fixes_accepted,
        output.stats.fixes_received,
        output.stats.rejected_accuracy,
        output.stats.rejected_drift,
        output.stats.reanchors
    );

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
