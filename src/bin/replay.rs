use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

use position_fusion_rs::geodesy::haversine_distance;
use position_fusion_rs::{
    EstimatorKind, FusionConfig, FusionEvent, OrientationSample, PositionFusionPipeline, RawFix,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a session_*.json[.gz] or readings log
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of golden logs to batch replay (processes *.json[.gz])
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// JSON file with fusion tunables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override drift jump threshold (meters)
    #[arg(long)]
    max_jump: Option<f64>,

    /// Override smoothing window size
    #[arg(long)]
    window: Option<usize>,

    /// Override measurement noise std (meters)
    #[arg(long)]
    measurement_noise: Option<f64>,

    /// Weight measurement noise by each fix's accuracy (A/B testing)
    #[arg(long, default_value_t = false)]
    accuracy_weighted: bool,
}

#[derive(Deserialize)]
struct Reading {
    #[serde(default)]
    fix: Option<RawFix>,
    #[serde(default)]
    orientation: Option<OrientationSample>,
}

/// Either a recorded readings stream (fixes interleaved with compass samples)
/// or a session file saved by the tracker (fixes only).
#[derive(Deserialize)]
struct LogFile {
    #[serde(default)]
    readings: Vec<Reading>,
    #[serde(default)]
    fixes: Vec<RawFix>,
}

impl LogFile {
    fn into_readings(self) -> Vec<Reading> {
        if self.readings.is_empty() {
            self.fixes
                .into_iter()
                .map(|fix| Reading {
                    fix: Some(fix),
                    orientation: None,
                })
                .collect()
        } else {
            self.readings
        }
    }
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn base_config(args: &Args) -> anyhow::Result<FusionConfig> {
    let mut config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    if let Some(max_jump) = args.max_jump {
        config.max_jump_m = max_jump;
    }
    if let Some(window) = args.window {
        config.smoothing_window = window;
    }
    if let Some(noise) = args.measurement_noise {
        config.measurement_noise_m = noise;
    }
    config.accuracy_weighted_noise |= args.accuracy_weighted;
    config.validate()?;
    Ok(config)
}

fn path_length(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(w[0].0, w[0].1, w[1].0, w[1].1))
        .sum()
}

fn run_estimator(
    readings: &[Reading],
    config: &FusionConfig,
    kind: EstimatorKind,
) -> anyhow::Result<serde_json::Value> {
    let mut pipeline = PositionFusionPipeline::new(FusionConfig {
        estimator: kind,
        ..config.clone()
    })?;

    let mut raw_track = Vec::new();
    let mut fused_track = Vec::new();
    let mut residuals = Vec::new();
    let mut skipped_predictions = 0u64;
    let mut skipped_corrections = 0u64;

    for r in readings {
        if let Some(sample) = r.orientation.as_ref() {
            pipeline.feed_orientation(sample);
        }
        let Some(fix) = r.fix.as_ref() else {
            continue;
        };

        let events = pipeline.feed_fix(fix);
        for event in &events {
            match event {
                FusionEvent::PredictionSkipped { .. } => skipped_predictions += 1,
                FusionEvent::CorrectionSkipped => skipped_corrections += 1,
                FusionEvent::Reanchored { distance_m } => {
                    println!("[REANCHOR] t={} jump {:.0} m", fix.timestamp, distance_m);
                }
                _ => {}
            }
        }

        if events.iter().any(FusionEvent::is_rejection) {
            continue;
        }
        if let Some(out) = pipeline.last_output() {
            raw_track.push((fix.latitude, fix.longitude));
            fused_track.push((out.latitude, out.longitude));
            residuals.push(haversine_distance(
                fix.latitude,
                fix.longitude,
                out.latitude,
                out.longitude,
            ));
        }
    }

    let stats = pipeline.stats();
    let mean_residual = if residuals.is_empty() {
        0.0
    } else {
        residuals.iter().sum::<f64>() / residuals.len() as f64
    };
    let max_residual = residuals.iter().copied().fold(0.0_f64, f64::max);

    Ok(json!({
        "estimator": kind,
        "fixes_received": stats.fixes_received,
        "fixes_accepted": stats.fixes_accepted,
        "rejected_accuracy": stats.rejected_accuracy,
        "rejected_drift": stats.rejected_drift,
        "reanchors": stats.reanchors,
        "low_accuracy": stats.low_accuracy,
        "skipped_predictions": skipped_predictions,
        "skipped_corrections": skipped_corrections,
        "raw_path_m": path_length(&raw_track),
        "fused_path_m": path_length(&fused_track),
        "mean_residual_m": mean_residual,
        "max_residual_m": max_residual,
    }))
}

fn run_once(path: &Path, config: &FusionConfig) -> anyhow::Result<serde_json::Value> {
    let readings = load_log(path)?.into_readings();
    let mut variants = Vec::new();
    for kind in [EstimatorKind::Scalar, EstimatorKind::PositionVelocity] {
        variants.push(run_estimator(&readings, config, kind)?);
    }

    Ok(json!({
        "log": path.display().to_string(),
        "readings": readings.len(),
        "max_jump_m": config.max_jump_m,
        "smoothing_window": config.smoothing_window,
        "measurement_noise_m": config.measurement_noise_m,
        "accuracy_weighted_noise": config.accuracy_weighted_noise,
        "variants": variants,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = base_config(&args)?;
    let mut results = Vec::new();

    if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".json") || name.ends_with(".json.gz")
            })
            .collect();
        paths.sort();
        for path in paths {
            match run_once(&path, &config) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config)?);
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
