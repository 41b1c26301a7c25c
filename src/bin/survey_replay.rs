use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use flate2::read::GzDecoder;
use place_survey::records::VisitRecord;
use place_survey::storage::{JsonFilePlaceStore, PlaceStore};
use place_survey::{AveragingMode, FixLog, PlaceRecord, StabilizationEngine, StabilizerConfig};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "survey_replay")]
#[command(about = "Replay a recorded GPS fix log through the stabilization engine", long_about = None)]
struct Args {
    /// Path to a fix log (.json or .json.gz) of the form {"fixes": [...]}
    #[arg(long)]
    log: PathBuf,

    /// Stabilizer config JSON; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Consecutive near-duplicate fixes required per stable point
    #[arg(long)]
    required: Option<u32>,

    /// Fix-to-fix movement threshold in meters
    #[arg(long)]
    threshold: Option<f64>,

    /// Average stable points on the sphere instead of the planar degree mean
    #[arg(long, default_value_t = false)]
    spherical: bool,

    /// Save the resulting mean location as a new place with this name
    #[arg(long, requires = "store")]
    save_as: Option<String>,

    /// JSON place store used by --save-as
    #[arg(long)]
    store: Option<PathBuf>,

    /// Device label recorded on the founding visit
    #[arg(long, default_value = "unknown")]
    device: String,
}

fn load_log(path: &Path) -> anyhow::Result<FixLog> {
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

fn build_config(args: &Args) -> anyhow::Result<StabilizerConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => StabilizerConfig::from_json_file(path)?,
        None => StabilizerConfig::default(),
    };
    if let Some(required) = args.required {
        config.required_stability_count = required;
    }
    if let Some(threshold) = args.threshold {
        config.stability_distance_threshold_meters = threshold;
    }
    if args.spherical {
        config.averaging = AveragingMode::Spherical;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = build_config(&args)?;
    let log = load_log(&args.log)?;
    log::info!("Replaying {} fixes from {}", log.len(), args.log.display());
    let skipped = log.out_of_range_count();
    if skipped > 0 {
        log::warn!("{} fixes are outside coordinate bounds and will be ignored", skipped);
    }

    let mut engine = StabilizationEngine::with_config(config)?;
    let mut last_received_at = None;
    for fix in log.fixes.iter().filter(|f| f.coordinate.is_valid()) {
        engine.ingest(fix);
        last_received_at = Some(fix.received_at);
    }

    let snapshot = engine.snapshot();
    let mut saved_place = None;

    if let (Some(name), Some(store_path)) = (args.save_as.as_ref(), args.store.as_ref()) {
        let mean = match engine.mean_location() {
            Some(mean) => mean,
            None => anyhow::bail!("No stable location yet, nothing to save"),
        };
        let observed_at = last_received_at.unwrap_or_else(place_survey::fix_receiver::unix_now);
        let record = PlaceRecord::new(name, VisitRecord::new(&args.device, observed_at, mean))?;
        let mut store = JsonFilePlaceStore::new(store_path);
        store.save(&record)?;
        saved_place = Some(record.id().to_string());
    }

    let output = json!({
        "log": args.log.display().to_string(),
        "config": engine.config(),
        "snapshot": snapshot,
        "stable_locations": engine.stable_locations(),
        "saved_place": saved_place,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
