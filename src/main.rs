mod analysis;
mod audio;
mod cli;
mod config;
mod error;
mod model;
mod scan;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::{Duration, Instant};

use analysis::pipeline::EstimationPipeline;
use analysis::{AnalysisParams, ChunkOverlap};
use cli::{Cli, OutputFormat};
use model::{ModelHost, ModelOptions};
use scan::ScanResult;

/// Progress bar steps per file.
const STEPS_PER_FILE: u64 = 1000;

fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    // Load config: explicit --config path, or auto-detect bpmscan.toml / global config
    if let Some(ref path) = config::find_config(cli.config.as_deref()) {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.model == model::DEFAULT_MODEL { cli.model = cfg.model.path; }
            if cli.resources.is_none() { cli.resources = cfg.model.resources_dir; }
            if cli.device.is_none() { cli.device = cfg.model.device_id; }
            if cli.directory.is_none() { cli.directory = cfg.scan.directory; }
            if cli.inputs.is_empty() { cli.inputs = cfg.scan.files; }
            if cli.max_files == 0 { cli.max_files = cfg.scan.max_files; }
            if cli.max_duration == 0.0 { cli.max_duration = cfg.scan.max_duration_minutes; }
            if cli.overlap == ChunkOverlap::Append { cli.overlap = cfg.analysis.overlap; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let resources = cli.resources.clone().unwrap_or_else(model::find_resources_dir);

    // List models mode
    if cli.list_models {
        let models = model::discover_models(&resources)?;
        println!("Models in {}:", resources.display());
        if models.is_empty() {
            println!("  (none)");
        }
        for path in &models {
            println!("  {}", path.display());
        }
        return Ok(());
    }

    if let Some(ref dir) = cli.directory {
        if !dir.is_dir() {
            anyhow::bail!("Directory not found: {}", dir.display());
        }
    }
    let inputs = scan::scan_roots(&cli.inputs, cli.directory.as_deref());
    let files = scan::collect_inputs(&inputs, cli.max_files)?;
    if files.is_empty() {
        anyhow::bail!("No audio files found in {:?}", inputs);
    }

    log::info!("bpmscan - neural tempo estimation");
    log::info!("Files: {}", files.len());
    log::info!("Overlap: {:?}", cli.overlap);

    // 1. Load model
    let model_path = model::resolve_model_path(&cli.model, &resources)?;
    let options = ModelOptions {
        device_id: cli.device,
    };
    if let Some(device) = options.device_id {
        log::info!("Requested device: {}", device);
    }
    let mut host = ModelHost::new();
    host.load(&model_path, &options)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;
    if host.is_loaded() {
        log::info!("Loaded model: {}", model_path.display());
    }

    // 2. Build pipeline
    let params = AnalysisParams {
        overlap: cli.overlap,
        ..AnalysisParams::default()
    };
    let max_duration = if cli.max_duration > 0.0 {
        let limit = Duration::try_from_secs_f64(cli.max_duration * 60.0)
            .context("Invalid --max-duration")?;
        log::info!("Max duration: {:.1} min", cli.max_duration);
        Some(limit)
    } else {
        None
    };
    let pipeline = EstimationPipeline::new(params)?.with_max_duration(max_duration);
    log::debug!("Analysis parameters: {:?}", pipeline.params());

    // 3. Scan
    let pb = ProgressBar::new(files.len() as u64 * STEPS_PER_FILE);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );

    let total = files.len();
    let on_progress = |index: usize, fraction: f64| {
        let step = (fraction.clamp(0.0, 1.0) * STEPS_PER_FILE as f64) as u64;
        pb.set_position(index as u64 * STEPS_PER_FILE + step);
        pb.set_message(format!("file {}/{}", index + 1, total));
    };

    let started = Instant::now();
    let results = scan::run_batch(&pipeline, &files, &mut host, &on_progress);
    pb.finish_with_message("Scan complete");

    let failed = results.iter().filter(|r| r.bpm.is_none()).count();
    log::info!(
        "Scanned {} files in {:.1}s ({} failed)",
        results.len(),
        started.elapsed().as_secs_f64(),
        failed
    );

    print_results(&results, cli.format, host.loaded_path())?;

    host.unload();
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_results(results: &[ScanResult], format: OutputFormat, model: Option<&Path>) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for result in results {
                match result.bpm {
                    Some(bpm) => println!("{}: {:.3} BPM", display_name(&result.path), bpm),
                    None => println!("{}: Estimation failed", display_name(&result.path)),
                }
            }
        }
        OutputFormat::Json => {
            let report = serde_json::json!({
                "model": model,
                "results": results,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
