use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::analysis::pipeline::EstimationPipeline;
use crate::model::ModelHost;

const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];

/// Tempo result for one file; `bpm` is `None` when estimation failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanResult {
    pub path: PathBuf,
    pub bpm: Option<f64>,
}

pub fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Supported audio files under `dir`, recursively, sorted by path.
pub fn discover_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_audio(dir, &mut files)?;
    files.sort();
    for file in &files {
        log::debug!("Found audio file: {}", file.display());
    }
    Ok(files)
}

fn collect_audio(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_audio(&path, out)?;
        } else if is_supported_audio(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Paths to scan: explicit inputs plus `directory`. With neither given, the
/// current directory is scanned.
pub fn scan_roots(inputs: &[PathBuf], directory: Option<&Path>) -> Vec<PathBuf> {
    let mut roots = inputs.to_vec();
    roots.extend(directory.map(Path::to_path_buf));
    if roots.is_empty() {
        log::info!("No inputs given, scanning the current directory");
        roots.push(PathBuf::from("."));
    }
    roots
}

/// Expands a mix of files and directories into a de-duplicated file list,
/// keeping first-seen order, truncated to `max_files` when non-zero.
pub fn collect_inputs(inputs: &[PathBuf], max_files: usize) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for input in inputs {
        let found = if input.is_dir() {
            discover_audio_files(input)?
        } else if input.is_file() {
            vec![input.clone()]
        } else {
            log::warn!("Skipping missing input: {}", input.display());
            continue;
        };
        for file in found {
            if !files.contains(&file) {
                files.push(file);
            }
        }
    }
    if max_files > 0 && files.len() > max_files {
        log::info!("Limiting scan to {} of {} files", max_files, files.len());
        files.truncate(max_files);
    }
    Ok(files)
}

/// Estimates every file in order, one at a time.
///
/// A failed file yields `bpm: None` and the batch moves on. `on_progress`
/// receives the file index and that file's progress in `[0, 1]`.
pub fn run_batch(
    pipeline: &EstimationPipeline,
    files: &[PathBuf],
    host: &mut ModelHost,
    on_progress: &(dyn Fn(usize, f64) + Sync),
) -> Vec<ScanResult> {
    let mut results = Vec::with_capacity(files.len());
    for (index, path) in files.iter().enumerate() {
        let report = |p: f64| on_progress(index, p);
        let bpm = pipeline.estimate_file(path, host.model_mut(), Some(&report));
        results.push(ScanResult {
            path: path.clone(),
            bpm,
        });
        log::debug!("Processed {}/{} files", index + 1, files.len());
    }
    results
}
