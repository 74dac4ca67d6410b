use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::analysis::ChunkOverlap;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub resources_dir: Option<PathBuf>,
    #[serde(default = "default_model")]
    pub path: String,
    #[serde(default)]
    pub device_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub max_files: usize,
    #[serde(default)]
    pub max_duration_minutes: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub overlap: ChunkOverlap,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            resources_dir: None,
            path: default_model(),
            device_id: None,
        }
    }
}

fn default_model() -> String { crate::model::DEFAULT_MODEL.into() }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::debug!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

/// Explicit path, then `./bpmscan.toml`, then the per-user config locations.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("bpmscan.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("bpmscan").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("bpmscan").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
