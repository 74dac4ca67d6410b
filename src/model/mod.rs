#[cfg(feature = "onnx")]
pub mod onnx;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::analysis::activation::ActivationModel;
#[cfg(not(feature = "onnx"))]
use crate::error::ModelError;

/// Selects the first discovered model instead of an explicit path.
pub const DEFAULT_MODEL: &str = "default";

/// Runtime options for loading a model.
#[derive(Clone, Debug, Default)]
pub struct ModelOptions {
    /// GPU adapter index for the DirectML execution provider.
    pub device_id: Option<i32>,
}

/// Owns the currently loaded activation model.
///
/// Loading replaces whatever was loaded before; the estimation pipeline only
/// ever borrows the model for the duration of one file.
#[derive(Default)]
pub struct ModelHost {
    model: Option<Box<dyn ActivationModel + Send>>,
    loaded_path: Option<PathBuf>,
}

impl ModelHost {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "onnx")]
    pub fn load(&mut self, path: &Path, options: &ModelOptions) -> Result<()> {
        if !path.is_file() {
            anyhow::bail!("Model file not found: {}", path.display());
        }
        let model = onnx::OnnxActivationModel::load(path, options)?;
        let full_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.install(full_path, Box::new(model));
        Ok(())
    }

    #[cfg(not(feature = "onnx"))]
    pub fn load(&mut self, path: &Path, _options: &ModelOptions) -> Result<()> {
        Err(ModelError::Unsupported(
            "ONNX inference requires the 'onnx' feature. \
             Rebuild with: cargo build --features onnx"
                .into(),
        ))
        .with_context(|| format!("Cannot load {}", path.display()))
    }

    /// Takes ownership of an already constructed model.
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    pub fn install(&mut self, path: PathBuf, model: Box<dyn ActivationModel + Send>) {
        self.unload();
        log::info!("Model loaded: {}", path.display());
        self.model = Some(model);
        self.loaded_path = Some(path);
    }

    pub fn unload(&mut self) {
        if let Some(model) = self.model.take() {
            drop(model);
            if let Some(path) = self.loaded_path.take() {
                log::info!("Model disposed: {}", path.display());
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn loaded_path(&self) -> Option<&Path> {
        self.loaded_path.as_deref()
    }

    pub fn model_mut(&mut self) -> Option<&mut dyn ActivationModel> {
        match self.model.as_deref_mut() {
            Some(model) => Some(model),
            None => None,
        }
    }
}

/// All `*.onnx` files under `dir`, recursively, sorted by path.
pub fn discover_models(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut models = Vec::new();
    if dir.is_dir() {
        collect_models(dir, &mut models)?;
    }
    models.sort();
    Ok(models)
}

fn collect_models(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read model directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_models(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("onnx"))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Resolve a `--model` argument to a file.
///
/// - `"default"` picks the first model found under `resources_dir`.
/// - Anything else must be an existing file path.
pub fn resolve_model_path(input: &str, resources_dir: &Path) -> Result<PathBuf> {
    if input == DEFAULT_MODEL {
        let models = discover_models(resources_dir)?;
        return models.into_iter().next().with_context(|| {
            format!("No .onnx models found in {}", resources_dir.display())
        });
    }

    let as_path = Path::new(input);
    if as_path.is_file() {
        return Ok(as_path.to_path_buf());
    }

    let available = discover_models(resources_dir).unwrap_or_default();
    anyhow::bail!(
        "Model '{}' not found. Models in {}: {}",
        input,
        resources_dir.display(),
        if available.is_empty() {
            "(none)".to_string()
        } else {
            available
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    )
}

/// Default location of bundled models.
pub fn find_resources_dir() -> PathBuf {
    // Look relative to the executable, then fall back to manifest dir
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));

    if let Some(ref dir) = exe_dir {
        let resources = dir.join("resources");
        if resources.exists() {
            return resources;
        }
        // Check parents (for target/debug layout)
        for ancestor in dir.ancestors().skip(1).take(2) {
            let resources = ancestor.join("resources");
            if resources.exists() {
                return resources;
            }
        }
    }

    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources")
}
