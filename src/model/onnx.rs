use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;

use super::ModelOptions;
use crate::analysis::activation::ActivationModel;
use crate::error::ModelError;

/// Beat-activation network executed by ONNX Runtime.
///
/// The spectrogram chunk is bound to the model's first declared input and the
/// first output is read back as a flat activation sequence.
pub struct OnnxActivationModel {
    session: Session,
    input_name: String,
}

impl OnnxActivationModel {
    pub fn load(path: &Path, options: &ModelOptions) -> Result<Self> {
        let builder = Session::builder()
            .context("Failed to create ONNX session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;

        #[cfg(feature = "directml")]
        let builder = {
            use ort::execution_providers::DirectMLExecutionProvider;
            let device_id = options.device_id.unwrap_or(0);
            log::info!("Registering DirectML execution provider: [{}]", device_id);
            // Registration failure is logged by ort and the CPU provider takes over.
            builder.with_execution_providers([DirectMLExecutionProvider::default()
                .with_device_id(device_id)
                .build()])?
        };
        #[cfg(not(feature = "directml"))]
        if let Some(device_id) = options.device_id {
            log::warn!(
                "Ignoring device {}: built without the 'directml' feature, using CPU",
                device_id
            );
        }

        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("Failed to load ONNX model: {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;
        if session.outputs.is_empty() {
            anyhow::bail!("Model declares no outputs: {}", path.display());
        }

        log::info!(
            "ONNX model ready: {} (input '{}', {} outputs)",
            path.display(),
            input_name,
            session.outputs.len()
        );

        Ok(Self {
            session,
            input_name,
        })
    }
}

fn runtime(err: ort::Error) -> ModelError {
    ModelError::Runtime(err.to_string())
}

impl ActivationModel for OnnxActivationModel {
    fn run(&mut self, input: &[f32], shape: [usize; 3]) -> Result<Vec<f32>, ModelError> {
        let tensor = Tensor::from_array((shape, input.to_vec())).map_err(runtime)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(runtime)?;
        let (_, activations) = outputs[0].try_extract_tensor::<f32>().map_err(runtime)?;
        Ok(activations.to_vec())
    }
}
