use thiserror::Error;

/// Failure of the activation model collaborator.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no model loaded")]
    NotLoaded,
    #[error("inference failed: {0}")]
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    Runtime(String),
    #[error("model returned {actual} activations for {expected} frames")]
    OutputTooShort { expected: usize, actual: usize },
    #[error("{0}")]
    Unsupported(String),
}

/// Everything that can stop a single tempo estimate.
///
/// None of these cross the pipeline boundary: `EstimationPipeline::estimate`
/// logs them and reports an absent result instead.
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("activation curve has {len} frames, needs more than {min_lag}")]
    CurveTooShort { len: usize, min_lag: usize },
    #[error("numeric error: {0}")]
    Numeric(String),
    #[error("invalid analysis parameters: {0}")]
    InvalidParams(String),
}
