pub mod activation;
pub mod mel;
pub mod pipeline;
pub mod progress;
pub mod tempo;

use serde::{Deserialize, Serialize};

use crate::error::EstimationError;

/// Sample rate the activation model was trained on.
pub const TARGET_SAMPLE_RATE: u32 = 22050;

/// How overlapping chunk outputs are stitched into one activation curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOverlap {
    /// Append every chunk's full output, overlaps included.
    #[default]
    Append,
    /// Append only activations for frames no earlier chunk covered.
    Trim,
}

/// Fixed analysis constants shared by feature extraction, chunking and tempo
/// estimation. They must match what the activation model was trained with.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisParams {
    pub n_fft: usize,
    pub hop: usize,
    pub n_mels: usize,
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub chunk_hop: usize,
    pub overlap: ChunkOverlap,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop: 512,
            n_mels: 128,
            sample_rate: TARGET_SAMPLE_RATE,
            chunk_size: 1024,
            chunk_hop: 512,
            overlap: ChunkOverlap::Append,
        }
    }
}

impl AnalysisParams {
    pub fn fft_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn validate(&self) -> Result<(), EstimationError> {
        let invalid = |msg: &str| Err(EstimationError::InvalidParams(msg.to_string()));
        if self.n_fft < 2 || self.n_fft % 2 != 0 {
            return invalid("n_fft must be an even number >= 2");
        }
        if self.hop == 0 {
            return invalid("hop must be > 0");
        }
        if self.n_mels == 0 {
            return invalid("n_mels must be > 0");
        }
        if self.sample_rate == 0 {
            return invalid("sample_rate must be > 0");
        }
        if self.chunk_size == 0 || self.chunk_hop == 0 {
            return invalid("chunk_size and chunk_hop must be > 0");
        }
        if self.chunk_hop > self.chunk_size {
            return invalid("chunk_hop must not exceed chunk_size");
        }
        Ok(())
    }
}
