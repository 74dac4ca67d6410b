use super::mel::MelSpectrogram;
use super::progress::Phase;
use super::{AnalysisParams, ChunkOverlap};
use crate::error::{EstimationError, ModelError};

/// A beat-activation network behind some inference runtime.
///
/// `input` is a row-major tensor of `shape = [1, frames, n_mels]`; the returned
/// sequence holds at least one activation per frame. Taking `&mut self` keeps
/// calls against one loaded model strictly one at a time.
pub trait ActivationModel {
    fn run(&mut self, input: &[f32], shape: [usize; 3]) -> Result<Vec<f32>, ModelError>;
}

/// One model call's window over the spectrogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub start: usize,
    pub len: usize,
}

/// Windows of `chunk_size` frames every `chunk_hop` frames, ending with the
/// first window that reaches `total_frames`.
pub fn chunk_plan(total_frames: usize, chunk_size: usize, chunk_hop: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total_frames {
        let len = chunk_size.min(total_frames - start);
        chunks.push(Chunk { start, len });
        if total_frames - start <= chunk_size {
            break;
        }
        start += chunk_hop;
    }
    chunks
}

/// Streams the spectrogram through `model` chunk by chunk and stitches the
/// outputs into one activation curve.
pub fn infer(
    spectrogram: &MelSpectrogram,
    model: &mut dyn ActivationModel,
    params: &AnalysisParams,
    progress: &Phase<'_, '_>,
) -> Result<Vec<f32>, EstimationError> {
    let total_frames = spectrogram.total_frames();
    let n_mels = spectrogram.n_mels();
    let plan = chunk_plan(total_frames, params.chunk_size, params.chunk_hop);

    let mut curve: Vec<f32> = Vec::with_capacity(total_frames * 2);
    // First frame not yet represented in the curve (only used when trimming).
    let mut covered = 0usize;

    for chunk in &plan {
        let input = spectrogram.frames(chunk.start, chunk.len);
        let output = model.run(input, [1, chunk.len, n_mels])?;
        if output.len() < chunk.len {
            return Err(ModelError::OutputTooShort {
                expected: chunk.len,
                actual: output.len(),
            }
            .into());
        }

        match params.overlap {
            ChunkOverlap::Append => curve.extend_from_slice(&output),
            ChunkOverlap::Trim => {
                let skip = covered.saturating_sub(chunk.start).min(chunk.len);
                curve.extend_from_slice(&output[skip..chunk.len]);
                covered = chunk.start + chunk.len;
            }
        }

        progress.report(chunk.start as f64 / total_frames as f64);
    }
    progress.finish();

    log::debug!(
        "Inference: {} chunks over {} frames -> {} activations",
        plan.len(),
        total_frames,
        curve.len()
    );

    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::mel::FeatureExtractor;
    use crate::analysis::progress::{ProgressReporter, FEATURES, INFERENCE};

    /// Emits the frame's mean value, one activation per frame.
    struct MeanModel {
        calls: Vec<[usize; 3]>,
    }

    impl ActivationModel for MeanModel {
        fn run(&mut self, input: &[f32], shape: [usize; 3]) -> Result<Vec<f32>, ModelError> {
            self.calls.push(shape);
            Ok(input
                .chunks(shape[2])
                .map(|f| f.iter().sum::<f32>() / f.len() as f32)
                .collect())
        }
    }

    struct ShortModel;

    impl ActivationModel for ShortModel {
        fn run(&mut self, _input: &[f32], shape: [usize; 3]) -> Result<Vec<f32>, ModelError> {
            Ok(vec![0.0; shape[1] - 1])
        }
    }

    struct FailingModel;

    impl ActivationModel for FailingModel {
        fn run(&mut self, _input: &[f32], _shape: [usize; 3]) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::Runtime("device lost".into()))
        }
    }

    fn spectrogram(samples: usize) -> MelSpectrogram {
        let params = AnalysisParams::default();
        let signal: Vec<f32> = (0..samples).map(|i| ((i % 97) as f32 / 97.0) - 0.5).collect();
        let reporter = ProgressReporter::new(None);
        FeatureExtractor::new(&params)
            .extract(&signal, params.sample_rate, &reporter.phase(FEATURES))
            .unwrap()
    }

    fn expected_iterations(total: usize) -> usize {
        if total <= 1024 {
            1
        } else {
            (total - 1024).div_ceil(512) + 1
        }
    }

    #[test]
    fn chunk_count_matches_formula() {
        for total in [1usize, 5, 1023, 1024, 1025, 1536, 1537, 2048, 5000, 10_000] {
            let plan = chunk_plan(total, 1024, 512);
            assert_eq!(plan.len(), expected_iterations(total), "total={}", total);
            let last = plan.last().unwrap();
            assert_eq!(last.start + last.len, total);
        }
    }

    #[test]
    fn chunks_are_bounded_and_hop_aligned() {
        let plan = chunk_plan(3000, 1024, 512);
        assert_eq!(
            plan,
            vec![
                Chunk { start: 0, len: 1024 },
                Chunk { start: 512, len: 1024 },
                Chunk { start: 1024, len: 1024 },
                Chunk { start: 1536, len: 1024 },
                Chunk { start: 2048, len: 952 },
            ]
        );
    }

    #[test]
    fn empty_spectrogram_has_no_chunks() {
        assert!(chunk_plan(0, 1024, 512).is_empty());
    }

    #[test]
    fn append_keeps_overlapping_outputs() {
        // 30 s at 22050 Hz -> 1292 frames -> chunks of 1024 and 780.
        let spec = spectrogram(22050 * 30);
        assert_eq!(spec.total_frames(), 1292);
        let mut model = MeanModel { calls: Vec::new() };
        let reporter = ProgressReporter::new(None);
        let curve = infer(
            &spec,
            &mut model,
            &AnalysisParams::default(),
            &reporter.phase(INFERENCE),
        )
        .unwrap();

        assert_eq!(model.calls, vec![[1, 1024, 128], [1, 780, 128]]);
        assert_eq!(curve.len(), 1024 + 780);
        // The second chunk restarts at frame 512.
        assert_eq!(curve[1024], curve[512]);
    }

    #[test]
    fn trim_yields_one_activation_per_frame() {
        let spec = spectrogram(22050 * 30);
        let mut model = MeanModel { calls: Vec::new() };
        let params = AnalysisParams {
            overlap: ChunkOverlap::Trim,
            ..AnalysisParams::default()
        };
        let reporter = ProgressReporter::new(None);
        let curve = infer(&spec, &mut model, &params, &reporter.phase(INFERENCE)).unwrap();

        assert_eq!(curve.len(), spec.total_frames());
        for (i, value) in curve.iter().enumerate() {
            let frame = spec.frame(i);
            let mean = frame.iter().sum::<f32>() / frame.len() as f32;
            assert_eq!(*value, mean);
        }
    }

    #[test]
    fn short_model_output_is_fatal() {
        let spec = spectrogram(22050);
        let reporter = ProgressReporter::new(None);
        let result = infer(
            &spec,
            &mut ShortModel,
            &AnalysisParams::default(),
            &reporter.phase(INFERENCE),
        );
        assert!(matches!(
            result,
            Err(EstimationError::Model(ModelError::OutputTooShort { .. }))
        ));
    }

    #[test]
    fn model_failure_propagates() {
        let spec = spectrogram(22050);
        let reporter = ProgressReporter::new(None);
        let result = infer(
            &spec,
            &mut FailingModel,
            &AnalysisParams::default(),
            &reporter.phase(INFERENCE),
        );
        assert!(matches!(
            result,
            Err(EstimationError::Model(ModelError::Runtime(_)))
        ));
    }
}
