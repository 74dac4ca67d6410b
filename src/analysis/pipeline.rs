use std::path::Path;
use std::time::{Duration, Instant};

use super::activation::{self, ActivationModel};
use super::mel::FeatureExtractor;
use super::progress::{self, ProgressFn, ProgressReporter};
use super::tempo;
use super::AnalysisParams;
use crate::audio::{convert, decode};
use crate::error::{EstimationError, ModelError};

/// Mono PCM -> log-mel frames -> activation curve -> BPM.
///
/// Phases run strictly one after another. Every failure is logged and turned
/// into `None` at this boundary.
pub struct EstimationPipeline {
    params: AnalysisParams,
    extractor: FeatureExtractor,
    max_duration: Option<Duration>,
}

impl EstimationPipeline {
    pub fn new(params: AnalysisParams) -> Result<Self, EstimationError> {
        params.validate()?;
        let extractor = FeatureExtractor::new(&params);
        Ok(Self {
            params,
            extractor,
            max_duration: None,
        })
    }

    /// Files longer than `limit` are rejected after decoding.
    pub fn with_max_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_duration = limit;
        self
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    /// Estimates the tempo of mono samples already at the target sample rate.
    #[allow(dead_code)]
    pub fn estimate(
        &self,
        samples: &[f32],
        sample_rate: u32,
        model: Option<&mut dyn ActivationModel>,
        progress: Option<ProgressFn<'_>>,
    ) -> Option<f64> {
        let reporter = ProgressReporter::new(progress);
        let result = model
            .ok_or(EstimationError::Model(ModelError::NotLoaded))
            .and_then(|model| {
                reporter.report(progress::PREPARED);
                self.try_estimate(samples, sample_rate, model, &reporter)
            });
        match result {
            Ok(bpm) => Some(bpm),
            Err(err) => {
                log::warn!("Tempo estimation failed: {}", err);
                None
            }
        }
    }

    pub fn try_estimate(
        &self,
        samples: &[f32],
        sample_rate: u32,
        model: &mut dyn ActivationModel,
        reporter: &ProgressReporter<'_>,
    ) -> Result<f64, EstimationError> {
        if sample_rate != self.params.sample_rate {
            return Err(EstimationError::Input(format!(
                "expected {}Hz mono samples, got {}Hz",
                self.params.sample_rate, sample_rate
            )));
        }

        let spectrogram = self
            .extractor
            .extract(samples, sample_rate, &reporter.phase(progress::FEATURES))?;

        let curve = activation::infer(
            &spectrogram,
            model,
            &self.params,
            &reporter.phase(progress::INFERENCE),
        )?;
        drop(spectrogram);

        let bpm = tempo::estimate(
            &curve,
            self.params.hop,
            sample_rate,
            &reporter.phase(progress::TEMPO),
        )?;
        reporter.report(1.0);
        Ok(bpm)
    }

    /// Decodes `path`, converts it to mono at the target rate and estimates
    /// its tempo. The decoded buffer lives only for the duration of this call.
    pub fn estimate_file(
        &self,
        path: &Path,
        model: Option<&mut dyn ActivationModel>,
        progress: Option<ProgressFn<'_>>,
    ) -> Option<f64> {
        let started = Instant::now();
        let reporter = ProgressReporter::new(progress);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match self.try_estimate_file(path, model, &reporter) {
            Ok(bpm) => {
                log::info!(
                    "{}: {:.3} BPM ({:.3}s)",
                    name,
                    bpm,
                    started.elapsed().as_secs_f64()
                );
                Some(bpm)
            }
            Err(err) => {
                log::warn!("{}: estimation failed: {}", name, err);
                None
            }
        }
    }

    fn try_estimate_file(
        &self,
        path: &Path,
        model: Option<&mut dyn ActivationModel>,
        reporter: &ProgressReporter<'_>,
    ) -> Result<f64, EstimationError> {
        let model = model.ok_or(ModelError::NotLoaded)?;

        let decoded = decode::decode_audio(path)
            .map_err(|e| EstimationError::Input(format!("{:#}", e)))?;
        if let Some(limit) = self.max_duration {
            let duration = decoded.duration_secs();
            if duration > limit.as_secs_f64() {
                return Err(EstimationError::Input(format!(
                    "duration {:.1}s exceeds limit of {:.1}s",
                    duration,
                    limit.as_secs_f64()
                )));
            }
        }

        let audio = convert::to_mono(decoded, self.params.sample_rate)
            .map_err(|e| EstimationError::Input(format!("{:#}", e)))?;
        reporter.report(progress::PREPARED);

        self.try_estimate(&audio.samples, audio.sample_rate, model, reporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ChunkOverlap;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::sync::Mutex;
    use tempfile::tempdir;

    const SR: u32 = 22050;

    /// Onset-strength stand-in for the network: rise in mean log-mel energy
    /// from one frame to the next, one value per frame.
    struct OnsetModel {
        calls: usize,
    }

    impl ActivationModel for OnsetModel {
        fn run(&mut self, input: &[f32], shape: [usize; 3]) -> Result<Vec<f32>, ModelError> {
            self.calls += 1;
            let energy: Vec<f32> = input
                .chunks(shape[2])
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect();
            let mut out = vec![0.0f32; shape[1]];
            for i in 1..energy.len() {
                out[i] = (energy[i] - energy[i - 1]).max(0.0);
            }
            Ok(out)
        }
    }

    struct BrokenModel;

    impl ActivationModel for BrokenModel {
        fn run(&mut self, _input: &[f32], _shape: [usize; 3]) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::Runtime("session crashed".into()))
        }
    }

    /// Quiet 440 Hz tone with a short 3 kHz click every `interval` seconds.
    fn click_track(seconds: usize, interval: f64) -> Vec<f32> {
        let len = SR as usize * seconds;
        let mut samples: Vec<f32> = (0..len)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SR as f32).sin())
            .collect();
        let step = (interval * SR as f64).round() as usize;
        for onset in (0..len).step_by(step) {
            for j in 0..256.min(len - onset) {
                let t = j as f32;
                samples[onset + j] += 0.8
                    * (-t / 32.0).exp()
                    * (2.0 * std::f32::consts::PI * 3000.0 * t / SR as f32).sin();
            }
        }
        samples
    }

    fn pipeline() -> EstimationPipeline {
        EstimationPipeline::new(AnalysisParams::default()).unwrap()
    }

    #[test]
    fn click_track_at_120_bpm() {
        let samples = click_track(30, 0.5);
        let mut model = OnsetModel { calls: 0 };
        let bpm = pipeline()
            .estimate(&samples, SR, Some(&mut model), None)
            .unwrap();
        assert!((bpm - 120.0).abs() <= 2.0, "estimated {}", bpm);
        assert_eq!(model.calls, 2);
    }

    #[test]
    fn trimmed_overlap_also_finds_120() {
        let params = AnalysisParams {
            overlap: ChunkOverlap::Trim,
            ..AnalysisParams::default()
        };
        let pipeline = EstimationPipeline::new(params).unwrap();
        let samples = click_track(30, 0.5);
        let bpm = pipeline
            .estimate(&samples, SR, Some(&mut OnsetModel { calls: 0 }), None)
            .unwrap();
        assert!((bpm - 120.0).abs() <= 2.0, "estimated {}", bpm);
    }

    #[test]
    fn progress_is_monotonic_and_complete() {
        let samples = click_track(30, 0.5);
        let seen = Mutex::new(Vec::new());
        let sink = |p: f64| seen.lock().unwrap().push(p);
        let bpm = pipeline().estimate(&samples, SR, Some(&mut OnsetModel { calls: 0 }), Some(&sink));
        assert!(bpm.is_some());

        let seen = seen.into_inner().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(seen.first().copied(), Some(0.10));
        assert_eq!(seen.last().copied(), Some(1.0));
        assert!(seen.contains(&0.40));
        assert!(seen.contains(&0.70));
    }

    #[test]
    fn missing_model_is_absent() {
        let samples = click_track(2, 0.5);
        assert_eq!(pipeline().estimate(&samples, SR, None, None), None);
    }

    #[test]
    fn failing_model_is_absent() {
        let samples = click_track(2, 0.5);
        assert_eq!(
            pipeline().estimate(&samples, SR, Some(&mut BrokenModel), None),
            None
        );
    }

    #[test]
    fn empty_and_mismatched_input_is_absent() {
        let mut model = OnsetModel { calls: 0 };
        assert_eq!(pipeline().estimate(&[], SR, Some(&mut model), None), None);
        assert_eq!(
            pipeline().estimate(&[0.1; 44100], 44100, Some(&mut model), None),
            None
        );
        assert_eq!(model.calls, 0);
    }

    #[test]
    fn too_short_audio_is_absent() {
        // 1000 samples -> 2 frames -> curve far below the minimum lag.
        let mut model = OnsetModel { calls: 0 };
        let reporter = ProgressReporter::new(None);
        let result = pipeline().try_estimate(&[0.2; 1000], SR, &mut model, &reporter);
        assert!(matches!(result, Err(EstimationError::CurveTooShort { len: 2, .. })));
    }

    fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            for _ in 0..channels {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn estimates_stereo_wav_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clicks.wav");
        write_wav(&path, &click_track(30, 0.5), SR, 2);

        let bpm = pipeline()
            .estimate_file(&path, Some(&mut OnsetModel { calls: 0 }), None)
            .unwrap();
        assert!((bpm - 120.0).abs() <= 2.0, "estimated {}", bpm);
    }

    #[test]
    fn duration_limit_rejects_long_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, &click_track(5, 0.5), SR, 1);

        let limited = pipeline().with_max_duration(Some(Duration::from_secs(2)));
        assert_eq!(
            limited.estimate_file(&path, Some(&mut OnsetModel { calls: 0 }), None),
            None
        );
    }

    #[test]
    fn unreadable_file_is_absent() {
        let dir = tempdir().unwrap();
        assert_eq!(
            pipeline().estimate_file(
                &dir.path().join("missing.flac"),
                Some(&mut OnsetModel { calls: 0 }),
                None
            ),
            None
        );
    }
}
