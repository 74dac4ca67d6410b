use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::progress::Phase;
use super::AnalysisParams;
use crate::error::EstimationError;

/// Added to every band energy before taking the log so silence stays finite.
const LOG_EPSILON: f64 = 1e-10;

const PROGRESS_EVERY: usize = 500;

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters over the positive half of an FFT spectrum.
#[derive(Clone, Debug, PartialEq)]
pub struct MelFilterBank {
    n_mels: usize,
    fft_bins: usize,
    /// Row-major `n_mels x fft_bins`.
    weights: Vec<f32>,
    /// Half-open range of bins with non-zero weight, per band.
    spans: Vec<(usize, usize)>,
}

impl MelFilterBank {
    pub fn new(n_mels: usize, fft_bins: usize, sample_rate: u32, n_fft: usize) -> Self {
        let sr = sample_rate as f32;
        let mel_min = hz_to_mel(0.0);
        let mel_max = hz_to_mel(sr / 2.0);

        let bins: Vec<isize> = (0..n_mels + 2)
            .map(|i| {
                let mel = mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32;
                ((n_fft + 1) as f32 * mel_to_hz(mel) / sr).floor() as isize
            })
            .collect();

        let mut weights = vec![0.0f32; n_mels * fft_bins];
        for m in 1..=n_mels {
            let row = &mut weights[(m - 1) * fft_bins..m * fft_bins];
            let (left, center, right) = (bins[m - 1], bins[m], bins[m + 1]);

            // Empty ranges fall through, so a zero-width side never divides.
            for k in left..center {
                if let Some(w) = bin_mut(row, k) {
                    *w = (k - left) as f32 / (center - left) as f32;
                }
            }
            for k in center..right {
                if let Some(w) = bin_mut(row, k) {
                    *w = (right - k) as f32 / (right - center) as f32;
                }
            }
        }

        let spans = weights
            .chunks(fft_bins.max(1))
            .take(n_mels)
            .map(|row| {
                let first = row.iter().position(|&w| w != 0.0);
                let last = row.iter().rposition(|&w| w != 0.0);
                match (first, last) {
                    (Some(first), Some(last)) => (first, last + 1),
                    _ => (0, 0),
                }
            })
            .collect();

        Self {
            n_mels,
            fft_bins,
            weights,
            spans,
        }
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn fft_bins(&self) -> usize {
        self.fft_bins
    }

    pub fn row(&self, band: usize) -> &[f32] {
        &self.weights[band * self.fft_bins..(band + 1) * self.fft_bins]
    }

    /// Log-compressed band energies of one power spectrum.
    fn apply_log(&self, power: &[f64], out: &mut [f32]) {
        for (band, value) in out.iter_mut().enumerate() {
            let (start, end) = self.spans[band];
            let row = self.row(band);
            let sum: f64 = (start..end).map(|k| power[k] * row[k] as f64).sum();
            *value = (sum + LOG_EPSILON).log10() as f32;
        }
    }
}

fn bin_mut(row: &mut [f32], k: isize) -> Option<&mut f32> {
    usize::try_from(k).ok().and_then(|k| row.get_mut(k))
}

/// Dense `total_frames x n_mels` log-mel matrix, row-major.
#[derive(Clone, Debug)]
pub struct MelSpectrogram {
    data: Vec<f32>,
    total_frames: usize,
    n_mels: usize,
}

impl MelSpectrogram {
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    #[cfg(test)]
    pub fn frame(&self, index: usize) -> &[f32] {
        &self.data[index * self.n_mels..(index + 1) * self.n_mels]
    }

    /// Contiguous frames `[start, start + len)`, flattened.
    pub fn frames(&self, start: usize, len: usize) -> &[f32] {
        &self.data[start * self.n_mels..(start + len) * self.n_mels]
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Turns mono PCM into log-mel frames.
///
/// Owns the FFT plan and window, and caches one filter bank per sample rate so
/// repeated files reuse the same weights.
pub struct FeatureExtractor {
    n_fft: usize,
    fft_bins: usize,
    hop: usize,
    n_mels: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f64>>,
    banks: RwLock<HashMap<u32, Arc<MelFilterBank>>>,
}

impl FeatureExtractor {
    pub fn new(params: &AnalysisParams) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(params.n_fft);

        Self {
            n_fft: params.n_fft,
            fft_bins: params.fft_bins(),
            hop: params.hop,
            n_mels: params.n_mels,
            window: hann_window(params.n_fft),
            fft,
            banks: RwLock::new(HashMap::new()),
        }
    }

    pub fn filter_bank(&self, sample_rate: u32) -> Arc<MelFilterBank> {
        if let Ok(banks) = self.banks.read() {
            if let Some(bank) = banks.get(&sample_rate) {
                return Arc::clone(bank);
            }
        }

        let bank = Arc::new(MelFilterBank::new(
            self.n_mels,
            self.fft_bins,
            sample_rate,
            self.n_fft,
        ));
        log::debug!(
            "Built mel filter bank: {} bands x {} bins @ {}Hz",
            bank.n_mels(),
            bank.fft_bins(),
            sample_rate
        );
        if let Ok(mut banks) = self.banks.write() {
            banks.insert(sample_rate, Arc::clone(&bank));
        }
        bank
    }

    pub fn extract(
        &self,
        samples: &[f32],
        sample_rate: u32,
        progress: &Phase<'_, '_>,
    ) -> Result<MelSpectrogram, EstimationError> {
        if samples.is_empty() {
            return Err(EstimationError::Input("sample buffer is empty".into()));
        }
        if sample_rate == 0 {
            return Err(EstimationError::Input("sample rate must be > 0".into()));
        }

        let n_fft = self.n_fft;
        let fft_bins = self.fft_bins;
        let n_mels = self.n_mels;

        // Centre the first window on sample 0.
        let mut padded = vec![0.0f32; samples.len() + n_fft];
        padded[n_fft / 2..n_fft / 2 + samples.len()].copy_from_slice(samples);
        let total_frames = 1 + (padded.len() - n_fft) / self.hop;

        let bank = self.filter_bank(sample_rate);
        let mut data = vec![0.0f32; total_frames * n_mels];
        let done = AtomicUsize::new(0);
        let scratch_len = self.fft.get_inplace_scratch_len();

        data.par_chunks_mut(n_mels).enumerate().for_each_init(
            || {
                (
                    vec![Complex::new(0.0f64, 0.0); n_fft],
                    vec![Complex::new(0.0f64, 0.0); scratch_len],
                    vec![0.0f64; fft_bins],
                )
            },
            |(buffer, scratch, power), (frame, out)| {
                let offset = frame * self.hop;
                for (i, slot) in buffer.iter_mut().enumerate() {
                    *slot = Complex::new((padded[offset + i] * self.window[i]) as f64, 0.0);
                }
                self.fft.process_with_scratch(buffer, scratch);
                for (p, c) in power.iter_mut().zip(buffer.iter()) {
                    *p = c.norm_sqr();
                }
                bank.apply_log(power, out);

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % PROGRESS_EVERY == 0 {
                    progress.report(finished as f64 / total_frames as f64);
                }
            },
        );
        progress.finish();

        log::debug!(
            "Extracted {} mel frames ({} bands) from {} samples",
            total_frames,
            n_mels,
            samples.len()
        );

        Ok(MelSpectrogram {
            data,
            total_frames,
            n_mels,
        })
    }
}

/// Periodic Hann window, `0.5 - 0.5 cos(2 pi i / n)`.
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos() as f32
        })
        .collect()
}
