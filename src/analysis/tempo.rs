use rayon::prelude::*;

use super::progress::Phase;
use crate::error::EstimationError;

/// Tempo search range in BPM; bounds the autocorrelation lags.
const SEARCH_MIN_BPM: f64 = 50.0;
const SEARCH_MAX_BPM: f64 = 220.0;

/// Folded output band, `[OCTAVE_LOW, OCTAVE_HIGH)`.
pub const OCTAVE_LOW: f64 = 85.0;
pub const OCTAVE_HIGH: f64 = 175.0;

/// Below this the three points around the peak count as collinear.
const PARABOLA_EPSILON: f64 = 1e-12;

/// Candidate periods, in frames, for a given frame duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LagRange {
    pub min: usize,
    pub max: usize,
}

impl LagRange {
    pub fn new(seconds_per_frame: f64) -> Self {
        Self {
            min: (60.0 / (SEARCH_MAX_BPM * seconds_per_frame)).floor() as usize,
            max: (60.0 / (SEARCH_MIN_BPM * seconds_per_frame)).floor() as usize,
        }
    }
}

/// Mean lagged product over the first half of the curve.
///
/// `None` when the lag leaves no overlapping samples.
fn autocorrelation(curve: &[f32], lag: usize) -> Option<f64> {
    let len = curve.len();
    let limit = len.checked_sub(lag)?.min(len / 2);
    if limit == 0 {
        return None;
    }
    let sum: f64 = curve[..limit]
        .iter()
        .zip(&curve[lag..lag + limit])
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum();
    Some(sum / limit as f64)
}

/// Vertex offset of the parabola through `(-1, a)`, `(0, b)`, `(1, g)`.
fn parabolic_offset(a: f64, b: f64, g: f64) -> Option<f64> {
    let denom = a - 2.0 * b + g;
    if !denom.is_finite() || denom.abs() < PARABOLA_EPSILON {
        return None;
    }
    Some(0.5 * (a - g) / denom)
}

/// Doubles or halves `bpm` until it lies in `[OCTAVE_LOW, OCTAVE_HIGH)`.
pub fn fold_octave(mut bpm: f64) -> Result<f64, EstimationError> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(EstimationError::Numeric(format!("cannot fold tempo {}", bpm)));
    }
    while bpm < OCTAVE_LOW {
        bpm *= 2.0;
    }
    while bpm >= OCTAVE_HIGH {
        bpm /= 2.0;
    }
    Ok(bpm)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Estimates the tempo of a beat-activation curve.
///
/// Picks the strongest autocorrelation lag between 50 and 220 BPM, refines it
/// to sub-frame precision, folds the result into `[85, 175)` and rounds it to
/// three decimals.
pub fn estimate(
    curve: &[f32],
    hop: usize,
    sample_rate: u32,
    progress: &Phase<'_, '_>,
) -> Result<f64, EstimationError> {
    if hop == 0 || sample_rate == 0 {
        return Err(EstimationError::InvalidParams(
            "hop and sample rate must be > 0".into(),
        ));
    }
    let seconds_per_frame = hop as f64 / sample_rate as f64;
    let lags = LagRange::new(seconds_per_frame);

    if curve.len() <= lags.min {
        return Err(EstimationError::CurveTooShort {
            len: curve.len(),
            min_lag: lags.min,
        });
    }

    let acf: Vec<Option<f64>> = (lags.min..=lags.max)
        .into_par_iter()
        .map(|lag| autocorrelation(curve, lag))
        .collect();
    progress.report(0.5);

    let at = |lag: usize| acf[lag - lags.min];

    // First strict maximum wins.
    let mut best: Option<(usize, f64)> = None;
    for lag in lags.min..=lags.max {
        if let Some(value) = at(lag) {
            if best.map_or(true, |(_, max)| value > max) {
                best = Some((lag, value));
            }
        }
    }
    let (best_lag, _) = best.ok_or(EstimationError::CurveTooShort {
        len: curve.len(),
        min_lag: lags.min,
    })?;

    let mut refined_lag = best_lag as f64;
    if best_lag > lags.min && best_lag < lags.max {
        if let (Some(a), Some(b), Some(g)) = (at(best_lag - 1), at(best_lag), at(best_lag + 1)) {
            if let Some(p) = parabolic_offset(a, b, g) {
                refined_lag += p;
            }
        }
    }

    let raw_bpm = 60.0 / (refined_lag * seconds_per_frame);
    let mut bpm = round3(fold_octave(raw_bpm)?);
    if bpm >= OCTAVE_HIGH {
        bpm = round3(fold_octave(bpm)?);
    }
    progress.finish();

    log::debug!(
        "ACF peak at lag {} (refined {:.3}, lags {}..={}): {:.3} BPM raw, {:.3} BPM folded",
        best_lag,
        refined_lag,
        lags.min,
        lags.max,
        raw_bpm,
        bpm
    );

    Ok(bpm)
}
