use anyhow::{Context, Result};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use super::decode::AudioData;

/// Converts interleaved audio between mono and stereo.
///
/// Only 1 and 2 channels are valid targets; any other request is coerced to
/// the opposite of the source layout (mono becomes stereo, everything else
/// becomes mono). Returns the samples and the resulting channel count.
pub fn rechannel(samples: &[f32], from: usize, to: usize) -> Result<(Vec<f32>, usize)> {
    if from == 0 {
        anyhow::bail!("Cannot rechannel audio with 0 channels");
    }

    let target = match to {
        1 | 2 => to,
        _ => {
            let coerced = if from == 1 { 2 } else { 1 };
            log::warn!(
                "Unsupported channel count {} requested; using {} for {}-channel audio",
                to,
                coerced,
                from
            );
            coerced
        }
    };

    if target == from {
        return Ok((samples.to_vec(), from));
    }

    let mono: Vec<f32> = if from == 1 {
        samples.to_vec()
    } else {
        samples
            .chunks(from)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    if target == 1 {
        return Ok((mono, 1));
    }
    Ok((mono.iter().flat_map(|&s| [s, s]).collect(), 2))
}

/// Resamples mono audio with a windowed-sinc interpolator.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        anyhow::bail!("Cannot resample between {}Hz and {}Hz", from_rate, to_rate);
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0, // max relative ratio
        params,
        samples.len(),
        1, // mono
    )
    .context("Failed to create resampler")?;

    let input = vec![samples.to_vec()];
    let output = resampler
        .process(&input, None)
        .context("Resampling failed")?;

    Ok(output.into_iter().next().unwrap_or_default())
}

/// Downmixes to mono and resamples to `target_rate`, consuming the input.
pub fn to_mono(audio: AudioData, target_rate: u32) -> Result<AudioData> {
    let AudioData {
        samples,
        sample_rate,
        channels,
        bits_per_sample,
    } = audio;

    let samples = if channels != 1 {
        rechannel(&samples, channels, 1)?.0
    } else {
        samples
    };

    let samples = if sample_rate != target_rate {
        log::debug!("Resampling {}Hz -> {}Hz", sample_rate, target_rate);
        resample(&samples, sample_rate, target_rate)?
    } else {
        samples
    };

    Ok(AudioData {
        samples,
        sample_rate: target_rate,
        channels: 1,
        bits_per_sample,
    })
}
