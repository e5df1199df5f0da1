//! Audio preprocessing ahead of speaker embedding

use capture::AudioClip;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a clip is rejected before embedding
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    #[error("Audio too short: {duration:.2}s < {min_duration:.2}s")]
    TooShort { duration: f64, min_duration: f64 },

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Audio is silent")]
    Silent,
}

/// Preprocessed audio ready for the voice encoder
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Peak level below which a clip is treated as silence
const SILENCE_PEAK: f32 = 1e-4;

/// Validate duration, resample to `target_rate`, and peak-normalize
pub fn preprocess(
    clip: &AudioClip,
    target_rate: u32,
    min_duration: f64,
) -> Result<Features, RejectReason> {
    if clip.sample_rate == 0 {
        return Err(RejectReason::InvalidSampleRate(clip.sample_rate));
    }

    let duration = clip.duration_secs();
    if duration < min_duration {
        return Err(RejectReason::TooShort {
            duration,
            min_duration,
        });
    }

    let mut samples = if clip.sample_rate == target_rate {
        clip.samples.clone()
    } else {
        resample(&clip.samples, clip.sample_rate, target_rate)
    };

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak < SILENCE_PEAK {
        return Err(RejectReason::Silent);
    }
    for s in samples.iter_mut() {
        *s /= peak;
    }

    Ok(Features {
        samples,
        sample_rate: target_rate,
    })
}

/// Linear-interpolation resampler
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 || from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[next] * frac
        })
        .collect()
}
