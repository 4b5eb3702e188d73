//! # Pitch Detection Module
//!
//! Two interchangeable estimators of the fundamental frequency of a
//! single analysis frame:
//!
//! - [`SpectralEstimator`]: Hann window → zero-padded FFT → magnitude
//!   spectrum → harmonic-product reinforcement → peak search →
//!   parabolic sub-bin refinement.
//! - [`NsdfEstimator`]: normalized square-difference function over a
//!   lag range → peak search → parabolic refinement → frequency from
//!   lag.
//!
//! Both share an RMS energy gate that rejects near-silent frames before
//! any expensive work, and both resolve numerical edge cases locally —
//! a degenerate interpolation falls back to the discrete index, and a
//! frame without a reliable pitch yields `None`, never an error.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::fft;

/// Zero-padding factor applied before the spectral estimator's FFT.
///
/// Padding increases frequency-bin resolution without changing the true
/// analysis window.
pub const ZERO_PAD_FACTOR: usize = 4;

/// Highest harmonic folded into the harmonic-product reinforcement.
const MAX_HARMONIC: usize = 5;

/// A candidate fundamental frequency with its reliability score.
///
/// The absence of a pitch is represented by `Option::None` at the
/// estimator boundary, never by a zero frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Estimated fundamental frequency in Hz.
    pub frequency: f32,
    /// Clarity/confidence score in [0, 1].
    pub clarity: f32,
}

/// A pitch estimator consuming one immutable frame at a time.
///
/// The sample rate and frame geometry are fixed at construction for the
/// lifetime of a detection session; only the frame varies per call.
pub trait PitchEstimator: Send {
    /// Estimates the fundamental frequency of one frame, or `None` when
    /// the frame holds no reliable pitch (silence, noise, transients).
    fn estimate(&mut self, frame: &[f32]) -> Option<PitchEstimate>;
}

/// Selects which estimator implementation a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EstimatorKind {
    /// FFT + harmonic product spectrum (see [`SpectralEstimator`]).
    #[default]
    Spectral,
    /// Normalized autocorrelation (see [`NsdfEstimator`]).
    TimeDomain,
}

impl EstimatorKind {
    /// Builds the selected estimator for a session's sample rate and
    /// frame size.
    pub fn build(
        self,
        sample_rate: u32,
        frame_size: usize,
        config: &EstimatorConfig,
    ) -> Box<dyn PitchEstimator> {
        match self {
            EstimatorKind::Spectral => {
                Box::new(SpectralEstimator::new(sample_rate, frame_size, config))
            }
            EstimatorKind::TimeDomain => Box::new(NsdfEstimator::new(sample_rate, config)),
        }
    }
}

/// Tunable gates shared by both estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Lowest fundamental the time-domain lag search covers, in Hz.
    pub min_frequency: f32,
    /// Highest fundamental the time-domain lag search covers, in Hz.
    pub max_frequency: f32,
    /// Minimum NSDF peak value accepted as a pitched frame.
    pub clarity_threshold: f32,
    /// RMS level in dBFS below which a frame is treated as silence.
    pub power_gate_db: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_frequency: 50.0,
            max_frequency: 1200.0,
            clarity_threshold: 0.6,
            power_gate_db: -50.0,
        }
    }
}

/// RMS level of a signal in dBFS. Silence yields negative infinity.
fn rms_db(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return f32::NEG_INFINITY;
    }
    let rms = (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt();
    20.0 * rms.log10()
}

/// Parabolic interpolation through a discrete extremum and its
/// immediate neighbors, yielding the continuous extremum location.
///
/// Falls back to the integer index at array boundaries or when the
/// parabola degenerates (flat neighborhood).
fn parabolic_interpolation(data: &[f32], index: usize) -> f32 {
    if index == 0 || index + 1 >= data.len() {
        return index as f32;
    }
    let y1 = data[index - 1];
    let y2 = data[index];
    let y3 = data[index + 1];

    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < 1e-12 {
        return index as f32;
    }
    index as f32 + (y1 - y3) / (2.0 * denominator)
}

/// Refines a rough frequency estimate against the magnitude spectrum.
///
/// Searches for the local magnitude peak in a ±8-bin window around the
/// rough estimate (the spectrum is 4× zero-padded, so the window spans
/// two pre-padding bins) and interpolates on log magnitudes for
/// sub-bin accuracy. Any degeneracy falls back to the rough value.
fn refine_from_spectrum(
    spectrum_magnitudes: &[f32],
    rough_freq: f32,
    sample_rate: u32,
) -> Option<f32> {
    if rough_freq <= 0.0 {
        return None;
    }
    let buffer_size = spectrum_magnitudes.len() * 2;
    let target_bin = (rough_freq * buffer_size as f32) / sample_rate as f32;
    let search_radius = 8.0;
    let start_bin = (target_bin - search_radius).max(0.0) as usize;
    let end_bin = (target_bin + search_radius).min((spectrum_magnitudes.len() - 1) as f32) as usize;
    if start_bin >= end_bin {
        return Some(rough_freq);
    }

    let peak_bin_result = spectrum_magnitudes[start_bin..=end_bin]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));

    let peak_bin = if let Some((offset, _)) = peak_bin_result {
        start_bin + offset
    } else {
        return Some(rough_freq);
    };

    if peak_bin == 0 || peak_bin >= spectrum_magnitudes.len() - 1 {
        return Some(rough_freq);
    }

    let y1 = spectrum_magnitudes[peak_bin - 1].ln();
    let y2 = spectrum_magnitudes[peak_bin].ln();
    let y3 = spectrum_magnitudes[peak_bin + 1].ln();

    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return Some(rough_freq);
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return Some(rough_freq);
    }

    let peak_shift = (y3 - y1) / (2.0 * denominator);
    let interpolated_bin = peak_bin as f32 + peak_shift;
    let final_freq = (interpolated_bin * sample_rate as f32) / buffer_size as f32;

    if final_freq.is_finite() && final_freq > 0.0 {
        Some(final_freq)
    } else {
        Some(rough_freq)
    }
}

/// Spectral pitch estimator: FFT + harmonic product spectrum.
///
/// The FFT is planned once at construction; per-frame work reuses the
/// plan. Harmonic reinforcement combines a multiplicative and an
/// additive term over max-normalized magnitudes:
///
/// ```text
/// hps[i] = m[i] · (1 + Σ m[i·h] + Π m[i·h])      h = 2..=5
/// ```
///
/// The unit term keeps a silent harmonic bin from collapsing the score
/// to zero and anchors every candidate to real energy at its own bin,
/// so window-leakage skirts at half the true frequency cannot outscore
/// the fundamental on clean tones.
pub struct SpectralEstimator {
    sample_rate: u32,
    padded_len: usize,
    fft: Arc<dyn Fft<f32>>,
    config: EstimatorConfig,
}

impl SpectralEstimator {
    /// Plans the zero-padded FFT for the given frame geometry.
    pub fn new(sample_rate: u32, frame_size: usize, config: &EstimatorConfig) -> Self {
        let padded_len = frame_size * ZERO_PAD_FACTOR;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(padded_len);
        Self {
            sample_rate,
            padded_len,
            fft,
            config: config.clone(),
        }
    }
}

impl PitchEstimator for SpectralEstimator {
    fn estimate(&mut self, frame: &[f32]) -> Option<PitchEstimate> {
        if frame.is_empty() || frame.len() * ZERO_PAD_FACTOR != self.padded_len {
            return None;
        }
        // Energy gate: reject silence before any spectral work.
        if rms_db(frame) < self.config.power_gate_db {
            return None;
        }

        let spectrum = fft::windowed_spectrum(frame, self.fft.as_ref(), self.padded_len);
        let half = self.padded_len / 2;
        let mags = fft::magnitudes(&spectrum, half);

        let max_mag = mags.iter().cloned().fold(0.0_f32, f32::max);
        if max_mag <= 0.0 {
            return None;
        }
        let norm: Vec<f32> = mags.iter().map(|&m| m / max_mag).collect();

        // Harmonic reinforcement over the Nyquist-limited half spectrum.
        let mut hps = vec![0.0_f32; half];
        for i in 1..half {
            let mut product = 1.0_f32;
            let mut sum = 0.0_f32;
            let mut folded = 0;
            for h in 2..=MAX_HARMONIC {
                let idx = i * h;
                if idx >= half {
                    break;
                }
                product *= norm[idx];
                sum += norm[idx];
                folded += 1;
            }
            hps[i] = if folded == 0 {
                // No harmonic fits; only the fundamental contributes.
                norm[i]
            } else {
                norm[i] * (1.0 + sum + product)
            };
        }

        // Peak search, DC excluded.
        let mut peak_idx = 0;
        let mut peak_val = 0.0_f32;
        let mut total = 0.0_f32;
        for (i, &value) in hps.iter().enumerate().skip(1) {
            total += value;
            if value > peak_val {
                peak_val = value;
                peak_idx = i;
            }
        }
        if peak_idx == 0 || peak_val <= 0.0 {
            return None;
        }

        let interpolated = parabolic_interpolation(&hps, peak_idx);
        let rough = self.sample_rate as f32 * interpolated / self.padded_len as f32;
        let frequency = refine_from_spectrum(&mags, rough, self.sample_rate).unwrap_or(rough);
        let clarity = if total > 0.0 {
            (peak_val / total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        if frequency.is_finite() && frequency > 20.0 {
            Some(PitchEstimate { frequency, clarity })
        } else {
            None
        }
    }
}

/// Time-domain pitch estimator: normalized square-difference function.
///
/// ```text
/// nsdf[τ] = 2·Σ x[i]·x[i+τ] / Σ (x[i]² + x[i+τ]²)       i = 0..N-τ
/// ```
///
/// The normalization bounds the function to roughly [-1, 1], making the
/// peak value a signal-level-independent clarity score.
pub struct NsdfEstimator {
    sample_rate: u32,
    config: EstimatorConfig,
}

impl NsdfEstimator {
    pub fn new(sample_rate: u32, config: &EstimatorConfig) -> Self {
        Self {
            sample_rate,
            config: config.clone(),
        }
    }
}

impl PitchEstimator for NsdfEstimator {
    fn estimate(&mut self, frame: &[f32]) -> Option<PitchEstimate> {
        let n = frame.len();
        if n < 4 {
            return None;
        }
        // Energy gate: skip the lag search entirely on near-silence.
        if rms_db(frame) < self.config.power_gate_db {
            return None;
        }

        // Lag range from the configured frequency range.
        let min_tau = (self.sample_rate as f32 / self.config.max_frequency)
            .floor()
            .max(1.0) as usize;
        let max_tau = ((self.sample_rate as f32 / self.config.min_frequency).ceil() as usize)
            .min(n - 2);
        if min_tau >= max_tau {
            return None;
        }

        // One extra lag past the range so the interpolation has neighbors.
        let upper = (max_tau + 1).min(n - 1);
        let mut nsdf = vec![0.0_f32; upper + 1];
        for (tau, value) in nsdf.iter_mut().enumerate().skip(1) {
            let overlap = n - tau;
            let mut acf = 0.0_f32;
            let mut energy = 0.0_f32;
            for i in 0..overlap {
                let a = frame[i];
                let b = frame[i + tau];
                acf += a * b;
                energy += a * a + b * b;
            }
            *value = if energy > 0.0 { 2.0 * acf / energy } else { 0.0 };
        }

        // Single pass for the maximum value and its lag.
        let mut best_tau = 0;
        let mut best_val = f32::MIN;
        for tau in min_tau..=max_tau {
            if nsdf[tau] > best_val {
                best_val = nsdf[tau];
                best_tau = tau;
            }
        }
        if best_tau == 0 || best_val < self.config.clarity_threshold {
            return None;
        }

        // Subharmonic correction: near-exact-integer periods can put the
        // raw maximum one octave low. Prefer the half-lag peak when it
        // is comparably clear.
        let mut chosen_tau = best_tau;
        let mut chosen_val = best_val;
        let approx = best_tau as f32 / 2.0;
        if approx >= min_tau as f32 {
            let center = approx.round() as usize;
            let start = center.saturating_sub(2).max(min_tau);
            let end = (center + 2).min(max_tau);
            let mut local_tau = start;
            let mut local_val = nsdf[start];
            for tau in (start + 1)..=end {
                if nsdf[tau] > local_val {
                    local_val = nsdf[tau];
                    local_tau = tau;
                }
            }
            if local_val >= 0.95 * best_val {
                chosen_tau = local_tau;
                chosen_val = local_val;
            }
        }

        let interpolated = parabolic_interpolation(&nsdf, chosen_tau);
        if interpolated <= 0.0 {
            return None;
        }
        let frequency = self.sample_rate as f32 / interpolated;
        let clarity = chosen_val.clamp(0.0, 1.0);

        if frequency.is_finite() && frequency > 20.0 {
            Some(PitchEstimate { frequency, clarity })
        } else {
            None
        }
    }
}
