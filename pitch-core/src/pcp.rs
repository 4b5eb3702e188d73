//! # Pitch-Class Profile Module
//!
//! Bins spectral magnitude energy into the 12 pitch classes for chord
//! recognition. A much simpler relative of the pitch estimators: no
//! peak search, just a logarithmic frequency-to-class mapping.

use crate::tuning::{A4_FREQUENCY, A4_MIDI};

/// Number of pitch classes in the profile.
pub const PITCH_CLASSES: usize = 12;

/// Spectral bins mapping below this frequency are ignored (sub-bass
/// rumble carries no chord information).
const MIN_PROFILE_HZ: f32 = 55.0;

/// Spectral bins mapping above this frequency are ignored.
const MAX_PROFILE_HZ: f32 = 5_000.0;

/// Computes a 12-bin pitch-class profile from a magnitude spectrum.
///
/// Each in-band bin contributes its energy (magnitude squared) to the
/// pitch class nearest its center frequency; classes are indexed from
/// C (0) to B (11) like [`crate::tuning::NOTE_NAMES`]. The profile is
/// normalized to sum 1; an all-zero spectrum yields an all-zero
/// profile.
///
/// # Arguments
/// * `magnitudes` - Magnitude spectrum (lower half, DC at index 0)
/// * `sample_rate` - Sample rate of the analyzed signal in Hz
/// * `fft_len` - Transform length the magnitudes were computed with
pub fn pitch_class_profile(
    magnitudes: &[f32],
    sample_rate: u32,
    fft_len: usize,
) -> [f32; PITCH_CLASSES] {
    let mut profile = [0.0_f32; PITCH_CLASSES];
    if magnitudes.is_empty() || fft_len == 0 {
        return profile;
    }

    // C-1 (MIDI 0), the class-0 anchor of the log2 mapping.
    let c_reference = A4_FREQUENCY * 2.0_f32.powf(-(A4_MIDI as f32) / 12.0);

    for (k, &magnitude) in magnitudes.iter().enumerate().skip(1) {
        let freq = k as f32 * sample_rate as f32 / fft_len as f32;
        if !(MIN_PROFILE_HZ..=MAX_PROFILE_HZ).contains(&freq) {
            continue;
        }
        let semitone = 12.0 * (freq / c_reference).log2();
        let class = (semitone.round() as i32).rem_euclid(PITCH_CLASSES as i32) as usize;
        profile[class] += magnitude * magnitude;
    }

    let total: f32 = profile.iter().sum();
    if total > 0.0 {
        for value in &mut profile {
            *value /= total;
        }
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft;
    use rustfft::FftPlanner;

    fn profile_of_sine(freq: f32) -> [f32; PITCH_CLASSES] {
        let sample_rate = 44_100u32;
        let fft_len = 4096;
        let frame: Vec<f32> = (0..fft_len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        let mut planner = FftPlanner::new();
        let plan = planner.plan_fft_forward(fft_len);
        let spectrum = fft::windowed_spectrum(&frame, plan.as_ref(), fft_len);
        let mags = fft::magnitudes(&spectrum, fft_len / 2);
        pitch_class_profile(&mags, sample_rate, fft_len)
    }

    #[test]
    fn a440_lands_in_the_a_class() {
        let profile = profile_of_sine(440.0);
        let dominant = profile
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(dominant, 9, "A is class index 9");
        assert!(profile[9] > 0.9, "a pure tone should dominate its class");
    }

    #[test]
    fn profile_sums_to_one() {
        let profile = profile_of_sine(196.0);
        let total: f32 = profile.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn silence_yields_an_all_zero_profile() {
        let profile = pitch_class_profile(&vec![0.0; 1024], 44_100, 2048);
        assert!(profile.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_input_is_handled() {
        let profile = pitch_class_profile(&[], 44_100, 2048);
        assert!(profile.iter().all(|&v| v == 0.0));
    }
}
