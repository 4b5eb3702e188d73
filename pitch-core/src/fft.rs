//! # Fast Fourier Transform (FFT) Module
//!
//! Spectral front-end for the pitch estimators. It handles the
//! conditioning steps that precede every transform — DC-offset removal
//! and Hann windowing — and produces zero-padded complex spectra and
//! magnitude vectors from analysis frames.
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - Zero-padding for finer frequency-bin resolution

use rustfft::{num_complex::Complex, Fft};

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset can cause issues in frequency analysis by introducing
/// a large component at 0 Hz. This function centers the signal
/// around zero for more accurate frequency analysis.
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
///
/// The Hann window tapers the signal to zero at the edges, which keeps
/// the energy of a tone from smearing across distant frequency bins.
pub fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n == 0 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos();
        *sample *= multiplier;
    }
}

/// Conditions a frame and computes its zero-padded complex spectrum.
///
/// Steps, in order:
/// 1. DC offset removal (on a copy; the input frame is left untouched)
/// 2. Hann windowing
/// 3. Zero-padding to `padded_len`
/// 4. Forward FFT
///
/// The supplied `fft` plan must have been created for `padded_len`.
///
/// # Panics
/// * If `padded_len` is smaller than the frame or does not match the plan
pub fn windowed_spectrum(frame: &[f32], fft: &dyn Fft<f32>, padded_len: usize) -> Vec<Complex<f32>> {
    assert!(padded_len >= frame.len(), "padded length must cover the frame");
    assert_eq!(fft.len(), padded_len, "FFT plan length must match the padded length");

    let mut processed = frame.to_vec();
    remove_dc_offset(&mut processed);
    apply_hann_window(&mut processed);

    let mut buffer: Vec<Complex<f32>> = processed
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();
    buffer.resize(padded_len, Complex { re: 0.0, im: 0.0 });

    fft.process(&mut buffer);
    buffer
}

/// Extracts the magnitude spectrum from the first `bins` complex bins.
///
/// Due to the Nyquist theorem only the lower half of the spectrum is
/// meaningful, so callers pass `padded_len / 2` here.
pub fn magnitudes(spectrum: &[Complex<f32>], bins: usize) -> Vec<f32> {
    spectrum
        .iter()
        .take(bins)
        .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::FftPlanner;

    #[test]
    fn dc_offset_is_removed() {
        let mut signal = vec![1.5; 64];
        remove_dc_offset(&mut signal);
        let avg = signal.iter().sum::<f32>() / signal.len() as f32;
        assert!(avg.abs() < 1e-5);
    }

    #[test]
    fn hann_window_tapers_edges() {
        let mut buffer = vec![1.0; 128];
        apply_hann_window(&mut buffer);
        assert!(buffer[0].abs() < 1e-6);
        assert!(buffer[127].abs() < 1e-6);
        assert!((buffer[64] - 1.0).abs() < 0.01, "mid-window gain should be near unity");
    }

    #[test]
    fn sine_peaks_at_expected_padded_bin() {
        let sample_rate = 44_100.0;
        let frame_size = 2048;
        let padded_len = frame_size * 4;
        let freq = 441.0;
        let frame: Vec<f32> = (0..frame_size)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(padded_len);
        let spectrum = windowed_spectrum(&frame, fft.as_ref(), padded_len);
        let mags = magnitudes(&spectrum, padded_len / 2);

        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let expected = (freq * padded_len as f32 / sample_rate).round() as usize;
        assert!(
            peak.abs_diff(expected) <= 1,
            "peak bin {peak} should be near {expected}"
        );
    }
}
