//! # Musical Tuning Module
//!
//! Note-naming and tuning-target utilities for the detection pipeline.
//! Conversions are arithmetic, anchored at A4 = 440 Hz = MIDI 69, with
//! note names normalized to the sharps convention.
//!
//! ## Features
//! - Frequency ↔ MIDI ↔ note-name conversions
//! - Cent deviation calculations for tuning accuracy
//! - Enharmonic, octave-independent pitch-class comparison
//! - Standard guitar tuning targets with acceptance bands

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Reference pitch for equal temperament.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI note number of the reference pitch.
pub const A4_MIDI: i32 = 69;

/// The twelve pitch-class spellings in chromatic order starting from C,
/// normalized to sharps.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a frequency to its exact (fractional) MIDI note number.
///
/// Returns `None` for non-positive frequencies, which have no pitch.
pub fn frequency_to_midi(freq: f32) -> Option<f32> {
    if freq <= 0.0 {
        return None;
    }
    Some(A4_MIDI as f32 + 12.0 * (freq / A4_FREQUENCY).log2())
}

/// Converts a MIDI note number to its equal-tempered frequency in Hz.
pub fn midi_to_frequency(midi: u8) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi as f32 - A4_MIDI as f32) / 12.0)
}

/// Converts a MIDI note number to a note name with octave suffix.
///
/// Examples: 69 → "A4", 60 → "C4", 70 → "A#4".
pub fn midi_to_note_name(midi: u8) -> String {
    let class = NOTE_NAMES[(midi % 12) as usize];
    let octave = midi as i32 / 12 - 1; // MIDI octave convention: C4 = 60
    format!("{class}{octave}")
}

/// The pitch class of a MIDI note number.
pub fn pitch_class_of_midi(midi: u8) -> &'static str {
    NOTE_NAMES[(midi % 12) as usize]
}

/// Finds the nearest MIDI note and the cents deviation from it.
///
/// The deviation lies in [-50, +50) by construction. Returns `None`
/// for non-positive frequencies.
pub fn cents_from_nearest(freq: f32) -> Option<(u8, f32)> {
    let exact = frequency_to_midi(freq)?;
    let nearest = exact.round();
    let cents = (exact - nearest) * 100.0;
    Some((nearest.clamp(0.0, 127.0) as u8, cents))
}

/// Calculates the deviation of a frequency from a target in cents.
///
/// 100 cents is one semitone; positive values are sharp, negative flat.
pub fn cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Strips the octave suffix from a note name, leaving the pitch class.
///
/// "A#4" → "A#", "C-1" → "C", "E" → "E".
pub fn pitch_class(name: &str) -> &str {
    let end = name
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .unwrap_or(name.len());
    &name[..end]
}

/// Normalizes a flat-spelled pitch class to its sharp synonym.
///
/// Names already in the sharps convention pass through unchanged.
pub fn normalize_to_sharp(class: &str) -> &str {
    match class {
        "Db" => "C#",
        "Eb" => "D#",
        "Gb" => "F#",
        "Ab" => "G#",
        "Bb" => "A#",
        "Cb" => "B",
        "Fb" => "E",
        "E#" => "F",
        "B#" => "C",
        other => other,
    }
}

/// Compares two note names for enharmonic, octave-independent equality.
///
/// "Bb3" and "A#5" name the same pitch class and compare equal.
pub fn same_pitch_class(a: &str, b: &str) -> bool {
    normalize_to_sharp(pitch_class(a)) == normalize_to_sharp(pitch_class(b))
}

/// Resolves a note name to its equal-tempered frequency.
///
/// Accepts an optional octave suffix ("E2", "A#4"); a bare pitch class
/// resolves in octave 4. Flat spellings and lowercase initials are
/// accepted. Returns `None` for unknown names or out-of-range octaves.
pub fn note_to_frequency(name: &str) -> Option<f32> {
    let name = name.trim();
    let split = name
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .unwrap_or(name.len());
    let (class_part, octave_part) = name.split_at(split);

    let mut class = String::with_capacity(class_part.len());
    let mut chars = class_part.chars();
    class.push(chars.next()?.to_ascii_uppercase());
    class.extend(chars);

    let class = normalize_to_sharp(&class);
    let index = NOTE_NAMES.iter().position(|&n| n == class)? as i32;
    let octave: i32 = if octave_part.is_empty() {
        4
    } else {
        octave_part.parse().ok()?
    };
    let midi = (octave + 1) * 12 + index;
    if !(0..=127).contains(&midi) {
        return None;
    }
    Some(midi_to_frequency(midi as u8))
}

/// A tuning target: a labeled pitch with its acceptance band.
///
/// Estimates outside [`min_hz`, `max_hz`] are rejected while the target
/// is active; cent deviations are reported against `target_hz`. Owned by
/// the consumer and replaced on selection, never persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningTarget {
    /// String or note label shown to the user (e.g. "E2").
    pub label: String,
    /// Lower edge of the acceptance band in Hz.
    pub min_hz: f32,
    /// Target frequency in Hz.
    pub target_hz: f32,
    /// Upper edge of the acceptance band in Hz.
    pub max_hz: f32,
}

/// Targets for the six strings of a standard-tuned guitar.
///
/// Band edges sit roughly at the neighboring semitone midpoints, so a
/// string that is badly off lands outside its band instead of being
/// reported against the wrong target.
static GUITAR_STANDARD: Lazy<Vec<TuningTarget>> = Lazy::new(|| {
    [
        ("E2", 78.0, 82.41, 87.0),
        ("A2", 104.0, 110.00, 116.5),
        ("D3", 138.5, 146.83, 155.5),
        ("G3", 185.0, 196.00, 207.5),
        ("B3", 233.0, 246.94, 261.5),
        ("E4", 311.0, 329.63, 349.0),
    ]
    .iter()
    .map(|&(label, min_hz, target_hz, max_hz)| TuningTarget {
        label: label.to_string(),
        min_hz,
        target_hz,
        max_hz,
    })
    .collect()
});

/// The standard guitar tuning table, low string first.
pub fn standard_guitar_targets() -> &'static [TuningTarget] {
    &GUITAR_STANDARD
}
