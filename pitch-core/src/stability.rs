//! # Stability / Gating Module
//!
//! Raw per-frame estimates are noisy near note onsets and under
//! real-world capture noise. This filter keeps a short history of
//! recent detections and only reports a note once consecutive readings
//! agree, trading a few frame hops of latency for flicker-free output.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::pitch::PitchEstimate;
use crate::tuning::{self, TuningTarget};
use crate::StablePitch;

/// Tunables for the stability filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// How many recent detections are kept for the agreement check.
    pub history_len: usize,
    /// Maximum cent spread between two readings that still count as
    /// the same pitch.
    pub cents_tolerance: f32,
    /// Minimum estimator clarity for a reading to count as valid.
    pub min_confidence: f32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            history_len: 3,
            cents_tolerance: 25.0,
            min_confidence: 0.05,
        }
    }
}

/// One classified detection in the history.
#[derive(Debug, Clone)]
enum Detected {
    /// Energy, clarity or range gate failed; no usable pitch this frame.
    Invalid,
    Valid {
        pitch_class: &'static str,
        frequency: f32,
        cents: f32,
    },
}

/// Confirms a pitch only after consecutive consistent readings.
///
/// Owns the detection history exclusively; the capture worker is the
/// only caller for the lifetime of a session. History is bookkeeping
/// only — it is overwritten continuously and never persisted.
#[derive(Debug)]
pub struct StabilityFilter {
    config: StabilityConfig,
    history: VecDeque<Detected>,
    expected_range: Option<(f32, f32)>,
    target: Option<TuningTarget>,
}

impl StabilityFilter {
    pub fn new(config: StabilityConfig) -> Self {
        let capacity = config.history_len;
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            expected_range: None,
            target: None,
        }
    }

    /// Restricts valid detections to a frequency band, or lifts the
    /// restriction with `None`. Also clears the history, since entries
    /// gathered under the old band no longer confirm anything.
    pub fn set_expected_range(&mut self, range: Option<(f32, f32)>) {
        self.expected_range = range;
        self.history.clear();
    }

    /// Selects the tuning target cents are reported against, or reverts
    /// to nearest-semitone reporting with `None`. Clears the history.
    pub fn set_target(&mut self, target: Option<TuningTarget>) {
        self.target = target;
        self.history.clear();
    }

    /// Feeds one per-frame estimate and returns a note once stability
    /// is reached.
    ///
    /// On emission the history is cleared, so the next report requires
    /// fresh consecutive confirmations — a held note fires once per
    /// stable span instead of once per frame.
    pub fn observe(&mut self, estimate: Option<PitchEstimate>) -> Option<StablePitch> {
        let entry = self.classify(estimate);
        self.history.push_front(entry);
        self.history.truncate(self.config.history_len);

        let stable = self.find_stable();
        if stable.is_some() {
            self.history.clear();
        }
        stable
    }

    /// The frequency band valid detections must fall into, if any.
    fn band(&self) -> Option<(f32, f32)> {
        self.expected_range
            .or_else(|| self.target.as_ref().map(|t| (t.min_hz, t.max_hz)))
    }

    fn classify(&self, estimate: Option<PitchEstimate>) -> Detected {
        let Some(estimate) = estimate else {
            return Detected::Invalid;
        };
        if estimate.clarity < self.config.min_confidence {
            return Detected::Invalid;
        }
        if let Some((lo, hi)) = self.band() {
            if estimate.frequency < lo || estimate.frequency > hi {
                return Detected::Invalid;
            }
        }
        let Some((midi, cents_nearest)) = tuning::cents_from_nearest(estimate.frequency) else {
            return Detected::Invalid;
        };
        let cents = match &self.target {
            Some(target) => tuning::cents_deviation(estimate.frequency, target.target_hz),
            None => cents_nearest,
        };
        Detected::Valid {
            pitch_class: tuning::pitch_class_of_midi(midi),
            frequency: estimate.frequency,
            cents,
        }
    }

    /// Looks for two valid entries naming the same pitch class within
    /// the cents tolerance of a common reference; returns the most
    /// recent qualifying entry.
    fn find_stable(&self) -> Option<StablePitch> {
        for reference in &self.history {
            let Detected::Valid {
                pitch_class,
                frequency,
                cents,
            } = reference
            else {
                continue;
            };
            let agreements = self
                .history
                .iter()
                .filter(|entry| match entry {
                    Detected::Valid {
                        pitch_class: other_class,
                        cents: other_cents,
                        ..
                    } => {
                        tuning::same_pitch_class(pitch_class, other_class)
                            && (other_cents - cents).abs() <= self.config.cents_tolerance
                    }
                    Detected::Invalid => false,
                })
                .count();
            if agreements >= 2 {
                return Some(StablePitch {
                    note: (*pitch_class).to_string(),
                    frequency: *frequency,
                    cents: *cents,
                });
            }
        }
        None
    }
}
