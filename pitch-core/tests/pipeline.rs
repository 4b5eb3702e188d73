//! End-to-end pipeline scenarios: hop-sized capture chunks through the
//! frame buffer, each estimator and the stability filter, plus session
//! handover on the engine's public interface.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pitch_core::engine::{DetectionEngine, DetectionObserver, EngineConfig, SessionMode};
use pitch_core::frame::FrameBuffer;
use pitch_core::pitch::{EstimatorConfig, EstimatorKind};
use pitch_core::stability::{StabilityConfig, StabilityFilter};
use pitch_core::StablePitch;

const SAMPLE_RATE: u32 = 44_100;
const FRAME_SIZE: usize = 2048;
const HOP_SIZE: usize = 256;

/// Splits a continuous sine at `frequency` into hop-sized capture chunks.
fn sine_chunks(frequency: f32, amplitude: f32, chunks: usize) -> Vec<Vec<f32>> {
    (0..chunks)
        .map(|c| {
            (0..HOP_SIZE)
                .map(|i| {
                    let n = (c * HOP_SIZE + i) as f32;
                    amplitude
                        * (2.0 * std::f32::consts::PI * frequency * n / SAMPLE_RATE as f32).sin()
                })
                .collect()
        })
        .collect()
}

/// Runs chunks through buffer → estimator → stability, collecting every
/// emission and the number of frames analyzed before the first one.
fn run_pipeline(kind: EstimatorKind, chunks: &[Vec<f32>]) -> (Vec<StablePitch>, usize) {
    let mut buffer = FrameBuffer::new(FRAME_SIZE);
    let mut estimator = kind.build(SAMPLE_RATE, FRAME_SIZE, &EstimatorConfig::default());
    let mut stability = StabilityFilter::new(StabilityConfig::default());

    let mut emitted = Vec::new();
    let mut frames_seen = 0;
    let mut frames_to_first = 0;
    for chunk in chunks {
        if let Some(frame) = buffer.push(chunk) {
            frames_seen += 1;
            let estimate = estimator.estimate(&frame);
            if let Some(stable) = stability.observe(estimate) {
                if emitted.is_empty() {
                    frames_to_first = frames_seen;
                }
                emitted.push(stable);
            }
        }
    }
    (emitted, frames_to_first)
}

#[test]
fn spectral_pipeline_settles_on_a2() {
    let chunks = sine_chunks(110.0, 0.5, 5 * FRAME_SIZE / HOP_SIZE);
    let (emitted, frames_to_first) = run_pipeline(EstimatorKind::Spectral, &chunks);

    let first = emitted.first().expect("a sustained A2 must stabilize");
    assert_eq!(first.note, "A");
    assert!(
        (first.frequency - 110.0).abs() < 2.0,
        "expected ~110 Hz, got {:.2}",
        first.frequency
    );
    assert!(
        frames_to_first <= 3,
        "should stabilize within 3 valid frames, took {frames_to_first}"
    );
}

#[test]
fn time_domain_pipeline_settles_on_a2() {
    let chunks = sine_chunks(110.0, 0.5, 5 * FRAME_SIZE / HOP_SIZE);
    let (emitted, frames_to_first) = run_pipeline(EstimatorKind::TimeDomain, &chunks);

    let first = emitted.first().expect("a sustained A2 must stabilize");
    assert_eq!(first.note, "A");
    assert!(
        (first.frequency - 110.0).abs() < 2.0,
        "expected ~110 Hz, got {:.2}",
        first.frequency
    );
    assert!(
        frames_to_first <= 3,
        "should stabilize within 3 valid frames, took {frames_to_first}"
    );
}

#[test]
fn a_held_note_fires_once_per_confirmation_span() {
    // 8 full frames of a steady tone. The filter clears its history on
    // each emission, so a new report needs two fresh agreeing frames:
    // at most one emission per two frames, never one per frame.
    let chunks = sine_chunks(220.0, 0.5, 8 * FRAME_SIZE / HOP_SIZE);
    let (emitted, _) = run_pipeline(EstimatorKind::Spectral, &chunks);

    assert!(!emitted.is_empty());
    assert!(
        emitted.len() <= 4,
        "8 frames of one held note must not fire more than 4 times, got {}",
        emitted.len()
    );
    assert!(emitted.iter().all(|s| s.note == "A"));
}

#[test]
fn silence_never_reaches_the_observer() {
    let chunks = vec![vec![0.0; HOP_SIZE]; 6 * FRAME_SIZE / HOP_SIZE];
    for kind in [EstimatorKind::Spectral, EstimatorKind::TimeDomain] {
        let (emitted, _) = run_pipeline(kind, &chunks);
        assert!(emitted.is_empty(), "{kind:?} emitted on all-silence input");
    }
}

#[derive(Default)]
struct CollectingObserver {
    notes: Mutex<Vec<String>>,
}

impl DetectionObserver for CollectingObserver {
    fn on_stable_note(&self, note: &str, _cents: f32) {
        self.notes.lock().unwrap().push(note.to_string());
    }
}

#[test]
fn second_session_cooperatively_replaces_the_first() {
    let observer = Arc::new(CollectingObserver::default());
    let mut engine = DetectionEngine::new(EngineConfig::default());

    let long_feed: Vec<String> = vec!["C3".to_string(); 100];
    engine.start_synthetic(long_feed, Duration::from_millis(10), observer.clone());
    assert_eq!(engine.active_mode(), Some(SessionMode::Synthetic));
    thread::sleep(Duration::from_millis(40));

    // Starting another session must first stop the running one; once the
    // handover completes, only the new sequence reaches the observer.
    let replacement: Vec<String> = vec!["F#4".to_string(); 3];
    engine.start_synthetic(replacement, Duration::from_millis(5), observer.clone());
    thread::sleep(Duration::from_millis(80));
    engine.stop();
    assert!(!engine.is_running());

    let notes = observer.notes.lock().unwrap();
    let split = notes.iter().position(|n| n == "F#").expect("replacement ran");
    assert!(notes[..split].iter().all(|n| n == "C"));
    assert!(notes[split..].iter().all(|n| n == "F#"));
    assert_eq!(notes[split..].len(), 3, "the replacement sequence runs to completion");
    assert!(notes.len() < 100, "the first feed must have been cut short");
}
