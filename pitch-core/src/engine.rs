//! # Detection Engine Module
//!
//! Owns the capture session and drives the full pipeline: device →
//! frame buffer → pitch estimator → stability filter → observer.
//!
//! ## Architecture
//! - **Capture worker**: dedicated thread that owns the audio stream,
//!   the frame buffer and the detection history for the session's
//!   lifetime; it is the only writer to either.
//! - **Dispatcher**: second thread that delivers observer callbacks in
//!   capture order, so a slow consumer backs up a queue instead of
//!   stalling audio capture.
//! - **Communication**: crossbeam channels throughout — sample chunks,
//!   control updates and shutdown are all messages; the worker applies
//!   configuration changes between frames.
//!
//! Live capture and the synthetic feed are mutually exclusive; starting
//! one cooperatively stops the other first. Stopping joins both threads,
//! so no callback fires after `stop` returns.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::StreamTrait;
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::audio;
use crate::frame::{FrameBuffer, DEFAULT_FRAME_SIZE, DEFAULT_HOP_SIZE};
use crate::pitch::{EstimatorConfig, EstimatorKind};
use crate::stability::{StabilityConfig, StabilityFilter};
use crate::tuning::{self, TuningTarget};
use crate::StablePitch;

/// Receiver of detection results, implemented by consumers (tuner view,
/// scale trainer, chord recognition).
///
/// Callbacks are invoked from the engine's dispatcher thread, in the
/// order frames were captured. Note names are sharp-normalized pitch
/// classes; `on_stable_pitch` carries the frequency for consumers that
/// need the octave.
pub trait DetectionObserver: Send + Sync + 'static {
    /// A note was confirmed by the stability filter.
    fn on_stable_note(&self, note: &str, cents: f32);

    /// Richer companion to [`Self::on_stable_note`], delivered for the
    /// same events.
    fn on_stable_pitch(&self, _note: &str, _frequency: f32, _cents: f32) {}

    /// The capture device could not be acquired (e.g. missing
    /// microphone permission). Fired once per failed start; retry is
    /// the caller's decision.
    fn on_permission_denied(&self) {}
}

/// Full configuration of a detection session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Analysis frame length in samples.
    pub frame_size: usize,
    /// Samples per capture chunk (frame advance between analyses).
    pub hop_size: usize,
    /// Which estimator implementation the session runs.
    pub estimator: EstimatorKind,
    /// Estimator gates (frequency range, clarity, energy).
    pub gates: EstimatorConfig,
    /// Stability filter tunables.
    pub stability: StabilityConfig,
    /// Optional expected-frequency band applied before stability.
    pub expected_range: Option<(f32, f32)>,
    /// Optional tuning target cents are reported against.
    pub target: Option<TuningTarget>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: DEFAULT_FRAME_SIZE,
            hop_size: DEFAULT_HOP_SIZE,
            estimator: EstimatorKind::default(),
            gates: EstimatorConfig::default(),
            stability: StabilityConfig::default(),
            expected_range: None,
            target: None,
        }
    }
}

/// Which kind of session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Live capture from the audio device.
    Live,
    /// Synthetic note feed for testing and demos.
    Synthetic,
}

/// Configuration updates applied by the worker between frames.
enum ControlMsg {
    SetExpectedRange(Option<(f32, f32)>),
    SetTarget(Option<TuningTarget>),
}

/// Events flowing from a worker to the dispatcher.
enum Event {
    Stable(StablePitch),
    PermissionDenied,
}

/// Handles of a running session.
struct Session {
    mode: SessionMode,
    shutdown_tx: Sender<()>,
    control_tx: Sender<ControlMsg>,
    worker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Entry point for detection sessions.
///
/// At most one session (live or synthetic) runs at a time. All methods
/// return promptly; the heavy lifting happens on the session's worker.
pub struct DetectionEngine {
    config: EngineConfig,
    session: Option<Session>,
}

impl DetectionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Whether a session has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// The mode of the active session, if any.
    pub fn active_mode(&self) -> Option<SessionMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    /// Starts live capture from the default input device.
    ///
    /// A no-op when live capture is already running. A running
    /// synthetic feed is stopped first. Device acquisition happens on
    /// the worker; failures surface once via
    /// [`DetectionObserver::on_permission_denied`].
    pub fn start_capture(&mut self, observer: Arc<dyn DetectionObserver>) {
        if self.active_mode() == Some(SessionMode::Live) {
            eprintln!("[ENGINE] Live capture already running");
            return;
        }
        self.stop();

        let (event_tx, event_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (control_tx, control_rx) = unbounded();
        let config = self.config.clone();

        let dispatcher = spawn_dispatcher(event_rx, observer);
        let worker =
            thread::spawn(move || run_capture_worker(config, control_rx, shutdown_rx, event_tx));

        eprintln!("[ENGINE] Live capture session started");
        self.session = Some(Session {
            mode: SessionMode::Live,
            shutdown_tx,
            control_tx,
            worker: Some(worker),
            dispatcher: Some(dispatcher),
        });
    }

    /// Replays a sequence of note names at a fixed delay, bypassing the
    /// audio device entirely.
    ///
    /// Useful for deterministic testing of downstream consumers without
    /// real audio hardware. A running live capture is stopped first.
    /// Unknown note names are skipped with a log line.
    pub fn start_synthetic(
        &mut self,
        notes: Vec<String>,
        note_delay: Duration,
        observer: Arc<dyn DetectionObserver>,
    ) {
        self.stop();

        let (event_tx, event_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (control_tx, _control_rx) = unbounded();

        let dispatcher = spawn_dispatcher(event_rx, observer);
        let worker =
            thread::spawn(move || run_synthetic_worker(notes, note_delay, shutdown_rx, event_tx));

        eprintln!("[ENGINE] Synthetic feed session started");
        self.session = Some(Session {
            mode: SessionMode::Synthetic,
            shutdown_tx,
            control_tx,
            worker: Some(worker),
            dispatcher: Some(dispatcher),
        });
    }

    /// Stops the active session, if any, and waits for its threads.
    ///
    /// The worker observes the stop request between device reads, so
    /// the wait is bounded by one read timeout. Once this returns, the
    /// device handle is released and no further callbacks fire.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            eprintln!("[ENGINE] Stopping {:?} session...", session.mode);
            let _ = session.shutdown_tx.try_send(());
            if let Some(handle) = session.worker.take() {
                let _ = handle.join();
            }
            // The worker held the event sender; after the join the
            // dispatcher drains remaining events and exits.
            if let Some(handle) = session.dispatcher.take() {
                let _ = handle.join();
            }
            eprintln!("[ENGINE] Session stopped");
        }
    }

    /// Restricts detections to a frequency band (or lifts it). Applied
    /// by the live worker on its next frame; also kept for future
    /// sessions.
    pub fn set_expected_range(&mut self, range: Option<(f32, f32)>) {
        self.config.expected_range = range;
        if let Some(session) = &self.session {
            let _ = session.control_tx.send(ControlMsg::SetExpectedRange(range));
        }
    }

    /// Selects the tuning target (or clears it). Applied by the live
    /// worker on its next frame; also kept for future sessions.
    pub fn set_target(&mut self, target: Option<TuningTarget>) {
        self.config.target = target.clone();
        if let Some(session) = &self.session {
            let _ = session.control_tx.send(ControlMsg::SetTarget(target));
        }
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Delivers events to the observer in capture order.
fn spawn_dispatcher(event_rx: Receiver<Event>, observer: Arc<dyn DetectionObserver>) -> JoinHandle<()> {
    thread::spawn(move || {
        for event in event_rx.iter() {
            match event {
                Event::Stable(stable) => {
                    observer.on_stable_note(&stable.note, stable.cents);
                    observer.on_stable_pitch(&stable.note, stable.frequency, stable.cents);
                }
                Event::PermissionDenied => observer.on_permission_denied(),
            }
        }
    })
}

/// The live capture worker: owns the device stream, the frame buffer
/// and the stability filter for the session's lifetime.
fn run_capture_worker(
    config: EngineConfig,
    control_rx: Receiver<ControlMsg>,
    shutdown_rx: Receiver<()>,
    event_tx: Sender<Event>,
) {
    eprintln!("[WORKER] Starting capture worker...");
    let (chunk_tx, chunk_rx) = bounded::<Vec<f32>>(8);

    let (stream, sample_rate) = match audio::start_capture(chunk_tx, config.sample_rate, config.hop_size)
    {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("[WORKER] Failed to start audio capture: {e}");
            let _ = event_tx.send(Event::PermissionDenied);
            return;
        }
    };

    let mut frames = FrameBuffer::new(config.frame_size);
    let mut estimator = config
        .estimator
        .build(sample_rate, config.frame_size, &config.gates);
    let mut stability = StabilityFilter::new(config.stability.clone());
    stability.set_expected_range(config.expected_range);
    stability.set_target(config.target.clone());

    eprintln!("[WORKER] Entering detection loop...");
    loop {
        select! {
            recv(chunk_rx) -> msg => match msg {
                Ok(chunk) => {
                    if let Some(frame) = frames.push(&chunk) {
                        let estimate = estimator.estimate(&frame);
                        if let Some(stable) = stability.observe(estimate) {
                            if event_tx.send(Event::Stable(stable)).is_err() {
                                eprintln!("[WORKER] Dispatcher gone, exiting");
                                break;
                            }
                        }
                    }
                }
                Err(_) => {
                    eprintln!("[WORKER] Capture channel closed");
                    break;
                }
            },
            recv(control_rx) -> msg => match msg {
                Ok(ControlMsg::SetExpectedRange(range)) => stability.set_expected_range(range),
                Ok(ControlMsg::SetTarget(target)) => stability.set_target(target),
                Err(_) => break, // engine dropped without stop
            },
            recv(shutdown_rx) -> _ => {
                eprintln!("[WORKER] Received shutdown signal");
                break;
            }
        }
    }

    eprintln!("[WORKER] Stopping stream and exiting...");
    if let Err(e) = stream.pause() {
        eprintln!("[WORKER] Error pausing stream: {e}");
    }
    drop(stream);
    eprintln!("[WORKER] Capture worker finished");
}

/// The synthetic feed worker: replays note names at a fixed delay.
fn run_synthetic_worker(
    notes: Vec<String>,
    note_delay: Duration,
    shutdown_rx: Receiver<()>,
    event_tx: Sender<Event>,
) {
    eprintln!("[FEED] Starting synthetic feed ({} notes)...", notes.len());
    for name in &notes {
        // The stop flag is observed between notes.
        match shutdown_rx.recv_timeout(note_delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                eprintln!("[FEED] Stopped");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let Some(frequency) = tuning::note_to_frequency(name) else {
            eprintln!("[FEED] Skipping unknown note name: {name}");
            continue;
        };
        let note = tuning::normalize_to_sharp(tuning::pitch_class(name)).to_string();
        let stable = StablePitch {
            note,
            frequency,
            cents: 0.0,
        };
        if event_tx.send(Event::Stable(stable)).is_err() {
            return;
        }
    }
    eprintln!("[FEED] Sequence complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingObserver {
        notes: Mutex<Vec<(String, f32)>>,
        denied: AtomicBool,
    }

    impl DetectionObserver for CollectingObserver {
        fn on_stable_note(&self, note: &str, cents: f32) {
            self.notes.lock().unwrap().push((note.to_string(), cents));
        }

        fn on_permission_denied(&self) {
            self.denied.store(true, Ordering::SeqCst);
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn synthetic_feed_delivers_notes_in_order() {
        let observer = Arc::new(CollectingObserver::default());
        let mut engine = DetectionEngine::new(EngineConfig::default());
        engine.start_synthetic(
            names(&["E2", "A2", "D3"]),
            Duration::from_millis(5),
            observer.clone(),
        );
        assert_eq!(engine.active_mode(), Some(SessionMode::Synthetic));

        thread::sleep(Duration::from_millis(100));
        engine.stop();
        assert!(!engine.is_running());

        let notes = observer.notes.lock().unwrap();
        let classes: Vec<&str> = notes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(classes, vec!["E", "A", "D"]);
        assert!(notes.iter().all(|&(_, cents)| cents == 0.0));
    }

    #[test]
    fn synthetic_feed_normalizes_flat_spellings() {
        let observer = Arc::new(CollectingObserver::default());
        let mut engine = DetectionEngine::new(EngineConfig::default());
        engine.start_synthetic(names(&["Bb2"]), Duration::from_millis(5), observer.clone());
        thread::sleep(Duration::from_millis(60));
        engine.stop();

        let notes = observer.notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, "A#");
    }

    #[test]
    fn starting_a_new_session_replaces_the_running_one() {
        let observer = Arc::new(CollectingObserver::default());
        let mut engine = DetectionEngine::new(EngineConfig::default());

        let endless_c: Vec<String> = vec!["C".to_string(); 200];
        engine.start_synthetic(endless_c, Duration::from_millis(10), observer.clone());
        assert_eq!(engine.active_mode(), Some(SessionMode::Synthetic));
        thread::sleep(Duration::from_millis(35));

        // The second feed must first cooperatively cancel the running one.
        engine.start_synthetic(names(&["G", "G", "G"]), Duration::from_millis(5), observer.clone());
        assert_eq!(engine.active_mode(), Some(SessionMode::Synthetic));
        thread::sleep(Duration::from_millis(80));
        engine.stop();

        let notes = observer.notes.lock().unwrap();
        let classes: Vec<&str> = notes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(&classes[classes.len() - 3..], ["G", "G", "G"]);
        // The first feed stopped mid-sequence: every earlier event is a C,
        // and nothing interleaves after the handover.
        assert!(classes[..classes.len() - 3].iter().all(|&c| c == "C"));
        assert!(classes.len() < 200, "the first feed must not have run to completion");
    }

    #[test]
    fn stop_without_a_session_is_a_noop() {
        let mut engine = DetectionEngine::new(EngineConfig::default());
        assert!(!engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
        assert_eq!(engine.active_mode(), None);
    }

    #[test]
    fn no_callbacks_fire_after_stop_returns() {
        let observer = Arc::new(CollectingObserver::default());
        let mut engine = DetectionEngine::new(EngineConfig::default());
        engine.start_synthetic(
            vec!["A".to_string(); 100],
            Duration::from_millis(5),
            observer.clone(),
        );
        thread::sleep(Duration::from_millis(40));
        engine.stop();

        let count_at_stop = observer.notes.lock().unwrap().len();
        thread::sleep(Duration::from_millis(50));
        let count_later = observer.notes.lock().unwrap().len();
        assert_eq!(count_at_stop, count_later);
    }

    #[test]
    fn config_updates_are_kept_for_future_sessions() {
        let mut engine = DetectionEngine::new(EngineConfig::default());
        engine.set_expected_range(Some((100.0, 120.0)));
        engine.set_target(Some(tuning::standard_guitar_targets()[1].clone()));
        assert_eq!(engine.config.expected_range, Some((100.0, 120.0)));
        assert_eq!(engine.config.target.as_ref().unwrap().label, "A2");
    }
}
