//! # Pitch CLI - Terminal front-end for the detection engine
//!
//! Exercises the observer interface of `pitch-core` from the command
//! line: a live chromatic/string tuner, a synthetic note feed for
//! testing downstream consumers without a microphone, and a listing of
//! the active tuning table.
//!
//! ## Architecture
//! - **Main thread**: parses arguments, starts a session, prints events
//! - **Engine threads**: capture worker and dispatcher inside pitch-core
//! - **Communication**: observer callbacks forwarded over a crossbeam
//!   channel so printing happens on the main thread

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};

use pitch_core::engine::{DetectionEngine, DetectionObserver, EngineConfig};
use pitch_core::pitch::EstimatorKind;
use pitch_core::tuning::{self, TuningTarget};

#[derive(Parser, Debug)]
#[command(name = "pitch-cli", about = "Terminal tuner driven by the pitch-core detection engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen on the default input device and report stable notes
    Tune {
        /// Lock onto one string of the tuning table (e.g. E2, A2)
        #[arg(short, long)]
        string: Option<String>,

        /// Pitch-estimation algorithm
        #[arg(short, long, value_enum, default_value_t = Estimator::Spectral)]
        estimator: Estimator,

        /// JSON file with a custom tuning table (replaces the guitar table)
        #[arg(long)]
        tuning_file: Option<PathBuf>,

        /// How long to listen, in seconds
        #[arg(short, long, default_value_t = 30)]
        duration: u64,
    },

    /// Replay a synthetic note sequence through the observer interface
    Feed {
        /// Note names to replay, in order (e.g. E2 A2 D3)
        #[arg(required = true)]
        notes: Vec<String>,

        /// Delay between notes in milliseconds
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
    },

    /// Print the tuning table the tuner would use
    Strings {
        /// JSON file with a custom tuning table
        #[arg(long)]
        tuning_file: Option<PathBuf>,
    },
}

/// Command-line spelling of [`EstimatorKind`].
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Estimator {
    /// FFT + harmonic product spectrum
    Spectral,
    /// Normalized autocorrelation (NSDF)
    TimeDomain,
}

impl From<Estimator> for EstimatorKind {
    fn from(choice: Estimator) -> Self {
        match choice {
            Estimator::Spectral => EstimatorKind::Spectral,
            Estimator::TimeDomain => EstimatorKind::TimeDomain,
        }
    }
}

/// Events forwarded from the engine's dispatcher to the main thread.
enum TunerEvent {
    Stable {
        note: String,
        frequency: f32,
        cents: f32,
    },
    PermissionDenied,
}

/// Observer that relays callbacks into a channel.
///
/// The dispatcher thread must never block on terminal output, so the
/// actual printing happens on the main thread's receive loop.
struct ChannelObserver {
    sender: Sender<TunerEvent>,
}

impl DetectionObserver for ChannelObserver {
    fn on_stable_note(&self, _note: &str, _cents: f32) {
        // on_stable_pitch carries the same event with the frequency.
    }

    fn on_stable_pitch(&self, note: &str, frequency: f32, cents: f32) {
        let _ = self.sender.send(TunerEvent::Stable {
            note: note.to_string(),
            frequency,
            cents,
        });
    }

    fn on_permission_denied(&self) {
        let _ = self.sender.send(TunerEvent::PermissionDenied);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Tune {
            string,
            estimator,
            tuning_file,
            duration,
        } => run_tuner(string, estimator.into(), tuning_file, duration),
        Command::Feed { notes, delay_ms } => run_feed(notes, delay_ms),
        Command::Strings { tuning_file } => {
            for target in load_targets(tuning_file.as_deref())? {
                println!(
                    "{:<4} {:7.2} Hz  (accepts {:.2}-{:.2} Hz)",
                    target.label, target.target_hz, target.min_hz, target.max_hz
                );
            }
            Ok(())
        }
    }
}

/// Runs a live tuning session and prints every stable note.
fn run_tuner(
    string: Option<String>,
    estimator: EstimatorKind,
    tuning_file: Option<PathBuf>,
    duration: u64,
) -> Result<()> {
    let target = match &string {
        Some(label) => Some(find_target(label, tuning_file.as_deref())?),
        None => None,
    };

    let config = EngineConfig {
        estimator,
        target: target.clone(),
        ..EngineConfig::default()
    };

    let (tx, rx) = unbounded();
    let observer = Arc::new(ChannelObserver { sender: tx });
    let mut engine = DetectionEngine::new(config);
    engine.start_capture(observer);

    match &target {
        Some(t) => println!("Tuning {} to {:.2} Hz ({estimator:?})...", t.label, t.target_hz),
        None => println!("Listening in chromatic mode ({estimator:?})..."),
    }

    let deadline = Instant::now() + Duration::from_secs(duration);
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(TunerEvent::Stable {
                note,
                frequency,
                cents,
            }) => println!("{note:<3} {frequency:8.2} Hz  {}", describe_cents(cents)),
            Ok(TunerEvent::PermissionDenied) => {
                engine.stop();
                anyhow::bail!(
                    "could not open the input device; check that a microphone \
                     is connected and recording permission is granted"
                );
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    engine.stop();
    Ok(())
}

/// Replays a synthetic note sequence and prints what the observer sees.
fn run_feed(notes: Vec<String>, delay_ms: u64) -> Result<()> {
    let expected = notes.len();
    let (tx, rx) = unbounded();
    let observer = Arc::new(ChannelObserver { sender: tx });
    let mut engine = DetectionEngine::new(EngineConfig::default());
    engine.start_synthetic(notes, Duration::from_millis(delay_ms), observer);

    println!("Replaying {expected} notes every {delay_ms} ms...");
    let mut received = 0;
    // Unknown names are skipped by the feed, so also stop once the whole
    // sequence worth of delays has elapsed.
    let deadline = Instant::now() + Duration::from_millis(delay_ms * (expected as u64 + 2));
    while received < expected {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(TunerEvent::Stable { note, frequency, .. }) => {
                received += 1;
                println!("{note:<3} {frequency:8.2} Hz");
            }
            // The feed opens no device, so no permission event can fire.
            Ok(TunerEvent::PermissionDenied) => {}
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    engine.stop();
    Ok(())
}

/// Formats a cent deviation with tuning advice.
fn describe_cents(cents: f32) -> String {
    if cents.abs() <= 5.0 {
        format!("{cents:+6.1} cents  in tune")
    } else if cents > 0.0 {
        format!("{cents:+6.1} cents  tune down")
    } else {
        format!("{cents:+6.1} cents  tune up")
    }
}

/// Resolves the tuning table: a custom JSON file when given, otherwise
/// the standard guitar table.
fn load_targets(tuning_file: Option<&Path>) -> Result<Vec<TuningTarget>> {
    match tuning_file {
        Some(path) => load_tuning_table(path),
        None => Ok(tuning::standard_guitar_targets().to_vec()),
    }
}

/// Loads a tuning table from a JSON file.
///
/// The file holds an array of targets in the same shape the engine
/// uses, e.g. `[{"label": "E2", "min_hz": 78.0, "target_hz": 82.41,
/// "max_hz": 87.0}, ...]`.
fn load_tuning_table(path: &Path) -> Result<Vec<TuningTarget>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("could not read tuning table {}", path.display()))?;
    let targets: Vec<TuningTarget> = serde_json::from_str(&data)
        .with_context(|| format!("invalid tuning table in {}", path.display()))?;
    Ok(targets)
}

/// Finds the target whose label matches `string`.
///
/// Exact labels win; a bare pitch class ("e", "F#") falls back to the
/// first enharmonically matching entry.
fn find_target(string: &str, tuning_file: Option<&Path>) -> Result<TuningTarget> {
    let targets = load_targets(tuning_file)?;
    targets
        .iter()
        .find(|t| t.label.eq_ignore_ascii_case(string))
        .or_else(|| {
            targets
                .iter()
                .find(|t| tuning::same_pitch_class(&t.label, string))
        })
        .cloned()
        .with_context(|| {
            let labels: Vec<&str> = targets.iter().map(|t| t.label.as_str()).collect();
            format!("unknown string {string:?}; available: {}", labels.join(", "))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_advice_covers_all_directions() {
        assert!(describe_cents(0.0).contains("in tune"));
        assert!(describe_cents(-3.0).contains("in tune"));
        assert!(describe_cents(12.0).contains("tune down"));
        assert!(describe_cents(-12.0).contains("tune up"));
    }

    #[test]
    fn default_table_is_the_standard_guitar() {
        let targets = load_targets(None).unwrap();
        assert_eq!(targets.len(), 6);
        assert_eq!(targets[0].label, "E2");
    }

    #[test]
    fn string_lookup_prefers_exact_labels() {
        assert_eq!(find_target("e2", None).unwrap().label, "E2");
        // Both E strings are in the table; an exact octave must not be
        // shadowed by the lower one.
        assert_eq!(find_target("E4", None).unwrap().label, "E4");
        // A bare pitch class falls back to the first match.
        assert_eq!(find_target("e", None).unwrap().label, "E2");
        assert!(find_target("Z9", None).is_err());
    }

    #[test]
    fn tuning_tables_load_from_json() {
        let dir = std::env::temp_dir().join("pitch-cli-test-table");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("table.json");
        std::fs::write(
            &path,
            r#"[{"label": "D2", "min_hz": 69.0, "target_hz": 73.42, "max_hz": 78.0}]"#,
        )
        .unwrap();

        let targets = load_tuning_table(&path).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].label, "D2");
        assert!((targets[0].target_hz - 73.42).abs() < 1e-3);

        std::fs::remove_file(&path).unwrap();
    }
}
