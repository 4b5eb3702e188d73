//! # Frame Buffer Module
//!
//! Accumulates raw capture chunks into fixed-size analysis frames.
//! The capture source delivers small hop-sized blocks of samples; this
//! buffer maintains a ring of the most recent `frame_size` samples and
//! hands out an immutable frame once enough new material has arrived.

/// Number of samples per analysis frame.
///
/// Larger frames provide more frequency resolution but increase latency.
pub const DEFAULT_FRAME_SIZE: usize = 2048;

/// Number of samples the capture source delivers per chunk.
pub const DEFAULT_HOP_SIZE: usize = 256;

/// Converts raw signed 16-bit samples to floating point in [-1, 1].
///
/// The capture device is trusted to deliver in-range values, so no
/// further validation is performed.
pub fn samples_from_i16(raw: &[i16]) -> Vec<f32> {
    raw.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Sliding buffer that turns a stream of capture chunks into analysis frames.
///
/// The buffer holds at most `frame_size` samples. A chunk that would
/// overflow the buffer shifts out exactly enough of the oldest samples to
/// make room; incoming samples are never dropped. A frame is emitted only
/// once the buffer is full and `frame_size` new samples have accumulated
/// since the previous emission, so feeding hop-sized chunks produces
/// exactly one frame every `frame_size / hop_size` pushes after the
/// initial fill.
#[derive(Debug)]
pub struct FrameBuffer {
    samples: Vec<f32>,
    frame_size: usize,
    since_emit: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer for frames of `frame_size` samples.
    ///
    /// The frame size is fixed for the lifetime of the buffer.
    pub fn new(frame_size: usize) -> Self {
        Self {
            samples: Vec::with_capacity(frame_size),
            frame_size,
            since_emit: 0,
        }
    }

    /// The configured frame length in samples.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Feeds one capture chunk and returns a full frame when one is due.
    ///
    /// The returned frame is a copy; the caller may hand it to an
    /// estimator without further synchronization. Callers must not block
    /// on a `None` result — it simply means more samples are needed.
    pub fn push(&mut self, chunk: &[f32]) -> Option<Vec<f32>> {
        let mut incoming = chunk;
        if incoming.len() >= self.frame_size {
            // A single chunk covers a whole frame; only its tail survives.
            self.samples.clear();
            incoming = &incoming[incoming.len() - self.frame_size..];
        } else if self.samples.len() + incoming.len() > self.frame_size {
            // Shift out exactly enough old samples to make room.
            let excess = self.samples.len() + incoming.len() - self.frame_size;
            self.samples.drain(..excess);
        }
        self.samples.extend_from_slice(incoming);
        self.since_emit += chunk.len();

        if self.samples.len() == self.frame_size && self.since_emit >= self.frame_size {
            self.since_emit = 0;
            return Some(self.samples.clone());
        }
        None
    }
}
