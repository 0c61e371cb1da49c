use std::collections::BTreeMap;
use std::time::Duration;

use crate::decoder::DEFAULT_CHUNK_FRAMES;

/// Tuning parameters shared by the decode, resample and output stages.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for queue sizing.
    pub buffer_seconds: f32,
    /// Frames per decoder `next_sample()` chunk (byte-rate decoders).
    pub decode_chunk_frames: usize,
    /// How long `seek()` waits for the stream thread to apply a request.
    pub control_timeout: Duration,
    /// Scale samples by the file's replay gain.
    pub replay_gain: bool,
    /// Encoder option choices applied when a conversion does not pass its own.
    pub encoder_options: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
            decode_chunk_frames: DEFAULT_CHUNK_FRAMES,
            control_timeout: Duration::from_secs(5),
            replay_gain: false,
            encoder_options: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Buffer length used for queue sizing, falling back to the default on bad input.
    pub fn effective_buffer_seconds(&self) -> f32 {
        if self.buffer_seconds.is_finite() && self.buffer_seconds > 0.0 {
            self.buffer_seconds
        } else {
            Self::default().buffer_seconds
        }
    }
}
