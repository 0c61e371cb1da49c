//! Configuration loading and parsing.
//!
//! Every field is optional; command-line flags override what the file sets.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tonearm::config::EngineConfig;
use tonearm::encoder::{BITRATE_OPTION, QUALITY_OPTION};

/// Top-level config loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct TonearmConfig {
    /// Output device by substring match.
    pub device: Option<String>,
    /// Queue buffer target in seconds.
    pub buffer_seconds: Option<f32>,
    /// Resampler chunk size in frames.
    pub chunk_frames: Option<usize>,
    /// Output callback refill cap in frames.
    pub refill_max_frames: Option<usize>,
    /// Apply replay gain during playback.
    pub replay_gain: Option<bool>,
    /// Per-codec encoder defaults.
    pub encoder: Option<EncoderSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EncoderSection {
    pub mp3: Option<Mp3Section>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Mp3Section {
    /// Bit rate in kbit/s, e.g. `192`.
    pub bitrate: Option<u32>,
    /// `Best`, `High`, `Standard` or `Fast`.
    pub quality: Option<String>,
}

impl TonearmConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<TonearmConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Engine settings from this file on top of the library defaults.
    pub fn engine_config(&self) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        if let Some(v) = self.buffer_seconds {
            cfg.buffer_seconds = v;
        }
        if let Some(v) = self.chunk_frames {
            cfg.chunk_frames = v;
        }
        if let Some(v) = self.refill_max_frames {
            cfg.refill_max_frames = v;
        }
        if let Some(v) = self.replay_gain {
            cfg.replay_gain = v;
        }
        cfg.encoder_options = self.mp3_options();
        cfg
    }

    /// MP3 option choices in the labels the encoder offers.
    pub fn mp3_options(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let Some(mp3) = self.encoder.as_ref().and_then(|e| e.mp3.as_ref()) else {
            return out;
        };
        if let Some(kbps) = mp3.bitrate {
            out.insert(BITRATE_OPTION.to_string(), format!("{kbps} kbps"));
        }
        if let Some(quality) = mp3.quality.as_ref() {
            out.insert(QUALITY_OPTION.to_string(), quality.clone());
        }
        out
    }
}
