//! Audio decoding, tagging, encoding and playback for the formats Tonearm handles.

pub mod config;
pub mod convert;
pub mod cpal_sink;
pub mod decoder;
pub mod detect;
pub mod device;
pub mod diagnostics;
pub mod encoder;
pub mod engine;
pub mod iff;
pub mod meta;
pub mod notify;
pub mod output;
pub mod pcm;
pub mod queue;
pub mod resample;
pub mod sink;
pub mod types;

pub use decoder::{Decoder, load_file};
pub use detect::classify;
pub use diagnostics::Diagnostics;
pub use encoder::{Encoder, encoder_for};
pub use types::{CodecKind, FormatDescriptor, SampleBuffer};
