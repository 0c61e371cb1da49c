//! RIFF/WAVE output through `hound`.

use std::fs::File;
use std::io::BufWriter;

use anyhow::{Context, Result, bail};

use super::{OptionTable, PcmWriter, TargetCodec, integer_depth};
use crate::types::{CodecKind, FormatDescriptor};

/// 16-bit PCM for sources up to 16 bits, 24-bit otherwise. No options.
#[derive(Clone, Debug, Default)]
pub struct WavCodec;

impl TargetCodec for WavCodec {
    const KIND: CodecKind = CodecKind::Wav;

    fn options(&self) -> Option<OptionTable> {
        None
    }

    fn apply_option(&mut self, _name: &str, _label: &str) -> bool {
        false
    }

    fn accept(&mut self, format: &FormatDescriptor) -> Result<()> {
        if format.channels == 0 || format.sample_rate_hz == 0 {
            bail!("cannot write WAV for {format}");
        }
        Ok(())
    }

    fn sample_bits(&self, format: &FormatDescriptor) -> u16 {
        integer_depth(format)
    }

    fn open_writer(&self, file: File, format: &FormatDescriptor) -> Result<Box<dyn PcmWriter>> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate_hz,
            bits_per_sample: integer_depth(format),
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::new(BufWriter::new(file), spec).context("write WAV header")?;
        Ok(Box::new(WavWriter { inner: writer }))
    }
}

struct WavWriter {
    inner: hound::WavWriter<BufWriter<File>>,
}

impl PcmWriter for WavWriter {
    fn write(&mut self, samples: &[i32]) -> Result<()> {
        for s in samples {
            self.inner.write_sample(*s).context("write WAV samples")?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.inner.finalize().context("finalize WAV")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{self, Decoder};
    use crate::diagnostics::Diagnostics;
    use crate::detect::tests::temp_path;
    use crate::encoder::tests::{tagged_source, write_source_wav};
    use crate::encoder::{Encoder, WavEncoder, part_path};
    use crate::meta::{CanonicalKey, ENCODER_ID};

    #[test]
    fn wav_to_wav_is_sample_exact_and_keeps_tags() {
        let src = temp_path("src.wav");
        let samples = write_source_wav(&src, 22_050, 2, 5_000);
        let target = temp_path("copy.wav");

        let mut enc = WavEncoder::new(WavCodec, Diagnostics::new());
        enc.set_source(tagged_source(&src));
        assert!(enc.encode_audio(&target), "{:?}", enc.last_error());
        assert!(!enc.has_failed());
        assert_eq!(enc.encoded_percent(), 1.0);
        assert!(!part_path(&target).exists());

        let reader = hound::WavReader::open(&target).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.spec().sample_rate, 22_050);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);

        let out = decoder::load_file(&target, &Diagnostics::new()).unwrap();
        let tags = out.metadata();
        assert_eq!(tags.text(CanonicalKey::Title).as_deref(), Some("Test Tone"));
        assert_eq!(tags.text(CanonicalKey::Artist).as_deref(), Some("Tonearm"));
        assert_eq!(tags.text(CanonicalKey::Encoder).as_deref(), Some(ENCODER_ID));
    }

    #[test]
    fn eight_bit_source_is_widened() {
        let src = temp_path("u8.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&src, spec).unwrap();
        for s in [-128i8, -1, 0, 1, 127] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let target = temp_path("widened.wav");
        let mut enc = WavEncoder::new(WavCodec, Diagnostics::new());
        enc.set_source(decoder::load_file(&src, &Diagnostics::new()).unwrap());
        assert!(enc.encode_audio(&target), "{:?}", enc.last_error());
        let decoded: Vec<i16> = hound::WavReader::open(&target)
            .unwrap()
            .into_samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(decoded, vec![-32768, -256, 0, 256, 32512]);
    }
}
