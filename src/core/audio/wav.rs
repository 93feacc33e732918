//! WAV convenience loader for bounded transcription.
//!
//! Decodes a RIFF/WAV container into raw 16-bit little-endian PCM plus the
//! parameters needed to build the matching content type.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use hound::{SampleFormat, WavReader};

use crate::errors::{TranscribeError, TranscribeResult};

/// Decoded WAV audio ready to feed a bounded source.
#[derive(Debug, Clone)]
pub struct WavAudio {
    /// PCM data, 16-bit little-endian.
    pub data: Bytes,
    /// Samples per second.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
}

impl WavAudio {
    /// The `audio/l16` content type describing this audio.
    pub fn content_type(&self) -> String {
        format!(
            "audio/l16;rate={};channels={}",
            self.sample_rate, self.channels
        )
    }
}

/// Read a WAV file from disk.
pub fn read_wav_file(path: impl AsRef<Path>) -> TranscribeResult<WavAudio> {
    let reader = WavReader::open(path.as_ref())
        .map_err(|e| TranscribeError::Capture(format!("unreadable WAV file: {e}")))?;
    decode(reader)
}

/// Read WAV audio from an in-memory buffer.
pub fn read_wav_bytes(bytes: &[u8]) -> TranscribeResult<WavAudio> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| TranscribeError::Capture(format!("unreadable WAV data: {e}")))?;
    decode(reader)
}

fn decode<R: std::io::Read>(mut reader: WavReader<R>) -> TranscribeResult<WavAudio> {
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| TranscribeError::Capture(format!("corrupt WAV samples: {e}")))?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| TranscribeError::Capture(format!("corrupt WAV samples: {e}")))?,
        (format, bits) => {
            return Err(TranscribeError::Capture(format!(
                "unsupported WAV sample format: {bits}-bit {format:?}"
            )));
        }
    };

    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(WavAudio {
        data: Bytes::from(data),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn wav_fixture(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer.write_sample(*s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_read_wav_bytes_roundtrips_pcm() {
        let bytes = wav_fixture(16000, &[0, 1, -1, i16::MAX, i16::MIN]);
        let audio = read_wav_bytes(&bytes).unwrap();

        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.data.len(), 10);
        assert_eq!(&audio.data[0..2], &0i16.to_le_bytes());
        assert_eq!(&audio.data[6..8], &i16::MAX.to_le_bytes());
        assert_eq!(audio.content_type(), "audio/l16;rate=16000;channels=1");
    }

    #[test]
    fn test_read_wav_bytes_rejects_garbage() {
        match read_wav_bytes(b"definitely not a wav") {
            Err(TranscribeError::Capture(_)) => {}
            other => panic!("expected capture error, got {other:?}"),
        }
    }
}
