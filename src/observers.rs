use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::{Observer, PcmChunk, CHANNELS, FRAMES_PER_CHUNK, SAMPLE_RATE};


/// Append every observed chunk to a 48kHz stereo 16-bit WAV file.
///
/// The header is only complete after `finalize`; dropping the recorder finalizes too but swallows
/// any error.
pub struct WavRecorder {
    writer: WavWriter<BufWriter<File>>,
    frames: u64,
}


impl WavRecorder {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let spec = WavSpec {
            channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let path = path.as_ref();
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("failed to create recording {}", path.display()))?;
        Ok(WavRecorder { writer, frames: 0 })
    }

    /// Stereo frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finalize(self) -> Result<()> {
        self.writer.finalize().context("failed to finalize recording")
    }
}


impl Observer for WavRecorder {
    fn observe(&mut self, chunk: &PcmChunk) -> Result<()> {
        for (left, right) in chunk.frames() {
            self.writer.write_sample(left)?;
            self.writer.write_sample(right)?;
        }
        self.frames += FRAMES_PER_CHUNK as u64;
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;

    use hound::WavReader;

    use crate::CHUNK_BYTES;

    #[test]
    fn test_recording_round_trip() {
        let path = std::env::temp_dir().join(format!("sonify-recorder-{}.wav", std::process::id()));

        let mut bytes = vec![0u8; CHUNK_BYTES];
        bytes[0..2].copy_from_slice(&1000i16.to_le_bytes());
        bytes[2..4].copy_from_slice(&(-1000i16).to_le_bytes());
        let chunk = PcmChunk::try_from(bytes).unwrap();

        let mut recorder = WavRecorder::create(&path).unwrap();
        recorder.observe(&chunk).unwrap();
        recorder.observe(&PcmChunk::silence()).unwrap();
        assert_eq!(recorder.frames(), 4800);
        recorder.finalize().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!((spec.channels, spec.sample_rate, spec.bits_per_sample), (2, 48_000, 16));
        assert_eq!(reader.duration(), 4800);
        let samples: Vec<i16> = reader.samples::<i16>().take(3).map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1000, -1000, 0]);

        std::fs::remove_file(&path).unwrap();
    }
}
