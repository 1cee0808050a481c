//! Canonical WAV output for recorded I/Q.
//!
//! Files are standard PCM WAV, 2 channels (I, Q), 16-bit little-endian,
//! at the stream's sample rate. The filename convention
//! `<instance>_<freq_hz>_<ISO8601>.wav` keeps multi-receiver recordings
//! sortable and lets the TDOA tooling recover metadata without opening
//! the companion JSON.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Builds the canonical recording filename.
#[must_use]
pub fn recording_filename(instance: &str, freq_hz: i64, started: DateTime<Utc>) -> String {
    // Colons are not filesystem-safe everywhere; the ISO stamp keeps
    // date/time separators but drops sub-second noise.
    let stamp = started
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .replace(':', "-");
    format!("{instance}_{freq_hz}_{stamp}.wav")
}

/// Streaming WAV writer for interleaved (I, Q) int16 samples.
pub struct IqWavWriter {
    writer: hound::WavWriter<BufWriter<File>>,
    path: PathBuf,
    samples_written: u64,
    sample_rate: u32,
}

impl IqWavWriter {
    /// Creates the file with a 2-channel 16-bit spec at `sample_rate`.
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            samples_written: 0,
            sample_rate,
        })
    }

    /// Appends interleaved (I, Q) samples.
    pub fn write_interleaved(&mut self, samples: &[i16]) -> Result<()> {
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        self.samples_written += samples.len() as u64 / 2;
        Ok(())
    }

    /// Seconds of audio written so far.
    #[must_use]
    pub fn seconds_written(&self) -> f64 {
        self.samples_written as f64 / self.sample_rate.max(1) as f64
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finalizes the RIFF headers.
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize().context("Failed to finalize WAV")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_convention() {
        let started = Utc.with_ymd_and_hms(2025, 8, 1, 12, 30, 5).unwrap();
        let name = recording_filename("rx-north", 14_074_000, started);
        assert_eq!(name, "rx-north_14074000_2025-08-01T12-30-05Z.wav");
    }

    #[test]
    fn writes_canonical_two_channel_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wav");
        let mut writer = IqWavWriter::create(&path, 48_000).unwrap();
        // 1000 (I, Q) pairs.
        let samples: Vec<i16> = (0..2000).map(|i| (i % 100) as i16).collect();
        writer.write_interleaved(&samples).unwrap();
        assert!((writer.seconds_written() - 1000.0 / 48_000.0).abs() < 1e-9);
        writer.finalize().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        let read: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(read, samples);
    }
}
