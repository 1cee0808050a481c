//! Frame types flowing between the ingest, DSP and encoder stages.

use std::sync::Arc;

use num_complex::Complex;

/// One contiguous block of wideband I/Q samples from the SDR front-end.
///
/// Frames are reference-counted so the fan-out bus can hand the same block
/// to every consumer without copying sample data.
#[derive(Debug, Clone)]
pub struct IqFrame {
    /// Complex baseband samples.
    pub samples: Arc<[Complex<f32>]>,
    /// RTP sequence number of the packet that started this frame.
    pub rtp_seq: u16,
    /// RTP media timestamp.
    pub rtp_ts: u32,
    /// Absolute GPS wall-clock of the first sample (nanoseconds).
    pub gps_ts_ns: u64,
    /// Wideband sample rate (Hz).
    pub sample_rate_hz: u32,
    /// Hardware center frequency (Hz).
    pub center_hz: i64,
    /// Channel-parameter generation. Consumers re-read rate/center when
    /// this changes.
    pub generation: u64,
    /// Number of samples lost immediately before this frame (0 when the
    /// stream is contiguous). Downstream inserts equal-duration silence.
    pub gap_samples: u64,
}

impl IqFrame {
    /// Duration of this frame in nanoseconds.
    #[must_use]
    pub fn duration_ns(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1_000_000_000 / self.sample_rate_hz as u64
    }
}

/// One block of demodulated output: interleaved int16 samples.
///
/// `channels == 1` for audio modes; `channels == 2` for IQ passthrough,
/// where samples are interleaved (I, Q) pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
    pub channels: u8,
    pub sample_rate_hz: u32,
    /// Absolute GPS wall-clock of the first sample (nanoseconds).
    pub gps_ts_ns: u64,
}

impl PcmFrame {
    /// Duration of this frame in nanoseconds.
    #[must_use]
    pub fn duration_ns(&self) -> u64 {
        if self.sample_rate_hz == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1_000_000_000 / self.sample_rate_hz as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iq_frame_duration() {
        let frame = IqFrame {
            samples: vec![Complex::new(0.0, 0.0); 1200].into(),
            rtp_seq: 0,
            rtp_ts: 0,
            gps_ts_ns: 0,
            sample_rate_hz: 12_000,
            center_hz: 0,
            generation: 0,
            gap_samples: 0,
        };
        assert_eq!(frame.duration_ns(), 100_000_000);
    }

    #[test]
    fn stereo_pcm_duration_counts_frames_not_samples() {
        let frame = PcmFrame {
            samples: vec![0i16; 960],
            channels: 2,
            sample_rate_hz: 48_000,
            gps_ts_ns: 0,
        };
        assert_eq!(frame.duration_ns(), 10_000_000);
    }
}
