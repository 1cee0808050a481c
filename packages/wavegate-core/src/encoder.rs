//! Encoder/framer: serializes pipeline output into binary WebSocket frames.
//!
//! Every binary frame starts with a one-byte type code followed by a
//! big-endian `gps_ts_ns`. PCM/IQ frames alternate between a full header
//! (sample rate + channels) and a minimal header that re-uses the last
//! values; the full form is sent whenever either value changes.
//!
//! Wire layouts (all big-endian):
//!
//! ```text
//! PCM full     u8 type=0x01 | u64 gps_ts_ns | u32 sample_rate | u8 channels | i16 payload...
//! PCM minimal  u8 type=0x02 | u64 gps_ts_ns | i16 payload...
//! Spectrum     u8 type=0x03 | u64 gps_ts_ns | i64 center_hz | u32 bin_mhz | i8 noise_floor | u8 bins...
//! State        u8 type=0x04 | JSON bytes
//! Extension    u8 type=0x05 | payload verbatim
//! Heartbeat    u8 type=0x06
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WavegateError, WavegateResult};
use crate::frame::PcmFrame;
use crate::protocol_constants::{
    FRAME_TYPE_EXTENSION, FRAME_TYPE_HEARTBEAT, FRAME_TYPE_PCM_FULL, FRAME_TYPE_PCM_MINIMAL,
    FRAME_TYPE_SPECTRUM, FRAME_TYPE_STATE, OPUS_BITRATE, OPUS_FRAME_MS, PCM_HEADER_FULL_LEN,
    PCM_HEADER_MINIMAL_LEN,
};
use crate::spectrum::SpectrumFrame;

/// Zstd compression level for `pcm-zstd`. Level 1 keeps encode latency
/// under a frame period even on the widest IQ streams.
const ZSTD_LEVEL: i32 = 1;

/// Negotiated wire format for the audio/IQ stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Raw 16-bit big-endian PCM. The default.
    #[default]
    PcmBe,
    /// PCM compressed with zstd, one compressed frame per message.
    PcmZstd,
    /// Opus, mono only, server-fixed bitrate.
    Opus,
}

impl WireFormat {
    /// Parses the `format` URL query parameter.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pcm-be" => Some(Self::PcmBe),
            "pcm-zstd" => Some(Self::PcmZstd),
            "opus" => Some(Self::Opus),
            _ => None,
        }
    }

    /// Wire name of the format.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PcmBe => "pcm-be",
            Self::PcmZstd => "pcm-zstd",
            Self::Opus => "opus",
        }
    }
}

/// Stateful framer for one session's audio/IQ stream.
pub struct Encoder {
    format: WireFormat,
    last_rate: u32,
    last_channels: u8,
    opus: Option<opus::Encoder>,
    opus_rate: u32,
    opus_pending: Vec<i16>,
    opus_pending_gps_ns: u64,
    opus_buf: Vec<u8>,
    error_count: u64,
}

impl Encoder {
    /// Creates a framer. The Opus encoder is constructed lazily on the
    /// first frame, once the stream rate is known.
    #[must_use]
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            last_rate: 0,
            last_channels: 0,
            opus: None,
            opus_rate: 0,
            opus_pending: Vec::new(),
            opus_pending_gps_ns: 0,
            opus_buf: vec![0u8; 4000],
            error_count: 0,
        }
    }

    /// Negotiated format.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Total encoder errors (dropped frames) so far.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Encodes one PCM frame into zero or more wire packets appended to
    /// `out`. Encoder failures drop the frame, bump the error counter and
    /// return the error so the caller can track recurrence.
    pub fn encode(&mut self, frame: &PcmFrame, out: &mut Vec<Bytes>) -> WavegateResult<()> {
        match self.format {
            WireFormat::PcmBe => {
                out.push(self.pack_pcm(frame, &be_payload(&frame.samples)));
                Ok(())
            }
            WireFormat::PcmZstd => {
                let payload = be_payload(&frame.samples);
                match zstd::bulk::compress(&payload, ZSTD_LEVEL) {
                    Ok(compressed) => {
                        out.push(self.pack_pcm(frame, &compressed));
                        Ok(())
                    }
                    Err(e) => {
                        self.error_count += 1;
                        Err(WavegateError::Encoder(format!("zstd: {e}")))
                    }
                }
            }
            WireFormat::Opus => self.encode_opus(frame, out),
        }
    }

    fn encode_opus(&mut self, frame: &PcmFrame, out: &mut Vec<Bytes>) -> WavegateResult<()> {
        if frame.channels != 1 {
            self.error_count += 1;
            return Err(WavegateError::Encoder(
                "opus output is mono only".to_string(),
            ));
        }
        // (Re)create the encoder when the stream rate changes.
        if self.opus.is_none() || self.opus_rate != frame.sample_rate_hz {
            let encoder = opus::Encoder::new(
                frame.sample_rate_hz,
                opus::Channels::Mono,
                opus::Application::Audio,
            )
            .map_err(|e| {
                self.error_count += 1;
                WavegateError::Encoder(format!("opus init: {e}"))
            })?;
            let mut encoder = encoder;
            if let Err(e) = encoder.set_bitrate(opus::Bitrate::Bits(OPUS_BITRATE)) {
                log::warn!("[Encoder] Failed to set opus bitrate: {}", e);
            }
            self.opus = Some(encoder);
            self.opus_rate = frame.sample_rate_hz;
            self.opus_pending.clear();
        }

        if self.opus_pending.is_empty() {
            self.opus_pending_gps_ns = frame.gps_ts_ns;
        }
        self.opus_pending.extend_from_slice(&frame.samples);

        let samples_per_packet =
            (frame.sample_rate_hz as usize * OPUS_FRAME_MS as usize / 1000).max(1);
        let packet_ns =
            samples_per_packet as u64 * 1_000_000_000 / frame.sample_rate_hz.max(1) as u64;

        while self.opus_pending.len() >= samples_per_packet {
            let chunk: Vec<i16> = self.opus_pending.drain(..samples_per_packet).collect();
            let encoder = self.opus.as_mut().expect("created above");
            match encoder.encode(&chunk, &mut self.opus_buf) {
                Ok(len) => {
                    let header = PcmHeader {
                        gps_ts_ns: self.opus_pending_gps_ns,
                        sample_rate_hz: frame.sample_rate_hz,
                        channels: 1,
                    };
                    let payload = self.opus_buf[..len].to_vec();
                    out.push(self.pack_with_header(header, &payload));
                }
                Err(e) => {
                    self.error_count += 1;
                    self.opus_pending_gps_ns += packet_ns;
                    return Err(WavegateError::Encoder(format!("opus: {e}")));
                }
            }
            self.opus_pending_gps_ns += packet_ns;
        }
        Ok(())
    }

    fn pack_pcm(&mut self, frame: &PcmFrame, payload: &[u8]) -> Bytes {
        self.pack_with_header(
            PcmHeader {
                gps_ts_ns: frame.gps_ts_ns,
                sample_rate_hz: frame.sample_rate_hz,
                channels: frame.channels,
            },
            payload,
        )
    }

    fn pack_with_header(&mut self, header: PcmHeader, payload: &[u8]) -> Bytes {
        let full =
            header.sample_rate_hz != self.last_rate || header.channels != self.last_channels;
        self.last_rate = header.sample_rate_hz;
        self.last_channels = header.channels;

        let mut buf = BytesMut::with_capacity(PCM_HEADER_FULL_LEN + payload.len());
        if full {
            buf.put_u8(FRAME_TYPE_PCM_FULL);
            buf.put_u64(header.gps_ts_ns);
            buf.put_u32(header.sample_rate_hz);
            buf.put_u8(header.channels);
        } else {
            buf.put_u8(FRAME_TYPE_PCM_MINIMAL);
            buf.put_u64(header.gps_ts_ns);
        }
        buf.put_slice(payload);
        buf.freeze()
    }
}

/// PCM header fields shared by full and minimal variants.
#[derive(Debug, Clone, Copy)]
struct PcmHeader {
    gps_ts_ns: u64,
    sample_rate_hz: u32,
    channels: u8,
}

/// Serializes int16 samples as big-endian bytes.
fn be_payload(samples: &[i16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        payload.extend_from_slice(&s.to_be_bytes());
    }
    payload
}

/// Builds a spectrum wire frame.
#[must_use]
pub fn encode_spectrum(frame: &SpectrumFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(22 + frame.bins.len());
    buf.put_u8(FRAME_TYPE_SPECTRUM);
    buf.put_u64(frame.gps_ts_ns);
    buf.put_i64(frame.center_hz);
    buf.put_u32((frame.bin_hz * 1000.0) as u32);
    buf.put_i8(frame.noise_floor_db.clamp(-128.0, 127.0) as i8);
    buf.put_slice(&frame.bins);
    buf.freeze()
}

/// Builds a state-snapshot wire frame around serialized JSON.
#[must_use]
pub fn encode_state(json: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + json.len());
    buf.put_u8(FRAME_TYPE_STATE);
    buf.put_slice(json);
    buf.freeze()
}

/// Builds an audio-extension wire frame; payload is passed through
/// verbatim.
#[must_use]
pub fn encode_extension(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(FRAME_TYPE_EXTENSION);
    buf.put_slice(payload);
    buf.freeze()
}

/// Builds a heartbeat frame.
#[must_use]
pub fn encode_heartbeat() -> Bytes {
    Bytes::from_static(&[FRAME_TYPE_HEARTBEAT])
}

/// Decoded view of a PCM/IQ wire packet.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPcm {
    pub gps_ts_ns: u64,
    /// Present on full-header packets only.
    pub sample_rate_hz: Option<u32>,
    /// Present on full-header packets only.
    pub channels: Option<u8>,
    pub payload: Bytes,
}

/// Parses a PCM/IQ wire packet (both header variants). Used by the
/// recorder client and by round-trip tests.
#[must_use]
pub fn decode_pcm_packet(mut packet: Bytes) -> Option<DecodedPcm> {
    if packet.is_empty() {
        return None;
    }
    let frame_type = packet.get_u8();
    match frame_type {
        FRAME_TYPE_PCM_FULL => {
            if packet.remaining() < PCM_HEADER_FULL_LEN - 1 {
                return None;
            }
            let gps_ts_ns = packet.get_u64();
            let sample_rate_hz = packet.get_u32();
            let channels = packet.get_u8();
            Some(DecodedPcm {
                gps_ts_ns,
                sample_rate_hz: Some(sample_rate_hz),
                channels: Some(channels),
                payload: packet,
            })
        }
        FRAME_TYPE_PCM_MINIMAL => {
            if packet.remaining() < PCM_HEADER_MINIMAL_LEN - 1 {
                return None;
            }
            let gps_ts_ns = packet.get_u64();
            Some(DecodedPcm {
                gps_ts_ns,
                sample_rate_hz: None,
                channels: None,
                payload: packet,
            })
        }
        _ => None,
    }
}

/// Converts a big-endian PCM payload back into int16 samples.
#[must_use]
pub fn payload_to_samples(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>, rate: u32, gps: u64) -> PcmFrame {
        PcmFrame {
            samples,
            channels: 1,
            sample_rate_hz: rate,
            gps_ts_ns: gps,
        }
    }

    #[test]
    fn pcm_be_round_trip_is_exact() {
        let samples: Vec<i16> = vec![0, 1, -1, 32767, -32768, 12345, -12345];
        let mut encoder = Encoder::new(WireFormat::PcmBe);
        let mut out = Vec::new();
        encoder
            .encode(&frame(samples.clone(), 12_000, 42), &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);

        let decoded = decode_pcm_packet(out[0].clone()).unwrap();
        assert_eq!(decoded.gps_ts_ns, 42);
        assert_eq!(decoded.sample_rate_hz, Some(12_000));
        assert_eq!(decoded.channels, Some(1));
        assert_eq!(payload_to_samples(&decoded.payload), samples);
    }

    #[test]
    fn second_packet_uses_minimal_header() {
        let mut encoder = Encoder::new(WireFormat::PcmBe);
        let mut out = Vec::new();
        encoder.encode(&frame(vec![1, 2], 12_000, 1), &mut out).unwrap();
        encoder.encode(&frame(vec![3, 4], 12_000, 2), &mut out).unwrap();
        assert_eq!(out[0][0], FRAME_TYPE_PCM_FULL);
        assert_eq!(out[1][0], FRAME_TYPE_PCM_MINIMAL);

        let second = decode_pcm_packet(out[1].clone()).unwrap();
        assert_eq!(second.sample_rate_hz, None);
        assert_eq!(payload_to_samples(&second.payload), vec![3, 4]);
    }

    #[test]
    fn rate_change_restores_full_header() {
        let mut encoder = Encoder::new(WireFormat::PcmBe);
        let mut out = Vec::new();
        encoder.encode(&frame(vec![1], 12_000, 1), &mut out).unwrap();
        encoder.encode(&frame(vec![2], 48_000, 2), &mut out).unwrap();
        assert_eq!(out[1][0], FRAME_TYPE_PCM_FULL);
        let second = decode_pcm_packet(out[1].clone()).unwrap();
        assert_eq!(second.sample_rate_hz, Some(48_000));
    }

    #[test]
    fn zstd_round_trip_recovers_samples() {
        let samples: Vec<i16> = (0..4800).map(|i| (i % 251) as i16 - 125).collect();
        let mut encoder = Encoder::new(WireFormat::PcmZstd);
        let mut out = Vec::new();
        encoder
            .encode(&frame(samples.clone(), 12_000, 7), &mut out)
            .unwrap();

        let decoded = decode_pcm_packet(out[0].clone()).unwrap();
        let decompressed =
            zstd::bulk::decompress(&decoded.payload, samples.len() * 2 + 64).unwrap();
        assert_eq!(payload_to_samples(&decompressed), samples);
    }

    #[test]
    fn opus_packets_carry_advancing_timestamps() {
        let mut encoder = Encoder::new(WireFormat::Opus);
        let mut out = Vec::new();
        // 100 ms of audio at 12 kHz => five 20 ms opus packets.
        encoder
            .encode(&frame(vec![0i16; 1200], 12_000, 1_000_000_000), &mut out)
            .unwrap();
        assert_eq!(out.len(), 5);
        let mut prev = 0u64;
        for packet in &out {
            let decoded = decode_pcm_packet(packet.clone()).unwrap();
            assert!(decoded.gps_ts_ns > prev || prev == 0);
            prev = decoded.gps_ts_ns;
        }
        // Packets are 20 ms apart.
        let first = decode_pcm_packet(out[0].clone()).unwrap();
        let second = decode_pcm_packet(out[1].clone()).unwrap();
        assert_eq!(second.gps_ts_ns - first.gps_ts_ns, 20_000_000);
    }

    #[test]
    fn opus_rejects_stereo() {
        let mut encoder = Encoder::new(WireFormat::Opus);
        let mut out = Vec::new();
        let stereo = PcmFrame {
            samples: vec![0i16; 960],
            channels: 2,
            sample_rate_hz: 48_000,
            gps_ts_ns: 1,
        };
        assert!(encoder.encode(&stereo, &mut out).is_err());
        assert_eq!(encoder.error_count(), 1);
    }

    #[test]
    fn spectrum_frame_layout() {
        let spectrum = SpectrumFrame {
            bins: vec![10, 20, 30],
            center_hz: 14_000_000,
            bin_hz: 62.5,
            gps_ts_ns: 99,
            noise_floor_db: -105.0,
        };
        let packet = encode_spectrum(&spectrum);
        assert_eq!(packet[0], FRAME_TYPE_SPECTRUM);
        assert_eq!(&packet[1..9], &99u64.to_be_bytes());
        assert_eq!(&packet[9..17], &14_000_000i64.to_be_bytes());
        assert_eq!(&packet[17..21], &62_500u32.to_be_bytes());
        assert_eq!(packet[21] as i8, -105);
        assert_eq!(&packet[22..], &[10, 20, 30]);
    }

    #[test]
    fn format_parse_round_trip() {
        for format in [WireFormat::PcmBe, WireFormat::PcmZstd, WireFormat::Opus] {
            assert_eq!(WireFormat::parse(format.as_str()), Some(format));
        }
        assert_eq!(WireFormat::parse("mp3"), None);
    }
}
