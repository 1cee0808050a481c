//! RTP packet parsing for the upstream I/Q feed.
//!
//! The SDR daemon sends fixed 12-byte RTP headers (no CSRC list, no
//! extension) with big-endian int16 I/Q pairs as payload.

use bytes::Buf;
use num_complex::Complex;

use crate::protocol_constants::{RTP_HEADER_LEN, RTP_VERSION};

/// Parsed view of one RTP packet.
#[derive(Debug, Clone, PartialEq)]
pub struct RtpPacket<'a> {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parses a datagram, returning `None` for anything that is not a
    /// well-formed RTP v2 packet.
    pub fn parse(datagram: &'a [u8]) -> Option<Self> {
        if datagram.len() < RTP_HEADER_LEN {
            return None;
        }
        let mut buf = datagram;
        let b0 = buf.get_u8();
        if b0 >> 6 != RTP_VERSION {
            return None;
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;
        let b1 = buf.get_u8();
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7f;
        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        // Skip CSRC entries; reject extensions (the daemon never sends them,
        // so one showing up means we are not looking at the I/Q feed).
        if extension {
            return None;
        }
        if buf.remaining() < csrc_count * 4 {
            return None;
        }
        buf.advance(csrc_count * 4);

        let mut payload = buf;
        if padding {
            let pad = *datagram.last()? as usize;
            if pad == 0 || pad > payload.len() {
                return None;
            }
            payload = &payload[..payload.len() - pad];
        }

        Some(Self {
            payload_type,
            marker,
            sequence,
            timestamp,
            ssrc,
            payload,
        })
    }

    /// Number of complex samples carried by the payload.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.payload.len() / 4
    }

    /// Decodes the payload as big-endian int16 (I, Q) pairs into `out`,
    /// scaled to ±1.0. Returns the number of samples written.
    pub fn decode_samples(&self, out: &mut Vec<Complex<f32>>) -> usize {
        let mut buf = self.payload;
        let n = self.sample_count();
        out.reserve(n);
        for _ in 0..n {
            let i = buf.get_i16() as f32 / 32768.0;
            let q = buf.get_i16() as f32 / 32768.0;
            out.push(Complex::new(i, q));
        }
        n
    }
}

/// Signed distance from `from` to `to` in 16-bit sequence space.
///
/// Positive means `to` is ahead of `from`; handles wrap-around at 65535.
#[must_use]
pub fn seq_delta(from: u16, to: u16) -> i16 {
    to.wrapping_sub(from) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn build_packet(seq: u16, ts: u32, ssrc: u32, samples: &[(i16, i16)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(0x80); // v2, no padding, no extension, no CSRC
        buf.put_u8(97); // dynamic payload type
        buf.put_u16(seq);
        buf.put_u32(ts);
        buf.put_u32(ssrc);
        for &(i, q) in samples {
            buf.put_i16(i);
            buf.put_i16(q);
        }
        buf
    }

    #[test]
    fn parses_and_decodes_iq_pairs() {
        let raw = build_packet(7, 1000, 0xdead_beef, &[(16384, -16384), (0, 32767)]);
        let pkt = RtpPacket::parse(&raw).unwrap();
        assert_eq!(pkt.sequence, 7);
        assert_eq!(pkt.timestamp, 1000);
        assert_eq!(pkt.ssrc, 0xdead_beef);
        assert_eq!(pkt.sample_count(), 2);

        let mut samples = Vec::new();
        pkt.decode_samples(&mut samples);
        assert!((samples[0].re - 0.5).abs() < 1e-4);
        assert!((samples[0].im + 0.5).abs() < 1e-4);
        assert!((samples[1].im - 0.99997).abs() < 1e-4);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut raw = build_packet(0, 0, 1, &[(0, 0)]);
        raw[0] = 0x40; // v1
        assert!(RtpPacket::parse(&raw).is_none());
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(RtpPacket::parse(&[0x80, 97, 0, 1]).is_none());
    }

    #[test]
    fn strips_padding() {
        let mut raw = build_packet(1, 2, 3, &[(100, 200), (300, 400)]);
        raw[0] |= 0x20; // padding flag
        raw.extend_from_slice(&[0, 0, 0, 4]); // 4 pad bytes, last = count
        let pkt = RtpPacket::parse(&raw).unwrap();
        assert_eq!(pkt.sample_count(), 2);
    }

    #[test]
    fn seq_delta_handles_wrap() {
        assert_eq!(seq_delta(65535, 0), 1);
        assert_eq!(seq_delta(0, 65535), -1);
        assert_eq!(seq_delta(100, 105), 5);
        assert_eq!(seq_delta(105, 100), -5);
    }
}
