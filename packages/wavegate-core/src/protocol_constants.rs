//! Fixed protocol constants that should NOT be changed.
//!
//! These values are part of the binary WebSocket framing and the RTP view
//! consumed from the SDR daemon. Changing them breaks every deployed client.

// ─────────────────────────────────────────────────────────────────────────────
// Binary WebSocket frame type codes (first byte of every binary message)
// ─────────────────────────────────────────────────────────────────────────────

/// Audio/IQ PCM frame with a full header (sample rate and channels included).
pub const FRAME_TYPE_PCM_FULL: u8 = 0x01;

/// Audio/IQ PCM frame with a minimal header; the receiver re-uses the
/// sample rate and channel count from the last full-header frame.
pub const FRAME_TYPE_PCM_MINIMAL: u8 = 0x02;

/// Spectrum frame for waterfall display.
pub const FRAME_TYPE_SPECTRUM: u8 = 0x03;

/// Session state snapshot (mirrors the JSON state object).
pub const FRAME_TYPE_STATE: u8 = 0x04;

/// Audio-extension binary frame; payload passed through verbatim.
pub const FRAME_TYPE_EXTENSION: u8 = 0x05;

/// Keepalive / heartbeat; empty payload.
pub const FRAME_TYPE_HEARTBEAT: u8 = 0x06;

/// Size of the full PCM/IQ header: type + gps_ts_ns + sample_rate + channels.
pub const PCM_HEADER_FULL_LEN: usize = 1 + 8 + 4 + 1;

/// Size of the minimal PCM/IQ header: type + gps_ts_ns.
pub const PCM_HEADER_MINIMAL_LEN: usize = 1 + 8;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket close codes
// ─────────────────────────────────────────────────────────────────────────────

/// Close code sent when a session is evicted for sustained backpressure.
///
/// Clients treat this as "reconnect with a fresh socket"; any other close
/// code means the server is going away or the client misbehaved.
pub const CLOSE_CODE_OVERLOAD: u16 = 4008;

/// Close code sent when the absolute max-session deadline fires.
pub const CLOSE_CODE_SESSION_EXPIRED: u16 = 4009;

// ─────────────────────────────────────────────────────────────────────────────
// RTP view of the upstream SDR daemon
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed RTP header length (no CSRC, no extension), per RFC 3550.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP version expected in the two top bits of the first header byte.
pub const RTP_VERSION: u8 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Audio defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default audio output rate for demodulated modes (Hz).
pub const DEFAULT_AUDIO_RATE: u32 = 12_000;

/// Opus frame duration (ms). 20 ms is the libopus sweet spot.
pub const OPUS_FRAME_MS: u32 = 20;

/// Server-fixed Opus bitrate (bits/s). Clients cannot change this.
pub const OPUS_BITRATE: i32 = 64_000;

/// Fixed audio offset applied by the CW product detector (Hz).
pub const CW_AUDIO_OFFSET_HZ: f32 = 500.0;

// ─────────────────────────────────────────────────────────────────────────────
// Bounded queues and rates
// ─────────────────────────────────────────────────────────────────────────────

/// Per-consumer fan-out queue depth (I/Q frames). At 20 ms per frame this
/// is ~640 ms of wideband input headroom before drops begin.
pub const FANOUT_QUEUE_FRAMES: usize = 32;

/// Per-session outbound wire-packet queue depth. When full, spectrum
/// packets are dropped before audio packets; control replies never queue
/// here and are never dropped.
pub const OUTBOUND_QUEUE_PACKETS: usize = 64;

/// Consumer drop count within [`FANOUT_DROP_WINDOW_SECS`] that marks the
/// consumer unhealthy and eligible for eviction.
pub const FANOUT_DROP_THRESHOLD: u64 = 150;

/// Window for the fan-out drop threshold (seconds).
pub const FANOUT_DROP_WINDOW_SECS: u64 = 10;

/// Default spectrum frame rate cap (Hz).
pub const SPECTRUM_MAX_FPS: u32 = 15;

/// Default spectrum FFT size (bins). Power of two.
pub const SPECTRUM_FFT_SIZE: usize = 2048;

/// Bounded PCM queue into an audio extension (frames). The host drops
/// frames past this depth rather than blocking the DSP pipeline.
pub const EXTENSION_QUEUE_FRAMES: usize = 16;

/// DX-cluster spot ring size available to late joiners.
pub const DX_SPOT_RING: usize = 100;

/// Heartbeat interval when no audio has flowed (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in the health endpoint and WS state snapshots.
pub const APP_NAME: &str = "Wavegate";

/// Service identifier probed by clients to recognize a wavegate server.
pub const SERVICE_ID: &str = "wavegate";
