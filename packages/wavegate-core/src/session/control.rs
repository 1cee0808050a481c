//! Control-channel message types.
//!
//! Clients send textual JSON control messages on the streaming socket;
//! every valid message is acknowledged with a state snapshot, invalid ones
//! with an error object that leaves session state unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::dsp::agc::AgcProfile;
use crate::dsp::biquad::NotchSpec;
use crate::dsp::nr::NrSettings;
use crate::error::WavegateError;
use crate::tuning::Tuning;

/// Incoming control messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    SetFrequency {
        hz: i64,
    },
    SetMode {
        mode: String,
    },
    SetBandwidth {
        low: i32,
        high: i32,
    },
    SetFilters {
        #[serde(default)]
        notches: Vec<NotchSpec>,
        #[serde(default)]
        nr: Option<NrSettings>,
        #[serde(default)]
        agc: Option<AgcProfile>,
    },
    SpectrumZoom {
        center_hz: i64,
        span_hz: u32,
    },
    AudioExtensionAttach {
        extension_name: String,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
    AudioExtensionDetach,
    Ping,
}

/// Outgoing control replies.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    /// Acknowledgment carrying the full session state.
    State { snapshot: StateSnapshot },
    /// Keepalive answer.
    Pong,
    /// The offending message was rejected; state is unchanged.
    Error { error: &'static str, message: String },
}

impl ControlReply {
    /// Builds the error reply for a core error.
    #[must_use]
    pub fn from_error(err: &WavegateError) -> Self {
        Self::Error {
            error: err.code(),
            message: err.to_string(),
        }
    }

    /// Serializes to the wire string.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string())
    }
}

/// Point-in-time view of one session, sent as every control ack and as
/// the binary 0x04 frame on connect.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub session_id: String,
    pub frequency: i64,
    pub mode: &'static str,
    pub passband_low: i32,
    pub passband_high: i32,
    pub format: &'static str,
    pub sample_rate: u32,
    pub channels: u8,
    pub agc: AgcProfile,
    pub notches: Vec<NotchSpec>,
    pub nr: NrSettings,
    pub spectrum_center_hz: i64,
    pub spectrum_span_hz: u32,
    /// Attached decoder name, if any.
    pub extension: Option<String>,
    pub stats: StatsSnapshot,
}

/// Counter snapshot attached to the state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub audio_frames_sent: u64,
    pub audio_dropped: u64,
    pub spectrum_dropped: u64,
    pub encoder_errors: u64,
    pub fanout_drops: u64,
    pub extension_dropped: u64,
}

/// Parses one control message, mapping JSON errors onto the protocol
/// error category.
pub fn parse_control(text: &str) -> Result<ControlMessage, WavegateError> {
    serde_json::from_str(text)
        .map_err(|e| WavegateError::InvalidRequest(format!("malformed control message: {e}")))
}

/// Validates a `set_filters` notch list against the audio passband.
pub fn validate_notches(notches: &[NotchSpec], tuning: &Tuning) -> Result<(), WavegateError> {
    let audio_limit = tuning
        .passband_low_hz
        .abs()
        .max(tuning.passband_high_hz.abs()) as f32;
    for notch in notches {
        if !notch.hz.is_finite() || !notch.width.is_finite() {
            return Err(WavegateError::InvalidRequest(
                "notch parameters must be finite".to_string(),
            ));
        }
        if notch.hz <= 0.0 || notch.hz > audio_limit {
            return Err(WavegateError::InvalidRequest(format!(
                "notch at {} Hz is outside the audio passband",
                notch.hz
            )));
        }
        if notch.width <= 0.0 || notch.width > notch.hz {
            return Err(WavegateError::InvalidRequest(format!(
                "notch width {} is invalid",
                notch.width
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::Mode;

    #[test]
    fn parses_documented_operations() {
        let cases = [
            r#"{"type":"set_frequency","hz":14074000}"#,
            r#"{"type":"set_mode","mode":"usb"}"#,
            r#"{"type":"set_bandwidth","low":50,"high":2700}"#,
            r#"{"type":"set_filters","notches":[{"hz":1000.0,"width":100.0}],"nr":{"on":true,"strength":1.5,"floor":0.05,"adapt":true}}"#,
            r#"{"type":"spectrum_zoom","center_hz":14000000,"span_hz":192000}"#,
            r#"{"type":"audio_extension_attach","extension_name":"ft8","params":{"depth":"deep"}}"#,
            r#"{"type":"audio_extension_detach"}"#,
            r#"{"type":"ping"}"#,
        ];
        for case in cases {
            parse_control(case).unwrap_or_else(|e| panic!("{case}: {e}"));
        }
    }

    #[test]
    fn malformed_json_is_invalid_request() {
        let err = parse_control("{nope").unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        let err = parse_control(r#"{"type":"warp_drive"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn filters_default_missing_fields() {
        let msg = parse_control(r#"{"type":"set_filters"}"#).unwrap();
        match msg {
            ControlMessage::SetFilters { notches, nr, agc } => {
                assert!(notches.is_empty());
                assert!(nr.is_none());
                assert!(agc.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn notch_outside_passband_is_rejected() {
        let tuning = Tuning::new(14_074_000, Mode::Usb);
        let inside = [NotchSpec {
            hz: 1_000.0,
            width: 100.0,
        }];
        assert!(validate_notches(&inside, &tuning).is_ok());

        let outside = [NotchSpec {
            hz: 9_000.0,
            width: 100.0,
        }];
        assert!(validate_notches(&outside, &tuning).is_err());

        let negative = [NotchSpec {
            hz: -100.0,
            width: 10.0,
        }];
        assert!(validate_notches(&negative, &tuning).is_err());
    }

    #[test]
    fn error_reply_serializes_code() {
        let reply = ControlReply::from_error(&WavegateError::InvalidMode("xyz".into()));
        let json = reply.to_json();
        assert!(json.contains("\"invalid_mode\""));
        assert!(json.contains("\"error\""));
    }
}
