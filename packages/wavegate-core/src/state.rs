//! Core configuration types.
//!
//! The server binary deserializes these from YAML and applies environment
//! and CLI overrides before bootstrapping services.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol_constants::{
    FANOUT_QUEUE_FRAMES, OUTBOUND_QUEUE_PACKETS, SPECTRUM_FFT_SIZE, SPECTRUM_MAX_FPS,
};

/// Admission policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Password required to connect. `None` disables the password check.
    pub password: Option<String>,

    /// IPs that bypass the password check (admin list).
    pub admin_ips: HashSet<IpAddr>,

    /// IPs refused outright, checked before anything else.
    pub banned_ips: HashSet<IpAddr>,

    /// Global concurrent-session cap.
    pub max_sessions: usize,

    /// Concurrent-session cap per client IP.
    pub max_sessions_per_ip: usize,

    /// Idle timeout: no control message and no successful audio egress
    /// within this many seconds closes the session.
    pub session_timeout_s: u64,

    /// Absolute per-session duration cap (seconds).
    pub max_session_s: u64,

    /// IQ modes a client may request (e.g. "iq48", "iq96"). Audio modes
    /// are never gated.
    pub allowed_iq_modes: HashSet<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            password: None,
            admin_ips: HashSet::new(),
            banned_ips: HashSet::new(),
            max_sessions: 50,
            max_sessions_per_ip: 4,
            session_timeout_s: 300,
            max_session_s: 4 * 3600,
            allowed_iq_modes: ["iq", "iq48", "iq96", "iq192", "iq384"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl AdmissionConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("max_sessions must be >= 1".to_string());
        }
        if self.max_sessions_per_ip == 0 {
            return Err("max_sessions_per_ip must be >= 1".to_string());
        }
        if self.max_sessions_per_ip > self.max_sessions {
            return Err("max_sessions_per_ip cannot exceed max_sessions".to_string());
        }
        if self.session_timeout_s == 0 || self.max_session_s == 0 {
            return Err("session timeouts must be >= 1 second".to_string());
        }
        Ok(())
    }
}

/// Upstream RTP ingest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Multicast group carrying RTP I/Q data.
    pub data_group: SocketAddr,

    /// Multicast group carrying channel-status datagrams.
    pub status_group: SocketAddr,

    /// Local interface address used for the multicast join
    /// (`0.0.0.0` joins on the default interface).
    pub interface: std::net::Ipv4Addr,

    /// Socket read deadline (seconds). Expiry triggers reconnect.
    pub read_timeout_s: u64,

    /// Wideband sample rate assumed until the status group reports one.
    pub default_sample_rate: u32,

    /// Center frequency assumed until the status group reports one (Hz).
    pub default_center_hz: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_group: "239.1.2.3:5004".parse().expect("valid default group"),
            status_group: "239.1.2.3:5006".parse().expect("valid default group"),
            interface: std::net::Ipv4Addr::UNSPECIFIED,
            read_timeout_s: 5,
            default_sample_rate: 768_000,
            default_center_hz: 15_000_000,
        }
    }
}

impl IngestConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !ip_is_multicast(&self.data_group) {
            return Err(format!("data_group {} is not multicast", self.data_group));
        }
        if !ip_is_multicast(&self.status_group) {
            return Err(format!(
                "status_group {} is not multicast",
                self.status_group
            ));
        }
        if self.read_timeout_s == 0 {
            return Err("read_timeout_s must be >= 1".to_string());
        }
        if self.default_sample_rate == 0 {
            return Err("default_sample_rate must be > 0".to_string());
        }
        Ok(())
    }
}

fn ip_is_multicast(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.is_multicast(),
        IpAddr::V6(ip) => ip.is_multicast(),
    }
}

/// Streaming and queueing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Per-consumer fan-out queue depth (I/Q frames).
    pub fanout_queue_frames: usize,

    /// Per-session outbound wire-packet queue depth.
    pub outbound_queue_packets: usize,

    /// Spectrum frame rate cap (Hz).
    pub spectrum_max_fps: u32,

    /// Spectrum FFT size (must be a power of two).
    pub spectrum_fft_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            fanout_queue_frames: FANOUT_QUEUE_FRAMES,
            outbound_queue_packets: OUTBOUND_QUEUE_PACKETS,
            spectrum_max_fps: SPECTRUM_MAX_FPS,
            spectrum_fft_size: SPECTRUM_FFT_SIZE,
        }
    }
}

impl StreamingConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.fanout_queue_frames == 0 {
            return Err("fanout_queue_frames must be >= 1".to_string());
        }
        if self.outbound_queue_packets == 0 {
            return Err("outbound_queue_packets must be >= 1".to_string());
        }
        if self.spectrum_max_fps == 0 {
            return Err("spectrum_max_fps must be >= 1".to_string());
        }
        if !self.spectrum_fft_size.is_power_of_two() || self.spectrum_fft_size < 256 {
            return Err("spectrum_fft_size must be a power of two >= 256".to_string());
        }
        Ok(())
    }
}

/// DX-cluster client configuration. Absent => the client is not started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DxClusterConfig {
    /// Spider hostname.
    pub host: String,

    /// Spider TCP port.
    #[serde(default = "default_dx_port")]
    pub port: u16,

    /// Callsign sent at the `login:` prompt.
    pub callsign: String,

    /// Interval between keepalive empty lines (seconds).
    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,

    /// Sleep between reconnect attempts (seconds).
    #[serde(default = "default_reconnect_s")]
    pub reconnect_s: u64,
}

fn default_dx_port() -> u16 {
    7300
}

fn default_keep_alive_s() -> u64 {
    60
}

fn default_reconnect_s() -> u64 {
    30
}

impl DxClusterConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("dx_cluster.host must not be empty".to_string());
        }
        if self.callsign.is_empty() {
            return Err("dx_cluster.callsign must not be empty".to_string());
        }
        if self.keep_alive_s == 0 || self.reconnect_s == 0 {
            return Err("dx_cluster intervals must be >= 1 second".to_string());
        }
        Ok(())
    }
}

/// Top-level core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Receiver instance name; appears in recorder filenames and the
    /// health endpoint.
    pub instance: String,

    /// Opaque receiver description served verbatim at `/api/description`.
    pub description: serde_json::Value,

    /// Admission policy.
    pub admission: AdmissionConfig,

    /// Upstream ingest.
    pub ingest: IngestConfig,

    /// Streaming/queueing knobs.
    pub streaming: StreamingConfig,

    /// Optional DX-cluster client.
    pub dx_cluster: Option<DxClusterConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: "wavegate".to_string(),
            description: json!({ "name": "wavegate receiver" }),
            admission: AdmissionConfig::default(),
            ingest: IngestConfig::default(),
            streaming: StreamingConfig::default(),
            dx_cluster: None,
        }
    }
}

impl Config {
    /// Validates all sections, returning the first failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.instance.is_empty() {
            return Err("instance must not be empty".to_string());
        }
        self.admission.validate()?;
        self.ingest.validate()?;
        self.streaming.validate()?;
        if let Some(dx) = &self.dx_cluster {
            dx.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_multicast_data_group() {
        let mut config = Config::default();
        config.ingest.data_group = "192.168.1.10:5004".parse().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_per_ip_cap_above_global() {
        let mut config = Config::default();
        config.admission.max_sessions = 2;
        config.admission.max_sessions_per_ip = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let mut config = Config::default();
        config.streaming.spectrum_fft_size = 1000;
        assert!(config.validate().is_err());
    }
}
