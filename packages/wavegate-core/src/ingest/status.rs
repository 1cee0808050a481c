//! Channel-status datagrams from the SDR daemon's status multicast group.
//!
//! The status group carries small JSON datagrams announcing the wideband
//! channel parameters and a GPS wall-clock reference point:
//!
//! ```json
//! { "sample_rate": 768000, "center_hz": 15000000,
//!   "gps_ts_ns": 1723480000123456789, "rtp_ts": 88200 }
//! ```
//!
//! `gps_ts_ns`/`rtp_ts` form a mapping from RTP media time to absolute GPS
//! time; the data loop stamps every outbound frame through it. A change in
//! `sample_rate` or `center_hz` starts a new generation, which downstream
//! consumers observe atomically.

use parking_lot::RwLock;
use serde::Deserialize;

/// Raw status datagram shape.
#[derive(Debug, Deserialize)]
struct StatusDatagram {
    sample_rate: u32,
    center_hz: i64,
    gps_ts_ns: u64,
    rtp_ts: u32,
}

/// Last known channel parameters plus the GPS time reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    pub sample_rate_hz: u32,
    pub center_hz: i64,
    /// GPS wall-clock at `rtp_base_ts` (nanoseconds).
    pub gps_base_ns: u64,
    /// RTP media timestamp the GPS base refers to.
    pub rtp_base_ts: u32,
    /// Bumped whenever sample rate or center frequency change.
    pub generation: u64,
}

impl StatusSnapshot {
    /// Maps an RTP media timestamp to absolute GPS nanoseconds.
    ///
    /// The 32-bit RTP timestamp is treated as a signed offset from the
    /// base, so it keeps working across timestamp wrap.
    #[must_use]
    pub fn gps_ns_for(&self, rtp_ts: u32) -> u64 {
        let delta = rtp_ts.wrapping_sub(self.rtp_base_ts) as i32 as i64;
        let ns = delta * 1_000_000_000 / self.sample_rate_hz.max(1) as i64;
        self.gps_base_ns.saturating_add_signed(ns)
    }
}

/// Thread-safe cache of the latest status snapshot.
///
/// The status loop is the single writer; the data loop and the fan-out bus
/// read it when stamping frames.
pub struct StatusCache {
    snapshot: RwLock<StatusSnapshot>,
}

impl StatusCache {
    /// Creates a cache seeded with configured defaults at generation 0.
    pub fn new(default_sample_rate: u32, default_center_hz: i64) -> Self {
        Self {
            snapshot: RwLock::new(StatusSnapshot {
                sample_rate_hz: default_sample_rate,
                center_hz: default_center_hz,
                gps_base_ns: 0,
                rtp_base_ts: 0,
                generation: 0,
            }),
        }
    }

    /// Parses one status datagram and updates the cache.
    ///
    /// Returns `true` when the datagram started a new generation
    /// (sample rate or center frequency changed).
    pub fn apply(&self, datagram: &[u8]) -> Result<bool, serde_json::Error> {
        let status: StatusDatagram = serde_json::from_slice(datagram)?;
        let mut snap = self.snapshot.write();
        let changed =
            status.sample_rate != snap.sample_rate_hz || status.center_hz != snap.center_hz;
        if changed {
            snap.generation += 1;
            log::info!(
                "[Ingest] Channel parameters changed: rate {} -> {} Hz, center {} -> {} Hz (generation {})",
                snap.sample_rate_hz,
                status.sample_rate,
                snap.center_hz,
                status.center_hz,
                snap.generation
            );
        }
        snap.sample_rate_hz = status.sample_rate;
        snap.center_hz = status.center_hz;
        snap.gps_base_ns = status.gps_ts_ns;
        snap.rtp_base_ts = status.rtp_ts;
        Ok(changed)
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        *self.snapshot.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(rate: u32, center: i64, gps: u64, rtp: u32) -> Vec<u8> {
        format!(
            r#"{{"sample_rate":{rate},"center_hz":{center},"gps_ts_ns":{gps},"rtp_ts":{rtp}}}"#
        )
        .into_bytes()
    }

    #[test]
    fn first_real_status_starts_generation_one() {
        let cache = StatusCache::new(768_000, 15_000_000);
        let changed = cache
            .apply(&datagram(768_000, 14_000_000, 1_000, 0))
            .unwrap();
        assert!(changed);
        assert_eq!(cache.snapshot().generation, 1);
    }

    #[test]
    fn unchanged_parameters_keep_generation() {
        let cache = StatusCache::new(768_000, 15_000_000);
        cache.apply(&datagram(768_000, 15_000_000, 5, 0)).unwrap();
        assert_eq!(cache.snapshot().generation, 0);
        cache.apply(&datagram(768_000, 15_000_000, 9, 100)).unwrap();
        assert_eq!(cache.snapshot().generation, 0);
        assert_eq!(cache.snapshot().gps_base_ns, 9);
    }

    #[test]
    fn maps_rtp_time_to_gps() {
        let cache = StatusCache::new(768_000, 15_000_000);
        cache
            .apply(&datagram(1_000_000, 15_000_000, 1_000_000_000, 1000))
            .unwrap();
        let snap = cache.snapshot();
        // 500k samples at 1 MHz = 0.5 s
        assert_eq!(snap.gps_ns_for(501_000), 1_500_000_000);
        // Earlier media time maps backwards: 1000 samples = 1 ms
        assert_eq!(snap.gps_ns_for(0), 999_000_000);
    }

    #[test]
    fn rejects_malformed_datagram() {
        let cache = StatusCache::new(768_000, 0);
        assert!(cache.apply(b"not json").is_err());
    }
}
