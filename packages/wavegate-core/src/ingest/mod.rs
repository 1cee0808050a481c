//! RTP ingest: joins the SDR daemon's multicast groups and publishes
//! timestamped I/Q frames to the fan-out bus.
//!
//! Two loops run until shutdown:
//! - the status loop parses channel-status datagrams into a [`StatusCache`]
//! - the data loop reads RTP, reconstructs contiguous I/Q frames (with gap
//!   markers when the sequence skips) and publishes them
//!
//! Socket errors and read-deadline expiry tear the socket down and retry
//! with capped exponential backoff; the ingest reports unhealthy until the
//! next good packet.

pub mod rtp;
pub mod status;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::FanoutBus;
use crate::frame::IqFrame;
use crate::ingest::rtp::{seq_delta, RtpPacket};
use crate::ingest::status::StatusCache;
use crate::state::IngestConfig;

/// Initial reconnect backoff.
const BACKOFF_MIN: Duration = Duration::from_millis(250);

/// Backoff cap.
const BACKOFF_MAX: Duration = Duration::from_secs(8);

/// Handle to a running ingest; stops it on [`IngestHandle::stop`] or drop
/// of the parent shutdown token.
pub struct IngestHandle {
    cancel: CancellationToken,
    healthy: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl IngestHandle {
    /// Signals both loops to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether a data packet has been seen since the last socket error.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Waits for both loops to finish after [`stop`](Self::stop).
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Starts the ingest loops. Never fails synchronously: socket setup
/// happens inside the loops so a down upstream only delays health.
pub fn start(
    config: IngestConfig,
    bus: Arc<FanoutBus>,
    shutdown: &CancellationToken,
) -> IngestHandle {
    let cancel = shutdown.child_token();
    let healthy = Arc::new(AtomicBool::new(false));
    let status = Arc::new(StatusCache::new(
        config.default_sample_rate,
        config.default_center_hz,
    ));

    let status_task = tokio::spawn(status_loop(
        config.clone(),
        Arc::clone(&status),
        cancel.clone(),
    ));
    let data_task = tokio::spawn(data_loop(
        config,
        status,
        bus,
        Arc::clone(&healthy),
        cancel.clone(),
    ));

    IngestHandle {
        cancel,
        healthy,
        tasks: vec![status_task, data_task],
    }
}

/// Creates a nonblocking UDP socket joined to `group`.
fn create_multicast_socket(group: SocketAddr, interface: Ipv4Addr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), group.port());
    socket.bind(&bind_addr.into())?;
    if let IpAddr::V4(group_ip) = group.ip() {
        socket.join_multicast_v4(&group_ip, &interface)?;
    }
    UdpSocket::from_std(socket.into())
}

async fn status_loop(config: IngestConfig, status: Arc<StatusCache>, cancel: CancellationToken) {
    let mut backoff = BACKOFF_MIN;
    let mut buf = vec![0u8; 8192];

    'reconnect: while !cancel.is_cancelled() {
        let socket = match create_multicast_socket(config.status_group, config.interface) {
            Ok(s) => {
                backoff = BACKOFF_MIN;
                s
            }
            Err(e) => {
                log::warn!(
                    "[Ingest] Status group join failed ({}), retrying in {:?}",
                    e,
                    backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
                continue;
            }
        };
        log::info!("[Ingest] Joined status group {}", config.status_group);

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return,
                r = socket.recv_from(&mut buf) => r,
            };
            match received {
                Ok((len, _peer)) => {
                    if let Err(e) = status.apply(&buf[..len]) {
                        log::debug!("[Ingest] Unparseable status datagram: {}", e);
                    }
                }
                Err(e) => {
                    log::warn!("[Ingest] Status socket error: {}", e);
                    continue 'reconnect;
                }
            }
        }
    }
}

/// Per-stream tracking for the data loop, reset on reconnect and on
/// generation change.
struct StreamTracker {
    ssrc: Option<u32>,
    next_seq: Option<u16>,
    last_gps_ns: u64,
    generation: u64,
}

impl StreamTracker {
    fn new() -> Self {
        Self {
            ssrc: None,
            next_seq: None,
            last_gps_ns: 0,
            generation: 0,
        }
    }
}

async fn data_loop(
    config: IngestConfig,
    status: Arc<StatusCache>,
    bus: Arc<FanoutBus>,
    healthy: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut backoff = BACKOFF_MIN;
    let mut buf = vec![0u8; 65536];
    let read_timeout = Duration::from_secs(config.read_timeout_s);

    'reconnect: while !cancel.is_cancelled() {
        let socket = match create_multicast_socket(config.data_group, config.interface) {
            Ok(s) => {
                backoff = BACKOFF_MIN;
                s
            }
            Err(e) => {
                healthy.store(false, Ordering::Relaxed);
                log::warn!(
                    "[Ingest] Data group join failed ({}), retrying in {:?}",
                    e,
                    backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
                continue;
            }
        };
        log::info!("[Ingest] Joined data group {}", config.data_group);
        let mut tracker = StreamTracker::new();

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return,
                r = tokio::time::timeout(read_timeout, socket.recv_from(&mut buf)) => r,
            };
            let (len, _peer) = match received {
                Ok(Ok(ok)) => ok,
                Ok(Err(e)) => {
                    healthy.store(false, Ordering::Relaxed);
                    log::warn!("[Ingest] Data socket error: {}", e);
                    continue 'reconnect;
                }
                Err(_elapsed) => {
                    healthy.store(false, Ordering::Relaxed);
                    log::warn!(
                        "[Ingest] No data for {:?} on {}, rejoining",
                        read_timeout,
                        config.data_group
                    );
                    continue 'reconnect;
                }
            };

            let Some(packet) = RtpPacket::parse(&buf[..len]) else {
                log::debug!("[Ingest] Dropping non-RTP datagram ({} bytes)", len);
                continue;
            };
            if packet.sample_count() == 0 {
                continue;
            }

            let snap = status.snapshot();

            // A parameter change flushes the stream: sequence tracking and
            // SSRC lock restart so consumers see the new generation cleanly.
            if snap.generation != tracker.generation {
                tracker = StreamTracker::new();
                tracker.generation = snap.generation;
            }

            // Demultiplex by SSRC: lock onto the first source seen.
            match tracker.ssrc {
                None => tracker.ssrc = Some(packet.ssrc),
                Some(ssrc) if ssrc != packet.ssrc => continue,
                _ => {}
            }

            let gap_samples = match tracker.next_seq {
                None => 0,
                Some(expected) => {
                    let delta = seq_delta(expected, packet.sequence);
                    if delta < 0 {
                        // Late or duplicated packet; already covered.
                        continue;
                    }
                    delta as u64 * packet.sample_count() as u64
                }
            };
            if gap_samples > 0 {
                log::debug!(
                    "[Ingest] Sequence gap: {} samples lost before seq {}",
                    gap_samples,
                    packet.sequence
                );
            }
            tracker.next_seq = Some(packet.sequence.wrapping_add(1));

            let gps_ts_ns = snap.gps_ns_for(packet.timestamp);
            if gps_ts_ns <= tracker.last_gps_ns {
                // Timestamp regressed; discard until forward progress.
                log::debug!(
                    "[Ingest] Timestamp regress ({} <= {}), discarding seq {}",
                    gps_ts_ns,
                    tracker.last_gps_ns,
                    packet.sequence
                );
                continue;
            }
            tracker.last_gps_ns = gps_ts_ns;

            let mut samples = Vec::new();
            packet.decode_samples(&mut samples);

            bus.publish(IqFrame {
                samples: samples.into(),
                rtp_seq: packet.sequence,
                rtp_ts: packet.timestamp,
                gps_ts_ns,
                sample_rate_hz: snap.sample_rate_hz,
                center_hz: snap.center_hz,
                generation: snap.generation,
                gap_samples,
            });
            healthy.store(true, Ordering::Relaxed);
        }
    }
}
