//! DX-cluster client: long-lived TCP session to a DX spider.
//!
//! Life cycle: connect → read banner → answer the `login:` prompt with the
//! configured callsign → wait for the prompt line ending in `>` →
//! connected. An empty line goes out every `keep_alive_s`; five minutes
//! without a byte from the peer forces a reconnect; reconnection is
//! unbounded with a jittered sleep.
//!
//! Parsed spots land in a ring of the last 100 (for late joiners) and on a
//! broadcast channel, so slow consumers never stall the read loop.

pub mod cty;
pub mod spot;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::DX_SPOT_RING;
use crate::state::DxClusterConfig;
use spot::{parse_spot, Spot};

/// Reconnect after this long without a byte from the peer.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Capacity of the spot broadcast channel. Late receivers that lag past
/// this simply miss spots; history comes from the ring.
const SPOT_CHANNEL_CAPACITY: usize = 256;

/// Shared state of the DX-cluster client.
pub struct DxCluster {
    ring: Mutex<VecDeque<Spot>>,
    spot_tx: tokio::sync::broadcast::Sender<Spot>,
    message_tx: tokio::sync::broadcast::Sender<String>,
    connected: AtomicBool,
    lines_dropped: AtomicU64,
    spots_seen: AtomicU64,
}

impl DxCluster {
    fn new() -> Self {
        let (spot_tx, _) = tokio::sync::broadcast::channel(SPOT_CHANNEL_CAPACITY);
        let (message_tx, _) = tokio::sync::broadcast::channel(SPOT_CHANNEL_CAPACITY);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(DX_SPOT_RING)),
            spot_tx,
            message_tx,
            connected: AtomicBool::new(false),
            lines_dropped: AtomicU64::new(0),
            spots_seen: AtomicU64::new(0),
        }
    }

    /// Subscribes to live spots.
    #[must_use]
    pub fn subscribe_spots(&self) -> tokio::sync::broadcast::Receiver<Spot> {
        self.spot_tx.subscribe()
    }

    /// Subscribes to non-spot cluster messages.
    #[must_use]
    pub fn subscribe_messages(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.message_tx.subscribe()
    }

    /// Snapshot of the spot ring, oldest first.
    #[must_use]
    pub fn recent_spots(&self) -> Vec<Spot> {
        self.ring.lock().iter().cloned().collect()
    }

    /// Whether the spider session is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Lines that failed to parse or were out of range.
    #[must_use]
    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped.load(Ordering::Relaxed)
    }

    /// Spots accepted since startup.
    #[must_use]
    pub fn spots_seen(&self) -> u64 {
        self.spots_seen.load(Ordering::Relaxed)
    }

    /// Classifies and dispatches one line from the spider.
    fn ingest_line(&self, line: &str) {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return;
        }
        if trimmed.starts_with("DX de ") {
            match parse_spot(trimmed) {
                Some(spot) => {
                    self.spots_seen.fetch_add(1, Ordering::Relaxed);
                    {
                        let mut ring = self.ring.lock();
                        if ring.len() >= DX_SPOT_RING {
                            ring.pop_front();
                        }
                        ring.push_back(spot.clone());
                    }
                    let _ = self.spot_tx.send(spot);
                }
                None => {
                    self.lines_dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("[DX] Dropped spot line: {}", trimmed);
                }
            }
        } else if self.is_connected() {
            let _ = self.message_tx.send(trimmed.to_string());
        }
    }
}

/// Starts the client; the returned handle serves ring snapshots and
/// broadcast subscriptions while the I/O loop runs until shutdown.
pub fn start(config: DxClusterConfig, shutdown: &CancellationToken) -> Arc<DxCluster> {
    let cluster = Arc::new(DxCluster::new());
    let cancel = shutdown.child_token();
    tokio::spawn(run(config, Arc::clone(&cluster), cancel));
    cluster
}

async fn run(config: DxClusterConfig, cluster: Arc<DxCluster>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match session(&config, &cluster, &cancel).await {
            Ok(()) => return, // cancelled
            Err(e) => {
                cluster.connected.store(false, Ordering::Relaxed);
                // Jitter spreads reconnect storms across instances.
                let jitter = rand::rng().random_range(0..=config.reconnect_s / 2 + 1);
                let sleep = Duration::from_secs(config.reconnect_s + jitter);
                log::warn!(
                    "[DX] Connection to {}:{} lost ({}), reconnecting in {:?}",
                    config.host,
                    config.port,
                    e,
                    sleep
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(sleep) => {}
                }
            }
        }
    }
}

/// One spider session from connect to error. Returns `Ok(())` only on
/// cancellation.
async fn session(
    config: &DxClusterConfig,
    cluster: &DxCluster,
    cancel: &CancellationToken,
) -> std::io::Result<()> {
    let addr = (config.host.as_str(), config.port);
    let mut stream = TcpStream::connect(addr).await?;
    log::info!("[DX] Connected to {}:{}", config.host, config.port);

    let mut keepalive = tokio::time::interval(Duration::from_secs(config.keep_alive_s));
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // first tick fires immediately; skip it

    let mut buf = Vec::with_capacity(4096);
    let mut chunk = vec![0u8; 2048];
    let mut logged_in = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = keepalive.tick() => {
                stream.write_all(b"\n").await?;
            }
            read = tokio::time::timeout(INACTIVITY_TIMEOUT, stream.read(&mut chunk)) => {
                let n = match read {
                    Ok(Ok(0)) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "peer closed",
                        ))
                    }
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e),
                    Err(_elapsed) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "no data for 5 minutes",
                        ))
                    }
                };
                buf.extend_from_slice(&chunk[..n]);

                // Hand complete lines to the classifier.
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    if !cluster.is_connected() && line.trim_end().ends_with('>') {
                        cluster.connected.store(true, Ordering::Relaxed);
                        log::info!("[DX] Logged in to {} as {}", config.host, config.callsign);
                    }
                    cluster.ingest_line(&line);
                }

                // The login prompt arrives without a newline.
                if !logged_in {
                    let tail = String::from_utf8_lossy(&buf);
                    if tail.contains("login:") {
                        stream.write_all(format!("{}\n", config.callsign).as_bytes()).await?;
                        logged_in = true;
                        buf.clear();
                    }
                }

                // A prompt like "dxspider >" may also arrive without a
                // trailing newline once the banner is done.
                if logged_in && !cluster.is_connected() {
                    let tail = String::from_utf8_lossy(&buf);
                    if tail.trim_end().ends_with('>') {
                        cluster.connected.store(true, Ordering::Relaxed);
                        buf.clear();
                        log::info!("[DX] Logged in to {} as {}", config.host, config.callsign);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot_line(khz: f64, dx: &str) -> String {
        format!("DX de K1ABC:     {khz:.1}  {dx}       CQ DX                    1234Z")
    }

    #[test]
    fn ring_keeps_last_hundred() {
        let cluster = DxCluster::new();
        for i in 0..150 {
            cluster.ingest_line(&spot_line(14_000.0 + i as f64, "JA1XYZ"));
        }
        let spots = cluster.recent_spots();
        assert_eq!(spots.len(), DX_SPOT_RING);
        // Oldest retained spot is number 50.
        assert_eq!(spots[0].freq_hz, 14_050_000);
        assert_eq!(spots.last().unwrap().freq_hz, 14_149_000);
        assert_eq!(cluster.spots_seen(), 150);
    }

    #[test]
    fn every_ring_spot_is_in_range() {
        let cluster = DxCluster::new();
        cluster.ingest_line(&spot_line(7_030.0, "OK1ABC"));
        cluster.ingest_line(&spot_line(50_000.0, "JA1XYZ")); // out of range
        cluster.ingest_line(&spot_line(14_074.0, "JA1XYZ"));
        let spots = cluster.recent_spots();
        assert_eq!(spots.len(), 2);
        assert!(spots
            .iter()
            .all(|s| s.freq_hz > 0 && s.freq_hz <= 30_000_000));
        assert_eq!(cluster.lines_dropped(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_live_spots() {
        let cluster = DxCluster::new();
        let mut rx = cluster.subscribe_spots();
        cluster.ingest_line(&spot_line(21_074.0, "PY2ABC"));
        let spot = rx.recv().await.unwrap();
        assert_eq!(spot.freq_hz, 21_074_000);
        assert_eq!(spot.band, "15m");
    }

    #[test]
    fn non_spot_lines_do_not_enter_ring() {
        let cluster = DxCluster::new();
        cluster.connected.store(true, Ordering::Relaxed);
        cluster.ingest_line("WCY de DK0WCY-1 <12> : K=2 expK=2");
        assert!(cluster.recent_spots().is_empty());
    }
}
