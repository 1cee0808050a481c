//! Session bookkeeping: registry, per-session statistics and the
//! prioritized outbound queue.
//!
//! A session is created on WebSocket accept (after admission) and owns
//! exactly one DSP pipeline; it never outlives it. The registry provides
//! O(1) lookup under a single concurrent map and RAII cleanup via
//! [`SessionGuard`].

pub mod control;

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Audio drops on the outbound queue that force-close a session.
///
/// At 20 ms frames this is ~10 s of a client accepting nothing.
pub const OVERLOAD_AUDIO_DROPS: u64 = 500;

/// Encoder errors after which the session closes.
pub const ENCODER_ERROR_LIMIT: u64 = 50;

/// Shared per-session counters, written by the DSP and writer tasks and
/// read by control acks.
#[derive(Default)]
pub struct SessionStats {
    pub audio_frames_sent: AtomicU64,
    pub audio_dropped: AtomicU64,
    pub spectrum_dropped: AtomicU64,
    pub encoder_errors: AtomicU64,
    pub fanout_drops: AtomicU64,
    pub extension_dropped: AtomicU64,
}

impl SessionStats {
    /// Copies the counters into a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> control::StatsSnapshot {
        control::StatsSnapshot {
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
            spectrum_dropped: self.spectrum_dropped.load(Ordering::Relaxed),
            encoder_errors: self.encoder_errors.load(Ordering::Relaxed),
            fanout_drops: self.fanout_drops.load(Ordering::Relaxed),
            extension_dropped: self.extension_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Kind tag for outbound wire packets; drives the drop preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Spectrum,
    Extension,
}

/// Bounded outbound queue between the DSP task and the socket writer.
///
/// The DSP side never blocks: when the queue is full, a queued spectrum
/// packet is sacrificed first; only if none is queued does the oldest
/// audio packet go. Control replies bypass this queue entirely and are
/// never dropped.
pub struct OutboundQueue {
    queue: Mutex<VecDeque<(PacketKind, Bytes)>>,
    notify: Notify,
    capacity: usize,
    stats: Arc<SessionStats>,
}

impl OutboundQueue {
    /// Creates a queue of `capacity` packets sharing the session counters.
    #[must_use]
    pub fn new(capacity: usize, stats: Arc<SessionStats>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            stats,
        }
    }

    /// Enqueues a packet, applying the drop policy when full.
    pub fn push(&self, kind: PacketKind, packet: Bytes) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                if let Some(pos) = queue.iter().position(|(k, _)| *k == PacketKind::Spectrum) {
                    queue.remove(pos);
                    self.stats.spectrum_dropped.fetch_add(1, Ordering::Relaxed);
                } else {
                    queue.pop_front();
                    self.stats.audio_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            queue.push_back((kind, packet));
        }
        self.notify.notify_one();
    }

    /// Dequeues the next packet, waiting if empty.
    pub async fn pop(&self) -> (PacketKind, Bytes) {
        loop {
            if let Some(item) = self.queue.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Number of queued packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Registry entry for one live session.
pub struct SessionEntry {
    pub id: Uuid,
    pub ip: IpAddr,
    /// Client-chosen correlation id, used to bind `/ws/dxcluster` to a
    /// streaming session.
    pub user_session_id: String,
    pub created_at: Instant,
    /// Session-local cancellation; children of the server token.
    pub cancel: CancellationToken,
    /// Fan-out of audio-extension binary frames to side-channel sockets.
    pub ext_tx: tokio::sync::broadcast::Sender<Bytes>,
    pub stats: Arc<SessionStats>,
}

/// Process-wide map of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<SessionEntry>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a session and returns its RAII guard.
    pub fn register(
        self: &Arc<Self>,
        ip: IpAddr,
        user_session_id: String,
        parent_cancel: &CancellationToken,
    ) -> (SessionGuard, Arc<SessionEntry>) {
        let id = Uuid::new_v4();
        let (ext_tx, _) = tokio::sync::broadcast::channel(64);
        let entry = Arc::new(SessionEntry {
            id,
            ip,
            user_session_id,
            created_at: Instant::now(),
            cancel: parent_cancel.child_token(),
            ext_tx,
            stats: Arc::new(SessionStats::default()),
        });
        self.sessions.insert(id, Arc::clone(&entry));
        log::info!(
            "[Session] {} registered from {} (total: {})",
            id,
            ip,
            self.sessions.len()
        );
        (
            SessionGuard {
                id,
                registry: Arc::clone(self),
            },
            entry,
        )
    }

    fn unregister(&self, id: Uuid) {
        if let Some((_, entry)) = self.sessions.remove(&id) {
            entry.cancel.cancel();
            log::info!(
                "[Session] {} unregistered (remaining: {})",
                id,
                self.sessions.len()
            );
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Looks a session up by the client's correlation id.
    #[must_use]
    pub fn find_by_user_session_id(&self, user_session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions
            .iter()
            .find(|entry| entry.value().user_session_id == user_session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Signals every session to close (server shutdown).
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard unregistering the session on drop, so cleanup also happens
/// when a handler panics or exits early.
pub struct SessionGuard {
    id: Uuid,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    /// Session id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> (OutboundQueue, Arc<SessionStats>) {
        let stats = Arc::new(SessionStats::default());
        (OutboundQueue::new(capacity, Arc::clone(&stats)), stats)
    }

    fn packet(tag: u8) -> Bytes {
        Bytes::from(vec![tag])
    }

    #[test]
    fn spectrum_is_dropped_before_audio() {
        let (queue, stats) = queue(3);
        queue.push(PacketKind::Audio, packet(1));
        queue.push(PacketKind::Spectrum, packet(2));
        queue.push(PacketKind::Audio, packet(3));
        // Queue full: the spectrum packet is sacrificed, audio survives.
        queue.push(PacketKind::Audio, packet(4));
        assert_eq!(stats.spectrum_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(stats.audio_dropped.load(Ordering::Relaxed), 0);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn oldest_audio_drops_when_no_spectrum_queued() {
        let (queue, stats) = queue(2);
        queue.push(PacketKind::Audio, packet(1));
        queue.push(PacketKind::Audio, packet(2));
        queue.push(PacketKind::Audio, packet(3));
        assert_eq!(stats.audio_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn pop_preserves_order() {
        let (queue, _stats) = queue(8);
        queue.push(PacketKind::Audio, packet(1));
        queue.push(PacketKind::Spectrum, packet(2));
        queue.push(PacketKind::Audio, packet(3));
        assert_eq!(queue.pop().await.1[0], 1);
        assert_eq!(queue.pop().await.1[0], 2);
        assert_eq!(queue.pop().await.1[0], 3);
    }

    #[tokio::test]
    async fn registry_guard_unregisters_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let cancel = CancellationToken::new();
        let (guard, entry) =
            registry.register("10.0.0.1".parse().unwrap(), "abc".to_string(), &cancel);
        assert_eq!(registry.count(), 1);
        assert!(registry.find_by_user_session_id("abc").is_some());
        drop(guard);
        assert_eq!(registry.count(), 0);
        // Unregistration cancels the session token.
        assert!(entry.cancel.is_cancelled());
    }
}
