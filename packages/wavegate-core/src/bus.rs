//! Fan-out bus: single-producer, many-consumer distribution of I/Q frames.
//!
//! Each consumer owns a bounded lossless queue. When the queue is full the
//! oldest frame is discarded and that consumer's drop counter bumped; the
//! producer never blocks. Consumers may observe gaps but never reordering.
//!
//! A consumer whose drops exceed a threshold within a window is marked
//! unhealthy; the session manager may tear its session down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::frame::IqFrame;
use crate::protocol_constants::{FANOUT_DROP_THRESHOLD, FANOUT_DROP_WINDOW_SECS};
use crate::state::StreamingConfig;

/// Wideband channel parameters as last published by the ingest.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WidebandParams {
    pub sample_rate_hz: u32,
    pub center_hz: i64,
    pub generation: u64,
}

/// Sliding-window drop accounting for one consumer.
struct DropWindow {
    window_start: Instant,
    window_drops: u64,
}

/// State shared between the bus and one consumer handle.
struct ConsumerShared {
    queue: Mutex<VecDeque<IqFrame>>,
    notify: Notify,
    capacity: usize,
    dropped_total: AtomicU64,
    drop_window: Mutex<DropWindow>,
    unhealthy: AtomicBool,
    closed: AtomicBool,
}

impl ConsumerShared {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped_total: AtomicU64::new(0),
            drop_window: Mutex::new(DropWindow {
                window_start: Instant::now(),
                window_drops: 0,
            }),
            unhealthy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Records one dropped frame, flipping the unhealthy flag when the
    /// windowed rate crosses the threshold.
    fn record_drop(&self) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
        let mut window = self.drop_window.lock();
        let elapsed = window.window_start.elapsed();
        if elapsed > Duration::from_secs(FANOUT_DROP_WINDOW_SECS) {
            window.window_start = Instant::now();
            window.window_drops = 0;
        }
        window.window_drops += 1;
        if window.window_drops >= FANOUT_DROP_THRESHOLD {
            self.unhealthy.store(true, Ordering::Relaxed);
        }
    }
}

/// Single-producer fan-out of [`IqFrame`]s to any number of consumers.
pub struct FanoutBus {
    consumers: DashMap<u64, Arc<ConsumerShared>>,
    next_id: AtomicU64,
    queue_frames: usize,
    params: RwLock<WidebandParams>,
    frames_published: AtomicU64,
}

impl FanoutBus {
    /// Creates a bus with the configured per-consumer queue depth.
    pub fn new(config: &StreamingConfig) -> Self {
        Self {
            consumers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_frames: config.fanout_queue_frames,
            params: RwLock::new(WidebandParams::default()),
            frames_published: AtomicU64::new(0),
        }
    }

    /// Registers a new consumer. The returned handle unsubscribes on drop.
    pub fn subscribe(self: &Arc<Self>) -> FanoutConsumer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(ConsumerShared::new(self.queue_frames));
        self.consumers.insert(id, Arc::clone(&shared));
        log::debug!(
            "[Bus] Consumer {} subscribed (total: {})",
            id,
            self.consumers.len()
        );
        FanoutConsumer {
            id,
            shared,
            bus: Arc::clone(self),
        }
    }

    /// Publishes a frame to every consumer without blocking.
    ///
    /// Full queues drop their oldest frame first; order within a consumer
    /// is always the producer's order.
    pub fn publish(&self, frame: IqFrame) {
        {
            let mut params = self.params.write();
            if params.generation != frame.generation
                || params.sample_rate_hz != frame.sample_rate_hz
            {
                *params = WidebandParams {
                    sample_rate_hz: frame.sample_rate_hz,
                    center_hz: frame.center_hz,
                    generation: frame.generation,
                };
            }
        }
        self.frames_published.fetch_add(1, Ordering::Relaxed);

        for entry in self.consumers.iter() {
            let shared = entry.value();
            {
                let mut queue = shared.queue.lock();
                if queue.len() >= shared.capacity {
                    queue.pop_front();
                    shared.record_drop();
                }
                queue.push_back(frame.clone());
            }
            shared.notify.notify_one();
        }
    }

    /// Current wideband parameters (rate, center, generation).
    #[must_use]
    pub fn params(&self) -> WidebandParams {
        *self.params.read()
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Total frames published since startup.
    #[must_use]
    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    fn unsubscribe(&self, id: u64) {
        if let Some((_, shared)) = self.consumers.remove(&id) {
            shared.closed.store(true, Ordering::Relaxed);
            shared.notify.notify_waiters();
            log::debug!(
                "[Bus] Consumer {} unsubscribed (remaining: {})",
                id,
                self.consumers.len()
            );
        }
    }
}

/// Receiving end of one fan-out subscription.
pub struct FanoutConsumer {
    id: u64,
    shared: Arc<ConsumerShared>,
    bus: Arc<FanoutBus>,
}

impl FanoutConsumer {
    /// Receives the next frame, waiting if the queue is empty.
    ///
    /// Returns `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<IqFrame> {
        loop {
            if let Some(frame) = self.shared.queue.lock().pop_front() {
                return Some(frame);
            }
            if self.shared.closed.load(Ordering::Relaxed) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Pops a frame without waiting.
    pub fn try_recv(&mut self) -> Option<IqFrame> {
        self.shared.queue.lock().pop_front()
    }

    /// Total frames dropped from this consumer's queue.
    #[must_use]
    pub fn drops(&self) -> u64 {
        self.shared.dropped_total.load(Ordering::Relaxed)
    }

    /// Whether the windowed drop rate crossed the eviction threshold.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.shared.unhealthy.load(Ordering::Relaxed)
    }
}

impl Drop for FanoutConsumer {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
