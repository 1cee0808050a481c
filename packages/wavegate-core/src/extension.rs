//! Audio-extension host: uniform integration of audio-domain decoders.
//!
//! Decoders (NAVTEX, WEFAX, SSTV, FT8, CW, RTTY, ...) live behind the
//! [`AudioExtension`] trait and are registered by name. The host feeds a
//! decoder mono int16 PCM through a bounded queue — dropping frames when
//! the decoder lags rather than blocking the DSP pipeline — and forwards
//! the decoder's opaque binary output to the owning session verbatim.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::{WavegateError, WavegateResult};
use crate::frame::PcmFrame;
use crate::protocol_constants::EXTENSION_QUEUE_FRAMES;

/// Audio parameters a decoder is constructed with. The host always feeds
/// mono 16-bit PCM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParams {
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub bits: u8,
}

impl AudioParams {
    /// Parameters for a mono stream at `sample_rate_hz`.
    #[must_use]
    pub fn mono(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            channels: 1,
            bits: 16,
        }
    }
}

/// Decoder-specific options from the attach control message.
pub type UserParams = HashMap<String, serde_json::Value>;

/// A running decoder instance.
#[async_trait]
pub trait AudioExtension: Send {
    /// Decoder name (matches the registered factory name).
    fn name(&self) -> &str;

    /// Starts the decoder: it consumes `pcm_in` and writes opaque binary
    /// frames to `bin_out` until `pcm_in` closes or `stop` is called.
    async fn start(
        &mut self,
        pcm_in: mpsc::Receiver<PcmFrame>,
        bin_out: mpsc::Sender<Bytes>,
    ) -> WavegateResult<()>;

    /// Stops the decoder and releases its tasks.
    async fn stop(&mut self) -> WavegateResult<()>;
}

/// Constructs decoder instances; validates `user_params`.
pub trait ExtensionFactory: Send + Sync {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// Builds a decoder for the given audio format and options.
    fn create(
        &self,
        audio: AudioParams,
        params: &UserParams,
    ) -> WavegateResult<Box<dyn AudioExtension>>;
}

/// Process-wide registry of extension factories, populated at startup.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: DashMap<&'static str, Arc<dyn ExtensionFactory>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under its name. Later registrations win.
    pub fn register(&self, factory: Arc<dyn ExtensionFactory>) {
        log::info!("[Extension] Registered decoder '{}'", factory.name());
        self.factories.insert(factory.name(), factory);
    }

    /// Registered names, for the state snapshot.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    /// Creates and starts a decoder, wiring its queues.
    ///
    /// Returns the host-side binding and the decoder's binary output
    /// stream. Unknown names are rejected here, at control-message time.
    pub async fn attach(
        &self,
        name: &str,
        audio: AudioParams,
        params: &UserParams,
    ) -> WavegateResult<(ExtensionBinding, mpsc::Receiver<Bytes>)> {
        let factory = self
            .factories
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| WavegateError::UnknownExtension(name.to_string()))?;

        let mut extension = factory.create(audio, params)?;
        let (pcm_tx, pcm_rx) = mpsc::channel(EXTENSION_QUEUE_FRAMES);
        let (bin_tx, bin_rx) = mpsc::channel(64);
        extension.start(pcm_rx, bin_tx).await?;

        Ok((
            ExtensionBinding {
                name: name.to_string(),
                pcm_tx,
                extension,
                dropped: AtomicU64::new(0),
            },
            bin_rx,
        ))
    }
}

/// Host side of one attached decoder. Owned by the session that attached
/// it; its lifetime never exceeds the session's.
pub struct ExtensionBinding {
    name: String,
    pcm_tx: mpsc::Sender<PcmFrame>,
    extension: Box<dyn AudioExtension>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for ExtensionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionBinding")
            .field("name", &self.name)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl ExtensionBinding {
    /// Attached decoder name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames dropped because the decoder fell behind.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Delivers one mono PCM frame to the decoder without blocking.
    ///
    /// The host is the single writer, so `gps_ts_ns` is monotonic on this
    /// queue; a full queue drops the frame and bumps the counter.
    pub fn push_pcm(&self, frame: PcmFrame) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.pcm_tx.try_send(frame) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 100 == 1 {
                log::warn!(
                    "[Extension] Decoder '{}' lagging, {} frames dropped",
                    self.name,
                    dropped
                );
            }
        }
    }

    /// Detaches: closes the PCM queue and stops the decoder.
    pub async fn detach(mut self) {
        // Closing the sender lets a well-behaved decoder drain and exit.
        drop(self.pcm_tx);
        if let Err(e) = self.extension.stop().await {
            log::warn!("[Extension] Decoder '{}' stop failed: {}", self.name, e);
        }
        log::info!("[Extension] Decoder '{}' detached", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    /// Test decoder: emits one binary frame per PCM frame containing the
    /// frame's sample count.
    struct CountingDecoder {
        task: Option<tokio::task::JoinHandle<()>>,
    }

    struct CountingFactory;

    impl ExtensionFactory for CountingFactory {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn create(
            &self,
            audio: AudioParams,
            params: &UserParams,
        ) -> WavegateResult<Box<dyn AudioExtension>> {
            if audio.channels != 1 {
                return Err(WavegateError::InvalidRequest(
                    "decoder requires mono".into(),
                ));
            }
            if let Some(value) = params.get("mode") {
                if !value.is_string() {
                    return Err(WavegateError::InvalidRequest("mode must be a string".into()));
                }
            }
            Ok(Box::new(CountingDecoder { task: None }))
        }
    }

    #[async_trait]
    impl AudioExtension for CountingDecoder {
        fn name(&self) -> &str {
            "counting"
        }

        async fn start(
            &mut self,
            mut pcm_in: mpsc::Receiver<PcmFrame>,
            bin_out: mpsc::Sender<Bytes>,
        ) -> WavegateResult<()> {
            self.task = Some(tokio::spawn(async move {
                while let Some(frame) = pcm_in.recv().await {
                    let mut out = bytes::BytesMut::with_capacity(4);
                    out.put_u32(frame.samples.len() as u32);
                    if bin_out.send(out.freeze()).await.is_err() {
                        break;
                    }
                }
            }));
            Ok(())
        }

        async fn stop(&mut self) -> WavegateResult<()> {
            if let Some(task) = self.task.take() {
                let _ = task.await;
            }
            Ok(())
        }
    }

    fn registry() -> ExtensionRegistry {
        let registry = ExtensionRegistry::new();
        registry.register(Arc::new(CountingFactory));
        registry
    }

    fn pcm(n: usize, gps: u64) -> PcmFrame {
        PcmFrame {
            samples: vec![0i16; n],
            channels: 1,
            sample_rate_hz: 12_000,
            gps_ts_ns: gps,
        }
    }

    #[tokio::test]
    async fn attach_forwards_pcm_and_returns_binary() {
        let registry = registry();
        let (binding, mut bin_rx) = registry
            .attach("counting", AudioParams::mono(12_000), &UserParams::new())
            .await
            .unwrap();

        binding.push_pcm(pcm(240, 1));
        binding.push_pcm(pcm(480, 2));

        assert_eq!(&bin_rx.recv().await.unwrap()[..], &240u32.to_be_bytes());
        assert_eq!(&bin_rx.recv().await.unwrap()[..], &480u32.to_be_bytes());
        binding.detach().await;
    }

    #[tokio::test]
    async fn unknown_name_is_rejected() {
        let registry = registry();
        let err = registry
            .attach("sstv", AudioParams::mono(12_000), &UserParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WavegateError::UnknownExtension(_)));
    }

    #[tokio::test]
    async fn factory_validates_user_params() {
        let registry = registry();
        let mut params = UserParams::new();
        params.insert("mode".to_string(), serde_json::json!(42));
        let err = registry
            .attach("counting", AudioParams::mono(12_000), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, WavegateError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn attach_then_detach_leaves_no_task() {
        let registry = registry();
        let (binding, mut bin_rx) = registry
            .attach("counting", AudioParams::mono(12_000), &UserParams::new())
            .await
            .unwrap();
        // detach() joins the decoder task; the binary channel then closes.
        binding.detach().await;
        assert!(bin_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let registry = registry();
        let (binding, _bin_rx) = registry
            .attach("counting", AudioParams::mono(12_000), &UserParams::new())
            .await
            .unwrap();
        // The decoder's output channel is never read here, so it stalls and
        // the PCM queue fills. Push far past the queue depth.
        for i in 0..(EXTENSION_QUEUE_FRAMES as u64 + 200) {
            binding.push_pcm(pcm(240, i));
        }
        assert!(binding.dropped() > 0);
    }
}
